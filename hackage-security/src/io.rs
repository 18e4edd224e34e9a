// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::{self, Error};
use ring::constant_time::verify_slices_are_equal;
use ring::digest::{Context, SHA256};
use std::io::{self, ErrorKind, Read};
use url::Url;

/// Converts a library error into an `io::Error` so it can travel through a
/// `Read` implementation. The original error is recovered downstream with
/// `io::Error::get_ref`.
fn wrap(error: Error) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, error)
}

/// Wraps a `Read` and fails once more than `max_size` bytes have been read
/// from it, so that a malicious or broken server cannot feed us endless
/// data.
pub(crate) struct MaxSizeAdapter<R> {
    reader: R,
    /// Names the document or argument the limit came from, for diagnostics.
    specifier: &'static str,
    max_size: u64,
    counter: u64,
}

impl<R> MaxSizeAdapter<R> {
    pub(crate) fn new(reader: R, specifier: &'static str, max_size: u64) -> Self {
        Self {
            reader,
            specifier,
            max_size,
            counter: 0,
        }
    }
}

impl<R: Read> Read for MaxSizeAdapter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let size = self.reader.read(buf)?;
        self.counter = self.counter.saturating_add(size as u64);
        if self.counter > self.max_size {
            return Err(wrap(
                error::MaxSizeExceeded {
                    max_size: self.max_size,
                    specifier: self.specifier,
                }
                .build(),
            ));
        }
        Ok(size)
    }
}

/// Wraps a `Read` and computes the SHA-256 digest of its contents as they
/// stream through, failing at end-of-file if the digest does not match the
/// expected hash. **Consumers must not use data read through this adapter
/// until end-of-file is reached without error.**
pub(crate) struct DigestAdapter<R> {
    url: Url,
    reader: R,
    hash: Vec<u8>,
    digest: Option<Context>,
}

impl<R: Read> DigestAdapter<R> {
    pub(crate) fn sha256(reader: R, hash: &[u8], url: Url) -> Self {
        Self {
            url,
            reader,
            hash: hash.to_owned(),
            digest: Some(Context::new(&SHA256)),
        }
    }
}

impl<R: Read> Read for DigestAdapter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let size = self.reader.read(buf)?;
        if size == 0 {
            // The digest is checked exactly once, at the first end-of-file.
            if let Some(digest) = self.digest.take() {
                let calculated = digest.finish();
                if verify_slices_are_equal(calculated.as_ref(), &self.hash).is_err() {
                    return Err(wrap(
                        error::HashMismatch {
                            context: self.url.to_string(),
                            calculated: hex::encode(calculated),
                            expected: hex::encode(&self.hash),
                        }
                        .build(),
                    ));
                }
            }
            return Ok(0);
        }
        if let Some(digest) = self.digest.as_mut() {
            digest.update(&buf[..size]);
        }
        Ok(size)
    }
}
