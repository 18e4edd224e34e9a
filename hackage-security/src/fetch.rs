// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::{self, Result};
use crate::io::{DigestAdapter, MaxSizeAdapter};
use crate::transport::Transport;
use snafu::ResultExt;
use std::io::Read;
use url::Url;

/// Fetches `url`, returning a reader that fails if the stream yields more
/// than `max_size` bytes.
pub(crate) fn fetch_max_size(
    transport: &dyn Transport,
    url: Url,
    max_size: u64,
    specifier: &'static str,
) -> Result<MaxSizeAdapter<Box<dyn Read + Send>>> {
    let reader = transport
        .fetch(url.clone())
        .context(error::Transport { url })?;
    Ok(MaxSizeAdapter::new(reader, specifier, max_size))
}

/// Fetches `url`, returning a reader that enforces the size bound and checks
/// the stream's SHA-256 digest at end-of-file.
pub(crate) fn fetch_sha256(
    transport: &dyn Transport,
    url: Url,
    size: u64,
    specifier: &'static str,
    sha256: &[u8],
) -> Result<DigestAdapter<MaxSizeAdapter<Box<dyn Read + Send>>>> {
    let reader = fetch_max_size(transport, url.clone(), size, specifier)?;
    Ok(DigestAdapter::sha256(reader, sha256, url))
}

/// Fetches the suffix of `url`'s file starting at byte `start`, for
/// transports that can resume. Used only for incremental index updates;
/// callers fall back to a full fetch on any error.
pub(crate) fn fetch_from(
    transport: &dyn Transport,
    url: Url,
    start: u64,
    max_size: u64,
    specifier: &'static str,
) -> Result<MaxSizeAdapter<Box<dyn Read + Send>>> {
    let reader = transport
        .fetch_from(url.clone(), start)
        .context(error::Transport { url })?;
    Ok(MaxSizeAdapter::new(reader, specifier, max_size))
}
