// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! On-disk persistence of verified repository state. The cache directory is
//! exclusively owned by its `Cache`: verified metadata, the package index,
//! and the index's offset table all live here, and every mutation is an
//! atomic rename so readers never observe a partial write.

use crate::error::{self, Result};
use crate::index::{self, TarIndex};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use log::debug;
use ring::digest::{Context, SHA256};
use serde::Serialize;
use snafu::{ensure, ResultExt};
use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Name of the cached package index tar.
pub(crate) const INDEX_TAR: &str = "00-index.tar";
/// Name of the offset table cached next to the index tar.
pub(crate) const INDEX_IDX: &str = "00-index.tar.idx";
/// Name of the compressed index variant, kept when the repository served
/// the gzip form.
pub(crate) const INDEX_TAR_GZ: &str = "00-index.tar.gz";

/// Name of the file recording the latest system time this cache has
/// observed.
const KNOWN_TIME: &str = "latest_known_time.json";

/// The four metadata files the cache persists. The targets role is read
/// through the package index rather than cached on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachedFile {
    /// The trust anchor, `root.json`.
    Root,
    /// The most recently verified `timestamp.json`.
    Timestamp,
    /// The most recently verified `snapshot.json`.
    Snapshot,
    /// The most recently verified `mirrors.json`.
    Mirrors,
}

impl CachedFile {
    /// The file's name within the cache directory.
    pub fn filename(self) -> &'static str {
        match self {
            CachedFile::Root => "root.json",
            CachedFile::Timestamp => "timestamp.json",
            CachedFile::Snapshot => "snapshot.json",
            CachedFile::Mirrors => "mirrors.json",
        }
    }
}

/// Compression applied to a remote file's on-the-wire form. Dispatch on the
/// format happens at cache-install time; callers always see decompressed
/// content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// The file was served uncompressed.
    Raw,
    /// The file was served gzip-compressed.
    Gzip,
}

/// What to do with a verified download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Install the (decompressed) file as one of the cached metadata files.
    CacheAs(CachedFile),
    /// Install the package index and refresh its offset table.
    CacheIndex,
}

/// `Cache` persists verified metadata and the package index under a single
/// directory. It assumes a single process and a single writer; readers of a
/// cache directory owned by another live `Cache` are on their own.
#[derive(Debug, Clone)]
pub struct Cache {
    root: PathBuf,
}

impl Cache {
    /// Opens the cache rooted at `path`, creating the directory if needed.
    pub fn open(path: &Path) -> Result<Self> {
        fs::create_dir_all(path).context(error::CacheDirectoryCreate { path })?;
        Ok(Self {
            root: path.to_owned(),
        })
    }

    /// The cache directory.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Returns the path to a cached metadata file, or `None` if it has not
    /// been cached.
    pub fn get_cached(&self, file: CachedFile) -> Option<PathBuf> {
        let path = self.root.join(file.filename());
        if path.is_file() {
            Some(path)
        } else {
            None
        }
    }

    /// Returns the path to the cached root document. A missing root means
    /// the bootstrap precondition was violated, which no amount of fetching
    /// can repair, so absence is an error rather than `None`.
    pub fn get_cached_root(&self) -> Result<PathBuf> {
        let path = self.root.join(CachedFile::Root.filename());
        ensure!(path.is_file(), error::RootNotBootstrapped { path });
        Ok(path)
    }

    /// Get a reader for a file in the cache directory, or `None` if the file
    /// does not exist.
    pub(crate) fn reader(&self, file: &str) -> Result<Option<File>> {
        let path = self.root.join(file);
        match File::open(&path) {
            Ok(file) => Ok(Some(file)),
            Err(err) => match err.kind() {
                ErrorKind::NotFound => Ok(None),
                _ => Err(err).context(error::CacheFileRead { path }),
            },
        }
    }

    /// Deletes a file from the cache directory. Missing files are not an
    /// error.
    fn remove(&self, file: &str) -> Result<()> {
        let path = self.root.join(file);
        debug!("removing '{}'", path.display());
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) => match err.kind() {
                ErrorKind::NotFound => Ok(()),
                _ => Err(err).context(error::CacheFileWrite { path }),
            },
        }
    }

    /// Removes the cached timestamp and snapshot files. Roots and the
    /// package index survive; they are re-verified against the next
    /// snapshot instead of being thrown away.
    pub fn clear_cache(&self) -> Result<()> {
        let r1 = self.remove(CachedFile::Timestamp.filename());
        let r2 = self.remove(CachedFile::Snapshot.filename());
        r1.and(r2)
    }

    /// Atomically installs the verified temp file at `tmp` according to
    /// `policy`, decompressing `Format::Gzip` content on the way. When the
    /// index is installed its offset table is refreshed as well.
    pub fn cache_remote_file(&self, tmp: &Path, format: Format, policy: CachePolicy) -> Result<()> {
        match policy {
            CachePolicy::CacheAs(file) => match format {
                Format::Raw => {
                    self.install_file(tmp, file.filename())?;
                }
                // Not currently requested by the update engine, which always
                // prefers the raw form for metadata, but gzip metadata
                // installs the same way the gzip index does.
                Format::Gzip => {
                    self.install_decompressed(tmp, file.filename())?;
                }
            },
            CachePolicy::CacheIndex => {
                match format {
                    Format::Raw => {
                        self.install_file(tmp, INDEX_TAR)?;
                    }
                    Format::Gzip => {
                        // keep the compressed bytes alongside the tar; a
                        // future incremental fetch can diff against them
                        self.install_file(tmp, INDEX_TAR_GZ)?;
                        self.install_decompressed(tmp, INDEX_TAR)?;
                    }
                }
                self.refresh_index()?;
            }
        }
        Ok(())
    }

    /// Resolves `entry_path` through the tar index and returns the entry's
    /// content. A missing or corrupt offset table is rebuilt once from the
    /// tar itself; if the rebuilt table still cannot resolve the entry, the
    /// entry does not exist.
    pub fn get_from_index(&self, entry_path: &str) -> Result<Option<Vec<u8>>> {
        if !self.root.join(INDEX_TAR).is_file() {
            return Ok(None);
        }
        match self.index_lookup(entry_path) {
            Ok(found) => Ok(found),
            Err(err) => {
                debug!("rebuilding package index after lookup failure: {}", err);
                self.rebuild_index()?;
                // a second failure means the entry is unresolvable, not that
                // the cache is unusable
                Ok(self.index_lookup(entry_path).unwrap_or(None))
            }
        }
    }

    fn index_lookup(&self, entry_path: &str) -> Result<Option<Vec<u8>>> {
        let index = TarIndex::read_from(&self.root.join(INDEX_IDX))?;
        let entry = match index.lookup(entry_path) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let tar_path = self.root.join(INDEX_TAR);
        let mut file = File::open(&tar_path).context(error::CacheFileRead { path: &tar_path })?;
        file.seek(SeekFrom::Start(entry.offset))
            .context(error::CacheFileRead { path: &tar_path })?;
        let mut content = vec![0; entry.length as usize];
        file.read_exact(&mut content)
            .context(error::CacheFileRead { path: &tar_path })?;
        Ok(Some(content))
    }

    /// Rebuilds the offset table from scratch and writes it next to the
    /// tar.
    fn rebuild_index(&self) -> Result<()> {
        let index = index::build(&self.root.join(INDEX_TAR), None)?;
        index.write_to(&self.root.join(INDEX_IDX))
    }

    /// Brings the offset table up to date with the tar, seeding the build
    /// from the existing table when it is readable so only appended entries
    /// are scanned.
    fn refresh_index(&self) -> Result<()> {
        let idx_path = self.root.join(INDEX_IDX);
        let seed = TarIndex::read_from(&idx_path).ok();
        let index = index::build(&self.root.join(INDEX_TAR), seed)?;
        index.write_to(&idx_path)
    }

    /// Makes sure a readable offset table exists for the cached tar.
    pub(crate) fn ensure_index(&self) -> Result<()> {
        if TarIndex::read_from(&self.root.join(INDEX_IDX)).is_ok() {
            return Ok(());
        }
        self.rebuild_index()
    }

    pub(crate) fn index_tar_path(&self) -> PathBuf {
        self.root.join(INDEX_TAR)
    }

    /// Installs `data` as `name` in the cache directory.
    pub(crate) fn install_slice(&self, data: &[u8], name: &str) -> Result<()> {
        self.install_from(&mut &data[..], name)
    }

    fn install_file(&self, src: &Path, name: &str) -> Result<()> {
        let mut reader = File::open(src).context(error::CacheFileRead { path: src })?;
        self.install_from(&mut reader, name)
    }

    fn install_decompressed(&self, src: &Path, name: &str) -> Result<()> {
        let file = File::open(src).context(error::CacheFileRead { path: src })?;
        let mut decoder = GzDecoder::new(file);
        self.install_from(&mut decoder, name)
    }

    /// The single write path for the cache: stream into a temp file in the
    /// cache directory, flush it to disk, and rename it over the
    /// destination. The containing directory is not fsynced; a crash within
    /// that window may lose the rename but cannot surface a partial file.
    fn install_from(&self, reader: &mut dyn Read, name: &str) -> Result<()> {
        let dest = self.root.join(name);
        let mut tmp =
            NamedTempFile::new_in(&self.root).context(error::FileTempCreate { path: &self.root })?;
        io::copy(reader, &mut tmp).context(error::CacheFileWrite { path: &dest })?;
        tmp.as_file()
            .sync_all()
            .context(error::FileSync { path: &dest })?;
        tmp.persist(&dest).context(error::FilePersist { path: &dest })?;
        debug!("installed '{}'", dest.display());
        Ok(())
    }

    /// Returns the length and SHA-256 digest of a file in the cache
    /// directory, or `None` if the file does not exist.
    pub(crate) fn file_sha256(&self, name: &str) -> Result<Option<(u64, Vec<u8>)>> {
        let file = match self.reader(name)? {
            Some(file) => file,
            None => return Ok(None),
        };
        hash_reader(file, &self.root.join(name)).map(Some)
    }

    /// Ensures that system time has not stepped backward since it was last
    /// sampled by this cache, then records the new sample.
    pub(crate) fn system_time(&self) -> Result<DateTime<Utc>> {
        // Load the latest known system time, if it exists
        let poss_latest_known_time = self
            .reader(KNOWN_TIME)?
            .map(serde_json::from_reader::<_, DateTime<Utc>>);

        // Get 'current' system time
        let sys_time = Utc::now();

        if let Some(Ok(latest_known_time)) = poss_latest_known_time {
            // Make sure the sampled system time did not go back in time
            ensure!(
                sys_time >= latest_known_time,
                error::SystemTimeSteppedBackward {
                    sys_time,
                    latest_known_time
                }
            );
        }
        // Serializes an RFC 3339 time string and stores it in the cache
        self.write_json(KNOWN_TIME, &sys_time)?;
        Ok(sys_time)
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let buf = serde_json::to_vec_pretty(value).context(error::JsonSerialize { what: name })?;
        self.install_slice(&buf, name)
    }
}

/// Hashes a reader to completion, returning its length and SHA-256 digest.
pub(crate) fn hash_reader(mut reader: impl Read, path: &Path) -> Result<(u64, Vec<u8>)> {
    let mut digest = Context::new(&SHA256);
    let mut buf = [0; 8 * 1024];
    let mut length = 0u64;
    loop {
        let size = reader
            .read(&mut buf)
            .context(error::CacheFileRead { path })?;
        if size == 0 {
            break;
        }
        digest.update(&buf[..size]);
        length += size as u64;
    }
    Ok((length, digest.finish().as_ref().to_vec()))
}
