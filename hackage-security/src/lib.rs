// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! hackage-security is a client library for Hackage-style package
//! repositories secured with [TUF]-style signed metadata.
//!
//! The client verifies a chain of signed role files (root → timestamp →
//! snapshot → targets/mirrors) before trusting anything a repository or one
//! of its mirrors serves, protecting against rollback, freeze, and
//! mix-and-match attacks. Verified metadata and the package index are kept
//! in an on-disk cache that is only ever mutated by atomic renames.
//!
//! A client bootstraps trust once with out-of-band root key fingerprints,
//! then refreshes its view of the repository with
//! [`Repository::check_for_updates`] and downloads verified package
//! archives with [`Repository::save_package`].
//!
//! [TUF]: https://theupdateframework.github.io/
//!
//! # Testing
//!
//! Unit tests are run in the usual manner: `cargo test`.

#![forbid(missing_debug_implementations, missing_copy_implementations)]
#![deny(rust_2018_idioms)]
// missing_docs is on its own line to make it easy to comment out when making changes.
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc
)]

mod cache;
pub mod error;
mod fetch;
#[cfg(feature = "http")]
pub mod http;
mod index;
mod io;
mod package;
pub mod schema;
mod transport;

pub use crate::cache::{Cache, CachePolicy, CachedFile, Format};
#[cfg(feature = "http")]
pub use crate::http::{ClientSettings, HttpReader, HttpTransport};
pub use crate::package::PackageId;
pub use crate::transport::{
    DefaultTransport, FilesystemTransport, Transport, TransportError, TransportErrorKind,
};

use crate::error::Result;
use crate::fetch::{fetch_max_size, fetch_sha256};
use crate::schema::{
    FileInfo, Mirrors, Role, RoleType, Root, Signed, Snapshot, Targets, Timestamp,
};
use log::debug;
use snafu::{ensure, OptionExt, ResultExt};
use std::borrow::Cow;
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use url::Url;

/// Remote name of the uncompressed package index.
const INDEX_REMOTE_TAR: &str = "01-index.tar";
/// Remote name of the gzip-compressed package index.
const INDEX_REMOTE_TAR_GZ: &str = "01-index.tar.gz";

/// Represents whether a repository should fail to update when metadata is
/// expired (`Safe`) or whether it should ignore expired metadata (`Unsafe`).
/// Only use `Unsafe` if you are sure you need it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationEnforcement {
    /// Expirations will be enforced. You MUST use this option to get the
    /// freeze-attack protections this library exists to provide.
    Safe,

    /// Expirations will not be enforced. This is available for offline
    /// inspection of a stale cache, does NOT provide freeze protection, and
    /// should only be used if you are sure that you need it.
    Unsafe,
}

/// `ExpirationEnforcement` defaults to `Safe` mode.
impl Default for ExpirationEnforcement {
    fn default() -> Self {
        ExpirationEnforcement::Safe
    }
}

impl From<bool> for ExpirationEnforcement {
    fn from(b: bool) -> Self {
        if b {
            ExpirationEnforcement::Safe
        } else {
            ExpirationEnforcement::Unsafe
        }
    }
}

impl From<ExpirationEnforcement> for bool {
    fn from(ee: ExpirationEnforcement) -> Self {
        ee == ExpirationEnforcement::Safe
    }
}

/// Limits used when fetching repository metadata.
///
/// These limits exist to prevent endless-data attacks for the files whose
/// size is not pinned by a parent document (the root chain and the
/// timestamp). Everything else is bounded by the length recorded in the
/// document that pins it.
///
/// The [`Default`] implementation sets the following values:
/// * `max_root_size`: 1 MiB
/// * `max_timestamp_size`: 1 MiB
/// * `max_root_updates`: 1024
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// The maximum allowable size in bytes for downloaded root.json files.
    pub max_root_size: u64,

    /// The maximum allowable size in bytes for the downloaded
    /// timestamp.json file.
    pub max_timestamp_size: u64,

    /// The maximum number of updates to root.json to download in one
    /// update.
    pub max_root_updates: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_root_size: 1024 * 1024,      // 1 MiB
            max_timestamp_size: 1024 * 1024, // 1 MiB
            max_root_updates: 1024,
        }
    }
}

/// Repository settings, provided to [`Repository::load`].
#[derive(Debug, Clone, Copy)]
pub struct Settings<'a> {
    /// A directory on a persistent filesystem where verified metadata and
    /// the package index are cached. The same directory must previously
    /// have been populated by [`Repository::bootstrap`].
    pub cache_dir: &'a Path,

    /// The base URL of the repository. Additional mirrors are discovered
    /// through the repository's signed mirror list.
    pub repository_base_url: &'a str,

    /// Limits used when fetching repository metadata.
    pub limits: Limits,

    /// Metadata expiration enforcement.
    ///
    /// CAUTION: expiration dates, particularly on timestamp.json, are what
    /// bounds a replay attack window. Use `Safe` unless you have a good
    /// reason not to.
    pub expiration_enforcement: ExpirationEnforcement,
}

/// Settings for [`Repository::bootstrap`], which establishes the root of
/// trust for a cache directory.
#[derive(Debug, Clone, Copy)]
pub struct BootstrapSettings<'a> {
    /// A directory on a persistent filesystem where verified metadata and
    /// the package index will be cached.
    pub cache_dir: &'a Path,

    /// The base URL of the repository.
    pub repository_base_url: &'a str,

    /// Hex-encoded key IDs of root keys obtained out-of-band. The fetched
    /// root document must declare, and be signed by, at least `threshold`
    /// of these keys.
    pub root_key_ids: &'a [String],

    /// How many of `root_key_ids` must be declared and must have signed the
    /// root document. The root document's own threshold is enforced in
    /// addition to this one.
    pub threshold: u64,

    /// Limits used when fetching repository metadata.
    pub limits: Limits,
}

/// The outcome of [`Repository::check_for_updates`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    /// The cache already described the repository's current state.
    NoUpdates,
    /// New metadata (and possibly a new package index) was verified and
    /// cached.
    HasUpdates,
}

/// A Hackage-style TUF repository.
///
/// The in-memory role documents are immutable snapshots of verified files;
/// [`check_for_updates`](Repository::check_for_updates) replaces them
/// wholesale, it never edits them.
#[derive(Debug, Clone)]
pub struct Repository<'a, T: Transport> {
    transport: &'a T,
    cache: Cache,
    base_url: Url,
    limits: Limits,
    expiration_enforcement: ExpirationEnforcement,
    root: Signed<Root>,
    timestamp: Option<Signed<Timestamp>>,
    snapshot: Option<Signed<Snapshot>>,
    mirrors: Option<Signed<Mirrors>>,
    targets: Option<Signed<Targets>>,
}

impl<'a, T: Transport> Repository<'a, T> {
    /// Establishes trust in a repository by fetching its root document and
    /// checking it against key fingerprints obtained out-of-band.
    ///
    /// At least `threshold` of the root keys the document declares must
    /// appear in `root_key_ids`, and at least `threshold` of those matching
    /// keys must have produced valid signatures over the document. The
    /// document must additionally satisfy its own declared root threshold.
    /// On success the document is installed as the cache's trust anchor;
    /// on failure nothing is written.
    pub fn bootstrap(transport: &T, settings: &BootstrapSettings<'_>) -> Result<()> {
        ensure!(
            settings.threshold >= 1,
            error::InvalidThreshold {
                threshold: settings.threshold
            }
        );
        let cache = Cache::open(settings.cache_dir)?;
        let base_url = parse_url(settings.repository_base_url)?;

        let url = join_url(&base_url, "root.json")?;
        let mut reader = fetch_max_size(
            transport,
            url.clone(),
            settings.limits.max_root_size,
            "max_root_size argument",
        )?;
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .context(error::FetchRead { url })?;

        let root: Signed<Root> =
            serde_json::from_slice(&data).context(error::ParseTrustedMetadata)?;
        root.signed
            .check_role_keys()
            .context(error::VerifyTrustedMetadata)?;

        // The caller's fingerprints and the document's declared root keys
        // must agree on at least `threshold` keys.
        let spec = root
            .signed
            .role_spec(RoleType::Root)
            .context(error::VerifyTrustedMetadata)?;
        let matched: HashSet<_> = spec
            .keyids
            .iter()
            .filter(|keyid| {
                settings
                    .root_key_ids
                    .iter()
                    .any(|fingerprint| fingerprint.eq_ignore_ascii_case(&hex::encode(keyid)))
            })
            .collect();
        ensure!(
            matched.len() as u64 >= settings.threshold,
            error::BootstrapKeysUntrusted {
                matched: matched.len() as u64,
                threshold: settings.threshold,
            }
        );

        // The document must satisfy its own threshold with its own keys...
        root.signed
            .verify_role(&root)
            .context(error::VerifyTrustedMetadata)?;

        // ...and the caller's threshold with the fingerprinted keys.
        let canonical = root
            .signed
            .canonical_form()
            .context(error::VerifyTrustedMetadata)?;
        let mut valid = HashSet::new();
        for signature in &root.signatures {
            if !matched.contains(&signature.keyid) {
                continue;
            }
            if let Some(key) = root.signed.keys.get(&signature.keyid) {
                if key.verify(&canonical, &signature.sig) {
                    valid.insert(&signature.keyid);
                }
            }
        }
        ensure!(
            valid.len() as u64 >= settings.threshold,
            error::BootstrapSignatures {
                valid: valid.len() as u64,
                threshold: settings.threshold,
            }
        );

        cache.install_slice(&data, CachedFile::Root.filename())
    }

    /// Loads the trusted repository state from a bootstrapped cache. No
    /// network requests are made; run
    /// [`check_for_updates`](Repository::check_for_updates) to refresh the
    /// trusted state from the repository.
    ///
    /// Cached non-root metadata is revived only if it still verifies
    /// against the trusted root (and, in `Safe` mode, has not expired);
    /// anything else is ignored and will be refetched.
    pub fn load(transport: &'a T, settings: Settings<'_>) -> Result<Self> {
        let cache = Cache::open(settings.cache_dir)?;
        let base_url = parse_url(settings.repository_base_url)?;

        let root_path = cache.get_cached_root()?;
        let root: Signed<Root> = serde_json::from_reader(
            File::open(&root_path).context(error::CacheFileRead { path: &root_path })?,
        )
        .context(error::ParseTrustedMetadata)?;
        root.signed
            .check_role_keys()
            .context(error::VerifyTrustedMetadata)?;
        root.signed
            .verify_role(&root)
            .context(error::VerifyTrustedMetadata)?;
        // An expired root is not rejected here; the next update's root
        // chain walk is what can un-expire it.

        let timestamp = revive_role::<Timestamp>(
            &cache,
            CachedFile::Timestamp,
            &root,
            settings.expiration_enforcement,
        )?;
        let snapshot = revive_role::<Snapshot>(
            &cache,
            CachedFile::Snapshot,
            &root,
            settings.expiration_enforcement,
        )?;
        let mirrors = revive_role::<Mirrors>(
            &cache,
            CachedFile::Mirrors,
            &root,
            settings.expiration_enforcement,
        )?;

        Ok(Self {
            transport,
            cache,
            base_url,
            limits: settings.limits,
            expiration_enforcement: settings.expiration_enforcement,
            root,
            timestamp,
            snapshot,
            mirrors,
            // the targets role is never cached; it is refetched per update
            // and resolved through the package index otherwise
            targets: None,
        })
    }

    /// Checks the repository for updated metadata, bringing the cache and
    /// the in-memory trusted state up to date.
    ///
    /// Role files are verified strictly in the order root → timestamp →
    /// snapshot → {targets, mirrors, index}, and nothing is cached before
    /// it is verified. Any failure leaves the previously trusted state
    /// intact.
    pub fn check_for_updates(&mut self) -> Result<UpdateStatus> {
        self.update_root_chain()?;

        let timestamp = self.update_timestamp()?;
        let snapshot_meta = timestamp
            .signed
            .meta
            .get("snapshot.json")
            .context(error::MetaMissing {
                file: "snapshot.json",
                role: RoleType::Timestamp,
            })?
            .clone();
        self.timestamp = Some(timestamp);

        // An unchanged snapshot means the cache already describes the
        // repository's current state; there is nothing further to fetch.
        if self.snapshot.is_some() && self.cached_file_matches(CachedFile::Snapshot.filename(), &snapshot_meta)? {
            return Ok(UpdateStatus::NoUpdates);
        }

        let snapshot = self.update_snapshot(&snapshot_meta)?;
        self.update_targets(&snapshot)?;
        self.update_mirrors(&snapshot)?;
        self.update_index(&snapshot)?;
        self.snapshot = Some(snapshot);
        Ok(UpdateStatus::HasUpdates)
    }

    /// Returns a reference to the trusted root document.
    pub fn root(&self) -> &Signed<Root> {
        &self.root
    }

    /// Returns the trusted timestamp document, if one has been verified.
    pub fn timestamp(&self) -> Option<&Signed<Timestamp>> {
        self.timestamp.as_ref()
    }

    /// Returns the trusted snapshot document, if one has been verified.
    pub fn snapshot(&self) -> Option<&Signed<Snapshot>> {
        self.snapshot.as_ref()
    }

    /// Returns the trusted mirror list, if one has been verified.
    pub fn mirrors(&self) -> Option<&Signed<Mirrors>> {
        self.mirrors.as_ref()
    }

    /// Returns the trusted top-level targets document, if this session has
    /// fetched one.
    pub fn targets(&self) -> Option<&Signed<Targets>> {
        self.targets.as_ref()
    }

    /// Returns the cache this repository reads and writes.
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Reads one file out of the cached package index, e.g.
    /// `"lens/5.2.3/lens.cabal"`. Returns `None` if the index does not
    /// contain the entry.
    pub fn read_index_entry(&self, entry_path: &str) -> Result<Option<Vec<u8>>> {
        self.cache.get_from_index(entry_path)
    }

    /// Fetches a package's source archive from the repository, returning a
    /// reader that verifies length and content hash as it streams.
    /// **Consumers must not use data from the reader if it returns an
    /// error.**
    pub fn read_package(&self, package: &PackageId) -> Result<impl Read + Send> {
        self.check_freshness()?;
        let (length, sha256) = self.package_file_info(package)?;
        let remote_path = package.tarball_path();
        self.with_mirrors(|base| {
            let url = join_url(base, &remote_path)?;
            fetch_sha256(self.transport, url, length, "targets.json", &sha256)
        })
    }

    /// Downloads a package's source archive into `outdir`, verifying its
    /// length and content hash before the destination file becomes visible.
    /// Returns the path of the written archive.
    pub fn save_package(&self, package: &PackageId, outdir: &Path) -> Result<PathBuf> {
        self.check_freshness()?;
        let (length, sha256) = self.package_file_info(package)?;
        let remote_path = package.tarball_path();
        std::fs::create_dir_all(outdir).context(error::CacheDirectoryCreate { path: outdir })?;

        let tmp = self.with_mirrors(|base| {
            let url = join_url(base, &remote_path)?;
            let mut reader =
                fetch_sha256(self.transport, url.clone(), length, "targets.json", &sha256)?;
            // the temp file lives next to its destination so the final
            // rename is atomic
            let mut tmp = NamedTempFile::new_in(outdir)
                .context(error::FileTempCreate { path: outdir })?;
            std::io::copy(&mut reader, tmp.as_file_mut())
                .context(error::FetchRead { url })?;
            Ok(tmp)
        })?;

        let dest = outdir.join(package.tarball_filename());
        tmp.as_file()
            .sync_all()
            .context(error::FileSync { path: &dest })?;
        tmp.persist(&dest)
            .context(error::FilePersist { path: &dest })?;
        Ok(dest)
    }

    // =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

    /// Walks the root chain: fetches `N+1.root.json` until the repository
    /// has no newer root, verifying each step with both the trusted and the
    /// candidate root's keys. After any rotation the cached timestamp and
    /// snapshot are discarded, since they may have been signed by
    /// rotated-out keys.
    fn update_root_chain(&mut self) -> Result<()> {
        let original_version = self.root.signed.version.get();
        loop {
            ensure!(
                self.root.signed.version.get()
                    < original_version.saturating_add(self.limits.max_root_updates),
                error::MaxUpdatesExceeded {
                    max_root_updates: self.limits.max_root_updates
                }
            );

            let path = format!("{}.root.json", self.root.signed.version.get() + 1);
            let data = match self.fetch_bytes(&path, self.limits.max_root_size, "max_root_size argument")
            {
                Ok(data) => data,
                Err(err) => {
                    if err.is_file_not_found() {
                        // no newer root has been published
                        break;
                    }
                    return Err(err);
                }
            };

            let new_root: Signed<Root> = serde_json::from_slice(&data)
                .context(error::ParseMetadata {
                    role: RoleType::Root,
                })?;
            new_root
                .signed
                .check_role_keys()
                .context(error::VerifyMetadata {
                    role: RoleType::Root,
                })?;

            // The candidate must be signed by a threshold of keys from the
            // trusted root (proving continuity) and from itself (proving
            // the new key set is usable).
            self.root
                .signed
                .verify_role(&new_root)
                .context(error::VerifyMetadata {
                    role: RoleType::Root,
                })?;
            new_root
                .signed
                .verify_role(&new_root)
                .context(error::VerifyMetadata {
                    role: RoleType::Root,
                })?;

            ensure!(
                self.root.signed.version <= new_root.signed.version,
                error::OlderMetadata {
                    role: RoleType::Root,
                    current_version: self.root.signed.version,
                    new_version: new_root.signed.version
                }
            );

            // A served file whose contents claim the version we already
            // trust would otherwise loop forever.
            if self.root.signed.version == new_root.signed.version {
                break;
            }

            self.cache
                .install_slice(&data, CachedFile::Root.filename())?;
            self.cache.clear_cache()?;
            debug!(
                "rotated root from version {} to {}",
                self.root.signed.version,
                new_root.signed.version
            );
            self.timestamp = None;
            self.snapshot = None;
            self.mirrors = None;
            self.targets = None;
            self.root = new_root;
        }

        if self.expiration_enforcement == ExpirationEnforcement::Safe {
            check_expired(&self.cache, &self.root.signed)?;
        }
        Ok(())
    }

    /// Fetches and verifies the timestamp document. The previously cached
    /// timestamp, when it still verifies, is the rollback baseline; a
    /// byte-identical refetch is not rewritten to disk.
    fn update_timestamp(&self) -> Result<Signed<Timestamp>> {
        let data = self.fetch_bytes(
            CachedFile::Timestamp.filename(),
            self.limits.max_timestamp_size,
            "max_timestamp_size argument",
        )?;
        let timestamp: Signed<Timestamp> =
            serde_json::from_slice(&data).context(error::ParseMetadata {
                role: RoleType::Timestamp,
            })?;
        self.root
            .signed
            .verify_role(&timestamp)
            .context(error::VerifyMetadata {
                role: RoleType::Timestamp,
            })?;

        let mut cached_is_current = false;
        if let Some(Ok(old_timestamp)) = self
            .cache
            .reader(CachedFile::Timestamp.filename())?
            .map(serde_json::from_reader::<_, Signed<Timestamp>>)
        {
            if self.root.signed.verify_role(&old_timestamp).is_ok() {
                ensure!(
                    old_timestamp.signed.version <= timestamp.signed.version,
                    error::OlderMetadata {
                        role: RoleType::Timestamp,
                        current_version: old_timestamp.signed.version,
                        new_version: timestamp.signed.version
                    }
                );
                cached_is_current = old_timestamp == timestamp;
            }
        }

        if self.expiration_enforcement == ExpirationEnforcement::Safe {
            check_expired(&self.cache, &timestamp.signed)?;
        }

        if !cached_is_current {
            self.cache
                .install_slice(&data, CachedFile::Timestamp.filename())?;
        }
        Ok(timestamp)
    }

    /// Fetches and verifies the snapshot document pinned by the timestamp.
    fn update_snapshot(&self, meta: &FileInfo) -> Result<Signed<Snapshot>> {
        let data = self.fetch_bytes_verified(
            CachedFile::Snapshot.filename(),
            meta,
            "timestamp.json",
        )?;
        let snapshot: Signed<Snapshot> =
            serde_json::from_slice(&data).context(error::ParseMetadata {
                role: RoleType::Snapshot,
            })?;
        self.root
            .signed
            .verify_role(&snapshot)
            .context(error::VerifyMetadata {
                role: RoleType::Snapshot,
            })?;

        if let Some(Ok(old_snapshot)) = self
            .cache
            .reader(CachedFile::Snapshot.filename())?
            .map(serde_json::from_reader::<_, Signed<Snapshot>>)
        {
            if self.root.signed.verify_role(&old_snapshot).is_ok() {
                ensure!(
                    old_snapshot.signed.version <= snapshot.signed.version,
                    error::OlderMetadata {
                        role: RoleType::Snapshot,
                        current_version: old_snapshot.signed.version,
                        new_version: snapshot.signed.version
                    }
                );
            }
        }

        if self.expiration_enforcement == ExpirationEnforcement::Safe {
            check_expired(&self.cache, &snapshot.signed)?;
        }

        self.cache
            .install_slice(&data, CachedFile::Snapshot.filename())?;
        Ok(snapshot)
    }

    /// Fetches and verifies the top-level targets document, gated by the
    /// snapshot's hash for it. The verified document is held in memory
    /// only; per-package targets metadata is read through the index.
    fn update_targets(&mut self, snapshot: &Signed<Snapshot>) -> Result<()> {
        let meta = snapshot
            .signed
            .meta
            .get("targets.json")
            .context(error::MetaMissing {
                file: "targets.json",
                role: RoleType::Snapshot,
            })?;
        let data = self.fetch_bytes_verified("targets.json", meta, "snapshot.json")?;
        let targets: Signed<Targets> =
            serde_json::from_slice(&data).context(error::ParseMetadata {
                role: RoleType::Targets,
            })?;
        self.root
            .signed
            .verify_role(&targets)
            .context(error::VerifyMetadata {
                role: RoleType::Targets,
            })?;

        if let Some(old_targets) = &self.targets {
            ensure!(
                old_targets.signed.version <= targets.signed.version,
                error::OlderMetadata {
                    role: RoleType::Targets,
                    current_version: old_targets.signed.version,
                    new_version: targets.signed.version
                }
            );
        }

        if self.expiration_enforcement == ExpirationEnforcement::Safe {
            check_expired(&self.cache, &targets.signed)?;
        }

        self.targets = Some(targets);
        Ok(())
    }

    /// Fetches and verifies the mirror list, gated by the snapshot's hash
    /// for it. A cached copy whose hash already matches is kept as-is.
    fn update_mirrors(&mut self, snapshot: &Signed<Snapshot>) -> Result<()> {
        let meta = snapshot
            .signed
            .meta
            .get(CachedFile::Mirrors.filename())
            .context(error::MetaMissing {
                file: "mirrors.json",
                role: RoleType::Snapshot,
            })?;

        if self.mirrors.is_some()
            && self.cached_file_matches(CachedFile::Mirrors.filename(), meta)?
        {
            return Ok(());
        }

        let data =
            self.fetch_bytes_verified(CachedFile::Mirrors.filename(), meta, "snapshot.json")?;
        let mirrors: Signed<Mirrors> =
            serde_json::from_slice(&data).context(error::ParseMetadata {
                role: RoleType::Mirrors,
            })?;
        self.root
            .signed
            .verify_role(&mirrors)
            .context(error::VerifyMetadata {
                role: RoleType::Mirrors,
            })?;

        if let Some(Ok(old_mirrors)) = self
            .cache
            .reader(CachedFile::Mirrors.filename())?
            .map(serde_json::from_reader::<_, Signed<Mirrors>>)
        {
            if self.root.signed.verify_role(&old_mirrors).is_ok() {
                ensure!(
                    old_mirrors.signed.version <= mirrors.signed.version,
                    error::OlderMetadata {
                        role: RoleType::Mirrors,
                        current_version: old_mirrors.signed.version,
                        new_version: mirrors.signed.version
                    }
                );
            }
        }

        if self.expiration_enforcement == ExpirationEnforcement::Safe {
            check_expired(&self.cache, &mirrors.signed)?;
        }

        self.cache
            .install_slice(&data, CachedFile::Mirrors.filename())?;
        self.mirrors = Some(mirrors);
        Ok(())
    }

    /// Brings the cached package index up to date with the snapshot. A
    /// cached archive whose hash already matches is kept. When the cached
    /// archive is a prefix of the advertised one, only the new suffix is
    /// fetched; any failure there falls back to a full download. The
    /// uncompressed form is preferred when the snapshot offers both.
    fn update_index(&mut self, snapshot: &Signed<Snapshot>) -> Result<()> {
        let raw_meta = snapshot.signed.meta.get(INDEX_REMOTE_TAR);
        let gz_meta = snapshot.signed.meta.get(INDEX_REMOTE_TAR_GZ);

        if let Some(meta) = raw_meta {
            if let Some((length, sha256)) = self.cache.file_sha256(cache::INDEX_TAR)? {
                if length == meta.length && sha256.as_slice() == meta.hashes.sha256.as_ref() {
                    // archive is current; make sure its offset table is too
                    return self.cache.ensure_index();
                }
                if length < meta.length {
                    match self.fetch_index_incremental(meta, length) {
                        Ok(()) => return Ok(()),
                        Err(err) => {
                            debug!(
                                "incremental index fetch failed, falling back to full download: {}",
                                err
                            );
                        }
                    }
                }
            }
            return self.fetch_and_cache(
                INDEX_REMOTE_TAR,
                meta,
                Format::Raw,
                CachePolicy::CacheIndex,
            );
        }
        if let Some(meta) = gz_meta {
            return self.fetch_and_cache(
                INDEX_REMOTE_TAR_GZ,
                meta,
                Format::Gzip,
                CachePolicy::CacheIndex,
            );
        }
        error::MetaMissing {
            file: INDEX_REMOTE_TAR,
            role: RoleType::Snapshot,
        }
        .fail()
    }

    /// Extends the cached index archive in place: refetches from just
    /// before the end-of-archive trailer, stitches the suffix onto the
    /// cached prefix, and installs the result only if the whole file
    /// matches the snapshot's hash and length.
    fn fetch_index_incremental(&self, meta: &FileInfo, cached_len: u64) -> Result<()> {
        // a tar ends with two zero blocks; the suffix must overwrite them
        let start = cached_len.saturating_sub(1024);
        let url = join_url(&self.base_url, INDEX_REMOTE_TAR)?;
        let mut reader = fetch::fetch_from(
            self.transport,
            url.clone(),
            start,
            meta.length.saturating_sub(start),
            "snapshot.json",
        )?;

        let mut tmp = NamedTempFile::new_in(self.cache.path())
            .context(error::FileTempCreate { path: self.cache.path() })?;
        let tar_path = self.cache.index_tar_path();
        let cached = File::open(&tar_path).context(error::CacheFileRead { path: &tar_path })?;
        let mut prefix = cached.take(start);
        std::io::copy(&mut prefix, tmp.as_file_mut())
            .context(error::CacheFileRead { path: &tar_path })?;
        std::io::copy(&mut reader, tmp.as_file_mut())
            .context(error::FetchRead { url: url.clone() })?;

        let stitched = File::open(tmp.path()).context(error::CacheFileRead { path: tmp.path() })?;
        let (length, sha256) = cache::hash_reader(stitched, tmp.path())?;
        ensure!(
            length == meta.length && sha256.as_slice() == meta.hashes.sha256.as_ref(),
            error::HashMismatch {
                context: url.to_string(),
                calculated: hex::encode(&sha256),
                expected: hex::encode(&meta.hashes.sha256),
            }
        );

        self.cache
            .cache_remote_file(tmp.path(), Format::Raw, CachePolicy::CacheIndex)
    }

    /// Streams a snapshot-listed file into a temp file in the cache
    /// directory, verifying length and hash on the way, then hands it to
    /// the cache for installation. The temp file is deleted whether or not
    /// the install succeeds.
    fn fetch_and_cache(
        &self,
        remote_path: &str,
        meta: &FileInfo,
        format: Format,
        policy: CachePolicy,
    ) -> Result<()> {
        let tmp = self.with_mirrors(|base| {
            let url = join_url(base, remote_path)?;
            let mut reader = fetch_sha256(
                self.transport,
                url.clone(),
                meta.length,
                "snapshot.json",
                &meta.hashes.sha256,
            )?;
            let mut tmp = NamedTempFile::new_in(self.cache.path())
                .context(error::FileTempCreate { path: self.cache.path() })?;
            std::io::copy(&mut reader, tmp.as_file_mut())
                .context(error::FetchRead { url })?;
            Ok(tmp)
        })?;
        self.cache.cache_remote_file(tmp.path(), format, policy)
    }

    /// Fetches a metadata file bounded by a client-side limit, with mirror
    /// failover.
    fn fetch_bytes(
        &self,
        remote_path: &str,
        max_size: u64,
        specifier: &'static str,
    ) -> Result<Vec<u8>> {
        self.with_mirrors(|base| {
            let url = join_url(base, remote_path)?;
            let mut reader = fetch_max_size(self.transport, url.clone(), max_size, specifier)?;
            let mut data = Vec::new();
            reader
                .read_to_end(&mut data)
                .context(error::FetchRead { url })?;
            Ok(data)
        })
    }

    /// Fetches a file whose length and hash a parent document pinned, with
    /// mirror failover.
    fn fetch_bytes_verified(
        &self,
        remote_path: &str,
        meta: &FileInfo,
        specifier: &'static str,
    ) -> Result<Vec<u8>> {
        self.with_mirrors(|base| {
            let url = join_url(base, remote_path)?;
            let mut reader = fetch_sha256(
                self.transport,
                url.clone(),
                meta.length,
                specifier,
                &meta.hashes.sha256,
            )?;
            let mut data = Vec::new();
            reader
                .read_to_end(&mut data)
                .context(error::FetchRead { url })?;
            Ok(data)
        })
    }

    /// Runs `attempt` against the primary base URL, falling back to each
    /// trusted mirror in turn on transport-class failures. Verification
    /// failures are never retried: a document that fails to verify on one
    /// mirror must not be laundered through another.
    fn with_mirrors<R>(&self, mut attempt: impl FnMut(&Url) -> Result<R>) -> Result<R> {
        let mut result = attempt(&self.base_url);
        if matches!(&result, Err(err) if err.is_retryable()) {
            for mirror in self.mirror_urls() {
                debug!("retrying on mirror '{}'", mirror);
                result = attempt(&mirror);
                if !matches!(&result, Err(err) if err.is_retryable()) {
                    break;
                }
            }
        }
        result
    }

    /// The trusted mirror base URLs, in the order the repository listed
    /// them. Unparseable entries are skipped.
    fn mirror_urls(&self) -> Vec<Url> {
        let mut urls = Vec::new();
        if let Some(mirrors) = &self.mirrors {
            for mirror in &mirrors.signed.mirrors {
                match parse_url(mirror) {
                    Ok(url) => urls.push(url),
                    Err(err) => debug!("skipping unparseable mirror '{}': {}", mirror, err),
                }
            }
        }
        urls
    }

    /// Whether the named cache file's length and hash match `meta`.
    fn cached_file_matches(&self, name: &str, meta: &FileInfo) -> Result<bool> {
        Ok(match self.cache.file_sha256(name)? {
            Some((length, sha256)) => {
                length == meta.length && sha256.as_slice() == meta.hashes.sha256.as_ref()
            }
            None => false,
        })
    }

    /// Resolves the length and hash of a package's archive: from the
    /// top-level targets role when this session fetched one, else from the
    /// package's own targets metadata inside the index.
    fn package_file_info(&self, package: &PackageId) -> Result<(u64, Vec<u8>)> {
        let path = package.tarball_path();
        if let Some(targets) = &self.targets {
            if let Some(target) = targets.signed.targets.get(&path) {
                return Ok((target.length, target.hashes.sha256.as_ref().to_vec()));
            }
        }

        let metadata = self
            .cache
            .get_from_index(&package.metadata_path())?
            .context(error::TargetNotFound {
                target: package.to_string(),
            })?;
        let role: Signed<Targets> =
            serde_json::from_slice(&metadata).context(error::ParseMetadata {
                role: RoleType::Targets,
            })?;
        self.root
            .signed
            .verify_role(&role)
            .context(error::VerifyMetadata {
                role: RoleType::Targets,
            })?;
        let target = role
            .signed
            .targets
            .get(&path)
            .context(error::TargetNotFound {
                target: package.to_string(),
            })?;
        Ok((target.length, target.hashes.sha256.as_ref().to_vec()))
    }

    /// Package downloads require a trusted snapshot, and in `Safe` mode one
    /// whose chain has not expired.
    fn check_freshness(&self) -> Result<()> {
        let snapshot = self.snapshot.as_ref().context(error::NoTrustedRole {
            role: RoleType::Snapshot,
        })?;
        if self.expiration_enforcement == ExpirationEnforcement::Safe {
            check_expired(&self.cache, &snapshot.signed)?;
            if let Some(timestamp) = &self.timestamp {
                check_expired(&self.cache, &timestamp.signed)?;
            }
        }
        Ok(())
    }
}

/// Revives one cached role document, provided it still verifies against the
/// trusted root. Anything unreadable or (in `Safe` mode) expired is treated
/// as absent rather than fatal; the next update refetches it.
fn revive_role<R>(
    cache: &Cache,
    file: CachedFile,
    root: &Signed<Root>,
    expiration_enforcement: ExpirationEnforcement,
) -> Result<Option<Signed<R>>>
where
    R: Role + serde::de::DeserializeOwned,
{
    let reader = match cache.reader(file.filename())? {
        Some(reader) => reader,
        None => return Ok(None),
    };
    let role: Signed<R> = match serde_json::from_reader(reader) {
        Ok(role) => role,
        Err(err) => {
            debug!("ignoring unreadable cached {}: {}", file.filename(), err);
            return Ok(None);
        }
    };
    if root.signed.verify_role(&role).is_err() {
        debug!("ignoring cached {} that no longer verifies", file.filename());
        return Ok(None);
    }
    if expiration_enforcement == ExpirationEnforcement::Safe
        && role.signed.expires() <= cache.system_time()?
    {
        debug!("ignoring expired cached {}", file.filename());
        return Ok(None);
    }
    Ok(Some(role))
}

/// Fails when `role` has expired according to the cache's monotonic view of
/// system time.
fn check_expired<R: Role>(cache: &Cache, role: &R) -> Result<()> {
    ensure!(
        cache.system_time()? < role.expires(),
        error::ExpiredMetadata { role: R::TYPE }
    );
    Ok(())
}

fn parse_url(url: &str) -> Result<Url> {
    let mut url = Cow::from(url);
    if !url.ends_with('/') {
        url.to_mut().push('/');
    }
    Url::parse(&url).context(error::ParseUrl { url })
}

fn join_url(base: &Url, path: &str) -> Result<Url> {
    base.join(path).context(error::JoinUrl {
        path,
        url: base.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Check if a url with a trailing slash and one without trailing slash
    // can both be parsed
    #[test]
    fn url_missing_trailing_slash() {
        let parsed_url_without_trailing_slash = parse_url("https://example.org/a/b/c").unwrap();
        let parsed_url_with_trailing_slash = parse_url("https://example.org/a/b/c/").unwrap();
        assert_eq!(
            parsed_url_without_trailing_slash,
            parsed_url_with_trailing_slash
        );
    }

    #[test]
    fn join_url_appends_to_base() {
        let base = parse_url("https://example.org/repo").unwrap();
        assert_eq!(
            join_url(&base, "2.root.json").unwrap().as_str(),
            "https://example.org/repo/2.root.json"
        );
    }

    // Ensure that the `ExpirationEnforcement` traits are not changed by
    // mistake.
    #[test]
    fn expiration_enforcement_traits() {
        let enforce = true;
        let safe: ExpirationEnforcement = enforce.into();
        assert_eq!(safe, ExpirationEnforcement::Safe);
        let not_enforce = false;
        let not_safe: ExpirationEnforcement = not_enforce.into();
        assert_eq!(not_safe, ExpirationEnforcement::Unsafe);
        let enforcing: bool = ExpirationEnforcement::Safe.into();
        assert!(enforcing);
        let non_enforcing: bool = ExpirationEnforcement::Unsafe.into();
        assert!(!non_enforcing);
        let default = ExpirationEnforcement::default();
        assert_eq!(default, ExpirationEnforcement::Safe);
    }
}
