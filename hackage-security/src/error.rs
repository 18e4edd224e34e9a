// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contains the error type for this library.

use crate::schema::RoleType;
use crate::transport::{TransportError, TransportErrorKind};
use chrono::{DateTime, Utc};
use snafu::Snafu;
use std::num::NonZeroU64;
use std::path::PathBuf;
use url::Url;

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The coarse classes of failure a front end distinguishes when deciding
/// what to tell the user and which exit code to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// A signature, hash, length, version, or expiry check failed. The
    /// repository (or an attacker) served something that cannot be trusted.
    Verification,
    /// The network, a mirror, or the local filesystem failed.
    Transport,
    /// The caller asked for something that cannot be asked for.
    Usage,
}

/// The error type for this library.
#[derive(Debug, Snafu)]
#[snafu(visibility = "pub(crate)")]
#[non_exhaustive]
pub enum Error {
    /// Too few of the root keys declared by the repository matched a
    /// fingerprint trusted out-of-band.
    #[snafu(display(
        "Only {} of the declared root keys match a trusted fingerprint ({} required)",
        matched,
        threshold
    ))]
    BootstrapKeysUntrusted {
        /// How many declared root keys matched a trusted fingerprint.
        matched: u64,
        /// How many were required.
        threshold: u64,
    },

    /// Too few of the out-of-band-trusted root keys produced valid
    /// signatures over the root document.
    #[snafu(display(
        "Only {} trusted root keys signed the root document ({} required)",
        valid,
        threshold
    ))]
    BootstrapSignatures {
        /// How many trusted keys produced valid signatures.
        valid: u64,
        /// How many were required.
        threshold: u64,
    },

    /// Failed to create the cache directory.
    #[snafu(display("Failed to create cache directory '{}': {}", path.display(), source))]
    CacheDirectoryCreate {
        /// The path that could not be created.
        path: PathBuf,
        /// The source of the error.
        source: std::io::Error,
    },

    /// Failed to read a file in the cache directory.
    #[snafu(display("Failed to read '{}': {}", path.display(), source))]
    CacheFileRead {
        /// The path that could not be read.
        path: PathBuf,
        /// The source of the error.
        source: std::io::Error,
    },

    /// Failed to write a file in the cache directory.
    #[snafu(display("Failed to write '{}': {}", path.display(), source))]
    CacheFileWrite {
        /// The path that could not be written.
        path: PathBuf,
        /// The source of the error.
        source: std::io::Error,
    },

    /// A metadata file has expired.
    #[snafu(display("Role '{}' metadata has expired", role))]
    ExpiredMetadata {
        /// The role that expired.
        role: RoleType,
    },

    /// Failed to read a fetched stream to completion. The underlying cause
    /// may be a transport failure or a hash or length violation detected
    /// mid-stream.
    #[snafu(display("Failed to read '{}': {}", url, source))]
    FetchRead {
        /// The URL being read.
        url: Url,
        /// The source of the error.
        source: std::io::Error,
    },

    /// Failed to atomically replace a file with a finished temp file.
    #[snafu(display("Failed to persist '{}': {}", path.display(), source))]
    FilePersist {
        /// The destination path.
        path: PathBuf,
        /// The source of the error.
        source: tempfile::PersistError,
    },

    /// Failed to flush a finished temp file to disk.
    #[snafu(display("Failed to sync '{}': {}", path.display(), source))]
    FileSync {
        /// The destination path.
        path: PathBuf,
        /// The source of the error.
        source: std::io::Error,
    },

    /// Failed to create a temp file.
    #[snafu(display("Failed to create temp file in '{}': {}", path.display(), source))]
    FileTempCreate {
        /// The directory the temp file would have lived in.
        path: PathBuf,
        /// The source of the error.
        source: std::io::Error,
    },

    /// A downloaded file's digest did not match its signed description.
    #[snafu(display(
        "Hash mismatch for '{}': calculated {}, expected {}",
        context,
        calculated,
        expected
    ))]
    HashMismatch {
        /// What was being verified.
        context: String,
        /// The digest calculated over the fetched bytes.
        calculated: String,
        /// The digest the signed metadata declared.
        expected: String,
    },

    /// A threshold of zero can never be satisfied and a threshold larger
    /// than the declared key set never can be either.
    #[snafu(display("Invalid signature threshold {}", threshold))]
    InvalidThreshold {
        /// The rejected threshold.
        threshold: u64,
    },

    /// A package identifier could not be parsed.
    #[snafu(display("Invalid package identifier '{}'", id))]
    InvalidPackageId {
        /// The rejected identifier.
        id: String,
    },

    /// The tar index's entry paths could not be decoded.
    #[snafu(display("Failed to walk index tar '{}': {}", path.display(), source))]
    IndexTar {
        /// The tar being walked.
        path: PathBuf,
        /// The source of the error.
        source: std::io::Error,
    },

    /// The serialized offset table could not be parsed.
    #[snafu(display("Failed to parse tar index '{}': {}", path.display(), source))]
    IndexParse {
        /// The offset table file.
        path: PathBuf,
        /// The source of the error.
        source: serde_json::Error,
    },

    /// The serialized offset table could not be read.
    #[snafu(display("Failed to read tar index '{}': {}", path.display(), source))]
    IndexRead {
        /// The offset table file.
        path: PathBuf,
        /// The source of the error.
        source: std::io::Error,
    },

    /// The offset table could not be serialized.
    #[snafu(display("Failed to serialize tar index '{}': {}", path.display(), source))]
    IndexSerialize {
        /// The offset table file.
        path: PathBuf,
        /// The source of the error.
        source: serde_json::Error,
    },

    /// The offset table was written by an incompatible version of this
    /// library.
    #[snafu(display("Tar index '{}' has unsupported version {}", path.display(), version))]
    IndexVersion {
        /// The offset table file.
        path: PathBuf,
        /// The version found in the file.
        version: u32,
    },

    /// A path could not be joined to a base URL.
    #[snafu(display("Failed to join '{}' to URL '{}': {}", path, url, source))]
    JoinUrl {
        /// The path being joined.
        path: String,
        /// The base URL.
        url: Url,
        /// The source of the error.
        source: url::ParseError,
    },

    /// A value could not be serialized to JSON.
    #[snafu(display("Failed to serialize {}: {}", what, source))]
    JsonSerialize {
        /// What failed to serialize.
        what: String,
        /// The source of the error.
        source: serde_json::Error,
    },

    /// A stream exceeded the size bound its parent document (or a client
    /// limit) placed on it.
    #[snafu(display("Maximum size {} (specified by {}) exceeded", max_size, specifier))]
    MaxSizeExceeded {
        /// The size bound.
        max_size: u64,
        /// Where the bound came from.
        specifier: &'static str,
    },

    /// The root chain grew past the configured bound without converging.
    #[snafu(display("Downloaded {} root updates without stabilizing", max_root_updates))]
    MaxUpdatesExceeded {
        /// The configured bound.
        max_root_updates: u64,
    },

    /// A role's metadata does not describe a file it is required to
    /// describe.
    #[snafu(display("Missing '{}' in '{}' metadata", file, role))]
    MetaMissing {
        /// The file that was not described.
        file: &'static str,
        /// The role whose metadata is incomplete.
        role: RoleType,
    },

    /// An operation needs a trusted role document that is not available
    /// yet.
    #[snafu(display(
        "No trusted '{}' metadata is available; check for updates first",
        role
    ))]
    NoTrustedRole {
        /// The missing role.
        role: RoleType,
    },

    /// The repository served an older version of a role than the one we
    /// already trust, which is how a rollback attack looks.
    #[snafu(display(
        "Role '{}' version {} is older than trusted version {}",
        role,
        new_version,
        current_version
    ))]
    OlderMetadata {
        /// The role that went backward.
        role: RoleType,
        /// The trusted version.
        current_version: NonZeroU64,
        /// The version the repository served.
        new_version: NonZeroU64,
    },

    /// A fetched role document could not be parsed.
    #[snafu(display("Failed to parse {} metadata: {}", role, source))]
    ParseMetadata {
        /// The role being parsed.
        role: RoleType,
        /// The source of the error.
        source: serde_json::Error,
    },

    /// The locally trusted root document could not be parsed.
    #[snafu(display("Failed to parse trusted root metadata: {}", source))]
    ParseTrustedMetadata {
        /// The source of the error.
        source: serde_json::Error,
    },

    /// A base URL could not be parsed.
    #[snafu(display("Failed to parse URL '{}': {}", url, source))]
    ParseUrl {
        /// The URL that could not be parsed.
        url: String,
        /// The source of the error.
        source: url::ParseError,
    },

    /// A path that must have a parent directory did not.
    #[snafu(display("Path '{}' has no parent directory", path.display()))]
    PathParent {
        /// The orphaned path.
        path: PathBuf,
    },

    /// The cache has no root document. Bootstrap establishes one; nothing
    /// else can.
    #[snafu(display(
        "No trusted root at '{}'; bootstrap this repository first",
        path.display()
    ))]
    RootNotBootstrapped {
        /// Where the root was expected.
        path: PathBuf,
    },

    /// The system clock jumped backward relative to what this cache has
    /// already observed, which defeats expiry checking.
    #[snafu(display(
        "System time stepped backward: system time '{}', last known time '{}'",
        sys_time,
        latest_known_time
    ))]
    SystemTimeSteppedBackward {
        /// The current system time.
        sys_time: DateTime<Utc>,
        /// The latest time this cache had previously observed.
        latest_known_time: DateTime<Utc>,
    },

    /// The requested package is not described by any trusted targets
    /// metadata.
    #[snafu(display("Unknown target '{}'", target))]
    TargetNotFound {
        /// The package that was requested.
        target: String,
    },

    /// A transport failed to fetch a file.
    #[snafu(display("Failed to fetch '{}': {}", url, source))]
    Transport {
        /// The URL being fetched.
        url: Url,
        /// The source of the error.
        source: TransportError,
    },

    /// A fetched role document failed signature verification.
    #[snafu(display("Failed to verify {} metadata: {}", role, source))]
    VerifyMetadata {
        /// The role being verified.
        role: RoleType,
        /// The source of the error.
        source: crate::schema::Error,
    },

    /// The locally trusted root document failed its own verification.
    #[snafu(display("Failed to verify trusted root metadata: {}", source))]
    VerifyTrustedMetadata {
        /// The source of the error.
        source: crate::schema::Error,
    },
}

impl Error {
    /// The coarse class of this error, for exit-code mapping and log
    /// severity decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::BootstrapKeysUntrusted { .. }
            | Error::BootstrapSignatures { .. }
            | Error::ExpiredMetadata { .. }
            | Error::HashMismatch { .. }
            | Error::MaxSizeExceeded { .. }
            | Error::MaxUpdatesExceeded { .. }
            | Error::MetaMissing { .. }
            | Error::OlderMetadata { .. }
            | Error::ParseMetadata { .. }
            | Error::ParseTrustedMetadata { .. }
            | Error::SystemTimeSteppedBackward { .. }
            | Error::VerifyMetadata { .. }
            | Error::VerifyTrustedMetadata { .. } => ErrorClass::Verification,

            Error::InvalidPackageId { .. }
            | Error::InvalidThreshold { .. }
            | Error::JoinUrl { .. }
            | Error::NoTrustedRole { .. }
            | Error::ParseUrl { .. }
            | Error::RootNotBootstrapped { .. }
            | Error::TargetNotFound { .. } => ErrorClass::Usage,

            // Size and hash violations detected mid-stream travel through
            // `io::Error`; classify by the wrapped error when there is one.
            Error::FetchRead { source, .. } => source
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<Error>())
                .map_or(ErrorClass::Transport, Error::class),

            _ => ErrorClass::Transport,
        }
    }

    /// Whether trying the same fetch against a different mirror could
    /// plausibly succeed. Signature failures are excluded on purpose: a
    /// document that fails verification on one mirror must not be laundered
    /// through another.
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport { .. } | Error::FetchRead { .. })
    }

    /// Whether this error means the requested file does not exist on the
    /// repository, which terminates a root-chain walk.
    pub(crate) fn is_file_not_found(&self) -> bool {
        matches!(
            self,
            Error::Transport { source, .. }
                if matches!(source.kind, TransportErrorKind::FileNotFound)
        )
    }
}
