//! Contains the error type for the schema module.

use crate::schema::RoleType;
use snafu::Snafu;

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for errors that occur while parsing or verifying role
/// documents.
#[derive(Debug, Snafu)]
#[snafu(visibility = "pub(crate)")]
#[non_exhaustive]
pub enum Error {
    /// A duplicate key ID was present in a key map.
    #[snafu(display("Duplicate key ID: {}", keyid))]
    DuplicateKeyId {
        /// The duplicated key ID.
        keyid: String,
    },

    /// A hex-encoded string failed to decode.
    #[snafu(display("Invalid hex string '{}': {}", s, source))]
    HexDecode {
        /// The string that failed to decode.
        s: String,
        /// The source of the error.
        source: hex::FromHexError,
    },

    /// A key ID did not match the hash of its key.
    #[snafu(display("Invalid key ID {}: calculated {}", keyid, calculated))]
    InvalidKeyId {
        /// The key ID from the document.
        keyid: String,
        /// The key ID calculated from the key.
        calculated: String,
    },

    /// Failed to serialize a value to canonical JSON.
    #[snafu(display("Failed to serialize {} to canonical JSON: {}", what, source))]
    JsonSerialization {
        /// What failed to serialize.
        what: String,
        /// The source of the error.
        source: serde_json::Error,
    },

    /// The root document does not declare the named role.
    #[snafu(display("Missing '{}' role specification", role))]
    MissingRole {
        /// The role that was missing.
        role: RoleType,
    },

    /// A role document did not carry enough valid signatures.
    #[snafu(display(
        "Signature threshold of {} not met for role '{}' ({} valid signatures)",
        threshold,
        role,
        valid
    ))]
    SignatureThreshold {
        /// The role that failed to verify.
        role: RoleType,
        /// The required number of valid signatures.
        threshold: u64,
        /// The number of valid signatures found.
        valid: u64,
    },

    /// A role specification references a key ID that the document's key map
    /// does not declare.
    #[snafu(display("'{}' role references undeclared key ID {}", role, keyid))]
    UndeclaredKeyId {
        /// The role whose specification is invalid.
        role: RoleType,
        /// The undeclared key ID.
        keyid: String,
    },
}
