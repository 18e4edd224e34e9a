//! Public key types used to verify role signatures.

use crate::schema::decoded::{Decoded, Hex};
use crate::schema::error::{self, Result};
use olpc_cjson::CanonicalFormatter;
use ring::digest::{digest, SHA256};
use ring::signature::UnparsedPublicKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::ResultExt;
use std::collections::HashMap;

/// A public key as declared in a root document's `keys` map. A key ID is the
/// SHA-256 digest of the key's canonical JSON form, and clients must verify
/// that relationship rather than trust the document.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "keytype")]
pub enum Key {
    /// An Ed25519 key.
    #[serde(rename = "ed25519")]
    Ed25519 {
        /// The Ed25519 key value.
        keyval: Ed25519Key,

        /// Extra arguments found during deserialization.
        ///
        /// We must store these to correctly verify signatures over this
        /// object.
        #[serde(flatten)]
        _extra: HashMap<String, Value>,
    },
}

/// An Ed25519 public key value.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Ed25519Key {
    /// The hex-encoded public key bytes.
    pub public: Decoded<Hex>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Key {
    /// Verifies `sig` over `msg` with this key, returning `true` if the
    /// signature is valid.
    pub fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
        match self {
            Key::Ed25519 { keyval, .. } => {
                UnparsedPublicKey::new(&ring::signature::ED25519, &keyval.public)
                    .verify(msg, sig)
                    .is_ok()
            }
        }
    }

    /// Calculates the key ID for this key, the SHA-256 digest of its
    /// canonical JSON form.
    pub fn key_id(&self) -> Result<Decoded<Hex>> {
        let mut buf = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, CanonicalFormatter::new());
        self.serialize(&mut ser)
            .context(error::JsonSerialization { what: "key" })?;
        Ok(digest(&SHA256, &buf).as_ref().to_vec().into())
    }
}
