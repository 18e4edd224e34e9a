use crate::schema::decoded::{Decoded, Hex};
use crate::schema::error;
use crate::schema::key::Key;
use serde::{de::Error as _, Deserialize, Deserializer};
use serde_json::Value;
use snafu::ensure;
use std::collections::HashMap;
use std::fmt;

/// Deserializes a `keys` map, proving every key ID is the digest of its key
/// and rejecting documents that declare the same ID twice. The map this
/// produces is the decode context through which all key ID references in
/// the same document resolve, so nothing may enter it unproven.
///
/// The wire entries are collected first and validated as a second step;
/// duplicate IDs are only visible at the wire level, since any map type
/// would silently collapse them.
pub(super) fn deserialize_keys<'de, D>(
    deserializer: D,
) -> Result<HashMap<Decoded<Hex>, Key>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = deserializer.deserialize_map(KeyEntries(Vec::new()))?;
    let mut keys = HashMap::with_capacity(entries.len());
    for (claimed, key) in entries {
        check_key_id(&claimed, &key).map_err(D::Error::custom)?;
        if keys.insert(claimed.clone(), key).is_some() {
            return Err(D::Error::custom(
                error::DuplicateKeyId {
                    keyid: claimed.to_string(),
                }
                .build(),
            ));
        }
    }
    Ok(keys)
}

/// A key ID is trustworthy only if it reproduces from the key itself.
fn check_key_id(claimed: &Decoded<Hex>, key: &Key) -> error::Result<()> {
    let calculated = key.key_id()?;
    ensure!(
        *claimed == calculated,
        error::InvalidKeyId {
            keyid: claimed.to_string(),
            calculated: calculated.to_string(),
        }
    );
    Ok(())
}

/// Collects the raw `(keyid, key)` pairs off the wire, in document order.
struct KeyEntries(Vec<(Decoded<Hex>, Key)>);

impl<'de> serde::de::Visitor<'de> for KeyEntries {
    type Value = Vec<(Decoded<Hex>, Key)>;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a map of key IDs to public keys")
    }

    fn visit_map<M>(mut self, mut access: M) -> Result<Self::Value, M::Error>
    where
        M: serde::de::MapAccess<'de>,
    {
        while let Some(entry) = access.next_entry()? {
            self.0.push(entry);
        }
        Ok(self.0)
    }
}

/// Deserializes the remaining fields of a role document into its `_extra`
/// map, dropping the `_type` tag that serde's internal tagging leaves
/// behind. `_type` is part of the role struct itself; keeping a second copy
/// would corrupt the canonical form.
pub(super) fn extra_skip_type<'de, D>(
    deserializer: D,
) -> Result<HashMap<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut map = HashMap::deserialize(deserializer)?;
    map.remove("_type");
    Ok(map)
}
