//! Signature verification over canonical role payloads.

use crate::schema::error::{self, Result};
use crate::schema::{Role, RoleSpec, RoleType, Root, Signed};
use snafu::{ensure, OptionExt};
use std::collections::HashSet;

impl Root {
    /// Returns the key specification for `role`, which every verification
    /// resolves key ID references through.
    pub fn role_spec(&self, role: RoleType) -> Result<&RoleSpec> {
        self.roles.get(&role).context(error::MissingRole { role })
    }

    /// Checks that `role` carries at least the threshold of valid signatures
    /// made by distinct keys authorized for `T`'s role.
    ///
    /// Signatures by keys outside the role's key set, or that fail to
    /// verify, are ignored rather than rejected; only the count of distinct
    /// valid signers matters.
    pub fn verify_role<T: Role>(&self, role: &Signed<T>) -> Result<()> {
        let spec = self.role_spec(T::TYPE)?;
        let canonical = role.signed.canonical_form()?;
        let mut valid = HashSet::new();
        for signature in &role.signatures {
            if !spec.keyids.contains(&signature.keyid) {
                continue;
            }
            if let Some(key) = self.keys.get(&signature.keyid) {
                if key.verify(&canonical, &signature.sig) {
                    valid.insert(&signature.keyid);
                }
            }
        }
        ensure!(
            valid.len() as u64 >= spec.threshold.get(),
            error::SignatureThreshold {
                role: T::TYPE,
                threshold: spec.threshold.get(),
                valid: valid.len() as u64,
            }
        );
        Ok(())
    }

    /// Checks that every key ID referenced by a role specification is
    /// declared in this document's `keys` map.
    pub fn check_role_keys(&self) -> Result<()> {
        for (role, spec) in &self.roles {
            for keyid in &spec.keyids {
                ensure!(
                    self.keys.contains_key(keyid),
                    error::UndeclaredKeyId {
                        role: *role,
                        keyid: hex::encode(keyid),
                    }
                );
            }
        }
        Ok(())
    }
}
