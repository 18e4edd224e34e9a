//! Package identifiers and the repository paths derived from them.

use crate::error::{self, Error, Result};
use snafu::ensure;
use std::fmt;
use std::str::FromStr;

/// A package name and version, e.g. `aeson-2.2.1.0`. The version is the
/// final dash-separated component consisting only of digits and dots, so
/// names containing dashes parse correctly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageId {
    name: String,
    version: String,
}

impl PackageId {
    /// Creates a package identifier from its parts.
    pub fn new(name: &str, version: &str) -> Result<Self> {
        ensure!(
            !name.is_empty()
                && !version.is_empty()
                && version.chars().all(|c| c.is_ascii_digit() || c == '.'),
            error::InvalidPackageId {
                id: format!("{}-{}", name, version),
            }
        );
        Ok(Self {
            name: name.to_owned(),
            version: version.to_owned(),
        })
    }

    /// The package name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The package version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Path of the package's targets metadata within the package index.
    pub fn metadata_path(&self) -> String {
        format!("{}/{}/package.json", self.name, self.version)
    }

    /// The file name of the package's source archive.
    pub fn tarball_filename(&self) -> String {
        format!("{}.tar.gz", self)
    }

    /// Repository path of the package's source archive.
    pub fn tarball_path(&self) -> String {
        format!("package/{}", self.tarball_filename())
    }
}

impl FromStr for PackageId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (name, version) = match s.rfind('-') {
            Some(idx) => (&s[..idx], &s[idx + 1..]),
            None => {
                return error::InvalidPackageId { id: s }.fail();
            }
        };
        Self::new(name, version).map_err(|_| {
            error::InvalidPackageId { id: s }.build()
        })
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}
