// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

// An integration test might want to use some, but not all of, the symbols
// herein. To do so would cause compiler warnings for unused code, so we
// suppress them.
#![allow(unused)]

use chrono::{DateTime, Duration, Utc};
use hackage_security::schema::decoded::{Decoded, Hex};
use hackage_security::schema::key::{Ed25519Key, Key};
use hackage_security::schema::{
    FileInfo, Hashes, Mirrors, Role, RoleSpec, RoleType, Root, Signature, SignatureMethod, Signed,
    Snapshot, Target, Targets, Timestamp,
};
use hackage_security::{
    BootstrapSettings, ExpirationEnforcement, FilesystemTransport, Limits, Repository, Settings,
};
use maplit::hashmap;
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};
use std::collections::HashMap;
use std::fs;
use std::num::NonZeroU64;
use std::path::Path;
use tempfile::TempDir;
use url::Url;

/// An ed25519 signing key for building test repositories.
pub struct TestKey {
    pair: Ed25519KeyPair,
}

impl TestKey {
    pub fn generate() -> Self {
        let rng = SystemRandom::new();
        let document = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        Self {
            pair: Ed25519KeyPair::from_pkcs8(document.as_ref()).unwrap(),
        }
    }

    pub fn key(&self) -> Key {
        Key::Ed25519 {
            keyval: Ed25519Key {
                public: self.pair.public_key().as_ref().to_vec().into(),
                _extra: HashMap::new(),
            },
            _extra: HashMap::new(),
        }
    }

    pub fn keyid(&self) -> Decoded<Hex> {
        self.key().key_id().unwrap()
    }

    pub fn keyid_hex(&self) -> String {
        hex::encode(self.keyid())
    }

    pub fn sign<T: Role>(&self, role: &T) -> Signature {
        let canonical = role.canonical_form().unwrap();
        Signature {
            keyid: self.keyid(),
            method: SignatureMethod::Ed25519,
            sig: self.pair.sign(&canonical).as_ref().to_vec().into(),
        }
    }
}

/// Wraps `role` in a `Signed` envelope carrying one signature per key.
pub fn sign_all<T: Role>(role: T, keys: &[&TestKey]) -> Signed<T> {
    let signatures = keys.iter().map(|key| key.sign(&role)).collect();
    Signed {
        signed: role,
        signatures,
    }
}

pub fn role_spec_for(key: &TestKey) -> RoleSpec {
    RoleSpec {
        keyids: vec![key.keyid()],
        threshold: version(1),
        _extra: HashMap::new(),
    }
}

pub fn version(v: u64) -> NonZeroU64 {
    NonZeroU64::new(v).unwrap()
}

pub fn in_one_year() -> DateTime<Utc> {
    Utc::now() + Duration::days(365)
}

pub fn in_the_past() -> DateTime<Utc> {
    Utc::now() - Duration::days(1)
}

pub fn file_info(bytes: &[u8]) -> FileInfo {
    FileInfo {
        length: bytes.len() as u64,
        hashes: sha256_hashes(bytes),
        _extra: HashMap::new(),
    }
}

pub fn target_of(bytes: &[u8]) -> Target {
    Target {
        length: bytes.len() as u64,
        hashes: sha256_hashes(bytes),
        custom: HashMap::new(),
        _extra: HashMap::new(),
    }
}

fn sha256_hashes(bytes: &[u8]) -> Hashes {
    Hashes {
        sha256: ring::digest::digest(&ring::digest::SHA256, bytes)
            .as_ref()
            .to_vec()
            .into(),
        _extra: HashMap::new(),
    }
}

/// A complete signed repository on local disk, served through
/// `FilesystemTransport`. Mutate the public fields and call `publish` (or
/// one of the narrower writers) to simulate repository-side changes.
pub struct TestRepo {
    pub dir: TempDir,
    pub root_key: TestKey,
    pub timestamp_key: TestKey,
    pub snapshot_key: TestKey,
    pub targets_key: TestKey,
    pub mirrors_key: TestKey,
    /// name, version, archive bytes
    pub packages: Vec<(String, String, Vec<u8>)>,
    pub mirrors: Vec<String>,
    pub root_version: u64,
    pub timestamp_version: u64,
    pub snapshot_version: u64,
    pub targets_version: u64,
    pub mirrors_version: u64,
    pub timestamp_expires: DateTime<Utc>,
}

impl TestRepo {
    pub fn new() -> Self {
        let repo = Self {
            dir: TempDir::new().unwrap(),
            root_key: TestKey::generate(),
            timestamp_key: TestKey::generate(),
            snapshot_key: TestKey::generate(),
            targets_key: TestKey::generate(),
            mirrors_key: TestKey::generate(),
            packages: vec![(
                "foo".to_string(),
                "1.0".to_string(),
                b"foo-1.0 source archive".to_vec(),
            )],
            mirrors: Vec::new(),
            root_version: 1,
            timestamp_version: 1,
            snapshot_version: 1,
            targets_version: 1,
            mirrors_version: 1,
            timestamp_expires: in_one_year(),
        };
        repo.write_root();
        repo.publish();
        repo
    }

    /// Base URL of the repository directory.
    pub fn url(&self) -> String {
        Url::from_directory_path(self.dir.path()).unwrap().to_string()
    }

    pub fn root_document(&self) -> Root {
        Root {
            version: version(self.root_version),
            expires: in_one_year(),
            keys: hashmap! {
                self.root_key.keyid() => self.root_key.key(),
                self.timestamp_key.keyid() => self.timestamp_key.key(),
                self.snapshot_key.keyid() => self.snapshot_key.key(),
                self.targets_key.keyid() => self.targets_key.key(),
                self.mirrors_key.keyid() => self.mirrors_key.key(),
            },
            roles: hashmap! {
                RoleType::Root => role_spec_for(&self.root_key),
                RoleType::Timestamp => role_spec_for(&self.timestamp_key),
                RoleType::Snapshot => role_spec_for(&self.snapshot_key),
                RoleType::Targets => role_spec_for(&self.targets_key),
                RoleType::Mirrors => role_spec_for(&self.mirrors_key),
            },
            _extra: HashMap::new(),
        }
    }

    pub fn write_root(&self) {
        let root = sign_all(self.root_document(), &[&self.root_key]);
        let bytes = serde_json::to_vec_pretty(&root).unwrap();
        fs::write(self.dir.path().join("root.json"), bytes).unwrap();
    }

    /// Publishes a rotated root as `N.root.json` for the chain walk.
    pub fn write_versioned_root(&self, root: &Signed<Root>) {
        let bytes = serde_json::to_vec_pretty(root).unwrap();
        fs::write(
            self.dir
                .path()
                .join(format!("{}.root.json", root.signed.version)),
            bytes,
        )
        .unwrap();
    }

    /// Rebuilds every published file from the current fields: package
    /// archives, per-package metadata, the index tar, targets.json,
    /// mirrors.json, snapshot.json, and timestamp.json.
    pub fn publish(&self) {
        let mut targets_map = HashMap::new();
        let mut index_builder = tar::Builder::new(Vec::new());
        fs::create_dir_all(self.dir.path().join("package")).unwrap();

        for (name, ver, content) in &self.packages {
            let tarball_path = format!("package/{}-{}.tar.gz", name, ver);
            fs::write(self.dir.path().join(&tarball_path), content).unwrap();
            targets_map.insert(tarball_path.clone(), target_of(content));

            let package_targets = Targets {
                version: version(1),
                expires: in_one_year(),
                targets: hashmap! { tarball_path => target_of(content) },
                _extra: HashMap::new(),
            };
            let package_json =
                serde_json::to_vec_pretty(&sign_all(package_targets, &[&self.targets_key]))
                    .unwrap();
            append_entry(
                &mut index_builder,
                &format!("{}/{}/package.json", name, ver),
                &package_json,
            );
            append_entry(
                &mut index_builder,
                &format!("{}/{}/{}.cabal", name, ver, name),
                format!("name: {}\nversion: {}\n", name, ver).as_bytes(),
            );
        }
        let index_tar = index_builder.into_inner().unwrap();
        fs::write(self.dir.path().join("01-index.tar"), &index_tar).unwrap();

        let targets = Targets {
            version: version(self.targets_version),
            expires: in_one_year(),
            targets: targets_map,
            _extra: HashMap::new(),
        };
        let targets_bytes =
            serde_json::to_vec_pretty(&sign_all(targets, &[&self.targets_key])).unwrap();
        fs::write(self.dir.path().join("targets.json"), &targets_bytes).unwrap();

        let mirrors = Mirrors {
            version: version(self.mirrors_version),
            expires: in_one_year(),
            mirrors: self.mirrors.clone(),
            _extra: HashMap::new(),
        };
        let mirrors_bytes =
            serde_json::to_vec_pretty(&sign_all(mirrors, &[&self.mirrors_key])).unwrap();
        fs::write(self.dir.path().join("mirrors.json"), &mirrors_bytes).unwrap();

        let root_bytes = fs::read(self.dir.path().join("root.json")).unwrap();
        let snapshot = Snapshot {
            version: version(self.snapshot_version),
            expires: in_one_year(),
            meta: hashmap! {
                "root.json".to_string() => file_info(&root_bytes),
                "targets.json".to_string() => file_info(&targets_bytes),
                "mirrors.json".to_string() => file_info(&mirrors_bytes),
                "01-index.tar".to_string() => file_info(&index_tar),
            },
            _extra: HashMap::new(),
        };
        let snapshot_bytes =
            serde_json::to_vec_pretty(&sign_all(snapshot, &[&self.snapshot_key])).unwrap();
        fs::write(self.dir.path().join("snapshot.json"), &snapshot_bytes).unwrap();

        self.write_timestamp(&snapshot_bytes);
    }

    /// Re-signs timestamp.json over the currently published snapshot, using
    /// the current `timestamp_version` and `timestamp_expires`.
    pub fn republish_timestamp(&self) {
        let snapshot_bytes = fs::read(self.dir.path().join("snapshot.json")).unwrap();
        self.write_timestamp(&snapshot_bytes);
    }

    fn write_timestamp(&self, snapshot_bytes: &[u8]) {
        let timestamp = Timestamp {
            version: version(self.timestamp_version),
            expires: self.timestamp_expires,
            meta: hashmap! { "snapshot.json".to_string() => file_info(snapshot_bytes) },
            _extra: HashMap::new(),
        };
        let bytes =
            serde_json::to_vec_pretty(&sign_all(timestamp, &[&self.timestamp_key])).unwrap();
        fs::write(self.dir.path().join("timestamp.json"), bytes).unwrap();
    }
}

/// Bootstraps `cache_dir` against the repo's real root key.
pub fn bootstrap(repo: &TestRepo, cache_dir: &Path) {
    Repository::bootstrap(
        &FilesystemTransport,
        &BootstrapSettings {
            cache_dir,
            repository_base_url: &repo.url(),
            root_key_ids: &[repo.root_key.keyid_hex()],
            threshold: 1,
            limits: Limits::default(),
        },
    )
    .unwrap();
}

/// Loads a repository from a bootstrapped cache.
pub fn load_repo<'a>(
    transport: &'a FilesystemTransport,
    repo: &TestRepo,
    cache_dir: &Path,
    expiration_enforcement: ExpirationEnforcement,
) -> Repository<'a, FilesystemTransport> {
    Repository::load(
        transport,
        Settings {
            cache_dir,
            repository_base_url: &repo.url(),
            limits: Limits::default(),
            expiration_enforcement,
        },
    )
    .unwrap()
}

fn append_entry(builder: &mut tar::Builder<Vec<u8>>, path: &str, content: &[u8]) {
    let mut header = tar::Header::new_ustar();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, path, content).unwrap();
}
