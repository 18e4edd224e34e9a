// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

mod test_utils;

use hackage_security::schema::RoleType;
use hackage_security::{ExpirationEnforcement, FilesystemTransport, UpdateStatus};
use maplit::hashmap;
use tempfile::TempDir;
use test_utils::{
    bootstrap, in_one_year, load_repo, role_spec_for, sign_all, version, TestKey, TestRepo,
};

#[test]
fn rotated_root() {
    let repo = TestRepo::new();
    let cache = TempDir::new().unwrap();
    bootstrap(&repo, cache.path());

    let transport = FilesystemTransport;
    let mut repository = load_repo(
        &transport,
        &repo,
        cache.path(),
        ExpirationEnforcement::Safe,
    );
    repository.check_for_updates().unwrap();
    assert_eq!(repository.root().signed.version.get(), 1);

    // The repository rotates its root key: version 2 declares a fresh key
    // set and is signed by both the outgoing and the incoming root key.
    let new_root_key = TestKey::generate();
    let root2 = hackage_security::schema::Root {
        version: version(2),
        expires: in_one_year(),
        keys: hashmap! {
            new_root_key.keyid() => new_root_key.key(),
            repo.timestamp_key.keyid() => repo.timestamp_key.key(),
            repo.snapshot_key.keyid() => repo.snapshot_key.key(),
            repo.targets_key.keyid() => repo.targets_key.key(),
            repo.mirrors_key.keyid() => repo.mirrors_key.key(),
        },
        roles: hashmap! {
            RoleType::Root => role_spec_for(&new_root_key),
            RoleType::Timestamp => role_spec_for(&repo.timestamp_key),
            RoleType::Snapshot => role_spec_for(&repo.snapshot_key),
            RoleType::Targets => role_spec_for(&repo.targets_key),
            RoleType::Mirrors => role_spec_for(&repo.mirrors_key),
        },
        _extra: std::collections::HashMap::new(),
    };
    repo.write_versioned_root(&sign_all(root2, &[&repo.root_key, &new_root_key]));

    // A fresh check walks the chain, installs version 2, discards the
    // cached timestamp and snapshot, and refetches them under the new root.
    let mut repository = load_repo(
        &transport,
        &repo,
        cache.path(),
        ExpirationEnforcement::Safe,
    );
    assert_eq!(
        repository.check_for_updates().unwrap(),
        UpdateStatus::HasUpdates
    );
    assert_eq!(repository.root().signed.version.get(), 2);
    assert!(repository.snapshot().is_some());
    assert!(cache.path().join("timestamp.json").is_file());

    // the rotated root is now the cache's trust anchor
    let mut repository = load_repo(
        &transport,
        &repo,
        cache.path(),
        ExpirationEnforcement::Safe,
    );
    assert_eq!(repository.root().signed.version.get(), 2);
    assert_eq!(
        repository.check_for_updates().unwrap(),
        UpdateStatus::NoUpdates
    );
}
