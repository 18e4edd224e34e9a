// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

mod test_utils;

use hackage_security::error::Error;
use hackage_security::schema::{Signed, Timestamp};
use hackage_security::{
    BootstrapSettings, ExpirationEnforcement, FilesystemTransport, Limits, Repository,
    UpdateStatus,
};
use std::fs;
use std::time::SystemTime;
use tempfile::TempDir;
use test_utils::{bootstrap, load_repo, TestKey, TestRepo};

const CACHED_FILES: &[&str] = &[
    "root.json",
    "timestamp.json",
    "snapshot.json",
    "mirrors.json",
    "00-index.tar",
    "00-index.tar.idx",
];

#[test]
fn happy_bootstrap_and_first_check() {
    let repo = TestRepo::new();
    let cache = TempDir::new().unwrap();

    bootstrap(&repo, cache.path());
    assert!(cache.path().join("root.json").is_file());

    let transport = FilesystemTransport;
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

    for file in CACHED_FILES {
        assert!(cache.path().join(file).is_file(), "missing {}", file);
    }

    // the trusted set is populated and the index resolves entries
    assert!(repository.timestamp().is_some());
    assert!(repository.snapshot().is_some());
    assert!(repository.mirrors().is_some());
    assert!(repository.targets().is_some());
    assert!(repository
        .cache()
        .get_cached(hackage_security::CachedFile::Timestamp)
        .is_some());
    assert_eq!(
        repository
            .read_index_entry("foo/1.0/foo.cabal")
            .unwrap()
            .unwrap(),
        b"name: foo\nversion: 1.0\n"
    );
}

#[test]
fn second_check_reports_no_updates_and_touches_nothing() {
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
    assert_eq!(
        repository.check_for_updates().unwrap(),
        UpdateStatus::HasUpdates
    );

    let mtimes_before: Vec<SystemTime> = CACHED_FILES
        .iter()
        .map(|file| fs::metadata(cache.path().join(file)).unwrap().modified().unwrap())
        .collect();

    // a fresh session over the same cache sees no server-side changes
    let mut repository = load_repo(
        &transport,
        &repo,
        cache.path(),
        ExpirationEnforcement::Safe,
    );
    assert_eq!(
        repository.check_for_updates().unwrap(),
        UpdateStatus::NoUpdates
    );

    let mtimes_after: Vec<SystemTime> = CACHED_FILES
        .iter()
        .map(|file| fs::metadata(cache.path().join(file)).unwrap().modified().unwrap())
        .collect();
    assert_eq!(mtimes_before, mtimes_after);
}

#[test]
fn bootstrap_rejects_unknown_root_keys() {
    let repo = TestRepo::new();
    let cache = TempDir::new().unwrap();

    let stranger = TestKey::generate();
    let result = Repository::bootstrap(
        &FilesystemTransport,
        &BootstrapSettings {
            cache_dir: cache.path(),
            repository_base_url: &repo.url(),
            root_key_ids: &[stranger.keyid_hex()],
            threshold: 1,
            limits: Limits::default(),
        },
    );
    assert!(matches!(
        result,
        Err(Error::BootstrapKeysUntrusted { .. })
    ));
    // nothing was written
    assert!(!cache.path().join("root.json").exists());
}

#[test]
fn replayed_timestamp_is_rejected() {
    let mut repo = TestRepo::new();
    repo.timestamp_version = 2;
    repo.republish_timestamp();

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

    // the server replays an older, still validly signed timestamp
    repo.timestamp_version = 1;
    repo.republish_timestamp();

    let mut repository = load_repo(
        &transport,
        &repo,
        cache.path(),
        ExpirationEnforcement::Safe,
    );
    let err = repository.check_for_updates().unwrap_err();
    assert!(matches!(err, Error::OlderMetadata { .. }), "{}", err);

    // the trusted cache is untouched by the failed transaction
    let cached: Signed<Timestamp> =
        serde_json::from_reader(fs::File::open(cache.path().join("timestamp.json")).unwrap())
            .unwrap();
    assert_eq!(cached.signed.version.get(), 2);
}

#[test]
fn expired_timestamp_respects_enforcement_flag() {
    let mut repo = TestRepo::new();
    repo.timestamp_expires = test_utils::in_the_past();
    repo.republish_timestamp();

    let cache = TempDir::new().unwrap();
    bootstrap(&repo, cache.path());

    let transport = FilesystemTransport;
    let mut repository = load_repo(
        &transport,
        &repo,
        cache.path(),
        ExpirationEnforcement::Safe,
    );
    let err = repository.check_for_updates().unwrap_err();
    assert!(matches!(err, Error::ExpiredMetadata { .. }), "{}", err);

    // with expiry enforcement off, the update is judged on versions and
    // hashes alone
    let mut repository = load_repo(
        &transport,
        &repo,
        cache.path(),
        ExpirationEnforcement::Unsafe,
    );
    assert_eq!(
        repository.check_for_updates().unwrap(),
        UpdateStatus::HasUpdates
    );
}
