// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

mod test_utils;

use hackage_security::error::{Error, ErrorClass};
use hackage_security::{ExpirationEnforcement, FilesystemTransport, PackageId};
use std::fs;
use std::io::Read;
use tempfile::TempDir;
use test_utils::{bootstrap, load_repo, TestRepo};

#[test]
fn save_package_writes_verified_archive() {
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

    let outdir = TempDir::new().unwrap();
    let package: PackageId = "foo-1.0".parse().unwrap();
    let dest = repository.save_package(&package, outdir.path()).unwrap();

    assert_eq!(dest, outdir.path().join("foo-1.0.tar.gz"));
    assert_eq!(fs::read(&dest).unwrap(), b"foo-1.0 source archive");
}

#[test]
fn read_package_streams_verified_bytes() {
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

    let package: PackageId = "foo-1.0".parse().unwrap();
    let mut reader = repository.read_package(&package).unwrap();
    let mut content = Vec::new();
    reader.read_to_end(&mut content).unwrap();
    assert_eq!(content, b"foo-1.0 source archive");
}

#[test]
fn package_resolves_through_index_without_targets_in_memory() {
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
    drop(repository);

    // a fresh session has no top-level targets in memory; the package's own
    // metadata inside the cached index vouches for the archive
    let repository = load_repo(
        &transport,
        &repo,
        cache.path(),
        ExpirationEnforcement::Safe,
    );
    assert!(repository.targets().is_none());

    let outdir = TempDir::new().unwrap();
    let package: PackageId = "foo-1.0".parse().unwrap();
    let dest = repository.save_package(&package, outdir.path()).unwrap();
    assert_eq!(fs::read(dest).unwrap(), b"foo-1.0 source archive");
}

#[test]
fn unknown_package_is_surfaced_as_such() {
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

    let outdir = TempDir::new().unwrap();
    let package: PackageId = "bar-9.9".parse().unwrap();
    let err = repository.save_package(&package, outdir.path()).unwrap_err();
    assert!(matches!(err, Error::TargetNotFound { .. }), "{}", err);
    assert_eq!(err.class(), ErrorClass::Usage);
}

#[test]
fn corrupted_archive_leaves_no_trace() {
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

    // same length, different content: only the hash check can catch this
    fs::write(
        repo.dir.path().join("package/foo-1.0.tar.gz"),
        b"foo-1.0 sOuRcE aRcHiVe",
    )
    .unwrap();

    let outdir = TempDir::new().unwrap();
    let package: PackageId = "foo-1.0".parse().unwrap();
    let err = repository.save_package(&package, outdir.path()).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Verification, "{}", err);

    // neither the destination nor any temp file was left behind
    assert_eq!(fs::read_dir(outdir.path()).unwrap().count(), 0);
    assert!(!cache
        .path()
        .read_dir()
        .unwrap()
        .any(|entry| entry.unwrap().file_name().to_string_lossy().starts_with(".tmp")));
}
