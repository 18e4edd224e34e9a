// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Builds and queries the offset table that accelerates random access into
//! the package index tar.

use crate::error::{self, Result};
use serde::{Deserialize, Serialize};
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Serialization version of the on-disk offset table. Bump when the layout
/// changes; readers treat other versions as corrupt and rebuild.
const INDEX_FORMAT_VERSION: u32 = 1;

/// Tar entries are padded to this block size; headers start on block
/// boundaries.
const BLOCK_SIZE: u64 = 512;

/// Location of one file's content within the index tar.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub(crate) struct IndexEntry {
    pub(crate) offset: u64,
    pub(crate) length: u64,
}

/// An offset table mapping index entry paths to their position in the tar,
/// so entries can be read without scanning the whole archive. Serialized as
/// JSON next to the tar it describes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub(crate) struct TarIndex {
    version: u32,
    /// Offset of the first block past the last indexed entry's data. Index
    /// builds over a grown archive resume scanning from here.
    end_offset: u64,
    entries: HashMap<String, IndexEntry>,
}

impl TarIndex {
    /// Reads a previously serialized index. A missing, unparseable, or
    /// wrong-version file is an error; callers decide whether to rebuild.
    pub(crate) fn read_from(path: &Path) -> Result<Self> {
        let file = File::open(path).context(error::IndexRead { path })?;
        let index: TarIndex = serde_json::from_reader(file).context(error::IndexParse { path })?;
        ensure!(
            index.version == INDEX_FORMAT_VERSION,
            error::IndexVersion {
                path,
                version: index.version,
            }
        );
        Ok(index)
    }

    /// Atomically writes the serialized index to `path`.
    pub(crate) fn write_to(&self, path: &Path) -> Result<()> {
        let dir = path.parent().context(error::PathParent { path })?;
        let mut tmp = NamedTempFile::new_in(dir).context(error::FileTempCreate { path: dir })?;
        let buf = serde_json::to_vec(self).context(error::IndexSerialize { path })?;
        tmp.write_all(&buf).context(error::CacheFileWrite { path })?;
        tmp.as_file().sync_all().context(error::FileSync { path })?;
        tmp.persist(path).context(error::FilePersist { path })?;
        Ok(())
    }

    /// Looks up the location of `entry_path`'s content. Only normal file
    /// entries are recorded, so directories and links resolve to `None`.
    pub(crate) fn lookup(&self, entry_path: &str) -> Option<IndexEntry> {
        self.entries.get(entry_path).copied()
    }
}

/// Walks the tar at `tar_path` and produces its offset table. When `seed`
/// carries a previously built index whose end offset still lies within the
/// file, scanning resumes there instead of starting over; this makes
/// re-indexing an append-only archive proportional to its growth.
pub(crate) fn build(tar_path: &Path, seed: Option<TarIndex>) -> Result<TarIndex> {
    let mut file = File::open(tar_path).context(error::IndexRead { path: tar_path })?;
    let tar_len = file
        .metadata()
        .context(error::IndexRead { path: tar_path })?
        .len();

    let (mut entries, base) = match seed {
        Some(index) if index.end_offset <= tar_len => (index.entries, index.end_offset),
        _ => (HashMap::new(), 0),
    };

    file.seek(SeekFrom::Start(base))
        .context(error::IndexRead { path: tar_path })?;
    let mut archive = tar::Archive::new(file);
    let mut end_offset = base;
    for entry in archive.entries().context(error::IndexTar { path: tar_path })? {
        let entry = entry.context(error::IndexTar { path: tar_path })?;
        // positions reported by the reader are relative to where we started
        let offset = base + entry.raw_file_position();
        let length = entry.size();
        if entry.header().entry_type().is_file() {
            let path = entry.path().context(error::IndexTar { path: tar_path })?;
            entries.insert(
                path.to_string_lossy().into_owned(),
                IndexEntry { offset, length },
            );
        }
        end_offset = offset + length + (BLOCK_SIZE - length % BLOCK_SIZE) % BLOCK_SIZE;
    }

    Ok(TarIndex {
        version: INDEX_FORMAT_VERSION,
        end_offset,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::{build, TarIndex};
    use std::fs;
    use std::io::{Read, Seek, SeekFrom};
    use tempfile::TempDir;

    fn tar_with_entries(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, content) in entries {
            let mut header = tar::Header::new_ustar();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *content).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn read_at(path: &std::path::Path, offset: u64, length: u64) -> Vec<u8> {
        let mut file = fs::File::open(path).unwrap();
        file.seek(SeekFrom::Start(offset)).unwrap();
        let mut buf = vec![0; length as usize];
        file.read_exact(&mut buf).unwrap();
        buf
    }

    #[test]
    fn build_and_lookup() {
        let dir = TempDir::new().unwrap();
        let tar_path = dir.path().join("00-index.tar");
        fs::write(
            &tar_path,
            tar_with_entries(&[
                ("foo/1.0/foo.cabal", b"name: foo"),
                ("foo/1.0/package.json", b"{}"),
            ]),
        )
        .unwrap();

        let index = build(&tar_path, None).unwrap();
        let entry = index.lookup("foo/1.0/foo.cabal").unwrap();
        assert_eq!(read_at(&tar_path, entry.offset, entry.length), b"name: foo");
        assert!(index.lookup("foo/1.0/nonexistent").is_none());
    }

    #[test]
    fn resumed_build_sees_appended_entries() {
        let dir = TempDir::new().unwrap();
        let tar_path = dir.path().join("00-index.tar");
        fs::write(&tar_path, tar_with_entries(&[("foo/1.0/foo.cabal", b"name: foo")])).unwrap();
        let first = build(&tar_path, None).unwrap();

        // the repository appends entries; everything before `end_offset` is
        // unchanged
        fs::write(
            &tar_path,
            tar_with_entries(&[
                ("foo/1.0/foo.cabal", b"name: foo"),
                ("bar/2.0/bar.cabal", b"name: bar"),
            ]),
        )
        .unwrap();
        let second = build(&tar_path, Some(first)).unwrap();

        let entry = second.lookup("bar/2.0/bar.cabal").unwrap();
        assert_eq!(read_at(&tar_path, entry.offset, entry.length), b"name: bar");
        // entries recorded before the resume point survive
        assert!(second.lookup("foo/1.0/foo.cabal").is_some());
    }

    #[test]
    fn stale_seed_triggers_full_build() {
        let dir = TempDir::new().unwrap();
        let tar_path = dir.path().join("00-index.tar");
        fs::write(
            &tar_path,
            tar_with_entries(&[("foo/1.0/foo.cabal", b"name: foo")]),
        )
        .unwrap();
        let mut seed = build(&tar_path, None).unwrap();
        // pretend the previous index described a longer archive
        seed.end_offset = 1 << 20;
        let index = build(&tar_path, Some(seed)).unwrap();
        assert!(index.lookup("foo/1.0/foo.cabal").is_some());
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let tar_path = dir.path().join("00-index.tar");
        let idx_path = dir.path().join("00-index.tar.idx");
        fs::write(
            &tar_path,
            tar_with_entries(&[("foo/1.0/foo.cabal", b"name: foo")]),
        )
        .unwrap();

        build(&tar_path, None).unwrap().write_to(&idx_path).unwrap();
        let index = TarIndex::read_from(&idx_path).unwrap();
        assert!(index.lookup("foo/1.0/foo.cabal").is_some());
    }

    #[test]
    fn rejects_corrupt_index_file() {
        let dir = TempDir::new().unwrap();
        let idx_path = dir.path().join("00-index.tar.idx");
        fs::write(&idx_path, b"not json").unwrap();
        assert!(TarIndex::read_from(&idx_path).is_err());
    }
}
