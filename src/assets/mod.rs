//! Asset model: files and inline blobs carried to the execution environment.
//!
//! An [`Asset`] is `(filename, relative_path, content)` where content is
//! either inline bytes or a reference to a local file. An
//! [`AssetCollection`] is an insertion-ordered set keyed by
//! `(relative_path, filename)`; duplicates collapse, and an explicit replace
//! flag is required to overwrite. Collections have a content identity that
//! backends use to deduplicate uploads.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Asset content: inline bytes or a reference to a local file.
///
/// File references are read lazily so large inputs are not held in memory
/// while a sweep is being assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetContent {
    /// Inline bytes supplied by the caller.
    Inline(Vec<u8>),
    /// A local file read at persistence time.
    File(PathBuf),
}

/// A named file or blob bound to an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// File name as it appears in the execution environment.
    pub filename: String,
    /// Directory prefix relative to the `Assets/` root; empty for top level.
    pub relative_path: String,
    /// The content or the local file it comes from.
    pub content: AssetContent,
}

impl Asset {
    /// Create an asset from inline bytes.
    pub fn from_bytes(
        filename: impl Into<String>,
        relative_path: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            filename: filename.into(),
            relative_path: relative_path.into(),
            content: AssetContent::Inline(bytes.into()),
        }
    }

    /// Create an asset referencing a local file; the filename is taken from
    /// the path's final component.
    pub fn from_file(path: impl Into<PathBuf>, relative_path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::AssetNotFound(path.display().to_string()))?
            .to_string();
        Ok(Self {
            filename,
            relative_path: relative_path.into(),
            content: AssetContent::File(path),
        })
    }

    /// The collection key for deduplication.
    pub fn key(&self) -> (String, String) {
        (self.relative_path.clone(), self.filename.clone())
    }

    /// Resolve the content to bytes, reading referenced files.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        match &self.content {
            AssetContent::Inline(bytes) => Ok(bytes.clone()),
            AssetContent::File(path) => fs::read(path).map_err(|_| {
                Error::AssetNotFound(path.display().to_string())
            }),
        }
    }

    /// Hex-encoded sha256 of the content.
    pub fn checksum(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(self.bytes()?);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Path of this asset below an `Assets/` root.
    pub fn target_path(&self, assets_root: &Path) -> PathBuf {
        if self.relative_path.is_empty() {
            assets_root.join(&self.filename)
        } else {
            assets_root.join(&self.relative_path).join(&self.filename)
        }
    }
}

/// Manifest entry persisted in experiment metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetManifestEntry {
    pub filename: String,
    #[serde(default)]
    pub relative_path: String,
    pub checksum: String,
}

/// An insertion-ordered, deduplicated set of assets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetCollection {
    assets: Vec<Asset>,
}

impl AssetCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an asset.
    ///
    /// Fails with [`Error::DuplicateAsset`] when `(relative_path, filename)`
    /// is already present, unless `replace` is set, in which case the
    /// existing entry is overwritten in place (keeping its position).
    pub fn add_asset(&mut self, asset: Asset, replace: bool) -> Result<()> {
        if let Some(pos) = self.assets.iter().position(|a| a.key() == asset.key()) {
            if !replace {
                return Err(Error::DuplicateAsset {
                    relative_path: asset.relative_path,
                    filename: asset.filename,
                });
            }
            self.assets[pos] = asset;
        } else {
            self.assets.push(asset);
        }
        Ok(())
    }

    /// Walk a local directory and add every file found.
    ///
    /// `relative_path` for each asset is the path of its parent directory
    /// relative to `dir`. With `recursive` false, only the top level is
    /// scanned. Walk order is sorted by file name for determinism.
    pub fn add_directory(&mut self, dir: &Path, recursive: bool) -> Result<()> {
        if !dir.is_dir() {
            return Err(Error::AssetNotFound(dir.display().to_string()));
        }
        let max_depth = if recursive { usize::MAX } else { 1 };
        for entry in WalkDir::new(dir)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel_parent = entry
                .path()
                .parent()
                .and_then(|p| p.strip_prefix(dir).ok())
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            let asset = Asset::from_file(entry.path().to_path_buf(), rel_parent)?;
            self.add_asset(asset, false)?;
        }
        Ok(())
    }

    /// Deterministic iteration in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.assets.iter()
    }

    /// A shallow, mutation-independent clone.
    ///
    /// Required when appending to an already-persisted experiment: the
    /// persisted collection must not observe later mutations of the copy.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Number of assets.
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// True when the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Look up an asset by `(relative_path, filename)`.
    pub fn get(&self, relative_path: &str, filename: &str) -> Option<&Asset> {
        self.assets
            .iter()
            .find(|a| a.relative_path == relative_path && a.filename == filename)
    }

    /// Content identity of the whole collection.
    ///
    /// Hex-encoded sha256 over the sorted sequence of per-asset
    /// `(relative_path, filename, sha256-of-content)` triples. Two
    /// collections with identical content share an identity regardless of
    /// insertion order, which lets backends skip redundant uploads.
    pub fn checksum(&self) -> Result<String> {
        let mut triples: Vec<(String, String, String)> = Vec::with_capacity(self.assets.len());
        let mut seen = HashSet::new();
        for asset in &self.assets {
            if !seen.insert(asset.key()) {
                continue;
            }
            triples.push((
                asset.relative_path.clone(),
                asset.filename.clone(),
                asset.checksum()?,
            ));
        }
        triples.sort();

        let mut hasher = Sha256::new();
        for (rel, name, sum) in &triples {
            hasher.update(rel.as_bytes());
            hasher.update([0u8]);
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            hasher.update(sum.as_bytes());
            hasher.update([0u8]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Manifest entries for experiment metadata.
    pub fn manifest(&self) -> Result<Vec<AssetManifestEntry>> {
        self.assets
            .iter()
            .map(|a| {
                Ok(AssetManifestEntry {
                    filename: a.filename.clone(),
                    relative_path: a.relative_path.clone(),
                    checksum: a.checksum()?,
                })
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a AssetCollection {
    type Item = &'a Asset;
    type IntoIter = std::slice::Iter<'a, Asset>;

    fn into_iter(self) -> Self::IntoIter {
        self.assets.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_add_asset_duplicate_rejected() {
        let mut ac = AssetCollection::new();
        ac.add_asset(Asset::from_bytes("a.txt", "", b"one".to_vec()), false)
            .unwrap();
        let err = ac
            .add_asset(Asset::from_bytes("a.txt", "", b"two".to_vec()), false)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateAsset { .. }));
        assert_eq!(ac.len(), 1);
    }

    #[test]
    fn test_add_asset_replace() {
        let mut ac = AssetCollection::new();
        ac.add_asset(Asset::from_bytes("a.txt", "", b"one".to_vec()), false)
            .unwrap();
        ac.add_asset(Asset::from_bytes("a.txt", "", b"two".to_vec()), true)
            .unwrap();
        assert_eq!(ac.len(), 1);
        assert_eq!(ac.get("", "a.txt").unwrap().bytes().unwrap(), b"two");
    }

    #[test]
    fn test_same_name_different_path_allowed() {
        let mut ac = AssetCollection::new();
        ac.add_asset(Asset::from_bytes("a.txt", "", b"one".to_vec()), false)
            .unwrap();
        ac.add_asset(Asset::from_bytes("a.txt", "sub", b"two".to_vec()), false)
            .unwrap();
        assert_eq!(ac.len(), 2);
    }

    #[test]
    fn test_iteration_insertion_order() {
        let mut ac = AssetCollection::new();
        for name in ["c.txt", "a.txt", "b.txt"] {
            ac.add_asset(Asset::from_bytes(name, "", b"x".to_vec()), false)
                .unwrap();
        }
        let names: Vec<&str> = ac.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, vec!["c.txt", "a.txt", "b.txt"]);
    }

    #[test]
    fn test_copy_is_mutation_independent() {
        let mut ac = AssetCollection::new();
        ac.add_asset(Asset::from_bytes("a.txt", "", b"x".to_vec()), false)
            .unwrap();
        let snapshot = ac.copy();
        ac.add_asset(Asset::from_bytes("b.txt", "", b"y".to_vec()), false)
            .unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(ac.len(), 2);
    }

    #[test]
    fn test_add_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("top.txt"), b"top").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/inner.txt"), b"inner").unwrap();

        let mut ac = AssetCollection::new();
        ac.add_directory(dir.path(), true).unwrap();
        assert_eq!(ac.len(), 2);
        assert!(ac.get("", "top.txt").is_some());
        assert!(ac.get("nested", "inner.txt").is_some());
    }

    #[test]
    fn test_add_directory_non_recursive() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("top.txt"), b"top").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/inner.txt"), b"inner").unwrap();

        let mut ac = AssetCollection::new();
        ac.add_directory(dir.path(), false).unwrap();
        assert_eq!(ac.len(), 1);
        assert!(ac.get("", "top.txt").is_some());
    }

    #[test]
    fn test_checksum_order_independent() {
        let mut a = AssetCollection::new();
        a.add_asset(Asset::from_bytes("a.txt", "", b"one".to_vec()), false)
            .unwrap();
        a.add_asset(Asset::from_bytes("b.txt", "", b"two".to_vec()), false)
            .unwrap();

        let mut b = AssetCollection::new();
        b.add_asset(Asset::from_bytes("b.txt", "", b"two".to_vec()), false)
            .unwrap();
        b.add_asset(Asset::from_bytes("a.txt", "", b"one".to_vec()), false)
            .unwrap();

        assert_eq!(a.checksum().unwrap(), b.checksum().unwrap());
    }

    #[test]
    fn test_checksum_content_sensitive() {
        let mut a = AssetCollection::new();
        a.add_asset(Asset::from_bytes("a.txt", "", b"one".to_vec()), false)
            .unwrap();

        let mut b = AssetCollection::new();
        b.add_asset(Asset::from_bytes("a.txt", "", b"other".to_vec()), false)
            .unwrap();

        assert_ne!(a.checksum().unwrap(), b.checksum().unwrap());
    }

    #[test]
    fn test_asset_from_missing_file() {
        let asset = Asset::from_file("/definitely/not/here.txt", "").unwrap();
        assert!(matches!(asset.bytes(), Err(Error::AssetNotFound(_))));
    }

    #[test]
    fn test_manifest_entries() {
        let mut ac = AssetCollection::new();
        ac.add_asset(Asset::from_bytes("a.txt", "sub", b"one".to_vec()), false)
            .unwrap();
        let manifest = ac.manifest().unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest[0].filename, "a.txt");
        assert_eq!(manifest[0].relative_path, "sub");
        assert_eq!(manifest[0].checksum.len(), 64);
    }
}
