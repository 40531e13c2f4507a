//! Enrolled-image store.
//!
//! A directory of enrollment photos, one file per member, named
//! `<member name>.<ext>`. This directory is the source of truth for the
//! gallery; the snapshot cache is only derived from it.

use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extensions recognised as enrollment photos (compared lowercase).
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Longest accepted member name, in characters.
pub const MAX_NAME_LEN: usize = 64;

/// Byte cap on a name, leaving room for `.` + extension + `.tmp` under the
/// 255-byte file name limit.
pub const MAX_NAME_BYTES: usize = 200;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NameError {
    #[error("name is empty")]
    Empty,
    #[error("name is longer than {MAX_NAME_LEN} characters or {MAX_NAME_BYTES} bytes")]
    TooLong,
    #[error("name may not start with '.'")]
    LeadingDot,
    #[error("name contains invalid character {0:?}")]
    InvalidCharacter(char),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid member name: {0}")]
    InvalidName(#[from] NameError),
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Trim a requested member name and check it is safe to use as a file stem.
pub fn validate_name(raw: &str) -> Result<String, NameError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name.len() > MAX_NAME_BYTES || name.chars().count() > MAX_NAME_LEN {
        return Err(NameError::TooLong);
    }
    if name.starts_with('.') {
        return Err(NameError::LeadingDot);
    }
    if let Some(c) = name
        .chars()
        .find(|c| c.is_control() || matches!(c, '/' | '\\' | ':'))
    {
        return Err(NameError::InvalidCharacter(c));
    }
    Ok(name.to_string())
}

/// One photo in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEntry {
    /// File name inside the store, e.g. `alice.jpg`.
    pub file_name: String,
    /// Member name derived from the file name, e.g. `alice`.
    pub name: String,
    pub path: PathBuf,
}

impl ImageEntry {
    /// Parse a directory entry; `None` for files that are not enrollment
    /// photos (other extensions, hidden or temporary files).
    fn parse(root: &Path, file_name: &str) -> Option<Self> {
        let path = Path::new(file_name);
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        if stem.is_empty() || stem.starts_with('.') {
            return None;
        }
        Some(Self {
            file_name: file_name.to_string(),
            name: stem.to_string(),
            path: root.join(file_name),
        })
    }
}

/// Running SHA-256 over the store's photos, used to tell whether a cached
/// gallery still describes the current store.
pub struct StoreFingerprint(Sha256);

impl StoreFingerprint {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn add(&mut self, file_name: &str, bytes: &[u8]) {
        self.0.update((file_name.len() as u64).to_le_bytes());
        self.0.update(file_name.as_bytes());
        self.0.update((bytes.len() as u64).to_le_bytes());
        self.0.update(bytes);
    }

    pub fn finish(self) -> String {
        format!("{:x}", self.0.finalize())
    }
}

impl Default for StoreFingerprint {
    fn default() -> Self {
        Self::new()
    }
}

/// Directory-backed enrolled-image store.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    /// Open the store at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All enrollment photos, sorted by file name.
    pub fn entries(&self) -> Result<Vec<ImageEntry>, StoreError> {
        let dir = fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))?;

        let mut entries = Vec::new();
        for dirent in dir {
            let dirent = dirent.map_err(|e| StoreError::io(&self.root, e))?;
            let Ok(file_name) = dirent.file_name().into_string() else {
                tracing::warn!(path = ?dirent.path(), "skipping non-UTF-8 file name");
                continue;
            };
            if !dirent.path().is_file() {
                continue;
            }
            if let Some(entry) = ImageEntry::parse(&self.root, &file_name) {
                entries.push(entry);
            }
        }

        entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(entries)
    }

    /// Look up a photo by its exact file name.
    pub fn find(&self, file_name: &str) -> Result<Option<ImageEntry>, StoreError> {
        Ok(self
            .entries()?
            .into_iter()
            .find(|e| e.file_name == file_name))
    }

    pub fn read(&self, entry: &ImageEntry) -> Result<Vec<u8>, StoreError> {
        fs::read(&entry.path).map_err(|e| StoreError::io(&entry.path, e))
    }

    /// Store a photo as `<name>.<extension>`, replacing any earlier photo
    /// stored under the same name.
    ///
    /// The file is written to a hidden temporary and renamed into place, so
    /// a scan never sees a partially written photo.
    pub fn put(&self, name: &str, extension: &str, bytes: &[u8]) -> Result<ImageEntry, StoreError> {
        let name = validate_name(name)?;
        let file_name = format!("{name}.{extension}");
        let target = self.root.join(&file_name);
        let tmp = self.root.join(format!(".{file_name}.tmp"));

        fs::write(&tmp, bytes).map_err(|e| StoreError::io(&tmp, e))?;
        if let Err(e) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::io(&target, e));
        }

        for stale in self.entries()? {
            if stale.name == name && stale.file_name != file_name {
                tracing::info!(file = %stale.file_name, name = %name, "replacing earlier photo");
                fs::remove_file(&stale.path).map_err(|e| StoreError::io(&stale.path, e))?;
            }
        }

        Ok(ImageEntry {
            file_name,
            name,
            path: target,
        })
    }

    /// Delete every photo stored under `name`. Returns the removed file names.
    pub fn remove(&self, name: &str) -> Result<Vec<String>, StoreError> {
        let name = validate_name(name)?;
        let mut removed = Vec::new();
        for entry in self.entries()? {
            if entry.name == name {
                fs::remove_file(&entry.path).map_err(|e| StoreError::io(&entry.path, e))?;
                removed.push(entry.file_name);
            }
        }
        Ok(removed)
    }

    /// Fingerprint of the current store contents.
    ///
    /// Photos that cannot be read are left out, as the gallery builder skips
    /// them, so the result matches the fingerprint of a build over the same
    /// store.
    pub fn fingerprint(&self) -> Result<String, StoreError> {
        let mut fingerprint = StoreFingerprint::new();
        for entry in self.entries()? {
            match self.read(&entry) {
                Ok(bytes) => fingerprint.add(&entry.file_name, &bytes),
                Err(e) => tracing::warn!(file = %entry.file_name, error = %e, "unreadable photo left out of fingerprint"),
            }
        }
        Ok(fingerprint.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name_trims() {
        assert_eq!(validate_name("  Alice Smith \n").unwrap(), "Alice Smith");
    }

    #[test]
    fn test_validate_name_rejects_unsafe() {
        assert_eq!(validate_name("   "), Err(NameError::Empty));
        assert_eq!(validate_name(".hidden"), Err(NameError::LeadingDot));
        assert_eq!(validate_name("../etc/passwd"), Err(NameError::LeadingDot));
        assert_eq!(validate_name("a/b"), Err(NameError::InvalidCharacter('/')));
        assert_eq!(validate_name("a\\b"), Err(NameError::InvalidCharacter('\\')));
        assert_eq!(validate_name("a\0b"), Err(NameError::InvalidCharacter('\0')));
        assert_eq!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)), Err(NameError::TooLong));
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN)).is_ok());
    }

    #[test]
    fn test_validate_name_caps_bytes() {
        // 64 characters, 256 bytes: too long for `.{name}.png.tmp`
        let wide = "\u{1D11E}".repeat(MAX_NAME_LEN);
        assert_eq!(wide.chars().count(), MAX_NAME_LEN);
        assert_eq!(validate_name(&wide), Err(NameError::TooLong));
        assert!(validate_name(&"\u{1D11E}".repeat(MAX_NAME_BYTES / 4)).is_ok());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_fingerprint_skips_unreadable_photo() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();
        store.put("alice", "png", b"one").unwrap();
        let readable_only = store.fingerprint().unwrap();

        // Regular file whose reads fail with EIO.
        std::os::unix::fs::symlink("/proc/self/mem", dir.path().join("bob.png")).unwrap();
        assert!(store.read(&store.find("bob.png").unwrap().unwrap()).is_err());
        assert_eq!(store.fingerprint().unwrap(), readable_only);
    }

    #[test]
    fn test_entries_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["carol.PNG", "alice.jpg", "notes.txt", ".alice.png.tmp", "bob.jpeg"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("dave.png")).unwrap();

        let store = ImageStore::open(dir.path()).unwrap();
        let entries = store.entries().unwrap();
        let files: Vec<_> = entries.iter().map(|e| e.file_name.as_str()).collect();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();

        assert_eq!(files, ["alice.jpg", "bob.jpeg", "carol.PNG"]);
        assert_eq!(names, ["alice", "bob", "carol"]);
    }

    #[test]
    fn test_put_replaces_same_name_other_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();

        store.put("alice", "jpg", b"first").unwrap();
        store.put("bob", "png", b"bob").unwrap();
        let entry = store.put(" alice ", "png", b"second").unwrap();

        assert_eq!(entry.file_name, "alice.png");
        let files: Vec<_> = store
            .entries()
            .unwrap()
            .into_iter()
            .map(|e| e.file_name)
            .collect();
        assert_eq!(files, ["alice.png", "bob.png"]);
        assert_eq!(store.read(&entry).unwrap(), b"second");
        // no temporary files left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_put_rejects_invalid_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();
        let err = store.put("../escape", "png", b"x").unwrap_err();
        assert!(matches!(err, StoreError::InvalidName(NameError::LeadingDot)));
        assert!(store.entries().unwrap().is_empty());
    }

    #[test]
    fn test_remove_and_find() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();
        store.put("alice", "jpg", b"a").unwrap();
        fs::write(dir.path().join("alice.png"), b"stray").unwrap();

        assert!(store.find("alice.jpg").unwrap().is_some());
        assert!(store.find("../alice.jpg").unwrap().is_none());

        let removed = store.remove("alice").unwrap();
        assert_eq!(removed, ["alice.jpg", "alice.png"]);
        assert!(store.remove("alice").unwrap().is_empty());
    }

    #[test]
    fn test_fingerprint_tracks_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();
        let empty = store.fingerprint().unwrap();

        store.put("alice", "png", b"one").unwrap();
        let first = store.fingerprint().unwrap();
        assert_ne!(empty, first);
        assert_eq!(first, store.fingerprint().unwrap());

        store.put("alice", "png", b"two").unwrap();
        assert_ne!(first, store.fingerprint().unwrap());
    }
}
