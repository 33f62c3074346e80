//! Raw key derivation.
//!
//! Every record lives under a raw key derived from the store name, the store
//! version and the logical key:
//!
//! ```text
//! <name>#<version>#<key>
//! ```
//!
//! Names and versions may not contain the separator, so the first two `#`
//! characters of a raw key always delimit the name and version. Two
//! keyspaces with different `(name, version)` pairs therefore never produce
//! the same raw key, whatever logical keys are used. Filesystem backends use
//! the same triple as a path (`<root>/<name>/<version>/<hex(key)>.rec`).

use crate::error::{StoreError, StoreResult};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

/// Separator between name, version and logical key in flat raw keys.
pub const KEY_SEPARATOR: char = '#';

/// Version used when a store is opened without an explicit one.
pub const DEFAULT_VERSION: &str = "0";

/// Extension of record files written by the file backend.
pub const RECORD_EXTENSION: &str = "rec";

/// Extension of record files named by the digest of a long key.
pub const DIGEST_RECORD_EXTENSION: &str = "hrec";

/// Longest key whose hex encoding is used as the record file name. Twice
/// this plus the extension stays under the common 255-byte name limit.
pub const MAX_NAMED_KEY_BYTES: usize = 120;

const FORBIDDEN: [char; 4] = [KEY_SEPARATOR, '/', '\\', '\0'];

/// A validated `(name, version)` pair that owns a partition of a backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeySpace {
    name: String,
    version: String,
}

impl KeySpace {
    /// Creates a keyspace, rejecting names and versions that could collide.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKeySpace`] if either part is empty, is
    /// `.` or `..`, or contains the separator or a path separator.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> StoreResult<Self> {
        let name = name.into();
        let version = version.into();
        validate_part("name", &name)?;
        validate_part("version", &version)?;
        Ok(Self { name, version })
    }

    /// Returns the store name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the store version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the prefix shared by every raw key of this keyspace.
    #[must_use]
    pub fn prefix(&self) -> String {
        format!(
            "{}{sep}{}{sep}",
            self.name,
            self.version,
            sep = KEY_SEPARATOR
        )
    }

    /// Returns the prefix shared by every version of this store name.
    #[must_use]
    pub fn name_prefix(&self) -> String {
        format!("{}{}", self.name, KEY_SEPARATOR)
    }

    /// Derives the raw key for a logical key.
    #[must_use]
    pub fn raw_key(&self, key: &str) -> String {
        let mut raw = self.prefix();
        raw.push_str(key);
        raw
    }

    /// Strips this keyspace's prefix from a raw key.
    ///
    /// Returns `None` if the raw key belongs to another keyspace.
    #[must_use]
    pub fn logical_key<'a>(&self, raw: &'a str) -> Option<&'a str> {
        let rest = raw.strip_prefix(self.name.as_str())?;
        let rest = rest.strip_prefix(KEY_SEPARATOR)?;
        let rest = rest.strip_prefix(self.version.as_str())?;
        rest.strip_prefix(KEY_SEPARATOR)
    }

    /// Returns true if the raw key belongs to the same store name but a
    /// different version.
    #[must_use]
    pub fn is_other_version(&self, raw: &str) -> bool {
        raw.starts_with(&self.name_prefix()) && self.logical_key(raw).is_none()
    }

    /// Returns the directory holding this keyspace's records under `root`.
    #[must_use]
    pub fn directory(&self, root: &Path) -> PathBuf {
        root.join(&self.name).join(&self.version)
    }

    /// Returns the record file for a logical key under `root`.
    ///
    /// Keys longer than [`MAX_NAMED_KEY_BYTES`] are named by their SHA-256
    /// digest with the [`DIGEST_RECORD_EXTENSION`]; such records must carry
    /// their key inside the file.
    #[must_use]
    pub fn file_path(&self, root: &Path, key: &str) -> PathBuf {
        let file_name = if is_digest_named(key) {
            format!(
                "{}.{}",
                hex::encode(Sha256::digest(key.as_bytes())),
                DIGEST_RECORD_EXTENSION
            )
        } else {
            format!("{}.{}", hex::encode(key.as_bytes()), RECORD_EXTENSION)
        };
        self.directory(root).join(file_name)
    }
}

impl fmt::Display for KeySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Decodes the logical key from a record file name.
///
/// Returns `None` for files that were not written by the file backend.
#[must_use]
pub fn key_from_file_name(file_name: &str) -> Option<String> {
    let stem = file_name.strip_suffix(RECORD_EXTENSION)?.strip_suffix('.')?;
    let bytes = hex::decode(stem).ok()?;
    String::from_utf8(bytes).ok()
}

/// Returns true if records for `key` are stored under a digest file name.
#[must_use]
pub fn is_digest_named(key: &str) -> bool {
    key.len() > MAX_NAMED_KEY_BYTES
}

/// Returns true for digest-named record files, whose key is read from the
/// record itself.
#[must_use]
pub fn is_digest_file_name(file_name: &str) -> bool {
    file_name
        .strip_suffix(DIGEST_RECORD_EXTENSION)
        .and_then(|rest| rest.strip_suffix('.'))
        .is_some_and(|stem| stem.len() == 64 && hex::decode(stem).is_ok())
}

fn validate_part(what: &str, value: &str) -> StoreResult<()> {
    if value.is_empty() {
        return Err(StoreError::InvalidKeySpace(format!("{what} must not be empty")));
    }
    if value == "." || value == ".." {
        return Err(StoreError::InvalidKeySpace(format!(
            "{what} '{value}' is reserved"
        )));
    }
    if let Some(c) = value.chars().find(|c| FORBIDDEN.contains(c)) {
        return Err(StoreError::InvalidKeySpace(format!(
            "{what} '{value}' contains forbidden character {c:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_key_layout() {
        let ks = KeySpace::new("cache", "2").unwrap();
        assert_eq!(ks.prefix(), "cache#2#");
        assert_eq!(ks.raw_key("users/1"), "cache#2#users/1");
        assert_eq!(ks.logical_key("cache#2#users/1"), Some("users/1"));
    }

    #[test]
    fn logical_key_rejects_foreign_keyspace() {
        let ks = KeySpace::new("cache", "2").unwrap();
        assert_eq!(ks.logical_key("cache#20#x"), None);
        assert_eq!(ks.logical_key("cachex#2#x"), None);
        assert_eq!(ks.logical_key("other#2#x"), None);
    }

    #[test]
    fn separator_in_version_rejected() {
        let err = KeySpace::new("cache", "1#2").unwrap_err();
        assert!(matches!(err, StoreError::InvalidKeySpace(_)));
        assert!(KeySpace::new("a/b", "1").is_err());
        assert!(KeySpace::new("", "1").is_err());
        assert!(KeySpace::new("cache", "").is_err());
        assert!(KeySpace::new("..", "1").is_err());
    }

    #[test]
    fn other_version_detection() {
        let ks = KeySpace::new("cache", "2").unwrap();
        assert!(ks.is_other_version("cache#1#k"));
        assert!(!ks.is_other_version("cache#2#k"));
        assert!(!ks.is_other_version("cached#1#k"));
    }

    #[test]
    fn file_names_round_trip() {
        let ks = KeySpace::new("files", "0").unwrap();
        let path = ks.file_path(Path::new("/data"), "a/b c");
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(key_from_file_name(name).as_deref(), Some("a/b c"));
        assert!(path.starts_with("/data/files/0"));
        assert_eq!(key_from_file_name("notes.txt"), None);
        assert_eq!(key_from_file_name(&format!("{}.hrec", "ab".repeat(32))), None);
    }

    #[test]
    fn long_keys_get_bounded_digest_names() {
        let ks = KeySpace::new("cache", "0").unwrap();
        let long = "k".repeat(MAX_NAMED_KEY_BYTES + 1);
        let path = ks.file_path(Path::new("/root"), &long);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.len() <= 255);
        assert!(is_digest_file_name(name));
        assert_eq!(key_from_file_name(name), None);
        assert_ne!(ks.file_path(Path::new("/root"), &format!("{long}x")), path);

        let short = "k".repeat(MAX_NAMED_KEY_BYTES);
        let name = ks.file_path(Path::new("/root"), &short);
        let name = name.file_name().unwrap().to_str().unwrap();
        assert!(name.len() <= 255);
        assert_eq!(key_from_file_name(name), Some(short));
    }
}
