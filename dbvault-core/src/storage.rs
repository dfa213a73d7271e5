//! Whole-file JSON persistence for the vault documents.
//!
//! Every write goes to a temporary sibling in the same directory and is then
//! renamed over the target, so readers see either the old or the new document.

use crate::{DbVaultError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::Write;
use std::path::Path;

/// Writes `bytes` to `path` via a temporary sibling and an atomic rename.
///
/// With `private` set the file is created with mode `0600` on unix.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8], private: bool) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let context = || format!("writing {}", path.display());

    std::fs::create_dir_all(parent).map_err(|e| DbVaultError::io(context(), e))?;

    let mut temp =
        tempfile::NamedTempFile::new_in(parent).map_err(|e| DbVaultError::io(context(), e))?;

    #[cfg(unix)]
    if private {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))
            .map_err(|e| DbVaultError::io(context(), e))?;
    }
    #[cfg(not(unix))]
    let _ = private;

    temp.write_all(bytes)
        .map_err(|e| DbVaultError::io(context(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| DbVaultError::io(context(), e))?;
    temp.persist(path)
        .map_err(|e| DbVaultError::io(context(), e.error))?;

    Ok(())
}

/// Reads and parses a JSON document, propagating every failure.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read(path)
        .map_err(|e| DbVaultError::io(format!("reading {}", path.display()), e))?;
    serde_json::from_slice(&data)
        .map_err(|e| DbVaultError::serialization(format!("parsing {}", path.display()), e))
}

/// Serializes `value` and writes it atomically.
pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value)
        .map_err(|e| DbVaultError::serialization(format!("encoding {}", path.display()), e))?;
    write_atomic(path, &data, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_write_json_replaces_whole_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");

        let mut first = BTreeMap::new();
        first.insert("a".to_string(), 1);
        first.insert("b".to_string(), 2);
        write_json(&path, &first).unwrap();

        let mut second = BTreeMap::new();
        second.insert("c".to_string(), 3);
        write_json(&path, &second).unwrap();

        let read: BTreeMap<String, i32> = read_json(&path).unwrap();
        assert_eq!(read, second);
        // no temporary siblings are left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_read_json_propagates_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, b"{not json").unwrap();

        let result: Result<BTreeMap<String, i32>> = read_json(&path);
        assert!(matches!(result, Err(DbVaultError::Serialization { .. })));

        let missing: Result<BTreeMap<String, i32>> = read_json(&dir.path().join("nope.json"));
        assert!(matches!(missing, Err(DbVaultError::Io { .. })));
    }
}
