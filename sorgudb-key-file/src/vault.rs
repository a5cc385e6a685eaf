//! Wrapped DEK storage as one JSON file per key id.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sorgudb::context::{FieldRef, KeyId};
use sorgudb::error::KeyProviderError;
use sorgudb::key_vault::{KeyVault, WrappedKey};

use crate::write_new_file;

const DEK_DIR: &str = "deks";
const DEK_SUFFIX: &str = ".json";

/// File-based key vault.
///
/// Each wrapped DEK lives in `deks/<collection>.<field>.v<N>.json` under the
/// key directory. Files are created exclusively, so key ids are write-once
/// even across processes.
#[derive(Debug)]
pub struct FileKeyVault {
    dir: PathBuf,
}

impl FileKeyVault {
    /// Opens the vault inside `key_dir`, creating the `deks` directory if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created.
    pub fn new(key_dir: impl AsRef<Path>) -> Result<Self, KeyProviderError> {
        let dir = key_dir.as_ref().join(DEK_DIR);
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, key_id: &KeyId) -> Result<PathBuf, KeyProviderError> {
        let field = key_id.field();
        let safe = is_safe_segment(field.collection()) && is_safe_segment(field.field());
        if !safe {
            return Err(KeyProviderError::Storage(format!("unsupported key id {key_id}")));
        }
        Ok(self.dir.join(format!("{key_id}{DEK_SUFFIX}")))
    }
}

impl KeyVault for FileKeyVault {
    fn get(&self, key_id: &KeyId) -> Result<Option<WrappedKey>, KeyProviderError> {
        let json = match fs::read_to_string(self.path(key_id)?) {
            Ok(json) => json,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let key: WrappedKey = serde_json::from_str(&json)
            .map_err(|err| KeyProviderError::Storage(format!("{key_id} is corrupt: {err}")))?;
        if &key.key_id != key_id {
            return Err(KeyProviderError::Storage(format!("{key_id} holds key {}", key.key_id)));
        }
        Ok(Some(key))
    }

    fn put(&self, key: WrappedKey) -> Result<(), KeyProviderError> {
        let path = self.path(&key.key_id)?;
        let json = serde_json::to_vec_pretty(&key).map_err(|err| {
            KeyProviderError::Storage(format!("cannot encode {}: {err}", key.key_id))
        })?;
        match write_new_file(&path, &json) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                Err(KeyProviderError::Storage(format!("key {} already exists", key.key_id)))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn list_active(&self, field: &FieldRef) -> Result<Vec<KeyId>, KeyProviderError> {
        let prefix = format!("{field}.v");
        let mut key_ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let stem = name.to_str().and_then(|name| name.strip_suffix(DEK_SUFFIX));
            let Some(stem) = stem else {
                continue;
            };
            if !stem.starts_with(&prefix) {
                continue;
            }
            if let Ok(key_id) = stem.parse::<KeyId>() {
                if key_id.field() == field {
                    key_ids.push(key_id);
                }
            }
        }
        key_ids.sort_by_key(KeyId::version);
        Ok(key_ids)
    }
}

fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrapped(field: &str, version: u32) -> WrappedKey {
        WrappedKey {
            key_id: KeyId::new(FieldRef::new("accounts", field), version),
            wrapped_by: "kek_v1".to_string(),
            wrapped_dek: vec![1, 2, 3],
        }
    }

    #[test]
    fn test_put_get_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let vault = FileKeyVault::new(dir.path()).unwrap();
        let key = wrapped("ssn", 1);
        vault.put(key.clone()).unwrap();

        let reopened = FileKeyVault::new(dir.path()).unwrap();
        assert_eq!(reopened.get(&key.key_id).unwrap(), Some(key));
    }

    #[test]
    fn test_get_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let vault = FileKeyVault::new(dir.path()).unwrap();
        assert!(vault.get(&wrapped("ssn", 1).key_id).unwrap().is_none());
    }

    #[test]
    fn test_put_is_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let vault = FileKeyVault::new(dir.path()).unwrap();
        vault.put(wrapped("ssn", 1)).unwrap();
        assert!(matches!(vault.put(wrapped("ssn", 1)), Err(KeyProviderError::Storage(_))));
    }

    #[test]
    fn test_list_active_is_sorted_and_scoped() {
        let dir = tempfile::tempdir().unwrap();
        let vault = FileKeyVault::new(dir.path()).unwrap();
        for version in [2, 10, 1] {
            vault.put(wrapped("ssn", version)).unwrap();
        }
        vault.put(wrapped("ssnHash", 1)).unwrap();
        vault.put(wrapped("balance", 1)).unwrap();

        let ssn = FieldRef::new("accounts", "ssn");
        let active = vault.list_active(&ssn).unwrap();
        let versions: Vec<u32> = active.iter().map(KeyId::version).collect();
        assert_eq!(versions, [1, 2, 10]);
    }

    #[test]
    fn test_unsafe_key_id_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let vault = FileKeyVault::new(dir.path()).unwrap();
        let key = WrappedKey {
            key_id: KeyId::new(FieldRef::new("..", "ssn"), 1),
            wrapped_by: "kek_v1".to_string(),
            wrapped_dek: vec![],
        };
        assert!(matches!(vault.put(key), Err(KeyProviderError::Storage(_))));
    }

    #[test]
    fn test_corrupt_file_reported() {
        let dir = tempfile::tempdir().unwrap();
        let vault = FileKeyVault::new(dir.path()).unwrap();
        let key_id = wrapped("ssn", 1).key_id;
        let path = dir.path().join("deks").join("accounts.ssn.v1.json");
        fs::write(path, b"{").unwrap();
        assert!(matches!(vault.get(&key_id), Err(KeyProviderError::Storage(_))));
    }
}
