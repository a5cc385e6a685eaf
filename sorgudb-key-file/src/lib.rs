//! File-based key provider and key vault for `SorguDB`.
//!
//! This provider stores keys in the filesystem and is suitable for
//! development and testing environments.

#![warn(clippy::pedantic, clippy::nursery)]

mod vault;

pub use vault::FileKeyVault;

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretVec};
use sorgudb::error::KeyProviderError;
use sorgudb::key_provider::{open_dek, seal_dek, KeyProvider};
use tracing::info;
use zeroize::Zeroizing;

/// KEK size in bytes.
pub const KEK_SIZE: usize = 32;

const CURRENT_FILE: &str = "current";
const KEK_PREFIX: &str = "kek_v";
const KEK_SUFFIX: &str = ".key";

/// File-based key provider for development and testing.
///
/// Keys are stored in the filesystem with the following structure:
/// ```text
/// keys/
/// ├── kek_v1.key      (32 bytes, 0600 permissions)
/// ├── kek_v2.key      (32 bytes, 0600 permissions)
/// ├── current         (id of the active KEK, e.g. "kek_v2")
/// └── deks/           (wrapped DEKs, see FileKeyVault)
/// ```
pub struct FileKeyProvider {
    key_dir: PathBuf,
    creation: Mutex<()>,
}

impl FileKeyProvider {
    /// Opens an existing key directory.
    ///
    /// # Arguments
    ///
    /// * `key_dir` - Directory containing key files
    ///
    /// # Errors
    ///
    /// Returns error if the directory doesn't exist.
    pub fn new(key_dir: impl Into<PathBuf>) -> Result<Self, KeyProviderError> {
        let key_dir = key_dir.into();
        if !key_dir.is_dir() {
            return Err(KeyProviderError::CreationFailed(format!(
                "Key directory does not exist: {}",
                key_dir.display()
            )));
        }
        Ok(Self {
            key_dir,
            creation: Mutex::new(()),
        })
    }

    /// Initializes a new key directory with a fresh KEK.
    ///
    /// # Errors
    ///
    /// Returns error if the directory is already initialized, or if
    /// directory creation or key generation fails.
    pub fn init(key_dir: impl Into<PathBuf>) -> Result<Self, KeyProviderError> {
        let key_dir = key_dir.into();
        fs::create_dir_all(&key_dir)?;
        if key_dir.join(CURRENT_FILE).exists() {
            return Err(KeyProviderError::CreationFailed(format!(
                "Key directory already initialized: {}",
                key_dir.display()
            )));
        }

        let provider = Self::new(key_dir)?;
        provider.create_kek()?;
        Ok(provider)
    }

    /// Returns the key directory.
    #[must_use]
    pub fn key_dir(&self) -> &Path {
        &self.key_dir
    }

    /// Lists KEK ids in ascending version order.
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be read.
    pub fn list_keks(&self) -> Result<Vec<String>, KeyProviderError> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.key_dir)? {
            let name = entry?.file_name();
            let version = name
                .to_str()
                .and_then(|name| name.strip_suffix(KEK_SUFFIX))
                .and_then(kek_version);
            if let Some(version) = version {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions
            .into_iter()
            .map(|version| format!("{KEK_PREFIX}{version}"))
            .collect())
    }

    fn kek_path(&self, kek_id: &str) -> Result<PathBuf, KeyProviderError> {
        if kek_version(kek_id).is_none() {
            return Err(KeyProviderError::KekNotFound(kek_id.to_string()));
        }
        Ok(self.key_dir.join(format!("{kek_id}{KEK_SUFFIX}")))
    }

    fn load_kek(&self, kek_id: &str) -> Result<SecretVec<u8>, KeyProviderError> {
        let kek = match fs::read(self.kek_path(kek_id)?) {
            Ok(bytes) => SecretVec::new(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(KeyProviderError::KekNotFound(kek_id.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        if kek.expose_secret().len() != KEK_SIZE {
            return Err(KeyProviderError::Storage(format!("{kek_id} has an invalid length")));
        }
        Ok(kek)
    }
}

impl KeyProvider for FileKeyProvider {
    fn create_kek(&self) -> Result<String, KeyProviderError> {
        let _creation = self.creation.lock();

        let next = self
            .list_keks()?
            .last()
            .and_then(|kek_id| kek_version(kek_id))
            .map_or(1, |version| version + 1);
        let kek_id = format!("{KEK_PREFIX}{next}");

        let mut kek = Zeroizing::new([0u8; KEK_SIZE]);
        OsRng.fill_bytes(kek.as_mut());
        let path = self.kek_path(&kek_id)?;
        write_new_file(&path, kek.as_ref()).map_err(|err| {
            KeyProviderError::CreationFailed(format!("cannot write {kek_id}: {err}"))
        })?;

        let staged = self.key_dir.join(format!("{CURRENT_FILE}.tmp"));
        fs::write(&staged, kek_id.as_bytes())?;
        fs::rename(&staged, self.key_dir.join(CURRENT_FILE))?;

        info!(kek_id = %kek_id, "created key encryption key");
        Ok(kek_id)
    }

    fn current_kek_id(&self) -> Result<String, KeyProviderError> {
        match fs::read_to_string(self.key_dir.join(CURRENT_FILE)) {
            Ok(kek_id) => {
                let kek_id = kek_id.trim();
                if kek_version(kek_id).is_none() {
                    let reason = "current KEK pointer is corrupt".to_string();
                    return Err(KeyProviderError::Storage(reason));
                }
                Ok(kek_id.to_string())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(KeyProviderError::NoActiveKek),
            Err(err) => Err(err.into()),
        }
    }

    fn wrap_dek(&self, kek_id: &str, dek: &[u8]) -> Result<Vec<u8>, KeyProviderError> {
        let kek = self.load_kek(kek_id)?;
        seal_dek(kek.expose_secret(), kek_id, dek)
    }

    fn unwrap_dek(
        &self,
        kek_id: &str,
        wrapped_dek: &[u8],
    ) -> Result<SecretVec<u8>, KeyProviderError> {
        let kek = self.load_kek(kek_id)?;
        open_dek(kek.expose_secret(), kek_id, wrapped_dek)
    }
}

/// Parses `kek_v<N>` with `N >= 1`.
fn kek_version(kek_id: &str) -> Option<u32> {
    let digits = kek_id.strip_prefix(KEK_PREFIX)?;
    let numeric = digits.bytes().all(|b| b.is_ascii_digit());
    if digits.is_empty() || !numeric {
        return None;
    }
    digits.parse().ok().filter(|version| *version > 0)
}

/// Creates `path` exclusively (owner-only on Unix) and writes `contents`.
pub(crate) fn write_new_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}
