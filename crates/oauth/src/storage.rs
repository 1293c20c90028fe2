use std::{
    collections::{BTreeMap, HashMap},
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::types::Credential;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("credential store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("credential store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("no data directory available for the credential store")]
    NoDataDir,
}

/// Secret storage for credentials, keyed by account name.
///
/// The exchanger and the API caller never touch a store; the host decides
/// when to load and persist.
pub trait CredentialStore: Send + Sync {
    fn load(&self, account: &str) -> Result<Option<Credential>, StoreError>;
    fn save(&self, account: &str, credential: &Credential) -> Result<(), StoreError>;
    /// Returns whether a credential was removed.
    fn delete(&self, account: &str) -> Result<bool, StoreError>;
    fn list(&self) -> Result<Vec<String>, StoreError>;
}

/// Process-local store; contents vanish with the process.
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<String, Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self, account: &str) -> Result<Option<Credential>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        Ok(entries.get(account).cloned())
    }

    fn save(&self, account: &str, credential: &Credential) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.insert(account.to_string(), credential.clone());
        Ok(())
    }

    fn delete(&self, account: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        Ok(entries.remove(account).is_some())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let mut accounts: Vec<String> = entries.keys().cloned().collect();
        accounts.sort();
        Ok(accounts)
    }
}

/// JSON file mapping account name to credential, readable by the owner only.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/drivelink/credentials.json`.
    pub fn default_path() -> Result<PathBuf, StoreError> {
        directories::ProjectDirs::from("org", "drivelink", "drivelink")
            .map(|dirs| dirs.data_dir().join("credentials.json"))
            .ok_or(StoreError::NoDataDir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, Credential>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&self, entries: &BTreeMap<String, Credential>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(entries)?;
        {
            let mut file = open_private(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), accounts = entries.len(), "credential store written");
        Ok(())
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

impl CredentialStore for FileCredentialStore {
    fn load(&self, account: &str) -> Result<Option<Credential>, StoreError> {
        Ok(self.read_all()?.remove(account))
    }

    fn save(&self, account: &str, credential: &Credential) -> Result<(), StoreError> {
        let mut entries = self.read_all()?;
        entries.insert(account.to_string(), credential.clone());
        self.write_all(&entries)
    }

    fn delete(&self, account: &str) -> Result<bool, StoreError> {
        let mut entries = self.read_all()?;
        if entries.remove(account).is_none() {
            return Ok(false);
        }
        self.write_all(&entries)?;
        Ok(true)
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.read_all()?.into_keys().collect())
    }
}
