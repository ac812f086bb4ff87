use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::{AuthMode, Config, StoreBackend};

const SERVICE_NAME: &str = "alumni";

/// Credential file name in the per-origin data directory
const CREDENTIAL_FILE: &str = "credentials.json";

/// Record names understood by [`CredentialStore::exists`].
pub const ACCESS_TOKEN: &str = "access-token";
pub const REFRESH_TOKEN: &str = "refresh-token";
pub const USER_ID: &str = "user-id";
pub const SESSION_COOKIES: &str = "session-cookies";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Credential file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt credential record: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Credential store lock poisoned")]
    Poisoned,
}

/// Everything persisted for one session, written and cleared as a unit.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Non-sensitive marker used for display and the account view.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    /// Server session cookies (session-cookie mode only).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cookies: BTreeMap<String, String>,
    pub issued_at: DateTime<Utc>,
}

impl Credential {
    pub fn empty() -> Self {
        Self {
            access_token: None,
            refresh_token: None,
            user_id: None,
            cookies: BTreeMap::new(),
            issued_at: Utc::now(),
        }
    }

    pub fn bearer(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            refresh_token,
            ..Self::empty()
        }
    }

    pub fn with_user_id(mut self, user_id: Option<i64>) -> Self {
        self.user_id = user_id;
        self
    }

    /// Whether the named record is present.
    pub fn has(&self, name: &str) -> bool {
        match name {
            ACCESS_TOKEN => self.access_token.is_some(),
            REFRESH_TOKEN => self.refresh_token.is_some(),
            USER_ID => self.user_id.is_some(),
            SESSION_COOKIES => !self.cookies.is_empty(),
            _ => false,
        }
    }

    /// Whether this credential can authenticate requests in `mode`. Purely
    /// local: the server may still reject it.
    pub fn is_usable(&self, mode: AuthMode) -> bool {
        match mode {
            AuthMode::Bearer => self.access_token.is_some(),
            AuthMode::Cookie => self.user_id.is_some(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.access_token.is_none()
            && self.refresh_token.is_none()
            && self.user_id.is_none()
            && self.cookies.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Credential")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("user_id", &self.user_id)
            .field("cookies", &self.cookies.keys().collect::<Vec<_>>())
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Durable storage for the current session's credential.
///
/// Implementations are synchronous and idempotent, and `clear` followed by
/// `get` always yields `None`.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Result<Option<Credential>, StoreError>;

    fn set(&self, credential: &Credential) -> Result<(), StoreError>;

    fn clear(&self) -> Result<(), StoreError>;

    fn exists(&self, name: &str) -> bool {
        matches!(self.get(), Ok(Some(credential)) if credential.has(name))
    }

    /// Read-modify-write. Returning `None` or a blank credential clears the
    /// store.
    fn update(
        &self,
        apply: &dyn Fn(Option<Credential>) -> Option<Credential>,
    ) -> Result<(), StoreError> {
        match apply(self.get()?) {
            Some(credential) if !credential.is_blank() => self.set(&credential),
            _ => self.clear(),
        }
    }
}

impl StoreBackend {
    /// Open the configured store for the config's API origin.
    pub fn open(self, config: &Config) -> anyhow::Result<Arc<dyn CredentialStore>> {
        let store: Arc<dyn CredentialStore> = match self {
            StoreBackend::Keyring => Arc::new(KeyringStore::new(&config.origin()?)),
            StoreBackend::File => Arc::new(FileStore::new(config.data_dir()?)),
            StoreBackend::Memory => Arc::new(MemoryStore::default()),
        };
        debug!(backend = ?self, "Credential store opened");
        Ok(store)
    }
}

/// OS keychain, one entry per API origin.
pub struct KeyringStore {
    origin: String,
}

impl KeyringStore {
    pub fn new(origin: &str) -> Self {
        Self {
            origin: origin.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry, StoreError> {
        Ok(Entry::new(SERVICE_NAME, &self.origin)?)
    }
}

impl CredentialStore for KeyringStore {
    fn get(&self) -> Result<Option<Credential>, StoreError> {
        match self.entry()?.get_password() {
            Ok(record) => Ok(Some(serde_json::from_str(&record)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, credential: &Credential) -> Result<(), StoreError> {
        let record = serde_json::to_string(credential)?;
        self.entry()?.set_password(&record)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// JSON file in the per-origin data directory. Writes go through a
/// temporary file and a rename so a reader never sees half a record.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(CREDENTIAL_FILE),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        file.write_all(contents)?;
        file.sync_all()
    }
}

impl CredentialStore for FileStore {
    fn get(&self) -> Result<Option<Credential>, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, credential: &Credential) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_vec_pretty(credential)?;
        let tmp = self.path.with_extension("json.tmp");
        Self::write_private(&tmp, &contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local store; nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Option<Credential>>,
}

impl MemoryStore {
    pub fn with(credential: Credential) -> Self {
        Self {
            inner: Mutex::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self) -> Result<Option<Credential>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.clone())
    }

    fn set(&self, credential: &Credential) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        *inner = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        *inner = None;
        Ok(())
    }

    fn update(
        &self,
        apply: &dyn Fn(Option<Credential>) -> Option<Credential>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        *inner = apply(inner.take()).filter(|c| !c.is_blank());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Credential {
        Credential::bearer("T1", Some("R1".to_string())).with_user_id(Some(7))
    }

    fn check_contract(store: &dyn CredentialStore) {
        assert!(store.get().unwrap().is_none());
        store.clear().unwrap(); // clearing an empty store is fine

        store.set(&sample()).unwrap();
        assert_eq!(store.get().unwrap(), Some(sample()));
        assert!(store.exists(ACCESS_TOKEN));
        assert!(store.exists(REFRESH_TOKEN));
        assert!(store.exists(USER_ID));
        assert!(!store.exists(SESSION_COOKIES));

        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.get().unwrap().is_none());
        assert!(!store.exists(ACCESS_TOKEN));
    }

    #[test]
    fn test_memory_store_contract() {
        check_contract(&MemoryStore::default());
    }

    #[test]
    fn test_file_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        check_contract(&FileStore::new(dir.path().join("origin")));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        FileStore::new(dir.path()).set(&sample()).unwrap();

        let reopened = FileStore::new(dir.path());
        assert_eq!(reopened.get().unwrap(), Some(sample()));
        assert!(!reopened.path().with_extension("json.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.set(&sample()).unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_file_store_rejects_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        std::fs::write(store.path(), "not json").unwrap();
        assert!(matches!(store.get(), Err(StoreError::Encoding(_))));
    }

    #[test]
    fn test_update_clears_blank_records() {
        let store = MemoryStore::with(sample());
        store
            .update(&|current| {
                current.map(|mut c| {
                    c.access_token = None;
                    c.refresh_token = None;
                    c.user_id = None;
                    c
                })
            })
            .unwrap();
        assert!(store.get().unwrap().is_none());
    }

    #[test]
    fn test_is_usable_per_mode() {
        let bearer = Credential::bearer("T1", None);
        assert!(bearer.is_usable(AuthMode::Bearer));
        assert!(!bearer.is_usable(AuthMode::Cookie));

        let marker = Credential::empty().with_user_id(Some(3));
        assert!(marker.is_usable(AuthMode::Cookie));
        assert!(!marker.is_usable(AuthMode::Bearer));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let rendered = format!("{:?}", sample());
        assert!(!rendered.contains("T1"));
        assert!(!rendered.contains("R1"));
        assert!(rendered.contains("<redacted>"));
    }
}
