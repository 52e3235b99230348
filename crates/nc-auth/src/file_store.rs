use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use tokio::fs;
use tokio::sync::RwLock;

use crate::errors::{AuthError, Result};
use crate::models::{AccountName, SessionRecord};
use crate::store::AccountStore;

/// File-backed account store.
///
/// One JSON file per account, written atomically. An advisory lock guards
/// against concurrent writers from other processes.
///
/// # Directory Structure
/// ```text
/// ~/.config/nimbus/accounts/
/// ├── lock
/// └── records/
///     ├── alice@cloud.example.com.json
///     └── bob@other.example.org.json
/// ```
#[derive(Debug)]
pub struct FileAccountStore {
    records_dir: PathBuf,
    lock_file: PathBuf,
    /// In-memory cache for recently accessed records
    cache: Arc<RwLock<HashMap<String, SessionRecord>>>,
}

impl FileAccountStore {
    pub async fn new(storage_dir: impl AsRef<Path>) -> Result<Self> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        let records_dir = storage_dir.join("records");
        let lock_file = storage_dir.join("lock");

        fs::create_dir_all(&storage_dir).await?;
        fs::create_dir_all(&records_dir).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(&storage_dir, perms.clone())?;
            std::fs::set_permissions(&records_dir, perms)?;
        }

        Ok(Self {
            records_dir,
            lock_file,
            cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Default storage directory for the current platform
    pub fn default_storage_dir() -> Result<PathBuf> {
        let project_dirs = directories::ProjectDirs::from("", "", "nimbus").ok_or_else(|| {
            AuthError::Persistence("could not determine config directory".to_string())
        })?;

        Ok(project_dirs.config_dir().join("accounts"))
    }

    fn record_path(&self, name: &str) -> PathBuf {
        // Account names may carry characters the filesystem dislikes
        let stem: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.records_dir.join(format!("{stem}.json"))
    }

    fn acquire_lock(&self) -> Result<std::fs::File> {
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_file)?;

        lock_file.try_lock_exclusive().map_err(|_| {
            AuthError::Persistence("account storage is locked by another process".to_string())
        })?;

        Ok(lock_file)
    }

    async fn load_from_disk(&self, name: &str) -> Result<Option<SessionRecord>> {
        let path = self.record_path(name);

        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        let record: SessionRecord = serde_json::from_str(&content)
            .map_err(|e| AuthError::Persistence(format!("invalid account record: {e}")))?;

        Ok(Some(record))
    }

    async fn save_to_disk(&self, record: &SessionRecord) -> Result<()> {
        let path = self.record_path(record.account_name.as_str());
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| AuthError::Persistence(format!("could not serialize record: {e}")))?;

        // Atomic write: temp file, sync, rename
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, json).await?;

        let file = std::fs::File::open(&temp_path)?;
        file.sync_all()?;

        fs::rename(&temp_path, &path).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&path, perms)?;
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl AccountStore for FileAccountStore {
    async fn get_account(&self, name: &str) -> Option<SessionRecord> {
        {
            let cache = self.cache.read().await;
            if let Some(record) = cache.get(name) {
                return Some(record.clone());
            }
        }

        match self.load_from_disk(name).await {
            Ok(Some(record)) => {
                self.cache
                    .write()
                    .await
                    .insert(name.to_string(), record.clone());
                Some(record)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::error!("failed to load account record for {}: {}", name, e);
                None
            }
        }
    }

    async fn put_account(&self, record: &SessionRecord) -> Result<()> {
        let _lock = self.acquire_lock()?;

        self.save_to_disk(record).await?;

        self.cache
            .write()
            .await
            .insert(record.account_name.as_str().to_string(), record.clone());

        Ok(())
    }

    async fn remove_account(&self, name: &str) -> Result<()> {
        let _lock = self.acquire_lock()?;

        let path = self.record_path(name);
        if path.exists() {
            fs::remove_file(&path).await?;
        }

        self.cache.write().await.remove(name);

        Ok(())
    }

    async fn list_accounts(&self) -> Vec<AccountName> {
        let mut accounts = Vec::new();

        let mut entries = match fs::read_dir(&self.records_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("failed to read records directory: {}", e);
                return accounts;
            }
        };

        // Names come from the records themselves since file stems are sanitized
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str::<SessionRecord>(&content) {
                    Ok(record) => accounts.push(record.account_name),
                    Err(e) => tracing::error!("skipping unreadable record {:?}: {}", path, e),
                },
                Err(e) => tracing::error!("skipping unreadable record {:?}: {}", path, e),
            }
        }

        accounts
    }
}
