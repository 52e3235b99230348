use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::errors::{AuthError, Result};
use crate::models::{AccountName, SessionRecord};

/// Trait for the secure account storage collaborator
#[async_trait::async_trait]
pub trait AccountStore: Send + Sync {
    /// Load a record by account name
    async fn get_account(&self, name: &str) -> Option<SessionRecord>;

    /// Insert or replace the record for its account name
    async fn put_account(&self, record: &SessionRecord) -> Result<()>;

    /// Remove a record by account name
    async fn remove_account(&self, name: &str) -> Result<()>;

    /// List all stored account names
    async fn list_accounts(&self) -> Vec<AccountName>;
}

/// In-memory account store for testing and simple use cases
#[derive(Debug, Clone, Default)]
pub struct MemoryAccountStore {
    records: Arc<RwLock<HashMap<String, SessionRecord>>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl AccountStore for MemoryAccountStore {
    async fn get_account(&self, name: &str) -> Option<SessionRecord> {
        self.records.read().ok()?.get(name).cloned()
    }

    async fn put_account(&self, record: &SessionRecord) -> Result<()> {
        self.records
            .write()
            .map_err(|_| AuthError::Persistence("lock poisoned".to_string()))?
            .insert(record.account_name.as_str().to_string(), record.clone());
        Ok(())
    }

    async fn remove_account(&self, name: &str) -> Result<()> {
        self.records
            .write()
            .map_err(|_| AuthError::Persistence("lock poisoned".to_string()))?
            .remove(name);
        Ok(())
    }

    async fn list_accounts(&self) -> Vec<AccountName> {
        self.records
            .read()
            .ok()
            .map(|records| records.values().map(|r| r.account_name.clone()).collect())
            .unwrap_or_default()
    }
}
