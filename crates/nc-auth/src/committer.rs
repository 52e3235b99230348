use std::sync::Arc;

use tracing::{debug, instrument};
use url::Url;

use crate::errors::{AuthError, Result};
use crate::models::{AccountName, AuthCredentials, LoginAction, ServerInfo, SessionRecord};
use crate::store::AccountStore;

/// Normalizes a successful authentication, from either method, into the
/// persisted session record
#[derive(Clone)]
pub struct SessionCommitter {
    store: Arc<dyn AccountStore>,
}

impl SessionCommitter {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    /// Stable account identifier: `user@host`, plus the port when it is not
    /// the scheme default and the path for subdirectory installs
    pub fn derive_account_name(user: &str, base_url: &str) -> Result<AccountName> {
        let url = Url::parse(base_url)?;
        let host = url
            .host_str()
            .ok_or_else(|| AuthError::Persistence(format!("server URL {base_url} has no host")))?;

        let mut name = format!("{user}@{host}");
        if let Some(port) = url.port() {
            name.push_str(&format!(":{port}"));
        }
        let path = url.path().trim_end_matches('/');
        if !path.is_empty() {
            name.push_str(path);
        }

        Ok(AccountName::new(name))
    }

    /// Persist the session. The record for the derived name is replaced in
    /// place when it exists (token rotation on re-authentication) and created
    /// otherwise; retrying with identical inputs leaves a single record.
    #[instrument(skip(self, credentials, info))]
    pub async fn commit(
        &self,
        credentials: AuthCredentials,
        info: &ServerInfo,
        login_action: LoginAction,
    ) -> Result<AccountName> {
        let name = Self::derive_account_name(credentials.user_name(), &info.base_url)?;

        match self.store.get_account(name.as_str()).await {
            Some(_) => debug!(%name, ?login_action, "replacing stored account record"),
            None => debug!(%name, ?login_action, "creating account record"),
        }

        let record = SessionRecord {
            account_name: name.clone(),
            base_url: info.base_url.clone(),
            token_type: credentials.token_type(),
            credentials,
        };
        self.store.put_account(&record).await?;

        Ok(name)
    }
}
