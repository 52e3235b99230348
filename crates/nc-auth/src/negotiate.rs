use crate::errors::{AuthError, Result};
use crate::models::{AuthUiPlan, AuthenticationMethod, ServerInfo, TokenType};
use crate::store::AccountStore;

/// Decide what credential UI a probed server calls for
pub fn negotiate(info: &ServerInfo) -> AuthUiPlan {
    match info.authentication_method {
        AuthenticationMethod::BasicHttpAuth => AuthUiPlan::Basic,
        AuthenticationMethod::BearerToken => AuthUiPlan::OAuth,
        AuthenticationMethod::None => AuthUiPlan::Unsupported,
    }
}

/// Whether an already-stored account authenticated with OAuth2.
///
/// Used when re-authenticating an expired session; reads the stored record
/// instead of probing the server again.
pub async fn supports_oauth2(store: &dyn AccountStore, account_name: &str) -> Result<bool> {
    let record = store.get_account(account_name).await.ok_or_else(|| {
        AuthError::Persistence(format!("no stored account named {account_name}"))
    })?;
    Ok(record.token_type == TokenType::Oauth)
}
