use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::{AuthError, Result};

/// Semantic server version, compared against the supported floor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ServerVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for ServerVersion {
    type Err = AuthError;

    /// Accepts "10.5", "10.5.0" and longer build strings like "10.5.0.10";
    /// components beyond the third are ignored, missing ones default to zero
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().split('.');
        let mut component = |required: bool| -> Result<u32> {
            match parts.next() {
                Some(p) => p
                    .parse()
                    .map_err(|_| AuthError::Probe(format!("unrecognized server version {s:?}"))),
                None if required => Err(AuthError::Probe(format!(
                    "unrecognized server version {s:?}"
                ))),
                None => Ok(0),
            }
        };
        Ok(Self {
            major: component(true)?,
            minor: component(false)?,
            patch: component(false)?,
        })
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// How the server expects clients to authenticate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthenticationMethod {
    BasicHttpAuth,
    BearerToken,
    None,
}

impl AuthenticationMethod {
    /// Pick a method from WWW-Authenticate challenges; Bearer wins when both
    /// are advertised
    pub fn from_challenges<'a>(challenges: impl IntoIterator<Item = &'a str>) -> Self {
        let mut basic = false;
        let mut bearer = false;
        for challenge in challenges {
            let lower = challenge.to_ascii_lowercase();
            bearer |= lower.contains("bearer");
            basic |= lower.contains("basic");
        }
        if bearer {
            Self::BearerToken
        } else if basic {
            Self::BasicHttpAuth
        } else {
            Self::None
        }
    }
}

/// Capabilities discovered by a successful probe.
///
/// Immutable once produced; stale as soon as the user edits the URL field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Normalized base URL, no trailing slash
    pub base_url: String,
    pub is_secure_connection: bool,
    pub authentication_method: AuthenticationMethod,
    pub version: ServerVersion,
}

/// Unauthenticated status document served at the server root
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    #[serde(default = "default_installed")]
    pub installed: bool,
    pub version: String,
    #[serde(default)]
    pub versionstring: Option<String>,
    #[serde(default)]
    pub productname: Option<String>,
}

fn default_installed() -> bool {
    true
}

/// Basic-auth password; zeroized on drop and redacted in Debug output
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Password(String);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

/// Token pair produced by a completed authorization-code exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub user_id: String,
    /// Recorded for the session-refresh subsystem; the core takes no
    /// time-based decisions itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// What a successful authentication produced; persisted only through the
/// session commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthCredentials {
    Basic { username: String, password: Password },
    OAuth(OAuthTokens),
}

impl AuthCredentials {
    /// User the account name is derived from
    pub fn user_name(&self) -> &str {
        match self {
            Self::Basic { username, .. } => username,
            Self::OAuth(tokens) => &tokens.user_id,
        }
    }

    pub fn token_type(&self) -> TokenType {
        match self {
            Self::Basic { .. } => TokenType::Basic,
            Self::OAuth(_) => TokenType::Oauth,
        }
    }
}

/// Tag recorded next to the stored credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Basic,
    Oauth,
}

/// What credential UI the server's advertised method calls for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthUiPlan {
    /// Username and password fields visible, OAuth affordance hidden
    Basic,
    /// OAuth affordance visible, Basic fields hidden
    OAuth,
    /// Server advertises nothing usable; all credential UI hidden
    Unsupported,
}

impl AuthUiPlan {
    pub fn shows_basic_fields(&self) -> bool {
        matches!(self, Self::Basic)
    }

    pub fn shows_oauth_button(&self) -> bool {
        matches!(self, Self::OAuth)
    }

    pub fn token_type(&self) -> Option<TokenType> {
        match self {
            Self::Basic => Some(TokenType::Basic),
            Self::OAuth => Some(TokenType::Oauth),
            Self::Unsupported => None,
        }
    }
}

/// Authorization request built per login attempt from the server's endpoints
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub client_id: String,
    pub redirect_uri: Url,
    /// Random value echoed back in the callback
    pub state: String,
}

impl AuthorizationRequest {
    /// URL to hand to the external user agent
    pub fn build_url(&self) -> Url {
        let mut url = self.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.redirect_uri.as_str())
            .append_pair("state", &self.state);
        url
    }
}

/// Redirect callback delivered by the external user agent.
///
/// Must carry either an authorization code or an error; neither is a
/// malformed callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackPayload {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error_code: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackPayload {
    /// Parse the redirect URL the user agent was sent to
    pub fn from_redirect_url(redirect_url: &str) -> Result<Self> {
        let url = Url::parse(redirect_url)?;
        let mut payload = Self::default();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => payload.code = Some(value.into_owned()),
                "state" => payload.state = Some(value.into_owned()),
                "error" => payload.error_code = Some(value.into_owned()),
                "error_description" => payload.error_description = Some(value.into_owned()),
                _ => {}
            }
        }
        Ok(payload)
    }
}

/// Token endpoint wire response; fields are optional so that an incomplete
/// grant can be rejected instead of failing deserialization
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// OAuth2 error document
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Stable identifier used as the primary key of a persisted session record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountName(String);

impl AccountName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AccountName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Final persisted identity; at most one record per account name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub account_name: AccountName,
    pub base_url: String,
    pub token_type: TokenType,
    pub credentials: AuthCredentials,
}

/// Why the user is in the login flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginAction {
    #[default]
    Create,
    UpdateToken,
    UpdateExpiredToken,
}

/// Serializable snapshot for host-driven suspend and resume
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorState {
    pub login_action: LoginAction,
    pub auth_token_type: Option<TokenType>,
    pub server_base_url: Option<String>,
}
