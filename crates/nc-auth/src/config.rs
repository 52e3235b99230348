use std::time::Duration;
use url::Url;

use crate::errors::Result;
use crate::models::ServerVersion;

/// Server endpoint paths, relative to the normalized base URL
pub mod endpoints {
    /// Unauthenticated capability/status document
    pub const STATUS_PATH: &str = "status.php";
    /// WebDAV root, used for auth-method discovery and credential checks
    pub const WEBDAV_FILES_PATH: &str = "remote.php/dav/files";
    /// OAuth2 authorization endpoint
    pub const OAUTH2_AUTHORIZE_PATH: &str = "index.php/apps/oauth2/authorize";
    /// OAuth2 token endpoint
    pub const OAUTH2_TOKEN_PATH: &str = "index.php/apps/oauth2/api/v1/token";
}

/// Oldest server version this client will log in to
pub const MINIMUM_SERVER_VERSION: ServerVersion = ServerVersion::new(9, 0, 0);

pub(crate) const DEFAULT_USER_AGENT: &str = "nc-auth";

/// Join a relative endpoint path onto a normalized base URL
pub(crate) fn join_url(base: &str, path: &str) -> Result<Url> {
    Url::parse(&format!("{}/{}", base.trim_end_matches('/'), path)).map_err(Into::into)
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            request: Duration::from_secs(30),
        }
    }
}

/// Build-time branding flags, injected at construction instead of read from
/// ambient global state
#[derive(Debug, Clone, Default)]
pub struct BrandingOptions {
    /// Relaxes capture protections in the hosting UI; the core only carries it
    pub developer_mode: bool,
    /// When set, this is the only server the orchestrator will probe
    pub fixed_server_url: Option<String>,
}

/// Configuration for the authentication core
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// OAuth2 client ID registered with the server
    pub client_id: String,

    /// OAuth2 client secret, sent with client-secret-basic on token exchange
    pub client_secret: String,

    /// Redirect URI the authorization server sends the callback to
    pub redirect_uri: Url,

    /// HTTP client timeouts
    pub http_timeouts: HttpTimeouts,

    /// Custom user agent (optional)
    pub user_agent: Option<String>,

    /// Servers older than this are rejected at probe time
    pub minimum_server_version: ServerVersion,

    /// Branding flags
    pub branding: BrandingOptions,
}

impl AuthConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: Url,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri,
            http_timeouts: HttpTimeouts::default(),
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
            minimum_server_version: MINIMUM_SERVER_VERSION,
            branding: BrandingOptions::default(),
        }
    }
}
