use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use crate::config::{AuthConfig, DEFAULT_USER_AGENT, endpoints, join_url};
use crate::errors::{AuthError, Result};
use crate::models::{AuthenticationMethod, ServerInfo, ServerVersion, StatusResponse};

/// Discovers reachability, TLS trust, server version and supported
/// authentication methods for a candidate server URL
#[derive(Debug, Clone)]
pub struct ServerProbe {
    http: Client,
    minimum_version: ServerVersion,
}

impl ServerProbe {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        Self::with_trust(config, false)
    }

    /// Probe that accepts a certificate the user has explicitly chosen to
    /// trust; used to retry after a `CertificateTrust` failure
    pub fn with_trusted_certificate(config: &AuthConfig) -> Result<Self> {
        Self::with_trust(config, true)
    }

    fn with_trust(config: &AuthConfig, trust_server_certificate: bool) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(config.http_timeouts.connect)
            .timeout(config.http_timeouts.request)
            .user_agent(config.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT));

        if trust_server_certificate {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder
            .build()
            .map_err(|e| AuthError::Internal(format!("could not build HTTP client: {e}")))?;

        Ok(Self {
            http,
            minimum_version: config.minimum_server_version,
        })
    }

    /// Normalize what the user typed into a base URL: trim, default the
    /// scheme to https, drop trailing slashes
    pub fn normalize_url(raw: &str) -> Result<Url> {
        let trimmed = raw.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(AuthError::Probe("empty server URL".to_string()));
        }

        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("https://{trimmed}")
        };

        let url = Url::parse(&with_scheme)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(AuthError::Probe(format!("unsupported scheme {other:?}"))),
        }
    }

    /// Probe the server: status document first, then auth-method discovery.
    ///
    /// Failure priority: certificate trust, no network, unreachable,
    /// unsupported version, then a generic probe error.
    #[instrument(skip(self))]
    pub async fn probe(&self, raw_url: &str) -> Result<ServerInfo> {
        let base = Self::normalize_url(raw_url)?;

        let status = self.fetch_status(&base).await?;
        if !status.installed {
            return Err(AuthError::Probe(
                "server reports it is not installed".to_string(),
            ));
        }

        let version: ServerVersion = status
            .versionstring
            .as_deref()
            .unwrap_or(&status.version)
            .parse()?;
        if version < self.minimum_version {
            return Err(AuthError::VersionNotSupported {
                found: version,
                minimum: self.minimum_version,
            });
        }

        let authentication_method = self.discover_auth_method(&base).await?;
        let base_url = base.as_str().trim_end_matches('/').to_string();

        debug!(%base_url, %version, ?authentication_method, "server probe succeeded");
        Ok(ServerInfo {
            is_secure_connection: base.scheme() == "https",
            base_url,
            authentication_method,
            version,
        })
    }

    async fn fetch_status(&self, base: &Url) -> Result<StatusResponse> {
        let url = join_url(base.as_str(), endpoints::STATUS_PATH)?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(AuthError::from_transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Http {
                status,
                body_snippet: body.chars().take(200).collect(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::Probe(format!("invalid status document: {e}")))
    }

    /// An unauthenticated request against the WebDAV root; the challenge
    /// headers advertise what the server accepts
    async fn discover_auth_method(&self, base: &Url) -> Result<AuthenticationMethod> {
        let url = join_url(base.as_str(), endpoints::WEBDAV_FILES_PATH)?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(AuthError::from_transport)?;

        let challenges: Vec<String> = response
            .headers()
            .get_all(reqwest::header::WWW_AUTHENTICATE)
            .iter()
            .filter_map(|value| value.to_str().ok().map(str::to_string))
            .collect();

        Ok(AuthenticationMethod::from_challenges(
            challenges.iter().map(String::as_str),
        ))
    }
}
