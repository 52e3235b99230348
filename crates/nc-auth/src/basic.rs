use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};

use crate::config::{AuthConfig, DEFAULT_USER_AGENT, endpoints, join_url};
use crate::errors::{AuthError, Result};
use crate::models::{AuthCredentials, Password};

/// Checks a username/password pair against the server's WebDAV endpoint
#[derive(Debug, Clone)]
pub struct BasicAuthValidator {
    http: Client,
}

impl BasicAuthValidator {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.http_timeouts.connect)
            .timeout(config.http_timeouts.request)
            .user_agent(config.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT))
            .build()
            .map_err(|e| AuthError::Internal(format!("could not build HTTP client: {e}")))?;

        Ok(Self { http })
    }

    /// An authenticated request against the user's WebDAV root; any 2xx
    /// response proves the credentials
    #[instrument(skip(self, password))]
    pub async fn validate(
        &self,
        base_url: &str,
        username: &str,
        password: &str,
    ) -> Result<AuthCredentials> {
        let url = join_url(
            base_url,
            &format!("{}/{}", endpoints::WEBDAV_FILES_PATH, username),
        )?;

        let response = self
            .http
            .get(url)
            .basic_auth(username, Some(password))
            .send()
            .await
            .map_err(AuthError::from_transport)?;

        let status = response.status();
        if status.is_success() {
            debug!(%username, "basic credentials accepted");
            return Ok(AuthCredentials::Basic {
                username: username.to_string(),
                password: Password::new(password),
            });
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AuthError::InvalidCredentials);
        }

        let body = response.text().await.unwrap_or_default();
        Err(AuthError::Http {
            status,
            body_snippet: body.chars().take(200).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use url::Url;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> AuthConfig {
        AuthConfig::new(
            "client-id",
            "client-secret",
            Url::parse("oc://callback").unwrap(),
        )
    }

    fn authorization_header(username: &str, password: &str) -> String {
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{username}:{password}"));
        format!("Basic {encoded}")
    }

    #[tokio::test]
    async fn valid_credentials_are_returned_as_basic() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/remote.php/dav/files/alice"))
            .and(header("Authorization", authorization_header("alice", "secret")))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let validator = BasicAuthValidator::new(&test_config()).unwrap();
        let credentials = validator
            .validate(&server.uri(), "alice", "secret")
            .await
            .unwrap();

        match credentials {
            AuthCredentials::Basic { username, password } => {
                assert_eq!(username, "alice");
                assert_eq!(password.expose(), "secret");
            }
            other => panic!("expected basic credentials, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_credentials_map_to_invalid_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/remote.php/dav/files/alice"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let validator = BasicAuthValidator::new(&test_config()).unwrap();
        let err = validator
            .validate(&server.uri(), "alice", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn server_errors_carry_status_and_snippet() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/remote.php/dav/files/alice"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let validator = BasicAuthValidator::new(&test_config()).unwrap();
        let err = validator
            .validate(&server.uri(), "alice", "secret")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::Http { status, .. } if status == StatusCode::SERVICE_UNAVAILABLE
        ));
    }
}
