use std::fmt;

use base64::Engine;
use chrono::Utc;
use reqwest::Client;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::{AuthConfig, DEFAULT_USER_AGENT, endpoints, join_url};
use crate::errors::{AuthError, Result};
use crate::models::{
    AuthorizationRequest, CallbackPayload, OAuthErrorResponse, OAuthTokens, ServerInfo,
    TokenResponse,
};

/// Where the two-step authorization-code flow currently stands.
///
/// `TokensReceived` and `Failed` are terminal for the attempt; a new call to
/// `start_authorization` begins a fresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    AuthorizationRequested,
    AuthorizationCodeReceived,
    TokenExchangeRequested,
    TokensReceived,
    Failed,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Idle => "Idle",
            Self::AuthorizationRequested => "AuthorizationRequested",
            Self::AuthorizationCodeReceived => "AuthorizationCodeReceived",
            Self::TokenExchangeRequested => "TokenExchangeRequested",
            Self::TokensReceived => "TokensReceived",
            Self::Failed => "Failed",
        };
        f.write_str(text)
    }
}

/// Drives the OAuth2 authorization-code exchange against the probed server
pub struct OAuthFlow {
    http: Client,
    config: AuthConfig,
    state: FlowState,
    request: Option<AuthorizationRequest>,
    code: Option<String>,
}

impl OAuthFlow {
    pub fn new(config: AuthConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.http_timeouts.connect)
            .timeout(config.http_timeouts.request)
            .user_agent(config.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT))
            .build()
            .map_err(|e| AuthError::Internal(format!("could not build HTTP client: {e}")))?;

        Ok(Self {
            http,
            config,
            state: FlowState::Idle,
            request: None,
            code: None,
        })
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Step 1: build the authorization request for the probed server and hand
    /// back the URL for the external user agent. Starting over from a
    /// terminal state begins a new attempt.
    #[instrument(skip(self, info))]
    pub fn start_authorization(&mut self, info: &ServerInfo) -> Result<Url> {
        let request = AuthorizationRequest {
            authorization_endpoint: join_url(&info.base_url, endpoints::OAUTH2_AUTHORIZE_PATH)?,
            token_endpoint: join_url(&info.base_url, endpoints::OAUTH2_TOKEN_PATH)?,
            client_id: self.config.client_id.clone(),
            redirect_uri: self.config.redirect_uri.clone(),
            state: random_state()?,
        };

        let url = request.build_url();
        self.request = Some(request);
        self.code = None;
        self.state = FlowState::AuthorizationRequested;
        debug!("authorization requested");
        Ok(url)
    }

    /// Consume the redirect callback. The payload must carry either an
    /// authorization code or an error; an authorization error is terminal
    /// for the attempt, with access-denied distinguished.
    #[instrument(skip(self, payload))]
    pub fn handle_callback(&mut self, payload: &CallbackPayload) -> Result<String> {
        if self.state != FlowState::AuthorizationRequested {
            return Err(AuthError::InvalidFlowState {
                operation: "handle a callback",
                state: self.state.to_string(),
            });
        }
        let Some(request) = self.request.as_ref() else {
            return Err(AuthError::InvalidFlowState {
                operation: "handle a callback",
                state: self.state.to_string(),
            });
        };

        if let Some(error_code) = &payload.error_code {
            self.state = FlowState::Failed;
            let access_denied = error_code == "access_denied";
            warn!(%error_code, "authorization request failed");
            return Err(AuthError::OAuthAuthorization {
                reason: payload
                    .error_description
                    .clone()
                    .unwrap_or_else(|| error_code.clone()),
                access_denied,
            });
        }

        let Some(code) = payload.code.clone() else {
            self.state = FlowState::Failed;
            return Err(AuthError::MalformedCallback);
        };

        if payload.state.as_deref() != Some(request.state.as_str()) {
            self.state = FlowState::Failed;
            warn!("state parameter mismatch in authorization callback");
            return Err(AuthError::OAuthAuthorization {
                reason: "state parameter mismatch".to_string(),
                access_denied: false,
            });
        }

        self.code = Some(code.clone());
        self.state = FlowState::AuthorizationCodeReceived;
        debug!("authorization code received");
        Ok(code)
    }

    /// Step 2: exchange the received code for tokens, authenticated with
    /// client-secret-basic. Legal exactly once per received code; success
    /// requires access token, refresh token and user id all present.
    #[instrument(skip(self))]
    pub async fn exchange_code_for_tokens(&mut self) -> Result<OAuthTokens> {
        if self.state != FlowState::AuthorizationCodeReceived {
            return Err(AuthError::InvalidFlowState {
                operation: "exchange the code",
                state: self.state.to_string(),
            });
        }
        let (Some(request), Some(code)) = (self.request.clone(), self.code.clone()) else {
            return Err(AuthError::InvalidFlowState {
                operation: "exchange the code",
                state: self.state.to_string(),
            });
        };
        self.state = FlowState::TokenExchangeRequested;

        let params = [
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", request.redirect_uri.as_str()),
        ];

        debug!("exchanging authorization code for tokens");
        let response = self
            .http
            .post(request.token_endpoint.clone())
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&params)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                self.state = FlowState::Failed;
                return Err(AuthError::from_transport(e));
            }
        };

        if !response.status().is_success() {
            self.state = FlowState::Failed;
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let reason = serde_json::from_str::<OAuthErrorResponse>(&body)
                .ok()
                .map(|e| e.error_description.unwrap_or(e.error))
                .unwrap_or_else(|| format!("HTTP {status}"));
            warn!(%status, "token exchange failed");
            return Err(AuthError::OAuthTokenExchange(reason));
        }

        let token: TokenResponse = match response.json().await {
            Ok(token) => token,
            Err(e) => {
                self.state = FlowState::Failed;
                return Err(AuthError::OAuthTokenExchange(format!(
                    "invalid token response: {e}"
                )));
            }
        };

        let (Some(access_token), Some(refresh_token), Some(user_id)) =
            (token.access_token, token.refresh_token, token.user_id)
        else {
            self.state = FlowState::Failed;
            return Err(AuthError::OAuthTokenExchange(
                "token response is missing the access token, refresh token or user id".to_string(),
            ));
        };

        let expires_at = token
            .expires_in
            .map(|seconds| Utc::now() + chrono::Duration::seconds(seconds as i64));

        self.state = FlowState::TokensReceived;
        debug!("token exchange succeeded");
        Ok(OAuthTokens {
            access_token,
            refresh_token,
            scope: token.scope,
            user_id,
            expires_at,
        })
    }

    /// Abandon the attempt. Legal in any state, releases the pending
    /// authorization session and never panics.
    pub fn dispose(&mut self) {
        self.request = None;
        self.code = None;
        self.state = FlowState::Idle;
    }
}

fn random_state() -> Result<String> {
    let mut bytes = [0u8; 16];
    getrandom::fill(&mut bytes)
        .map_err(|e| AuthError::Internal(format!("could not generate state parameter: {e}")))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}
