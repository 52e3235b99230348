use std::fmt;

use thiserror::Error;

use crate::models::ServerVersion;

/// Why a server certificate was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateTrustReason {
    HostnameMismatch,
    Expired,
    UnknownIssuer,
    Other,
}

impl fmt::Display for CertificateTrustReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::HostnameMismatch => "hostname mismatch",
            Self::Expired => "certificate expired",
            Self::UnknownIssuer => "unknown issuer",
            Self::Other => "validation failure",
        };
        f.write_str(text)
    }
}

/// Authentication error taxonomy surfaced to the UI layer
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("no network connection")]
    NoNetworkConnection,

    #[error("server not reachable: {0}")]
    ServerNotReachable(String),

    /// Recoverable in place: the caller may trust the certificate and
    /// re-probe the same URL
    #[error("server certificate not trusted ({reason}): {detail}")]
    CertificateTrust {
        reason: CertificateTrustReason,
        detail: String,
    },

    #[error("server version {found} is below the supported minimum {minimum}")]
    VersionNotSupported {
        found: ServerVersion,
        minimum: ServerVersion,
    },

    #[error("server advertises no authentication method this client supports")]
    UnsupportedAuthMethod,

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("authorization request failed: {reason}")]
    OAuthAuthorization { reason: String, access_denied: bool },

    #[error("token exchange failed: {0}")]
    OAuthTokenExchange(String),

    #[error("authorization callback carried neither a code nor an error")]
    MalformedCallback,

    #[error("could not persist account: {0}")]
    Persistence(String),

    #[error("server probe failed: {0}")]
    Probe(String),

    #[error("HTTP error {status}: {body_snippet}")]
    Http {
        status: reqwest::StatusCode,
        body_snippet: String,
    },

    #[error("flow cannot {operation} while in state {state}")]
    InvalidFlowState {
        operation: &'static str,
        state: String,
    },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON serialization/deserialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthError {
    /// Classify a transport-level failure into the probe taxonomy.
    ///
    /// reqwest does not expose a structured TLS error, so the source chain is
    /// matched textually; anything certificate-shaped becomes the recoverable
    /// `CertificateTrust` case.
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        let connect_failure = err.is_timeout() || err.is_connect();
        Self::classify_transport(error_chain(&err), connect_failure)
    }

    fn classify_transport(detail: String, connect_failure: bool) -> Self {
        let lower = detail.to_ascii_lowercase();

        if lower.contains("certificate") || lower.contains("tls") || lower.contains("ssl") {
            let reason = if lower.contains("hostname") || lower.contains("notvalidforname") {
                CertificateTrustReason::HostnameMismatch
            } else if lower.contains("expired") {
                CertificateTrustReason::Expired
            } else if lower.contains("unknown issuer")
                || lower.contains("unknownissuer")
                || lower.contains("self signed")
                || lower.contains("self-signed")
            {
                CertificateTrustReason::UnknownIssuer
            } else {
                CertificateTrustReason::Other
            };
            return Self::CertificateTrust { reason, detail };
        }

        if lower.contains("network is unreachable")
            || lower.contains("host is unreachable")
            || lower.contains("no route to host")
        {
            return Self::NoNetworkConnection;
        }

        if connect_failure || lower.contains("dns error") {
            return Self::ServerNotReachable(detail);
        }

        Self::Probe(detail)
    }

    /// Distinguished access-denied case of an authorization error
    pub fn is_access_denied(&self) -> bool {
        matches!(
            self,
            Self::OAuthAuthorization {
                access_denied: true,
                ..
            }
        )
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        parts.push(cause.to_string());
        source = cause.source();
    }
    parts.join(": ")
}

pub type Result<T> = std::result::Result<T, AuthError>;
