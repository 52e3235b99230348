//! Client-side authentication orchestration for self-hosted cloud storage
//!
//! This crate drives the login flow of a cloud-storage client against a
//! user-supplied server URL: it probes the server, negotiates the credential
//! UI, runs either the Basic or the OAuth2 authorization-code path and
//! commits the resulting session to a pluggable account store.
//!
//! # Login Flow
//!
//! The flow consists of several steps:
//!
//! 1. Probe the server (reachability, TLS trust, version, auth methods)
//! 2. Negotiate which credential UI the server calls for
//! 3. Authenticate: Basic validation or the OAuth2 authorization-code flow
//! 4. Commit the session under a stable account name
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use nc_auth::{
//!     AuthConfig, AuthOrchestrator, MemoryAccountStore, UserAgentLauncher,
//! };
//! use url::Url;
//!
//! struct PrintLauncher;
//!
//! impl UserAgentLauncher for PrintLauncher {
//!     fn open_authorization_url(&self, url: &Url) {
//!         println!("Visit: {url}");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AuthConfig::new(
//!         "client-id",
//!         "client-secret",
//!         Url::parse("oc://callback")?,
//!     );
//!     let orchestrator = AuthOrchestrator::new(
//!         config,
//!         Arc::new(MemoryAccountStore::new()),
//!         Arc::new(PrintLauncher),
//!     )?;
//!
//!     // Observe probe results, then kick off the probe
//!     let mut server_info = orchestrator.server_info();
//!     orchestrator.probe_server("cloud.example.com");
//!     server_info.changed().await?;
//!
//!     // Once the probe succeeds the plan says which credentials to ask for
//!     if let Some(plan) = orchestrator.current_plan() {
//!         if plan.shows_basic_fields() {
//!             orchestrator.login_basic("alice", "secret");
//!         } else if plan.shows_oauth_button() {
//!             orchestrator.start_oauthorization();
//!             // ...later, when the redirect arrives:
//!             // orchestrator.handle_authorization_callback(payload);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Session Storage
//!
//! Committed sessions go through the `AccountStore` trait:
//!
//! ```no_run
//! use nc_auth::FileAccountStore;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let storage_dir = FileAccountStore::default_storage_dir()?;
//! let store = FileAccountStore::new(storage_dir).await?;
//! # Ok(())
//! # }
//! ```
//!
//! `MemoryAccountStore` backs tests; `FileAccountStore` persists one JSON
//! record per account with an advisory lock on the directory.

pub mod basic;
pub mod committer;
pub mod config;
pub mod errors;
pub mod events;
pub mod file_store;
pub mod models;
pub mod negotiate;
pub mod oauth;
pub mod orchestrator;
pub mod probe;
pub mod store;

// Re-export main types
pub use basic::BasicAuthValidator;
pub use committer::SessionCommitter;
pub use config::{AuthConfig, BrandingOptions, HttpTimeouts, MINIMUM_SERVER_VERSION};
pub use errors::{AuthError, CertificateTrustReason, Result};
pub use events::{Event, EventChannel, EventReceiver, UiResult};
pub use file_store::FileAccountStore;
pub use models::{
    AccountName, AuthCredentials, AuthUiPlan, AuthenticationMethod, CallbackPayload, LoginAction,
    OAuthTokens, OrchestratorState, Password, ServerInfo, ServerVersion, SessionRecord, TokenType,
};
pub use oauth::{FlowState, OAuthFlow};
pub use orchestrator::{AuthOrchestrator, UserAgentLauncher};
pub use probe::ServerProbe;
pub use store::{AccountStore, MemoryAccountStore};
