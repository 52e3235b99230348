use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::task::JoinHandle;
use tracing::{debug, instrument};
use url::Url;

use crate::basic::BasicAuthValidator;
use crate::committer::SessionCommitter;
use crate::config::AuthConfig;
use crate::errors::{AuthError, Result};
use crate::events::{EventChannel, EventReceiver, UiResult};
use crate::models::{
    AccountName, AuthCredentials, AuthUiPlan, AuthenticationMethod, CallbackPayload, LoginAction,
    OrchestratorState, ServerInfo, TokenType,
};
use crate::negotiate;
use crate::oauth::OAuthFlow;
use crate::probe::ServerProbe;
use crate::store::AccountStore;

/// Opens the authorization URL in an external user agent (browser, webview).
/// The redirect comes back out of band through
/// [`AuthOrchestrator::handle_authorization_callback`].
pub trait UserAgentLauncher: Send + Sync {
    fn open_authorization_url(&self, url: &Url);
}

#[derive(Default)]
struct TaskSlots {
    probe: Option<JoinHandle<()>>,
    login: Option<JoinHandle<()>>,
    supports: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct ProbeCache {
    generation: u64,
    info: Option<ServerInfo>,
}

/// Top-level facade the UI observes.
///
/// Composes the server probe, credential negotiation, both login paths and
/// the session commit behind three event channels. Every operation emits
/// `Loading` followed by exactly one terminal event for the action;
/// re-triggering an action supersedes the in-flight one.
pub struct AuthOrchestrator {
    config: AuthConfig,
    store: Arc<dyn AccountStore>,
    launcher: Arc<dyn UserAgentLauncher>,
    committer: SessionCommitter,

    server_info_events: Arc<EventChannel<UiResult<ServerInfo>>>,
    login_result_events: Arc<EventChannel<UiResult<AccountName>>>,
    supports_oauth2_events: Arc<EventChannel<UiResult<bool>>>,

    /// Latest accepted probe result plus its generation. Invalidation bumps
    /// the generation under the same lock that acceptance checks it, so a
    /// completed probe for a superseded URL can never land in the cache.
    cached_info: Arc<RwLock<ProbeCache>>,
    /// Normalized URL the user granted certificate trust for, if any
    trusted_url: Arc<Mutex<Option<String>>>,

    flow: Arc<tokio::sync::Mutex<OAuthFlow>>,
    session_state: Arc<Mutex<OrchestratorState>>,
    tasks: Mutex<TaskSlots>,
    disposed: Arc<AtomicBool>,
}

impl AuthOrchestrator {
    /// Must be called from within a tokio runtime; operations spawn worker
    /// tasks on it
    pub fn new(
        config: AuthConfig,
        store: Arc<dyn AccountStore>,
        launcher: Arc<dyn UserAgentLauncher>,
    ) -> Result<Self> {
        let flow = OAuthFlow::new(config.clone())?;
        Ok(Self {
            committer: SessionCommitter::new(store.clone()),
            store,
            launcher,
            server_info_events: Arc::new(EventChannel::new()),
            login_result_events: Arc::new(EventChannel::new()),
            supports_oauth2_events: Arc::new(EventChannel::new()),
            cached_info: Arc::new(RwLock::new(ProbeCache::default())),
            trusted_url: Arc::new(Mutex::new(None)),
            flow: Arc::new(tokio::sync::Mutex::new(flow)),
            session_state: Arc::new(Mutex::new(OrchestratorState::default())),
            tasks: Mutex::new(TaskSlots::default()),
            disposed: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    /// Observe probe results
    pub fn server_info(&self) -> EventReceiver<UiResult<ServerInfo>> {
        self.server_info_events.subscribe()
    }

    /// Observe login outcomes (the committed account name)
    pub fn login_result(&self) -> EventReceiver<UiResult<AccountName>> {
        self.login_result_events.subscribe()
    }

    /// Observe answers to [`Self::supports_oauth2`]
    pub fn supports_oauth2_events(&self) -> EventReceiver<UiResult<bool>> {
        self.supports_oauth2_events.subscribe()
    }

    /// Latest accepted probe result, if still valid
    pub fn current_server_info(&self) -> Option<ServerInfo> {
        self.cached_info
            .read()
            .ok()
            .and_then(|cached| cached.info.clone())
    }

    /// Credential UI called for by the latest accepted probe result
    pub fn current_plan(&self) -> Option<AuthUiPlan> {
        self.current_server_info()
            .map(|info| negotiate::negotiate(&info))
    }

    pub fn set_login_action(&self, login_action: LoginAction) {
        if let Ok(mut state) = self.session_state.lock() {
            state.login_action = login_action;
        }
    }

    /// Restore a snapshot taken with [`Self::saved_state`]
    pub fn resume(&self, state: OrchestratorState) {
        if let Ok(mut current) = self.session_state.lock() {
            *current = state;
        }
    }

    pub fn saved_state(&self) -> OrchestratorState {
        self.session_state
            .lock()
            .map(|state| state.clone())
            .unwrap_or_default()
    }

    /// The user edited the URL field. A cached probe result for any other
    /// URL is stale: it is cleared and any in-flight probe for it will be
    /// discarded when it completes.
    pub fn update_server_url(&self, text: &str) {
        let normalized = ServerProbe::normalize_url(text)
            .ok()
            .map(|url| url.as_str().trim_end_matches('/').to_string());

        if let Ok(mut cached) = self.cached_info.write() {
            let matches_cached = match (&normalized, &cached.info) {
                (Some(normalized), Some(info)) => &info.base_url == normalized,
                _ => false,
            };
            if !matches_cached {
                cached.generation += 1;
                cached.info = None;
            }
        }
    }

    /// Discover the server; emits `Loading` then a terminal event on the
    /// server-info channel
    #[instrument(skip(self))]
    pub fn probe_server(&self, raw_url: &str) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }

        let target = self
            .config
            .branding
            .fixed_server_url
            .clone()
            .unwrap_or_else(|| raw_url.to_string());
        self.update_server_url(&target);
        let generation = self
            .cached_info
            .read()
            .ok()
            .map(|cached| cached.generation)
            .unwrap_or_default();
        self.abort_task(|tasks| &mut tasks.probe);

        let normalized_target = ServerProbe::normalize_url(&target)
            .ok()
            .map(|url| url.as_str().trim_end_matches('/').to_string());
        let trust = self.trusts(normalized_target.as_deref());

        let events = Arc::clone(&self.server_info_events);
        let cached = Arc::clone(&self.cached_info);
        let session_state = Arc::clone(&self.session_state);
        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            events.emit(UiResult::Loading);

            let probe = if trust {
                ServerProbe::with_trusted_certificate(&config)
            } else {
                ServerProbe::new(&config)
            };
            let result = match probe {
                Ok(probe) => probe.probe(&target).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(info) => {
                    // Acceptance checks the generation under the cache lock
                    let accepted = cached.write().is_ok_and(|mut cached| {
                        if cached.generation != generation {
                            return false;
                        }
                        cached.info = Some(info.clone());
                        true
                    });
                    if !accepted {
                        debug!("discarding probe result for a superseded URL");
                        return;
                    }
                    if let Ok(mut state) = session_state.lock() {
                        state.auth_token_type = negotiate::negotiate(&info).token_type();
                        state.server_base_url = Some(info.base_url.clone());
                    }
                    events.emit(UiResult::Success(info));
                }
                Err(e) => {
                    let current = cached.read().ok().map(|cached| cached.generation);
                    if current != Some(generation) {
                        debug!("discarding probe result for a superseded URL");
                        return;
                    }
                    events.emit(UiResult::error(e));
                }
            }
        });
        self.replace_task(|tasks| &mut tasks.probe, handle);
    }

    /// The user explicitly trusted the rejected certificate. The grant is
    /// scoped to this URL; probes of any other URL validate certificates as
    /// usual.
    pub fn resume_with_trusted_certificate(&self, raw_url: &str) {
        let normalized = ServerProbe::normalize_url(raw_url)
            .ok()
            .map(|url| url.as_str().trim_end_matches('/').to_string());
        if let Ok(mut trusted) = self.trusted_url.lock() {
            *trusted = normalized;
        }
        self.probe_server(raw_url);
    }

    fn trusts(&self, normalized_url: Option<&str>) -> bool {
        match (self.trusted_url.lock(), normalized_url) {
            (Ok(trusted), Some(url)) => trusted.as_deref() == Some(url),
            _ => false,
        }
    }

    /// Validate Basic credentials against the probed server and commit the
    /// session; requires a valid cached probe result advertising Basic
    #[instrument(skip(self, password))]
    pub fn login_basic(&self, username: &str, password: &str) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        self.abort_task(|tasks| &mut tasks.login);

        let events = Arc::clone(&self.login_result_events);
        let info = self.current_server_info();
        let login_action = self.login_action();
        let committer = self.committer.clone();
        let config = self.config.clone();
        let username = username.to_string();
        let password = password.to_string();

        let handle = tokio::spawn(async move {
            events.emit(UiResult::Loading);
            let result = async {
                let info = info.ok_or(AuthError::UnsupportedAuthMethod)?;
                if info.authentication_method != AuthenticationMethod::BasicHttpAuth {
                    return Err(AuthError::UnsupportedAuthMethod);
                }
                let validator = BasicAuthValidator::new(&config)?;
                let credentials = validator
                    .validate(&info.base_url, &username, &password)
                    .await?;
                committer.commit(credentials, &info, login_action).await
            }
            .await;
            match result {
                Ok(name) => events.emit(UiResult::Success(name)),
                Err(e) => events.emit(UiResult::error(e)),
            }
        });
        self.replace_task(|tasks| &mut tasks.login, handle);
    }

    /// OAuth step 1: build the authorization request and open the external
    /// user agent. Emits `Loading`; the terminal event follows the callback.
    #[instrument(skip(self))]
    pub fn start_oauthorization(&self) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        self.abort_task(|tasks| &mut tasks.login);

        let events = Arc::clone(&self.login_result_events);
        let flow = Arc::clone(&self.flow);
        let launcher = Arc::clone(&self.launcher);
        let info = self.current_server_info();

        let handle = tokio::spawn(async move {
            events.emit(UiResult::Loading);
            let result = async {
                let info = info.ok_or(AuthError::UnsupportedAuthMethod)?;
                if info.authentication_method != AuthenticationMethod::BearerToken {
                    return Err(AuthError::UnsupportedAuthMethod);
                }
                flow.lock().await.start_authorization(&info)
            }
            .await;
            match result {
                Ok(url) => launcher.open_authorization_url(&url),
                Err(e) => events.emit(UiResult::error(e)),
            }
        });
        self.replace_task(|tasks| &mut tasks.login, handle);
    }

    /// OAuth step 2: the redirect arrived. Exchanges the code for tokens and
    /// commits the session.
    #[instrument(skip(self, payload))]
    pub fn handle_authorization_callback(&self, payload: CallbackPayload) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        self.abort_task(|tasks| &mut tasks.login);

        let events = Arc::clone(&self.login_result_events);
        let flow = Arc::clone(&self.flow);
        let committer = self.committer.clone();
        let info = self.current_server_info();
        let login_action = self.login_action();

        let handle = tokio::spawn(async move {
            events.emit(UiResult::Loading);
            let result = async {
                // The code is single use; a stale probe result must fail
                // before the exchange spends it
                let info = info.ok_or(AuthError::UnsupportedAuthMethod)?;
                let mut flow = flow.lock().await;
                flow.handle_callback(&payload)?;
                let tokens = flow.exchange_code_for_tokens().await?;
                drop(flow);

                committer
                    .commit(AuthCredentials::OAuth(tokens), &info, login_action)
                    .await
            }
            .await;
            match result {
                Ok(name) => events.emit(UiResult::Success(name)),
                Err(e) => events.emit(UiResult::error(e)),
            }
        });
        self.replace_task(|tasks| &mut tasks.login, handle);
    }

    /// Whether the stored account re-authenticates with OAuth2; answered
    /// from the stored record, without a fresh probe
    #[instrument(skip(self))]
    pub fn supports_oauth2(&self, account_name: &str) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        self.abort_task(|tasks| &mut tasks.supports);

        let events = Arc::clone(&self.supports_oauth2_events);
        let store = Arc::clone(&self.store);
        let session_state = Arc::clone(&self.session_state);
        let name = account_name.to_string();

        let handle = tokio::spawn(async move {
            events.emit(UiResult::Loading);
            match negotiate::supports_oauth2(store.as_ref(), &name).await {
                Ok(supported) => {
                    if let Ok(mut state) = session_state.lock() {
                        state.auth_token_type = Some(if supported {
                            TokenType::Oauth
                        } else {
                            TokenType::Basic
                        });
                    }
                    events.emit(UiResult::Success(supported));
                }
                Err(e) => events.emit(UiResult::error(e)),
            }
        });
        self.replace_task(|tasks| &mut tasks.supports, handle);
    }

    /// Abandon all in-flight work. Never panics; no events are emitted on
    /// any channel afterwards.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        self.server_info_events.close();
        self.login_result_events.close();
        self.supports_oauth2_events.close();

        if let Ok(mut tasks) = self.tasks.lock() {
            for handle in [
                tasks.probe.take(),
                tasks.login.take(),
                tasks.supports.take(),
            ]
            .into_iter()
            .flatten()
            {
                handle.abort();
            }
        }

        if let Ok(mut flow) = self.flow.try_lock() {
            flow.dispose();
        }
        debug!("authentication orchestrator disposed");
    }

    fn login_action(&self) -> LoginAction {
        self.session_state
            .lock()
            .map(|state| state.login_action)
            .unwrap_or_default()
    }

    fn abort_task(&self, select: fn(&mut TaskSlots) -> &mut Option<JoinHandle<()>>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            if let Some(old) = select(&mut tasks).take() {
                old.abort();
            }
        }
    }

    fn replace_task(
        &self,
        select: fn(&mut TaskSlots) -> &mut Option<JoinHandle<()>>,
        handle: JoinHandle<()>,
    ) {
        match self.tasks.lock() {
            Ok(mut tasks) => {
                if let Some(old) = std::mem::replace(select(&mut tasks), Some(handle)) {
                    old.abort();
                }
            }
            Err(_) => handle.abort(),
        }
    }
}

impl Drop for AuthOrchestrator {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServerVersion;
    use crate::store::MemoryAccountStore;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingLauncher {
        opened: Mutex<Option<Url>>,
    }

    impl RecordingLauncher {
        fn opened_url(&self) -> Option<Url> {
            self.opened.lock().unwrap().clone()
        }
    }

    impl UserAgentLauncher for RecordingLauncher {
        fn open_authorization_url(&self, url: &Url) {
            *self.opened.lock().unwrap() = Some(url.clone());
        }
    }

    struct Harness {
        orchestrator: AuthOrchestrator,
        store: Arc<MemoryAccountStore>,
        launcher: Arc<RecordingLauncher>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryAccountStore::new());
        let launcher = Arc::new(RecordingLauncher::default());
        let config = AuthConfig::new(
            "client-id",
            "client-secret",
            Url::parse("oc://callback").unwrap(),
        );
        let orchestrator =
            AuthOrchestrator::new(config, store.clone(), launcher.clone()).unwrap();
        Harness {
            orchestrator,
            store,
            launcher,
        }
    }

    async fn mock_status(server: &MockServer, version: &str) {
        Mock::given(method("GET"))
            .and(path("/status.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "installed": true,
                "version": version,
                "versionstring": version,
            })))
            .mount(server)
            .await;
    }

    async fn mock_challenge(server: &MockServer, challenge: &str) {
        Mock::given(method("GET"))
            .and(path("/remote.php/dav/files"))
            .respond_with(
                ResponseTemplate::new(401).insert_header("WWW-Authenticate", challenge),
            )
            .mount(server)
            .await;
    }

    async fn next_terminal<T: Clone>(rx: &mut EventReceiver<UiResult<T>>) -> UiResult<T> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                rx.changed().await.unwrap();
                let event = rx.borrow_and_update().clone();
                if let Some(event) = event {
                    if !event.peek().is_loading() {
                        return event.peek().clone();
                    }
                }
            }
        })
        .await
        .expect("no terminal event within the timeout")
    }

    async fn wait_for_opened_url(launcher: &RecordingLauncher) -> Url {
        for _ in 0..100 {
            if let Some(url) = launcher.opened_url() {
                return url;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no authorization URL was opened");
    }

    #[tokio::test]
    async fn basic_login_scenario_commits_the_account() {
        let server = MockServer::start().await;
        mock_status(&server, "10.5.0").await;
        mock_challenge(&server, "Basic realm=\"cloud\"").await;
        Mock::given(method("GET"))
            .and(path("/remote.php/dav/files/alice"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let h = harness();
        let mut server_info = h.orchestrator.server_info();
        let mut login_result = h.orchestrator.login_result();

        h.orchestrator.probe_server(&server.uri());
        let probed = next_terminal(&mut server_info).await;
        let info = probed.stored_data().expect("probe should succeed").clone();
        assert_eq!(info.version, ServerVersion::new(10, 5, 0));
        assert_eq!(h.orchestrator.current_plan(), Some(AuthUiPlan::Basic));

        h.orchestrator.login_basic("alice", "secret");
        let login = next_terminal(&mut login_result).await;
        let name = login.stored_data().expect("login should succeed");
        assert!(name.as_str().starts_with("alice@"));

        let record = h.store.get_account(name.as_str()).await.unwrap();
        assert_eq!(record.token_type, TokenType::Basic);
    }

    #[tokio::test]
    async fn unsupported_version_is_terminal_for_the_url() {
        let server = MockServer::start().await;
        mock_status(&server, "8.0.14").await;

        let h = harness();
        let mut server_info = h.orchestrator.server_info();
        h.orchestrator.probe_server(&server.uri());

        let result = next_terminal(&mut server_info).await;
        assert!(matches!(
            result.error_cause(),
            Some(AuthError::VersionNotSupported { .. })
        ));
        assert!(h.orchestrator.current_plan().is_none());
    }

    #[tokio::test]
    async fn login_without_a_probe_is_blocked() {
        let h = harness();
        let mut login_result = h.orchestrator.login_result();

        h.orchestrator.login_basic("alice", "secret");
        let result = next_terminal(&mut login_result).await;
        assert!(matches!(
            result.error_cause(),
            Some(AuthError::UnsupportedAuthMethod)
        ));
    }

    #[tokio::test]
    async fn editing_the_url_invalidates_the_cached_probe() {
        let server = MockServer::start().await;
        mock_status(&server, "10.5.0").await;
        mock_challenge(&server, "Basic realm=\"cloud\"").await;

        let h = harness();
        let mut server_info = h.orchestrator.server_info();
        h.orchestrator.probe_server(&server.uri());
        next_terminal(&mut server_info).await;
        assert!(h.orchestrator.current_server_info().is_some());

        h.orchestrator.update_server_url("https://changed.example.org");
        assert!(h.orchestrator.current_server_info().is_none());

        let mut login_result = h.orchestrator.login_result();
        h.orchestrator.login_basic("alice", "secret");
        let result = next_terminal(&mut login_result).await;
        assert!(matches!(
            result.error_cause(),
            Some(AuthError::UnsupportedAuthMethod)
        ));
    }

    #[tokio::test]
    async fn stale_probe_results_are_discarded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status.php"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "installed": true,
                        "version": "10.5.0",
                    }))
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;
        mock_challenge(&server, "Basic realm=\"cloud\"").await;

        let h = harness();
        let server_info = h.orchestrator.server_info();
        h.orchestrator.probe_server(&server.uri());
        // The user edits the URL while the probe is still in flight
        h.orchestrator.update_server_url("https://changed.example.org");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(h.orchestrator.current_server_info().is_none());
        let latest = server_info.borrow().clone();
        assert!(latest.is_none_or(|event| event.peek().is_loading()));
    }

    #[tokio::test]
    async fn trusted_retry_re_probes_and_is_scoped_to_the_url() {
        let server = MockServer::start().await;
        mock_status(&server, "10.5.0").await;
        mock_challenge(&server, "Basic realm=\"cloud\"").await;

        let h = harness();
        let mut server_info = h.orchestrator.server_info();
        h.orchestrator.resume_with_trusted_certificate(&server.uri());

        let result = next_terminal(&mut server_info).await;
        assert!(result.stored_data().is_some());

        let trusted = server.uri();
        assert!(h.orchestrator.trusts(Some(trusted.trim_end_matches('/'))));
        // The grant does not extend to any other URL
        assert!(!h.orchestrator.trusts(Some("https://other.example.org")));
    }

    #[tokio::test]
    async fn mid_flow_url_edit_fails_before_spending_the_code() {
        let server = MockServer::start().await;
        mock_status(&server, "10.5.0").await;
        mock_challenge(&server, "Bearer realm=\"cloud\"").await;
        Mock::given(method("POST"))
            .and(path("/index.php/apps/oauth2/api/v1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access",
                "refresh_token": "refresh",
                "token_type": "Bearer",
                "user_id": "alice",
            })))
            .expect(0)
            .mount(&server)
            .await;

        let h = harness();
        let mut server_info = h.orchestrator.server_info();
        let mut login_result = h.orchestrator.login_result();

        h.orchestrator.probe_server(&server.uri());
        next_terminal(&mut server_info).await;

        h.orchestrator.start_oauthorization();
        let url = wait_for_opened_url(&h.launcher).await;
        let state = url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap();

        // The user edits the URL between authorization and the callback
        h.orchestrator.update_server_url("https://changed.example.org");
        h.orchestrator.handle_authorization_callback(CallbackPayload {
            code: Some("abc123".to_string()),
            state: Some(state),
            ..Default::default()
        });

        let result = next_terminal(&mut login_result).await;
        assert!(matches!(
            result.error_cause(),
            Some(AuthError::UnsupportedAuthMethod)
        ));
    }

    #[tokio::test]
    async fn denied_oauth_flow_surfaces_the_distinguished_error() {
        let server = MockServer::start().await;
        mock_status(&server, "10.5.0").await;
        mock_challenge(&server, "Bearer realm=\"cloud\"").await;

        let h = harness();
        let mut server_info = h.orchestrator.server_info();
        let mut login_result = h.orchestrator.login_result();

        h.orchestrator.probe_server(&server.uri());
        next_terminal(&mut server_info).await;
        assert_eq!(h.orchestrator.current_plan(), Some(AuthUiPlan::OAuth));

        h.orchestrator.start_oauthorization();
        wait_for_opened_url(&h.launcher).await;

        h.orchestrator.handle_authorization_callback(CallbackPayload {
            error_code: Some("access_denied".to_string()),
            error_description: Some("The user denied access".to_string()),
            ..Default::default()
        });

        let result = next_terminal(&mut login_result).await;
        assert!(result.error_cause().is_some_and(|e| e.is_access_denied()));
    }

    #[tokio::test]
    async fn oauth_flow_commits_and_reports_oauth_support() {
        let server = MockServer::start().await;
        mock_status(&server, "10.5.0").await;
        mock_challenge(&server, "Bearer realm=\"cloud\"").await;
        Mock::given(method("POST"))
            .and(path("/index.php/apps/oauth2/api/v1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access",
                "refresh_token": "refresh",
                "token_type": "Bearer",
                "expires_in": 3600,
                "user_id": "alice",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let h = harness();
        let mut server_info = h.orchestrator.server_info();
        let mut login_result = h.orchestrator.login_result();

        h.orchestrator.probe_server(&server.uri());
        next_terminal(&mut server_info).await;

        h.orchestrator.start_oauthorization();
        let url = wait_for_opened_url(&h.launcher).await;
        let state = url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap();

        h.orchestrator.handle_authorization_callback(CallbackPayload {
            code: Some("abc123".to_string()),
            state: Some(state),
            ..Default::default()
        });

        let result = next_terminal(&mut login_result).await;
        let name = result.stored_data().expect("oauth login should succeed");
        assert!(name.as_str().starts_with("alice@"));

        let record = h.store.get_account(name.as_str()).await.unwrap();
        assert_eq!(record.token_type, TokenType::Oauth);

        let mut supports = h.orchestrator.supports_oauth2_events();
        h.orchestrator.supports_oauth2(name.as_str());
        let result = next_terminal(&mut supports).await;
        assert_eq!(result.stored_data(), Some(&true));
    }

    #[tokio::test]
    async fn dispose_mid_flight_emits_nothing_further() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status.php"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "installed": true,
                        "version": "10.5.0",
                    }))
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;
        mock_challenge(&server, "Basic realm=\"cloud\"").await;

        let h = harness();
        let server_info = h.orchestrator.server_info();
        h.orchestrator.probe_server(&server.uri());
        h.orchestrator.dispose();

        tokio::time::sleep(Duration::from_millis(500)).await;
        let latest = server_info.borrow().clone();
        assert!(latest.is_none_or(|event| event.peek().is_loading()));
    }

    #[tokio::test]
    async fn saved_state_round_trips_through_resume() {
        let h = harness();
        h.orchestrator.set_login_action(LoginAction::UpdateExpiredToken);
        let snapshot = h.orchestrator.saved_state();
        assert_eq!(snapshot.login_action, LoginAction::UpdateExpiredToken);

        let restored = harness();
        restored.orchestrator.resume(snapshot.clone());
        assert_eq!(restored.orchestrator.saved_state(), snapshot);
    }
}
