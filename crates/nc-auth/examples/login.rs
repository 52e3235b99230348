//! Console walkthrough of the full login flow.
//!
//! ```text
//! cargo run --example login -- https://cloud.example.com
//! ```

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::Context;
use nc_auth::{
    AuthConfig, AuthOrchestrator, AuthUiPlan, CallbackPayload, EventReceiver, FileAccountStore,
    UiResult, UserAgentLauncher,
};
use url::Url;

struct ConsoleLauncher;

impl UserAgentLauncher for ConsoleLauncher {
    fn open_authorization_url(&self, url: &Url) {
        println!("Open this URL in your browser:\n  {url}");
    }
}

fn prompt(label: &str) -> anyhow::Result<String> {
    print!("{label}: ");
    std::io::stdout().flush()?;
    let line = std::io::stdin()
        .lock()
        .lines()
        .next()
        .context("stdin closed")??;
    Ok(line.trim().to_string())
}

async fn wait_terminal<T: Clone>(rx: &mut EventReceiver<UiResult<T>>) -> anyhow::Result<T> {
    loop {
        rx.changed().await?;
        let event = rx.borrow_and_update().clone();
        if let Some(event) = event {
            match event.peek() {
                UiResult::Loading => continue,
                UiResult::Success(value) => return Ok(value.clone()),
                UiResult::Error(cause) => anyhow::bail!("{cause}"),
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let server_url = std::env::args()
        .nth(1)
        .context("usage: login <server-url>")?;

    let config = AuthConfig::new(
        "demo-client-id",
        "demo-client-secret",
        Url::parse("oc://callback")?,
    );
    let store = Arc::new(FileAccountStore::new(FileAccountStore::default_storage_dir()?).await?);
    let orchestrator = AuthOrchestrator::new(config, store, Arc::new(ConsoleLauncher))?;

    let mut server_info = orchestrator.server_info();
    orchestrator.probe_server(&server_url);
    let info = wait_terminal(&mut server_info).await?;
    println!(
        "Found server {} (version {}, secure: {})",
        info.base_url, info.version, info.is_secure_connection
    );

    let mut login_result = orchestrator.login_result();
    match orchestrator.current_plan() {
        Some(AuthUiPlan::Basic) => {
            let username = prompt("Username")?;
            let password = prompt("Password")?;
            orchestrator.login_basic(&username, &password);
        }
        Some(AuthUiPlan::OAuth) => {
            orchestrator.start_oauthorization();
            let redirect = prompt("Paste the redirect URL you were sent to")?;
            let payload = CallbackPayload::from_redirect_url(&redirect)?;
            orchestrator.handle_authorization_callback(payload);
        }
        _ => anyhow::bail!("server advertises no supported authentication method"),
    }

    let account = wait_terminal(&mut login_result).await?;
    println!("Logged in as {account}");

    Ok(())
}
