//! Scripted walk through the two canonical sync scenarios, used by
//! `tabsync demo`.

use crate::{wait_until, ExtensionRuntime, Popup, RuntimeResult, Tab, WebApp};
use auth_backend::{AuthState, InMemoryAuthServer};
use extension_bus::MatchPattern;
use page_bridge::{BridgeConfig, ObservedPageStorage};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use sync_config_and_utils::Config;
use sync_protocol_types::{access_token_of, describe};
use token_storage::MemoryStore;
use tracing::info;

pub const DEMO_EMAIL: &str = "demo@tabsync.dev";
pub const DEMO_PASSWORD: &str = "demo-password";
const DEMO_PATTERN: &str = "http://localhost:5173/*";
const DEMO_URL: &str = "http://localhost:5173/chat";
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// State of every copy of the session after one step.
#[derive(Debug, Clone, Serialize)]
pub struct DemoStep {
    pub step: String,
    pub canonical: String,
    pub page_session: String,
    pub popup_state: AuthState,
    pub popup_email: Option<String>,
    pub popup_outbound: u64,
    pub bridge_forwarded: u64,
}

/// Run the demo against an in-memory backend. Timings come from `config`.
pub async fn run_demo(config: &Config) -> RuntimeResult<Vec<DemoStep>> {
    let server = InMemoryAuthServer::new().with_account(DEMO_EMAIL, DEMO_PASSWORD);
    let bridge_config = BridgeConfig::from_config(config);
    let runtime = ExtensionRuntime::start(
        Arc::new(MemoryStore::new()),
        vec![MatchPattern::parse(DEMO_PATTERN)?],
        bridge_config.clone(),
    )?;

    let page = ObservedPageStorage::new();
    let tab = runtime.open_tab(DEMO_URL, page.clone())?;
    let web = WebApp::new(Arc::new(server.client()), page, bridge_config.session_key.clone());
    let popup = runtime.open_popup(Arc::new(server.client()))?;

    let mut steps = vec![record("popup opened", &runtime, &popup, &tab).await?];

    web.sign_in(DEMO_EMAIL, DEMO_PASSWORD).await?;
    popup
        .handle
        .wait_until(STEP_TIMEOUT, |s| s.ui.is_signed_in())
        .await?;
    steps.push(record("web app signed in", &runtime, &popup, &tab).await?);

    popup.handle.sign_out().await?;
    wait_until("page sign-out", STEP_TIMEOUT, || async { tab.session().is_none() }).await?;
    steps.push(record("popup signed out", &runtime, &popup, &tab).await?);

    popup.handle.sign_in(DEMO_EMAIL, DEMO_PASSWORD).await?;
    let canonical = runtime.canonical_token().await?;
    wait_until("page sign-in", STEP_TIMEOUT, || async {
        access_token_of(&tab.session()) == access_token_of(&canonical)
    })
    .await?;
    steps.push(record("popup signed in", &runtime, &popup, &tab).await?);

    popup.close().await;
    info!(steps = steps.len(), "demo finished");
    Ok(steps)
}

async fn record(
    step: &str,
    runtime: &ExtensionRuntime,
    popup: &Popup,
    tab: &Tab,
) -> RuntimeResult<DemoStep> {
    let snapshot = popup.handle.snapshot().await?;
    let bridge = tab.bridge_stats().unwrap_or_default();
    Ok(DemoStep {
        step: step.to_string(),
        canonical: describe(&runtime.canonical_token().await?),
        page_session: describe(&tab.session()),
        popup_state: snapshot.ui.auth_state,
        popup_email: snapshot.ui.email,
        popup_outbound: snapshot.stats.outbound_syncs,
        bridge_forwarded: bridge.forwarded,
    })
}
