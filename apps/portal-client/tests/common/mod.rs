//! Shared harness for integration tests: a full engine wired to the
//! in-memory API and transport.

use std::sync::Arc;
use std::time::Duration;

use portal_client::api::MemoryPortalApi;
use portal_client::config::Config;
use portal_client::models::{Sender, SenderRole};
use portal_client::realtime::transport::MemoryTransport;
use portal_client::PortalClient;

pub const USER_ID: &str = "usr_1";
pub const USER_CHANNEL: &str = "user.usr_1";

pub struct TestHarness {
    pub client: Arc<PortalClient>,
    pub api: Arc<MemoryPortalApi>,
    pub transport: Arc<MemoryTransport>,
}

pub fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Start a full engine and sign the user in. Returns once the per-user
/// channel subscription is live.
pub async fn start_client() -> TestHarness {
    init_tracing();

    let api = Arc::new(MemoryPortalApi::new(USER_ID));
    let transport = Arc::new(MemoryTransport::new());
    let client = PortalClient::new(Config::for_tests(), api.clone(), transport.clone());

    client.start().await.expect("engine start");
    client.auth.set_active(USER_ID);

    let subscribed = {
        let client = client.clone();
        wait_until(move || client.subscriptions.is_subscribed(USER_CHANNEL), 2000).await
    };
    assert!(subscribed, "user channel never subscribed");

    TestHarness {
        client,
        api,
        transport,
    }
}

/// Poll a condition until it holds or the deadline passes.
pub async fn wait_until(cond: impl Fn() -> bool, ms: u64) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(ms);
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return cond();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn me() -> Sender {
    Sender {
        id: USER_ID.to_string(),
        display_name: "Customer".to_string(),
        role: SenderRole::Client,
    }
}

pub fn agent() -> Sender {
    Sender {
        id: "usr_agent".to_string(),
        display_name: "Support".to_string(),
        role: SenderRole::Agent,
    }
}
