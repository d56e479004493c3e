pub mod api;
pub mod auth;
pub mod cache;
pub mod chat;
pub mod config;
pub mod error;
pub mod models;
pub mod notifications;
pub mod poll;
pub mod realtime;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use api::PortalApi;
use auth::AuthSignal;
use cache::{CacheKey, QueryCache};
use chat::controller::ChatController;
use chat::dock::ChatDockController;
use chat::pipeline::OptimisticMessagePipeline;
use chat::preview::PreviewRegistry;
use config::Config;
use error::SyncError;
use models::{Sender, SupportRoom};
use notifications::feed::NotificationFeed;
use poll::Poller;
use realtime::connection::RealtimeConnection;
use realtime::dispatch::{EventDispatchRouter, Toast};
use realtime::subscriptions::ChannelSubscriptionManager;
use realtime::transport::PushTransport;

/// The assembled sync engine: one explicitly-owned instance per application,
/// with lifecycle tied to start and logout rather than module load.
pub struct PortalClient {
    pub config: Arc<Config>,
    pub api: Arc<dyn PortalApi>,
    pub cache: Arc<QueryCache>,
    pub auth: AuthSignal,
    pub connection: Arc<RealtimeConnection>,
    pub subscriptions: Arc<ChannelSubscriptionManager>,
    pub router: Arc<EventDispatchRouter>,
    pub pipeline: Arc<OptimisticMessagePipeline>,
    pub feed: Arc<NotificationFeed>,
    pub dock: Arc<ChatDockController>,
    pub poller: Arc<Poller>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PortalClient {
    pub fn new(
        config: Config,
        api: Arc<dyn PortalApi>,
        transport: Arc<dyn PushTransport>,
    ) -> Arc<Self> {
        let config = Arc::new(config);
        let auth = AuthSignal::new();
        let cache = Arc::new(QueryCache::new());
        let connection = Arc::new(RealtimeConnection::new(transport.clone()));
        let subscriptions = Arc::new(ChannelSubscriptionManager::new(
            transport.clone(),
            auth.clone(),
        ));
        let router = Arc::new(EventDispatchRouter::new(cache.clone()));
        let pipeline = Arc::new(OptimisticMessagePipeline::new(
            api.clone(),
            cache.clone(),
            Arc::new(PreviewRegistry::new()),
        ));
        let feed = Arc::new(NotificationFeed::new(
            api.clone(),
            cache.clone(),
            auth.clone(),
            subscriptions.clone(),
        ));
        let poller = Arc::new(Poller::new(
            auth.clone(),
            feed.clone(),
            Duration::from_secs(config.poll_interval_secs),
        ));

        Arc::new(Self {
            config,
            api,
            cache,
            auth,
            connection,
            subscriptions,
            router,
            pipeline,
            feed,
            dock: Arc::new(ChatDockController::new()),
            poller,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Connect the push transport and spawn the background loops: event
    /// pump, subscription manager, notification feed, connection tracker,
    /// and polling fallback.
    pub async fn start(&self) -> Result<(), SyncError> {
        self.connection.connect().await?;

        let pump = tokio::spawn(run_event_pump(
            self.connection.transport(),
            self.router.clone(),
        ));
        let mut tasks = self.tasks.lock();
        tasks.push(pump);
        tasks.push(tokio::spawn(self.connection.clone().run()));
        tasks.push(tokio::spawn(self.subscriptions.clone().run()));
        tasks.push(tokio::spawn(self.feed.clone().run()));
        tasks.push(tokio::spawn(self.poller.clone().run()));

        tracing::info!("portal sync engine started");
        Ok(())
    }

    /// Tear down everything: background loops, channel subscriptions, and
    /// the transport connection.
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }
        self.subscriptions.clear_all().await;
        self.connection.disconnect().await;
        tracing::info!("portal sync engine stopped");
    }

    /// User-visible side effects produced by push events.
    pub fn toasts(&self) -> broadcast::Receiver<Toast> {
        self.router.toasts()
    }

    /// The cached support room, fetched when stale.
    pub async fn support_room(&self) -> Result<SupportRoom, SyncError> {
        if !self.cache.is_stale(&CacheKey::SupportRoom) {
            if let Some(room) = self.cache.support_room() {
                return Ok(room);
            }
        }
        let room = self.api.fetch_support_room().await?;
        self.cache.store_support_room(room.clone());
        Ok(room)
    }

    /// Build a controller for one chat room and include it in the polling
    /// fallback for as long as it lives.
    pub fn chat(&self, room_id: &str, me: Sender) -> Arc<ChatController> {
        let controller = Arc::new(ChatController::new(
            room_id,
            me,
            self.api.clone(),
            self.cache.clone(),
            self.pipeline.clone(),
            self.subscriptions.clone(),
        ));
        self.poller.register_room(&controller);
        controller
    }
}

/// Forward push events from the transport into the dispatch router.
async fn run_event_pump(transport: Arc<dyn PushTransport>, router: Arc<EventDispatchRouter>) {
    let mut rx = transport.events();
    loop {
        match rx.recv().await {
            Ok(event) => router.dispatch(&event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // The polling fallback covers whatever was skipped.
                tracing::warn!(skipped, "push event stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
