// =============================================================================
// SESSION MODULE
// =============================================================================
// Explicit construction and teardown of the whole engine.
//
// A Session owns one transport, one store, one parts workflow and (once
// started) one polling scheduler. Nothing is global: two sessions against
// two backends do not share anything.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::backend::Backend;
use crate::error::SyncResult;
use crate::parts::PartsWorkflow;
use crate::retry::RetryPolicy;
use crate::scheduler::{PollTarget, PollingScheduler};
use crate::store::WorkOrderStore;
use crate::transport::{HttpTransport, Transport};

/// Poll target names, as they appear in logs and metrics.
pub const WORK_ORDERS_POLL: &str = "work_orders";
pub const COMMENTS_POLL: &str = "comments";

/// Everything needed to build a session.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Backend root, e.g. `https://mes.example.com/api`
    pub base_url: String,

    /// Bearer token, if the backend wants one
    pub token: Option<String>,

    /// Sent as `requested_by` on part requests
    pub operator: String,

    pub work_order_poll: Duration,
    pub aggregate_poll: Duration,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
}

impl EngineConfig {
    /// Defaults: 30s work order polling, 5 min aggregates, 3 attempts 1s apart.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            operator: "operator".to_string(),
            work_order_poll: Duration::from_secs(30),
            aggregate_poll: Duration::from_secs(300),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

pub struct Session {
    store: WorkOrderStore,
    parts: PartsWorkflow,
    http: Option<Arc<HttpTransport>>,
    scheduler: Mutex<Option<PollingScheduler>>,
    work_order_poll: Duration,
    aggregate_poll: Duration,
}

impl Session {
    /// Build a session talking HTTP to `config.base_url`.
    pub fn connect(config: &EngineConfig) -> SyncResult<Self> {
        let http = Arc::new(HttpTransport::new(
            config.base_url.clone(),
            config.token.clone(),
            config.request_timeout,
        )?);
        info!(base_url = %http.base_url(), "Backend transport ready");

        let transport: Arc<dyn Transport> = http.clone();
        let mut session = Self::with_transport(transport, config);
        session.http = Some(http);
        Ok(session)
    }

    /// Build a session over any transport (tests, alternative clients).
    pub fn with_transport(transport: Arc<dyn Transport>, config: &EngineConfig) -> Self {
        let backend = Backend::new(transport, config.retry);
        let store = WorkOrderStore::new(backend.clone());
        let parts = PartsWorkflow::new(store.clone(), backend, config.operator.clone());

        Self {
            store,
            parts,
            http: None,
            scheduler: Mutex::new(None),
            work_order_poll: config.work_order_poll,
            aggregate_poll: config.aggregate_poll,
        }
    }

    pub fn store(&self) -> &WorkOrderStore {
        &self.store
    }

    pub fn parts(&self) -> &PartsWorkflow {
        &self.parts
    }

    /// Start background polling: work orders and comments. No-op if running.
    pub async fn start_polling(&self) {
        let mut slot = self.scheduler.lock().await;
        if slot.is_some() || self.store.is_disposed() {
            return;
        }

        let list_store = self.store.clone();
        let comment_store = self.store.clone();
        let targets = vec![
            PollTarget::new(WORK_ORDERS_POLL, self.work_order_poll, move || {
                let store = list_store.clone();
                async move { store.refresh_list().await }
            }),
            PollTarget::new(COMMENTS_POLL, self.aggregate_poll, move || {
                let store = comment_store.clone();
                async move { store.refresh_comments().await }
            }),
        ];

        *slot = Some(PollingScheduler::start(targets));
    }

    /// Swap the bearer token (token refresh). Only HTTP sessions carry one.
    pub async fn set_token(&self, token: Option<String>) {
        match &self.http {
            Some(http) => http.set_token(token).await,
            None => warn!("Session has no HTTP transport, token ignored"),
        }
    }

    /// Tear the session down. Late results from in-flight calls are dropped.
    pub async fn dispose(&self) {
        self.store.dispose();
        let scheduler = self.scheduler.lock().await.take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown().await;
        }
        info!("Session disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::paths;
    use crate::testing::{list_json, work_order_json, FakeTransport};
    use reqwest::Method;
    use serde_json::json;

    fn session(fake: &Arc<FakeTransport>) -> Session {
        let transport: Arc<dyn Transport> = fake.clone();
        Session::with_transport(transport, &EngineConfig::new("http://backend.test"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_refreshes_until_disposed() {
        let fake = FakeTransport::new();
        fake.reply(
            Method::GET,
            paths::WORK_ORDERS,
            Ok(list_json(vec![work_order_json("WO0000001", 10, 4, false)])),
        );
        fake.reply(Method::GET, paths::COMMENTS, Ok(json!({ "comments": [] })));
        let session = session(&fake);

        session.start_polling().await;
        session.start_polling().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(fake.count(&Method::GET, paths::WORK_ORDERS), 1);
        assert_eq!(fake.count(&Method::GET, paths::COMMENTS), 1);
        assert_eq!(session.store().snapshot().work_orders.len(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fake.count(&Method::GET, paths::WORK_ORDERS), 2);

        session.dispose().await;
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(fake.count(&Method::GET, paths::WORK_ORDERS), 2);
        assert!(session.store().is_disposed());
    }

    #[tokio::test]
    async fn test_connect_builds_http_transport() {
        let mut config = EngineConfig::new("http://127.0.0.1:9/");
        config.token = Some("secret".into());

        let session = Session::connect(&config).expect("client builds");
        session.set_token(None).await;

        assert!(session.http.as_ref().is_some_and(|http| http.base_url() == "http://127.0.0.1:9"));
    }
}
