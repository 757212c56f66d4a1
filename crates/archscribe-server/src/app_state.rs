// ABOUTME: Shared application state for the archscribe HTTP server.
// ABOUTME: Holds the provider, the task history storage, loop settings, and handles of running tasks.

use std::collections::HashMap;
use std::sync::Arc;

use archscribe_agent::{LoopSettings, ProviderAdapter};
use archscribe_store::MessageStorage;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use ulid::Ulid;

/// Shared application state accessible by all Axum handlers.
pub struct AppState {
    pub provider: Arc<dyn ProviderAdapter>,
    pub storage: Arc<dyn MessageStorage>,
    pub settings: LoopSettings,
    /// Background loop tasks keyed by task id, removed when they finish.
    pub running: RwLock<HashMap<Ulid, JoinHandle<()>>>,
}

/// Type alias for the Arc-wrapped state used with Axum's State extractor.
pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        provider: Arc<dyn ProviderAdapter>,
        storage: Arc<dyn MessageStorage>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            provider,
            storage,
            settings,
            running: RwLock::new(HashMap::new()),
        }
    }

    pub async fn is_running(&self, task_id: Ulid) -> bool {
        self.running.read().await.contains_key(&task_id)
    }
}
