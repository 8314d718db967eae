use std::sync::Arc;

use chrono::{DateTime, Utc};
use quarry_client::HtmdCleaner;
use quarry_core::{BatchCoordinator, Orchestrator};
use tokio_util::sync::CancellationToken;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator<HtmdCleaner>>,
    pub batch: BatchCoordinator<HtmdCleaner>,
    /// Bearer token protecting every `/v1` route.
    pub api_key: String,
    /// Fired on shutdown so running batches stop starting new targets.
    pub shutdown: CancellationToken,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(batch: BatchCoordinator<HtmdCleaner>, api_key: impl Into<String>) -> Self {
        Self {
            orchestrator: Arc::clone(batch.orchestrator()),
            batch,
            api_key: api_key.into(),
            shutdown: CancellationToken::new(),
            started_at: Utc::now(),
        }
    }
}
