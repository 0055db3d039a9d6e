use crate::metrics::SweeperMetrics;
use roamly_store::DbClient;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// `None` when no database is attached; health then reports the process only.
    pub db: Option<Arc<DbClient>>,
    pub metrics: Arc<SweeperMetrics>,
}
