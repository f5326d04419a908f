use std::sync::Arc;

use crate::store::Store;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Pluggable store. `PgStore` by default, `MemoryStore` with STORE_BACKEND=memory.
    pub store: Arc<dyn Store>,
}
