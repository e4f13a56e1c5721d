use crate::{config::GatewaySettings, store::ObjectStore};
use std::sync::Arc;

/// Shared, read-only state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ObjectStore>,
    pub settings: Arc<GatewaySettings>,
}

impl AppState {
    pub fn new(store: Arc<dyn ObjectStore>, settings: GatewaySettings) -> Self {
        Self {
            store,
            settings: Arc::new(settings),
        }
    }
}
