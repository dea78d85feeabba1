use std::sync::Arc;

use vidfleet_engine::{JobDispatcher, NodeRegistry};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheap to clone; the registry and dispatcher share their stores internally.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: NodeRegistry,
    pub dispatcher: JobDispatcher,
}

impl AppState {
    pub fn new(config: ServerConfig, dispatcher: JobDispatcher) -> Self {
        Self {
            config: Arc::new(config),
            registry: dispatcher.registry().clone(),
            dispatcher,
        }
    }
}
