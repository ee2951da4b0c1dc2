use crate::core::config::AppConfig;
use crate::sla::SlaEngine;
use std::sync::Arc;

pub struct AppState {
    pub config: AppConfig,
    pub engine: Arc<SlaEngine>,
}

impl AppState {
    pub fn new(config: AppConfig, engine: SlaEngine) -> Self {
        Self {
            config,
            engine: Arc::new(engine),
        }
    }
}
