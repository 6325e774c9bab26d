//! Shared server state

use std::sync::Arc;

use openmemory_core::temporal::TemporalFacts;
use openmemory_core::{Config, HsgEngine};

/// Everything a request handler needs. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<HsgEngine>,
    pub facts: Arc<TemporalFacts>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(engine: Arc<HsgEngine>) -> Self {
        let config = Arc::clone(engine.config());
        let facts = Arc::new(TemporalFacts::new(Arc::clone(engine.store())));
        Self {
            engine,
            facts,
            config,
        }
    }
}
