//! Application state: prompts, the model transport and the evaluator built on it.
//!
//! The transport is Gemini when GEMINI_API_KEY is present, otherwise the
//! offline stand-in that fails every call (evaluations then come back as
//! renderable error evaluations instead of crashing the service).

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::config::{load_app_config_from_env, AppConfig};
use crate::evaluator::Evaluator;
use crate::gemini::GeminiTransport;
use crate::transport::{OfflineTransport, Transport};

#[derive(Clone)]
pub struct AppState {
    pub evaluator: Evaluator,
}

impl AppState {
    /// Build state from env: load config, init the model transport.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        let cfg = load_app_config_from_env().unwrap_or_default();

        let transport: Arc<dyn Transport> = match GeminiTransport::from_env() {
            Some(g) => {
                info!(target: "reflection_coach", model = %g.model(), "Gemini enabled.");
                Arc::new(g)
            }
            None => {
                warn!(target: "reflection_coach", "Gemini disabled (no GEMINI_API_KEY). Evaluations will report an error.");
                Arc::new(OfflineTransport)
            }
        };

        Self::with_transport(transport, cfg)
    }

    pub fn with_transport(transport: Arc<dyn Transport>, cfg: AppConfig) -> Self {
        Self { evaluator: Evaluator::new(transport, cfg.prompts, cfg.evaluation) }
    }

    pub fn transport(&self) -> &dyn Transport {
        self.evaluator.transport().as_ref()
    }
}
