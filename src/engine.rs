//! Process-wide wiring.
//!
//! One [`Engine`] per process: a single model client, one document cache,
//! one cost monitor, and the orchestrator that shares them across sessions.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use docent_core::cache::DocumentCache;
use docent_core::cost::CostMonitor;

use crate::config::Config;
use crate::error::LlmError;
use crate::llm::{create_model, LanguageModel};
use crate::orchestrator::{OrchestratorSettings, QueryOrchestrator};
use crate::sweeper::CacheSweeper;

pub struct Engine {
    orchestrator: Arc<QueryOrchestrator>,
    sweeper: Option<CacheSweeper>,
}

impl Engine {
    /// Build the engine from configuration. Must be called inside a tokio
    /// runtime when `cache.sweep_interval_secs` is non-zero.
    pub fn start(config: &Config) -> Result<Self, LlmError> {
        let model = create_model(&config.model)?;
        Ok(Self::with_model(config, model))
    }

    /// Build the engine around an existing model client.
    pub fn with_model(config: &Config, model: Arc<dyn LanguageModel>) -> Self {
        let cache = Arc::new(DocumentCache::new((&config.cache).into()));
        let costs = Arc::new(CostMonitor::new((&config.cost).into()));

        info!(
            model = model.model_name(),
            cache_capacity = config.cache.capacity,
            daily_budget_usd = config.cost.daily_budget_usd,
            "engine started"
        );

        let orchestrator = Arc::new(QueryOrchestrator::new(
            model,
            cache,
            costs,
            OrchestratorSettings::from(config),
        ));

        let sweeper = (config.cache.sweep_interval_secs > 0).then(|| {
            CacheSweeper::spawn(
                Arc::clone(&orchestrator),
                Duration::from_secs(config.cache.sweep_interval_secs),
            )
        });

        Self {
            orchestrator,
            sweeper,
        }
    }

    pub fn orchestrator(&self) -> &Arc<QueryOrchestrator> {
        &self.orchestrator
    }

    /// Stop background work. In-flight queries holding the orchestrator
    /// finish normally.
    pub async fn shutdown(self) {
        if let Some(sweeper) = self.sweeper {
            sweeper.shutdown().await;
        }
        let stats = self.orchestrator.stats();
        info!(
            queries = stats.queries_processed,
            total_cost_usd = stats.costs.total_cost_usd,
            "engine stopped"
        );
    }
}
