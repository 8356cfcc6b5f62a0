use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use docent_core::assemble::{AssemblerConfig, ExpansionMode};
use docent_core::cache::CacheConfig;
use docent_core::cost::CostConfig;
use docent_core::retrieve::{RankingMode, RetrieverConfig};
use docent_core::segment::SegmenterConfig;

/// Default config location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/docent.toml";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub segmentation: SegmentationConfig,
    pub cache: CacheSettings,
    pub retrieval: RetrievalConfig,
    pub context: ContextConfig,
    pub orchestrator: OrchestratorConfig,
    pub cost: CostSettings,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    /// `"openai"` or `"disabled"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ModelConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_output_tokens() -> u32 {
    1_024
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SegmentationConfig {
    pub small_document_tokens: usize,
    pub max_section_tokens: usize,
    pub min_section_tokens: usize,
    pub summary_max_chars: usize,
    /// Ask the model for boundaries when no structure is detected.
    pub model_assisted: bool,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        let core = SegmenterConfig::default();
        Self {
            small_document_tokens: core.small_document_tokens,
            max_section_tokens: core.max_section_tokens,
            min_section_tokens: core.min_section_tokens,
            summary_max_chars: core.summary_max_chars,
            model_assisted: false,
        }
    }
}

impl From<&SegmentationConfig> for SegmenterConfig {
    fn from(c: &SegmentationConfig) -> Self {
        SegmenterConfig {
            small_document_tokens: c.small_document_tokens,
            max_section_tokens: c.max_section_tokens,
            min_section_tokens: c.min_section_tokens,
            summary_max_chars: c.summary_max_chars,
            ..SegmenterConfig::default()
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    pub capacity: usize,
    pub eviction_fraction: f64,
    /// Period of the background sweep over expired entries and idle
    /// sessions. 0 disables it.
    pub sweep_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 3_600,
            capacity: 50,
            eviction_fraction: 0.1,
            sweep_interval_secs: 300,
        }
    }
}

impl From<&CacheSettings> for CacheConfig {
    fn from(c: &CacheSettings) -> Self {
        CacheConfig {
            ttl: chrono::Duration::seconds(c.ttl_secs.min(i64::MAX as u64) as i64),
            capacity: c.capacity,
            eviction_fraction: c.eviction_fraction,
        }
    }
}

/// How sections are chosen for a question.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Lexical ranking only.
    #[default]
    Lexical,
    /// Ask the model to pick from numbered titles; lexical ranking on failure.
    Model,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub mode: RankingMode,
    pub selection: SelectionMode,
    /// Sections retrieved per round.
    pub max_sections: usize,
    pub min_relevance: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: RankingMode::Hybrid,
            selection: SelectionMode::Lexical,
            max_sections: 3,
            min_relevance: RetrieverConfig::default().min_relevance,
        }
    }
}

impl From<&RetrievalConfig> for RetrieverConfig {
    fn from(c: &RetrievalConfig) -> Self {
        RetrieverConfig {
            mode: c.mode,
            min_relevance: c.min_relevance,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ContextConfig {
    /// Token budget for the document context block.
    pub budget_tokens: usize,
    pub min_utilization: f64,
    pub target_utilization: f64,
    pub expansion: ExpansionMode,
}

impl Default for ContextConfig {
    fn default() -> Self {
        let core = AssemblerConfig::default();
        Self {
            budget_tokens: 6_000,
            min_utilization: core.min_utilization,
            target_utilization: core.target_utilization,
            expansion: core.expansion,
        }
    }
}

impl From<&ContextConfig> for AssemblerConfig {
    fn from(c: &ContextConfig) -> Self {
        AssemblerConfig {
            min_utilization: c.min_utilization,
            target_utilization: c.target_utilization,
            expansion: c.expansion,
            ..AssemblerConfig::default()
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Extra retrieval rounds after the first answer attempt.
    pub max_rounds: usize,
    /// Fast-classifier confidence below which the model is asked instead.
    pub classifier_threshold: f64,
    /// Previous user/assistant exchanges replayed into each call.
    pub history_turns: usize,
    /// Sessions untouched for this long are dropped by the sweeper. 0 keeps
    /// them until cleared.
    pub session_idle_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            classifier_threshold: 0.7,
            history_turns: 4,
            session_idle_secs: 3600,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CostSettings {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub daily_budget_usd: f64,
    pub warning_fraction: f64,
    pub max_entries: usize,
    /// Refuse model calls once the daily budget is exceeded.
    pub enforce_budget: bool,
}

impl Default for CostSettings {
    fn default() -> Self {
        let core = CostConfig::default();
        Self {
            input_per_million: core.input_per_million,
            output_per_million: core.output_per_million,
            daily_budget_usd: core.daily_budget_usd,
            warning_fraction: core.warning_fraction,
            max_entries: core.max_entries,
            enforce_budget: false,
        }
    }
}

impl From<&CostSettings> for CostConfig {
    fn from(c: &CostSettings) -> Self {
        CostConfig {
            input_per_million: c.input_per_million,
            output_per_million: c.output_per_million,
            daily_budget_usd: c.daily_budget_usd,
            warning_fraction: c.warning_fraction,
            max_entries: c.max_entries,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7341".to_string(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load `path` if given; otherwise the default path when it exists, or
/// built-in defaults.
pub fn load_config_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => load_config(p),
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if default.exists() {
                load_config(default)
            } else {
                Ok(Config::default())
            }
        }
    }
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate segmentation
    let seg = &config.segmentation;
    if seg.max_section_tokens == 0 {
        anyhow::bail!("segmentation.max_section_tokens must be > 0");
    }
    if seg.min_section_tokens >= seg.max_section_tokens {
        anyhow::bail!("segmentation.min_section_tokens must be < max_section_tokens");
    }

    // Validate cache
    if config.cache.capacity == 0 {
        anyhow::bail!("cache.capacity must be > 0");
    }
    if config.cache.ttl_secs == 0 {
        anyhow::bail!("cache.ttl_secs must be > 0");
    }
    if !(0.0..=1.0).contains(&config.cache.eviction_fraction) {
        anyhow::bail!("cache.eviction_fraction must be in [0.0, 1.0]");
    }

    // Validate retrieval
    if config.retrieval.max_sections < 1 {
        anyhow::bail!("retrieval.max_sections must be >= 1");
    }

    // Validate context
    let ctx = &config.context;
    if ctx.budget_tokens == 0 {
        anyhow::bail!("context.budget_tokens must be > 0");
    }
    if !(0.0..=1.0).contains(&ctx.min_utilization) || !(0.0..=1.0).contains(&ctx.target_utilization) {
        anyhow::bail!("context utilization fractions must be in [0.0, 1.0]");
    }
    if ctx.min_utilization > ctx.target_utilization {
        anyhow::bail!("context.min_utilization must be <= target_utilization");
    }

    // Validate orchestrator
    if !(0.0..=1.0).contains(&config.orchestrator.classifier_threshold) {
        anyhow::bail!("orchestrator.classifier_threshold must be in [0.0, 1.0]");
    }

    // Validate cost
    let cost = &config.cost;
    if cost.input_per_million < 0.0 || cost.output_per_million < 0.0 {
        anyhow::bail!("cost rates must be >= 0");
    }
    if !(0.0..=1.0).contains(&cost.warning_fraction) {
        anyhow::bail!("cost.warning_fraction must be in [0.0, 1.0]");
    }
    if cost.max_entries == 0 {
        anyhow::bail!("cost.max_entries must be > 0");
    }

    match config.model.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown model provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}
