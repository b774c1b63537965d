use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pipeline::checker::{CheckPolicy, ConflictPolicy};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub xkg: XkgConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub check: CheckConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub http_server: HttpServerConfig,
}

/// Storage locations and logging
#[derive(Debug, Clone, Deserialize)]
pub struct XkgConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for XkgConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            migrations_dir: default_migrations_dir(),
            log_level: default_log_level(),
        }
    }
}

/// Which generation model backs the planner and extractor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    /// Template planner and heuristic extractor, no network
    #[default]
    #[serde(alias = "mock")]
    Offline,
    /// Any OpenAI-compatible chat-completions endpoint
    OpenaiCompat,
}

/// Generation model configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_llm_api_key_env(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_llm_max_retries(),
        }
    }
}

/// Evidence source configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub enable_wiki: bool,
    #[serde(default)]
    pub enable_arxiv: bool,
    /// Directory of Markdown notes searched as a local knowledge base
    #[serde(default)]
    pub local_kb_path: Option<PathBuf>,
    #[serde(default = "default_max_passages")]
    pub max_passages_per_domain: usize,
    #[serde(default = "default_max_per_source")]
    pub max_per_source: usize,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enable_wiki: false,
            enable_arxiv: false,
            local_kb_path: None,
            max_passages_per_domain: default_max_passages(),
            max_per_source: default_max_per_source(),
            cache_capacity: default_cache_capacity(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Pipeline fan-out and scheduling
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_domains")]
    pub domains: Vec<String>,
    #[serde(default = "default_depth")]
    pub default_depth: u8,
    #[serde(default = "default_domain_concurrency")]
    pub domain_concurrency: usize,
    #[serde(default = "default_domain_timeout_secs")]
    pub domain_timeout_secs: u64,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_trace_sample")]
    pub trace_sample: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            domains: default_domains(),
            default_depth: default_depth(),
            domain_concurrency: default_domain_concurrency(),
            domain_timeout_secs: default_domain_timeout_secs(),
            worker_pool_size: default_worker_pool_size(),
            trace_sample: default_trace_sample(),
        }
    }
}

impl PipelineConfig {
    pub fn domain_timeout(&self) -> Duration {
        Duration::from_secs(self.domain_timeout_secs)
    }
}

/// Check Layer thresholds for strict and relaxed modes
#[derive(Debug, Clone, Deserialize)]
pub struct CheckConfig {
    #[serde(default = "default_strict_min_confidence")]
    pub strict_min_confidence: f64,
    #[serde(default = "default_strict_downgrade_factor")]
    pub strict_downgrade_factor: f64,
    #[serde(default = "default_strict_conflict_spread")]
    pub strict_conflict_spread: f64,
    #[serde(default = "default_relaxed_min_confidence")]
    pub relaxed_min_confidence: f64,
    #[serde(default = "default_relaxed_downgrade_factor")]
    pub relaxed_downgrade_factor: f64,
    #[serde(default = "default_relaxed_conflict_spread")]
    pub relaxed_conflict_spread: f64,
    /// Treat any two distinct relations on the same node pair as a conflict
    #[serde(default)]
    pub distinct_relations_conflict: bool,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            strict_min_confidence: default_strict_min_confidence(),
            strict_downgrade_factor: default_strict_downgrade_factor(),
            strict_conflict_spread: default_strict_conflict_spread(),
            relaxed_min_confidence: default_relaxed_min_confidence(),
            relaxed_downgrade_factor: default_relaxed_downgrade_factor(),
            relaxed_conflict_spread: default_relaxed_conflict_spread(),
            distinct_relations_conflict: false,
        }
    }
}

impl CheckConfig {
    /// Policy used when a request asks for `strict_check`
    pub fn strict_policy(&self) -> CheckPolicy {
        CheckPolicy {
            min_confidence: self.strict_min_confidence,
            downgrade_factor: self.strict_downgrade_factor,
            conflict: ConflictPolicy {
                confidence_spread: self.strict_conflict_spread,
                distinct_relations: self.distinct_relations_conflict,
            },
        }
    }

    pub fn relaxed_policy(&self) -> CheckPolicy {
        CheckPolicy {
            min_confidence: self.relaxed_min_confidence,
            downgrade_factor: self.relaxed_downgrade_factor,
            conflict: ConflictPolicy {
                confidence_spread: self.relaxed_conflict_spread,
                distinct_relations: self.distinct_relations_conflict,
            },
        }
    }
}

/// Job record retention
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_job_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_job_ttl_secs(),
            history_limit: default_history_limit(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default = "default_http_bind")]
    pub bind: String,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
            bind: default_http_bind(),
            allowed_origins: Vec::new(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("xkg.db")
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_llm_max_retries() -> usize {
    2
}

fn default_max_passages() -> usize {
    10
}

fn default_max_per_source() -> usize {
    2
}

fn default_cache_capacity() -> usize {
    256
}

fn default_request_timeout_secs() -> u64 {
    10
}

pub fn default_domains() -> Vec<String> {
    ["Mathematics", "Physics", "Computer Science", "Biology", "Economics"]
        .iter()
        .map(|d| d.to_string())
        .collect()
}

fn default_depth() -> u8 {
    2
}

fn default_domain_concurrency() -> usize {
    4
}

fn default_domain_timeout_secs() -> u64 {
    45
}

fn default_worker_pool_size() -> usize {
    2
}

fn default_trace_sample() -> usize {
    3
}

fn default_strict_min_confidence() -> f64 {
    0.6
}

fn default_strict_downgrade_factor() -> f64 {
    0.6
}

fn default_strict_conflict_spread() -> f64 {
    0.3
}

fn default_relaxed_min_confidence() -> f64 {
    0.4
}

fn default_relaxed_downgrade_factor() -> f64 {
    0.7
}

fn default_relaxed_conflict_spread() -> f64 {
    0.45
}

fn default_job_ttl_secs() -> u64 {
    7 * 24 * 3600
}

fn default_history_limit() -> usize {
    50
}

fn default_sweep_interval_secs() -> u64 {
    600
}

fn default_http_port() -> u16 {
    8000
}

fn default_http_bind() -> String {
    "127.0.0.1".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in XKG_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("XKG_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml_str(&config_str)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str).context("Failed to parse config.toml")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.llm.provider == LlmProvider::OpenaiCompat {
            std::env::var(&self.llm.api_key_env).with_context(|| {
                format!(
                    "Environment variable {} not set. Set it in your .env file or switch llm.provider to \"offline\".",
                    self.llm.api_key_env
                )
            })?;
            url::Url::parse(&self.llm.base_url)
                .with_context(|| format!("llm.base_url is not a valid URL: {}", self.llm.base_url))?;
        }

        if self.pipeline.domains.is_empty() {
            anyhow::bail!("pipeline.domains must list at least one domain");
        }

        if self.pipeline.domains.iter().any(|d| d.trim().is_empty()) {
            anyhow::bail!("pipeline.domains must not contain empty labels");
        }

        if !(1..=3).contains(&self.pipeline.default_depth) {
            anyhow::bail!("pipeline.default_depth must be between 1 and 3");
        }

        if self.pipeline.domain_concurrency == 0 {
            anyhow::bail!("pipeline.domain_concurrency must be greater than 0");
        }

        if self.pipeline.worker_pool_size == 0 {
            anyhow::bail!("pipeline.worker_pool_size must be greater than 0");
        }

        if self.pipeline.domain_timeout_secs == 0 {
            anyhow::bail!("pipeline.domain_timeout_secs must be greater than 0");
        }

        if self.retrieval.max_passages_per_domain == 0 {
            anyhow::bail!("retrieval.max_passages_per_domain must be greater than 0");
        }

        for (name, value) in [
            ("check.strict_min_confidence", self.check.strict_min_confidence),
            ("check.relaxed_min_confidence", self.check.relaxed_min_confidence),
            ("check.strict_conflict_spread", self.check.strict_conflict_spread),
            ("check.relaxed_conflict_spread", self.check.relaxed_conflict_spread),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{} must be between 0.0 and 1.0", name);
            }
        }

        for (name, value) in [
            ("check.strict_downgrade_factor", self.check.strict_downgrade_factor),
            ("check.relaxed_downgrade_factor", self.check.relaxed_downgrade_factor),
        ] {
            // must strictly weaken a downgraded edge
            if !(value > 0.0 && value < 1.0) {
                anyhow::bail!("{} must be greater than 0.0 and less than 1.0", name);
            }
        }

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.xkg.db_path
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.xkg.migrations_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serialize config tests that mutate process-wide env so they don't race.
    static CONFIG_TEST_LOCK: Mutex<()> = Mutex::new(());

    const FULL_CONFIG: &str = r#"
[xkg]
db_path = "./test.db"
log_level = "debug"

[llm]
provider = "openai_compat"
model = "gpt-4o-mini"
api_key_env = "XKG_TEST_API_KEY"

[retrieval]
enable_wiki = true
max_passages_per_domain = 8

[pipeline]
domains = ["Mathematics", "Computer Science"]
domain_concurrency = 2

[check]
strict_min_confidence = 0.65
"#;

    fn with_config_env(config_path: &Path, api_key: Option<&str>, f: impl FnOnce()) {
        let original_config = std::env::var("XKG_CONFIG").ok();
        let original_key = std::env::var("XKG_TEST_API_KEY").ok();
        std::env::set_var("XKG_CONFIG", config_path.to_str().unwrap());
        match api_key {
            Some(k) => std::env::set_var("XKG_TEST_API_KEY", k),
            None => std::env::remove_var("XKG_TEST_API_KEY"),
        }
        f();
        std::env::remove_var("XKG_CONFIG");
        std::env::remove_var("XKG_TEST_API_KEY");
        if let Some(val) = original_config {
            std::env::set_var("XKG_CONFIG", val);
        }
        if let Some(val) = original_key {
            std::env::set_var("XKG_TEST_API_KEY", val);
        }
    }

    #[test]
    fn test_config_load_success() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, FULL_CONFIG).unwrap();
        with_config_env(&config_path, Some("test-key"), || {
            let config = Config::load();
            assert!(config.is_ok(), "Config::load() failed: {:?}", config.err());
            let config = config.unwrap();
            assert_eq!(config.xkg.log_level, "debug");
            assert_eq!(config.llm.provider, LlmProvider::OpenaiCompat);
            assert_eq!(config.retrieval.max_passages_per_domain, 8);
            assert_eq!(config.pipeline.domains.len(), 2);
            assert_eq!(config.check.strict_policy().min_confidence, 0.65);
            // untouched sections fall back to defaults
            assert_eq!(config.jobs.history_limit, 50);
            assert_eq!(config.http_server.port, 8000);
        });
    }

    #[test]
    fn test_config_missing_api_key() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, FULL_CONFIG).unwrap();
        with_config_env(&config_path, None, || {
            let config = Config::load();
            assert!(config.is_err(), "Expected missing API key error");
            let message = format!("{:#}", config.unwrap_err());
            assert!(message.contains("XKG_TEST_API_KEY"), "{}", message);
        });
    }

    #[test]
    fn test_config_invalid_path() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let original = std::env::var("XKG_CONFIG").ok();
        std::env::set_var("XKG_CONFIG", "nonexistent.toml");
        let config = Config::load();
        assert!(config.is_err());
        std::env::remove_var("XKG_CONFIG");
        if let Some(v) = original {
            std::env::set_var("XKG_CONFIG", v);
        }
    }

    #[test]
    fn test_offline_config_needs_no_key() {
        let config = Config::from_toml_str("[llm]\nprovider = \"mock\"\n").unwrap();
        assert_eq!(config.llm.provider, LlmProvider::Offline);
        assert_eq!(config.pipeline.domains, default_domains());
    }

    #[test]
    fn test_rejects_bad_ranges() {
        assert!(Config::from_toml_str("[pipeline]\ndomains = []\n").is_err());
        assert!(Config::from_toml_str("[pipeline]\ndefault_depth = 4\n").is_err());
        assert!(Config::from_toml_str("[check]\nstrict_downgrade_factor = 1.0\n").is_err());
        assert!(Config::from_toml_str("[check]\nrelaxed_min_confidence = 1.5\n").is_err());
    }

    #[test]
    fn test_relaxed_policy_is_looser() {
        let check = CheckConfig::default();
        assert!(check.relaxed_policy().min_confidence < check.strict_policy().min_confidence);
        assert!(check.relaxed_policy().downgrade_factor > check.strict_policy().downgrade_factor);
    }
}
