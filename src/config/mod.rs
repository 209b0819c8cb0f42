use crate::error::ConfigError;
use crate::evaluation::Stage;
use crate::language::Language;
use crate::llm::Protocol;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `llm.url`.
pub const ENV_LLM_URL: &str = "QUALITYGATE_LLM_URL";
/// Environment variable carrying the LLM bearer credential.
pub const ENV_LLM_API_KEY: &str = "QUALITYGATE_LLM_API_KEY";
/// Fallback credential variable for OpenAI-compatible endpoints.
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// LLM endpoint settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Evaluation thresholds, timeouts and output locations
    #[serde(default)]
    pub evaluation: EvaluationConfig,

    /// External tool executables
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Which API dialect the LLM endpoint speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Ollama,
    /// Any server exposing `/v1/chat/completions`
    #[serde(alias = "chatgpt")]
    OpenAi,
}

impl LlmProvider {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
        }
    }

    fn default_url(&self) -> &'static str {
        match self {
            Self::Ollama => "http://localhost:11434",
            Self::OpenAi => "https://api.openai.com",
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProvider,

    /// Model identifier sent to the endpoint
    #[serde(default = "default_model")]
    pub model: String,

    /// Endpoint base URL (defaults per provider)
    #[serde(default)]
    pub url: Option<String>,

    /// Bearer credential, only ever taken from the environment
    #[serde(skip)]
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Retries for transient connectivity failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay; doubles on every retry
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
}

impl LlmConfig {
    /// Effective endpoint URL without a trailing slash.
    pub fn endpoint_url(&self) -> String {
        self.url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_url())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Optional per-stage timeout overrides (seconds).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageTimeouts {
    #[serde(default)]
    pub compile: Option<u64>,
    #[serde(default)]
    pub execute: Option<u64>,
    #[serde(default)]
    pub coverage: Option<u64>,
    #[serde(default)]
    pub mutation: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Language of evaluated modules; inferred from the file extension when unset
    #[serde(default)]
    pub language: Option<Language>,

    /// Minimum mutation score (percent)
    #[serde(default = "default_mutation_threshold")]
    pub mutation_threshold: f64,

    /// Minimum line coverage (percent)
    #[serde(default = "default_coverage_threshold")]
    pub coverage_threshold: f64,

    /// Minimum branch coverage (percent)
    #[serde(default = "default_branch_coverage_threshold")]
    pub branch_coverage_threshold: f64,

    /// Timeout applied to every stage unless overridden
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_seconds: u64,

    #[serde(default)]
    pub stage_timeouts: StageTimeouts,

    /// Where report artifacts are written
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,

    /// Where generated tests are kept for inspection
    #[serde(default = "default_generated_tests_dir")]
    pub generated_tests_dir: PathBuf,

    /// Protocol used when none is given on the command line
    #[serde(default)]
    pub default_protocol: Protocol,

    /// Maximum captured tool output stored per stage (bytes)
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

impl EvaluationConfig {
    /// Timeout for a stage, honoring per-stage overrides.
    pub fn timeout_for(&self, stage: Stage) -> Duration {
        let override_seconds = match stage {
            Stage::Compile => self.stage_timeouts.compile,
            Stage::Execute => self.stage_timeouts.execute,
            Stage::Coverage => self.stage_timeouts.coverage,
            Stage::Mutation => self.stage_timeouts.mutation,
        };
        Duration::from_secs(override_seconds.unwrap_or(self.stage_timeout_seconds))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Maven executable (Java builds, JaCoCo, PIT)
    #[serde(default = "default_maven")]
    pub maven: String,

    /// Python interpreter (pytest, pytest-cov, mutmut)
    #[serde(default = "default_python")]
    pub python: String,

    /// mutmut executable
    #[serde(default = "default_mutmut")]
    pub mutmut: String,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_model() -> String {
    "codellama".to_string()
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_mutation_threshold() -> f64 {
    85.0
}

fn default_coverage_threshold() -> f64 {
    95.0
}

fn default_branch_coverage_threshold() -> f64 {
    90.0
}

fn default_stage_timeout() -> u64 {
    300 // 5 minutes
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_generated_tests_dir() -> PathBuf {
    PathBuf::from("tests/generated")
}

fn default_max_output_bytes() -> usize {
    10_000
}

fn default_maven() -> String {
    "mvn".to_string()
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_mutmut() -> String {
    "mutmut".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            model: default_model(),
            url: None,
            api_key: None,
            timeout_seconds: default_llm_timeout(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
        }
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            language: None,
            mutation_threshold: default_mutation_threshold(),
            coverage_threshold: default_coverage_threshold(),
            branch_coverage_threshold: default_branch_coverage_threshold(),
            stage_timeout_seconds: default_stage_timeout(),
            stage_timeouts: StageTimeouts::default(),
            reports_dir: default_reports_dir(),
            generated_tests_dir: default_generated_tests_dir(),
            default_protocol: Protocol::default(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            maven: default_maven(),
            python: default_python(),
            mutmut: default_mutmut(),
        }
    }
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Load, apply environment overrides and validate.
    ///
    /// An explicitly given path must exist. When no path is given the
    /// platform default is used if present, otherwise defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::load_file(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn load_file(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => path.to_path_buf(),
            None => match Self::default_config_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Config::default()),
            },
        };

        let contents =
            std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
                path: config_path.clone(),
                source,
            })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: config_path,
            source,
        })
    }

    /// Apply endpoint URL and credential overrides from the environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_LLM_URL).filter(|v| !v.trim().is_empty()) {
            self.llm.url = Some(url);
        }
        self.llm.api_key = lookup(ENV_LLM_API_KEY)
            .or_else(|| lookup(ENV_OPENAI_API_KEY))
            .filter(|v| !v.trim().is_empty());
    }

    /// Reject values no component could work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.general.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid {
                key: "general.log_level",
                reason: format!(
                    "`{}` is not one of {}",
                    self.general.log_level,
                    LOG_LEVELS.join(", ")
                ),
            });
        }

        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "llm.model",
                reason: "model identifier must not be empty".to_string(),
            });
        }

        let url = self.llm.endpoint_url();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                key: "llm.url",
                reason: format!("`{}` is not an http(s) URL", url),
            });
        }

        if self.llm.timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                key: "llm.timeout_seconds",
                reason: "must be greater than zero".to_string(),
            });
        }

        for (key, value) in [
            ("evaluation.mutation_threshold", self.evaluation.mutation_threshold),
            ("evaluation.coverage_threshold", self.evaluation.coverage_threshold),
            (
                "evaluation.branch_coverage_threshold",
                self.evaluation.branch_coverage_threshold,
            ),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::Invalid {
                    key,
                    reason: format!("{} is outside 0-100", value),
                });
            }
        }

        let timeouts = &self.evaluation.stage_timeouts;
        for (key, value) in [
            ("evaluation.stage_timeout_seconds", Some(self.evaluation.stage_timeout_seconds)),
            ("evaluation.stage_timeouts.compile", timeouts.compile),
            ("evaluation.stage_timeouts.execute", timeouts.execute),
            ("evaluation.stage_timeouts.coverage", timeouts.coverage),
            ("evaluation.stage_timeouts.mutation", timeouts.mutation),
        ] {
            if value == Some(0) {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "qualitygate", "qualitygate")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
