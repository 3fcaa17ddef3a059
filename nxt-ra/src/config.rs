//! Research agent settings
//!
//! Resolved from the TOML config file (`nxt-ra.toml`) with environment and
//! command-line overrides applied on top, then validated before a run starts.
//! An invalid value is a `RunError::Configuration`; nothing has been written
//! at that point.

use crate::error::RunError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Environment variable consulted for the Anthropic API key
pub const ANTHROPIC_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Which reasoning service the analysis stage uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningBackend {
    /// Local keyword taxonomy, no network
    Heuristic,
    /// Anthropic Messages API
    Anthropic,
}

impl std::str::FromStr for ReasoningBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "heuristic" => Ok(ReasoningBackend::Heuristic),
            "anthropic" => Ok(ReasoningBackend::Anthropic),
            other => Err(format!("unknown reasoning backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Pipeline settings with their defaults
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Minimum credibility (0-100) for admission
    pub credibility_floor: u32,
    /// Largest velocity change per assessment and per project per run
    pub max_velocity_delta: f64,
    /// Projects processed simultaneously
    pub max_concurrent_projects: usize,
    /// Per fetch attempt
    pub collector_timeout_secs: u64,
    /// Retries of `SourceUnavailable` per collector per run
    pub collector_retry_cap: u32,
    /// Per reasoning call
    pub analysis_timeout_secs: u64,
    pub min_classification_confidence: f64,
    pub max_findings_per_project: usize,
    pub lookback_days: i64,
    pub reasoning_backend: ReasoningBackend,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub enable_sec: bool,
    pub enable_news: bool,
    pub enable_feeds: bool,
    /// Contact string SEC asks automated clients to send
    pub sec_user_agent: String,
    /// Wait budget for `database is locked` retries
    pub db_max_lock_wait_ms: u64,
    pub logging: LoggingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            credibility_floor: 60,
            max_velocity_delta: 10.0,
            max_concurrent_projects: 4,
            collector_timeout_secs: 30,
            collector_retry_cap: 3,
            analysis_timeout_secs: 60,
            min_classification_confidence: 0.5,
            max_findings_per_project: 20,
            lookback_days: 7,
            reasoning_backend: ReasoningBackend::Heuristic,
            anthropic_api_key: None,
            anthropic_model: "claude-sonnet-4-5-20250929".to_string(),
            enable_sec: true,
            enable_news: true,
            enable_feeds: true,
            sec_user_agent: "NXT Research Agent research@example.com".to_string(),
            db_max_lock_wait_ms: 5000,
            logging: LoggingConfig::default(),
        }
    }
}

impl Settings {
    /// Parse settings from TOML text; unknown keys (e.g. `root_folder`) are ignored
    pub fn from_toml(content: &str) -> Result<Self, RunError> {
        toml::from_str(content).map_err(|e| RunError::Configuration(e.to_string()))
    }

    /// Load from a config file, or defaults when there is none
    pub fn load(config_file: Option<&Path>) -> Result<Self, RunError> {
        let mut settings = match config_file {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    RunError::Configuration(format!("{}: {}", path.display(), e))
                })?;
                info!("Loaded settings from {}", path.display());
                Self::from_toml(&content)?
            }
            None => Self::default(),
        };
        settings.apply_env();
        Ok(settings)
    }

    /// Environment overrides: the API key falls back to `ANTHROPIC_API_KEY`
    pub fn apply_env(&mut self) {
        if self.anthropic_api_key.as_deref().map_or(true, str::is_empty) {
            if let Ok(key) = std::env::var(ANTHROPIC_KEY_ENV) {
                if !key.trim().is_empty() {
                    self.anthropic_api_key = Some(key);
                }
            }
        }
    }

    /// Check every option; the first violation aborts the run
    pub fn validate(&self) -> Result<(), RunError> {
        fn bad(msg: String) -> Result<(), RunError> {
            Err(RunError::Configuration(msg))
        }

        if self.credibility_floor > 100 {
            return bad(format!(
                "credibility_floor must be 0-100, got {}",
                self.credibility_floor
            ));
        }
        if !(self.max_velocity_delta > 0.0 && self.max_velocity_delta <= 100.0) {
            return bad(format!(
                "max_velocity_delta must be in (0, 100], got {}",
                self.max_velocity_delta
            ));
        }
        if self.max_concurrent_projects == 0 {
            return bad("max_concurrent_projects must be at least 1".to_string());
        }
        if self.collector_timeout_secs == 0 || self.analysis_timeout_secs == 0 {
            return bad("timeouts must be at least 1 second".to_string());
        }
        if !(0.0..=1.0).contains(&self.min_classification_confidence) {
            return bad(format!(
                "min_classification_confidence must be 0.0-1.0, got {}",
                self.min_classification_confidence
            ));
        }
        if self.max_findings_per_project == 0 {
            return bad("max_findings_per_project must be at least 1".to_string());
        }
        if self.lookback_days <= 0 {
            return bad(format!("lookback_days must be positive, got {}", self.lookback_days));
        }
        if self.reasoning_backend == ReasoningBackend::Anthropic
            && self.anthropic_api_key.as_deref().map_or(true, |k| k.trim().is_empty())
        {
            return bad(format!(
                "reasoning_backend = \"anthropic\" requires anthropic_api_key or {}",
                ANTHROPIC_KEY_ENV
            ));
        }
        Ok(())
    }

    pub fn collector_timeout(&self) -> Duration {
        Duration::from_secs(self.collector_timeout_secs)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }
}
