use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::pipeline::{PhaseTimeouts, PipelineSettings};
use crate::{ResearchFlowError, SecretValue, require_env};

const DEFAULT_CONFIG_PATH: &str = "researchflow.toml";
const CONFIG_PATH_ENV: &str = "RESEARCHFLOW_CONFIG";

const PLAN_MODEL_ENV: &str = "RESEARCH_PLAN_MODEL";
const GATHERING_MODEL_ENV: &str = "RESEARCH_GATHERING_MODEL";
const SYNTHESIS_MODEL_ENV: &str = "RESEARCH_SYNTHESIS_MODEL";
const VERIFICATION_MODEL_ENV: &str = "RESEARCH_VERIFICATION_MODEL";

/// Top-level configuration structure. Every section is optional in the file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub models: ModelConfig,
    pub timeouts: TimeoutConfig,
    pub stream: StreamConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Resolve the configured LLM secret value (from environment only).
    pub fn llm_api_key(&self) -> Result<SecretValue, ResearchFlowError> {
        require_env(&self.llm.api_key_env)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            timeouts: PhaseTimeouts {
                planning: Duration::from_secs(self.timeouts.planning_secs),
                search: Duration::from_secs(self.timeouts.search_secs),
                synthesis: Duration::from_secs(self.timeouts.synthesis_secs),
                verification: Duration::from_secs(self.timeouts.verification_secs),
            },
            run_deadline: Duration::from_secs(self.timeouts.run_deadline_secs),
            heartbeat_interval: Duration::from_secs(self.stream.heartbeat_secs),
            event_buffer: self.stream.event_buffer,
        }
    }

    /// Per-role model names from the environment win over the file.
    fn apply_env_overrides(&mut self) {
        let overrides = [
            (PLAN_MODEL_ENV, &mut self.models.plan),
            (GATHERING_MODEL_ENV, &mut self.models.gathering),
            (SYNTHESIS_MODEL_ENV, &mut self.models.synthesis),
            (VERIFICATION_MODEL_ENV, &mut self.models.verification),
        ];
        for (var, slot) in overrides {
            if let Ok(value) = env::var(var) {
                if !value.trim().is_empty() {
                    *slot = value.trim().to_string();
                }
            }
        }
    }
}

/// Helper to load configuration with guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `RESEARCHFLOW_CONFIG` environment variable.
    /// 3. `researchflow.toml` in the current working directory.
    ///
    /// Only the implicit default file may be absent; defaults are used then.
    pub fn load(path: Option<PathBuf>) -> Result<Config, ResearchFlowError> {
        let (candidate, explicit) = resolve_path(path);
        let mut config = if !explicit && !candidate.exists() {
            Config::default()
        } else {
            let raw = fs::read_to_string(&candidate)
                .map_err(|err| ResearchFlowError::config_io(candidate.clone(), err))?;
            Self::parse(&raw)?
        };

        config.apply_env_overrides();
        Self::validate(&config)?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Config, ResearchFlowError> {
        toml::from_str(raw).map_err(|err| ResearchFlowError::InvalidConfiguration(err.to_string()))
    }

    fn validate(config: &Config) -> Result<(), ResearchFlowError> {
        if config.llm.api_key_env.trim().is_empty() {
            return Err(ResearchFlowError::InvalidConfiguration(
                "llm.api_key_env must reference an environment variable".into(),
            ));
        }

        let timeouts = &config.timeouts;
        let durations = [
            ("timeouts.planning_secs", timeouts.planning_secs),
            ("timeouts.search_secs", timeouts.search_secs),
            ("timeouts.synthesis_secs", timeouts.synthesis_secs),
            ("timeouts.verification_secs", timeouts.verification_secs),
            ("timeouts.run_deadline_secs", timeouts.run_deadline_secs),
            ("stream.heartbeat_secs", config.stream.heartbeat_secs),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, secs)| *secs == 0) {
            return Err(ResearchFlowError::InvalidConfiguration(format!(
                "{name} must be greater than zero"
            )));
        }
        if config.stream.event_buffer == 0 {
            return Err(ResearchFlowError::InvalidConfiguration(
                "stream.event_buffer must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> (PathBuf, bool) {
    if let Some(path) = path {
        return (path, true);
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return (PathBuf::from(from_env), true);
        }
    }

    (Path::new(DEFAULT_CONFIG_PATH).to_path_buf(), false)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub request_timeout_secs: u64,
}

impl LlmConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub plan: String,
    pub gathering: String,
    pub synthesis: String,
    pub verification: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            plan: "gpt-4o".into(),
            gathering: "gpt-4o-mini".into(),
            synthesis: "gpt-4o".into(),
            verification: "gpt-4o".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub planning_secs: u64,
    pub search_secs: u64,
    pub synthesis_secs: u64,
    pub verification_secs: u64,
    pub run_deadline_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            planning_secs: 60,
            search_secs: 120,
            synthesis_secs: 120,
            verification_secs: 60,
            run_deadline_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub heartbeat_secs: u64,
    pub event_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 30,
            event_buffer: 100,
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
            level: "info".into(),
        }
    }
}
