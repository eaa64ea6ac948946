//! Service configuration.
//!
//! Layered with figment: compiled defaults, then an optional TOML file, then
//! `RPY_WORKBENCH_*` environment variables (`__` separates nested keys).
//! CLI flags are applied on top by `main`.

use crate::errors::{AppError, AppResult};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use job_sandbox::ExpiryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub mod defaults;
pub mod duration_serde;

use defaults::*;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Origins allowed for cross-origin requests; `*` allows any
    #[serde(default = "default_cors_allowed_origins")]
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding every job workspace
    #[serde(default = "default_jobs_root")]
    pub jobs_root: PathBuf,
    /// Idle time after which a job is swept
    #[serde(default = "default_job_ttl", with = "duration_serde::duration")]
    pub job_ttl: Duration,
    /// Sweep cadence; derived from the TTL when unset
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "duration_serde::option_duration"
    )]
    pub cleanup_interval: Option<Duration>,
    /// Cap on the total bytes of one upload request
    #[serde(default = "default_max_upload_size_mb")]
    pub max_upload_size_mb: u64,
    /// Cap on bytes produced by expanding uploaded zips; defaults to the upload cap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_extracted_size_mb: Option<u64>,
    /// Cap on text previews and saved text
    #[serde(default = "default_max_text_size_kb")]
    pub max_text_size_kb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_unrpyc_command")]
    pub unrpyc_command: String,
    #[serde(default = "default_unrpa_command")]
    pub unrpa_command: String,
    #[serde(default = "default_rpatool_command")]
    pub rpatool_command: String,
    /// Interpreter used for `-m unrpa` when `unrpa` is not on PATH
    #[serde(default = "default_python_command")]
    pub python_command: String,
    /// Wall-clock limit for any single external tool run
    #[serde(default = "default_tool_timeout", with = "duration_serde::duration")]
    pub timeout: Duration,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_cors_allowed_origins() -> Vec<String> {
    vec![DEFAULT_CORS_ORIGIN.to_string()]
}

fn default_jobs_root() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_JOBS_DIR_NAME)
}

fn default_job_ttl() -> Duration {
    Duration::from_secs(DEFAULT_JOB_TTL_SECS)
}

fn default_max_upload_size_mb() -> u64 {
    DEFAULT_MAX_UPLOAD_SIZE_MB
}

fn default_max_text_size_kb() -> u64 {
    DEFAULT_MAX_TEXT_SIZE_KB
}

fn default_unrpyc_command() -> String {
    DEFAULT_UNRPYC_COMMAND.to_string()
}

fn default_unrpa_command() -> String {
    DEFAULT_UNRPA_COMMAND.to_string()
}

fn default_rpatool_command() -> String {
    DEFAULT_RPATOOL_COMMAND.to_string()
}

fn default_python_command() -> String {
    DEFAULT_PYTHON_COMMAND.to_string()
}

fn default_tool_timeout() -> Duration {
    Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS)
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_allowed_origins: default_cors_allowed_origins(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            jobs_root: default_jobs_root(),
            job_ttl: default_job_ttl(),
            cleanup_interval: None,
            max_upload_size_mb: default_max_upload_size_mb(),
            max_extracted_size_mb: None,
            max_text_size_kb: default_max_text_size_kb(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            unrpyc_command: default_unrpyc_command(),
            unrpa_command: default_unrpa_command(),
            rpatool_command: default_rpatool_command(),
            python_command: default_python_command(),
            timeout: default_tool_timeout(),
        }
    }
}

impl StorageConfig {
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn max_extracted_bytes(&self) -> u64 {
        self.max_extracted_size_mb
            .unwrap_or(self.max_upload_size_mb)
            .saturating_mul(1024 * 1024)
    }

    pub fn max_text_bytes(&self) -> u64 {
        self.max_text_size_kb.saturating_mul(1024)
    }

    pub fn expiry_policy(&self) -> ExpiryPolicy {
        ExpiryPolicy::new(self.job_ttl)
    }

    /// Configured sweep interval, or the one recommended for the TTL.
    pub fn sweep_interval(&self) -> Duration {
        self.cleanup_interval
            .filter(|interval| !interval.is_zero())
            .unwrap_or_else(|| self.expiry_policy().recommended_sweep_interval())
    }
}

impl Config {
    /// Figment with every layer except CLI overrides.
    pub fn figment(config_file: &Path) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load configuration; a missing file simply contributes nothing.
    pub fn load(config_file: &Path) -> AppResult<Self> {
        let config: Config = Self::figment(config_file)
            .extract()
            .map_err(|e| AppError::configuration(format!("Failed to load configuration: {e}")))?;
        config.validate()?;

        if config_file.exists() {
            info!("Configuration loaded from: {}", config_file.display());
        } else {
            info!(
                "No configuration file at {}, using defaults and environment",
                config_file.display()
            );
        }
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.web.cors_allowed_origins.is_empty() {
            return Err(AppError::configuration(
                "web.cors_allowed_origins must contain at least one origin",
            ));
        }
        if self.storage.max_upload_size_mb == 0 {
            return Err(AppError::configuration(
                "storage.max_upload_size_mb must be greater than zero",
            ));
        }
        if self.storage.max_text_size_kb == 0 {
            return Err(AppError::configuration(
                "storage.max_text_size_kb must be greater than zero",
            ));
        }
        if self.tools.timeout.is_zero() {
            return Err(AppError::configuration("tools.timeout must be greater than zero"));
        }
        Ok(())
    }
}
