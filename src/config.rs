use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

use crate::accrual::models::DEFAULT_RETRY_AFTER_SECS;
use crate::error::{AppError, AppResult};

/// Command-line overrides; anything left unset comes from the environment,
/// the optional config file or the built-in defaults.
#[derive(Debug, Default, Parser)]
#[command(name = "server", about = "Reconciles order accruals against the accrual service")]
pub struct Cli {
    /// HTTP listen address
    #[arg(short = 'a', long)]
    pub run_address: Option<String>,

    /// Postgres connection string
    #[arg(short = 'd', long)]
    pub database_uri: Option<String>,

    /// Accrual service address
    #[arg(short = 'r', long)]
    pub accrual_address: Option<String>,

    /// Seconds between polling ticks
    #[arg(long)]
    pub poll_interval_secs: Option<u64>,

    /// Concurrent lookups per tick
    #[arg(long)]
    pub workers: Option<u64>,

    /// Optional config file
    #[arg(long, default_value = "accrual.toml")]
    pub config_file: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub run_address: String,
    pub database_uri: String,
    pub accrual_system_address: String,
    pub accrual_poll_interval_secs: u64,
    pub accrual_workers: usize,
    pub accrual_request_timeout_secs: u64,
    pub accrual_flush_interval_ms: u64,
    pub accrual_default_retry_after_secs: u64,
    pub accrual_outcome_capacity: usize,
}

/// Settings consumed by the accrual agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub accrual_base_url: String,
    pub poll_interval: Duration,
    pub workers: usize,
    pub request_timeout: Duration,
    pub flush_interval: Duration,
    pub default_retry_after_secs: u64,
    pub outcome_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            accrual_base_url: "http://localhost:8080".to_string(),
            poll_interval: Duration::from_secs(5),
            workers: 3,
            request_timeout: Duration::from_secs(5),
            flush_interval: Duration::from_secs(1),
            default_retry_after_secs: DEFAULT_RETRY_AFTER_SECS,
            outcome_capacity: 1000,
        }
    }
}

impl AppConfig {
    /// Defaults, then `config_file`, then environment, then CLI flags
    pub fn load(cli: &Cli) -> AppResult<Self> {
        let settings = Config::builder()
            .set_default("run_address", "0.0.0.0:3001")?
            .set_default("accrual_system_address", "http://localhost:8080")?
            .set_default("accrual_poll_interval_secs", 5)?
            .set_default("accrual_workers", 3)?
            .set_default("accrual_request_timeout_secs", 5)?
            .set_default("accrual_flush_interval_ms", 1000)?
            .set_default("accrual_default_retry_after_secs", DEFAULT_RETRY_AFTER_SECS)?
            .set_default("accrual_outcome_capacity", 1000)?
            .add_source(File::with_name(&cli.config_file).required(false))
            .add_source(Environment::default().try_parsing(true))
            .set_override_option("run_address", cli.run_address.clone())?
            .set_override_option("database_uri", cli.database_uri.clone())?
            .set_override_option("accrual_system_address", cli.accrual_address.clone())?
            .set_override_option("accrual_poll_interval_secs", cli.poll_interval_secs)?
            .set_override_option("accrual_workers", cli.workers)?
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.database_uri.trim().is_empty() {
            return Err(AppError::InvalidInput("database_uri must be set".to_string()));
        }
        if self.accrual_system_address.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "accrual_system_address must be set".to_string(),
            ));
        }

        let positive = [
            ("accrual_poll_interval_secs", self.accrual_poll_interval_secs),
            ("accrual_workers", self.accrual_workers as u64),
            ("accrual_request_timeout_secs", self.accrual_request_timeout_secs),
            ("accrual_flush_interval_ms", self.accrual_flush_interval_ms),
            ("accrual_outcome_capacity", self.accrual_outcome_capacity as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(AppError::InvalidInput(format!("{} must be at least 1", name)));
            }
        }

        Ok(())
    }

    /// Accrual address with a scheme; bare `host:port` means plain http
    pub fn accrual_base_url(&self) -> String {
        let address = self.accrual_system_address.trim();
        if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        }
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            accrual_base_url: self.accrual_base_url(),
            poll_interval: Duration::from_secs(self.accrual_poll_interval_secs),
            workers: self.accrual_workers,
            request_timeout: Duration::from_secs(self.accrual_request_timeout_secs),
            flush_interval: Duration::from_millis(self.accrual_flush_interval_ms),
            default_retry_after_secs: self.accrual_default_retry_after_secs,
            outcome_capacity: self.accrual_outcome_capacity,
        }
    }
}
