//! Runtime configuration read from `AGL_*` environment variables.

use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Config {
    /// Model answering in the bot.
    pub model_name: String,
    /// Model used by the trainer.
    pub optimization_model: String,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub num_epochs: usize,
    pub data_dir: PathBuf,
    pub max_samples: usize,
    pub success_reward: f64,
    pub partial_reward: f64,
    pub failure_reward: f64,
    pub api_host: String,
    pub api_port: u16,
    /// Base URL of the trainer. `None` disables forwarding.
    pub trainer_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_name: "gemini-1.5-flash".into(),
            optimization_model: "gpt-4o-mini".into(),
            batch_size: 8,
            learning_rate: 1e-4,
            num_epochs: 3,
            data_dir: PathBuf::from("training_data"),
            max_samples: 10_000,
            success_reward: 1.0,
            partial_reward: 0.5,
            failure_reward: -0.5,
            api_host: "0.0.0.0".into(),
            api_port: 8081,
            trainer_url: None,
        }
    }
}

impl Config {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(v) = lookup("AGL_MODEL_NAME") {
            cfg.model_name = v;
        }
        if let Some(v) = lookup("AGL_OPT_MODEL") {
            cfg.optimization_model = v;
        }
        if let Some(v) = lookup("AGL_DATA_DIR") {
            cfg.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("AGL_API_HOST") {
            cfg.api_host = v;
        }
        cfg.trainer_url = lookup("AGL_TRAINER_URL").filter(|v| !v.trim().is_empty());

        cfg.batch_size = parse_or(&lookup, "AGL_BATCH_SIZE", cfg.batch_size)?;
        cfg.learning_rate = parse_or(&lookup, "AGL_LEARNING_RATE", cfg.learning_rate)?;
        cfg.num_epochs = parse_or(&lookup, "AGL_NUM_EPOCHS", cfg.num_epochs)?;
        cfg.max_samples = parse_or(&lookup, "AGL_MAX_SAMPLES", cfg.max_samples)?;
        cfg.api_port = parse_or(&lookup, "AGL_API_PORT", cfg.api_port)?;
        Ok(cfg)
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}
