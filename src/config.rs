//! Orchestrator configuration
//!
//! Loaded from the process environment (and `.env` when present).
//! Invalid values are fatal: the orchestrator refuses to start.

use crate::error::{OrchestrationError, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_FALLBACK_MESSAGE: &str =
    "I apologize, but I'm experiencing technical difficulties. Please try again in a moment.";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub environment: String,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub max_requests_per_minute: usize,
    pub rate_limit_enabled: bool,
    pub metrics_window_size: usize,
    pub request_max_length: usize,
    /// Upper bound for a single dispatch attempt
    pub call_timeout: Duration,
    pub sample_interval: Duration,
    /// `None` surfaces the last error once retries are exhausted
    pub fallback_message: Option<String>,
    pub ollama_base_url: String,
    pub ollama_model: String,
    pub model_temperature: f32,
    pub port: u16,
    pub log_level: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(1000),
            max_requests_per_minute: 60,
            rate_limit_enabled: true,
            metrics_window_size: 100,
            request_max_length: 1000,
            call_timeout: Duration::from_secs(60),
            sample_interval: Duration::from_secs(30),
            fallback_message: Some(DEFAULT_FALLBACK_MESSAGE.to_string()),
            ollama_base_url: "http://localhost:11434".to_string(),
            ollama_model: "llama3.2:3b".to_string(),
            model_temperature: 0.1,
            port: 8000,
            log_level: "info".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from the environment, falling back to defaults for unset keys
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let fallback_message = match lookup("FALLBACK_MESSAGE") {
            Some(msg) if msg.trim().is_empty() => None,
            Some(msg) => Some(msg),
            None => defaults.fallback_message,
        };

        let call_timeout_secs = match lookup("CALL_TIMEOUT_SECS") {
            Some(v) => parse_value("CALL_TIMEOUT_SECS", &v)?,
            None => parse_or("MODEL_TIMEOUT", &lookup, defaults.call_timeout.as_secs())?,
        };

        let port = match lookup("PORT") {
            Some(v) => parse_value("PORT", &v)?,
            None => parse_or("API_PORT", &lookup, defaults.port)?,
        };

        let config = Self {
            environment: lookup("ENVIRONMENT").unwrap_or(defaults.environment),
            max_retries: parse_or("MAX_RETRIES", &lookup, defaults.max_retries)?,
            retry_base_delay: Duration::from_millis(parse_or(
                "RETRY_BASE_DELAY_MS",
                &lookup,
                defaults.retry_base_delay.as_millis() as u64,
            )?),
            max_requests_per_minute: parse_or(
                "MAX_REQUESTS_PER_MINUTE",
                &lookup,
                defaults.max_requests_per_minute,
            )?,
            rate_limit_enabled: parse_bool_or(
                "RATE_LIMIT_ENABLED",
                &lookup,
                defaults.rate_limit_enabled,
            )?,
            metrics_window_size: parse_or(
                "METRICS_WINDOW_SIZE",
                &lookup,
                defaults.metrics_window_size,
            )?,
            request_max_length: parse_or(
                "REQUEST_MAX_LENGTH",
                &lookup,
                defaults.request_max_length,
            )?,
            call_timeout: Duration::from_secs(call_timeout_secs),
            sample_interval: Duration::from_secs(parse_or(
                "SAMPLE_INTERVAL_SECS",
                &lookup,
                defaults.sample_interval.as_secs(),
            )?),
            fallback_message,
            ollama_base_url: lookup("OLLAMA_BASE_URL").unwrap_or(defaults.ollama_base_url),
            ollama_model: lookup("OLLAMA_MODEL").unwrap_or(defaults.ollama_model),
            model_temperature: parse_or(
                "MODEL_TEMPERATURE",
                &lookup,
                defaults.model_temperature,
            )?,
            port,
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rate_limit_enabled && self.max_requests_per_minute == 0 {
            return Err(config_error(
                "MAX_REQUESTS_PER_MINUTE must be > 0 when rate limiting is enabled",
            ));
        }
        if self.metrics_window_size == 0 {
            return Err(config_error("METRICS_WINDOW_SIZE must be > 0"));
        }
        if self.request_max_length == 0 {
            return Err(config_error("REQUEST_MAX_LENGTH must be > 0"));
        }
        if self.call_timeout.is_zero() {
            return Err(config_error("CALL_TIMEOUT_SECS must be > 0"));
        }
        if self.sample_interval.is_zero() {
            return Err(config_error("SAMPLE_INTERVAL_SECS must be > 0"));
        }
        if !(0.0..=2.0).contains(&self.model_temperature) {
            return Err(config_error("MODEL_TEMPERATURE must be within [0, 2]"));
        }
        if !self.rate_limit_enabled {
            warn!(
                environment = %self.environment,
                "Rate limiting is disabled; every caller is admitted"
            );
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

fn config_error(msg: &str) -> OrchestrationError {
    OrchestrationError::Configuration(msg.to_string())
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse::<T>().map_err(|_| {
        OrchestrationError::Configuration(format!("{} has an invalid value: {:?}", key, raw))
    })
}

fn parse_or<T, F>(key: &str, lookup: &F, default: T) -> Result<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_bool_or<F>(key: &str, lookup: &F, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(OrchestrationError::Configuration(format!(
                "{} must be a boolean, got {:?}",
                key, v
            ))),
        },
    }
}
