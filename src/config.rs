use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::{
    clients::{identity::IdentityConfig, smtp::SmtpConfig},
    delivery::retry::DEFAULT_MAX_RETRIES,
    models::retry::RetryConfig,
};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: String,
    pub delivery_queue_name: String,
    pub retry_queue_name: String,
    pub prefetch_count: u16,

    pub database_url: String,

    pub uaa_client_id: String,
    pub uaa_client_secret: String,
    #[serde(default = "default_uaa_max_url_length")]
    pub uaa_max_url_length: usize,
    #[serde(default = "default_uaa_page_size")]
    pub uaa_page_size: usize,

    pub smtp_host: String,
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_user: Option<String>,
    #[serde(default)]
    pub smtp_pass: Option<String>,
    #[serde(default)]
    pub smtp_tls: bool,
    #[serde(default = "default_smtp_timeout_seconds")]
    pub smtp_timeout_seconds: u64,

    pub sender: String,
    pub domain: String,
    pub encryption_key: String,

    #[serde(default = "default_max_job_retries")]
    pub max_job_retries: u32,

    pub max_retry_attempts: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub retry_backoff_multiplier: u64,

    pub worker_concurrency: usize,

    pub server_port: u16,
}

fn default_uaa_max_url_length() -> usize {
    8000
}

fn default_uaa_page_size() -> usize {
    100
}

fn default_smtp_timeout_seconds() -> u64 {
    30
}

fn default_max_job_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        Ok(config)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn identity_config(&self) -> IdentityConfig {
        IdentityConfig {
            client_id: self.uaa_client_id.clone(),
            client_secret: self.uaa_client_secret.clone(),
            max_url_length: self.uaa_max_url_length,
            page_size: self.uaa_page_size,
        }
    }

    pub fn smtp_config(&self) -> SmtpConfig {
        SmtpConfig {
            host: self.smtp_host.clone(),
            port: self.smtp_port,
            username: self.smtp_user.clone(),
            password: self.smtp_pass.clone(),
            use_tls: self.smtp_tls,
            timeout_seconds: self.smtp_timeout_seconds,
            domain: self.domain.clone(),
        }
    }
}
