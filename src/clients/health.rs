use std::{collections::HashMap, sync::Arc, time::Instant};

use anyhow::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    clients::{database::DatabaseClient, rbmq::RabbitMqClient, smtp::MailTransport},
    models::health::{HealthCheckResponse, HealthStatus, ServiceHealth},
};

const CRITICAL_SERVICES: [&str; 2] = ["database", "message_broker"];

/// A backing service that can report whether its shared connection still works.
#[async_trait]
pub trait ServiceCheck: Send + Sync {
    async fn check(&self) -> Result<(), Error>;
}

#[async_trait]
impl ServiceCheck for DatabaseClient {
    async fn check(&self) -> Result<(), Error> {
        self.health_check().await
    }
}

#[async_trait]
impl ServiceCheck for RabbitMqClient {
    async fn check(&self) -> Result<(), Error> {
        self.health_check().await
    }
}

/// Checks the connections the worker already holds instead of opening new ones.
pub struct HealthChecker {
    database: Arc<dyn ServiceCheck>,
    message_broker: Arc<dyn ServiceCheck>,
    mail_server: Arc<dyn MailTransport>,
}

impl HealthChecker {
    pub fn new(
        database: Arc<dyn ServiceCheck>,
        message_broker: Arc<dyn ServiceCheck>,
        mail_server: Arc<dyn MailTransport>,
    ) -> Self {
        Self {
            database,
            message_broker,
            mail_server,
        }
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        checks.insert(
            "database".to_string(),
            check_service("database", self.database.as_ref()).await,
        );
        checks.insert(
            "message_broker".to_string(),
            check_service("message_broker", self.message_broker.as_ref()).await,
        );
        checks.insert("mail_server".to_string(), self.check_smtp().await);

        HealthCheckResponse {
            status: determine_overall_status(&checks),
            timestamp: Utc::now(),
            checks,
        }
    }

    async fn check_smtp(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.mail_server.connect().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "SMTP health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "SMTP connection failed");
                ServiceHealth::unhealthy(e.to_string())
            }
        }
    }
}

async fn check_service(name: &str, service: &dyn ServiceCheck) -> ServiceHealth {
    let start = Instant::now();

    match service.check().await {
        Ok(()) => {
            let elapsed = start.elapsed().as_millis() as u64;
            debug!(service = name, response_time_ms = elapsed, "Health check passed");
            ServiceHealth::healthy(elapsed)
        }
        Err(e) => {
            warn!(service = name, error = %e, "Health check failed");
            ServiceHealth::unhealthy(e.to_string())
        }
    }
}

/// Losing the database or broker stops the worker; losing the mail server only
/// pushes jobs onto the retry ladder.
pub fn determine_overall_status(checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
    let critical_unhealthy = checks
        .iter()
        .filter(|(name, _)| CRITICAL_SERVICES.contains(&name.as_str()))
        .any(|(_, health)| health.status == HealthStatus::Unhealthy);

    let any_impaired = checks
        .values()
        .any(|health| health.status != HealthStatus::Healthy);

    if critical_unhealthy {
        HealthStatus::Unhealthy
    } else if any_impaired {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
