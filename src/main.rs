use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use email_service::{
    api::run_api_server,
    clients::{
        database::{DatabaseClient, Registries},
        health::HealthChecker,
        identity::UaaClient,
        rbmq::RabbitMqClient,
        smtp::SmtpClient,
    },
    config::Config,
    delivery::{
        cloak::Cloak,
        processor::{DeliveryProcessor, ProcessorSettings},
    },
    metrics::Metrics,
    worker::run_worker,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let config = Config::load()?;

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let metrics = Metrics::new()?;

    let database = Arc::new(DatabaseClient::connect(&config.database_url).await?);
    let identity = Arc::new(UaaClient::new(
        config.identity_config(),
        config.retry_config(),
    )?);
    let transport = Arc::new(SmtpClient::new(&config.smtp_config())?);
    let cloak = Cloak::new(config.encryption_key.as_bytes())?;
    let rabbitmq = Arc::new(RabbitMqClient::connect(&config).await?);

    let processor = Arc::new(DeliveryProcessor::new(
        Registries::shared(database.clone()),
        identity.clone(),
        identity,
        transport.clone(),
        cloak,
        ProcessorSettings {
            sender: config.sender.clone(),
            domain: config.domain.clone(),
            max_retries: config.max_job_retries,
        },
        metrics.clone(),
    ));

    let health_checker = HealthChecker::new(database, rabbitmq.clone(), transport);
    let api_port = config.server_port;
    let api_metrics = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = run_api_server(api_port, health_checker, api_metrics).await {
            error!(error = %e, "Health check server stopped");
        }
    });

    info!(
        delivery_queue = %config.delivery_queue_name,
        sender = %config.sender,
        "Email service ready"
    );

    run_worker(rabbitmq, processor, config.worker_concurrency).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_target(false)
        .init();
}
