use std::sync::Arc;

use anyhow::{Error, Result};
use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::{
    clients::rbmq::{RabbitMqClient, is_due},
    delivery::processor::DeliveryProcessor,
};

/// Consumes the delivery queue, running at most `concurrency` jobs at once.
///
/// Each job is settled after processing: rescheduled jobs are republished to
/// a retry queue before the consumed delivery is acked. Jobs that arrive before
/// their `active_at` are parked again without being processed. Returns when the
/// consumer stream ends.
pub async fn run_worker(
    rabbitmq: Arc<RabbitMqClient>,
    processor: Arc<DeliveryProcessor>,
    concurrency: usize,
) -> Result<(), Error> {
    let mut consumer = rabbitmq.create_consumer().await?;
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));

    info!(concurrency, "Worker started, waiting for jobs");

    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(e) => {
                error!(error = %e, "Failed to receive message from queue");
                continue;
            }
        };

        let permit = Arc::clone(&permits).acquire_owned().await?;
        let rabbitmq = Arc::clone(&rabbitmq);
        let processor = Arc::clone(&processor);

        tokio::spawn(async move {
            let mut job = RabbitMqClient::job_from_delivery(&delivery);

            let due = is_due(&job, Utc::now());
            if due {
                processor.process(&mut job).await;
            } else {
                debug!(
                    job_id = %job.id,
                    active_at = %job.state().active_at.to_rfc3339(),
                    "Job consumed before it was due"
                );
            }

            if !due || job.should_retry() {
                if let Err(e) = rabbitmq.reschedule(&job).await {
                    warn!(job_id = %job.id, error = %e, "Failed to reschedule job, requeueing");
                    if let Err(e) = rabbitmq.reject(delivery.delivery_tag, true).await {
                        error!(job_id = %job.id, error = %e, "Failed to requeue job");
                    }
                    drop(permit);
                    return;
                }
            }

            if let Err(e) = rabbitmq.acknowledge(delivery.delivery_tag).await {
                error!(job_id = %job.id, error = %e, "Failed to acknowledge job");
            }

            drop(permit);
        });
    }

    warn!("Consumer stream ended");

    Ok(())
}
