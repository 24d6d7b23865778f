use anyhow::{Error, Result, anyhow};
use chrono::{DateTime, Utc};
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
    message::Delivery as AmqpDelivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{config::Config, delivery::retry::RetryScheduler, models::job::Job};

pub const RETRY_COUNT_HEADER: &str = "x-retry-count";
pub const ACTIVE_AT_HEADER: &str = "x-active-at";

/// Slack allowed between a job's `active_at` and the moment it is consumed.
pub const DUE_TOLERANCE_MS: i64 = 1_000;

/// Largest `x-message-ttl` the broker accepts.
const MAX_QUEUE_TTL_MS: i64 = u32::MAX as i64;

/// One rung of the backoff ladder: a queue whose messages all expire after `ttl_ms`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryStep {
    pub queue: String,
    pub ttl_ms: i64,
}

/// Delivery queue plus one retry queue per backoff step. Every retry queue
/// dead-letters expired messages back into the delivery queue, and since all
/// messages in a step share its TTL they expire in arrival order.
pub struct RabbitMqClient {
    channel: Channel,
    delivery_queue_name: String,
    ladder: Vec<RetryStep>,
}

impl RabbitMqClient {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        info!("Connecting to RabbitMQ");

        let connection = Connection::connect(&config.rabbitmq_url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|_| anyhow!("RabbitMQ channel creation failed"))?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|_| anyhow!("Failed to set up QoS"))?;

        channel
            .queue_declare(
                &config.delivery_queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|_| anyhow!("Failed to declare delivery queue"))?;

        let ladder = retry_ladder(&config.retry_queue_name, config.max_job_retries);

        for step in &ladder {
            channel
                .queue_declare(
                    &step.queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    retry_arguments(&config.delivery_queue_name, step.ttl_ms),
                )
                .await
                .map_err(|_| anyhow!("Failed to declare retry queue {}", step.queue))?;
        }

        info!(
            delivery_queue = %config.delivery_queue_name,
            retry_queues = ladder.len(),
            "RabbitMQ queues declared"
        );

        Ok(Self {
            channel,
            delivery_queue_name: config.delivery_queue_name.clone(),
            ladder,
        })
    }

    pub async fn create_consumer(&self) -> Result<Consumer, Error> {
        let consumer = self
            .channel
            .basic_consume(
                &self.delivery_queue_name,
                "email_worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|_| anyhow!("Failed to create consumer"))?;

        Ok(consumer)
    }

    pub async fn acknowledge(&self, delivery_tag: u64) -> Result<(), Error> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|_| anyhow!("Failed to acknowledge message"))?;

        Ok(())
    }

    pub async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), Error> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await
            .map_err(|_| anyhow!("Failed to reject message"))?;

        Ok(())
    }

    /// Passively re-declares the delivery queue on the shared channel.
    pub async fn health_check(&self) -> Result<(), Error> {
        self.channel
            .queue_declare(
                &self.delivery_queue_name,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Message broker health check failed: {}", e))?;

        Ok(())
    }

    /// Parks a job in the retry queue matching the time left until its `active_at`.
    pub async fn reschedule(&self, job: &Job) -> Result<(), Error> {
        let state = job.state();
        let remaining_ms = (state.active_at - Utc::now()).num_milliseconds();
        let step = step_for(&self.ladder, remaining_ms)
            .ok_or_else(|| anyhow!("No retry queues declared"))?;

        self.channel
            .basic_publish(
                "",
                &step.queue,
                BasicPublishOptions::default(),
                job.payload(),
                job_properties(job),
            )
            .await
            .map_err(|_| anyhow!("Failed to publish job to retry queue"))?;

        debug!(
            job_id = %job.id,
            retry_count = state.retry_count,
            retry_queue = %step.queue,
            remaining_ms,
            "Job parked in retry queue"
        );

        Ok(())
    }

    pub fn job_from_delivery(delivery: &AmqpDelivery) -> Job {
        job_from_parts(&delivery.properties, delivery.data.clone())
    }
}

/// Steps `0..max_retries` of the `2^N` minute ladder, one queue each.
pub fn retry_ladder(queue_prefix: &str, max_retries: u32) -> Vec<RetryStep> {
    (0..max_retries.max(1))
        .map(|n| RetryScheduler::backoff(n).num_milliseconds())
        .take_while(|ttl_ms| *ttl_ms <= MAX_QUEUE_TTL_MS)
        .map(|ttl_ms| RetryStep {
            queue: format!("{}.{}m", queue_prefix, ttl_ms / 60_000),
            ttl_ms,
        })
        .collect()
}

/// Longest step that does not overshoot `remaining_ms`, falling back to the shortest.
pub fn step_for(ladder: &[RetryStep], remaining_ms: i64) -> Option<&RetryStep> {
    ladder
        .iter()
        .rev()
        .find(|step| step.ttl_ms <= remaining_ms.saturating_add(DUE_TOLERANCE_MS))
        .or_else(|| ladder.first())
}

/// A job consumed well before its `active_at` has to go back to a retry queue.
pub fn is_due(job: &Job, now: DateTime<Utc>) -> bool {
    (job.state().active_at - now).num_milliseconds() <= DUE_TOLERANCE_MS
}

fn retry_arguments(delivery_queue_name: &str, ttl_ms: i64) -> FieldTable {
    let mut arguments = FieldTable::default();
    arguments.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString("".into()),
    );
    arguments.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(delivery_queue_name.into()),
    );
    arguments.insert("x-message-ttl".into(), AMQPValue::LongLongInt(ttl_ms));
    arguments
}

fn job_properties(job: &Job) -> BasicProperties {
    let state = job.state();

    let mut headers = FieldTable::default();
    headers.insert(
        RETRY_COUNT_HEADER.into(),
        AMQPValue::LongLongInt(i64::from(state.retry_count)),
    );
    headers.insert(
        ACTIVE_AT_HEADER.into(),
        AMQPValue::LongLongInt(state.active_at.timestamp_millis()),
    );

    BasicProperties::default()
        .with_delivery_mode(2)
        .with_content_type("application/json".into())
        .with_message_id(job.id.as_str().into())
        .with_headers(headers)
}

fn job_from_parts(properties: &BasicProperties, data: Vec<u8>) -> Job {
    let id = properties
        .message_id()
        .as_ref()
        .map(|id| id.as_str().to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let headers = properties.headers().as_ref();
    let retry_count = headers
        .and_then(|h| header(h, RETRY_COUNT_HEADER))
        .and_then(as_i64)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0);
    let active_at = headers
        .and_then(|h| header(h, ACTIVE_AT_HEADER))
        .and_then(as_i64)
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now);

    Job::new(id, data).with_state(retry_count, active_at)
}

fn header<'a>(headers: &'a FieldTable, name: &str) -> Option<&'a AMQPValue> {
    headers
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == name)
        .map(|(_, value)| value)
}

fn as_i64(value: &AMQPValue) -> Option<i64> {
    match value {
        AMQPValue::LongLongInt(n) => Some(*n),
        AMQPValue::LongInt(n) => Some(i64::from(*n)),
        AMQPValue::LongUInt(n) => Some(i64::from(*n)),
        AMQPValue::ShortInt(n) => Some(i64::from(*n)),
        AMQPValue::ShortUInt(n) => Some(i64::from(*n)),
        AMQPValue::Timestamp(n) => i64::try_from(*n).ok(),
        _ => None,
    }
}
