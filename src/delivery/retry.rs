use chrono::Duration;
use tracing::{info, warn};

use crate::{metrics::Metrics, models::job::Job};

pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Reschedules failed jobs on a `2^N` minute ladder until `max_retries` is reached.
#[derive(Clone)]
pub struct RetryScheduler {
    max_retries: u32,
    metrics: Metrics,
}

impl RetryScheduler {
    pub fn new(max_retries: u32, metrics: Metrics) -> Self {
        Self {
            max_retries,
            metrics,
        }
    }

    pub fn backoff(retry_count: u32) -> Duration {
        Duration::minutes(1_i64 << retry_count.min(32))
    }

    pub fn handle(&self, job: &mut Job) {
        let retry_count = job.state().retry_count;

        if retry_count >= self.max_retries {
            self.metrics.abandoned.inc();
            warn!(
                job_id = %job.id,
                retry_count,
                max_retries = self.max_retries,
                "delivery-abandoned"
            );
            return;
        }

        job.retry(Self::backoff(retry_count));
        self.metrics.retries.inc();

        let state = job.state();
        info!(
            job_id = %job.id,
            retry_count = state.retry_count,
            active_at = %state.active_at.to_rfc3339(),
            "delivery-retry"
        );
    }
}
