use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;

use crate::error::JobError;

/// Queue bookkeeping for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobState {
    pub retry_count: u32,
    pub active_at: DateTime<Utc>,
}

/// A dequeued unit of work wrapping a serialized delivery.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    payload: Vec<u8>,
    retry_count: u32,
    active_at: DateTime<Utc>,
    should_retry: bool,
}

impl Job {
    pub fn new(id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            retry_count: 0,
            active_at: Utc::now(),
            should_retry: false,
        }
    }

    pub fn with_state(mut self, retry_count: u32, active_at: DateTime<Utc>) -> Self {
        self.retry_count = retry_count;
        self.active_at = active_at;
        self
    }

    pub fn unmarshal<T: DeserializeOwned>(&self) -> Result<T, JobError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Marks the job for redelivery `delay` from now and bumps the retry counter.
    pub fn retry(&mut self, delay: Duration) {
        self.retry_count += 1;
        self.active_at = Utc::now() + delay;
        self.should_retry = true;
    }

    pub fn state(&self) -> JobState {
        JobState {
            retry_count: self.retry_count,
            active_at: self.active_at,
        }
    }

    pub fn should_retry(&self) -> bool {
        self.should_retry
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}
