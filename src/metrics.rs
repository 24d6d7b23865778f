use anyhow::{Error, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::models::status::DeliveryStatus;

/// Process-wide counters, constructed once at startup and cloned into each component.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub retries: IntCounter,
    pub abandoned: IntCounter,
    pub statuses: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, Error> {
        let registry = Registry::new();

        let retries = IntCounter::new(
            "notifications_retries_total",
            "Delivery jobs rescheduled with backoff",
        )?;
        let abandoned = IntCounter::new(
            "notifications_abandoned_total",
            "Delivery jobs dropped after exhausting retries",
        )?;
        let statuses = IntCounterVec::new(
            Opts::new(
                "notifications_status_total",
                "Delivery outcomes by recorded status",
            ),
            &["status"],
        )?;

        registry.register(Box::new(retries.clone()))?;
        registry.register(Box::new(abandoned.clone()))?;
        registry.register(Box::new(statuses.clone()))?;

        Ok(Self {
            registry,
            retries,
            abandoned,
            statuses,
        })
    }

    pub fn record_status(&self, status: DeliveryStatus) {
        self.statuses.with_label_values(&[status.as_str()]).inc();
    }

    pub fn status_count(&self, status: DeliveryStatus) -> u64 {
        self.statuses.with_label_values(&[status.as_str()]).get()
    }

    pub fn render(&self) -> Result<String, Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
