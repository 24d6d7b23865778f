use std::sync::Arc;

use tracing::{debug, error};

use crate::{
    clients::database::MessageStatusRepository,
    metrics::Metrics,
    models::status::{DeliveryStatus, MessageStatus},
};

/// Best-effort status persistence. A failed write is logged, never retried.
#[derive(Clone)]
pub struct StatusTracker {
    repository: Arc<dyn MessageStatusRepository>,
    metrics: Metrics,
}

impl StatusTracker {
    pub fn new(repository: Arc<dyn MessageStatusRepository>, metrics: Metrics) -> Self {
        Self {
            repository,
            metrics,
        }
    }

    pub async fn update(&self, message_id: &str, status: DeliveryStatus, campaign_id: Option<&str>) {
        self.metrics.record_status(status);

        let message = MessageStatus {
            id: message_id.to_string(),
            status,
            campaign_id: campaign_id.map(str::to_string),
        };

        match self.repository.upsert(message).await {
            Ok(()) => debug!(message_id, %status, "Message status recorded"),
            Err(e) => error!(message_id, %status, error = %e, "failed-message-status-upsert"),
        }
    }
}
