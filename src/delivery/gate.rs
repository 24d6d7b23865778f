use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    clients::database::{KindsRepository, UnsubscribesRepository},
    delivery::status::StatusTracker,
    error::RegistryError,
    models::{delivery::Delivery, status::DeliveryStatus},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Deliver,
    GlobalUnsubscribe,
    KindUnsubscribe,
    MissingAddress,
    MalformedAddress,
}

impl Verdict {
    pub fn is_deliverable(&self) -> bool {
        matches!(self, Verdict::Deliver)
    }
}

/// Decides whether a delivery may be sent, and records `undeliverable`
/// whenever it refuses.
#[derive(Clone)]
pub struct SubscriptionGate {
    kinds: Arc<dyn KindsRepository>,
    unsubscribes: Arc<dyn UnsubscribesRepository>,
    status: StatusTracker,
}

impl SubscriptionGate {
    pub fn new(
        kinds: Arc<dyn KindsRepository>,
        unsubscribes: Arc<dyn UnsubscribesRepository>,
        status: StatusTracker,
    ) -> Self {
        Self {
            kinds,
            unsubscribes,
            status,
        }
    }

    pub async fn evaluate(&self, delivery: &Delivery) -> Verdict {
        let verdict = self.judge(delivery).await;

        if !verdict.is_deliverable() {
            self.status
                .update(
                    &delivery.message_id,
                    DeliveryStatus::Undeliverable,
                    delivery.campaign_id.as_deref(),
                )
                .await;
        }

        verdict
    }

    async fn judge(&self, delivery: &Delivery) -> Verdict {
        if self.is_critical(delivery).await {
            debug!(kind_id = %delivery.kind_id, "Critical kind bypasses unsubscribes");
            return Verdict::Deliver;
        }

        // A failed lookup counts as unsubscribed.
        match self.unsubscribes.get_global(&delivery.user_guid).await {
            Ok(false) => {}
            Ok(true) => {
                info!(scope = "global", "user-unsubscribed");
                return Verdict::GlobalUnsubscribe;
            }
            Err(e) => {
                warn!(scope = "global", error = %e, "user-unsubscribed");
                return Verdict::GlobalUnsubscribe;
            }
        }

        match self
            .unsubscribes
            .get_per_kind(&delivery.user_guid, &delivery.client_id, &delivery.kind_id)
            .await
        {
            Ok(false) => {}
            Ok(true) => {
                info!(scope = "kind", "user-unsubscribed");
                return Verdict::KindUnsubscribe;
            }
            Err(e) => {
                warn!(scope = "kind", error = %e, "user-unsubscribed");
                return Verdict::KindUnsubscribe;
            }
        }

        if delivery.email.is_empty() {
            info!("no-email-address-for-user");
            return Verdict::MissingAddress;
        }

        if !delivery.email.contains('@') {
            info!("malformatted-email-address");
            return Verdict::MalformedAddress;
        }

        Verdict::Deliver
    }

    async fn is_critical(&self, delivery: &Delivery) -> bool {
        if delivery.kind_id.is_empty() {
            return false;
        }

        match self
            .kinds
            .find_kind(&delivery.kind_id, &delivery.client_id)
            .await
        {
            Ok(kind) => kind.critical,
            Err(RegistryError::NotFound(_)) => false,
            Err(e) => {
                warn!(error = %e, "Kind lookup failed, treating kind as not critical");
                false
            }
        }
    }
}
