use std::sync::Arc;

use tracing::{Instrument, Span, error, info, info_span, warn};

use crate::{
    clients::{
        database::{ReceiptsRepository, Registries},
        identity::{TokenLoader, UserDirectory},
        smtp::MailTransport,
    },
    delivery::{
        cloak::Cloak, gate::SubscriptionGate, packager::Packager, recipients::RecipientResolver,
        retry::RetryScheduler, status::StatusTracker, templates::TemplateResolver,
    },
    error::PackError,
    metrics::Metrics,
    models::{delivery::Delivery, job::Job, status::DeliveryStatus},
};

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub sender: String,
    pub domain: String,
    pub max_retries: u32,
}

/// Runs one job through receipt, recipient lookup, gate, compile and send.
///
/// `process` never fails: every error ends as a recorded status, a retry
/// request on the job, or both.
pub struct DeliveryProcessor {
    receipts: Arc<dyn ReceiptsRepository>,
    token_loader: Arc<dyn TokenLoader>,
    recipients: RecipientResolver,
    gate: SubscriptionGate,
    packager: Packager,
    transport: Arc<dyn MailTransport>,
    status: StatusTracker,
    retry: RetryScheduler,
    settings: ProcessorSettings,
}

impl DeliveryProcessor {
    pub fn new(
        registries: Registries,
        token_loader: Arc<dyn TokenLoader>,
        users: Arc<dyn UserDirectory>,
        transport: Arc<dyn MailTransport>,
        cloak: Cloak,
        settings: ProcessorSettings,
        metrics: Metrics,
    ) -> Self {
        let status = StatusTracker::new(registries.statuses.clone(), metrics.clone());
        let templates = TemplateResolver::new(
            registries.kinds.clone(),
            registries.clients.clone(),
            registries.templates.clone(),
        );

        Self {
            receipts: registries.receipts.clone(),
            token_loader,
            recipients: RecipientResolver::new(users),
            gate: SubscriptionGate::new(
                registries.kinds.clone(),
                registries.unsubscribes.clone(),
                status.clone(),
            ),
            packager: Packager::new(templates, cloak),
            transport,
            status,
            retry: RetryScheduler::new(settings.max_retries, metrics),
            settings,
        }
    }

    pub async fn process(&self, job: &mut Job) {
        let delivery: Delivery = match job.unmarshal() {
            Ok(delivery) => delivery,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "payload-unmarshal-failed");
                self.retry.handle(job);
                return;
            }
        };

        let span = info_span!(
            "delivery",
            message_id = %delivery.message_id,
            correlation_id = %delivery.vcap_request_id,
            recipient = %delivery.email,
        );

        self.run(job, delivery).instrument(span).await;
    }

    async fn run(&self, job: &mut Job, mut delivery: Delivery) {
        info!(
            user_guid = %delivery.user_guid,
            client_id = %delivery.client_id,
            kind_id = %delivery.kind_id,
            retry_count = job.state().retry_count,
            "delivery-start"
        );

        if let Err(e) = self
            .receipts
            .create_receipts(
                std::slice::from_ref(&delivery.user_guid),
                &delivery.client_id,
                &delivery.kind_id,
            )
            .await
        {
            error!(error = %e, "receipt-create-failed");
            self.retry.handle(job);
            return;
        }

        if delivery.email.is_empty() {
            let Some(email) = self.resolve_email(&delivery).await else {
                self.retry.handle(job);
                return;
            };

            Span::current().record("recipient", email.as_str());
            delivery.email = email;
        }

        if !self.gate.evaluate(&delivery).await.is_deliverable() {
            return;
        }

        let status = self.deliver(&delivery).await;
        self.status
            .update(&delivery.message_id, status, delivery.campaign_id.as_deref())
            .await;

        if status != DeliveryStatus::Delivered {
            self.retry.handle(job);
        }
    }

    /// First address on the user's identity record, possibly empty.
    /// `None` means the lookup itself failed and the job should be retried.
    async fn resolve_email(&self, delivery: &Delivery) -> Option<String> {
        let token = match self.token_loader.load(&delivery.uaa_host).await {
            Ok(token) => token,
            Err(e) => {
                error!(
                    uaa_host = %delivery.uaa_host,
                    transient = e.is_transient(),
                    error = %e,
                    "token-load-failed"
                );
                return None;
            }
        };

        let mut users = match self
            .recipients
            .load(std::slice::from_ref(&delivery.user_guid), &token)
            .await
        {
            Ok(users) => users,
            Err(e) => {
                error!(transient = e.is_transient(), error = %e, "user-lookup-failed");
                return None;
            }
        };

        let Some(user) = users.remove(&delivery.user_guid) else {
            warn!(user_guid = %delivery.user_guid, "user-lookup-failed");
            return None;
        };

        Some(user.emails.into_iter().next().unwrap_or_default())
    }

    async fn deliver(&self, delivery: &Delivery) -> DeliveryStatus {
        let context = match self
            .packager
            .prepare_context(delivery, &self.settings.sender, &self.settings.domain)
            .await
        {
            Ok(context) => context,
            Err(PackError::Templates(e)) => {
                error!(error = %e, "template-load-failed");
                return DeliveryStatus::Failed;
            }
            Err(e) => {
                error!(error = %e, "template-pack-failed");
                return DeliveryStatus::Failed;
            }
        };

        let message = match self.packager.pack(&context) {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, "template-pack-failed");
                return DeliveryStatus::Failed;
            }
        };

        if let Err(e) = self.transport.connect().await {
            error!(error = %e, "smtp-connection-error");
            return DeliveryStatus::Failed;
        }

        if let Err(e) = self.transport.send(&message).await {
            error!(error = %e, "delivery-failed-smtp-error");
            return DeliveryStatus::Failed;
        }

        info!(parts = message.parts.len(), "message-sent");
        DeliveryStatus::Delivered
    }
}
