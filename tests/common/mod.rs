#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use email_service::{
    clients::{
        database::{
            ClientsRepository, KindsRepository, MessageStatusRepository, ReceiptsRepository,
            Registries, TemplatesRepository, UnsubscribesRepository,
        },
        identity::{TokenLoader, UserDirectory},
        smtp::MailTransport,
    },
    delivery::{
        cloak::Cloak,
        processor::{DeliveryProcessor, ProcessorSettings},
    },
    error::{IdentityError, RegistryError, TransportError},
    metrics::Metrics,
    models::{
        delivery::{Delivery, Html, Identity, Options},
        job::Job,
        message::Message,
        registry::{Client, Kind, UserRecord},
        status::{DeliveryStatus, MessageStatus},
        template::Template,
    },
};

pub const USER_ID: &str = "user-123";
pub const CLIENT_ID: &str = "client-123";
pub const KIND_ID: &str = "kind-123";
pub const UAA_HOST: &str = "https://uaa.example.com";
pub const SENDER: &str = "no-reply@notifications.example.com";
pub const DOMAIN: &str = "notifications.example.com";
pub const CLOAK_KEY: &[u8] = b"test-encryption-key";

#[derive(Default)]
pub struct RegistryState {
    pub kinds: HashMap<(String, String), Kind>,
    pub clients: HashMap<String, Client>,
    pub templates: HashMap<String, Template>,
    pub global_unsubscribes: HashSet<String>,
    pub kind_unsubscribes: HashSet<(String, String, String)>,
    pub receipts: HashMap<(String, String, String), u32>,
    pub statuses: HashMap<String, MessageStatus>,
    pub status_writes: usize,

    pub fail_kind_lookup: bool,
    pub fail_unsubscribe_lookup: bool,
    pub fail_receipts: bool,
    pub fail_status_upsert: bool,
}

/// In-memory stand-in for every registry.
#[derive(Default)]
pub struct FakeRegistry {
    state: Mutex<RegistryState>,
}

impl FakeRegistry {
    /// A client and a non-critical kind, both on the default template.
    pub fn seeded() -> Self {
        let registry = Self::default();
        registry.add_client(CLIENT_ID, "default");
        registry.add_kind(KIND_ID, CLIENT_ID, false, "default");
        registry
    }

    pub fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap()
    }

    pub fn add_kind(&self, id: &str, client_id: &str, critical: bool, template_id: &str) {
        self.state().kinds.insert(
            (id.to_string(), client_id.to_string()),
            Kind {
                id: id.to_string(),
                client_id: client_id.to_string(),
                description: format!("{} description", id),
                critical,
                template_id: template_id.to_string(),
            },
        );
    }

    pub fn add_client(&self, id: &str, template_id: &str) {
        self.state().clients.insert(
            id.to_string(),
            Client {
                id: id.to_string(),
                description: format!("{} description", id),
                template_id: template_id.to_string(),
            },
        );
    }

    pub fn add_template(&self, id: &str, subject: &str, text: &str, html: &str) {
        self.state().templates.insert(
            id.to_string(),
            Template {
                id: id.to_string(),
                name: format!("{} template", id),
                subject: subject.to_string(),
                text: text.to_string(),
                html: html.to_string(),
            },
        );
    }

    pub fn unsubscribe_globally(&self, user_guid: &str) {
        self.state().global_unsubscribes.insert(user_guid.to_string());
    }

    pub fn unsubscribe_from_kind(&self, user_guid: &str, client_id: &str, kind_id: &str) {
        self.state().kind_unsubscribes.insert((
            user_guid.to_string(),
            client_id.to_string(),
            kind_id.to_string(),
        ));
    }

    pub fn status(&self, message_id: &str) -> Option<DeliveryStatus> {
        self.state().statuses.get(message_id).map(|m| m.status)
    }

    pub fn receipt_count(&self, user_guid: &str, client_id: &str, kind_id: &str) -> u32 {
        self.state()
            .receipts
            .get(&(
                user_guid.to_string(),
                client_id.to_string(),
                kind_id.to_string(),
            ))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl KindsRepository for FakeRegistry {
    async fn find_kind(&self, kind_id: &str, client_id: &str) -> Result<Kind, RegistryError> {
        let state = self.state();
        if state.fail_kind_lookup {
            return Err(RegistryError::Database("connection reset".to_string()));
        }

        state
            .kinds
            .get(&(kind_id.to_string(), client_id.to_string()))
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(format!("kind {}", kind_id)))
    }
}

#[async_trait]
impl ClientsRepository for FakeRegistry {
    async fn find_client(&self, client_id: &str) -> Result<Client, RegistryError> {
        self.state()
            .clients
            .get(client_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(format!("client {}", client_id)))
    }
}

#[async_trait]
impl TemplatesRepository for FakeRegistry {
    async fn find_template_by_id(&self, template_id: &str) -> Result<Template, RegistryError> {
        self.state()
            .templates
            .get(template_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(format!("template {}", template_id)))
    }
}

#[async_trait]
impl UnsubscribesRepository for FakeRegistry {
    async fn get_global(&self, user_guid: &str) -> Result<bool, RegistryError> {
        let state = self.state();
        if state.fail_unsubscribe_lookup {
            return Err(RegistryError::Database("connection reset".to_string()));
        }

        Ok(state.global_unsubscribes.contains(user_guid))
    }

    async fn get_per_kind(
        &self,
        user_guid: &str,
        client_id: &str,
        kind_id: &str,
    ) -> Result<bool, RegistryError> {
        let state = self.state();
        if state.fail_unsubscribe_lookup {
            return Err(RegistryError::Database("connection reset".to_string()));
        }

        Ok(state.kind_unsubscribes.contains(&(
            user_guid.to_string(),
            client_id.to_string(),
            kind_id.to_string(),
        )))
    }
}

#[async_trait]
impl ReceiptsRepository for FakeRegistry {
    async fn create_receipts(
        &self,
        user_guids: &[String],
        client_id: &str,
        kind_id: &str,
    ) -> Result<(), RegistryError> {
        let mut state = self.state();
        if state.fail_receipts {
            return Err(RegistryError::Database("receipts table locked".to_string()));
        }

        for user_guid in user_guids {
            *state
                .receipts
                .entry((
                    user_guid.clone(),
                    client_id.to_string(),
                    kind_id.to_string(),
                ))
                .or_insert(0) += 1;
        }

        Ok(())
    }
}

#[async_trait]
impl MessageStatusRepository for FakeRegistry {
    async fn upsert(&self, message: MessageStatus) -> Result<(), RegistryError> {
        let mut state = self.state();
        if state.fail_status_upsert {
            return Err(RegistryError::Database("messages table locked".to_string()));
        }

        state.status_writes += 1;
        state.statuses.insert(message.id.clone(), message);
        Ok(())
    }
}

/// Identity service that knows a fixed set of users.
#[derive(Default)]
pub struct FakeIdentity {
    users: Mutex<HashMap<String, Vec<String>>>,
    token_error: Mutex<Option<IdentityError>>,
    lookup_error: Mutex<Option<IdentityError>>,
    pub token_loads: AtomicUsize,
    pub lookups: AtomicUsize,
}

impl FakeIdentity {
    pub fn with_user(self, id: &str, emails: &[&str]) -> Self {
        self.users.lock().unwrap().insert(
            id.to_string(),
            emails.iter().map(|e| e.to_string()).collect(),
        );
        self
    }

    pub fn fail_token(&self, error: IdentityError) {
        *self.token_error.lock().unwrap() = Some(error);
    }

    pub fn fail_lookup(&self, error: IdentityError) {
        *self.lookup_error.lock().unwrap() = Some(error);
    }
}

#[async_trait]
impl TokenLoader for FakeIdentity {
    async fn load(&self, uaa_host: &str) -> Result<String, IdentityError> {
        self.token_loads.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.token_error.lock().unwrap().clone() {
            return Err(error);
        }

        Ok(format!("token-for-{}", uaa_host))
    }
}

#[async_trait]
impl UserDirectory for FakeIdentity {
    async fn users_emails_by_ids(
        &self,
        _token: &str,
        ids: &[String],
    ) -> Result<Vec<UserRecord>, IdentityError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.lookup_error.lock().unwrap().clone() {
            return Err(error);
        }

        let users = self.users.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| {
                users.get(id).map(|emails| UserRecord {
                    id: id.clone(),
                    emails: emails.clone(),
                })
            })
            .collect())
    }
}

/// Transport that records every message it is asked to send.
#[derive(Default)]
pub struct FakeTransport {
    pub sent: Mutex<Vec<Message>>,
    pub fail_connect: AtomicBool,
    pub fail_send: AtomicBool,
}

impl FakeTransport {
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for FakeTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::Connection("connection refused".to_string()));
        }
        Ok(())
    }

    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(TransportError::Send("554 transaction failed".to_string()));
        }

        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

pub struct Harness {
    pub registry: Arc<FakeRegistry>,
    pub identity: Arc<FakeIdentity>,
    pub transport: Arc<FakeTransport>,
    pub metrics: Metrics,
    pub processor: DeliveryProcessor,
}

impl Harness {
    pub fn new(registry: FakeRegistry, identity: FakeIdentity) -> Result<Self> {
        let registry = Arc::new(registry);
        let identity = Arc::new(identity);
        let transport = Arc::new(FakeTransport::default());
        let metrics = Metrics::new()?;

        let processor = DeliveryProcessor::new(
            Registries::shared(registry.clone()),
            identity.clone(),
            identity.clone(),
            transport.clone(),
            Cloak::new(CLOAK_KEY)?,
            ProcessorSettings {
                sender: SENDER.to_string(),
                domain: DOMAIN.to_string(),
                max_retries: 10,
            },
            metrics.clone(),
        );

        Ok(Self {
            registry,
            identity,
            transport,
            metrics,
            processor,
        })
    }

    pub fn seeded() -> Result<Self> {
        Self::new(
            FakeRegistry::seeded(),
            FakeIdentity::default().with_user(USER_ID, &["user@example.com"]),
        )
    }
}

pub fn cloak() -> Cloak {
    Cloak::new(CLOAK_KEY).unwrap()
}

pub fn delivery(message_id: &str) -> Delivery {
    Delivery {
        message_id: message_id.to_string(),
        user_guid: USER_ID.to_string(),
        email: String::new(),
        client_id: CLIENT_ID.to_string(),
        kind_id: KIND_ID.to_string(),
        options: Options {
            subject: "Your build finished".to_string(),
            text: "Build 42 passed.".to_string(),
            html: Html {
                body_content: "<p>Build 42 passed.</p>".to_string(),
                ..Html::default()
            },
            ..Options::default()
        },
        space: Identity {
            guid: "space-guid".to_string(),
            name: "production".to_string(),
        },
        organization: Identity {
            guid: "org-guid".to_string(),
            name: "acme".to_string(),
        },
        scope: String::new(),
        uaa_host: UAA_HOST.to_string(),
        vcap_request_id: "request-abc".to_string(),
        request_received: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
        campaign_id: None,
    }
}

pub fn job_for(delivery: &Delivery) -> Job {
    Job::new(
        format!("job-{}", delivery.message_id),
        serde_json::to_vec(delivery).unwrap(),
    )
}
