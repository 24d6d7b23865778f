use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use tokio_postgres::{Client as PgClient, NoTls, Row};
use tracing::{debug, error, info};

use crate::{
    error::RegistryError,
    models::{
        registry::{Client, Kind},
        status::MessageStatus,
        template::Template,
    },
};

#[async_trait]
pub trait KindsRepository: Send + Sync {
    async fn find_kind(&self, kind_id: &str, client_id: &str) -> Result<Kind, RegistryError>;
}

#[async_trait]
pub trait ClientsRepository: Send + Sync {
    async fn find_client(&self, client_id: &str) -> Result<Client, RegistryError>;
}

#[async_trait]
pub trait TemplatesRepository: Send + Sync {
    async fn find_template_by_id(&self, template_id: &str) -> Result<Template, RegistryError>;
}

#[async_trait]
pub trait UnsubscribesRepository: Send + Sync {
    async fn get_global(&self, user_guid: &str) -> Result<bool, RegistryError>;

    async fn get_per_kind(
        &self,
        user_guid: &str,
        client_id: &str,
        kind_id: &str,
    ) -> Result<bool, RegistryError>;
}

#[async_trait]
pub trait ReceiptsRepository: Send + Sync {
    /// Records that a notification was attempted. Repeating a receipt is not an error.
    async fn create_receipts(
        &self,
        user_guids: &[String],
        client_id: &str,
        kind_id: &str,
    ) -> Result<(), RegistryError>;
}

#[async_trait]
pub trait MessageStatusRepository: Send + Sync {
    async fn upsert(&self, message: MessageStatus) -> Result<(), RegistryError>;
}

/// Every registry the engine reads or writes, as trait objects.
#[derive(Clone)]
pub struct Registries {
    pub kinds: Arc<dyn KindsRepository>,
    pub clients: Arc<dyn ClientsRepository>,
    pub templates: Arc<dyn TemplatesRepository>,
    pub unsubscribes: Arc<dyn UnsubscribesRepository>,
    pub receipts: Arc<dyn ReceiptsRepository>,
    pub statuses: Arc<dyn MessageStatusRepository>,
}

impl Registries {
    /// Uses one backing store for every registry.
    pub fn shared<R>(store: Arc<R>) -> Self
    where
        R: KindsRepository
            + ClientsRepository
            + TemplatesRepository
            + UnsubscribesRepository
            + ReceiptsRepository
            + MessageStatusRepository
            + 'static,
    {
        Self {
            kinds: store.clone(),
            clients: store.clone(),
            templates: store.clone(),
            unsubscribes: store.clone(),
            receipts: store.clone(),
            statuses: store,
        }
    }
}

pub struct DatabaseClient {
    client: PgClient,
}

impl DatabaseClient {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        info!("Connecting to PostgreSQL database");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        info!("PostgreSQL connection established");

        Ok(Self { client })
    }

    pub async fn health_check(&self) -> Result<(), Error> {
        self.client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| anyhow!("Database health check failed: {}", e))?;

        Ok(())
    }
}

fn template_from_row(row: &Row) -> Result<Template, RegistryError> {
    Ok(Template {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        subject: row.try_get("subject")?,
        text: row.try_get("text")?,
        html: row.try_get("html")?,
    })
}

#[async_trait]
impl KindsRepository for DatabaseClient {
    async fn find_kind(&self, kind_id: &str, client_id: &str) -> Result<Kind, RegistryError> {
        let row = self
            .client
            .query_opt(
                "SELECT id, client_id, description, critical, template_id \
                 FROM kinds WHERE id = $1 AND client_id = $2",
                &[&kind_id, &client_id],
            )
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("kind {}", kind_id)))?;

        Ok(Kind {
            id: row.try_get("id")?,
            client_id: row.try_get("client_id")?,
            description: row.try_get("description")?,
            critical: row.try_get("critical")?,
            template_id: row.try_get("template_id")?,
        })
    }
}

#[async_trait]
impl ClientsRepository for DatabaseClient {
    async fn find_client(&self, client_id: &str) -> Result<Client, RegistryError> {
        let row = self
            .client
            .query_opt(
                "SELECT id, description, template_id FROM clients WHERE id = $1",
                &[&client_id],
            )
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("client {}", client_id)))?;

        Ok(Client {
            id: row.try_get("id")?,
            description: row.try_get("description")?,
            template_id: row.try_get("template_id")?,
        })
    }
}

#[async_trait]
impl TemplatesRepository for DatabaseClient {
    async fn find_template_by_id(&self, template_id: &str) -> Result<Template, RegistryError> {
        let row = self
            .client
            .query_opt(
                "SELECT id, name, subject, text, html FROM templates WHERE id = $1",
                &[&template_id],
            )
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("template {}", template_id)))?;

        template_from_row(&row)
    }
}

#[async_trait]
impl UnsubscribesRepository for DatabaseClient {
    async fn get_global(&self, user_guid: &str) -> Result<bool, RegistryError> {
        let row = self
            .client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM global_unsubscribes WHERE user_id = $1)",
                &[&user_guid],
            )
            .await?;

        Ok(row.try_get(0)?)
    }

    async fn get_per_kind(
        &self,
        user_guid: &str,
        client_id: &str,
        kind_id: &str,
    ) -> Result<bool, RegistryError> {
        let row = self
            .client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM unsubscribes \
                 WHERE user_id = $1 AND client_id = $2 AND kind_id = $3)",
                &[&user_guid, &client_id, &kind_id],
            )
            .await?;

        Ok(row.try_get(0)?)
    }
}

#[async_trait]
impl ReceiptsRepository for DatabaseClient {
    async fn create_receipts(
        &self,
        user_guids: &[String],
        client_id: &str,
        kind_id: &str,
    ) -> Result<(), RegistryError> {
        for user_guid in user_guids {
            self.client
                .execute(
                    "INSERT INTO receipts (user_guid, client_id, kind_id, count, created_at) \
                     VALUES ($1, $2, $3, 1, now()) \
                     ON CONFLICT (user_guid, client_id, kind_id) \
                     DO UPDATE SET count = receipts.count + 1",
                    &[user_guid, &client_id, &kind_id],
                )
                .await?;
        }

        debug!(
            client_id,
            kind_id,
            receipts = user_guids.len(),
            "Receipts written to database"
        );

        Ok(())
    }
}

#[async_trait]
impl MessageStatusRepository for DatabaseClient {
    async fn upsert(&self, message: MessageStatus) -> Result<(), RegistryError> {
        self.client
            .execute(
                "INSERT INTO messages (id, status, campaign_id, updated_at) \
                 VALUES ($1, $2, $3, now()) \
                 ON CONFLICT (id) \
                 DO UPDATE SET status = EXCLUDED.status, updated_at = EXCLUDED.updated_at",
                &[&message.id, &message.status.as_str(), &message.campaign_id],
            )
            .await?;

        debug!(
            message_id = %message.id,
            status = %message.status,
            "Message status written to database"
        );

        Ok(())
    }
}
