use std::sync::Arc;

use tracing::debug;

use crate::{
    clients::database::{ClientsRepository, KindsRepository, TemplatesRepository},
    error::RegistryError,
    models::template::{DEFAULT_TEMPLATE_ID, Templates},
};

/// Resolves templates along the override → kind → client → default chain.
#[derive(Clone)]
pub struct TemplateResolver {
    kinds: Arc<dyn KindsRepository>,
    clients: Arc<dyn ClientsRepository>,
    templates: Arc<dyn TemplatesRepository>,
}

fn is_default(template_id: &str) -> bool {
    template_id.is_empty() || template_id == DEFAULT_TEMPLATE_ID
}

impl TemplateResolver {
    pub fn new(
        kinds: Arc<dyn KindsRepository>,
        clients: Arc<dyn ClientsRepository>,
        templates: Arc<dyn TemplatesRepository>,
    ) -> Self {
        Self {
            kinds,
            clients,
            templates,
        }
    }

    /// Lookup failures for the kind, client or template are returned as-is.
    pub async fn load_templates(
        &self,
        client_id: &str,
        kind_id: &str,
        template_id: &str,
    ) -> Result<Templates, RegistryError> {
        if !is_default(template_id) {
            debug!(template_id, "Using template override");
            return self.find(template_id).await;
        }

        if !kind_id.is_empty() {
            let kind = self.kinds.find_kind(kind_id, client_id).await?;
            if !is_default(&kind.template_id) {
                debug!(template_id = %kind.template_id, "Using kind template");
                return self.find(&kind.template_id).await;
            }
        }

        let client = self.clients.find_client(client_id).await?;
        debug!(template_id = %client.template_id, "Using client template");
        self.find(&client.template_id).await
    }

    async fn find(&self, template_id: &str) -> Result<Templates, RegistryError> {
        if !is_default(template_id) {
            return Ok(self.templates.find_template_by_id(template_id).await?.into());
        }

        match self.templates.find_template_by_id(DEFAULT_TEMPLATE_ID).await {
            Ok(template) => Ok(template.into()),
            Err(RegistryError::NotFound(_)) => Ok(Templates::builtin_default()),
            Err(e) => Err(e),
        }
    }
}
