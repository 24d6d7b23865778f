use std::{collections::HashMap, sync::Arc};

use tracing::debug;

use crate::{
    clients::identity::UserDirectory,
    error::IdentityError,
    models::registry::UserRecord,
};

/// Resolves user ids to identity records.
#[derive(Clone)]
pub struct RecipientResolver {
    directory: Arc<dyn UserDirectory>,
}

impl RecipientResolver {
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self { directory }
    }

    /// Every requested id is a key of the result; ids the identity service
    /// did not return map to an empty record.
    pub async fn load(
        &self,
        user_ids: &[String],
        token: &str,
    ) -> Result<HashMap<String, UserRecord>, IdentityError> {
        let users = self.directory.users_emails_by_ids(token, user_ids).await?;

        debug!(
            requested = user_ids.len(),
            returned = users.len(),
            "Resolved users from identity service"
        );

        let mut records: HashMap<String, UserRecord> = user_ids
            .iter()
            .map(|id| (id.clone(), UserRecord::empty(id.clone())))
            .collect();

        for user in users {
            records.insert(user.id.clone(), user);
        }

        Ok(records)
    }
}
