use serde::{Deserialize, Serialize};

/// A client-registered notification category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kind {
    pub id: String,
    pub client_id: String,
    pub description: String,
    pub critical: bool,
    pub template_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub description: String,
    pub template_id: String,
}

/// A user as returned by the identity service, restricted to `id` and `emails`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub emails: Vec<String>,
}

impl UserRecord {
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            emails: Vec::new(),
        }
    }
}
