use serde::{Deserialize, Serialize};

/// Template id used by kinds and clients that have no template of their own.
pub const DEFAULT_TEMPLATE_ID: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// The subject, plaintext and HTML sources resolved for one delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Templates {
    pub name: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

impl Templates {
    /// Used when the chain ends at the default marker and nothing is stored under it.
    pub fn builtin_default() -> Self {
        Self {
            name: DEFAULT_TEMPLATE_ID.to_string(),
            subject: "CF Notification: {{ subject }}".to_string(),
            text: "{{ endorsement }}\n\n{{ text }}".to_string(),
            html: "<p>{{ endorsement }}</p>{{ html }}".to_string(),
        }
    }
}

impl From<Template> for Templates {
    fn from(template: Template) -> Self {
        Self {
            name: template.name,
            subject: template.subject,
            text: template.text,
            html: template.html,
        }
    }
}
