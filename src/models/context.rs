use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::delivery::Html;

/// View-model the templates are rendered against. Built once per compile.
///
/// `html` and `html_components` are handed to templates separately so the HTML
/// path can mark them safe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageContext {
    pub from: String,
    pub reply_to: String,
    pub to: String,
    pub subject: String,
    pub text: String,
    #[serde(skip)]
    pub html: String,
    #[serde(skip)]
    pub html_components: Html,

    #[serde(skip)]
    pub text_template: String,
    #[serde(skip)]
    pub html_template: String,
    #[serde(skip)]
    pub subject_template: String,

    pub kind_description: String,
    pub source_description: String,
    pub user_guid: String,
    pub client_id: String,
    pub message_id: String,
    pub space: String,
    pub space_guid: String,
    pub organization: String,
    pub organization_guid: String,
    pub unsubscribe_id: String,
    pub scope: String,
    pub endorsement: String,
    pub role: String,
    pub domain: String,
    pub request_received: DateTime<Utc>,
}
