use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Client-supplied HTML body, split into the slots of the document shell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Html {
    pub body_content: String,
    pub body_attributes: String,
    pub head: String,
    pub doctype: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub reply_to: String,
    pub subject: String,
    pub kind_description: String,
    pub source_description: String,
    pub text: String,
    pub html: Html,
    pub endorsement: String,
    pub template_id: String,
    pub role: String,
}

/// Name and GUID of a space or organization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Identity {
    pub guid: String,
    pub name: String,
}

/// One requested send, as serialized into a job payload by the API layer.
///
/// Only `email` is ever filled in by the worker; everything else is read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub message_id: String,
    pub user_guid: String,

    #[serde(default)]
    pub email: String,

    pub client_id: String,

    #[serde(default)]
    pub kind_id: String,

    #[serde(default)]
    pub options: Options,

    #[serde(default)]
    pub space: Identity,

    #[serde(default)]
    pub organization: Identity,

    #[serde(default)]
    pub scope: String,

    pub uaa_host: String,

    #[serde(default)]
    pub vcap_request_id: String,

    pub request_received: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
}
