use serde::Serialize;

pub const TEXT_PLAIN: &str = "text/plain";
pub const TEXT_HTML: &str = "text/html";

pub const CLIENT_ID_HEADER: &str = "X-CF-Client-ID";
pub const NOTIFICATION_ID_HEADER: &str = "X-CF-Notification-ID";
pub const NOTIFICATION_TIMESTAMP_HEADER: &str = "X-CF-Notification-Timestamp";
pub const REQUEST_RECEIVED_HEADER: &str = "X-CF-Notification-Request-Received";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Part {
    pub content_type: String,
    pub content: String,
}

impl Part {
    pub fn plain(content: String) -> Self {
        Self {
            content_type: TEXT_PLAIN.to_string(),
            content,
        }
    }

    pub fn html(content: String) -> Self {
        Self {
            content_type: TEXT_HTML.to_string(),
            content,
        }
    }
}

/// A compiled, transport-ready message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Message {
    pub from: String,
    pub reply_to: String,
    pub to: String,
    pub subject: String,
    pub parts: Vec<Part>,
    pub headers: Vec<(String, String)>,
}

impl Message {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn part(&self, content_type: &str) -> Option<&str> {
        self.parts
            .iter()
            .find(|part| part.content_type == content_type)
            .map(|part| part.content.as_str())
    }
}
