use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message as Email, Tokio1Executor,
    message::{
        Mailbox, MultiPart, SinglePart,
        header::{ContentType, HeaderName, HeaderValue},
    },
    transport::smtp::authentication::Credentials,
};
use tracing::{debug, info};

use crate::{
    error::TransportError,
    models::message::{Message, NOTIFICATION_ID_HEADER, TEXT_HTML, TEXT_PLAIN},
};

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;

    async fn send(&self, message: &Message) -> Result<(), TransportError>;
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub timeout_seconds: u64,
    pub domain: String,
}

/// SMTP transport built once at startup and shared by every worker task.
pub struct SmtpClient {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    domain: String,
}

impl SmtpClient {
    pub fn new(config: &SmtpConfig) -> Result<Self, TransportError> {
        let builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| TransportError::Connection(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        let mut builder = builder
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_seconds)));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        info!(host = %config.host, port = config.port, tls = config.use_tls, "SMTP client initialized");

        Ok(Self {
            mailer: builder.build(),
            domain: config.domain.clone(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpClient {
    async fn connect(&self) -> Result<(), TransportError> {
        match self.mailer.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(TransportError::Connection(
                "mail server did not accept the connection".to_string(),
            )),
            Err(e) => Err(TransportError::Connection(e.to_string())),
        }
    }

    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        let email = build_email(message, &self.domain)?;

        let response = self
            .mailer
            .send(email)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;

        debug!(code = %response.code(), "Mail server accepted message");

        Ok(())
    }
}

fn mailbox(address: &str) -> Result<Mailbox, TransportError> {
    address
        .parse()
        .map_err(|e| TransportError::Build(format!("invalid address {:?}: {}", address, e)))
}

/// Converts a compiled message into a MIME message.
pub fn build_email(message: &Message, domain: &str) -> Result<Email, TransportError> {
    let mut builder = Email::builder()
        .from(mailbox(&message.from)?)
        .to(mailbox(&message.to)?)
        .subject(message.subject.clone());

    if !message.reply_to.is_empty() {
        builder = builder.reply_to(mailbox(&message.reply_to)?);
    }

    if let Some(id) = message.header(NOTIFICATION_ID_HEADER) {
        builder = builder.message_id(Some(format!("<{}@{}>", id, domain)));
    }

    for (name, value) in &message.headers {
        let name = HeaderName::new_from_ascii(name.clone())
            .map_err(|e| TransportError::Build(format!("invalid header {:?}: {}", name, e)))?;
        builder = builder.raw_header(HeaderValue::new(name, value.clone()));
    }

    let email = match (message.part(TEXT_PLAIN), message.part(TEXT_HTML)) {
        (Some(text), Some(html)) => builder.multipart(
            MultiPart::alternative()
                .singlepart(SinglePart::plain(text.to_string()))
                .singlepart(SinglePart::html(html.to_string())),
        ),
        (Some(text), None) => builder.header(ContentType::TEXT_PLAIN).body(text.to_string()),
        (None, Some(html)) => builder.header(ContentType::TEXT_HTML).body(html.to_string()),
        (None, None) => builder.header(ContentType::TEXT_PLAIN).body(String::new()),
    };

    email.map_err(|e| TransportError::Build(e.to_string()))
}
