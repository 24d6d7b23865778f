use thiserror::Error;

/// Failures reported by the identity service (UAA) client.
///
/// The client classifies responses itself so callers can decide between
/// rescheduling and abandoning without looking at message text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("identity service returned an unexpected 404: {0}")]
    NotFound(String),

    #[error("identity service is down: {0}")]
    ServiceUnavailable(String),

    #[error("identity service error: {0}")]
    Other(String),
}

impl IdentityError {
    pub fn is_transient(&self) -> bool {
        matches!(self, IdentityError::ServiceUnavailable(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<tokio_postgres::Error> for RegistryError {
    fn from(err: tokio_postgres::Error) -> Self {
        RegistryError::Database(err.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("failed to connect to mail server: {0}")]
    Connection(String),

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("failed to send message: {0}")]
    Send(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloakError {
    #[error("cloak key must not be empty")]
    EmptyKey,

    #[error("invalid cloak key")]
    InvalidKey,

    #[error("malformed token")]
    Malformed,

    #[error("token failed authentication")]
    Tampered,
}

#[derive(Error, Debug)]
pub enum PackError {
    #[error("failed to load templates: {0}")]
    Templates(#[from] RegistryError),

    #[error("failed to generate unsubscribe token: {0}")]
    Cloak(#[from] CloakError),

    #[error("failed to compile {part} template: {reason}")]
    Compile { part: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("failed to unmarshal job payload: {0}")]
    Unmarshal(#[from] serde_json::Error),
}
