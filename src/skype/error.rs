// Error taxonomy for the Skype client

use thiserror::Error;

/// Credential failures reported by the identity provider.
///
/// These always fail the whole authentication attempt and are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Wrong password: {0}")]
    WrongPassword(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Suspicious login: {0}")]
    SuspiciousLogin(String),
}

#[derive(Error, Debug)]
pub enum SkypeError {
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        payload: Option<String>,
    },

    #[error("{field} did not conform to format expected")]
    Conformance { field: String, payload: String },

    #[error("{context}: expected HTTP {expected:?}, got {actual}")]
    UnexpectedStatus {
        context: String,
        expected: Vec<u16>,
        actual: u16,
        payload: String,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Error while handling event: {source} (resource: {resource})")]
    Dispatch {
        #[source]
        source: Box<SkypeError>,
        resource: String,
    },

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("No such contact: {0}")]
    NoSuchContact(String),

    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),
}

impl SkypeError {
    pub fn protocol(message: impl Into<String>) -> Self {
        SkypeError::Protocol {
            message: message.into(),
            payload: None,
        }
    }

    pub fn protocol_with_payload(message: impl Into<String>, payload: impl Into<String>) -> Self {
        SkypeError::Protocol {
            message: message.into(),
            payload: Some(payload.into()),
        }
    }

    /// A structural check on `payload` failed at `field`.
    pub fn conformance(field: impl Into<String>, payload: &serde_json::Value) -> Self {
        SkypeError::Conformance {
            field: field.into(),
            payload: payload.to_string(),
        }
    }

    /// Wrap a handler failure with the resource that caused it.
    pub fn dispatch(source: SkypeError, resource: &serde_json::Value) -> Self {
        SkypeError::Dispatch {
            source: Box::new(source),
            resource: resource.to_string(),
        }
    }

    /// Conformance failures are a sub-case of protocol errors.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            SkypeError::Protocol { .. } | SkypeError::Conformance { .. }
        )
    }

    pub fn is_credential(&self) -> bool {
        matches!(self, SkypeError::Credential(_))
    }

    /// The raw payload attached for diagnosis, if any.
    pub fn payload(&self) -> Option<&str> {
        match self {
            SkypeError::Protocol { payload, .. } => payload.as_deref(),
            SkypeError::Conformance { payload, .. } => Some(payload),
            SkypeError::UnexpectedStatus { payload, .. } => Some(payload),
            SkypeError::Dispatch { resource, .. } => Some(resource),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SkypeError {
    fn from(err: reqwest::Error) -> Self {
        SkypeError::Transport(err.to_string())
    }
}

pub type SkypeResult<T> = std::result::Result<T, SkypeError>;

/// Where a non-fatal error was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    RegisteringPushChannel,
    BootstrapTask,
    PollingPushChannel,
    DecodingFrame,
    EventDispatch,
    Logout,
}

/// Receives failures that do not abort the operation that observed them.
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, source: ErrorSource, error: &SkypeError);
}

/// Default handler: log and move on.
pub struct LoggingErrorHandler;

impl ErrorHandler for LoggingErrorHandler {
    fn handle(&self, source: ErrorSource, error: &SkypeError) {
        log::error!("[{:?}] {}", source, error);
        if let Some(payload) = error.payload() {
            log::debug!("[{:?}] offending payload: {}", source, payload);
        }
    }
}
