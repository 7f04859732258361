use thiserror::Error;

#[derive(Debug, Error)]
pub enum PilotError {
    /// No live session at the time an operation needed one.
    #[error("Not connected to a hypervisor")]
    NotConnected,

    /// The request never produced a response.
    #[error("Control API unreachable: {0}")]
    TransportFailure(String),

    /// The control API answered but reported failure.
    #[error("{0}")]
    RemoteRejection(String),

    /// Rejected locally before any request was sent.
    #[error("Invalid input: {0}")]
    ValidationFailure(String),

    /// A successful response lacked a field the caller needs.
    #[error("Response is missing {0}")]
    ResourceMissing(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotConnected,
    TransportFailure,
    RemoteRejection,
    ValidationFailure,
    ResourceMissing,
    Local,
}

impl PilotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PilotError::NotConnected => ErrorKind::NotConnected,
            PilotError::TransportFailure(_) => ErrorKind::TransportFailure,
            PilotError::RemoteRejection(_) => ErrorKind::RemoteRejection,
            PilotError::ValidationFailure(_) => ErrorKind::ValidationFailure,
            PilotError::ResourceMissing(_) => ErrorKind::ResourceMissing,
            PilotError::ConfigError(_) | PilotError::IoError(_) | PilotError::SerdeError(_) => {
                ErrorKind::Local
            }
        }
    }

    /// `NotConnected` is answered by sending the user to the connect flow,
    /// never by printing it inline.
    pub fn is_not_connected(&self) -> bool {
        matches!(self, PilotError::NotConnected)
    }

    /// Message shown next to a failed operation. Transport details stay in
    /// the logs.
    pub fn describe(&self) -> String {
        match self.kind() {
            ErrorKind::TransportFailure => "Could not reach the control API".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<toml::de::Error> for PilotError {
    fn from(err: toml::de::Error) -> Self {
        PilotError::ConfigError(err.to_string())
    }
}

impl From<serde_json::Error> for PilotError {
    fn from(err: serde_json::Error) -> Self {
        PilotError::SerdeError(err.to_string())
    }
}
