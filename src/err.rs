use thiserror::Error;

#[derive(Error, Debug, Clone, Deserialize, Serialize, PartialEq)]
pub enum ProbeError{
    #[error("Malformed connection string: {0}")]
    MalformedConnectionString(String),

    #[error("Failed to open client: {0}")]
    OpenFailed(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Session closed")]
    SessionClosed,
    #[error("Close failed: {0}")]
    CloseFailed(String),

    #[error("Channel closed by peer")]
    ChannelClosed,

    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    IOError(String),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for ProbeError {
    fn from(error: std::io::Error) -> Self {
        ProbeError::IOError(error.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ProbeError {
    fn from(_error: tokio::sync::mpsc::error::SendError<T>) -> Self {
        ProbeError::ChannelClosed
    }
}

impl From<tokio::task::JoinError> for ProbeError {
    fn from(error: tokio::task::JoinError) -> Self {
        ProbeError::InternalError(error.to_string())
    }
}

impl From<serde_json::error::Error> for ProbeError {
    fn from(error: serde_json::error::Error) -> Self {
        ProbeError::Config(error.to_string())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for ProbeError {
    fn from(error: tokio::sync::oneshot::error::RecvError) -> Self {
        ProbeError::InternalError(error.to_string())
    }
}

pub type ProbeResult<T> = Result<T, ProbeError>;

/// An error from best-effort cleanup. It is logged where it happens and never reaches a reporter.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("ignored: {0}")]
pub struct IgnorableError(pub ProbeError);

impl IgnorableError {
    /// Log the error at `warn` and discard it.
    pub fn log(self, what: &str) {
        warn!("{} {}", what, self.0);
    }
}

impl From<ProbeError> for IgnorableError {
    fn from(error: ProbeError) -> Self {
        IgnorableError(error)
    }
}
