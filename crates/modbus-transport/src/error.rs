use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("timeout")]
    Timeout,
    #[error("device exception response: function 0x{function:02X}, code {code}")]
    Exception { function: u8, code: u8 },
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),
    #[error("operation not supported on this backend: {0}")]
    Unsupported(&'static str),
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Whether the error leaves the connection in an unknown state and the
    /// session must be re-established before the next request.
    pub fn is_link_fault(&self) -> bool {
        matches!(
            self,
            TransportError::Io(_) | TransportError::Timeout | TransportError::InvalidFrame(_)
        )
    }
}
