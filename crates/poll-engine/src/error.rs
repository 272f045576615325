use modbus_transport::TransportError;
use register_catalog::EncodeError;
use thiserror::Error;

/// Aggregate failure of a whole poll cycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CycleError {
    #[error("poll cycle could not start: {0}")]
    Connect(TransportError),
    #[error("engine is shut down")]
    ShutDown,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown register: {0}")]
    UnknownRegister(String),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Cycle(#[from] CycleError),
    #[error("engine is shut down")]
    ShutDown,
    #[error("metrics: {0}")]
    Metrics(String),
}
