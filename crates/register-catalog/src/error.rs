use thiserror::Error;

/// Structural failures while decoding raw words. These indicate a transport
/// or catalog bug rather than a device condition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("no words to decode")]
    EmptyInput,
    #[error("expected {expected} words, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Validation failures for a requested write.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EncodeError {
    #[error("register {0} is read-only")]
    NotWritable(String),
    #[error("{value:?} is not a valid option for {id}")]
    InvalidOption { id: String, value: String },
    #[error("value {value} out of range [{min}, {max}] for {id}")]
    OutOfRange {
        id: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("register {0} has a zero scale")]
    DivisionByZero(String),
    #[error("cannot write {value:?} to {id}")]
    InvalidValue { id: String, value: String },
    #[error("register {0} has an encoding that cannot be written")]
    UnsupportedEncoding(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("duplicate register id: {0}")]
    DuplicateId(String),
    #[error("register {id}: declared length {declared} does not match encoding width {expected}")]
    WordCountMismatch {
        id: String,
        declared: u16,
        expected: u16,
    },
    #[error("invalid value map key {0:?}: keys must be raw integers")]
    InvalidValueMap(String),
}
