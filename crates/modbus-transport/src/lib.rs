//! modbus-transport: register-oriented transport port abstractions
//!
//! This crate provides the trait and types for talking to a device that exposes
//! 16-bit registers over a half-duplex request/response protocol, with
//! feature-gated backends. The default build enables a `mock` backend so that
//! binaries and tests can run on any host without hardware.

mod types;
pub use types::{RegisterClass, Word, MAX_READ_WORDS};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::RegisterTransport;

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockTransport, WriteRecord};

#[cfg(feature = "tcp")]
mod tcp;

#[cfg(feature = "tcp")]
pub use tcp::{
    encode_read_request, encode_write_multiple, encode_write_single, parse_response,
    ModbusTcpTransport, Response, TcpConfig,
};
