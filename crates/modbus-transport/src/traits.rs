use crate::{RegisterClass, Result, TransportError, Word};
use async_trait::async_trait;

/// A minimal asynchronous register transport.
///
/// Implementations own a single physical session; callers are expected to
/// serialize access, the protocol being strictly request/response.
#[async_trait]
pub trait RegisterTransport: Send {
    /// Short human-readable endpoint description used in logs.
    fn endpoint(&self) -> String;

    /// Whether a session is currently open.
    fn is_connected(&self) -> bool;

    /// Open the session. Calling this on an open session is a no-op.
    async fn connect(&mut self) -> Result<()>;

    /// Read `count` consecutive words starting at `address`.
    async fn read_words(
        &mut self,
        class: RegisterClass,
        address: u16,
        count: u16,
    ) -> Result<Vec<Word>>;

    /// Write one holding register.
    async fn write_word(&mut self, address: u16, value: Word) -> Result<()>;

    /// Write consecutive holding registers in one request.
    async fn write_words(&mut self, address: u16, values: &[Word]) -> Result<()> {
        match values {
            [single] => self.write_word(address, *single).await,
            _ => Err(TransportError::Unsupported("multi-register write")),
        }
    }

    /// Close the session. Must tolerate being called more than once.
    async fn close(&mut self);
}
