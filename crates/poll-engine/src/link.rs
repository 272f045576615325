use modbus_transport::{RegisterClass, RegisterTransport, Result, TransportError, Word};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

struct LinkState {
    transport: Box<dyn RegisterTransport>,
    closed: bool,
}

impl LinkState {
    async fn ready(&mut self) -> Result<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if !self.transport.is_connected() {
            self.transport.connect().await?;
            info!(endpoint = %self.transport.endpoint(), "transport connected");
        }
        Ok(())
    }
}

/// The single physical connection shared by polling and writes.
///
/// Every request takes the lock for its full round trip, so requests from the
/// poll cycle and from committed writes never interleave on the wire.
#[derive(Clone)]
pub struct SharedLink {
    state: Arc<Mutex<LinkState>>,
    endpoint: Arc<str>,
}

impl SharedLink {
    pub fn new(transport: impl RegisterTransport + 'static) -> Self {
        Self::from_boxed(Box::new(transport))
    }

    pub fn from_boxed(transport: Box<dyn RegisterTransport>) -> Self {
        let endpoint: Arc<str> = transport.endpoint().into();
        Self {
            state: Arc::new(Mutex::new(LinkState {
                transport,
                closed: false,
            })),
            endpoint,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Connect if no session is open.
    pub async fn ensure_connected(&self) -> Result<()> {
        self.state.lock().await.ready().await
    }

    pub async fn read_words(
        &self,
        class: RegisterClass,
        address: u16,
        count: u16,
    ) -> Result<Vec<Word>> {
        let mut st = self.state.lock().await;
        st.ready().await?;
        st.transport.read_words(class, address, count).await
    }

    pub async fn write_words(&self, address: u16, words: &[Word]) -> Result<()> {
        let mut st = self.state.lock().await;
        st.ready().await?;
        st.transport.write_words(address, words).await
    }

    /// Close the transport. Only the first call reaches the transport; the
    /// return value tells whether this call was it.
    pub async fn close(&self) -> bool {
        let mut st = self.state.lock().await;
        if st.closed {
            debug!(endpoint = %self.endpoint, "transport already closed");
            return false;
        }
        st.closed = true;
        st.transport.close().await;
        info!(endpoint = %self.endpoint, "transport closed");
        true
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}
