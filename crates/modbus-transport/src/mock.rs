use crate::{RegisterClass, RegisterTransport, Result, TransportError, Word};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// A write observed by the mock device.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WriteRecord {
    pub address: u16,
    pub words: Vec<Word>,
}

#[derive(Default)]
struct MockState {
    bank: HashMap<(RegisterClass, u16), Word>,
    failing: HashSet<(RegisterClass, u16)>,
    exceptions: HashMap<(RegisterClass, u16), u8>,
    failing_writes: HashSet<u16>,
    refuse_connect: bool,
    connected: bool,
    writes: Vec<WriteRecord>,
    reads: usize,
    connects: usize,
    closes: usize,
}

/// An in-process mock device. Clones share the same register bank, so a test
/// can keep one handle for inspection while the engine owns another.
#[derive(Clone, Default)]
pub struct MockTransport {
    name: String,
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // The bank stays consistent even if a holder panicked.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Seed consecutive words starting at `address`.
    pub fn set_words(&self, class: RegisterClass, address: u16, words: &[Word]) {
        let mut st = self.state();
        for (i, w) in words.iter().enumerate() {
            st.bank.insert((class, address.wrapping_add(i as u16)), *w);
        }
    }

    pub fn word(&self, class: RegisterClass, address: u16) -> Word {
        self.state().bank.get(&(class, address)).copied().unwrap_or(0)
    }

    /// Make every read touching `address` fail with an I/O error.
    pub fn fail_reads_at(&self, class: RegisterClass, address: u16) {
        self.state().failing.insert((class, address));
    }

    /// Make every read touching `address` return a device exception.
    pub fn exception_at(&self, class: RegisterClass, address: u16, code: u8) {
        self.state().exceptions.insert((class, address), code);
    }

    /// Make every write touching holding `address` fail with an I/O error.
    pub fn fail_writes_at(&self, address: u16) {
        self.state().failing_writes.insert(address);
    }

    pub fn refuse_connect(&self, refuse: bool) {
        self.state().refuse_connect = refuse;
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state().writes.clone()
    }

    pub fn read_count(&self) -> usize {
        self.state().reads
    }

    pub fn connect_count(&self) -> usize {
        self.state().connects
    }

    pub fn close_count(&self) -> usize {
        self.state().closes
    }
}

#[async_trait]
impl RegisterTransport for MockTransport {
    fn endpoint(&self) -> String {
        format!("mock:{}", self.name)
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }

    async fn connect(&mut self) -> Result<()> {
        let mut st = self.state();
        st.connects += 1;
        if st.refuse_connect {
            return Err(TransportError::Connect(format!(
                "mock device {} refused connection",
                self.name
            )));
        }
        st.connected = true;
        Ok(())
    }

    async fn read_words(
        &mut self,
        class: RegisterClass,
        address: u16,
        count: u16,
    ) -> Result<Vec<Word>> {
        let mut st = self.state();
        if !st.connected {
            return Err(TransportError::Io("not connected".into()));
        }
        st.reads += 1;
        let mut out = Vec::with_capacity(count as usize);
        for i in 0..count {
            let addr = address.wrapping_add(i);
            if st.failing.contains(&(class, addr)) {
                return Err(TransportError::Io(format!("mock read failure at {addr}")));
            }
            if let Some(code) = st.exceptions.get(&(class, addr)) {
                return Err(TransportError::Exception {
                    function: class.read_function(),
                    code: *code,
                });
            }
            out.push(st.bank.get(&(class, addr)).copied().unwrap_or(0));
        }
        Ok(out)
    }

    async fn write_word(&mut self, address: u16, value: Word) -> Result<()> {
        self.write_words(address, &[value]).await
    }

    async fn write_words(&mut self, address: u16, values: &[Word]) -> Result<()> {
        let mut st = self.state();
        if !st.connected {
            return Err(TransportError::Io("not connected".into()));
        }
        if let Some(addr) = (0..values.len() as u16)
            .map(|i| address.wrapping_add(i))
            .find(|a| st.failing_writes.contains(a))
        {
            return Err(TransportError::Io(format!("mock write failure at {addr}")));
        }
        for (i, w) in values.iter().enumerate() {
            st.bank
                .insert((RegisterClass::Holding, address.wrapping_add(i as u16)), *w);
        }
        st.writes.push(WriteRecord {
            address,
            words: values.to_vec(),
        });
        Ok(())
    }

    async fn close(&mut self) {
        let mut st = self.state();
        st.closes += 1;
        st.connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_seeded_words_and_defaults_to_zero() -> anyhow::Result<()> {
        let mut bus = MockTransport::new("t");
        bus.set_words(RegisterClass::Input, 10, &[0x4120, 0x0000]);
        bus.connect().await?;
        let words = bus.read_words(RegisterClass::Input, 10, 3).await?;
        assert_eq!(words, vec![0x4120, 0x0000, 0]);
        assert_eq!(bus.read_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn writes_land_in_holding_bank() -> anyhow::Result<()> {
        let mut bus = MockTransport::new("t");
        let observer = bus.clone();
        bus.connect().await?;
        bus.write_word(7, 2).await?;
        assert_eq!(observer.word(RegisterClass::Holding, 7), 2);
        assert_eq!(
            observer.writes(),
            vec![WriteRecord {
                address: 7,
                words: vec![2]
            }]
        );
        Ok(())
    }

    #[tokio::test]
    async fn scripted_failures() {
        let mut bus = MockTransport::new("t");
        bus.refuse_connect(true);
        assert!(matches!(bus.connect().await, Err(TransportError::Connect(_))));
        bus.refuse_connect(false);
        assert!(bus.connect().await.is_ok());

        bus.fail_reads_at(RegisterClass::Holding, 3);
        bus.exception_at(RegisterClass::Input, 4, 2);
        assert!(matches!(
            bus.read_words(RegisterClass::Holding, 2, 2).await,
            Err(TransportError::Io(_))
        ));
        assert_eq!(
            bus.read_words(RegisterClass::Input, 4, 1).await,
            Err(TransportError::Exception {
                function: 0x04,
                code: 2
            })
        );
    }

    #[tokio::test]
    async fn close_is_counted_and_disconnects() -> anyhow::Result<()> {
        let mut bus = MockTransport::new("t");
        bus.connect().await?;
        bus.close().await;
        bus.close().await;
        assert_eq!(bus.close_count(), 2);
        assert!(!bus.is_connected());
        assert!(bus.read_words(RegisterClass::Input, 0, 1).await.is_err());
        Ok(())
    }
}
