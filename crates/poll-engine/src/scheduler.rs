use crate::equality::values_equal;
use crate::{EngineError, MetricsHub, SharedLink};
use async_trait::async_trait;
use modbus_transport::{TransportError, Word};
use register_catalog::{encode, DecodedValue, RegisterCatalog, RegisterDescriptor};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Source of truth for a register's present value.
pub trait CurrentValue: Send + Sync {
    fn current_value(&self, register_id: &str) -> DecodedValue;
}

impl<F> CurrentValue for F
where
    F: Fn(&str) -> DecodedValue + Send + Sync,
{
    fn current_value(&self, register_id: &str) -> DecodedValue {
        self(register_id)
    }
}

/// Asks the poller for a fresh snapshot outside its interval.
#[async_trait]
pub trait RefreshTrigger: Send + Sync {
    async fn request_refresh(&self);
}

/// Emitted for every write that reached the transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WriteEvent {
    Committed {
        register: String,
        value: DecodedValue,
        words: Vec<Word>,
    },
    Failed {
        register: String,
        value: DecodedValue,
        error: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// The value already matches; nothing is pending for the register.
    Unchanged,
    /// A debounced write is pending.
    Scheduled,
    /// Debounce is disabled and the write was sent.
    Committed,
}

type WriteCallback = Box<dyn Fn(&WriteEvent) + Send + Sync>;

struct PendingWrite {
    value: DecodedValue,
    words: Vec<Word>,
    task: JoinHandle<()>,
    created_at: Instant,
    token: u64,
}

struct Inner {
    catalog: Arc<RegisterCatalog>,
    link: SharedLink,
    delay: Duration,
    default_source: Arc<dyn CurrentValue>,
    sources: RwLock<HashMap<String, Arc<dyn CurrentValue>>>,
    refresh: Arc<dyn RefreshTrigger>,
    pending: Mutex<HashMap<String, PendingWrite>>,
    next_token: AtomicU64,
    on_write: RwLock<Option<WriteCallback>>,
    metrics: MetricsHub,
    closed: AtomicBool,
}

/// Debounces writes per register so that only the last of a burst of edits
/// reaches the device.
#[derive(Clone)]
pub struct WriteScheduler {
    inner: Arc<Inner>,
}

impl WriteScheduler {
    pub fn new(
        catalog: Arc<RegisterCatalog>,
        link: SharedLink,
        delay: Duration,
        source: Arc<dyn CurrentValue>,
        refresh: Arc<dyn RefreshTrigger>,
        metrics: MetricsHub,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                catalog,
                link,
                delay,
                default_source: source,
                sources: RwLock::new(HashMap::new()),
                refresh,
                pending: Mutex::new(HashMap::new()),
                next_token: AtomicU64::new(1),
                on_write: RwLock::new(None),
                metrics,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Override where the current value of `register_id` is read from.
    pub fn set_value_source(&self, register_id: &str, source: Arc<dyn CurrentValue>) {
        if let Ok(mut sources) = self.inner.sources.write() {
            sources.insert(register_id.to_string(), source);
        }
    }

    pub fn set_write_callback<F>(&self, callback: F)
    where
        F: Fn(&WriteEvent) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.inner.on_write.write() {
            *slot = Some(Box::new(callback));
        }
    }

    /// Request that `register_id` be set to `value`.
    ///
    /// The value is validated and encoded before anything is queued, so
    /// rejections are returned here. A value equal to the current one
    /// cancels whatever is pending for the register. Otherwise any earlier
    /// pending write is replaced and the debounce window restarts.
    pub async fn schedule(
        &self,
        register_id: &str,
        value: DecodedValue,
    ) -> Result<ScheduleOutcome, EngineError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(EngineError::ShutDown);
        }
        let desc = inner
            .catalog
            .get(register_id)
            .ok_or_else(|| EngineError::UnknownRegister(register_id.to_string()))?;
        let words = encode(&value, desc)?;

        if inner.is_current(desc, &value) {
            if self.cancel(register_id) {
                debug!(register = register_id, "value already current, dropped pending write");
            }
            debug!(register = register_id, value = %value, "write skipped, value unchanged");
            inner.metrics.engine.writes_skipped.inc();
            return Ok(ScheduleOutcome::Unchanged);
        }

        if inner.delay.is_zero() {
            if inner.closed.load(Ordering::SeqCst) {
                return Err(EngineError::ShutDown);
            }
            self.cancel(register_id);
            inner.commit(desc, value, words).await?;
            return Ok(ScheduleOutcome::Committed);
        }

        let token = inner.next_token.fetch_add(1, Ordering::SeqCst);
        let replaced = {
            let mut pending = inner.pending_map();
            // `close` raises the flag before draining under this lock.
            if inner.closed.load(Ordering::SeqCst) {
                return Err(EngineError::ShutDown);
            }
            let task = tokio::spawn(Inner::deferred(
                Arc::clone(inner),
                register_id.to_string(),
                token,
            ));
            pending.insert(
                register_id.to_string(),
                PendingWrite {
                    value: value.clone(),
                    words,
                    task,
                    created_at: Instant::now(),
                    token,
                },
            )
        };
        if let Some(old) = replaced {
            old.task.abort();
            debug!(
                register = register_id,
                superseded = %old.value,
                value = %value,
                age_ms = old.created_at.elapsed().as_millis() as u64,
                "pending write superseded"
            );
        } else {
            debug!(register = register_id, value = %value, "write scheduled");
        }
        Ok(ScheduleOutcome::Scheduled)
    }

    /// Drop the pending write for `register_id`, if any.
    pub fn cancel(&self, register_id: &str) -> bool {
        let Some(old) = self.inner.pending_map().remove(register_id) else {
            return false;
        };
        old.task.abort();
        debug!(
            register = register_id,
            value = %old.value,
            age_ms = old.created_at.elapsed().as_millis() as u64,
            "pending write cancelled"
        );
        true
    }

    /// Drop every pending write and refuse further scheduling.
    pub fn close(&self) -> usize {
        self.inner.closed.store(true, Ordering::SeqCst);
        let drained: Vec<(String, PendingWrite)> = self.inner.pending_map().drain().collect();
        for (_, pw) in &drained {
            pw.task.abort();
        }
        if !drained.is_empty() {
            debug!(n = drained.len(), "pending writes cancelled on close");
        }
        drained.len()
    }

    pub fn pending_value(&self, register_id: &str) -> Option<DecodedValue> {
        self.inner
            .pending_map()
            .get(register_id)
            .map(|pw| pw.value.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending_map().len()
    }
}

impl Inner {
    fn pending_map(&self) -> MutexGuard<'_, HashMap<String, PendingWrite>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn source_for(&self, register_id: &str) -> Arc<dyn CurrentValue> {
        self.sources
            .read()
            .ok()
            .and_then(|s| s.get(register_id).cloned())
            .unwrap_or_else(|| Arc::clone(&self.default_source))
    }

    fn is_current(&self, desc: &RegisterDescriptor, value: &DecodedValue) -> bool {
        let current = self.source_for(&desc.id).current_value(&desc.id);
        values_equal(&current, value, desc.precision)
    }

    /// Take the pending entry if it still belongs to `token`. Once claimed the
    /// write can no longer be aborted.
    fn claim(&self, register_id: &str, token: u64) -> Option<PendingWrite> {
        let mut pending = self.pending_map();
        match pending.get(register_id) {
            Some(pw) if pw.token == token => pending.remove(register_id),
            _ => None,
        }
    }

    async fn deferred(self: Arc<Self>, register_id: String, token: u64) {
        tokio::time::sleep(self.delay).await;
        let Some(pending) = self.claim(&register_id, token) else {
            return;
        };
        let Some(desc) = self.catalog.get(&register_id) else {
            return;
        };
        if self.is_current(desc, &pending.value) {
            debug!(register = %register_id, value = %pending.value, "value became current during debounce, write dropped");
            self.metrics.engine.writes_skipped.inc();
            return;
        }
        // Failures are logged and reported through the write callback.
        let _ = self.commit(desc, pending.value, pending.words).await;
    }

    async fn commit(
        &self,
        desc: &RegisterDescriptor,
        value: DecodedValue,
        words: Vec<Word>,
    ) -> Result<(), TransportError> {
        match self.link.write_words(desc.address, &words).await {
            Ok(()) => {
                info!(
                    register = %desc.id,
                    address = desc.address,
                    value = %value,
                    "register write committed"
                );
                self.metrics.engine.writes_committed.inc();
                self.emit(&WriteEvent::Committed {
                    register: desc.id.clone(),
                    value,
                    words,
                });
                self.refresh.request_refresh().await;
                Ok(())
            }
            Err(e) => {
                error!(
                    register = %desc.id,
                    address = desc.address,
                    value = %value,
                    error = %e,
                    "register write failed"
                );
                self.metrics.engine.writes_failed.inc();
                self.emit(&WriteEvent::Failed {
                    register: desc.id.clone(),
                    value,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn emit(&self, event: &WriteEvent) {
        if let Ok(slot) = self.on_write.read() {
            if let Some(callback) = slot.as_ref() {
                callback(event);
            }
        }
    }
}
