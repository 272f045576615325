use crate::scheduler::{CurrentValue, RefreshTrigger};
use crate::{CycleError, MetricsHub, SharedLink, Snapshot, SnapshotStore};
use async_trait::async_trait;
use modbus_transport::TransportError;
use register_catalog::{decode, DecodedValue, RegisterCatalog, RegisterDescriptor};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub type CycleOutcome = Result<Arc<Snapshot>, CycleError>;

type SnapshotCallback = Box<dyn Fn(Arc<Snapshot>) + Send + Sync>;
type FailureCallback = Box<dyn Fn(&CycleError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
    Failed,
}

/// Runs full read sweeps over the catalog and publishes snapshots.
pub struct PollCoordinator {
    catalog: Arc<RegisterCatalog>,
    link: SharedLink,
    store: SnapshotStore,
    state: Mutex<PollState>,
    // Held for the duration of a cycle; keeps the last outcome for requests
    // that arrived while that cycle was running.
    gate: tokio::sync::Mutex<Option<CycleOutcome>>,
    started: AtomicU64,
    completed: AtomicU64,
    on_snapshot: RwLock<Option<SnapshotCallback>>,
    on_failure: RwLock<Option<FailureCallback>>,
    metrics: MetricsHub,
}

impl PollCoordinator {
    pub fn new(catalog: Arc<RegisterCatalog>, link: SharedLink, metrics: MetricsHub) -> Self {
        metrics.engine.registers_loaded.set(catalog.len() as i64);
        Self {
            catalog,
            link,
            store: SnapshotStore::new(),
            state: Mutex::new(PollState::Idle),
            gate: tokio::sync::Mutex::new(None),
            started: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            on_snapshot: RwLock::new(None),
            on_failure: RwLock::new(None),
            metrics,
        }
    }

    /// Invoked once per successful cycle with the new snapshot.
    pub fn set_snapshot_callback<F>(&self, callback: F)
    where
        F: Fn(Arc<Snapshot>) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.on_snapshot.write() {
            *slot = Some(Box::new(callback));
        }
    }

    /// Invoked once per failed cycle. Requests coalesced into that cycle do
    /// not trigger it again.
    pub fn set_failure_callback<F>(&self, callback: F)
    where
        F: Fn(&CycleError) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.on_failure.write() {
            *slot = Some(Box::new(callback));
        }
    }

    pub fn state(&self) -> PollState {
        self.state.lock().map(|s| *s).unwrap_or(PollState::Failed)
    }

    fn set_state(&self, next: PollState) {
        if let Ok(mut s) = self.state.lock() {
            *s = next;
        }
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.store.load()
    }

    pub fn catalog(&self) -> &Arc<RegisterCatalog> {
        &self.catalog
    }

    /// Run a poll cycle now.
    ///
    /// A request arriving while a cycle is already running waits for that
    /// cycle and shares its outcome instead of starting another sweep.
    pub async fn refresh(&self) -> CycleOutcome {
        let started = self.started.load(Ordering::SeqCst);
        let in_flight = started > self.completed.load(Ordering::SeqCst);
        let mut last = self.gate.lock().await;
        if in_flight && self.completed.load(Ordering::SeqCst) >= started {
            if let Some(outcome) = last.as_ref() {
                debug!(cycle = started, "refresh coalesced into in-flight cycle");
                return outcome.clone();
            }
        }
        let cycle = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = self.run_cycle(cycle).await;
        self.completed.store(cycle, Ordering::SeqCst);
        *last = Some(outcome.clone());
        outcome
    }

    async fn run_cycle(&self, cycle: u64) -> CycleOutcome {
        self.set_state(PollState::Polling);
        if let Err(e) = self.link.ensure_connected().await {
            self.set_state(PollState::Failed);
            self.metrics.engine.poll_failures.inc();
            let err = match e {
                TransportError::Closed => CycleError::ShutDown,
                other => CycleError::Connect(other),
            };
            error!(endpoint = %self.link.endpoint(), cycle, error = %err, "poll cycle failed");
            if let Ok(slot) = self.on_failure.read() {
                if let Some(callback) = slot.as_ref() {
                    callback(&err);
                }
            }
            return Err(err);
        }

        let mut values = HashMap::with_capacity(self.catalog.len());
        let mut unreadable = 0usize;
        for desc in self.catalog.iter() {
            let value = self.read_one(desc).await;
            if value.is_absent() {
                unreadable += 1;
            }
            values.insert(desc.id.clone(), value);
        }

        let snapshot = Arc::new(Snapshot::new(cycle, values));
        self.store.publish(Arc::clone(&snapshot));
        self.metrics.engine.poll_cycles.inc();
        self.set_state(PollState::Idle);
        debug!(
            cycle,
            registers = self.catalog.len(),
            unreadable,
            "poll cycle complete"
        );

        if let Ok(slot) = self.on_snapshot.read() {
            if let Some(callback) = slot.as_ref() {
                callback(Arc::clone(&snapshot));
            }
        }
        Ok(snapshot)
    }

    async fn read_one(&self, desc: &RegisterDescriptor) -> DecodedValue {
        let words = match self
            .link
            .read_words(desc.class, desc.address, desc.word_count())
            .await
        {
            Ok(words) => words,
            Err(e) => {
                warn!(
                    register = %desc.id,
                    class = %desc.class,
                    address = desc.address,
                    error = %e,
                    "error reading register"
                );
                self.metrics.engine.read_errors.inc();
                return DecodedValue::Absent;
            }
        };
        match decode(&words, desc) {
            Ok(value) => value,
            Err(e) => {
                error!(
                    register = %desc.id,
                    address = desc.address,
                    words = ?words,
                    error = %e,
                    "structural decode error"
                );
                self.metrics.engine.read_errors.inc();
                DecodedValue::Absent
            }
        }
    }

    /// Run cycles every `interval` until `shutdown` flips to true. The first
    /// cycle starts immediately; a cycle still running at shutdown is
    /// abandoned.
    pub fn spawn(self: &Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                endpoint = %this.link.endpoint(),
                interval_ms = interval.as_millis() as u64,
                "polling started"
            );
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tokio::select! {
                            // Failures are logged and reported inside the cycle.
                            _ = this.refresh() => {}
                            _ = shutdown.changed() => {
                                debug!(endpoint = %this.link.endpoint(), "in-flight poll cycle abandoned");
                                this.set_state(PollState::Idle);
                                break;
                            }
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!(endpoint = %this.link.endpoint(), "polling stopped");
        })
    }
}

impl CurrentValue for PollCoordinator {
    fn current_value(&self, register_id: &str) -> DecodedValue {
        self.store.load().value(register_id)
    }
}

#[async_trait]
impl RefreshTrigger for PollCoordinator {
    async fn request_refresh(&self) {
        if let Err(e) = self.refresh().await {
            warn!(error = %e, "out-of-band refresh failed");
        }
    }
}
