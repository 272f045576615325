use crate::{
    CurrentValue, CycleError, EngineConfig, EngineError, MetricsHub, PollCoordinator, PollState,
    ScheduleOutcome, SharedLink, Snapshot, WriteEvent, WriteScheduler,
};
use modbus_transport::RegisterTransport;
use register_catalog::{DecodedValue, RegisterCatalog};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Polling plus debounced writes over one device connection.
pub struct PollingEngine {
    config: EngineConfig,
    link: SharedLink,
    coordinator: Arc<PollCoordinator>,
    scheduler: WriteScheduler,
    metrics: MetricsHub,
    shutdown_tx: watch::Sender<bool>,
    poller: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl PollingEngine {
    pub fn new(
        catalog: RegisterCatalog,
        transport: impl RegisterTransport + 'static,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let catalog = match config.circuits {
            Some(installed) => {
                let before = catalog.len();
                let kept = catalog.retain_circuits(installed);
                info!(
                    installed,
                    kept = kept.len(),
                    dropped = before - kept.len(),
                    "filtered registers by installed circuits"
                );
                kept
            }
            None => catalog,
        };
        let catalog = Arc::new(catalog);
        let metrics = MetricsHub::new().map_err(EngineError::Metrics)?;
        let link = SharedLink::new(transport);
        let coordinator = Arc::new(PollCoordinator::new(
            Arc::clone(&catalog),
            link.clone(),
            metrics.clone(),
        ));
        let scheduler = WriteScheduler::new(
            catalog,
            link.clone(),
            config.write_debounce(),
            coordinator.clone(),
            coordinator.clone(),
            metrics.clone(),
        );
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            link,
            coordinator,
            scheduler,
            metrics,
            shutdown_tx,
            poller: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Start the interval loop. Calling it again while running is a no-op.
    pub fn start(&self) -> Result<(), EngineError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(EngineError::ShutDown);
        }
        let mut poller = self.poller.lock().map_err(|_| EngineError::ShutDown)?;
        if poller.is_some() {
            debug!("polling already started");
            return Ok(());
        }
        *poller = Some(
            self.coordinator
                .spawn(self.config.scan_interval(), self.shutdown_tx.subscribe()),
        );
        Ok(())
    }

    pub async fn refresh(&self) -> Result<Arc<Snapshot>, EngineError> {
        Ok(self.coordinator.refresh().await?)
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.coordinator.snapshot()
    }

    pub fn state(&self) -> PollState {
        self.coordinator.state()
    }

    pub fn catalog(&self) -> &RegisterCatalog {
        self.coordinator.catalog()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn schedule_write(
        &self,
        register_id: &str,
        value: impl Into<DecodedValue>,
    ) -> Result<ScheduleOutcome, EngineError> {
        self.scheduler.schedule(register_id, value.into()).await
    }

    pub fn cancel_write(&self, register_id: &str) -> bool {
        self.scheduler.cancel(register_id)
    }

    pub fn pending_write(&self, register_id: &str) -> Option<DecodedValue> {
        self.scheduler.pending_value(register_id)
    }

    /// Compare writes to `register_id` against `source` instead of the last
    /// snapshot.
    pub fn set_value_source(&self, register_id: &str, source: Arc<dyn CurrentValue>) {
        self.scheduler.set_value_source(register_id, source);
    }

    pub fn on_snapshot<F>(&self, callback: F)
    where
        F: Fn(Arc<Snapshot>) + Send + Sync + 'static,
    {
        self.coordinator.set_snapshot_callback(callback);
    }

    /// Invoked when a poll cycle fails as a whole, e.g. on connect failure.
    pub fn on_cycle_failed<F>(&self, callback: F)
    where
        F: Fn(&CycleError) + Send + Sync + 'static,
    {
        self.coordinator.set_failure_callback(callback);
    }

    pub fn on_write<F>(&self, callback: F)
    where
        F: Fn(&WriteEvent) + Send + Sync + 'static,
    {
        self.scheduler.set_write_callback(callback);
    }

    pub fn metrics(&self) -> &MetricsHub {
        &self.metrics
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Stop polling, drop pending writes and close the transport. A poll
    /// cycle in progress is abandoned rather than awaited. Safe to call more
    /// than once.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            debug!("engine already shut down");
            return;
        }
        let _ = self.shutdown_tx.send(true);
        let dropped = self.scheduler.close();
        let poller = self.poller.lock().ok().and_then(|mut p| p.take());
        if let Some(handle) = poller {
            if let Err(e) = handle.await {
                warn!(error = %e, "poll loop ended abnormally");
            }
        }
        self.link.close().await;
        info!(
            endpoint = %self.link.endpoint(),
            dropped_writes = dropped,
            "engine shut down"
        );
    }
}
