use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct EngineMetrics {
    pub poll_cycles: IntCounter,
    pub poll_failures: IntCounter,
    pub read_errors: IntCounter,
    pub writes_committed: IntCounter,
    pub writes_skipped: IntCounter,
    pub writes_failed: IntCounter,
    pub registers_loaded: IntGauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub engine: EngineMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let counter = |name: &str, help: &str| {
            IntCounter::new(name, help).map_err(|e| format!("metrics init error: {e}"))
        };
        let engine = EngineMetrics {
            poll_cycles: counter("rp_poll_cycles_total", "Completed poll cycles")?,
            poll_failures: counter(
                "rp_poll_cycle_failures_total",
                "Poll cycles that could not start",
            )?,
            read_errors: counter(
                "rp_register_read_errors_total",
                "Register reads that yielded no value",
            )?,
            writes_committed: counter("rp_writes_committed_total", "Register writes sent")?,
            writes_skipped: counter(
                "rp_writes_skipped_total",
                "Debounced writes dropped because the value already matched",
            )?,
            writes_failed: counter("rp_writes_failed_total", "Register writes that failed")?,
            registers_loaded: IntGauge::new("rp_registers_loaded", "Number of registers polled")
                .map_err(|e| format!("metrics init error: {e}"))?,
        };
        let _ = registry.register(Box::new(engine.poll_cycles.clone()));
        let _ = registry.register(Box::new(engine.poll_failures.clone()));
        let _ = registry.register(Box::new(engine.read_errors.clone()));
        let _ = registry.register(Box::new(engine.writes_committed.clone()));
        let _ = registry.register(Box::new(engine.writes_skipped.clone()));
        let _ = registry.register(Box::new(engine.writes_failed.clone()));
        let _ = registry.register(Box::new(engine.registers_loaded.clone()));
        Ok(Self { registry, engine })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_registered_series() -> Result<(), String> {
        let hub = MetricsHub::new()?;
        hub.engine.writes_committed.inc();
        hub.engine.registers_loaded.set(4);
        let text = hub.encode_text();
        assert!(text.contains("rp_writes_committed_total 1"));
        assert!(text.contains("rp_registers_loaded 4"));
        Ok(())
    }
}
