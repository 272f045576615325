use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Debounce window for writes; 0 commits immediately.
    #[serde(default = "default_write_debounce_ms")]
    pub write_debounce_ms: u64,
    /// Installed heating circuits; registers of other circuits are not polled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuits: Option<u32>,
}

fn default_scan_interval_secs() -> u64 {
    30
}

fn default_write_debounce_ms() -> u64 {
    500
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval_secs(),
            write_debounce_ms: default_write_debounce_ms(),
            circuits: None,
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("reading config: {}", path.display()))?;
            Ok(serde_json::from_str(&contents)
                .with_context(|| format!("parsing config: {}", path.display()))?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }

    pub fn write_debounce(&self) -> Duration {
        Duration::from_millis(self.write_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cfg = EngineConfig::load(dir.path().join("absent.json"))?;
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.scan_interval(), Duration::from_secs(30));
        assert_eq!(cfg.write_debounce(), Duration::from_millis(500));
        Ok(())
    }

    #[test]
    fn partial_file_and_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("engine.json");
        fs::write(&path, r#"{"write_debounce_ms": 0, "circuits": 2}"#)?;
        let cfg = EngineConfig::load(&path)?;
        assert_eq!(cfg.scan_interval_secs, 30);
        assert_eq!(cfg.write_debounce(), Duration::ZERO);
        assert_eq!(cfg.circuits, Some(2));

        cfg.save(&path)?;
        assert_eq!(EngineConfig::load(&path)?, cfg);
        Ok(())
    }
}
