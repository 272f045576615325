use arc_swap::ArcSwap;
use register_catalog::DecodedValue;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use time::OffsetDateTime;

/// The immutable result of one complete poll cycle.
#[derive(Debug, Clone)]
pub struct Snapshot {
    cycle: u64,
    taken_at: Option<OffsetDateTime>,
    values: HashMap<String, DecodedValue>,
}

impl Snapshot {
    /// The snapshot visible before the first cycle completes.
    pub fn empty() -> Self {
        Self {
            cycle: 0,
            taken_at: None,
            values: HashMap::new(),
        }
    }

    pub fn new(cycle: u64, values: HashMap<String, DecodedValue>) -> Self {
        Self {
            cycle,
            taken_at: Some(OffsetDateTime::now_utc()),
            values,
        }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn taken_at(&self) -> Option<OffsetDateTime> {
        self.taken_at
    }

    pub fn get(&self, id: &str) -> Option<&DecodedValue> {
        self.values.get(id)
    }

    /// Value for `id`, `Absent` when missing or unreadable.
    pub fn value(&self, id: &str) -> DecodedValue {
        self.values.get(id).cloned().unwrap_or_default()
    }

    pub fn values(&self) -> &HashMap<String, DecodedValue> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_record(&self) -> SnapshotRecord {
        SnapshotRecord {
            cycle: self.cycle,
            ts: self.taken_at.and_then(|t| {
                t.format(&time::format_description::well_known::Rfc3339)
                    .ok()
            }),
            values: self
                .values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// Serializable form of a [`Snapshot`] with stable key order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub cycle: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
    pub values: BTreeMap<String, DecodedValue>,
}

/// Latest published snapshot; readers never observe a partial cycle.
pub struct SnapshotStore {
    current: ArcSwap<Snapshot>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::empty()),
        }
    }

    pub fn load(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn publish(&self, snapshot: Arc<Snapshot>) {
        self.current.store(snapshot);
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}
