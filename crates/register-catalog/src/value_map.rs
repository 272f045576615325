use crate::{CatalogError, DecodedValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ReverseKey {
    Number(u64),
    Text(String),
    Flag(bool),
}

impl ReverseKey {
    fn of(value: &DecodedValue) -> Option<Self> {
        match value {
            // Normalise -0.0 so it matches 0.0.
            DecodedValue::Number(n) => Some(ReverseKey::Number((*n + 0.0).to_bits())),
            DecodedValue::Text(s) => Some(ReverseKey::Text(s.clone())),
            DecodedValue::Flag(b) => Some(ReverseKey::Flag(*b)),
            DecodedValue::Absent => None,
        }
    }
}

/// Enumeration translating raw integer codes to display values and back.
///
/// Both directions are built once when the catalog is loaded. Display value
/// matching is case-sensitive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, DecodedValue>",
    into = "BTreeMap<String, DecodedValue>"
)]
pub struct ValueMap {
    forward: BTreeMap<i64, DecodedValue>,
    reverse: HashMap<ReverseKey, i64>,
}

impl ValueMap {
    pub fn from_pairs<I, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (i64, V)>,
        V: Into<DecodedValue>,
    {
        let mut map = ValueMap::default();
        for (raw, display) in pairs {
            map.insert(raw, display.into());
        }
        map
    }

    fn insert(&mut self, raw: i64, display: DecodedValue) {
        if let Some(key) = ReverseKey::of(&display) {
            // First raw code wins when two codes share a display value.
            self.reverse.entry(key).or_insert(raw);
        }
        self.forward.insert(raw, display);
    }

    pub fn display(&self, raw: i64) -> Option<&DecodedValue> {
        self.forward.get(&raw)
    }

    pub fn raw_for(&self, display: &DecodedValue) -> Option<i64> {
        ReverseKey::of(display).and_then(|k| self.reverse.get(&k).copied())
    }

    /// Display values in raw-code order, e.g. for select options.
    pub fn options(&self) -> impl Iterator<Item = &DecodedValue> {
        self.forward.values()
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

impl PartialEq for ValueMap {
    fn eq(&self, other: &Self) -> bool {
        self.forward == other.forward
    }
}

impl TryFrom<BTreeMap<String, DecodedValue>> for ValueMap {
    type Error = CatalogError;

    fn try_from(raw: BTreeMap<String, DecodedValue>) -> Result<Self, Self::Error> {
        let mut map = ValueMap::default();
        for (key, display) in raw {
            let code = key
                .trim()
                .parse::<i64>()
                .map_err(|_| CatalogError::InvalidValueMap(key.clone()))?;
            if display.is_absent() {
                continue;
            }
            map.insert(code, display);
        }
        Ok(map)
    }
}

impl From<ValueMap> for BTreeMap<String, DecodedValue> {
    fn from(map: ValueMap) -> Self {
        map.forward
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_both_directions_from_catalog_json() -> anyhow::Result<()> {
        let map: ValueMap = serde_json::from_str(r#"{"0": "Off", "1": "On", "2": "Auto"}"#)?;
        assert_eq!(map.len(), 3);
        assert_eq!(map.display(1), Some(&DecodedValue::Text("On".into())));
        assert_eq!(map.raw_for(&DecodedValue::Text("Auto".into())), Some(2));
        assert_eq!(map.raw_for(&DecodedValue::Text("auto".into())), None);
        Ok(())
    }

    #[test]
    fn boolean_display_values() -> anyhow::Result<()> {
        let map: ValueMap = serde_json::from_str(r#"{"0": false, "1": true}"#)?;
        assert_eq!(map.display(0), Some(&DecodedValue::Flag(false)));
        assert_eq!(map.raw_for(&DecodedValue::Flag(true)), Some(1));
        Ok(())
    }

    #[test]
    fn rejects_non_integer_keys() {
        let res: Result<ValueMap, _> = serde_json::from_str(r#"{"one": "On"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn serializes_back_to_string_keys() -> anyhow::Result<()> {
        let map = ValueMap::from_pairs([(-1, "Fault"), (3, "Heating")]);
        assert_eq!(
            serde_json::to_string(&map)?,
            r#"{"-1":"Fault","3":"Heating"}"#
        );
        Ok(())
    }
}
