use crate::{CatalogError, ValueMap};
use serde::{Deserialize, Serialize};

pub use modbus_transport::RegisterClass;

/// Binary layout of a register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueEncoding {
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Boolean,
    /// Any encoding name the codec does not know; decodes the first word as
    /// an unsigned integer.
    #[serde(other)]
    Unknown,
}

impl ValueEncoding {
    /// Number of 16-bit words the encoding occupies.
    pub fn word_count(&self) -> u16 {
        match self {
            ValueEncoding::Int32 | ValueEncoding::Uint32 | ValueEncoding::Float32 => 2,
            _ => 1,
        }
    }

    /// Inclusive integer range representable by the encoding, if integral.
    pub fn integer_range(&self) -> Option<(i64, i64)> {
        match self {
            ValueEncoding::Int16 => Some((i16::MIN as i64, i16::MAX as i64)),
            ValueEncoding::Uint16 => Some((0, u16::MAX as i64)),
            ValueEncoding::Int32 => Some((i32::MIN as i64, i32::MAX as i64)),
            ValueEncoding::Uint32 => Some((0, u32::MAX as i64)),
            ValueEncoding::Boolean => Some((0, 1)),
            ValueEncoding::Float32 | ValueEncoding::Unknown => None,
        }
    }
}

/// Static metadata for one addressable value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDescriptor {
    #[serde(rename = "unique_id")]
    pub id: String,
    pub name: String,
    #[serde(rename = "register_type")]
    pub class: RegisterClass,
    pub address: u16,
    #[serde(rename = "length", default, skip_serializing_if = "Option::is_none")]
    pub declared_words: Option<u16>,
    #[serde(rename = "data_type", default = "default_encoding")]
    pub encoding: ValueEncoding,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_map: Option<ValueMap>,
    #[serde(flatten)]
    pub bounds: Bounds,
    #[serde(flatten)]
    pub presentation: Presentation,
}

fn default_encoding() -> ValueEncoding {
    ValueEncoding::Uint16
}

fn default_scale() -> f64 {
    1.0
}

/// Numeric bounds for range-constrained writable values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    #[serde(rename = "native_min_value", default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(rename = "native_max_value", default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(rename = "native_step", default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
}

/// Metadata consumed by the presentation layer; carried through untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Presentation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    /// Logical device group, e.g. `heat_pump` or `circuit_2`.
    #[serde(rename = "device", default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_platform: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled_default: bool,
}

fn default_enabled() -> bool {
    true
}

impl RegisterDescriptor {
    /// Minimal descriptor; remaining fields take their catalog defaults.
    pub fn new(id: &str, class: RegisterClass, address: u16, encoding: ValueEncoding) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            class,
            address,
            declared_words: None,
            encoding,
            scale: default_scale(),
            offset: 0.0,
            precision: None,
            value_map: None,
            bounds: Bounds::default(),
            presentation: Presentation {
                enabled_default: true,
                ..Presentation::default()
            },
        }
    }

    pub fn with_transform(mut self, scale: f64, offset: f64) -> Self {
        self.scale = scale;
        self.offset = offset;
        self
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn with_value_map(mut self, map: ValueMap) -> Self {
        self.value_map = Some(map);
        self
    }

    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.bounds.min = min;
        self.bounds.max = max;
        self
    }

    /// Words read per poll: the declared length, else the encoding's width.
    pub fn word_count(&self) -> u16 {
        self.declared_words
            .unwrap_or_else(|| self.encoding.word_count())
    }

    pub fn is_writable(&self) -> bool {
        self.class.is_writable()
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        if let Some(declared) = self.declared_words {
            let expected = self.encoding.word_count();
            if self.encoding != ValueEncoding::Unknown && declared != expected {
                return Err(CatalogError::WordCountMismatch {
                    id: self.id.clone(),
                    declared,
                    expected,
                });
            }
            if declared == 0 {
                return Err(CatalogError::WordCountMismatch {
                    id: self.id.clone(),
                    declared,
                    expected: 1,
                });
            }
        }
        Ok(())
    }
}
