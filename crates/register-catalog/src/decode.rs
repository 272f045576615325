use crate::{DecodeError, DecodedValue, RegisterDescriptor, ValueEncoding};
use modbus_transport::Word;
use tracing::debug;

/// A register value before any catalog transform is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue {
    Int(i64),
    Float(f32),
}

impl RawValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            RawValue::Int(i) => *i as f64,
            RawValue::Float(f) => *f as f64,
        }
    }

    /// Integer key used for value-map lookups; floats truncate toward zero.
    pub fn map_key(&self) -> Option<i64> {
        match self {
            RawValue::Int(i) => Some(*i),
            RawValue::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            RawValue::Float(_) => None,
        }
    }
}

/// Reinterpret big-endian, high-word-first words according to `encoding`.
pub fn decode_raw(words: &[Word], encoding: ValueEncoding) -> Result<RawValue, DecodeError> {
    if words.is_empty() {
        return Err(DecodeError::EmptyInput);
    }
    let needed = encoding.word_count() as usize;
    if words.len() < needed {
        return Err(DecodeError::Truncated {
            expected: needed,
            actual: words.len(),
        });
    }
    let wide = || (u32::from(words[0]) << 16) | u32::from(words[1]);
    Ok(match encoding {
        ValueEncoding::Int16 => RawValue::Int(i64::from(words[0] as i16)),
        ValueEncoding::Uint16 | ValueEncoding::Boolean | ValueEncoding::Unknown => {
            RawValue::Int(i64::from(words[0]))
        }
        ValueEncoding::Int32 => RawValue::Int(i64::from(wide() as i32)),
        ValueEncoding::Uint32 => RawValue::Int(i64::from(wide())),
        ValueEncoding::Float32 => RawValue::Float(f32::from_bits(wide())),
    })
}

/// `raw * scale + offset`, or `None` when the arithmetic is not finite.
pub fn apply_linear(raw: f64, scale: f64, offset: f64) -> Option<f64> {
    if !scale.is_finite() || !offset.is_finite() {
        return None;
    }
    let v = raw * scale + offset;
    v.is_finite().then_some(v)
}

/// Round half-to-even at `places` decimal places. Non-finite input and
/// precisions too large to scale are returned unchanged.
pub fn round_to_precision(value: f64, places: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(places.min(i32::MAX as u32) as i32);
    if !factor.is_finite() {
        return value;
    }
    let scaled = value * factor;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round_ties_even() / factor
}

/// Decode one register's words into its application value.
///
/// Order of operations: raw reinterpretation, value-map lookup on the raw
/// integer, boolean coercion, linear transform, precision rounding. A
/// transform fault yields the raw value; only structural problems are errors.
pub fn decode(words: &[Word], desc: &RegisterDescriptor) -> Result<DecodedValue, DecodeError> {
    let raw = decode_raw(words, desc.encoding)?;

    if let (Some(map), Some(key)) = (&desc.value_map, raw.map_key()) {
        if let Some(display) = map.display(key) {
            return Ok(display.clone());
        }
    }

    if desc.encoding == ValueEncoding::Boolean {
        return Ok(DecodedValue::Flag(raw.as_f64() != 0.0));
    }

    let unscaled = raw.as_f64();
    let Some(numeric) = apply_linear(unscaled, desc.scale, desc.offset) else {
        debug!(
            register = %desc.id,
            scale = desc.scale,
            offset = desc.offset,
            "transform fault, publishing raw value"
        );
        return Ok(DecodedValue::Number(unscaled));
    };

    Ok(DecodedValue::Number(match desc.precision {
        Some(places) => round_to_precision(numeric, places),
        None => numeric,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RegisterClass, ValueMap};

    fn input(encoding: ValueEncoding) -> RegisterDescriptor {
        RegisterDescriptor::new("r", RegisterClass::Input, 0, encoding)
    }

    #[test]
    fn float32_high_word_first() {
        let d = input(ValueEncoding::Float32).with_precision(2);
        assert_eq!(decode(&[0x4120, 0x0000], &d), Ok(DecodedValue::Number(10.0)));
        let d = input(ValueEncoding::Float32);
        assert_eq!(decode(&[0x447A, 0x0000], &d), Ok(DecodedValue::Number(1000.0)));
    }

    #[test]
    fn uint16_scale_offset_precision() {
        let d = input(ValueEncoding::Uint16)
            .with_transform(0.5, 1.0)
            .with_precision(1);
        assert_eq!(decode(&[10], &d), Ok(DecodedValue::Number(6.0)));
    }

    #[test]
    fn signed_and_wide_integers() {
        assert_eq!(
            decode(&[0xFF9C], &input(ValueEncoding::Int16)),
            Ok(DecodedValue::Number(-100.0))
        );
        assert_eq!(
            decode(&[0x0001, 0x0002], &input(ValueEncoding::Uint32)),
            Ok(DecodedValue::Number(65538.0))
        );
        assert_eq!(
            decode(&[0xFFFF, 0xFFFE], &input(ValueEncoding::Int32)),
            Ok(DecodedValue::Number(-2.0))
        );
        assert_eq!(
            decode(&[0xFFFF, 0xFFFF], &input(ValueEncoding::Uint32)),
            Ok(DecodedValue::Number(4_294_967_295.0))
        );
    }

    #[test]
    fn every_16_bit_word_stays_in_range() {
        let signed = input(ValueEncoding::Int16);
        let unsigned = input(ValueEncoding::Uint16);
        for w in 0..=u16::MAX {
            let Ok(DecodedValue::Number(s)) = decode(&[w], &signed) else {
                panic!("int16 decode failed for {w}");
            };
            assert!((-32768.0..=32767.0).contains(&s));
            let Ok(DecodedValue::Number(u)) = decode(&[w], &unsigned) else {
                panic!("uint16 decode failed for {w}");
            };
            assert!((0.0..=65535.0).contains(&u));
        }
    }

    #[test]
    fn value_map_wins_over_transform() {
        let d = input(ValueEncoding::Uint16)
            .with_transform(2.0, 0.0)
            .with_value_map(ValueMap::from_pairs([(1, "On")]));
        assert_eq!(decode(&[1], &d), Ok(DecodedValue::Text("On".into())));
        // Unmapped codes fall through to the transform.
        assert_eq!(decode(&[3], &d), Ok(DecodedValue::Number(6.0)));
    }

    #[test]
    fn boolean_skips_transform() {
        let d = input(ValueEncoding::Boolean).with_transform(10.0, 5.0);
        assert_eq!(decode(&[0], &d), Ok(DecodedValue::Flag(false)));
        assert_eq!(decode(&[7], &d), Ok(DecodedValue::Flag(true)));
    }

    #[test]
    fn unknown_encoding_uses_first_word() {
        let d = input(ValueEncoding::Unknown);
        assert_eq!(decode(&[123, 9], &d), Ok(DecodedValue::Number(123.0)));
    }

    #[test]
    fn transform_fault_returns_raw() {
        let d = input(ValueEncoding::Uint16).with_transform(f64::NAN, 0.0);
        assert_eq!(decode(&[5], &d), Ok(DecodedValue::Number(5.0)));
        let d = input(ValueEncoding::Uint16).with_transform(1.0, f64::INFINITY);
        assert_eq!(decode(&[5], &d), Ok(DecodedValue::Number(5.0)));
        assert_eq!(apply_linear(5.0, 1e300, 0.0).map(|v| v > 0.0), Some(true));
        assert_eq!(apply_linear(f64::MAX, f64::MAX, 0.0), None);
    }

    #[test]
    fn structural_errors() {
        let d = input(ValueEncoding::Float32);
        assert_eq!(decode(&[], &d), Err(DecodeError::EmptyInput));
        assert_eq!(
            decode(&[0x4120], &d),
            Err(DecodeError::Truncated {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn rounding_is_half_to_even() {
        assert_eq!(round_to_precision(0.125, 2), 0.12);
        assert_eq!(round_to_precision(0.375, 2), 0.38);
        assert_eq!(round_to_precision(2.5, 0), 2.0);
        assert_eq!(round_to_precision(-1.25, 1), -1.2);
        assert_eq!(round_to_precision(1.0, 400), 1.0);
        assert!(round_to_precision(f64::NAN, 2).is_nan());
    }
}
