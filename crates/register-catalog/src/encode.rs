use crate::{DecodedValue, EncodeError, RegisterDescriptor, ValueEncoding};
use modbus_transport::Word;

/// Encode an application value into the words to write for `desc`.
///
/// Uses the same big-endian, high-word-first layout as [`crate::decode`].
pub fn encode(value: &DecodedValue, desc: &RegisterDescriptor) -> Result<Vec<Word>, EncodeError> {
    if !desc.is_writable() {
        return Err(EncodeError::NotWritable(desc.id.clone()));
    }
    if desc.encoding == ValueEncoding::Unknown {
        return Err(EncodeError::UnsupportedEncoding(desc.id.clone()));
    }

    if let Some(map) = &desc.value_map {
        let raw = map.raw_for(value).ok_or_else(|| EncodeError::InvalidOption {
            id: desc.id.clone(),
            value: value.to_string(),
        })?;
        return raw_words(raw as f64, desc);
    }

    if desc.encoding == ValueEncoding::Boolean {
        let truth = match value {
            DecodedValue::Text(s) => DecodedValue::parse_input(s).as_bool(),
            other => other.as_bool(),
        };
        return match truth {
            Some(b) => Ok(vec![Word::from(b)]),
            None => Err(invalid(value, desc)),
        };
    }

    let v = value.as_f64().ok_or_else(|| invalid(value, desc))?;
    check_bounds(v, desc)?;
    if desc.scale == 0.0 {
        return Err(EncodeError::DivisionByZero(desc.id.clone()));
    }
    let scaled = (v - desc.offset) / desc.scale;
    if desc.encoding == ValueEncoding::Float32 {
        return raw_words(scaled, desc);
    }
    raw_words(scaled.round_ties_even(), desc)
}

fn invalid(value: &DecodedValue, desc: &RegisterDescriptor) -> EncodeError {
    EncodeError::InvalidValue {
        id: desc.id.clone(),
        value: value.to_string(),
    }
}

fn check_bounds(v: f64, desc: &RegisterDescriptor) -> Result<(), EncodeError> {
    let min = desc.bounds.min.unwrap_or(f64::NEG_INFINITY);
    let max = desc.bounds.max.unwrap_or(f64::INFINITY);
    if v.is_nan() || v < min || v > max {
        return Err(EncodeError::OutOfRange {
            id: desc.id.clone(),
            value: v,
            min,
            max,
        });
    }
    Ok(())
}

/// Lay out an already-transformed raw value in the descriptor's encoding.
fn raw_words(raw: f64, desc: &RegisterDescriptor) -> Result<Vec<Word>, EncodeError> {
    if desc.encoding == ValueEncoding::Float32 {
        let f = raw as f32;
        if !f.is_finite() {
            return Err(EncodeError::OutOfRange {
                id: desc.id.clone(),
                value: raw,
                min: f32::MIN as f64,
                max: f32::MAX as f64,
            });
        }
        return Ok(split(f.to_bits()));
    }

    let (min, max) = desc
        .encoding
        .integer_range()
        .ok_or_else(|| EncodeError::UnsupportedEncoding(desc.id.clone()))?;
    if !raw.is_finite() || raw < min as f64 || raw > max as f64 {
        return Err(EncodeError::OutOfRange {
            id: desc.id.clone(),
            value: raw,
            min: min as f64,
            max: max as f64,
        });
    }
    let int = raw as i64;
    Ok(match desc.encoding {
        ValueEncoding::Int16 => vec![int as i16 as u16],
        ValueEncoding::Int32 => split(int as i32 as u32),
        ValueEncoding::Uint32 => split(int as u32),
        _ => vec![int as u16],
    })
}

fn split(bits: u32) -> Vec<Word> {
    vec![(bits >> 16) as Word, (bits & 0xFFFF) as Word]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decode, RegisterClass, ValueMap};

    fn holding(encoding: ValueEncoding) -> RegisterDescriptor {
        RegisterDescriptor::new("w", RegisterClass::Holding, 7, encoding)
    }

    #[test]
    fn scales_before_rounding() {
        let d = holding(ValueEncoding::Int16).with_transform(2.0, 0.0);
        assert_eq!(encode(&4.0.into(), &d), Ok(vec![2]));
        let d = holding(ValueEncoding::Int16).with_transform(0.5, -10.0);
        assert_eq!(encode(&(-12.0).into(), &d), Ok(vec![(-4i16) as u16]));
    }

    #[test]
    fn width_limits() {
        let d = holding(ValueEncoding::Int16);
        assert!(matches!(
            encode(&40000.0.into(), &d),
            Err(EncodeError::OutOfRange { .. })
        ));
        assert_eq!(encode(&(-32768.0).into(), &d), Ok(vec![0x8000]));
        let d = holding(ValueEncoding::Uint16);
        assert!(matches!(
            encode(&(-1.0).into(), &d),
            Err(EncodeError::OutOfRange { .. })
        ));
        assert_eq!(encode(&65535.0.into(), &d), Ok(vec![0xFFFF]));
    }

    #[test]
    fn read_only_and_zero_scale() {
        let d = RegisterDescriptor::new("ro", RegisterClass::Input, 0, ValueEncoding::Uint16);
        assert_eq!(
            encode(&1.0.into(), &d),
            Err(EncodeError::NotWritable("ro".into()))
        );
        let d = holding(ValueEncoding::Uint16).with_transform(0.0, 0.0);
        assert_eq!(
            encode(&10.0.into(), &d),
            Err(EncodeError::DivisionByZero("w".into()))
        );
    }

    #[test]
    fn value_map_reverse_lookup() {
        let d = holding(ValueEncoding::Uint16)
            .with_transform(2.0, 0.0)
            .with_value_map(ValueMap::from_pairs([(0, "Off"), (1, "On"), (2, "Auto")]));
        assert_eq!(encode(&"Auto".into(), &d), Ok(vec![2]));
        assert!(matches!(
            encode(&"auto".into(), &d),
            Err(EncodeError::InvalidOption { .. })
        ));
        assert!(matches!(
            encode(&5.0.into(), &d),
            Err(EncodeError::InvalidOption { .. })
        ));
    }

    #[test]
    fn boolean_inputs() {
        let d = holding(ValueEncoding::Uint16);
        assert_eq!(encode(&true.into(), &d), Ok(vec![1]));
        let d = holding(ValueEncoding::Boolean).with_transform(10.0, 3.0);
        assert_eq!(encode(&true.into(), &d), Ok(vec![1]));
        assert_eq!(encode(&0.0.into(), &d), Ok(vec![0]));
        assert_eq!(encode(&"true".into(), &d), Ok(vec![1]));
        assert!(matches!(
            encode(&"maybe".into(), &d),
            Err(EncodeError::InvalidValue { .. })
        ));
    }

    #[test]
    fn text_and_absent_inputs() {
        let d = holding(ValueEncoding::Uint16);
        assert_eq!(encode(&"42".into(), &d), Ok(vec![42]));
        assert!(matches!(
            encode(&"warm".into(), &d),
            Err(EncodeError::InvalidValue { .. })
        ));
        assert!(matches!(
            encode(&DecodedValue::Absent, &d),
            Err(EncodeError::InvalidValue { .. })
        ));
        assert!(matches!(
            encode(&1.0.into(), &holding(ValueEncoding::Unknown)),
            Err(EncodeError::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn declared_bounds() {
        let d = holding(ValueEncoding::Uint16).with_bounds(Some(20.0), Some(60.0));
        assert!(matches!(
            encode(&65.0.into(), &d),
            Err(EncodeError::OutOfRange { min, max, .. }) if min == 20.0 && max == 60.0
        ));
        assert_eq!(encode(&60.0.into(), &d), Ok(vec![60]));
    }

    #[test]
    fn wide_layouts_are_high_word_first() {
        assert_eq!(
            encode(&10.0.into(), &holding(ValueEncoding::Float32)),
            Ok(vec![0x4120, 0x0000])
        );
        assert_eq!(
            encode(&65538.0.into(), &holding(ValueEncoding::Uint32)),
            Ok(vec![0x0001, 0x0002])
        );
        assert_eq!(
            encode(&(-2.0).into(), &holding(ValueEncoding::Int32)),
            Ok(vec![0xFFFF, 0xFFFE])
        );
        assert!(matches!(
            encode(&1e39.into(), &holding(ValueEncoding::Float32)),
            Err(EncodeError::OutOfRange { .. })
        ));
    }

    #[test]
    fn decode_inverts_encode_within_precision() -> anyhow::Result<()> {
        let cases = [
            (holding(ValueEncoding::Int16).with_transform(0.1, 0.0).with_precision(1), -12.3),
            (holding(ValueEncoding::Uint16).with_transform(0.5, 1.0).with_precision(1), 6.0),
            (holding(ValueEncoding::Int32).with_transform(0.01, 0.0).with_precision(2), -2000.55),
            (holding(ValueEncoding::Uint32), 3_000_000_000.0),
            (holding(ValueEncoding::Float32).with_precision(2), 21.75),
            (holding(ValueEncoding::Float32).with_transform(2.0, -1.0).with_precision(3), 0.123),
        ];
        for (d, v) in cases {
            let words = encode(&v.into(), &d)?;
            assert_eq!(words.len(), d.word_count() as usize);
            let back = decode(&words, &d)?;
            let n = back.as_f64().unwrap_or(f64::NAN);
            let tolerance = 10f64.powi(-(d.precision.unwrap_or(0) as i32)) / 2.0;
            assert!((n - v).abs() <= tolerance, "{:?}: {v} -> {n}", d.encoding);
        }
        let flag = holding(ValueEncoding::Boolean);
        assert_eq!(decode(&encode(&true.into(), &flag)?, &flag)?, DecodedValue::Flag(true));
        let mapped = holding(ValueEncoding::Uint16).with_value_map(ValueMap::from_pairs([(3, "Eco")]));
        assert_eq!(
            decode(&encode(&"Eco".into(), &mapped)?, &mapped)?,
            DecodedValue::Text("Eco".into())
        );
        Ok(())
    }
}
