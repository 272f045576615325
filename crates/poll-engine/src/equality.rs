use register_catalog::{round_to_precision, DecodedValue};

/// Whether writing `new` over `current` would change nothing.
///
/// Text on either side compares by display form, a flag on either side
/// compares by truth value, numbers compare after rounding to `precision`
/// when one is given. An absent current value never matches.
pub fn values_equal(current: &DecodedValue, new: &DecodedValue, precision: Option<u32>) -> bool {
    use DecodedValue::{Absent, Flag, Number, Text};
    match (current, new) {
        (Absent, _) | (_, Absent) => false,
        (Text(_), _) | (_, Text(_)) => current.to_string() == new.to_string(),
        (Flag(_), _) | (_, Flag(_)) => current.as_bool() == new.as_bool(),
        (Number(a), Number(b)) => match precision {
            Some(p) => round_to_precision(*a, p) == round_to_precision(*b, p),
            None => a == b,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_never_matches() {
        assert!(!values_equal(&DecodedValue::Absent, &1.0.into(), None));
    }

    #[test]
    fn text_compares_exactly() {
        assert!(values_equal(&"a".into(), &"a".into(), None));
        assert!(!values_equal(&"a".into(), &"b".into(), None));
        assert!(!values_equal(&"On".into(), &"on".into(), None));
    }

    #[test]
    fn flags_compare_by_truth() {
        assert!(values_equal(&true.into(), &1.0.into(), None));
        assert!(values_equal(&false.into(), &0.0.into(), None));
        assert!(!values_equal(&false.into(), &1.0.into(), None));
    }

    #[test]
    fn numbers_respect_precision() {
        assert!(!values_equal(&1.234.into(), &1.235.into(), Some(2)));
        assert!(values_equal(&1.234.into(), &1.2339.into(), Some(2)));
        assert!(values_equal(&5.0.into(), &5.0.into(), None));
        assert!(!values_equal(&5.0.into(), &6.0.into(), None));
    }
}
