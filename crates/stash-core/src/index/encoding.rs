//! Canonical digit sequences.
//!
//! A number is scaled by `10^fraction_digits`, rounded to the nearest whole
//! magnitude `m` and rendered as a sign character followed by exactly
//! `W = integer_digits + fraction_digits` decimal digits:
//!
//! ```text
//!  v >= 0 (after rounding)   P{m:0W}
//!  v <  0                    N{(10^W - 1) - m:0W}
//! ```
//!
//! `N` sorts before `P` and negative magnitudes are stored as complements,
//! so plain string comparison of two keys agrees with numeric comparison of
//! the values they were computed from (rounding can merge neighbours but
//! never reorders them).

use crate::schema::NumericDomain;
use crate::value::Number;

const NEGATIVE: char = 'N';
const POSITIVE: char = 'P';

/// Why a number has no canonical key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DomainOverflow {
    /// Below the smallest encodable value.
    Below,
    /// Above the largest encodable value.
    Above,
    /// NaN.
    NotANumber,
}

/// A canonical key plus whether computing it lost information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Canonical {
    pub(crate) key: String,
    pub(crate) lossy: bool,
}

fn pow10(exp: u8) -> u128 {
    10u128.saturating_pow(u32::from(exp))
}

fn max_magnitude(domain: NumericDomain) -> u128 {
    pow10(domain.width()).saturating_sub(1)
}

fn render(domain: NumericDomain, negative: bool, magnitude: u128) -> String {
    let width = usize::from(domain.width());
    if negative && magnitude > 0 {
        let digits = max_magnitude(domain).saturating_sub(magnitude);
        format!("{NEGATIVE}{digits:0width$}")
    } else {
        format!("{POSITIVE}{magnitude:0width$}")
    }
}

/// Length of every canonical key in `domain`, sign included.
pub(crate) fn key_len(domain: NumericDomain) -> usize {
    usize::from(domain.width()).saturating_add(1)
}

/// Key of the smallest encodable value.
pub(crate) fn min_key(domain: NumericDomain) -> String {
    render(domain, true, max_magnitude(domain))
}

/// Key of the largest encodable value.
pub(crate) fn max_key(domain: NumericDomain) -> String {
    render(domain, false, max_magnitude(domain))
}

/// Compute the canonical key of `value`.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub(crate) fn encode(domain: NumericDomain, value: Number) -> Result<Canonical, DomainOverflow> {
    let max = max_magnitude(domain);
    let overflow = |negative: bool| {
        if negative {
            DomainOverflow::Below
        } else {
            DomainOverflow::Above
        }
    };

    match value {
        Number::Int(i) => {
            let magnitude = u128::from(i.unsigned_abs())
                .checked_mul(pow10(domain.fraction_digits))
                .filter(|m| *m <= max)
                .ok_or_else(|| overflow(i < 0))?;
            Ok(Canonical {
                key: render(domain, i < 0, magnitude),
                lossy: false,
            })
        },
        Number::Float(f) => {
            if f.is_nan() {
                return Err(DomainOverflow::NotANumber);
            }
            let negative = f < 0.0;
            let scaled = (f.abs() * 10f64.powi(i32::from(domain.fraction_digits))).round();
            // `max as f64` may round up to 10^W; the integer check catches that.
            if !(scaled <= max as f64) {
                return Err(overflow(negative));
            }
            let magnitude = scaled as u128;
            if magnitude > max {
                return Err(overflow(negative));
            }
            let quantised = magnitude_value(domain, negative, magnitude);
            Ok(Canonical {
                key: render(domain, negative, magnitude),
                lossy: Number::Float(f).cmp_total(&quantised) != std::cmp::Ordering::Equal,
            })
        },
    }
}

/// The (quantised) value a canonical key stands for.
pub(crate) fn decode(domain: NumericDomain, key: &str) -> Option<Number> {
    if key.len() != key_len(domain) {
        return None;
    }
    let mut chars = key.chars();
    let sign = chars.next()?;
    let digits: u128 = chars.as_str().parse().ok()?;
    let max = max_magnitude(domain);
    if digits > max {
        return None;
    }
    let (negative, magnitude) = match sign {
        NEGATIVE => (true, max.saturating_sub(digits)),
        POSITIVE => (false, digits),
        _ => return None,
    };
    Some(magnitude_value(domain, negative, magnitude))
}

#[allow(clippy::cast_precision_loss)]
fn magnitude_value(domain: NumericDomain, negative: bool, magnitude: u128) -> Number {
    if domain.fraction_digits == 0 {
        let signed = i128::try_from(magnitude)
            .ok()
            .and_then(|m| if negative { m.checked_neg() } else { Some(m) })
            .and_then(|m| i64::try_from(m).ok());
        if let Some(i) = signed {
            return Number::Int(i);
        }
    }
    let value = magnitude as f64 / 10f64.powi(i32::from(domain.fraction_digits));
    Number::Float(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const SMALL: NumericDomain = NumericDomain {
        integer_digits: 3,
        fraction_digits: 0,
    };

    fn key(domain: NumericDomain, v: impl Into<Number>) -> String {
        encode(domain, v.into()).unwrap().key
    }

    #[test]
    fn test_small_domain_keys() {
        assert_eq!(key(SMALL, 0), "P000");
        assert_eq!(key(SMALL, 20), "P020");
        assert_eq!(key(SMALL, 999), "P999");
        assert_eq!(key(SMALL, -1), "N998");
        assert_eq!(key(SMALL, -999), "N000");
        assert_eq!(min_key(SMALL), "N000");
        assert_eq!(max_key(SMALL), "P999");
    }

    #[test]
    fn test_sign_boundary_ordering() {
        let keys: Vec<String> = [-5, -1, 0, 1, 5].iter().map(|v| key(SMALL, *v)).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_out_of_domain() {
        assert_eq!(encode(SMALL, Number::Int(1000)), Err(DomainOverflow::Above));
        assert_eq!(encode(SMALL, Number::Int(-1000)), Err(DomainOverflow::Below));
        assert_eq!(encode(SMALL, Number::Float(999.6)), Err(DomainOverflow::Above));
        assert_eq!(encode(SMALL, Number::Float(f64::NEG_INFINITY)), Err(DomainOverflow::Below));
        assert_eq!(encode(SMALL, Number::Float(f64::NAN)), Err(DomainOverflow::NotANumber));
        assert!(encode(SMALL, Number::Float(999.4)).is_ok());
    }

    #[test]
    fn test_integer_domain_covers_i64() {
        let d = NumericDomain::INTEGER;
        for v in [i64::MIN, -1, 0, 1, i64::MAX] {
            let c = encode(d, Number::Int(v)).unwrap();
            assert!(!c.lossy);
            assert_eq!(c.key.len(), 20);
            assert_eq!(decode(d, &c.key), Some(Number::Int(v)));
        }
    }

    #[test]
    fn test_float_quantisation() {
        let d = NumericDomain::FLOAT;
        let c = encode(d, Number::Float(12.5)).unwrap();
        assert_eq!(c.key, "P000000000000012500000");
        assert!(!c.lossy);
        assert_eq!(decode(d, &c.key), Some(Number::Float(12.5)));

        let fine = encode(d, Number::Float(0.123_456_7)).unwrap();
        assert!(fine.lossy);
        assert_eq!(decode(d, &fine.key), Some(Number::Float(0.123_457)));

        let tiny_negative = encode(d, Number::Float(-1e-9)).unwrap();
        assert_eq!(tiny_negative.key, key(d, 0));
        assert!(tiny_negative.lossy);
    }

    #[test]
    fn test_decode_rejects_foreign_keys() {
        assert_eq!(decode(SMALL, "P01"), None);
        assert_eq!(decode(SMALL, "X001"), None);
        assert_eq!(decode(SMALL, "P0a1"), None);
    }

    proptest! {
        #[test]
        fn prop_integer_keys_preserve_order(a in -999i64..=999, b in -999i64..=999) {
            let (ka, kb) = (key(SMALL, a), key(SMALL, b));
            prop_assert_eq!(a.cmp(&b), ka.cmp(&kb));
        }

        #[test]
        fn prop_float_keys_are_monotone(a in -1e14f64..1e14, b in -1e14f64..1e14) {
            let d = NumericDomain::FLOAT;
            let (ka, kb) = (key(d, a), key(d, b));
            if a <= b {
                prop_assert!(ka <= kb, "{a} -> {ka}, {b} -> {kb}");
            } else {
                prop_assert!(ka >= kb, "{a} -> {ka}, {b} -> {kb}");
            }
        }

        #[test]
        fn prop_decode_inverts_lossless_encode(v in -10_000_000i64..10_000_000, frac in 0u8..6) {
            let d = NumericDomain { integer_digits: 10, fraction_digits: frac };
            let c = encode(d, Number::Int(v)).unwrap();
            let back = decode(d, &c.key).unwrap();
            prop_assert_eq!(back.cmp_total(&Number::Int(v)), std::cmp::Ordering::Equal);
        }
    }
}
