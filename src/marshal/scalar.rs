//! Host-side validation of primitive values
//!
//! Everything here is pure: a host value is checked against the declared kind and
//! width and turned into what the native setter takes. Nothing reaches the backend
//! unless these checks pass, so fixed-width values are never truncated natively.

use crate::core::Value;
use crate::errors::{RfcError, Result, ValidationReason};
use num_traits::{Bounded, FromPrimitive, ToPrimitive};
use std::borrow::Cow;

fn unexpected(parameter: &str, expected: &'static str, value: &Value) -> RfcError {
    RfcError::validation(
        parameter,
        ValidationReason::UnexpectedType {
            expected,
            found: value.kind_name(),
        },
    )
}

fn expect_str<'v>(parameter: &str, value: &'v Value) -> Result<&'v str> {
    value.as_str().ok_or_else(|| unexpected(parameter, "string", value))
}

fn bounded_len(parameter: &str, actual: usize, max: usize) -> Result<()> {
    if actual > max {
        return Err(RfcError::validation(parameter, ValidationReason::TooLong { max, actual }));
    }
    Ok(())
}

/// CHAR: a string of at most `length` characters
pub fn chars<'v>(parameter: &str, value: &'v Value, length: usize) -> Result<&'v str> {
    let s = expect_str(parameter, value)?;
    bounded_len(parameter, s.chars().count(), length)?;
    Ok(s)
}

/// NUM: at most `length` decimal digits
pub fn num<'v>(parameter: &str, value: &'v Value, length: usize) -> Result<&'v str> {
    let s = expect_str(parameter, value)?;
    bounded_len(parameter, s.chars().count(), length)?;
    if !s.chars().all(|c| c.is_ascii_digit()) {
        return Err(RfcError::validation(
            parameter,
            ValidationReason::InvalidFormat { expected: "decimal digits" },
        ));
    }
    Ok(s)
}

fn fixed_digits<'v>(parameter: &str, value: &'v Value, width: usize, expected: &'static str) -> Result<&'v str> {
    let s = expect_str(parameter, value)?;
    if s.len() != width || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RfcError::validation(parameter, ValidationReason::InvalidFormat { expected }));
    }
    Ok(s)
}

/// DATE: exactly eight digits, YYYYMMDD
pub fn date<'v>(parameter: &str, value: &'v Value) -> Result<&'v str> {
    fixed_digits(parameter, value, 8, "YYYYMMDD")
}

/// TIME: exactly six digits, HHMMSS
pub fn time<'v>(parameter: &str, value: &'v Value) -> Result<&'v str> {
    fixed_digits(parameter, value, 6, "HHMMSS")
}

/// A buffer, or an array of integers in 0..=255 as produced by `Value::to_json`
fn byte_buffer<'v>(parameter: &str, value: &'v Value) -> Result<Cow<'v, [u8]>> {
    match value {
        Value::Bytes(b) => Ok(Cow::Borrowed(b)),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Integer(i) => u8::try_from(*i).map_err(|_| {
                    RfcError::validation(
                        parameter,
                        ValidationReason::OutOfRange {
                            min: 0,
                            max: 255,
                            value: *i as f64,
                        },
                    )
                }),
                other => Err(unexpected(parameter, "byte", other)),
            })
            .collect::<Result<Vec<u8>>>()
            .map(Cow::Owned),
        other => Err(unexpected(parameter, "buffer", other)),
    }
}

/// BYTE: a buffer of at most `length` bytes
pub fn bytes<'v>(parameter: &str, value: &'v Value, length: usize) -> Result<Cow<'v, [u8]>> {
    let b = byte_buffer(parameter, value)?;
    bounded_len(parameter, b.len(), length)?;
    Ok(b)
}

pub fn string<'v>(parameter: &str, value: &'v Value) -> Result<&'v str> {
    expect_str(parameter, value)
}

pub fn xstring<'v>(parameter: &str, value: &'v Value) -> Result<Cow<'v, [u8]>> {
    byte_buffer(parameter, value)
}

pub fn float(parameter: &str, value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| unexpected(parameter, "number", value))
}

/// Packed or floating decimal, rendered as the decimal string the backend parses
pub fn decimal(parameter: &str, value: &Value) -> Result<String> {
    match value {
        Value::Integer(i) => Ok(i.to_string()),
        Value::Number(n) if n.is_finite() => Ok(n.to_string()),
        Value::Number(_) => Err(RfcError::validation(
            parameter,
            ValidationReason::InvalidFormat { expected: "finite number" },
        )),
        other => Err(unexpected(parameter, "number", other)),
    }
}

/// Integer of the width of `T`, range-checked before any write
pub fn integer<T>(parameter: &str, value: &Value) -> Result<T>
where
    T: Bounded + FromPrimitive + ToPrimitive,
{
    let out_of_range = |value: f64| {
        RfcError::validation(
            parameter,
            ValidationReason::OutOfRange {
                min: T::min_value().to_i64().unwrap_or(i64::MIN),
                max: T::max_value().to_i64().unwrap_or(i64::MAX),
                value,
            },
        )
    };

    match value {
        Value::Integer(i) => T::from_i64(*i).ok_or_else(|| out_of_range(*i as f64)),
        Value::Number(n) => {
            if !n.is_finite() || n.fract() != 0.0 {
                return Err(RfcError::validation(parameter, ValidationReason::NotIntegral { value: *n }));
            }
            T::from_f64(*n).ok_or_else(|| out_of_range(*n))
        }
        other => Err(unexpected(parameter, "integer", other)),
    }
}

/// Parse a decimal string read back from the backend
pub fn parse_decimal(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use proptest::prelude::*;

    fn reason(err: RfcError) -> ValidationReason {
        match err {
            RfcError::Validation { reason, .. } => reason,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_chars_length_bound() {
        assert_eq!(chars("P", &Value::from("abc"), 3).unwrap(), "abc");
        let err = chars("P", &Value::from("abcd"), 3).unwrap_err();
        assert_eq!(err.parameter(), Some("P"));
        assert_eq!(reason(err), ValidationReason::TooLong { max: 3, actual: 4 });
    }

    #[test]
    fn test_chars_counts_characters_not_bytes() {
        assert!(chars("P", &Value::from("äöü"), 3).is_ok());
    }

    #[test]
    fn test_wrong_host_type() {
        let err = chars("P", &Value::from(1), 3).unwrap_err();
        assert_eq!(
            reason(err),
            ValidationReason::UnexpectedType {
                expected: "string",
                found: "integer"
            }
        );
        assert_eq!(bytes("P", &Value::from("x"), 3).unwrap_err().kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_bytes_accept_json_rendering() {
        let json = Value::from(serde_json::json!([222, 173]));
        assert_eq!(&*bytes("X", &json, 4).unwrap(), &[222u8, 173]);
        assert_eq!(&*xstring("XS", &Value::Array(vec![])).unwrap(), &[] as &[u8]);

        let err = bytes("X", &Value::from(serde_json::json!([1, 256])), 4).unwrap_err();
        assert_eq!(
            reason(err),
            ValidationReason::OutOfRange {
                min: 0,
                max: 255,
                value: 256.0
            }
        );
        assert!(xstring("XS", &Value::from(serde_json::json!(["a"]))).is_err());
        assert!(bytes("X", &Value::from(serde_json::json!([1, 2, 3])), 2).is_err());
    }

    #[test]
    fn test_num_requires_digits() {
        assert!(num("P", &Value::from("0042"), 4).is_ok());
        assert!(num("P", &Value::from("4a"), 4).is_err());
        assert!(num("P", &Value::from("12345"), 4).is_err());
    }

    #[test]
    fn test_date_and_time_shape() {
        assert!(date("D", &Value::from("20240131")).is_ok());
        assert!(date("D", &Value::from("2024013")).is_err());
        assert!(date("D", &Value::from("2024-1-1")).is_err());
        assert!(time("T", &Value::from("235959")).is_ok());
        assert!(time("T", &Value::from("23:59")).is_err());
    }

    #[test]
    fn test_integer_widths() {
        assert_eq!(integer::<i8>("I", &Value::from(-128)).unwrap(), -128);
        assert_eq!(
            reason(integer::<i8>("I", &Value::from(128)).unwrap_err()),
            ValidationReason::OutOfRange {
                min: -128,
                max: 127,
                value: 128.0
            }
        );
        assert_eq!(integer::<i16>("I", &Value::from(7.0)).unwrap(), 7);
        assert_eq!(
            reason(integer::<i32>("I", &Value::from(1.5)).unwrap_err()),
            ValidationReason::NotIntegral { value: 1.5 }
        );
        assert!(integer::<i32>("I", &Value::from(i64::from(i32::MAX) + 1)).is_err());
    }

    #[test]
    fn test_decimal_rendering() {
        assert_eq!(decimal("B", &Value::from(12)).unwrap(), "12");
        assert_eq!(decimal("B", &Value::from(-1.25)).unwrap(), "-1.25");
        assert!(decimal("B", &Value::from(f64::NAN)).is_err());
        assert_eq!(parse_decimal(" 3.50 "), Some(3.5));
        assert_eq!(parse_decimal("abc"), None);
    }

    proptest! {
        #[test]
        fn prop_i16_accepts_exactly_its_range(v in -100_000i64..100_000) {
            let result = integer::<i16>("I", &Value::from(v));
            prop_assert_eq!(result.is_ok(), v >= i64::from(i16::MIN) && v <= i64::from(i16::MAX));
        }

        #[test]
        fn prop_chars_accepts_up_to_length(s in "[a-zA-Z0-9 ]{0,20}", length in 0usize..20) {
            let value = Value::from(s.as_str());
            let result = chars("C", &value, length);
            prop_assert_eq!(result.is_ok(), s.chars().count() <= length);
        }

        #[test]
        fn prop_decimal_reparses(n in -1.0e12f64..1.0e12) {
            let text = decimal("B", &Value::from(n)).unwrap();
            prop_assert_eq!(parse_decimal(&text), Some(n));
        }
    }
}
