//! Type marshaling engine
//!
//! `Marshaller::set_value` and `Marshaller::get_value` convert between host `Value`s and
//! a backend data container (a call context, a structure instance or a table row). Both
//! dispatch on `RfcType`; primitives are validated host-side by `scalar` before any native
//! write, composites recurse through `composite` using the composite's own descriptor.

pub mod buffer;
pub mod composite;
pub mod scalar;

use crate::core::{RfcType, Value};
use crate::errors::{ErrorGroup, ErrorInfo, ReturnCode, RfcError, Result};
use crate::ffi::{ContainerHandle, RfcLibrary};
use serde::{Deserialize, Serialize};

pub use composite::type_fields;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarshalOptions {
    /// Drop trailing blanks from CHAR values read back from the backend
    pub rstrip: bool,
}

impl Default for MarshalOptions {
    fn default() -> Self {
        Self { rstrip: true }
    }
}

fn unsupported(rfc_type: RfcType, parameter: &str) -> RfcError {
    RfcError::UnsupportedType {
        tag: rfc_type.tag(),
        parameter: parameter.to_string(),
    }
}

/// Converter bound to one native library
#[derive(Clone, Copy)]
pub struct Marshaller<'a> {
    lib: &'a dyn RfcLibrary,
    options: MarshalOptions,
}

impl<'a> Marshaller<'a> {
    pub fn new(lib: &'a dyn RfcLibrary, options: MarshalOptions) -> Self {
        Self { lib, options }
    }

    pub fn library(&self) -> &'a dyn RfcLibrary {
        self.lib
    }

    pub fn options(&self) -> MarshalOptions {
        self.options
    }

    /// Write one host value into the named slot of a container
    pub fn set_value(
        &self,
        container: ContainerHandle,
        name: &str,
        rfc_type: RfcType,
        length: usize,
        value: &Value,
    ) -> Result<()> {
        let lib = self.lib;
        match rfc_type {
            RfcType::Char => lib.set_chars(container, name, scalar::chars(name, value, length)?)?,
            RfcType::Num => lib.set_num(container, name, scalar::num(name, value, length)?)?,
            RfcType::Date => lib.set_date(container, name, scalar::date(name, value)?)?,
            RfcType::Time => lib.set_time(container, name, scalar::time(name, value)?)?,
            RfcType::Bcd | RfcType::DecF16 | RfcType::DecF34 => {
                lib.set_string(container, name, &scalar::decimal(name, value)?)?
            }
            RfcType::Byte => lib.set_bytes(container, name, &scalar::bytes(name, value, length)?, length)?,
            RfcType::Float => lib.set_float(container, name, scalar::float(name, value)?)?,
            RfcType::Int => lib.set_int(container, name, scalar::integer::<i32>(name, value)?)?,
            RfcType::Int2 => lib.set_int2(container, name, scalar::integer::<i16>(name, value)?)?,
            RfcType::Int1 => lib.set_int1(container, name, scalar::integer::<i8>(name, value)?)?,
            RfcType::String => lib.set_string(container, name, scalar::string(name, value)?)?,
            RfcType::XString => lib.set_xstring(container, name, &scalar::xstring(name, value)?)?,
            RfcType::Structure => self.set_structure(container, name, value)?,
            RfcType::Table => self.set_table(container, name, value)?,
            other => return Err(unsupported(other, name)),
        }
        Ok(())
    }

    /// Read the named slot of a container as a host value
    pub fn get_value(&self, container: ContainerHandle, name: &str, rfc_type: RfcType, length: usize) -> Result<Value> {
        let lib = self.lib;
        let value = match rfc_type {
            RfcType::Char => {
                let s = lib.get_chars(container, name, length)?;
                if self.options.rstrip {
                    Value::String(s.trim_end_matches(' ').to_string())
                } else {
                    Value::String(s)
                }
            }
            RfcType::Num => Value::String(lib.get_num(container, name, length)?),
            RfcType::Date => Value::String(lib.get_date(container, name)?),
            RfcType::Time => Value::String(lib.get_time(container, name)?),
            RfcType::Bcd | RfcType::DecF16 | RfcType::DecF34 => {
                let text = buffer::read_variable(buffer::DECIMAL_CAPACITY, |capacity| {
                    lib.get_string(container, name, capacity)
                })?;
                let number = scalar::parse_decimal(&text).ok_or_else(|| {
                    ErrorInfo::new(
                        ReturnCode::ConversionFailure,
                        format!("cannot parse decimal value of {}: {:?}", name, text),
                    )
                    .with_group(ErrorGroup::ExternalRuntimeFailure)
                })?;
                Value::Number(number)
            }
            RfcType::Byte => Value::Bytes(lib.get_bytes(container, name, length)?),
            RfcType::Float => Value::Number(lib.get_float(container, name)?),
            RfcType::Int => Value::Integer(i64::from(lib.get_int(container, name)?)),
            RfcType::Int2 => Value::Integer(i64::from(lib.get_int2(container, name)?)),
            RfcType::Int1 => Value::Integer(i64::from(lib.get_int1(container, name)?)),
            RfcType::String => {
                let len = lib.get_string_length(container, name)?;
                Value::String(buffer::read_variable(len + 1, |capacity| {
                    lib.get_string(container, name, capacity)
                })?)
            }
            RfcType::XString => {
                let len = lib.get_string_length(container, name)?;
                Value::Bytes(buffer::read_variable(len + 1, |capacity| {
                    lib.get_xstring(container, name, capacity)
                })?)
            }
            RfcType::Structure => self.get_structure(container, name)?,
            RfcType::Table => self.get_table(container, name)?,
            other => return Err(unsupported(other, name)),
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Direction;
    use crate::errors::{ErrorKind, ValidationReason};
    use crate::ffi::{FunctionDef, MockLibrary, MockType};
    use proptest::prelude::*;

    struct Fixture {
        lib: MockLibrary,
        call: ContainerHandle,
    }

    fn all_types() -> FunctionDef {
        FunctionDef::new("Z_ALL_TYPES")
            .import("C", MockType::char(5))
            .import("N", MockType::num(6))
            .import("D", MockType::date())
            .import("T", MockType::time())
            .import("P", MockType::bcd(8))
            .import("X", MockType::byte(4))
            .import("F", MockType::float())
            .import("I", MockType::int())
            .import("I1", MockType::int1())
            .import("I2", MockType::int2())
            .import("S", MockType::string())
            .import("XS", MockType::xstring())
            .param("D16", MockType::other(RfcType::DecF16, 8), Direction::Import)
            .param("D34", MockType::other(RfcType::DecF34, 16), Direction::Import)
            .param("U", MockType::other(RfcType::Int8, 8), Direction::Import)
    }

    fn fixture() -> Fixture {
        let lib = MockLibrary::empty();
        lib.register(all_types());
        let session = lib
            .open_connection(&[("user".to_string(), "u".to_string())])
            .unwrap();
        let desc = lib.get_function_desc(session, "Z_ALL_TYPES").unwrap();
        let call = lib.create_function(desc).unwrap();
        Fixture { lib, call }
    }

    fn roundtrip(f: &Fixture, name: &str, rfc_type: RfcType, length: usize, value: Value) -> Value {
        let m = Marshaller::new(&f.lib, MarshalOptions::default());
        m.set_value(f.call, name, rfc_type, length, &value).unwrap();
        m.get_value(f.call, name, rfc_type, length).unwrap()
    }

    #[test]
    fn test_char_is_padded_natively_and_stripped_on_read() {
        let f = fixture();
        assert_eq!(roundtrip(&f, "C", RfcType::Char, 5, Value::from("ab")), Value::from("ab"));

        let raw = Marshaller::new(&f.lib, MarshalOptions { rstrip: false });
        assert_eq!(raw.get_value(f.call, "C", RfcType::Char, 5).unwrap(), Value::from("ab   "));
    }

    #[test]
    fn test_num_keeps_zero_padding() {
        let f = fixture();
        assert_eq!(roundtrip(&f, "N", RfcType::Num, 6, Value::from("42")), Value::from("000042"));
    }

    #[test]
    fn test_fixed_and_numeric_kinds() {
        let f = fixture();
        assert_eq!(roundtrip(&f, "D", RfcType::Date, 8, Value::from("20240229")), Value::from("20240229"));
        assert_eq!(roundtrip(&f, "T", RfcType::Time, 6, Value::from("235959")), Value::from("235959"));
        assert_eq!(roundtrip(&f, "F", RfcType::Float, 8, Value::from(2.5)), Value::from(2.5));
        assert_eq!(roundtrip(&f, "I", RfcType::Int, 4, Value::from(-7)), Value::from(-7));
        assert_eq!(roundtrip(&f, "I1", RfcType::Int1, 1, Value::from(-128)), Value::from(-128));
        assert_eq!(roundtrip(&f, "I2", RfcType::Int2, 2, Value::from(32767)), Value::from(32767));
        assert_eq!(roundtrip(&f, "P", RfcType::Bcd, 8, Value::from(-12.75)), Value::Number(-12.75));
        assert_eq!(roundtrip(&f, "P", RfcType::Bcd, 8, Value::from(3)), Value::Number(3.0));
    }

    #[test]
    fn test_decimal_float_kinds() {
        let f = fixture();
        assert_eq!(roundtrip(&f, "D16", RfcType::DecF16, 8, Value::from(1.5)), Value::Number(1.5));
        assert_eq!(roundtrip(&f, "D16", RfcType::DecF16, 8, Value::from(-0.125)), Value::Number(-0.125));
        assert_eq!(roundtrip(&f, "D34", RfcType::DecF34, 16, Value::from(-98765.4321)), Value::Number(-98765.4321));
        assert_eq!(roundtrip(&f, "D34", RfcType::DecF34, 16, Value::from(7)), Value::Number(7.0));

        let m = Marshaller::new(&f.lib, MarshalOptions::default());
        assert!(m.set_value(f.call, "D34", RfcType::DecF34, 16, &Value::from("abc")).is_err());
    }

    #[test]
    fn test_byte_is_zero_padded() {
        let f = fixture();
        assert_eq!(
            roundtrip(&f, "X", RfcType::Byte, 4, Value::from(vec![0xdeu8, 0xad])),
            Value::from(vec![0xdeu8, 0xad, 0, 0])
        );
        let rendered = Value::Bytes(vec![0xbe, 0xef]).to_json();
        assert_eq!(
            roundtrip(&f, "X", RfcType::Byte, 4, Value::from(rendered)),
            Value::from(vec![0xbeu8, 0xef, 0, 0])
        );
    }

    #[test]
    fn test_variable_length_kinds() {
        let f = fixture();
        let long = "x".repeat(1000);
        assert_eq!(roundtrip(&f, "S", RfcType::String, 0, Value::from(long.as_str())), Value::from(long));
        assert_eq!(roundtrip(&f, "S", RfcType::String, 0, Value::from("")), Value::from(""));
        assert_eq!(
            roundtrip(&f, "XS", RfcType::XString, 0, Value::from(vec![1u8, 2, 3])),
            Value::from(vec![1u8, 2, 3])
        );
    }

    #[test]
    fn test_short_buffer_is_retried_once() {
        let f = fixture();
        let m = Marshaller::new(&f.lib, MarshalOptions::default());
        m.set_value(f.call, "S", RfcType::String, 0, &Value::from("hello")).unwrap();

        f.lib.force_buffer_too_small(1);
        assert_eq!(m.get_value(f.call, "S", RfcType::String, 0).unwrap(), Value::from("hello"));

        f.lib.set_always_too_small(true);
        let err = m.get_value(f.call, "P", RfcType::Bcd, 8).unwrap_err();
        assert_eq!(err.code(), Some(ReturnCode::BufferTooSmall));
    }

    #[test]
    fn test_oversized_values_never_reach_the_backend() {
        let f = fixture();
        let m = Marshaller::new(&f.lib, MarshalOptions::default());

        let cases = [
            ("C", RfcType::Char, 5, Value::from("toolong")),
            ("N", RfcType::Num, 6, Value::from("1234567")),
            ("X", RfcType::Byte, 4, Value::from(vec![0u8; 5])),
            ("I1", RfcType::Int1, 1, Value::from(200)),
            ("I2", RfcType::Int2, 2, Value::from(-40000)),
            ("I", RfcType::Int, 4, Value::from(1.5)),
            ("D", RfcType::Date, 8, Value::from("2024")),
        ];
        for (name, rfc_type, length, value) in cases {
            let err = m.set_value(f.call, name, rfc_type, length, &value).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{}", name);
            assert_eq!(err.parameter(), Some(name));
        }
        assert_eq!(f.lib.write_count(), 0);
    }

    #[test]
    fn test_unsupported_type_in_both_directions() {
        let f = fixture();
        let m = Marshaller::new(&f.lib, MarshalOptions::default());

        let err = m.set_value(f.call, "U", RfcType::Int8, 8, &Value::from(1)).unwrap_err();
        assert!(matches!(err, RfcError::UnsupportedType { tag: 31, .. }));
        let err = m.get_value(f.call, "U", RfcType::Int8, 8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedType);
        assert_eq!(err.parameter(), Some("U"));
    }

    #[test]
    fn test_wrong_host_shape() {
        let f = fixture();
        let m = Marshaller::new(&f.lib, MarshalOptions::default());
        let err = m.set_value(f.call, "F", RfcType::Float, 8, &Value::from("1.0")).unwrap_err();
        assert!(matches!(
            err,
            RfcError::Validation {
                reason: ValidationReason::UnexpectedType { expected: "number", .. },
                ..
            }
        ));
    }

    proptest! {
        #[test]
        fn prop_int2_roundtrip(v in i16::MIN..=i16::MAX) {
            let f = fixture();
            prop_assert_eq!(roundtrip(&f, "I2", RfcType::Int2, 2, Value::from(i64::from(v))), Value::from(i64::from(v)));
        }

        #[test]
        fn prop_char_roundtrip(s in "[A-Za-z0-9]{0,4}[A-Za-z0-9.]{0,1}") {
            let f = fixture();
            prop_assert_eq!(roundtrip(&f, "C", RfcType::Char, 5, Value::from(s.as_str())), Value::from(s));
        }

        #[test]
        fn prop_date_roundtrip(y in 1000u32..9999, m in 1u32..=12, d in 1u32..=28) {
            let f = fixture();
            let date = format!("{:04}{:02}{:02}", y, m, d);
            prop_assert_eq!(roundtrip(&f, "D", RfcType::Date, 8, Value::from(date.as_str())), Value::from(date));
        }

        #[test]
        fn prop_bcd_roundtrip(cents in -1_000_000_000i64..1_000_000_000) {
            let f = fixture();
            let n = cents as f64 / 100.0;
            prop_assert_eq!(roundtrip(&f, "P", RfcType::Bcd, 8, Value::from(n)), Value::Number(n));
        }
    }
}
