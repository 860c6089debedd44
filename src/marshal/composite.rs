//! Structures and tables
//!
//! A structure is marshaled field by field through its own type descriptor, whatever
//! its nesting depth. A table is an ordered sequence of rows sharing one row type.

use super::Marshaller;
use crate::core::{FieldDesc, Object, Value};
use crate::errors::{RfcError, Result, ValidationReason};
use crate::ffi::{ContainerHandle, NativeResult, RfcLibrary, TypeDescHandle};

/// Field descriptors of a structure or row type, in descriptor order
pub fn type_fields(lib: &dyn RfcLibrary, type_desc: TypeDescHandle) -> NativeResult<Vec<FieldDesc>> {
    let count = lib.field_count(type_desc)?;
    (0..count).map(|i| lib.field_desc_by_index(type_desc, i)).collect()
}

fn expect_object<'v>(parameter: &str, value: &'v Value) -> Result<&'v Object> {
    value.as_object().ok_or_else(|| {
        RfcError::validation(
            parameter,
            ValidationReason::UnexpectedType {
                expected: "object",
                found: value.kind_name(),
            },
        )
    })
}

impl Marshaller<'_> {
    /// Write the present, non-null fields of `object` into `container`
    ///
    /// Keys without a matching field are ignored.
    pub fn write_fields(&self, container: ContainerHandle, fields: &[FieldDesc], object: &Object) -> Result<()> {
        for field in fields {
            match object.get(&field.name) {
                Some(value) if !value.is_null() => {
                    self.set_value(container, &field.name, field.rfc_type, field.length, value)?;
                }
                _ => {}
            }
        }
        let unknown: Vec<&String> = object
            .keys()
            .filter(|key| !fields.iter().any(|f| &f.name == *key))
            .collect();
        if !unknown.is_empty() {
            tracing::debug!(?unknown, "ignoring keys without a matching field");
        }
        Ok(())
    }

    /// Read every field of `container` into an object
    pub fn read_fields(&self, container: ContainerHandle, fields: &[FieldDesc]) -> Result<Value> {
        let mut object = Object::new();
        for field in fields {
            let value = self.get_value(container, &field.name, field.rfc_type, field.length)?;
            object.insert(field.name.clone(), value);
        }
        Ok(Value::Object(object))
    }

    pub(super) fn set_structure(&self, container: ContainerHandle, name: &str, value: &Value) -> Result<()> {
        let object = expect_object(name, value)?;
        let lib = self.library();
        let structure = lib.get_structure(container, name)?;
        let fields = type_fields(lib, lib.describe_structure(structure)?)?;
        self.write_fields(structure, &fields, object)
    }

    pub(super) fn get_structure(&self, container: ContainerHandle, name: &str) -> Result<Value> {
        let lib = self.library();
        let structure = lib.get_structure(container, name)?;
        let fields = type_fields(lib, lib.describe_structure(structure)?)?;
        self.read_fields(structure, &fields)
    }

    /// Append one row per element, in order
    ///
    /// A failing element aborts the write; rows appended before it stay in the table.
    pub(super) fn set_table(&self, container: ContainerHandle, name: &str, value: &Value) -> Result<()> {
        let rows = value.as_array().ok_or_else(|| {
            RfcError::validation(
                name,
                ValidationReason::UnexpectedType {
                    expected: "array",
                    found: value.kind_name(),
                },
            )
        })?;
        let lib = self.library();
        let table = lib.get_table(container, name)?;
        let fields = type_fields(lib, lib.describe_table(table)?)?;

        for row in rows {
            let object = expect_object(name, row)?;
            let handle = lib.append_new_row(table)?;
            self.write_fields(handle, &fields, object)?;
        }
        Ok(())
    }

    pub(super) fn get_table(&self, container: ContainerHandle, name: &str) -> Result<Value> {
        let lib = self.library();
        let table = lib.get_table(container, name)?;
        let count = lib.row_count(table)?;
        if count == 0 {
            return Ok(Value::Array(Vec::new()));
        }
        let fields = type_fields(lib, lib.describe_table(table)?)?;

        let mut rows = Vec::with_capacity(count);
        for index in 0..count {
            lib.move_to(table, index)?;
            let row = lib.current_row(table)?;
            rows.push(self.read_fields(row, &fields)?);
        }
        Ok(Value::Array(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RfcType;
    use crate::errors::ErrorKind;
    use crate::ffi::{FunctionDef, MockLibrary, MockType, StructDef};
    use crate::marshal::MarshalOptions;

    fn nested_lib() -> (MockLibrary, ContainerHandle) {
        let line = StructDef::new("ZLINE")
            .field("POS", MockType::int2())
            .field("TEXT", MockType::char(10))
            .build();
        let header = StructDef::new("ZHEADER")
            .field("ID", MockType::num(4))
            .field("LINES", MockType::table(line.clone()))
            .field("FIRST", MockType::structure(line.clone()))
            .build();
        let lib = MockLibrary::empty();
        lib.register(
            FunctionDef::new("Z_NESTED")
                .import("HEADER", MockType::structure(header))
                .tables("ITEMS", line),
        );
        let session = lib.open_connection(&[("user".to_string(), "u".to_string())]).unwrap();
        let desc = lib.get_function_desc(session, "Z_NESTED").unwrap();
        let call = lib.create_function(desc).unwrap();
        (lib, call)
    }

    fn line(pos: i64, text: &str) -> Value {
        vec![("POS", Value::from(pos)), ("TEXT", Value::from(text))].into_iter().collect()
    }

    #[test]
    fn test_nested_structure_roundtrip() {
        let (lib, call) = nested_lib();
        let m = Marshaller::new(&lib, MarshalOptions::default());
        let header: Value = vec![
            ("ID", Value::from("0007")),
            ("LINES", Value::Array(vec![line(1, "a"), line(2, "b")])),
            ("FIRST", line(9, "first")),
        ]
        .into_iter()
        .collect();

        m.set_value(call, "HEADER", RfcType::Structure, 0, &header).unwrap();
        assert_eq!(m.get_value(call, "HEADER", RfcType::Structure, 0).unwrap(), header);
    }

    #[test]
    fn test_table_preserves_order() {
        let (lib, call) = nested_lib();
        let m = Marshaller::new(&lib, MarshalOptions::default());
        let rows: Vec<Value> = (0..20).map(|i| line(i, &format!("row{}", i))).collect();

        m.set_value(call, "ITEMS", RfcType::Table, 0, &Value::Array(rows.clone())).unwrap();
        assert_eq!(m.get_value(call, "ITEMS", RfcType::Table, 0).unwrap(), Value::Array(rows));
    }

    #[test]
    fn test_absent_and_unknown_fields() {
        let (lib, call) = nested_lib();
        let m = Marshaller::new(&lib, MarshalOptions::default());
        let row: Value = vec![("TEXT", Value::from("x")), ("NOPE", Value::from(1)), ("POS", Value::Null)]
            .into_iter()
            .collect();

        m.set_value(call, "ITEMS", RfcType::Table, 0, &Value::Array(vec![row])).unwrap();
        assert_eq!(
            m.get_value(call, "ITEMS", RfcType::Table, 0).unwrap(),
            Value::Array(vec![line(0, "x")])
        );
    }

    #[test]
    fn test_failing_row_keeps_earlier_rows() {
        let (lib, call) = nested_lib();
        let m = Marshaller::new(&lib, MarshalOptions::default());
        let rows = Value::Array(vec![line(1, "ok"), line(2, "far too long text")]);

        let err = m.set_value(call, "ITEMS", RfcType::Table, 0, &rows).unwrap_err();
        assert_eq!(err.parameter(), Some("TEXT"));
        let table = lib.get_table(call, "ITEMS").unwrap();
        assert_eq!(lib.row_count(table).unwrap(), 2);
    }

    #[test]
    fn test_shape_errors() {
        let (lib, call) = nested_lib();
        let m = Marshaller::new(&lib, MarshalOptions::default());

        let err = m.set_value(call, "HEADER", RfcType::Structure, 0, &Value::from("x")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = m.set_value(call, "ITEMS", RfcType::Table, 0, &Value::object()).unwrap_err();
        assert_eq!(err.parameter(), Some("ITEMS"));
        let err = m
            .set_value(call, "ITEMS", RfcType::Table, 0, &Value::Array(vec![Value::from(1)]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
