//! Signature introspection
//!
//! Walks a function descriptor into a declarative schema. Structures are described by
//! instantiating them inside a transient call context and walking their own field
//! descriptors; tables by appending one transient row and walking the row, which is
//! deleted again afterwards. Any backend failure aborts the walk.

use crate::client::invoke::CallContext;
use crate::client::FunctionDescriptor;
use crate::core::{CoarseType, FieldDesc, RfcType};
use crate::errors::Result;
use crate::ffi::{ContainerHandle, NativeResult, RfcLibrary, TableHandle};
use crate::infrastructure::logging::SinkHandle;
use crate::marshal::type_fields;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub type Properties = BTreeMap<String, PropertySchema>;

/// Schema of a whole function signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: CoarseType,
    pub properties: Properties,
}

impl Schema {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn property(&self, name: &str) -> Option<&PropertySchema> {
        self.properties.get(name)
    }
}

/// One parameter or field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub kind: CoarseType,
    /// Declared length, as a decimal string
    pub length: String,
    pub sap_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sap_direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sap_type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<ItemsSchema>,
}

impl PropertySchema {
    fn scalar(rfc_type: RfcType, length: usize) -> Self {
        Self {
            kind: rfc_type.coarse(),
            length: length.to_string(),
            sap_type: rfc_type.sap_name(),
            sap_direction: None,
            description: None,
            sap_type_name: None,
            properties: None,
            items: None,
        }
    }
}

/// Row shape of a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemsSchema {
    pub sap_type_name: String,
    #[serde(rename = "type")]
    pub kind: CoarseType,
    pub properties: Properties,
}

/// Introspection over one library
struct Walker<'a> {
    lib: &'a dyn RfcLibrary,
}

impl Walker<'_> {
    fn property(&self, container: ContainerHandle, name: &str, rfc_type: RfcType, length: usize) -> NativeResult<PropertySchema> {
        let mut property = PropertySchema::scalar(rfc_type, length);
        match rfc_type {
            RfcType::Structure => {
                let structure = self.lib.get_structure(container, name)?;
                let type_desc = self.lib.describe_structure(structure)?;
                property.sap_type_name = Some(self.lib.type_name(type_desc)?);
                let fields = type_fields(self.lib, type_desc)?;
                property.properties = Some(self.fields(structure, &fields)?);
            }
            RfcType::Table => {
                let table = self.lib.get_table(container, name)?;
                property.items = Some(self.rows(table)?);
            }
            _ => {}
        }
        Ok(property)
    }

    fn fields(&self, container: ContainerHandle, fields: &[FieldDesc]) -> NativeResult<Properties> {
        fields
            .iter()
            .map(|f| Ok((f.name.clone(), self.property(container, &f.name, f.rfc_type, f.length)?)))
            .collect()
    }

    fn rows(&self, table: TableHandle) -> NativeResult<ItemsSchema> {
        let type_desc = self.lib.describe_table(table)?;
        let sap_type_name = self.lib.type_name(type_desc)?;
        let fields = type_fields(self.lib, type_desc)?;

        let row = self.lib.append_new_row(table)?;
        let walked = self.fields(row, &fields);
        let deleted = self.lib.delete_current_row(table);
        let properties = walked?;
        deleted?;

        Ok(ItemsSchema {
            sap_type_name,
            kind: CoarseType::Object,
            properties,
        })
    }
}

/// Build the schema of `descriptor`
pub fn describe(lib: &Arc<dyn RfcLibrary>, sink: &SinkHandle, descriptor: &FunctionDescriptor) -> Result<Schema> {
    let name = sink.api_call(
        "RfcGetFunctionName",
        &[("function", descriptor.name.as_str())],
        lib.function_name(descriptor.handle),
    )?;
    let ctx = CallContext::create(lib, sink, descriptor.handle)?;
    let walker = Walker { lib: lib.as_ref() };

    let mut properties = Properties::new();
    for param in &descriptor.parameters {
        let mut property = walker.property(ctx.handle(), &param.name, param.rfc_type, param.length)?;
        property.sap_direction = Some(param.direction.as_str().to_string());
        property.description = param.text.clone().filter(|text| !text.is_empty());
        properties.insert(param.name.clone(), property);
    }
    tracing::debug!(function = %descriptor.name, parameters = properties.len(), "described signature");

    Ok(Schema {
        title: format!("Signature of SAP RFC function {}", name),
        kind: CoarseType::Object,
        properties,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::{FunctionDef, MockLibrary, MockType, StructDef};

    fn resolve(lib: &Arc<MockLibrary>, name: &str) -> FunctionDescriptor {
        let session = lib
            .open_connection(&[("dest".to_string(), "MCK".to_string())])
            .unwrap();
        let handle = lib.get_function_desc(session, name).unwrap();
        let count = lib.parameter_count(handle).unwrap();
        let parameters = (0..count)
            .map(|i| lib.parameter_desc_by_index(handle, i).unwrap())
            .collect();
        FunctionDescriptor::new(name, handle, parameters)
    }

    fn describe_mock(lib: &Arc<MockLibrary>, name: &str) -> Result<Schema> {
        let descriptor = resolve(lib, name);
        let dyn_lib: Arc<dyn RfcLibrary> = lib.clone();
        describe(&dyn_lib, &SinkHandle::default(), &descriptor)
    }

    #[test]
    fn test_scalar_parameters() {
        let lib = Arc::new(MockLibrary::new());
        let schema = describe_mock(&lib, "STFC_CONNECTION").unwrap();

        assert_eq!(schema.title, "Signature of SAP RFC function STFC_CONNECTION");
        let requtext = schema.property("REQUTEXT").unwrap();
        assert_eq!(requtext.kind, CoarseType::String);
        assert_eq!(requtext.length, "255");
        assert_eq!(requtext.sap_type, "RFCTYPE_CHAR");
        assert_eq!(requtext.sap_direction.as_deref(), Some("RFC_IMPORT"));
        assert_eq!(requtext.description.as_deref(), Some("Sending text"));
        assert_eq!(
            schema.property("ECHOTEXT").unwrap().sap_direction.as_deref(),
            Some("RFC_EXPORT")
        );
        assert_eq!(lib.live_containers(), 0);
    }

    #[test]
    fn test_structure_and_table() {
        let lib = Arc::new(MockLibrary::new());
        let schema = describe_mock(&lib, "STFC_STRUCTURE").unwrap();

        let structure = schema.property("IMPORTSTRUCT").unwrap();
        assert_eq!(structure.kind, CoarseType::Object);
        assert_eq!(structure.sap_type_name.as_deref(), Some("RFCTEST"));
        let fields = structure.properties.as_ref().unwrap();
        assert_eq!(fields["RFCINT1"].kind, CoarseType::Integer);
        assert_eq!(fields["RFCFLOAT"].kind, CoarseType::Number);
        assert!(fields["RFCDATE"].sap_direction.is_none());

        let table = schema.property("RFCTABLE").unwrap();
        assert_eq!(table.kind, CoarseType::Array);
        assert_eq!(table.sap_direction.as_deref(), Some("RFC_TABLES"));
        let items = table.items.as_ref().unwrap();
        assert_eq!(items.sap_type_name, "RFCTEST");
        assert_eq!(items.properties.len(), 12);
        assert_eq!(items.properties["RFCHEX3"].kind, CoarseType::String);
        assert_eq!(lib.live_containers(), 0);
    }

    #[test]
    fn test_nested_table_inside_structure() {
        let lib = Arc::new(MockLibrary::empty());
        let line = StructDef::new("ZLINE")
            .field("POS", MockType::int())
            .field("AMOUNT", MockType::bcd(15))
            .build();
        let header = StructDef::new("ZHEADER")
            .field("ID", MockType::num(10))
            .field("LINES", MockType::table(line))
            .build();
        lib.register(FunctionDef::new("Z_NESTED").import("HEADER", MockType::structure(header)));

        let json = describe_mock(&lib, "Z_NESTED").unwrap().to_json();
        let lines = &json["properties"]["HEADER"]["properties"]["LINES"];
        assert_eq!(lines["type"], "array");
        assert_eq!(lines["items"]["sapTypeName"], "ZLINE");
        assert_eq!(lines["items"]["properties"]["AMOUNT"]["type"], "number");
        assert_eq!(lines["items"]["properties"]["POS"]["sapType"], "RFCTYPE_INT");
        assert!(lines.get("sapDirection").is_none());
        assert_eq!(lib.live_containers(), 0);
    }

    #[test]
    fn test_title_uses_backend_name() {
        let lib = Arc::new(MockLibrary::new());
        let resolved = resolve(&lib, "STFC_CONNECTION");
        let aliased = FunctionDescriptor::new("LOCAL_ALIAS", resolved.handle, resolved.parameters);
        let dyn_lib: Arc<dyn RfcLibrary> = lib.clone();

        let schema = describe(&dyn_lib, &SinkHandle::default(), &aliased).unwrap();
        assert_eq!(schema.title, "Signature of SAP RFC function STFC_CONNECTION");
    }

    #[test]
    fn test_unknown_type_is_undefined() {
        let lib = Arc::new(MockLibrary::empty());
        lib.register(FunctionDef::new("Z_XML").export("DOC", MockType::other(RfcType::XmlData, 0)));

        let schema = describe_mock(&lib, "Z_XML").unwrap();
        let doc = schema.property("DOC").unwrap();
        assert_eq!(doc.kind, CoarseType::Undefined);
        assert_eq!(doc.sap_type, "RFCTYPE_XMLDATA");
        assert!(doc.description.is_none());
    }
}
