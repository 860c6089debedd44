use rfc_bridge::ffi::{FunctionDef, MockType, StructDef};
use rfc_bridge::{Bridge, BridgeConfig, CoarseType, Connection, MockLibrary, RfcType};
use std::sync::{mpsc, Arc};
use std::time::Duration;

fn open(lib: &Arc<MockLibrary>) -> (Bridge, Connection) {
    let bridge = Bridge::new(lib.clone(), BridgeConfig::default()).unwrap();
    let conn = bridge.connection();
    let (tx, rx) = mpsc::channel();
    conn.open([("dest", "MCK")], move |err| tx.send(err).unwrap()).unwrap();
    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap().is_none());
    (bridge, conn)
}

fn register_order_functions(lib: &MockLibrary) {
    let item = StructDef::new("ZORDER_ITEM")
        .field("POSNR", MockType::num(6))
        .field("MATNR", MockType::char(18))
        .field("QUANTITY", MockType::bcd(13))
        .field("PRICE", MockType::float())
        .field("FLAGS", MockType::byte(2))
        .field("NOTE", MockType::string())
        .field("DELIVERY", MockType::date())
        .build();
    let partner = StructDef::new("ZPARTNER")
        .field("ROLE", MockType::char(2))
        .field("NUMBER", MockType::num(10))
        .build();
    let header = StructDef::new("ZORDER_HEADER")
        .field("ORDER_ID", MockType::num(10))
        .field("PRIORITY", MockType::int1())
        .field("SOLD_TO", MockType::structure(partner))
        .build();

    lib.register(
        FunctionDef::new("Z_ORDER_CREATE")
            .import("HEADER", MockType::structure(header))
            .describe("Order header")
            .import("TESTRUN", MockType::char(1))
            .export("ORDER_ID", MockType::num(10))
            .changing("COUNTER", MockType::int())
            .tables("ITEMS", item)
            .describe("Order items"),
    );
}

#[test]
fn test_connection_signature() {
    let lib = Arc::new(MockLibrary::new());
    let (_bridge, conn) = open(&lib);
    let schema = conn.lookup("STFC_CONNECTION").unwrap().metadata().unwrap();

    assert_eq!(schema.kind, CoarseType::Object);
    assert_eq!(schema.properties.len(), 3);
    let requtext = schema.property("REQUTEXT").unwrap();
    assert_eq!(requtext.kind, CoarseType::String);
    assert_eq!(requtext.sap_direction.as_deref(), Some("RFC_IMPORT"));
    for name in ["ECHOTEXT", "RESPTEXT"] {
        let property = schema.property(name).unwrap();
        assert_eq!(property.kind, CoarseType::String);
        assert_eq!(property.sap_direction.as_deref(), Some("RFC_EXPORT"));
    }
}

#[test]
fn test_nested_table_of_structures() {
    let lib = Arc::new(MockLibrary::new());
    register_order_functions(&lib);
    let (_bridge, conn) = open(&lib);
    let schema = conn.lookup("Z_ORDER_CREATE").unwrap().metadata().unwrap();

    let items = schema.property("ITEMS").unwrap();
    assert_eq!(items.kind, CoarseType::Array);
    assert_eq!(items.sap_type, RfcType::Table.sap_name());
    assert_eq!(items.description.as_deref(), Some("Order items"));

    let row = items.items.as_ref().unwrap();
    assert_eq!(row.sap_type_name, "ZORDER_ITEM");
    let expected = [
        ("POSNR", CoarseType::String),
        ("MATNR", CoarseType::String),
        ("QUANTITY", CoarseType::Number),
        ("PRICE", CoarseType::Number),
        ("FLAGS", CoarseType::String),
        ("NOTE", CoarseType::String),
        ("DELIVERY", CoarseType::String),
    ];
    assert_eq!(row.properties.len(), expected.len());
    for (name, kind) in expected {
        assert_eq!(row.properties[name].kind, kind, "field {}", name);
    }
    assert_eq!(row.properties["MATNR"].length, "18");
    assert_eq!(lib.live_containers(), 0);
}

#[test]
fn test_nested_structures() {
    let lib = Arc::new(MockLibrary::new());
    register_order_functions(&lib);
    let (_bridge, conn) = open(&lib);
    let schema = conn.lookup("Z_ORDER_CREATE").unwrap().metadata().unwrap();

    let header = schema.property("HEADER").unwrap();
    assert_eq!(header.sap_type_name.as_deref(), Some("ZORDER_HEADER"));
    let fields = header.properties.as_ref().unwrap();
    assert_eq!(fields["PRIORITY"].kind, CoarseType::Integer);

    let sold_to = &fields["SOLD_TO"];
    assert_eq!(sold_to.kind, CoarseType::Object);
    assert_eq!(sold_to.sap_type_name.as_deref(), Some("ZPARTNER"));
    assert!(sold_to.sap_direction.is_none());
    assert_eq!(sold_to.properties.as_ref().unwrap()["NUMBER"].sap_type, "RFCTYPE_NUM");

    assert_eq!(
        schema.property("COUNTER").unwrap().sap_direction.as_deref(),
        Some("RFC_CHANGING")
    );
    assert!(schema.property("TESTRUN").unwrap().description.is_none());
}

#[test]
fn test_json_shape() {
    let lib = Arc::new(MockLibrary::new());
    register_order_functions(&lib);
    let (_bridge, conn) = open(&lib);
    let json = conn.lookup("Z_ORDER_CREATE").unwrap().metadata().unwrap().to_json();

    assert_eq!(json["title"], "Signature of SAP RFC function Z_ORDER_CREATE");
    assert_eq!(json["type"], "object");
    let items = &json["properties"]["ITEMS"];
    assert_eq!(items["sapDirection"], "RFC_TABLES");
    assert_eq!(items["items"]["type"], "object");
    assert_eq!(items["items"]["properties"]["QUANTITY"]["type"], "number");
    assert_eq!(items["items"]["properties"]["QUANTITY"]["sapType"], "RFCTYPE_BCD");
    assert!(items.get("properties").is_none());
    assert!(json["properties"]["ORDER_ID"].get("items").is_none());
}

#[test]
fn test_metadata_outlives_connection() {
    let lib = Arc::new(MockLibrary::new());
    let (_bridge, conn) = open(&lib);
    let function = conn.lookup("STFC_STRUCTURE").unwrap();
    drop(conn);

    let schema = function.metadata().unwrap();
    assert!(schema.property("RFCTABLE").is_some());
    assert_eq!(lib.live_containers(), 0);
}
