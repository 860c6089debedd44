//! In-process backend
//!
//! `MockLibrary` implements `RfcLibrary` entirely in memory. Function modules are
//! registered as `FunctionDef`s with an optional handler that plays the server side of a
//! call. Fixed-width values are stored the way the backend stores them: CHAR blank-padded
//! on the right, NUM zero-padded on the left, BYTE zero-padded on the right.
//!
//! Faults can be injected (rejected logon, invalidated sessions, failing invokes, short
//! buffers) and every native invoke is recorded with its enter/exit instants.

use super::library::{
    BufferRead, ContainerHandle, FunctionDescHandle, NativeResult, RfcLibrary, SessionHandle, TableHandle,
    TypeDescHandle,
};
use crate::core::{Direction, FieldDesc, Object, ParameterDesc, RfcType, Value};
use crate::errors::{ErrorGroup, ErrorInfo, ReturnCode};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shape of a parameter or field in a registered definition
#[derive(Debug, Clone)]
pub enum MockType {
    Primitive { rfc_type: RfcType, length: usize },
    Structure(Arc<StructDef>),
    Table(Arc<StructDef>),
}

impl MockType {
    pub fn char(length: usize) -> Self {
        Self::Primitive { rfc_type: RfcType::Char, length }
    }

    pub fn num(length: usize) -> Self {
        Self::Primitive { rfc_type: RfcType::Num, length }
    }

    pub fn date() -> Self {
        Self::Primitive { rfc_type: RfcType::Date, length: 8 }
    }

    pub fn time() -> Self {
        Self::Primitive { rfc_type: RfcType::Time, length: 6 }
    }

    pub fn bcd(length: usize) -> Self {
        Self::Primitive { rfc_type: RfcType::Bcd, length }
    }

    pub fn byte(length: usize) -> Self {
        Self::Primitive { rfc_type: RfcType::Byte, length }
    }

    pub fn float() -> Self {
        Self::Primitive { rfc_type: RfcType::Float, length: 8 }
    }

    pub fn int() -> Self {
        Self::Primitive { rfc_type: RfcType::Int, length: 4 }
    }

    pub fn int1() -> Self {
        Self::Primitive { rfc_type: RfcType::Int1, length: 1 }
    }

    pub fn int2() -> Self {
        Self::Primitive { rfc_type: RfcType::Int2, length: 2 }
    }

    pub fn string() -> Self {
        Self::Primitive { rfc_type: RfcType::String, length: 0 }
    }

    pub fn xstring() -> Self {
        Self::Primitive { rfc_type: RfcType::XString, length: 0 }
    }

    /// Any other kind, stored in the default cell for its type
    pub fn other(rfc_type: RfcType, length: usize) -> Self {
        Self::Primitive { rfc_type, length }
    }

    pub fn structure(def: Arc<StructDef>) -> Self {
        Self::Structure(def)
    }

    pub fn table(def: Arc<StructDef>) -> Self {
        Self::Table(def)
    }

    pub fn rfc_type(&self) -> RfcType {
        match self {
            Self::Primitive { rfc_type, .. } => *rfc_type,
            Self::Structure(_) => RfcType::Structure,
            Self::Table(_) => RfcType::Table,
        }
    }

    pub fn length(&self) -> usize {
        match self {
            Self::Primitive { length, .. } => *length,
            Self::Structure(def) => def.fields.iter().map(|f| f.kind.length()).sum(),
            Self::Table(_) => 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub kind: MockType,
}

/// Named structure type (also the row type of tables)
#[derive(Debug, Clone)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl StructDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, kind: MockType) -> Self {
        self.fields.push(FieldDef { name: name.into(), kind });
        self
    }

    pub fn build(self) -> Arc<StructDef> {
        Arc::new(self)
    }
}

#[derive(Debug, Clone)]
pub struct ParamDef {
    pub name: String,
    pub kind: MockType,
    pub direction: Direction,
    pub text: Option<String>,
}

/// Server side of a call: reads imports and writes exports on the frame
pub type Handler = Arc<dyn Fn(&mut CallFrame<'_>) -> Result<(), ErrorInfo> + Send + Sync>;

#[derive(Clone)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<ParamDef>,
    handler: Option<Handler>,
}

impl FunctionDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            handler: None,
        }
    }

    pub fn param(mut self, name: impl Into<String>, kind: MockType, direction: Direction) -> Self {
        self.params.push(ParamDef {
            name: name.into(),
            kind,
            direction,
            text: None,
        });
        self
    }

    pub fn import(self, name: impl Into<String>, kind: MockType) -> Self {
        self.param(name, kind, Direction::Import)
    }

    pub fn export(self, name: impl Into<String>, kind: MockType) -> Self {
        self.param(name, kind, Direction::Export)
    }

    pub fn changing(self, name: impl Into<String>, kind: MockType) -> Self {
        self.param(name, kind, Direction::Changing)
    }

    pub fn tables(self, name: impl Into<String>, row: Arc<StructDef>) -> Self {
        self.param(name, MockType::Table(row), Direction::Tables)
    }

    /// Describe the most recently added parameter
    pub fn describe(mut self, text: impl Into<String>) -> Self {
        if let Some(last) = self.params.last_mut() {
            last.text = Some(text.into());
        }
        self
    }

    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut CallFrame<'_>) -> Result<(), ErrorInfo> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }
}

impl std::fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionDef")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// One native invoke as observed by the backend
#[derive(Debug, Clone)]
pub struct InvokeRecord {
    pub session: SessionHandle,
    pub function: String,
    pub active: Vec<String>,
    pub enter: Instant,
    pub exit: Instant,
}

#[derive(Debug, Clone)]
enum Cell {
    Chars(String),
    Num(String),
    Date(String),
    Time(String),
    Bcd(String),
    Bytes(Vec<u8>),
    Float(f64),
    Int(i32),
    Int1(i8),
    Int2(i16),
    Str(String),
    XStr(Vec<u8>),
    Structure(u64),
    Table(u64),
    Opaque,
}

#[derive(Debug)]
enum Owner {
    Function { desc: u64, active: HashSet<String> },
    Structure { type_id: u64 },
}

#[derive(Debug)]
struct Container {
    owner: Owner,
    layout: Vec<(String, MockType)>,
    cells: HashMap<String, Cell>,
}

#[derive(Debug)]
struct Table {
    row_type: u64,
    rows: Vec<u64>,
    cursor: Option<usize>,
}

#[derive(Debug)]
struct Session {
    valid: bool,
    params: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct Faults {
    logon: Option<ErrorInfo>,
    close: Option<ErrorInfo>,
    ping: Option<ErrorInfo>,
    invoke: VecDeque<ErrorInfo>,
    too_small: usize,
    always_too_small: bool,
    panic_next_invoke: bool,
    open_delay: Duration,
    invoke_delay: Duration,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    ini_path: Option<PathBuf>,
    functions: HashMap<String, Arc<FunctionDef>>,
    desc_ids: HashMap<String, u64>,
    descs: HashMap<u64, Arc<FunctionDef>>,
    type_ids: HashMap<String, u64>,
    types: HashMap<u64, Arc<StructDef>>,
    sessions: HashMap<u64, Session>,
    containers: HashMap<u64, Container>,
    tables: HashMap<u64, Table>,
    faults: Faults,
    opens: usize,
    desc_lookups: usize,
    writes: usize,
    invokes: Vec<InvokeRecord>,
}

/// In-memory implementation of the backend client library
pub struct MockLibrary {
    state: Mutex<MockState>,
    version: (u32, u32, u32),
}

impl Default for MockLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLibrary {
    /// Backend preloaded with `STFC_CONNECTION` and `STFC_STRUCTURE`
    pub fn new() -> Self {
        let lib = Self::empty();
        lib.register(stfc_connection());
        lib.register(stfc_structure());
        lib
    }

    /// Backend without any registered function module
    pub fn empty() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_id: 0x1000,
                ..MockState::default()
            }),
            version: (7, 500, 11),
        }
    }

    pub fn register(&self, def: FunctionDef) {
        let mut state = self.state.lock();
        state.functions.insert(def.name.clone(), Arc::new(def));
    }

    // Fault injection

    pub fn reject_logon(&self, info: ErrorInfo) {
        self.state.lock().faults.logon = Some(info);
    }

    pub fn accept_logon(&self) {
        self.state.lock().faults.logon = None;
    }

    pub fn fail_close(&self, info: ErrorInfo) {
        self.state.lock().faults.close = Some(info);
    }

    pub fn fail_ping(&self, info: ErrorInfo) {
        self.state.lock().faults.ping = Some(info);
    }

    /// Queue a failure for the next native invoke
    pub fn fail_next_invoke(&self, info: ErrorInfo) {
        self.state.lock().faults.invoke.push_back(info);
    }

    /// Make the next native invoke panic
    pub fn panic_next_invoke(&self) {
        self.state.lock().faults.panic_next_invoke = true;
    }

    /// The next `count` variable-length reads report a short buffer once
    pub fn force_buffer_too_small(&self, count: usize) {
        self.state.lock().faults.too_small = count;
    }

    /// Every variable-length read reports a short buffer, asking for ever more space
    pub fn set_always_too_small(&self, enabled: bool) {
        self.state.lock().faults.always_too_small = enabled;
    }

    pub fn set_open_delay(&self, delay: Duration) {
        self.state.lock().faults.open_delay = delay;
    }

    pub fn set_invoke_delay(&self, delay: Duration) {
        self.state.lock().faults.invoke_delay = delay;
    }

    pub fn invalidate_session(&self, session: SessionHandle) {
        if let Some(s) = self.state.lock().sessions.get_mut(&session.raw()) {
            s.valid = false;
        }
    }

    pub fn invalidate_all_sessions(&self) {
        for session in self.state.lock().sessions.values_mut() {
            session.valid = false;
        }
    }

    // Observation

    pub fn open_count(&self) -> usize {
        self.state.lock().opens
    }

    pub fn desc_lookup_count(&self) -> usize {
        self.state.lock().desc_lookups
    }

    /// Number of successful value writes into containers
    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }

    pub fn invoke_records(&self) -> Vec<InvokeRecord> {
        self.state.lock().invokes.clone()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Containers of any kind still alive (call contexts, structures, rows)
    pub fn live_containers(&self) -> usize {
        self.state.lock().containers.len()
    }

    pub fn live_call_contexts(&self) -> usize {
        self.state
            .lock()
            .containers
            .values()
            .filter(|c| matches!(c.owner, Owner::Function { .. }))
            .count()
    }

    pub fn ini_path(&self) -> Option<PathBuf> {
        self.state.lock().ini_path.clone()
    }
}

fn not_found(what: &str, name: &str) -> ErrorInfo {
    ErrorInfo::new(ReturnCode::InvalidParameter, format!("{} {} not found", what, name))
        .with_group(ErrorGroup::ExternalRuntimeFailure)
}

fn conversion(name: &str, detail: &str) -> ErrorInfo {
    ErrorInfo::new(ReturnCode::ConversionFailure, format!("cannot convert {}: {}", name, detail))
        .with_group(ErrorGroup::ExternalRuntimeFailure)
}

fn invalid_handle() -> ErrorInfo {
    ErrorInfo::invalid_handle("An invalid handle was passed to the API call")
}

fn pad_right(value: &str, length: usize) -> String {
    let mut out: String = value.chars().take(length).collect();
    let count = out.chars().count();
    out.extend(std::iter::repeat(' ').take(length - count));
    out
}

fn pad_left_zeros(value: &str, length: usize) -> String {
    let count = value.chars().count();
    if count >= length {
        return value.chars().skip(count - length).collect();
    }
    let mut out: String = std::iter::repeat('0').take(length - count).collect();
    out.push_str(value);
    out
}

fn pad_bytes(value: &[u8], length: usize) -> Vec<u8> {
    let mut out: Vec<u8> = value.iter().copied().take(length).collect();
    out.resize(length, 0);
    out
}

impl MockState {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn type_id(&mut self, def: &Arc<StructDef>) -> u64 {
        if let Some(id) = self.type_ids.get(&def.name) {
            return *id;
        }
        let id = self.next();
        self.type_ids.insert(def.name.clone(), id);
        self.types.insert(id, def.clone());
        id
    }

    fn initial_cell(&mut self, kind: &MockType) -> Cell {
        match kind {
            MockType::Primitive { rfc_type, length } => match rfc_type {
                RfcType::Char => Cell::Chars(pad_right("", *length)),
                RfcType::Num => Cell::Num(pad_left_zeros("", *length)),
                RfcType::Date => Cell::Date("00000000".to_string()),
                RfcType::Time => Cell::Time("000000".to_string()),
                RfcType::Bcd | RfcType::DecF16 | RfcType::DecF34 => Cell::Bcd("0".to_string()),
                RfcType::Byte => Cell::Bytes(vec![0; *length]),
                RfcType::Float => Cell::Float(0.0),
                RfcType::Int => Cell::Int(0),
                RfcType::Int1 => Cell::Int1(0),
                RfcType::Int2 => Cell::Int2(0),
                RfcType::String => Cell::Str(String::new()),
                RfcType::XString => Cell::XStr(Vec::new()),
                _ => Cell::Opaque,
            },
            MockType::Structure(def) => Cell::Structure(self.new_structure(def)),
            MockType::Table(def) => {
                let row_type = self.type_id(def);
                let id = self.next();
                self.tables.insert(
                    id,
                    Table {
                        row_type,
                        rows: Vec::new(),
                        cursor: None,
                    },
                );
                Cell::Table(id)
            }
        }
    }

    fn new_container(&mut self, owner: Owner, layout: Vec<(String, MockType)>) -> u64 {
        let mut cells = HashMap::new();
        for (name, kind) in &layout {
            let cell = self.initial_cell(kind);
            cells.insert(name.clone(), cell);
        }
        let id = self.next();
        self.containers.insert(id, Container { owner, layout, cells });
        id
    }

    fn new_structure(&mut self, def: &Arc<StructDef>) -> u64 {
        let type_id = self.type_id(def);
        let layout = def.fields.iter().map(|f| (f.name.clone(), f.kind.clone())).collect();
        self.new_container(Owner::Structure { type_id }, layout)
    }

    fn free_container(&mut self, id: u64) {
        if let Some(container) = self.containers.remove(&id) {
            for cell in container.cells.into_values() {
                match cell {
                    Cell::Structure(child) => self.free_container(child),
                    Cell::Table(table) => self.free_table(table),
                    _ => {}
                }
            }
        }
    }

    fn free_table(&mut self, id: u64) {
        if let Some(table) = self.tables.remove(&id) {
            for row in table.rows {
                self.free_container(row);
            }
        }
    }

    fn cell(&self, container: ContainerHandle, name: &str) -> NativeResult<&Cell> {
        let c = self.containers.get(&container.raw()).ok_or_else(invalid_handle)?;
        c.cells.get(name).ok_or_else(|| not_found("field", name))
    }

    fn cell_mut(&mut self, container: ContainerHandle, name: &str) -> NativeResult<&mut Cell> {
        let c = self.containers.get_mut(&container.raw()).ok_or_else(invalid_handle)?;
        c.cells.get_mut(name).ok_or_else(|| not_found("field", name))
    }

    fn kind_of(&self, container: u64, name: &str) -> NativeResult<MockType> {
        let c = self.containers.get(&container).ok_or_else(invalid_handle)?;
        c.layout
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, k)| k.clone())
            .ok_or_else(|| not_found("field", name))
    }

    fn table(&self, table: TableHandle) -> NativeResult<&Table> {
        self.tables.get(&table.raw()).ok_or_else(invalid_handle)
    }

    fn session_valid(&self, session: SessionHandle) -> bool {
        self.sessions.get(&session.raw()).map(|s| s.valid).unwrap_or(false)
    }

    fn short_buffer(&mut self, required: usize, capacity: usize) -> Option<usize> {
        if self.faults.always_too_small {
            return Some(capacity.max(required) + 1);
        }
        if self.faults.too_small > 0 {
            self.faults.too_small -= 1;
            return Some(required);
        }
        if required > capacity {
            return Some(required);
        }
        None
    }

    fn store(&mut self, container: ContainerHandle, name: &str, cell: Cell) -> NativeResult<()> {
        *self.cell_mut(container, name)? = cell;
        self.writes += 1;
        Ok(())
    }

    /// Convert a stored cell to a host value (server-side view)
    fn read_value(&self, container: u64, name: &str) -> NativeResult<Value> {
        let c = self.containers.get(&container).ok_or_else(invalid_handle)?;
        let cell = c.cells.get(name).ok_or_else(|| not_found("field", name))?;
        Ok(match cell {
            Cell::Chars(s) => Value::String(s.trim_end().to_string()),
            Cell::Num(s) | Cell::Date(s) | Cell::Time(s) | Cell::Str(s) => Value::String(s.clone()),
            Cell::Bcd(s) => Value::Number(s.parse().map_err(|_| conversion(name, s))?),
            Cell::Bytes(b) | Cell::XStr(b) => Value::Bytes(b.clone()),
            Cell::Float(f) => Value::Number(*f),
            Cell::Int(i) => Value::Integer(i64::from(*i)),
            Cell::Int1(i) => Value::Integer(i64::from(*i)),
            Cell::Int2(i) => Value::Integer(i64::from(*i)),
            Cell::Structure(child) => self.read_container(*child)?,
            Cell::Table(table) => {
                let t = self.tables.get(table).ok_or_else(invalid_handle)?;
                let rows = t
                    .rows
                    .iter()
                    .map(|row| self.read_container(*row))
                    .collect::<NativeResult<Vec<_>>>()?;
                Value::Array(rows)
            }
            Cell::Opaque => return Err(conversion(name, "opaque value")),
        })
    }

    fn read_container(&self, container: u64) -> NativeResult<Value> {
        let c = self.containers.get(&container).ok_or_else(invalid_handle)?;
        let mut obj = Object::new();
        for (name, _) in &c.layout {
            obj.insert(name.clone(), self.read_value(container, name)?);
        }
        Ok(Value::Object(obj))
    }

    /// Store a host value into a cell (server-side view)
    fn write_value(&mut self, container: u64, name: &str, value: &Value) -> NativeResult<()> {
        let kind = self.kind_of(container, name)?;
        let handle = ContainerHandle::from_raw(container);
        let cell = match (&kind, value) {
            (MockType::Structure(_), Value::Object(fields)) => {
                let Cell::Structure(child) = *self.cell(handle, name)? else {
                    return Err(conversion(name, "not a structure"));
                };
                for (field, v) in fields {
                    self.write_value(child, field, v)?;
                }
                return Ok(());
            }
            (MockType::Table(def), Value::Array(rows)) => {
                let Cell::Table(table) = *self.cell(handle, name)? else {
                    return Err(conversion(name, "not a table"));
                };
                let old = self
                    .tables
                    .get_mut(&table)
                    .map(|t| std::mem::take(&mut t.rows))
                    .unwrap_or_default();
                for row in old {
                    self.free_container(row);
                }
                for row in rows {
                    let id = self.new_structure(def);
                    if let Value::Object(fields) = row {
                        for (field, v) in fields {
                            self.write_value(id, field, v)?;
                        }
                    }
                    if let Some(t) = self.tables.get_mut(&table) {
                        t.rows.push(id);
                        t.cursor = Some(t.rows.len() - 1);
                    }
                }
                return Ok(());
            }
            (MockType::Primitive { rfc_type, length }, v) => match (rfc_type, v) {
                (RfcType::Char, Value::String(s)) => Cell::Chars(pad_right(s, *length)),
                (RfcType::Num, Value::String(s)) => Cell::Num(pad_left_zeros(s, *length)),
                (RfcType::Date, Value::String(s)) => Cell::Date(s.clone()),
                (RfcType::Time, Value::String(s)) => Cell::Time(s.clone()),
                (RfcType::Bcd | RfcType::DecF16 | RfcType::DecF34, v) => match v.as_f64() {
                    Some(n) => Cell::Bcd(n.to_string()),
                    None => return Err(conversion(name, v.kind_name())),
                },
                (RfcType::Byte, Value::Bytes(b)) => Cell::Bytes(pad_bytes(b, *length)),
                (RfcType::Float, v) => match v.as_f64() {
                    Some(n) => Cell::Float(n),
                    None => return Err(conversion(name, v.kind_name())),
                },
                (RfcType::Int, Value::Integer(i)) => {
                    Cell::Int(i32::try_from(*i).map_err(|_| conversion(name, "overflow"))?)
                }
                (RfcType::Int1, Value::Integer(i)) => {
                    Cell::Int1(i8::try_from(*i).map_err(|_| conversion(name, "overflow"))?)
                }
                (RfcType::Int2, Value::Integer(i)) => {
                    Cell::Int2(i16::try_from(*i).map_err(|_| conversion(name, "overflow"))?)
                }
                (RfcType::String, Value::String(s)) => Cell::Str(s.clone()),
                (RfcType::XString, Value::Bytes(b)) => Cell::XStr(b.clone()),
                (_, v) => return Err(conversion(name, v.kind_name())),
            },
            (_, v) => return Err(conversion(name, v.kind_name())),
        };
        *self.cell_mut(handle, name)? = cell;
        Ok(())
    }
}

/// Server-side view of a call container, handed to function handlers
pub struct CallFrame<'a> {
    state: &'a mut MockState,
    container: u64,
    login: Vec<(String, String)>,
}

impl CallFrame<'_> {
    /// Current value of a parameter; CHAR values come back without padding
    pub fn get(&self, name: &str) -> Result<Value, ErrorInfo> {
        self.state.read_value(self.container, name)
    }

    /// Overwrite a parameter; objects update fields, arrays replace all rows
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), ErrorInfo> {
        let value = value.into();
        self.state.write_value(self.container, name, &value)
    }

    /// Login parameter of the calling session
    pub fn login_parameter(&self, name: &str) -> Option<&str> {
        self.login
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn rfctest() -> Arc<StructDef> {
    StructDef::new("RFCTEST")
        .field("RFCFLOAT", MockType::float())
        .field("RFCCHAR1", MockType::char(1))
        .field("RFCINT2", MockType::int2())
        .field("RFCINT1", MockType::int1())
        .field("RFCICHAR4", MockType::char(4))
        .field("RFCINT4", MockType::int())
        .field("RFCHEX3", MockType::byte(3))
        .field("RFCCHAR2", MockType::char(2))
        .field("RFCTIME", MockType::time())
        .field("RFCDATE", MockType::date())
        .field("RFCDATA1", MockType::char(50))
        .field("RFCDATA2", MockType::char(50))
        .build()
}

fn response_text(frame: &CallFrame<'_>) -> String {
    format!(
        "SAP R/3 Rel. 750   Sysid: MCK      Date: 20240101   Time: 120000   Client: {}",
        frame.login_parameter("client").unwrap_or("000")
    )
}

/// Echo function: ECHOTEXT mirrors REQUTEXT
pub fn stfc_connection() -> FunctionDef {
    FunctionDef::new("STFC_CONNECTION")
        .import("REQUTEXT", MockType::char(255))
        .describe("Sending text")
        .export("ECHOTEXT", MockType::char(255))
        .describe("Echo text")
        .export("RESPTEXT", MockType::char(255))
        .describe("Response text")
        .handler(|frame| {
            let request = frame.get("REQUTEXT")?;
            frame.set("ECHOTEXT", request)?;
            let response = response_text(frame);
            frame.set("RESPTEXT", response)
        })
}

/// Structure/table echo: ECHOSTRUCT mirrors IMPORTSTRUCT, which is also appended to RFCTABLE
pub fn stfc_structure() -> FunctionDef {
    let row = rfctest();
    FunctionDef::new("STFC_STRUCTURE")
        .import("IMPORTSTRUCT", MockType::structure(row.clone()))
        .describe("Importing structure")
        .export("ECHOSTRUCT", MockType::structure(row.clone()))
        .describe("Echo of importing structure")
        .export("RESPTEXT", MockType::char(255))
        .tables("RFCTABLE", row)
        .describe("Table of RFCTEST rows")
        .handler(|frame| {
            let imported = frame.get("IMPORTSTRUCT")?;
            frame.set("ECHOSTRUCT", imported.clone())?;
            let mut rows = match frame.get("RFCTABLE")? {
                Value::Array(rows) => rows,
                _ => Vec::new(),
            };
            rows.push(imported);
            frame.set("RFCTABLE", Value::Array(rows))?;
            let response = response_text(frame);
            frame.set("RESPTEXT", response)
        })
}

impl RfcLibrary for MockLibrary {
    fn version(&self) -> (u32, u32, u32) {
        self.version
    }

    fn set_ini_path(&self, path: &Path) -> NativeResult<()> {
        self.state.lock().ini_path = Some(path.to_path_buf());
        Ok(())
    }

    fn open_connection(&self, params: &[(String, String)]) -> NativeResult<SessionHandle> {
        let delay = self.state.lock().faults.open_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut state = self.state.lock();
        if params.is_empty() {
            return Err(ErrorInfo::new(ReturnCode::InvalidParameter, "no connection parameters")
                .with_group(ErrorGroup::ExternalRuntimeFailure));
        }
        if let Some(info) = state.faults.logon.clone() {
            return Err(info);
        }
        let id = state.next();
        state.sessions.insert(
            id,
            Session {
                valid: true,
                params: params.to_vec(),
            },
        );
        state.opens += 1;
        Ok(SessionHandle::from_raw(id))
    }

    fn close_connection(&self, session: SessionHandle) -> NativeResult<()> {
        let mut state = self.state.lock();
        let removed = state.sessions.remove(&session.raw());
        if let Some(info) = state.faults.close.clone() {
            return Err(info);
        }
        match removed {
            Some(_) => Ok(()),
            None => Err(invalid_handle()),
        }
    }

    fn is_connection_handle_valid(&self, session: SessionHandle) -> NativeResult<bool> {
        let state = self.state.lock();
        if state.session_valid(session) {
            Ok(true)
        } else {
            Err(ErrorInfo::invalid_handle("Connection handle is invalid or the connection was closed")
                .with_group(ErrorGroup::CommunicationFailure))
        }
    }

    fn ping(&self, session: SessionHandle) -> NativeResult<()> {
        let state = self.state.lock();
        if !state.session_valid(session) {
            return Err(invalid_handle());
        }
        match state.faults.ping.clone() {
            Some(info) => Err(info),
            None => Ok(()),
        }
    }

    fn get_function_desc(&self, session: SessionHandle, name: &str) -> NativeResult<FunctionDescHandle> {
        let mut state = self.state.lock();
        if !state.session_valid(session) {
            return Err(invalid_handle());
        }
        state.desc_lookups += 1;
        let def = state.functions.get(name).cloned().ok_or_else(|| {
            ErrorInfo::new(ReturnCode::AbapException, format!("function module {} not found", name))
                .with_group(ErrorGroup::AbapApplicationFailure)
                .with_key("FU_NOT_FOUND")
        })?;
        if let Some(id) = state.desc_ids.get(name) {
            return Ok(FunctionDescHandle::from_raw(*id));
        }
        let id = state.next();
        state.desc_ids.insert(name.to_string(), id);
        state.descs.insert(id, def);
        Ok(FunctionDescHandle::from_raw(id))
    }

    fn function_name(&self, desc: FunctionDescHandle) -> NativeResult<String> {
        let state = self.state.lock();
        state
            .descs
            .get(&desc.raw())
            .map(|d| d.name.clone())
            .ok_or_else(invalid_handle)
    }

    fn parameter_count(&self, desc: FunctionDescHandle) -> NativeResult<usize> {
        let state = self.state.lock();
        state
            .descs
            .get(&desc.raw())
            .map(|d| d.params.len())
            .ok_or_else(invalid_handle)
    }

    fn parameter_desc_by_index(&self, desc: FunctionDescHandle, index: usize) -> NativeResult<ParameterDesc> {
        let state = self.state.lock();
        let def = state.descs.get(&desc.raw()).ok_or_else(invalid_handle)?;
        let param = def
            .params
            .get(index)
            .ok_or_else(|| not_found("parameter index", &index.to_string()))?;
        Ok(ParameterDesc {
            name: param.name.clone(),
            rfc_type: param.kind.rfc_type(),
            direction: param.direction,
            length: param.kind.length(),
            text: param.text.clone(),
        })
    }

    fn create_function(&self, desc: FunctionDescHandle) -> NativeResult<ContainerHandle> {
        let mut state = self.state.lock();
        let def = state.descs.get(&desc.raw()).cloned().ok_or_else(invalid_handle)?;
        let layout = def.params.iter().map(|p| (p.name.clone(), p.kind.clone())).collect();
        let id = state.new_container(
            Owner::Function {
                desc: desc.raw(),
                active: HashSet::new(),
            },
            layout,
        );
        Ok(ContainerHandle::from_raw(id))
    }

    fn destroy_function(&self, container: ContainerHandle) -> NativeResult<()> {
        let mut state = self.state.lock();
        match state.containers.get(&container.raw()) {
            Some(Container {
                owner: Owner::Function { .. },
                ..
            }) => {
                state.free_container(container.raw());
                Ok(())
            }
            _ => Err(invalid_handle()),
        }
    }

    fn set_parameter_active(&self, container: ContainerHandle, name: &str, active: bool) -> NativeResult<()> {
        let mut state = self.state.lock();
        let c = state.containers.get_mut(&container.raw()).ok_or_else(invalid_handle)?;
        if !c.cells.contains_key(name) {
            return Err(not_found("parameter", name));
        }
        match &mut c.owner {
            Owner::Function { active: set, .. } => {
                if active {
                    set.insert(name.to_string());
                } else {
                    set.remove(name);
                }
                Ok(())
            }
            Owner::Structure { .. } => Err(invalid_handle()),
        }
    }

    fn invoke(&self, session: SessionHandle, container: ContainerHandle) -> NativeResult<()> {
        let enter = Instant::now();
        let (delay, login, def, active, injected, panic) = {
            let mut state = self.state.lock();
            if !state.session_valid(session) {
                return Err(ErrorInfo::invalid_handle("An invalid handle 'RFC_CONNECTION_HANDLE' was passed to the API call"));
            }
            let login = state
                .sessions
                .get(&session.raw())
                .map(|s| s.params.clone())
                .unwrap_or_default();
            let (desc, active) = match state.containers.get(&container.raw()) {
                Some(Container {
                    owner: Owner::Function { desc, active },
                    ..
                }) => (*desc, active.iter().cloned().collect::<Vec<_>>()),
                _ => return Err(invalid_handle()),
            };
            let def = state.descs.get(&desc).cloned().ok_or_else(invalid_handle)?;
            let injected = state.faults.invoke.pop_front();
            let panic = std::mem::take(&mut state.faults.panic_next_invoke);
            (state.faults.invoke_delay, login, def, active, injected, panic)
        };

        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if panic {
            panic!("backend crashed while executing {}", def.name);
        }

        let mut state = self.state.lock();
        let outcome = match injected {
            Some(info) => Err(info),
            None => match &def.handler {
                Some(handler) => {
                    let mut frame = CallFrame {
                        state: &mut *state,
                        container: container.raw(),
                        login,
                    };
                    handler(&mut frame)
                }
                None => Ok(()),
            },
        };
        let mut active = active;
        active.sort();
        state.invokes.push(InvokeRecord {
            session,
            function: def.name.clone(),
            active,
            enter,
            exit: Instant::now(),
        });
        outcome
    }

    fn get_structure(&self, container: ContainerHandle, name: &str) -> NativeResult<ContainerHandle> {
        let state = self.state.lock();
        match state.cell(container, name)? {
            Cell::Structure(id) => Ok(ContainerHandle::from_raw(*id)),
            _ => Err(conversion(name, "not a structure")),
        }
    }

    fn get_table(&self, container: ContainerHandle, name: &str) -> NativeResult<TableHandle> {
        let state = self.state.lock();
        match state.cell(container, name)? {
            Cell::Table(id) => Ok(TableHandle::from_raw(*id)),
            _ => Err(conversion(name, "not a table")),
        }
    }

    fn describe_structure(&self, structure: ContainerHandle) -> NativeResult<TypeDescHandle> {
        let state = self.state.lock();
        match state.containers.get(&structure.raw()) {
            Some(Container {
                owner: Owner::Structure { type_id },
                ..
            }) => Ok(TypeDescHandle::from_raw(*type_id)),
            _ => Err(invalid_handle()),
        }
    }

    fn describe_table(&self, table: TableHandle) -> NativeResult<TypeDescHandle> {
        let state = self.state.lock();
        Ok(TypeDescHandle::from_raw(state.table(table)?.row_type))
    }

    fn type_name(&self, type_desc: TypeDescHandle) -> NativeResult<String> {
        let state = self.state.lock();
        state
            .types
            .get(&type_desc.raw())
            .map(|t| t.name.clone())
            .ok_or_else(invalid_handle)
    }

    fn field_count(&self, type_desc: TypeDescHandle) -> NativeResult<usize> {
        let state = self.state.lock();
        state
            .types
            .get(&type_desc.raw())
            .map(|t| t.fields.len())
            .ok_or_else(invalid_handle)
    }

    fn field_desc_by_index(&self, type_desc: TypeDescHandle, index: usize) -> NativeResult<FieldDesc> {
        let state = self.state.lock();
        let def = state.types.get(&type_desc.raw()).ok_or_else(invalid_handle)?;
        let field = def
            .fields
            .get(index)
            .ok_or_else(|| not_found("field index", &index.to_string()))?;
        Ok(FieldDesc::new(field.name.clone(), field.kind.rfc_type(), field.kind.length()))
    }

    fn append_new_row(&self, table: TableHandle) -> NativeResult<ContainerHandle> {
        let mut state = self.state.lock();
        let row_type = state.table(table)?.row_type;
        let def = state.types.get(&row_type).cloned().ok_or_else(invalid_handle)?;
        let row = state.new_structure(&def);
        if let Some(t) = state.tables.get_mut(&table.raw()) {
            t.rows.push(row);
            t.cursor = Some(t.rows.len() - 1);
        }
        Ok(ContainerHandle::from_raw(row))
    }

    fn delete_current_row(&self, table: TableHandle) -> NativeResult<()> {
        let mut state = self.state.lock();
        let t = state.tables.get_mut(&table.raw()).ok_or_else(invalid_handle)?;
        let index = t
            .cursor
            .filter(|i| *i < t.rows.len())
            .ok_or_else(|| ErrorInfo::new(ReturnCode::TableMoveEof, "no current row"))?;
        let row = t.rows.remove(index);
        t.cursor = if t.rows.is_empty() {
            None
        } else {
            Some(index.min(t.rows.len() - 1))
        };
        state.free_container(row);
        Ok(())
    }

    fn row_count(&self, table: TableHandle) -> NativeResult<usize> {
        let state = self.state.lock();
        Ok(state.table(table)?.rows.len())
    }

    fn move_to(&self, table: TableHandle, index: usize) -> NativeResult<()> {
        let mut state = self.state.lock();
        let t = state.tables.get_mut(&table.raw()).ok_or_else(invalid_handle)?;
        if index >= t.rows.len() {
            return Err(ErrorInfo::new(ReturnCode::TableMoveEof, format!("row {} beyond end of table", index)));
        }
        t.cursor = Some(index);
        Ok(())
    }

    fn current_row(&self, table: TableHandle) -> NativeResult<ContainerHandle> {
        let state = self.state.lock();
        let t = state.table(table)?;
        t.cursor
            .and_then(|i| t.rows.get(i))
            .map(|row| ContainerHandle::from_raw(*row))
            .ok_or_else(|| ErrorInfo::new(ReturnCode::TableMoveEof, "no current row"))
    }

    fn set_chars(&self, container: ContainerHandle, name: &str, value: &str) -> NativeResult<()> {
        let mut state = self.state.lock();
        let length = match state.kind_of(container.raw(), name)? {
            MockType::Primitive { rfc_type: RfcType::Char, length } => length,
            _ => return Err(conversion(name, "not CHAR")),
        };
        state.store(container, name, Cell::Chars(pad_right(value, length)))
    }

    fn get_chars(&self, container: ContainerHandle, name: &str, length: usize) -> NativeResult<String> {
        let state = self.state.lock();
        match state.cell(container, name)? {
            Cell::Chars(s) => Ok(pad_right(s, length)),
            _ => Err(conversion(name, "not CHAR")),
        }
    }

    fn set_num(&self, container: ContainerHandle, name: &str, value: &str) -> NativeResult<()> {
        let mut state = self.state.lock();
        let length = match state.kind_of(container.raw(), name)? {
            MockType::Primitive { rfc_type: RfcType::Num, length } => length,
            _ => return Err(conversion(name, "not NUMC")),
        };
        if !value.chars().all(|c| c.is_ascii_digit()) {
            return Err(conversion(name, value));
        }
        state.store(container, name, Cell::Num(pad_left_zeros(value, length)))
    }

    fn get_num(&self, container: ContainerHandle, name: &str, length: usize) -> NativeResult<String> {
        let state = self.state.lock();
        match state.cell(container, name)? {
            Cell::Num(s) => Ok(pad_left_zeros(s, length)),
            _ => Err(conversion(name, "not NUMC")),
        }
    }

    fn set_date(&self, container: ContainerHandle, name: &str, value: &str) -> NativeResult<()> {
        let mut state = self.state.lock();
        if !matches!(state.cell(container, name)?, Cell::Date(_)) {
            return Err(conversion(name, "not DATS"));
        }
        if value.chars().count() != 8 {
            return Err(conversion(name, value));
        }
        state.store(container, name, Cell::Date(value.to_string()))
    }

    fn get_date(&self, container: ContainerHandle, name: &str) -> NativeResult<String> {
        let state = self.state.lock();
        match state.cell(container, name)? {
            Cell::Date(s) => Ok(s.clone()),
            _ => Err(conversion(name, "not DATS")),
        }
    }

    fn set_time(&self, container: ContainerHandle, name: &str, value: &str) -> NativeResult<()> {
        let mut state = self.state.lock();
        if !matches!(state.cell(container, name)?, Cell::Time(_)) {
            return Err(conversion(name, "not TIMS"));
        }
        if value.chars().count() != 6 {
            return Err(conversion(name, value));
        }
        state.store(container, name, Cell::Time(value.to_string()))
    }

    fn get_time(&self, container: ContainerHandle, name: &str) -> NativeResult<String> {
        let state = self.state.lock();
        match state.cell(container, name)? {
            Cell::Time(s) => Ok(s.clone()),
            _ => Err(conversion(name, "not TIMS")),
        }
    }

    fn set_bytes(&self, container: ContainerHandle, name: &str, value: &[u8], length: usize) -> NativeResult<()> {
        let mut state = self.state.lock();
        if !matches!(state.cell(container, name)?, Cell::Bytes(_)) {
            return Err(conversion(name, "not RAW"));
        }
        state.store(container, name, Cell::Bytes(pad_bytes(value, length)))
    }

    fn get_bytes(&self, container: ContainerHandle, name: &str, length: usize) -> NativeResult<Vec<u8>> {
        let state = self.state.lock();
        match state.cell(container, name)? {
            Cell::Bytes(b) => Ok(pad_bytes(b, length)),
            _ => Err(conversion(name, "not RAW")),
        }
    }

    fn set_float(&self, container: ContainerHandle, name: &str, value: f64) -> NativeResult<()> {
        let mut state = self.state.lock();
        if !matches!(state.cell(container, name)?, Cell::Float(_)) {
            return Err(conversion(name, "not FLTP"));
        }
        state.store(container, name, Cell::Float(value))
    }

    fn get_float(&self, container: ContainerHandle, name: &str) -> NativeResult<f64> {
        let state = self.state.lock();
        match state.cell(container, name)? {
            Cell::Float(f) => Ok(*f),
            _ => Err(conversion(name, "not FLTP")),
        }
    }

    fn set_int(&self, container: ContainerHandle, name: &str, value: i32) -> NativeResult<()> {
        let mut state = self.state.lock();
        if !matches!(state.cell(container, name)?, Cell::Int(_)) {
            return Err(conversion(name, "not INT4"));
        }
        state.store(container, name, Cell::Int(value))
    }

    fn get_int(&self, container: ContainerHandle, name: &str) -> NativeResult<i32> {
        let state = self.state.lock();
        match state.cell(container, name)? {
            Cell::Int(i) => Ok(*i),
            _ => Err(conversion(name, "not INT4")),
        }
    }

    fn set_int1(&self, container: ContainerHandle, name: &str, value: i8) -> NativeResult<()> {
        let mut state = self.state.lock();
        if !matches!(state.cell(container, name)?, Cell::Int1(_)) {
            return Err(conversion(name, "not INT1"));
        }
        state.store(container, name, Cell::Int1(value))
    }

    fn get_int1(&self, container: ContainerHandle, name: &str) -> NativeResult<i8> {
        let state = self.state.lock();
        match state.cell(container, name)? {
            Cell::Int1(i) => Ok(*i),
            _ => Err(conversion(name, "not INT1")),
        }
    }

    fn set_int2(&self, container: ContainerHandle, name: &str, value: i16) -> NativeResult<()> {
        let mut state = self.state.lock();
        if !matches!(state.cell(container, name)?, Cell::Int2(_)) {
            return Err(conversion(name, "not INT2"));
        }
        state.store(container, name, Cell::Int2(value))
    }

    fn get_int2(&self, container: ContainerHandle, name: &str) -> NativeResult<i16> {
        let state = self.state.lock();
        match state.cell(container, name)? {
            Cell::Int2(i) => Ok(*i),
            _ => Err(conversion(name, "not INT2")),
        }
    }

    fn set_string(&self, container: ContainerHandle, name: &str, value: &str) -> NativeResult<()> {
        let mut state = self.state.lock();
        let cell = match state.cell(container, name)? {
            Cell::Str(_) => Cell::Str(value.to_string()),
            Cell::Bcd(_) => {
                if value.trim().parse::<f64>().is_err() {
                    return Err(conversion(name, value));
                }
                Cell::Bcd(value.trim().to_string())
            }
            _ => return Err(conversion(name, "not STRING")),
        };
        state.store(container, name, cell)
    }

    fn get_string_length(&self, container: ContainerHandle, name: &str) -> NativeResult<usize> {
        let state = self.state.lock();
        match state.cell(container, name)? {
            Cell::Str(s) | Cell::Bcd(s) => Ok(s.chars().count()),
            Cell::XStr(b) => Ok(b.len()),
            _ => Err(conversion(name, "not STRING")),
        }
    }

    fn get_string(&self, container: ContainerHandle, name: &str, capacity: usize) -> NativeResult<BufferRead<String>> {
        let mut state = self.state.lock();
        let value = match state.cell(container, name)? {
            Cell::Str(s) | Cell::Bcd(s) => s.clone(),
            _ => return Err(conversion(name, "not STRING")),
        };
        match state.short_buffer(value.chars().count(), capacity) {
            Some(required) => Ok(BufferRead::TooSmall { required }),
            None => Ok(BufferRead::Complete(value)),
        }
    }

    fn set_xstring(&self, container: ContainerHandle, name: &str, value: &[u8]) -> NativeResult<()> {
        let mut state = self.state.lock();
        if !matches!(state.cell(container, name)?, Cell::XStr(_)) {
            return Err(conversion(name, "not XSTRING"));
        }
        state.store(container, name, Cell::XStr(value.to_vec()))
    }

    fn get_xstring(&self, container: ContainerHandle, name: &str, capacity: usize) -> NativeResult<BufferRead<Vec<u8>>> {
        let mut state = self.state.lock();
        let value = match state.cell(container, name)? {
            Cell::XStr(b) => b.clone(),
            _ => return Err(conversion(name, "not XSTRING")),
        };
        match state.short_buffer(value.len(), capacity) {
            Some(required) => Ok(BufferRead::TooSmall { required }),
            None => Ok(BufferRead::Complete(value)),
        }
    }
}
