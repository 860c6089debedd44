use serde::{Deserialize, Serialize};
use std::fmt;

/// Backend type kind of a parameter or field
///
/// Closed set of the kinds the backend reports. Tags the marshaling engine does not
/// handle are still representable through `Other` so they can be reported by number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RfcType {
    Char,
    Date,
    Bcd,
    Time,
    Byte,
    Table,
    Num,
    Float,
    Int,
    Int2,
    Int1,
    Null,
    AbapObject,
    Structure,
    DecF16,
    DecF34,
    XmlData,
    String,
    XString,
    Int8,
    UtcLong,
    UtcSecond,
    UtcMinute,
    DtDay,
    DtWeek,
    DtMonth,
    TSecond,
    TMinute,
    CDay,
    Box,
    GenericBox,
    Other(u32),
}

impl RfcType {
    /// Map a numeric backend tag to its kind
    pub const fn from_tag(tag: u32) -> Self {
        match tag {
            0 => Self::Char,
            1 => Self::Date,
            2 => Self::Bcd,
            3 => Self::Time,
            4 => Self::Byte,
            5 => Self::Table,
            6 => Self::Num,
            7 => Self::Float,
            8 => Self::Int,
            9 => Self::Int2,
            10 => Self::Int1,
            14 => Self::Null,
            16 => Self::AbapObject,
            17 => Self::Structure,
            23 => Self::DecF16,
            24 => Self::DecF34,
            28 => Self::XmlData,
            29 => Self::String,
            30 => Self::XString,
            31 => Self::Int8,
            32 => Self::UtcLong,
            33 => Self::UtcSecond,
            34 => Self::UtcMinute,
            35 => Self::DtDay,
            36 => Self::DtWeek,
            37 => Self::DtMonth,
            38 => Self::TSecond,
            39 => Self::TMinute,
            40 => Self::CDay,
            41 => Self::Box,
            42 => Self::GenericBox,
            other => Self::Other(other),
        }
    }

    /// Numeric backend tag
    pub const fn tag(self) -> u32 {
        match self {
            Self::Char => 0,
            Self::Date => 1,
            Self::Bcd => 2,
            Self::Time => 3,
            Self::Byte => 4,
            Self::Table => 5,
            Self::Num => 6,
            Self::Float => 7,
            Self::Int => 8,
            Self::Int2 => 9,
            Self::Int1 => 10,
            Self::Null => 14,
            Self::AbapObject => 16,
            Self::Structure => 17,
            Self::DecF16 => 23,
            Self::DecF34 => 24,
            Self::XmlData => 28,
            Self::String => 29,
            Self::XString => 30,
            Self::Int8 => 31,
            Self::UtcLong => 32,
            Self::UtcSecond => 33,
            Self::UtcMinute => 34,
            Self::DtDay => 35,
            Self::DtWeek => 36,
            Self::DtMonth => 37,
            Self::TSecond => 38,
            Self::TMinute => 39,
            Self::CDay => 40,
            Self::Box => 41,
            Self::GenericBox => 42,
            Self::Other(tag) => tag,
        }
    }

    /// Backend spelling of the type, as reported in metadata (`sapType`)
    pub fn sap_name(self) -> String {
        let name = match self {
            Self::Char => "RFCTYPE_CHAR",
            Self::Date => "RFCTYPE_DATE",
            Self::Bcd => "RFCTYPE_BCD",
            Self::Time => "RFCTYPE_TIME",
            Self::Byte => "RFCTYPE_BYTE",
            Self::Table => "RFCTYPE_TABLE",
            Self::Num => "RFCTYPE_NUM",
            Self::Float => "RFCTYPE_FLOAT",
            Self::Int => "RFCTYPE_INT",
            Self::Int2 => "RFCTYPE_INT2",
            Self::Int1 => "RFCTYPE_INT1",
            Self::Null => "RFCTYPE_NULL",
            Self::AbapObject => "RFCTYPE_ABAPOBJECT",
            Self::Structure => "RFCTYPE_STRUCTURE",
            Self::DecF16 => "RFCTYPE_DECF16",
            Self::DecF34 => "RFCTYPE_DECF34",
            Self::XmlData => "RFCTYPE_XMLDATA",
            Self::String => "RFCTYPE_STRING",
            Self::XString => "RFCTYPE_XSTRING",
            Self::Int8 => "RFCTYPE_INT8",
            Self::UtcLong => "RFCTYPE_UTCLONG",
            Self::UtcSecond => "RFCTYPE_UTCSECOND",
            Self::UtcMinute => "RFCTYPE_UTCMINUTE",
            Self::DtDay => "RFCTYPE_DTDAY",
            Self::DtWeek => "RFCTYPE_DTWEEK",
            Self::DtMonth => "RFCTYPE_DTMONTH",
            Self::TSecond => "RFCTYPE_TSECOND",
            Self::TMinute => "RFCTYPE_TMINUTE",
            Self::CDay => "RFCTYPE_CDAY",
            Self::Box => "RFCTYPE_BOX",
            Self::GenericBox => "RFCTYPE_GENERIC_BOX",
            Self::Other(tag) => return format!("RFCTYPE_UNKNOWN({})", tag),
        };
        name.to_string()
    }

    /// Coarse host type used by the schema builder
    pub const fn coarse(self) -> CoarseType {
        match self {
            Self::Char
            | Self::Date
            | Self::Time
            | Self::Byte
            | Self::Num
            | Self::String
            | Self::XString => CoarseType::String,
            Self::Table => CoarseType::Array,
            Self::AbapObject | Self::Structure => CoarseType::Object,
            Self::Bcd | Self::Float | Self::DecF16 | Self::DecF34 => CoarseType::Number,
            Self::Int
            | Self::Int2
            | Self::Int1
            | Self::Int8
            | Self::UtcLong
            | Self::UtcSecond
            | Self::UtcMinute
            | Self::DtDay
            | Self::DtWeek
            | Self::DtMonth
            | Self::TSecond
            | Self::TMinute
            | Self::CDay => CoarseType::Integer,
            _ => CoarseType::Undefined,
        }
    }
}

impl fmt::Display for RfcType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sap_name())
    }
}

/// Host-facing type family reported in schemas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoarseType {
    String,
    Number,
    Integer,
    Object,
    Array,
    Undefined,
}

impl CoarseType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Object => "object",
            Self::Array => "array",
            Self::Undefined => "undefined",
        }
    }
}

/// Parameter direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Import,
    Export,
    Changing,
    Tables,
}

impl Direction {
    pub const fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0x01 => Some(Self::Import),
            0x02 => Some(Self::Export),
            0x03 => Some(Self::Changing),
            0x07 => Some(Self::Tables),
            _ => None,
        }
    }

    pub const fn tag(self) -> u32 {
        match self {
            Self::Import => 0x01,
            Self::Export => 0x02,
            Self::Changing => 0x03,
            Self::Tables => 0x07,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Import => "RFC_IMPORT",
            Self::Export => "RFC_EXPORT",
            Self::Changing => "RFC_CHANGING",
            Self::Tables => "RFC_TABLES",
        }
    }

    /// Whether host input is written for this direction
    #[inline]
    pub const fn accepts_input(self) -> bool {
        matches!(self, Self::Import | Self::Changing | Self::Tables)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parameter of a function descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDesc {
    pub name: String,
    pub rfc_type: RfcType,
    pub direction: Direction,
    /// Length in characters (non-unicode length)
    pub length: usize,
    pub text: Option<String>,
}

impl ParameterDesc {
    pub fn new(name: impl Into<String>, rfc_type: RfcType, direction: Direction, length: usize) -> Self {
        Self {
            name: name.into(),
            rfc_type,
            direction,
            length,
            text: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// One field of a structure or table row type
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDesc {
    pub name: String,
    pub rfc_type: RfcType,
    pub length: usize,
}

impl FieldDesc {
    pub fn new(name: impl Into<String>, rfc_type: RfcType, length: usize) -> Self {
        Self {
            name: name.into(),
            rfc_type,
            length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_mapping_is_bijective_for_known_kinds() {
        for tag in 0..=42 {
            let ty = RfcType::from_tag(tag);
            assert_eq!(ty.tag(), tag);
        }
        assert_eq!(RfcType::from_tag(99), RfcType::Other(99));
    }

    #[test]
    fn test_coarse_mapping() {
        assert_eq!(RfcType::Char.coarse(), CoarseType::String);
        assert_eq!(RfcType::XString.coarse(), CoarseType::String);
        assert_eq!(RfcType::Table.coarse(), CoarseType::Array);
        assert_eq!(RfcType::Structure.coarse(), CoarseType::Object);
        assert_eq!(RfcType::AbapObject.coarse(), CoarseType::Object);
        assert_eq!(RfcType::Bcd.coarse(), CoarseType::Number);
        assert_eq!(RfcType::DecF34.coarse(), CoarseType::Number);
        assert_eq!(RfcType::Int1.coarse(), CoarseType::Integer);
        assert_eq!(RfcType::CDay.coarse(), CoarseType::Integer);
        assert_eq!(RfcType::XmlData.coarse(), CoarseType::Undefined);
        assert_eq!(RfcType::Other(77).coarse(), CoarseType::Undefined);
    }

    #[test]
    fn test_direction_input() {
        assert!(Direction::Import.accepts_input());
        assert!(Direction::Changing.accepts_input());
        assert!(Direction::Tables.accepts_input());
        assert!(!Direction::Export.accepts_input());
        assert_eq!(Direction::from_tag(7), Some(Direction::Tables));
        assert_eq!(Direction::from_tag(4), None);
    }

    #[test]
    fn test_sap_names() {
        assert_eq!(RfcType::Char.sap_name(), "RFCTYPE_CHAR");
        assert_eq!(RfcType::GenericBox.to_string(), "RFCTYPE_GENERIC_BOX");
        assert_eq!(Direction::Export.to_string(), "RFC_EXPORT");
    }
}
