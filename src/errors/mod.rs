//! Error taxonomy and translation of native error records
//!
//! `ErrorInfo` mirrors the backend's error record field by field. `RfcError` is what
//! callers see: argument errors raised before any native call, validation errors raised
//! while marshaling, native errors carrying the backend record verbatim, unsupported type
//! tags, and fatal conditions.

use serde::{Serialize, Serializer};
use std::fmt;

/// Backend return code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReturnCode {
    #[default]
    Ok,
    CommunicationFailure,
    LogonFailure,
    AbapRuntimeFailure,
    AbapMessage,
    AbapException,
    Closed,
    Canceled,
    Timeout,
    MemoryInsufficient,
    VersionMismatch,
    InvalidProtocol,
    SerializationFailure,
    InvalidHandle,
    Retry,
    ExternalFailure,
    Executed,
    NotFound,
    NotSupported,
    IllegalState,
    InvalidParameter,
    CodepageConversionFailure,
    ConversionFailure,
    BufferTooSmall,
    TableMoveBof,
    TableMoveEof,
    Other(u32),
}

impl ReturnCode {
    pub const fn code(self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::CommunicationFailure => 1,
            Self::LogonFailure => 2,
            Self::AbapRuntimeFailure => 3,
            Self::AbapMessage => 4,
            Self::AbapException => 5,
            Self::Closed => 6,
            Self::Canceled => 7,
            Self::Timeout => 8,
            Self::MemoryInsufficient => 9,
            Self::VersionMismatch => 10,
            Self::InvalidProtocol => 11,
            Self::SerializationFailure => 12,
            Self::InvalidHandle => 13,
            Self::Retry => 14,
            Self::ExternalFailure => 15,
            Self::Executed => 16,
            Self::NotFound => 17,
            Self::NotSupported => 18,
            Self::IllegalState => 19,
            Self::InvalidParameter => 20,
            Self::CodepageConversionFailure => 21,
            Self::ConversionFailure => 22,
            Self::BufferTooSmall => 23,
            Self::TableMoveBof => 24,
            Self::TableMoveEof => 25,
            Self::Other(code) => code,
        }
    }

    pub const fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::CommunicationFailure,
            2 => Self::LogonFailure,
            3 => Self::AbapRuntimeFailure,
            4 => Self::AbapMessage,
            5 => Self::AbapException,
            6 => Self::Closed,
            7 => Self::Canceled,
            8 => Self::Timeout,
            9 => Self::MemoryInsufficient,
            10 => Self::VersionMismatch,
            11 => Self::InvalidProtocol,
            12 => Self::SerializationFailure,
            13 => Self::InvalidHandle,
            14 => Self::Retry,
            15 => Self::ExternalFailure,
            16 => Self::Executed,
            17 => Self::NotFound,
            18 => Self::NotSupported,
            19 => Self::IllegalState,
            20 => Self::InvalidParameter,
            21 => Self::CodepageConversionFailure,
            22 => Self::ConversionFailure,
            23 => Self::BufferTooSmall,
            24 => Self::TableMoveBof,
            25 => Self::TableMoveEof,
            other => Self::Other(other),
        }
    }

    /// Symbolic key the backend reports alongside the code
    pub fn key(self) -> String {
        let key = match self {
            Self::Ok => "RFC_OK",
            Self::CommunicationFailure => "RFC_COMMUNICATION_FAILURE",
            Self::LogonFailure => "RFC_LOGON_FAILURE",
            Self::AbapRuntimeFailure => "RFC_ABAP_RUNTIME_FAILURE",
            Self::AbapMessage => "RFC_ABAP_MESSAGE",
            Self::AbapException => "RFC_ABAP_EXCEPTION",
            Self::Closed => "RFC_CLOSED",
            Self::Canceled => "RFC_CANCELED",
            Self::Timeout => "RFC_TIMEOUT",
            Self::MemoryInsufficient => "RFC_MEMORY_INSUFFICIENT",
            Self::VersionMismatch => "RFC_VERSION_MISMATCH",
            Self::InvalidProtocol => "RFC_INVALID_PROTOCOL",
            Self::SerializationFailure => "RFC_SERIALIZATION_FAILURE",
            Self::InvalidHandle => "RFC_INVALID_HANDLE",
            Self::Retry => "RFC_RETRY",
            Self::ExternalFailure => "RFC_EXTERNAL_FAILURE",
            Self::Executed => "RFC_EXECUTED",
            Self::NotFound => "RFC_NOT_FOUND",
            Self::NotSupported => "RFC_NOT_SUPPORTED",
            Self::IllegalState => "RFC_ILLEGAL_STATE",
            Self::InvalidParameter => "RFC_INVALID_PARAMETER",
            Self::CodepageConversionFailure => "RFC_CODEPAGE_CONVERSION_FAILURE",
            Self::ConversionFailure => "RFC_CONVERSION_FAILURE",
            Self::BufferTooSmall => "RFC_BUFFER_TOO_SMALL",
            Self::TableMoveBof => "RFC_TABLE_MOVE_BOF",
            Self::TableMoveEof => "RFC_TABLE_MOVE_EOF",
            Self::Other(code) => return format!("RFC_RC_{}", code),
        };
        key.to_string()
    }
}

impl Serialize for ReturnCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.code())
    }
}

/// Backend error group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorGroup {
    #[default]
    Ok,
    AbapApplicationFailure,
    AbapRuntimeFailure,
    LogonFailure,
    CommunicationFailure,
    ExternalRuntimeFailure,
    ExternalApplicationFailure,
    ExternalAuthorizationFailure,
    Other(u32),
}

impl ErrorGroup {
    pub const fn code(self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::AbapApplicationFailure => 1,
            Self::AbapRuntimeFailure => 2,
            Self::LogonFailure => 3,
            Self::CommunicationFailure => 4,
            Self::ExternalRuntimeFailure => 5,
            Self::ExternalApplicationFailure => 6,
            Self::ExternalAuthorizationFailure => 7,
            Self::Other(code) => code,
        }
    }

    pub const fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::AbapApplicationFailure,
            2 => Self::AbapRuntimeFailure,
            3 => Self::LogonFailure,
            4 => Self::CommunicationFailure,
            5 => Self::ExternalRuntimeFailure,
            6 => Self::ExternalApplicationFailure,
            7 => Self::ExternalAuthorizationFailure,
            other => Self::Other(other),
        }
    }
}

impl Serialize for ErrorGroup {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.code())
    }
}

/// Native error record, carried verbatim
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ErrorInfo {
    pub code: ReturnCode,
    pub group: ErrorGroup,
    pub key: String,
    pub message: String,
    #[serde(rename = "class")]
    pub abap_msg_class: String,
    #[serde(rename = "type")]
    pub abap_msg_type: String,
    #[serde(rename = "number")]
    pub abap_msg_number: String,
    #[serde(rename = "msgv1")]
    pub abap_msg_v1: String,
    #[serde(rename = "msgv2")]
    pub abap_msg_v2: String,
    #[serde(rename = "msgv3")]
    pub abap_msg_v3: String,
    #[serde(rename = "msgv4")]
    pub abap_msg_v4: String,
}

impl ErrorInfo {
    /// Record with the code's symbolic key and a message; group left at `Ok`
    pub fn new(code: ReturnCode, message: impl Into<String>) -> Self {
        Self {
            code,
            key: code.key(),
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_group(mut self, group: ErrorGroup) -> Self {
        self.group = group;
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Attach an ABAP message (class, type, number, variables)
    pub fn with_abap_message(
        mut self,
        class: impl Into<String>,
        msg_type: impl Into<String>,
        number: impl Into<String>,
        vars: [&str; 4],
    ) -> Self {
        self.abap_msg_class = class.into();
        self.abap_msg_type = msg_type.into();
        self.abap_msg_number = number.into();
        self.abap_msg_v1 = vars[0].to_string();
        self.abap_msg_v2 = vars[1].to_string();
        self.abap_msg_v3 = vars[2].to_string();
        self.abap_msg_v4 = vars[3].to_string();
        self
    }

    pub fn invalid_handle(message: impl Into<String>) -> Self {
        Self::new(ReturnCode::InvalidHandle, message).with_group(ErrorGroup::ExternalRuntimeFailure)
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.key, self.code.code(), self.message)
    }
}

impl std::error::Error for ErrorInfo {}

/// Why a host value was rejected before reaching the backend
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationReason {
    UnexpectedType { expected: &'static str, found: &'static str },
    TooLong { max: usize, actual: usize },
    OutOfRange { min: i64, max: i64, value: f64 },
    NotIntegral { value: f64 },
    InvalidFormat { expected: &'static str },
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedType { expected, found } => {
                write!(f, "argument has unexpected type: expected {}, found {}", expected, found)
            }
            Self::TooLong { max, actual } => {
                write!(f, "argument exceeds maximum length: {} > {}", actual, max)
            }
            Self::OutOfRange { min, max, value } => {
                write!(f, "argument out of range: {} not in {}..={}", value, min, max)
            }
            Self::NotIntegral { value } => write!(f, "argument is not an integer: {}", value),
            Self::InvalidFormat { expected } => write!(f, "invalid format, expected {}", expected),
        }
    }
}

/// Coarse classification of `RfcError`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Argument,
    Validation,
    Native,
    UnsupportedType,
    Fatal,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RfcError {
    /// Wrong arity or shape, detected before any native call
    #[error("{message}")]
    Argument { message: String },

    /// Host value rejected while marshaling
    #[error("{reason}: {parameter}")]
    Validation { parameter: String, reason: ValidationReason },

    /// Non-OK status reported by the backend
    #[error("{0}")]
    Native(ErrorInfo),

    #[error("RFC type not implemented: {tag} ({parameter})")]
    UnsupportedType { tag: u32, parameter: String },

    /// A caller continuation or a worker panicked
    #[error("fatal: {message}")]
    Fatal { message: String },
}

impl RfcError {
    pub fn argument(message: impl Into<String>) -> Self {
        Self::Argument { message: message.into() }
    }

    pub fn validation(parameter: impl Into<String>, reason: ValidationReason) -> Self {
        Self::Validation {
            parameter: parameter.into(),
            reason,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal { message: message.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Argument { .. } => ErrorKind::Argument,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Native(_) => ErrorKind::Native,
            Self::UnsupportedType { .. } => ErrorKind::UnsupportedType,
            Self::Fatal { .. } => ErrorKind::Fatal,
        }
    }

    /// Native error record, when the backend produced one
    pub fn info(&self) -> Option<&ErrorInfo> {
        match self {
            Self::Native(info) => Some(info),
            _ => None,
        }
    }

    /// Return code for native errors
    pub fn code(&self) -> Option<ReturnCode> {
        self.info().map(|info| info.code)
    }

    /// Parameter or field the error refers to, if any
    pub fn parameter(&self) -> Option<&str> {
        match self {
            Self::Validation { parameter, .. } | Self::UnsupportedType { parameter, .. } => Some(parameter),
            _ => None,
        }
    }
}

impl From<ErrorInfo> for RfcError {
    fn from(info: ErrorInfo) -> Self {
        Self::Native(info)
    }
}

pub type Result<T> = std::result::Result<T, RfcError>;
