use crate::midi::event::MidiEvent;
use std::fmt;

/// Why a sysex patch was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SysexErrorKind {
    TooShort { length: usize, minimum: usize },
    MissingStart(u8),
    WrongManufacturer(u8),
    WrongFormat(u8),
    UnsupportedVersion(u8),
    NotDataByte(u8),
    OperatorCount(u8),
    LengthMismatch { expected: usize, actual: usize },
    MissingEnd(u8),
    CarrierMask(u8),
    ModulatorMask(u8),
    NameCharacter(u8),
    Checksum { expected: u8, actual: u8 },
    OutOfRange { parameter: &'static str, value: u8, max: u8 },
}

/// Patch decode failure, pointing at the offending byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedSysexError {
    pub offset: usize,
    pub kind: SysexErrorKind,
}

impl MalformedSysexError {
    pub fn new(offset: usize, kind: SysexErrorKind) -> Self {
        Self { offset, kind }
    }
}

impl fmt::Display for SysexErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SysexErrorKind::TooShort { length, minimum } => {
                write!(f, "message is {length} bytes, need at least {minimum}")
            }
            SysexErrorKind::MissingStart(b) => write!(f, "expected 0xF0, found {b:#04x}"),
            SysexErrorKind::WrongManufacturer(b) => write!(f, "unknown manufacturer id {b:#04x}"),
            SysexErrorKind::WrongFormat(b) => write!(f, "unknown format tag {b:#04x}"),
            SysexErrorKind::UnsupportedVersion(v) => write!(f, "unsupported format version {v}"),
            SysexErrorKind::NotDataByte(b) => write!(f, "status byte {b:#04x} inside message"),
            SysexErrorKind::OperatorCount(n) => write!(f, "operator count {n} not supported"),
            SysexErrorKind::LengthMismatch { expected, actual } => {
                write!(f, "expected {expected} bytes, found {actual}")
            }
            SysexErrorKind::MissingEnd(b) => write!(f, "expected 0xF7, found {b:#04x}"),
            SysexErrorKind::CarrierMask(m) => write!(f, "invalid carrier mask {m:#04x}"),
            SysexErrorKind::ModulatorMask(m) => write!(f, "invalid modulator mask {m:#04x}"),
            SysexErrorKind::NameCharacter(c) => write!(f, "non-printable name character {c:#04x}"),
            SysexErrorKind::Checksum { expected, actual } => {
                write!(f, "checksum {actual:#04x} does not match {expected:#04x}")
            }
            SysexErrorKind::OutOfRange {
                parameter,
                value,
                max,
            } => write!(f, "{parameter} value {value} exceeds {max}"),
        }
    }
}

impl fmt::Display for MalformedSysexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Malformed sysex at byte {}: {}", self.offset, self.kind)
    }
}

impl std::error::Error for MalformedSysexError {}

/// The bounded event queue was full; `dropped` is the event that was discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulingOverflowError {
    pub dropped: MidiEvent,
}

impl fmt::Display for SchedulingOverflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MIDI event queue full, dropped {:?}", self.dropped)
    }
}

impl std::error::Error for SchedulingOverflowError {}

#[derive(Debug)]
pub enum ConfigError {
    Json(serde_json::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Json(e) => write!(f, "Config parse error: {e}"),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Json(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Json(e)
    }
}

/// Failure to construct an instrument.
#[derive(Debug)]
pub enum InstrumentError {
    Sysex(MalformedSysexError),
    Config(ConfigError),
}

impl fmt::Display for InstrumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentError::Sysex(e) => write!(f, "{e}"),
            InstrumentError::Config(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for InstrumentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InstrumentError::Sysex(e) => Some(e),
            InstrumentError::Config(e) => Some(e),
        }
    }
}

impl From<MalformedSysexError> for InstrumentError {
    fn from(e: MalformedSysexError) -> Self {
        InstrumentError::Sysex(e)
    }
}

impl From<ConfigError> for InstrumentError {
    fn from(e: ConfigError) -> Self {
        InstrumentError::Config(e)
    }
}
