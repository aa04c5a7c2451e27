use std::fmt;

use crate::types::{Field, Stage};

#[derive(Debug)]
pub enum Error {
    /// Socket, connect, send or receive failure.
    Io(std::io::Error),
    /// No data within the bound (also used for zero-byte reads).
    Timeout,
    /// Malformed wire payload.
    Decode(String),
    /// Well-formed but negative reply from the device.
    Protocol(String),
    NotConnected,
    ReadOnlyField(Field),
    RetriesExhausted { stage: Stage, attempts: u8 },
    /// A cycle was requested while a connection or teardown is outstanding.
    Busy,
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Timeout => write!(f, "timed out (no data)"),
            Error::Decode(msg) => write!(f, "decode error: {msg}"),
            Error::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Error::NotConnected => write!(f, "not connected"),
            Error::ReadOnlyField(field) => write!(f, "field is read-only: {field}"),
            Error::RetriesExhausted { stage, attempts } => {
                write!(f, "{stage} failed after {attempts} attempts")
            }
            Error::Busy => write!(f, "session busy"),
            Error::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

pub type Result<T> = std::result::Result<T, Error>;
