//! Transport error taxonomy

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("No device found with ID {vid:04x}:{pid:04x}")]
    NotFound { vid: u16, pid: u16 },
    #[error("Device is in use by another session")]
    Busy,
    #[error("Transfer timed out")]
    Timeout,
    #[error("Short transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: usize, actual: usize },
    #[error("Device is closed")]
    Closed,
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),
    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Fold the libusb codes that have a dedicated variant
    pub fn from_usb(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Timeout => TransportError::Timeout,
            rusb::Error::Busy | rusb::Error::Access => TransportError::Busy,
            rusb::Error::NoDevice => TransportError::Closed,
            other => TransportError::Usb(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
