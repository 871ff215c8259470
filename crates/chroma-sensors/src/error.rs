//! Sensor error taxonomy

use chroma_core::ColorError;
use chroma_usb::TransportError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    #[error("Device already in use: {0}")]
    AlreadyInUse(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("No data: {0}")]
    NoData(String),
    #[error("Unsupported capability: {0}")]
    UnsupportedCapability(String),
    #[error("Unsupported option: {0}")]
    UnsupportedOption(String),
    #[error("Requires dark calibration: {0}")]
    RequiresDarkCalibration(String),
    #[error("Invalid colorspace: {0}")]
    InvalidColorspace(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Cancelled: {0}")]
    Cancelled(String),
    #[error("Already locked: {0}")]
    AlreadyLocked(String),
    #[error("Not locked: {0}")]
    NotLocked(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl SensorError {
    /// Prefix the message with what was being attempted
    pub fn context(self, what: impl std::fmt::Display) -> Self {
        use SensorError::*;
        match self {
            DeviceNotFound(m) => DeviceNotFound(format!("{}: {}", what, m)),
            AlreadyInUse(m) => AlreadyInUse(format!("{}: {}", what, m)),
            Protocol(m) => Protocol(format!("{}: {}", what, m)),
            NoData(m) => NoData(format!("{}: {}", what, m)),
            UnsupportedCapability(m) => UnsupportedCapability(format!("{}: {}", what, m)),
            UnsupportedOption(m) => UnsupportedOption(format!("{}: {}", what, m)),
            RequiresDarkCalibration(m) => RequiresDarkCalibration(format!("{}: {}", what, m)),
            InvalidColorspace(m) => InvalidColorspace(format!("{}: {}", what, m)),
            Internal(m) => Internal(format!("{}: {}", what, m)),
            Cancelled(m) => Cancelled(m),
            AlreadyLocked(m) => AlreadyLocked(format!("{}: {}", what, m)),
            NotLocked(m) => NotLocked(format!("{}: {}", what, m)),
            Unsupported(m) => Unsupported(format!("{}: {}", what, m)),
        }
    }

    pub fn message(&self) -> &str {
        use SensorError::*;
        match self {
            DeviceNotFound(m) | AlreadyInUse(m) | Protocol(m) | NoData(m)
            | UnsupportedCapability(m) | UnsupportedOption(m) | RequiresDarkCalibration(m)
            | InvalidColorspace(m) | Internal(m) | Cancelled(m) | AlreadyLocked(m)
            | NotLocked(m) | Unsupported(m) => m,
        }
    }
}

impl From<TransportError> for SensorError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotFound { .. } => SensorError::DeviceNotFound(err.to_string()),
            TransportError::Busy => SensorError::AlreadyInUse(err.to_string()),
            TransportError::Timeout => SensorError::NoData(err.to_string()),
            other => SensorError::Internal(other.to_string()),
        }
    }
}

impl From<ColorError> for SensorError {
    fn from(err: ColorError) -> Self {
        match err {
            ColorError::InvalidColorspace(m) => SensorError::InvalidColorspace(m),
            other => SensorError::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SensorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_mapping() {
        let not_found: SensorError = TransportError::NotFound { vid: 0x0971, pid: 0x2005 }.into();
        assert!(matches!(not_found, SensorError::DeviceNotFound(ref m) if m.contains("0971:2005")));
        assert!(matches!(SensorError::from(TransportError::Busy), SensorError::AlreadyInUse(_)));
        assert!(matches!(SensorError::from(TransportError::Timeout), SensorError::NoData(_)));
        assert!(matches!(SensorError::from(TransportError::Closed), SensorError::Internal(_)));
        assert!(matches!(
            SensorError::from(TransportError::ShortTransfer { expected: 8, actual: 2 }),
            SensorError::Internal(_)
        ));
    }

    #[test]
    fn test_context_keeps_variant() {
        let err = SensorError::NoData("Transfer timed out".into())
            .context("failed to read register 0x04");
        assert_eq!(
            err,
            SensorError::NoData("failed to read register 0x04: Transfer timed out".into())
        );
        assert_eq!(err.message(), "failed to read register 0x04: Transfer timed out");
    }
}
