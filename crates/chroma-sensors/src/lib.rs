//! Chroma Sensors - colorimeter and spectrometer drivers
//!
//! A [`Sensor`] wraps one [`SensorDriver`] and enforces the lock / sample /
//! unlock lifecycle. Drivers speak each vendor's wire protocol over a
//! `chroma_usb` transport:
//! - Huey and Huey2 (control + interrupt, register based)
//! - DTP94 (ASCII commands over interrupt endpoints)
//! - ColorHug and ColorHug2 (queued 64-byte commands)
//! - Spark (Ocean binary protocol over bulk endpoints)
//! - a software Dummy sensor
//!
//! [`coldplug::enumerate`] matches attached devices against the supported
//! table and builds a sensor for each.

pub mod cancel;
pub mod coldplug;
pub mod colorhug;
pub mod driver;
pub mod dtp94;
pub mod dummy;
pub mod error;
pub mod huey;
pub mod options;
pub mod sensor;
pub mod spark;
pub mod types;

pub use cancel::Cancellable;
pub use coldplug::{dummy_sensor, enumerate, DriverConfig};
pub use driver::{Driver, DriverState, SensorDriver, SensorInfo, Session};
pub use error::{Result, SensorError};
pub use options::{OptionValue, SensorOptions};
pub use sensor::{Sensor, SensorEvent};
pub use types::{SensorCap, SensorCaps, SensorId, SensorKind, SensorState};
