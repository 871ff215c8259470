//! Chroma USB - transport adapter for sensor drivers
//!
//! Drivers talk to hardware through the [`UsbDevice`] trait. The blocking
//! calls are moved onto tokio's blocking pool by [`BlockingDevice`], the real
//! backend is libusb through `rusb`, and [`mock::MockDevice`] scripts replies
//! for protocol tests.

pub mod error;
pub mod mock;
pub mod rusb_backend;
pub mod transport;

pub use error::{Result, TransportError};
pub use rusb_backend::{RusbContext, RusbDevice};
pub use transport::{
    BlockingDevice, ControlRequest, Direction, Recipient, RequestType, UsbContext, UsbDevice,
    UsbDeviceInfo, ENDPOINT_IN,
};
