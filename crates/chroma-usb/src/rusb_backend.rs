//! libusb-backed transport

use rusb::UsbContext as _;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::transport::{
    ControlRequest, Direction, Recipient, RequestType, UsbContext, UsbDevice, UsbDeviceInfo,
    ENDPOINT_IN,
};

pub struct RusbContext {
    context: rusb::Context,
}

impl RusbContext {
    pub fn new() -> Result<Self> {
        let context = rusb::Context::new().map_err(TransportError::from_usb)?;
        Ok(Self { context })
    }
}

impl UsbContext for RusbContext {
    fn devices(&self) -> Result<Vec<UsbDeviceInfo>> {
        let list = self.context.devices().map_err(TransportError::from_usb)?;
        let mut found = Vec::new();
        for device in list.iter() {
            let desc = match device.device_descriptor() {
                Ok(desc) => desc,
                Err(e) => {
                    warn!("Skipping device on bus {}: {}", device.bus_number(), e);
                    continue;
                }
            };
            found.push(UsbDeviceInfo {
                vid: desc.vendor_id(),
                pid: desc.product_id(),
                bus: device.bus_number(),
                address: device.address(),
            });
        }
        Ok(found)
    }

    fn open(&self, vid: u16, pid: u16) -> Result<Box<dyn UsbDevice>> {
        let mut handle = self
            .context
            .open_device_with_vid_pid(vid, pid)
            .ok_or(TransportError::NotFound { vid, pid })?;

        // Not supported on every platform
        let _ = handle.set_auto_detach_kernel_driver(true);

        Ok(Box::new(RusbDevice {
            handle: Some(handle),
            claimed: Vec::new(),
        }))
    }
}

pub struct RusbDevice {
    handle: Option<rusb::DeviceHandle<rusb::Context>>,
    claimed: Vec<u8>,
}

impl RusbDevice {
    fn handle(&mut self) -> Result<&mut rusb::DeviceHandle<rusb::Context>> {
        self.handle.as_mut().ok_or(TransportError::Closed)
    }
}

fn request_type(request: &ControlRequest) -> u8 {
    let direction = match request.direction {
        Direction::In => rusb::Direction::In,
        Direction::Out => rusb::Direction::Out,
    };
    let kind = match request.request_type {
        RequestType::Standard => rusb::RequestType::Standard,
        RequestType::Class => rusb::RequestType::Class,
        RequestType::Vendor => rusb::RequestType::Vendor,
    };
    let recipient = match request.recipient {
        Recipient::Device => rusb::Recipient::Device,
        Recipient::Interface => rusb::Recipient::Interface,
        Recipient::Endpoint => rusb::Recipient::Endpoint,
        Recipient::Other => rusb::Recipient::Other,
    };
    rusb::request_type(direction, kind, recipient)
}

impl UsbDevice for RusbDevice {
    fn set_configuration(&mut self, config: u8) -> Result<()> {
        let handle = self.handle()?;
        // Re-selecting the active configuration resets some devices
        if handle.active_configuration().ok() == Some(config) {
            return Ok(());
        }
        handle
            .set_active_configuration(config)
            .map_err(TransportError::from_usb)
    }

    fn claim_interface(&mut self, iface: u8) -> Result<()> {
        self.handle()?
            .claim_interface(iface)
            .map_err(TransportError::from_usb)?;
        self.claimed.push(iface);
        Ok(())
    }

    fn control_transfer(
        &mut self,
        request: &ControlRequest,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        let request_type = request_type(request);
        let handle = self.handle()?;
        let result = match request.direction {
            Direction::In => handle.read_control(
                request_type,
                request.request,
                request.value,
                request.index,
                buf,
                timeout,
            ),
            Direction::Out => handle.write_control(
                request_type,
                request.request,
                request.value,
                request.index,
                buf,
                timeout,
            ),
        };
        result.map_err(TransportError::from_usb)
    }

    fn interrupt_transfer(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        let handle = self.handle()?;
        let result = if endpoint & ENDPOINT_IN != 0 {
            handle.read_interrupt(endpoint, buf, timeout)
        } else {
            handle.write_interrupt(endpoint, buf, timeout)
        };
        result.map_err(TransportError::from_usb)
    }

    fn bulk_transfer(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let handle = self.handle()?;
        let result = if endpoint & ENDPOINT_IN != 0 {
            handle.read_bulk(endpoint, buf, timeout)
        } else {
            handle.write_bulk(endpoint, buf, timeout)
        };
        result.map_err(TransportError::from_usb)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut handle) = self.handle.take() {
            for iface in self.claimed.drain(..) {
                if let Err(e) = handle.release_interface(iface) {
                    debug!("Failed to release interface {}: {}", iface, e);
                }
            }
        }
        Ok(())
    }
}

impl Drop for RusbDevice {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
