//! Scripted in-memory transport
//!
//! A [`MockDevice`] records every outgoing transfer and answers reads from a
//! queue of scripted replies. When the queue is empty an optional responder
//! is asked to build a reply from the last write, otherwise the read times
//! out. Clones share state, so a test keeps one handle for inspection while
//! the driver owns another.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{Result, TransportError};
use crate::transport::{ControlRequest, UsbContext, UsbDevice, UsbDeviceInfo, ENDPOINT_IN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Control,
    Interrupt,
    Bulk,
}

/// One host-to-device transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub kind: TransferKind,
    pub endpoint: u8,
    pub data: Vec<u8>,
}

type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

#[derive(Default)]
struct MockState {
    replies: VecDeque<Result<Vec<u8>>>,
    write_errors: VecDeque<TransportError>,
    writes: Vec<Transfer>,
    responder: Option<Responder>,
    configuration: Option<u8>,
    interfaces: Vec<u8>,
    opened: bool,
    closed: bool,
}

#[derive(Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not mask the first failure
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Queue the next reply for an IN transfer
    pub fn push_reply(&self, data: Vec<u8>) {
        self.state().replies.push_back(Ok(data));
    }

    /// Queue an error for the next IN transfer
    pub fn push_error(&self, err: TransportError) {
        self.state().replies.push_back(Err(err));
    }

    /// Fail the next OUT transfer
    pub fn fail_next_write(&self, err: TransportError) {
        self.state().write_errors.push_back(err);
    }

    /// Build replies from the most recent write once the queue runs dry
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        self.state().responder = Some(Box::new(responder));
    }

    pub fn writes(&self) -> Vec<Transfer> {
        self.state().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }

    pub fn pending_replies(&self) -> usize {
        self.state().replies.len()
    }

    pub fn configuration(&self) -> Option<u8> {
        self.state().configuration
    }

    pub fn claimed_interfaces(&self) -> Vec<u8> {
        self.state().interfaces.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn write(&self, kind: TransferKind, endpoint: u8, buf: &[u8]) -> Result<usize> {
        let mut state = self.state();
        if state.closed {
            return Err(TransportError::Closed);
        }
        if let Some(err) = state.write_errors.pop_front() {
            return Err(err);
        }
        state.writes.push(Transfer {
            kind,
            endpoint,
            data: buf.to_vec(),
        });
        Ok(buf.len())
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state();
        if state.closed {
            return Err(TransportError::Closed);
        }
        let reply = match state.replies.pop_front() {
            Some(reply) => reply?,
            None => {
                let last = state.writes.last().map(|t| t.data.clone()).unwrap_or_default();
                let generated = state.responder.as_mut().and_then(|r| r(&last));
                generated.ok_or(TransportError::Timeout)?
            }
        };
        let n = reply.len().min(buf.len());
        buf[..n].copy_from_slice(&reply[..n]);
        Ok(n)
    }

    fn transfer(&self, kind: TransferKind, endpoint: u8, buf: &mut [u8]) -> Result<usize> {
        if endpoint & ENDPOINT_IN != 0 {
            self.read(buf)
        } else {
            self.write(kind, endpoint, buf)
        }
    }
}

impl UsbDevice for MockDevice {
    fn set_configuration(&mut self, config: u8) -> Result<()> {
        self.state().configuration = Some(config);
        Ok(())
    }

    fn claim_interface(&mut self, iface: u8) -> Result<()> {
        self.state().interfaces.push(iface);
        Ok(())
    }

    fn control_transfer(
        &mut self,
        request: &ControlRequest,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize> {
        match request.direction {
            crate::transport::Direction::Out => self.write(TransferKind::Control, 0, buf),
            crate::transport::Direction::In => self.read(buf),
        }
    }

    fn interrupt_transfer(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize> {
        self.transfer(TransferKind::Interrupt, endpoint, buf)
    }

    fn bulk_transfer(&mut self, endpoint: u8, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        self.transfer(TransferKind::Bulk, endpoint, buf)
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.state();
        state.closed = true;
        state.opened = false;
        Ok(())
    }
}

/// Enumerates a fixed set of mock devices
#[derive(Clone, Default)]
pub struct MockContext {
    devices: Vec<(UsbDeviceInfo, MockDevice)>,
}

impl MockContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, vid: u16, pid: u16, device: MockDevice) -> Self {
        let address = self.devices.len() as u8 + 1;
        self.devices.push((
            UsbDeviceInfo {
                vid,
                pid,
                bus: 1,
                address,
            },
            device,
        ));
        self
    }
}

impl UsbContext for MockContext {
    fn devices(&self) -> Result<Vec<UsbDeviceInfo>> {
        Ok(self.devices.iter().map(|(info, _)| *info).collect())
    }

    fn open(&self, vid: u16, pid: u16) -> Result<Box<dyn UsbDevice>> {
        let (_, device) = self
            .devices
            .iter()
            .find(|(info, _)| info.vid == vid && info.pid == pid)
            .ok_or(TransportError::NotFound { vid, pid })?;

        let mut state = device.state();
        if state.opened {
            return Err(TransportError::Busy);
        }
        state.opened = true;
        state.closed = false;
        drop(state);

        Ok(Box::new(device.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(10);

    #[test]
    fn test_replies_are_consumed_in_order() {
        let mut dev = MockDevice::new();
        dev.push_reply(vec![1]);
        dev.push_reply(vec![2, 3]);

        let mut buf = [0u8; 4];
        assert_eq!(dev.interrupt_transfer(0x81, &mut buf, TIMEOUT).unwrap(), 1);
        assert_eq!(buf[0], 1);
        assert_eq!(dev.interrupt_transfer(0x81, &mut buf, TIMEOUT).unwrap(), 2);
        assert_eq!(&buf[..2], &[2, 3]);
        assert_eq!(
            dev.interrupt_transfer(0x81, &mut buf, TIMEOUT).unwrap_err(),
            TransportError::Timeout
        );
    }

    #[test]
    fn test_responder_sees_last_write() {
        let mut dev = MockDevice::new();
        dev.set_responder(|req| Some(vec![0x00, req[0]]));

        let mut out = [0x42u8];
        dev.interrupt_transfer(0x01, &mut out, TIMEOUT).unwrap();
        let mut buf = [0u8; 2];
        dev.interrupt_transfer(0x81, &mut buf, TIMEOUT).unwrap();
        assert_eq!(buf, [0x00, 0x42]);
    }

    #[test]
    fn test_second_open_is_busy() {
        let dev = MockDevice::new();
        let ctx = MockContext::new().with_device(1, 2, dev.clone());
        let mut first = ctx.open(1, 2).unwrap();
        assert!(matches!(ctx.open(1, 2), Err(TransportError::Busy)));

        first.close().unwrap();
        assert!(ctx.open(1, 2).is_ok());
    }

    #[test]
    fn test_scripted_write_failure() {
        let mut dev = MockDevice::new();
        dev.fail_next_write(TransportError::Timeout);
        let mut data = [0u8; 2];
        assert!(dev.bulk_transfer(0x01, &mut data, TIMEOUT).is_err());
        assert!(dev.writes().is_empty());
        assert!(dev.bulk_transfer(0x01, &mut data, TIMEOUT).is_ok());
        assert_eq!(dev.writes().len(), 1);
    }
}
