//! Transport adapter interface and the async blocking-worker handle

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{Result, TransportError};

/// Bit set on IN endpoint addresses
pub const ENDPOINT_IN: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Standard,
    Class,
    Vendor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
}

/// Setup packet fields of a control transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    pub direction: Direction,
    pub request_type: RequestType,
    pub recipient: Recipient,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

impl ControlRequest {
    /// Host-to-device class request addressed to an interface
    pub fn class_interface_out(request: u8, value: u16, index: u16) -> Self {
        Self {
            direction: Direction::Out,
            request_type: RequestType::Class,
            recipient: Recipient::Interface,
            request,
            value,
            index,
        }
    }
}

/// An attached device as seen during enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsbDeviceInfo {
    pub vid: u16,
    pub pid: u16,
    pub bus: u8,
    pub address: u8,
}

impl fmt::Display for UsbDeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} (bus {:03} addr {:03})",
            self.vid, self.pid, self.bus, self.address
        )
    }
}

/// Synchronous device operations
///
/// For OUT transfers `buf` is sent, for IN transfers it is filled. Every call
/// returns the number of bytes moved.
pub trait UsbDevice: Send {
    fn set_configuration(&mut self, config: u8) -> Result<()>;
    fn claim_interface(&mut self, iface: u8) -> Result<()>;
    fn control_transfer(
        &mut self,
        request: &ControlRequest,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize>;
    fn interrupt_transfer(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration)
        -> Result<usize>;
    fn bulk_transfer(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize>;
    fn close(&mut self) -> Result<()>;
}

/// Device enumeration and opening
pub trait UsbContext: Send + Sync {
    fn devices(&self) -> Result<Vec<UsbDeviceInfo>>;
    fn open(&self, vid: u16, pid: u16) -> Result<Box<dyn UsbDevice>>;
}

type Shared = Arc<Mutex<Option<Box<dyn UsbDevice>>>>;

/// Async handle over a blocking device
///
/// Every transfer runs on the blocking thread pool. The handle is exclusively
/// owned by one lock session; `close` releases the device and later calls fail
/// with [`TransportError::Closed`].
#[derive(Clone)]
pub struct BlockingDevice {
    inner: Shared,
    vid: u16,
    pid: u16,
}

impl fmt::Debug for BlockingDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingDevice")
            .field("vid", &format!("{:04x}", self.vid))
            .field("pid", &format!("{:04x}", self.pid))
            .finish()
    }
}

impl BlockingDevice {
    pub fn new(device: Box<dyn UsbDevice>, vid: u16, pid: u16) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(device))),
            vid,
            pid,
        }
    }

    /// Open, select the configuration and claim the interface
    pub async fn open(
        context: Arc<dyn UsbContext>,
        vid: u16,
        pid: u16,
        config: u8,
        iface: u8,
    ) -> Result<Self> {
        let device = tokio::task::spawn_blocking(move || -> Result<Box<dyn UsbDevice>> {
            let mut device = context.open(vid, pid)?;
            let setup = device
                .set_configuration(config)
                .and_then(|_| device.claim_interface(iface));
            if let Err(e) = setup {
                let _ = device.close();
                return Err(e);
            }
            Ok(device)
        })
        .await
        .map_err(|e| TransportError::Io(e.to_string()))??;

        debug!("opened device {:04x}:{:04x}", vid, pid);
        Ok(Self::new(device, vid, pid))
    }

    pub fn vid(&self) -> u16 {
        self.vid
    }

    pub fn pid(&self) -> u16 {
        self.pid
    }

    /// Run a closure against the device on the blocking pool
    pub async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn UsbDevice) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = inner
                .lock()
                .map_err(|_| TransportError::Io("device lock poisoned".to_string()))?;
            let device = guard.as_mut().ok_or(TransportError::Closed)?;
            f(device.as_mut())
        })
        .await
        .map_err(|e| TransportError::Io(e.to_string()))?
    }

    pub async fn control_out(
        &self,
        request: ControlRequest,
        data: Vec<u8>,
        timeout: Duration,
    ) -> Result<()> {
        trace!(kind = "request", data = %hex::encode(&data), "control");
        let expected = data.len();
        let actual = self
            .run(move |dev| {
                let mut data = data;
                dev.control_transfer(&request, &mut data, timeout)
            })
            .await?;
        if actual != expected {
            return Err(TransportError::ShortTransfer { expected, actual });
        }
        Ok(())
    }

    pub async fn interrupt_write(
        &self,
        endpoint: u8,
        data: Vec<u8>,
        timeout: Duration,
    ) -> Result<()> {
        trace!(kind = "request", endpoint, data = %hex::encode(&data), "interrupt");
        let expected = data.len();
        let actual = self
            .run(move |dev| {
                let mut data = data;
                dev.interrupt_transfer(endpoint, &mut data, timeout)
            })
            .await?;
        if actual != expected {
            return Err(TransportError::ShortTransfer { expected, actual });
        }
        Ok(())
    }

    /// Read up to `len` bytes; the returned buffer is truncated to what arrived
    pub async fn interrupt_read(
        &self,
        endpoint: u8,
        len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let data = self
            .run(move |dev| {
                let mut buf = vec![0u8; len];
                let n = dev.interrupt_transfer(endpoint | ENDPOINT_IN, &mut buf, timeout)?;
                buf.truncate(n);
                Ok(buf)
            })
            .await?;
        trace!(kind = "response", endpoint, data = %hex::encode(&data), "interrupt");
        Ok(data)
    }

    pub async fn bulk_write(&self, endpoint: u8, data: Vec<u8>, timeout: Duration) -> Result<()> {
        trace!(kind = "request", endpoint, data = %hex::encode(&data), "bulk");
        let expected = data.len();
        let actual = self
            .run(move |dev| {
                let mut data = data;
                dev.bulk_transfer(endpoint, &mut data, timeout)
            })
            .await?;
        if actual != expected {
            return Err(TransportError::ShortTransfer { expected, actual });
        }
        Ok(())
    }

    pub async fn bulk_read(&self, endpoint: u8, len: usize, timeout: Duration) -> Result<Vec<u8>> {
        let data = self
            .run(move |dev| {
                let mut buf = vec![0u8; len];
                let n = dev.bulk_transfer(endpoint | ENDPOINT_IN, &mut buf, timeout)?;
                buf.truncate(n);
                Ok(buf)
            })
            .await?;
        trace!(kind = "response", endpoint, data = %hex::encode(&data), "bulk");
        Ok(data)
    }

    /// Release the device; closing twice is a no-op
    pub async fn close(&self) -> Result<()> {
        let inner = self.inner.clone();
        let (vid, pid) = (self.vid, self.pid);
        tokio::task::spawn_blocking(move || {
            let mut guard = inner
                .lock()
                .map_err(|_| TransportError::Io("device lock poisoned".to_string()))?;
            match guard.take() {
                Some(mut device) => {
                    debug!("closing device {:04x}:{:04x}", vid, pid);
                    device.close()
                }
                None => Ok(()),
            }
        })
        .await
        .map_err(|e| TransportError::Io(e.to_string()))?
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().map(|g| g.is_none()).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockContext, MockDevice, TransferKind};

    const TIMEOUT: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn test_open_claims_configuration_and_interface() {
        let mock = MockDevice::new();
        let ctx = Arc::new(MockContext::new().with_device(0x0971, 0x2005, mock.clone()));

        let dev = BlockingDevice::open(ctx, 0x0971, 0x2005, 1, 0).await.unwrap();
        assert_eq!(mock.configuration(), Some(1));
        assert_eq!(mock.claimed_interfaces(), vec![0]);

        dev.close().await.unwrap();
        assert!(mock.is_closed());
        assert!(dev.is_closed());
    }

    #[tokio::test]
    async fn test_open_unknown_device() {
        let ctx = Arc::new(MockContext::new());
        let err = BlockingDevice::open(ctx, 0x1234, 0x5678, 1, 0).await.unwrap_err();
        assert_eq!(err, TransportError::NotFound { vid: 0x1234, pid: 0x5678 });
    }

    #[tokio::test]
    async fn test_control_write_then_interrupt_read() {
        let mock = MockDevice::new();
        mock.push_reply(vec![0x00, 0x0e, 1, 2, 3, 4, 5, 6]);
        let dev = BlockingDevice::new(Box::new(mock.clone()), 0x0971, 0x2005);

        let request = ControlRequest::class_interface_out(0x09, 0x0200, 0);
        dev.control_out(request, vec![0x0e; 8], TIMEOUT)
            .await
            .unwrap();
        let reply = dev.interrupt_read(0x81, 8, TIMEOUT).await.unwrap();
        assert_eq!(reply[1], 0x0e);

        let writes = mock.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].kind, TransferKind::Control);
        assert_eq!(writes[0].data, vec![0x0e; 8]);
    }

    #[tokio::test]
    async fn test_empty_script_times_out() {
        let dev = BlockingDevice::new(Box::new(MockDevice::new()), 0, 0);
        let err = dev.interrupt_read(0x81, 8, TIMEOUT).await.unwrap_err();
        assert_eq!(err, TransportError::Timeout);
    }

    #[tokio::test]
    async fn test_use_after_close_fails() {
        let dev = BlockingDevice::new(Box::new(MockDevice::new()), 0, 0);
        dev.close().await.unwrap();
        dev.close().await.unwrap();
        let err = dev.bulk_write(0x01, vec![1, 2], TIMEOUT).await.unwrap_err();
        assert_eq!(err, TransportError::Closed);
    }
}
