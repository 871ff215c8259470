//! DTP94 colorimeter driver
//!
//! ASCII commands terminated by `\r` go out on interrupt endpoint 0x02, the
//! reply comes back on 0x81 and ends with a `<XX>` hex status code.

use chroma_core::ColorXyz;
use chroma_usb::BlockingDevice;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::debug;

use crate::cancel::Cancellable;
use crate::driver::{SensorDriver, SensorInfo, Session};
use crate::error::{Result, SensorError};
use crate::options::OptionValue;
use crate::types::{SensorCap, SensorCaps, SensorKind};

pub const DTP94_VID: u16 = 0x0765;
pub const DTP94_PID: u16 = 0xd094;

const REQUEST_ENDPOINT: u8 = 0x02;
const REPLY_ENDPOINT: u8 = 0x81;
const REPLY_LEN: usize = 128;
const MAX_BUSY_RESENDS: usize = 5;

const SETUP_SEQUENCE: [&str; 8] = [
    // reset, twice
    "0PR\r",
    "0PR\r",
    // tab as color separator
    "0207CF\r",
    // CR as delimiter
    "0008CF\r",
    // extra digit resolution
    "010ACF\r",
    // no black point subtraction
    "0019CF\r",
    // factory calibration
    "EFC\r",
    "0117CF\r",
];

/// Reply status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtp94Status {
    Ok,
    BadCommand,
    PrmRange,
    MemoryOverflow,
    InvalidBaudRate,
    Timeout,
    SyntaxError,
    NoDataAvailable,
    MissingParameter,
    CalibrationDenied,
    NeedsOffsetCal,
    NeedsRatioCal,
    NeedsLuminanceCal,
    NeedsWhitePointCal,
    NeedsBlackPointCal,
    InvalidReading,
    BadCompTable,
    TooMuchLight,
    NotEnoughLight,
    BadSerialNumber,
    NoModulation,
    EepromFailure,
    FlashWriteFailure,
    InstInternalError,
    Unknown(u8),
}

impl From<u8> for Dtp94Status {
    fn from(value: u8) -> Self {
        use Dtp94Status::*;
        match value {
            0x00 => Ok,
            0x01 => BadCommand,
            0x02 => PrmRange,
            0x04 => MemoryOverflow,
            0x05 => InvalidBaudRate,
            0x07 => Timeout,
            0x08 => SyntaxError,
            0x0b => NoDataAvailable,
            0x0c => MissingParameter,
            0x0d => CalibrationDenied,
            0x16 => NeedsOffsetCal,
            0x17 => NeedsRatioCal,
            0x18 => NeedsLuminanceCal,
            0x19 => NeedsWhitePointCal,
            0x2a => NeedsBlackPointCal,
            0x20 => InvalidReading,
            0x25 => BadCompTable,
            0x28 => TooMuchLight,
            0x29 => NotEnoughLight,
            0x40 => BadSerialNumber,
            0x50 => NoModulation,
            0x70 => EepromFailure,
            0x71 => FlashWriteFailure,
            0x7f => InstInternalError,
            other => Unknown(other),
        }
    }
}

impl Dtp94Status {
    /// Parse the `<XX>` prefix of a reply
    pub fn parse(data: &[u8]) -> Self {
        if data.len() < 4 || data[0] != b'<' || data[3] != b'>' {
            return Dtp94Status::Unknown(0xff);
        }
        std::str::from_utf8(&data[1..3])
            .ok()
            .and_then(|s| u8::from_str_radix(s, 16).ok())
            .map(Dtp94Status::from)
            .unwrap_or(Dtp94Status::Unknown(0xff))
    }

    pub fn code(&self) -> u8 {
        use Dtp94Status::*;
        match self {
            Ok => 0x00,
            BadCommand => 0x01,
            PrmRange => 0x02,
            MemoryOverflow => 0x04,
            InvalidBaudRate => 0x05,
            Timeout => 0x07,
            SyntaxError => 0x08,
            NoDataAvailable => 0x0b,
            MissingParameter => 0x0c,
            CalibrationDenied => 0x0d,
            NeedsOffsetCal => 0x16,
            NeedsRatioCal => 0x17,
            NeedsLuminanceCal => 0x18,
            NeedsWhitePointCal => 0x19,
            NeedsBlackPointCal => 0x2a,
            InvalidReading => 0x20,
            BadCompTable => 0x25,
            TooMuchLight => 0x28,
            NotEnoughLight => 0x29,
            BadSerialNumber => 0x40,
            NoModulation => 0x50,
            EepromFailure => 0x70,
            FlashWriteFailure => 0x71,
            InstInternalError => 0x7f,
            Unknown(code) => *code,
        }
    }

    pub fn name(&self) -> &'static str {
        use Dtp94Status::*;
        match self {
            Ok => "ok",
            BadCommand => "bad-command",
            PrmRange => "prm-range",
            MemoryOverflow => "memory-overflow",
            InvalidBaudRate => "invalid-baud-rate",
            Timeout => "timeout",
            SyntaxError => "syntax-error",
            NoDataAvailable => "no-data-available",
            MissingParameter => "missing-parameter",
            CalibrationDenied => "calibration-denied",
            NeedsOffsetCal => "needs-offset-cal",
            NeedsRatioCal => "needs-ratio-cal",
            NeedsLuminanceCal => "needs-luminance-cal",
            NeedsWhitePointCal => "needs-white-point-cal",
            NeedsBlackPointCal => "needs-black-point-cal",
            InvalidReading => "invalid-reading",
            BadCompTable => "bad-comp-table",
            TooMuchLight => "too-much-light",
            NotEnoughLight => "not-enough-light",
            BadSerialNumber => "bad-serial-number",
            NoModulation => "no-modulation",
            EepromFailure => "eeprom-failure",
            FlashWriteFailure => "flash-write-failure",
            InstInternalError => "inst-internal-error",
            Unknown(_) => "unknown",
        }
    }
}

/// Split a reply into its payload and trailing status, `payload\r<00>`
fn split_reply(reply: &[u8]) -> Result<&str> {
    let text = String::from_utf8_lossy(reply);
    let cr = reply.iter().position(|b| *b == b'\r');
    match cr {
        Some(idx) if Dtp94Status::parse(&reply[idx + 1..]) == Dtp94Status::Ok => {
            std::str::from_utf8(&reply[..idx]).map_err(|_| {
                SensorError::Protocol(format!("unexpected response from device: {}", text))
            })
        }
        _ => Err(SensorError::Protocol(format!(
            "unexpected response from device: {}",
            text
        ))),
    }
}

/// Parse `X     10.29\tY     10.33\tZ      4.65`
pub fn parse_sample(text: &str) -> Result<ColorXyz> {
    let mut values = [0.0f64; 3];
    let mut fields = text.split('\t');
    for (value, label) in values.iter_mut().zip(['X', 'Y', 'Z']) {
        let field = fields.next().ok_or_else(|| {
            SensorError::Protocol(format!("missing {} value in '{}'", label, text))
        })?;
        let number = field
            .trim()
            .strip_prefix(label)
            .ok_or_else(|| SensorError::Protocol(format!("expected {} in '{}'", label, field)))?;
        *value = number.trim().parse().map_err(|_| {
            SensorError::Protocol(format!("invalid {} value '{}'", label, number.trim()))
        })?;
    }
    Ok(ColorXyz::new(values[0], values[1], values[2]))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dtp94Config {
    pub timeout_ms: u64,
}

impl Default for Dtp94Config {
    fn default() -> Self {
        Self { timeout_ms: 50000 }
    }
}

pub struct Dtp94State {
    device: BlockingDevice,
    serial: String,
}

impl std::fmt::Debug for Dtp94State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dtp94State")
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Dtp94Driver {
    config: Dtp94Config,
}

impl Dtp94Driver {
    pub fn new(config: Dtp94Config) -> Self {
        Self { config }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    async fn send_data(
        &self,
        device: &BlockingDevice,
        command: &str,
        cancel: &Cancellable,
    ) -> Result<Vec<u8>> {
        cancel.check()?;
        device
            .interrupt_write(REQUEST_ENDPOINT, command.as_bytes().to_vec(), self.timeout())
            .await
            .map_err(|e| SensorError::from(e).context(format!("failed to send {:?}", command)))?;

        cancel.check()?;
        let reply = device
            .interrupt_read(REPLY_ENDPOINT, REPLY_LEN, self.timeout())
            .await
            .map_err(|e| SensorError::from(e).context(format!("failed to read {:?}", command)))?;
        if reply.is_empty() {
            return Err(SensorError::NoData("failed to get data from device".to_string()));
        }
        Ok(reply)
    }

    /// Send a command that answers with a bare status, re-sending while busy
    async fn send_cmd(
        &self,
        device: &BlockingDevice,
        command: &str,
        cancel: &Cancellable,
    ) -> Result<()> {
        for attempt in 0..=MAX_BUSY_RESENDS {
            let reply = self.send_data(device, command, cancel).await?;
            let status = Dtp94Status::parse(&reply);
            match status {
                Dtp94Status::Ok => return Ok(()),
                Dtp94Status::BadCommand => {
                    debug!(command = ?command, attempt, "device busy");
                    continue;
                }
                _ => {
                    return Err(SensorError::Protocol(format!(
                        "unexpected response from device: {} [{}]",
                        status.name(),
                        String::from_utf8_lossy(&reply)
                    )))
                }
            }
        }
        Err(SensorError::NoData("device busy".to_string()))
    }

    async fn setup(&self, device: &BlockingDevice, cancel: &Cancellable) -> Result<String> {
        for command in SETUP_SEQUENCE {
            self.send_cmd(device, command, cancel).await?;
        }
        let reply = self.send_data(device, "SV\r", cancel).await?;
        let serial = split_reply(&reply)?.trim().to_string();
        debug!(serial = %serial, "dtp94 serial number");
        Ok(serial)
    }
}

impl SensorDriver for Dtp94Driver {
    type State = Dtp94State;

    fn kind(&self) -> SensorKind {
        SensorKind::Dtp94
    }

    fn caps(&self) -> SensorCaps {
        SensorCaps::from_caps(&[SensorCap::Lcd, SensorCap::Crt, SensorCap::Plasma])
    }

    async fn lock(&self, info: &SensorInfo, cancel: &Cancellable) -> Result<Session<Dtp94State>> {
        cancel.check()?;
        let device = info.open_device().await?;
        match self.setup(&device, cancel).await {
            Ok(serial) => Ok(Session {
                serial: Some(serial.clone()),
                state: Dtp94State { device, serial },
            }),
            Err(e) => {
                let _ = device.close().await;
                Err(e)
            }
        }
    }

    async fn get_sample(
        &self,
        state: &mut Dtp94State,
        cap: SensorCap,
        cancel: &Cancellable,
    ) -> Result<ColorXyz> {
        let mode = match cap {
            SensorCap::Crt | SensorCap::Plasma => "0116CF\r",
            SensorCap::Lcd => "0216CF\r",
            other => {
                return Err(SensorError::Unsupported(format!(
                    "DTP94 cannot measure in {} mode",
                    other
                )))
            }
        };
        self.send_cmd(&state.device, mode, cancel).await?;

        let reply = self.send_data(&state.device, "RM\r", cancel).await?;
        let xyz = parse_sample(split_reply(&reply)?)?;
        debug!("sample: {}", xyz);
        Ok(xyz)
    }

    async fn set_option(
        &self,
        _state: &mut Dtp94State,
        _key: &str,
        _value: &OptionValue,
        _cancel: &Cancellable,
    ) -> Result<()> {
        Err(SensorError::UnsupportedOption(
            "DTP94 has no runtime options".to_string(),
        ))
    }

    async fn unlock(&self, state: Dtp94State) -> Result<()> {
        state.device.close().await?;
        Ok(())
    }

    async fn dump(&self, state: &mut Dtp94State, _cancel: &Cancellable) -> Result<String> {
        let mut out = String::new();
        let _ = writeln!(out, "dtp94-dump-version:1");
        let _ = writeln!(out, "serial:{}", state.serial);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SensorId;
    use approx::assert_abs_diff_eq;
    use chroma_usb::mock::{MockContext, MockDevice, TransferKind};
    use std::sync::Arc;

    const SAMPLE_REPLY: &[u8] = b"X     10.29\tY     10.33\tZ      4.65\r<00>";

    fn info(mock: &MockDevice) -> SensorInfo {
        SensorInfo {
            id: SensorId("dtp94-test".into()),
            kind: SensorKind::Dtp94,
            model: "DTP94".into(),
            vendor: "X-Rite".into(),
            vid: DTP94_VID,
            pid: DTP94_PID,
            native: true,
            usb: Some(Arc::new(
                MockContext::new().with_device(DTP94_VID, DTP94_PID, mock.clone()),
            )),
        }
    }

    fn emulator() -> MockDevice {
        let mock = MockDevice::new();
        mock.set_responder(|req| match req {
            b"SV\r" => Some(b"DTP94-1234\r<00>".to_vec()),
            b"RM\r" => Some(SAMPLE_REPLY.to_vec()),
            _ => Some(b"<00>".to_vec()),
        });
        mock
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(Dtp94Status::parse(b"<00>"), Dtp94Status::Ok);
        assert_eq!(Dtp94Status::parse(b"<>"), Dtp94Status::Unknown(0xff));
        assert_eq!(Dtp94Status::parse(b"<0>"), Dtp94Status::Unknown(0xff));
        assert_eq!(Dtp94Status::parse(b"<zz>"), Dtp94Status::Unknown(0xff));
        assert_eq!(Dtp94Status::parse(b"<2a>"), Dtp94Status::NeedsBlackPointCal);
        assert_eq!(Dtp94Status::parse(b"<0D>").name(), "calibration-denied");
        assert_eq!(Dtp94Status::from(0x7f).code(), 0x7f);
        assert_eq!(Dtp94Status::parse(b"<ff>").name(), "unknown");
    }

    #[test]
    fn test_sample_text_parsing() {
        let xyz = parse_sample(split_reply(SAMPLE_REPLY).unwrap()).unwrap();
        assert_abs_diff_eq!(xyz.x, 10.29);
        assert_abs_diff_eq!(xyz.y, 10.33);
        assert_abs_diff_eq!(xyz.z, 4.65);

        assert!(parse_sample("X 1.0\tY 2.0").is_err());
        assert!(split_reply(b"X 1.0\r<08>").is_err());
    }

    #[tokio::test]
    async fn test_lock_runs_setup_then_reads_serial() {
        let mock = emulator();
        let driver = Dtp94Driver::default();
        let session = driver.lock(&info(&mock), &Cancellable::new()).await.unwrap();
        assert_eq!(session.serial.as_deref(), Some("DTP94-1234"));

        let writes: Vec<Vec<u8>> = mock.writes().into_iter().map(|w| w.data).collect();
        let mut expected: Vec<Vec<u8>> = SETUP_SEQUENCE
            .iter()
            .map(|c| c.as_bytes().to_vec())
            .collect();
        expected.push(b"SV\r".to_vec());
        assert_eq!(writes, expected);
        assert!(mock
            .writes()
            .iter()
            .all(|w| w.kind == TransferKind::Interrupt && w.endpoint == REQUEST_ENDPOINT));

        driver.unlock(session.state).await.unwrap();
        assert!(mock.is_closed());
    }

    #[tokio::test]
    async fn test_sample_selects_display_mode() {
        let mock = emulator();
        let driver = Dtp94Driver::default();
        let cancel = Cancellable::new();
        let mut session = driver.lock(&info(&mock), &cancel).await.unwrap();
        mock.clear_writes();

        let xyz = driver.get_sample(&mut session.state, SensorCap::Plasma, &cancel).await.unwrap();
        assert_abs_diff_eq!(xyz.y, 10.33);
        let writes = mock.writes();
        assert_eq!(writes[0].data, b"0116CF\r".to_vec());
        assert_eq!(writes[1].data, b"RM\r".to_vec());

        let err = driver
            .get_sample(&mut session.state, SensorCap::Projector, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, SensorError::Unsupported("DTP94 cannot measure in projector mode".into()));
    }

    #[tokio::test]
    async fn test_busy_is_resent() {
        let mock = MockDevice::new();
        mock.push_reply(b"<01>".to_vec());
        mock.push_reply(b"<01>".to_vec());
        mock.push_reply(b"<00>".to_vec());
        let device = BlockingDevice::new(Box::new(mock.clone()), DTP94_VID, DTP94_PID);

        Dtp94Driver::default()
            .send_cmd(&device, "0PR\r", &Cancellable::new())
            .await
            .unwrap();
        assert_eq!(mock.writes().len(), 3);
    }

    #[tokio::test]
    async fn test_error_status_and_empty_reply() {
        let mock = MockDevice::new();
        mock.push_reply(b"<18>".to_vec());
        mock.push_reply(Vec::new());
        let device = BlockingDevice::new(Box::new(mock), DTP94_VID, DTP94_PID);
        let driver = Dtp94Driver::default();
        let cancel = Cancellable::new();

        let err = driver.send_cmd(&device, "EFC\r", &cancel).await.unwrap_err();
        assert_eq!(
            err,
            SensorError::Protocol(
                "unexpected response from device: needs-luminance-cal [<18>]".into()
            )
        );
        let err = driver.send_cmd(&device, "EFC\r", &cancel).await.unwrap_err();
        assert_eq!(err, SensorError::NoData("failed to get data from device".into()));
    }

    #[tokio::test]
    async fn test_failed_setup_closes_device() {
        let mock = MockDevice::new();
        mock.push_reply(b"<08>".to_vec());
        let err = Dtp94Driver::default()
            .lock(&info(&mock), &Cancellable::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SensorError::Protocol(_)));
        assert!(mock.is_closed());
    }

    #[tokio::test]
    async fn test_dump() {
        let mock = emulator();
        let driver = Dtp94Driver::default();
        let cancel = Cancellable::new();
        let mut session = driver.lock(&info(&mock), &cancel).await.unwrap();
        let dump = driver.dump(&mut session.state, &cancel).await.unwrap();
        assert_eq!(dump, "dtp94-dump-version:1\nserial:DTP94-1234\n");
    }
}
