//! ColorHug colorimeter driver
//!
//! Commands go out as 64-byte interrupt packets `[cmd, data...]` and come
//! back as `[retval, cmd, data...]`. Device work is batched through a
//! [`ColorHugQueue`] which runs its commands in order and stops at the
//! first failure.

use chroma_core::buffer::{read_u32_le, write_u16_le};
use chroma_core::ColorXyz;
use chroma_usb::BlockingDevice;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, trace};

use crate::cancel::Cancellable;
use crate::driver::{SensorDriver, SensorInfo, Session};
use crate::error::{Result, SensorError};
use crate::options::OptionValue;
use crate::types::{SensorCap, SensorCaps, SensorKind};

pub const COLORHUG_LEGACY_VID: u16 = 0x04d8;
pub const COLORHUG_LEGACY_PID: u16 = 0xf8da;
pub const COLORHUG_VID: u16 = 0x273f;
pub const COLORHUG_PID: u16 = 0x1001;
pub const COLORHUG2_PID: u16 = 0x1004;

const ENDPOINT_OUT: u8 = 0x01;
const ENDPOINT_IN: u8 = 0x81;
const PACKET_SIZE: usize = 64;
const REPLY_HEADER: usize = 2;

const INTEGRAL_TIME_MAX: u16 = 0xffff;
/// Frequency scale 100%
const MULTIPLIER_SCALE_100: u8 = 3;
const EEPROM_MAGIC: &[u8; 8] = b"Un1c0rn2";

pub const REMOTE_HASH_OPTION: &str = "remote-profile-hash";

pub mod cmd {
    pub const GET_COLOR_SELECT: u8 = 0x01;
    pub const SET_COLOR_SELECT: u8 = 0x02;
    pub const GET_MULTIPLIER: u8 = 0x03;
    pub const SET_MULTIPLIER: u8 = 0x04;
    pub const GET_INTEGRAL_TIME: u8 = 0x05;
    pub const SET_INTEGRAL_TIME: u8 = 0x06;
    pub const GET_FIRMWARE_VERSION: u8 = 0x07;
    pub const GET_SERIAL_NUMBER: u8 = 0x0b;
    pub const SET_SERIAL_NUMBER: u8 = 0x0c;
    pub const GET_LEDS: u8 = 0x0d;
    pub const SET_LEDS: u8 = 0x0e;
    pub const WRITE_EEPROM: u8 = 0x20;
    pub const TAKE_READING_RAW: u8 = 0x21;
    pub const TAKE_READINGS: u8 = 0x22;
    pub const TAKE_READING_XYZ: u8 = 0x23;
    pub const RESET: u8 = 0x24;
    pub const GET_HARDWARE_VERSION: u8 = 0x30;
    pub const SET_REMOTE_HASH: u8 = 0x34;
    pub const GET_REMOTE_HASH: u8 = 0x35;
    pub const SELF_TEST: u8 = 0x40;
}

pub fn command_name(value: u8) -> &'static str {
    match value {
        cmd::GET_COLOR_SELECT => "get-color-select",
        cmd::SET_COLOR_SELECT => "set-color-select",
        cmd::GET_MULTIPLIER => "get-multiplier",
        cmd::SET_MULTIPLIER => "set-multiplier",
        cmd::GET_INTEGRAL_TIME => "get-integral-time",
        cmd::SET_INTEGRAL_TIME => "set-integral-time",
        cmd::GET_FIRMWARE_VERSION => "get-firmware-version",
        cmd::GET_SERIAL_NUMBER => "get-serial-number",
        cmd::SET_SERIAL_NUMBER => "set-serial-number",
        cmd::GET_LEDS => "get-leds",
        cmd::SET_LEDS => "set-leds",
        cmd::WRITE_EEPROM => "write-eeprom",
        cmd::TAKE_READING_RAW => "take-reading-raw",
        cmd::TAKE_READINGS => "take-readings",
        cmd::TAKE_READING_XYZ => "take-reading-xyz",
        cmd::RESET => "reset",
        cmd::GET_HARDWARE_VERSION => "get-hardware-version",
        cmd::SET_REMOTE_HASH => "set-remote-hash",
        cmd::GET_REMOTE_HASH => "get-remote-hash",
        cmd::SELF_TEST => "self-test",
        _ => "unknown-command",
    }
}

/// Firmware error names, indexed by the reply retval byte
const ERROR_NAMES: [&str; 33] = [
    "Success",
    "Unknown command",
    "Wrong unlock code",
    "Not implemented",
    "Underflow of sensor",
    "No serial",
    "Watchdog",
    "Invalid address",
    "Invalid length",
    "Invalid checksum",
    "Invalid value",
    "Unknown command for bootloader",
    "No calibration",
    "Overflow of multiply",
    "Overflow of addition",
    "Overflow of sensor",
    "Overflow of stack",
    "Device deactivated",
    "Incomplete previous request",
    "Self test failed: Sensor",
    "Self test failed: Red",
    "Self test failed: Green",
    "Self test failed: Blue",
    "Self test failed: Color Select",
    "Self test failed: Multiplier",
    "Invalid calibration",
    "SRAM failed",
    "Out of memory",
    "Self test failed: Temperature",
    "Self test failed: I2C",
    "Self test failed: ADC Vdd",
    "Self test failed: ADC Vss",
    "Self test failed: ADC Vref",
];

pub fn error_name(retval: u8) -> &'static str {
    ERROR_NAMES
        .get(retval as usize)
        .copied()
        .unwrap_or("Unknown error, please report")
}

/// Calibration slot used for a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationIndex {
    Factory,
    Lcd,
    Crt,
    Projector,
    Led,
}

impl CalibrationIndex {
    pub fn value(self) -> u16 {
        match self {
            CalibrationIndex::Factory => 0,
            CalibrationIndex::Lcd => 64,
            CalibrationIndex::Crt => 65,
            CalibrationIndex::Projector => 66,
            CalibrationIndex::Led => 67,
        }
    }

    pub fn for_cap(cap: SensorCap) -> Option<Self> {
        match cap {
            SensorCap::Lcd => Some(CalibrationIndex::Lcd),
            SensorCap::Crt => Some(CalibrationIndex::Crt),
            SensorCap::Projector => Some(CalibrationIndex::Projector),
            // No dedicated slot
            SensorCap::Plasma => Some(CalibrationIndex::Factory),
            _ => None,
        }
    }
}

/// Decode a 16.16 fixed point value
pub fn packed_float(data: &[u8]) -> f64 {
    f64::from(read_u32_le(data) as i32) / 65536.0
}

/// Parse a 40 character hex SHA1 digest
pub fn parse_sha1(value: &str) -> Result<[u8; 20]> {
    let invalid = || SensorError::UnsupportedOption(format!("Invalid SHA1 hash '{}'", value));
    if value.len() != 40 {
        return Err(invalid());
    }
    let bytes = hex::decode(value).map_err(|_| invalid())?;
    bytes.try_into().map_err(|_| invalid())
}

/// Decoded payload of a processed command
#[derive(Debug, Clone, PartialEq)]
pub enum ColorHugReply {
    None,
    Serial(u32),
    Xyz(ColorXyz),
    Hash([u8; 20]),
}

type Decoder = fn(&[u8]) -> ColorHugReply;

struct QueuedCommand {
    cmd: u8,
    input: Vec<u8>,
    output_len: usize,
    decode: Decoder,
}

/// Ordered batch of device commands
pub struct ColorHugQueue {
    device: BlockingDevice,
    device_id: String,
    timeout: Duration,
    pending: Vec<QueuedCommand>,
}

impl ColorHugQueue {
    pub fn new(device: BlockingDevice, device_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            device,
            device_id: device_id.into(),
            timeout,
            pending: Vec::new(),
        }
    }

    pub fn device(&self) -> &BlockingDevice {
        &self.device
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn push(&mut self, cmd: u8, input: Vec<u8>, output_len: usize, decode: Decoder) {
        self.pending.push(QueuedCommand {
            cmd,
            input,
            output_len,
            decode,
        });
    }

    /// Flash the LEDs; `mask` selects red (1) and green (2)
    pub fn set_leds(&mut self, mask: u8, repeat: u8, on_time: u8, off_time: u8) -> Result<()> {
        if mask >= 0x04 {
            return Err(SensorError::Internal(format!("invalid LED mask 0x{:02x}", mask)));
        }
        self.push(cmd::SET_LEDS, vec![mask, repeat, on_time, off_time], 0, |_| {
            ColorHugReply::None
        });
        Ok(())
    }

    pub fn get_serial_number(&mut self) {
        self.push(cmd::GET_SERIAL_NUMBER, Vec::new(), 4, |data| {
            ColorHugReply::Serial(read_u32_le(data))
        });
    }

    pub fn set_integral_time(&mut self, integral_time: u16) {
        let mut input = vec![0u8; 2];
        write_u16_le(&mut input, integral_time);
        self.push(cmd::SET_INTEGRAL_TIME, input, 0, |_| ColorHugReply::None);
    }

    pub fn set_multiplier(&mut self, multiplier: u8) {
        self.push(cmd::SET_MULTIPLIER, vec![multiplier], 0, |_| ColorHugReply::None);
    }

    pub fn take_readings_xyz(&mut self, index: CalibrationIndex) {
        let mut input = vec![0u8; 2];
        write_u16_le(&mut input, index.value());
        self.push(cmd::TAKE_READING_XYZ, input, 12, |data| {
            ColorHugReply::Xyz(ColorXyz::new(
                packed_float(&data[0..4]),
                packed_float(&data[4..8]),
                packed_float(&data[8..12]),
            ))
        });
    }

    pub fn set_remote_hash(&mut self, hash: [u8; 20]) {
        self.push(cmd::SET_REMOTE_HASH, hash.to_vec(), 0, |_| ColorHugReply::None);
    }

    pub fn get_remote_hash(&mut self) {
        self.push(cmd::GET_REMOTE_HASH, Vec::new(), 20, |data| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&data[..20]);
            ColorHugReply::Hash(hash)
        });
    }

    pub fn write_eeprom(&mut self) {
        self.push(cmd::WRITE_EEPROM, EEPROM_MAGIC.to_vec(), 0, |_| ColorHugReply::None);
    }

    /// Send every queued command in order
    ///
    /// The queue is empty afterwards whether or not the batch succeeded.
    pub async fn process(&mut self, cancel: &Cancellable) -> Result<Vec<ColorHugReply>> {
        let pending = std::mem::take(&mut self.pending);
        let mut replies = Vec::with_capacity(pending.len());
        for command in pending {
            let data = self
                .send(&command, cancel)
                .await
                .map_err(|e| e.context(&self.device_id))?;
            replies.push((command.decode)(&data));
        }
        Ok(replies)
    }

    async fn send(&self, command: &QueuedCommand, cancel: &Cancellable) -> Result<Vec<u8>> {
        let name = command_name(command.cmd);
        let mut packet = vec![0u8; PACKET_SIZE];
        packet[0] = command.cmd;
        packet[1..1 + command.input.len()].copy_from_slice(&command.input);

        cancel.check()?;
        trace!(cmd = name, "sending command");
        self.device
            .interrupt_write(ENDPOINT_OUT, packet, self.timeout)
            .await
            .map_err(|e| SensorError::from(e).context(format!("failed to send {}", name)))?;

        cancel.check()?;
        let reply = self
            .device
            .interrupt_read(ENDPOINT_IN, PACKET_SIZE, self.timeout)
            .await
            .map_err(|e| SensorError::from(e).context(format!("failed to read {}", name)))?;

        let expected = REPLY_HEADER + command.output_len;
        let retval = reply.first().copied().unwrap_or(0xff);
        let echoed = reply.get(1).copied().unwrap_or(0);
        let len_ok = reply.len() == expected || reply.len() == PACKET_SIZE;
        if retval != 0 || echoed != command.cmd || !len_ok {
            return Err(SensorError::Protocol(format!(
                "Invalid read: retval=0x{:02x} [{}] cmd=0x{:02x} (expected 0x{:02x} [{}]) len={} (expected {} or {})",
                retval,
                error_name(retval),
                echoed,
                command.cmd,
                name,
                reply.len(),
                expected,
                PACKET_SIZE
            )));
        }
        Ok(reply[REPLY_HEADER..expected].to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorHugConfig {
    pub timeout_ms: u64,
}

impl Default for ColorHugConfig {
    fn default() -> Self {
        Self { timeout_ms: 5000 }
    }
}

pub struct ColorHugState {
    queue: ColorHugQueue,
    serial: String,
}

impl std::fmt::Debug for ColorHugState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColorHugState")
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct ColorHugDriver {
    kind: SensorKind,
    config: ColorHugConfig,
}

impl ColorHugDriver {
    /// `kind` is either `ColorHug` or `ColorHug2`
    pub fn new(kind: SensorKind, config: ColorHugConfig) -> Self {
        Self { kind, config }
    }
}

fn expect_reply(replies: Vec<ColorHugReply>, what: &str) -> Result<ColorHugReply> {
    replies
        .into_iter()
        .find(|r| *r != ColorHugReply::None)
        .ok_or_else(|| SensorError::NoData(format!("no {} in reply", what)))
}

impl SensorDriver for ColorHugDriver {
    type State = ColorHugState;

    fn kind(&self) -> SensorKind {
        self.kind
    }

    fn caps(&self) -> SensorCaps {
        SensorCaps::from_caps(&[
            SensorCap::Lcd,
            SensorCap::Crt,
            SensorCap::Plasma,
            SensorCap::Projector,
        ])
    }

    async fn lock(
        &self,
        info: &SensorInfo,
        cancel: &Cancellable,
    ) -> Result<Session<ColorHugState>> {
        cancel.check()?;
        let device = info.open_device().await?;
        let mut queue = ColorHugQueue::new(
            device,
            info.id.as_str(),
            Duration::from_millis(self.config.timeout_ms),
        );

        queue.get_serial_number();
        queue.set_integral_time(INTEGRAL_TIME_MAX);
        queue.set_multiplier(MULTIPLIER_SCALE_100);
        let serial = match queue.process(cancel).await {
            Ok(replies) => match expect_reply(replies, "serial number") {
                Ok(ColorHugReply::Serial(serial)) => Ok(serial.to_string()),
                Ok(other) => Err(SensorError::Protocol(format!("unexpected reply {:?}", other))),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        match serial {
            Ok(serial) => {
                debug!(serial = %serial, "colorhug serial number");
                Ok(Session {
                    serial: Some(serial.clone()),
                    state: ColorHugState { queue, serial },
                })
            }
            Err(e) => {
                let _ = queue.device().close().await;
                Err(e)
            }
        }
    }

    async fn get_sample(
        &self,
        state: &mut ColorHugState,
        cap: SensorCap,
        cancel: &Cancellable,
    ) -> Result<ColorXyz> {
        let index = CalibrationIndex::for_cap(cap).ok_or_else(|| {
            SensorError::Unsupported(format!("ColorHug cannot measure in {} mode", cap))
        })?;
        state.queue.take_readings_xyz(index);
        match expect_reply(state.queue.process(cancel).await?, "reading")? {
            ColorHugReply::Xyz(xyz) => {
                debug!(index = index.value(), "finished values: {}", xyz);
                Ok(xyz)
            }
            other => Err(SensorError::Protocol(format!("unexpected reply {:?}", other))),
        }
    }

    async fn set_option(
        &self,
        state: &mut ColorHugState,
        key: &str,
        value: &OptionValue,
        cancel: &Cancellable,
    ) -> Result<()> {
        if key != REMOTE_HASH_OPTION {
            return Err(SensorError::UnsupportedOption(format!(
                "Sensor option not supported: {}",
                key
            )));
        }
        let hash = parse_sha1(value.as_str()?)?;
        state.queue.set_remote_hash(hash);
        state.queue.process(cancel).await?;
        debug!(hash = %hex::encode(hash), "set remote profile hash");
        Ok(())
    }

    async fn options_applied(&self, state: &mut ColorHugState, cancel: &Cancellable) -> Result<()> {
        state.queue.write_eeprom();
        state.queue.process(cancel).await?;
        Ok(())
    }

    async fn unlock(&self, state: ColorHugState) -> Result<()> {
        state.queue.device().close().await?;
        Ok(())
    }

    async fn dump(&self, state: &mut ColorHugState, cancel: &Cancellable) -> Result<String> {
        state.queue.get_remote_hash();
        let hash = match expect_reply(state.queue.process(cancel).await?, "remote hash")? {
            ColorHugReply::Hash(hash) => hash,
            other => return Err(SensorError::Protocol(format!("unexpected reply {:?}", other))),
        };

        let mut out = String::new();
        let _ = writeln!(out, "colorhug-dump-version:1");
        let _ = writeln!(out, "serial:{}", state.serial);
        let _ = writeln!(out, "remote-hash:{}", hex::encode(hash));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SensorId;
    use approx::assert_abs_diff_eq;
    use chroma_usb::mock::{MockContext, MockDevice};
    use std::sync::Arc;

    const HASH: &str = "a3c1f4f1a6a4b0d1b26f8c7a0b1c2d3e4f5a6b7c";

    fn info(mock: &MockDevice) -> SensorInfo {
        SensorInfo {
            id: SensorId("colorhug-001-002".into()),
            kind: SensorKind::ColorHug,
            model: "ColorHug".into(),
            vendor: "Hughski Ltd.".into(),
            vid: COLORHUG_VID,
            pid: COLORHUG_PID,
            native: true,
            usb: Some(Arc::new(
                MockContext::new().with_device(COLORHUG_VID, COLORHUG_PID, mock.clone()),
            )),
        }
    }

    /// Answers every packet with success and canned payloads
    fn emulator() -> MockDevice {
        let mock = MockDevice::new();
        mock.set_responder(|req| {
            let mut reply = vec![0u8; PACKET_SIZE];
            reply[1] = req[0];
            match req[0] {
                cmd::GET_SERIAL_NUMBER => reply[2..6].copy_from_slice(&1234u32.to_le_bytes()),
                cmd::TAKE_READING_XYZ => {
                    reply[2..6].copy_from_slice(&0x0001_0000i32.to_le_bytes());
                    reply[6..10].copy_from_slice(&0x0000_8000i32.to_le_bytes());
                    reply[10..14].copy_from_slice(&0x0002_4000i32.to_le_bytes());
                }
                cmd::GET_REMOTE_HASH => reply[2..22].copy_from_slice(&[0xab; 20]),
                _ => {}
            }
            Some(reply)
        });
        mock
    }

    fn queue(mock: &MockDevice) -> ColorHugQueue {
        let device = BlockingDevice::new(Box::new(mock.clone()), COLORHUG_VID, COLORHUG_PID);
        ColorHugQueue::new(device, "colorhug-test", Duration::from_millis(100))
    }

    #[test]
    fn test_packed_float() {
        assert_eq!(packed_float(&0x0001_0000u32.to_le_bytes()), 1.0);
        assert_eq!(packed_float(&0x0000_8000u32.to_le_bytes()), 0.5);
        assert_eq!(packed_float(&(-0x0001_0000i32).to_le_bytes()), -1.0);
    }

    #[test]
    fn test_calibration_index_table() {
        assert_eq!(CalibrationIndex::for_cap(SensorCap::Lcd).unwrap().value(), 64);
        assert_eq!(CalibrationIndex::for_cap(SensorCap::Crt).unwrap().value(), 65);
        assert_eq!(CalibrationIndex::for_cap(SensorCap::Projector).unwrap().value(), 66);
        assert_eq!(CalibrationIndex::for_cap(SensorCap::Plasma), Some(CalibrationIndex::Factory));
        assert_eq!(CalibrationIndex::Led.value(), 67);
        assert_eq!(CalibrationIndex::for_cap(SensorCap::Ambient), None);
    }

    #[test]
    fn test_sha1_parsing() {
        assert_eq!(parse_sha1(HASH).unwrap()[0], 0xa3);
        assert_eq!(
            parse_sha1("xyz").unwrap_err(),
            SensorError::UnsupportedOption("Invalid SHA1 hash 'xyz'".into())
        );
        assert!(parse_sha1(&"g".repeat(40)).is_err());
    }

    #[test]
    fn test_error_names() {
        assert_eq!(error_name(0), "Success");
        assert_eq!(error_name(12), "No calibration");
        assert_eq!(error_name(32), "Self test failed: ADC Vref");
        assert_eq!(error_name(200), "Unknown error, please report");
    }

    #[tokio::test]
    async fn test_queue_runs_in_order() {
        let mock = emulator();
        let mut queue = queue(&mock);
        queue.set_leds(0x03, 2, 10, 20).unwrap();
        queue.get_serial_number();
        queue.take_readings_xyz(CalibrationIndex::Crt);
        let replies = queue.process(&Cancellable::new()).await.unwrap();
        assert!(queue.is_empty());

        assert_eq!(replies[0], ColorHugReply::None);
        assert_eq!(replies[1], ColorHugReply::Serial(1234));
        assert_eq!(
            replies[2],
            ColorHugReply::Xyz(ColorXyz::new(1.0, 0.5, 2.25))
        );

        let writes = mock.writes();
        assert_eq!(&writes[0].data[..5], &[cmd::SET_LEDS, 3, 2, 10, 20]);
        assert_eq!(writes[0].data.len(), PACKET_SIZE);
        assert_eq!(&writes[2].data[..3], &[cmd::TAKE_READING_XYZ, 65, 0]);
    }

    #[test]
    fn test_led_mask_is_checked() {
        let mut queue = queue(&MockDevice::new());
        assert!(queue.set_leds(0x04, 0, 0, 0).is_err());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_failure_aborts_and_clears_queue() {
        let mock = MockDevice::new();
        let mut ok = vec![0u8; PACKET_SIZE];
        ok[1] = cmd::SET_MULTIPLIER;
        mock.push_reply(ok);
        let mut failed = vec![0u8; PACKET_SIZE];
        failed[0] = 0x0a;
        failed[1] = cmd::SET_INTEGRAL_TIME;
        mock.push_reply(failed);

        let mut queue = queue(&mock);
        queue.set_multiplier(3);
        queue.set_integral_time(0xffff);
        queue.write_eeprom();
        let err = queue.process(&Cancellable::new()).await.unwrap_err();
        assert_eq!(
            err,
            SensorError::Protocol(
                "colorhug-test: Invalid read: retval=0x0a [Invalid value] cmd=0x06 \
                 (expected 0x06 [set-integral-time]) len=64 (expected 2 or 64)"
                    .into()
            )
        );
        // write-eeprom never went out
        assert_eq!(mock.writes().len(), 2);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_short_reply_is_invalid() {
        let mock = MockDevice::new();
        mock.push_reply(vec![0x00, cmd::GET_SERIAL_NUMBER, 1, 2]);
        let mut queue = queue(&mock);
        queue.get_serial_number();
        let err = queue.process(&Cancellable::new()).await.unwrap_err();
        assert!(matches!(
            err,
            SensorError::Protocol(ref m) if m.contains("len=4 (expected 6 or 64)")
        ));
    }

    #[tokio::test]
    async fn test_lock_and_sample() {
        let mock = emulator();
        let driver = ColorHugDriver::new(SensorKind::ColorHug, ColorHugConfig::default());
        let cancel = Cancellable::new();
        let mut session = driver.lock(&info(&mock), &cancel).await.unwrap();
        assert_eq!(session.serial.as_deref(), Some("1234"));

        let writes = mock.writes();
        assert_eq!(writes[0].data[0], cmd::GET_SERIAL_NUMBER);
        assert_eq!(&writes[1].data[..3], &[cmd::SET_INTEGRAL_TIME, 0xff, 0xff]);
        assert_eq!(&writes[2].data[..2], &[cmd::SET_MULTIPLIER, 3]);

        let xyz = driver.get_sample(&mut session.state, SensorCap::Lcd, &cancel).await.unwrap();
        assert_abs_diff_eq!(xyz.x, 1.0);
        assert_abs_diff_eq!(xyz.z, 2.25);

        let err = driver
            .get_sample(&mut session.state, SensorCap::Ambient, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SensorError::Unsupported(_)));

        driver.unlock(session.state).await.unwrap();
        assert!(mock.is_closed());
    }

    #[tokio::test]
    async fn test_remote_hash_option_then_eeprom_write() {
        let mock = emulator();
        let driver = ColorHugDriver::new(SensorKind::ColorHug2, ColorHugConfig::default());
        let cancel = Cancellable::new();
        let mut session = driver.lock(&info(&mock), &cancel).await.unwrap();
        mock.clear_writes();

        driver
            .set_option(&mut session.state, REMOTE_HASH_OPTION, &OptionValue::from(HASH), &cancel)
            .await
            .unwrap();
        driver.options_applied(&mut session.state, &cancel).await.unwrap();

        let writes = mock.writes();
        assert_eq!(writes[0].data[0], cmd::SET_REMOTE_HASH);
        assert_eq!(&writes[0].data[1..21], &parse_sha1(HASH).unwrap());
        assert_eq!(&writes[1].data[..9], b"\x20Un1c0rn2");

        let err = driver
            .set_option(&mut session.state, REMOTE_HASH_OPTION, &OptionValue::Double(1.0), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, SensorError::UnsupportedOption("Unexpected type".into()));
    }

    #[tokio::test]
    async fn test_dump_reads_remote_hash() {
        let mock = emulator();
        let driver = ColorHugDriver::new(SensorKind::ColorHug, ColorHugConfig::default());
        let cancel = Cancellable::new();
        let mut session = driver.lock(&info(&mock), &cancel).await.unwrap();

        let dump = driver.dump(&mut session.state, &cancel).await.unwrap();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines[0], "colorhug-dump-version:1");
        assert_eq!(lines[1], "serial:1234");
        assert_eq!(lines[2], format!("remote-hash:{}", "ab".repeat(20)));
    }

    #[tokio::test]
    async fn test_failed_lock_closes_device() {
        let mock = MockDevice::new();
        let mut failed = vec![0u8; PACKET_SIZE];
        failed[0] = 0x05;
        failed[1] = cmd::GET_SERIAL_NUMBER;
        mock.push_reply(failed);

        let driver = ColorHugDriver::new(SensorKind::ColorHug, ColorHugConfig::default());
        let err = driver.lock(&info(&mock), &Cancellable::new()).await.unwrap_err();
        assert!(matches!(err, SensorError::Protocol(ref m) if m.contains("[No serial]")));
        assert!(mock.is_closed());
    }
}
