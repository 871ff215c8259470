//! Huey colorimeter driver
//!
//! Requests are 8-byte class control transfers; replies are read from the
//! interrupt endpoint. Reply byte 0 is a status code and byte 1 echoes the
//! command. The classic Huey measures device RGB with EEPROM calibration
//! matrices; the Huey2 only reports luminance.

use chroma_core::buffer::{read_u16_be, read_u32_be, write_u16_be};
use chroma_core::{ColorRgb, ColorXyz, Mat3x3, RgbToXyz, Vec3, NO_VALUE};
use chroma_usb::{BlockingDevice, ControlRequest};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::debug;

use crate::cancel::Cancellable;
use crate::driver::{SensorDriver, SensorInfo, Session};
use crate::error::{Result, SensorError};
use crate::options::OptionValue;
use crate::types::{SensorCap, SensorCaps, SensorKind};

pub const HUEY_VID: u16 = 0x0971;
pub const HUEY_PID: u16 = 0x2005;
pub const HUEY2_VID: u16 = 0x0765;
pub const HUEY2_PID: u16 = 0x5010;

const MAX_READ_RETRIES: usize = 5;
const HUEY2_TIMEOUT_MS: u64 = 30000;
const HUEY2_EEPROM_SIZE: usize = 0x3ff;
const HUEY2_SAMPLE_WINDOW: u16 = 0x0062;
const REPLY_ENDPOINT: u8 = 0x81;

/// Pulse counter runs at a sixth of the 6 MHz crystal
const POLL_FREQUENCY: f64 = 1e6;
const AMBIENT_UNITS_TO_LUX: f64 = 125.0;
const LED_SPIN: [u8; 9] = [0x0, 0x1, 0x2, 0x4, 0x8, 0x4, 0x2, 0x1, 0x0];
const LED_STEP: Duration = Duration::from_millis(50);

pub mod cmd {
    pub const GET_STATUS: u8 = 0x00;
    pub const READ_GREEN: u8 = 0x02;
    pub const READ_BLUE: u8 = 0x03;
    pub const SAMPLE_BY_PULSES: u8 = 0x04;
    pub const SET_VALUE: u8 = 0x05;
    pub const GET_VALUE: u8 = 0x06;
    pub const UNKNOWN_07: u8 = 0x07;
    pub const REGISTER_READ: u8 = 0x08;
    pub const UNLOCK: u8 = 0x0e;
    pub const UNKNOWN_0F: u8 = 0x0f;
    pub const UNKNOWN_10: u8 = 0x10;
    pub const UNKNOWN_11: u8 = 0x11;
    pub const UNKNOWN_12: u8 = 0x12;
    pub const MEASURE_RGB_CRT: u8 = 0x13;
    pub const UNKNOWN_15: u8 = 0x15;
    pub const MEASURE_RGB: u8 = 0x16;
    pub const GET_AMBIENT: u8 = 0x17;
    pub const SET_LEDS: u8 = 0x18;
    pub const UNKNOWN_19: u8 = 0x19;
    pub const UNKNOWN_21: u8 = 0x21;
    pub const SAMPLE_BY_TIME: u8 = 0x53;
}

pub fn command_name(value: u8) -> &'static str {
    match value {
        cmd::GET_STATUS => "get-status",
        cmd::READ_GREEN => "read-green",
        cmd::READ_BLUE => "read-blue",
        cmd::SAMPLE_BY_PULSES => "sample-by-pulses",
        cmd::SET_VALUE => "set-value",
        cmd::GET_VALUE => "get-value",
        cmd::UNKNOWN_07 => "unknown-07",
        cmd::REGISTER_READ => "register-read",
        cmd::UNLOCK => "unlock",
        cmd::UNKNOWN_0F => "unknown-0f",
        cmd::UNKNOWN_10 => "unknown-10",
        cmd::UNKNOWN_11 => "unknown-11",
        cmd::UNKNOWN_12 => "unknown-12",
        cmd::MEASURE_RGB_CRT => "measure-rgb-crt",
        cmd::UNKNOWN_15 => "unknown-15",
        cmd::MEASURE_RGB => "measure-rgb",
        cmd::GET_AMBIENT => "ambient",
        cmd::SET_LEDS => "set-leds",
        cmd::UNKNOWN_19 => "unknown-19",
        cmd::UNKNOWN_21 => "unknown-21",
        cmd::SAMPLE_BY_TIME => "sample-by-time",
        _ => "unknown-command",
    }
}

/// Reply status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HueyStatus {
    Success,
    Locked,
    Unknown5a,
    Error,
    Unknown81,
    Retry,
    Other(u8),
}

impl From<u8> for HueyStatus {
    fn from(value: u8) -> Self {
        match value {
            0x00 => HueyStatus::Success,
            0xc0 => HueyStatus::Locked,
            0x5a => HueyStatus::Unknown5a,
            0x80 => HueyStatus::Error,
            0x81 => HueyStatus::Unknown81,
            0x90 => HueyStatus::Retry,
            other => HueyStatus::Other(other),
        }
    }
}

impl HueyStatus {
    pub fn name(&self) -> &'static str {
        match self {
            HueyStatus::Success => "success",
            HueyStatus::Locked => "locked",
            HueyStatus::Unknown5a => "unknown5a",
            HueyStatus::Error => "error",
            HueyStatus::Unknown81 => "unknown81",
            HueyStatus::Retry => "retry",
            HueyStatus::Other(_) => "unknown",
        }
    }
}

/// EEPROM layout of the classic Huey
pub mod eeprom {
    pub const SERIAL: u8 = 0x00;
    pub const CALIBRATION_DATA_LCD: u8 = 0x04;
    pub const CALIBRATION_TIME_LCD: u8 = 0x32;
    pub const CALIBRATION_DATA_CRT: u8 = 0x36;
    pub const CALIBRATION_TIME_CRT: u8 = 0x5a;
    pub const DARK_OFFSET: u8 = 0x67;
    pub const UNLOCK: u8 = 0x7a;
    pub const AMBIENT_CALIB_VALUE: u8 = 0x94;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HueyModel {
    Classic,
    Huey2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HueyConfig {
    /// Multiplier from the approximate count to the pulse target
    pub pulse_factor: f64,
    pub post_scale: f64,
    pub timeout_ms: u64,
}

impl Default for HueyConfig {
    fn default() -> Self {
        Self {
            pulse_factor: 2.9,
            post_scale: 3.428,
            timeout_ms: 50000,
        }
    }
}

/// Factory calibration read at lock time
#[derive(Debug, Clone, PartialEq)]
pub struct HueyCalibration {
    pub lcd: Mat3x3,
    pub crt: Mat3x3,
    pub dark_offset: Vec3,
    pub calibration_value: f32,
    pub unlock_string: String,
}

pub struct HueyState {
    device: BlockingDevice,
    calibration: Option<HueyCalibration>,
    status: Option<String>,
    eeprom: Vec<u8>,
}

impl std::fmt::Debug for HueyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HueyState")
            .field("calibration", &self.calibration)
            .field("status", &self.status)
            .field("eeprom_len", &self.eeprom.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct HueyDriver {
    model: HueyModel,
    config: HueyConfig,
}

impl HueyDriver {
    pub fn new(model: HueyModel, config: HueyConfig) -> Self {
        Self { model, config }
    }

    pub fn model(&self) -> HueyModel {
        self.model
    }

    fn link<'a>(&self, device: &'a BlockingDevice, cancel: &'a Cancellable) -> HueyLink<'a> {
        let timeout_ms = match self.model {
            HueyModel::Classic => self.config.timeout_ms,
            HueyModel::Huey2 => HUEY2_TIMEOUT_MS,
        };
        HueyLink {
            device,
            cancel,
            timeout: Duration::from_millis(timeout_ms),
            retry_reads: self.model == HueyModel::Classic,
        }
    }

    async fn setup_classic(&self, link: &HueyLink<'_>) -> Result<(String, HueyCalibration)> {
        let mut unlock = [0u8; 8];
        unlock[0] = cmd::UNLOCK;
        unlock[1..].copy_from_slice(b"GrMbked");
        link.send(unlock).await?;

        let serial = link.read_word(eeprom::SERIAL).await?.to_string();
        debug!(serial = %serial, "huey serial number");

        let lcd = link.read_matrix(eeprom::CALIBRATION_DATA_LCD).await?;
        debug!("device calibration LCD: {}", lcd);
        let crt = link.read_matrix(eeprom::CALIBRATION_DATA_CRT).await?;
        debug!("device calibration CRT: {}", crt);
        let calibration_value = link.read_float(eeprom::AMBIENT_CALIB_VALUE).await?;
        let dark_offset = link.read_vector(eeprom::DARK_OFFSET).await?;
        let unlock_string = link.read_string(eeprom::UNLOCK, 5).await?;

        for mask in LED_SPIN {
            link.set_leds(mask).await?;
            tokio::time::sleep(LED_STEP).await;
        }

        Ok((
            serial,
            HueyCalibration {
                lcd,
                crt,
                dark_offset,
                calibration_value,
                unlock_string,
            },
        ))
    }

    async fn setup_huey2(&self, link: &HueyLink<'_>) -> Result<(String, Vec<u8>)> {
        let mut request = [0u8; 8];
        request[0] = cmd::GET_STATUS;
        let reply = link.send(request).await?;
        let status = ascii(&reply[2..8]);
        debug!(status = %status, "huey2 status");

        let eeprom = link.read_eeprom().await?;
        Ok((status, eeprom))
    }

    async fn sample_classic(
        &self,
        link: &HueyLink<'_>,
        calibration: &HueyCalibration,
        cap: SensorCap,
    ) -> Result<ColorXyz> {
        // Quick approximate pass to size the multipliers
        let raw = link.sample_for_threshold([1, 1, 1]).await?;
        debug!("initial values: red={}, green={}, blue={}", raw[0], raw[1], raw[2]);

        let multiplier = raw.map(multiplier_for);
        debug!(
            "using multiplier factor: red={}, green={}, blue={}",
            multiplier[0], multiplier[1], multiplier[2]
        );

        let raw = link.sample_for_threshold(multiplier).await?;
        debug!("raw values: red={}, green={}, blue={}", raw[0], raw[1], raw[2]);
        if raw.contains(&0) {
            return Err(SensorError::NoData("sensor returned a zero count".to_string()));
        }

        let rgb = ColorRgb::new(
            f64::from(multiplier[0]) / f64::from(raw[0]),
            f64::from(multiplier[1]) / f64::from(raw[1]),
            f64::from(multiplier[2]) / f64::from(raw[2]),
        );

        let matrix = match cap {
            SensorCap::Crt | SensorCap::Plasma => calibration.crt,
            _ => calibration.lcd,
        };
        let xyz = RgbToXyz::new(matrix)
            .with_dark_offset(calibration.dark_offset)
            .with_scales(0.5 * POLL_FREQUENCY, self.config.post_scale)
            .with_clamp(true)
            .apply(rgb);
        debug!("finished values: {}", xyz);
        Ok(xyz)
    }

    async fn sample_huey2(&self, link: &HueyLink<'_>) -> Result<ColorXyz> {
        let mut request = [0u8; 8];
        request[0] = cmd::SAMPLE_BY_TIME;
        write_u16_be(&mut request[1..], HUEY2_SAMPLE_WINDOW);
        let reply = link.send(request).await?;
        let approx = read_u32_be(&reply[2..]);
        debug!(approx, "approximate reading");

        let target = pulse_target(approx, self.config.pulse_factor);
        request[0] = cmd::SAMPLE_BY_PULSES;
        write_u16_be(&mut request[1..], target);
        let reply = link.send(request).await?;
        let pulses = read_u32_be(&reply[2..]);
        debug!(pulses, target, "number of pulses");

        Ok(ColorXyz::luminance(luminance(approx, pulses)?))
    }
}

/// Gain that fills the 16 bit counter for a first-pass count
pub fn multiplier_for(raw: u32) -> u16 {
    if raw == 0 {
        return 1;
    }
    let value = (POLL_FREQUENCY / f64::from(raw)) as u16;
    value.max(1)
}

/// Pulse count to wait for in the precise pass
pub fn pulse_target(approx: u32, factor: f64) -> u16 {
    (f64::from(approx) * factor).round() as u16
}

pub fn luminance(approx: u32, pulses: u32) -> Result<f64> {
    if pulses == 0 {
        return Err(SensorError::NoData("no pulses counted".to_string()));
    }
    Ok(f64::from(approx) * 1000.0 / f64::from(pulses))
}

fn ascii(data: &[u8]) -> String {
    data.iter()
        .take_while(|b| **b != 0)
        .map(|b| *b as char)
        .collect()
}

struct HueyLink<'a> {
    device: &'a BlockingDevice,
    cancel: &'a Cancellable,
    timeout: Duration,
    retry_reads: bool,
}

impl HueyLink<'_> {
    async fn send(&self, request: [u8; 8]) -> Result<[u8; 8]> {
        let name = command_name(request[0]);
        self.cancel.check()?;
        self.device
            .control_out(
                ControlRequest::class_interface_out(0x09, 0x0200, 0),
                request.to_vec(),
                self.timeout,
            )
            .await
            .map_err(|e| SensorError::from(e).context(format!("failed to send {}", name)))?;

        let reads = if self.retry_reads { MAX_READ_RETRIES } else { 1 };
        for _ in 0..reads {
            self.cancel.check()?;
            let data = self
                .device
                .interrupt_read(REPLY_ENDPOINT, 8, self.timeout)
                .await
                .map_err(|e| {
                    SensorError::from(e).context(format!("failed to read {} reply", name))
                })?;
            if data.len() < 2 {
                return Err(SensorError::Protocol(format!(
                    "short reply to {}: {} bytes",
                    name,
                    data.len()
                )));
            }
            let mut reply = [0u8; 8];
            let n = data.len().min(8);
            reply[..n].copy_from_slice(&data[..n]);

            if reply[1] != request[0] {
                return Err(SensorError::Protocol(format!(
                    "wrong command reply, got 0x{:02x}, expected 0x{:02x}",
                    reply[1], request[0]
                )));
            }

            let status = HueyStatus::from(reply[0]);
            match status {
                HueyStatus::Success => return Ok(reply),
                _ if !self.retry_reads => {
                    return Err(SensorError::Protocol(format!(
                        "failed to issue command: {}",
                        ascii(&reply[2..])
                    )))
                }
                HueyStatus::Locked => {
                    return Err(SensorError::Protocol("the device is locked".to_string()))
                }
                HueyStatus::Error => {
                    return Err(SensorError::Protocol(format!(
                        "failed to issue command: {}",
                        ascii(&reply[2..])
                    )))
                }
                HueyStatus::Retry => {
                    debug!(cmd = name, "device asked for a re-read");
                    continue;
                }
                _ => {
                    return Err(SensorError::Protocol(format!(
                        "return value unknown: 0x{:02x}",
                        reply[0]
                    )))
                }
            }
        }

        Err(SensorError::Protocol(format!(
            "gave up retrying after {} reads",
            MAX_READ_RETRIES
        )))
    }

    async fn read_byte(&self, addr: u8) -> Result<u8> {
        let request = [cmd::REGISTER_READ, addr, 0x00, 0x10, 0x3c, 0x06, 0x00, 0x00];
        let reply = self
            .send(request)
            .await
            .map_err(|e| e.context(format!("failed to read register 0x{:02x}", addr)))?;
        Ok(reply[3])
    }

    async fn read_word(&self, addr: u8) -> Result<u32> {
        let mut tmp = [0u8; 4];
        for (i, byte) in tmp.iter_mut().enumerate() {
            *byte = self.read_byte(addr.wrapping_add(i as u8)).await?;
        }
        Ok(read_u32_be(&tmp))
    }

    async fn read_float(&self, addr: u8) -> Result<f32> {
        Ok(f32::from_bits(self.read_word(addr).await?))
    }

    async fn read_vector(&self, addr: u8) -> Result<Vec3> {
        let mut data = [0.0f64; 3];
        for (i, v) in data.iter_mut().enumerate() {
            *v = f64::from(self.read_float(addr.wrapping_add((i * 4) as u8)).await?);
        }
        Ok(Vec3::from_array(data))
    }

    async fn read_matrix(&self, addr: u8) -> Result<Mat3x3> {
        let mut data = [0.0f64; 9];
        for (i, v) in data.iter_mut().enumerate() {
            *v = f64::from(self.read_float(addr.wrapping_add((i * 4) as u8)).await?);
        }
        Ok(Mat3x3::from_slice(&data))
    }

    async fn read_string(&self, addr: u8, len: usize) -> Result<String> {
        let mut bytes = Vec::with_capacity(len);
        for i in 0..len {
            bytes.push(self.read_byte(addr.wrapping_add(i as u8)).await?);
        }
        Ok(ascii(&bytes))
    }

    async fn set_leds(&self, mask: u8) -> Result<()> {
        let request = [cmd::SET_LEDS, 0x00, !mask, 0x00, 0x00, 0x00, 0x00, 0x00];
        self.send(request).await?;
        Ok(())
    }

    async fn ambient(&self) -> Result<f64> {
        let request = [cmd::GET_AMBIENT, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let reply = self.send(request).await?;
        Ok(f64::from(read_u16_be(&reply[5..])) / AMBIENT_UNITS_TO_LUX)
    }

    async fn sample_for_threshold(&self, multiplier: [u16; 3]) -> Result<[u32; 3]> {
        let mut request = [0u8; 8];
        request[0] = cmd::MEASURE_RGB;
        write_u16_be(&mut request[1..], multiplier[0]);
        write_u16_be(&mut request[3..], multiplier[1]);
        write_u16_be(&mut request[5..], multiplier[2]);
        let red = read_u32_be(&self.send(request).await?[2..]);

        request[0] = cmd::READ_GREEN;
        let green = read_u32_be(&self.send(request).await?[2..]);

        request[0] = cmd::READ_BLUE;
        let blue = read_u32_be(&self.send(request).await?[2..]);

        Ok([red, green, blue])
    }

    async fn read_eeprom(&self) -> Result<Vec<u8>> {
        let mut eeprom = vec![0u8; HUEY2_EEPROM_SIZE + 4];
        let mut request = [0u8; 8];
        request[0] = cmd::REGISTER_READ;
        for addr in (0..HUEY2_EEPROM_SIZE).step_by(4) {
            write_u16_be(&mut request[1..], addr as u16);
            let reply = self
                .send(request)
                .await
                .map_err(|e| e.context(format!("failed to read eeprom @0x{:04x}", addr)))?;
            eeprom[addr..addr + 4].copy_from_slice(&reply[4..8]);
        }
        eeprom.truncate(HUEY2_EEPROM_SIZE);
        Ok(eeprom)
    }
}

impl SensorDriver for HueyDriver {
    type State = HueyState;

    fn kind(&self) -> SensorKind {
        SensorKind::Huey
    }

    fn caps(&self) -> SensorCaps {
        match self.model {
            HueyModel::Classic => SensorCaps::from_caps(&[
                SensorCap::Lcd,
                SensorCap::Crt,
                SensorCap::Plasma,
                SensorCap::Ambient,
                // Listed so callers get a clear refusal from the hardware path
                SensorCap::Projector,
            ]),
            HueyModel::Huey2 => {
                SensorCaps::from_caps(&[SensorCap::Lcd, SensorCap::Crt, SensorCap::Plasma])
            }
        }
    }

    async fn lock(&self, info: &SensorInfo, cancel: &Cancellable) -> Result<Session<HueyState>> {
        cancel.check()?;
        let device = info.open_device().await?;

        let link = self.link(&device, cancel);
        let result = match self.model {
            HueyModel::Classic => self
                .setup_classic(&link)
                .await
                .map(|(serial, cal)| (Some(serial), Some(cal), None, Vec::new())),
            HueyModel::Huey2 => self
                .setup_huey2(&link)
                .await
                .map(|(status, eeprom)| (None, None, Some(status), eeprom)),
        };

        match result {
            Ok((serial, calibration, status, eeprom)) => Ok(Session {
                state: HueyState {
                    device,
                    calibration,
                    status,
                    eeprom,
                },
                serial,
            }),
            Err(e) => {
                let _ = device.close().await;
                Err(e)
            }
        }
    }

    async fn get_sample(
        &self,
        state: &mut HueyState,
        cap: SensorCap,
        cancel: &Cancellable,
    ) -> Result<ColorXyz> {
        if cap == SensorCap::Projector {
            return Err(SensorError::Unsupported(
                "Huey cannot measure in projector mode".to_string(),
            ));
        }

        let link = self.link(&state.device, cancel);
        match (self.model, cap) {
            (HueyModel::Classic, SensorCap::Ambient) => {
                let lux = link.ambient().await?;
                Ok(ColorXyz::new(lux, NO_VALUE, NO_VALUE))
            }
            (HueyModel::Classic, _) => {
                let calibration = state.calibration.as_ref().ok_or_else(|| {
                    SensorError::Internal("calibration was not loaded".to_string())
                })?;
                self.sample_classic(&link, calibration, cap).await
            }
            (HueyModel::Huey2, _) => self.sample_huey2(&link).await,
        }
    }

    async fn set_option(
        &self,
        _state: &mut HueyState,
        _key: &str,
        _value: &OptionValue,
        _cancel: &Cancellable,
    ) -> Result<()> {
        Err(SensorError::UnsupportedOption(
            "Huey has no runtime options".to_string(),
        ))
    }

    async fn unlock(&self, state: HueyState) -> Result<()> {
        state.device.close().await?;
        Ok(())
    }

    async fn dump(&self, state: &mut HueyState, cancel: &Cancellable) -> Result<String> {
        let mut out = String::new();
        let _ = writeln!(out, "huey-dump-version:2");

        if self.model == HueyModel::Huey2 {
            let _ = writeln!(out, "status:{}", state.status.as_deref().unwrap_or(""));
            for (addr, value) in state.eeprom.iter().enumerate() {
                let _ = writeln!(out, "eeprom[0x{:04x}]:0x{:02x}", addr, value);
            }
            return Ok(out);
        }

        let calibration = state
            .calibration
            .as_ref()
            .ok_or_else(|| SensorError::Internal("calibration was not loaded".to_string()))?;
        let _ = writeln!(out, "unlock-string:{}", calibration.unlock_string);
        let _ = writeln!(out, "calibration-value:{:.6}", calibration.calibration_value);
        let _ = writeln!(out, "dark-offset:{}", calibration.dark_offset.to_compact_string());
        let _ = writeln!(out, "calibration-lcd:{}", calibration.lcd.to_compact_string());
        let _ = writeln!(out, "calibration-crt:{}", calibration.crt.to_compact_string());

        let link = self.link(&state.device, cancel);
        for addr in 0..0xffu8 {
            let value = link.read_byte(addr).await?;
            let _ = writeln!(out, "register[0x{:02x}]:0x{:02x}", addr, value);
        }
        Ok(out)
    }
}
