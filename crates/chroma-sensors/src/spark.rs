//! Ocean Optics Spark spectrometer driver
//!
//! Messages use the Ocean binary protocol over bulk endpoints: a 44-byte
//! header, an optional payload and a 20-byte footer carrying the MD5 of
//! everything before it. Replies arrive in 64-byte chunks.
//!
//! Every reading except a dark calibration needs a dark reference spectrum,
//! which is persisted per serial number so it survives a re-plug.

use chrono::{DateTime, Utc};
use chroma_core::buffer::{read_u16_le, read_u32_le, write_u16_le, write_u32_le};
use chroma_core::{cie1931_cmf, illuminant_d65, spectrum_to_xyz, ColorXyz, Spectrum};
use chroma_usb::BlockingDevice;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cancel::Cancellable;
use crate::driver::{SensorDriver, SensorInfo, Session};
use crate::error::{Result, SensorError};
use crate::options::OptionValue;
use crate::types::{SensorCap, SensorCaps, SensorKind};

pub const SPARK_VID: u16 = 0x2457;
pub const SPARK_PID: u16 = 0x4200;

const ENDPOINT_OUT: u8 = 0x01;
const ENDPOINT_IN: u8 = 0x81;
const CHUNK_SIZE: usize = 64;

pub const HEADER_SIZE: usize = 44;
pub const FOOTER_SIZE: usize = 20;
const IMMEDIATE_MAX: usize = 16;
const PROTOCOL_VERSION: u16 = 0x1000;
const CHECKSUM_MD5: u8 = 0x01;
const FLAG_ACK_REQUIRED: u16 = 0x0004;
const START_BYTES: [u8; 2] = [0xc1, 0xc0];
const END_BYTES: [u8; 4] = [0xc5, 0xc4, 0xc3, 0xc2];

const SPECTRUM_PIXELS: usize = 1024;
const SPECTRUM_START_NM: f64 = 380.0;
const SPECTRUM_END_NM: f64 = 700.0;
const INTEGRATION_TIME_US: u32 = 100_000;
const INTEGRATION_RESOLUTION_NM: f64 = 5.0;

pub mod msg {
    pub const RESET: u32 = 0x0000_0000;
    pub const GET_HARDWARE_VERSION: u32 = 0x0000_0080;
    pub const GET_FIRMWARE_VERSION: u32 = 0x0000_0090;
    pub const GET_SERIAL_NUMBER: u32 = 0x0000_0100;
    pub const GET_AND_SEND_RAW_SPECTRUM: u32 = 0x0010_1100;
    pub const SET_INTEGRATION_TIME: u32 = 0x0011_0010;
    pub const SET_PIXEL_BINNING_FACTOR: u32 = 0x0011_0290;
}

pub fn message_name(value: u32) -> &'static str {
    match value {
        msg::RESET => "reset",
        msg::GET_HARDWARE_VERSION => "get-hardware-version",
        msg::GET_FIRMWARE_VERSION => "get-firmware-version",
        msg::GET_SERIAL_NUMBER => "get-serial-number",
        msg::GET_AND_SEND_RAW_SPECTRUM => "get-and-send-raw-spectrum",
        msg::SET_INTEGRATION_TIME => "set-integration-time",
        msg::SET_PIXEL_BINNING_FACTOR => "set-pixel-binning-factor",
        _ => "unknown",
    }
}

pub fn error_name(code: u16) -> &'static str {
    match code {
        0 => "success",
        1 => "unsupported-protocol",
        2 => "unknown-message-type",
        3 => "bad-checksum",
        4 => "message-too-large",
        5 => "payload-length-invalid",
        6 => "payload-data-invalid",
        7 => "device-not-ready",
        8 => "unknown-checksum-type",
        9 => "device-reset",
        10 => "too-many-busses",
        11 => "out-of-memory",
        12 => "command-data-missing",
        13 => "internal-error",
        14 => "could-not-decrypt",
        100 => "firmware-layout-invalid",
        101 => "packet-invalid-size",
        102 => "hardware-revision-invalid",
        103 => "flash-map-invalid",
        104 => "response-deferred",
        _ => "unknown",
    }
}

/// Build a framed message; data up to 16 bytes travels in the header
pub fn encode_message(message_type: u32, flags: u16, error_code: u16, data: &[u8]) -> Vec<u8> {
    let payload: &[u8] = if data.len() > IMMEDIATE_MAX { data } else { &[] };
    let mut buf = vec![0u8; HEADER_SIZE + payload.len() + FOOTER_SIZE];

    buf[0..2].copy_from_slice(&START_BYTES);
    write_u16_le(&mut buf[2..], PROTOCOL_VERSION);
    write_u16_le(&mut buf[4..], flags);
    write_u16_le(&mut buf[6..], error_code);
    write_u32_le(&mut buf[8..], message_type);
    // regarding and reserved stay zero
    buf[22] = CHECKSUM_MD5;
    if payload.is_empty() {
        buf[23] = data.len() as u8;
        buf[24..24 + data.len()].copy_from_slice(data);
    }
    write_u32_le(&mut buf[40..], (FOOTER_SIZE + payload.len()) as u32);
    buf[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);

    let footer = HEADER_SIZE + payload.len();
    let digest = Md5::digest(&buf[..footer]);
    buf[footer..footer + 16].copy_from_slice(&digest);
    buf[footer + 16..].copy_from_slice(&END_BYTES);
    buf
}

fn spectrum_from_raw(data: &[u8]) -> Result<Spectrum> {
    if data.len() != SPECTRUM_PIXELS * 2 {
        return Err(SensorError::Protocol(format!(
            "Expected {} bytes, got {}",
            SPECTRUM_PIXELS * 2,
            data.len()
        )));
    }
    let values = data
        .chunks_exact(2)
        .map(|px| f64::from(read_u16_le(px)) / f64::from(u16::MAX))
        .collect();
    Ok(Spectrum::new("raw", SPECTRUM_START_NM, SPECTRUM_END_NM, values))
}

/// Persisted dark reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DarkCalibration {
    pub serial: String,
    pub created: DateTime<Utc>,
    pub spectrum: Spectrum,
}

impl DarkCalibration {
    pub fn path(dir: &Path, serial: &str) -> PathBuf {
        dir.join(format!("sensor-spark-dark-cal-{}.json", serial))
    }

    pub async fn load(dir: &Path, serial: &str) -> Result<Option<Self>> {
        let path = Self::path(dir, serial);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        let text = tokio::fs::read_to_string(&path).await.map_err(|e| {
            SensorError::Internal(format!("failed to read {}: {}", path.display(), e))
        })?;
        let cal = serde_json::from_str(&text).map_err(|e| {
            SensorError::Internal(format!("failed to parse {}: {}", path.display(), e))
        })?;
        Ok(Some(cal))
    }

    pub async fn save(&self, dir: &Path) -> Result<()> {
        let path = Self::path(dir, &self.serial);
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| SensorError::Internal(format!("failed to save dark calibration: {}", e)))?;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| SensorError::Internal(format!("failed to save dark calibration: {}", e)))?;
        tokio::fs::write(&path, text)
            .await
            .map_err(|e| SensorError::Internal(format!("failed to save dark calibration: {}", e)))?;
        debug!(path = %path.display(), "saved dark calibration");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SparkConfig {
    pub timeout_ms: u64,
    pub calibration_dir: PathBuf,
}

impl Default for SparkConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 50000,
            calibration_dir: PathBuf::from("/var/lib/chroma"),
        }
    }
}

pub struct SparkState {
    device: BlockingDevice,
    serial: String,
    firmware: String,
    dark: Option<Spectrum>,
}

impl std::fmt::Debug for SparkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparkState")
            .field("serial", &self.serial)
            .field("firmware", &self.firmware)
            .field("dark", &self.dark.as_ref().map(|d| d.len()))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SparkDriver {
    config: SparkConfig,
}

impl SparkDriver {
    pub fn new(config: SparkConfig) -> Self {
        Self { config }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    /// Send one message and collect the reply data
    async fn query(
        &self,
        device: &BlockingDevice,
        message_type: u32,
        data: &[u8],
        want_reply: bool,
        cancel: &Cancellable,
    ) -> Result<Vec<u8>> {
        let name = message_name(message_type);
        let flags = if want_reply { 0 } else { FLAG_ACK_REQUIRED };
        let request = encode_message(message_type, flags, 0, data);

        cancel.check()?;
        device
            .bulk_write(ENDPOINT_OUT, request, self.timeout())
            .await
            .map_err(|e| SensorError::from(e).context(format!("Failed to {}", name)))?;

        cancel.check()?;
        let mut reply = device
            .bulk_read(ENDPOINT_IN, CHUNK_SIZE, self.timeout())
            .await
            .map_err(|e| SensorError::from(e).context(format!("Failed to {}", name)))?;
        if reply.len() < HEADER_SIZE {
            return Err(SensorError::Protocol(format!(
                "Failed to {}: short reply of {} bytes",
                name,
                reply.len()
            )));
        }

        let error_code = read_u16_le(&reply[6..]);
        if error_code != 0 {
            return Err(SensorError::Protocol(format!(
                "Failed to {}: {}",
                name,
                error_name(error_code)
            )));
        }

        let immediate_len = (reply[23] as usize).min(IMMEDIATE_MAX);
        let remaining = read_u32_le(&reply[40..]) as usize;
        if remaining < FOOTER_SIZE {
            return Err(SensorError::Protocol(format!(
                "Failed to {}: invalid length {}",
                name, remaining
            )));
        }
        let total = HEADER_SIZE + remaining;
        while reply.len() < total {
            cancel.check()?;
            let chunk = device
                .bulk_read(ENDPOINT_IN, CHUNK_SIZE, self.timeout())
                .await
                .map_err(|e| SensorError::from(e).context(format!("Failed to {}", name)))?;
            if chunk.is_empty() {
                return Err(SensorError::NoData(format!("Failed to {}: reply truncated", name)));
            }
            reply.extend_from_slice(&chunk);
        }

        if reply[total - END_BYTES.len()..total] != END_BYTES {
            return Err(SensorError::Protocol("Footer invalid".to_string()));
        }

        if immediate_len > 0 {
            Ok(reply[24..24 + immediate_len].to_vec())
        } else {
            Ok(reply[HEADER_SIZE..total - FOOTER_SIZE].to_vec())
        }
    }

    async fn get_serial(&self, device: &BlockingDevice, cancel: &Cancellable) -> Result<String> {
        let data = self.query(device, msg::GET_SERIAL_NUMBER, &[], true, cancel).await?;
        let serial: String = data
            .iter()
            .take_while(|b| **b != 0)
            .map(|b| *b as char)
            .collect();
        if serial.is_empty() {
            return Err(SensorError::Protocol(
                "Expected serial number, got nothing".to_string(),
            ));
        }
        Ok(serial)
    }

    async fn get_firmware(&self, device: &BlockingDevice, cancel: &Cancellable) -> Result<String> {
        let data = self.query(device, msg::GET_FIRMWARE_VERSION, &[], true, cancel).await?;
        if data.len() != 2 {
            return Err(SensorError::Protocol(format!(
                "Expected 2 bytes, got {}",
                data.len()
            )));
        }
        Ok(format!("{}.{}", data[1], data[0]))
    }

    async fn take_spectrum(
        &self,
        device: &BlockingDevice,
        cancel: &Cancellable,
    ) -> Result<Spectrum> {
        // Every pixel, no binning
        self.query(device, msg::SET_PIXEL_BINNING_FACTOR, &[0], false, cancel)
            .await?;
        self.query(
            device,
            msg::SET_INTEGRATION_TIME,
            &INTEGRATION_TIME_US.to_le_bytes(),
            false,
            cancel,
        )
        .await?;
        let data = self
            .query(device, msg::GET_AND_SEND_RAW_SPECTRUM, &[], true, cancel)
            .await?;
        spectrum_from_raw(&data)
    }

    async fn setup(
        &self,
        device: &BlockingDevice,
        cancel: &Cancellable,
    ) -> Result<(String, String)> {
        let serial = self.get_serial(device, cancel).await?;
        let firmware = self.get_firmware(device, cancel).await?;
        debug!(serial = %serial, firmware = %firmware, "spark identified");
        Ok((serial, firmware))
    }
}

impl SensorDriver for SparkDriver {
    type State = SparkState;

    fn kind(&self) -> SensorKind {
        SensorKind::Spark
    }

    fn caps(&self) -> SensorCaps {
        SensorCaps::from_caps(&[
            SensorCap::Lcd,
            SensorCap::Crt,
            SensorCap::Plasma,
            SensorCap::Calibration,
        ])
    }

    async fn lock(&self, info: &SensorInfo, cancel: &Cancellable) -> Result<Session<SparkState>> {
        cancel.check()?;
        let device = info.open_device().await?;
        let (serial, firmware) = match self.setup(&device, cancel).await {
            Ok(ids) => ids,
            Err(e) => {
                let _ = device.close().await;
                return Err(e);
            }
        };

        let dark = match DarkCalibration::load(&self.config.calibration_dir, &serial).await {
            Ok(Some(cal)) => {
                info!(serial = %serial, created = %cal.created, "loaded dark calibration");
                Some(cal.spectrum)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("ignoring dark calibration: {}", e);
                None
            }
        };

        Ok(Session {
            serial: Some(serial.clone()),
            state: SparkState {
                device,
                serial,
                firmware,
                dark,
            },
        })
    }

    async fn get_sample(
        &self,
        state: &mut SparkState,
        cap: SensorCap,
        cancel: &Cancellable,
    ) -> Result<ColorXyz> {
        if cap == SensorCap::Calibration {
            let mut spectrum = self.take_spectrum(&state.device, cancel).await?;
            spectrum.id = "dark".to_string();
            state.dark = Some(spectrum.clone());
            let cal = DarkCalibration {
                serial: state.serial.clone(),
                created: Utc::now(),
                spectrum,
            };
            // The in-memory reference stays usable for this session
            if let Err(e) = cal.save(&self.config.calibration_dir).await {
                warn!(serial = %state.serial, "dark calibration not persisted: {}", e);
            }
            return Ok(ColorXyz::zero());
        }

        let dark = match &state.dark {
            Some(dark) if !dark.is_empty() => dark,
            _ => {
                return Err(SensorError::RequiresDarkCalibration(
                    "no dark calibration provided".to_string(),
                ))
            }
        };

        let raw = self.take_spectrum(&state.device, cancel).await?;
        if raw.len() != dark.len() {
            return Err(SensorError::RequiresDarkCalibration(
                "dark calibration was invalid".to_string(),
            ));
        }
        let mut biased = raw.subtract(dark)?;
        biased.limit_min(0.0);

        let xyz = spectrum_to_xyz(
            &cie1931_cmf(),
            &illuminant_d65(),
            &biased,
            INTEGRATION_RESOLUTION_NM,
        )?;
        debug!("spectral sample: {}", xyz);
        Ok(xyz)
    }

    async fn set_option(
        &self,
        _state: &mut SparkState,
        _key: &str,
        _value: &OptionValue,
        _cancel: &Cancellable,
    ) -> Result<()> {
        Err(SensorError::UnsupportedOption(
            "Spark has no runtime options".to_string(),
        ))
    }

    async fn unlock(&self, state: SparkState) -> Result<()> {
        state.device.close().await?;
        Ok(())
    }

    async fn dump(&self, state: &mut SparkState, _cancel: &Cancellable) -> Result<String> {
        let mut out = String::new();
        let _ = writeln!(out, "spark-dump-version:1");
        let _ = writeln!(out, "serial:{}", state.serial);
        let _ = writeln!(out, "firmware:{}", state.firmware);
        let points = state.dark.as_ref().map(Spectrum::len).unwrap_or(0);
        let _ = writeln!(out, "dark-calibration:{} points", points);
        Ok(out)
    }
}
