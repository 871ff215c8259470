//! Software sensor that fakes readings from a configurable RGB value

use chroma_core::{ColorRgb, ColorXyz, NO_VALUE};
use lcms2::{Intent, PixelFormat, Profile, Transform};
use std::time::Duration;
use tracing::debug;

use crate::cancel::Cancellable;
use crate::driver::{SensorDriver, SensorInfo, Session};
use crate::error::{Result, SensorError};
use crate::options::OptionValue;
use crate::types::{SensorCap, SensorCaps, SensorId, SensorKind};

pub const DUMMY_SERIAL: &str = "0123456789a";
pub const DEFAULT_DELAY: Duration = Duration::from_secs(2);
const AMBIENT_LUX: f64 = 7.7;

pub struct DummyState {
    rgb: ColorRgb,
    transform: Transform<[f64; 3], [f64; 3]>,
}

impl std::fmt::Debug for DummyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyState")
            .field("rgb", &self.rgb)
            .finish_non_exhaustive()
    }
}

impl DummyState {
    pub fn rgb(&self) -> ColorRgb {
        self.rgb
    }
}

#[derive(Debug, Clone)]
pub struct DummyDriver {
    delay: Duration,
}

impl Default for DummyDriver {
    fn default() -> Self {
        Self::with_delay(DEFAULT_DELAY)
    }
}

impl DummyDriver {
    /// Emulated hardware latency before each sample completes
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn info() -> SensorInfo {
        SensorInfo {
            id: SensorId::virtual_sensor(SensorKind::Dummy),
            kind: SensorKind::Dummy,
            model: "Dummy Sensor #1".to_string(),
            vendor: "Acme Corp".to_string(),
            vid: 0,
            pid: 0,
            native: false,
            usb: None,
        }
    }
}

impl SensorDriver for DummyDriver {
    type State = DummyState;

    fn kind(&self) -> SensorKind {
        SensorKind::Dummy
    }

    fn caps(&self) -> SensorCaps {
        SensorCaps::from_caps(&[
            SensorCap::Lcd,
            SensorCap::Crt,
            SensorCap::Projector,
            SensorCap::Spot,
            SensorCap::Printer,
            SensorCap::Ambient,
        ])
    }

    async fn lock(&self, _info: &SensorInfo, cancel: &Cancellable) -> Result<Session<DummyState>> {
        cancel.check()?;
        let srgb = Profile::new_srgb();
        let xyz = Profile::new_xyz();
        let transform = Transform::new(
            &srgb,
            PixelFormat::RGB_DBL,
            &xyz,
            PixelFormat::XYZ_DBL,
            Intent::RelativeColorimetric,
        )
        .map_err(|e| {
            SensorError::Internal(format!("failed to create sRGB->XYZ transform: {}", e))
        })?;

        Ok(Session {
            serial: Some(DUMMY_SERIAL.to_string()),
            state: DummyState {
                rgb: ColorRgb::new(0.1, 0.2, 0.3),
                transform,
            },
        })
    }

    async fn get_sample(
        &self,
        state: &mut DummyState,
        cap: SensorCap,
        cancel: &Cancellable,
    ) -> Result<ColorXyz> {
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => {}
            _ = cancel.cancelled() => {
                return Err(SensorError::Cancelled("sample was cancelled".to_string()));
            }
        }

        if cap == SensorCap::Ambient {
            return Ok(ColorXyz::new(AMBIENT_LUX, NO_VALUE, NO_VALUE));
        }

        let input = [[state.rgb.r, state.rgb.g, state.rgb.b]];
        let mut output = [[0.0f64; 3]];
        state.transform.transform_pixels(&input, &mut output);
        let [x, y, z] = output[0];
        Ok(ColorXyz::new(x, y, z))
    }

    async fn set_option(
        &self,
        state: &mut DummyState,
        key: &str,
        value: &OptionValue,
        _cancel: &Cancellable,
    ) -> Result<()> {
        let channel = match key {
            "sample[red]" => &mut state.rgb.r,
            "sample[green]" => &mut state.rgb.g,
            "sample[blue]" => &mut state.rgb.b,
            _ => {
                return Err(SensorError::UnsupportedOption(
                    "Sensor option not supported".to_string(),
                ))
            }
        };
        *channel = value.as_f64()?;
        debug!(key, value = *channel, "dummy sample channel set");
        Ok(())
    }

    async fn unlock(&self, _state: DummyState) -> Result<()> {
        Ok(())
    }

    async fn dump(&self, _state: &mut DummyState, _cancel: &Cancellable) -> Result<String> {
        Ok("dummy-dump-version:1\n".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    async fn locked() -> (DummyDriver, DummyState) {
        let driver = DummyDriver::with_delay(Duration::ZERO);
        let session = driver
            .lock(&DummyDriver::info(), &Cancellable::new())
            .await
            .unwrap();
        assert_eq!(session.serial.as_deref(), Some(DUMMY_SERIAL));
        (driver, session.state)
    }

    #[tokio::test]
    async fn test_default_rgb_through_srgb_transform() {
        let (driver, mut state) = locked().await;
        let xyz = driver
            .get_sample(&mut state, SensorCap::Lcd, &Cancellable::new())
            .await
            .unwrap();
        assert_abs_diff_eq!(xyz.x, 0.027599, epsilon = 1e-4);
        assert_abs_diff_eq!(xyz.y, 0.030403, epsilon = 1e-4);
        assert_abs_diff_eq!(xyz.z, 0.055636, epsilon = 1e-4);
    }

    #[tokio::test]
    async fn test_ambient_reading() {
        let (driver, mut state) = locked().await;
        let xyz = driver
            .get_sample(&mut state, SensorCap::Ambient, &Cancellable::new())
            .await
            .unwrap();
        assert_eq!(xyz, ColorXyz::new(7.7, NO_VALUE, NO_VALUE));
    }

    #[tokio::test]
    async fn test_options() {
        let (driver, mut state) = locked().await;
        let cancel = Cancellable::new();
        driver
            .set_option(&mut state, "sample[green]", &OptionValue::Double(1.0), &cancel)
            .await
            .unwrap();
        assert_eq!(state.rgb(), ColorRgb::new(0.1, 1.0, 0.3));

        let err = driver
            .set_option(&mut state, "sample[red]", &OptionValue::Int(1), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, SensorError::UnsupportedOption("Unexpected type".into()));

        let err = driver
            .set_option(&mut state, "sample[alpha]", &OptionValue::Double(1.0), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SensorError::UnsupportedOption(_)));
    }

    #[tokio::test]
    async fn test_cancel_during_delay() {
        let driver = DummyDriver::with_delay(Duration::from_secs(30));
        let mut state = driver
            .lock(&DummyDriver::info(), &Cancellable::new())
            .await
            .unwrap()
            .state;
        let cancel = Cancellable::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = driver
            .get_sample(&mut state, SensorCap::Lcd, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SensorError::Cancelled(_)));
    }
}
