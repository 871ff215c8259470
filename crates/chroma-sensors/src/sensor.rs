//! Sensor lifecycle state machine
//!
//! A [`Sensor`] owns its driver and, while locked, the driver's private
//! session state. Every operation takes `&mut self`, so a sensor runs at most
//! one operation at a time; shared users wrap it in an async mutex.

use chroma_core::ColorXyz;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cancel::Cancellable;
use crate::driver::{SensorDriver, SensorInfo};
use crate::error::{Result, SensorError};
use crate::options::SensorOptions;
use crate::types::{SensorCap, SensorCaps, SensorId, SensorKind, SensorState};

/// Default capacity of the per-sensor event channel
pub const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SensorEvent {
    StateChanged {
        id: SensorId,
        kind: SensorKind,
        state: SensorState,
    },
    Locked {
        id: SensorId,
        serial: Option<String>,
    },
    Unlocked {
        id: SensorId,
    },
    Sample {
        id: SensorId,
        cap: SensorCap,
        xyz: ColorXyz,
    },
    Failed {
        id: SensorId,
        message: String,
    },
}

pub struct Sensor<D: SensorDriver> {
    info: SensorInfo,
    driver: D,
    state: SensorState,
    serial: Option<String>,
    options: SensorOptions,
    session: Option<D::State>,
    events: broadcast::Sender<SensorEvent>,
}

impl<D: SensorDriver> Sensor<D> {
    pub fn new(info: SensorInfo, driver: D) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            info,
            driver,
            state: SensorState::Idle,
            serial: None,
            options: SensorOptions::new(),
            session: None,
            events,
        }
    }

    pub fn id(&self) -> &SensorId {
        &self.info.id
    }

    pub fn info(&self) -> &SensorInfo {
        &self.info
    }

    pub fn kind(&self) -> SensorKind {
        self.driver.kind()
    }

    pub fn caps(&self) -> SensorCaps {
        self.driver.caps()
    }

    pub fn state(&self) -> SensorState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        self.session.is_some()
    }

    /// Populated by a successful lock
    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    pub fn model(&self) -> &str {
        &self.info.model
    }

    pub fn vendor(&self) -> &str {
        &self.info.vendor
    }

    pub fn native(&self) -> bool {
        self.info.native
    }

    /// Options applied so far, in application order
    pub fn options(&self) -> &SensorOptions {
        &self.options
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SensorEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SensorEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, state: SensorState) {
        if self.state == state {
            return;
        }
        debug!(id = %self.info.id, from = %self.state, to = %state, "sensor state change");
        self.state = state;
        self.emit(SensorEvent::StateChanged {
            id: self.info.id.clone(),
            kind: self.info.kind,
            state,
        });
    }

    fn fail(&self, err: &SensorError) {
        self.emit(SensorEvent::Failed {
            id: self.info.id.clone(),
            message: err.to_string(),
        });
    }

    pub async fn lock(&mut self, cancel: &Cancellable) -> Result<()> {
        if self.session.is_some() {
            return Err(SensorError::AlreadyLocked(format!("{} is already locked", self.info.id)));
        }

        self.set_state(SensorState::Starting);
        let result = match cancel.check() {
            Ok(()) => self.driver.lock(&self.info, cancel).await,
            Err(e) => Err(e),
        };
        self.set_state(SensorState::Idle);

        match result {
            Ok(session) => {
                if session.serial.is_some() {
                    self.serial = session.serial;
                }
                self.session = Some(session.state);
                info!(
                    id = %self.info.id,
                    serial = self.serial.as_deref().unwrap_or("unknown"),
                    "Locked sensor"
                );
                self.emit(SensorEvent::Locked {
                    id: self.info.id.clone(),
                    serial: self.serial.clone(),
                });
                Ok(())
            }
            Err(e) => {
                warn!(id = %self.info.id, "Failed to lock sensor: {}", e);
                self.fail(&e);
                Err(e)
            }
        }
    }

    pub async fn get_sample(&mut self, cap: SensorCap, cancel: &Cancellable) -> Result<ColorXyz> {
        if self.session.is_none() {
            return Err(SensorError::NotLocked(format!("{} is not locked", self.info.id)));
        }
        if !self.caps().contains(cap) {
            return Err(SensorError::UnsupportedCapability(format!(
                "{} cannot measure in {} mode",
                self.kind(),
                cap
            )));
        }
        cancel.check()?;

        self.set_state(SensorState::Measuring);
        let result = match self.session.as_mut() {
            Some(session) => self.driver.get_sample(session, cap, cancel).await,
            None => Err(SensorError::NotLocked(format!("{} is not locked", self.info.id))),
        };
        self.set_state(SensorState::Idle);

        match result {
            Ok(xyz) => {
                debug!(id = %self.info.id, cap = %cap, %xyz, "got sample");
                self.emit(SensorEvent::Sample {
                    id: self.info.id.clone(),
                    cap,
                    xyz,
                });
                Ok(xyz)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Apply options one at a time in order
    ///
    /// Stops at the first failure. Options applied before it stay applied.
    pub async fn set_options(
        &mut self,
        options: &SensorOptions,
        cancel: &Cancellable,
    ) -> Result<()> {
        if self.session.is_none() {
            return Err(SensorError::NotLocked(format!("{} is not locked", self.info.id)));
        }

        self.set_state(SensorState::Busy);
        let result = self.apply_options(options, cancel).await;
        self.set_state(SensorState::Idle);

        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }

    async fn apply_options(&mut self, options: &SensorOptions, cancel: &Cancellable) -> Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| SensorError::NotLocked(format!("{} is not locked", self.info.id)))?;

        for (key, value) in options.iter() {
            cancel.check()?;
            self.driver
                .set_option(session, key, value, cancel)
                .await
                .map_err(|e| e.context(format!("option '{}'", key)))?;
            debug!(id = %self.info.id, key, value = %value, "applied option");
            self.options.set(key, value.clone());
        }

        self.driver.options_applied(session, cancel).await
    }

    /// Release the device; a no-op when not locked
    pub async fn unlock(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        let result = self.driver.unlock(session).await;
        self.set_state(SensorState::Idle);
        info!(id = %self.info.id, "Unlocked sensor");
        self.emit(SensorEvent::Unlocked {
            id: self.info.id.clone(),
        });

        if let Err(e) = &result {
            warn!(id = %self.info.id, "Error while unlocking: {}", e);
        }
        result
    }

    /// Diagnostic text, leaves the sensor state untouched
    pub async fn dump(&mut self, cancel: &Cancellable) -> Result<String> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| SensorError::NotLocked(format!("{} is not locked", self.info.id)))?;
        cancel.check()?;
        self.driver.dump(session, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy::DummyDriver;
    use crate::options::OptionValue;
    use crate::types::SensorKind;
    use approx::assert_abs_diff_eq;

    fn dummy_sensor() -> Sensor<DummyDriver> {
        Sensor::new(DummyDriver::info(), DummyDriver::with_delay(std::time::Duration::ZERO))
    }

    #[tokio::test]
    async fn test_lock_sample_unlock_cycle() {
        let mut sensor = dummy_sensor();
        let cancel = Cancellable::new();
        assert_eq!(sensor.kind(), SensorKind::Dummy);
        assert!(!sensor.is_locked());

        sensor.lock(&cancel).await.unwrap();
        assert!(sensor.is_locked());
        assert_eq!(sensor.serial(), Some("0123456789a"));
        assert_eq!(sensor.state(), SensorState::Idle);

        let xyz = sensor.get_sample(SensorCap::Lcd, &cancel).await.unwrap();
        assert_abs_diff_eq!(xyz.x, 0.027599, epsilon = 0.01);
        assert_abs_diff_eq!(xyz.y, 0.030403, epsilon = 0.01);
        assert_abs_diff_eq!(xyz.z, 0.055636, epsilon = 0.01);

        sensor.unlock().await.unwrap();
        assert!(!sensor.is_locked());
        // Second unlock is a no-op
        sensor.unlock().await.unwrap();
    }

    #[tokio::test]
    async fn test_unlock_without_lock_is_ok() {
        let mut sensor = dummy_sensor();
        sensor.unlock().await.unwrap();
    }

    #[tokio::test]
    async fn test_double_lock_rejected() {
        let mut sensor = dummy_sensor();
        let cancel = Cancellable::new();
        sensor.lock(&cancel).await.unwrap();
        let err = sensor.lock(&cancel).await.unwrap_err();
        assert!(matches!(err, SensorError::AlreadyLocked(_)));
    }

    #[tokio::test]
    async fn test_sample_requires_lock() {
        let mut sensor = dummy_sensor();
        let err = sensor
            .get_sample(SensorCap::Lcd, &Cancellable::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SensorError::NotLocked(_)));
    }

    #[tokio::test]
    async fn test_unsupported_capability() {
        let mut sensor = dummy_sensor();
        let cancel = Cancellable::new();
        sensor.lock(&cancel).await.unwrap();
        let err = sensor.get_sample(SensorCap::Calibration, &cancel).await.unwrap_err();
        assert!(matches!(err, SensorError::UnsupportedCapability(_)));
        assert_eq!(sensor.state(), SensorState::Idle);
    }

    #[tokio::test]
    async fn test_cancel_before_sample_leaves_sensor_locked() {
        let mut sensor = dummy_sensor();
        let cancel = Cancellable::new();
        sensor.lock(&cancel).await.unwrap();

        let cancelled = Cancellable::new();
        cancelled.cancel();
        let err = sensor.get_sample(SensorCap::Lcd, &cancelled).await.unwrap_err();
        assert!(matches!(err, SensorError::Cancelled(_)));
        assert!(sensor.is_locked());
        assert_eq!(sensor.state(), SensorState::Idle);
    }

    #[tokio::test]
    async fn test_partial_options_not_rolled_back() {
        let mut sensor = dummy_sensor();
        let cancel = Cancellable::new();
        sensor.lock(&cancel).await.unwrap();

        let options = SensorOptions::new()
            .with("sample[red]", 0.5)
            .with("sample[green]", 0.5)
            .with("sample[purple]", 0.5)
            .with("sample[blue]", 0.5);
        let err = sensor.set_options(&options, &cancel).await.unwrap_err();
        assert!(matches!(
            err,
            SensorError::UnsupportedOption(ref m) if m.contains("sample[purple]")
        ));

        let applied: Vec<&str> = sensor.options().iter().map(|(k, _)| k).collect();
        assert_eq!(applied, vec!["sample[red]", "sample[green]"]);
        assert_eq!(sensor.options().get("sample[red]"), Some(&OptionValue::Double(0.5)));
        assert_eq!(sensor.state(), SensorState::Idle);
    }

    #[tokio::test]
    async fn test_events_follow_lifecycle() {
        let mut sensor = dummy_sensor();
        let mut rx = sensor.subscribe();
        let cancel = Cancellable::new();

        sensor.lock(&cancel).await.unwrap();
        sensor.unlock().await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        assert!(matches!(seen[0], SensorEvent::StateChanged { state: SensorState::Starting, .. }));
        assert!(matches!(seen[1], SensorEvent::StateChanged { state: SensorState::Idle, .. }));
        assert!(matches!(seen[2], SensorEvent::Locked { .. }));
        assert!(matches!(seen[3], SensorEvent::Unlocked { .. }));
    }

    #[tokio::test]
    async fn test_dump_requires_lock() {
        let mut sensor = dummy_sensor();
        let cancel = Cancellable::new();
        assert!(sensor.dump(&cancel).await.is_err());

        sensor.lock(&cancel).await.unwrap();
        let text = sensor.dump(&cancel).await.unwrap();
        assert!(text.starts_with("dummy-dump-version:1"));
        assert_eq!(sensor.state(), SensorState::Idle);
    }
}
