//! Driver contract and the per-kind dispatch enum

use chroma_core::ColorXyz;
use chroma_usb::{BlockingDevice, UsbContext};
use std::future::Future;
use std::sync::Arc;

use crate::cancel::Cancellable;
use crate::colorhug::{ColorHugDriver, ColorHugState};
use crate::dtp94::{Dtp94Driver, Dtp94State};
use crate::dummy::{DummyDriver, DummyState};
use crate::error::{Result, SensorError};
use crate::huey::{HueyDriver, HueyState};
use crate::options::OptionValue;
use crate::spark::{SparkDriver, SparkState};
use crate::types::{SensorCap, SensorCaps, SensorId, SensorKind};

/// Static description of an attached sensor
#[derive(Clone)]
pub struct SensorInfo {
    pub id: SensorId,
    pub kind: SensorKind,
    pub model: String,
    pub vendor: String,
    pub vid: u16,
    pub pid: u16,
    /// Whether the driver talks to the hardware directly
    pub native: bool,
    pub usb: Option<Arc<dyn UsbContext>>,
}

impl std::fmt::Debug for SensorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorInfo")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("vendor", &self.vendor)
            .field("vid", &format!("{:04x}", self.vid))
            .field("pid", &format!("{:04x}", self.pid))
            .field("native", &self.native)
            .finish()
    }
}

impl SensorInfo {
    /// Open the device and claim configuration 1, interface 0
    pub async fn open_device(&self) -> Result<BlockingDevice> {
        let usb = self.usb.clone().ok_or_else(|| {
            SensorError::DeviceNotFound(format!("{} has no USB transport", self.id))
        })?;
        Ok(BlockingDevice::open(usb, self.vid, self.pid, 1, 0).await?)
    }
}

/// Result of a successful lock
#[derive(Debug)]
pub struct Session<S> {
    pub state: S,
    pub serial: Option<String>,
}

impl<S> Session<S> {
    pub fn map<T>(self, f: impl FnOnce(S) -> T) -> Session<T> {
        Session {
            state: f(self.state),
            serial: self.serial,
        }
    }
}

/// Operations every sensor family implements
///
/// The private state exists only between a successful `lock` and `unlock`;
/// drivers must release the device on every error path inside `lock`.
pub trait SensorDriver: Send + Sync {
    type State: Send;

    fn kind(&self) -> SensorKind;

    fn caps(&self) -> SensorCaps;

    fn lock(
        &self,
        info: &SensorInfo,
        cancel: &Cancellable,
    ) -> impl Future<Output = Result<Session<Self::State>>> + Send;

    fn get_sample(
        &self,
        state: &mut Self::State,
        cap: SensorCap,
        cancel: &Cancellable,
    ) -> impl Future<Output = Result<ColorXyz>> + Send;

    fn set_option(
        &self,
        state: &mut Self::State,
        key: &str,
        value: &OptionValue,
        cancel: &Cancellable,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Runs once after every option of a batch succeeded
    fn options_applied(
        &self,
        _state: &mut Self::State,
        _cancel: &Cancellable,
    ) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }

    fn unlock(&self, state: Self::State) -> impl Future<Output = Result<()>> + Send;

    fn dump(
        &self,
        state: &mut Self::State,
        cancel: &Cancellable,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// Driver selected at coldplug time
#[derive(Debug, Clone)]
pub enum Driver {
    Huey(HueyDriver),
    Dtp94(Dtp94Driver),
    ColorHug(ColorHugDriver),
    Spark(SparkDriver),
    Dummy(DummyDriver),
}

#[derive(Debug)]
pub enum DriverState {
    Huey(HueyState),
    Dtp94(Dtp94State),
    ColorHug(ColorHugState),
    Spark(SparkState),
    Dummy(DummyState),
}

fn state_mismatch(kind: SensorKind) -> SensorError {
    SensorError::Internal(format!("session state does not belong to a {} driver", kind))
}

impl SensorDriver for Driver {
    type State = DriverState;

    fn kind(&self) -> SensorKind {
        match self {
            Driver::Huey(d) => d.kind(),
            Driver::Dtp94(d) => d.kind(),
            Driver::ColorHug(d) => d.kind(),
            Driver::Spark(d) => d.kind(),
            Driver::Dummy(d) => d.kind(),
        }
    }

    fn caps(&self) -> SensorCaps {
        match self {
            Driver::Huey(d) => d.caps(),
            Driver::Dtp94(d) => d.caps(),
            Driver::ColorHug(d) => d.caps(),
            Driver::Spark(d) => d.caps(),
            Driver::Dummy(d) => d.caps(),
        }
    }

    async fn lock(&self, info: &SensorInfo, cancel: &Cancellable) -> Result<Session<DriverState>> {
        match self {
            Driver::Huey(d) => Ok(d.lock(info, cancel).await?.map(DriverState::Huey)),
            Driver::Dtp94(d) => Ok(d.lock(info, cancel).await?.map(DriverState::Dtp94)),
            Driver::ColorHug(d) => Ok(d.lock(info, cancel).await?.map(DriverState::ColorHug)),
            Driver::Spark(d) => Ok(d.lock(info, cancel).await?.map(DriverState::Spark)),
            Driver::Dummy(d) => Ok(d.lock(info, cancel).await?.map(DriverState::Dummy)),
        }
    }

    async fn get_sample(
        &self,
        state: &mut DriverState,
        cap: SensorCap,
        cancel: &Cancellable,
    ) -> Result<ColorXyz> {
        match (self, state) {
            (Driver::Huey(d), DriverState::Huey(s)) => d.get_sample(s, cap, cancel).await,
            (Driver::Dtp94(d), DriverState::Dtp94(s)) => d.get_sample(s, cap, cancel).await,
            (Driver::ColorHug(d), DriverState::ColorHug(s)) => d.get_sample(s, cap, cancel).await,
            (Driver::Spark(d), DriverState::Spark(s)) => d.get_sample(s, cap, cancel).await,
            (Driver::Dummy(d), DriverState::Dummy(s)) => d.get_sample(s, cap, cancel).await,
            _ => Err(state_mismatch(self.kind())),
        }
    }

    async fn set_option(
        &self,
        state: &mut DriverState,
        key: &str,
        value: &OptionValue,
        cancel: &Cancellable,
    ) -> Result<()> {
        match (self, state) {
            (Driver::Huey(d), DriverState::Huey(s)) => d.set_option(s, key, value, cancel).await,
            (Driver::Dtp94(d), DriverState::Dtp94(s)) => d.set_option(s, key, value, cancel).await,
            (Driver::ColorHug(d), DriverState::ColorHug(s)) => {
                d.set_option(s, key, value, cancel).await
            }
            (Driver::Spark(d), DriverState::Spark(s)) => d.set_option(s, key, value, cancel).await,
            (Driver::Dummy(d), DriverState::Dummy(s)) => d.set_option(s, key, value, cancel).await,
            _ => Err(state_mismatch(self.kind())),
        }
    }

    async fn options_applied(&self, state: &mut DriverState, cancel: &Cancellable) -> Result<()> {
        match (self, state) {
            (Driver::Huey(d), DriverState::Huey(s)) => d.options_applied(s, cancel).await,
            (Driver::Dtp94(d), DriverState::Dtp94(s)) => d.options_applied(s, cancel).await,
            (Driver::ColorHug(d), DriverState::ColorHug(s)) => d.options_applied(s, cancel).await,
            (Driver::Spark(d), DriverState::Spark(s)) => d.options_applied(s, cancel).await,
            (Driver::Dummy(d), DriverState::Dummy(s)) => d.options_applied(s, cancel).await,
            _ => Err(state_mismatch(self.kind())),
        }
    }

    async fn unlock(&self, state: DriverState) -> Result<()> {
        match (self, state) {
            (Driver::Huey(d), DriverState::Huey(s)) => d.unlock(s).await,
            (Driver::Dtp94(d), DriverState::Dtp94(s)) => d.unlock(s).await,
            (Driver::ColorHug(d), DriverState::ColorHug(s)) => d.unlock(s).await,
            (Driver::Spark(d), DriverState::Spark(s)) => d.unlock(s).await,
            (Driver::Dummy(d), DriverState::Dummy(s)) => d.unlock(s).await,
            _ => Err(state_mismatch(self.kind())),
        }
    }

    async fn dump(&self, state: &mut DriverState, cancel: &Cancellable) -> Result<String> {
        match (self, state) {
            (Driver::Huey(d), DriverState::Huey(s)) => d.dump(s, cancel).await,
            (Driver::Dtp94(d), DriverState::Dtp94(s)) => d.dump(s, cancel).await,
            (Driver::ColorHug(d), DriverState::ColorHug(s)) => d.dump(s, cancel).await,
            (Driver::Spark(d), DriverState::Spark(s)) => d.dump(s, cancel).await,
            (Driver::Dummy(d), DriverState::Dummy(s)) => d.dump(s, cancel).await,
            _ => Err(state_mismatch(self.kind())),
        }
    }
}
