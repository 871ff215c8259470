//! Sensor registry, measurement tasks and event fan-out

use anyhow::{anyhow, Result};
use chroma_core::ColorXyz;
use chroma_sensors::{
    coldplug, Cancellable, Driver, Sensor, SensorCap, SensorError, SensorEvent, SensorId,
    SensorKind, SensorOptions, SensorState,
};
use chroma_usb::UsbContext;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;

pub type SharedSensor = Arc<Mutex<Sensor<Driver>>>;

/// Registry entry; `native` is readable while a task holds the sensor
struct Registered {
    sensor: SharedSensor,
    native: bool,
}

/// Event published to service subscribers
#[derive(Debug, Clone, Serialize)]
pub struct ServiceEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: ServiceEventKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServiceEventKind {
    SensorAdded {
        sensor: SensorId,
        kind: SensorKind,
        model: String,
    },
    SensorRemoved {
        sensor: SensorId,
    },
    Sensor(SensorEvent),
    ScanCompleted {
        found: usize,
        total: usize,
    },
}

/// Point-in-time view of a registered sensor
#[derive(Debug, Clone, Serialize)]
pub struct SensorSummary {
    pub id: SensorId,
    pub kind: SensorKind,
    pub model: String,
    pub vendor: String,
    pub serial: Option<String>,
    pub caps: String,
    pub native: bool,
    pub locked: bool,
    pub state: SensorState,
}

pub struct SensorService {
    config: Config,
    usb: Option<Arc<dyn UsbContext>>,
    sensors: Arc<RwLock<HashMap<SensorId, Registered>>>,
    /// Tokens of in-flight measurements
    active: Arc<RwLock<HashMap<SensorId, Cancellable>>>,
    event_tx: broadcast::Sender<ServiceEvent>,
}

fn event(kind: ServiceEventKind) -> ServiceEvent {
    ServiceEvent {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        kind,
    }
}

impl SensorService {
    pub fn new(config: Config, usb: Option<Arc<dyn UsbContext>>) -> Self {
        let (event_tx, _) = broadcast::channel(config.daemon.event_buffer.max(1));
        Self {
            config,
            usb,
            sensors: Arc::new(RwLock::new(HashMap::new())),
            active: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.event_tx.subscribe()
    }

    fn send_event(&self, kind: ServiceEventKind) {
        let _ = self.event_tx.send(event(kind));
    }

    /// Add a sensor and forward its lifecycle events
    pub async fn register(&self, sensor: Sensor<Driver>) -> SensorId {
        let id = sensor.id().clone();
        let kind = sensor.kind();
        let model = sensor.model().to_string();
        let native = sensor.native();

        let mut rx = sensor.subscribe();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => {
                        let _ = event_tx.send(event(ServiceEventKind::Sensor(ev)));
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("sensor event forwarder skipped {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.sensors.write().await.insert(
            id.clone(),
            Registered {
                sensor: Arc::new(Mutex::new(sensor)),
                native,
            },
        );
        info!(id = %id, kind = %kind, "Registered sensor");
        self.send_event(ServiceEventKind::SensorAdded {
            sensor: id.clone(),
            kind,
            model,
        });
        id
    }

    /// Register the software sensor when enabled in the configuration
    pub async fn register_dummy(&self) -> Option<SensorId> {
        if !self.config.sensors.enable_dummy {
            return None;
        }
        Some(
            self.register(coldplug::dummy_sensor(self.config.dummy_delay()))
                .await,
        )
    }

    /// Re-enumerate USB, adding new sensors and dropping unplugged ones
    pub async fn rescan(&self) -> Result<usize> {
        let Some(usb) = self.usb.clone() else {
            return Ok(0);
        };

        let found = coldplug::enumerate(usb, &self.config.driver_config())?;
        let seen: Vec<SensorId> = found.iter().map(|s| s.id().clone()).collect();
        let count = found.len();

        for sensor in found {
            let known = self.sensors.read().await.contains_key(sensor.id());
            if !known {
                self.register(sensor).await;
            }
        }

        let mut gone = Vec::new();
        for (id, entry) in self.sensors.read().await.iter() {
            if entry.native && !seen.contains(id) {
                gone.push(id.clone());
            }
        }
        if !gone.is_empty() {
            let mut sensors = self.sensors.write().await;
            for id in gone {
                sensors.remove(&id);
                info!(id = %id, "Sensor removed");
                self.send_event(ServiceEventKind::SensorRemoved { sensor: id });
            }
        }

        let total = self.sensors.read().await.len();
        self.send_event(ServiceEventKind::ScanCompleted {
            found: count,
            total,
        });
        Ok(count)
    }

    pub async fn get(&self, id: &SensorId) -> Option<SharedSensor> {
        self.sensors
            .read()
            .await
            .get(id)
            .map(|entry| entry.sensor.clone())
    }

    pub async fn sensor_ids(&self) -> Vec<SensorId> {
        let mut ids: Vec<SensorId> = self.sensors.read().await.keys().cloned().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    pub async fn sensors(&self) -> Vec<SensorSummary> {
        let mut out = Vec::new();
        for id in self.sensor_ids().await {
            let Some(shared) = self.get(&id).await else {
                continue;
            };
            let sensor = shared.lock().await;
            out.push(SensorSummary {
                id,
                kind: sensor.kind(),
                model: sensor.model().to_string(),
                vendor: sensor.vendor().to_string(),
                serial: sensor.serial().map(str::to_string),
                caps: sensor.caps().to_string(),
                native: sensor.native(),
                locked: sensor.is_locked(),
                state: sensor.state(),
            });
        }
        out
    }

    /// Start a measurement task
    ///
    /// The sensor is locked for the duration unless it already was, the
    /// configured options are applied, one sample is taken and the sensor
    /// is released again.
    pub async fn measure(
        &self,
        id: &SensorId,
        cap: SensorCap,
    ) -> Result<JoinHandle<Result<ColorXyz, SensorError>>> {
        let shared = self
            .get(id)
            .await
            .ok_or_else(|| anyhow!("no sensor with id {}", id))?;

        let cancel = Cancellable::new();
        {
            let mut active = self.active.write().await;
            if active.contains_key(id) {
                return Err(anyhow!("measurement already in progress on {}", id));
            }
            active.insert(id.clone(), cancel.clone());
        }

        let options = self.config.sensor_options();
        let active = self.active.clone();
        let id = id.clone();
        Ok(tokio::spawn(async move {
            let result = {
                let mut sensor = shared.lock().await;
                measure_sensor(&mut sensor, cap, &options, &cancel).await
            };
            active.write().await.remove(&id);
            match &result {
                Ok(xyz) => info!(id = %id, cap = %cap, %xyz, "Measurement complete"),
                Err(e) => error!(id = %id, cap = %cap, "Measurement failed: {}", e),
            }
            result
        }))
    }

    /// Cancel an in-flight measurement, returns whether one was running
    pub async fn cancel(&self, id: &SensorId) -> bool {
        match self.active.read().await.get(id) {
            Some(cancel) => {
                cancel.cancel();
                info!(id = %id, "Cancelled measurement");
                true
            }
            None => false,
        }
    }

    /// Lock, dump and unlock
    pub async fn dump(&self, id: &SensorId) -> Result<String> {
        let shared = self
            .get(id)
            .await
            .ok_or_else(|| anyhow!("no sensor with id {}", id))?;
        let mut sensor = shared.lock().await;
        let cancel = Cancellable::new();

        let was_locked = sensor.is_locked();
        if !was_locked {
            sensor.lock(&cancel).await?;
        }
        let result = sensor.dump(&cancel).await;
        if !was_locked {
            if let Err(e) = sensor.unlock().await {
                warn!(id = %id, "Failed to unlock after dump: {}", e);
            }
        }
        Ok(result?)
    }

    /// Release every locked sensor
    pub async fn shutdown(&self) {
        for (id, entry) in self.sensors.read().await.iter() {
            if let Some(cancel) = self.active.read().await.get(id) {
                cancel.cancel();
            }
            let mut sensor = entry.sensor.lock().await;
            if let Err(e) = sensor.unlock().await {
                warn!(id = %id, "Failed to unlock on shutdown: {}", e);
            }
        }
    }

    /// Rescan periodically until ctrl-c
    pub async fn run(&self) -> Result<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => match serde_json::to_string(&ev) {
                        Ok(json) => debug!(event = %json, "service event"),
                        Err(e) => warn!("Failed to encode event: {}", e),
                    },
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.register_dummy().await;
        if let Err(e) = self.rescan().await {
            warn!("Initial scan failed: {}", e);
        }

        let secs = self.config.daemon.rescan_interval_secs;
        if secs == 0 {
            info!("Periodic rescan disabled");
            tokio::signal::ctrl_c().await?;
        } else {
            let mut ticker = interval(Duration::from_secs(secs));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.rescan().await {
                            warn!("Rescan failed: {}", e);
                        }
                    }
                    res = tokio::signal::ctrl_c() => {
                        res?;
                        break;
                    }
                }
            }
        }

        info!("Shutting down");
        self.shutdown().await;
        Ok(())
    }
}

async fn measure_sensor(
    sensor: &mut Sensor<Driver>,
    cap: SensorCap,
    options: &SensorOptions,
    cancel: &Cancellable,
) -> Result<ColorXyz, SensorError> {
    let was_locked = sensor.is_locked();
    if !was_locked {
        sensor.lock(cancel).await?;
    }

    let result = async {
        if !options.is_empty() {
            sensor.set_options(options, cancel).await?;
        }
        sensor.get_sample(cap, cancel).await
    }
    .await;

    if !was_locked {
        if let Err(e) = sensor.unlock().await {
            warn!(id = %sensor.id(), "Failed to unlock after measurement: {}", e);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptionEntry;
    use chroma_sensors::dtp94::{DTP94_PID, DTP94_VID};
    use chroma_sensors::OptionValue;
    use chroma_usb::mock::{MockContext, MockDevice};

    fn dummy_config(delay_ms: u64) -> Config {
        let mut config = Config::default();
        config.sensors.enable_dummy = true;
        config.sensors.dummy_delay_ms = delay_ms;
        config
    }

    #[tokio::test]
    async fn test_measure_dummy() {
        let service = SensorService::new(dummy_config(0), None);
        let mut rx = service.subscribe();
        let id = service.register_dummy().await.unwrap();

        let xyz = service
            .measure(&id, SensorCap::Lcd)
            .await
            .unwrap()
            .await
            .unwrap()
            .unwrap();
        assert!(xyz.y > 0.0);

        // Unlocked again afterwards
        let summary = &service.sensors().await[0];
        assert!(!summary.locked);
        assert_eq!(summary.serial.as_deref(), Some("0123456789a"));
        assert_eq!(summary.caps, "lcd,crt,projector,printer,spot,ambient");

        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first.kind,
            ServiceEventKind::SensorAdded { kind: SensorKind::Dummy, .. }
        ));
    }

    #[tokio::test]
    async fn test_measure_applies_configured_options() {
        let mut config = dummy_config(0);
        config.sensors.options.push(OptionEntry {
            key: "sample[purple]".into(),
            value: OptionValue::Double(1.0),
        });
        let service = SensorService::new(config, None);
        let id = service.register_dummy().await.unwrap();

        let err = service
            .measure(&id, SensorCap::Lcd)
            .await
            .unwrap()
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, SensorError::UnsupportedOption(_)));
        assert!(!service.sensors().await[0].locked);
    }

    #[tokio::test]
    async fn test_cancel_running_measurement() {
        let service = SensorService::new(dummy_config(30_000), None);
        let id = service.register_dummy().await.unwrap();
        assert!(!service.cancel(&id).await);

        let handle = service.measure(&id, SensorCap::Lcd).await.unwrap();
        assert!(service.measure(&id, SensorCap::Lcd).await.is_err());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(service.cancel(&id).await);

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, SensorError::Cancelled(_)));
        assert!(!service.cancel(&id).await);
    }

    #[tokio::test]
    async fn test_rescan_adds_and_removes() {
        let usb: Arc<dyn UsbContext> = Arc::new(
            MockContext::new().with_device(DTP94_VID, DTP94_PID, MockDevice::new()),
        );
        let service = SensorService::new(dummy_config(0), Some(usb));
        service.register_dummy().await.unwrap();

        assert_eq!(service.rescan().await.unwrap(), 1);
        assert_eq!(service.rescan().await.unwrap(), 1);
        let kinds: Vec<SensorKind> = service.sensors().await.iter().map(|s| s.kind).collect();
        assert_eq!(kinds.len(), 2);
        assert!(kinds.contains(&SensorKind::Dtp94));

        // Swap in an empty bus; the dummy sensor survives
        let service = SensorService {
            usb: Some(Arc::new(MockContext::new())),
            ..service
        };
        let mut rx = service.subscribe();
        assert_eq!(service.rescan().await.unwrap(), 0);
        let remaining = service.sensors().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].kind, SensorKind::Dummy);
        assert!(matches!(
            rx.recv().await.unwrap().kind,
            ServiceEventKind::SensorRemoved { .. }
        ));
    }

    #[tokio::test]
    async fn test_rescan_keeps_busy_virtual_sensor() {
        let usb: Arc<dyn UsbContext> = Arc::new(MockContext::new());
        let service = SensorService::new(dummy_config(30_000), Some(usb));
        let id = service.register_dummy().await.unwrap();

        let handle = service.measure(&id, SensorCap::Lcd).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(service.get(&id).await.unwrap().try_lock().is_err());

        assert_eq!(service.rescan().await.unwrap(), 0);
        assert_eq!(service.sensor_ids().await, vec![id.clone()]);

        assert!(service.cancel(&id).await);
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, SensorError::Cancelled(_)));
        assert_eq!(service.sensors().await[0].kind, SensorKind::Dummy);
    }

    #[tokio::test]
    async fn test_dump_and_unknown_sensor() {
        let service = SensorService::new(dummy_config(0), None);
        let id = service.register_dummy().await.unwrap();
        assert_eq!(service.dump(&id).await.unwrap(), "dummy-dump-version:1\n");
        assert!(service.dump(&SensorId("nope".into())).await.is_err());
        assert!(service.measure(&SensorId("nope".into()), SensorCap::Lcd).await.is_err());
    }
}
