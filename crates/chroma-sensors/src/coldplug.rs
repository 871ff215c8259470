//! Static table of supported USB devices and enumeration against it

use chroma_usb::{UsbContext, UsbDeviceInfo};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::colorhug::{
    ColorHugConfig, ColorHugDriver, COLORHUG2_PID, COLORHUG_LEGACY_PID, COLORHUG_LEGACY_VID,
    COLORHUG_PID, COLORHUG_VID,
};
use crate::driver::{Driver, SensorInfo};
use crate::dtp94::{Dtp94Config, Dtp94Driver, DTP94_PID, DTP94_VID};
use crate::dummy::DummyDriver;
use crate::error::Result;
use crate::huey::{HueyConfig, HueyDriver, HueyModel, HUEY2_PID, HUEY2_VID, HUEY_PID, HUEY_VID};
use crate::sensor::Sensor;
use crate::spark::{SparkConfig, SparkDriver, SPARK_PID, SPARK_VID};
use crate::types::{SensorId, SensorKind};

/// Per-family driver settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub huey: HueyConfig,
    pub dtp94: Dtp94Config,
    pub colorhug: ColorHugConfig,
    pub spark: SparkConfig,
}

/// One row of the coldplug table
pub struct SupportedDevice {
    pub vid: u16,
    pub pid: u16,
    pub kind: SensorKind,
    pub vendor: &'static str,
    pub model: &'static str,
    pub build: fn(&DriverConfig) -> Driver,
}

pub const SUPPORTED_DEVICES: &[SupportedDevice] = &[
    SupportedDevice {
        vid: HUEY_VID,
        pid: HUEY_PID,
        kind: SensorKind::Huey,
        vendor: "X-Rite",
        model: "Huey",
        build: |c| Driver::Huey(HueyDriver::new(HueyModel::Classic, c.huey.clone())),
    },
    SupportedDevice {
        vid: HUEY2_VID,
        pid: HUEY2_PID,
        kind: SensorKind::Huey,
        vendor: "X-Rite",
        model: "Huey2",
        build: |c| Driver::Huey(HueyDriver::new(HueyModel::Huey2, c.huey.clone())),
    },
    SupportedDevice {
        vid: DTP94_VID,
        pid: DTP94_PID,
        kind: SensorKind::Dtp94,
        vendor: "X-Rite",
        model: "DTP94",
        build: |c| Driver::Dtp94(Dtp94Driver::new(c.dtp94.clone())),
    },
    SupportedDevice {
        vid: COLORHUG_LEGACY_VID,
        pid: COLORHUG_LEGACY_PID,
        kind: SensorKind::ColorHug,
        vendor: "Hughski Ltd.",
        model: "ColorHug",
        build: |c| Driver::ColorHug(ColorHugDriver::new(SensorKind::ColorHug, c.colorhug.clone())),
    },
    SupportedDevice {
        vid: COLORHUG_VID,
        pid: COLORHUG_PID,
        kind: SensorKind::ColorHug,
        vendor: "Hughski Ltd.",
        model: "ColorHug",
        build: |c| Driver::ColorHug(ColorHugDriver::new(SensorKind::ColorHug, c.colorhug.clone())),
    },
    SupportedDevice {
        vid: COLORHUG_VID,
        pid: COLORHUG2_PID,
        kind: SensorKind::ColorHug2,
        vendor: "Hughski Ltd.",
        model: "ColorHug2",
        build: |c| Driver::ColorHug(ColorHugDriver::new(SensorKind::ColorHug2, c.colorhug.clone())),
    },
    SupportedDevice {
        vid: SPARK_VID,
        pid: SPARK_PID,
        kind: SensorKind::Spark,
        vendor: "Ocean Optics",
        model: "Spark",
        build: |c| Driver::Spark(SparkDriver::new(c.spark.clone())),
    },
];

pub fn lookup(vid: u16, pid: u16) -> Option<&'static SupportedDevice> {
    SUPPORTED_DEVICES.iter().find(|d| d.vid == vid && d.pid == pid)
}

fn sensor_for(
    usb: &Arc<dyn UsbContext>,
    dev: &UsbDeviceInfo,
    entry: &SupportedDevice,
    config: &DriverConfig,
) -> Sensor<Driver> {
    let info = SensorInfo {
        id: SensorId::from_usb(entry.kind, dev.bus, dev.address),
        kind: entry.kind,
        model: entry.model.to_string(),
        vendor: entry.vendor.to_string(),
        vid: dev.vid,
        pid: dev.pid,
        native: true,
        usb: Some(usb.clone()),
    };
    Sensor::new(info, (entry.build)(config))
}

/// Build a sensor for every attached device found in the table
pub fn enumerate(usb: Arc<dyn UsbContext>, config: &DriverConfig) -> Result<Vec<Sensor<Driver>>> {
    let devices = usb.devices()?;
    let mut sensors = Vec::new();
    for dev in &devices {
        match lookup(dev.vid, dev.pid) {
            Some(entry) => {
                info!(device = %dev, kind = %entry.kind, model = entry.model, "found sensor");
                sensors.push(sensor_for(&usb, dev, entry, config));
            }
            None => debug!(device = %dev, "ignoring unsupported device"),
        }
    }
    Ok(sensors)
}

/// The software sensor, registered on request
pub fn dummy_sensor(delay: Duration) -> Sensor<Driver> {
    Sensor::new(DummyDriver::info(), Driver::Dummy(DummyDriver::with_delay(delay)))
}
