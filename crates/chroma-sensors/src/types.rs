//! Sensor identity, kind, state and capability types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier for a sensor, derived from its USB location
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SensorId(pub String);

impl SensorId {
    pub fn from_usb(kind: SensorKind, bus: u8, address: u8) -> Self {
        Self(format!("{}-{:03}-{:03}", kind, bus, address))
    }

    /// Id for sensors with no physical location
    pub fn virtual_sensor(kind: SensorKind) -> Self {
        Self(format!("{}-{}", kind, Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Huey,
    Dtp94,
    #[serde(rename = "colorhug")]
    ColorHug,
    #[serde(rename = "colorhug2")]
    ColorHug2,
    Spark,
    Dummy,
    Unknown,
}

impl SensorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Huey => "huey",
            SensorKind::Dtp94 => "dtp94",
            SensorKind::ColorHug => "colorhug",
            SensorKind::ColorHug2 => "colorhug2",
            SensorKind::Spark => "spark",
            SensorKind::Dummy => "dummy",
            SensorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "huey" => SensorKind::Huey,
            "dtp94" => SensorKind::Dtp94,
            "colorhug" => SensorKind::ColorHug,
            "colorhug2" => SensorKind::ColorHug2,
            "spark" => SensorKind::Spark,
            "dummy" => SensorKind::Dummy,
            "unknown" => SensorKind::Unknown,
            other => return Err(format!("unknown sensor kind '{}'", other)),
        })
    }
}

/// Activity of a sensor; whether it is locked is tracked separately
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorState {
    #[default]
    Idle,
    Starting,
    Measuring,
    Busy,
}

impl fmt::Display for SensorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SensorState::Idle => "idle",
            SensorState::Starting => "starting",
            SensorState::Measuring => "measuring",
            SensorState::Busy => "busy",
        };
        f.write_str(s)
    }
}

/// A single measurement mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorCap {
    Lcd,
    Crt,
    Projector,
    Plasma,
    Printer,
    Spot,
    Ambient,
    Calibration,
}

impl SensorCap {
    pub const ALL: [SensorCap; 8] = [
        SensorCap::Lcd,
        SensorCap::Crt,
        SensorCap::Projector,
        SensorCap::Plasma,
        SensorCap::Printer,
        SensorCap::Spot,
        SensorCap::Ambient,
        SensorCap::Calibration,
    ];

    fn bit(self) -> u32 {
        1 << (self as u32)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorCap::Lcd => "lcd",
            SensorCap::Crt => "crt",
            SensorCap::Projector => "projector",
            SensorCap::Plasma => "plasma",
            SensorCap::Printer => "printer",
            SensorCap::Spot => "spot",
            SensorCap::Ambient => "ambient",
            SensorCap::Calibration => "calibration",
        }
    }
}

impl fmt::Display for SensorCap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorCap {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SensorCap::ALL
            .iter()
            .copied()
            .find(|cap| cap.as_str() == s)
            .ok_or_else(|| format!("unknown capability '{}'", s))
    }
}

/// Set of capabilities, fixed per device kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SensorCaps(u32);

impl SensorCaps {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn from_caps(caps: &[SensorCap]) -> Self {
        let mut set = Self::empty();
        for cap in caps {
            set.insert(*cap);
        }
        set
    }

    pub fn insert(&mut self, cap: SensorCap) {
        self.0 |= cap.bit();
    }

    pub fn contains(&self, cap: SensorCap) -> bool {
        self.0 & cap.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = SensorCap> + '_ {
        SensorCap::ALL.into_iter().filter(move |cap| self.contains(*cap))
    }
}

impl fmt::Display for SensorCaps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|c| c.as_str()).collect();
        f.write_str(&names.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in [
            SensorKind::Huey,
            SensorKind::Dtp94,
            SensorKind::ColorHug,
            SensorKind::ColorHug2,
            SensorKind::Spark,
            SensorKind::Dummy,
        ] {
            assert_eq!(kind.to_string().parse::<SensorKind>().unwrap(), kind);
        }
        assert!("munki".parse::<SensorKind>().is_err());
        assert_eq!(serde_json::to_string(&SensorKind::ColorHug2).unwrap(), "\"colorhug2\"");
    }

    #[test]
    fn test_caps_set_operations() {
        let caps = SensorCaps::from_caps(&[SensorCap::Lcd, SensorCap::Ambient]);
        assert!(caps.contains(SensorCap::Lcd));
        assert!(caps.contains(SensorCap::Ambient));
        assert!(!caps.contains(SensorCap::Crt));
        assert_eq!(caps.to_string(), "lcd,ambient");
        assert!(SensorCaps::empty().is_empty());
    }

    #[test]
    fn test_cap_parse() {
        assert_eq!("projector".parse::<SensorCap>().unwrap(), SensorCap::Projector);
        assert!("LCD".parse::<SensorCap>().is_err());
    }

    #[test]
    fn test_usb_id_format() {
        let id = SensorId::from_usb(SensorKind::Huey, 1, 12);
        assert_eq!(id.as_str(), "huey-001-012");
        assert!(SensorId::virtual_sensor(SensorKind::Dummy).as_str().starts_with("dummy-"));
    }
}
