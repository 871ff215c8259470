//! Configuration loading and defaults

use anyhow::Result;
use chroma_sensors::colorhug::ColorHugConfig;
use chroma_sensors::dtp94::Dtp94Config;
use chroma_sensors::huey::HueyConfig;
use chroma_sensors::spark::SparkConfig;
use chroma_sensors::{DriverConfig, OptionValue, SensorOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub sensors: SensorsConfig,
    #[serde(default)]
    pub huey: HueyConfig,
    #[serde(default)]
    pub dtp94: Dtp94Config,
    #[serde(default)]
    pub colorhug: ColorHugConfig,
    #[serde(default)]
    pub spark: SparkConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Coldplug re-enumeration period in seconds, 0 disables
    #[serde(default = "default_rescan_interval")]
    pub rescan_interval_secs: u64,
    /// Capacity of the service event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            rescan_interval_secs: default_rescan_interval(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_rescan_interval() -> u64 {
    5
}

fn default_event_buffer() -> usize {
    100
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorsConfig {
    /// Register the software sensor
    #[serde(default)]
    pub enable_dummy: bool,
    #[serde(default = "default_dummy_delay")]
    pub dummy_delay_ms: u64,
    /// Applied after lock, in order
    #[serde(default)]
    pub options: Vec<OptionEntry>,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            enable_dummy: false,
            dummy_delay_ms: default_dummy_delay(),
            options: Vec::new(),
        }
    }
}

fn default_dummy_delay() -> u64 {
    2000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionEntry {
    pub key: String,
    pub value: OptionValue,
}

impl Config {
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            huey: self.huey.clone(),
            dtp94: self.dtp94.clone(),
            colorhug: self.colorhug.clone(),
            spark: self.spark.clone(),
        }
    }

    pub fn sensor_options(&self) -> SensorOptions {
        self.sensors
            .options
            .iter()
            .map(|o| (o.key.clone(), o.value.clone()))
            .collect()
    }

    pub fn dummy_delay(&self) -> Duration {
        Duration::from_millis(self.sensors.dummy_delay_ms)
    }
}

/// Load configuration from file, falling back to defaults when it is missing
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let config = Config::default();
    let content = toml::to_string_pretty(&config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.daemon.rescan_interval_secs, 5);
        assert_eq!(config.huey.post_scale, 3.428);
        assert_eq!(config.spark.calibration_dir, PathBuf::from("/var/lib/chroma"));
        assert!(!config.sensors.enable_dummy);
    }

    #[test]
    fn test_partial_sections_and_options() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chromad.toml");
        std::fs::write(
            &path,
            r#"
[logging]
level = "debug"

[sensors]
enable_dummy = true

[[sensors.options]]
key = "sample[red]"
value = 0.5

[[sensors.options]]
key = "remote-profile-hash"
value = "0123456789abcdef0123456789abcdef01234567"

[huey]
pulse_factor = 3.1

[spark]
calibration_dir = "/tmp/chroma"
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(config.sensors.enable_dummy);
        assert_eq!(config.sensors.dummy_delay_ms, 2000);
        assert_eq!(config.huey.pulse_factor, 3.1);
        assert_eq!(config.huey.timeout_ms, 50000);
        assert_eq!(config.spark.timeout_ms, 50000);

        let options = config.sensor_options();
        let keys: Vec<&str> = options.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["sample[red]", "remote-profile-hash"]);
        assert_eq!(options.get("sample[red]"), Some(&OptionValue::Double(0.5)));
        assert_eq!(
            config.driver_config().spark.calibration_dir,
            PathBuf::from("/tmp/chroma")
        );
    }

    #[test]
    fn test_default_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chromad.toml");
        save_default_config(&path).unwrap();
        assert_eq!(load_config(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chromad.toml");
        std::fs::write(&path, "[daemon\nrescan_interval_secs = ").unwrap();
        assert!(load_config(&path).is_err());
    }
}
