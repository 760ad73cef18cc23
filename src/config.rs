//! Daemon configuration.
//!
//! Loaded from a TOML file, overridden by `VIGIL_*` environment variables,
//! then validated. Every knob has a default so an empty file (or no file at
//! all) yields a runnable stub configuration.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const DEFAULT_SOURCE_URL: &str = "stub://front_camera";
const DEFAULT_SOURCE_FPS: u32 = 10;
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_HEALTH_CHECK_SECS: u64 = 30;
const DEFAULT_DETECTION_INTERVAL_SECS: u64 = 1;
const DEFAULT_MOTION_COOLDOWN_SECS: u64 = 5;
const DEFAULT_MIN_MOTION_PERCENTAGE: f32 = 2.0;
const DEFAULT_MOTION_SENSITIVITY: u8 = 25;
const DEFAULT_MIN_REGION_AREA: usize = 500;
const DEFAULT_PRESENCE_COOLDOWN_SECS: u64 = 10;
const DEFAULT_DUPLICATE_THRESHOLD_SECS: u64 = 5;
const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:8970";

#[derive(Debug, Deserialize, Default)]
struct VigildConfigFile {
    source: Option<SourceConfigFile>,
    detection: Option<DetectionConfigFile>,
    motion: Option<MotionConfigFile>,
    presence: Option<PresenceConfigFile>,
    alerts: Option<AlertConfigFile>,
    control: Option<ControlConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    max_reconnect_attempts: Option<u32>,
    health_check_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    enabled: Option<bool>,
    interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct MotionConfigFile {
    enabled: Option<bool>,
    cooldown_secs: Option<u64>,
    min_percentage: Option<f32>,
    sensitivity: Option<u8>,
    min_region_area: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct PresenceConfigFile {
    enabled: Option<bool>,
    cooldown_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    duplicate_threshold_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ControlConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VigildConfig {
    pub source: SourceSettings,
    pub detection: DetectionSettings,
    pub motion: MotionSettings,
    pub presence: PresenceSettings,
    pub alerts: AlertSettings,
    pub control: ControlSettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub max_reconnect_attempts: u32,
    pub health_check_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    /// Initial value; mutable at runtime through the control surface.
    pub enabled: bool,
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct MotionSettings {
    pub enabled: bool,
    pub cooldown: Duration,
    pub min_percentage: f32,
    pub sensitivity: u8,
    pub min_region_area: usize,
}

#[derive(Debug, Clone)]
pub struct PresenceSettings {
    pub enabled: bool,
    pub cooldown: Duration,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub duplicate_threshold: Duration,
}

#[derive(Debug, Clone)]
pub struct ControlSettings {
    pub addr: String,
}

impl VigildConfig {
    /// Load from the file named by `VIGIL_CONFIG` (defaults apply when the
    /// variable is unset), then apply env overrides and validate.
    pub fn load() -> Result<Self> {
        match std::env::var("VIGIL_CONFIG").ok() {
            Some(path) => Self::load_from(Path::new(&path)),
            None => {
                let mut cfg = Self::from_file(VigildConfigFile::default());
                cfg.apply_env()?;
                cfg.validate()?;
                Ok(cfg)
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let file_cfg = read_config_file(path)?;
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: VigildConfigFile) -> Self {
        let source = file.source.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let motion = file.motion.unwrap_or_default();
        let presence = file.presence.unwrap_or_default();
        let alerts = file.alerts.unwrap_or_default();
        let control = file.control.unwrap_or_default();

        Self {
            source: SourceSettings {
                url: source
                    .url
                    .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                fps: source.fps.unwrap_or(DEFAULT_SOURCE_FPS),
                width: source.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
                height: source.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
                max_reconnect_attempts: source
                    .max_reconnect_attempts
                    .unwrap_or(DEFAULT_MAX_RECONNECT_ATTEMPTS),
                health_check_interval: Duration::from_secs(
                    source
                        .health_check_interval_secs
                        .unwrap_or(DEFAULT_HEALTH_CHECK_SECS),
                ),
            },
            detection: DetectionSettings {
                enabled: detection.enabled.unwrap_or(true),
                interval: Duration::from_secs(
                    detection
                        .interval_secs
                        .unwrap_or(DEFAULT_DETECTION_INTERVAL_SECS),
                ),
            },
            motion: MotionSettings {
                enabled: motion.enabled.unwrap_or(true),
                cooldown: Duration::from_secs(
                    motion.cooldown_secs.unwrap_or(DEFAULT_MOTION_COOLDOWN_SECS),
                ),
                min_percentage: motion
                    .min_percentage
                    .unwrap_or(DEFAULT_MIN_MOTION_PERCENTAGE),
                sensitivity: motion.sensitivity.unwrap_or(DEFAULT_MOTION_SENSITIVITY),
                min_region_area: motion.min_region_area.unwrap_or(DEFAULT_MIN_REGION_AREA),
            },
            presence: PresenceSettings {
                enabled: presence.enabled.unwrap_or(false),
                cooldown: Duration::from_secs(
                    presence
                        .cooldown_secs
                        .unwrap_or(DEFAULT_PRESENCE_COOLDOWN_SECS),
                ),
            },
            alerts: AlertSettings {
                duplicate_threshold: Duration::from_secs(
                    alerts
                        .duplicate_threshold_secs
                        .unwrap_or(DEFAULT_DUPLICATE_THRESHOLD_SECS),
                ),
            },
            control: ControlSettings {
                addr: control
                    .addr
                    .unwrap_or_else(|| DEFAULT_CONTROL_ADDR.to_string()),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("VIGIL_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(addr) = std::env::var("VIGIL_CONTROL_ADDR") {
            if !addr.trim().is_empty() {
                self.control.addr = addr;
            }
        }
        if let Ok(enabled) = std::env::var("VIGIL_DETECTION_ENABLED") {
            self.detection.enabled = match enabled.trim() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(anyhow!(
                        "VIGIL_DETECTION_ENABLED must be a boolean, got '{}'",
                        other
                    ))
                }
            };
        }
        if let Ok(attempts) = std::env::var("VIGIL_MAX_RECONNECT_ATTEMPTS") {
            self.source.max_reconnect_attempts = attempts
                .parse()
                .map_err(|_| anyhow!("VIGIL_MAX_RECONNECT_ATTEMPTS must be an integer"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source dimensions must be nonzero"));
        }
        if self.source.max_reconnect_attempts == 0 {
            return Err(anyhow!("max_reconnect_attempts must be at least 1"));
        }
        if self.detection.interval.is_zero() {
            return Err(anyhow!("detection interval must be greater than zero"));
        }
        if !(0.0..=100.0).contains(&self.motion.min_percentage) {
            return Err(anyhow!("min_motion_percentage must be within 0..=100"));
        }
        if self.alerts.duplicate_threshold.is_zero() {
            return Err(anyhow!("duplicate_threshold_secs must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<VigildConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = VigildConfig::from_file(VigildConfigFile::default());
        assert_eq!(cfg.source.url, "stub://front_camera");
        assert_eq!(cfg.source.max_reconnect_attempts, 5);
        assert_eq!(cfg.source.health_check_interval, Duration::from_secs(30));
        assert_eq!(cfg.detection.interval, Duration::from_secs(1));
        assert!(cfg.detection.enabled);
        assert!(cfg.motion.enabled);
        assert_eq!(cfg.motion.cooldown, Duration::from_secs(5));
        assert_eq!(cfg.motion.min_percentage, 2.0);
        assert_eq!(cfg.motion.sensitivity, 25);
        assert_eq!(cfg.motion.min_region_area, 500);
        assert!(!cfg.presence.enabled);
        assert_eq!(cfg.alerts.duplicate_threshold, Duration::from_secs(5));
        assert_eq!(cfg.control.addr, "127.0.0.1:8970");
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[source]
url = "rtsp://camera.local:554/1"
max_reconnect_attempts = 3

[detection]
interval_secs = 2

[motion]
min_percentage = 5.0

[alerts]
duplicate_threshold_secs = 8
"#
        )
        .unwrap();

        let cfg = VigildConfig::load_from(file.path()).unwrap();
        assert_eq!(cfg.source.url, "rtsp://camera.local:554/1");
        assert_eq!(cfg.source.max_reconnect_attempts, 3);
        assert_eq!(cfg.detection.interval, Duration::from_secs(2));
        assert_eq!(cfg.motion.min_percentage, 5.0);
        assert_eq!(cfg.alerts.duplicate_threshold, Duration::from_secs(8));
        // Untouched sections keep their defaults.
        assert_eq!(cfg.source.fps, 10);
        assert!(cfg.motion.enabled);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[detection]\ninterval_secs = 0").unwrap();
        assert!(VigildConfig::load_from(file.path()).is_err());
    }

    #[test]
    fn out_of_range_percentage_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[motion]\nmin_percentage = 250.0").unwrap();
        assert!(VigildConfig::load_from(file.path()).is_err());
    }

    #[test]
    fn malformed_toml_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "source = not valid toml").unwrap();
        assert!(VigildConfig::load_from(file.path()).is_err());
    }
}
