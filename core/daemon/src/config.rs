//! Runtime configuration for attendance-daemon.
//!
//! Loaded once at startup from TOML and shared read-only behind an `Arc`.
//! Every field carries a serde default so a missing file means defaults.

use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;
use std::path::PathBuf;

const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".attendance/daemon/config.toml";
pub const CONFIG_PATH_ENV: &str = "ATTENDANCE_CONFIG";

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GeofenceConfig {
    #[serde(default = "default_office_latitude")]
    pub office_latitude: f64,
    #[serde(default = "default_office_longitude")]
    pub office_longitude: f64,
    #[serde(default = "default_radius_meters")]
    pub radius_meters: f64,
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            office_latitude: default_office_latitude(),
            office_longitude: default_office_longitude(),
            radius_meters: default_radius_meters(),
        }
    }
}

impl GeofenceConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !attendance_daemon_protocol::valid_coordinates(
            self.office_latitude,
            self.office_longitude,
        ) {
            return Err(format!(
                "office coordinates out of range: ({}, {})",
                self.office_latitude, self.office_longitude
            ));
        }
        if !self.radius_meters.is_finite() || self.radius_meters <= 0.0 {
            return Err(format!(
                "radius_meters must be positive, got {}",
                self.radius_meters
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SessionsConfig {
    #[serde(default = "default_target_hours")]
    pub target_hours: f64,
    #[serde(default = "default_review_ceiling_hours")]
    pub review_ceiling_hours: f64,
    #[serde(default = "default_true")]
    pub require_daily_progress: bool,
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            target_hours: default_target_hours(),
            review_ceiling_hours: default_review_ceiling_hours(),
            require_daily_progress: true,
            utc_offset_minutes: default_utc_offset_minutes(),
        }
    }
}

impl SessionsConfig {
    /// Offset of the local calendar that defines "today" and midnight.
    /// Offsets beyond a day fall back to UTC.
    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BroadcastConfig {
    #[serde(default = "default_subscriber_queue_capacity")]
    pub subscriber_queue_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_queue_capacity: default_subscriber_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_notification_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_ms: default_notification_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct DaemonConfig {
    #[serde(default)]
    pub geofence: GeofenceConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

pub fn default_config_path() -> Result<PathBuf, String> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

pub fn load_config(path: Option<PathBuf>) -> Result<DaemonConfig, String> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(DaemonConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|err| {
        format!(
            "Failed to read daemon config {}: {}",
            config_path.display(),
            err
        )
    })?;
    toml::from_str::<DaemonConfig>(&content).map_err(|err| {
        format!(
            "Failed to parse daemon config {}: {}",
            config_path.display(),
            err
        )
    })
}

fn default_office_latitude() -> f64 {
    19.160122
}

fn default_office_longitude() -> f64 {
    72.839720
}

fn default_radius_meters() -> f64 {
    2000.0
}

fn default_target_hours() -> f64 {
    8.0
}

fn default_review_ceiling_hours() -> f64 {
    8.0
}

fn default_true() -> bool {
    true
}

fn default_utc_offset_minutes() -> i32 {
    330
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_lock_timeout_ms() -> u64 {
    2000
}

fn default_subscriber_queue_capacity() -> usize {
    64
}

fn default_notification_timeout_ms() -> u64 {
    3000
}
