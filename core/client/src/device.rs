//! Device position acquisition.
//!
//! The platform location agent writes its latest fix to a JSON file; the CLI
//! polls that file until a fix fresh enough for the requested stage shows up
//! or the stage times out.

use attendance_daemon_protocol::LocationUnavailableCause;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::{Duration, Instant};

const HIGH_ACCURACY_TIMEOUT_SECS: u64 = 20;
const LOW_ACCURACY_TIMEOUT_SECS: u64 = 30;
const LOW_ACCURACY_MAX_AGE_SECS: u64 = 5 * 60;
const POLL_INTERVAL_MS: u64 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub enable_high_accuracy: bool,
    pub timeout: Duration,
    /// Oldest cached fix accepted; zero demands a fix taken after the request.
    pub maximum_age: Duration,
}

impl PositionOptions {
    pub fn high_accuracy() -> Self {
        Self {
            enable_high_accuracy: true,
            timeout: Duration::from_secs(HIGH_ACCURACY_TIMEOUT_SECS),
            maximum_age: Duration::ZERO,
        }
    }

    pub fn low_accuracy() -> Self {
        Self {
            enable_high_accuracy: false,
            timeout: Duration::from_secs(LOW_ACCURACY_TIMEOUT_SECS),
            maximum_age: Duration::from_secs(LOW_ACCURACY_MAX_AGE_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DevicePosition {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: f64,
    pub captured_at: DateTime<Utc>,
}

pub trait DeviceLocator: Send + Sync {
    fn current_position(
        &self,
        options: &PositionOptions,
    ) -> Result<DevicePosition, LocationUnavailableCause>;
}

pub struct FileDeviceLocator {
    path: PathBuf,
    poll_interval: Duration,
}

impl FileDeviceLocator {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            poll_interval: Duration::from_millis(POLL_INTERVAL_MS),
        }
    }

    fn read_fix(&self) -> Result<Option<DevicePosition>, LocationUnavailableCause> {
        let content = match fs_err::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                return Err(LocationUnavailableCause::PermissionDenied)
            }
            Err(err) => {
                tracing::debug!(error = %err, "Device fix file unreadable");
                return Err(LocationUnavailableCause::Unavailable);
            }
        };
        match serde_json::from_str::<DevicePosition>(&content) {
            Ok(position) => Ok(Some(position)),
            // Half-written by the agent; try again on the next poll.
            Err(err) => {
                tracing::debug!(error = %err, "Device fix file not parseable yet");
                Ok(None)
            }
        }
    }
}

impl DeviceLocator for FileDeviceLocator {
    fn current_position(
        &self,
        options: &PositionOptions,
    ) -> Result<DevicePosition, LocationUnavailableCause> {
        let requested_at = Utc::now();
        let oldest_accepted = chrono::Duration::from_std(options.maximum_age)
            .map(|age| requested_at - age)
            .unwrap_or(requested_at);
        let deadline = Instant::now() + options.timeout;
        let mut saw_fix = false;

        tracing::debug!(
            path = %self.path.display(),
            high_accuracy = options.enable_high_accuracy,
            timeout_ms = options.timeout.as_millis() as u64,
            "Waiting for device fix"
        );

        loop {
            if let Some(position) = self.read_fix()? {
                saw_fix = true;
                if position.captured_at >= oldest_accepted {
                    return Ok(position);
                }
            }
            if Instant::now() >= deadline {
                return Err(if saw_fix {
                    LocationUnavailableCause::Timeout
                } else {
                    LocationUnavailableCause::Unavailable
                });
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(timeout_ms: u64, max_age_secs: u64) -> PositionOptions {
        PositionOptions {
            enable_high_accuracy: true,
            timeout: Duration::from_millis(timeout_ms),
            maximum_age: Duration::from_secs(max_age_secs),
        }
    }

    fn write_fix(path: &std::path::Path, captured_at: DateTime<Utc>) {
        let body = serde_json::json!({
            "latitude": 19.16,
            "longitude": 72.85,
            "accuracy_meters": 12.0,
            "captured_at": captured_at.to_rfc3339(),
        });
        std::fs::write(path, body.to_string()).unwrap();
    }

    #[test]
    fn stage_defaults_match_fallback_chain() {
        let high = PositionOptions::high_accuracy();
        assert_eq!(high.timeout, Duration::from_secs(20));
        assert_eq!(high.maximum_age, Duration::ZERO);
        let low = PositionOptions::low_accuracy();
        assert_eq!(low.timeout, Duration::from_secs(30));
        assert_eq!(low.maximum_age, Duration::from_secs(300));
    }

    #[test]
    fn missing_file_reports_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let locator = FileDeviceLocator::new(dir.path().join("fix.json"));
        assert_eq!(
            locator.current_position(&options(50, 0)),
            Err(LocationUnavailableCause::Unavailable)
        );
    }

    #[test]
    fn stale_fix_times_out_when_fresh_one_required() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fix.json");
        write_fix(&path, Utc::now() - chrono::Duration::minutes(2));
        let locator = FileDeviceLocator::new(path);
        assert_eq!(
            locator.current_position(&options(50, 0)),
            Err(LocationUnavailableCause::Timeout)
        );
    }

    #[test]
    fn cached_fix_within_maximum_age_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fix.json");
        write_fix(&path, Utc::now() - chrono::Duration::minutes(2));
        let locator = FileDeviceLocator::new(path);
        let position = locator
            .current_position(&options(50, 300))
            .expect("cached fix");
        assert_eq!(position.accuracy_meters, 12.0);
    }

    #[test]
    fn fix_written_while_waiting_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fix.json");
        let writer_path = path.clone();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            write_fix(&writer_path, Utc::now() + chrono::Duration::seconds(1));
        });
        let locator = FileDeviceLocator::new(path);
        let position = locator.current_position(&options(3_000, 0));
        writer.join().unwrap();
        assert!(position.is_ok());
    }
}
