//! CLI command implementations.
//!
//! Each command issues one daemon request and prints the result. Rendering
//! lives here; nothing about the session is computed client-side.

use attendance_daemon_protocol::{
    HistoryEntry, LocationFix, Method, PendingReviewEntry, StreamMessage, WorkLocationType,
    WorkSessionView,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use crate::daemon_client::{self, TransitionStream};
use crate::device::FileDeviceLocator;
use crate::error::ClientError;
use crate::ip;
use crate::locate::Resolver;

const DEVICE_FIX_ENV: &str = "ATTENDANCE_DEVICE_FIX";
const DEFAULT_DEVICE_FIX_FILE: &str = "device-fix.json";

pub struct StartOptions {
    pub remote: bool,
    pub device_fix: Option<PathBuf>,
    pub ip_fallback: bool,
}

pub fn start(employee_id: &str, options: StartOptions) -> Result<(), ClientError> {
    let (work_location_type, fix) = if options.remote {
        (WorkLocationType::Home, None)
    } else {
        let resolver = resolver(options.device_fix, options.ip_fallback)?;
        (WorkLocationType::Office, Some(resolver.resolve()?))
    };

    let view: WorkSessionView = daemon_client::call(
        Method::StartDay,
        Some(json!({
            "employee_id": employee_id,
            "work_location_type": work_location_type,
            "fix": fix,
        })),
    )?;
    println!("Day started ({})", work_location_type.as_str());
    print_session(&view);
    Ok(())
}

pub fn pause(employee_id: &str) -> Result<(), ClientError> {
    let view: WorkSessionView = daemon_client::call(Method::PauseDay, employee(employee_id))?;
    print_session(&view);
    Ok(())
}

pub fn resume(employee_id: &str) -> Result<(), ClientError> {
    let view: WorkSessionView = daemon_client::call(Method::ResumeDay, employee(employee_id))?;
    print_session(&view);
    Ok(())
}

/// The end fix is informational; failing to locate never blocks ending the day.
pub fn end(
    employee_id: &str,
    locate: bool,
    device_fix: Option<PathBuf>,
) -> Result<(), ClientError> {
    let fix: Option<LocationFix> = if locate {
        let located = resolver(device_fix, true)
            .and_then(|resolver| resolver.resolve().map_err(ClientError::from));
        match located {
            Ok(fix) => Some(fix),
            Err(err) => {
                tracing::warn!(error = %err, "Ending day without a location fix");
                None
            }
        }
    } else {
        None
    };

    let view: WorkSessionView = daemon_client::call(
        Method::EndDay,
        Some(json!({ "employee_id": employee_id, "fix": fix })),
    )?;
    println!("Day ended");
    print_session(&view);
    Ok(())
}

pub fn status(employee_id: &str) -> Result<(), ClientError> {
    let view: WorkSessionView = daemon_client::call(Method::TodayStatus, employee(employee_id))?;
    print_session(&view);
    Ok(())
}

pub fn watch(employee_id: Option<&str>) -> Result<(), ClientError> {
    let stream: TransitionStream = daemon_client::subscribe(employee_id)?;
    if let Some(snapshot) = &stream.snapshot {
        match serde_json::from_value::<WorkSessionView>(snapshot.clone()) {
            Ok(view) => print_session(&view),
            Err(err) => tracing::debug!(error = %err, "Snapshot did not decode"),
        }
    }
    println!("Watching live status (Ctrl-C to stop)");

    for message in stream {
        match message? {
            StreamMessage::Transition(transition) => println!(
                "{}  {}  {}: {} -> {}  ({:.2} h)",
                transition.at,
                transition.date,
                transition.employee_id,
                transition.from_state.as_str(),
                transition.to_state.as_str(),
                transition.credited_hours
            ),
            StreamMessage::Heartbeat { at } => tracing::debug!(at = %at, "Heartbeat"),
        }
    }
    Err(ClientError::Transport("Daemon closed the live status stream".to_string()))
}

pub fn progress(employee_id: &str, note: &str) -> Result<(), ClientError> {
    let data: Value = daemon_client::call(
        Method::RecordProgress,
        Some(json!({ "employee_id": employee_id, "note": note })),
    )?;
    let date = data.get("date").and_then(Value::as_str).unwrap_or("today");
    println!("Progress recorded for {}", date);
    Ok(())
}

pub fn review_list() -> Result<(), ClientError> {
    let entries: Vec<PendingReviewEntry> = daemon_client::call(Method::ListPendingReviews, None)?;
    if entries.is_empty() {
        println!("No sessions awaiting review");
        return Ok(());
    }
    for entry in &entries {
        print_review(entry);
    }
    Ok(())
}

pub fn review_approve(entry_id: i64, amount_hours: f64) -> Result<(), ClientError> {
    let entry: PendingReviewEntry = daemon_client::call(
        Method::ApproveReview,
        Some(json!({ "entry_id": entry_id, "amount_hours": amount_hours })),
    )?;
    print_review(&entry);
    Ok(())
}

pub fn review_reject(entry_id: i64) -> Result<(), ClientError> {
    let entry: PendingReviewEntry =
        daemon_client::call(Method::RejectReview, Some(json!({ "entry_id": entry_id })))?;
    print_review(&entry);
    Ok(())
}

pub fn history(employee_id: &str, limit: Option<usize>) -> Result<(), ClientError> {
    let rows: Vec<HistoryEntry> = daemon_client::call(
        Method::GetHistory,
        Some(json!({ "employee_id": employee_id, "limit": limit })),
    )?;
    if rows.is_empty() {
        println!("No attendance history yet");
    }
    for row in rows {
        println!("{}  {:>6.2} h  {}", row.date, row.credited_hours, row.source);
    }
    Ok(())
}

pub fn health() -> Result<(), ClientError> {
    let data: Value = daemon_client::call(Method::GetHealth, None)?;
    let rendered = serde_json::to_string_pretty(&data)
        .map_err(|err| ClientError::Decode(err.to_string()))?;
    println!("{}", rendered);
    Ok(())
}

/// Human-facing message for a failed command. `true` means the outcome is
/// informational and the command should still exit successfully.
pub fn describe_error(err: &ClientError) -> (String, bool) {
    match err {
        ClientError::Resolve(resolve) => (resolve.cause().user_message().to_string(), false),
        ClientError::Daemon { code, message } => match code.as_str() {
            "session_already_active" => ("Your day is already running.".to_string(), true),
            "out_of_geofence" => (
                format!(
                    "{}. Move closer to the office or start a remote day with --remote.",
                    message
                ),
                false,
            ),
            "location_unavailable" => (
                "Your location could not be determined. Try again, or start a remote day with --remote."
                    .to_string(),
                false,
            ),
            "session_not_started" => ("No running session for today.".to_string(), false),
            "day_already_closed" => ("Today's session is already closed.".to_string(), false),
            "progress_not_set" => (
                "Record today's progress first: attendance progress \"<note>\"".to_string(),
                false,
            ),
            _ => (format!("{} ({})", message, code), false),
        },
        other => (other.to_string(), false),
    }
}

fn resolver(device_fix: Option<PathBuf>, ip_fallback: bool) -> Result<Resolver, ClientError> {
    let path = match device_fix {
        Some(path) => path,
        None => default_device_fix_path()?,
    };
    let locator = Arc::new(FileDeviceLocator::new(path));
    let providers = ip_fallback.then(ip::default_providers);
    Ok(Resolver::standard(locator, providers))
}

fn default_device_fix_path() -> Result<PathBuf, ClientError> {
    if let Ok(path) = std::env::var(DEVICE_FIX_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let home = dirs::home_dir()
        .ok_or_else(|| ClientError::Usage("Home directory not found".to_string()))?;
    Ok(home.join(".attendance").join(DEFAULT_DEVICE_FIX_FILE))
}

fn employee(employee_id: &str) -> Option<Value> {
    Some(json!({ "employee_id": employee_id }))
}

fn print_session(view: &WorkSessionView) {
    println!(
        "{}  {}  {}",
        view.date,
        view.employee_id,
        view.state.as_str()
    );
    if let Some(started_at) = &view.started_at {
        println!("  started   {}", started_at);
    }
    if let Some(ended_at) = &view.ended_at {
        println!("  ended     {}", ended_at);
    }
    println!(
        "  credited  {:.2} h of {:.2} h (breaks {:.2} h, {} pause(s))",
        view.credited_hours,
        view.target_hours,
        view.break_hours,
        view.pause_intervals.len()
    );
}

fn print_review(entry: &PendingReviewEntry) {
    let status = match (entry.resolved_amount, &entry.resolved_at) {
        (Some(amount), Some(at)) => format!("resolved {:.2} h at {}", amount, at),
        _ => "pending".to_string(),
    };
    println!(
        "#{}  {}  {}  raw {:.2} h  capped {:.2} h  {}  {}",
        entry.id,
        entry.date,
        entry.employee_id,
        entry.raw_hours_worked,
        entry.capped_hours,
        entry.reason.as_str(),
        status
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolveError;
    use attendance_daemon_protocol::LocationUnavailableCause;

    #[test]
    fn already_active_is_informational() {
        let err = ClientError::Daemon {
            code: "session_already_active".to_string(),
            message: "session already active".to_string(),
        };
        let (message, informational) = describe_error(&err);
        assert!(informational);
        assert_eq!(message, "Your day is already running.");
    }

    #[test]
    fn geofence_rejection_suggests_remote_work() {
        let err = ClientError::Daemon {
            code: "out_of_geofence".to_string(),
            message: "outside office geofence: 6120 m away, radius 2000 m".to_string(),
        };
        let (message, informational) = describe_error(&err);
        assert!(!informational);
        assert!(message.contains("6120 m"));
        assert!(message.contains("--remote"));
    }

    #[test]
    fn resolver_failures_use_cause_message() {
        let err = ClientError::Resolve(ResolveError::LocationUnavailable {
            cause: LocationUnavailableCause::PermissionDenied,
        });
        let (message, informational) = describe_error(&err);
        assert!(!informational);
        assert_eq!(
            message,
            LocationUnavailableCause::PermissionDenied.user_message()
        );
    }
}
