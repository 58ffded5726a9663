//! IPC protocol types and validation for attendance-daemon.
//!
//! This crate is shared by the daemon and its clients to prevent schema drift.
//! The daemon remains the authority on validation, but clients can reuse the
//! same types to construct valid requests and to decode session snapshots.

use chrono::{DateTime, NaiveDate};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_EMPLOYEE_ID_LEN: usize = 128;
pub const MAX_PROGRESS_NOTE_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    StartDay,
    PauseDay,
    ResumeDay,
    EndDay,
    TodayStatus,
    Subscribe,
    RecordProgress,
    ListPendingReviews,
    ApproveReview,
    RejectReview,
    GetHistory,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Location
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LocationSource {
    DeviceHighAccuracy,
    DeviceLowAccuracy,
    IpBased,
}

impl LocationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationSource::DeviceHighAccuracy => "device_high_accuracy",
            LocationSource::DeviceLowAccuracy => "device_low_accuracy",
            LocationSource::IpBased => "ip_based",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "device_high_accuracy" => Some(LocationSource::DeviceHighAccuracy),
            "device_low_accuracy" => Some(LocationSource::DeviceLowAccuracy),
            "ip_based" => Some(LocationSource::IpBased),
            _ => None,
        }
    }
}

/// A single coordinate fix. Produced by the client-side resolver and never
/// modified afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: f64,
    pub source: LocationSource,
    pub captured_at: String,
}

impl LocationFix {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if !valid_coordinates(self.latitude, self.longitude) {
            return Err(ErrorInfo::new(
                "invalid_location",
                "latitude must be within [-90, 90] and longitude within [-180, 180]",
            ));
        }
        if !self.accuracy_meters.is_finite() || self.accuracy_meters < 0.0 {
            return Err(ErrorInfo::new(
                "invalid_location",
                "accuracy_meters must be a non-negative number",
            ));
        }
        if DateTime::parse_from_rfc3339(&self.captured_at).is_err() {
            return Err(ErrorInfo::new(
                "invalid_timestamp",
                "captured_at must be RFC3339",
            ));
        }
        Ok(())
    }
}

pub fn valid_coordinates(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}

/// Why no location could be determined. Ordered from least to most
/// actionable for the person at the device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum LocationUnavailableCause {
    AllProvidersFailed,
    Unavailable,
    Timeout,
    PermissionDenied,
}

impl LocationUnavailableCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationUnavailableCause::AllProvidersFailed => "all_providers_failed",
            LocationUnavailableCause::Unavailable => "unavailable",
            LocationUnavailableCause::Timeout => "timeout",
            LocationUnavailableCause::PermissionDenied => "permission_denied",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            LocationUnavailableCause::PermissionDenied => {
                "Location permission was denied. Allow location access and try again, or start a remote day."
            }
            LocationUnavailableCause::Timeout => {
                "Locating this device took too long. Move somewhere with better signal and try again."
            }
            LocationUnavailableCause::Unavailable => {
                "This device could not report a location. Try again, or start a remote day."
            }
            LocationUnavailableCause::AllProvidersFailed => {
                "Your location could not be determined from the network. Try again shortly."
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkLocationType {
    Office,
    Home,
}

impl WorkLocationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkLocationType::Office => "office",
            WorkLocationType::Home => "home",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "office" => Some(WorkLocationType::Office),
            "home" => Some(WorkLocationType::Home),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NotStarted,
    Active,
    Paused,
    Completed,
    PendingReview,
}

impl SessionState {
    pub fn is_open(&self) -> bool {
        matches!(self, SessionState::Active | SessionState::Paused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::NotStarted => "not_started",
            SessionState::Active => "active",
            SessionState::Paused => "paused",
            SessionState::Completed => "completed",
            SessionState::PendingReview => "pending_review",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "not_started" => Some(SessionState::NotStarted),
            "active" => Some(SessionState::Active),
            "paused" => Some(SessionState::Paused),
            "completed" => Some(SessionState::Completed),
            "pending_review" => Some(SessionState::PendingReview),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PauseInterval {
    pub paused_at: String,
    #[serde(default)]
    pub resumed_at: Option<String>,
}

/// Point-in-time view of an employee's session for one calendar day.
/// Durations are computed by the daemon as of `as_of`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkSessionView {
    pub employee_id: String,
    pub date: String,
    pub state: SessionState,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub ended_at: Option<String>,
    #[serde(default)]
    pub pause_intervals: Vec<PauseInterval>,
    #[serde(default)]
    pub work_location_type: Option<WorkLocationType>,
    pub target_hours: f64,
    pub credited_hours: f64,
    pub break_hours: f64,
    pub as_of: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateTransition {
    pub employee_id: String,
    pub date: String,
    pub from_state: SessionState,
    pub to_state: SessionState,
    pub at: String,
    pub credited_hours: f64,
}

/// One line on a `subscribe` connection after the initial response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamMessage {
    Transition(StateTransition),
    Heartbeat { at: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// Review queue and history
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    MidnightForcedClose,
}

impl ReviewReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewReason::MidnightForcedClose => "midnight_forced_close",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "midnight_forced_close" => Some(ReviewReason::MidnightForcedClose),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingReviewEntry {
    pub id: i64,
    pub employee_id: String,
    pub date: String,
    pub raw_hours_worked: f64,
    pub capped_hours: f64,
    pub reason: ReviewReason,
    pub created_at: String,
    #[serde(default)]
    pub resolved_amount: Option<f64>,
    #[serde(default)]
    pub resolved_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub employee_id: String,
    pub date: String,
    pub credited_hours: f64,
    pub source: String,
    pub recorded_at: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Request parameters
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartDayParams {
    pub employee_id: String,
    pub work_location_type: WorkLocationType,
    #[serde(default)]
    pub fix: Option<LocationFix>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndDayParams {
    pub employee_id: String,
    #[serde(default)]
    pub fix: Option<LocationFix>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmployeeParams {
    pub employee_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscribeParams {
    #[serde(default)]
    pub employee_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordProgressParams {
    pub employee_id: String,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApproveReviewParams {
    pub entry_id: i64,
    pub amount_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RejectReviewParams {
    pub entry_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistoryParams {
    pub employee_id: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub fn parse_start_day(params: Option<Value>) -> Result<StartDayParams, ErrorInfo> {
    let parsed: StartDayParams = decode_params(params)?;
    require_employee_id(&parsed.employee_id)?;
    if let Some(fix) = &parsed.fix {
        fix.validate()?;
    }
    Ok(parsed)
}

pub fn parse_end_day(params: Option<Value>) -> Result<EndDayParams, ErrorInfo> {
    let parsed: EndDayParams = decode_params(params)?;
    require_employee_id(&parsed.employee_id)?;
    if let Some(fix) = &parsed.fix {
        fix.validate()?;
    }
    Ok(parsed)
}

pub fn parse_employee(params: Option<Value>) -> Result<EmployeeParams, ErrorInfo> {
    let parsed: EmployeeParams = decode_params(params)?;
    require_employee_id(&parsed.employee_id)?;
    Ok(parsed)
}

pub fn parse_subscribe(params: Option<Value>) -> Result<SubscribeParams, ErrorInfo> {
    let parsed: SubscribeParams = match params {
        None | Some(Value::Null) => SubscribeParams::default(),
        Some(value) => decode_params(Some(value))?,
    };
    if let Some(employee_id) = &parsed.employee_id {
        require_employee_id(employee_id)?;
    }
    Ok(parsed)
}

pub fn parse_record_progress(params: Option<Value>) -> Result<RecordProgressParams, ErrorInfo> {
    let parsed: RecordProgressParams = decode_params(params)?;
    require_employee_id(&parsed.employee_id)?;
    if parsed.note.trim().is_empty() {
        return Err(ErrorInfo::new("missing_field", "note is required"));
    }
    if parsed.note.len() > MAX_PROGRESS_NOTE_LEN {
        return Err(ErrorInfo::new(
            "invalid_note",
            format!("note must be {} bytes or fewer", MAX_PROGRESS_NOTE_LEN),
        ));
    }
    Ok(parsed)
}

pub fn parse_approve_review(params: Option<Value>) -> Result<ApproveReviewParams, ErrorInfo> {
    let parsed: ApproveReviewParams = decode_params(params)?;
    if !parsed.amount_hours.is_finite() {
        return Err(ErrorInfo::new(
            "invalid_amount",
            "amount_hours must be a finite number",
        ));
    }
    Ok(parsed)
}

pub fn parse_reject_review(params: Option<Value>) -> Result<RejectReviewParams, ErrorInfo> {
    decode_params(params)
}

pub fn parse_history(params: Option<Value>) -> Result<HistoryParams, ErrorInfo> {
    let parsed: HistoryParams = decode_params(params)?;
    require_employee_id(&parsed.employee_id)?;
    Ok(parsed)
}

/// Parses an ISO calendar date as used in `WorkSessionView::date`.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

fn decode_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, ErrorInfo> {
    let params = params.ok_or_else(|| ErrorInfo::new("invalid_params", "params are required"))?;
    if !params.is_object() {
        return Err(ErrorInfo::new("invalid_params", "params must be an object"));
    }
    serde_json::from_value(params)
        .map_err(|err| ErrorInfo::new("invalid_params", format!("params are invalid: {}", err)))
}

fn require_employee_id(value: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new("missing_field", "employee_id is required"));
    }
    if value.len() > MAX_EMPLOYEE_ID_LEN {
        return Err(ErrorInfo::new(
            "invalid_employee_id",
            format!(
                "employee_id must be {} characters or fewer",
                MAX_EMPLOYEE_ID_LEN
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fix_json() -> Value {
        json!({
            "latitude": 19.160122,
            "longitude": 72.839720,
            "accuracy_meters": 12.0,
            "source": "device_high_accuracy",
            "captured_at": "2026-01-30T09:00:00Z"
        })
    }

    #[test]
    fn parses_start_day_with_fix() {
        let params = json!({
            "employee_id": "emp-1",
            "work_location_type": "office",
            "fix": fix_json()
        });
        let parsed = parse_start_day(Some(params)).expect("valid params");
        assert_eq!(parsed.work_location_type, WorkLocationType::Office);
        let fix = parsed.fix.expect("fix present");
        assert_eq!(fix.source, LocationSource::DeviceHighAccuracy);
    }

    #[test]
    fn rejects_missing_employee_id() {
        let params = json!({ "employee_id": "  ", "work_location_type": "home" });
        let err = parse_start_day(Some(params)).expect_err("blank employee");
        assert_eq!(err.code, "missing_field");
    }

    #[test]
    fn rejects_out_of_range_latitude() {
        let mut fix = fix_json();
        fix["latitude"] = json!(91.0);
        let params = json!({ "employee_id": "emp-1", "fix": fix });
        let err = parse_end_day(Some(params)).expect_err("bad latitude");
        assert_eq!(err.code, "invalid_location");
    }

    #[test]
    fn rejects_bad_capture_timestamp() {
        let mut fix = fix_json();
        fix["captured_at"] = json!("yesterday");
        let params = json!({ "employee_id": "emp-1", "fix": fix });
        let err = parse_end_day(Some(params)).expect_err("bad timestamp");
        assert_eq!(err.code, "invalid_timestamp");
    }

    #[test]
    fn rejects_unknown_fields() {
        let params = json!({ "employee_id": "emp-1", "extra": true });
        assert!(parse_employee(Some(params)).is_err());
    }

    #[test]
    fn rejects_long_employee_id() {
        let params = json!({ "employee_id": "a".repeat(256) });
        let err = parse_employee(Some(params)).expect_err("too long");
        assert_eq!(err.code, "invalid_employee_id");
    }

    #[test]
    fn subscribe_without_params_means_all_employees() {
        let parsed = parse_subscribe(None).expect("no params");
        assert!(parsed.employee_id.is_none());
    }

    #[test]
    fn stream_messages_are_tagged() {
        let message = StreamMessage::Heartbeat {
            at: "2026-01-30T09:00:00Z".to_string(),
        };
        let value = serde_json::to_value(&message).expect("serialize");
        assert_eq!(value["kind"], "heartbeat");
    }

    #[test]
    fn unavailable_causes_rank_permission_denied_highest() {
        let mut causes = vec![
            LocationUnavailableCause::Timeout,
            LocationUnavailableCause::PermissionDenied,
            LocationUnavailableCause::AllProvidersFailed,
        ];
        causes.sort();
        assert_eq!(causes.last(), Some(&LocationUnavailableCause::PermissionDenied));
    }

    #[test]
    fn state_strings_round_trip() {
        for state in [
            SessionState::NotStarted,
            SessionState::Active,
            SessionState::Paused,
            SessionState::Completed,
            SessionState::PendingReview,
        ] {
            assert_eq!(SessionState::from_str(state.as_str()), Some(state));
        }
    }
}
