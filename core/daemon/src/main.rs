//! Attendance daemon entrypoint.
//!
//! A single-writer service that owns every work session. Clients talk to it
//! over a Unix socket with one JSON request per connection; `subscribe`
//! keeps the connection open and streams transitions as JSON lines.

use fs_err as fs;
use serde::Serialize;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use attendance_daemon_protocol::{
    parse_approve_review, parse_employee, parse_end_day, parse_history, parse_record_progress,
    parse_reject_review, parse_start_day, parse_subscribe, ErrorInfo, Method, Request, Response,
    StreamMessage, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

mod broadcast;
mod clock;
mod config;
mod db;
mod error;
mod geofence;
mod locks;
mod notify;
mod progress;
mod review;
mod scheduler;
mod session;
mod state;

use clock::SystemClock;
use config::DaemonConfig;
use db::Db;
use error::EngineError;
use state::SharedState;

const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;
const HEARTBEAT_INTERVAL_SECS: u64 = 15;

fn main() {
    init_logging();

    let config = match config::load_config(None) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load daemon config; using defaults");
            DaemonConfig::default()
        }
    };
    if let Err(err) = config.geofence.validate() {
        error!(error = %err, "Invalid geofence configuration");
        std::process::exit(1);
    }

    let socket_path = match daemon_socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let db_path = match daemon_db_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon database path");
            std::process::exit(1);
        }
    };

    let db = match Db::new(db_path) {
        Ok(db) => Arc::new(db),
        Err(err) => {
            error!(error = %err, "Failed to initialize daemon database");
            std::process::exit(1);
        }
    };

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(
        office_latitude = config.geofence.office_latitude,
        office_longitude = config.geofence.office_longitude,
        radius_meters = config.geofence.radius_meters,
        utc_offset_minutes = config.sessions.utc_offset_minutes,
        require_daily_progress = config.sessions.require_daily_progress,
        "Daemon config loaded"
    );

    let notifier = notify::notifier_from_config(&config.notifications);
    let shared_state = Arc::new(SharedState::new(
        Arc::new(config),
        db,
        Arc::new(SystemClock),
    ));
    notify::spawn_dispatcher(shared_state.broadcaster(), notifier);
    scheduler::spawn_midnight_scheduler(Arc::clone(&shared_state));

    info!(path = %socket_path.display(), "Attendance daemon started");

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&shared_state);
                thread::spawn(|| handle_connection(stream, state));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var("ATTENDANCE_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn daemon_socket_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".attendance").join(SOCKET_NAME))
}

fn daemon_db_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".attendance").join("daemon").join("attendance.db"))
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, state: Arc<SharedState>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_line(&mut stream, &response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    if request.method == Method::Subscribe && request.protocol_version == PROTOCOL_VERSION {
        stream_transitions(stream, request, state);
        return;
    }
    let response = handle_request(request, &state);
    let _ = write_line(&mut stream, &response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    if buffer.is_empty() {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => {
            if buffer[index + 1..].iter().any(|b| !b.is_ascii_whitespace()) {
                warn!("Extra bytes detected after newline; ignoring trailing data");
            }
            &buffer[..index]
        }
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, state: &SharedState) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    let id = request.id;
    let params = request.params;
    match request.method {
        Method::GetHealth => {
            let mut data = serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
                "sweep_interval_secs": state.config().scheduler.sweep_interval_secs,
            });
            if let Ok(value) = serde_json::to_value(state.health_snapshot()) {
                data["engine"] = value;
            }
            Response::ok(id, data)
        }
        Method::StartDay => match parse_start_day(params) {
            Ok(parsed) => respond(
                id,
                state.start_day(&parsed.employee_id, parsed.work_location_type, parsed.fix),
            ),
            Err(err) => Response::error_with_info(id, err),
        },
        Method::PauseDay => match parse_employee(params) {
            Ok(parsed) => respond(id, state.pause_day(&parsed.employee_id)),
            Err(err) => Response::error_with_info(id, err),
        },
        Method::ResumeDay => match parse_employee(params) {
            Ok(parsed) => respond(id, state.resume_day(&parsed.employee_id)),
            Err(err) => Response::error_with_info(id, err),
        },
        Method::EndDay => match parse_end_day(params) {
            Ok(parsed) => respond(id, state.end_day(&parsed.employee_id, parsed.fix)),
            Err(err) => Response::error_with_info(id, err),
        },
        Method::TodayStatus => match parse_employee(params) {
            Ok(parsed) => respond(id, state.today_status(&parsed.employee_id)),
            Err(err) => Response::error_with_info(id, err),
        },
        Method::RecordProgress => match parse_record_progress(params) {
            Ok(parsed) => respond(
                id,
                state
                    .record_progress(&parsed.employee_id, &parsed.note)
                    .map(|date| {
                        serde_json::json!({
                            "employee_id": parsed.employee_id,
                            "date": date.to_string(),
                        })
                    }),
            ),
            Err(err) => Response::error_with_info(id, err),
        },
        Method::ListPendingReviews => respond(id, state.pending_reviews()),
        Method::ApproveReview => match parse_approve_review(params) {
            Ok(parsed) => respond(id, state.approve_review(parsed.entry_id, parsed.amount_hours)),
            Err(err) => Response::error_with_info(id, err),
        },
        Method::RejectReview => match parse_reject_review(params) {
            Ok(parsed) => respond(id, state.reject_review(parsed.entry_id)),
            Err(err) => Response::error_with_info(id, err),
        },
        Method::GetHistory => match parse_history(params) {
            Ok(parsed) => respond(id, state.history(&parsed.employee_id, parsed.limit)),
            Err(err) => Response::error_with_info(id, err),
        },
        Method::Subscribe => Response::error(
            id,
            "invalid_method",
            "subscribe requires a dedicated connection",
        ),
    }
}

fn respond<T: Serialize>(id: Option<String>, result: Result<T, EngineError>) -> Response {
    match result {
        Ok(value) => match serde_json::to_value(value) {
            Ok(value) => Response::ok(id, value),
            Err(err) => Response::error(
                id,
                "serialization_error",
                format!("Failed to serialize response: {}", err),
            ),
        },
        Err(err) => Response::error_with_info(id, err.to_error_info()),
    }
}

/// Keeps the connection open and writes one `StreamMessage` per line until the
/// client goes away. Heartbeats surface dead sockets between transitions.
fn stream_transitions(mut stream: UnixStream, request: Request, state: Arc<SharedState>) {
    let params = match parse_subscribe(request.params) {
        Ok(params) => params,
        Err(err) => {
            let _ = write_line(&mut stream, &Response::error_with_info(request.id, err));
            return;
        }
    };

    let (subscription, snapshot) =
        match state.subscribe_with_snapshot(params.employee_id.as_deref()) {
            Ok(opened) => opened,
            Err(err) => {
                let response = Response::error_with_info(request.id, err.to_error_info());
                let _ = write_line(&mut stream, &response);
                return;
            }
        };
    let broadcaster = state.broadcaster();
    let ack = Response::ok(
        request.id,
        serde_json::json!({
            "subscription_id": subscription.id,
            "snapshot": snapshot,
        }),
    );
    if write_line(&mut stream, &ack).is_err() {
        broadcaster.unsubscribe(subscription.id);
        return;
    }
    info!(
        subscription_id = subscription.id,
        employee_id = ?params.employee_id,
        "Dashboard subscribed"
    );

    let heartbeat = Duration::from_secs(HEARTBEAT_INTERVAL_SECS);
    loop {
        let message = match subscription.receiver.recv_timeout(heartbeat) {
            Ok(transition) => StreamMessage::Transition(transition),
            Err(RecvTimeoutError::Timeout) => StreamMessage::Heartbeat {
                at: state.now().to_rfc3339(),
            },
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if let Err(err) = write_line(&mut stream, &message) {
            tracing::debug!(
                subscription_id = subscription.id,
                error = %err,
                "Subscriber connection closed"
            );
            break;
        }
    }
    broadcaster.unsubscribe(subscription.id);
}

fn write_line<T: Serialize>(stream: &mut UnixStream, value: &T) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, value)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
