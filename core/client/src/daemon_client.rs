//! Client helper for talking to the attendance daemon.
//!
//! The daemon is the only writer and the single source of truth; this side
//! only sends requests and renders what comes back.

use attendance_daemon_protocol::{
    Method, Request, Response, StreamMessage, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use chrono::{DateTime, FixedOffset, Utc};
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::env;
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ClientError;

pub const SOCKET_ENV: &str = "ATTENDANCE_DAEMON_SOCKET";
const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_MS: u64 = 5_000;
const WRITE_TIMEOUT_MS: u64 = 1_000;

pub fn socket_path() -> Result<PathBuf, ClientError> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let home = dirs::home_dir()
        .ok_or_else(|| ClientError::Transport("Home directory not found".to_string()))?;
    Ok(home.join(".attendance").join(SOCKET_NAME))
}

/// Sends one request and decodes the `data` payload of an ok response.
pub fn call<T: DeserializeOwned>(method: Method, params: Option<Value>) -> Result<T, ClientError> {
    let response = send_request(build_request(method, params))?;
    let data = into_data(response)?;
    serde_json::from_value(data).map_err(|err| ClientError::Decode(err.to_string()))
}

pub fn send_request(request: Request) -> Result<Response, ClientError> {
    let mut stream = connect()?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    write_request(&mut stream, &request)?;
    read_response(&mut stream)
}

/// Live transition feed. The first line is the subscribe acknowledgement,
/// which may carry a snapshot of today's session for a single employee.
/// Transitions stamped at or before the snapshot's `as_of` are already
/// reflected in it and are skipped.
pub struct TransitionStream {
    reader: BufReader<UnixStream>,
    pub snapshot: Option<Value>,
    snapshot_as_of: Option<DateTime<FixedOffset>>,
}

pub fn subscribe(employee_id: Option<&str>) -> Result<TransitionStream, ClientError> {
    let mut stream = connect()?;
    let params = employee_id.map(|id| serde_json::json!({ "employee_id": id }));
    write_request(&mut stream, &build_request(Method::Subscribe, params))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .map_err(|err| ClientError::Transport(format!("Failed to read subscribe ack: {}", err)))?;
    let ack: Response = serde_json::from_str(line.trim())
        .map_err(|err| ClientError::Decode(format!("Invalid subscribe ack: {}", err)))?;
    let data = into_data(ack)?;
    let snapshot = data.get("snapshot").filter(|value| !value.is_null()).cloned();
    let snapshot_as_of = snapshot
        .as_ref()
        .and_then(|value| value.get("as_of"))
        .and_then(Value::as_str)
        .and_then(|as_of| DateTime::parse_from_rfc3339(as_of).ok());
    tracing::info!(employee_id = ?employee_id, "Subscribed to live status");

    Ok(TransitionStream {
        reader,
        snapshot,
        snapshot_as_of,
    })
}

impl TransitionStream {
    fn covered_by_snapshot(&self, at: &str) -> bool {
        match (self.snapshot_as_of, DateTime::parse_from_rfc3339(at)) {
            (Some(as_of), Ok(at)) => at <= as_of,
            _ => false,
        }
    }
}

impl Iterator for TransitionStream {
    type Item = Result<StreamMessage, ClientError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut line = String::new();
            let message = match self.reader.read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) => serde_json::from_str::<StreamMessage>(line.trim())
                    .map_err(|err| ClientError::Decode(format!("Invalid stream line: {}", err))),
                Err(err) => {
                    return Some(Err(ClientError::Transport(format!(
                        "Live status stream failed: {}",
                        err
                    ))))
                }
            };
            if let Ok(StreamMessage::Transition(transition)) = &message {
                if self.covered_by_snapshot(&transition.at) {
                    tracing::debug!(at = %transition.at, "Skipping transition already in snapshot");
                    continue;
                }
            }
            return Some(message);
        }
    }
}

fn connect() -> Result<UnixStream, ClientError> {
    let socket = socket_path()?;
    let stream = UnixStream::connect(&socket).map_err(|err| {
        ClientError::Transport(format!(
            "Failed to connect to daemon socket {}: {}",
            socket.display(),
            err
        ))
    })?;
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));
    Ok(stream)
}

fn build_request(method: Method, params: Option<Value>) -> Request {
    Request {
        protocol_version: PROTOCOL_VERSION,
        method,
        id: Some(make_request_id()),
        params,
    }
}

fn write_request(stream: &mut UnixStream, request: &Request) -> Result<(), ClientError> {
    serde_json::to_writer(&mut *stream, request)
        .map_err(|err| ClientError::Transport(format!("Failed to write request: {}", err)))?;
    stream
        .write_all(b"\n")
        .map_err(|err| ClientError::Transport(format!("Failed to flush request: {}", err)))?;
    stream.flush().ok();
    tracing::debug!(method = ?request.method, id = ?request.id, "Request sent");
    Ok(())
}

fn read_response(stream: &mut UnixStream) -> Result<Response, ClientError> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ClientError::Transport(
                        "Response exceeded maximum size".to_string(),
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
                return Err(ClientError::Transport(
                    "Timed out waiting for daemon response".to_string(),
                ));
            }
            Err(err) => {
                return Err(ClientError::Transport(format!(
                    "Failed to read response: {}",
                    err
                )))
            }
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err(ClientError::Transport("Daemon response was empty".to_string()));
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| ClientError::Decode(format!("Failed to parse response JSON: {}", err)))
}

fn into_data(response: Response) -> Result<Value, ClientError> {
    if response.ok {
        return Ok(response.data.unwrap_or(Value::Null));
    }
    let (code, message) = response
        .error
        .map(|err| (err.code, err.message))
        .unwrap_or_else(|| ("unknown".to_string(), "Unknown daemon error".to_string()));
    tracing::debug!(code = %code, message = %message, "Daemon rejected request");
    Err(ClientError::Daemon { code, message })
}

fn make_request_id() -> String {
    let mut random = rand::thread_rng();
    format!(
        "req-{}-{}-{:x}",
        Utc::now().timestamp_millis(),
        std::process::id(),
        random.next_u64()
    )
}
