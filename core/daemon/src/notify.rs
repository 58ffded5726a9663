//! Fire-and-forget notification dispatch.
//!
//! A background consumer subscribes to every transition and forwards it to a
//! `Notifier`. Failures are logged and dropped; they never reach the engine.

use attendance_daemon_protocol::StateTransition;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::broadcast::{Broadcaster, Topic};
use crate::config::NotificationsConfig;

pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;
    fn notify(&self, transition: &StateTransition) -> Result<(), String>;
}

pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    fn notify(&self, transition: &StateTransition) -> Result<(), String> {
        tracing::info!(
            employee_id = %transition.employee_id,
            date = %transition.date,
            from = transition.from_state.as_str(),
            to = transition.to_state.as_str(),
            credited_hours = transition.credited_hours,
            "Attendance notification"
        );
        Ok(())
    }
}

/// POSTs each transition as JSON to a configured endpoint.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::blocking::Client,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| format!("Failed to build webhook client: {}", err))?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn notify(&self, transition: &StateTransition) -> Result<(), String> {
        self.client
            .post(&self.url)
            .json(transition)
            .send()
            .and_then(|response| response.error_for_status())
            .map(|_| ())
            .map_err(|err| format!("Webhook delivery failed: {}", err))
    }
}

pub fn notifier_from_config(config: &NotificationsConfig) -> Arc<dyn Notifier> {
    match config.webhook_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => {
            match WebhookNotifier::new(url, Duration::from_millis(config.timeout_ms)) {
                Ok(notifier) => Arc::new(notifier),
                Err(err) => {
                    tracing::warn!(error = %err, "Falling back to log notifier");
                    Arc::new(LogNotifier)
                }
            }
        }
        _ => Arc::new(LogNotifier),
    }
}

pub fn spawn_dispatcher(broadcaster: Arc<Broadcaster>, notifier: Arc<dyn Notifier>) {
    let subscription = broadcaster.subscribe(Topic::All);
    tracing::info!(notifier = notifier.name(), "Notification dispatcher started");
    thread::spawn(move || {
        for transition in subscription.receiver.iter() {
            if let Err(err) = notifier.notify(&transition) {
                tracing::warn!(
                    error = %err,
                    notifier = notifier.name(),
                    employee_id = %transition.employee_id,
                    "Notification dropped"
                );
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendance_daemon_protocol::SessionState;
    use std::sync::mpsc;
    use std::sync::Mutex;

    struct RecordingNotifier {
        seen: Mutex<mpsc::Sender<String>>,
        fail: bool,
    }

    impl Notifier for RecordingNotifier {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn notify(&self, transition: &StateTransition) -> Result<(), String> {
            if let Ok(sender) = self.seen.lock() {
                let _ = sender.send(transition.employee_id.clone());
            }
            if self.fail {
                Err("unreachable endpoint".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn transition(employee_id: &str) -> StateTransition {
        StateTransition {
            employee_id: employee_id.to_string(),
            date: "2026-03-09".to_string(),
            from_state: SessionState::NotStarted,
            to_state: SessionState::Active,
            at: "2026-03-09T09:00:00+00:00".to_string(),
            credited_hours: 0.0,
        }
    }

    #[test]
    fn dispatcher_keeps_running_after_failures() {
        let broadcaster = Arc::new(Broadcaster::new(8));
        let (sender, receiver) = mpsc::channel();
        let notifier = Arc::new(RecordingNotifier {
            seen: Mutex::new(sender),
            fail: true,
        });
        spawn_dispatcher(Arc::clone(&broadcaster), notifier);

        broadcaster.publish(&transition("emp-1"));
        broadcaster.publish(&transition("emp-2"));

        let timeout = Duration::from_secs(2);
        assert_eq!(receiver.recv_timeout(timeout).expect("first"), "emp-1");
        assert_eq!(receiver.recv_timeout(timeout).expect("second"), "emp-2");
    }

    #[test]
    fn blank_webhook_url_uses_log_notifier() {
        let config = NotificationsConfig {
            webhook_url: Some("  ".to_string()),
            timeout_ms: 100,
        };
        assert_eq!(notifier_from_config(&config).name(), "log");
        assert_eq!(
            notifier_from_config(&NotificationsConfig::default()).name(),
            "log"
        );
    }
}
