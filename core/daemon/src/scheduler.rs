//! Midnight closure sweep.
//!
//! Runs once at startup and then on a fixed interval. Each pass closes every
//! open session whose local calendar day has already ended. A failure for one
//! employee is logged and retried on the next pass; the rest still run.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::EngineError;
use crate::state::SharedState;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SweepSummary {
    pub swept_at: String,
    pub closed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub fn sweep(state: &SharedState) -> SweepSummary {
    let now = state.now();
    let mut summary = SweepSummary {
        swept_at: now.to_rfc3339(),
        ..SweepSummary::default()
    };

    let stale = match state.stale_open_sessions(now) {
        Ok(stale) => stale,
        Err(err) => {
            tracing::warn!(error = %err, "Failed to list open sessions for sweep");
            summary.failed += 1;
            return summary;
        }
    };

    let lock_timeout = Duration::from_millis(state.config().scheduler.lock_timeout_ms);
    for session in stale {
        match state.sweep_employee(&session.employee_id, lock_timeout) {
            Ok(Some(entry)) => {
                summary.closed += 1;
                tracing::info!(
                    employee_id = %entry.employee_id,
                    date = %entry.date,
                    entry_id = entry.id,
                    "Session force-closed at day boundary"
                );
            }
            // Closed by a concurrent request before the lock was granted.
            Ok(None) => summary.skipped += 1,
            Err(EngineError::LockTimeout { employee_id }) => {
                summary.failed += 1;
                tracing::warn!(
                    employee_id = %employee_id,
                    "Employee lock busy; retrying on next sweep"
                );
            }
            Err(err) => {
                summary.failed += 1;
                tracing::warn!(
                    employee_id = %session.employee_id,
                    error = %err,
                    "Failed to force-close session"
                );
            }
        }
    }

    if summary.closed > 0 || summary.failed > 0 {
        tracing::info!(
            closed = summary.closed,
            skipped = summary.skipped,
            failed = summary.failed,
            "Midnight sweep finished"
        );
    }
    summary
}

pub fn spawn_midnight_scheduler(state: Arc<SharedState>) {
    let interval = Duration::from_secs(state.config().scheduler.sweep_interval_secs.max(1));
    std::thread::spawn(move || loop {
        let summary = sweep(&state);
        state.record_sweep(summary);
        std::thread::sleep(interval);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::{at, harness};
    use attendance_daemon_protocol::{SessionState, WorkLocationType};
    use chrono::Duration as ChronoDuration;

    #[test]
    fn sweep_closes_sessions_from_previous_day() {
        let h = harness(false);
        h.clock.set(at(23, 0));
        h.state
            .start_day("emp-1", WorkLocationType::Home, None)
            .expect("start");
        h.state
            .start_day("emp-2", WorkLocationType::Home, None)
            .expect("start");
        h.clock.set(at(23, 30));
        h.state.pause_day("emp-2").expect("pause");

        h.clock.set(at(0, 0) + ChronoDuration::days(1));
        let summary = sweep(&h.state);
        assert_eq!(summary.closed, 2);
        assert_eq!(summary.failed, 0);

        let pending = h.state.pending_reviews().expect("pending");
        let capped: Vec<_> = pending
            .iter()
            .map(|entry| (entry.employee_id.as_str(), entry.capped_hours))
            .collect();
        assert!(capped.contains(&("emp-1", 1.0)));
        assert!(capped.contains(&("emp-2", 0.5)));
    }

    #[test]
    fn sweep_leaves_todays_sessions_alone() {
        let h = harness(false);
        h.state
            .start_day("emp-1", WorkLocationType::Home, None)
            .expect("start");
        h.clock.set(at(23, 59));
        let summary = sweep(&h.state);
        assert_eq!(summary.closed, 0);
        let status = h.state.today_status("emp-1").expect("status");
        assert_eq!(status.state, SessionState::Active);
    }

    #[test]
    fn second_sweep_is_a_no_op() {
        let h = harness(false);
        h.clock.set(at(22, 0));
        h.state
            .start_day("emp-1", WorkLocationType::Home, None)
            .expect("start");
        h.clock.set(at(2, 0) + ChronoDuration::days(1));
        assert_eq!(sweep(&h.state).closed, 1);
        assert_eq!(sweep(&h.state).closed, 0);
        assert_eq!(h.state.pending_reviews().expect("pending").len(), 1);
    }

    #[test]
    fn forced_close_publishes_pending_review_at_boundary() {
        let h = harness(false);
        let subscription = h
            .state
            .broadcaster()
            .subscribe(crate::broadcast::Topic::All);
        h.clock.set(at(20, 0));
        h.state
            .start_day("emp-1", WorkLocationType::Home, None)
            .expect("start");
        h.clock.set(at(6, 0) + ChronoDuration::days(1));
        sweep(&h.state);

        let transitions: Vec<_> = subscription.receiver.try_iter().collect();
        let last = transitions.last().expect("transition");
        assert_eq!(last.from_state, SessionState::Active);
        assert_eq!(last.to_state, SessionState::PendingReview);
        assert_eq!(last.at, (at(0, 0) + ChronoDuration::days(1)).to_rfc3339());
        assert_eq!(last.credited_hours, 4.0);
    }

    #[test]
    fn health_reports_last_sweep() {
        let h = harness(false);
        let summary = sweep(&h.state);
        h.state.record_sweep(summary.clone());
        assert_eq!(h.state.health_snapshot().last_sweep, Some(summary));
    }

    #[test]
    fn busy_employee_is_counted_failed_and_closed_on_next_sweep() {
        let h = harness(false);
        h.clock.set(at(21, 0));
        for employee_id in ["emp-1", "emp-2"] {
            h.state
                .start_day(employee_id, WorkLocationType::Home, None)
                .expect("start");
        }
        h.clock.advance(ChronoDuration::hours(5));

        let guard = h.state.hold_employee_lock("emp-1");
        let summary = sweep(&h.state);
        assert_eq!(summary.closed, 1);
        assert_eq!(summary.failed, 1);
        let pending = h.state.pending_reviews().expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].employee_id, "emp-2");

        drop(guard);
        let retry = sweep(&h.state);
        assert_eq!(retry.closed, 1);
        assert_eq!(retry.failed, 0);
        assert_eq!(h.state.pending_reviews().expect("pending").len(), 2);
    }

    #[test]
    fn sweep_racing_end_day_closes_session_once() {
        let h = harness(false);
        h.clock.set(at(23, 0));
        h.state
            .start_day("emp-1", WorkLocationType::Home, None)
            .expect("start");
        h.clock.set(at(1, 0) + ChronoDuration::days(1));

        let state = Arc::new(h.state);
        let ender = {
            let state = Arc::clone(&state);
            std::thread::spawn(move || state.end_day("emp-1", None))
        };
        let summary = sweep(&state);
        let ended = ender.join().expect("end_day thread");

        assert_eq!(ended, Err(EngineError::SessionNotStarted));
        assert!(summary.closed <= 1);
        let pending = state.pending_reviews().expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].capped_hours, 1.0);
        let status = state.today_status("emp-1").expect("status");
        assert_eq!(status.state, SessionState::NotStarted);
        assert_eq!(status.date, "2026-03-10");
    }
}
