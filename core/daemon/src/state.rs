//! Shared engine state owned by the daemon.
//!
//! Every session operation for an employee runs under that employee's lock,
//! loads the session from SQLite, applies one transition, persists it and
//! then publishes the transition. Publishing is non-blocking, so slow
//! subscribers never hold up the lock holder.

use attendance_daemon_protocol::{
    HistoryEntry, LocationFix, LocationUnavailableCause, PendingReviewEntry, SessionState,
    StateTransition, WorkLocationType, WorkSessionView,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::broadcast::{BroadcastStats, Broadcaster, Subscription, Topic};
use crate::clock::{day_end, local_date, Clock};
use crate::config::DaemonConfig;
use crate::db::Db;
use crate::error::EngineError;
use crate::geofence;
use crate::locks::EmployeeLocks;
use crate::progress::{DbProgressGate, NoProgressRequired, ProgressGate};
use crate::review::ReviewQueue;
use crate::scheduler::SweepSummary;
use crate::session::{not_started_view, Transition, WorkSession};

const DEFAULT_HISTORY_LIMIT: usize = 31;
const MAX_HISTORY_LIMIT: usize = 366;

pub struct SharedState {
    config: Arc<DaemonConfig>,
    db: Arc<Db>,
    clock: Arc<dyn Clock>,
    locks: EmployeeLocks,
    broadcaster: Arc<Broadcaster>,
    progress: Box<dyn ProgressGate>,
    review: ReviewQueue,
    last_sweep: Mutex<Option<SweepSummary>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub broadcast: BroadcastStats,
    pub tracked_locks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sweep: Option<SweepSummary>,
}

impl SharedState {
    pub fn new(config: Arc<DaemonConfig>, db: Arc<Db>, clock: Arc<dyn Clock>) -> Self {
        let progress: Box<dyn ProgressGate> = if config.sessions.require_daily_progress {
            Box::new(DbProgressGate::new(Arc::clone(&db)))
        } else {
            Box::new(NoProgressRequired)
        };
        let broadcaster = Arc::new(Broadcaster::new(
            config.broadcast.subscriber_queue_capacity,
        ));
        let review = ReviewQueue::new(Arc::clone(&db), config.sessions.review_ceiling_hours);

        Self {
            config,
            db,
            clock,
            locks: EmployeeLocks::new(),
            broadcaster,
            progress,
            review,
            last_sweep: Mutex::new(None),
        }
    }

    #[cfg(test)]
    pub fn with_progress_gate(mut self, gate: Box<dyn ProgressGate>) -> Self {
        self.progress = gate;
        self
    }

    pub fn broadcaster(&self) -> Arc<Broadcaster> {
        Arc::clone(&self.broadcaster)
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        local_date(instant, self.config.sessions.local_offset())
    }

    pub fn start_day(
        &self,
        employee_id: &str,
        work_location_type: WorkLocationType,
        fix: Option<LocationFix>,
    ) -> Result<WorkSessionView, EngineError> {
        let _guard = self.locks.acquire(employee_id);
        let now = self.clock.now();
        self.close_stale_session(employee_id, now)?;
        let today = self.local_date(now);

        if let Some(existing) = self.db.get_session(employee_id, today)? {
            let err = if existing.state.is_open() {
                EngineError::SessionAlreadyActive
            } else {
                EngineError::DayAlreadyClosed
            };
            return Err(self.rejected("start_day", employee_id, err));
        }

        if work_location_type == WorkLocationType::Office {
            let fix = fix.as_ref().ok_or_else(|| {
                self.rejected(
                    "start_day",
                    employee_id,
                    EngineError::LocationUnavailable {
                        cause: LocationUnavailableCause::Unavailable,
                    },
                )
            })?;
            let check = geofence::validate(fix, &self.config.geofence, false);
            tracing::debug!(
                employee_id = %employee_id,
                distance_meters = check.distance_meters,
                radius_meters = self.config.geofence.radius_meters,
                source = fix.source.as_str(),
                in_range = check.in_range,
                "Geofence check"
            );
            if !check.in_range {
                return Err(self.rejected(
                    "start_day",
                    employee_id,
                    EngineError::OutOfGeofence {
                        distance_meters: check.distance_meters,
                        radius_meters: self.config.geofence.radius_meters,
                    },
                ));
            }
        }

        let session = WorkSession::begin(
            employee_id,
            today,
            now,
            work_location_type,
            self.config.sessions.target_hours,
            fix,
        );
        self.db.upsert_session(&session, now)?;
        self.publish(&session, SessionState::NotStarted, now);
        Ok(session.view(now))
    }

    pub fn pause_day(&self, employee_id: &str) -> Result<WorkSessionView, EngineError> {
        self.apply_to_today("pause_day", employee_id, |session, now| session.pause(now))
    }

    pub fn resume_day(&self, employee_id: &str) -> Result<WorkSessionView, EngineError> {
        self.apply_to_today("resume_day", employee_id, |session, now| session.resume(now))
    }

    pub fn end_day(
        &self,
        employee_id: &str,
        fix: Option<LocationFix>,
    ) -> Result<WorkSessionView, EngineError> {
        let _guard = self.locks.acquire(employee_id);
        let now = self.clock.now();
        self.close_stale_session(employee_id, now)?;
        let today = self.local_date(now);

        let mut session = match self.db.get_session(employee_id, today)? {
            Some(session) if session.state.is_open() => session,
            _ => {
                return Err(self.rejected(
                    "end_day",
                    employee_id,
                    EngineError::SessionNotStarted,
                ))
            }
        };

        if !self.progress.has_set_daily_progress(employee_id, today)? {
            return Err(self.rejected("end_day", employee_id, EngineError::ProgressNotSet));
        }

        let from = session.state;
        session.finish(now, fix)?;
        let credited_hours = session.credited_hours(now);
        self.db.complete_session(&session, credited_hours, now)?;
        self.publish(&session, from, now);
        Ok(session.view(now))
    }

    /// Snapshot for reconnecting clients; never mutates a session of today.
    pub fn today_status(&self, employee_id: &str) -> Result<WorkSessionView, EngineError> {
        let _guard = self.locks.acquire(employee_id);
        let now = self.clock.now();
        self.close_stale_session(employee_id, now)?;
        let today = self.local_date(now);

        Ok(match self.db.get_session(employee_id, today)? {
            Some(session) => session.view(now),
            None => not_started_view(employee_id, today, self.config.sessions.target_hours, now),
        })
    }

    /// Registers a live-status subscriber and then reads the snapshot, so a
    /// transition committed in between is queued rather than lost. Queued
    /// transitions at or before the snapshot's `as_of` are already reflected
    /// in it.
    pub fn subscribe_with_snapshot(
        &self,
        employee_id: Option<&str>,
    ) -> Result<(Subscription, Option<WorkSessionView>), EngineError> {
        let topic = match employee_id {
            Some(employee_id) => Topic::Employee(employee_id.to_string()),
            None => Topic::All,
        };
        let subscription = self.broadcaster.subscribe(topic);
        let snapshot = match employee_id {
            Some(employee_id) => match self.today_status(employee_id) {
                Ok(view) => Some(view),
                Err(err) => {
                    self.broadcaster.unsubscribe(subscription.id);
                    return Err(err);
                }
            },
            None => None,
        };
        Ok((subscription, snapshot))
    }

    pub fn record_progress(&self, employee_id: &str, note: &str) -> Result<NaiveDate, EngineError> {
        let now = self.clock.now();
        let today = self.local_date(now);
        self.db.upsert_progress(employee_id, today, note.trim(), now)?;
        tracing::info!(employee_id = %employee_id, date = %today, "Daily progress recorded");
        Ok(today)
    }

    pub fn pending_reviews(&self) -> Result<Vec<PendingReviewEntry>, EngineError> {
        self.review.pending()
    }

    pub fn approve_review(
        &self,
        entry_id: i64,
        amount_hours: f64,
    ) -> Result<PendingReviewEntry, EngineError> {
        self.review.approve(entry_id, amount_hours, self.clock.now())
    }

    pub fn reject_review(&self, entry_id: i64) -> Result<PendingReviewEntry, EngineError> {
        self.review.reject(entry_id, self.clock.now())
    }

    pub fn history(
        &self,
        employee_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryEntry>, EngineError> {
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        Ok(self.db.list_history(employee_id, limit)?)
    }

    /// Open sessions from a calendar day that has already ended.
    pub fn stale_open_sessions(&self, now: DateTime<Utc>) -> Result<Vec<WorkSession>, EngineError> {
        Ok(self.db.list_open_sessions_before(self.local_date(now))?)
    }

    /// Force-closes the employee's stale session if one is still open once the
    /// lock is held. `Ok(None)` means there was nothing left to close.
    pub fn sweep_employee(
        &self,
        employee_id: &str,
        lock_timeout: Duration,
    ) -> Result<Option<PendingReviewEntry>, EngineError> {
        let _guard = self
            .locks
            .try_acquire_for(employee_id, lock_timeout)
            .ok_or_else(|| EngineError::LockTimeout {
                employee_id: employee_id.to_string(),
            })?;
        let now = self.clock.now();
        self.close_stale_session(employee_id, now)
    }

    #[cfg(test)]
    pub(crate) fn hold_employee_lock(&self, employee_id: &str) -> crate::locks::EmployeeGuard<'_> {
        self.locks.acquire(employee_id)
    }

    pub fn record_sweep(&self, summary: SweepSummary) {
        if let Ok(mut last) = self.last_sweep.lock() {
            *last = Some(summary);
        }
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            broadcast: self.broadcaster.stats(),
            tracked_locks: self.locks.tracked_count(),
            last_sweep: self
                .last_sweep
                .lock()
                .map(|last| last.clone())
                .unwrap_or_default(),
        }
    }

    // Caller must hold the employee lock.
    fn close_stale_session(
        &self,
        employee_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PendingReviewEntry>, EngineError> {
        let today = self.local_date(now);
        let mut session = match self.db.get_open_session(employee_id)? {
            Some(session) if session.date < today => session,
            _ => return Ok(None),
        };

        let boundary = day_end(session.date, self.config.sessions.local_offset());
        let from = session.state;
        session.force_close(boundary)?;
        let raw_hours = session.credited_hours(boundary);
        let entry = self.review.enqueue_forced_close(&session, raw_hours, now)?;
        self.publish(&session, from, boundary);
        Ok(Some(entry))
    }

    fn apply_to_today(
        &self,
        operation: &'static str,
        employee_id: &str,
        apply: impl FnOnce(&mut WorkSession, DateTime<Utc>) -> Result<Transition, EngineError>,
    ) -> Result<WorkSessionView, EngineError> {
        let _guard = self.locks.acquire(employee_id);
        let now = self.clock.now();
        self.close_stale_session(employee_id, now)?;
        let today = self.local_date(now);

        let mut session = self
            .db
            .get_session(employee_id, today)?
            .ok_or_else(|| self.rejected(operation, employee_id, EngineError::SessionNotStarted))?;

        match apply(&mut session, now) {
            Ok(Transition::Changed { from, .. }) => {
                self.db.upsert_session(&session, now)?;
                self.publish(&session, from, now);
            }
            Ok(Transition::Unchanged) => {
                tracing::debug!(
                    operation,
                    employee_id = %employee_id,
                    state = session.state.as_str(),
                    "Idempotent request; state unchanged"
                );
            }
            Err(err) => return Err(self.rejected(operation, employee_id, err)),
        }
        Ok(session.view(now))
    }

    fn publish(&self, session: &WorkSession, from: SessionState, at: DateTime<Utc>) {
        let transition = StateTransition {
            employee_id: session.employee_id.clone(),
            date: session.date.to_string(),
            from_state: from,
            to_state: session.state,
            at: at.to_rfc3339(),
            credited_hours: session.credited_hours(at),
        };
        tracing::info!(
            employee_id = %transition.employee_id,
            date = %transition.date,
            from = from.as_str(),
            to = transition.to_state.as_str(),
            credited_hours = transition.credited_hours,
            "Session transition"
        );
        self.broadcaster.publish(&transition);
    }

    fn rejected(
        &self,
        operation: &'static str,
        employee_id: &str,
        err: EngineError,
    ) -> EngineError {
        tracing::debug!(
            operation,
            employee_id = %employee_id,
            code = err.code(),
            "Request rejected"
        );
        err
    }
}
