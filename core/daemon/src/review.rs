//! Admin review queue for force-closed sessions.
//!
//! Entries are created when the midnight sweep closes an open session and
//! stay pending until an administrator approves an amount or rejects them.
//! Either decision writes the credited hours to the attendance history.

use attendance_daemon_protocol::{PendingReviewEntry, ReviewReason};
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::db::{Db, HISTORY_SOURCE_REVIEW_APPROVED, HISTORY_SOURCE_REVIEW_REJECTED};
use crate::error::EngineError;
use crate::session::WorkSession;

pub struct ReviewQueue {
    db: Arc<Db>,
    ceiling_hours: f64,
}

impl ReviewQueue {
    pub fn new(db: Arc<Db>, ceiling_hours: f64) -> Self {
        Self {
            db,
            ceiling_hours: ceiling_hours.max(0.0),
        }
    }

    /// Persists the closed session and queues it with hours capped at the ceiling.
    pub fn enqueue_forced_close(
        &self,
        session: &WorkSession,
        raw_hours_worked: f64,
        created_at: DateTime<Utc>,
    ) -> Result<PendingReviewEntry, EngineError> {
        let capped_hours = raw_hours_worked.min(self.ceiling_hours).max(0.0);
        let entry = self.db.close_for_review(
            session,
            raw_hours_worked,
            capped_hours,
            ReviewReason::MidnightForcedClose,
            created_at,
        )?;
        tracing::info!(
            entry_id = entry.id,
            employee_id = %entry.employee_id,
            date = %entry.date,
            raw_hours = raw_hours_worked,
            capped_hours,
            "Review entry queued"
        );
        Ok(entry)
    }

    pub fn pending(&self) -> Result<Vec<PendingReviewEntry>, EngineError> {
        Ok(self.db.list_pending_reviews()?)
    }

    pub fn approve(
        &self,
        entry_id: i64,
        amount_hours: f64,
        now: DateTime<Utc>,
    ) -> Result<PendingReviewEntry, EngineError> {
        let entry = self
            .db
            .get_review(entry_id)?
            .filter(|entry| entry.resolved_at.is_none())
            .ok_or(EngineError::ReviewEntryNotFound { id: entry_id })?;
        let amount = clamp_award(amount_hours, entry.capped_hours);
        self.resolve(entry_id, amount, HISTORY_SOURCE_REVIEW_APPROVED, now)
    }

    pub fn reject(
        &self,
        entry_id: i64,
        now: DateTime<Utc>,
    ) -> Result<PendingReviewEntry, EngineError> {
        self.resolve(entry_id, 0.0, HISTORY_SOURCE_REVIEW_REJECTED, now)
    }

    fn resolve(
        &self,
        entry_id: i64,
        amount: f64,
        source: &str,
        now: DateTime<Utc>,
    ) -> Result<PendingReviewEntry, EngineError> {
        let entry = self
            .db
            .resolve_review(entry_id, amount, source, now)?
            .ok_or(EngineError::ReviewEntryNotFound { id: entry_id })?;
        tracing::info!(
            entry_id,
            employee_id = %entry.employee_id,
            date = %entry.date,
            amount,
            source,
            "Review entry resolved"
        );
        Ok(entry)
    }
}

/// Approved hours are clamped to `[0, capped_hours]`.
pub fn clamp_award(amount_hours: f64, capped_hours: f64) -> f64 {
    if amount_hours.is_nan() {
        return 0.0;
    }
    amount_hours.clamp(0.0, capped_hours.max(0.0))
}
