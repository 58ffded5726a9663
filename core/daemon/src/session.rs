//! Per-employee, per-day work session state machine.
//!
//! `NotStarted -> Active -> {Paused <-> Active} -> Completed`, with any open
//! state forced to `PendingReview` at the day boundary. Transitions are pure:
//! callers load a session, apply one operation and persist the result.
//! Credited time is always derived from the stored timestamps.

use attendance_daemon_protocol::{
    LocationFix, PauseInterval, SessionState, WorkLocationType, WorkSessionView,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::clock::hours;
use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq)]
pub struct Pause {
    pub paused_at: DateTime<Utc>,
    pub resumed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkSession {
    pub employee_id: String,
    pub date: NaiveDate,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub pauses: Vec<Pause>,
    pub work_location_type: WorkLocationType,
    pub target_hours: f64,
    pub start_fix: Option<LocationFix>,
    pub end_fix: Option<LocationFix>,
}

/// Result of applying an operation. `Unchanged` covers the idempotent
/// pause-while-paused and resume-while-active cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Changed {
        from: SessionState,
        to: SessionState,
    },
    Unchanged,
}

impl WorkSession {
    pub fn begin(
        employee_id: &str,
        date: NaiveDate,
        now: DateTime<Utc>,
        work_location_type: WorkLocationType,
        target_hours: f64,
        start_fix: Option<LocationFix>,
    ) -> Self {
        Self {
            employee_id: employee_id.to_string(),
            date,
            state: SessionState::Active,
            started_at: now,
            ended_at: None,
            pauses: Vec::new(),
            work_location_type,
            target_hours,
            start_fix,
            end_fix: None,
        }
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<Transition, EngineError> {
        match self.state {
            SessionState::Paused => Ok(Transition::Unchanged),
            SessionState::Active => {
                let paused_at = self.clamp_to_history(now);
                self.pauses.push(Pause {
                    paused_at,
                    resumed_at: None,
                });
                Ok(self.move_to(SessionState::Paused))
            }
            _ => Err(EngineError::SessionNotStarted),
        }
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<Transition, EngineError> {
        match self.state {
            SessionState::Active => Ok(Transition::Unchanged),
            SessionState::Paused => {
                self.close_open_pause(now);
                Ok(self.move_to(SessionState::Active))
            }
            _ => Err(EngineError::SessionNotStarted),
        }
    }

    pub fn finish(
        &mut self,
        now: DateTime<Utc>,
        end_fix: Option<LocationFix>,
    ) -> Result<Transition, EngineError> {
        if !self.state.is_open() {
            return Err(EngineError::SessionNotStarted);
        }
        let ended_at = self.clamp_to_history(now);
        self.close_open_pause(ended_at);
        self.ended_at = Some(ended_at);
        self.end_fix = end_fix;
        Ok(self.move_to(SessionState::Completed))
    }

    /// Server-initiated close at `boundary`; only open sessions qualify.
    pub fn force_close(&mut self, boundary: DateTime<Utc>) -> Result<Transition, EngineError> {
        if !self.state.is_open() {
            return Err(EngineError::SessionNotStarted);
        }
        let ended_at = self.clamp_to_history(boundary);
        self.close_open_pause(ended_at);
        self.ended_at = Some(ended_at);
        Ok(self.move_to(SessionState::PendingReview))
    }

    /// Wall-clock time minus breaks as of `as_of`, never negative.
    pub fn credited(&self, as_of: DateTime<Utc>) -> Duration {
        let end = self.ended_at.unwrap_or(as_of);
        let elapsed = end - self.started_at;
        let credited = elapsed - self.break_time(as_of);
        if credited < Duration::zero() {
            Duration::zero()
        } else {
            credited
        }
    }

    pub fn break_time(&self, as_of: DateTime<Utc>) -> Duration {
        self.pauses
            .iter()
            .map(|pause| {
                let until = pause.resumed_at.unwrap_or(as_of);
                let length = until - pause.paused_at;
                if length < Duration::zero() {
                    Duration::zero()
                } else {
                    length
                }
            })
            .fold(Duration::zero(), |total, length| total + length)
    }

    pub fn credited_hours(&self, as_of: DateTime<Utc>) -> f64 {
        hours(self.credited(as_of))
    }

    pub fn view(&self, as_of: DateTime<Utc>) -> WorkSessionView {
        WorkSessionView {
            employee_id: self.employee_id.clone(),
            date: self.date.to_string(),
            state: self.state,
            started_at: Some(self.started_at.to_rfc3339()),
            ended_at: self.ended_at.map(|value| value.to_rfc3339()),
            pause_intervals: self
                .pauses
                .iter()
                .map(|pause| PauseInterval {
                    paused_at: pause.paused_at.to_rfc3339(),
                    resumed_at: pause.resumed_at.map(|value| value.to_rfc3339()),
                })
                .collect(),
            work_location_type: Some(self.work_location_type),
            target_hours: self.target_hours,
            credited_hours: self.credited_hours(as_of),
            break_hours: hours(self.break_time(as_of)),
            as_of: as_of.to_rfc3339(),
        }
    }

    fn move_to(&mut self, to: SessionState) -> Transition {
        let from = self.state;
        self.state = to;
        Transition::Changed { from, to }
    }

    fn close_open_pause(&mut self, now: DateTime<Utc>) {
        if let Some(pause) = self.pauses.last_mut() {
            if pause.resumed_at.is_none() {
                pause.resumed_at = Some(now.max(pause.paused_at));
            }
        }
    }

    // Keeps pause intervals ordered and non-overlapping if the clock steps back.
    fn clamp_to_history(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let latest = self
            .pauses
            .last()
            .map(|pause| pause.resumed_at.unwrap_or(pause.paused_at))
            .unwrap_or(self.started_at)
            .max(self.started_at);
        now.max(latest)
    }
}

/// View for an employee with no session on `date`.
pub fn not_started_view(
    employee_id: &str,
    date: NaiveDate,
    target_hours: f64,
    as_of: DateTime<Utc>,
) -> WorkSessionView {
    WorkSessionView {
        employee_id: employee_id.to_string(),
        date: date.to_string(),
        state: SessionState::NotStarted,
        started_at: None,
        ended_at: None,
        pause_intervals: Vec::new(),
        work_location_type: None,
        target_hours,
        credited_hours: 0.0,
        break_hours: 0.0,
        as_of: as_of.to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 9, hour, minute, 0).unwrap()
    }

    fn started_at_nine() -> WorkSession {
        WorkSession::begin(
            "emp-1",
            NaiveDate::from_ymd_opt(2026, 3, 9).unwrap(),
            at(9, 0),
            WorkLocationType::Office,
            8.0,
            None,
        )
    }

    #[test]
    fn full_day_credits_wall_clock_minus_breaks() {
        let mut session = started_at_nine();
        session.pause(at(13, 0)).expect("pause");
        session.resume(at(13, 30)).expect("resume");
        let transition = session.finish(at(18, 0), None).expect("end");

        assert_eq!(
            transition,
            Transition::Changed {
                from: SessionState::Active,
                to: SessionState::Completed
            }
        );
        assert_eq!(session.credited_hours(at(23, 0)), 8.5);
        assert_eq!(
            session.credited(at(18, 0)),
            (at(18, 0) - at(9, 0)) - (at(13, 30) - at(13, 0))
        );
    }

    #[test]
    fn double_pause_is_a_no_op() {
        let mut session = started_at_nine();
        session.pause(at(12, 0)).expect("pause");
        let once = session.clone();
        let transition = session.pause(at(12, 10)).expect("second pause");

        assert_eq!(transition, Transition::Unchanged);
        assert_eq!(session, once);
    }

    #[test]
    fn resume_while_active_is_a_no_op() {
        let mut session = started_at_nine();
        let before = session.clone();
        assert_eq!(session.resume(at(10, 0)).expect("resume"), Transition::Unchanged);
        assert_eq!(session, before);
    }

    #[test]
    fn credited_grows_while_active_and_holds_while_paused() {
        let mut session = started_at_nine();
        assert!(session.credited(at(10, 0)) < session.credited(at(11, 0)));

        session.pause(at(11, 0)).expect("pause");
        assert_eq!(session.credited(at(11, 0)), session.credited(at(12, 30)));
        assert_eq!(session.credited_hours(at(12, 30)), 2.0);
    }

    #[test]
    fn end_while_paused_closes_the_open_pause() {
        let mut session = started_at_nine();
        session.pause(at(12, 0)).expect("pause");
        session.finish(at(12, 45), None).expect("end");

        let last = session.pauses.last().expect("pause recorded");
        assert_eq!(last.resumed_at, Some(at(12, 45)));
        assert_eq!(session.ended_at, Some(at(12, 45)));
        assert_eq!(session.credited_hours(at(20, 0)), 3.0);
    }

    #[test]
    fn closed_sessions_reject_further_operations() {
        let mut session = started_at_nine();
        session.finish(at(17, 0), None).expect("end");

        assert_eq!(session.pause(at(17, 5)), Err(EngineError::SessionNotStarted));
        assert_eq!(session.resume(at(17, 5)), Err(EngineError::SessionNotStarted));
        assert_eq!(
            session.finish(at(17, 5), None),
            Err(EngineError::SessionNotStarted)
        );
    }

    #[test]
    fn force_close_freezes_credit_at_boundary() {
        let mut session = WorkSession::begin(
            "emp-1",
            NaiveDate::from_ymd_opt(2026, 3, 9).unwrap(),
            at(23, 0),
            WorkLocationType::Home,
            8.0,
            None,
        );
        let boundary = Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap();
        session.force_close(boundary).expect("force close");

        assert_eq!(session.state, SessionState::PendingReview);
        assert_eq!(session.credited_hours(boundary + Duration::hours(5)), 1.0);
        assert_eq!(session.pause(boundary), Err(EngineError::SessionNotStarted));
    }

    #[test]
    fn pause_intervals_stay_ordered_when_clock_steps_back() {
        let mut session = started_at_nine();
        session.pause(at(12, 0)).expect("pause");
        session.resume(at(12, 30)).expect("resume");
        session.pause(at(12, 10)).expect("pause with skewed clock");

        let pauses = &session.pauses;
        assert_eq!(pauses[1].paused_at, at(12, 30));
        assert!(pauses[0].resumed_at.unwrap() <= pauses[1].paused_at);
    }

    #[test]
    fn credited_is_never_negative() {
        let session = started_at_nine();
        assert_eq!(session.credited(at(8, 0)), Duration::zero());
    }

    #[test]
    fn view_reports_state_and_hours() {
        let mut session = started_at_nine();
        session.pause(at(10, 0)).expect("pause");
        let view = session.view(at(10, 30));
        assert_eq!(view.state, SessionState::Paused);
        assert_eq!(view.credited_hours, 1.0);
        assert_eq!(view.break_hours, 0.5);
        assert_eq!(view.pause_intervals.len(), 1);
        assert!(view.pause_intervals[0].resumed_at.is_none());
        assert_eq!(view.date, "2026-03-09");
    }
}
