//! SQLite persistence for attendance-daemon.
//!
//! This is the single-writer store backing the daemon: work sessions with
//! their pause intervals, the review queue, the credited-hours history and
//! the daily-progress records consulted before a day can end. Multi-row
//! changes (closing a session and queueing its review, resolving a review and
//! writing history) happen in one transaction.

use attendance_daemon_protocol::{
    parse_date, HistoryEntry, LocationFix, PendingReviewEntry, ReviewReason, SessionState,
    WorkLocationType,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::path::PathBuf;

use crate::session::{Pause, WorkSession};

pub const HISTORY_SOURCE_COMPLETED: &str = "completed";
pub const HISTORY_SOURCE_REVIEW_APPROVED: &str = "review_approved";
pub const HISTORY_SOURCE_REVIEW_REJECTED: &str = "review_rejected";

const SESSION_COLUMNS: &str = "employee_id, work_date, state, started_at, ended_at, \
     work_location_type, target_hours, start_fix, end_fix";
const REVIEW_COLUMNS: &str = "id, employee_id, work_date, raw_hours_worked, capped_hours, \
     reason, created_at, resolved_amount, resolved_at";

pub struct Db {
    path: PathBuf,
}

impl Db {
    pub fn new(path: PathBuf) -> Result<Self, String> {
        let db = Self { path };
        db.init_schema()?;
        Ok(db)
    }

    pub fn get_session(
        &self,
        employee_id: &str,
        date: NaiveDate,
    ) -> Result<Option<WorkSession>, String> {
        self.with_connection(|conn| {
            let sql = format!(
                "SELECT {} FROM work_sessions WHERE employee_id = ?1 AND work_date = ?2",
                SESSION_COLUMNS
            );
            let row = conn
                .query_row(&sql, params![employee_id, date.to_string()], read_session_row)
                .optional()
                .map_err(|err| format!("Failed to query session: {}", err))?;
            match row {
                Some(row) => Ok(Some(hydrate_session(conn, row)?)),
                None => Ok(None),
            }
        })
    }

    /// Most recent Active/Paused session for an employee, whatever its date.
    pub fn get_open_session(&self, employee_id: &str) -> Result<Option<WorkSession>, String> {
        self.with_connection(|conn| {
            let sql = format!(
                "SELECT {} FROM work_sessions \
                 WHERE employee_id = ?1 AND state IN ('active', 'paused') \
                 ORDER BY work_date DESC LIMIT 1",
                SESSION_COLUMNS
            );
            let row = conn
                .query_row(&sql, params![employee_id], read_session_row)
                .optional()
                .map_err(|err| format!("Failed to query open session: {}", err))?;
            match row {
                Some(row) => Ok(Some(hydrate_session(conn, row)?)),
                None => Ok(None),
            }
        })
    }

    /// Active/Paused sessions whose calendar date is before `date`.
    pub fn list_open_sessions_before(&self, date: NaiveDate) -> Result<Vec<WorkSession>, String> {
        self.with_connection(|conn| {
            let sql = format!(
                "SELECT {} FROM work_sessions \
                 WHERE state IN ('active', 'paused') AND work_date < ?1 \
                 ORDER BY work_date ASC, employee_id ASC",
                SESSION_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|err| format!("Failed to prepare open sessions query: {}", err))?;
            let rows = stmt
                .query_map(params![date.to_string()], read_session_row)
                .map_err(|err| format!("Failed to read open session rows: {}", err))?;

            let mut raw = Vec::new();
            for row in rows {
                raw.push(row.map_err(|err| format!("Failed to decode session row: {}", err))?);
            }
            drop(stmt);

            raw.into_iter()
                .map(|row| hydrate_session(conn, row))
                .collect()
        })
    }

    pub fn upsert_session(
        &self,
        session: &WorkSession,
        updated_at: DateTime<Utc>,
    ) -> Result<(), String> {
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| format!("Failed to begin transaction: {}", err))?;
            write_session(&tx, session, updated_at)?;
            tx.commit()
                .map_err(|err| format!("Failed to commit session: {}", err))
        })
    }

    /// Persists a `Completed` session together with its history row.
    pub fn complete_session(
        &self,
        session: &WorkSession,
        credited_hours: f64,
        recorded_at: DateTime<Utc>,
    ) -> Result<(), String> {
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| format!("Failed to begin transaction: {}", err))?;
            write_session(&tx, session, recorded_at)?;
            write_history(
                &tx,
                &session.employee_id,
                session.date,
                credited_hours,
                HISTORY_SOURCE_COMPLETED,
                recorded_at,
            )?;
            tx.commit()
                .map_err(|err| format!("Failed to commit completed session: {}", err))
        })
    }

    /// Persists a force-closed session and queues its review entry.
    pub fn close_for_review(
        &self,
        session: &WorkSession,
        raw_hours_worked: f64,
        capped_hours: f64,
        reason: ReviewReason,
        created_at: DateTime<Utc>,
    ) -> Result<PendingReviewEntry, String> {
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| format!("Failed to begin transaction: {}", err))?;
            write_session(&tx, session, created_at)?;
            tx.execute(
                "INSERT INTO review_entries \
                    (employee_id, work_date, raw_hours_worked, capped_hours, reason, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session.employee_id,
                    session.date.to_string(),
                    raw_hours_worked,
                    capped_hours,
                    reason.as_str(),
                    created_at.to_rfc3339()
                ],
            )
            .map_err(|err| format!("Failed to insert review entry: {}", err))?;
            let id = tx.last_insert_rowid();
            tx.commit()
                .map_err(|err| format!("Failed to commit review entry: {}", err))?;

            Ok(PendingReviewEntry {
                id,
                employee_id: session.employee_id.clone(),
                date: session.date.to_string(),
                raw_hours_worked,
                capped_hours,
                reason,
                created_at: created_at.to_rfc3339(),
                resolved_amount: None,
                resolved_at: None,
            })
        })
    }

    pub fn list_pending_reviews(&self) -> Result<Vec<PendingReviewEntry>, String> {
        self.with_connection(|conn| {
            let sql = format!(
                "SELECT {} FROM review_entries WHERE resolved_at IS NULL \
                 ORDER BY created_at ASC, id ASC",
                REVIEW_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|err| format!("Failed to prepare review query: {}", err))?;
            let rows = stmt
                .query_map([], read_review_row)
                .map_err(|err| format!("Failed to read review rows: {}", err))?;

            let mut entries = Vec::new();
            for row in rows {
                let row = row.map_err(|err| format!("Failed to decode review row: {}", err))?;
                entries.push(row.into_entry()?);
            }
            Ok(entries)
        })
    }

    pub fn get_review(&self, id: i64) -> Result<Option<PendingReviewEntry>, String> {
        self.with_connection(|conn| {
            let sql = format!("SELECT {} FROM review_entries WHERE id = ?1", REVIEW_COLUMNS);
            let row = conn
                .query_row(&sql, params![id], read_review_row)
                .optional()
                .map_err(|err| format!("Failed to query review entry: {}", err))?;
            row.map(|row| row.into_entry()).transpose()
        })
    }

    /// Resolves an unresolved review entry and writes `amount` to history.
    /// Returns `None` when the entry does not exist or is already resolved.
    pub fn resolve_review(
        &self,
        id: i64,
        amount: f64,
        source: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<Option<PendingReviewEntry>, String> {
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| format!("Failed to begin transaction: {}", err))?;

            let sql = format!(
                "SELECT {} FROM review_entries WHERE id = ?1 AND resolved_at IS NULL",
                REVIEW_COLUMNS
            );
            let row = tx
                .query_row(&sql, params![id], read_review_row)
                .optional()
                .map_err(|err| format!("Failed to query review entry: {}", err))?;
            let Some(row) = row else {
                return Ok(None);
            };
            let mut entry = row.into_entry()?;
            let date = parse_date(&entry.date)
                .ok_or_else(|| format!("Invalid review date: {}", entry.date))?;

            tx.execute(
                "UPDATE review_entries SET resolved_amount = ?1, resolved_at = ?2 WHERE id = ?3",
                params![amount, resolved_at.to_rfc3339(), id],
            )
            .map_err(|err| format!("Failed to resolve review entry: {}", err))?;
            write_history(&tx, &entry.employee_id, date, amount, source, resolved_at)?;
            tx.commit()
                .map_err(|err| format!("Failed to commit review resolution: {}", err))?;

            entry.resolved_amount = Some(amount);
            entry.resolved_at = Some(resolved_at.to_rfc3339());
            Ok(Some(entry))
        })
    }

    pub fn list_history(
        &self,
        employee_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, String> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT employee_id, work_date, credited_hours, source, recorded_at \
                     FROM attendance_history WHERE employee_id = ?1 \
                     ORDER BY work_date DESC LIMIT ?2",
                )
                .map_err(|err| format!("Failed to prepare history query: {}", err))?;
            let rows = stmt
                .query_map(params![employee_id, limit as i64], |row| {
                    Ok(HistoryEntry {
                        employee_id: row.get(0)?,
                        date: row.get(1)?,
                        credited_hours: row.get(2)?,
                        source: row.get(3)?,
                        recorded_at: row.get(4)?,
                    })
                })
                .map_err(|err| format!("Failed to read history rows: {}", err))?;

            let mut entries = Vec::new();
            for row in rows {
                entries.push(row.map_err(|err| format!("Failed to decode history row: {}", err))?);
            }
            Ok(entries)
        })
    }

    pub fn upsert_progress(
        &self,
        employee_id: &str,
        date: NaiveDate,
        note: &str,
        recorded_at: DateTime<Utc>,
    ) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO daily_progress (employee_id, work_date, note, recorded_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(employee_id, work_date) DO UPDATE SET \
                    note = excluded.note, \
                    recorded_at = excluded.recorded_at",
                params![employee_id, date.to_string(), note, recorded_at.to_rfc3339()],
            )
            .map_err(|err| format!("Failed to upsert daily progress: {}", err))?;
            Ok(())
        })
    }

    pub fn has_progress(&self, employee_id: &str, date: NaiveDate) -> Result<bool, String> {
        let count = self.with_connection(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM daily_progress WHERE employee_id = ?1 AND work_date = ?2",
                params![employee_id, date.to_string()],
                |row| row.get::<_, i64>(0),
            )
            .map_err(|err| format!("Failed to count daily progress: {}", err))
        })?;
        Ok(count > 0)
    }

    fn init_schema(&self) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS work_sessions (
                    employee_id TEXT NOT NULL,
                    work_date TEXT NOT NULL,
                    state TEXT NOT NULL,
                    started_at TEXT NOT NULL,
                    ended_at TEXT,
                    work_location_type TEXT NOT NULL,
                    target_hours REAL NOT NULL,
                    start_fix TEXT,
                    end_fix TEXT,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (employee_id, work_date)
                 );
                 CREATE INDEX IF NOT EXISTS work_sessions_state
                    ON work_sessions (state, work_date);
                 CREATE TABLE IF NOT EXISTS pause_intervals (
                    employee_id TEXT NOT NULL,
                    work_date TEXT NOT NULL,
                    seq INTEGER NOT NULL,
                    paused_at TEXT NOT NULL,
                    resumed_at TEXT,
                    PRIMARY KEY (employee_id, work_date, seq)
                 );
                 CREATE TABLE IF NOT EXISTS review_entries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    employee_id TEXT NOT NULL,
                    work_date TEXT NOT NULL,
                    raw_hours_worked REAL NOT NULL,
                    capped_hours REAL NOT NULL,
                    reason TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    resolved_amount REAL,
                    resolved_at TEXT
                 );
                 CREATE TABLE IF NOT EXISTS attendance_history (
                    employee_id TEXT NOT NULL,
                    work_date TEXT NOT NULL,
                    credited_hours REAL NOT NULL,
                    source TEXT NOT NULL,
                    recorded_at TEXT NOT NULL,
                    PRIMARY KEY (employee_id, work_date)
                 );
                 CREATE TABLE IF NOT EXISTS daily_progress (
                    employee_id TEXT NOT NULL,
                    work_date TEXT NOT NULL,
                    note TEXT NOT NULL,
                    recorded_at TEXT NOT NULL,
                    PRIMARY KEY (employee_id, work_date)
                 );
                 COMMIT;",
            )
            .map_err(|err| format!("Failed to initialize schema: {}", err))?;
            Ok(())
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, String>,
    ) -> Result<T, String> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection, String> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| format!("Failed to create daemon data dir: {}", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| format!("Failed to open sqlite db: {}", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| format!("Failed to enable WAL: {}", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| format!("Failed to set synchronous: {}", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| format!("Failed to set busy_timeout: {}", err))?;

        Ok(conn)
    }
}

struct SessionRow {
    employee_id: String,
    work_date: String,
    state: String,
    started_at: String,
    ended_at: Option<String>,
    work_location_type: String,
    target_hours: f64,
    start_fix: Option<String>,
    end_fix: Option<String>,
}

fn read_session_row(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        employee_id: row.get(0)?,
        work_date: row.get(1)?,
        state: row.get(2)?,
        started_at: row.get(3)?,
        ended_at: row.get(4)?,
        work_location_type: row.get(5)?,
        target_hours: row.get(6)?,
        start_fix: row.get(7)?,
        end_fix: row.get(8)?,
    })
}

fn hydrate_session(conn: &Connection, row: SessionRow) -> Result<WorkSession, String> {
    let date = parse_date(&row.work_date)
        .ok_or_else(|| format!("Invalid session date: {}", row.work_date))?;
    let state = SessionState::from_str(&row.state)
        .ok_or_else(|| format!("Invalid session state: {}", row.state))?;
    let work_location_type = WorkLocationType::from_str(&row.work_location_type)
        .ok_or_else(|| format!("Invalid work location type: {}", row.work_location_type))?;

    let mut stmt = conn
        .prepare(
            "SELECT paused_at, resumed_at FROM pause_intervals \
             WHERE employee_id = ?1 AND work_date = ?2 ORDER BY seq ASC",
        )
        .map_err(|err| format!("Failed to prepare pause query: {}", err))?;
    let rows = stmt
        .query_map(params![row.employee_id, row.work_date], |pause| {
            Ok((pause.get::<_, String>(0)?, pause.get::<_, Option<String>>(1)?))
        })
        .map_err(|err| format!("Failed to read pause rows: {}", err))?;

    let mut pauses = Vec::new();
    for pause in rows {
        let (paused_at, resumed_at) =
            pause.map_err(|err| format!("Failed to decode pause row: {}", err))?;
        pauses.push(Pause {
            paused_at: parse_timestamp(&paused_at)?,
            resumed_at: resumed_at.as_deref().map(parse_timestamp).transpose()?,
        });
    }

    Ok(WorkSession {
        employee_id: row.employee_id,
        date,
        state,
        started_at: parse_timestamp(&row.started_at)?,
        ended_at: row.ended_at.as_deref().map(parse_timestamp).transpose()?,
        pauses,
        work_location_type,
        target_hours: row.target_hours,
        start_fix: decode_fix(row.start_fix)?,
        end_fix: decode_fix(row.end_fix)?,
    })
}

fn write_session(
    conn: &Connection,
    session: &WorkSession,
    updated_at: DateTime<Utc>,
) -> Result<(), String> {
    let date = session.date.to_string();
    conn.execute(
        "INSERT INTO work_sessions \
            (employee_id, work_date, state, started_at, ended_at, work_location_type, \
             target_hours, start_fix, end_fix, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
         ON CONFLICT(employee_id, work_date) DO UPDATE SET \
            state = excluded.state, \
            started_at = excluded.started_at, \
            ended_at = excluded.ended_at, \
            work_location_type = excluded.work_location_type, \
            target_hours = excluded.target_hours, \
            start_fix = excluded.start_fix, \
            end_fix = excluded.end_fix, \
            updated_at = excluded.updated_at",
        params![
            session.employee_id,
            date,
            session.state.as_str(),
            session.started_at.to_rfc3339(),
            session.ended_at.map(|value| value.to_rfc3339()),
            session.work_location_type.as_str(),
            session.target_hours,
            encode_fix(session.start_fix.as_ref())?,
            encode_fix(session.end_fix.as_ref())?,
            updated_at.to_rfc3339()
        ],
    )
    .map_err(|err| format!("Failed to upsert session: {}", err))?;

    conn.execute(
        "DELETE FROM pause_intervals WHERE employee_id = ?1 AND work_date = ?2",
        params![session.employee_id, date],
    )
    .map_err(|err| format!("Failed to clear pause intervals: {}", err))?;

    for (seq, pause) in session.pauses.iter().enumerate() {
        conn.execute(
            "INSERT INTO pause_intervals (employee_id, work_date, seq, paused_at, resumed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.employee_id,
                date,
                seq as i64,
                pause.paused_at.to_rfc3339(),
                pause.resumed_at.map(|value| value.to_rfc3339())
            ],
        )
        .map_err(|err| format!("Failed to insert pause interval: {}", err))?;
    }

    Ok(())
}

fn write_history(
    conn: &Connection,
    employee_id: &str,
    date: NaiveDate,
    credited_hours: f64,
    source: &str,
    recorded_at: DateTime<Utc>,
) -> Result<(), String> {
    conn.execute(
        "INSERT INTO attendance_history (employee_id, work_date, credited_hours, source, recorded_at) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(employee_id, work_date) DO UPDATE SET \
            credited_hours = excluded.credited_hours, \
            source = excluded.source, \
            recorded_at = excluded.recorded_at",
        params![
            employee_id,
            date.to_string(),
            credited_hours,
            source,
            recorded_at.to_rfc3339()
        ],
    )
    .map_err(|err| format!("Failed to write attendance history: {}", err))?;
    Ok(())
}

struct ReviewRow {
    id: i64,
    employee_id: String,
    work_date: String,
    raw_hours_worked: f64,
    capped_hours: f64,
    reason: String,
    created_at: String,
    resolved_amount: Option<f64>,
    resolved_at: Option<String>,
}

impl ReviewRow {
    fn into_entry(self) -> Result<PendingReviewEntry, String> {
        let reason = ReviewReason::from_str(&self.reason)
            .ok_or_else(|| format!("Invalid review reason: {}", self.reason))?;
        Ok(PendingReviewEntry {
            id: self.id,
            employee_id: self.employee_id,
            date: self.work_date,
            raw_hours_worked: self.raw_hours_worked,
            capped_hours: self.capped_hours,
            reason,
            created_at: self.created_at,
            resolved_amount: self.resolved_amount,
            resolved_at: self.resolved_at,
        })
    }
}

fn read_review_row(row: &Row<'_>) -> rusqlite::Result<ReviewRow> {
    Ok(ReviewRow {
        id: row.get(0)?,
        employee_id: row.get(1)?,
        work_date: row.get(2)?,
        raw_hours_worked: row.get(3)?,
        capped_hours: row.get(4)?,
        reason: row.get(5)?,
        created_at: row.get(6)?,
        resolved_amount: row.get(7)?,
        resolved_at: row.get(8)?,
    })
}

fn encode_fix(fix: Option<&LocationFix>) -> Result<Option<String>, String> {
    fix.map(|fix| {
        serde_json::to_string(fix).map_err(|err| format!("Failed to serialize fix: {}", err))
    })
    .transpose()
}

fn decode_fix(value: Option<String>) -> Result<Option<LocationFix>, String> {
    value
        .map(|raw| {
            serde_json::from_str(&raw).map_err(|err| format!("Failed to parse stored fix: {}", err))
        })
        .transpose()
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| format!("Invalid stored timestamp {}: {}", value, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendance_daemon_protocol::LocationSource;
    use chrono::TimeZone;

    fn test_db() -> (tempfile::TempDir, Db) {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let db = Db::new(temp_dir.path().join("attendance.db")).expect("db init");
        (temp_dir, db)
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 9).unwrap()
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 9, hour, minute, 0).unwrap()
    }

    fn session() -> WorkSession {
        WorkSession::begin(
            "emp-1",
            day(),
            at(9, 0),
            WorkLocationType::Office,
            8.0,
            Some(LocationFix {
                latitude: 19.16,
                longitude: 72.84,
                accuracy_meters: 15.0,
                source: LocationSource::DeviceLowAccuracy,
                captured_at: at(8, 59).to_rfc3339(),
            }),
        )
    }

    #[test]
    fn schema_includes_engine_tables() {
        let (_dir, db) = test_db();
        let tables = db
            .with_connection(|conn| {
                let mut stmt = conn
                    .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")
                    .map_err(|err| err.to_string())?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))
                    .map_err(|err| err.to_string())?;
                let mut names = Vec::new();
                for row in rows {
                    names.push(row.map_err(|err| err.to_string())?);
                }
                Ok(names)
            })
            .expect("list tables");

        for table in [
            "work_sessions",
            "pause_intervals",
            "review_entries",
            "attendance_history",
            "daily_progress",
        ] {
            assert!(tables.iter().any(|name| name == table), "missing {}", table);
        }
    }

    #[test]
    fn upserts_and_fetches_sessions_with_pauses() {
        let (_dir, db) = test_db();
        let mut record = session();
        record.pause(at(12, 0)).expect("pause");
        record.resume(at(12, 30)).expect("resume");
        record.pause(at(15, 0)).expect("pause");
        db.upsert_session(&record, at(15, 0)).expect("upsert");

        let loaded = db
            .get_session("emp-1", day())
            .expect("query")
            .expect("session exists");
        assert_eq!(loaded, record);

        let open = db.get_open_session("emp-1").expect("open query");
        assert_eq!(open.map(|s| s.state), Some(SessionState::Paused));
    }

    #[test]
    fn session_writes_stamp_the_supplied_time() {
        let (_dir, db) = test_db();
        let mut record = session();
        db.upsert_session(&record, at(9, 0)).expect("upsert");
        record.finish(at(17, 30), None).expect("finish");
        db.complete_session(&record, 8.5, at(17, 30)).expect("complete");

        let updated_at: String = db
            .with_connection(|conn| {
                conn.query_row(
                    "SELECT updated_at FROM work_sessions WHERE employee_id = ?1",
                    params!["emp-1"],
                    |row| row.get(0),
                )
                .map_err(|err| err.to_string())
            })
            .expect("updated_at");
        assert_eq!(updated_at, at(17, 30).to_rfc3339());
    }

    #[test]
    fn lists_open_sessions_before_a_date() {
        let (_dir, db) = test_db();
        db.upsert_session(&session(), at(9, 0)).expect("upsert");

        let mut closed = session();
        closed.employee_id = "emp-2".to_string();
        closed.finish(at(17, 0), None).expect("finish");
        db.upsert_session(&closed, at(17, 0)).expect("upsert closed");

        assert!(db.list_open_sessions_before(day()).expect("same day").is_empty());
        let next_day = day().succ_opt().unwrap();
        let open = db.list_open_sessions_before(next_day).expect("next day");
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].employee_id, "emp-1");
    }

    #[test]
    fn completing_writes_history() {
        let (_dir, db) = test_db();
        let mut record = session();
        record.finish(at(17, 0), None).expect("finish");
        db.complete_session(&record, 8.0, at(17, 0)).expect("complete");

        let history = db.list_history("emp-1", 10).expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].credited_hours, 8.0);
        assert_eq!(history[0].source, HISTORY_SOURCE_COMPLETED);
    }

    #[test]
    fn review_entries_resolve_once() {
        let (_dir, db) = test_db();
        let mut record = session();
        record.force_close(at(18, 30)).expect("force close");
        let entry = db
            .close_for_review(&record, 9.5, 8.0, ReviewReason::MidnightForcedClose, at(18, 30))
            .expect("queue review");

        assert_eq!(db.list_pending_reviews().expect("pending").len(), 1);
        let stored = db
            .get_session("emp-1", day())
            .expect("query")
            .expect("exists");
        assert_eq!(stored.state, SessionState::PendingReview);

        let resolved = db
            .resolve_review(entry.id, 6.0, HISTORY_SOURCE_REVIEW_APPROVED, at(20, 0))
            .expect("resolve")
            .expect("entry was pending");
        assert_eq!(resolved.resolved_amount, Some(6.0));
        assert!(db.list_pending_reviews().expect("pending").is_empty());
        assert!(db
            .resolve_review(entry.id, 1.0, HISTORY_SOURCE_REVIEW_APPROVED, at(21, 0))
            .expect("second resolve")
            .is_none());

        let history = db.list_history("emp-1", 10).expect("history");
        assert_eq!(history[0].credited_hours, 6.0);
        assert_eq!(history[0].source, HISTORY_SOURCE_REVIEW_APPROVED);
    }

    #[test]
    fn progress_is_tracked_per_day() {
        let (_dir, db) = test_db();
        assert!(!db.has_progress("emp-1", day()).expect("query"));
        db.upsert_progress("emp-1", day(), "Shipped the report", at(16, 0))
            .expect("record");
        db.upsert_progress("emp-1", day(), "Shipped the report v2", at(16, 5))
            .expect("overwrite");
        assert!(db.has_progress("emp-1", day()).expect("query"));
        assert!(!db
            .has_progress("emp-1", day().succ_opt().unwrap())
            .expect("query"));
    }
}
