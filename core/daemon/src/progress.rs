//! Daily-progress precondition consulted before a day can end.
//!
//! The engine does not interpret progress; it only asks whether some has
//! been recorded for the employee and date.

use chrono::NaiveDate;
use std::sync::Arc;

use crate::db::Db;

pub trait ProgressGate: Send + Sync {
    fn has_set_daily_progress(&self, employee_id: &str, date: NaiveDate) -> Result<bool, String>;
}

/// Reads the `daily_progress` table populated through `record_progress`.
pub struct DbProgressGate {
    db: Arc<Db>,
}

impl DbProgressGate {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }
}

impl ProgressGate for DbProgressGate {
    fn has_set_daily_progress(&self, employee_id: &str, date: NaiveDate) -> Result<bool, String> {
        self.db.has_progress(employee_id, date)
    }
}

/// Used when `sessions.require_daily_progress` is off.
pub struct NoProgressRequired;

impl ProgressGate for NoProgressRequired {
    fn has_set_daily_progress(&self, _employee_id: &str, _date: NaiveDate) -> Result<bool, String> {
        Ok(true)
    }
}
