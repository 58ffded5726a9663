//! Per-employee mutual exclusion.
//!
//! Every session mutation for an employee runs while holding that employee's
//! guard; requests for different employees proceed in parallel. Guards release
//! on drop, so every exit path (including errors and panics) frees the lock.
//! Table entries are evicted as soon as no guard or waiter references them.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Slot {
    held: Mutex<bool>,
    released: Condvar,
}

#[derive(Default)]
pub struct EmployeeLocks {
    table: Mutex<HashMap<String, Arc<Slot>>>,
}

pub struct EmployeeGuard<'a> {
    locks: &'a EmployeeLocks,
    employee_id: String,
    slot: Arc<Slot>,
}

impl EmployeeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the employee's lock is free.
    pub fn acquire(&self, employee_id: &str) -> EmployeeGuard<'_> {
        let slot = self.slot_for(employee_id);
        {
            let mut held = slot.held.lock().unwrap_or_else(|err| err.into_inner());
            while *held {
                held = slot
                    .released
                    .wait(held)
                    .unwrap_or_else(|err| err.into_inner());
            }
            *held = true;
        }
        EmployeeGuard {
            locks: self,
            employee_id: employee_id.to_string(),
            slot,
        }
    }

    /// Like `acquire`, but gives up after `timeout`.
    pub fn try_acquire_for(
        &self,
        employee_id: &str,
        timeout: Duration,
    ) -> Option<EmployeeGuard<'_>> {
        let slot = self.slot_for(employee_id);
        let deadline = Instant::now() + timeout;
        let acquired = {
            let mut held = slot.held.lock().unwrap_or_else(|err| err.into_inner());
            loop {
                if !*held {
                    *held = true;
                    break true;
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break false;
                }
                let (next, _) = slot
                    .released
                    .wait_timeout(held, remaining)
                    .unwrap_or_else(|err| err.into_inner());
                held = next;
            }
        };

        if acquired {
            Some(EmployeeGuard {
                locks: self,
                employee_id: employee_id.to_string(),
                slot,
            })
        } else {
            drop(slot);
            self.evict_if_idle(employee_id);
            None
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.table
            .lock()
            .map(|table| table.len())
            .unwrap_or_default()
    }

    fn slot_for(&self, employee_id: &str) -> Arc<Slot> {
        let mut table = self.table.lock().unwrap_or_else(|err| err.into_inner());
        Arc::clone(table.entry(employee_id.to_string()).or_default())
    }

    fn evict_if_idle(&self, employee_id: &str) {
        let mut table = self.table.lock().unwrap_or_else(|err| err.into_inner());
        // Only the table itself still points at an idle slot.
        if table
            .get(employee_id)
            .map(|slot| Arc::strong_count(slot) == 1)
            .unwrap_or(false)
        {
            table.remove(employee_id);
        }
    }
}

impl Drop for EmployeeGuard<'_> {
    fn drop(&mut self) {
        {
            let mut held = self.slot.held.lock().unwrap_or_else(|err| err.into_inner());
            *held = false;
        }
        self.slot.released.notify_one();

        // Drop our reference before checking whether anyone else still waits.
        let slot = std::mem::take(&mut self.slot);
        drop(slot);
        self.locks.evict_if_idle(&self.employee_id);
    }
}
