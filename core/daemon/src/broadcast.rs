//! Live status fan-out to dashboards.
//!
//! Each subscriber owns a bounded queue. Publishing never blocks: a full queue
//! drops the new event for that subscriber and a disconnected subscriber is
//! removed. Nothing is buffered for late joiners; they read a snapshot first.

use attendance_daemon_protocol::StateTransition;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    Employee(String),
    All,
}

impl Topic {
    fn matches(&self, employee_id: &str) -> bool {
        match self {
            Topic::Employee(id) => id == employee_id,
            Topic::All => true,
        }
    }
}

struct Subscriber {
    id: u64,
    topic: Topic,
    sender: SyncSender<StateTransition>,
}

pub struct Subscription {
    pub id: u64,
    pub receiver: Receiver<StateTransition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BroadcastStats {
    pub subscribers: usize,
    pub published: u64,
    pub dropped: u64,
}

pub struct Broadcaster {
    capacity: usize,
    next_id: AtomicU64,
    published: AtomicU64,
    dropped: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let (sender, receiver) = mpsc::sync_channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|err| err.into_inner());
        subscribers.push(Subscriber { id, topic, sender });
        tracing::debug!(subscription_id = id, "Subscriber added");
        Subscription { id, receiver }
    }

    pub fn unsubscribe(&self, id: u64) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|err| err.into_inner());
        subscribers.retain(|subscriber| subscriber.id != id);
        tracing::debug!(subscription_id = id, "Subscriber removed");
    }

    pub fn publish(&self, transition: &StateTransition) {
        self.published.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|err| err.into_inner());
        subscribers.retain(|subscriber| {
            if !subscriber.topic.matches(&transition.employee_id) {
                return true;
            }
            match subscriber.sender.try_send(transition.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        subscription_id = subscriber.id,
                        employee_id = %transition.employee_id,
                        "Subscriber queue full; dropping transition"
                    );
                    true
                }
                Err(TrySendError::Disconnected(_)) => {
                    tracing::debug!(subscription_id = subscriber.id, "Subscriber disconnected");
                    false
                }
            }
        });
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            subscribers: self
                .subscribers
                .lock()
                .map(|subscribers| subscribers.len())
                .unwrap_or_default(),
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
