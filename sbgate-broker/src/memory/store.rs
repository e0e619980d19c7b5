//! Per-entity message store
//!
//! Holds the ready queue, scheduled messages and locked messages for one
//! queue or subscription. Locks that outlive the lock duration are
//! released back to the ready queue on the next access, unless the message
//! has used up its deliveries, in which case it is dead-lettered.
//!
//! The ready queue is ordered by `(enqueued_at, sequence_number)`; a
//! scheduled message counts as enqueued at its due time.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::BrokerError;
use crate::types::{OutgoingMessage, ReceivedMessage};

/// A message accepted by the broker
#[derive(Debug, Clone)]
pub(crate) struct StoredMessage {
    pub sequence_number: i64,
    pub message_id: String,
    pub message: OutgoingMessage,
    pub enqueued_at: DateTime<Utc>,
    pub delivery_count: u32,
}

impl StoredMessage {
    fn size(&self) -> usize {
        self.message.body.len()
    }
}

struct ScheduledMessage {
    due_at: DateTime<Utc>,
    stored: StoredMessage,
}

struct LockedMessage {
    stored: StoredMessage,
    locked_until: Instant,
}

#[derive(Default)]
struct StoreInner {
    ready: VecDeque<StoredMessage>,
    scheduled: Vec<ScheduledMessage>,
    locked: HashMap<String, LockedMessage>,
    dead_lettered: Vec<StoredMessage>,
    size_bytes: usize,
}

impl StoreInner {
    /// Move due scheduled messages and expired locks into the ready queue
    fn refresh(&mut self, now: DateTime<Utc>, instant: Instant, max_delivery_count: u32) {
        if self.scheduled.iter().any(|s| s.due_at <= now) {
            let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.scheduled)
                .into_iter()
                .partition(|s| s.due_at <= now);
            self.scheduled = pending;
            for scheduled in due {
                let mut stored = scheduled.stored;
                stored.enqueued_at = scheduled.due_at;
                self.insert_ready(stored);
            }
        }

        let expired: Vec<String> = self
            .locked
            .iter()
            .filter(|(_, l)| l.locked_until <= instant)
            .map(|(token, _)| token.clone())
            .collect();
        for token in expired {
            if let Some(locked) = self.locked.remove(&token) {
                debug!(
                    sequence_number = locked.stored.sequence_number,
                    "Lock expired"
                );
                self.release(locked.stored, max_delivery_count);
            }
        }
    }

    fn insert_ready(&mut self, stored: StoredMessage) {
        let key = (stored.enqueued_at, stored.sequence_number);
        let pos = self
            .ready
            .partition_point(|m| (m.enqueued_at, m.sequence_number) < key);
        self.ready.insert(pos, stored);
    }

    /// Return an unlocked message to the ready queue, or dead-letter it
    fn release(&mut self, stored: StoredMessage, max_delivery_count: u32) {
        if stored.delivery_count < max_delivery_count {
            self.insert_ready(stored);
            return;
        }
        warn!(
            sequence_number = stored.sequence_number,
            delivery_count = stored.delivery_count,
            "Max delivery count reached, dead-lettering message"
        );
        self.size_bytes = self.size_bytes.saturating_sub(stored.size());
        self.dead_lettered.push(stored);
    }

    fn next_wake(&self, now: DateTime<Utc>) -> Option<Duration> {
        let scheduled = self
            .scheduled
            .iter()
            .map(|s| (s.due_at - now).to_std().unwrap_or(Duration::ZERO))
            .min();
        let instant = Instant::now();
        let locks = self
            .locked
            .values()
            .map(|l| l.locked_until.saturating_duration_since(instant))
            .min();
        match (scheduled, locks) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Messages for one queue or subscription
pub(crate) struct MessageStore {
    lock_duration: Duration,
    max_delivery_count: u32,
    max_size_bytes: usize,
    inner: Mutex<StoreInner>,
    arrivals: Notify,
}

impl MessageStore {
    pub fn new(lock_duration: Duration, max_delivery_count: u32, max_size_mb: u64) -> Self {
        let max_size_bytes = usize::try_from(max_size_mb.saturating_mul(1024 * 1024))
            .unwrap_or(usize::MAX);
        Self {
            lock_duration,
            max_delivery_count: max_delivery_count.max(1),
            max_size_bytes,
            inner: Mutex::new(StoreInner::default()),
            arrivals: Notify::new(),
        }
    }

    fn reserve(&self, inner: &mut StoreInner, stored: &StoredMessage) -> Result<(), BrokerError> {
        let size = stored.size();
        if inner.size_bytes + size > self.max_size_bytes {
            return Err(BrokerError::QuotaExceeded(format!(
                "entity is limited to {} bytes",
                self.max_size_bytes
            )));
        }
        inner.size_bytes += size;
        Ok(())
    }

    /// Make a message available immediately
    pub fn enqueue(&self, stored: StoredMessage) -> Result<(), BrokerError> {
        {
            let mut inner = self.inner.lock();
            self.reserve(&mut inner, &stored)?;
            inner.insert_ready(stored);
        }
        self.arrivals.notify_waiters();
        Ok(())
    }

    /// Hold a message until `due_at`
    pub fn schedule(&self, stored: StoredMessage, due_at: DateTime<Utc>) -> Result<(), BrokerError> {
        {
            let mut inner = self.inner.lock();
            self.reserve(&mut inner, &stored)?;
            inner.scheduled.push(ScheduledMessage { due_at, stored });
        }
        // Wake waiters so they recompute their deadline
        self.arrivals.notify_waiters();
        Ok(())
    }

    fn take(&self, max_messages: usize) -> (Vec<ReceivedMessage>, Option<Duration>) {
        let now = Utc::now();
        let instant = Instant::now();
        let mut inner = self.inner.lock();
        inner.refresh(now, instant, self.max_delivery_count);

        let mut batch = Vec::new();
        while batch.len() < max_messages {
            let Some(mut stored) = inner.ready.pop_front() else {
                break;
            };
            stored.delivery_count += 1;
            let lock_token = Uuid::new_v4().to_string();
            batch.push(ReceivedMessage {
                body: stored.message.body.clone(),
                message_id: stored.message_id.clone(),
                lock_token: lock_token.clone(),
                sequence_number: stored.sequence_number,
                delivery_count: stored.delivery_count,
                enqueued_at: stored.enqueued_at,
            });
            inner.locked.insert(
                lock_token,
                LockedMessage {
                    stored,
                    locked_until: instant + self.lock_duration,
                },
            );
        }

        let wake = inner.next_wake(now);
        (batch, wake)
    }

    /// Lock up to `max_messages`, waiting up to `max_wait` for the first one
    pub async fn receive(&self, max_messages: usize, max_wait: Duration) -> Vec<ReceivedMessage> {
        if max_messages == 0 {
            return Vec::new();
        }
        let deadline = Instant::now() + max_wait;

        loop {
            // Registered before checking so a concurrent enqueue is not missed
            let notified = self.arrivals.notified();

            let (batch, wake) = self.take(max_messages);
            let now = Instant::now();
            if !batch.is_empty() || now >= deadline {
                return batch;
            }

            let mut wait = deadline - now;
            if let Some(wake) = wake {
                wait = wait.min(wake);
            }

            tokio::select! {
                () = notified => {}
                () = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Remove a locked message for good
    pub fn complete(&self, lock_token: &str) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock();
        let locked = inner
            .locked
            .remove(lock_token)
            .ok_or_else(|| BrokerError::LockLost(lock_token.to_string()))?;

        if locked.locked_until <= Instant::now() {
            inner.release(locked.stored, self.max_delivery_count);
            drop(inner);
            self.arrivals.notify_waiters();
            return Err(BrokerError::LockLost(format!("{} (expired)", lock_token)));
        }

        inner.size_bytes = inner.size_bytes.saturating_sub(locked.stored.size());
        Ok(())
    }

    /// Messages not yet completed, in any state
    #[cfg(test)]
    pub fn message_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.ready.len() + inner.scheduled.len() + inner.locked.len()
    }

    #[cfg(test)]
    pub fn dead_letter_count(&self) -> usize {
        self.inner.lock().dead_lettered.len()
    }
}
