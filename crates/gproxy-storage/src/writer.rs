use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sea_orm::{ActiveValue, EntityTrait};
use tokio::sync::Notify;
use tokio::time::{self as tokio_time, MissedTickBehavior};

use crate::db::connect_shared;
use crate::entities;

const QUEUE_CAPACITY: usize = 10_000;
const BATCH_SIZE: usize = 100;
const FLUSH_INTERVAL: Duration = Duration::from_secs(2);
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_millis(50),
    Duration::from_millis(250),
    Duration::from_secs(1),
];

/// One normalized interaction, ready to be inserted as-is. Canonicalization
/// (ShareGPT-style conversation shape, tool/tool_call JSON) happens upstream
/// in the recorder; this stage only persists already-serialized text.
#[derive(Debug, Clone)]
pub struct InteractionRecord {
    pub created_at: String,
    pub model: Option<String>,
    pub source_provider: String,
    pub auth_scheme: String,
    pub conversations: String,
    pub tools: Option<String>,
    pub tool_calls: Option<String>,
    pub raw_request: String,
    pub raw_response: String,
    pub truncated: bool,
}

/// Bounded queue between request handling and the batched writer. Push never
/// blocks and never waits on the writer: once full, the oldest queued record
/// is dropped to make room. Pop blocks until a record is available or the
/// flush interval elapses.
pub struct InteractionQueue {
    inner: Mutex<VecDeque<InteractionRecord>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl InteractionQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Total records dropped so far because the queue was saturated.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn push(&self, record: InteractionRecord) {
        let mut guard = self.inner.lock().expect("interaction queue lock poisoned");
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(record);
        drop(guard);
        self.notify.notify_one();
    }

    fn drain(guard: &mut VecDeque<InteractionRecord>, max: usize) -> Vec<InteractionRecord> {
        let take = max.min(guard.len());
        guard.drain(..take).collect()
    }

    /// Waits for at least one record or `timeout`, whichever comes first,
    /// then returns up to `max` queued records.
    pub async fn next_batch(&self, max: usize, timeout: Duration) -> Vec<InteractionRecord> {
        {
            let mut guard = self.inner.lock().expect("interaction queue lock poisoned");
            if !guard.is_empty() {
                return Self::drain(&mut guard, max);
            }
        }
        let _ = tokio_time::timeout(timeout, self.notify.notified()).await;
        let mut guard = self.inner.lock().expect("interaction queue lock poisoned");
        Self::drain(&mut guard, max)
    }

    /// Drains everything currently queued, for use during shutdown.
    pub fn drain_all(&self) -> Vec<InteractionRecord> {
        let mut guard = self.inner.lock().expect("interaction queue lock poisoned");
        guard.drain(..).collect()
    }
}

impl Default for InteractionQueue {
    fn default() -> Self {
        Self::new(QUEUE_CAPACITY)
    }
}

impl From<InteractionRecord> for entities::interaction::ActiveModel {
    fn from(record: InteractionRecord) -> Self {
        entities::interaction::ActiveModel {
            created_at: ActiveValue::Set(record.created_at),
            model: ActiveValue::Set(record.model),
            source_provider: ActiveValue::Set(record.source_provider),
            auth_scheme: ActiveValue::Set(record.auth_scheme),
            conversations: ActiveValue::Set(record.conversations),
            tools: ActiveValue::Set(record.tools),
            tool_calls: ActiveValue::Set(record.tool_calls),
            raw_request: ActiveValue::Set(record.raw_request),
            raw_response: ActiveValue::Set(record.raw_response),
            truncated: ActiveValue::Set(record.truncated),
            ..Default::default()
        }
    }
}

/// Runs the batched writer loop until cancelled. Intended to be spawned once
/// at startup and left running for the process lifetime; call
/// [`InteractionQueue::drain_all`] plus [`flush_batch`] directly during
/// shutdown to persist whatever is left in the queue.
pub async fn run(queue: Arc<InteractionQueue>, dsn: String) {
    let connection = match connect_shared(&dsn).await {
        Ok(connection) => connection,
        Err(err) => {
            tracing::error!(event = "storage_connect_failed", error = %err, "interaction writer could not connect, exiting");
            return;
        }
    };

    let mut ticker = tokio_time::interval(FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let batch = queue.next_batch(BATCH_SIZE, FLUSH_INTERVAL).await;
        if !batch.is_empty() {
            flush_batch(&connection, batch).await;
        }
        ticker.reset();
    }
}

/// Inserts one batch, retrying transient failures with backoff. A batch that
/// still fails after all retries is dropped; the caller's queue position is
/// already gone by the time this runs, so a dropped batch is a silent data
/// loss event surfaced only via the warning log.
pub async fn flush_batch(connection: &sea_orm::DatabaseConnection, batch: Vec<InteractionRecord>) {
    let len = batch.len();
    let models: Vec<entities::interaction::ActiveModel> =
        batch.into_iter().map(Into::into).collect();

    for (attempt, delay) in RETRY_DELAYS.iter().enumerate() {
        match entities::Interactions::insert_many(models.clone())
            .exec(connection)
            .await
        {
            Ok(_) => return,
            Err(err) => {
                tracing::warn!(
                    event = "interaction_write_retry",
                    attempt = attempt + 1,
                    error = %err,
                    "interaction batch insert failed"
                );
                tokio_time::sleep(*delay).await;
            }
        }
    }

    match entities::Interactions::insert_many(models).exec(connection).await {
        Ok(_) => {}
        Err(err) => {
            tracing::warn!(
                event = "interaction_write_dropped",
                batch_size = len,
                error = %err,
                "interaction batch dropped after exhausting retries"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> InteractionRecord {
        InteractionRecord {
            created_at: "2026-07-28T00:00:00Z".to_string(),
            model: Some("gpt-4o".to_string()),
            source_provider: "openai".to_string(),
            auth_scheme: "openai".to_string(),
            conversations: "[]".to_string(),
            tools: None,
            tool_calls: None,
            raw_request: "{}".to_string(),
            raw_response: "{}".to_string(),
            truncated: false,
        }
    }

    #[test]
    fn push_beyond_capacity_drops_oldest() {
        let queue = InteractionQueue::new(2);
        queue.push(sample());
        queue.push(sample());
        queue.push(sample());
        assert_eq!(queue.dropped_count(), 1);
        assert_eq!(queue.drain_all().len(), 2);
    }

    #[tokio::test]
    async fn next_batch_returns_immediately_when_nonempty() {
        let queue = InteractionQueue::new(10);
        queue.push(sample());
        queue.push(sample());
        let batch = queue.next_batch(100, Duration::from_secs(2)).await;
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn next_batch_caps_at_max() {
        let queue = InteractionQueue::new(10);
        for _ in 0..5 {
            queue.push(sample());
        }
        let batch = queue.next_batch(3, Duration::from_secs(2)).await;
        assert_eq!(batch.len(), 3);
        assert_eq!(queue.drain_all().len(), 2);
    }
}
