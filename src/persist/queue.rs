//! Durable-intent save queue
//!
//! Finalized messages are queued for debounced, batched saves with capped
//! concurrency; failures are retried with exponential backoff up to a cap,
//! then reported and mirrored to the local fallback store. The queue keeps
//! accumulating while the backend is offline and reprocesses the failed
//! queue as soon as a liveness probe succeeds.
//!
//! Split in two layers: `QueueCore` is the plain decision state (pending and
//! failed queues, debounce/backoff deadlines), driven by a worker thread that
//! owns a tokio runtime for the async backend calls and talks to the rest of
//! the system over crossbeam channels.

use super::backend::{BackendError, StorageBackend};
use super::fallback::FallbackStore;
use crate::session::{ConversationMessage, PersistenceState, SessionStore};
use crate::utils::{Clock, SystemClock};
use crate::{MurmurError, Result};
use chrono::{DateTime, Duration, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::runtime::Runtime;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Configuration for the persistence queue.
#[derive(Clone, Debug)]
pub struct PersistenceConfig {
    /// How long to wait for more messages before flushing a batch.
    pub debounce: Duration,

    /// Queue depth that triggers a batch without waiting for the debounce.
    pub batch_size: usize,

    /// Bound on concurrent batch operations against the backend.
    pub max_concurrent_batches: usize,

    /// Attempts before a message is marked permanently failed.
    pub max_retry_count: u32,

    /// Base delay for exponential backoff: `base * 2^(retry_count - 1)`.
    pub retry_delay_base: Duration,

    /// Interval of the online/offline liveness probe.
    pub ping_interval: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::milliseconds(300),
            batch_size: 8,
            max_concurrent_batches: 2,
            max_retry_count: 3,
            retry_delay_base: Duration::seconds(1),
            ping_interval: Duration::seconds(5),
        }
    }
}

impl PersistenceConfig {
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_retry_delay_base(mut self, base: Duration) -> Self {
        self.retry_delay_base = base;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be at least 1".to_string());
        }
        if self.max_concurrent_batches == 0 {
            return Err("max_concurrent_batches must be at least 1".to_string());
        }
        if self.retry_delay_base <= Duration::zero() {
            return Err("retry_delay_base must be positive".to_string());
        }
        Ok(())
    }
}

/// One save intent. Lives only inside the pending/failed queues.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub session_id: String,
    pub message_id: Uuid,
    pub retry_count: u32,
    /// Backoff gate; the request is not retried before this instant.
    pub not_before: Option<DateTime<Utc>>,
}

/// What to do with a request after a failed attempt.
#[derive(Debug, Clone)]
pub enum FailureDisposition {
    Retry {
        retry_count: u32,
        next_attempt: DateTime<Utc>,
    },
    PermanentlyFailed {
        retry_count: u32,
    },
}

/// Commands accepted by the queue worker.
#[derive(Debug, Clone)]
pub enum QueueCommand {
    Queue { session_id: String, message_id: Uuid },
    FlushNow,
    Shutdown,
}

/// Events emitted by the queue worker.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Saved {
        session_id: String,
        message_id: Uuid,
    },
    Failed {
        session_id: String,
        message_id: Uuid,
        retry_count: u32,
        next_attempt: DateTime<Utc>,
    },
    /// Out of retries; reported, never silently dropped.
    PermanentlyFailed {
        session_id: String,
        message_id: Uuid,
        error: String,
    },
    WentOffline,
    CameOnline,
    Shutdown,
}

/// Deterministic queue state: everything here is plain data plus deadline
/// arithmetic, so tests drive it with explicit instants.
pub struct QueueCore {
    config: PersistenceConfig,
    pending: VecDeque<SaveRequest>,
    failed: Vec<SaveRequest>,
    debounce_deadline: Option<DateTime<Utc>>,
    online: bool,
}

impl QueueCore {
    pub fn new(config: PersistenceConfig) -> Self {
        Self {
            config,
            pending: VecDeque::new(),
            failed: Vec::new(),
            debounce_deadline: None,
            online: true,
        }
    }

    /// Add a save intent. Re-queuing a message already tracked is a no-op.
    pub fn enqueue(&mut self, session_id: &str, message_id: Uuid, now: DateTime<Utc>) -> bool {
        let tracked = self
            .pending
            .iter()
            .chain(self.failed.iter())
            .any(|r| r.message_id == message_id && r.session_id == session_id);
        if tracked {
            return false;
        }
        self.pending.push_back(SaveRequest {
            session_id: session_id.to_string(),
            message_id,
            retry_count: 0,
            not_before: None,
        });
        if self.debounce_deadline.is_none() {
            self.debounce_deadline = Some(now + self.config.debounce);
        }
        true
    }

    /// Make everything pending due immediately.
    pub fn flush_now(&mut self, now: DateTime<Utc>) {
        if !self.pending.is_empty() {
            self.debounce_deadline = Some(now);
        }
    }

    /// Take the next batch if one is due: the debounce window elapsed or the
    /// queue is deep enough. Batches never span sessions because the batch
    /// save RPC is per-session.
    pub fn ready_batch(&mut self, now: DateTime<Utc>) -> Option<Vec<SaveRequest>> {
        if !self.online {
            return None;
        }
        self.promote_due_failed(now);

        if self.pending.is_empty() {
            self.debounce_deadline = None;
            return None;
        }

        let due = self.pending.len() >= self.config.batch_size
            || matches!(self.debounce_deadline, Some(d) if now >= d);
        if !due {
            return None;
        }

        let session_id = self.pending[0].session_id.clone();
        let mut batch = Vec::new();
        let mut rest = VecDeque::new();
        while let Some(request) = self.pending.pop_front() {
            if batch.len() < self.config.batch_size && request.session_id == session_id {
                batch.push(request);
            } else {
                rest.push_back(request);
            }
        }
        self.pending = rest;
        self.debounce_deadline = if self.pending.is_empty() {
            None
        } else {
            Some(now + self.config.debounce)
        };
        Some(batch)
    }

    /// Account one failed attempt and decide the request's fate. Permanent
    /// backend rejections skip the backoff ladder.
    pub fn record_failure(
        &mut self,
        mut request: SaveRequest,
        now: DateTime<Utc>,
        transient: bool,
    ) -> FailureDisposition {
        request.retry_count += 1;
        let retry_count = request.retry_count;

        if !transient || retry_count >= self.config.max_retry_count {
            return FailureDisposition::PermanentlyFailed { retry_count };
        }

        let delay = self.config.retry_delay_base * 2_i32.pow(retry_count - 1);
        let next_attempt = now + delay;
        request.not_before = Some(next_attempt);
        self.failed.push(request);
        FailureDisposition::Retry {
            retry_count,
            next_attempt,
        }
    }

    /// Flip the online flag. Coming back online makes the whole failed queue
    /// due immediately.
    pub fn set_online(&mut self, online: bool, now: DateTime<Utc>) -> bool {
        if self.online == online {
            return false;
        }
        self.online = online;
        if online {
            for request in &mut self.failed {
                request.not_before = Some(now);
            }
        }
        true
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn failed_len(&self) -> usize {
        self.failed.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.failed.is_empty()
    }

    /// Earliest instant at which `ready_batch` could produce work. None
    /// while offline: only the liveness probe can unblock anything.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        if !self.online {
            return None;
        }
        let mut deadline = if self.pending.is_empty() {
            None
        } else {
            self.debounce_deadline
        };
        for request in &self.failed {
            if let Some(not_before) = request.not_before {
                deadline = Some(match deadline {
                    Some(d) if d <= not_before => d,
                    _ => not_before,
                });
            }
        }
        deadline
    }

    fn promote_due_failed(&mut self, now: DateTime<Utc>) {
        let mut still_failed = Vec::new();
        for request in self.failed.drain(..) {
            match request.not_before {
                Some(not_before) if not_before <= now => self.pending.push_back(request),
                _ => still_failed.push(request),
            }
        }
        self.failed = still_failed;
        if !self.pending.is_empty() && self.debounce_deadline.is_none() {
            self.debounce_deadline = Some(now);
        }
    }
}

/// Cloneable handle for feeding the queue and observing its events.
#[derive(Clone)]
pub struct QueueHandle {
    command_tx: Sender<QueueCommand>,
    event_rx: Receiver<QueueEvent>,
}

impl QueueHandle {
    /// Enqueue a message for a debounced async save. Preview placeholders
    /// are ignored by contract.
    pub fn queue_message(&self, session_id: &str, message: &ConversationMessage) -> Result<()> {
        if message.is_preview {
            debug!(message_id = %message.id, "ignoring preview message");
            return Ok(());
        }
        self.command_tx
            .send(QueueCommand::Queue {
                session_id: session_id.to_string(),
                message_id: message.id,
            })
            .map_err(|e| MurmurError::ChannelError(format!("failed to queue message: {}", e)))
    }

    /// Skip the remaining debounce window.
    pub fn flush_now(&self) -> Result<()> {
        self.command_tx
            .send(QueueCommand::FlushNow)
            .map_err(|e| MurmurError::ChannelError(format!("failed to flush queue: {}", e)))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(QueueCommand::Shutdown)
            .map_err(|e| MurmurError::ChannelError(format!("failed to stop queue: {}", e)))
    }

    pub fn try_recv_event(&self) -> Option<QueueEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn recv_event_timeout(&self, timeout: std::time::Duration) -> Option<QueueEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }
}

/// Persistence queue with channel-based communication.
pub struct PersistenceQueue {
    config: PersistenceConfig,
    command_tx: Sender<QueueCommand>,
    command_rx: Receiver<QueueCommand>,
    event_tx: Sender<QueueEvent>,
    event_rx: Receiver<QueueEvent>,
}

/// Completion notice sent back by a spawned batch task.
struct BatchDone {
    requests: Vec<SaveRequest>,
    result: std::result::Result<(), BackendError>,
}

impl PersistenceQueue {
    pub fn new(config: PersistenceConfig) -> Result<Self> {
        config.validate().map_err(MurmurError::ConfigError)?;
        let (command_tx, command_rx) = bounded(100);
        let (event_tx, event_rx) = bounded(100);
        Ok(Self {
            config,
            command_tx,
            command_rx,
            event_tx,
            event_rx,
        })
    }

    pub fn handle(&self) -> QueueHandle {
        QueueHandle {
            command_tx: self.command_tx.clone(),
            event_rx: self.event_rx.clone(),
        }
    }

    /// Start the worker thread.
    ///
    /// The worker owns a tokio runtime for the async backend calls; batch
    /// operations run concurrently up to the configured cap.
    pub fn start_worker(
        self,
        store: SessionStore,
        backend: Arc<dyn StorageBackend>,
        fallback: Option<FallbackStore>,
    ) -> Result<JoinHandle<()>> {
        let config = self.config.clone();
        let command_rx = self.command_rx.clone();
        let event_tx = self.event_tx.clone();

        std::thread::Builder::new()
            .name("murmur-persist".to_string())
            .spawn(move || {
                info!("persistence worker starting");

                let runtime = match Runtime::new() {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!("failed to create tokio runtime: {}", e);
                        let _ = event_tx.try_send(QueueEvent::Shutdown);
                        return;
                    }
                };

                worker_loop(
                    &runtime, config, command_rx, event_tx, store, backend, fallback,
                );
                info!("persistence worker stopped");
            })
            .map_err(|e| MurmurError::ChannelError(format!("failed to spawn worker: {}", e)))
    }
}

fn worker_loop(
    runtime: &Runtime,
    config: PersistenceConfig,
    command_rx: Receiver<QueueCommand>,
    event_tx: Sender<QueueEvent>,
    store: SessionStore,
    backend: Arc<dyn StorageBackend>,
    fallback: Option<FallbackStore>,
) {
    let clock = SystemClock;
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_batches));
    let (done_tx, done_rx) = bounded::<BatchDone>(100);
    let mut core = QueueCore::new(config.clone());
    let mut next_ping = clock.now();
    let mut in_flight: usize = 0;
    let mut shutting_down = false;

    loop {
        let now = clock.now();

        // liveness probe
        if !shutting_down && now >= next_ping {
            let online = runtime.block_on(backend.ping()).is_ok();
            if core.set_online(online, now) {
                if online {
                    info!("backend reachable again, reprocessing failed queue");
                    let _ = event_tx.try_send(QueueEvent::CameOnline);
                } else {
                    warn!("backend offline, holding saves");
                    let _ = event_tx.try_send(QueueEvent::WentOffline);
                }
            }
            next_ping = now + config.ping_interval;
        }

        // dispatch due batches up to the concurrency cap
        while !shutting_down && in_flight < config.max_concurrent_batches {
            let Some(batch) = core.ready_batch(now) else {
                break;
            };

            let mut requests = Vec::new();
            let mut messages = Vec::new();
            for request in batch {
                if !store.begin_save(&request.session_id, request.message_id) {
                    debug!(message_id = %request.message_id, "skipping save; message gone or already durable");
                    continue;
                }
                match store.message(&request.session_id, request.message_id) {
                    Some(message) => {
                        messages.push(message);
                        requests.push(request);
                    }
                    None => debug!(message_id = %request.message_id, "message deleted before save"),
                }
            }
            if requests.is_empty() {
                continue;
            }

            debug!(count = requests.len(), "dispatching save batch");
            in_flight += 1;
            let session_id = requests[0].session_id.clone();
            let backend = backend.clone();
            let semaphore = semaphore.clone();
            let done_tx = done_tx.clone();
            runtime.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                let result = if messages.len() == 1 {
                    backend.save_message(&session_id, &messages[0]).await
                } else {
                    backend.batch_save_messages(&session_id, &messages).await
                };
                let _ = done_tx.send(BatchDone { requests, result });
            });
        }

        if shutting_down && in_flight == 0 {
            let _ = event_tx.try_send(QueueEvent::Shutdown);
            return;
        }

        // sleep until the next deadline, a command, or a batch completion
        let mut deadline = next_ping;
        if !shutting_down && in_flight < config.max_concurrent_batches {
            if let Some(d) = core.next_deadline() {
                deadline = deadline.min(d);
            }
        }
        let timeout = (deadline - clock.now())
            .to_std()
            .unwrap_or_default()
            .min(std::time::Duration::from_millis(500));

        crossbeam_channel::select! {
            recv(command_rx) -> cmd => match cmd {
                Ok(QueueCommand::Queue { session_id, message_id }) => {
                    core.enqueue(&session_id, message_id, clock.now());
                }
                Ok(QueueCommand::FlushNow) => core.flush_now(clock.now()),
                Ok(QueueCommand::Shutdown) | Err(_) => {
                    debug!("persistence worker shutting down");
                    shutting_down = true;
                }
            },
            recv(done_rx) -> done => {
                if let Ok(done) = done {
                    in_flight -= 1;
                    handle_completion(&mut core, &store, &fallback, &event_tx, done, clock.now());
                }
            }
            default(timeout) => {}
        }
    }
}

fn handle_completion(
    core: &mut QueueCore,
    store: &SessionStore,
    fallback: &Option<FallbackStore>,
    event_tx: &Sender<QueueEvent>,
    done: BatchDone,
    now: DateTime<Utc>,
) {
    match done.result {
        Ok(()) => {
            for request in done.requests {
                // a stale completion (content updated mid-save) leaves the
                // message Pending; the re-queued update saves the new content
                if store.complete_save(&request.session_id, request.message_id) {
                    let _ = event_tx.try_send(QueueEvent::Saved {
                        session_id: request.session_id,
                        message_id: request.message_id,
                    });
                } else {
                    debug!(message_id = %request.message_id, "save completion superseded by newer content");
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "save batch failed");
            if matches!(e, BackendError::Offline) && core.set_online(false, now) {
                let _ = event_tx.try_send(QueueEvent::WentOffline);
            }
            let transient = e.is_transient();
            for request in done.requests {
                let session_id = request.session_id.clone();
                let message_id = request.message_id;
                match core.record_failure(request, now, transient) {
                    FailureDisposition::Retry {
                        retry_count,
                        next_attempt,
                    } => {
                        if store.fail_save(&session_id, message_id, retry_count, &e.to_string(), now)
                        {
                            let _ = event_tx.try_send(QueueEvent::Failed {
                                session_id,
                                message_id,
                                retry_count,
                                next_attempt,
                            });
                        }
                    }
                    FailureDisposition::PermanentlyFailed { retry_count } => {
                        if !store.fail_save(&session_id, message_id, retry_count, &e.to_string(), now)
                        {
                            continue;
                        }
                        error!(message_id = %message_id, retry_count, "message permanently failed to save");
                        if let (Some(fallback), Some(message)) =
                            (fallback, store.message(&session_id, message_id))
                        {
                            if let Err(fe) = fallback.mirror(&session_id, &message) {
                                warn!(error = %fe, "fallback mirror failed");
                            }
                        }
                        let _ = event_tx.try_send(QueueEvent::PermanentlyFailed {
                            session_id,
                            message_id,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }
    }
}

/// One synchronous save attempt, bypassing the queue. High-priority path for
/// content that must not wait out the debounce window.
pub async fn save_immediately(
    backend: &dyn StorageBackend,
    store: &SessionStore,
    session_id: &str,
    message_id: Uuid,
) -> bool {
    let Some(message) = store.message(session_id, message_id) else {
        return false;
    };
    if message.is_preview {
        return false;
    }
    if message.persistence_state == PersistenceState::Saved {
        return true;
    }

    if !store.begin_save(session_id, message_id) {
        debug!(message_id = %message_id, "immediate save refused; a save is already in flight");
        return false;
    }
    match backend.save_message(session_id, &message).await {
        Ok(()) => {
            store.complete_save(session_id, message_id);
            true
        }
        Err(e) => {
            warn!(message_id = %message_id, error = %e, "immediate save failed");
            store.fail_save(
                session_id,
                message_id,
                message.retry_count + 1,
                &e.to_string(),
                Utc::now(),
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> QueueCore {
        QueueCore::new(PersistenceConfig::default())
    }

    fn req_ids(batch: &[SaveRequest]) -> Vec<Uuid> {
        batch.iter().map(|r| r.message_id).collect()
    }

    #[test]
    fn test_enqueue_is_idempotent() {
        let mut core = core();
        let now = Utc::now();
        let id = Uuid::new_v4();

        assert!(core.enqueue("s1", id, now));
        assert!(!core.enqueue("s1", id, now));
        assert_eq!(core.pending_len(), 1);
    }

    #[test]
    fn test_debounce_holds_then_releases() {
        let mut core = core();
        let now = Utc::now();
        core.enqueue("s1", Uuid::new_v4(), now);

        assert!(core.ready_batch(now + Duration::milliseconds(100)).is_none());
        let batch = core.ready_batch(now + Duration::milliseconds(300)).unwrap();
        assert_eq!(batch.len(), 1);
        assert!(core.is_idle());
    }

    #[test]
    fn test_deep_queue_skips_debounce() {
        let mut core = core();
        let now = Utc::now();
        for _ in 0..8 {
            core.enqueue("s1", Uuid::new_v4(), now);
        }

        let batch = core.ready_batch(now).unwrap();
        assert_eq!(batch.len(), 8);
    }

    #[test]
    fn test_batches_never_span_sessions() {
        let mut core = core();
        let now = Utc::now();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        core.enqueue("s1", a, now);
        core.enqueue("s2", b, now);
        core.enqueue("s1", c, now);

        let first = core.ready_batch(now + Duration::seconds(1)).unwrap();
        assert_eq!(req_ids(&first), vec![a, c]);
        let second = core.ready_batch(now + Duration::seconds(2)).unwrap();
        assert_eq!(req_ids(&second), vec![b]);
    }

    #[test]
    fn test_backoff_doubles_then_gives_up() {
        let mut core = core();
        let now = Utc::now();
        let request = SaveRequest {
            session_id: "s1".to_string(),
            message_id: Uuid::new_v4(),
            retry_count: 0,
            not_before: None,
        };

        let first = core.record_failure(request, now, true);
        let FailureDisposition::Retry { retry_count, next_attempt } = first else {
            panic!("expected retry");
        };
        assert_eq!(retry_count, 1);
        assert_eq!(next_attempt - now, Duration::seconds(1));

        let parked = core.failed[0].clone();
        core.failed.clear();
        let second = core.record_failure(parked, now, true);
        let FailureDisposition::Retry { retry_count, next_attempt } = second else {
            panic!("expected retry");
        };
        assert_eq!(retry_count, 2);
        assert_eq!(next_attempt - now, Duration::seconds(2));

        let parked = core.failed[0].clone();
        core.failed.clear();
        let third = core.record_failure(parked, now, true);
        assert!(matches!(
            third,
            FailureDisposition::PermanentlyFailed { retry_count: 3 }
        ));
        // permanently failed requests leave the retry queue
        assert_eq!(core.failed_len(), 0);
    }

    #[test]
    fn test_permanent_backend_error_skips_backoff() {
        let mut core = core();
        let request = SaveRequest {
            session_id: "s1".to_string(),
            message_id: Uuid::new_v4(),
            retry_count: 0,
            not_before: None,
        };
        let disposition = core.record_failure(request, Utc::now(), false);
        assert!(matches!(
            disposition,
            FailureDisposition::PermanentlyFailed { retry_count: 1 }
        ));
    }

    #[test]
    fn test_failed_requests_wait_out_backoff() {
        let mut core = core();
        let now = Utc::now();
        let request = SaveRequest {
            session_id: "s1".to_string(),
            message_id: Uuid::new_v4(),
            retry_count: 0,
            not_before: None,
        };
        core.record_failure(request, now, true);

        assert!(core.ready_batch(now + Duration::milliseconds(500)).is_none());
        let batch = core.ready_batch(now + Duration::milliseconds(1100)).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].retry_count, 1);
    }

    #[test]
    fn test_offline_holds_everything() {
        let mut core = core();
        let now = Utc::now();
        core.enqueue("s1", Uuid::new_v4(), now);
        assert!(core.set_online(false, now));

        assert!(core.ready_batch(now + Duration::seconds(5)).is_none());
        assert!(core.next_deadline().is_none());
        assert_eq!(core.pending_len(), 1);
    }

    #[test]
    fn test_coming_online_makes_failed_queue_due() {
        let mut core = core();
        let now = Utc::now();
        let request = SaveRequest {
            session_id: "s1".to_string(),
            message_id: Uuid::new_v4(),
            retry_count: 0,
            not_before: None,
        };
        // park with a long backoff, then drop offline
        core.record_failure(request, now, true);
        core.set_online(false, now);

        let later = now + Duration::milliseconds(50);
        assert!(core.set_online(true, later));
        let batch = core.ready_batch(later).unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_flush_now_overrides_debounce() {
        let mut core = core();
        let now = Utc::now();
        core.enqueue("s1", Uuid::new_v4(), now);

        assert!(core.ready_batch(now).is_none());
        core.flush_now(now);
        assert!(core.ready_batch(now).is_some());
    }

    #[test]
    fn test_next_deadline_tracks_debounce_and_backoff() {
        let mut core = core();
        let now = Utc::now();
        assert!(core.next_deadline().is_none());

        core.enqueue("s1", Uuid::new_v4(), now);
        assert_eq!(core.next_deadline(), Some(now + Duration::milliseconds(300)));

        let request = SaveRequest {
            session_id: "s1".to_string(),
            message_id: Uuid::new_v4(),
            retry_count: 2,
            not_before: None,
        };
        core.record_failure(request, now, true);
        // rc=3 would be permanent; use a fresh rc=1 request instead
        let request = SaveRequest {
            session_id: "s1".to_string(),
            message_id: Uuid::new_v4(),
            retry_count: 0,
            not_before: None,
        };
        core.record_failure(request, now, true);
        // debounce (300ms) is earlier than the 1s backoff
        assert_eq!(core.next_deadline(), Some(now + Duration::milliseconds(300)));
    }
}
