use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{interval, sleep};
use tracing::{debug, warn};

use crate::errors::ApiError;
use crate::job::Job;
use crate::link::InspectLink;
use crate::steam::BotController;

/// Number of priority lanes; lane 1 is the highest priority.
pub const LANES: usize = 5;
pub const DEFAULT_PRIORITY: u8 = 4;

/// How often the dispatch concurrency is re-synced to the fleet's
/// readiness.
const CONCURRENCY_TICK: Duration = Duration::from_millis(50);

/// One unit of work waiting for a bot.
pub struct QueueEntry {
    pub link: InspectLink,
    pub ip: String,
    /// 1 (highest) ..= 5 (lowest).
    pub priority: u8,
    pub max_attempts: u32,
    pub attempts: u32,
    pub price: Option<u64>,
    pub job: Arc<Job>,
}

impl QueueEntry {
    fn lane(&self) -> usize {
        usize::from(self.priority.clamp(1, LANES as u8)) - 1
    }
}

/// Returned by the handler after it has recorded the entry's response on
/// the job; `delay` paces the release of the dispatch slot.
pub struct HandlerSuccess {
    pub delay: Duration,
}

pub enum HandlerError {
    /// No ready bot could take the entry. Does not consume an attempt.
    NoBotsAvailable,
    /// The attempt failed; consumes an attempt and may be retried.
    Failed(String),
}

#[async_trait]
pub trait EntryHandler: Send + Sync + 'static {
    async fn handle(&self, entry: &QueueEntry) -> Result<HandlerSuccess, HandlerError>;
}

/// Requeue backoff after a failed attempt: `1000 * 2^(attempts - 1)` ms.
fn retry_backoff(attempts: u32) -> Duration {
    Duration::from_millis((1000.0 * 2f64.powi(attempts as i32 - 1)) as u64)
}

struct QueueState {
    lanes: [VecDeque<QueueEntry>; LANES],
    /// Outstanding entries (queued + in flight) per caller ip.
    users: HashMap<String, usize>,
    processing: usize,
    concurrency: usize,
    paused: bool,
}

impl QueueState {
    fn queued(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    fn pop_highest(&mut self) -> Option<QueueEntry> {
        self.lanes.iter_mut().find_map(VecDeque::pop_front)
    }

    fn release_user(&mut self, ip: &str) {
        if let Some(count) = self.users.get_mut(ip) {
            *count -= 1;
            if *count == 0 {
                self.users.remove(ip);
            }
        }
    }
}

/// Five-lane strict-priority dispatch queue.
///
/// Dispatch concurrency tracks the fleet's ready-bot count; entries are
/// handed to the handler at most `concurrency` at a time, highest lane
/// first, FIFO within a lane. Per-caller accounting is decremented exactly
/// once per entry, at terminal success or terminal failure.
pub struct InspectQueue {
    state: Mutex<QueueState>,
    handler: Arc<dyn EntryHandler>,
    max_simultaneous_requests: usize,
    max_queue_size: usize,
    this: Weak<Self>,
}

impl InspectQueue {
    pub fn new(
        handler: Arc<dyn EntryHandler>,
        max_simultaneous_requests: usize,
        max_queue_size: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            state: Mutex::new(QueueState {
                lanes: Default::default(),
                users: HashMap::new(),
                processing: 0,
                concurrency: 0,
                paused: false,
            }),
            handler,
            max_simultaneous_requests,
            max_queue_size,
            this: this.clone(),
        })
    }

    fn arc(&self) -> Arc<Self> {
        self.this.upgrade().expect("queue outlives its tasks")
    }

    /// Spawn the concurrency-sync loop.
    pub fn start(&self, controller: Arc<BotController>) {
        let queue = self.arc();
        tokio::spawn(async move {
            let mut ticker = interval(CONCURRENCY_TICK);
            loop {
                ticker.tick().await;
                queue.set_concurrency(controller.ready_count());
            }
        });
    }

    /// Sync dispatch concurrency to the fleet's readiness; newly gained
    /// capacity dispatches immediately.
    pub fn set_concurrency(&self, concurrency: usize) {
        let grew = {
            let mut state = self.state.lock().expect("queue lock poisoned");
            let grew = concurrency > state.concurrency;
            state.concurrency = concurrency;
            grew
        };
        if grew {
            self.check();
        }
    }

    pub fn pause(&self) {
        self.state.lock().expect("queue lock poisoned").paused = true;
    }

    pub fn resume(&self) {
        self.state.lock().expect("queue lock poisoned").paused = false;
        self.check();
    }

    /// Admission control, applied before a job's misses are enqueued.
    pub fn admit(&self, ip: &str, incoming: usize) -> Result<(), ApiError> {
        let state = self.state.lock().expect("queue lock poisoned");
        let outstanding = state.users.get(ip).copied().unwrap_or(0);
        if outstanding + incoming > self.max_simultaneous_requests {
            return Err(ApiError::MaxRequests);
        }
        if state.queued() + incoming > self.max_queue_size {
            return Err(ApiError::MaxQueueSize);
        }
        Ok(())
    }

    pub fn enqueue(&self, entry: QueueEntry) {
        debug_assert!((1..=LANES as u8).contains(&entry.priority));
        {
            let mut state = self.state.lock().expect("queue lock poisoned");
            *state.users.entry(entry.ip.clone()).or_insert(0) += 1;
            let lane = entry.lane();
            state.lanes[lane].push_back(entry);
        }
        self.check();
    }

    pub fn size(&self) -> usize {
        self.state.lock().expect("queue lock poisoned").queued()
    }

    pub fn processing_count(&self) -> usize {
        self.state.lock().expect("queue lock poisoned").processing
    }

    pub fn concurrency(&self) -> usize {
        self.state.lock().expect("queue lock poisoned").concurrency
    }

    /// Outstanding entries (queued + in flight) for one caller.
    pub fn user_queued(&self, ip: &str) -> usize {
        self.state
            .lock()
            .expect("queue lock poisoned")
            .users
            .get(ip)
            .copied()
            .unwrap_or(0)
    }

    /// Reject everything still queued and stop dispatching. In-flight
    /// entries settle through their normal paths.
    pub fn drain(&self) {
        let drained: Vec<QueueEntry> = {
            let mut state = self.state.lock().expect("queue lock poisoned");
            state.paused = true;
            let mut drained = Vec::new();
            for lane in &mut state.lanes {
                drained.extend(lane.drain(..));
            }
            for entry in &drained {
                state.release_user(&entry.ip);
            }
            drained
        };
        for entry in drained {
            entry
                .job
                .set_response(&entry.link.a, Err(ApiError::GenericBad));
        }
    }

    /// Dispatch from the highest non-empty lane while capacity remains.
    /// The state lock serializes the descheduling; handler invocations run
    /// concurrently on their own tasks.
    fn check(&self) {
        loop {
            let entry = {
                let mut state = self.state.lock().expect("queue lock poisoned");
                if state.paused || state.processing >= state.concurrency {
                    return;
                }
                let Some(entry) = state.pop_highest() else {
                    return;
                };
                state.processing += 1;
                entry
            };
            tokio::spawn(self.arc().run_entry(entry));
        }
    }

    async fn run_entry(self: Arc<Self>, mut entry: QueueEntry) {
        debug!(
            job = %entry.job.id(),
            asset_id = %entry.link.a,
            priority = entry.priority,
            attempt = entry.attempts,
            "dispatching entry"
        );

        match self.handler.handle(&entry).await {
            Ok(HandlerSuccess { delay }) => {
                // completion pacing: hold the slot until the bot may be
                // reused, then settle the accounting
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                {
                    let mut state = self.state.lock().expect("queue lock poisoned");
                    state.processing -= 1;
                    state.release_user(&entry.ip);
                }
                self.check();
            }
            Err(HandlerError::NoBotsAvailable) => {
                // not the entry's fault: no attempt consumed
                self.release_slot();
                self.requeue_after(entry, None);
            }
            Err(HandlerError::Failed(reason)) => {
                entry.attempts += 1;
                if entry.attempts >= entry.max_attempts {
                    warn!(
                        job = %entry.job.id(),
                        asset_id = %entry.link.a,
                        attempts = entry.attempts,
                        error = %reason,
                        "job failed"
                    );
                    {
                        let mut state = self.state.lock().expect("queue lock poisoned");
                        state.processing -= 1;
                        state.release_user(&entry.ip);
                    }
                    entry
                        .job
                        .set_response(&entry.link.a, Err(ApiError::TtlExceeded));
                    self.check();
                } else {
                    self.release_slot();
                    self.requeue_after(entry, Some(reason));
                }
            }
        }
    }

    fn release_slot(&self) {
        self.state.lock().expect("queue lock poisoned").processing -= 1;
        self.check();
    }

    /// Put the entry back at the head of its lane after the retry backoff.
    fn requeue_after(&self, entry: QueueEntry, reason: Option<String>) {
        let backoff = retry_backoff(entry.attempts);
        if let Some(reason) = reason {
            debug!(
                asset_id = %entry.link.a,
                attempt = entry.attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %reason,
                "retrying entry"
            );
        }
        let queue = self.arc();
        tokio::spawn(async move {
            sleep(backoff).await;
            {
                let mut state = queue.state.lock().expect("queue lock poisoned");
                let lane = entry.lane();
                state.lanes[lane].push_front(entry);
            }
            queue.check();
        });
    }
}
