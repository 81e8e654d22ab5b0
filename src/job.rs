use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::errors::ApiError;
use crate::link::InspectLink;
use crate::models::DecoratedItem;

/// Per-entry resolution state.
#[derive(Debug, Clone)]
enum EntryState {
    Pending,
    Resolved(Box<DecoratedItem>),
    Failed(ApiError),
}

#[derive(Debug)]
struct JobEntry {
    link: InspectLink,
    price: Option<u64>,
    state: EntryState,
}

/// The flushed HTTP response for a job: a single object for plain requests,
/// an array in submission order for bulk requests.
#[derive(Debug)]
pub struct JobFlush {
    pub status: StatusCode,
    pub body: serde_json::Value,
}

struct JobInner {
    entries: Vec<JobEntry>,
    reply: Option<oneshot::Sender<JobFlush>>,
}

/// Aggregates the asynchronous per-link results of one HTTP request and
/// flushes the response exactly once, when nothing is pending anymore.
pub struct Job {
    id: Uuid,
    ip: String,
    bulk: bool,
    inner: Mutex<JobInner>,
}

impl Job {
    pub fn new(ip: impl Into<String>, bulk: bool) -> (Arc<Self>, oneshot::Receiver<JobFlush>) {
        let (tx, rx) = oneshot::channel();
        let job = Arc::new(Self {
            id: Uuid::new_v4(),
            ip: ip.into(),
            bulk,
            inner: Mutex::new(JobInner {
                entries: Vec::new(),
                reply: Some(tx),
            }),
        });
        (job, rx)
    }

    pub const fn id(&self) -> Uuid {
        self.id
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub const fn is_bulk(&self) -> bool {
        self.bulk
    }

    /// Register one link before the job is put in motion. Duplicate asset
    /// ids collapse onto the first entry.
    pub fn add(&self, link: InspectLink, price: Option<u64>) {
        let mut inner = self.inner.lock().expect("job lock poisoned");
        if inner.entries.iter().any(|e| e.link.a == link.a) {
            return;
        }
        inner.entries.push(JobEntry {
            link,
            price,
            state: EntryState::Pending,
        });
    }

    /// Links that have not resolved yet, in submission order.
    pub fn remaining_links(&self) -> Vec<(InspectLink, Option<u64>)> {
        self.inner
            .lock()
            .expect("job lock poisoned")
            .entries
            .iter()
            .filter(|e| matches!(e.state, EntryState::Pending))
            .map(|e| (e.link.clone(), e.price))
            .collect()
    }

    pub fn remaining_size(&self) -> usize {
        self.inner
            .lock()
            .expect("job lock poisoned")
            .entries
            .iter()
            .filter(|e| matches!(e.state, EntryState::Pending))
            .count()
    }

    pub fn link_for(&self, asset_id: &str) -> Option<InspectLink> {
        self.inner
            .lock()
            .expect("job lock poisoned")
            .entries
            .iter()
            .find(|e| e.link.a == asset_id)
            .map(|e| e.link.clone())
    }

    /// Record the outcome for one asset. Flushes the HTTP response when the
    /// last pending entry settles.
    pub fn set_response(&self, asset_id: &str, result: Result<DecoratedItem, ApiError>) {
        let mut inner = self.inner.lock().expect("job lock poisoned");
        let Some(entry) = inner.entries.iter_mut().find(|e| e.link.a == asset_id) else {
            debug!(job = %self.id, asset_id, "response for unknown asset, ignoring");
            return;
        };
        if !matches!(entry.state, EntryState::Pending) {
            // at-most-one-successful-response: later duplicates are redundant
            return;
        }
        entry.state = match result {
            Ok(item) => EntryState::Resolved(Box::new(item)),
            Err(err) => EntryState::Failed(err),
        };
        Self::maybe_flush(self.bulk, &mut inner);
    }

    /// Fail every still-pending entry with the same error.
    pub fn set_response_remaining(&self, err: ApiError) {
        let mut inner = self.inner.lock().expect("job lock poisoned");
        for entry in &mut inner.entries {
            if matches!(entry.state, EntryState::Pending) {
                entry.state = EntryState::Failed(err);
            }
        }
        Self::maybe_flush(self.bulk, &mut inner);
    }

    fn maybe_flush(bulk: bool, inner: &mut JobInner) {
        if inner
            .entries
            .iter()
            .any(|e| matches!(e.state, EntryState::Pending))
        {
            return;
        }
        let Some(reply) = inner.reply.take() else {
            return;
        };

        let flush = if bulk {
            let body: Vec<serde_json::Value> = inner
                .entries
                .iter()
                .map(|entry| match &entry.state {
                    EntryState::Resolved(item) => {
                        serde_json::to_value(item).unwrap_or_default()
                    }
                    EntryState::Failed(err) => err.envelope(),
                    EntryState::Pending => unreachable!("flush requires no pending entries"),
                })
                .collect();
            JobFlush {
                status: StatusCode::OK,
                body: serde_json::Value::Array(body),
            }
        } else {
            match inner.entries.first().map(|e| &e.state) {
                Some(EntryState::Resolved(item)) => JobFlush {
                    status: StatusCode::OK,
                    body: serde_json::to_value(item).unwrap_or_default(),
                },
                Some(EntryState::Failed(err)) => JobFlush {
                    status: err.status(),
                    body: err.envelope(),
                },
                _ => JobFlush {
                    status: ApiError::GenericBad.status(),
                    body: ApiError::GenericBad.envelope(),
                },
            }
        };

        let _ = reply.send(flush);
    }
}
