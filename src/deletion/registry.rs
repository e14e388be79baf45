//! Pending delete registry
//!
//! Process-wide table of delete requests awaiting a decision. Every
//! operation is a single critical section on one mutex, so a token can be
//! consumed at most once no matter how many requests race for it. The lock
//! is never held across an await.
//!
//! Entries whose requester is still waiting on the admin never expire; the
//! TTL only reclaims entries left behind by the two-phase flow.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::guard::ResolvedPath;

/// A delete request awaiting its outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDelete {
    /// Single-use token identifying the request
    pub token: String,
    /// Basename of the file to delete
    pub filename: String,
    /// Absolute path of the file inside the served root
    pub resolved_path: PathBuf,
    /// Address of the client that asked
    pub requester: String,
    pub created_at: DateTime<Utc>,
}

impl PendingDelete {
    /// Create an entry with a freshly minted token
    pub fn new(target: &ResolvedPath, requester: impl Into<String>) -> Self {
        Self {
            token: Uuid::new_v4().to_string(),
            filename: target.name().to_string(),
            resolved_path: target.path().to_path_buf(),
            requester: requester.into(),
            created_at: Utc::now(),
        }
    }

    pub fn is_older_than(&self, ttl: Duration) -> bool {
        (Utc::now() - self.created_at)
            .to_std()
            .map(|age| age > ttl)
            .unwrap_or(false)
    }
}

/// Why a token could not be consumed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TakeError {
    #[error("Invalid or expired token")]
    UnknownToken,

    #[error("File mismatch")]
    FileMismatch,
}

/// Shared registry of pending deletes
#[derive(Clone)]
pub struct PendingDeletes {
    inner: Arc<PendingDeletesInner>,
}

struct PendingDeletesInner {
    entries: Mutex<HashMap<String, Slot>>,
    ttl: Duration,
}

struct Slot {
    entry: PendingDelete,
    /// A `request` call is blocked on this entry's decision
    awaiting: bool,
}

impl Slot {
    fn is_expired(&self, ttl: Duration) -> bool {
        !self.awaiting && self.entry.is_older_than(ttl)
    }
}

impl PendingDeletes {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(PendingDeletesInner {
                entries: Mutex::new(HashMap::new()),
                ttl,
            }),
        }
    }

    /// Register `entry`. Returns false, leaving the registry untouched, if
    /// its token is already live.
    pub fn register(&self, entry: PendingDelete) -> bool {
        self.insert(entry, false)
    }

    /// Register `entry` for a requester that blocks until its decision.
    ///
    /// The entry is exempt from expiry until it is taken.
    pub fn register_awaiting(&self, entry: PendingDelete) -> bool {
        self.insert(entry, true)
    }

    fn insert(&self, entry: PendingDelete, awaiting: bool) -> bool {
        let mut entries = self.inner.entries.lock();
        if entries.contains_key(&entry.token) {
            return false;
        }
        entries.insert(entry.token.clone(), Slot { entry, awaiting });
        true
    }

    /// Retire `token` unconditionally, returning its entry if it was live.
    pub fn take(&self, token: &str) -> Option<PendingDelete> {
        self.inner.entries.lock().remove(token).map(|slot| slot.entry)
    }

    /// Consume `token` if it is live, unexpired and was issued for `filename`.
    ///
    /// On a file mismatch the entry stays registered. An expired entry is
    /// retired and reported as unknown.
    pub fn take_matching(&self, token: &str, filename: &str) -> Result<PendingDelete, TakeError> {
        let mut entries = self.inner.entries.lock();

        let slot = entries.get(token).ok_or(TakeError::UnknownToken)?;

        if slot.is_expired(self.inner.ttl) {
            entries.remove(token);
            return Err(TakeError::UnknownToken);
        }

        if slot.entry.filename != filename {
            return Err(TakeError::FileMismatch);
        }

        entries
            .remove(token)
            .map(|slot| slot.entry)
            .ok_or(TakeError::UnknownToken)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.inner.entries.lock().contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retire every entry older than the registry's TTL, except those whose
    /// requester is still waiting.
    ///
    /// Returns the number of entries removed
    pub fn purge_expired(&self) -> usize {
        let ttl = self.inner.ttl;
        let mut entries = self.inner.entries.lock();
        let before = entries.len();
        entries.retain(|_, slot| !slot.is_expired(ttl));
        before - entries.len()
    }

    /// Start background expiry sweep
    pub fn start_sweep_task(self, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);

            loop {
                interval.tick().await;
                let count = self.purge_expired();
                if count > 0 {
                    tracing::info!(count = count, "Retired expired delete requests");
                }
            }
        })
    }
}
