//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::deletion::{ApprovalAuthority, DeleteCoordinator, PendingDeletes};
use crate::guard::{PathGuard, ProtectedSet};
use crate::writer::AtomicWriter;

/// Shared application state
///
/// Built once at startup and handed to every handler. Dropping the last
/// clone tears down the pending delete registry with it.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    guard: PathGuard,
    writer: AtomicWriter,
    deletes: DeleteCoordinator,
}

impl AppState {
    /// Create a new application state
    ///
    /// `config.storage.root` should already be canonical; the protected set is
    /// derived from it.
    pub fn new(config: Config, authority: Arc<dyn ApprovalAuthority>) -> Self {
        let protected = ProtectedSet::for_root(&config.storage.root, &config.storage.protected);
        tracing::debug!(protected = ?protected, "Protected names loaded");

        let guard = PathGuard::new(config.storage.root.clone(), protected);
        let writer = AtomicWriter::new(guard.clone());
        let deletes = DeleteCoordinator::new(
            guard.clone(),
            writer.clone(),
            PendingDeletes::new(config.approval.pending_ttl()),
            authority,
            config.approval.timeout(),
        );

        Self {
            inner: Arc::new(AppStateInner {
                config,
                guard,
                writer,
                deletes,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the path guard
    pub fn guard(&self) -> &PathGuard {
        &self.inner.guard
    }

    /// Get the file writer
    pub fn writer(&self) -> &AtomicWriter {
        &self.inner.writer
    }

    /// Get the delete coordinator
    pub fn deletes(&self) -> &DeleteCoordinator {
        &self.inner.deletes
    }

    /// Resolve every pending delete as interrupted
    pub fn shutdown(&self) {
        self.inner.deletes.shutdown();
    }
}
