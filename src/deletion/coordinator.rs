//! Delete authorization state machine
//!
//! ```text
//! request ──► Requested ──► Approved     file removed, 200
//!                 │    ├──► Denied       403 + token
//!                 │    ├──► TimedOut     403 + token (denied by deadline)
//!                 │    └──► Interrupted  500 (shutdown / authority gone)
//!                 └── confirm(token, name) ──► file removed, 200
//! ```
//!
//! Every terminal transition retires the token through the registry, and
//! only the caller that actually retired it may remove the file.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::approval::{ApprovalAuthority, Decision};
use super::registry::{PendingDelete, PendingDeletes, TakeError};
use crate::guard::{basename, GuardError, PathGuard};
use crate::writer::{AtomicWriter, RemoveOutcome, WriteError};

/// Negative outcomes of a delete attempt
#[derive(Debug, thiserror::Error)]
pub enum DeleteError {
    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Delete request denied by admin")]
    Denied { token: String },

    #[error("Delete request timed out waiting for admin")]
    TimedOut { token: String },

    #[error("Server interrupted")]
    Interrupted { token: String },

    #[error("Invalid or expired token")]
    UnknownToken,

    #[error("File mismatch")]
    FileMismatch,

    #[error("Error deleting {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

impl From<TakeError> for DeleteError {
    fn from(e: TakeError) -> Self {
        match e {
            TakeError::UnknownToken => DeleteError::UnknownToken,
            TakeError::FileMismatch => DeleteError::FileMismatch,
        }
    }
}

impl From<WriteError> for DeleteError {
    fn from(e: WriteError) -> Self {
        match e {
            WriteError::Guard(e) => DeleteError::Guard(e),
            WriteError::Io { name, source } => DeleteError::Io { name, source },
        }
    }
}

/// A completed delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub token: String,
    pub filename: String,
    pub removed: RemoveOutcome,
}

/// Drives delete requests through approval.
#[derive(Clone)]
pub struct DeleteCoordinator {
    inner: Arc<DeleteCoordinatorInner>,
}

struct DeleteCoordinatorInner {
    guard: PathGuard,
    writer: AtomicWriter,
    registry: PendingDeletes,
    authority: Arc<dyn ApprovalAuthority>,
    decision_timeout: Duration,
    shutdown: CancellationToken,
}

enum Resolution {
    Decided(Decision),
    TimedOut,
    Interrupted(String),
}

impl DeleteCoordinator {
    pub fn new(
        guard: PathGuard,
        writer: AtomicWriter,
        registry: PendingDeletes,
        authority: Arc<dyn ApprovalAuthority>,
        decision_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(DeleteCoordinatorInner {
                guard,
                writer,
                registry,
                authority,
                decision_timeout,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn registry(&self) -> &PendingDeletes {
        &self.inner.registry
    }

    /// Resolve every pending and future request as interrupted.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Ask for `raw_name` to be deleted and wait for the authority's decision.
    pub async fn request(&self, raw_name: &str, requester: &str) -> Result<DeleteOutcome, DeleteError> {
        let target = self.inner.guard.resolve(raw_name)?;

        let is_file = tokio::fs::metadata(target.path())
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(DeleteError::NotFound(target.name().to_string()));
        }

        let entry = PendingDelete::new(&target, requester);
        let token = entry.token.clone();
        if !self.inner.registry.register_awaiting(entry.clone()) {
            return Err(DeleteError::Interrupted { token });
        }
        // Retires the token if this future is dropped before a decision.
        let _retire = RetireOnDrop {
            registry: self.inner.registry.clone(),
            token: token.clone(),
        };

        tracing::info!(
            file = %entry.filename,
            token = %token,
            requester = %requester,
            "Delete requested, awaiting admin decision"
        );

        let resolution = tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => Resolution::Interrupted("server shutting down".into()),
            decided = tokio::time::timeout(self.inner.decision_timeout, self.inner.authority.decide(&entry)) => {
                match decided {
                    Ok(Ok(decision)) => Resolution::Decided(decision),
                    Ok(Err(e)) => Resolution::Interrupted(e.to_string()),
                    Err(_) => Resolution::TimedOut,
                }
            }
        };

        match resolution {
            Resolution::Decided(Decision::Approved) => {
                let entry = self
                    .inner
                    .registry
                    .take(&token)
                    .ok_or(DeleteError::UnknownToken)?;
                let removed = self.remove(&entry).await?;
                tracing::info!(file = %entry.filename, token = %token, "File deleted by admin approval");
                Ok(DeleteOutcome {
                    token,
                    filename: entry.filename,
                    removed,
                })
            }
            Resolution::Decided(Decision::Denied) => {
                self.inner.registry.take(&token);
                tracing::info!(file = %entry.filename, token = %token, "Delete request denied");
                Err(DeleteError::Denied { token })
            }
            Resolution::TimedOut => {
                self.inner.registry.take(&token);
                tracing::warn!(
                    file = %entry.filename,
                    token = %token,
                    timeout_secs = self.inner.decision_timeout.as_secs(),
                    "Delete request timed out"
                );
                Err(DeleteError::TimedOut { token })
            }
            Resolution::Interrupted(reason) => {
                self.inner.registry.take(&token);
                tracing::warn!(file = %entry.filename, token = %token, reason = %reason, "Delete request cancelled");
                Err(DeleteError::Interrupted { token })
            }
        }
    }

    /// Finalize a pending delete with its token.
    pub async fn confirm(&self, raw_name: &str, token: &str) -> Result<DeleteOutcome, DeleteError> {
        let entry = self.inner.registry.take_matching(token, basename(raw_name))?;
        let removed = self.remove(&entry).await?;

        tracing::info!(file = %entry.filename, token = %token, "File deleted by confirmation");
        Ok(DeleteOutcome {
            token: entry.token,
            filename: entry.filename,
            removed,
        })
    }

    async fn remove(&self, entry: &PendingDelete) -> Result<RemoveOutcome, DeleteError> {
        match self.inner.writer.remove(&entry.filename).await {
            Ok(RemoveOutcome::AlreadyAbsent) => {
                tracing::debug!(file = %entry.filename, "File already gone at delete time");
                Ok(RemoveOutcome::AlreadyAbsent)
            }
            Ok(removed) => Ok(removed),
            Err(e) => {
                tracing::error!(file = %entry.filename, error = %e, "Error deleting file");
                Err(e.into())
            }
        }
    }
}

struct RetireOnDrop {
    registry: PendingDeletes,
    token: String,
}

impl Drop for RetireOnDrop {
    fn drop(&mut self) {
        if self.registry.take(&self.token).is_some() {
            tracing::debug!(token = %self.token, "Delete request abandoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deletion::approval::ApprovalError;
    use crate::guard::ProtectedSet;
    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio::sync::{mpsc, Mutex};

    struct Fixed(Decision);

    #[async_trait]
    impl ApprovalAuthority for Fixed {
        async fn decide(&self, _entry: &PendingDelete) -> Result<Decision, ApprovalError> {
            Ok(self.0)
        }
    }

    struct Never;

    #[async_trait]
    impl ApprovalAuthority for Never {
        async fn decide(&self, _entry: &PendingDelete) -> Result<Decision, ApprovalError> {
            std::future::pending().await
        }
    }

    /// Announces each token, then waits for the test to hand down a decision.
    struct Gate {
        tokens: mpsc::UnboundedSender<String>,
        decisions: Mutex<mpsc::UnboundedReceiver<Decision>>,
    }

    #[async_trait]
    impl ApprovalAuthority for Gate {
        async fn decide(&self, entry: &PendingDelete) -> Result<Decision, ApprovalError> {
            let _ = self.tokens.send(entry.token.clone());
            self.decisions
                .lock()
                .await
                .recv()
                .await
                .ok_or_else(|| ApprovalError::Interrupted("gate closed".into()))
        }
    }

    fn setup(authority: impl ApprovalAuthority + 'static, timeout: Duration) -> (TempDir, DeleteCoordinator) {
        setup_with_ttl(authority, timeout, Duration::from_secs(60))
    }

    fn setup_with_ttl(
        authority: impl ApprovalAuthority + 'static,
        timeout: Duration,
        ttl: Duration,
    ) -> (TempDir, DeleteCoordinator) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("victim.txt"), b"data").unwrap();
        std::fs::write(dir.path().join("nas.py"), b"server").unwrap();

        let guard = PathGuard::new(dir.path(), ProtectedSet::new(["nas.py"]));
        let coordinator = DeleteCoordinator::new(
            guard.clone(),
            AtomicWriter::new(guard),
            PendingDeletes::new(ttl),
            Arc::new(authority),
            timeout,
        );
        (dir, coordinator)
    }

    const LONG: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn test_approved_removes_file() {
        let (dir, coordinator) = setup(Fixed(Decision::Approved), LONG);

        let outcome = coordinator.request("victim.txt", "10.0.0.2").await.unwrap();

        assert_eq!(outcome.filename, "victim.txt");
        assert_eq!(outcome.removed, RemoveOutcome::Removed);
        assert!(!dir.path().join("victim.txt").exists());
        assert!(coordinator.registry().is_empty());
    }

    #[tokio::test]
    async fn test_denied_keeps_file_and_retires_token() {
        let (dir, coordinator) = setup(Fixed(Decision::Denied), LONG);

        let err = coordinator.request("victim.txt", "10.0.0.2").await.unwrap_err();
        let DeleteError::Denied { token } = err else {
            panic!("expected denial, got {err:?}");
        };

        assert!(dir.path().join("victim.txt").exists());
        assert!(matches!(
            coordinator.confirm("victim.txt", &token).await,
            Err(DeleteError::UnknownToken)
        ));
    }

    #[tokio::test]
    async fn test_rejected_before_registering() {
        let (dir, coordinator) = setup(Fixed(Decision::Approved), LONG);

        assert!(matches!(
            coordinator.request("../NAS.PY", "10.0.0.2").await,
            Err(DeleteError::Guard(GuardError::Protected(_)))
        ));
        assert!(matches!(
            coordinator.request("missing.txt", "10.0.0.2").await,
            Err(DeleteError::NotFound(_))
        ));
        assert!(dir.path().join("nas.py").exists());
        assert!(coordinator.registry().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_is_a_denial() {
        let (dir, coordinator) = setup(Never, Duration::from_millis(50));

        let err = coordinator.request("victim.txt", "10.0.0.2").await.unwrap_err();

        assert!(matches!(err, DeleteError::TimedOut { .. }));
        assert!(dir.path().join("victim.txt").exists());
        assert!(coordinator.registry().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_pending_request() {
        let (dir, coordinator) = setup(Never, LONG);

        let pending = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.request("victim.txt", "10.0.0.2").await }
        });
        wait_for_pending(&coordinator).await;
        coordinator.shutdown();

        assert!(matches!(
            pending.await.unwrap(),
            Err(DeleteError::Interrupted { .. })
        ));
        assert!(dir.path().join("victim.txt").exists());
        assert!(coordinator.registry().is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_request_retires_token() {
        let (_dir, coordinator) = setup(Never, LONG);

        let pending = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.request("victim.txt", "10.0.0.2").await }
        });
        wait_for_pending(&coordinator).await;
        pending.abort();
        let _ = pending.await;

        assert!(coordinator.registry().is_empty());
    }

    #[tokio::test]
    async fn test_two_phase_confirm_is_single_use() {
        let (tokens_tx, mut tokens_rx) = mpsc::unbounded_channel();
        let (decisions_tx, decisions_rx) = mpsc::unbounded_channel();
        let gate = Gate {
            tokens: tokens_tx,
            decisions: Mutex::new(decisions_rx),
        };
        let (dir, coordinator) = setup(gate, LONG);

        let request = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.request("victim.txt", "10.0.0.2").await }
        });
        let token = tokens_rx.recv().await.unwrap();

        let confirmed = coordinator.confirm("victim.txt", &token).await.unwrap();
        assert_eq!(confirmed.removed, RemoveOutcome::Removed);
        assert!(!dir.path().join("victim.txt").exists());

        assert!(matches!(
            coordinator.confirm("victim.txt", &token).await,
            Err(DeleteError::UnknownToken)
        ));

        // The admin approving afterwards must not count as a second delete.
        decisions_tx.send(Decision::Approved).unwrap();
        assert!(matches!(request.await.unwrap(), Err(DeleteError::UnknownToken)));
    }

    #[tokio::test]
    async fn test_slow_approval_survives_expiry_sweep() {
        let (tokens_tx, mut tokens_rx) = mpsc::unbounded_channel();
        let (decisions_tx, decisions_rx) = mpsc::unbounded_channel();
        let gate = Gate {
            tokens: tokens_tx,
            decisions: Mutex::new(decisions_rx),
        };
        // Pending entries expire long before the admin answers.
        let (dir, coordinator) = setup_with_ttl(gate, LONG, Duration::from_millis(10));

        let request = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.request("victim.txt", "10.0.0.2").await }
        });
        let token = tokens_rx.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(coordinator.registry().purge_expired(), 0);
        assert!(coordinator.registry().contains(&token));

        decisions_tx.send(Decision::Approved).unwrap();
        let outcome = request.await.unwrap().unwrap();

        assert_eq!(outcome.removed, RemoveOutcome::Removed);
        assert!(!dir.path().join("victim.txt").exists());
        assert!(coordinator.registry().is_empty());
    }

    #[tokio::test]
    async fn test_confirm_mismatch_removes_nothing() {
        let (dir, coordinator) = setup(Never, LONG);
        std::fs::write(dir.path().join("other.txt"), b"keep").unwrap();

        let guard = PathGuard::new(dir.path(), ProtectedSet::default());
        let entry = PendingDelete::new(&guard.resolve("victim.txt").unwrap(), "10.0.0.2");
        let token = entry.token.clone();
        coordinator.registry().register(entry);

        assert!(matches!(
            coordinator.confirm("other.txt", &token).await,
            Err(DeleteError::FileMismatch)
        ));
        assert!(dir.path().join("victim.txt").exists());
        assert!(dir.path().join("other.txt").exists());
        assert!(coordinator.registry().contains(&token));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_confirms_succeed_once() {
        let (dir, coordinator) = setup(Never, LONG);

        let guard = PathGuard::new(dir.path(), ProtectedSet::default());
        let entry = PendingDelete::new(&guard.resolve("victim.txt").unwrap(), "10.0.0.2");
        let token = entry.token.clone();
        coordinator.registry().register(entry);

        let attempts = (0..2).map(|_| {
            let coordinator = coordinator.clone();
            let token = token.clone();
            tokio::spawn(async move { coordinator.confirm("victim.txt", &token).await })
        });
        let results: Vec<_> = futures::future::join_all(attempts)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(DeleteError::UnknownToken))));
        assert!(!dir.path().join("victim.txt").exists());
    }

    async fn wait_for_pending(coordinator: &DeleteCoordinator) {
        for _ in 0..200 {
            if !coordinator.registry().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("delete request never registered");
    }
}
