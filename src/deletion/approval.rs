//! Approval authorities
//!
//! Whoever gets to say yes or no to a delete. The coordinator only knows the
//! [`ApprovalAuthority`] trait, so the console prompt can be replaced by an
//! automated policy without touching the state machine.

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};

use super::registry::PendingDelete;

/// The admin's answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Denied,
}

/// The decision could not be obtained at all
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApprovalError {
    #[error("Approval interrupted: {0}")]
    Interrupted(String),
}

/// Source of delete decisions
#[async_trait]
pub trait ApprovalAuthority: Send + Sync {
    /// Decide on `entry`. May take as long as the admin needs; the caller
    /// enforces its own deadline.
    async fn decide(&self, entry: &PendingDelete) -> Result<Decision, ApprovalError>;
}

/// Refuses every delete. For unattended servers.
pub struct DenyAllAuthority;

#[async_trait]
impl ApprovalAuthority for DenyAllAuthority {
    async fn decide(&self, entry: &PendingDelete) -> Result<Decision, ApprovalError> {
        tracing::debug!(file = %entry.filename, "Delete refused by policy");
        Ok(Decision::Denied)
    }
}

/// Asks the operator on the server console.
///
/// Stdin is read by a dedicated thread that forwards lines over a channel.
/// Prompts are serialized, and lines typed while no prompt was open are
/// discarded so a late answer can never decide the next request.
///
/// A request queued behind an open prompt waits inside its own approval
/// deadline, so it can time out before its prompt is ever shown.
pub struct ConsoleAuthority {
    lines: Mutex<mpsc::Receiver<String>>,
}

impl ConsoleAuthority {
    /// Start the stdin reader thread
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(16);

        std::thread::Builder::new()
            .name("approval-stdin".into())
            .spawn(move || {
                use std::io::BufRead;
                for line in std::io::stdin().lock().lines() {
                    let Ok(line) = line else { break };
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| tracing::error!("Failed to start console reader: {}", e))
            .ok();

        Self::from_lines(rx)
    }

    /// Read answers from `lines` instead of stdin
    pub fn from_lines(lines: mpsc::Receiver<String>) -> Self {
        Self {
            lines: Mutex::new(lines),
        }
    }
}

#[async_trait]
impl ApprovalAuthority for ConsoleAuthority {
    async fn decide(&self, entry: &PendingDelete) -> Result<Decision, ApprovalError> {
        let mut lines = match self.lines.try_lock() {
            Ok(lines) => lines,
            Err(_) => {
                tracing::info!(file = %entry.filename, token = %entry.token, "Delete request queued behind another prompt");
                self.lines.lock().await
            }
        };

        while lines.try_recv().is_ok() {}

        let prompt = format!(
            "\n{rule}\nDELETE REQUEST from {ip}\nFile: {file}\nToken: {token}\nAllow deletion? (yes/no): ",
            rule = "=".repeat(60),
            ip = entry.requester,
            file = entry.filename,
            token = entry.token,
        );
        let mut stdout = tokio::io::stdout();
        // The prompt is best effort; the answer still comes from stdin.
        let _ = stdout.write_all(prompt.as_bytes()).await;
        let _ = stdout.flush().await;

        match lines.recv().await {
            Some(answer) if answer.trim().eq_ignore_ascii_case("yes") => Ok(Decision::Approved),
            Some(_) => Ok(Decision::Denied),
            None => Err(ApprovalError::Interrupted("console input closed".into())),
        }
    }
}
