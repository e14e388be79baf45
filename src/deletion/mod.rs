//! Admin-approved deletes
//!
//! A delete is never performed on the client's say-so alone: the request is
//! parked in the [`PendingDeletes`] registry until an [`ApprovalAuthority`]
//! answers, the deadline passes, or the server shuts down.

pub mod approval;
pub mod coordinator;
pub mod registry;

pub use approval::{ApprovalAuthority, ApprovalError, ConsoleAuthority, Decision, DenyAllAuthority};
pub use coordinator::{DeleteCoordinator, DeleteError, DeleteOutcome};
pub use registry::{PendingDelete, PendingDeletes, TakeError};
