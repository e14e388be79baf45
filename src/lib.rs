//! Simple NAS Library
//!
//! A LAN file drop: uploads land atomically in one flat directory, downloads
//! stream back out, and deletes wait for an administrator's approval.
//!
//! # Modules
//!
//! - `guard`: client file names to safe paths, protected names
//! - `multipart`: `multipart/form-data` decoding
//! - `writer`: temp-file-and-rename writes, idempotent removal
//! - `deletion`: pending delete registry, approval authorities, state machine
//! - `routes`: the HTTP surface

pub mod config;
pub mod deletion;
pub mod error;
pub mod guard;
pub mod multipart;
pub mod routes;
pub mod state;
pub mod writer;
