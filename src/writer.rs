//! Atomic file writer
//!
//! Content is written to a temp file in the served directory and renamed over
//! the destination, so the destination name only ever refers to a complete
//! file. Last writer wins.

use std::io::{self, Read, Write};

use axum::body::Bytes;

use crate::guard::{GuardError, PathGuard, TEMP_PREFIX};


/// Write/remove errors
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error("Can't write file {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// What happened to the file on removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    AlreadyAbsent,
}

/// Writes and removes files inside the served root
#[derive(Debug, Clone)]
pub struct AtomicWriter {
    guard: PathGuard,
}

impl AtomicWriter {
    pub fn new(guard: PathGuard) -> Self {
        Self { guard }
    }

    /// Write `content` to `name`, returning the number of bytes written.
    pub async fn write(&self, name: &str, content: Bytes) -> Result<u64, WriteError> {
        let writer = self.clone();
        let owned = name.to_string();

        tokio::task::spawn_blocking(move || writer.write_blocking(&owned, &content))
            .await
            .map_err(|e| WriteError::Io {
                name: name.to_string(),
                source: io::Error::other(e),
            })?
    }

    pub fn write_blocking(&self, name: &str, content: &[u8]) -> Result<u64, WriteError> {
        self.write_from_reader(name, &mut &content[..])
    }

    /// Stream `reader` into a temp file next to the destination, then rename
    /// it into place. On failure the temp file is removed and the destination
    /// is left as it was.
    pub fn write_from_reader<R: Read>(&self, name: &str, reader: &mut R) -> Result<u64, WriteError> {
        let target = self.guard.resolve(name)?;
        let io_err = |source: io::Error| WriteError::Io {
            name: target.name().to_string(),
            source,
        };

        let dir = target.path().parent().unwrap_or(self.guard.root());

        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_PREFIX).suffix(".part");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(std::fs::Permissions::from_mode(0o644));
        }

        // Dropping `tmp` on any early return deletes the temp file.
        let mut tmp = builder.tempfile_in(dir).map_err(io_err)?;

        let written = io::copy(reader, tmp.as_file_mut()).map_err(io_err)?;
        tmp.as_file_mut().flush().map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;

        tmp.persist(target.path()).map_err(|e| io_err(e.error))?;

        tracing::debug!(file = %target.name(), bytes = written, "File written");
        Ok(written)
    }

    /// Remove `name`. A file that is already gone is not an error.
    pub async fn remove(&self, name: &str) -> Result<RemoveOutcome, WriteError> {
        let target = self.guard.resolve(name)?;

        match tokio::fs::remove_file(target.path()).await {
            Ok(()) => Ok(RemoveOutcome::Removed),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(RemoveOutcome::AlreadyAbsent),
            Err(source) => Err(WriteError::Io {
                name: target.name().to_string(),
                source,
            }),
        }
    }
}
