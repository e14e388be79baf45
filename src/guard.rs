//! Path guard
//!
//! Every client-supplied file name goes through [`PathGuard::resolve`] before
//! it touches the filesystem. Names are reduced to their final segment, joined
//! onto the served root, and checked against the [`ProtectedSet`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Names that are always protected, whatever the configuration says.
pub const BUILTIN_PROTECTED: &[&str] = &["simple-nas", "simple-nas.exe", ".env"];

/// Prefix of in-flight upload temp files inside the served root
pub const TEMP_PREFIX: &str = ".simple-nas-";

/// Path guard errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
    #[error("Invalid file name: {0:?}")]
    Invalid(String),

    #[error("File is protected: {0}")]
    Protected(String),
}

/// Return the final path segment of `raw`.
///
/// Both `/` and `\` count as separators and trailing separators are ignored,
/// so `"../../x"`, `"/etc/x"`, `"dir\\x"` and `"x/"` all yield `"x"`.
pub fn basename(raw: &str) -> &str {
    raw.trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
}

/// Immutable set of file names the server refuses to expose, overwrite or delete.
#[derive(Debug, Clone, Default)]
pub struct ProtectedSet {
    names: HashSet<String>,
}

impl ProtectedSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| protection_key(basename(n.as_ref())))
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    /// Build the set for a served root: the built-in names, the configured
    /// extras, and the running executable when it lives inside `root`.
    pub fn for_root(root: &Path, extra: &[String]) -> Self {
        let mut names: Vec<String> = BUILTIN_PROTECTED.iter().map(|s| s.to_string()).collect();
        names.extend(extra.iter().cloned());

        if let Ok(exe) = std::env::current_exe() {
            let exe_dir = exe.parent().and_then(|p| p.canonicalize().ok());
            let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
            if exe_dir.as_deref() == Some(root.as_path()) {
                if let Some(name) = exe.file_name() {
                    names.push(name.to_string_lossy().into_owned());
                }
            }
        }

        Self::new(names)
    }

    /// Case-insensitive membership test on the basename of `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&protection_key(basename(name)))
    }
}

// Windows drops trailing dots and spaces when opening a file, so "nas.py. "
// names the same file as "nas.py".
fn protection_key(name: &str) -> String {
    name.trim_end_matches(['.', ' ']).to_lowercase()
}

/// Whether `name` is reserved for the writer's temp files
pub fn is_temp_name(name: &str) -> bool {
    name.len() >= TEMP_PREFIX.len()
        && name.as_bytes()[..TEMP_PREFIX.len()].eq_ignore_ascii_case(TEMP_PREFIX.as_bytes())
}

/// A name that passed the guard, together with its absolute location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    name: String,
    path: PathBuf,
}

impl ResolvedPath {
    /// The basename the client asked for
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute path inside the served root
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Resolves client-supplied names to paths inside the served root.
#[derive(Debug, Clone)]
pub struct PathGuard {
    inner: Arc<PathGuardInner>,
}

#[derive(Debug)]
struct PathGuardInner {
    root: PathBuf,
    protected: ProtectedSet,
}

impl PathGuard {
    pub fn new(root: impl Into<PathBuf>, protected: ProtectedSet) -> Self {
        Self {
            inner: Arc::new(PathGuardInner {
                root: root.into(),
                protected,
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn is_protected(&self, name: &str) -> bool {
        self.inner.protected.contains(name)
    }

    /// Resolve `raw` to a path inside the root.
    ///
    /// The path is not required to exist.
    pub fn resolve(&self, raw: &str) -> Result<ResolvedPath, GuardError> {
        let name = basename(raw);

        if name.is_empty() || name == "." || name == ".." || name.contains('\0') || is_temp_name(name) {
            return Err(GuardError::Invalid(raw.to_string()));
        }

        if self.is_protected(name) {
            return Err(GuardError::Protected(name.to_string()));
        }

        Ok(ResolvedPath {
            name: name.to_string(),
            path: self.inner.root.join(name),
        })
    }
}
