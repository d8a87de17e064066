//! Workspace path containment.
//!
//! Every file tool resolves user-supplied paths through this module before
//! touching the filesystem. A resolved path is guaranteed to be the
//! workspace root or a strict descendant of it after symlinks are
//! followed, so a link pointing outside the workspace is rejected even
//! though the textual path looks safe.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    /// The input path is malformed (empty, absolute, drive-qualified, UNC).
    #[error("Invalid path: {0}")]
    Invalid(String),

    /// The path resolves outside the workspace root.
    #[error("Path escapes workspace: {0}")]
    Escape(String),

    #[error("I/O error for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A realpath-resolved workspace directory. All file tools are
/// parameterized by one of these.
#[derive(Debug, Clone)]
pub struct WorkspaceRoot {
    real: PathBuf,
}

/// A path admitted into the workspace.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    /// Absolute path, safe to hand to the filesystem.
    pub absolute: PathBuf,

    /// Forward-slash path relative to the root, for display and results.
    pub relative: String,
}

/// Create `dir` if missing and return its canonical form.
pub fn ensure_root(dir: &Path) -> Result<WorkspaceRoot, SandboxError> {
    std::fs::create_dir_all(dir).map_err(|e| SandboxError::Io {
        path: dir.display().to_string(),
        source: e,
    })?;
    let real = dir.canonicalize().map_err(|e| SandboxError::Io {
        path: dir.display().to_string(),
        source: e,
    })?;
    Ok(WorkspaceRoot { real })
}

impl WorkspaceRoot {
    /// The canonical root directory.
    pub fn path(&self) -> &Path {
        &self.real
    }

    /// Resolve a user-supplied path to a location inside the workspace.
    ///
    /// The input must be relative. The joined path is normalized
    /// lexically, then the deepest existing ancestor is canonicalized so
    /// symlink targets are checked; a path that lands outside the root
    /// fails with [`SandboxError::Escape`] before any side effect.
    pub fn resolve(&self, input: &str) -> Result<ResolvedPath, SandboxError> {
        validate_input(input)?;

        let joined = self.real.join(input);
        let normalized = normalize_lexically(&joined)
            .ok_or_else(|| SandboxError::Escape(input.to_string()))?;

        let real = realpath_deepest_existing(&normalized).map_err(|e| SandboxError::Io {
            path: input.to_string(),
            source: e,
        })?;

        let rel = real
            .strip_prefix(&self.real)
            .map_err(|_| SandboxError::Escape(input.to_string()))?;

        if rel
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(SandboxError::Escape(input.to_string()));
        }

        let relative = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        Ok(ResolvedPath {
            absolute: real,
            relative,
        })
    }
}

/// Reject inputs that can never be workspace-relative. The same rules
/// apply on every platform: drive qualifiers and UNC prefixes are
/// rejected as text, not via platform path parsing.
fn validate_input(input: &str) -> Result<(), SandboxError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SandboxError::Invalid("empty path".to_string()));
    }
    if trimmed.starts_with('/') || trimmed.starts_with('\\') {
        return Err(SandboxError::Invalid(format!(
            "absolute paths are not allowed: {trimmed}"
        )));
    }
    let bytes = trimmed.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return Err(SandboxError::Invalid(format!(
            "drive-qualified paths are not allowed: {trimmed}"
        )));
    }
    if Path::new(trimmed).is_absolute() {
        return Err(SandboxError::Invalid(format!(
            "absolute paths are not allowed: {trimmed}"
        )));
    }
    Ok(())
}

/// Resolve `.` and `..` components without touching the filesystem.
/// Returns `None` when `..` would climb above the filesystem root.
fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    Some(out)
}

/// Canonicalize the deepest existing ancestor of `path` and re-append the
/// non-existing remainder, so a new file inside a safe directory resolves
/// while a symlinked directory still exposes its real target.
fn realpath_deepest_existing(path: &Path) -> std::io::Result<PathBuf> {
    if path.exists() {
        return path.canonicalize();
    }
    let mut existing = path.to_path_buf();
    let mut remainder = Vec::new();
    while !existing.exists() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                remainder.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => break,
        }
    }
    let mut real = existing.canonicalize()?;
    for part in remainder.iter().rev() {
        real.push(part);
    }
    Ok(real)
}
