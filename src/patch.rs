//! Patch engine: envelope and unified-diff dialects.
//!
//! The dialect is decided by sniffing the patch text before any file is
//! touched. Envelope patches carry whole-file adds, updates and deletes
//! between `*** Begin Patch` / `*** End Patch` markers; unified diffs are
//! applied hunk by hunk with strict context verification.
//!
//! Multi-file patches apply sequentially. A failure mid-batch stops the
//! run and reports the files already changed; earlier changes are NOT
//! rolled back.

use std::path::Path;

use thiserror::Error;

use crate::sandbox::{SandboxError, WorkspaceRoot};

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("Unrecognized patch line: {0}")]
    UnrecognizedLine(String),

    #[error("Malformed hunk header: {0}")]
    MalformedHunk(String),

    #[error("Hunk does not apply at line {line}: expected {expected:?}, found {found:?}")]
    ContextMismatch {
        line: usize,
        expected: String,
        found: Option<String>,
    },

    #[error("File already exists: {0}")]
    Exists(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("I/O error for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// One parsed patch operation.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOperation {
    Add { path: String, content: String },
    Update { path: String, content: String },
    Delete { path: String },
    Diff(FilePatch),
}

/// A unified-diff patch against a single file.
#[derive(Debug, Clone, PartialEq)]
pub struct FilePatch {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub hunks: Vec<Hunk>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hunk {
    /// 1-based start line on the old side; 0 means insert before line 1.
    pub old_start: usize,
    pub lines: Vec<HunkLine>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

/// Result of applying a patch, as reported to the model.
#[derive(Debug, Clone)]
pub struct PatchOutcome {
    pub applied: bool,
    pub summary: String,
    pub changed_files: Vec<String>,
}

const BEGIN_MARKER: &str = "*** Begin Patch";
const END_MARKER: &str = "*** End Patch";
const ADD_DIRECTIVE: &str = "*** Add File: ";
const UPDATE_DIRECTIVE: &str = "*** Update File: ";
const DELETE_DIRECTIVE: &str = "*** Delete File: ";

/// Apply a patch of either dialect inside the workspace.
///
/// A text with no recognizable dialect markers yields
/// `applied=false, summary="Unrecognized patch format"` rather than an
/// error, so the model can see the verdict and retry.
pub fn apply_patch(root: &WorkspaceRoot, patch_text: &str) -> PatchOutcome {
    let operations = if is_envelope(patch_text) {
        parse_envelope(patch_text)
    } else if is_unified_diff(patch_text) {
        parse_unified_diff(patch_text)
    } else {
        return PatchOutcome {
            applied: false,
            summary: "Unrecognized patch format".to_string(),
            changed_files: Vec::new(),
        };
    };

    let operations = match operations {
        Ok(ops) => ops,
        Err(e) => {
            return PatchOutcome {
                applied: false,
                summary: format!("{e}"),
                changed_files: Vec::new(),
            }
        }
    };

    let mut changed = Vec::new();
    for op in &operations {
        match apply_operation(root, op) {
            Ok(path) => changed.push(path),
            Err(e) => {
                return PatchOutcome {
                    applied: false,
                    summary: format!("{e}"),
                    changed_files: changed,
                }
            }
        }
    }

    PatchOutcome {
        applied: true,
        summary: format!("{} file(s) changed", changed.len()),
        changed_files: changed,
    }
}

fn is_envelope(text: &str) -> bool {
    text.lines().any(|l| l.trim_end() == BEGIN_MARKER)
}

fn is_unified_diff(text: &str) -> bool {
    text.lines().any(|l| {
        l.starts_with("diff --git") || l.starts_with("--- ") || l.starts_with("+++ ")
    })
}

// ---------------------------------------------------------------------------
// Envelope dialect
// ---------------------------------------------------------------------------

pub fn parse_envelope(text: &str) -> Result<Vec<PatchOperation>, PatchError> {
    let mut operations = Vec::new();
    let mut in_patch = false;
    // Pending Add/Update directive and its accumulated content lines.
    let mut pending: Option<(bool, String, Vec<String>)> = None;

    let mut flush =
        |pending: &mut Option<(bool, String, Vec<String>)>, operations: &mut Vec<PatchOperation>| {
            if let Some((is_add, path, lines)) = pending.take() {
                let content = lines.join("\n");
                operations.push(if is_add {
                    PatchOperation::Add { path, content }
                } else {
                    PatchOperation::Update { path, content }
                });
            }
        };

    for line in text.lines() {
        let trimmed = line.trim_end();
        if !in_patch {
            if trimmed == BEGIN_MARKER {
                in_patch = true;
            }
            continue;
        }
        if trimmed == END_MARKER {
            flush(&mut pending, &mut operations);
            in_patch = false;
            continue;
        }
        if let Some(path) = trimmed.strip_prefix(ADD_DIRECTIVE) {
            flush(&mut pending, &mut operations);
            pending = Some((true, path.trim().to_string(), Vec::new()));
        } else if let Some(path) = trimmed.strip_prefix(UPDATE_DIRECTIVE) {
            flush(&mut pending, &mut operations);
            pending = Some((false, path.trim().to_string(), Vec::new()));
        } else if let Some(path) = trimmed.strip_prefix(DELETE_DIRECTIVE) {
            flush(&mut pending, &mut operations);
            operations.push(PatchOperation::Delete {
                path: path.trim().to_string(),
            });
        } else if trimmed.starts_with("*** ") {
            return Err(PatchError::UnrecognizedLine(trimmed.to_string()));
        } else if let Some((_, _, lines)) = pending.as_mut() {
            lines.push(line.to_string());
        } else if trimmed.is_empty() {
            // Blank lines between directives carry no content.
        } else {
            return Err(PatchError::UnrecognizedLine(line.to_string()));
        }
    }

    flush(&mut pending, &mut operations);
    Ok(operations)
}

// ---------------------------------------------------------------------------
// Unified-diff dialect
// ---------------------------------------------------------------------------

pub fn parse_unified_diff(text: &str) -> Result<Vec<PatchOperation>, PatchError> {
    let mut patches: Vec<FilePatch> = Vec::new();
    let mut current: Option<FilePatch> = None;

    for line in text.lines() {
        if line.starts_with("diff --git") {
            if let Some(patch) = current.take() {
                patches.push(patch);
            }
            current = Some(FilePatch {
                old_path: None,
                new_path: None,
                hunks: Vec::new(),
            });
        } else if let Some(rest) = line.strip_prefix("--- ") {
            // A `---` after hunks begins the next file section.
            if current.as_ref().map_or(false, |p| !p.hunks.is_empty()) {
                patches.push(current.take().unwrap());
            }
            let patch = current.get_or_insert(FilePatch {
                old_path: None,
                new_path: None,
                hunks: Vec::new(),
            });
            patch.old_path = parse_diff_path(rest);
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            let patch = current.get_or_insert(FilePatch {
                old_path: None,
                new_path: None,
                hunks: Vec::new(),
            });
            patch.new_path = parse_diff_path(rest);
        } else if let Some(rest) = line.strip_prefix("@@") {
            let patch = current
                .as_mut()
                .ok_or_else(|| PatchError::MalformedHunk(line.to_string()))?;
            patch.hunks.push(parse_hunk_header(rest, line)?);
        } else if let Some(hunk) = current.as_mut().and_then(|p| p.hunks.last_mut()) {
            if let Some(text) = line.strip_prefix('+') {
                hunk.lines.push(HunkLine::Add(text.to_string()));
            } else if let Some(text) = line.strip_prefix('-') {
                hunk.lines.push(HunkLine::Remove(text.to_string()));
            } else if let Some(text) = line.strip_prefix(' ') {
                hunk.lines.push(HunkLine::Context(text.to_string()));
            } else if line.starts_with('\\') {
                // "\ No newline at end of file" - metadata, not content.
            } else if line.is_empty() {
                hunk.lines.push(HunkLine::Context(String::new()));
            }
            // Index/mode lines between the header and hunks are skipped.
        }
    }
    if let Some(patch) = current.take() {
        patches.push(patch);
    }

    Ok(patches
        .into_iter()
        .filter(|p| p.old_path.is_some() || p.new_path.is_some())
        .map(PatchOperation::Diff)
        .collect())
}

/// `a/foo.txt` → `foo.txt`; `/dev/null` → None.
fn parse_diff_path(raw: &str) -> Option<String> {
    let token = raw.split('\t').next().unwrap_or(raw).trim();
    if token == "/dev/null" {
        return None;
    }
    let stripped = token
        .strip_prefix("a/")
        .or_else(|| token.strip_prefix("b/"))
        .unwrap_or(token);
    Some(stripped.to_string())
}

/// Parse ` -l[,c] +l[,c] @@ ...` after the leading `@@`.
fn parse_hunk_header(rest: &str, full_line: &str) -> Result<Hunk, PatchError> {
    let malformed = || PatchError::MalformedHunk(full_line.to_string());
    let body = rest.split("@@").next().ok_or_else(malformed)?;

    let mut old_start = None;
    for token in body.split_whitespace() {
        if let Some(range) = token.strip_prefix('-') {
            let start = range.split(',').next().ok_or_else(malformed)?;
            old_start = Some(start.parse::<usize>().map_err(|_| malformed())?);
        }
    }
    Ok(Hunk {
        old_start: old_start.ok_or_else(malformed)?,
        lines: Vec::new(),
    })
}

/// Apply hunks to `original` with standard unified-diff semantics.
/// Context and removal lines must match exactly at the stated offsets.
pub fn apply_hunks(original: &str, hunks: &[Hunk]) -> Result<String, PatchError> {
    let had_trailing_newline = original.ends_with('\n') || original.is_empty();
    let old_lines: Vec<&str> = if original.is_empty() {
        Vec::new()
    } else {
        let mut lines: Vec<&str> = original.split('\n').collect();
        if had_trailing_newline {
            lines.pop();
        }
        lines
    };

    let mut out: Vec<String> = Vec::new();
    let mut cursor = 0usize;

    for hunk in hunks {
        let start = hunk.old_start.saturating_sub(1);
        if start < cursor || start > old_lines.len() {
            return Err(PatchError::ContextMismatch {
                line: hunk.old_start,
                expected: "hunk start".to_string(),
                found: None,
            });
        }
        out.extend(old_lines[cursor..start].iter().map(|s| s.to_string()));
        cursor = start;

        for line in &hunk.lines {
            match line {
                HunkLine::Context(text) | HunkLine::Remove(text) => {
                    let found = old_lines.get(cursor).map(|s| s.to_string());
                    if found.as_deref() != Some(text.as_str()) {
                        return Err(PatchError::ContextMismatch {
                            line: cursor + 1,
                            expected: text.clone(),
                            found,
                        });
                    }
                    if matches!(line, HunkLine::Context(_)) {
                        out.push(text.clone());
                    }
                    cursor += 1;
                }
                HunkLine::Add(text) => out.push(text.clone()),
            }
        }
    }

    out.extend(old_lines[cursor..].iter().map(|s| s.to_string()));

    let mut result = out.join("\n");
    if had_trailing_newline && !result.is_empty() {
        result.push('\n');
    }
    Ok(result)
}

// ---------------------------------------------------------------------------
// Application against the workspace
// ---------------------------------------------------------------------------

fn apply_operation(root: &WorkspaceRoot, op: &PatchOperation) -> Result<String, PatchError> {
    match op {
        PatchOperation::Add { path, content } => {
            let resolved = root.resolve(path)?;
            if resolved.absolute.exists() {
                return Err(PatchError::Exists(resolved.relative));
            }
            write_file(&resolved.absolute, content)?;
            Ok(resolved.relative)
        }
        PatchOperation::Update { path, content } => {
            let resolved = root.resolve(path)?;
            if !resolved.absolute.exists() {
                return Err(PatchError::NotFound(resolved.relative));
            }
            write_file(&resolved.absolute, content)?;
            Ok(resolved.relative)
        }
        PatchOperation::Delete { path } => {
            let resolved = root.resolve(path)?;
            if !resolved.absolute.exists() {
                return Err(PatchError::NotFound(resolved.relative));
            }
            std::fs::remove_file(&resolved.absolute).map_err(|e| PatchError::Io {
                path: resolved.relative.clone(),
                source: e,
            })?;
            Ok(resolved.relative)
        }
        PatchOperation::Diff(patch) => {
            // `+++ /dev/null` means delete the old side.
            if patch.new_path.is_none() {
                let old = patch
                    .old_path
                    .as_deref()
                    .ok_or_else(|| PatchError::NotFound("/dev/null".to_string()))?;
                let resolved = root.resolve(old)?;
                if !resolved.absolute.exists() {
                    return Err(PatchError::NotFound(resolved.relative));
                }
                std::fs::remove_file(&resolved.absolute).map_err(|e| PatchError::Io {
                    path: resolved.relative.clone(),
                    source: e,
                })?;
                return Ok(resolved.relative);
            }

            let target = patch
                .new_path
                .as_deref()
                .or(patch.old_path.as_deref())
                .ok_or_else(|| PatchError::NotFound("patch names no target file".to_string()))?;
            let resolved = root.resolve(target)?;

            let original = if resolved.absolute.exists() {
                std::fs::read_to_string(&resolved.absolute).map_err(|e| PatchError::Io {
                    path: resolved.relative.clone(),
                    source: e,
                })?
            } else {
                String::new()
            };

            let updated = apply_hunks(&original, &patch.hunks)?;
            write_file(&resolved.absolute, &updated)?;
            Ok(resolved.relative)
        }
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), PatchError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PatchError::Io {
            path: parent.display().to_string(),
            source: e,
        })?;
    }
    std::fs::write(path, content).map_err(|e| PatchError::Io {
        path: path.display().to_string(),
        source: e,
    })
}
