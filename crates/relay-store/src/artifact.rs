//! Atomic, symlink-safe artifact writes.
//!
//! A write goes through these steps, each a precondition for the next:
//!
//!   Size cap → Resolve inside root → Create parents → Temp file + fsync
//!     → Rename → fsync directory → Re-read for sha256/size → Size cap again
//!
//! No partially-written file is ever visible at the final path. The digest
//! and size returned describe the bytes read back from disk after the
//! rename, never the in-memory buffer.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use relay_contracts::{
    error::{RelayError, RelayResult},
    event::Artifact,
};
use relay_core::traits::ArtifactSink;

use crate::digest::sha256_reader;

/// Default artifact size cap: 1 GiB.
pub const DEFAULT_MAX_ARTIFACT_BYTES: u64 = 1 << 30;

/// Writes files under one canonical workspace root.
#[derive(Debug, Clone)]
pub struct AtomicArtifactWriter {
    root: PathBuf,
    max_bytes: u64,
}

impl AtomicArtifactWriter {
    /// Open a writer for `workspace`, which must exist.
    pub fn new(workspace: &Path) -> RelayResult<Self> {
        let root = fs::canonicalize(workspace).map_err(|e| RelayError::Config {
            reason: format!("cannot resolve workspace '{}': {}", workspace.display(), e),
        })?;
        if !root.is_dir() {
            return Err(RelayError::Config {
                reason: format!("workspace '{}' is not a directory", root.display()),
            });
        }
        Ok(Self {
            root,
            max_bytes: DEFAULT_MAX_ARTIFACT_BYTES,
        })
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// The canonical workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Resolve a workspace-relative path to an absolute path strictly inside
    /// the root.
    ///
    /// Every existing segment is canonicalized as it is reached, so a
    /// symlink anywhere along the path is followed and re-checked against
    /// the root. Segments that do not exist yet are appended as-is. `..`
    /// may not climb above the root.
    pub fn resolve(&self, relative: &str) -> RelayResult<PathBuf> {
        let escape = || RelayError::WorkspaceEscape {
            path: relative.to_string(),
        };

        if relative.is_empty() {
            return Err(RelayError::ArtifactWrite {
                path: relative.to_string(),
                reason: "empty path".to_string(),
            });
        }
        let requested = Path::new(relative);
        if requested.is_absolute() || requested.has_root() {
            return Err(escape());
        }

        let mut current = self.root.clone();
        for component in requested.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    if current == self.root {
                        return Err(escape());
                    }
                    current.pop();
                }
                Component::Normal(segment) => {
                    current.push(segment);
                    match fs::symlink_metadata(&current) {
                        Ok(meta) => {
                            current = fs::canonicalize(&current).map_err(|e| {
                                if meta.file_type().is_symlink() {
                                    // Dangling link: its target cannot be checked.
                                    escape()
                                } else {
                                    RelayError::ArtifactWrite {
                                        path: relative.to_string(),
                                        reason: e.to_string(),
                                    }
                                }
                            })?;
                        }
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => {
                            return Err(RelayError::ArtifactWrite {
                                path: relative.to_string(),
                                reason: e.to_string(),
                            })
                        }
                    }
                    if !self.is_inside(&current) {
                        return Err(escape());
                    }
                }
                Component::RootDir | Component::Prefix(_) => return Err(escape()),
            }
        }

        if current == self.root {
            return Err(RelayError::ArtifactWrite {
                path: relative.to_string(),
                reason: "path resolves to the workspace root".to_string(),
            });
        }
        Ok(current)
    }

    /// Equal to the root or below it. `Path::starts_with` compares whole
    /// components, so `/ws-other` is not inside `/ws`.
    fn is_inside(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }

    /// Write `content` at `relative` and describe what landed on disk.
    pub fn write(&self, relative: &str, content: &[u8]) -> RelayResult<Artifact> {
        let size = content.len() as u64;
        if size > self.max_bytes {
            return Err(RelayError::ArtifactTooLarge {
                actual: size,
                max: self.max_bytes,
            });
        }

        let target = self.resolve(relative)?;
        let io_err = |e: io::Error| RelayError::ArtifactWrite {
            path: relative.to_string(),
            reason: e.to_string(),
        };

        let parent = target.parent().ok_or_else(|| RelayError::ArtifactWrite {
            path: relative.to_string(),
            reason: "no parent directory".to_string(),
        })?;
        create_private_dirs(parent).map_err(io_err)?;
        if target.is_dir() {
            return Err(RelayError::ArtifactWrite {
                path: relative.to_string(),
                reason: "a directory exists at this path".to_string(),
            });
        }

        let mut tmp = tempfile::Builder::new()
            .prefix(".relay-")
            .suffix(".tmp")
            .tempfile_in(parent)
            .map_err(io_err)?;
        tmp.write_all(content).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&target).map_err(|e| io_err(e.error))?;
        sync_dir(parent).map_err(io_err)?;

        let (sha256, actual) = File::open(&target)
            .and_then(sha256_reader)
            .map_err(io_err)?;
        if actual > self.max_bytes {
            if let Err(e) = fs::remove_file(&target) {
                warn!(path = %target.display(), error = %e, "cannot remove oversized artifact");
            }
            return Err(RelayError::ArtifactTooLarge {
                actual,
                max: self.max_bytes,
            });
        }

        debug!(path = relative, size = actual, sha256 = %sha256, "artifact written");
        Ok(Artifact {
            path: relative.to_string(),
            sha256,
            size: actual,
        })
    }
}

impl ArtifactSink for AtomicArtifactWriter {
    fn write_artifact(&self, relative_path: &str, content: &[u8]) -> RelayResult<Artifact> {
        self.write(relative_path, content)
    }
}

/// One-shot form of `AtomicArtifactWriter::write` with the default cap.
pub fn write_artifact_atomic(
    workspace: &Path,
    relative_path: &str,
    content: &[u8],
) -> RelayResult<Artifact> {
    AtomicArtifactWriter::new(workspace)?.write(relative_path, content)
}

/// Create `dir` and any missing parents, owner-only where supported.
pub(crate) fn create_private_dirs(dir: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
