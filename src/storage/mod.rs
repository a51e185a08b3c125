//! Persistence of article files and the sync manifest.
//!
//! [`Storage`] is the seam the sync engine writes through; [`FsStorage`] is the
//! filesystem implementation. Every write replaces its target atomically
//! (temporary file in the same directory, fsync, rename), so an interrupted run
//! never leaves a truncated article or manifest behind.
//!
//! Paths handed out by [`Storage::save`] and recorded in the manifest are
//! relative to the storage root.

mod format;
mod paths;

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, instrument};

pub use format::{
    AUTHOR_NOTES_HEADING, AUTHOR_NOTES_MARKER, ArticleDocument, AuthorNote, is_marker_line,
    render_author_notes, render_document,
};
pub use paths::{
    MANIFEST_FILE_NAME, MAX_TITLE_CHARS, build_article_path, manifest_path, sanitize_filename,
};

use crate::manifest::SyncManifest;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The manifest exists but cannot be parsed.
    #[error("manifest {path} is corrupt: {source}")]
    ManifestCorrupt {
        /// Manifest location.
        path: PathBuf,
        /// Parse failure.
        #[source]
        source: serde_json::Error,
    },

    /// The manifest could not be serialized.
    #[error("failed to serialize manifest: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result of an idempotent append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The section was written.
    Appended,
    /// The marker was already present; nothing changed.
    AlreadyPresent,
}

/// Durable storage used by the sync engine.
pub trait Storage: Send + Sync {
    /// Writes an article file, replacing any previous version at the same path.
    ///
    /// Returns the file path relative to the storage root.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the file cannot be written.
    fn save(&self, document: &ArticleDocument) -> Result<PathBuf, StorageError>;

    /// Appends `content` to the file at `path` unless a line of the file is
    /// exactly `marker` (surrounding whitespace ignored).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the file cannot be read or rewritten.
    fn append(
        &self,
        path: &Path,
        marker: &str,
        content: &str,
    ) -> Result<AppendOutcome, StorageError>;

    /// Loads the manifest; a missing file yields an empty manifest.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ManifestCorrupt`] for unparseable contents.
    fn load_manifest(&self) -> Result<SyncManifest, StorageError>;

    /// Stamps `last_sync` and atomically replaces the stored manifest.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if serialization or the write fails.
    fn save_manifest(&self, manifest: &mut SyncManifest) -> Result<(), StorageError>;
}

/// Filesystem-backed storage rooted at the data directory.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Creates storage rooted at `root`. Nothing is touched until the first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The data directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }
}

impl Storage for FsStorage {
    #[instrument(level = "debug", skip(self, document), fields(item_id = %document.item_id))]
    fn save(&self, document: &ArticleDocument) -> Result<PathBuf, StorageError> {
        let absolute = build_article_path(
            &self.root,
            &document.published_at,
            &document.title,
            &document.item_id,
        );
        write_atomic(&absolute, render_document(document).as_bytes())?;
        info!(path = %absolute.display(), "saved article");

        Ok(absolute
            .strip_prefix(&self.root)
            .map_or_else(|_| absolute.clone(), Path::to_path_buf))
    }

    #[instrument(level = "debug", skip(self, content), fields(path = %path.display()))]
    fn append(
        &self,
        path: &Path,
        marker: &str,
        content: &str,
    ) -> Result<AppendOutcome, StorageError> {
        let absolute = self.resolve(path);
        let existing =
            fs::read_to_string(&absolute).map_err(|e| StorageError::io(&absolute, e))?;

        if existing.lines().any(|line| line.trim() == marker) {
            debug!("marker already present, skipping append");
            return Ok(AppendOutcome::AlreadyPresent);
        }

        let mut updated = existing;
        if !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push('\n');
        updated.push_str(content);
        write_atomic(&absolute, updated.as_bytes())?;
        debug!("section appended");
        Ok(AppendOutcome::Appended)
    }

    fn load_manifest(&self) -> Result<SyncManifest, StorageError> {
        let path = manifest_path(&self.root);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no manifest yet, starting empty");
                return Ok(SyncManifest::new());
            }
            Err(error) => return Err(StorageError::io(&path, error)),
        };

        let mut manifest: SyncManifest = serde_json::from_slice(&raw)
            .map_err(|source| StorageError::ManifestCorrupt {
                path: path.clone(),
                source,
            })?;
        manifest.normalize();
        debug!(path = %path.display(), entries = manifest.len(), "manifest loaded");
        Ok(manifest)
    }

    fn save_manifest(&self, manifest: &mut SyncManifest) -> Result<(), StorageError> {
        manifest.touch(Utc::now());
        let mut json = serde_json::to_vec_pretty(manifest)?;
        json.push(b'\n');

        let path = manifest_path(&self.root);
        write_atomic(&path, &json)?;
        debug!(path = %path.display(), entries = manifest.len(), "manifest saved");
        Ok(())
    }
}

/// Replaces `path` with `contents` via a synced temporary sibling and rename.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{file_name}.tmp"));

    if let Err(error) = write_synced(&temp_path, contents) {
        let _ = fs::remove_file(&temp_path);
        return Err(StorageError::io(&temp_path, error));
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        StorageError::io(path, e)
    })
}

fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(contents)?;
    file.sync_all()
}
