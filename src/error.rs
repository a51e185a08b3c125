//! Top-level error taxonomy for sync operations.
//!
//! How far an error travels depends on its variant:
//! - [`SyncError::Transport`], [`SyncError::RateLimitExceeded`] and
//!   [`SyncError::Rejected`] end the current request; the engine treats them
//!   as per-item failures and moves on.
//! - [`SyncError::Configuration`] and [`SyncError::Storage`] abort the whole
//!   operation and reach the caller.

use std::time::Duration;

use thiserror::Error;

use crate::api::TransportError;
use crate::storage::StorageError;

/// Errors produced by the sync pipeline.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Connection-level failure; not retried.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Retry budget exhausted on soft blocks.
    #[error(
        "rate limit exceeded for {endpoint} after {attempts} attempts ({waited_secs}s spent waiting)",
        waited_secs = .waited.as_secs()
    )]
    RateLimitExceeded {
        /// Logical endpoint label.
        endpoint: String,
        /// Number of upstream calls made.
        attempts: u32,
        /// Total time slept between attempts.
        waited: Duration,
    },

    /// The upstream answered with a well-formed, non-retryable error status.
    #[error("{endpoint} rejected with HTTP {status}")]
    Rejected {
        /// Logical endpoint label.
        endpoint: String,
        /// HTTP status code.
        status: u16,
    },

    /// Required state or settings are missing.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Manifest or item persistence failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SyncError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Returns true when the error only affects the current item.
    #[must_use]
    pub fn is_item_scoped(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::RateLimitExceeded { .. } | Self::Rejected { .. }
        )
    }
}
