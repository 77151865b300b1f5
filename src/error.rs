//! Error types for the reformat transform and the downloader

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::filtergraph::GraphError;

/// Errors raised by the vertical reformat transform.
///
/// None of these are retried inside the transform; the caller decides.
#[derive(Debug, Error)]
pub enum ReformatError {
    #[error("invalid input {}: {reason}", path.display())]
    InvalidInput { path: PathBuf, reason: String },

    #[error("could not probe {}: {message}", path.display())]
    Probe { path: PathBuf, message: String },

    #[error("ffmpeg failed (exit code {exit_code:?}): {stderr}")]
    Transcode {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("ffmpeg timed out after {0} seconds")]
    Timeout(u64),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReformatError {
    pub fn invalid_input(path: &Path, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn probe(path: &Path, message: impl Into<String>) -> Self {
        Self::Probe {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    pub fn transcode(exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self::Transcode {
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// The source clip itself is unusable and should be discarded
    pub fn is_fatal_input(&self) -> bool {
        matches!(self, Self::InvalidInput { .. } | Self::Probe { .. })
    }
}

/// Errors raised while fetching a clip with yt-dlp.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("failed to start yt-dlp: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("yt-dlp failed (exit code {exit_code:?}): {stderr}")]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("yt-dlp reported no output file for {0}")]
    MissingOutput(String),

    #[error("downloaded file could not be probed: {0}")]
    Probe(String),
}

/// yt-dlp messages that will not change on a second attempt
const PERMANENT_FAILURES: &[&str] = &[
    "Unsupported URL",
    "Private video",
    "Video unavailable",
    "This video is not available",
    "HTTP Error 404",
    "There is no video in this post",
];

impl DownloadError {
    /// Whether another attempt has a chance of succeeding
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Failed { stderr, .. } => !PERMANENT_FAILURES.iter().any(|m| stderr.contains(m)),
            Self::Spawn(_) | Self::MissingOutput(_) | Self::Probe(_) => false,
        }
    }
}
