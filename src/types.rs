//! Shared data types for clipshaper

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Width and height of the first video stream of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoDimensions {
    pub width: u32,
    pub height: u32,
}

impl VideoDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width divided by height
    pub fn aspect(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

impl std::fmt::Display for VideoDimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A post or search hit that may point at a downloadable clip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub url: String,
    /// Title or body text, fed to the captioner
    pub text: String,
    #[serde(default)]
    pub duration_hint: Option<f64>,
    /// Where the candidate came from, e.g. "r/cats" or "youtube"
    pub source: String,
}

/// A clip fetched to local disk together with its probed properties
#[derive(Debug, Clone)]
pub struct DownloadedClip {
    pub path: PathBuf,
    pub duration_seconds: f64,
    pub has_audio: bool,
}

/// Result of storing a file in Google Drive
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    #[serde(rename = "id")]
    pub remote_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub web_view_link: Option<String>,
}

/// Application version constant
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name constant
pub const APP_NAME: &str = "clipshaper";
