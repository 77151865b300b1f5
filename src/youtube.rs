//! YouTube Shorts publishing
//! Moves finished shorts from the Drive folder onto a YouTube channel

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::path::Path;

use crate::ai::sanitize_filename;
use crate::config::YouTubeConfig;
use crate::download::remove_download;
use crate::drive::{multipart_related_body, DriveUploader, GoogleAuth, MULTIPART_BOUNDARY};

pub const YOUTUBE_UPLOAD_SCOPE: &str = "https://www.googleapis.com/auth/youtube.upload";
const MAX_TITLE_BASE_CHARS: usize = 90;

/// Title for a short: the file stem, shortened past 90 characters, plus the suffix
pub fn shorts_title(file_name: &str, suffix: &str) -> String {
    let base = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.to_string());

    let base = if base.chars().count() > MAX_TITLE_BASE_CHARS {
        let cut: String = base.chars().take(MAX_TITLE_BASE_CHARS - 3).collect();
        format!("{}...", cut.trim_end())
    } else {
        base
    };

    match suffix.trim() {
        "" => base,
        suffix => format!("{} {}", base, suffix),
    }
}

#[derive(Deserialize)]
struct InsertedVideo {
    id: String,
}

pub struct YouTubeUploader {
    client: Client,
    auth: GoogleAuth,
    config: YouTubeConfig,
}

impl YouTubeUploader {
    pub fn new(config: &YouTubeConfig, auth: GoogleAuth) -> Self {
        Self {
            client: Client::new(),
            auth,
            config: config.clone(),
        }
    }

    fn metadata(&self, title: &str) -> serde_json::Value {
        let mut snippet = json!({
            "title": title,
            "description": self.config.description,
            "tags": self.config.tags,
        });
        if let Some(category) = &self.config.category_id {
            snippet["categoryId"] = json!(category);
        }
        json!({
            "snippet": snippet,
            "status": {"privacyStatus": self.config.privacy_status},
        })
    }

    /// Upload a local video and return the new video id
    pub async fn upload(&self, local_path: &Path, title: &str) -> Result<String> {
        let bytes = tokio::fs::read(local_path)
            .await
            .with_context(|| format!("Failed to read {}", local_path.display()))?;
        let body = multipart_related_body(&self.metadata(title), "video/*", &bytes);

        let token = self.auth.token(YOUTUBE_UPLOAD_SCOPE).await?;
        let resp = self
            .client
            .post(format!(
                "{}/upload/youtube/v3/videos",
                self.config.api_base.trim_end_matches('/')
            ))
            .bearer_auth(token)
            .query(&[("uploadType", "multipart"), ("part", "snippet,status")])
            .header(
                "Content-Type",
                format!("multipart/related; boundary={}", MULTIPART_BOUNDARY),
            )
            .body(body)
            .send()
            .await
            .context("YouTube upload request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("YouTube upload returned {}: {}", status, text));
        }

        let video: InsertedVideo = resp.json().await.context("Invalid videos.insert response")?;
        log::info!("Published {} as {}", title, video.id);
        Ok(video.id)
    }
}

#[derive(Debug, Default)]
pub struct PublishSummary {
    /// Drive file name and YouTube video id of every published short
    pub published: Vec<(String, String)>,
    pub failed: usize,
}

impl fmt::Display for PublishSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} published, {} failed", self.published.len(), self.failed)
    }
}

/// Publish every video in the Drive folder, one at a time.
///
/// Each file is downloaded into `work_dir`, uploaded, then removed from Drive
/// when `delete_from_drive` is set. A failed upload keeps the Drive copy for
/// the next run. The local copy is always removed.
pub async fn publish_from_drive(
    drive: &DriveUploader,
    youtube: &YouTubeUploader,
    work_dir: &Path,
) -> Result<PublishSummary> {
    tokio::fs::create_dir_all(work_dir)
        .await
        .with_context(|| format!("Failed to create {}", work_dir.display()))?;

    let files = drive.list_folder().await?;
    if files.is_empty() {
        log::info!("No videos waiting in the Drive folder");
    }

    let mut summary = PublishSummary::default();
    for file in files {
        let local_name = match sanitize_filename(&file.name) {
            name if name.is_empty() => file.id.clone(),
            name => name,
        };
        let local = work_dir.join(local_name);
        let title = shorts_title(&file.name, &youtube.config.title_suffix);
        println!("📤 {} -> \"{}\"", file.name, title);

        let published = async {
            drive.download(&file.id, &local).await?;
            youtube.upload(&local, &title).await
        }
        .await;
        remove_download(&local);

        match published {
            Ok(video_id) => {
                if youtube.config.delete_from_drive {
                    if let Err(e) = drive.delete(&file.id).await {
                        log::warn!("Could not delete {} from Drive: {}", file.name, e);
                    }
                }
                summary.published.push((file.name, video_id));
            }
            Err(e) => {
                log::warn!("Failed to publish {}: {:#}", file.name, e);
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}
