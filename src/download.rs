//! yt-dlp downloader
//! Fetches a candidate URL to local disk and probes what arrived

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::config::DownloaderConfig;
use crate::error::DownloadError;
use crate::retry::RetryPolicy;
use crate::types::DownloadedClip;
use crate::video;

pub struct Downloader {
    config: DownloaderConfig,
    retry: RetryPolicy<DownloadError>,
}

impl Downloader {
    pub fn new(config: DownloaderConfig) -> Self {
        let retry = RetryPolicy::new(&config.retry, DownloadError::is_retryable);
        Self { config, retry }
    }

    pub fn download_dir(&self) -> &Path {
        Path::new(&self.config.download_dir)
    }

    /// yt-dlp arguments for one URL
    pub fn build_args(&self, url: &str) -> Vec<String> {
        let template = self.download_dir().join("%(id)s.%(ext)s");

        let mut args: Vec<String> = vec![
            "-f".into(),
            self.config.format.clone(),
            "--merge-output-format".into(),
            "mp4".into(),
            "--no-playlist".into(),
            "--no-warnings".into(),
            "--no-cache-dir".into(),
            "--retries".into(),
            "10".into(),
            "--fragment-retries".into(),
            "10".into(),
            "--force-overwrites".into(),
            "--no-part".into(),
            "--print".into(),
            "after_move:filepath".into(),
        ];

        if let Some(cookies) = self.config.cookies_path.as_deref().filter(|c| !c.is_empty()) {
            args.push("--cookies".into());
            args.push(cookies.to_string());
        }

        if self.config.force_ipv4 {
            args.push("--force-ipv4".into());
        }

        args.push("-o".into());
        args.push(template.to_string_lossy().to_string());
        args.push(url.to_string());
        args
    }

    /// Download `url`, retrying transient yt-dlp failures
    pub async fn fetch(&self, url: &str) -> Result<DownloadedClip, DownloadError> {
        std::fs::create_dir_all(self.download_dir()).map_err(DownloadError::Spawn)?;

        let path = self
            .retry
            .run("yt-dlp download", || self.fetch_once(url))
            .await?;

        let clip = inspect_download(path).await?;
        log::debug!(
            "Downloaded {} -> {} ({:.1}s, audio: {})",
            url,
            clip.path.display(),
            clip.duration_seconds,
            clip.has_audio
        );
        Ok(clip)
    }

    async fn fetch_once(&self, url: &str) -> Result<PathBuf, DownloadError> {
        let output = Command::new("yt-dlp")
            .args(self.build_args(url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(DownloadError::Spawn)?;

        if !output.status.success() {
            return Err(DownloadError::Failed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let path = printed_path(&stdout).ok_or_else(|| DownloadError::MissingOutput(url.to_string()))?;
        if !path.exists() {
            return Err(DownloadError::MissingOutput(url.to_string()));
        }
        Ok(path)
    }
}

/// Probe a finished download. A file that cannot be probed is deleted.
async fn inspect_download(path: PathBuf) -> Result<DownloadedClip, DownloadError> {
    let probed = async {
        let duration_seconds = video::probe_duration(&path).await?;
        let has_audio = video::has_audio_stream(&path).await?;
        anyhow::Ok((duration_seconds, has_audio))
    }
    .await;

    match probed {
        Ok((duration_seconds, has_audio)) => Ok(DownloadedClip {
            path,
            duration_seconds,
            has_audio,
        }),
        Err(e) => {
            remove_download(&path);
            Err(DownloadError::Probe(e.to_string()))
        }
    }
}

/// yt-dlp prints the final path last
fn printed_path(stdout: &str) -> Option<PathBuf> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .map(PathBuf::from)
}

/// Delete a downloaded file, logging instead of failing
pub fn remove_download(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Could not remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DownloaderConfig {
        DownloaderConfig {
            download_dir: "/tmp/clips".to_string(),
            ..DownloaderConfig::default()
        }
    }

    #[test]
    fn test_build_args_defaults() {
        let downloader = Downloader::new(config());
        let args = downloader.build_args("https://v.redd.it/abc");

        assert_eq!(args[0], "-f");
        assert_eq!(args[1], "bestvideo[height<=1080]+bestaudio/best");
        assert!(args.windows(2).any(|w| w == ["--merge-output-format", "mp4"]));
        assert!(args.windows(2).any(|w| w == ["--print", "after_move:filepath"]));
        assert!(args.windows(2).any(|w| w == ["-o", "/tmp/clips/%(id)s.%(ext)s"]));
        assert!(!args.contains(&"--cookies".to_string()));
        assert!(!args.contains(&"--force-ipv4".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://v.redd.it/abc"));
    }

    #[test]
    fn test_build_args_with_cookies_and_ipv4() {
        let mut cfg = config();
        cfg.cookies_path = Some("cookies.txt".to_string());
        cfg.force_ipv4 = true;
        let args = Downloader::new(cfg).build_args("https://youtu.be/x");

        assert!(args.windows(2).any(|w| w == ["--cookies", "cookies.txt"]));
        assert!(args.contains(&"--force-ipv4".to_string()));
    }

    #[test]
    fn test_empty_cookies_path_is_ignored() {
        let mut cfg = config();
        cfg.cookies_path = Some(String::new());
        let args = Downloader::new(cfg).build_args("https://youtu.be/x");
        assert!(!args.contains(&"--cookies".to_string()));
    }

    #[test]
    fn test_printed_path_takes_last_line() {
        let out = "[info] something\n/tmp/clips/abc.mp4\n\n";
        assert_eq!(printed_path(out), Some(PathBuf::from("/tmp/clips/abc.mp4")));
        assert_eq!(printed_path("  \n"), None);
    }

    #[tokio::test]
    async fn test_unprobeable_download_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.mp4");
        std::fs::write(&path, "not a video container").unwrap();

        let err = inspect_download(path.clone()).await.unwrap_err();
        assert!(matches!(err, DownloadError::Probe(_)));
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_remove_download_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"data").unwrap();
        remove_download(&path);
        assert!(!path.exists());
        remove_download(&path);
    }
}
