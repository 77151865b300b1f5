//! Video processing module for clipshaper
//! Handles ffprobe inspection and running ffmpeg under a wall-clock limit

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::error::ReformatError;
use crate::types::VideoDimensions;

/// Check if required external dependencies are available
pub fn check_dependencies() -> Result<()> {
    let mut missing = Vec::new();

    for (binary, flag) in [("ffmpeg", "-version"), ("ffprobe", "-version"), ("yt-dlp", "--version")] {
        let found = std::process::Command::new(binary)
            .arg(flag)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok();
        if !found {
            missing.push(binary);
        }
    }

    if !missing.is_empty() {
        let os = std::env::consts::OS;
        let mut msg = format!(
            "Missing required dependencies: {}.\nPlease install them first.",
            missing.join(", ")
        );

        if os == "linux" {
            msg.push_str("\n\nOn Linux (Ubuntu/Debian), try:\n  sudo apt update && sudo apt install ffmpeg\n  sudo pip3 install -U yt-dlp");
        } else if os == "macos" {
            msg.push_str("\n\nOn macOS, try:\n  brew install ffmpeg\n  brew install yt-dlp");
        } else if os == "windows" {
            msg.push_str("\n\nOn Windows, ensure ffmpeg and yt-dlp are in your PATH.");
        }

        return Err(anyhow!(msg));
    }

    Ok(())
}

/// Parse ffprobe `csv=s=x:p=0` output such as `1920x1080`
pub fn parse_dimensions(text: &str) -> Option<VideoDimensions> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut parts = line.split('x');
    let width: u32 = parts.next()?.trim().parse().ok()?;
    let height: u32 = parts.next()?.trim().parse().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some(VideoDimensions { width, height })
}

/// Reject paths that cannot possibly hold a video before spawning ffprobe
pub fn ensure_readable_file(path: &Path) -> Result<u64, ReformatError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| ReformatError::invalid_input(path, format!("cannot read file: {}", e)))?;
    if !metadata.is_file() {
        return Err(ReformatError::invalid_input(path, "not a regular file"));
    }
    if metadata.len() == 0 {
        return Err(ReformatError::invalid_input(path, "file is empty"));
    }
    Ok(metadata.len())
}

/// Get width and height of the first video stream
pub async fn probe_dimensions(path: &Path) -> Result<VideoDimensions, ReformatError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=s=x:p=0",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| ReformatError::probe(path, format!("failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ReformatError::probe(path, stderr.trim().to_string()));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    if text.trim().is_empty() {
        return Err(ReformatError::invalid_input(path, "no video stream"));
    }

    parse_dimensions(&text).ok_or_else(|| {
        ReformatError::probe(path, format!("unexpected ffprobe output: {}", text.trim()))
    })
}

/// Get video duration in seconds using ffprobe
pub async fn probe_duration(path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await
        .context("Failed to run ffprobe")?;

    if !output.status.success() {
        return Err(anyhow!(
            "ffprobe failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let duration: f64 = text.trim().parse().context("Failed to parse duration")?;
    Ok(duration)
}

/// Whether the file carries at least one audio stream
pub async fn has_audio_stream(path: &Path) -> Result<bool> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "a",
            "-show_entries",
            "stream=codec_type",
            "-of",
            "csv=p=0",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await
        .context("Failed to run ffprobe")?;

    if !output.status.success() {
        return Err(anyhow!(
            "ffprobe failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).contains("audio"))
}

/// Remove a partially written output, ignoring a file that never appeared
fn discard_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            log::warn!("Could not remove partial output {}: {}", path.display(), e);
        }
    }
}

/// Run ffmpeg with the given arguments.
///
/// On a non-zero exit or when `timeout` elapses the process is killed and
/// `output_path` is removed, so callers never see a half-written file.
pub async fn run_ffmpeg(
    args: &[String],
    output_path: &Path,
    timeout: Option<Duration>,
) -> Result<(), ReformatError> {
    run_command("ffmpeg", args, output_path, timeout).await
}

async fn run_command(
    program: &str,
    args: &[String],
    output_path: &Path,
    timeout: Option<Duration>,
) -> Result<(), ReformatError> {
    log::debug!("Running: {} {}", program, args.join(" "));

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                // Dropping the future dropped the child, kill_on_drop takes it down
                log::warn!("{} exceeded {}s, killed", program, limit.as_secs());
                discard_partial(output_path);
                return Err(ReformatError::Timeout(limit.as_secs()));
            }
        },
        None => child.wait_with_output().await?,
    };

    if !output.status.success() {
        discard_partial(output_path);
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ReformatError::transcode(
            output.status.code(),
            stderr.trim().to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dimensions() {
        assert_eq!(
            parse_dimensions("1920x1080\n"),
            Some(VideoDimensions::new(1920, 1080))
        );
        assert_eq!(
            parse_dimensions("\n 720x1280 \n"),
            Some(VideoDimensions::new(720, 1280))
        );
    }

    #[test]
    fn test_parse_dimensions_rejects_garbage() {
        assert_eq!(parse_dimensions(""), None);
        assert_eq!(parse_dimensions("N/AxN/A"), None);
        assert_eq!(parse_dimensions("0x1080"), None);
        assert_eq!(parse_dimensions("1920"), None);
    }

    #[test]
    fn test_empty_file_is_invalid_input() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = ensure_readable_file(file.path()).unwrap_err();
        assert!(matches!(err, ReformatError::InvalidInput { .. }));
    }

    #[test]
    fn test_missing_file_is_invalid_input() {
        let err = ensure_readable_file(Path::new("/definitely/not/here.mp4")).unwrap_err();
        assert!(matches!(err, ReformatError::InvalidInput { .. }));
    }

    #[test]
    fn test_directory_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = ensure_readable_file(dir.path()).unwrap_err();
        assert!(matches!(err, ReformatError::InvalidInput { .. }));
    }

    fn shell(script: String) -> Vec<String> {
        vec!["-c".to_string(), script]
    }

    #[tokio::test]
    async fn test_failed_command_removes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp4");
        let script = format!("echo x > '{}'; echo 'Error while filtering' >&2; exit 3", out.display());

        let err = run_command("sh", &shell(script), &out, None).await.unwrap_err();
        match err {
            ReformatError::Transcode { exit_code, stderr } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr, "Error while filtering");
            }
            other => panic!("expected transcode error, got {:?}", other),
        }
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_timeout_kills_and_removes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp4");
        let script = format!("echo x > '{}'; sleep 5", out.display());

        let started = std::time::Instant::now();
        let err = run_command("sh", &shell(script), &out, Some(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, ReformatError::Timeout(1)));
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_successful_command_keeps_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp4");
        let script = format!("echo x > '{}'", out.display());

        run_command("sh", &shell(script), &out, Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert!(out.exists());
    }

    #[tokio::test]
    async fn test_probe_text_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.mp4");
        std::fs::write(&path, "this is not a video").unwrap();

        // With ffprobe installed this is a probe failure, without it the spawn fails;
        // both surface as fatal input errors.
        let err = probe_dimensions(&path).await.unwrap_err();
        assert!(err.is_fatal_input());
    }
}
