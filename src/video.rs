//! External tool helpers for YT StoryMaker
//! ffmpeg/ffprobe discovery, NVENC detection, duration probing and bounded process execution

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::Duration;

use crate::error::{ComposeError, ComposeResult};

/// Check if required external dependencies are available
pub fn check_dependencies(ffmpeg_path: &str) -> Result<()> {
    let ffmpeg = Command::new(ffmpeg_path)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .output();
    let ffprobe = Command::new("ffprobe")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .output();

    let mut missing = Vec::new();

    if ffmpeg.is_err() {
        missing.push("ffmpeg");
    }

    if ffprobe.is_err() {
        missing.push("ffprobe");
    }

    if !missing.is_empty() {
        let os = std::env::consts::OS;
        let mut msg = format!(
            "Missing required dependencies: {}.\nPlease install them first.",
            missing.join(", ")
        );

        if os == "linux" {
            msg.push_str("\n\nOn Linux (Ubuntu/Debian), try:\n  sudo apt update && sudo apt install ffmpeg");
        } else if os == "macos" {
            msg.push_str("\n\nOn macOS, try:\n  brew install ffmpeg");
        } else if os == "windows" {
            msg.push_str("\n\nOn Windows, ensure ffmpeg and ffprobe are in your PATH.");
        }

        return Err(anyhow!(msg));
    }

    Ok(())
}

/// Check if NVENC (NVIDIA Hardware Encoding) is available
pub fn check_nvenc_availability(ffmpeg_path: &str) -> bool {
    let output = Command::new(ffmpeg_path)
        .args(["-hide_banner", "-encoders"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output();

    if let Ok(out) = output {
        let stdout = String::from_utf8_lossy(&out.stdout);
        stdout.contains("h264_nvenc")
    } else {
        false
    }
}

/// Media duration in seconds using ffprobe
pub async fn probe_duration(file_path: &Path) -> Result<f64> {
    let output = tokio::process::Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(file_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("Failed to run ffprobe")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("ffprobe failed: {}", stderr.trim()));
    }

    parse_duration(&String::from_utf8_lossy(&output.stdout))
}

fn parse_duration(raw: &str) -> Result<f64> {
    let duration: f64 = raw.trim().parse().context("Failed to parse duration")?;
    if !duration.is_finite() || duration <= 0.0 {
        return Err(anyhow!("Invalid duration reported: {}", raw.trim()));
    }
    Ok(duration)
}

/// Run a command to completion, killing it when `timeout` elapses.
/// Output is captured; a non-zero exit is returned as-is for the caller to judge.
pub async fn run_command_with_timeout(
    cmd: &mut tokio::process::Command,
    timeout: Duration,
) -> ComposeResult<Output> {
    let program = cmd.as_std().get_program().to_string_lossy().to_string();

    let child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ComposeError::backend(&format!("Failed to start {}: {}", program, e)))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            log::warn!("{} exceeded {:?}, killed", program, timeout);
            Err(ComposeError::RenderTimeout { after: timeout })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("12.480000\n").unwrap(), 12.48);
        assert!(parse_duration("N/A").is_err());
        assert!(parse_duration("0.0").is_err());
    }

    #[test]
    fn test_nvenc_missing_binary() {
        assert!(!check_nvenc_availability("definitely-not-a-real-ffmpeg"));
    }

    #[test]
    fn test_missing_dependency_reported() {
        let err = check_dependencies("definitely-not-a-real-ffmpeg").unwrap_err();
        assert!(err.to_string().contains("ffmpeg"));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_backend_error() {
        let mut cmd = tokio::process::Command::new("definitely-not-a-real-program");
        let err = run_command_with_timeout(&mut cmd, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "render_backend");
        assert!(err.to_string().contains("definitely-not-a-real-program"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_command_times_out() {
        let mut cmd = tokio::process::Command::new("sleep");
        cmd.arg("5");
        let err = run_command_with_timeout(&mut cmd, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ComposeError::RenderTimeout { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_captured() {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.args(["-c", "echo out; echo err >&2; exit 3"]);
        let output = run_command_with_timeout(&mut cmd, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "out");
        assert_eq!(String::from_utf8_lossy(&output.stderr).trim(), "err");
    }
}
