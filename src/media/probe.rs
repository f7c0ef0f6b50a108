use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{Result, VideoError};

/// 测量音频文件的播放时长
#[async_trait]
pub trait AudioProbe: Send + Sync {
    async fn duration(&self, path: &Path) -> Result<f64>;
}

/// 读取 `ffprobe` 输出中的 `format.duration`
#[derive(Debug, Clone, Default)]
pub struct FfprobeAudioProbe;

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(Deserialize)]
struct ProbeOut {
    format: Option<ProbeFormat>,
}

#[async_trait]
impl AudioProbe for FfprobeAudioProbe {
    async fn duration(&self, path: &Path) -> Result<f64> {
        let measurement_error = |cause: String| VideoError::DurationMeasurement {
            path: path.to_path_buf(),
            cause,
        };

        let out = Command::new("ffprobe")
            .args(["-v", "error", "-print_format", "json", "-show_format"])
            .arg(path)
            .output()
            .await
            .map_err(|e| measurement_error(format!("failed to run ffprobe: {e}")))?;
        if !out.status.success() {
            return Err(measurement_error(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }

        parse_duration(&out.stdout).map_err(measurement_error)
    }
}

fn parse_duration(stdout: &[u8]) -> std::result::Result<f64, String> {
    let parsed: ProbeOut =
        serde_json::from_slice(stdout).map_err(|e| format!("ffprobe json parse failed: {e}"))?;
    let raw = parsed
        .format
        .and_then(|f| f.duration)
        .ok_or_else(|| "missing duration from ffprobe".to_string())?;
    let seconds: f64 = raw
        .trim()
        .parse()
        .map_err(|e| format!("invalid duration '{raw}': {e}"))?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(format!("invalid duration {seconds}"));
    }
    Ok(seconds)
}

pub fn is_ffmpeg_on_path() -> bool {
    ["ffmpeg", "ffprobe"].iter().all(|tool| {
        std::process::Command::new(tool)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    })
}
