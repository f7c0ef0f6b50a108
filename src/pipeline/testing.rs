//! 内存中的假后端，无需模型、网络或 ffmpeg 即可测试各阶段

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::api::{ImageBackend, ImageRequest, SpeechBackend, SpeechClip};
use crate::config::RenderSettings;
use crate::error::{Result, VideoError};
use crate::media::AudioProbe;
use crate::video::{RenderBackend, Timeline};

#[derive(Default)]
struct InFlight {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeImageBackend {
    pub calls: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    in_flight: InFlight,
    fail_prompt: Option<String>,
    delay: Option<Duration>,
}

impl FakeImageBackend {
    pub fn failing_on(index: usize) -> Self {
        Self {
            fail_prompt: Some(format!("prompt {index}")),
            ..Self::default()
        }
    }

    pub fn slow() -> Self {
        Self {
            delay: Some(Duration::from_millis(10)),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ImageBackend for FakeImageBackend {
    async fn synthesize_image(&self, request: &ImageRequest) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.in_flight.enter();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.max_in_flight
            .store(self.in_flight.max.load(Ordering::SeqCst), Ordering::SeqCst);
        self.in_flight.leave();

        if self.fail_prompt.as_deref() == Some(request.prompt.as_str()) {
            return Err(VideoError::ApiError("out of memory".to_string()));
        }
        Ok(format!("image:{}", request.prompt).into_bytes())
    }
}

/// 假语音引擎，"音频"内容就是文本形式的时长
#[derive(Default)]
pub struct FakeSpeechBackend {
    pub calls: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    in_flight: InFlight,
    durations: HashMap<String, f64>,
    corrupt: Option<String>,
    fail: Option<String>,
    delay: Option<Duration>,
}

impl FakeSpeechBackend {
    /// 场景 `i` 的旁白为 `text {i}`，时长 `durations[i]` 秒
    pub fn with_durations(durations: &[f64]) -> Self {
        let durations = durations
            .iter()
            .enumerate()
            .map(|(i, d)| (format!("text {i}"), *d))
            .collect();
        Self {
            durations,
            ..Self::default()
        }
    }

    /// 为场景 `index` 生成无法读取的音频
    pub fn corrupting(mut self, index: usize) -> Self {
        self.corrupt = Some(format!("text {index}"));
        self
    }

    pub fn failing_on(mut self, index: usize) -> Self {
        self.fail = Some(format!("text {index}"));
        self
    }

    pub fn slow(mut self) -> Self {
        self.delay = Some(Duration::from_millis(10));
        self
    }
}

#[async_trait]
impl SpeechBackend for FakeSpeechBackend {
    async fn synthesize_speech(&self, text: &str, _locale: &str) -> Result<SpeechClip> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.in_flight.enter();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.max_in_flight
            .store(self.in_flight.max.load(Ordering::SeqCst), Ordering::SeqCst);
        self.in_flight.leave();

        if self.fail.as_deref() == Some(text) {
            return Err(VideoError::ApiError("tts quota exceeded".to_string()));
        }
        if self.corrupt.as_deref() == Some(text) {
            return Ok(SpeechClip {
                audio: b"garbage".to_vec(),
                duration: None,
            });
        }
        let duration = self.durations.get(text).copied().unwrap_or(2.0);
        Ok(SpeechClip {
            audio: duration.to_string().into_bytes(),
            duration: Some(duration),
        })
    }
}

/// 从 `FakeSpeechBackend` 写入的文件读回时长
#[derive(Default)]
pub struct FakeProbe {
    pub calls: AtomicUsize,
}

#[async_trait]
impl AudioProbe for FakeProbe {
    async fn duration(&self, path: &Path) -> Result<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = tokio::fs::read_to_string(path).await.unwrap_or_default();
        text.trim()
            .parse::<f64>()
            .map_err(|e| VideoError::DurationMeasurement {
                path: path.to_path_buf(),
                cause: e.to_string(),
            })
    }
}

/// 写出时间线的文本而不是编码视频
#[derive(Default)]
pub struct FakeRenderBackend {
    pub calls: AtomicUsize,
    pub fail: bool,
    pub last_timeline: Mutex<Option<Timeline>>,
}

#[async_trait]
impl RenderBackend for FakeRenderBackend {
    async fn render(&self, timeline: &Timeline, settings: &RenderSettings, out_path: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_timeline.lock() {
            *last = Some(timeline.clone());
        }

        let mut dump = format!("fps={}\n", settings.fps);
        for clip in &timeline.clips {
            dump.push_str(&format!(
                "{} {} {} {:.3} {:.3}\n",
                clip.scene_index,
                clip.image.display(),
                clip.audio.display(),
                clip.start,
                clip.duration
            ));
        }
        tokio::fs::write(out_path, dump).await?;

        if self.fail {
            return Err(VideoError::render("encoder crashed"));
        }
        Ok(())
    }
}
