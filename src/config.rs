use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::{CacheKeyMode, OverwritePolicy, RegenerationPolicy};
use crate::error::{Result, VideoError};
use crate::scene::SceneDescriptor;

/// 每个场景传给图片后端的参数
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ImageParams {
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance_scale: f64,
    /// 场景自身没有负面提示词时使用
    pub default_negative_prompt: Option<String>,
}

impl Default for ImageParams {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            steps: 50,
            guidance_scale: 7.5,
            default_negative_prompt: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SpeechParams {
    pub locale: String,
    /// 语音音色；未设置时使用后端默认音色
    pub voice: Option<String>,
    /// 同时进行的合成调用上限
    pub concurrency: usize,
}

impl Default for SpeechParams {
    fn default() -> Self {
        Self {
            locale: "th".to_string(),
            voice: None,
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub transition_enabled: bool,
    /// 交叉淡化时长（秒）
    pub transition_duration: f64,
    pub audio_codec: String,
    /// 把旁白文字烧录进画面，默认关闭
    pub captions: bool,
    pub caption_font: Option<PathBuf>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            fps: 24,
            width: 1280,
            height: 720,
            transition_enabled: false,
            transition_duration: 1.0,
            audio_codec: "aac".to_string(),
            captions: false,
            caption_font: None,
        }
    }
}

impl RenderSettings {
    /// 开启转场时的交叉淡化时长
    pub fn transition(&self) -> Option<f64> {
        self.transition_enabled.then_some(self.transition_duration)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// `images/`、`audio/`、`output/` 所在目录
    pub work_dir: PathBuf,
    pub output_name: String,
    /// 每段旁白之后追加的秒数
    pub padding: f64,
    pub image_policy: RegenerationPolicy,
    pub audio_policy: RegenerationPolicy,
    pub overwrite_policy: OverwritePolicy,
    pub cache_key: CacheKeyMode,
    pub image: ImageParams,
    pub speech: SpeechParams,
    pub render: RenderSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            output_name: "final_video".to_string(),
            padding: 1.0,
            image_policy: RegenerationPolicy::default(),
            audio_policy: RegenerationPolicy::default(),
            overwrite_policy: OverwritePolicy::default(),
            cache_key: CacheKeyMode::default(),
            image: ImageParams::default(),
            speech: SpeechParams::default(),
            render: RenderSettings::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.padding.is_finite() || self.padding < 0.0 {
            return Err(VideoError::configuration(format!(
                "padding must be a non-negative number of seconds, got {}",
                self.padding
            )));
        }
        if self.output_name.trim().is_empty() {
            return Err(VideoError::configuration("output name must not be empty"));
        }
        if self.image.width == 0 || self.image.height == 0 || self.image.steps == 0 {
            return Err(VideoError::configuration(
                "image width/height/steps must be non-zero",
            ));
        }
        if self.speech.concurrency == 0 {
            return Err(VideoError::configuration("speech concurrency must be non-zero"));
        }

        let render = &self.render;
        if render.fps == 0 {
            return Err(VideoError::configuration("render fps must be non-zero"));
        }
        if render.width == 0 || render.height == 0 {
            return Err(VideoError::configuration("render width/height must be non-zero"));
        }
        if render.width % 2 != 0 || render.height % 2 != 0 {
            // yuv420p 要求宽高为偶数
            return Err(VideoError::configuration(
                "render width/height must be even (required for yuv420p mp4 output)",
            ));
        }
        if render.transition_enabled
            && (!render.transition_duration.is_finite() || render.transition_duration <= 0.0)
        {
            return Err(VideoError::configuration(
                "transition duration must be positive when transitions are enabled",
            ));
        }
        if render.captions && render.caption_font.is_none() {
            return Err(VideoError::configuration("captions require a caption font"));
        }
        Ok(())
    }
}

/// 磁盘上的项目文件：场景列表加设置
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectFile {
    #[serde(default)]
    pub name: Option<String>,
    pub scenes: Vec<SceneDescriptor>,
    #[serde(default)]
    pub settings: PipelineConfig,
}

impl ProjectFile {
    pub fn parse(json: &str) -> Result<Self> {
        let mut project: ProjectFile = serde_json::from_str(json)?;
        if let Some(name) = &project.name {
            project.settings.output_name = name.clone();
        }
        Ok(project)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::parse(&json)
    }
}
