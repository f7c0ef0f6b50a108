mod registry;

pub use registry::SceneRegistry;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 表示一个场景/分镜，来自项目文件，运行期间不变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDescriptor {
    /// 场景序号，从 0 开始且连续
    pub index: usize,
    /// 图片提示词
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    /// 对应的台词/旁白
    pub narration_text: String,
    /// 建议时长（秒），未测得音频时长时使用
    pub nominal_duration: f64,
}

impl SceneDescriptor {
    pub fn new(index: usize, prompt: impl Into<String>, narration_text: impl Into<String>, nominal_duration: f64) -> Self {
        Self {
            index,
            prompt: prompt.into(),
            negative_prompt: None,
            narration_text: narration_text.into(),
            nominal_duration,
        }
    }

    pub fn with_negative_prompt(mut self, negative_prompt: impl Into<String>) -> Self {
        self.negative_prompt = Some(negative_prompt.into());
        self
    }
}

/// 场景在流水线中的进度，有序且只会前进
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    Pending,
    ImageReady,
    AudioReady,
    Synchronized,
    Assembled,
}

/// 场景在本次运行中的状态
#[derive(Debug, Clone, PartialEq)]
pub struct SceneState {
    pub image_artifact: Option<PathBuf>,
    pub audio_artifact: Option<PathBuf>,
    pub measured_audio_duration: Option<f64>,
    pub resolved_duration: f64,
    stage: Stage,
}

impl SceneState {
    pub fn new(nominal_duration: f64) -> Self {
        Self {
            image_artifact: None,
            audio_artifact: None,
            measured_audio_duration: None,
            resolved_duration: nominal_duration,
            stage: Stage::Pending,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// 推进到 `stage`；已在该阶段或之后则不变
    pub fn advance(&mut self, stage: Stage) {
        if stage > self.stage {
            self.stage = stage;
        }
    }
}
