mod qwen;

pub use qwen::QwenClient;

use async_trait::async_trait;

use crate::error::Result;

/// 生成一张场景图片所需的参数
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance_scale: f64,
}

/// 合成的旁白。`duration` 为引擎报告的时长（可能没有），
/// 流水线以实际写入文件的测量结果为准。
#[derive(Debug, Clone)]
pub struct SpeechClip {
    pub audio: Vec<u8>,
    pub duration: Option<f64>,
}

/// 绑定到一个计算设备的文生图引擎
#[async_trait]
pub trait ImageBackend: Send + Sync {
    async fn synthesize_image(&self, request: &ImageRequest) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait SpeechBackend: Send + Sync {
    async fn synthesize_speech(&self, text: &str, locale: &str) -> Result<SpeechClip>;
}
