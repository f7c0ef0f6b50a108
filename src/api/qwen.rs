use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ImageBackend, ImageRequest, SpeechBackend, SpeechClip};
use crate::error::{Result, VideoError};

const QWEN_IMAGE_API: &str = "https://dashscope.aliyuncs.com/api/v1/services/aigc/text2image/image-synthesis";
const QWEN_TTS_API: &str = "https://dashscope.aliyuncs.com/api/v1/services/aigc/text2speech/speech-synthesis";
const QWEN_TASKS_API: &str = "https://dashscope.aliyuncs.com/api/v1/tasks";

const DEFAULT_IMAGE_MODEL: &str = "wanx-v1";
const DEFAULT_TTS_MODEL: &str = "cosyvoice-v1";
const DEFAULT_VOICE: &str = "longxiaochun";

/// wanx-v1 只接受这几种尺寸
const WANX_SIZES: &[(u32, u32)] = &[(1024, 1024), (720, 1280), (768, 1152), (1280, 720)];

/// 千问 DashScope 客户端，负责图片与语音合成
#[derive(Debug, Clone)]
pub struct QwenClient {
    api_key: String,
    client: Client,
    voice: String,
    poll_interval: Duration,
    max_polls: u32,
}

#[derive(Debug, Deserialize)]
struct ImageGenerationResponse {
    output: ImageOutput,
}

#[derive(Debug, Deserialize)]
struct ImageOutput {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct ImageTaskResponse {
    output: ImageTaskOutput,
}

#[derive(Debug, Deserialize)]
struct ImageTaskOutput {
    task_status: String,
    results: Option<Vec<ImageResult>>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageResult {
    url: Option<String>,
}

#[derive(Debug, PartialEq)]
enum TaskState {
    Done(String),
    Failed(String),
    Running(String),
}

impl QwenClient {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;

        Ok(Self {
            api_key,
            client,
            voice: DEFAULT_VOICE.to_string(),
            poll_interval: Duration::from_secs(5),
            max_polls: 60,
        })
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    /// 默认音色只会说中文和英文
    pub fn default_voice_speaks(locale: &str) -> bool {
        let lang = locale.split(['-', '_']).next().unwrap_or_default();
        lang.eq_ignore_ascii_case("zh") || lang.eq_ignore_ascii_case("en")
    }

    async fn submit_image_task(&self, request: &ImageRequest) -> Result<String> {
        let response = self
            .client
            .post(QWEN_IMAGE_API)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("X-DashScope-Async", "enable")
            .json(&image_request_body(request))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(VideoError::ApiError(format!(
                "Image generation API error: {}",
                error_text
            )));
        }

        let task_response: ImageGenerationResponse = response.json().await?;
        Ok(task_response.output.task_id)
    }

    async fn wait_for_image_task(&self, task_id: &str) -> Result<String> {
        let get_url = format!("{}/{}", QWEN_TASKS_API, task_id);

        for i in 0..self.max_polls {
            tokio::time::sleep(self.poll_interval).await;

            let response = self
                .client
                .get(&get_url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let error_text = response.text().await?;
                warn!("Failed to get task status (HTTP {}): {}", status, error_text);
                continue;
            }

            let response_text = response.text().await?;
            debug!("Task response: {}", response_text);

            match parse_task_state(&response_text)? {
                TaskState::Done(url) => return Ok(url),
                TaskState::Failed(message) => {
                    return Err(VideoError::ApiError(format!(
                        "Image generation failed: {}",
                        message
                    )))
                }
                TaskState::Running(status) => {
                    debug!("Task status: {} (poll {}/{})", status, i + 1, self.max_polls);
                }
            }
        }

        Err(VideoError::ApiError("Image generation timeout".to_string()))
    }
}

#[async_trait]
impl ImageBackend for QwenClient {
    async fn synthesize_image(&self, request: &ImageRequest) -> Result<Vec<u8>> {
        info!("Generating image for prompt: {}", request.prompt);
        // wanx 自行决定采样参数
        debug!(
            "Ignoring steps={} guidance_scale={} for {}",
            request.steps, request.guidance_scale, DEFAULT_IMAGE_MODEL
        );

        check_image_size(request.width, request.height)?;
        let task_id = self.submit_image_task(request).await?;
        info!("Image generation task submitted: {}", task_id);

        let image_url = self.wait_for_image_task(&task_id).await?;
        debug!("Downloading image from: {}", image_url);

        let response = self.client.get(&image_url).send().await?;
        if !response.status().is_success() {
            return Err(VideoError::ApiError(format!(
                "Image download failed with HTTP {}",
                response.status()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl SpeechBackend for QwenClient {
    async fn synthesize_speech(&self, text: &str, locale: &str) -> Result<SpeechClip> {
        info!("Generating speech ({}, voice {}) for text: {}", locale, self.voice, text);

        let request_body = speech_request_body(&self.voice, text);

        let response = self
            .client
            .post(QWEN_TTS_API)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(VideoError::ApiError(format!("TTS API error: {}", error_text)));
        }

        let audio = response.bytes().await?.to_vec();
        if audio.is_empty() {
            return Err(VideoError::ApiError("TTS API returned no audio".to_string()));
        }

        Ok(SpeechClip {
            audio,
            duration: None,
        })
    }
}

fn check_image_size(width: u32, height: u32) -> Result<()> {
    if WANX_SIZES.contains(&(width, height)) {
        return Ok(());
    }
    let supported: Vec<String> = WANX_SIZES.iter().map(|(w, h)| format!("{}*{}", w, h)).collect();
    Err(VideoError::ApiError(format!(
        "{} does not support image size {}*{} (supported: {})",
        DEFAULT_IMAGE_MODEL,
        width,
        height,
        supported.join(", ")
    )))
}

fn speech_request_body(voice: &str, text: &str) -> serde_json::Value {
    json!({
        "model": DEFAULT_TTS_MODEL,
        "input": {
            "text": text
        },
        "parameters": {
            "voice": voice,
            "format": "mp3"
        }
    })
}

fn image_request_body(request: &ImageRequest) -> serde_json::Value {
    let mut input = json!({ "prompt": request.prompt });
    if let Some(negative) = &request.negative_prompt {
        input["negative_prompt"] = json!(negative);
    }

    json!({
        "model": DEFAULT_IMAGE_MODEL,
        "input": input,
        "parameters": {
            "size": format!("{}*{}", request.width, request.height),
            "n": 1
        }
    })
}

fn parse_task_state(body: &str) -> Result<TaskState> {
    let task: ImageTaskResponse = serde_json::from_str(body)
        .map_err(|e| VideoError::ApiError(format!("Failed to parse task response: {}", e)))?;
    let output = task.output;

    Ok(match output.task_status.as_str() {
        "SUCCEEDED" => {
            let url = output
                .results
                .unwrap_or_default()
                .into_iter()
                .find_map(|r| r.url)
                .ok_or_else(|| VideoError::ApiError("No image URL in response".to_string()))?;
            TaskState::Done(url)
        }
        "FAILED" | "CANCELED" | "UNKNOWN" => {
            TaskState::Failed(output.message.unwrap_or(output.task_status))
        }
        _ => TaskState::Running(output.task_status),
    })
}
