use std::path::PathBuf;

use thiserror::Error;

use crate::scene::Stage;

#[derive(Error, Debug)]
pub enum VideoError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Image generation failed for scene {scene_index}: {cause}")]
    ImageGeneration { scene_index: usize, cause: String },

    #[error("Speech generation failed for scene {scene_index}: {cause}")]
    SpeechGeneration { scene_index: usize, cause: String },

    #[error("Failed to measure duration of '{}': {cause}", path.display())]
    DurationMeasurement { path: PathBuf, cause: String },

    #[error("Render error: {0}")]
    Render(String),

    #[error("Scene {scene_index} is {actual:?}, expected at least {expected:?}")]
    NotReady {
        scene_index: usize,
        expected: Stage,
        actual: Stage,
    },

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("Run cancelled before scene {scene_index}")]
    Cancelled { scene_index: usize },

    #[error("Run cancelled before rendering")]
    CancelledBeforeRender,

    #[error("API error: {0}")]
    ApiError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Environment variable error: {0}")]
    EnvError(String),
}

impl VideoError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    /// 出错的场景（仅限场景内错误）
    pub fn scene_index(&self) -> Option<usize> {
        match self {
            Self::ImageGeneration { scene_index, .. }
            | Self::SpeechGeneration { scene_index, .. }
            | Self::NotReady { scene_index, .. }
            | Self::Cancelled { scene_index } => Some(*scene_index),
            _ => None,
        }
    }

    /// 出错的流水线阶段，用于运行报告
    pub fn stage_name(&self) -> &'static str {
        match self {
            Self::Configuration(_) | Self::EnvError(_) => "configuration",
            Self::ImageGeneration { .. } => "image",
            Self::SpeechGeneration { .. } | Self::DurationMeasurement { .. } => "speech",
            Self::NotReady { .. } => "assembly",
            Self::Render(_) => "render",
            Self::Cancelled { .. } | Self::CancelledBeforeRender => "cancelled",
            Self::Worker(_) => "worker",
            Self::ApiError(_) | Self::HttpError(_) | Self::JsonError(_) | Self::IoError(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, VideoError>;
