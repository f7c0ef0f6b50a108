//! 带旁白的幻灯片视频生成。
//!
//! 每个场景生成一张 AI 图片和一段合成旁白，场景时长跟随测得的旁白时长，
//! 所有场景拼接成一个视频。产物按场景序号缓存在磁盘上，
//! 中断的运行可以从停下的地方继续。

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod scene;
pub mod video;

pub use config::{PipelineConfig, ProjectFile};
pub use error::{Result, VideoError};
pub use pipeline::{Backends, CancelFlag, Pipeline, RunSummary};
pub use scene::{SceneDescriptor, SceneRegistry, SceneState, Stage};
