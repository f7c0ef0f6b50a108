use std::path::PathBuf;

use crate::error::{Result, VideoError};
use crate::scene::{SceneRegistry, Stage};

/// 一张静态图片持续 `duration` 秒，旁白从片段内 0 秒开始
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub scene_index: usize,
    pub image: PathBuf,
    pub audio: PathBuf,
    pub narration: String,
    /// 在时间线上的起点（已扣除前面片段的重叠）
    pub start: f64,
    pub duration: f64,
    /// 与上一片段的交叉淡化
    pub transition_in: Option<f64>,
}

impl Clip {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// 交给渲染后端的有序片段
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    pub clips: Vec<Clip>,
    pub transition: Option<f64>,
}

impl Timeline {
    /// 由全部已同步的场景构建片段序列，并标记为 `Assembled`。
    ///
    /// 交叉淡化为 `T` 秒时，第一个之后的每个片段提前 `T` 秒开始并与上一片段重叠；
    /// 旁白不做偏移，重叠处两段音频会同时播放。
    pub fn assemble(registry: &mut SceneRegistry, transition: Option<f64>) -> Result<Self> {
        registry.require_stage(Stage::Synchronized)?;
        if let Some(t) = transition {
            if !t.is_finite() || t <= 0.0 {
                return Err(VideoError::configuration(format!(
                    "transition duration must be positive, got {}",
                    t
                )));
            }
        }

        let mut clips: Vec<Clip> = Vec::with_capacity(registry.len());
        for (descriptor, state) in registry.iter() {
            let missing = |what: &str| {
                VideoError::configuration(format!("scene {} has no {} artifact", descriptor.index, what))
            };
            let image = state.image_artifact.clone().ok_or_else(|| missing("image"))?;
            let audio = state.audio_artifact.clone().ok_or_else(|| missing("audio"))?;

            let transition_in = if clips.is_empty() { None } else { transition };
            if let Some(t) = transition {
                if registry.len() > 1 && state.resolved_duration <= t {
                    return Err(VideoError::configuration(format!(
                        "scene {} lasts {:.2}s, not longer than the {:.2}s crossfade",
                        descriptor.index, state.resolved_duration, t
                    )));
                }
            }
            let start = match clips.last() {
                Some(prev) => prev.end() - transition_in.unwrap_or(0.0),
                None => 0.0,
            };

            clips.push(Clip {
                scene_index: descriptor.index,
                image,
                audio,
                narration: descriptor.narration_text.clone(),
                start,
                duration: state.resolved_duration,
                transition_in,
            });
        }

        for (_, state) in registry.states_mut() {
            state.advance(Stage::Assembled);
        }
        Ok(Self { clips, transition })
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    /// 片段时长之和减去每个边界的一次淡化
    pub fn total_duration(&self) -> f64 {
        self.clips.last().map(Clip::end).unwrap_or(0.0)
    }
}
