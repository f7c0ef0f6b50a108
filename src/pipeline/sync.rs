use tracing::warn;

use crate::error::{Result, VideoError};
use crate::scene::{SceneRegistry, Stage};

/// 时长规则：场景时长为旁白时长加 `padding`，音频不会被截断
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DurationSynchronizer {
    padding: f64,
}

impl DurationSynchronizer {
    pub const DEFAULT_PADDING: f64 = 1.0;

    pub fn new(padding: f64) -> Result<Self> {
        if !padding.is_finite() || padding < 0.0 {
            return Err(VideoError::configuration(format!(
                "padding must be a non-negative number of seconds, got {}",
                padding
            )));
        }
        Ok(Self { padding })
    }

    pub fn padding(&self) -> f64 {
        self.padding
    }

    /// 旁白时长为 `measured` 秒时的画面时长
    pub fn resolve(&self, measured: f64) -> f64 {
        measured + self.padding
    }

    /// 语音阶段之后检查所有场景，把会截断音频的时长调高，
    /// 并将所有场景标记为 `Synchronized`。
    /// 返回被调高的场景数。
    pub fn synchronize(&self, registry: &mut SceneRegistry) -> Result<usize> {
        registry.require_stage(Stage::AudioReady)?;

        let mut raised = 0;
        for (descriptor, state) in registry.states_mut() {
            if let Some(measured) = state.measured_audio_duration {
                if state.resolved_duration < measured {
                    warn!(
                        "Scene {} resolved to {:.2}s but narration is {:.2}s; raising",
                        descriptor.index, state.resolved_duration, measured
                    );
                    state.resolved_duration = self.resolve(measured);
                    raised += 1;
                }
            }
            state.advance(Stage::Synchronized);
        }
        Ok(raised)
    }
}

impl Default for DurationSynchronizer {
    fn default() -> Self {
        Self {
            padding: Self::DEFAULT_PADDING,
        }
    }
}
