use super::{SceneDescriptor, SceneState, Stage};
use crate::error::{Result, VideoError};

/// 一次运行中按序排列的场景，每个场景附带其可变状态。
///
/// 条目在构造时固定：不会重排、插入或删除，
/// 因此位置 `i` 上始终是 `index == i` 的场景。
#[derive(Debug, Clone)]
pub struct SceneRegistry {
    descriptors: Vec<SceneDescriptor>,
    states: Vec<SceneState>,
}

impl SceneRegistry {
    /// 按 `index` 排序建表，拒绝重复或缺失的序号
    /// 以及非正的时长。
    pub fn new(mut descriptors: Vec<SceneDescriptor>) -> Result<Self> {
        if descriptors.is_empty() {
            return Err(VideoError::configuration("at least one scene is required"));
        }

        descriptors.sort_by_key(|d| d.index);
        for (position, descriptor) in descriptors.iter().enumerate() {
            if descriptor.index != position {
                let reason = if position > 0 && descriptors[position - 1].index == descriptor.index {
                    "duplicate"
                } else {
                    "non-contiguous"
                };
                return Err(VideoError::configuration(format!(
                    "{} scene index {} (indices must be 0..{})",
                    reason,
                    descriptor.index,
                    descriptors.len()
                )));
            }
            if !descriptor.nominal_duration.is_finite() || descriptor.nominal_duration <= 0.0 {
                return Err(VideoError::configuration(format!(
                    "scene {} has non-positive nominal duration {}",
                    descriptor.index, descriptor.nominal_duration
                )));
            }
        }

        let states = descriptors
            .iter()
            .map(|d| SceneState::new(d.nominal_duration))
            .collect();
        Ok(Self { descriptors, states })
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn descriptors(&self) -> &[SceneDescriptor] {
        &self.descriptors
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SceneDescriptor, &SceneState)> {
        self.descriptors.iter().zip(self.states.iter())
    }

    pub fn descriptor(&self, index: usize) -> Option<&SceneDescriptor> {
        self.descriptors.get(index)
    }

    pub fn state(&self, index: usize) -> Option<&SceneState> {
        self.states.get(index)
    }

    pub fn state_mut(&mut self, index: usize) -> Option<&mut SceneState> {
        self.states.get_mut(index)
    }

    pub fn states_mut(&mut self) -> impl Iterator<Item = (&SceneDescriptor, &mut SceneState)> {
        self.descriptors.iter().zip(self.states.iter_mut())
    }

    /// 第一个未到达 `stage` 的场景返回 `NotReady`
    pub fn require_stage(&self, stage: Stage) -> Result<()> {
        for (descriptor, state) in self.iter() {
            if state.stage() < stage {
                return Err(VideoError::NotReady {
                    scene_index: descriptor.index,
                    expected: stage,
                    actual: state.stage(),
                });
            }
        }
        Ok(())
    }
}
