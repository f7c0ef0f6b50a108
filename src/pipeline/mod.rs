mod image_stage;
mod speech_stage;
mod sync;
#[cfg(test)]
pub(crate) mod testing;

pub use image_stage::ImageStage;
pub use speech_stage::SpeechStage;
pub use sync::DurationSynchronizer;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::api::{ImageBackend, SpeechBackend};
use crate::cache::{ArtifactLayout, Prompter};
use crate::config::PipelineConfig;
use crate::error::{Result, VideoError};
use crate::media::AudioProbe;
use crate::scene::{SceneDescriptor, SceneRegistry};
use crate::video::{RenderBackend, RenderOutcome, Renderer, Timeline};

/// 共享的停止请求，在场景边界处生效
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self, scene_index: usize) -> Result<()> {
        if self.is_cancelled() {
            Err(VideoError::Cancelled { scene_index })
        } else {
            Ok(())
        }
    }
}

/// 某阶段生成、复用或降级的场景
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    pub generated: Vec<usize>,
    pub reused: Vec<usize>,
    /// 缓存音频无法测量的场景
    pub degraded: Vec<usize>,
}

/// 流水线调用的外部能力
pub struct Backends {
    /// 每个图片计算设备一项
    pub image_devices: Vec<Arc<dyn ImageBackend>>,
    pub speech: Arc<dyn SpeechBackend>,
    pub probe: Arc<dyn AudioProbe>,
    pub renderer: Arc<dyn RenderBackend>,
    /// 仅 `prompt_user` 策略需要
    pub prompter: Option<Arc<dyn Prompter>>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub output: RenderOutcome,
    pub timeline: Timeline,
    pub images: StageReport,
    pub speech: StageReport,
}

impl RunSummary {
    pub fn output_path(&self) -> &Path {
        match &self.output {
            RenderOutcome::Written(path) | RenderOutcome::Skipped(path) => path,
        }
    }
}

/// 运行控制器：图片、语音、时长同步、时间线组装、渲染
pub struct Pipeline {
    config: PipelineConfig,
    layout: ArtifactLayout,
    images: ImageStage,
    speech: SpeechStage,
    synchronizer: DurationSynchronizer,
    renderer: Renderer,
    cancel: CancelFlag,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, backends: Backends) -> Result<Self> {
        config.validate()?;
        let layout = ArtifactLayout::new(&config.work_dir);
        let synchronizer = DurationSynchronizer::new(config.padding)?;
        let cancel = CancelFlag::default();

        let images = ImageStage::new(backends.image_devices, layout.clone(), config.image.clone())?
            .with_policy(config.image_policy)
            .with_cache_key(config.cache_key)
            .with_prompter(backends.prompter.clone())
            .with_cancel(cancel.clone());
        let speech = SpeechStage::new(
            backends.speech,
            backends.probe,
            layout.clone(),
            config.speech.clone(),
            synchronizer,
        )?
        .with_policy(config.audio_policy)
        .with_cache_key(config.cache_key)
        .with_prompter(backends.prompter.clone())
        .with_cancel(cancel.clone());
        let renderer = Renderer::new(backends.renderer, config.overwrite_policy)
            .with_prompter(backends.prompter);

        Ok(Self {
            config,
            layout,
            images,
            speech,
            synchronizer,
            renderer,
            cancel,
        })
    }

    /// 在下一个场景边界停止运行的句柄
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    pub async fn run(&self, scenes: Vec<SceneDescriptor>) -> Result<RunSummary> {
        let mut registry = SceneRegistry::new(scenes)?;
        self.layout.ensure_dirs().await?;
        info!("Starting run with {} scenes in {}", registry.len(), self.config.work_dir.display());

        info!("Step 1/5: Generating images for each scene...");
        let images = self.images.run(&mut registry).await?;
        info!(
            "Images: {} generated, {} reused",
            images.generated.len(),
            images.reused.len()
        );

        info!("Step 2/5: Generating speech...");
        let speech = self.speech.run(&mut registry).await?;
        info!(
            "Speech: {} generated, {} reused, {} on nominal duration",
            speech.generated.len(),
            speech.reused.len(),
            speech.degraded.len()
        );

        info!(
            "Step 3/5: Synchronizing durations (padding {:.2}s)...",
            self.synchronizer.padding()
        );
        self.synchronizer.synchronize(&mut registry)?;

        info!("Step 4/5: Assembling timeline...");
        let timeline = Timeline::assemble(&mut registry, self.config.render.transition())?;
        info!(
            "Timeline: {} clips, {:.2}s",
            timeline.len(),
            timeline.total_duration()
        );

        if self.cancel.is_cancelled() {
            return Err(VideoError::CancelledBeforeRender);
        }

        info!("Step 5/5: Rendering final video...");
        let output_path = self.layout.output_path(&self.config.output_name);
        let output = self
            .renderer
            .render(&timeline, &self.config.render, &output_path)
            .await?;

        Ok(RunSummary {
            output,
            timeline,
            images,
            speech,
        })
    }
}
