use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::info;

use super::{CancelFlag, StageReport};
use crate::api::{ImageBackend, ImageRequest};
use crate::cache::{self, ArtifactKind, ArtifactLayout, CacheDecision, CacheKeyMode, Prompter, RegenerationPolicy};
use crate::config::ImageParams;
use crate::error::{Result, VideoError};
use crate::scene::{SceneDescriptor, SceneRegistry, Stage};

/// 一个图片模型实例，同一设备上的调用不会重叠
#[derive(Clone)]
struct Device {
    backend: Arc<dyn ImageBackend>,
    lock: Arc<Mutex<()>>,
}

struct ImageJob {
    index: usize,
    path: PathBuf,
    request: ImageRequest,
    key: Option<String>,
}

/// 为每个场景生成或复用图片
pub struct ImageStage {
    devices: Vec<Device>,
    layout: ArtifactLayout,
    params: ImageParams,
    policy: RegenerationPolicy,
    cache_key: CacheKeyMode,
    prompter: Option<Arc<dyn Prompter>>,
    cancel: CancelFlag,
}

impl ImageStage {
    /// `devices` 每个计算设备一个后端，场景轮流分配
    pub fn new(devices: Vec<Arc<dyn ImageBackend>>, layout: ArtifactLayout, params: ImageParams) -> Result<Self> {
        if devices.is_empty() {
            return Err(VideoError::configuration("at least one image device is required"));
        }
        let devices = devices
            .into_iter()
            .map(|backend| Device {
                backend,
                lock: Arc::new(Mutex::new(())),
            })
            .collect();

        Ok(Self {
            devices,
            layout,
            params,
            policy: RegenerationPolicy::default(),
            cache_key: CacheKeyMode::default(),
            prompter: None,
            cancel: CancelFlag::default(),
        })
    }

    pub fn with_policy(mut self, policy: RegenerationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cache_key(mut self, cache_key: CacheKeyMode) -> Self {
        self.cache_key = cache_key;
        self
    }

    pub fn with_prompter(mut self, prompter: Option<Arc<dyn Prompter>>) -> Self {
        self.prompter = prompter;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    fn request_for(&self, scene: &SceneDescriptor) -> ImageRequest {
        ImageRequest {
            prompt: scene.prompt.clone(),
            negative_prompt: scene
                .negative_prompt
                .clone()
                .or_else(|| self.params.default_negative_prompt.clone()),
            width: self.params.width,
            height: self.params.height,
            steps: self.params.steps,
            guidance_scale: self.params.guidance_scale,
        }
    }

    fn key_for(&self, request: &ImageRequest) -> Option<String> {
        match self.cache_key {
            CacheKeyMode::Index => None,
            CacheKeyMode::ContentHash => Some(cache::content_key(&[
                &request.prompt,
                request.negative_prompt.as_deref().unwrap_or(""),
                &request.width.to_string(),
                &request.height.to_string(),
                &request.steps.to_string(),
                &request.guidance_scale.to_string(),
            ])),
        }
    }

    pub async fn run(&self, registry: &mut SceneRegistry) -> Result<StageReport> {
        let mut report = StageReport::default();
        let mut resolved: Vec<(usize, PathBuf)> = Vec::with_capacity(registry.len());
        let mut jobs = Vec::new();

        for scene in registry.descriptors() {
            self.cancel.check(scene.index)?;
            let path = self.layout.image_path(scene.index);
            let request = self.request_for(scene);
            let key = self.key_for(&request);

            let decision = cache::decide(
                self.policy,
                self.prompter.as_deref(),
                ArtifactKind::Image,
                &path,
                key.as_deref(),
            )
            .await?;
            match decision {
                CacheDecision::Reuse => {
                    info!("Scene {} image already exists, skipping...", scene.index);
                    report.reused.push(scene.index);
                    resolved.push((scene.index, path));
                }
                CacheDecision::Generate => jobs.push(ImageJob {
                    index: scene.index,
                    path,
                    request,
                    key,
                }),
            }
        }

        let total = jobs.len();
        let mut tasks = JoinSet::new();
        for job in jobs {
            let device = self.devices[job.index % self.devices.len()].clone();
            let cancel = self.cancel.clone();
            tasks.spawn(generate(device, cancel, job));
        }

        // 提前返回时丢弃 `tasks`，其余任务随之中止
        while let Some(joined) = tasks.join_next().await {
            let (index, path) = joined.map_err(|e| VideoError::Worker(format!("image task: {e}")))??;
            report.generated.push(index);
            info!("Generated image for scene {} ({}/{})", index, report.generated.len(), total);
            resolved.push((index, path));
        }

        resolved.sort_by_key(|(index, _)| *index);
        for (index, path) in resolved {
            if let Some(state) = registry.state_mut(index) {
                state.image_artifact = Some(path);
                state.advance(Stage::ImageReady);
            }
        }
        report.generated.sort_unstable();
        Ok(report)
    }
}

async fn generate(device: Device, cancel: CancelFlag, job: ImageJob) -> Result<(usize, PathBuf)> {
    let _guard = device.lock.lock().await;
    cancel.check(job.index)?;

    let failed = |cause: String| VideoError::ImageGeneration {
        scene_index: job.index,
        cause,
    };

    let bytes = device
        .backend
        .synthesize_image(&job.request)
        .await
        .map_err(|e| failed(e.to_string()))?;
    if bytes.is_empty() {
        return Err(failed("backend returned no image data".to_string()));
    }

    let path = cache::write_atomic(&job.path, &bytes, job.key.as_deref())
        .await
        .map_err(|e| failed(e.to_string()))?;
    Ok((job.index, path))
}
