use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::sync::DurationSynchronizer;
use super::{CancelFlag, StageReport};
use crate::api::SpeechBackend;
use crate::cache::{self, ArtifactKind, ArtifactLayout, CacheDecision, CacheKeyMode, Prompter, RegenerationPolicy};
use crate::config::SpeechParams;
use crate::error::{Result, VideoError};
use crate::media::AudioProbe;
use crate::scene::{SceneRegistry, Stage};

enum SpeechJob {
    /// 已缓存：只需测量时长
    Measure { index: usize, path: PathBuf },
    Synthesize {
        index: usize,
        path: PathBuf,
        text: String,
        key: Option<String>,
    },
}

struct SpeechOutcome {
    index: usize,
    path: PathBuf,
    measured: Option<f64>,
    generated: bool,
}

/// 一次运行中所有工作任务共享
struct Workers {
    backend: Arc<dyn SpeechBackend>,
    probe: Arc<dyn AudioProbe>,
    locale: String,
    cancel: CancelFlag,
}

/// 为每个场景生成或复用旁白音频并测量时长
pub struct SpeechStage {
    backend: Arc<dyn SpeechBackend>,
    probe: Arc<dyn AudioProbe>,
    layout: ArtifactLayout,
    params: SpeechParams,
    synchronizer: DurationSynchronizer,
    policy: RegenerationPolicy,
    cache_key: CacheKeyMode,
    prompter: Option<Arc<dyn Prompter>>,
    cancel: CancelFlag,
}

impl SpeechStage {
    pub fn new(
        backend: Arc<dyn SpeechBackend>,
        probe: Arc<dyn AudioProbe>,
        layout: ArtifactLayout,
        params: SpeechParams,
        synchronizer: DurationSynchronizer,
    ) -> Result<Self> {
        if params.concurrency == 0 {
            return Err(VideoError::configuration("speech concurrency must be non-zero"));
        }
        Ok(Self {
            backend,
            probe,
            layout,
            params,
            synchronizer,
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

    fn key_for(&self, text: &str) -> Option<String> {
        match self.cache_key {
            CacheKeyMode::Index => None,
            CacheKeyMode::ContentHash => Some(cache::content_key(&[text, &self.params.locale])),
        }
    }

    pub async fn run(&self, registry: &mut SceneRegistry) -> Result<StageReport> {
        let mut jobs = Vec::with_capacity(registry.len());
        for scene in registry.descriptors() {
            self.cancel.check(scene.index)?;
            let path = self.layout.audio_path(scene.index);
            let key = self.key_for(&scene.narration_text);

            let decision = cache::decide(
                self.policy,
                self.prompter.as_deref(),
                ArtifactKind::Audio,
                &path,
                key.as_deref(),
            )
            .await?;
            jobs.push(match decision {
                CacheDecision::Reuse => {
                    info!("Scene {} audio already exists at {}", scene.index, path.display());
                    SpeechJob::Measure {
                        index: scene.index,
                        path,
                    }
                }
                CacheDecision::Generate => SpeechJob::Synthesize {
                    index: scene.index,
                    path,
                    text: scene.narration_text.clone(),
                    key,
                },
            });
        }

        let workers = Arc::new(Workers {
            backend: self.backend.clone(),
            probe: self.probe.clone(),
            locale: self.params.locale.clone(),
            cancel: self.cancel.clone(),
        });
        let semaphore = Arc::new(Semaphore::new(self.params.concurrency));
        let mut tasks = JoinSet::new();
        for job in jobs {
            let workers = workers.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| VideoError::Worker(format!("speech pool closed: {e}")))?;
                workers.resolve(job).await
            });
        }

        let mut outcomes = Vec::with_capacity(registry.len());
        while let Some(joined) = tasks.join_next().await {
            outcomes.push(joined.map_err(|e| VideoError::Worker(format!("speech task: {e}")))??);
        }
        outcomes.sort_by_key(|o| o.index);

        let mut report = StageReport::default();
        for outcome in outcomes {
            let Some(descriptor) = registry.descriptor(outcome.index) else {
                continue;
            };
            let nominal = descriptor.nominal_duration;
            let Some(state) = registry.state_mut(outcome.index) else {
                continue;
            };

            state.audio_artifact = Some(outcome.path);
            state.measured_audio_duration = outcome.measured;
            state.resolved_duration = match outcome.measured {
                Some(measured) => self.synchronizer.resolve(measured),
                None => nominal,
            };
            state.advance(Stage::AudioReady);

            if outcome.generated {
                report.generated.push(outcome.index);
            } else {
                report.reused.push(outcome.index);
            }
            if outcome.measured.is_none() {
                report.degraded.push(outcome.index);
            }
            info!(
                "Scene {} lasts {:.2}s{}",
                outcome.index,
                state.resolved_duration,
                if outcome.measured.is_none() { " (nominal)" } else { "" }
            );
        }
        Ok(report)
    }
}

impl Workers {
    async fn resolve(&self, job: SpeechJob) -> Result<SpeechOutcome> {
        match job {
            SpeechJob::Measure { index, path } => {
                self.cancel.check(index)?;
                let measured = match self.probe.duration(&path).await {
                    Ok(seconds) => Some(seconds),
                    Err(e) => {
                        warn!("{}; scene {} keeps its nominal duration", e, index);
                        None
                    }
                };
                Ok(SpeechOutcome {
                    index,
                    path,
                    measured,
                    generated: false,
                })
            }
            SpeechJob::Synthesize {
                index,
                path,
                text,
                key,
            } => {
                self.cancel.check(index)?;
                let failed = |cause: String| VideoError::SpeechGeneration {
                    scene_index: index,
                    cause,
                };

                let clip = self
                    .backend
                    .synthesize_speech(&text, &self.locale)
                    .await
                    .map_err(|e| failed(e.to_string()))?;
                if clip.audio.is_empty() {
                    return Err(failed("backend returned no audio data".to_string()));
                }

                // 正式路径上只会出现已测量的完整文件
                let staged = cache::stage_artifact(&path, &clip.audio)
                    .await
                    .map_err(|e| failed(e.to_string()))?;
                let measured = self
                    .probe
                    .duration(staged.path())
                    .await
                    .map_err(|e| failed(e.to_string()))?;
                if let Some(reported) = clip.duration {
                    if (reported - measured).abs() > 0.05 {
                        debug!(
                            "Scene {} engine reported {:.2}s, measured {:.2}s",
                            index, reported, measured
                        );
                    }
                }
                let path = cache::commit_artifact(staged, &path, key.as_deref())
                    .await
                    .map_err(|e| failed(e.to_string()))?;

                info!("Generated speech for scene {}: {:.2}s", index, measured);
                Ok(SpeechOutcome {
                    index,
                    path,
                    measured: Some(measured),
                    generated: true,
                })
            }
        }
    }
}
