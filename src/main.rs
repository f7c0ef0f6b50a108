use anyhow::Context;
use clap::Parser;
use scene_reel::api::{ImageBackend, QwenClient};
use scene_reel::cache::{ArtifactKind, CacheKeyMode, OverwritePolicy, Prompter, RegenerationPolicy};
use scene_reel::media::{is_ffmpeg_on_path, FfprobeAudioProbe};
use scene_reel::video::{FfmpegRenderer, RenderOutcome};
use scene_reel::{Backends, Pipeline, PipelineConfig, ProjectFile, VideoError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "scene-reel")]
#[command(about = "Render a narrated slideshow from a scene list", long_about = None)]
struct Args {
    /// Project file (JSON) with the scene list and optional settings
    #[arg(short, long)]
    project: PathBuf,

    /// Working directory holding images/, audio/ and output/
    #[arg(short = 'w', long)]
    work_dir: Option<PathBuf>,

    /// Output video name, without extension
    #[arg(short, long)]
    output_name: Option<String>,

    #[arg(long, value_enum)]
    image_policy: Option<RegenerationPolicy>,

    #[arg(long, value_enum)]
    audio_policy: Option<RegenerationPolicy>,

    #[arg(long, value_enum)]
    overwrite_policy: Option<OverwritePolicy>,

    /// Crossfade between scenes
    #[arg(long)]
    transitions: bool,

    #[arg(long)]
    fps: Option<u32>,

    /// Seconds of silence kept after each narration
    #[arg(long)]
    padding: Option<f64>,

    /// Regenerate artifacts whose prompt or narration changed
    #[arg(long)]
    content_hash: bool,

    /// Burn narration text into the video using this font
    #[arg(long)]
    captions: Option<PathBuf>,

    /// Speech voice id (e.g. a cosyvoice voice)
    #[arg(long)]
    voice: Option<String>,

    /// DashScope API key
    #[arg(long)]
    api_key: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(dir) = &self.work_dir {
            config.work_dir = dir.clone();
        }
        if let Some(name) = &self.output_name {
            config.output_name = name.clone();
        }
        if let Some(policy) = self.image_policy {
            config.image_policy = policy;
        }
        if let Some(policy) = self.audio_policy {
            config.audio_policy = policy;
        }
        if let Some(policy) = self.overwrite_policy {
            config.overwrite_policy = policy;
        }
        if self.transitions {
            config.render.transition_enabled = true;
        }
        if let Some(fps) = self.fps {
            config.render.fps = fps;
        }
        if let Some(padding) = self.padding {
            config.padding = padding;
        }
        if self.content_hash {
            config.cache_key = CacheKeyMode::ContentHash;
        }
        if let Some(voice) = &self.voice {
            config.speech.voice = Some(voice.clone());
        }
        if let Some(font) = &self.captions {
            config.render.captions = true;
            config.render.caption_font = Some(font.clone());
        }
    }
}

fn api_key(args: &Args) -> scene_reel::Result<String> {
    args.api_key
        .clone()
        .or_else(|| std::env::var("DASHSCOPE_API_KEY").ok())
        .ok_or_else(|| {
            VideoError::EnvError(
                "DASHSCOPE_API_KEY not found. Set it via --api-key or the DASHSCOPE_API_KEY environment variable"
                    .to_string(),
            )
        })
}

/// 在终端上回答 `prompt_user` 策略的询问

struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn confirm_regenerate(&self, kind: ArtifactKind, path: &Path) -> scene_reel::Result<bool> {
        dialoguer::Confirm::new()
            .with_prompt(format!(
                "Found existing {} at {}. Generate a new one?",
                kind,
                path.display()
            ))
            .default(false)
            .interact()
            .map_err(|e| VideoError::IoError(std::io::Error::other(e.to_string())))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    // 加载环境变量
    dotenvy::dotenv().ok();

    // 解析命令行参数
    let args = Args::parse();

    // 获取 API key
    let api_key = match api_key(&args) {
        Ok(key) => key,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    // 读取项目文件，命令行参数优先
    let project = ProjectFile::load(&args.project)
        .await
        .with_context(|| format!("Failed to read project file: {}", args.project.display()))?;
    let mut config = project.settings;
    args.apply(&mut config);

    if !is_ffmpeg_on_path() {
        warn!("ffmpeg/ffprobe not found on PATH; audio measurement and rendering will fail");
    }

    let mut client = QwenClient::new(api_key).context("Failed to create HTTP client")?;
    match &config.speech.voice {
        Some(voice) => client = client.with_voice(voice.clone()),
        None if !QwenClient::default_voice_speaks(&config.speech.locale) => warn!(
            "No speech voice configured for locale '{}'; the default voice '{}' may not speak it (set --voice)",
            config.speech.locale,
            client.voice()
        ),
        None => {}
    }
    let backends = Backends {
        image_devices: vec![Arc::new(client.clone()) as Arc<dyn ImageBackend>],
        speech: Arc::new(client),
        probe: Arc::new(FfprobeAudioProbe),
        renderer: Arc::new(FfmpegRenderer),
        prompter: Some(Arc::new(TerminalPrompter) as Arc<dyn Prompter>),
    };

    let pipeline = match Pipeline::new(config, backends) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Ctrl-C 时在下一个场景边界停止
    let cancel = pipeline.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping at the next scene boundary...");
            cancel.cancel();
        }
    });

    info!("Starting scene-reel generation with {} scenes...", project.scenes.len());
    match pipeline.run(project.scenes).await {
        Ok(summary) => {
            let verb = match summary.output {
                RenderOutcome::Written(_) => "Video written to",
                RenderOutcome::Skipped(_) => "Kept existing video at",
            };
            info!("{} {}", verb, summary.output_path().display());
            Ok(())
        }
        Err(e) => {
            match e.scene_index() {
                Some(index) => error!("Video generation failed in {} stage at scene {}: {}", e.stage_name(), index, e),
                None => error!("Video generation failed in {} stage: {}", e.stage_name(), e),
            }
            std::process::exit(1);
        }
    }
}
