use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::info;

use super::timeline::Timeline;
use crate::cache::{self, ArtifactKind, OverwritePolicy, Prompter};
use crate::config::RenderSettings;
use crate::error::{Result, VideoError};
use crate::media::is_ffmpeg_on_path;

/// 把时间线编码为 `out_path` 处的视频文件
#[async_trait]
pub trait RenderBackend: Send + Sync {
    async fn render(&self, timeline: &Timeline, settings: &RenderSettings, out_path: &Path) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Written(PathBuf),
    /// 输出已存在且覆盖策略选择保留
    Skipped(PathBuf),
}

/// 执行覆盖策略，并原子地发布编码结果
pub struct Renderer {
    backend: Arc<dyn RenderBackend>,
    policy: OverwritePolicy,
    prompter: Option<Arc<dyn Prompter>>,
}

impl Renderer {
    pub fn new(backend: Arc<dyn RenderBackend>, policy: OverwritePolicy) -> Self {
        Self {
            backend,
            policy,
            prompter: None,
        }
    }

    pub fn with_prompter(mut self, prompter: Option<Arc<dyn Prompter>>) -> Self {
        self.prompter = prompter;
        self
    }

    pub async fn render(
        &self,
        timeline: &Timeline,
        settings: &RenderSettings,
        output_path: &Path,
    ) -> Result<RenderOutcome> {
        if timeline.is_empty() {
            return Err(VideoError::render("timeline has no clips"));
        }

        if cache::file_exists(output_path).await && !self.should_overwrite(output_path)? {
            info!("Video already exists at {}, skipping render", output_path.display());
            return Ok(RenderOutcome::Skipped(output_path.to_path_buf()));
        }

        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // 丢弃 `partial` 即删除临时文件
        let partial = cache::temp_file_for(output_path)?.into_temp_path();
        info!(
            "Rendering {} clips ({:.2}s) to {}",
            timeline.len(),
            timeline.total_duration(),
            output_path.display()
        );

        if let Err(e) = self.backend.render(timeline, settings, &partial).await {
            return Err(match e {
                VideoError::Render(msg) => VideoError::Render(msg),
                other => VideoError::Render(other.to_string()),
            });
        }
        let written = tokio::fs::metadata(&partial)
            .await
            .map(|m| m.len() > 0)
            .unwrap_or(false);
        if !written {
            return Err(VideoError::render("render backend produced no output file"));
        }
        partial.persist(output_path).map_err(|e| {
            VideoError::render(format!(
                "failed to move video into {}: {}",
                output_path.display(),
                e.error
            ))
        })?;

        info!("Video generation completed: {}", output_path.display());
        Ok(RenderOutcome::Written(output_path.to_path_buf()))
    }

    fn should_overwrite(&self, output_path: &Path) -> Result<bool> {
        match self.policy {
            OverwritePolicy::SkipIfExists => Ok(false),
            OverwritePolicy::AlwaysOverwrite => Ok(true),
            OverwritePolicy::PromptUser => {
                let prompter = self.prompter.as_deref().ok_or_else(|| {
                    VideoError::configuration("prompt_user policy requires an interactive prompter")
                })?;
                prompter.confirm_regenerate(ArtifactKind::Video, output_path)
            }
        }
    }
}

/// 调用一次系统 `ffmpeg` 完成渲染
#[derive(Debug, Clone, Default)]
pub struct FfmpegRenderer;

#[async_trait]
impl RenderBackend for FfmpegRenderer {
    async fn render(&self, timeline: &Timeline, settings: &RenderSettings, out_path: &Path) -> Result<()> {
        if !is_ffmpeg_on_path() {
            return Err(VideoError::render(
                "ffmpeg is required for MP4 encoding, but was not found on PATH",
            ));
        }

        let output = Command::new("ffmpeg")
            .args(ffmpeg_args(timeline, settings, out_path))
            .output()
            .await
            .map_err(|e| VideoError::render(format!("Failed to run FFmpeg: {}", e)))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(VideoError::render(format!(
                "FFmpeg exited with status {}: {}",
                output.status,
                error.trim()
            )));
        }
        Ok(())
    }
}

/// 完整的 ffmpeg 参数：先是所有图片输入，再是所有音频输入
fn ffmpeg_args(timeline: &Timeline, settings: &RenderSettings, out_path: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into(), "-loglevel".into(), "error".into()];

    for clip in &timeline.clips {
        args.extend([
            "-loop".into(),
            "1".into(),
            "-framerate".into(),
            settings.fps.to_string(),
            "-t".into(),
            format!("{:.3}", clip.duration),
            "-i".into(),
            clip.image.display().to_string(),
        ]);
    }
    for clip in &timeline.clips {
        args.extend(["-i".into(), clip.audio.display().to_string()]);
    }

    args.extend([
        "-filter_complex".into(),
        filter_graph(timeline, settings),
        "-map".into(),
        "[vout]".into(),
        "-map".into(),
        "[aout]".into(),
        "-c:v".into(),
        "libx264".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-r".into(),
        settings.fps.to_string(),
        "-c:a".into(),
        settings.audio_codec.clone(),
        "-t".into(),
        format!("{:.3}", timeline.total_duration()),
        "-movflags".into(),
        "+faststart".into(),
        out_path.display().to_string(),
    ]);
    args
}

fn filter_graph(timeline: &Timeline, settings: &RenderSettings) -> String {
    let n = timeline.len();
    let (w, h) = (settings.width, settings.height);
    let mut chains = Vec::with_capacity(2 * n + 2);

    for (i, clip) in timeline.clips.iter().enumerate() {
        let mut chain = format!(
            "[{i}:v]scale={w}:{h}:force_original_aspect_ratio=decrease,\
             pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps},format=yuv420p",
            fps = settings.fps
        );
        if settings.captions {
            if let Some(font) = &settings.caption_font {
                chain.push_str(&format!(
                    ",drawtext=text='{}':fontfile='{}':fontsize=48:fontcolor=white:\
                     x=(w-text_w)/2:y=h-100:box=1:boxcolor=black@0.5:boxborderw=10",
                    escape_drawtext(&clip.narration),
                    escape_drawtext(&font.display().to_string())
                ));
            }
        }
        chains.push(format!("{chain}[v{i}]"));
    }

    match timeline.transition {
        _ if n == 1 => chains.push("[v0]null[vout]".to_string()),
        Some(t) => {
            let mut prev = "v0".to_string();
            for (k, clip) in timeline.clips.iter().enumerate().skip(1) {
                let label = if k == n - 1 { "vout".to_string() } else { format!("x{k}") };
                chains.push(format!(
                    "[{prev}][v{k}]xfade=transition=fade:duration={t:.3}:offset={:.3}[{label}]",
                    clip.start
                ));
                prev = label;
            }
        }
        None => {
            let inputs: String = (0..n).map(|i| format!("[v{i}]")).collect();
            chains.push(format!("{inputs}concat=n={n}:v=1:a=0[vout]"));
        }
    }

    // 旁白放在各片段起点后混音，不做交叉淡化
    for (i, clip) in timeline.clips.iter().enumerate() {
        let delay_ms = (clip.start * 1000.0).round() as u64;
        chains.push(format!(
            "[{input}:a]aresample=48000,adelay={delay_ms}:all=1[a{i}]",
            input = n + i
        ));
    }
    if n == 1 {
        chains.push("[a0]anull[aout]".to_string());
    } else {
        let inputs: String = (0..n).map(|i| format!("[a{i}]")).collect();
        chains.push(format!("{inputs}amix=inputs={n}:duration=longest:normalize=0[aout]"));
    }

    chains.join(";")
}

fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('\'', "'\\''")
        .replace(':', "\\:")
        .replace(',', "\\,")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::FakeRenderBackend;
    use crate::video::Clip;
    use std::sync::atomic::Ordering;

    struct Answer(bool);

    impl Prompter for Answer {
        fn confirm_regenerate(&self, _kind: ArtifactKind, _path: &Path) -> Result<bool> {
            Ok(self.0)
        }
    }

    fn timeline(durations: &[f64], transition: Option<f64>) -> Timeline {
        let mut clips: Vec<Clip> = Vec::new();
        for (i, duration) in durations.iter().enumerate() {
            let transition_in = if i == 0 { None } else { transition };
            let start = clips
                .last()
                .map(|c| c.end() - transition_in.unwrap_or(0.0))
                .unwrap_or(0.0);
            clips.push(Clip {
                scene_index: i,
                image: PathBuf::from(format!("images/scene_{i}.png")),
                audio: PathBuf::from(format!("audio/speech_{i}.mp3")),
                narration: format!("text {i}"),
                start,
                duration: *duration,
                transition_in,
            });
        }
        Timeline { clips, transition }
    }

    #[tokio::test]
    async fn existing_output_is_kept_under_skip_policy() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("final_video.mp4");
        std::fs::write(&out, b"previous").unwrap();

        let backend = Arc::new(FakeRenderBackend::default());
        let renderer = Renderer::new(backend.clone(), OverwritePolicy::SkipIfExists);
        let outcome = renderer
            .render(&timeline(&[2.0], None), &RenderSettings::default(), &out)
            .await
            .unwrap();

        assert_eq!(outcome, RenderOutcome::Skipped(out.clone()));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert_eq!(std::fs::read(&out).unwrap(), b"previous");
    }

    #[tokio::test]
    async fn overwrite_policy_replaces_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("final_video.mp4");
        std::fs::write(&out, b"previous").unwrap();

        let backend = Arc::new(FakeRenderBackend::default());
        let renderer = Renderer::new(backend.clone(), OverwritePolicy::AlwaysOverwrite);
        let outcome = renderer
            .render(&timeline(&[2.0], None), &RenderSettings::default(), &out)
            .await
            .unwrap();

        assert_eq!(outcome, RenderOutcome::Written(out.clone()));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_ne!(std::fs::read(&out).unwrap(), b"previous");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn prompt_policy_asks_before_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("final_video.mp4");
        std::fs::write(&out, b"previous").unwrap();
        let backend = Arc::new(FakeRenderBackend::default());

        let declined = Renderer::new(backend.clone(), OverwritePolicy::PromptUser)
            .with_prompter(Some(Arc::new(Answer(false)) as Arc<dyn Prompter>));
        let outcome = declined
            .render(&timeline(&[2.0], None), &RenderSettings::default(), &out)
            .await
            .unwrap();
        assert!(matches!(outcome, RenderOutcome::Skipped(_)));

        let accepted = Renderer::new(backend.clone(), OverwritePolicy::PromptUser)
            .with_prompter(Some(Arc::new(Answer(true)) as Arc<dyn Prompter>));
        let outcome = accepted
            .render(&timeline(&[2.0], None), &RenderSettings::default(), &out)
            .await
            .unwrap();
        assert!(matches!(outcome, RenderOutcome::Written(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_render_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("output").join("final_video.mp4");
        let backend = Arc::new(FakeRenderBackend {
            fail: true,
            ..FakeRenderBackend::default()
        });

        let err = Renderer::new(backend, OverwritePolicy::SkipIfExists)
            .render(&timeline(&[2.0, 3.0], None), &RenderSettings::default(), &out)
            .await
            .unwrap_err();

        assert!(matches!(err, VideoError::Render(ref m) if m == "encoder crashed"));
        assert!(!out.exists());
        assert_eq!(std::fs::read_dir(dir.path().join("output")).unwrap().count(), 0);
    }

    struct SilentBackend;

    #[async_trait]
    impl RenderBackend for SilentBackend {
        async fn render(&self, _timeline: &Timeline, _settings: &RenderSettings, _out_path: &Path) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn empty_render_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("final_video.mp4");

        let err = Renderer::new(Arc::new(SilentBackend), OverwritePolicy::SkipIfExists)
            .render(&timeline(&[2.0], None), &RenderSettings::default(), &out)
            .await
            .unwrap_err();

        assert!(matches!(err, VideoError::Render(_)));
        assert!(!out.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn concat_graph_without_transitions() {
        let graph = filter_graph(&timeline(&[4.2, 7.1, 3.0], None), &RenderSettings::default());
        assert!(graph.contains("[v0][v1][v2]concat=n=3:v=1:a=0[vout]"));
        assert!(graph.contains("[3:a]aresample=48000,adelay=0:all=1[a0]"));
        assert!(graph.contains("[4:a]aresample=48000,adelay=4200:all=1[a1]"));
        assert!(graph.contains("[a0][a1][a2]amix=inputs=3:duration=longest:normalize=0[aout]"));
        assert!(!graph.contains("xfade"));
        assert!(!graph.contains("drawtext"));
    }

    #[test]
    fn xfade_chain_uses_clip_starts_as_offsets() {
        let graph = filter_graph(&timeline(&[4.2, 7.1, 3.0], Some(1.0)), &RenderSettings::default());
        assert!(graph.contains("[v0][v1]xfade=transition=fade:duration=1.000:offset=3.200[x1]"));
        assert!(graph.contains("[x1][v2]xfade=transition=fade:duration=1.000:offset=9.300[vout]"));
        assert!(graph.contains("adelay=3200:all=1[a1]"));
        assert!(graph.contains("adelay=9300:all=1[a2]"));
    }

    #[test]
    fn single_clip_graph_passes_streams_through() {
        let graph = filter_graph(&timeline(&[3.0], Some(1.0)), &RenderSettings::default());
        assert!(graph.contains("[v0]null[vout]"));
        assert!(graph.contains("[a0]anull[aout]"));
    }

    #[test]
    fn args_hold_durations_fps_and_codec() {
        let settings = RenderSettings {
            fps: 30,
            audio_codec: "libmp3lame".to_string(),
            ..RenderSettings::default()
        };
        let args = ffmpeg_args(&timeline(&[4.2, 7.1, 3.0], None), &settings, Path::new("out.mp4"));

        let inputs: Vec<&String> = args
            .iter()
            .zip(args.iter().skip(1))
            .filter(|(flag, _)| *flag == "-i")
            .map(|(_, value)| value)
            .collect();
        assert_eq!(inputs.len(), 6);
        assert_eq!(inputs[0], "images/scene_0.png");
        assert_eq!(inputs[3], "audio/speech_0.mp3");

        let joined = args.join(" ");
        assert!(joined.contains("-loop 1 -framerate 30 -t 7.100 -i images/scene_1.png"));
        assert!(joined.contains("-c:a libmp3lame"));
        assert!(joined.contains("-t 14.300"));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn captions_are_escaped() {
        assert_eq!(escape_drawtext("a:b,c"), "a\\:b\\,c");
        assert_eq!(escape_drawtext("it's"), "it'\\''s");

        let settings = RenderSettings {
            captions: true,
            caption_font: Some(PathBuf::from("/fonts/Sarabun.ttf")),
            ..RenderSettings::default()
        };
        let graph = filter_graph(&timeline(&[2.0], None), &settings);
        assert!(graph.contains("drawtext=text='text 0'"));
    }
}
