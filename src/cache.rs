//! 磁盘上的产物缓存：产物放在哪里、何时复用已有文件、
//! 以及如何写入新文件而不暴露半成品。

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Result, VideoError};

pub const IMAGE_EXTENSION: &str = "png";
pub const AUDIO_EXTENSION: &str = "mp3";
pub const VIDEO_EXTENSION: &str = "mp4";

/// 工作目录下的确定性产物路径
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.root.join("audio")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    pub fn image_path(&self, index: usize) -> PathBuf {
        self.images_dir()
            .join(format!("scene_{}.{}", index, IMAGE_EXTENSION))
    }

    pub fn audio_path(&self, index: usize) -> PathBuf {
        self.audio_dir()
            .join(format!("speech_{}.{}", index, AUDIO_EXTENSION))
    }

    pub fn output_path(&self, name: &str) -> PathBuf {
        self.output_dir().join(format!("{}.{}", name, VIDEO_EXTENSION))
    }

    /// 创建产物目录，已存在的保持不变
    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.images_dir(), self.audio_dir(), self.output_dir()] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }
}

/// 已缓存的图片或音频如何处理
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RegenerationPolicy {
    #[default]
    SkipIfExists,
    AlwaysRegenerate,
    PromptUser,
}

/// 输出视频已存在时如何处理
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OverwritePolicy {
    #[default]
    SkipIfExists,
    AlwaysOverwrite,
    PromptUser,
}

/// 缓存产物与场景的匹配方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CacheKeyMode {
    /// 仅按路径：修改提示词后仍复用旧产物
    #[default]
    Index,
    /// 路径加生成输入的哈希，哈希存放在产物旁边
    ContentHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Image,
    Audio,
    Video,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => f.write_str("image"),
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// `PromptUser` 策略询问的交互方
pub trait Prompter: Send + Sync {
    /// 返回 true 重新生成 `path`，false 保留
    fn confirm_regenerate(&self, kind: ArtifactKind, path: &Path) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    Reuse,
    Generate,
}

/// 判断 `path` 处的产物是否需要生成。
///
/// 设置了 `key` 时，存储的键不一致的产物视为不存在。
pub async fn decide(
    policy: RegenerationPolicy,
    prompter: Option<&dyn Prompter>,
    kind: ArtifactKind,
    path: &Path,
    key: Option<&str>,
) -> Result<CacheDecision> {
    if !artifact_present(path, key).await {
        return Ok(CacheDecision::Generate);
    }

    match policy {
        RegenerationPolicy::SkipIfExists => Ok(CacheDecision::Reuse),
        RegenerationPolicy::AlwaysRegenerate => Ok(CacheDecision::Generate),
        RegenerationPolicy::PromptUser => {
            let prompter = prompter.ok_or_else(|| {
                VideoError::configuration("prompt_user policy requires an interactive prompter")
            })?;
            if prompter.confirm_regenerate(kind, path)? {
                Ok(CacheDecision::Generate)
            } else {
                Ok(CacheDecision::Reuse)
            }
        }
    }
}

pub async fn file_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn artifact_present(path: &Path, key: Option<&str>) -> bool {
    if !file_exists(path).await {
        return false;
    }
    let Some(key) = key else {
        return true;
    };
    match tokio::fs::read_to_string(key_path(path)).await {
        Ok(stored) if stored.trim() == key => true,
        Ok(_) => {
            debug!("Cache key changed for {}", path.display());
            false
        }
        Err(_) => false,
    }
}

/// 产物生成输入的 SHA-256
pub fn content_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

fn key_path(artifact: &Path) -> PathBuf {
    let mut name = artifact.as_os_str().to_owned();
    name.push(".key");
    PathBuf::from(name)
}

/// 把 `key` 写在 `artifact` 旁边；`key` 为 `None` 时删除旧键
pub async fn store_key(artifact: &Path, key: Option<&str>) -> Result<()> {
    let sidecar = key_path(artifact);
    match key {
        Some(key) => tokio::fs::write(&sidecar, key).await?,
        None => {
            if file_exists(&sidecar).await {
                tokio::fs::remove_file(&sidecar).await?;
            }
        }
    }
    Ok(())
}

/// 与目标同目录、同扩展名的临时文件，最终的 rename 不会跨文件系统。
/// 句柄被丢弃时临时文件随之删除。
pub fn temp_file_for(target: &Path) -> Result<NamedTempFile> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    let suffix = target
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    let file = tempfile::Builder::new()
        .prefix(&format!("temp_{}_", stem))
        .suffix(&suffix)
        .tempfile_in(dir)?;
    Ok(file)
}

/// 把字节写入 `target` 旁边的临时文件，此时目标路径还看不到它。
pub async fn stage_artifact(target: &Path, bytes: &[u8]) -> Result<NamedTempFile> {
    let staged = temp_file_for(target)?;
    tokio::fs::write(staged.path(), bytes).await?;
    Ok(staged)
}

/// 将暂存文件移到 `target`，并更新内容键。
///
/// 先删除旧的 `.key`，再 rename，最后写入新键：中途失败时产物只会缺少键，
/// 不会出现新内容配旧键。
pub async fn commit_artifact(staged: NamedTempFile, target: &Path, key: Option<&str>) -> Result<PathBuf> {
    store_key(target, None).await?;
    staged.persist(target).map_err(|e| VideoError::IoError(e.error))?;
    store_key(target, key).await?;
    Ok(target.to_path_buf())
}

/// 经由临时文件写入 `target`。
pub async fn write_atomic(target: &Path, bytes: &[u8], key: Option<&str>) -> Result<PathBuf> {
    let staged = stage_artifact(target, bytes).await?;
    commit_artifact(staged, target, key).await
}
