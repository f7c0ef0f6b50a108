mod generator;
mod timeline;

pub use generator::{FfmpegRenderer, RenderBackend, RenderOutcome, Renderer};
pub use timeline::{Clip, Timeline};
