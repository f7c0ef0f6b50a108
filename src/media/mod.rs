mod probe;

pub use probe::{is_ffmpeg_on_path, AudioProbe, FfprobeAudioProbe};
