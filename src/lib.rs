//! 弹幕播放器核心：FFmpeg 解码管线、音频主时钟同步和弹幕调度

pub mod core;
pub mod danmaku;
pub mod player;

pub use crate::core::{PlayerConfig, PlayerError, Result, SourceDescriptor};
pub use crate::danmaku::{CaptionScheduler, CaptionTrack};
pub use crate::player::{PipelineFactory, PlaybackManager};
