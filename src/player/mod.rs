// 播放器核心模块

pub mod audio_output;
pub mod decoder;
pub mod demuxer;
pub mod demuxer_factory; // 异步创建管线
pub mod demuxer_source; // 解码会话抽象接口
pub mod frame_queue;
pub mod manager;
pub mod pipeline;
pub mod sink;

#[cfg(test)]
pub(crate) mod test_support;

pub use audio_output::{AudioFeed, AudioOutput};
pub use decoder::{AudioDecoder, VideoDecoder};
pub use demuxer::{Demuxer, SessionOptions};
pub use demuxer_factory::{PipelineCreationResult, PipelineFactory};
pub use demuxer_source::DecodeSession;
pub use frame_queue::FrameQueue;
pub use manager::PlaybackManager;
pub use pipeline::{DecoderPipeline, LowOverheadGate};
pub use sink::{AudioSink, TextureSink};
