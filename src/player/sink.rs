//! 渲染端接口
//!
//! 视频帧交给纹理（所有权随调用转移），音频样本交给音频源。

use crate::core::VideoFrame;

/// 视频纹理接收端
pub trait TextureSink: Send + Sync {
    /// 上传一帧，帧的所有权交给接收端
    fn upload(&self, frame: VideoFrame);

    /// 媒体尺寸已知或变化时调用
    fn set_size(&self, width: u32, height: u32);
}

/// 音频接收端
pub trait AudioSink: Send + Sync {
    /// 写入交错 f32 样本
    fn upload(&self, samples: &[f32], sample_rate: u32, channels: u16);

    /// 音量 (0.0 - 1.0)
    fn set_volume(&self, volume: f32);

    /// 空间衰减距离，超出 `range` 后静音
    fn set_range(&self, range: f32);

    /// 播放速度变化时同步调整音调
    fn set_pitch(&self, pitch: f32);

    /// 丢弃尚未播放的样本（seek 后调用）
    fn clear(&self) {}

    /// 恢复默认参数
    fn reset(&self);

    /// 是否需要单声道（空间音源通常只接受单声道）
    fn prefers_mono(&self) -> bool {
        false
    }
}
