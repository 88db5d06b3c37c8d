use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("FFmpeg 错误: {0}")]
    FFmpeg(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 解析错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 打开媒体源失败（URL 无效、主机不可达、格式不支持）
    #[error("无法打开媒体源: {0}")]
    Open(String),

    #[error("无法找到视频流")]
    NoVideoStream,

    #[error("无法找到音频流")]
    NoAudioStream,

    /// 播放中途的读包/解码失败，只在生产线程内部出现
    #[error("解码错误: {0}")]
    Decode(String),

    /// 直播流不可 seek，或解码会话拒绝 seek
    #[error("Seek 失败: {0}")]
    Seek(String),

    #[error("音频输出错误: {0}")]
    Audio(String),

    #[error("播放器已关闭")]
    Closed,

    #[error("Anyhow 错误: {0}")]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
