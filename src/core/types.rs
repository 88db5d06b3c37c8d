use serde::{Deserialize, Serialize};
use std::fmt;

/// 流媒体协议类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamProtocol {
    /// RTSP - 实时流协议（监控摄像头）
    RTSP,
    /// RTMP - 实时消息协议（直播流）
    RTMP,
    /// HLS - HTTP Live Streaming
    HLS,
    /// HTTP - 普通 HTTP 流（包括 DASH 拆分后的单路地址）
    HTTP,
}

impl StreamProtocol {
    /// 根据 URL 判断协议，本地文件返回 None
    pub fn detect(url: &str) -> Option<Self> {
        if url.starts_with("rtsp://") {
            Some(StreamProtocol::RTSP)
        } else if url.starts_with("rtmp://") {
            Some(StreamProtocol::RTMP)
        } else if url.contains(".m3u8") || url.contains("/hls/") {
            Some(StreamProtocol::HLS)
        } else if url.starts_with("http://") || url.starts_with("https://") {
            Some(StreamProtocol::HTTP)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamProtocol::RTSP => "RTSP",
            StreamProtocol::RTMP => "RTMP",
            StreamProtocol::HLS => "HLS",
            StreamProtocol::HTTP => "HTTP",
        }
    }
}

/// 媒体源描述
///
/// URL 解析、鉴权、Cookie 获取都在外部完成，这里只接收已经解析好的地址。
/// `audio_url` 存在时视频和音频分两路打开（DASH 风格的拆分流）。
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    pub url: String,
    pub audio_url: Option<String>,
    pub headers: Vec<(String, String)>,
    pub cookie: Option<String>,
    pub user_agent: Option<String>,
    pub want_video: bool,
    pub want_audio: bool,
    /// 硬件解码提示（解码器多线程 + 低延迟）
    pub hw_decode_hint: bool,
    /// 输出采样率
    pub sample_rate: u32,
    /// 输出声道数
    pub channels: u16,
    /// 是否保留 alpha 通道（RGBA），否则输出 RGB
    pub alpha: bool,
}

impl SourceDescriptor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            audio_url: None,
            headers: Vec::new(),
            cookie: None,
            user_agent: None,
            want_video: true,
            want_audio: true,
            hw_decode_hint: cfg!(feature = "hwaccel"),
            sample_rate: 48000,
            channels: 2,
            alpha: true,
        }
    }

    pub fn with_audio_url(mut self, url: impl Into<String>) -> Self {
        self.audio_url = Some(url.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    /// 判断是否为网络流
    pub fn is_network_stream(&self) -> bool {
        StreamProtocol::detect(&self.url).is_some()
    }
}

/// 网络流连接状态 / 缓冲状态信息（用于监控和调试）
#[derive(Debug, Clone, Default)]
pub struct BufferStatus {
    /// 视频帧队列长度
    pub video_frames: usize,

    /// 音频帧队列长度
    pub audio_frames: usize,

    /// 低开销模式当前是否正在跳过视频帧
    pub video_suppressed: bool,

    /// 生产线程是否已结束
    pub ended: bool,
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
    RGB,
}

impl PixelFormat {
    /// 每个像素的字节数
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::RGBA => 4,
            PixelFormat::RGB => 3,
        }
    }
}

/// 带时间戳的帧，FrameQueue 依赖它做音画同步
pub trait Timestamped {
    /// 显示时间戳（微秒）
    fn pts(&self) -> i64;
}

/// 视频帧数据
///
/// 帧只能移动不能复制：谁最后持有谁负责释放，drop 时像素缓冲随之释放。
pub struct VideoFrame {
    pub pts: i64, // 显示时间戳（微秒）
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>, // 去掉 stride 后的连续行数据
}

impl VideoFrame {
    pub fn new(pts: i64, width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            pts,
            width,
            height,
            format,
            data,
        }
    }
}

impl Timestamped for VideoFrame {
    fn pts(&self) -> i64 {
        self.pts
    }
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("pts", &self.pts)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// 音频帧数据（交错排列的 f32 PCM）
pub struct AudioFrame {
    pub pts: i64, // 显示时间戳（微秒）
    pub sample_rate: u32,
    pub channels: u16,
    pub data: Vec<f32>, // 统一使用 f32 格式
}

impl AudioFrame {
    pub fn new(pts: i64, sample_rate: u32, channels: u16, data: Vec<f32>) -> Self {
        Self {
            pts,
            sample_rate,
            channels,
            data,
        }
    }

    /// 每个声道的采样数
    pub fn samples(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.data.len() / self.channels as usize
        }
    }

    /// 帧时长（微秒）
    pub fn duration_us(&self) -> i64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples() as i64 * 1_000_000 / self.sample_rate as i64
    }

    /// 多声道混合为单声道
    pub fn to_mono(&self) -> Vec<f32> {
        let channels = self.channels.max(1) as usize;
        if channels == 1 {
            return self.data.clone();
        }
        self.data
            .chunks_exact(channels)
            .map(|c| c.iter().sum::<f32>() / channels as f32)
            .collect()
    }
}

impl Timestamped for AudioFrame {
    fn pts(&self) -> i64 {
        self.pts
    }
}

impl fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioFrame")
            .field("pts", &self.pts)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("samples", &self.samples())
            .finish()
    }
}

/// 解码会话吐出的一帧
#[derive(Debug)]
pub enum DecodedFrame {
    Video(VideoFrame),
    Audio(AudioFrame),
    /// 低开销模式下跳过像素转换的视频帧，只保留时间戳
    SkippedVideo { pts: i64 },
}

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Ended,
    Closed,
}

/// 媒体信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration_us: i64, // 总时长（微秒），直播流 <= 0
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub video_codec: String,
    pub audio_codec: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl MediaInfo {
    /// 时长无效即视为直播流
    pub fn is_live(&self) -> bool {
        self.duration_us <= 0
    }

    pub fn has_video(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn has_audio(&self) -> bool {
        self.sample_rate > 0
    }
}
