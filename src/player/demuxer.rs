use crate::core::{
    DecodedFrame, MediaInfo, PixelFormat, PlayerError, Result, SourceDescriptor, StreamProtocol,
};
use crate::player::decoder::{AudioDecoder, VideoDecoder};
use crate::player::demuxer_source::DecodeSession;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{format, media};
use log::{debug, info, warn};
use std::collections::VecDeque;

/// 打开单路会话时需要的参数
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub want_video: bool,
    pub want_audio: bool,
    pub headers: Vec<(String, String)>,
    pub cookie: Option<String>,
    pub user_agent: Option<String>,
    pub hw_decode_hint: bool,
    pub sample_rate: u32,
    pub channels: u16,
    pub alpha: bool,
    /// 网络超时（微秒）
    pub network_timeout_us: u64,
}

impl SessionOptions {
    pub fn from_source(source: &SourceDescriptor, network_timeout_us: u64) -> Self {
        Self {
            want_video: source.want_video,
            want_audio: source.want_audio,
            headers: source.headers.clone(),
            cookie: source.cookie.clone(),
            user_agent: source.user_agent.clone(),
            hw_decode_hint: source.hw_decode_hint,
            sample_rate: source.sample_rate,
            channels: source.channels,
            alpha: source.alpha,
            network_timeout_us,
        }
    }

    /// 只取视频
    pub fn video_only(mut self) -> Self {
        self.want_audio = false;
        self
    }

    /// 只取音频
    pub fn audio_only(mut self) -> Self {
        self.want_video = false;
        self
    }

    /// FFmpeg 网络选项
    fn network_dictionary(&self, url: &str, protocol: StreamProtocol) -> ffmpeg::Dictionary<'static> {
        let mut options = ffmpeg::Dictionary::new();

        // discardcorrupt: 丢弃损坏的帧；genpts: 生成 PTS
        options.set("fflags", "+discardcorrupt+genpts");
        options.set("analyzeduration", "5000000");
        options.set("probesize", "10000000");

        let timeout = self.network_timeout_us.to_string();
        options.set("timeout", &timeout);
        options.set("rw_timeout", &timeout);
        options.set("buffer_size", "8388608");

        if matches!(protocol, StreamProtocol::HTTP | StreamProtocol::HLS) {
            options.set("reconnect", "1");
            options.set("reconnect_streamed", "1");
            options.set("reconnect_delay_max", "4");

            if !self.headers.is_empty() {
                let headers: String = self
                    .headers
                    .iter()
                    .map(|(k, v)| format!("{}: {}\r\n", k, v))
                    .collect();
                options.set("headers", &headers);
            }
            if let Some(cookie) = &self.cookie {
                options.set("cookies", cookie);
            }
            if let Some(agent) = &self.user_agent {
                options.set("user_agent", agent);
            }
        }

        if protocol == StreamProtocol::RTSP {
            options.set("rtsp_transport", "tcp");
        }

        if protocol == StreamProtocol::HLS {
            debug!("🎬 HLS 流检测，应用 HLS 选项: {}", url);
            options.set("live_start_index", "-1");
            options.set("max_reload", "10");
            options.set("http_persistent", "1");
        }

        options
    }
}

/// 基于 FFmpeg 的解码会话：解封装 + 解码一路地址
pub struct Demuxer {
    input_ctx: format::context::Input,
    video_stream_index: Option<usize>,
    audio_stream_index: Option<usize>,
    video_decoder: Option<VideoDecoder>,
    audio_decoder: Option<AudioDecoder>,
    pending: VecDeque<DecodedFrame>,
    reached_eof: bool,
    media_info: MediaInfo, // 缓存媒体信息
    source_path: String,   // 媒体源路径（用于描述）
}

impl Demuxer {
    /// 打开媒体地址
    pub fn open(url: &str, options: &SessionOptions) -> Result<Self> {
        info!("正在打开: {}", url);

        let input_ctx = match StreamProtocol::detect(url) {
            Some(protocol) => {
                info!("🌐 检测到网络流（{}），应用网络选项", protocol.as_str());
                let dictionary = options.network_dictionary(url, protocol);
                format::input_with_dictionary(&url, dictionary)
                    .map_err(|e| PlayerError::Open(format!("无法打开网络流 {}: {}", url, e)))?
            }
            None => format::input(&url)
                .map_err(|e| PlayerError::Open(format!("无法打开文件 {}: {}", url, e)))?,
        };

        let video_stream_index = if options.want_video {
            input_ctx.streams().best(media::Type::Video).map(|s| s.index())
        } else {
            None
        };
        let audio_stream_index = if options.want_audio {
            input_ctx.streams().best(media::Type::Audio).map(|s| s.index())
        } else {
            None
        };

        match (video_stream_index, audio_stream_index) {
            (None, None) if options.want_video => return Err(PlayerError::NoVideoStream),
            (None, None) => return Err(PlayerError::NoAudioStream),
            _ => {}
        }

        debug!("视频流索引: {:?}", video_stream_index);
        debug!("音频流索引: {:?}", audio_stream_index);

        let format = if options.alpha {
            PixelFormat::RGBA
        } else {
            PixelFormat::RGB
        };

        let mut media_info = MediaInfo::default();
        let raw_duration = input_ctx.duration();
        media_info.duration_us = if raw_duration > 0 { raw_duration } else { 0 };

        let video_decoder = match video_stream_index.and_then(|i| input_ctx.stream(i)) {
            Some(stream) => {
                let rate = stream.avg_frame_rate();
                if rate.denominator() != 0 {
                    media_info.fps = rate.numerator() as f64 / rate.denominator() as f64;
                }
                media_info.video_codec = stream.parameters().id().name().to_string();
                let decoder = VideoDecoder::from_stream(stream, format, options.hw_decode_hint)?;
                media_info.width = decoder.width();
                media_info.height = decoder.height();
                Some(decoder)
            }
            None => None,
        };

        let audio_decoder = match audio_stream_index.and_then(|i| input_ctx.stream(i)) {
            Some(stream) => {
                media_info.audio_codec = stream.parameters().id().name().to_string();
                let decoder =
                    AudioDecoder::from_stream(stream, options.sample_rate, options.channels)?;
                debug!(
                    "音频源 {} Hz, {} 声道 -> {} Hz, {} 声道",
                    decoder.rate(),
                    decoder.channels(),
                    options.sample_rate,
                    options.channels
                );
                media_info.sample_rate = options.sample_rate;
                media_info.channels = options.channels;
                Some(decoder)
            }
            None => {
                media_info.audio_codec = "none".to_string();
                None
            }
        };

        info!("📎 媒体信息: {:?}", media_info);

        Ok(Self {
            input_ctx,
            video_stream_index,
            audio_stream_index,
            video_decoder,
            audio_decoder,
            pending: VecDeque::new(),
            reached_eof: false,
            media_info,
            source_path: url.to_string(),
        })
    }

    /// 到达文件末尾后取出解码器里剩余的帧
    fn drain_decoders(&mut self, convert_video: bool) {
        if let Some(decoder) = self.video_decoder.as_mut() {
            match decoder.drain(convert_video) {
                Ok(frames) => self.pending.extend(frames),
                Err(e) => debug!("视频解码器 drain 失败（忽略）: {}", e),
            }
        }
        if let Some(decoder) = self.audio_decoder.as_mut() {
            match decoder.drain() {
                Ok(frames) => self.pending.extend(frames),
                Err(e) => debug!("音频解码器 drain 失败（忽略）: {}", e),
            }
        }
    }
}

impl DecodeSession for Demuxer {
    fn grab(&mut self, convert_video: bool) -> Result<Option<DecodedFrame>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }
            if self.reached_eof {
                return Ok(None);
            }

            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input_ctx) {
                Ok(()) => {
                    let stream_index = packet.stream();
                    if Some(stream_index) == self.video_stream_index {
                        if let Some(decoder) = self.video_decoder.as_mut() {
                            let frames = decoder.decode(&packet, convert_video)?;
                            self.pending.extend(frames);
                        }
                    } else if Some(stream_index) == self.audio_stream_index {
                        if let Some(decoder) = self.audio_decoder.as_mut() {
                            let frames = decoder.decode(&packet)?;
                            self.pending.extend(frames);
                        }
                    }
                    // 其他流的包直接跳过
                }
                Err(ffmpeg::Error::Eof) => {
                    info!("📄 到达流末尾: {}", self.source_path);
                    self.reached_eof = true;
                    self.drain_decoders(convert_video);
                }
                Err(e) => {
                    return Err(PlayerError::Decode(format!("读取数据包失败: {}", e)));
                }
            }
        }
    }

    fn seek(&mut self, timestamp_us: i64) -> Result<()> {
        self.input_ctx
            .seek(timestamp_us, ..timestamp_us)
            .map_err(|e| PlayerError::Seek(format!("{}: {}", self.source_path, e)))?;

        // 丢弃解码器内缓存的旧帧
        if let Some(decoder) = self.video_decoder.as_mut() {
            decoder.flush();
        }
        if let Some(decoder) = self.audio_decoder.as_mut() {
            decoder.flush();
        }
        self.pending.clear();
        self.reached_eof = false;
        Ok(())
    }

    fn media_info(&self) -> &MediaInfo {
        &self.media_info
    }

    fn stop(&mut self) {
        if !self.pending.is_empty() {
            warn!("会话停止时丢弃 {} 个未取出的帧", self.pending.len());
        }
        self.pending.clear();
        self.video_decoder = None;
        self.audio_decoder = None;
        self.reached_eof = true;
    }

    fn description(&self) -> String {
        format!("FFmpeg Demuxer: {}", self.source_path)
    }
}
