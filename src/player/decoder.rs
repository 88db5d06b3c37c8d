use crate::core::{AudioFrame, DecodedFrame, PixelFormat, Result, VideoFrame};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, software, util};
use log::{debug, warn};

/// 时间戳转微秒
fn to_micros(timestamp: Option<i64>, time_base: f64) -> i64 {
    timestamp
        .map(|ts| (ts as f64 * time_base * 1_000_000.0) as i64)
        .unwrap_or(0)
}

/// 按提示为解码上下文设置多线程和低延迟选项（必须在打开解码器之前）
fn apply_decode_hint(context: &mut codec::context::Context, hw_decode_hint: bool) {
    if !hw_decode_hint {
        return;
    }
    unsafe {
        use ffmpeg_next::ffi;
        let codec_ctx = context.as_mut_ptr();

        // 低延迟：解码器尽早输出帧
        (*codec_ctx).flags |= ffi::AV_CODEC_FLAG_LOW_DELAY as i32;

        // 0 = 由 FFmpeg 按 CPU 核数决定
        (*codec_ctx).thread_count = 0;
        (*codec_ctx).thread_type = ffi::FF_THREAD_FRAME | ffi::FF_THREAD_SLICE;
    }
    debug!("✓ 已设置解码多线程和低延迟选项");
}

/// 视频解码器（YUV -> RGBA/RGB，去 stride）
pub struct VideoDecoder {
    decoder: codec::decoder::Video,
    scaler: Option<software::scaling::Context>,
    scaler_input: Option<(util::format::Pixel, u32, u32)>,
    time_base: f64,
    format: PixelFormat,
}

// SwsContext 本身不是 Send，但我们确保只在单个线程中使用它
// 这是安全的，因为每个解码器实例只会被持有它的解码会话使用
unsafe impl Send for VideoDecoder {}

impl VideoDecoder {
    /// 从视频流创建解码器
    pub fn from_stream(
        stream: format::stream::Stream,
        format: PixelFormat,
        hw_decode_hint: bool,
    ) -> Result<Self> {
        let mut context = codec::context::Context::from_parameters(stream.parameters())?;
        apply_decode_hint(&mut context, hw_decode_hint);
        let decoder = context.decoder().video()?;

        let time_base = stream.time_base();
        let time_base = time_base.numerator() as f64 / time_base.denominator() as f64;

        debug!(
            "视频解码器: {}x{}, 格式: {:?} → {:?}",
            decoder.width(),
            decoder.height(),
            decoder.format(),
            format
        );

        Ok(Self {
            decoder,
            scaler: None,
            scaler_input: None,
            time_base,
            format,
        })
    }

    pub fn width(&self) -> u32 {
        self.decoder.width()
    }

    pub fn height(&self) -> u32 {
        self.decoder.height()
    }

    /// 解码数据包；`convert` 为 false 时跳过像素转换，只返回时间戳
    pub fn decode(&mut self, packet: &ffmpeg::Packet, convert: bool) -> Result<Vec<DecodedFrame>> {
        match self.decoder.send_packet(packet) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => {
                debug!("视频解码器收到 EOF（send_packet），执行 flush 并忽略本次包");
                self.decoder.flush();
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        }
        self.receive_all(convert)
    }

    /// 送入 EOF，取出解码器内缓存的剩余帧
    pub fn drain(&mut self, convert: bool) -> Result<Vec<DecodedFrame>> {
        self.decoder.send_eof()?;
        self.receive_all(convert)
    }

    /// seek 后丢弃解码器内部缓存
    pub fn flush(&mut self) {
        self.decoder.flush();
    }

    fn receive_all(&mut self, convert: bool) -> Result<Vec<DecodedFrame>> {
        let mut frames = Vec::new();
        loop {
            let mut decoded = util::frame::Video::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(_) => {
                    let pts = to_micros(decoded.timestamp(), self.time_base);
                    if convert {
                        frames.push(DecodedFrame::Video(self.convert_frame(&decoded, pts)?));
                    } else {
                        frames.push(DecodedFrame::SkippedVideo { pts });
                    }
                }
                Err(ffmpeg::Error::Other { errno: 11 }) => break, // EAGAIN
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    // 网络流的个别坏帧可以容忍
                    warn!("解码错误（已跳过）: {}", e);
                    break;
                }
            }
        }
        Ok(frames)
    }

    /// 转换帧格式并复制到连续内存
    fn convert_frame(&mut self, frame: &util::frame::Video, pts: i64) -> Result<VideoFrame> {
        let width = frame.width();
        let height = frame.height();
        let input = (frame.format(), width, height);

        // 分辨率或格式变化时重建 scaler
        if self.scaler.is_none() || self.scaler_input != Some(input) {
            let target = match self.format {
                PixelFormat::RGBA => util::format::Pixel::RGBA,
                PixelFormat::RGB => util::format::Pixel::RGB24,
            };
            self.scaler = Some(software::scaling::Context::get(
                frame.format(),
                width,
                height,
                target,
                width,
                height,
                software::scaling::Flags::BILINEAR,
            )?);
            self.scaler_input = Some(input);
        }

        let mut converted = util::frame::Video::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler.run(frame, &mut converted)?;
        }

        let row_size = width as usize * self.format.channels();
        let mut data = vec![0u8; row_size * height as usize];
        let stride = converted.stride(0);
        let frame_data = converted.data(0);

        for y in 0..height as usize {
            let src_offset = y * stride;
            let dst_offset = y * row_size;
            data[dst_offset..dst_offset + row_size]
                .copy_from_slice(&frame_data[src_offset..src_offset + row_size]);
        }

        Ok(VideoFrame::new(pts, width, height, self.format, data))
    }
}

/// 音频解码器（重采样为交错 f32）
pub struct AudioDecoder {
    decoder: codec::decoder::Audio,
    resampler: Option<software::resampling::Context>,
    time_base: f64,
    target_channels: u16,    // 目标声道数
    target_sample_rate: u32, // 目标采样率
}

// SwrContext 同样只在所属解码会话的线程里使用
unsafe impl Send for AudioDecoder {}

impl AudioDecoder {
    /// 从音频流创建解码器（指定目标配置）
    pub fn from_stream(
        stream: format::stream::Stream,
        target_sample_rate: u32,
        target_channels: u16,
    ) -> Result<Self> {
        let context = codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context.decoder().audio()?;

        let time_base = stream.time_base();
        let time_base = time_base.numerator() as f64 / time_base.denominator() as f64;

        debug!(
            "音频解码器: {} Hz, {} 声道 → 目标: {} Hz, {} 声道",
            decoder.rate(),
            decoder.channels(),
            target_sample_rate,
            target_channels
        );

        Ok(Self {
            decoder,
            resampler: None,
            time_base,
            target_channels,
            target_sample_rate,
        })
    }

    pub fn rate(&self) -> u32 {
        self.decoder.rate()
    }

    pub fn channels(&self) -> u16 {
        self.decoder.channels()
    }

    /// 解码数据包
    pub fn decode(&mut self, packet: &ffmpeg::Packet) -> Result<Vec<DecodedFrame>> {
        match self.decoder.send_packet(packet) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => {
                debug!("音频解码器收到 EOF（send_packet），执行 flush 并忽略本次包");
                self.decoder.flush();
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        }
        self.receive_all()
    }

    /// 送入 EOF，取出剩余帧
    pub fn drain(&mut self) -> Result<Vec<DecodedFrame>> {
        self.decoder.send_eof()?;
        self.receive_all()
    }

    pub fn flush(&mut self) {
        self.decoder.flush();
    }

    fn receive_all(&mut self) -> Result<Vec<DecodedFrame>> {
        let mut frames = Vec::new();
        loop {
            let mut decoded = util::frame::Audio::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(_) => frames.push(DecodedFrame::Audio(self.convert_frame(&decoded)?)),
                Err(ffmpeg::Error::Other { errno: 11 }) => break, // EAGAIN
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(frames)
    }

    /// 转换音频帧为 f32 格式（声道转换和重采样）
    fn convert_frame(&mut self, frame: &util::frame::Audio) -> Result<AudioFrame> {
        if self.resampler.is_none() {
            let target_layout = match self.target_channels {
                1 => util::channel_layout::ChannelLayout::MONO,
                6 => util::channel_layout::ChannelLayout::_5POINT1,
                _ => util::channel_layout::ChannelLayout::STEREO,
            };

            debug!(
                "🔧 初始化音频重采样器: {}Hz/{}ch → {}Hz/{}ch",
                frame.rate(),
                frame.channels(),
                self.target_sample_rate,
                self.target_channels
            );

            self.resampler = Some(software::resampling::Context::get(
                frame.format(),
                frame.channel_layout(),
                frame.rate(),
                util::format::Sample::F32(util::format::sample::Type::Packed),
                target_layout,
                self.target_sample_rate,
            )?);
        }

        let mut resampled = util::frame::Audio::empty();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.run(frame, &mut resampled)?;
        }

        let pts = to_micros(frame.timestamp(), self.time_base);

        let data_size = resampled.samples() * self.target_channels as usize;
        let frame_data = resampled.data(0);
        let byte_len = data_size * std::mem::size_of::<f32>();
        let data = frame_data[..byte_len.min(frame_data.len())]
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Ok(AudioFrame::new(
            pts,
            self.target_sample_rate,
            self.target_channels,
            data,
        ))
    }
}
