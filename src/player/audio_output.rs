use crate::core::{PlayerError, Result};
use crate::player::sink::AudioSink;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
use crossbeam::queue::SegQueue;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

/// 缓冲上限（秒），超过后丢弃最旧的样本
const MAX_BUFFER_SECONDS: usize = 2;

/// 输出增益：音量 × 距离衰减
#[derive(Debug, Clone, Copy)]
struct Gain {
    volume: f32,
    range: f32,
    distance: f32,
}

impl Gain {
    fn factor(&self) -> f32 {
        let attenuation = if self.range <= 0.0 {
            1.0
        } else {
            (1.0 - self.distance / self.range).clamp(0.0, 1.0)
        };
        self.volume * attenuation
    }
}

impl Default for Gain {
    fn default() -> Self {
        Self {
            volume: 1.0,
            range: 0.0,
            distance: 0.0,
        }
    }
}

/// 音频输出 - 使用 cpal 播放音频
///
/// 持有设备和 Stream，只在创建它的线程上启停；样本通过 [`AudioFeed`] 共享给同步线程。
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
    feed: Arc<AudioFeed>,
}

// cpal::Stream 在部分平台上不是 Send。AudioOutput 不实现 Sync，
// 跨线程共享的只有 AudioFeed（无 Stream），Stream 随所有者一起移动。
unsafe impl Send for AudioOutput {}

impl AudioOutput {
    /// 创建音频输出（支持非标准配置自动回退）
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self> {
        info!("初始化音频输出: {} Hz, {} 声道", sample_rate, channels);

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::Audio("无法找到音频输出设备".to_string()))?;

        debug!("使用音频设备: {}", device.name().unwrap_or_default());

        let requested = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let config = if Self::device_supports(&device, &requested)? {
            requested
        } else {
            warn!(
                "⚠️  音频设备不支持 {} Hz, {} 声道配置，回退到标准配置",
                sample_rate, channels
            );
            let fallback_configs = [(48000, 2), (44100, 2), (48000, 1), (44100, 1)];
            let mut chosen = None;
            for (fb_rate, fb_channels) in fallback_configs {
                let fb_config = StreamConfig {
                    channels: fb_channels,
                    sample_rate: cpal::SampleRate(fb_rate),
                    buffer_size: cpal::BufferSize::Default,
                };
                if Self::device_supports(&device, &fb_config)? {
                    info!("✅ 使用回退配置: {} Hz, {} 声道", fb_rate, fb_channels);
                    chosen = Some(fb_config);
                    break;
                }
            }
            chosen.ok_or_else(|| {
                PlayerError::Audio(format!(
                    "音频设备不支持任何标准配置 (原请求: {} Hz, {} 声道)",
                    sample_rate, channels
                ))
            })?
        };

        Ok(Self {
            device,
            feed: Arc::new(AudioFeed::new(config.sample_rate.0, config.channels)),
            config,
            stream: None,
        })
    }

    fn device_supports(device: &Device, config: &StreamConfig) -> Result<bool> {
        let supported_configs = device
            .supported_output_configs()
            .map_err(|e| PlayerError::Audio(format!("无法获取支持的音频配置: {}", e)))?;
        Ok(supported_configs
            .into_iter()
            .any(|supported| Self::is_config_compatible(config, &supported)))
    }

    /// 检查配置是否兼容
    fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
        let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
            && config.sample_rate.0 <= supported.max_sample_rate().0;
        rate_in_range && config.channels == supported.channels()
    }

    /// 开始播放
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let feed = self.feed.clone();
        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| feed.fill(data),
                move |err| {
                    error!("音频流错误: {}", err);
                },
                None,
            )
            .map_err(|e| PlayerError::Audio(format!("创建音频流失败: {}", e)))?;

        stream
            .play()
            .map_err(|e| PlayerError::Audio(format!("启动音频流失败: {}", e)))?;

        self.stream = Some(stream);
        info!("音频输出已启动");
        Ok(())
    }

    /// 停止播放
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            info!("音频输出已停止");
        }
    }

    /// 供播放管理器绑定的样本入口
    pub fn feed(&self) -> Arc<AudioFeed> {
        self.feed.clone()
    }

    /// 获取实际使用的音频配置
    pub fn get_config(&self) -> (u32, u16) {
        (self.config.sample_rate.0, self.config.channels)
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 设备缓冲区的写入端：声道适配、变速重采样和增益
pub struct AudioFeed {
    sample_rate: u32,
    channels: u16,
    buffer: SegQueue<f32>,
    gain: Mutex<Gain>,
    pitch: Mutex<f32>,
}

impl AudioFeed {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            buffer: SegQueue::new(),
            gain: Mutex::new(Gain::default()),
            pitch: Mutex::new(1.0),
        }
    }

    /// 听者与音源的距离，配合 `set_range` 计算衰减
    pub fn set_distance(&self, distance: f32) {
        self.gain.lock().distance = distance.max(0.0);
    }

    /// 缓冲中的样本数
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// 设备回调：取样本乘以增益，不足时补静音
    pub fn fill(&self, data: &mut [f32]) {
        let factor = self.gain.lock().factor();
        for sample in data.iter_mut() {
            *sample = self.buffer.pop().map_or(0.0, |v| v * factor);
        }
    }
}

impl AudioSink for AudioFeed {
    fn upload(&self, samples: &[f32], sample_rate: u32, channels: u16) {
        let adapted = adapt_channels(samples, channels, self.channels);
        let step = sample_rate as f32 * *self.pitch.lock() / self.sample_rate as f32;
        let resampled = resample_linear(&adapted, self.channels, step);

        for sample in resampled {
            self.buffer.push(sample);
        }

        let limit = self.sample_rate as usize * self.channels as usize * MAX_BUFFER_SECONDS;
        let mut dropped = 0;
        while self.buffer.len() > limit && self.buffer.pop().is_some() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("音频缓冲溢出，丢弃 {} 个样本", dropped);
        }
    }

    fn set_volume(&self, volume: f32) {
        self.gain.lock().volume = volume.clamp(0.0, 1.0);
    }

    fn set_range(&self, range: f32) {
        self.gain.lock().range = range.max(0.0);
    }

    fn set_pitch(&self, pitch: f32) {
        *self.pitch.lock() = pitch.clamp(0.25, 4.0);
    }

    fn clear(&self) {
        while self.buffer.pop().is_some() {}
    }

    fn reset(&self) {
        self.clear();
        *self.gain.lock() = Gain::default();
        *self.pitch.lock() = 1.0;
    }

    fn prefers_mono(&self) -> bool {
        self.channels == 1
    }
}

/// 声道适配：单声道复制到各声道，多声道取平均或截取
fn adapt_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    let from = from.max(1) as usize;
    let to = to.max(1) as usize;
    if from == to {
        return samples.to_vec();
    }
    let mut out = Vec::with_capacity(samples.len() / from * to);
    for frame in samples.chunks_exact(from) {
        if to == 1 {
            out.push(frame.iter().sum::<f32>() / from as f32);
        } else if from == 1 {
            out.extend(std::iter::repeat(frame[0]).take(to));
        } else {
            out.extend((0..to).map(|c| frame[c.min(from - 1)]));
        }
    }
    out
}

/// 线性插值重采样；`step` 为每个输出帧前进的输入帧数
fn resample_linear(samples: &[f32], channels: u16, step: f32) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    let frames = samples.len() / channels;
    if frames == 0 || (step - 1.0).abs() < f32::EPSILON || step <= 0.0 {
        return samples.to_vec();
    }
    let out_frames = (frames as f32 / step).floor() as usize;
    let mut out = Vec::with_capacity(out_frames * channels);
    for i in 0..out_frames {
        let pos = i as f32 * step;
        let index = pos as usize;
        let frac = pos - index as f32;
        let next = (index + 1).min(frames - 1);
        for c in 0..channels {
            let a = samples[index * channels + c];
            let b = samples[next * channels + c];
            out.push(a + (b - a) * frac);
        }
    }
    out
}
