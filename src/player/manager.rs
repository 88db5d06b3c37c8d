use crate::core::{
    AudioFrame, BufferStatus, MediaInfo, PlaybackClock, PlaybackState, PlayerConfig, PlayerError,
    Result, SourceDescriptor, SyncConfig, Timestamped, VideoFrame,
};
use crate::danmaku::{CaptionEntity, CaptionScheduler, CaptionStats, CaptionTrack, TextMeasure};
use crate::player::pipeline::DecoderPipeline;
use crate::player::sink::{AudioSink, TextureSink};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::process;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

fn log_ctx() -> String {
    format!("[pid:{}-tid:{:?}]", process::id(), thread::current().id())
}

/// 单次节拍休眠上限，防止时间戳跳变导致长时间卡住
const MAX_PACING_INTERVAL: Duration = Duration::from_millis(500);

/// 同步线程落后超过该值时放弃追赶，重新以当前时刻为基准
const MAX_PACING_LAG: Duration = Duration::from_millis(200);

/// 同步线程与控制接口共享的状态
struct SyncShared {
    stop: AtomicBool,
    looping: AtomicBool,
    speed: Mutex<f32>,
    /// 每次 seek 自增，同步线程据此丢弃 seek 之前取出的帧
    seek_generation: AtomicU64,
    /// 交付帧和 seek/暂停 互斥
    delivery: Mutex<()>,
    /// 等待纹理端取走的当前视频帧（最多一帧）
    current_video: Mutex<Option<VideoFrame>>,
    audio_sinks: RwLock<Vec<Arc<dyn AudioSink>>>,
}

impl SyncShared {
    fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
            looping: AtomicBool::new(false),
            speed: Mutex::new(1.0),
            seek_generation: AtomicU64::new(0),
            delivery: Mutex::new(()),
            current_video: Mutex::new(None),
            audio_sinks: RwLock::new(Vec::new()),
        }
    }

    /// seek 后统一调用（调用者持有 delivery 锁）
    fn invalidate(&self, clock: &PlaybackClock, target_us: i64) {
        self.seek_generation.fetch_add(1, Ordering::SeqCst);
        clock.set_time(target_us);
        self.current_video.lock().take();
        for sink in self.audio_sinks.read().iter() {
            sink.clear();
        }
    }

    fn deliver_audio(&self, frame: &AudioFrame) {
        let sinks = self.audio_sinks.read();
        if sinks.is_empty() {
            return;
        }
        let mut mono: Option<Vec<f32>> = None;
        for sink in sinks.iter() {
            if sink.prefers_mono() && frame.channels > 1 {
                let samples = mono.get_or_insert_with(|| frame.to_mono());
                sink.upload(samples, frame.sample_rate, 1);
            } else {
                sink.upload(&frame.data, frame.sample_rate, frame.channels);
            }
        }
    }
}

/// 主时钟帧：有音频时以音频为准，纯视频时以视频为准
enum MasterFrame {
    Audio(AudioFrame),
    Video(VideoFrame),
}

impl MasterFrame {
    fn pts(&self) -> i64 {
        match self {
            MasterFrame::Audio(frame) => frame.pts(),
            MasterFrame::Video(frame) => frame.pts(),
        }
    }
}

/// 播放管理器 - 整体控制播放流程
pub struct PlaybackManager {
    config: PlayerConfig,
    clock: PlaybackClock,
    pipeline: Option<Arc<DecoderPipeline>>,
    shared: Arc<SyncShared>,
    sync_thread: Option<JoinHandle<()>>,
    texture_sink: Option<Arc<dyn TextureSink>>,
    captions: CaptionScheduler,
    volume: f32,
    range: f32,
    low_overhead: bool,
}

impl PlaybackManager {
    pub fn new(config: PlayerConfig) -> Self {
        info!("{} 🎮 创建播放管理器...", log_ctx());
        Self {
            captions: CaptionScheduler::new(config.caption.clone()),
            config,
            clock: PlaybackClock::new(),
            pipeline: None,
            shared: Arc::new(SyncShared::new()),
            sync_thread: None,
            texture_sink: None,
            volume: 1.0,
            range: 0.0,
            low_overhead: false,
        }
    }

    /// 同步打开媒体源并开始解码（初始为暂停状态）
    pub fn open(&mut self, source: &SourceDescriptor) -> Result<MediaInfo> {
        let pipeline = DecoderPipeline::open(source, self.config.pipeline.clone())?;
        self.attach_pipeline(pipeline)
    }

    /// 使用已创建的管线启动播放（通常由 `PipelineFactory` 在子线程中创建）
    pub fn attach_pipeline(&mut self, pipeline: DecoderPipeline) -> Result<MediaInfo> {
        info!("{} 📎 附加解码管线", log_ctx());
        self.close();

        let media_info = pipeline.media_info().clone();
        info!("{} 媒体信息: {:?}", log_ctx(), media_info);

        self.clock.pause();
        self.clock.set_live(media_info.is_live());
        self.clock.reset();
        self.captions.reset();

        pipeline.set_low_overhead(self.low_overhead);
        pipeline.start()?;
        let pipeline = Arc::new(pipeline);

        if let Some(sink) = &self.texture_sink {
            sink.set_size(media_info.width, media_info.height);
        }

        self.shared.stop.store(false, Ordering::SeqCst);
        let shared = self.shared.clone();
        let clock = self.clock.clone();
        let sync_pipeline = pipeline.clone();
        let sync_config = self.config.sync.clone();
        let handle = thread::Builder::new()
            .name("av-sync".to_string())
            .spawn(move || sync_loop(shared, sync_pipeline, clock, sync_config))?;

        self.sync_thread = Some(handle);
        self.pipeline = Some(pipeline);
        Ok(media_info)
    }

    pub fn play(&self) {
        if self.pipeline.is_none() {
            warn!("{} ⚠ 没有打开的媒体，忽略 play", log_ctx());
            return;
        }
        self.clock.play();
        info!("{} ▶️ 播放", log_ctx());
    }

    /// 暂停后点播时间停在最近交付的音频帧上
    pub fn pause(&self) {
        let _guard = self.shared.delivery.lock();
        self.clock.pause();
        info!("{} ⏸️ 暂停", log_ctx());
    }

    /// Seek 到指定位置（微秒）
    pub fn seek(&mut self, target_us: i64) -> Result<()> {
        let pipeline = self.pipeline.as_ref().ok_or(PlayerError::Closed)?;
        let target = pipeline.seek(target_us)?;
        {
            let _guard = self.shared.delivery.lock();
            self.shared.invalidate(&self.clock, target);
        }
        self.captions.reset();
        info!("{} 🎯 Seek 完成: {} us", log_ctx(), target);
        Ok(())
    }

    /// 设置播放速度，只影响节拍和音调
    pub fn set_speed(&self, speed: f32) {
        let speed = if speed.is_finite() && speed > 0.0 {
            speed
        } else {
            warn!("{} ⚠ 无效的播放速度 {}，使用 1.0", log_ctx(), speed);
            1.0
        };
        *self.shared.speed.lock() = speed;
        for sink in self.shared.audio_sinks.read().iter() {
            sink.set_pitch(speed);
        }
    }

    pub fn speed(&self) -> f32 {
        *self.shared.speed.lock()
    }

    pub fn set_looping(&self, looping: bool) {
        self.shared.looping.store(looping, Ordering::SeqCst);
    }

    pub fn is_looping(&self) -> bool {
        self.shared.looping.load(Ordering::SeqCst)
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        for sink in self.shared.audio_sinks.read().iter() {
            sink.set_volume(self.volume);
        }
    }

    pub fn set_range(&mut self, range: f32) {
        self.range = range.max(0.0);
        for sink in self.shared.audio_sinks.read().iter() {
            sink.set_range(self.range);
        }
    }

    pub fn set_low_overhead(&mut self, enabled: bool) {
        self.low_overhead = enabled;
        if let Some(pipeline) = &self.pipeline {
            pipeline.set_low_overhead(enabled);
        }
        info!("{} 低开销模式: {}", log_ctx(), enabled);
    }

    /// 绑定音频接收端（可以绑定多个）
    pub fn bind_audio_sink(&self, sink: Arc<dyn AudioSink>) {
        sink.set_volume(self.volume);
        sink.set_range(self.range);
        sink.set_pitch(self.speed());
        self.shared.audio_sinks.write().push(sink);
    }

    pub fn unbind_audio_sinks(&self) {
        for sink in self.shared.audio_sinks.write().drain(..) {
            sink.reset();
        }
    }

    pub fn bind_texture_sink(&mut self, sink: Arc<dyn TextureSink>) {
        if let Some(pipeline) = &self.pipeline {
            let info = pipeline.media_info();
            sink.set_size(info.width, info.height);
        }
        self.texture_sink = Some(sink);
    }

    /// 把当前视频帧交给纹理端，返回是否上传了新帧
    pub fn upload_video(&self) -> bool {
        let Some(sink) = &self.texture_sink else {
            return false;
        };
        match self.shared.current_video.lock().take() {
            Some(frame) => {
                sink.upload(frame);
                true
            }
            None => false,
        }
    }

    /// 直接取走当前视频帧（宿主自行上传时使用）
    pub fn take_video_frame(&self) -> Option<VideoFrame> {
        self.shared.current_video.lock().take()
    }

    pub fn load_captions(&mut self, track: CaptionTrack) {
        self.captions.set_track(track);
    }

    pub fn set_text_measure(&mut self, measure: Box<dyn TextMeasure>) {
        self.captions.set_text_measure(measure);
    }

    /// 每个渲染帧调用，返回当前屏幕上的弹幕
    pub fn advance_captions(&mut self, dt: f32) -> &[CaptionEntity] {
        let now = self.clock.now_seconds();
        let dt = if self.clock.is_paused() { 0.0 } else { dt };
        self.captions.tick(now, dt)
    }

    pub fn caption_stats(&self) -> CaptionStats {
        self.captions.stats()
    }

    pub fn state(&self) -> PlaybackState {
        match &self.pipeline {
            None => PlaybackState::Idle,
            Some(p) if p.is_closed() => PlaybackState::Closed,
            Some(p) if p.is_ended() => PlaybackState::Ended,
            Some(_) if self.clock.is_paused() => PlaybackState::Paused,
            Some(_) => PlaybackState::Playing,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.clock.is_paused()
    }

    /// 主生产线程退出即为结束
    pub fn is_ended(&self) -> bool {
        self.pipeline.as_ref().map_or(false, |p| p.is_ended())
    }

    pub fn is_live_stream(&self) -> bool {
        self.pipeline.as_ref().map_or(false, |p| p.is_live())
    }

    /// 当前播放位置（微秒）
    pub fn get_duration_us(&self) -> i64 {
        self.clock.now_us()
    }

    /// 总时长（微秒），直播为 0
    pub fn get_length_us(&self) -> i64 {
        self.pipeline
            .as_ref()
            .map_or(0, |p| p.media_info().duration_us.max(0))
    }

    pub fn get_width(&self) -> u32 {
        self.pipeline.as_ref().map_or(0, |p| p.media_info().width)
    }

    pub fn get_height(&self) -> u32 {
        self.pipeline.as_ref().map_or(0, |p| p.media_info().height)
    }

    pub fn media_info(&self) -> Option<MediaInfo> {
        self.pipeline.as_ref().map(|p| p.media_info().clone())
    }

    pub fn buffer_status(&self) -> BufferStatus {
        self.pipeline
            .as_ref()
            .map(|p| p.buffer_status())
            .unwrap_or_default()
    }

    /// 停止同步线程并关闭管线（幂等）
    pub fn close(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.sync_thread.take() {
            if handle.join().is_err() {
                error!("{} ❌ 同步线程 panic", log_ctx());
            }
        }
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.close();
        }
        self.shared.current_video.lock().take();
        for sink in self.shared.audio_sinks.read().iter() {
            sink.reset();
        }
        self.captions.reset();
        self.clock.pause();
    }
}

impl Drop for PlaybackManager {
    fn drop(&mut self) {
        self.close();
    }
}

/// 音画同步循环（在独立线程中运行）
///
/// 以主时钟帧的 pts 差除以速度作为节拍；有音频时丢弃落后于音频的视频帧。
fn sync_loop(
    shared: Arc<SyncShared>,
    pipeline: Arc<DecoderPipeline>,
    clock: PlaybackClock,
    config: SyncConfig,
) {
    let audio_led = pipeline.has_audio();
    let fallback = Duration::from_millis(config.fallback_interval_ms.max(1));
    let paused_poll = Duration::from_millis(config.paused_poll_ms.max(1));
    info!(
        "{} 🎵 同步线程启动（{}为主时钟）",
        log_ctx(),
        if audio_led { "音频" } else { "视频" }
    );

    let mut held: Option<(u64, MasterFrame)> = None;
    let mut deadline: Option<Instant> = None;
    let mut delivered: u64 = 0;

    while !shared.stop.load(Ordering::SeqCst) {
        if clock.is_paused() {
            deadline = None;
            thread::sleep(paused_poll);
            continue;
        }

        let (generation, frame) = match held.take() {
            Some(entry) => entry,
            None => {
                let generation = shared.seek_generation.load(Ordering::SeqCst);
                match pop_master(&pipeline, audio_led, fallback) {
                    Some(frame) => (generation, frame),
                    None => {
                        deadline = None;
                        if master_halted(&pipeline, audio_led) {
                            // seek 或循环重启期间队列暂停，等生产线程恢复
                            sleep_until(Instant::now() + fallback, &shared.stop, paused_poll);
                        } else {
                            on_starved(&shared, &pipeline, &clock, audio_led);
                        }
                        continue;
                    }
                }
            }
        };

        {
            let _guard = shared.delivery.lock();
            if generation != shared.seek_generation.load(Ordering::SeqCst) {
                // seek 之前取出的帧
                deadline = None;
                continue;
            }
            if clock.is_paused() {
                held = Some((generation, frame));
                continue;
            }

            let pts = frame.pts();
            match frame {
                MasterFrame::Audio(audio) => {
                    adopt_video_before(&shared, &pipeline, pts);
                    shared.deliver_audio(&audio);
                }
                MasterFrame::Video(video) => {
                    *shared.current_video.lock() = Some(video);
                }
            }
            clock.on_audio_delivered(pts);
            delivered += 1;
            if delivered <= 3 || delivered % 1000 == 0 {
                debug!("{} 交付主时钟帧 #{}: PTS={}us", log_ctx(), delivered, pts);
            }

            let next = peek_master_pts(&pipeline, audio_led);
            let speed = *shared.speed.lock();
            let interval = pacing_interval(pts, next, speed, fallback);

            let now = Instant::now();
            let base = match deadline {
                Some(d) if d + MAX_PACING_LAG > now => d,
                _ => now,
            };
            deadline = Some(base + interval);
        }

        if let Some(target) = deadline {
            sleep_until(target, &shared.stop, paused_poll);
        }
    }

    info!("{} 🛑 同步线程退出（交付 {} 帧）", log_ctx(), delivered);
}

fn pop_master(pipeline: &DecoderPipeline, audio_led: bool, timeout: Duration) -> Option<MasterFrame> {
    if audio_led {
        pipeline.audio_queue().pop_timeout(timeout).map(MasterFrame::Audio)
    } else {
        pipeline.video_queue().pop_timeout(timeout).map(MasterFrame::Video)
    }
}

fn master_halted(pipeline: &DecoderPipeline, audio_led: bool) -> bool {
    if audio_led {
        pipeline.audio_queue().is_stopped()
    } else {
        pipeline.video_queue().is_stopped()
    }
}

fn peek_master_pts(pipeline: &DecoderPipeline, audio_led: bool) -> Option<i64> {
    if audio_led {
        pipeline.audio_queue().peek_pts()
    } else {
        pipeline.video_queue().peek_pts()
    }
}

/// 取出所有早于音频时间的视频帧，只保留最新的一帧作为当前帧
fn adopt_video_before(shared: &SyncShared, pipeline: &DecoderPipeline, audio_pts: i64) {
    let mut latest = None;
    let mut dropped = 0;
    while let Some(frame) = pipeline.video_queue().pop_before(audio_pts) {
        if latest.replace(frame).is_some() {
            dropped += 1;
        }
    }
    if dropped > 0 {
        debug!("{} 丢弃 {} 个落后的视频帧", log_ctx(), dropped);
    }
    if let Some(frame) = latest {
        *shared.current_video.lock() = Some(frame);
    }
}

/// 主队列取不到帧：流已结束时按需循环
fn on_starved(shared: &SyncShared, pipeline: &DecoderPipeline, clock: &PlaybackClock, audio_led: bool) {
    let master_empty = if audio_led {
        pipeline.audio_queue().is_empty()
    } else {
        pipeline.video_queue().is_empty()
    };
    if !pipeline.is_ended() || !master_empty || pipeline.is_closed() {
        return;
    }
    if !shared.looping.load(Ordering::SeqCst) || pipeline.is_live() {
        return;
    }

    info!("{} 🔁 播放结束，循环到开头", log_ctx());
    match pipeline.seek(0) {
        Ok(target) => {
            let _guard = shared.delivery.lock();
            shared.invalidate(clock, target);
        }
        Err(e) => error!("{} ❌ 循环 seek 失败: {}", log_ctx(), e),
    }
}

/// 帧间隔 = pts 差 / 速度；差值无效时使用兜底间隔
fn pacing_interval(pts: i64, next_pts: Option<i64>, speed: f32, fallback: Duration) -> Duration {
    let delta = match next_pts {
        Some(next) if next > pts => next - pts,
        _ => return fallback,
    };
    let speed = if speed > 0.0 { speed as f64 } else { 1.0 };
    let micros = (delta as f64 / speed) as u64;
    Duration::from_micros(micros).min(MAX_PACING_INTERVAL)
}

/// 分段休眠，期间响应停止标志
fn sleep_until(deadline: Instant, stop: &AtomicBool, step: Duration) {
    loop {
        let now = Instant::now();
        if now >= deadline || stop.load(Ordering::SeqCst) {
            return;
        }
        thread::sleep((deadline - now).min(step));
    }
}
