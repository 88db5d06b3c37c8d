use crate::core::{
    AudioFrame, BufferStatus, DecodedFrame, MediaInfo, PipelineConfig, PlayerError, Result,
    SourceDescriptor, VideoFrame,
};
use crate::player::demuxer::{Demuxer, SessionOptions};
use crate::player::demuxer_source::DecodeSession;
use crate::player::frame_queue::FrameQueue;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

type SharedSession = Arc<Mutex<Option<Box<dyn DecodeSession>>>>;

/// 低开销模式的视频跳帧闸门
///
/// 开启后视频队列超过阈值即停止处理视频帧，直到距离上一次接受视频帧超过空闲间隔才恢复。
/// 关闭时立即清除跳帧状态。
pub struct LowOverheadGate {
    enabled: AtomicBool,
    suppressed: AtomicBool,
    last_accept: Mutex<Instant>,
    queue_threshold: usize,
    idle: Duration,
}

impl LowOverheadGate {
    pub fn new(queue_threshold: usize, idle: Duration) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            suppressed: AtomicBool::new(false),
            last_accept: Mutex::new(Instant::now()),
            queue_threshold,
            idle,
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.suppressed.store(false, Ordering::SeqCst);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::SeqCst)
    }

    /// 当前是否应该处理视频帧
    pub fn should_process(&self, queued_video: usize) -> bool {
        if !self.is_enabled() {
            return true;
        }
        if self.is_suppressed() {
            if self.last_accept.lock().elapsed() > self.idle {
                self.suppressed.store(false, Ordering::SeqCst);
                return true;
            }
            return false;
        }
        if queued_video > self.queue_threshold {
            self.suppressed.store(true, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// 记录一次被接受的视频帧
    pub fn mark_accepted(&self) {
        *self.last_accept.lock() = Instant::now();
    }
}

/// 生产线程角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProducerRole {
    /// 合流会话或视频会话，退出即视为播放结束
    Master,
    /// 拆分流的音频会话，失败只影响音频
    Audio,
}

impl ProducerRole {
    fn name(&self) -> &'static str {
        match self {
            ProducerRole::Master => "decode-master",
            ProducerRole::Audio => "decode-audio",
        }
    }
}

/// 生产线程共享的句柄
#[derive(Clone)]
struct ProducerContext {
    video_queue: Arc<FrameQueue<VideoFrame>>,
    audio_queue: Arc<FrameQueue<AudioFrame>>,
    gate: Arc<LowOverheadGate>,
    closed: Arc<AtomicBool>,
    halted: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
}

#[derive(Default)]
struct Producers {
    master: Option<JoinHandle<()>>,
    audio: Option<JoinHandle<()>>,
}

/// 解码管线
///
/// 一个或两个生产线程从解码会话拉帧，推入有界帧队列（满时阻塞，形成背压）。
/// 会话各自由一把锁保护，seek/close 时持锁，避免与 grab 交错。
pub struct DecoderPipeline {
    config: PipelineConfig,
    master: SharedSession,
    audio: SharedSession,
    has_audio_session: bool,
    ctx: ProducerContext,
    producers: Mutex<Producers>,
    media_info: MediaInfo,
}

impl DecoderPipeline {
    /// 打开媒体源（同步返回打开错误）
    pub fn open(source: &SourceDescriptor, config: PipelineConfig) -> Result<Self> {
        info!("{} 📂 打开媒体源: {}", log_ctx(), source.url);
        let options = SessionOptions::from_source(source, config.network_timeout_us);

        match &source.audio_url {
            Some(audio_url) if source.want_audio => {
                info!("{} 🔀 视频/音频为独立地址，分两路打开", log_ctx());
                let video = Demuxer::open(&source.url, &options.clone().video_only())?;
                let audio = Demuxer::open(audio_url, &options.audio_only())?;
                Ok(Self::from_sessions(Box::new(video), Some(Box::new(audio)), config))
            }
            _ => {
                let muxed = Demuxer::open(&source.url, &options)?;
                Ok(Self::from_sessions(Box::new(muxed), None, config))
            }
        }
    }

    /// 由已打开的会话组装管线
    pub fn from_sessions(
        master: Box<dyn DecodeSession>,
        audio: Option<Box<dyn DecodeSession>>,
        config: PipelineConfig,
    ) -> Self {
        let mut media_info = master.media_info().clone();
        if let Some(audio) = &audio {
            let audio_info = audio.media_info();
            media_info.sample_rate = audio_info.sample_rate;
            media_info.channels = audio_info.channels;
            media_info.audio_codec = audio_info.audio_codec.clone();
            if media_info.duration_us <= 0 {
                media_info.duration_us = audio_info.duration_us;
            }
        }

        let ctx = ProducerContext {
            video_queue: Arc::new(FrameQueue::new(config.video_queue_capacity)),
            audio_queue: Arc::new(FrameQueue::new(config.audio_queue_capacity)),
            gate: Arc::new(LowOverheadGate::new(
                config.low_overhead_queue_threshold,
                Duration::from_millis(config.low_overhead_idle_ms),
            )),
            closed: Arc::new(AtomicBool::new(false)),
            halted: Arc::new(AtomicBool::new(false)),
            ended: Arc::new(AtomicBool::new(false)),
        };

        Self {
            config,
            master: Arc::new(Mutex::new(Some(master))),
            has_audio_session: audio.is_some(),
            audio: Arc::new(Mutex::new(audio)),
            ctx,
            producers: Mutex::new(Producers::default()),
            media_info,
        }
    }

    /// 启动生产线程
    pub fn start(&self) -> Result<()> {
        if self.ctx.closed.load(Ordering::SeqCst) {
            return Err(PlayerError::Closed);
        }
        let mut producers = self.producers.lock();
        if producers.master.is_some() {
            return Ok(());
        }

        self.ctx.halted.store(false, Ordering::SeqCst);
        self.ctx.ended.store(false, Ordering::SeqCst);
        self.ctx.video_queue.resume();
        self.ctx.audio_queue.resume();

        producers.master = Some(spawn_producer(
            ProducerRole::Master,
            self.master.clone(),
            self.ctx.clone(),
        )?);
        if self.has_audio_session {
            producers.audio = Some(spawn_producer(
                ProducerRole::Audio,
                self.audio.clone(),
                self.ctx.clone(),
            )?);
        }
        info!("{} ✅ 生产线程已启动", log_ctx());
        Ok(())
    }

    /// 让生产线程退出并等待（有超时）
    fn halt_producers(&self) {
        self.ctx.halted.store(true, Ordering::SeqCst);
        self.ctx.video_queue.stop();
        self.ctx.audio_queue.stop();

        let timeout = Duration::from_millis(self.config.join_timeout_ms);
        let mut producers = self.producers.lock();
        if let Some(handle) = producers.master.take() {
            join_with_timeout(ProducerRole::Master.name(), handle, timeout);
        }
        if let Some(handle) = producers.audio.take() {
            join_with_timeout(ProducerRole::Audio.name(), handle, timeout);
        }
    }

    /// Seek 到指定位置（微秒），返回实际使用的目标位置
    pub fn seek(&self, target_us: i64) -> Result<i64> {
        if self.ctx.closed.load(Ordering::SeqCst) {
            return Err(PlayerError::Closed);
        }
        if self.media_info.is_live() {
            return Err(PlayerError::Seek("直播流不支持 seek".to_string()));
        }
        let target = target_us.clamp(0, self.media_info.duration_us);
        info!("{} 🎯 管线 Seek 到: {} us", log_ctx(), target);

        self.halt_producers();
        let result = self.seek_sessions(target);

        let video_count = self.ctx.video_queue.clear();
        let audio_count = self.ctx.audio_queue.clear();
        if video_count > 0 || audio_count > 0 {
            info!(
                "{} 🧹 Seek 清空帧队列: {} 视频帧, {} 音频帧",
                log_ctx(),
                video_count,
                audio_count
            );
        }

        // 无论 seek 是否成功都恢复生产
        self.start()?;
        result.map(|_| target)
    }

    /// 同时持有两把会话锁执行 seek
    fn seek_sessions(&self, target: i64) -> Result<()> {
        let mut master = self.master.lock();
        let mut audio = self.audio.lock();
        if let Some(session) = master.as_mut() {
            if !session.is_seekable() {
                return Err(PlayerError::Seek(format!("{} 不支持 seek", session.description())));
            }
            session.seek(target)?;
        }
        if let Some(session) = audio.as_mut() {
            session.seek(target)?;
        }
        Ok(())
    }

    /// 关闭管线（幂等）
    pub fn close(&self) {
        if self.ctx.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("{} ⏹️ 关闭解码管线", log_ctx());
        self.halt_producers();

        let timeout = Duration::from_millis(self.config.join_timeout_ms);
        for (name, session) in [("master", &self.master), ("audio", &self.audio)] {
            match session.try_lock_for(timeout) {
                Some(mut guard) => {
                    if let Some(mut s) = guard.take() {
                        s.stop();
                        debug!("{} 会话已停止: {}", log_ctx(), name);
                    }
                }
                None => warn!("{} ⚠ 等待 {} 会话锁超时，交由线程退出时释放", log_ctx(), name),
            }
        }

        let video_count = self.ctx.video_queue.clear();
        let audio_count = self.ctx.audio_queue.clear();
        self.ctx.ended.store(true, Ordering::SeqCst);
        info!(
            "{} ✅ 解码管线已关闭（释放 {} 视频帧, {} 音频帧）",
            log_ctx(),
            video_count,
            audio_count
        );
    }

    /// 切换低开销模式
    pub fn set_low_overhead(&self, enabled: bool) {
        self.ctx.gate.set_enabled(enabled);
    }

    pub fn is_low_overhead(&self) -> bool {
        self.ctx.gate.is_enabled()
    }

    /// 主生产线程是否已退出
    pub fn is_ended(&self) -> bool {
        self.ctx.ended.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.ctx.closed.load(Ordering::SeqCst)
    }

    pub fn is_live(&self) -> bool {
        self.media_info.is_live()
    }

    /// 是否有音频可作为主时钟
    pub fn has_audio(&self) -> bool {
        self.media_info.has_audio()
    }

    pub fn media_info(&self) -> &MediaInfo {
        &self.media_info
    }

    pub fn video_queue(&self) -> &Arc<FrameQueue<VideoFrame>> {
        &self.ctx.video_queue
    }

    pub fn audio_queue(&self) -> &Arc<FrameQueue<AudioFrame>> {
        &self.ctx.audio_queue
    }

    pub fn buffer_status(&self) -> BufferStatus {
        BufferStatus {
            video_frames: self.ctx.video_queue.len(),
            audio_frames: self.ctx.audio_queue.len(),
            video_suppressed: self.ctx.gate.is_suppressed(),
            ended: self.is_ended(),
        }
    }
}

impl Drop for DecoderPipeline {
    fn drop(&mut self) {
        if !self.ctx.closed.load(Ordering::SeqCst) {
            warn!("{} ⚠ DecoderPipeline 被 drop，但未调用 close()，正在关闭", log_ctx());
            self.close();
        }
    }
}

fn spawn_producer(
    role: ProducerRole,
    session: SharedSession,
    ctx: ProducerContext,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name(role.name().to_string())
        .spawn(move || produce_loop(role, session, ctx))?;
    Ok(handle)
}

/// 生产循环（在独立线程中运行）
///
/// 失败只记录日志，不向调用者传播；主会话退出时标记 ended。
fn produce_loop(role: ProducerRole, session: SharedSession, ctx: ProducerContext) {
    info!("{} 🎬 生产线程启动: {}", log_ctx(), role.name());

    let mut video_count: usize = 0;
    let mut audio_count: usize = 0;
    let mut skipped_count: usize = 0;
    const LOG_FIRST_N: usize = 5;

    loop {
        if ctx.closed.load(Ordering::SeqCst) || ctx.halted.load(Ordering::SeqCst) {
            break;
        }

        let convert_video = ctx.gate.should_process(ctx.video_queue.len());
        let grabbed = {
            let mut guard = session.lock();
            match guard.as_mut() {
                Some(s) => s.grab(convert_video),
                None => break,
            }
        };

        match grabbed {
            Ok(Some(DecodedFrame::Video(frame))) => {
                video_count += 1;
                if video_count <= LOG_FIRST_N || video_count % 500 == 0 {
                    debug!("{} 🎬 视频帧 #{}: PTS={}us", log_ctx(), video_count, frame.pts);
                }
                ctx.gate.mark_accepted();
                if ctx.video_queue.push(frame).is_err() {
                    // 队列已停止，帧在这里被释放
                    break;
                }
            }
            Ok(Some(DecodedFrame::SkippedVideo { pts })) => {
                skipped_count += 1;
                if skipped_count % 100 == 1 {
                    debug!("{} 💤 低开销模式跳过视频帧: PTS={}us", log_ctx(), pts);
                }
            }
            Ok(Some(DecodedFrame::Audio(frame))) => {
                audio_count += 1;
                if audio_count <= LOG_FIRST_N || audio_count % 1000 == 0 {
                    debug!("{} 🔊 音频帧 #{}: PTS={}us", log_ctx(), audio_count, frame.pts);
                }
                if ctx.audio_queue.push(frame).is_err() {
                    break;
                }
            }
            Ok(None) => {
                info!("{} 📄 {} 到达流末尾", log_ctx(), role.name());
                break;
            }
            Err(e) => {
                error!("{} ❌ {} 拉帧失败: {}", log_ctx(), role.name(), e);
                break;
            }
        }
    }

    if role == ProducerRole::Master && !ctx.halted.load(Ordering::SeqCst) {
        ctx.ended.store(true, Ordering::SeqCst);
    }

    info!(
        "{} 🛑 生产线程退出: {}（{} 视频帧, {} 音频帧, {} 跳过）",
        log_ctx(),
        role.name(),
        video_count,
        audio_count,
        skipped_count
    );
}

/// 限时 join，超时后放弃等待（线程会在下一次检查标志时自行退出）
fn join_with_timeout(name: &str, handle: JoinHandle<()>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(2));
    }
    if handle.is_finished() {
        if handle.join().is_err() {
            error!("{} ❌ {} 线程 panic", log_ctx(), name);
        }
    } else {
        warn!("{} ⚠ {} 线程未在 {:?} 内退出，放弃等待", log_ctx(), name, timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::test_support::SyntheticSession;

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            video_queue_capacity: 4,
            audio_queue_capacity: 8,
            ..PipelineConfig::default()
        }
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn test_gate_disabled_always_processes() {
        let gate = LowOverheadGate::new(2, Duration::from_millis(100));
        assert!(gate.should_process(100));
        assert!(!gate.is_suppressed());
    }

    #[test]
    fn test_gate_suppresses_then_resumes_after_idle() {
        let gate = LowOverheadGate::new(2, Duration::from_millis(30));
        gate.set_enabled(true);
        gate.mark_accepted();
        assert!(gate.should_process(1));
        assert!(!gate.should_process(3));
        assert!(gate.is_suppressed());
        // 空闲间隔未到，队列变短也不恢复
        assert!(!gate.should_process(0));
        thread::sleep(Duration::from_millis(40));
        assert!(gate.should_process(0));
        assert!(!gate.is_suppressed());
    }

    #[test]
    fn test_gate_toggle_off_flushes_suppression() {
        let gate = LowOverheadGate::new(2, Duration::from_millis(100));
        gate.set_enabled(true);
        gate.mark_accepted();
        assert!(!gate.should_process(5));
        gate.set_enabled(false);
        assert!(!gate.is_suppressed());
        assert!(gate.should_process(5));
    }

    #[test]
    fn test_producers_fill_queues_under_backpressure() {
        let session = SyntheticSession::vod(10_000_000);
        let pipeline = DecoderPipeline::from_sessions(Box::new(session), None, small_config());
        pipeline.start().unwrap();

        assert!(wait_until(Duration::from_secs(1), || {
            pipeline.video_queue().is_full() && pipeline.audio_queue().is_full()
        }));
        // 有界：不会超过容量
        assert_eq!(pipeline.video_queue().len(), 4);
        assert!(!pipeline.is_ended());
        pipeline.close();
    }

    #[test]
    fn test_end_of_stream_sets_ended() {
        let session = SyntheticSession::vod(100_000);
        let pipeline = DecoderPipeline::from_sessions(
            Box::new(session),
            None,
            PipelineConfig {
                video_queue_capacity: 64,
                audio_queue_capacity: 64,
                ..PipelineConfig::default()
            },
        );
        pipeline.start().unwrap();
        assert!(wait_until(Duration::from_secs(1), || pipeline.is_ended()));
        pipeline.close();
    }

    #[test]
    fn test_grab_failure_ends_master() {
        let session = SyntheticSession::vod(10_000_000).fail_after(5);
        let pipeline = DecoderPipeline::from_sessions(Box::new(session), None, small_config());
        pipeline.start().unwrap();
        assert!(wait_until(Duration::from_secs(1), || pipeline.is_ended()));
        pipeline.close();
    }

    #[test]
    fn test_audio_session_failure_keeps_master_running() {
        let video = SyntheticSession::vod(10_000_000).video_only();
        let audio = SyntheticSession::vod(10_000_000).audio_only().fail_after(3);
        let pipeline =
            DecoderPipeline::from_sessions(Box::new(video), Some(Box::new(audio)), small_config());
        pipeline.start().unwrap();
        assert!(wait_until(Duration::from_secs(1), || pipeline.video_queue().is_full()));
        thread::sleep(Duration::from_millis(20));
        assert!(!pipeline.is_ended());
        assert!(pipeline.audio_queue().len() <= 3);
        pipeline.close();
    }

    #[test]
    fn test_seek_clamps_and_refills_from_target() {
        let session = SyntheticSession::vod(10_000_000);
        let seeks = session.seek_log();
        let pipeline = DecoderPipeline::from_sessions(Box::new(session), None, small_config());
        pipeline.start().unwrap();
        assert!(wait_until(Duration::from_secs(1), || pipeline.audio_queue().is_full()));

        assert_eq!(pipeline.seek(5_000_000).unwrap(), 5_000_000);
        assert!(wait_until(Duration::from_secs(1), || !pipeline.audio_queue().is_empty()));
        assert!(pipeline.audio_queue().peek_pts().unwrap() >= 5_000_000);

        assert_eq!(pipeline.seek(99_000_000).unwrap(), 10_000_000);
        assert_eq!(pipeline.seek(-5).unwrap(), 0);
        assert_eq!(*seeks.lock(), vec![5_000_000, 10_000_000, 0]);
        pipeline.close();
    }

    #[test]
    fn test_seek_rejected_on_live() {
        let session = SyntheticSession::live();
        let pipeline = DecoderPipeline::from_sessions(Box::new(session), None, small_config());
        pipeline.start().unwrap();
        assert!(matches!(pipeline.seek(1_000), Err(PlayerError::Seek(_))));
        pipeline.close();
    }

    #[test]
    fn test_close_is_idempotent_and_drains() {
        let session = SyntheticSession::vod(10_000_000);
        let stopped = session.stop_flag();
        let pipeline = DecoderPipeline::from_sessions(Box::new(session), None, small_config());
        pipeline.start().unwrap();
        assert!(wait_until(Duration::from_secs(1), || pipeline.video_queue().is_full()));

        pipeline.close();
        pipeline.close();
        assert!(pipeline.video_queue().is_empty());
        assert!(pipeline.audio_queue().is_empty());
        assert!(stopped.load(Ordering::SeqCst));
        assert!(matches!(pipeline.seek(0), Err(PlayerError::Closed)));
        assert!(matches!(pipeline.start(), Err(PlayerError::Closed)));
    }

    #[test]
    fn test_low_overhead_toggle_resumes_video() {
        let session = SyntheticSession::vod(600_000_000)
            .video_only()
            .paced(Duration::from_millis(1));
        let pipeline = DecoderPipeline::from_sessions(
            Box::new(session),
            None,
            PipelineConfig {
                video_queue_capacity: 16,
                low_overhead_queue_threshold: 2,
                ..PipelineConfig::default()
            },
        );
        pipeline.set_low_overhead(true);
        pipeline.start().unwrap();

        assert!(wait_until(Duration::from_secs(1), || {
            pipeline.buffer_status().video_suppressed
        }));
        let suppressed_len = pipeline.video_queue().len();
        assert!(suppressed_len <= 4);

        // 关闭低开销后立即恢复视频入队
        pipeline.set_low_overhead(false);
        assert!(wait_until(Duration::from_millis(500), || {
            pipeline.video_queue().len() > suppressed_len
        }));
        pipeline.close();
    }
}
