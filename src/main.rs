use anyhow::{Context, Result};
use crossbeam_channel::unbounded;
use danmaku_player::danmaku::CaptionTrack;
use danmaku_player::player::{AudioOutput, PipelineCreationResult, PipelineFactory, PlaybackManager};
use danmaku_player::{PlayerConfig, SourceDescriptor};
use log::{info, warn};
use std::thread;
use std::time::{Duration, Instant};

/// 等待管线创建的上限
const OPEN_TIMEOUT: Duration = Duration::from_secs(30);
const TICK: Duration = Duration::from_millis(16);

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("🎬 Danmaku Player 启动");

    // 初始化 FFmpeg
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("FFmpeg 初始化失败: {}", e))?;
    info!("✅ FFmpeg 初始化成功");

    let mut args = std::env::args().skip(1);
    let url = args
        .next()
        .context("用法: danmaku_player <url> [captions.json] [config.json]")?;
    let captions_path = args.next();
    let config = match args.next() {
        Some(path) => PlayerConfig::from_file(&path)?,
        None => PlayerConfig::default(),
    };

    let mut manager = PlaybackManager::new(config.clone());
    if let Some(path) = captions_path {
        manager.load_captions(CaptionTrack::from_json_file(&path)?);
    }
    // 没有字体时按字符数估算宽度
    manager.set_text_measure(Box::new(|text: &str| {
        Some(text.chars().count() as f32 * 0.025)
    }));

    let (tx, rx) = unbounded();
    PipelineFactory::open_async(SourceDescriptor::new(url), config.pipeline.clone(), tx);
    let pipeline = match rx.recv_timeout(OPEN_TIMEOUT)? {
        PipelineCreationResult::Success { pipeline, url } => {
            info!("✅ 已打开: {}", url);
            pipeline
        }
        PipelineCreationResult::Failed { url, error } => {
            anyhow::bail!("打开 {} 失败: {}", url, error);
        }
    };

    let media_info = manager.attach_pipeline(pipeline)?;

    // 音频输出失败时继续无声播放
    let mut audio_output = None;
    if media_info.has_audio() {
        match AudioOutput::new(media_info.sample_rate, media_info.channels) {
            Ok(mut output) => {
                output.start()?;
                let (rate, channels) = output.get_config();
                info!("🔊 音频输出: {} Hz, {} 声道", rate, channels);
                manager.bind_audio_sink(output.feed());
                audio_output = Some(output);
            }
            Err(e) => warn!("⚠️ 创建音频输出失败，静音播放: {}", e),
        }
    }

    manager.play();

    let mut last_tick = Instant::now();
    let mut last_report = Instant::now();
    loop {
        thread::sleep(TICK);
        let dt = last_tick.elapsed().as_secs_f32();
        last_tick = Instant::now();

        // 没有纹理端，取走帧即释放
        drop(manager.take_video_frame());
        let active = manager.advance_captions(dt).len();

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            let status = manager.buffer_status();
            let buffered = audio_output.as_ref().map_or(0, |o| o.feed().buffered());
            info!(
                "⏱️ {:.2}s / {:.2}s | 弹幕 {} | 视频队列 {} 音频队列 {} | 设备缓冲 {}",
                manager.get_duration_us() as f64 / 1_000_000.0,
                manager.get_length_us() as f64 / 1_000_000.0,
                active,
                status.video_frames,
                status.audio_frames,
                buffered
            );
        }

        // 生产线程结束且主时钟队列已排空
        let status = manager.buffer_status();
        let drained = if media_info.has_audio() {
            status.audio_frames == 0
        } else {
            status.video_frames == 0
        };
        if manager.is_ended() && !manager.is_looping() && drained {
            break;
        }
    }

    info!("📄 播放结束，弹幕统计: {:?}", manager.caption_stats());
    manager.close();
    if let Some(mut output) = audio_output {
        output.stop();
    }
    Ok(())
}
