//! 测试用的合成解码会话：按固定间隔生成音频帧（20ms）和视频帧（40ms）

use crate::core::{
    AudioFrame, DecodedFrame, MediaInfo, PixelFormat, PlayerError, Result, VideoFrame,
};
use crate::player::demuxer_source::DecodeSession;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const AUDIO_STEP_US: i64 = 20_000;
pub const VIDEO_STEP_US: i64 = 40_000;
const SAMPLE_RATE: u32 = 48_000;

pub struct SyntheticSession {
    info: MediaInfo,
    video: bool,
    audio: bool,
    next_video: i64,
    next_audio: i64,
    grabbed: usize,
    fail_after: Option<usize>,
    pace: Option<Duration>,
    seeks: Arc<Mutex<Vec<i64>>>,
    stopped: Arc<AtomicBool>,
}

impl SyntheticSession {
    /// 点播（时长为微秒）
    pub fn vod(duration_us: i64) -> Self {
        Self {
            info: MediaInfo {
                duration_us,
                width: 2,
                height: 2,
                fps: 25.0,
                video_codec: "synthetic".to_string(),
                audio_codec: "synthetic".to_string(),
                sample_rate: SAMPLE_RATE,
                channels: 2,
            },
            video: true,
            audio: true,
            next_video: 0,
            next_audio: 0,
            grabbed: 0,
            fail_after: None,
            pace: None,
            seeks: Arc::new(Mutex::new(Vec::new())),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 直播：没有时长，永不结束
    pub fn live() -> Self {
        Self::vod(0)
    }

    pub fn video_only(mut self) -> Self {
        self.audio = false;
        self.info.sample_rate = 0;
        self.info.channels = 0;
        self.info.audio_codec = "none".to_string();
        self
    }

    pub fn audio_only(mut self) -> Self {
        self.video = false;
        self.info.width = 0;
        self.info.height = 0;
        self
    }

    /// 第 n 次 grab 之后返回错误
    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// 每次 grab 休眠，模拟真实解码耗时
    pub fn paced(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    pub fn seek_log(&self) -> Arc<Mutex<Vec<i64>>> {
        self.seeks.clone()
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stopped.clone()
    }

    fn finished(&self, pts: i64) -> bool {
        self.info.duration_us > 0 && pts >= self.info.duration_us
    }
}

impl DecodeSession for SyntheticSession {
    fn grab(&mut self, convert_video: bool) -> Result<Option<DecodedFrame>> {
        if let Some(pace) = self.pace {
            thread::sleep(pace);
        }
        if let Some(limit) = self.fail_after {
            if self.grabbed >= limit {
                return Err(PlayerError::Decode("synthetic failure".to_string()));
            }
        }
        self.grabbed += 1;

        let take_video = match (self.video, self.audio) {
            (true, true) => self.next_video < self.next_audio,
            (video, _) => video,
        };

        if take_video {
            let pts = self.next_video;
            if self.finished(pts) {
                return Ok(None);
            }
            self.next_video += VIDEO_STEP_US;
            if !convert_video {
                return Ok(Some(DecodedFrame::SkippedVideo { pts }));
            }
            let data = vec![0u8; 2 * 2 * PixelFormat::RGBA.channels()];
            Ok(Some(DecodedFrame::Video(VideoFrame::new(
                pts,
                2,
                2,
                PixelFormat::RGBA,
                data,
            ))))
        } else {
            let pts = self.next_audio;
            if self.finished(pts) {
                return Ok(None);
            }
            self.next_audio += AUDIO_STEP_US;
            let samples = (SAMPLE_RATE as i64 * AUDIO_STEP_US / 1_000_000) as usize;
            Ok(Some(DecodedFrame::Audio(AudioFrame::new(
                pts,
                SAMPLE_RATE,
                2,
                vec![0.25; samples * 2],
            ))))
        }
    }

    fn seek(&mut self, timestamp_us: i64) -> Result<()> {
        self.seeks.lock().push(timestamp_us);
        // 对齐到帧边界
        self.next_audio = timestamp_us - timestamp_us % AUDIO_STEP_US;
        self.next_video = timestamp_us - timestamp_us % VIDEO_STEP_US;
        Ok(())
    }

    fn media_info(&self) -> &MediaInfo {
        &self.info
    }

    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn description(&self) -> String {
        "SyntheticSession".to_string()
    }
}
