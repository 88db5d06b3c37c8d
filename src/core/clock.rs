use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// 播放时钟 - 用于音视频同步
///
/// 音频为主时钟：同步线程每交付一个音频帧就调用 `on_audio_delivered`。
/// 点播和直播的当前时间计算方式不同：
/// - 点播播放中：`base_duration + 墙钟经过时间`
/// - 点播暂停：最近交付的音频帧 pts
/// - 直播播放中：最近交付的音频帧 pts（不做墙钟外推）
/// - 直播暂停：0
#[derive(Clone)]
pub struct PlaybackClock {
    inner: Arc<Mutex<ClockInner>>,
}

struct ClockInner {
    audio_pts: i64,      // 最近交付的音频帧 PTS（微秒）
    base_time: Instant,  // 基准时刻
    base_duration: i64,  // 基准位置（微秒，仅点播使用）
    paused: bool,
    live: bool,
}

impl ClockInner {
    fn now_us(&self) -> i64 {
        match (self.live, self.paused) {
            (false, false) => {
                self.base_duration + self.base_time.elapsed().as_micros() as i64
            }
            (false, true) => self.audio_pts,
            (true, false) => self.audio_pts,
            (true, true) => 0,
        }
    }
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                audio_pts: 0,
                base_time: Instant::now(),
                base_duration: 0,
                paused: true,
                live: false,
            })),
        }
    }

    /// 获取当前播放时间（微秒）
    pub fn now_us(&self) -> i64 {
        self.inner.lock().now_us()
    }

    /// 当前播放时间（秒），弹幕调度使用
    pub fn now_seconds(&self) -> f64 {
        self.now_us() as f64 / 1_000_000.0
    }

    /// 最近交付的音频帧 PTS
    pub fn audio_pts(&self) -> i64 {
        self.inner.lock().audio_pts
    }

    /// 同步线程交付音频帧后调用
    pub fn on_audio_delivered(&self, pts: i64) {
        self.inner.lock().audio_pts = pts;
    }

    /// 设置播放位置（seek 后重新锚定）
    pub fn set_time(&self, pts: i64) {
        let mut inner = self.inner.lock();
        inner.audio_pts = pts;
        inner.base_duration = pts;
        inner.base_time = Instant::now();
    }

    /// 开始播放
    pub fn play(&self) {
        let mut inner = self.inner.lock();
        if inner.paused {
            if !inner.live {
                inner.base_duration = inner.audio_pts;
            }
            inner.base_time = Instant::now();
            inner.paused = false;
        }
    }

    /// 暂停播放，点播停在最近交付的音频帧上
    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        inner.paused = true;
    }

    pub fn set_live(&self, live: bool) {
        self.inner.lock().live = live;
    }

    /// 直播流重启时清零
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.audio_pts = 0;
        inner.base_duration = 0;
        inner.base_time = Instant::now();
    }

    /// 是否暂停
    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    pub fn is_live(&self) -> bool {
        self.inner.lock().live
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}
