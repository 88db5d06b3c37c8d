//! 弹幕调度：时间轴 → 轨道分配 → 每帧移动与回收

use crate::core::CaptionConfig;
use crate::danmaku::event::{CaptionEvent, CaptionKind, CaptionTrack};
use crate::danmaku::lanes::{scroll_lane_fits, LaneSet, ScrollGeometry};
use crate::danmaku::timeline::TimelineCursor;
use log::{debug, info};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};

/// 时间倒退超过该值（秒）视为 seek，整体重置；更小的回退当作时钟抖动忽略
const BACKWARD_TOLERANCE: f64 = 0.25;

/// 文本测量：返回按画面宽度归一化的宽度，字体未就绪时返回 None
pub trait TextMeasure: Send {
    fn measure(&self, text: &str) -> Option<f32>;
}

impl<F> TextMeasure for F
where
    F: Fn(&str) -> Option<f32> + Send,
{
    fn measure(&self, text: &str) -> Option<f32> {
        self(text)
    }
}

/// 屏幕上的一条弹幕
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptionEntity {
    pub id: u64,
    /// 弹幕轨中的下标
    pub event: usize,
    pub kind: CaptionKind,
    pub lane: usize,
    /// 左边缘位置（0 为左边界，1 为右边界）
    pub position: f32,
    pub width: f32,
    /// 滚动速度（每秒归一化距离），固定弹幕为 0
    pub speed: f32,
    /// 固定弹幕剩余显示时间（秒）
    pub remaining: f32,
    pub text: String,
    pub color: u32,
}

impl CaptionEntity {
    fn geometry(&self) -> ScrollGeometry {
        ScrollGeometry {
            x: self.position,
            width: self.width,
            speed: self.speed,
        }
    }
}

/// `spawn` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnOutcome {
    Spawned(u64),
    /// 该弹幕已在屏幕上
    AlreadyActive,
    /// 没有测量器或测量失败
    Unmeasured,
    /// 没有可用轨道
    NoLane,
    /// 达到同屏上限
    AtCapacity,
    /// 下标越界
    Unknown,
}

impl SpawnOutcome {
    /// 是否需要留在待生成队列里稍后重试
    pub fn should_retry(&self) -> bool {
        matches!(
            self,
            SpawnOutcome::Unmeasured | SpawnOutcome::NoLane | SpawnOutcome::AtCapacity
        )
    }
}

/// 调度计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptionStats {
    pub spawned: u64,
    /// 生成被推迟的次数
    pub deferred: u64,
    /// 显示窗口过期而放弃的弹幕数
    pub dropped: u64,
    pub retired: u64,
}

pub struct CaptionScheduler {
    config: CaptionConfig,
    track: CaptionTrack,
    cursor: TimelineCursor,
    backlog: VecDeque<usize>,
    entities: Vec<CaptionEntity>,
    active_events: HashSet<usize>,
    scroll_lanes: LaneSet,
    fixed_lanes: LaneSet,
    measure: Option<Box<dyn TextMeasure>>,
    next_id: u64,
    last_time: Option<f64>,
    stats: CaptionStats,
}

impl CaptionScheduler {
    pub fn new(config: CaptionConfig) -> Self {
        Self {
            scroll_lanes: LaneSet::new(config.scroll_lanes),
            fixed_lanes: LaneSet::new(config.fixed_lanes),
            config,
            track: CaptionTrack::default(),
            cursor: TimelineCursor::new(),
            backlog: VecDeque::new(),
            entities: Vec::new(),
            active_events: HashSet::new(),
            measure: None,
            next_id: 1,
            last_time: None,
            stats: CaptionStats::default(),
        }
    }

    /// 替换弹幕轨（同时重置）
    pub fn set_track(&mut self, track: CaptionTrack) {
        info!("💬 弹幕轨已设置: {} 条", track.len());
        self.track = track;
        self.reset();
    }

    pub fn set_text_measure(&mut self, measure: Box<dyn TextMeasure>) {
        self.measure = Some(measure);
    }

    pub fn track(&self) -> &CaptionTrack {
        &self.track
    }

    pub fn active(&self) -> &[CaptionEntity] {
        &self.entities
    }

    pub fn stats(&self) -> CaptionStats {
        self.stats
    }

    /// 清空屏幕、轨道和游标
    pub fn reset(&mut self) {
        self.entities.clear();
        self.active_events.clear();
        self.backlog.clear();
        self.scroll_lanes.clear();
        self.fixed_lanes.clear();
        self.cursor.reset();
        self.last_time = None;
    }

    fn window(&self, event: &CaptionEvent) -> f64 {
        if event.kind.is_fixed() {
            self.config.fixed_duration as f64
        } else {
            self.config.scroll_duration as f64
        }
    }

    /// 每帧调用：`now` 为媒体时间（秒），`dt` 为距离上一帧的秒数
    pub fn tick(&mut self, now: f64, dt: f32) -> &[CaptionEntity] {
        let now = match self.last_time {
            Some(last) if now < last - BACKWARD_TOLERANCE => {
                debug!("弹幕时间倒退 {:.3}s -> {:.3}s，重置", last, now);
                self.reset();
                now
            }
            Some(last) if now < last => last,
            _ => now,
        };
        self.last_time = Some(now);

        self.update(dt);

        let (scroll, fixed) = (
            self.config.scroll_duration as f64,
            self.config.fixed_duration as f64,
        );
        let due = self.cursor.advance(&self.track, now, |event| {
            if event.kind.is_fixed() {
                fixed
            } else {
                scroll
            }
        });
        self.backlog.extend(due);
        self.drain_backlog(now);

        &self.entities
    }

    /// 移动弹幕并回收离开画面或到期的
    fn update(&mut self, dt: f32) {
        let dt = dt.max(0.0);
        let mut retired = Vec::new();
        self.entities.retain_mut(|entity| {
            let alive = if entity.kind.is_fixed() {
                entity.remaining -= dt;
                entity.remaining > 0.0
            } else {
                entity.position -= entity.speed * dt;
                entity.position + entity.width >= 0.0
            };
            if !alive {
                retired.push((entity.id, entity.event, entity.kind, entity.lane));
            }
            alive
        });

        for (id, event, kind, lane) in retired {
            let lanes = if kind.is_fixed() {
                &mut self.fixed_lanes
            } else {
                &mut self.scroll_lanes
            };
            lanes.release(lane, id);
            self.active_events.remove(&event);
            self.stats.retired += 1;
        }
    }

    /// 按到达顺序尝试生成。每帧的尝试次数受 `max_spawns_per_tick` 限制，
    /// 某组轨道已满后同组剩余的弹幕直接推迟，不再测量。
    fn drain_backlog(&mut self, now: f64) {
        let mut attempts = 0;
        let mut scroll_full = false;
        let mut fixed_full = false;
        let mut at_capacity = false;
        let mut retry = VecDeque::with_capacity(self.backlog.len());

        while let Some(index) = self.backlog.pop_front() {
            let (expired, fixed) = match self.track.get(index) {
                Some(event) => (event.time + self.window(event) < now, event.kind.is_fixed()),
                None => (true, false),
            };
            if expired {
                self.stats.dropped += 1;
                continue;
            }
            if at_capacity || (fixed && fixed_full) || (!fixed && scroll_full) {
                self.stats.deferred += 1;
                retry.push_back(index);
                continue;
            }
            if attempts >= self.config.max_spawns_per_tick {
                retry.push_back(index);
                continue;
            }

            attempts += 1;
            let outcome = self.spawn(index);
            if !outcome.should_retry() {
                continue;
            }
            self.stats.deferred += 1;
            retry.push_back(index);
            match outcome {
                SpawnOutcome::NoLane if fixed => fixed_full = true,
                SpawnOutcome::NoLane => scroll_full = true,
                SpawnOutcome::AtCapacity => at_capacity = true,
                _ => {}
            }
        }

        self.backlog = retry;
    }

    /// 尝试为弹幕分配轨道并生成实体（同一弹幕在屏幕上时幂等）
    pub fn spawn(&mut self, index: usize) -> SpawnOutcome {
        if self.active_events.contains(&index) {
            return SpawnOutcome::AlreadyActive;
        }
        let Some(event) = self.track.get(index) else {
            return SpawnOutcome::Unknown;
        };
        if self.entities.len() >= self.config.max_active {
            return SpawnOutcome::AtCapacity;
        }
        let Some(width) = self
            .measure
            .as_ref()
            .and_then(|m| m.measure(&event.text))
            .filter(|w| w.is_finite() && *w > 0.0)
        else {
            return SpawnOutcome::Unmeasured;
        };

        let (lane, position, speed, remaining) = match event.kind {
            CaptionKind::Scroll => {
                let speed = (1.0 + width) / self.config.scroll_duration.max(f32::EPSILON);
                let entities = &self.entities;
                let lane = self.scroll_lanes.find(false, |occupant| {
                    entities
                        .iter()
                        .find(|e| e.id == occupant)
                        .map_or(true, |e| scroll_lane_fits(&e.geometry(), speed))
                });
                match lane {
                    Some(lane) => (lane, 1.0, speed, 0.0),
                    None => return SpawnOutcome::NoLane,
                }
            }
            kind => {
                let bottom_up = kind == CaptionKind::Bottom;
                match self.fixed_lanes.find(bottom_up, |_| false) {
                    Some(lane) => (
                        lane,
                        ((1.0 - width) / 2.0).max(0.0),
                        0.0,
                        self.config.fixed_duration,
                    ),
                    None => return SpawnOutcome::NoLane,
                }
            }
        };

        let id = self.next_id;
        self.next_id += 1;
        let entity = CaptionEntity {
            id,
            event: index,
            kind: event.kind,
            lane,
            position,
            width,
            speed,
            remaining,
            text: event.text.clone(),
            color: event.color,
        };

        if entity.kind.is_fixed() {
            self.fixed_lanes.claim(lane, id);
        } else {
            self.scroll_lanes.claim(lane, id);
        }
        self.entities.push(entity);
        self.active_events.insert(index);
        self.stats.spawned += 1;
        SpawnOutcome::Spawned(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(scroll_lanes: usize, fixed_lanes: usize) -> CaptionConfig {
        CaptionConfig {
            scroll_lanes,
            fixed_lanes,
            scroll_duration: 8.0,
            fixed_duration: 4.0,
            max_spawns_per_tick: 8,
            max_active: 120,
        }
    }

    fn fixed_width(width: f32) -> Box<dyn TextMeasure> {
        Box::new(move |_: &str| Some(width))
    }

    fn scheduler(events: Vec<CaptionEvent>, config: CaptionConfig) -> CaptionScheduler {
        let mut scheduler = CaptionScheduler::new(config);
        scheduler.set_track(CaptionTrack::new(events));
        scheduler
    }

    fn burst(count: usize, time: f64, kind: CaptionKind) -> Vec<CaptionEvent> {
        (0..count)
            .map(|i| CaptionEvent::new(time, format!("弹幕{}", i), kind))
            .collect()
    }

    fn assert_no_overlap(entities: &[CaptionEntity]) {
        for (i, a) in entities.iter().enumerate() {
            for b in &entities[i + 1..] {
                if a.kind.is_fixed() != b.kind.is_fixed() || a.lane != b.lane {
                    continue;
                }
                let (left, right) = if a.position <= b.position { (a, b) } else { (b, a) };
                assert!(
                    left.position + left.width <= right.position + 1e-4,
                    "lane {} overlap: {:?} vs {:?}",
                    a.lane,
                    left,
                    right
                );
            }
        }
    }

    #[test]
    fn test_k_of_n_lanes_distinct() {
        let mut s = scheduler(burst(5, 1.0, CaptionKind::Scroll), config(3, 2));
        s.set_text_measure(fixed_width(0.3));

        let active = s.tick(1.0, 0.0).to_vec();
        assert_eq!(active.len(), 3);
        let mut lanes: Vec<usize> = active.iter().map(|e| e.lane).collect();
        lanes.sort();
        assert_eq!(lanes, vec![0, 1, 2]);
        assert_eq!(s.stats().deferred, 2);
    }

    #[test]
    fn test_deferred_spawn_after_lane_vacates() {
        let mut s = scheduler(burst(4, 1.0, CaptionKind::Scroll), config(1, 1));
        s.set_text_measure(fixed_width(0.3));

        assert_eq!(s.tick(1.0, 0.0).len(), 1);
        // 速度 = 1.3 / 8，尾部进入画面需要约 1.85 秒
        let mut now = 1.0;
        let mut counts = Vec::new();
        for _ in 0..300 {
            now += 1.0 / 60.0;
            let active = s.tick(now, 1.0 / 60.0);
            assert_no_overlap(active);
            counts.push(active.len());
        }
        assert!(counts.iter().any(|&c| c >= 2));
        assert!(s.stats().spawned >= 2);
    }

    #[test]
    fn test_no_overlap_under_load() {
        let events: Vec<CaptionEvent> = (0..200)
            .map(|i| {
                let kind = match i % 5 {
                    3 => CaptionKind::Top,
                    4 => CaptionKind::Bottom,
                    _ => CaptionKind::Scroll,
                };
                CaptionEvent::new(i as f64 * 0.1, "x".repeat(1 + (i * 7) % 13), kind)
            })
            .collect();
        let mut s = scheduler(events, config(6, 3));
        s.set_text_measure(Box::new(|text: &str| Some(text.chars().count() as f32 * 0.04)));

        let mut now = 0.0;
        for _ in 0..1500 {
            now += 1.0 / 60.0;
            let active = s.tick(now, 1.0 / 60.0);
            assert_no_overlap(active);
            assert!(active.len() <= 120);
        }
        let stats = s.stats();
        assert!(stats.spawned > 0);
        assert!(stats.retired > 0);
    }

    #[test]
    fn test_bottom_scans_bottom_up() {
        let mut s = scheduler(
            vec![
                CaptionEvent::new(1.0, "底1", CaptionKind::Bottom),
                CaptionEvent::new(1.0, "顶1", CaptionKind::Top),
                CaptionEvent::new(1.0, "底2", CaptionKind::Bottom),
            ],
            config(2, 3),
        );
        s.set_text_measure(fixed_width(0.2));
        let active = s.tick(1.0, 0.0).to_vec();
        let lane_of = |text: &str| active.iter().find(|e| e.text == text).map(|e| e.lane);
        assert_eq!(lane_of("底1"), Some(2));
        assert_eq!(lane_of("顶1"), Some(0));
        assert_eq!(lane_of("底2"), Some(1));
        assert!(active.iter().all(|e| (e.position - 0.4).abs() < 1e-6));
    }

    #[test]
    fn test_spawn_is_idempotent() {
        let mut s = scheduler(burst(1, 0.0, CaptionKind::Top), config(1, 2));
        s.set_text_measure(fixed_width(0.2));
        assert!(matches!(s.spawn(0), SpawnOutcome::Spawned(_)));
        assert_eq!(s.spawn(0), SpawnOutcome::AlreadyActive);
        assert_eq!(s.active().len(), 1);
    }

    #[test]
    fn test_missing_measure_defers_then_drops() {
        let mut s = scheduler(burst(1, 0.0, CaptionKind::Top), config(1, 1));
        s.tick(0.0, 0.0);
        assert!(s.active().is_empty());
        assert_eq!(s.stats().deferred, 1);

        // 窗口内补上测量器即可生成
        s.set_text_measure(fixed_width(0.2));
        assert_eq!(s.tick(1.0, 1.0).len(), 1);

        let mut late = scheduler(burst(1, 0.0, CaptionKind::Top), config(1, 1));
        late.tick(0.0, 0.0);
        late.tick(5.0, 5.0);
        assert_eq!(late.stats().dropped, 1);
        late.set_text_measure(fixed_width(0.2));
        assert!(late.tick(5.5, 0.5).is_empty());
    }

    #[test]
    fn test_fixed_retires_and_frees_lane() {
        let mut s = scheduler(
            vec![
                CaptionEvent::new(0.0, "a", CaptionKind::Top),
                CaptionEvent::new(0.0, "b", CaptionKind::Top),
            ],
            config(1, 1),
        );
        s.set_text_measure(fixed_width(0.2));
        assert_eq!(s.tick(0.0, 0.0).len(), 1);
        assert_eq!(s.tick(3.9, 3.9).len(), 1);
        // a 到期回收后 b 在窗口内接上同一条轨道
        let active = s.tick(4.0, 0.2).to_vec();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].text, "b");
        assert_eq!(s.stats().retired, 1);
    }

    #[test]
    fn test_spawn_caps() {
        let mut cfg = config(20, 20);
        cfg.max_spawns_per_tick = 3;
        cfg.max_active = 5;
        let mut s = scheduler(burst(10, 0.0, CaptionKind::Top), cfg);
        s.set_text_measure(fixed_width(0.1));
        assert_eq!(s.tick(0.0, 0.0).len(), 3);
        assert_eq!(s.tick(0.1, 0.1).len(), 5);
        assert_eq!(s.tick(0.2, 0.1).len(), 5);
    }

    #[test]
    fn test_measure_calls_bounded_per_tick() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut s = scheduler(burst(2000, 1.0, CaptionKind::Scroll), config(1, 1));
        s.set_text_measure(Box::new(move |_: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(0.3)
        }));

        assert_eq!(s.tick(1.0, 0.0).len(), 1);
        // 第一条占满唯一的轨道，第二条失败后同组不再测量
        assert_eq!(calls.swap(0, Ordering::SeqCst), 2);
        assert_eq!(s.tick(1.1, 0.1).len(), 1);
        assert_eq!(calls.swap(0, Ordering::SeqCst), 1);

        // 测量一直失败时每帧最多尝试 max_spawns_per_tick 次
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut s = scheduler(burst(500, 1.0, CaptionKind::Top), config(1, 4));
        s.set_text_measure(Box::new(move |_: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            None
        }));
        for step in 0..5 {
            s.tick(1.0 + step as f64 * 0.1, 0.1);
            assert!(calls.swap(0, Ordering::SeqCst) <= 8);
        }
        assert!(s.active().is_empty());
    }

    #[test]
    fn test_seek_backward_resets() {
        let mut s = scheduler(burst(2, 1.0, CaptionKind::Scroll), config(4, 1));
        s.set_text_measure(fixed_width(0.2));
        assert_eq!(s.tick(1.0, 0.0).len(), 2);
        s.tick(3.0, 2.0);
        // 小幅回退当作抖动
        assert_eq!(s.tick(2.9, 0.0).len(), 2);
        // 大幅回退：清屏后重新从头调度
        assert!(s.tick(0.5, 0.0).is_empty());
        assert_eq!(s.tick(1.0, 0.5).len(), 2);
    }
}
