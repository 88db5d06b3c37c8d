use crate::danmaku::event::{CaptionEvent, CaptionTrack};

/// 弹幕时间轴游标
///
/// 每次 `advance` 返回当前时间已到、且仍在显示窗口内的弹幕下标，每条只返回一次。
/// 最多缓存一条尚未到时间的弹幕。时间倒退时自动从头开始。
#[derive(Debug, Clone, Default)]
pub struct TimelineCursor {
    cursor: usize,
    pending: Option<usize>,
    last_time: Option<f64>,
}

impl TimelineCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 推进到 `now`（秒）。`window` 给出每条弹幕的显示时长，超过 `time + window` 的直接跳过。
    pub fn advance<F>(&mut self, track: &CaptionTrack, now: f64, window: F) -> Vec<usize>
    where
        F: Fn(&CaptionEvent) -> f64,
    {
        if self.last_time.map_or(false, |last| now < last) {
            self.reset();
        }
        self.last_time = Some(now);

        let mut due = Vec::new();

        if let Some(index) = self.pending {
            match track.get(index) {
                Some(event) if event.time > now => return due,
                Some(event) => {
                    self.pending = None;
                    if event.time + window(event) >= now {
                        due.push(index);
                    }
                }
                None => self.pending = None,
            }
        }

        while let Some(event) = track.get(self.cursor) {
            let index = self.cursor;
            self.cursor += 1;
            if event.time > now {
                self.pending = Some(index);
                break;
            }
            if event.time + window(event) < now {
                continue;
            }
            due.push(index);
        }
        due
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
        self.pending = None;
        self.last_time = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::danmaku::event::CaptionKind;

    fn track() -> CaptionTrack {
        CaptionTrack::new(vec![
            CaptionEvent::new(1.0, "a", CaptionKind::Scroll),
            CaptionEvent::new(2.0, "b", CaptionKind::Scroll),
            CaptionEvent::new(2.0, "b", CaptionKind::Scroll),
        ])
    }

    fn window(_: &CaptionEvent) -> f64 {
        5.0
    }

    #[test]
    fn test_each_event_emitted_once() {
        let track = track();
        let mut cursor = TimelineCursor::new();
        assert_eq!(cursor.advance(&track, 1.0, window), vec![0]);
        assert!(cursor.advance(&track, 1.5, window).is_empty());
        assert_eq!(cursor.advance(&track, 2.0, window), vec![1]);
        assert!(cursor.advance(&track, 3.0, window).is_empty());
    }

    #[test]
    fn test_future_event_waits_until_due() {
        let track = track();
        assert_eq!(track.len(), 2);
        let mut cursor = TimelineCursor::new();
        let mut emitted = cursor.advance(&track, 1.0, window);
        // 1.5 时 2.0 的弹幕还没到，只给出 1.0 的那条
        emitted.extend(cursor.advance(&track, 1.5, window));
        assert_eq!(emitted, vec![0]);
        emitted.extend(cursor.advance(&track, 2.0, window));
        emitted.extend(cursor.advance(&track, 2.5, window));
        assert_eq!(emitted, vec![0, 1]);
    }

    #[test]
    fn test_backward_time_resets() {
        let track = track();
        let mut cursor = TimelineCursor::new();
        cursor.advance(&track, 1.0, window);
        cursor.advance(&track, 3.0, window);
        assert!(cursor.advance(&track, 0.5, window).is_empty());
        assert_eq!(cursor.advance(&track, 1.2, window), vec![0]);

        cursor.advance(&track, 3.0, window);
        // 倒退到 1.5：1.0 仍在窗口内，重新给出
        assert_eq!(cursor.advance(&track, 1.5, window), vec![0]);
    }

    #[test]
    fn test_expired_events_skipped() {
        let track = track();
        let mut cursor = TimelineCursor::new();
        assert_eq!(cursor.advance(&track, 6.5, window), vec![1]);
        assert!(cursor.advance(&track, 7.0, window).is_empty());
    }

    #[test]
    fn test_jump_emits_all_due() {
        let track = track();
        let mut cursor = TimelineCursor::new();
        assert_eq!(cursor.advance(&track, 2.5, window), vec![0, 1]);
    }
}
