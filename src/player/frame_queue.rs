//! 有界帧队列
//!
//! 解码线程 push、同步线程 pop。满时 push 阻塞（背压），空时 pop 限时等待。
//! 帧是独占所有权的值：出队的帧交给调用者，清空时留在队列里的帧被 drop。

use crate::core::Timestamped;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// 有界帧队列
pub struct FrameQueue<T> {
    frames: Mutex<VecDeque<T>>,
    capacity: usize,
    /// 有帧可取
    frame_available: Condvar,
    /// 有空位可写
    space_available: Condvar,
    /// 停止后 push 直接把帧退回给调用者
    stopped: AtomicBool,
}

impl<T: Timestamped> FrameQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            frame_available: Condvar::new(),
            space_available: Condvar::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// 阻塞写入。队列已停止时返回 Err(frame)，由调用者负责释放。
    pub fn push(&self, frame: T) -> Result<(), T> {
        let mut frames = self.frames.lock();
        while frames.len() >= self.capacity {
            if self.stopped.load(Ordering::Acquire) {
                return Err(frame);
            }
            self.space_available.wait(&mut frames);
        }
        if self.stopped.load(Ordering::Acquire) {
            return Err(frame);
        }
        frames.push_back(frame);
        self.frame_available.notify_one();
        Ok(())
    }

    /// 非阻塞写入，队列满或已停止时退回
    pub fn try_push(&self, frame: T) -> Result<(), T> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(frame);
        }
        let mut frames = self.frames.lock();
        if frames.len() >= self.capacity {
            return Err(frame);
        }
        frames.push_back(frame);
        self.frame_available.notify_one();
        Ok(())
    }

    /// 非阻塞取出队首
    pub fn pop(&self) -> Option<T> {
        let mut frames = self.frames.lock();
        let frame = frames.pop_front();
        if frame.is_some() {
            self.space_available.notify_one();
        }
        frame
    }

    /// 限时等待取出队首
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut frames = self.frames.lock();
        while frames.is_empty() {
            if self.stopped.load(Ordering::Acquire) {
                return None;
            }
            if self.frame_available.wait_until(&mut frames, deadline).timed_out() {
                break;
            }
        }
        let frame = frames.pop_front();
        if frame.is_some() {
            self.space_available.notify_one();
        }
        frame
    }

    /// 若队首 pts 严格小于 `pts` 则取出
    pub fn pop_before(&self, pts: i64) -> Option<T> {
        let mut frames = self.frames.lock();
        if frames.front().map(|f| f.pts() < pts).unwrap_or(false) {
            let frame = frames.pop_front();
            self.space_available.notify_one();
            frame
        } else {
            None
        }
    }

    /// 队首 pts
    pub fn peek_pts(&self) -> Option<i64> {
        self.frames.lock().front().map(|f| f.pts())
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.frames.lock().len() >= self.capacity
    }

    /// 清空并释放所有排队的帧，返回释放数量
    pub fn clear(&self) -> usize {
        let drained: Vec<T> = {
            let mut frames = self.frames.lock();
            frames.drain(..).collect()
        };
        self.space_available.notify_all();
        // 在锁外释放，避免大帧析构拖住生产者
        let count = drained.len();
        drop(drained);
        count
    }

    /// 停止队列：唤醒所有阻塞的 push/pop
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        // 持锁再通知，避免和正在进入 wait 的线程错过信号
        let _guard = self.frames.lock();
        self.space_available.notify_all();
        self.frame_available.notify_all();
    }

    /// seek 之后重新启用
    pub fn resume(&self) {
        self.stopped.store(false, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    /// 记录释放次数的测试帧
    #[derive(Debug)]
    struct CountedFrame {
        pts: i64,
        released: Arc<AtomicUsize>,
    }

    impl Timestamped for CountedFrame {
        fn pts(&self) -> i64 {
            self.pts
        }
    }

    impl Drop for CountedFrame {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn frame(pts: i64, released: &Arc<AtomicUsize>) -> CountedFrame {
        CountedFrame {
            pts,
            released: released.clone(),
        }
    }

    #[test]
    fn test_fifo_order() {
        let released = Arc::new(AtomicUsize::new(0));
        let queue = FrameQueue::new(4);
        for pts in [10, 20, 30] {
            assert!(queue.push(frame(pts, &released)).is_ok());
        }
        assert_eq!(queue.peek_pts(), Some(10));
        assert_eq!(queue.pop().map(|f| f.pts), Some(10));
        assert_eq!(queue.pop().map(|f| f.pts), Some(20));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_every_frame_released_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let queue = Arc::new(FrameQueue::new(3));

        let producer = {
            let queue = queue.clone();
            let released = released.clone();
            thread::spawn(move || {
                for pts in 0..50 {
                    if let Err(f) = queue.push(frame(pts, &released)) {
                        drop(f);
                    }
                }
            })
        };

        // 消费一部分（producer 会因队列满而阻塞）
        let mut consumed = 0;
        while consumed < 20 {
            if let Some(f) = queue.pop_timeout(Duration::from_millis(50)) {
                drop(f);
                consumed += 1;
            }
        }
        // 剩下的通过 clear 释放
        while !producer.is_finished() {
            queue.clear();
            thread::sleep(Duration::from_millis(1));
        }
        producer.join().unwrap();
        queue.clear();

        assert_eq!(released.load(Ordering::SeqCst), 50);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_stop_returns_frame_to_blocked_producer() {
        let released = Arc::new(AtomicUsize::new(0));
        let queue = Arc::new(FrameQueue::new(1));
        queue.push(frame(0, &released)).unwrap();

        let producer = {
            let queue = queue.clone();
            let released = released.clone();
            thread::spawn(move || queue.push(frame(1, &released)).is_err())
        };
        thread::sleep(Duration::from_millis(20));
        queue.stop();
        assert!(producer.join().unwrap());
        // 被退回的帧在线程内 drop
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(queue.clear(), 1);
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_pop_before_only_takes_older_frames() {
        let released = Arc::new(AtomicUsize::new(0));
        let queue = FrameQueue::new(8);
        for pts in [100, 200, 300] {
            queue.push(frame(pts, &released)).unwrap();
        }
        assert_eq!(queue.pop_before(200).map(|f| f.pts), Some(100));
        assert!(queue.pop_before(200).is_none());
        assert_eq!(queue.peek_pts(), Some(200));
    }

    #[test]
    fn test_pop_timeout_on_empty() {
        let queue: FrameQueue<CountedFrame> = FrameQueue::new(2);
        let start = Instant::now();
        assert!(queue.pop_timeout(Duration::from_millis(15)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_resume_after_stop() {
        let released = Arc::new(AtomicUsize::new(0));
        let queue = FrameQueue::new(2);
        queue.stop();
        assert!(queue.try_push(frame(1, &released)).is_err());
        queue.resume();
        assert!(queue.try_push(frame(2, &released)).is_ok());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
