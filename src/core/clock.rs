use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// 播放时钟 - 解码循环按帧 PTS 对齐到墙钟
#[derive(Clone)]
pub struct PlaybackClock {
    inner: Arc<Mutex<ClockInner>>,
}

struct ClockInner {
    base_pts: i64,         // 基准 PTS（毫秒）
    base_instant: Instant, // 基准时刻
    paused: bool,
    paused_at: i64, // 暂停时的位置
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                base_pts: 0,
                base_instant: Instant::now(),
                paused: true,
                paused_at: 0,
            })),
        }
    }

    /// 获取当前播放时间（毫秒）
    pub fn now(&self) -> i64 {
        let inner = self.inner.lock();
        Self::now_unlocked(&inner)
    }

    /// 设置播放位置（Seek 后预设）
    pub fn set_time(&self, pts: i64) {
        let mut inner = self.inner.lock();
        inner.base_pts = pts;
        inner.base_instant = Instant::now();
        inner.paused_at = pts;
    }

    /// 开始走时
    pub fn play(&self) {
        let mut inner = self.inner.lock();
        if inner.paused {
            inner.base_pts = inner.paused_at;
            inner.base_instant = Instant::now();
            inner.paused = false;
        }
    }

    /// 暂停走时
    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        if !inner.paused {
            inner.paused_at = Self::now_unlocked(&inner);
            inner.paused = true;
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    fn now_unlocked(inner: &ClockInner) -> i64 {
        if inner.paused {
            inner.paused_at
        } else {
            inner.base_pts + inner.base_instant.elapsed().as_millis() as i64
        }
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}
