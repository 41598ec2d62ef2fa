use crate::core::PlaybackState;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;

/// 引擎对外的通知事件
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StateChanged(PlaybackState),
    PositionChanged(i64),
    DurationChanged(i64),
    MediaOpened(String),
    Error(String),
    Finished,
}

/// 通知通道 - 持有方轮询 Receiver 获取事件
///
/// 每次 subscribe 注册一个独立订阅者，每个订阅者都按发出顺序
/// 收到全量事件（扇出，不是竞争消费）。
///
/// 发射规则在这里集中执行：
/// - 状态事件去重：连续两次相同状态只报一次
/// - 位置事件只在值变化时发出
/// - 时长事件一次会话至多一次，且仅当时长已知非零
/// - finished 一次会话至多一次（stop 与自然播完竞态也只报一次）
#[derive(Clone)]
pub struct EventHub {
    senders: Arc<Mutex<Vec<Sender<PlayerEvent>>>>,
    emitted: Arc<Mutex<EmitState>>,
}

#[derive(Default)]
struct EmitState {
    state: Option<PlaybackState>,
    position: Option<i64>,
    duration_sent: bool,
    finished_sent: bool,
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            senders: Arc::new(Mutex::new(Vec::new())),
            emitted: Arc::new(Mutex::new(EmitState::default())),
        }
    }

    /// 注册一个新订阅者，返回其独立的事件接收端
    ///
    /// 订阅只对之后发出的事件生效，不回放历史。
    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        let (tx, rx) = unbounded();
        self.senders.lock().push(tx);
        rx
    }

    /// 新会话开始：位置/时长/finished 的去重记录清零
    ///
    /// 状态去重不清零 —— 状态流跨会话连续。
    pub fn reset_session(&self) {
        let mut emitted = self.emitted.lock();
        emitted.position = None;
        emitted.duration_sent = false;
        emitted.finished_sent = false;
    }

    /// 扇出到所有订阅者；已断开的顺手剔除
    fn send(&self, event: PlayerEvent) {
        self.senders
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn emit_state(&self, state: PlaybackState) {
        let mut emitted = self.emitted.lock();
        if emitted.state == Some(state) {
            return;
        }
        emitted.state = Some(state);
        self.send(PlayerEvent::StateChanged(state));
    }

    pub fn emit_position(&self, position: i64) {
        let mut emitted = self.emitted.lock();
        if emitted.position == Some(position) {
            return;
        }
        emitted.position = Some(position);
        self.send(PlayerEvent::PositionChanged(position));
    }

    pub fn emit_duration(&self, duration: i64) {
        let mut emitted = self.emitted.lock();
        if emitted.duration_sent || duration <= 0 {
            return;
        }
        emitted.duration_sent = true;
        self.send(PlayerEvent::DurationChanged(duration));
    }

    pub fn emit_opened(&self, uri: &str) {
        self.send(PlayerEvent::MediaOpened(uri.to_string()));
    }

    pub fn emit_error(&self, message: String) {
        self.send(PlayerEvent::Error(message));
    }

    pub fn emit_finished(&self) {
        let mut emitted = self.emitted.lock();
        if emitted.finished_sent {
            return;
        }
        emitted.finished_sent = true;
        self.send(PlayerEvent::Finished);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
