use crate::core::{
    MediaDescriptor, PlaybackClock, PlaybackState, PlayerConfig, PlayerError, Result, SampleFormat,
};
use crate::player::decode_unit::FfmpegDecodeUnit;
use crate::player::events::{EventHub, PlayerEvent};
use crate::player::sink::{AudioSink, VideoSink};
use crate::player::source::DecodeSource;
use crate::core::DecodedFrame;
use crossbeam_channel::Receiver;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// 解码循环空转时的检查间隔
const IDLE_POLL: Duration = Duration::from_millis(5);

/// 一次会话的共享可变状态，单锁保护，杜绝撕裂读
struct Session {
    state: PlaybackState,
    position: i64,
    duration: i64,
    uri: Option<String>,
    descriptor: Option<MediaDescriptor>,
}

impl Session {
    fn new() -> Self {
        Self {
            state: PlaybackState::Stopped,
            position: 0,
            duration: 0,
            uri: None,
            descriptor: None,
        }
    }
}

type SharedSource = Arc<Mutex<Option<Box<dyn DecodeSource>>>>;
type SharedVideoSink = Arc<Mutex<Option<Box<dyn VideoSink>>>>;
type SharedAudioSink = Arc<Mutex<Option<Box<dyn AudioSink>>>>;

/// 播放引擎 - 状态机 + 受监督的解码循环
///
/// 控制操作（open/play/pause/stop/seek/close）在调用方线程上同步
/// 完成状态迁移；帧的生产在独立解码线程上进行。stop/close 保证
/// 解码线程已退出（join）后才释放解码单元，native 资源绝不在
/// 使用中被释放。
pub struct PlaybackEngine {
    session: Arc<Mutex<Session>>,
    source: SharedSource,
    video_sink: SharedVideoSink,
    audio_sink: SharedAudioSink,
    events: EventHub,
    clock: PlaybackClock,
    running: Arc<AtomicBool>,
    // Seek 每成功一次加一；解码线程据此丢弃 flush 前解出的帧
    generation: Arc<AtomicU64>,
    decode_thread: Option<thread::JoinHandle<()>>,
    config: PlayerConfig,
}

impl PlaybackEngine {
    pub fn new(config: PlayerConfig) -> Self {
        info!("创建播放引擎");
        Self {
            session: Arc::new(Mutex::new(Session::new())),
            source: Arc::new(Mutex::new(None)),
            video_sink: Arc::new(Mutex::new(None)),
            audio_sink: Arc::new(Mutex::new(None)),
            events: EventHub::new(),
            clock: PlaybackClock::new(),
            running: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            decode_thread: None,
            config,
        }
    }

    /// 获取事件接收端，持有方轮询获取通知
    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    /// 移交视频输出端所有权；替换时旧输出端被清理并丢弃
    pub fn set_video_sink(&mut self, sink: Box<dyn VideoSink>) {
        let mut guard = self.video_sink.lock();
        if let Some(mut old) = guard.replace(sink) {
            old.cleanup();
        }
    }

    /// 移交音频输出端所有权；替换时旧输出端被清理并丢弃
    pub fn set_audio_sink(&mut self, sink: Box<dyn AudioSink>) {
        let mut guard = self.audio_sink.lock();
        if let Some(mut old) = guard.replace(sink) {
            old.stop();
            old.cleanup();
        }
    }

    // --- 控制操作 ---

    /// 打开媒体资源（FFmpeg 后端）
    pub fn open(&mut self, uri: &str) -> Result<MediaDescriptor> {
        let uri_owned = uri.to_string();
        self.open_with(uri, move || {
            FfmpegDecodeUnit::open(&uri_owned).map(|unit| Box::new(unit) as Box<dyn DecodeSource>)
        })
    }

    /// 附加外部构造的解码单元（测试桩或自定义数据源）
    pub fn open_source(&mut self, uri: &str, source: Box<dyn DecodeSource>) -> Result<MediaDescriptor> {
        self.open_with(uri, move || Ok(source))
    }

    fn open_with<F>(&mut self, uri: &str, load: F) -> Result<MediaDescriptor>
    where
        F: FnOnce() -> Result<Box<dyn DecodeSource>>,
    {
        // 仅 Stopped 或 Error 状态接受 open；Error 状态下的 open 即恢复手段
        {
            let session = self.session.lock();
            if !matches!(session.state, PlaybackState::Stopped | PlaybackState::Error) {
                return Err(PlayerError::InvalidState { op: "open", state: session.state });
            }
        }

        // 清理上一次会话的残留（EOS 后未 join 的线程、旧解码单元）
        self.join_decode_thread();
        self.release_source();

        info!("打开媒体: {}", uri);
        self.events.reset_session();
        self.set_state(PlaybackState::Opening);

        let source = match load() {
            Ok(source) => source,
            Err(e) => {
                let message = format!("打开失败: {}", e);
                error!("{}", message);
                self.fail(message);
                return Err(e);
            }
        };

        let descriptor = source.descriptor().clone();

        // 初始化输出端；失败视为打开失败
        if let Err(e) = self.init_sinks(&descriptor) {
            let message = format!("输出端初始化失败: {}", e);
            error!("{}", message);
            self.fail(message);
            return Err(e);
        }

        *self.source.lock() = Some(source);
        self.clock.set_time(0);

        {
            let mut session = self.session.lock();
            session.uri = Some(uri.to_string());
            session.duration = descriptor.duration;
            session.position = 0;
            session.descriptor = Some(descriptor.clone());
        }

        self.set_state(PlaybackState::Opened);
        self.events.emit_opened(uri);
        self.events.emit_duration(descriptor.duration);

        info!("媒体已打开: {} (时长 {} ms)", uri, descriptor.duration);
        Ok(descriptor)
    }

    /// 开始播放；仅 Opened/Paused 状态有效
    pub fn play(&mut self) -> Result<()> {
        {
            let session = self.session.lock();
            if !matches!(session.state, PlaybackState::Opened | PlaybackState::Paused) {
                return Err(PlayerError::InvalidState { op: "play", state: session.state });
            }
        }

        info!("🎬 播放");
        self.set_state(PlaybackState::Starting);

        // 懒初始化：open 后才移交的输出端在这里补初始化
        if let Some(descriptor) = self.session.lock().descriptor.clone() {
            if let Err(e) = self.init_sinks(&descriptor) {
                let message = format!("输出端初始化失败: {}", e);
                self.fail(message);
                return Err(e);
            }
        }

        if let Err(e) = self.ensure_decode_thread() {
            let message = format!("无法启动播放: {}", e);
            error!("{}", message);
            self.fail(message);
            return Err(e);
        }

        if let Some(sink) = self.audio_sink.lock().as_mut() {
            sink.play();
        }
        self.clock.play();
        self.set_state(PlaybackState::Playing);
        Ok(())
    }

    /// 暂停播放；仅 Playing 状态有效
    ///
    /// 只翻转状态：解码循环在下一次迭代检查时停止产帧，
    /// 本调用不等待、不忙等。
    pub fn pause(&self) -> Result<()> {
        {
            let session = self.session.lock();
            if session.state != PlaybackState::Playing {
                return Err(PlayerError::InvalidState { op: "pause", state: session.state });
            }
        }

        info!("⏸ 暂停");
        self.set_state(PlaybackState::Pausing);
        self.clock.pause();
        if let Some(sink) = self.audio_sink.lock().as_mut() {
            sink.pause();
        }
        self.set_state(PlaybackState::Paused);
        Ok(())
    }

    /// Seek 到指定位置（毫秒）；仅 Playing/Paused 状态有效
    ///
    /// 成功后恢复 seek 前的状态：暂停中 seek 不会恢复播放。
    pub fn seek(&self, position_ms: i64) -> Result<()> {
        let previous = {
            let session = self.session.lock();
            if !matches!(session.state, PlaybackState::Playing | PlaybackState::Paused) {
                return Err(PlayerError::InvalidState { op: "seek", state: session.state });
            }
            session.state
        };

        // 夹到 [0, duration]；时长未知时只夹下界
        let duration = self.session.lock().duration;
        let mut target = position_ms.max(0);
        if duration > 0 {
            target = target.min(duration);
        }

        info!("🎯 Seek 到 {} ms（请求 {} ms）", target, position_ms);
        self.set_state(PlaybackState::Seeking);

        // 与解码循环串行化：循环每迭代持锁解一帧，这里拿到锁时
        // 循环一定不在解码单元内部
        let seek_result = match self.source.lock().as_mut() {
            Some(source) => source.seek(target),
            None => Err(PlayerError::SeekError("没有打开的媒体".to_string())),
        };

        if let Err(e) = seek_result {
            let message = format!("Seek 失败: {}", e);
            error!("{}", message);
            self.fail(message);
            return Err(e);
        }

        // flush 之前解出的帧一律作废
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.clock.set_time(target);

        let changed = {
            let mut session = self.session.lock();
            let changed = session.position != target;
            session.position = target;
            changed
        };
        if changed {
            self.events.emit_position(target);
        }

        self.set_state(previous);
        debug!("Seek 完成: {} ms，恢复状态 {:?}", target, previous);
        Ok(())
    }

    /// 停止播放；Stopped 以外的任意状态有效
    ///
    /// 同步 join 解码线程后才释放解码单元。时长保留到下次 open，
    /// 位置与 URI 清零。
    pub fn stop(&mut self) -> Result<()> {
        {
            let session = self.session.lock();
            if session.state == PlaybackState::Stopped {
                return Err(PlayerError::InvalidState { op: "stop", state: session.state });
            }
        }

        info!("⏹ 停止播放");
        self.set_state(PlaybackState::Stopping);
        self.teardown_session();
        self.set_state(PlaybackState::Stopped);
        self.events.emit_finished();
        info!("停止完成，解码线程已清理");
        Ok(())
    }

    /// 关闭媒体；效果同 stop，另外丢弃输出端所有权并清零时长
    pub fn close(&mut self) -> Result<()> {
        {
            let session = self.session.lock();
            if session.state == PlaybackState::Stopped {
                return Err(PlayerError::InvalidState { op: "close", state: session.state });
            }
        }

        info!("关闭媒体");
        self.set_state(PlaybackState::Closing);
        self.teardown_session();

        {
            let mut session = self.session.lock();
            session.duration = 0;
        }
        if let Some(mut sink) = self.video_sink.lock().take() {
            sink.cleanup();
        }
        if let Some(mut sink) = self.audio_sink.lock().take() {
            sink.stop();
            sink.cleanup();
        }

        self.set_state(PlaybackState::Stopped);
        self.events.emit_finished();
        Ok(())
    }

    /// 设置音量 (0.0 - 1.0)，透传给音频输出端
    pub fn set_volume(&mut self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        self.config.set("audio.volume", volume.to_string());
        if let Some(sink) = self.audio_sink.lock().as_mut() {
            sink.set_volume(volume);
        }
    }

    /// 设置静音，透传给音频输出端
    pub fn set_mute(&mut self, mute: bool) {
        if let Some(sink) = self.audio_sink.lock().as_mut() {
            sink.set_mute(mute);
        }
    }

    // --- 状态查询 ---

    pub fn state(&self) -> PlaybackState {
        self.session.lock().state
    }

    pub fn position(&self) -> i64 {
        self.session.lock().position
    }

    pub fn duration(&self) -> i64 {
        self.session.lock().duration
    }

    pub fn current_uri(&self) -> Option<String> {
        self.session.lock().uri.clone()
    }

    pub fn descriptor(&self) -> Option<MediaDescriptor> {
        self.session.lock().descriptor.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    // --- 内部实现 ---

    /// 状态迁移 + 通知；相同状态不重复通知
    fn set_state(&self, state: PlaybackState) {
        let mut session = self.session.lock();
        if session.state == state {
            return;
        }
        debug!("状态迁移: {:?} -> {:?}", session.state, state);
        session.state = state;
        drop(session);
        self.events.emit_state(state);
    }

    /// 进入 Error 状态并发出错误通知
    fn fail(&self, message: String) {
        self.set_state(PlaybackState::Error);
        self.events.emit_error(message);
    }

    fn init_sinks(&self, descriptor: &MediaDescriptor) -> Result<()> {
        if descriptor.has_video {
            if let Some(sink) = self.video_sink.lock().as_mut() {
                if !sink.is_initialized() && !sink.initialize(descriptor.width, descriptor.height) {
                    return Err(PlayerError::SinkInitError(format!(
                        "视频输出端拒绝 {}x{}",
                        descriptor.width, descriptor.height
                    )));
                }
            }
        }
        if descriptor.has_audio {
            if let Some(sink) = self.audio_sink.lock().as_mut() {
                if !sink.is_initialized()
                    && !sink.initialize(descriptor.sample_rate, descriptor.channels, SampleFormat::F32)
                {
                    return Err(PlayerError::SinkInitError(format!(
                        "音频输出端拒绝 {} Hz/{} 声道",
                        descriptor.sample_rate, descriptor.channels
                    )));
                }
                let volume = self.config.get_f64("audio.volume", 1.0) as f32;
                sink.set_volume(volume);
            }
        }
        Ok(())
    }

    /// 确保解码线程在运行；一次会话至多一个
    fn ensure_decode_thread(&mut self) -> Result<()> {
        let alive = self
            .decode_thread
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false);
        if alive {
            return Ok(());
        }
        // 上一个循环已自行退出（不应发生在 Opened/Paused 路径，防御性回收）
        if let Some(handle) = self.decode_thread.take() {
            let _ = handle.join();
        }

        self.running.store(true, Ordering::SeqCst);
        let worker = DecodeWorker {
            session: Arc::clone(&self.session),
            source: Arc::clone(&self.source),
            video_sink: Arc::clone(&self.video_sink),
            audio_sink: Arc::clone(&self.audio_sink),
            events: self.events.clone(),
            clock: self.clock.clone(),
            running: Arc::clone(&self.running),
            generation: Arc::clone(&self.generation),
            paced: self.config.get_bool("video.pacing", true),
        };
        let handle = thread::Builder::new()
            .name("decode-loop".to_string())
            .spawn(move || worker.run())
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                PlayerError::Other(format!("解码线程创建失败: {}", e))
            })?;
        self.decode_thread = Some(handle);
        debug!("解码线程已启动");
        Ok(())
    }

    /// 停止并 join 解码线程；没有线程时是空操作
    fn join_decode_thread(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.decode_thread.take() {
            let _ = handle.join();
            debug!("解码线程已退出");
        }
    }

    fn release_source(&self) {
        if let Some(mut source) = self.source.lock().take() {
            source.close();
        }
    }

    /// 会话收尾：join 线程 → 停音频 → 释放解码单元 → 复位位置/URI
    ///
    /// join 必须先于释放，保证解码单元不在使用中被销毁。
    fn teardown_session(&mut self) {
        self.join_decode_thread();

        if let Some(sink) = self.audio_sink.lock().as_mut() {
            sink.stop();
        }
        self.release_source();

        self.clock.pause();
        self.clock.set_time(0);

        let mut session = self.session.lock();
        session.position = 0;
        session.uri = None;
        session.descriptor = None;
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        // 析构前强制走 Stopping/Closing 路径，确定性释放 native 资源
        if self.state() != PlaybackState::Stopped {
            if let Err(e) = self.close() {
                warn!("析构时关闭失败: {}", e);
            }
        }
        self.join_decode_thread();
    }
}

/// 解码循环的工作单元，持有所有跨线程共享句柄
struct DecodeWorker {
    session: Arc<Mutex<Session>>,
    source: SharedSource,
    video_sink: SharedVideoSink,
    audio_sink: SharedAudioSink,
    events: EventHub,
    clock: PlaybackClock,
    running: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    paced: bool,
}

impl DecodeWorker {
    fn run(self) {
        debug!("解码循环开始");
        while self.running.load(Ordering::SeqCst) {
            if self.session.lock().state != PlaybackState::Playing {
                thread::sleep(IDLE_POLL);
                continue;
            }

            let generation = self.generation.load(Ordering::SeqCst);

            // 每迭代只在锁内解一帧，给 seek/close 留出串行化窗口
            let outcome = {
                let mut guard = self.source.lock();
                match guard.as_mut() {
                    Some(source) => source.next_frame(),
                    None => break,
                }
            };

            // seek 在解码期间发生：这一帧来自 flush 之前，作废
            if self.generation.load(Ordering::SeqCst) != generation {
                continue;
            }

            match outcome {
                Ok(Some(frame)) => self.deliver(frame, generation),
                Ok(None) => {
                    self.on_end_of_stream();
                    break;
                }
                Err(e) => {
                    self.on_decode_error(e);
                    break;
                }
            }
        }
        debug!("解码循环退出");
    }

    /// 把一帧送到对应输出端并推进播放位置
    ///
    /// 进输出端前再查一次代数：seek 可能在解码解锁之后完成，
    /// flush 前解出的帧不得触达输出端。
    fn deliver(&self, frame: DecodedFrame, generation: u64) {
        let pts = frame.pts();
        match frame {
            DecodedFrame::Video(frame) => {
                // 视频帧按时钟对齐呈现时刻
                if self.paced && !self.wait_until(pts, generation) {
                    return;
                }
                if self.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                if let Some(sink) = self.video_sink.lock().as_mut() {
                    sink.render(frame);
                }
            }
            DecodedFrame::Audio(frame) => {
                if self.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                // 音频交给输出端自行消费，背压由 enqueue 决定
                if let Some(sink) = self.audio_sink.lock().as_mut() {
                    sink.enqueue(frame);
                }
            }
        }
        self.advance_position(pts, generation);
    }

    /// 睡到时钟到达 pts；期间响应停止/暂停/seek。
    /// 返回 false 表示这帧不应再呈现。
    fn wait_until(&self, pts: i64, generation: u64) -> bool {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return false;
            }
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            if self.session.lock().state != PlaybackState::Playing {
                return false;
            }
            let lag = pts - self.clock.now();
            if lag <= 0 {
                return true;
            }
            thread::sleep(Duration::from_millis(lag.min(10) as u64));
        }
    }

    /// 位置只进不退（seek 的跳变由控制线程直接写入）
    ///
    /// 代数检查在会话锁内：seek 先加代数再写位置，所以锁内代数
    /// 未变就能保证本次写入不会盖掉 seek 设下的新位置。
    fn advance_position(&self, pts: i64, generation: u64) {
        let mut session = self.session.lock();
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        let mut next = pts.max(session.position);
        if session.duration > 0 {
            next = next.min(session.duration);
        }
        if next == session.position {
            return;
        }
        session.position = next;
        drop(session);
        self.events.emit_position(next);
    }

    /// 源耗尽：回到 Stopped，位置清零，恰好一次 finished
    fn on_end_of_stream(&self) {
        info!("播放结束（源耗尽）");
        self.running.store(false, Ordering::SeqCst);
        self.clock.pause();
        self.clock.set_time(0);

        if let Some(sink) = self.audio_sink.lock().as_mut() {
            sink.stop();
        }
        // 循环已退出解码单元，这里释放是安全的
        if let Some(mut source) = self.source.lock().take() {
            source.close();
        }

        {
            let mut session = self.session.lock();
            session.position = 0;
            session.uri = None;
            session.descriptor = None;
        }
        let state_changed = {
            let mut session = self.session.lock();
            if session.state == PlaybackState::Stopped {
                false
            } else {
                session.state = PlaybackState::Stopped;
                true
            }
        };
        if state_changed {
            self.events.emit_state(PlaybackState::Stopped);
        }
        self.events.emit_finished();
    }

    /// 中途解码失败：结束播放，进入 Error（策略：不跳帧续播）
    fn on_decode_error(&self, e: PlayerError) {
        let message = format!("解码错误，播放终止: {}", e);
        error!("{}", message);
        self.running.store(false, Ordering::SeqCst);
        self.clock.pause();

        {
            let mut session = self.session.lock();
            session.state = PlaybackState::Error;
        }
        self.events.emit_state(PlaybackState::Error);
        self.events.emit_error(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        AudioFrame, MediaDescriptor, PixelFormat, SampleFormat, StreamSelection, VideoFrame,
    };
    use std::time::Instant;

    const KEYFRAME_INTERVAL_MS: i64 = 1000;

    fn video_frame(pts: i64) -> DecodedFrame {
        DecodedFrame::Video(VideoFrame {
            pts,
            duration: 250,
            width: 4,
            height: 4,
            format: PixelFormat::RGBA,
            stride: 16,
            data: vec![0; 64],
        })
    }

    fn audio_frame(pts: i64) -> DecodedFrame {
        DecodedFrame::Audio(AudioFrame {
            pts,
            duration: 250,
            samples: 1024,
            sample_rate: 48000,
            channels: 2,
            format: SampleFormat::F32,
            data: vec![0.0; 2048],
        })
    }

    /// 每 250ms 一帧的视频脚本，0..duration
    fn video_script(duration: i64) -> Vec<DecodedFrame> {
        (0..duration).step_by(250).map(video_frame).collect()
    }

    /// 脚本化解码源：按预置帧序列吐帧，关键帧每秒一个
    struct ScriptedSource {
        frames: Vec<DecodedFrame>,
        index: usize,
        descriptor: MediaDescriptor,
        fail_seek: bool,
        fail_at: Option<usize>,
        closed: Arc<AtomicBool>,
    }

    impl ScriptedSource {
        fn new(duration: i64, frames: Vec<DecodedFrame>) -> Self {
            let has_video = frames.iter().any(|f| f.is_video());
            let has_audio = frames.iter().any(|f| !f.is_video());
            Self {
                frames,
                index: 0,
                descriptor: MediaDescriptor {
                    duration,
                    has_video,
                    has_audio,
                    width: 4,
                    height: 4,
                    frame_rate: 4.0,
                    sample_rate: if has_audio { 48000 } else { 0 },
                    channels: if has_audio { 2 } else { 0 },
                    video_codec: if has_video { "h264".into() } else { String::new() },
                    audio_codec: if has_audio { "aac".into() } else { String::new() },
                },
                fail_seek: false,
                fail_at: None,
                closed: Arc::new(AtomicBool::new(false)),
            }
        }

        fn closed_flag(&self) -> Arc<AtomicBool> {
            Arc::clone(&self.closed)
        }
    }

    impl DecodeSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Option<DecodedFrame>> {
            if self.fail_at == Some(self.index) {
                return Err(PlayerError::DecodeError("损坏的数据包".to_string()));
            }
            match self.frames.get(self.index) {
                Some(frame) => {
                    self.index += 1;
                    Ok(Some(frame.clone()))
                }
                None => Ok(None),
            }
        }

        fn seek(&mut self, position_ms: i64) -> Result<()> {
            if self.fail_seek {
                return Err(PlayerError::SeekError("后端拒绝定位".to_string()));
            }
            let mut target = position_ms.max(0);
            if self.descriptor.duration > 0 {
                target = target.min(self.descriptor.duration);
            }
            // 向后偏置到最近的关键帧
            let keyframe = (target / KEYFRAME_INTERVAL_MS) * KEYFRAME_INTERVAL_MS;
            self.index = self
                .frames
                .iter()
                .position(|f| f.pts() >= keyframe)
                .unwrap_or(self.frames.len());
            Ok(())
        }

        fn descriptor(&self) -> &MediaDescriptor {
            &self.descriptor
        }

        fn selection(&self) -> StreamSelection {
            StreamSelection {
                video: self.descriptor.has_video.then_some(0),
                audio: self.descriptor.has_audio.then_some(1),
            }
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn description(&self) -> String {
            "脚本化解码源".to_string()
        }
    }

    /// 记录收到的帧和生命周期调用的输出端
    #[derive(Default)]
    struct RecordingVideoSink {
        rendered: Arc<Mutex<Vec<i64>>>,
        initialized: Arc<AtomicBool>,
        cleaned: Arc<AtomicBool>,
        reject_init: bool,
    }

    impl VideoSink for RecordingVideoSink {
        fn initialize(&mut self, _width: u32, _height: u32) -> bool {
            if self.reject_init {
                return false;
            }
            self.initialized.store(true, Ordering::SeqCst);
            true
        }

        fn render(&mut self, frame: VideoFrame) {
            self.rendered.lock().push(frame.pts);
        }

        fn resize(&mut self, _width: u32, _height: u32) {}

        fn cleanup(&mut self) {
            self.cleaned.store(true, Ordering::SeqCst);
            self.initialized.store(false, Ordering::SeqCst);
        }

        fn is_initialized(&self) -> bool {
            self.initialized.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct RecordingAudioSink {
        enqueued: Arc<Mutex<Vec<i64>>>,
        volume: Arc<Mutex<f32>>,
        initialized: Arc<AtomicBool>,
        cleaned: Arc<AtomicBool>,
    }

    impl AudioSink for RecordingAudioSink {
        fn initialize(&mut self, _sample_rate: u32, _channels: u16, _format: SampleFormat) -> bool {
            self.initialized.store(true, Ordering::SeqCst);
            true
        }

        fn enqueue(&mut self, frame: AudioFrame) {
            self.enqueued.lock().push(frame.pts);
        }

        fn play(&mut self) {}
        fn pause(&mut self) {}
        fn stop(&mut self) {}

        fn set_volume(&mut self, volume: f32) {
            *self.volume.lock() = volume;
        }

        fn set_mute(&mut self, _mute: bool) {}

        fn cleanup(&mut self) {
            self.cleaned.store(true, Ordering::SeqCst);
        }

        fn is_initialized(&self) -> bool {
            self.initialized.load(Ordering::SeqCst)
        }
    }

    /// 测试默认关闭节拍对齐，脚本帧立即吐出
    fn fast_config() -> PlayerConfig {
        let mut config = PlayerConfig::new();
        config.set("video.pacing", "false");
        config
    }

    fn paced_config() -> PlayerConfig {
        PlayerConfig::new()
    }

    fn drain(rx: &Receiver<PlayerEvent>) -> Vec<PlayerEvent> {
        rx.try_iter().collect()
    }

    /// 收集事件直到 Finished（含），超时 panic
    fn collect_until_finished(rx: &Receiver<PlayerEvent>) -> Vec<PlayerEvent> {
        let mut events = Vec::new();
        loop {
            match rx.recv_timeout(Duration::from_secs(10)) {
                Ok(event) => {
                    let done = event == PlayerEvent::Finished;
                    events.push(event);
                    if done {
                        return events;
                    }
                }
                Err(e) => panic!("等待 Finished 超时: {} (已收 {:?})", e, events),
            }
        }
    }

    /// 与引擎共享句柄的解码工作单元，用于确定性地排布交错时序
    fn worker_for(engine: &PlaybackEngine) -> DecodeWorker {
        DecodeWorker {
            session: Arc::clone(&engine.session),
            source: Arc::clone(&engine.source),
            video_sink: Arc::clone(&engine.video_sink),
            audio_sink: Arc::clone(&engine.audio_sink),
            events: engine.events.clone(),
            clock: engine.clock.clone(),
            running: Arc::clone(&engine.running),
            generation: Arc::clone(&engine.generation),
            paced: false,
        }
    }

    fn wait_until(deadline_ms: u64, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    // --- 状态机守卫 ---

    #[test]
    fn play_is_silent_noop_outside_opened_or_paused() {
        let mut engine = PlaybackEngine::new(fast_config());
        let rx = engine.subscribe();

        let err = engine.play().unwrap_err();
        assert!(err.is_invalid_state());
        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert!(drain(&rx).is_empty(), "静默失败不应发任何通知");
    }

    #[test]
    fn play_while_already_playing_is_silent_noop() {
        let mut engine = PlaybackEngine::new(paced_config());
        engine
            .open_source("clip.mp4", Box::new(ScriptedSource::new(5000, video_script(5000))))
            .unwrap();
        let rx = engine.subscribe();
        engine.play().unwrap();
        drain(&rx);

        let err = engine.play().unwrap_err();
        assert!(err.is_invalid_state());
        assert_eq!(engine.state(), PlaybackState::Playing);
        // 解码循环的位置通知照常，但不得出现状态/错误通知
        assert!(drain(&rx)
            .iter()
            .all(|e| matches!(e, PlayerEvent::PositionChanged(_))));
    }

    #[test]
    fn open_rejected_when_already_opened() {
        let mut engine = PlaybackEngine::new(fast_config());
        engine
            .open_source("a.mp4", Box::new(ScriptedSource::new(5000, video_script(5000))))
            .unwrap();
        let rx = engine.subscribe();
        drain(&rx);

        let err = engine
            .open_source("b.mp4", Box::new(ScriptedSource::new(5000, video_script(5000))))
            .unwrap_err();
        assert!(err.is_invalid_state());
        assert_eq!(engine.current_uri().as_deref(), Some("a.mp4"));
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn seek_rejected_while_opened_but_not_started() {
        let mut engine = PlaybackEngine::new(fast_config());
        engine
            .open_source("a.mp4", Box::new(ScriptedSource::new(5000, video_script(5000))))
            .unwrap();
        let rx = engine.subscribe();

        let err = engine.seek(1000).unwrap_err();
        assert!(err.is_invalid_state());
        assert_eq!(engine.state(), PlaybackState::Opened);
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn stop_rejected_when_stopped() {
        let mut engine = PlaybackEngine::new(fast_config());
        assert!(engine.stop().unwrap_err().is_invalid_state());
        assert!(engine.close().unwrap_err().is_invalid_state());
    }

    // --- 场景 A：打开 ---

    #[test]
    fn scenario_open_reports_media_then_duration() {
        let mut engine = PlaybackEngine::new(fast_config());
        let rx = engine.subscribe();

        let descriptor = engine
            .open_source("clip.mp4", Box::new(ScriptedSource::new(5000, video_script(5000))))
            .unwrap();
        assert_eq!(descriptor.duration, 5000);
        assert_eq!(engine.state(), PlaybackState::Opened);
        assert_eq!(engine.duration(), 5000);
        assert_eq!(engine.position(), 0);

        assert_eq!(
            drain(&rx),
            vec![
                PlayerEvent::StateChanged(PlaybackState::Opening),
                PlayerEvent::StateChanged(PlaybackState::Opened),
                PlayerEvent::MediaOpened("clip.mp4".to_string()),
                PlayerEvent::DurationChanged(5000),
            ]
        );
    }

    #[test]
    fn open_with_unknown_duration_skips_duration_event() {
        let mut engine = PlaybackEngine::new(fast_config());
        let rx = engine.subscribe();
        engine
            .open_source("live.m3u8", Box::new(ScriptedSource::new(0, video_script(1000))))
            .unwrap();
        assert!(!drain(&rx)
            .iter()
            .any(|e| matches!(e, PlayerEvent::DurationChanged(_))));
    }

    // --- 场景 B：播放到结束 ---

    #[test]
    fn scenario_play_runs_to_end_of_stream() {
        let mut engine = PlaybackEngine::new(fast_config());
        let sink = RecordingVideoSink::default();
        let rendered = Arc::clone(&sink.rendered);
        engine.set_video_sink(Box::new(sink));

        let source = ScriptedSource::new(5000, video_script(5000));
        let closed = source.closed_flag();
        engine.open_source("clip.mp4", Box::new(source)).unwrap();
        let rx = engine.subscribe();
        drain(&rx);

        engine.play().unwrap();
        let events = collect_until_finished(&rx);

        // 状态序列 Starting → Playing → Stopped
        let states: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                PlayerEvent::StateChanged(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                PlaybackState::Starting,
                PlaybackState::Playing,
                PlaybackState::Stopped,
            ]
        );

        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert_eq!(engine.position(), 0);
        assert!(closed.load(Ordering::SeqCst), "EOS 后解码单元应被释放");
        assert_eq!(rendered.lock().len(), 20, "所有帧都应送达视频输出端");
        assert_eq!(
            events.iter().filter(|e| **e == PlayerEvent::Finished).count(),
            1
        );
    }

    #[test]
    fn positions_are_monotone_during_uninterrupted_playback() {
        let mut engine = PlaybackEngine::new(fast_config());
        engine
            .open_source("clip.mp4", Box::new(ScriptedSource::new(5000, video_script(5000))))
            .unwrap();
        let rx = engine.subscribe();
        drain(&rx);

        engine.play().unwrap();
        let events = collect_until_finished(&rx);
        let positions: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                PlayerEvent::PositionChanged(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert!(!positions.is_empty());
        assert!(
            positions.windows(2).all(|w| w[0] <= w[1]),
            "位置通知必须单调不减: {:?}",
            positions
        );
    }

    #[test]
    fn audio_frames_reach_audio_sink_and_drive_position() {
        let mut engine = PlaybackEngine::new(fast_config());
        let sink = RecordingAudioSink::default();
        let enqueued = Arc::clone(&sink.enqueued);
        engine.set_audio_sink(Box::new(sink));

        let frames: Vec<_> = (0..2000).step_by(250).map(audio_frame).collect();
        engine
            .open_source("song.flac", Box::new(ScriptedSource::new(2000, frames)))
            .unwrap();
        let rx = engine.subscribe();
        engine.play().unwrap();
        collect_until_finished(&rx);

        assert_eq!(enqueued.lock().len(), 8);
    }

    // --- 场景 C：播放中 seek ---

    #[test]
    fn scenario_seek_while_playing_jumps_and_stays_playing() {
        let mut engine = PlaybackEngine::new(paced_config());
        engine
            .open_source("clip.mp4", Box::new(ScriptedSource::new(5000, video_script(5000))))
            .unwrap();
        let rx = engine.subscribe();
        engine.play().unwrap();

        // 等位置前进一点再 seek
        assert!(wait_until(2000, || engine.position() >= 250));
        drain(&rx);

        engine.seek(4000).unwrap();
        assert_eq!(engine.state(), PlaybackState::Playing);
        assert_eq!(engine.position(), 4000);

        let events = collect_until_finished(&rx);
        let jumps = events
            .iter()
            .filter(|e| **e == PlayerEvent::PositionChanged(4000))
            .count();
        assert_eq!(jumps, 1, "seek 应恰好发出一次新位置通知");
        // seek 后的位置通知不回退
        let positions: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                PlayerEvent::PositionChanged(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert!(positions.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn seek_while_paused_does_not_resume() {
        let mut engine = PlaybackEngine::new(paced_config());
        engine
            .open_source("clip.mp4", Box::new(ScriptedSource::new(5000, video_script(5000))))
            .unwrap();
        engine.play().unwrap();
        engine.pause().unwrap();
        let rx = engine.subscribe();
        drain(&rx);

        engine.seek(2000).unwrap();
        assert_eq!(engine.state(), PlaybackState::Paused);
        assert_eq!(engine.position(), 2000);

        let events = drain(&rx);
        assert!(events.contains(&PlayerEvent::StateChanged(PlaybackState::Seeking)));
        assert!(events.contains(&PlayerEvent::StateChanged(PlaybackState::Paused)));
        assert!(events.contains(&PlayerEvent::PositionChanged(2000)));
    }

    #[test]
    fn seek_target_is_clamped_to_duration() {
        let mut engine = PlaybackEngine::new(paced_config());
        engine
            .open_source("clip.mp4", Box::new(ScriptedSource::new(5000, video_script(5000))))
            .unwrap();
        engine.play().unwrap();
        engine.pause().unwrap();

        engine.seek(90_000).unwrap();
        assert_eq!(engine.position(), 5000);

        engine.seek(-50).unwrap();
        assert_eq!(engine.position(), 0);
    }

    #[test]
    fn frame_decoded_before_seek_never_reaches_the_sinks() {
        // 交错：解码循环持源锁解出一帧并释放锁，seek 在投递之前
        // 完成（flush + 写入新位置），这帧必须被丢弃
        let mut engine = PlaybackEngine::new(fast_config());
        let video = RecordingVideoSink::default();
        let audio = RecordingAudioSink::default();
        let rendered = Arc::clone(&video.rendered);
        let enqueued = Arc::clone(&audio.enqueued);
        engine.set_video_sink(Box::new(video));
        engine.set_audio_sink(Box::new(audio));
        let rx = engine.subscribe();
        let worker = worker_for(&engine);

        {
            let mut session = engine.session.lock();
            session.duration = 5000;
            session.position = 1000;
        }

        // 这一帧解出时的代数
        let stale = engine.generation.load(Ordering::SeqCst);

        // seek(500) 抢先完成：加代数、写新位置
        engine.generation.fetch_add(1, Ordering::SeqCst);
        engine.session.lock().position = 500;

        worker.deliver(video_frame(1250), stale);
        worker.deliver(audio_frame(1500), stale);

        assert!(rendered.lock().is_empty(), "seek 前的视频帧不得呈现");
        assert!(enqueued.lock().is_empty(), "seek 前的音频帧不得入队");
        assert_eq!(engine.position(), 500, "旧帧不得盖掉 seek 写入的位置");
        assert!(
            drain(&rx).is_empty(),
            "旧帧不得产生任何位置通知"
        );

        // 当前代数的帧照常投递
        let current = engine.generation.load(Ordering::SeqCst);
        worker.deliver(video_frame(750), current);
        assert_eq!(rendered.lock().as_slice(), &[750]);
        assert_eq!(engine.position(), 750);
    }

    #[test]
    fn failed_seek_enters_error_state() {
        let mut engine = PlaybackEngine::new(paced_config());
        let mut source = ScriptedSource::new(5000, video_script(5000));
        source.fail_seek = true;
        engine.open_source("clip.mp4", Box::new(source)).unwrap();
        engine.play().unwrap();
        engine.pause().unwrap();
        let rx = engine.subscribe();
        drain(&rx);

        let err = engine.seek(1000).unwrap_err();
        assert!(matches!(err, PlayerError::SeekError(_)));
        assert_eq!(engine.state(), PlaybackState::Error);
        assert!(drain(&rx)
            .iter()
            .any(|e| matches!(e, PlayerEvent::Error(_))));
    }

    // --- 暂停 ---

    #[test]
    fn pause_twice_reports_paused_exactly_once() {
        let mut engine = PlaybackEngine::new(paced_config());
        engine
            .open_source("clip.mp4", Box::new(ScriptedSource::new(5000, video_script(5000))))
            .unwrap();
        let rx = engine.subscribe();
        engine.play().unwrap();
        drain(&rx);

        engine.pause().unwrap();
        assert!(engine.pause().unwrap_err().is_invalid_state());

        let paused_events = drain(&rx)
            .iter()
            .filter(|e| **e == PlayerEvent::StateChanged(PlaybackState::Paused))
            .count();
        assert_eq!(paused_events, 1);
        assert_eq!(engine.state(), PlaybackState::Paused);
    }

    // --- 停止 / 关闭 ---

    #[test]
    fn stop_resets_position_and_uri_but_keeps_duration() {
        let mut engine = PlaybackEngine::new(paced_config());
        let source = ScriptedSource::new(5000, video_script(5000));
        let closed = source.closed_flag();
        engine.open_source("clip.mp4", Box::new(source)).unwrap();
        engine.play().unwrap();
        assert!(wait_until(2000, || engine.position() >= 250));
        let rx = engine.subscribe();
        drain(&rx);

        engine.stop().unwrap();

        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert_eq!(engine.position(), 0);
        assert_eq!(engine.current_uri(), None);
        assert_eq!(engine.duration(), 5000, "stop 保留时长");
        assert!(closed.load(Ordering::SeqCst), "stop 释放解码单元");

        let events = drain(&rx);
        assert_eq!(
            events.iter().filter(|e| **e == PlayerEvent::Finished).count(),
            1
        );
    }

    #[test]
    fn stop_racing_natural_end_reports_finished_once() {
        let mut engine = PlaybackEngine::new(fast_config());
        engine
            .open_source("clip.mp4", Box::new(ScriptedSource::new(1000, video_script(1000))))
            .unwrap();
        let rx = engine.subscribe();
        let worker = worker_for(&engine);

        // stop 已过守卫进入 Stopping，解码循环恰在此刻播完
        engine.session.lock().state = PlaybackState::Stopping;
        worker.on_end_of_stream();
        // stop 收尾时再次报告结束，必须被去重
        engine.events.emit_finished();

        let finished = drain(&rx)
            .iter()
            .filter(|e| **e == PlayerEvent::Finished)
            .count();
        assert_eq!(finished, 1);
        assert_eq!(engine.state(), PlaybackState::Stopped);
    }

    #[test]
    fn close_also_drops_sinks_and_duration() {
        let mut engine = PlaybackEngine::new(fast_config());
        let video = RecordingVideoSink::default();
        let audio = RecordingAudioSink::default();
        let video_cleaned = Arc::clone(&video.cleaned);
        let audio_cleaned = Arc::clone(&audio.cleaned);
        engine.set_video_sink(Box::new(video));
        engine.set_audio_sink(Box::new(audio));

        engine
            .open_source("clip.mp4", Box::new(ScriptedSource::new(5000, video_script(5000))))
            .unwrap();
        engine.close().unwrap();

        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert_eq!(engine.duration(), 0, "close 清零时长");
        assert!(video_cleaned.load(Ordering::SeqCst));
        assert!(audio_cleaned.load(Ordering::SeqCst));
    }

    // --- 错误路径 ---

    #[test]
    fn scenario_open_failure_reports_error() {
        let mut engine = PlaybackEngine::new(fast_config());
        let rx = engine.subscribe();

        let err = engine
            .open_with("missing.mp4", || {
                Err(PlayerError::ResourceNotFound("missing.mp4".to_string()))
            })
            .unwrap_err();
        assert!(matches!(err, PlayerError::ResourceNotFound(_)));
        assert_eq!(engine.state(), PlaybackState::Error);

        let events = drain(&rx);
        assert_eq!(events[0], PlayerEvent::StateChanged(PlaybackState::Opening));
        assert_eq!(events[1], PlayerEvent::StateChanged(PlaybackState::Error));
        assert!(matches!(events[2], PlayerEvent::Error(_)));
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn decode_error_ends_playback_in_error_state() {
        let mut engine = PlaybackEngine::new(fast_config());
        let mut source = ScriptedSource::new(5000, video_script(5000));
        source.fail_at = Some(3);
        engine.open_source("clip.mp4", Box::new(source)).unwrap();
        let rx = engine.subscribe();
        drain(&rx);

        engine.play().unwrap();
        assert!(wait_until(2000, || engine.state() == PlaybackState::Error));

        let events = drain(&rx);
        assert!(events.contains(&PlayerEvent::StateChanged(PlaybackState::Error)));
        assert!(events.iter().any(|e| matches!(e, PlayerEvent::Error(_))));
        assert!(!events.contains(&PlayerEvent::Finished), "出错不算播放完成");
    }

    #[test]
    fn fresh_open_recovers_from_error_state() {
        let mut engine = PlaybackEngine::new(fast_config());
        let mut source = ScriptedSource::new(5000, video_script(5000));
        source.fail_at = Some(0);
        engine.open_source("bad.mp4", Box::new(source)).unwrap();
        engine.play().unwrap();
        assert!(wait_until(2000, || engine.state() == PlaybackState::Error));

        engine
            .open_source("good.mp4", Box::new(ScriptedSource::new(3000, video_script(3000))))
            .unwrap();
        assert_eq!(engine.state(), PlaybackState::Opened);
        assert_eq!(engine.current_uri().as_deref(), Some("good.mp4"));
    }

    #[test]
    fn rejected_sink_initialization_fails_open() {
        let mut engine = PlaybackEngine::new(fast_config());
        let sink = RecordingVideoSink {
            reject_init: true,
            ..Default::default()
        };
        engine.set_video_sink(Box::new(sink));
        let rx = engine.subscribe();

        let err = engine
            .open_source("clip.mp4", Box::new(ScriptedSource::new(5000, video_script(5000))))
            .unwrap_err();
        assert!(matches!(err, PlayerError::SinkInitError(_)));
        assert_eq!(engine.state(), PlaybackState::Error);
        assert!(drain(&rx)
            .iter()
            .any(|e| matches!(e, PlayerEvent::Error(_))));
    }

    // --- 音量 ---

    #[test]
    fn configured_volume_is_applied_at_open() {
        let mut config = fast_config();
        config.set("audio.volume", "0.25");
        let mut engine = PlaybackEngine::new(config);

        let sink = RecordingAudioSink::default();
        let volume = Arc::clone(&sink.volume);
        engine.set_audio_sink(Box::new(sink));

        let frames: Vec<_> = (0..1000).step_by(250).map(audio_frame).collect();
        engine
            .open_source("song.flac", Box::new(ScriptedSource::new(1000, frames)))
            .unwrap();
        assert!((*volume.lock() - 0.25).abs() < f32::EPSILON);

        engine.set_volume(0.9);
        assert!((*volume.lock() - 0.9).abs() < f32::EPSILON);
    }

    // --- 析构 ---

    #[test]
    fn drop_while_playing_joins_decode_loop_and_releases_source() {
        let closed;
        {
            let mut engine = PlaybackEngine::new(paced_config());
            let source = ScriptedSource::new(5000, video_script(5000));
            closed = source.closed_flag();
            engine.open_source("clip.mp4", Box::new(source)).unwrap();
            engine.play().unwrap();
            assert!(wait_until(2000, || engine.position() >= 250));
        }
        assert!(closed.load(Ordering::SeqCst), "析构必须释放解码单元");
    }
}
