use crate::core::{AudioFrame, SampleFormat, VideoFrame};
use log::debug;

/// 视频输出端能力契约
///
/// 具体呈现后端（窗口、纹理上传等）由上层实现并移交给引擎；
/// 引擎只负责在正确的时刻调用这些方法。实现方围绕自己的
/// 渲染表面构造，初始化失败返回 false。
pub trait VideoSink: Send {
    fn initialize(&mut self, width: u32, height: u32) -> bool;

    /// 接收一帧，所有权转移给输出端
    fn render(&mut self, frame: VideoFrame);

    fn resize(&mut self, width: u32, height: u32);

    fn cleanup(&mut self);

    fn is_initialized(&self) -> bool;
}

/// 音频输出端能力契约
///
/// enqueue 允许阻塞以施加背压；引擎的解码循环是唯一的写入方。
pub trait AudioSink: Send {
    fn initialize(&mut self, sample_rate: u32, channels: u16, format: SampleFormat) -> bool;

    /// 接收一帧音频，所有权转移给输出端
    fn enqueue(&mut self, frame: AudioFrame);

    fn play(&mut self);

    fn pause(&mut self);

    fn stop(&mut self);

    fn set_volume(&mut self, volume: f32);

    fn set_mute(&mut self, mute: bool);

    fn cleanup(&mut self);

    fn is_initialized(&self) -> bool;
}

/// 丢弃所有帧的视频输出端（无头播放、测试用）
#[derive(Debug, Default)]
pub struct NullVideoSink {
    initialized: bool,
    frames: u64,
}

impl VideoSink for NullVideoSink {
    fn initialize(&mut self, width: u32, height: u32) -> bool {
        debug!("NullVideoSink 初始化: {}x{}", width, height);
        self.initialized = true;
        true
    }

    fn render(&mut self, _frame: VideoFrame) {
        self.frames += 1;
    }

    fn resize(&mut self, _width: u32, _height: u32) {}

    fn cleanup(&mut self) {
        self.initialized = false;
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// 丢弃所有帧的音频输出端（无头播放、测试用）
#[derive(Debug, Default)]
pub struct NullAudioSink {
    initialized: bool,
    volume: f32,
    muted: bool,
}

impl AudioSink for NullAudioSink {
    fn initialize(&mut self, sample_rate: u32, channels: u16, format: SampleFormat) -> bool {
        debug!(
            "NullAudioSink 初始化: {} Hz, {} 声道, {:?}",
            sample_rate, channels, format
        );
        self.initialized = true;
        self.volume = 1.0;
        true
    }

    fn enqueue(&mut self, _frame: AudioFrame) {}

    fn play(&mut self) {}

    fn pause(&mut self) {}

    fn stop(&mut self) {}

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn set_mute(&mut self, mute: bool) {
        self.muted = mute;
    }

    fn cleanup(&mut self) {
        self.initialized = false;
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}
