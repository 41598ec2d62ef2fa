//! aurora_player - 媒体播放引擎
//!
//! 打开媒体资源、解封装/解码、把带时间戳的音视频帧送往输出端，
//! 并在并发解码下暴露一个安全的 play/pause/stop/seek 状态机。
//! 呈现后端（窗口、声卡）由上层实现 [`player::VideoSink`] /
//! [`player::AudioSink`] 接入。

pub mod core;
pub mod player;

pub use crate::core::{
    AudioFrame, DecodedFrame, MediaDescriptor, PlaybackState, PlayerConfig, PlayerError, Result,
    VideoFrame,
};
pub use crate::player::{
    AudioSink, DecodeSource, PlaybackEngine, PlayerEvent, VideoSink,
};
