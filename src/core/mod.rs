// 核心数据结构和类型定义

pub mod clock;
pub mod config;
pub mod error;
pub mod types;

// 重新导出常用类型
pub use clock::PlaybackClock;
pub use config::PlayerConfig;
pub use error::{PlayerError, Result};
pub use types::{
    AudioFrame, DecodedFrame, MediaDescriptor, PixelFormat, PlaybackState, SampleFormat,
    StreamSelection, VideoFrame,
};
