// 播放器核心模块

pub mod decode_unit;
pub mod decoder;
pub mod demuxer;
pub mod engine;
pub mod events;
pub mod sink;
pub mod source;

pub use decode_unit::FfmpegDecodeUnit;
pub use decoder::{AudioDecoder, VideoDecoder};
pub use demuxer::{Demuxer, StreamKind};
pub use engine::PlaybackEngine;
pub use events::{EventHub, PlayerEvent};
pub use sink::{AudioSink, NullAudioSink, NullVideoSink, VideoSink};
pub use source::DecodeSource;
