use crate::core::PlaybackState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("无法打开资源: {0}")]
    ResourceNotFound(String),

    #[error("不支持的媒体格式: {0}")]
    UnsupportedFormat(String),

    #[error("没有可解码的音视频流")]
    NoDecodableStreams,

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("Seek 失败: {0}")]
    SeekError(String),

    #[error("输出端初始化失败: {0}")]
    SinkInitError(String),

    #[error("状态 {state:?} 下不允许操作 {op}")]
    InvalidState {
        op: &'static str,
        state: PlaybackState,
    },

    #[error("其他错误: {0}")]
    Other(String),

    #[error("Anyhow 错误: {0}")]
    AnyhowError(#[from] anyhow::Error),
}

impl PlayerError {
    /// 是否为静默失败：调用方在当前状态下的误操作，
    /// 只返回失败，不进入 Error 状态、不发通知
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, PlayerError::InvalidState { .. })
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;
