use serde::{Deserialize, Serialize};

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
    RGB,
    YUV420P,
    NV12,
}

/// 音频采样格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    F32,
    I16,
}

/// 视频帧数据
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub pts: i64,      // 显示时间戳（毫秒）
    pub duration: i64, // 帧持续时间（毫秒）
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub stride: usize, // 每行字节数
    pub data: Vec<u8>, // CPU 内存数据
}

/// 音频帧数据
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub pts: i64,      // 显示时间戳（毫秒）
    pub duration: i64, // 帧持续时间（毫秒）
    pub samples: usize, // 每声道样本数
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    pub data: Vec<f32>, // 统一使用 f32 packed 格式
}

/// 解码输出帧 - 视频/音频二选一，由引擎路由到对应输出端
#[derive(Debug, Clone)]
pub enum DecodedFrame {
    Video(VideoFrame),
    Audio(AudioFrame),
}

impl DecodedFrame {
    /// 显示时间戳（毫秒）
    pub fn pts(&self) -> i64 {
        match self {
            DecodedFrame::Video(f) => f.pts,
            DecodedFrame::Audio(f) => f.pts,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, DecodedFrame::Video(_))
    }
}

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Stopped,
    Opening,
    Opened,
    Starting,
    Playing,
    Pausing,
    Paused,
    Stopping,
    Seeking,
    Closing,
    Error,
}

/// 已选中的流索引 - open 成功时至少有一个存在
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSelection {
    pub video: Option<usize>,
    pub audio: Option<usize>,
}

impl StreamSelection {
    pub fn has_any(&self) -> bool {
        self.video.is_some() || self.audio.is_some()
    }
}

/// 媒体信息 - open 成功后生成，一次会话内不变
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub duration: i64, // 总时长（毫秒），0 表示未知
    pub has_video: bool,
    pub has_audio: bool,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub video_codec: String,
    pub audio_codec: String,
}

impl Default for MediaDescriptor {
    fn default() -> Self {
        Self {
            duration: 0,
            has_video: false,
            has_audio: false,
            width: 0,
            height: 0,
            frame_rate: 0.0,
            sample_rate: 0,
            channels: 0,
            video_codec: String::new(),
            audio_codec: String::new(),
        }
    }
}
