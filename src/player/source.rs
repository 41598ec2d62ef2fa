use crate::core::{DecodedFrame, MediaDescriptor, Result, StreamSelection};

/// 解码数据源抽象接口
///
/// 这个 trait 定义了引擎消费的解封装/解码单元契约。
/// 不同的实现（FFmpeg、测试桩等）都通过这个接口接入引擎。
pub trait DecodeSource: Send {
    /// 读取下一个已解码帧
    ///
    /// 返回：
    /// - Ok(Some(frame)): 成功解出一帧（内部可能拉取了多个包）
    /// - Ok(None): 源已耗尽且解码器缓冲已排空
    /// - Err(e): 解码错误
    fn next_frame(&mut self) -> Result<Option<DecodedFrame>>;

    /// Seek 到指定位置（毫秒）
    ///
    /// 向后偏置：落在目标位置之前最近的关键帧上，
    /// 并清空解码器内部缓冲，保证不再吐出旧帧。
    fn seek(&mut self, position_ms: i64) -> Result<()>;

    /// 获取媒体信息（一次会话内不变）
    fn descriptor(&self) -> &MediaDescriptor;

    /// 获取选中的流索引
    fn selection(&self) -> StreamSelection;

    /// 释放解码器和解封装上下文；可重复调用
    fn close(&mut self);

    /// 是否支持 seek
    fn is_seekable(&self) -> bool {
        true
    }

    /// 获取描述信息（用于日志）
    fn description(&self) -> String;

    /// 总时长（毫秒），0 表示未知
    fn duration(&self) -> i64 {
        self.descriptor().duration
    }

    fn has_video(&self) -> bool {
        self.descriptor().has_video
    }

    fn has_audio(&self) -> bool {
        self.descriptor().has_audio
    }
}
