use crate::core::{DecodedFrame, MediaDescriptor, PlayerError, Result, StreamSelection};
use crate::player::decoder::{AudioDecoder, VideoDecoder};
use crate::player::demuxer::{Demuxer, StreamKind};
use crate::player::source::DecodeSource;
use log::{info, warn};
use std::collections::VecDeque;

/// FFmpeg 解封装/解码单元
///
/// 组合一个 Demuxer 和每条选中流的解码器，对引擎暴露统一的
/// "下一帧" 接口。一个实例对应一次打开会话。
pub struct FfmpegDecodeUnit {
    demuxer: Option<Demuxer>,
    video_decoder: Option<VideoDecoder>,
    audio_decoder: Option<AudioDecoder>,
    // 解一个包可能出多帧，先进先出缓存跨调用吐出
    pending: VecDeque<DecodedFrame>,
    drained: bool,
    descriptor: MediaDescriptor,
    selection: StreamSelection,
    uri: String,
}

impl FfmpegDecodeUnit {
    /// 打开媒体资源并为每条可解码的流创建解码器
    ///
    /// 一条流只有在解码器成功创建时才算"找到"；
    /// 两条流都不可解码时返回 NoDecodableStreams。
    pub fn open(uri: &str) -> Result<Self> {
        let mut demuxer = Demuxer::open(uri)?;

        let video_decoder = match demuxer.video_stream() {
            Some(stream) => match VideoDecoder::from_stream(stream) {
                Ok(decoder) => Some(decoder),
                Err(e) => {
                    warn!("视频解码器创建失败，忽略视频流: {}", e);
                    demuxer.discard_stream(StreamKind::Video);
                    None
                }
            },
            None => None,
        };

        // 音频输出目标配置：保持源参数，源未知时回退 48kHz 立体声
        let (target_rate, target_channels) = {
            let d = demuxer.descriptor();
            (
                if d.sample_rate > 0 { d.sample_rate } else { 48000 },
                if d.channels > 0 { d.channels } else { 2 },
            )
        };

        let audio_decoder = match demuxer.audio_stream() {
            Some(stream) => match AudioDecoder::from_stream(stream, target_rate, target_channels) {
                Ok(decoder) => Some(decoder),
                Err(e) => {
                    warn!("音频解码器创建失败，忽略音频流: {}", e);
                    demuxer.discard_stream(StreamKind::Audio);
                    None
                }
            },
            None => None,
        };

        if video_decoder.is_none() && audio_decoder.is_none() {
            return Err(PlayerError::NoDecodableStreams);
        }

        let descriptor = demuxer.descriptor().clone();
        let selection = demuxer.selection();
        info!(
            "解码单元就绪: {} ({}x{} @ {:.2}fps, {} Hz/{} 声道, 时长 {} ms)",
            uri,
            descriptor.width,
            descriptor.height,
            descriptor.frame_rate,
            descriptor.sample_rate,
            descriptor.channels,
            descriptor.duration
        );

        Ok(Self {
            demuxer: Some(demuxer),
            video_decoder,
            audio_decoder,
            pending: VecDeque::new(),
            drained: false,
            descriptor,
            selection,
            uri: uri.to_string(),
        })
    }

    fn decode_packet(&mut self, packet: ffmpeg_next::Packet, kind: StreamKind) -> Result<()> {
        match kind {
            StreamKind::Video => {
                if let Some(decoder) = self.video_decoder.as_mut() {
                    for frame in decoder.decode(&packet)? {
                        self.pending.push_back(DecodedFrame::Video(frame));
                    }
                }
            }
            StreamKind::Audio => {
                if let Some(decoder) = self.audio_decoder.as_mut() {
                    for frame in decoder.decode(&packet)? {
                        self.pending.push_back(DecodedFrame::Audio(frame));
                    }
                }
            }
        }
        Ok(())
    }

    /// 源耗尽后排空解码器内部缓冲的帧
    fn drain_decoders(&mut self) -> Result<()> {
        if self.drained {
            return Ok(());
        }
        self.drained = true;

        if let Some(decoder) = self.video_decoder.as_mut() {
            for frame in decoder.drain()? {
                self.pending.push_back(DecodedFrame::Video(frame));
            }
        }
        if let Some(decoder) = self.audio_decoder.as_mut() {
            for frame in decoder.drain()? {
                self.pending.push_back(DecodedFrame::Audio(frame));
            }
        }
        // 排空出来的帧按 PTS 排序，保持时间顺序
        let mut tail: Vec<_> = self.pending.drain(..).collect();
        tail.sort_by_key(|f| f.pts());
        self.pending.extend(tail);
        Ok(())
    }
}

impl DecodeSource for FfmpegDecodeUnit {
    fn next_frame(&mut self) -> Result<Option<DecodedFrame>> {
        let map_decode = |e: PlayerError| match e {
            e @ PlayerError::DecodeError(_) => e,
            e => PlayerError::DecodeError(e.to_string()),
        };

        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }

            let demuxer = match self.demuxer.as_mut() {
                Some(d) => d,
                None => return Ok(None), // 已关闭
            };

            match demuxer.read_packet() {
                Some((packet, kind)) => {
                    self.decode_packet(packet, kind).map_err(map_decode)?;
                }
                None => {
                    self.drain_decoders().map_err(map_decode)?;
                    if self.pending.is_empty() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn seek(&mut self, position_ms: i64) -> Result<()> {
        let demuxer = self
            .demuxer
            .as_mut()
            .ok_or_else(|| PlayerError::SeekError("解码单元已关闭".to_string()))?;

        demuxer.seek(position_ms)?;

        // 清空解码器内部缓冲和待吐出帧，保证 seek 后不再出现旧帧
        if let Some(decoder) = self.video_decoder.as_mut() {
            decoder.flush();
        }
        if let Some(decoder) = self.audio_decoder.as_mut() {
            decoder.flush();
        }
        self.pending.clear();
        self.drained = false;
        Ok(())
    }

    fn descriptor(&self) -> &MediaDescriptor {
        &self.descriptor
    }

    fn selection(&self) -> StreamSelection {
        self.selection
    }

    fn close(&mut self) {
        if self.demuxer.is_some() {
            info!("关闭解码单元: {}", self.uri);
        }
        self.pending.clear();
        self.video_decoder = None;
        self.audio_decoder = None;
        self.demuxer = None;
    }

    fn description(&self) -> String {
        format!("FFmpeg 解码单元: {}", self.uri)
    }
}

impl Drop for FfmpegDecodeUnit {
    fn drop(&mut self) {
        self.close();
    }
}
