use crate::core::{MediaDescriptor, PlayerError, Result, StreamSelection};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{format, media};
use log::{debug, info};

/// 包所属的流类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
}

/// 解封装器 - 负责打开媒体资源并分离音视频包
pub struct Demuxer {
    input_ctx: format::context::Input,
    selection: StreamSelection,
    descriptor: MediaDescriptor,
    source_uri: String,
}

impl Demuxer {
    /// 打开媒体资源（本地路径或网络 URL）
    pub fn open(uri: &str) -> Result<Self> {
        info!("正在打开媒体资源: {}", uri);

        // 判断是否为网络流
        let is_network = uri.starts_with("http://")
            || uri.starts_with("https://")
            || uri.starts_with("rtsp://")
            || uri.starts_with("rtmp://")
            || uri.contains(".m3u8");

        // 为网络流设置选项
        let input_ctx = if is_network {
            info!("🌐 检测到网络流，应用优化选项");

            let mut options = ffmpeg::Dictionary::new();
            // discardcorrupt: 丢弃损坏的帧
            // genpts: 生成 PTS（防止时间戳问题）
            options.set("fflags", "+discardcorrupt+genpts");
            options.set("analyzeduration", "5000000"); // 5 秒
            options.set("probesize", "10000000"); // 10MB
            options.set("rw_timeout", "8000000"); // 读写操作 8s 超时
            options.set("reconnect", "1");
            options.set("reconnect_streamed", "1");
            options.set("reconnect_delay_max", "4");

            format::input_with_dictionary(&uri, options)
                .map_err(|e| Self::map_open_error(uri, e))?
        } else {
            format::input(&uri).map_err(|e| Self::map_open_error(uri, e))?
        };

        // 独立选择最佳视频流和最佳音频流
        let selection = StreamSelection {
            video: input_ctx.streams().best(media::Type::Video).map(|s| s.index()),
            audio: input_ctx.streams().best(media::Type::Audio).map(|s| s.index()),
        };

        debug!("视频流索引: {:?}", selection.video);
        debug!("音频流索引: {:?}", selection.audio);

        if !selection.has_any() {
            return Err(PlayerError::NoDecodableStreams);
        }

        let mut demuxer = Self {
            input_ctx,
            selection,
            descriptor: MediaDescriptor::default(),
            source_uri: uri.to_string(),
        };
        demuxer.descriptor = demuxer.extract_descriptor()?;

        Ok(demuxer)
    }

    fn map_open_error(uri: &str, e: ffmpeg::Error) -> PlayerError {
        match e {
            // 打开了但无法识别容器/流信息
            ffmpeg::Error::InvalidData | ffmpeg::Error::StreamNotFound => {
                PlayerError::UnsupportedFormat(format!("{}: {}", uri, e))
            }
            _ => PlayerError::ResourceNotFound(format!("{}: {}", uri, e)),
        }
    }

    /// 提取媒体信息（内部使用）
    fn extract_descriptor(&self) -> Result<MediaDescriptor> {
        let mut descriptor = MediaDescriptor::default();

        // 时长：AV_TIME_BASE（微秒）转毫秒；负值表示未知
        let raw_duration = self.input_ctx.duration();
        descriptor.duration = if raw_duration > 0 { raw_duration / 1000 } else { 0 };

        if let Some(stream) = self.video_stream() {
            let params = stream.parameters();
            descriptor.video_codec = params.id().name().to_string();

            let context = ffmpeg::codec::context::Context::from_parameters(params)?;
            let decoder = context.decoder().video()?;
            descriptor.has_video = true;
            descriptor.width = decoder.width();
            descriptor.height = decoder.height();

            let fps = stream.avg_frame_rate();
            if fps.denominator() != 0 {
                descriptor.frame_rate = fps.numerator() as f64 / fps.denominator() as f64;
            }
        }

        if let Some(stream) = self.audio_stream() {
            let params = stream.parameters();
            descriptor.audio_codec = params.id().name().to_string();

            let context = ffmpeg::codec::context::Context::from_parameters(params)?;
            let decoder = context.decoder().audio()?;
            descriptor.has_audio = true;
            descriptor.sample_rate = decoder.rate();
            descriptor.channels = decoder.channels();
        }

        Ok(descriptor)
    }

    pub fn selection(&self) -> StreamSelection {
        self.selection
    }

    /// 标记某条流不可用（解码器创建失败时调用）
    pub fn discard_stream(&mut self, kind: StreamKind) {
        match kind {
            StreamKind::Video => {
                self.selection.video = None;
                self.descriptor.has_video = false;
            }
            StreamKind::Audio => {
                self.selection.audio = None;
                self.descriptor.has_audio = false;
            }
        }
    }

    /// 获取视频流
    pub fn video_stream(&self) -> Option<format::stream::Stream> {
        self.selection.video.and_then(|idx| self.input_ctx.stream(idx))
    }

    /// 获取音频流
    pub fn audio_stream(&self) -> Option<format::stream::Stream> {
        self.selection.audio.and_then(|idx| self.input_ctx.stream(idx))
    }

    /// 读取下一个属于选中流的数据包；None 表示源已耗尽
    pub fn read_packet(&mut self) -> Option<(ffmpeg::Packet, StreamKind)> {
        loop {
            match self.input_ctx.packets().next() {
                Some((stream, packet)) => {
                    let index = stream.index();
                    if Some(index) == self.selection.video {
                        return Some((packet, StreamKind::Video));
                    }
                    if Some(index) == self.selection.audio {
                        return Some((packet, StreamKind::Audio));
                    }
                    // 其他流（字幕、数据流等）直接跳过
                }
                None => return None,
            }
        }
    }

    /// Seek 到指定位置（毫秒），向后偏置落在最近的关键帧上
    ///
    /// 目标先被夹到 [0, duration]；时长未知时只夹下界。
    pub fn seek(&mut self, position_ms: i64) -> Result<()> {
        let mut target = position_ms.max(0);
        if self.descriptor.duration > 0 {
            target = target.min(self.descriptor.duration);
        }

        let timestamp = target * 1000; // 毫秒转微秒
        self.input_ctx
            .seek(timestamp, ..timestamp)
            .map_err(|e| PlayerError::SeekError(format!("{}ms: {}", target, e)))?;

        debug!("解封装器 seek 完成: {} ms", target);
        Ok(())
    }

    pub fn descriptor(&self) -> &MediaDescriptor {
        &self.descriptor
    }

    /// 获取源 URI 描述
    pub fn description(&self) -> String {
        self.source_uri.clone()
    }
}
