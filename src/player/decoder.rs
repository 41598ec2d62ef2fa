use crate::core::{AudioFrame, PixelFormat, Result, SampleFormat, VideoFrame};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, software, util};
use log::debug;

/// 视频解码器（软件解码，输出 RGBA）
pub struct VideoDecoder {
    decoder: codec::decoder::Video,
    scaler: Option<software::scaling::Context>,
    time_base: f64,
    frame_duration_ms: i64,
}

// SwsContext 本身不是 Send，但每个解码器实例只在解码线程中使用
unsafe impl Send for VideoDecoder {}

impl VideoDecoder {
    /// 从视频流创建解码器
    pub fn from_stream(stream: format::stream::Stream) -> Result<Self> {
        let context = codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context.decoder().video()?;

        let tb = stream.time_base();
        let time_base = tb.numerator() as f64 / tb.denominator() as f64;

        // 名义帧时长，用于帧的 duration 字段和播放节拍
        let fps = stream.avg_frame_rate();
        let frame_duration_ms = if fps.numerator() > 0 {
            (1000.0 * fps.denominator() as f64 / fps.numerator() as f64) as i64
        } else {
            0
        };

        debug!(
            "视频解码器: {}x{}, 格式: {:?}",
            decoder.width(),
            decoder.height(),
            decoder.format()
        );

        Ok(Self {
            decoder,
            scaler: None,
            time_base,
            frame_duration_ms,
        })
    }

    /// 解码数据包，返回 0~n 个视频帧
    pub fn decode(&mut self, packet: &ffmpeg::Packet) -> Result<Vec<VideoFrame>> {
        let mut frames = Vec::new();

        match self.decoder.send_packet(packet) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => {
                debug!("视频解码器收到 EOF（send_packet），忽略本次包");
                return Ok(frames);
            }
            Err(e) => return Err(e.into()),
        }

        self.receive_all(&mut frames)?;
        Ok(frames)
    }

    /// 排空解码器缓冲（源耗尽时调用一次）
    pub fn drain(&mut self) -> Result<Vec<VideoFrame>> {
        let mut frames = Vec::new();
        if self.decoder.send_eof().is_ok() {
            self.receive_all(&mut frames)?;
        }
        Ok(frames)
    }

    /// 清空内部缓冲（Seek 后调用，防止吐出旧帧）
    pub fn flush(&mut self) {
        self.decoder.flush();
    }

    fn receive_all(&mut self, frames: &mut Vec<VideoFrame>) -> Result<()> {
        loop {
            let mut decoded = util::frame::Video::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(_) => frames.push(self.convert_frame(decoded)?),
                Err(ffmpeg::Error::Other { errno: 11 }) => break, // EAGAIN
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// 转换帧格式为 RGBA，拷贝到连续内存
    fn convert_frame(&mut self, frame: util::frame::Video) -> Result<VideoFrame> {
        let width = frame.width();
        let height = frame.height();

        // 初始化 scaler（YUV -> RGBA）
        if self.scaler.is_none() {
            self.scaler = Some(software::scaling::Context::get(
                frame.format(),
                width,
                height,
                util::format::Pixel::RGBA,
                width,
                height,
                software::scaling::Flags::BILINEAR,
            )?);
        }

        let mut rgba_frame = util::frame::Video::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler.run(&frame, &mut rgba_frame)?;
        }

        // 计算 PTS（毫秒）
        let pts = frame
            .timestamp()
            .map(|ts| (ts as f64 * self.time_base * 1000.0) as i64)
            .unwrap_or(0);

        // 去掉行对齐，拷贝为紧凑 RGBA
        let row_bytes = width as usize * 4;
        let mut data = vec![0u8; row_bytes * height as usize];
        let src_stride = rgba_frame.stride(0);
        let src = rgba_frame.data(0);
        for y in 0..height as usize {
            let src_offset = y * src_stride;
            let dst_offset = y * row_bytes;
            data[dst_offset..dst_offset + row_bytes]
                .copy_from_slice(&src[src_offset..src_offset + row_bytes]);
        }

        Ok(VideoFrame {
            pts,
            duration: self.frame_duration_ms,
            width,
            height,
            format: PixelFormat::RGBA,
            stride: row_bytes,
            data,
        })
    }
}

/// 音频解码器（重采样为 packed f32）
pub struct AudioDecoder {
    decoder: codec::decoder::Audio,
    resampler: Option<software::resampling::Context>,
    time_base: f64,
    target_sample_rate: u32,
    target_channels: u16,
    // 最后一帧的结束时刻，排空重采样器时给尾帧定 PTS
    last_end_pts: i64,
}

impl AudioDecoder {
    /// 从音频流创建解码器，输出固定为目标采样率/声道数
    pub fn from_stream(
        stream: format::stream::Stream,
        target_sample_rate: u32,
        target_channels: u16,
    ) -> Result<Self> {
        let context = codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context.decoder().audio()?;

        let tb = stream.time_base();
        let time_base = tb.numerator() as f64 / tb.denominator() as f64;

        debug!(
            "音频解码器: {} Hz, {} 声道 → 目标: {} Hz, {} 声道",
            decoder.rate(),
            decoder.channels(),
            target_sample_rate,
            target_channels
        );

        Ok(Self {
            decoder,
            resampler: None,
            time_base,
            target_sample_rate,
            target_channels,
            last_end_pts: 0,
        })
    }

    /// 解码数据包，返回 0~n 个音频帧
    pub fn decode(&mut self, packet: &ffmpeg::Packet) -> Result<Vec<AudioFrame>> {
        let mut frames = Vec::new();

        match self.decoder.send_packet(packet) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => {
                debug!("音频解码器收到 EOF（send_packet），忽略本次包");
                return Ok(frames);
            }
            Err(e) => return Err(e.into()),
        }

        self.receive_all(&mut frames)?;
        Ok(frames)
    }

    /// 排空解码器缓冲（源耗尽时调用一次）
    ///
    /// 解码器排空后还要冲洗重采样器：滤波延迟里压着的尾部样本
    /// 不冲出来就丢在里面了。
    pub fn drain(&mut self) -> Result<Vec<AudioFrame>> {
        let mut frames = Vec::new();
        if self.decoder.send_eof().is_ok() {
            self.receive_all(&mut frames)?;
        }
        if let Some(resampler) = self.resampler.as_mut() {
            if let Some(tail) = resampler_tail(resampler)? {
                let pts = frames
                    .last()
                    .map(|f| f.pts + f.duration)
                    .unwrap_or(self.last_end_pts);
                frames.push(Self::package(
                    &tail,
                    pts,
                    self.target_sample_rate,
                    self.target_channels,
                ));
            }
        }
        Ok(frames)
    }

    /// 清空内部缓冲（Seek 后调用）
    pub fn flush(&mut self) {
        self.decoder.flush();
    }

    fn receive_all(&mut self, frames: &mut Vec<AudioFrame>) -> Result<()> {
        loop {
            let mut decoded = util::frame::Audio::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(_) => frames.push(self.convert_frame(decoded)?),
                Err(ffmpeg::Error::Other { errno: 11 }) => break, // EAGAIN
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// 重采样为 packed f32（含声道转换）
    fn convert_frame(&mut self, frame: util::frame::Audio) -> Result<AudioFrame> {
        if self.resampler.is_none() {
            let target_layout = match self.target_channels {
                1 => util::channel_layout::ChannelLayout::MONO,
                2 => util::channel_layout::ChannelLayout::STEREO,
                6 => util::channel_layout::ChannelLayout::_5POINT1,
                _ => util::channel_layout::ChannelLayout::STEREO,
            };

            debug!(
                "初始化音频重采样器: {}Hz/{}ch → {}Hz/{}ch",
                frame.rate(),
                frame.channels(),
                self.target_sample_rate,
                self.target_channels
            );

            self.resampler = Some(software::resampling::Context::get(
                frame.format(),
                frame.channel_layout(),
                frame.rate(),
                util::format::Sample::F32(util::format::sample::Type::Packed),
                target_layout,
                self.target_sample_rate,
            )?);
        }

        let mut resampled = util::frame::Audio::empty();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.run(&frame, &mut resampled)?;
        }

        // 计算 PTS（毫秒）
        let pts = frame
            .timestamp()
            .map(|ts| (ts as f64 * self.time_base * 1000.0) as i64)
            .unwrap_or(0);

        let packaged = Self::package(&resampled, pts, self.target_sample_rate, self.target_channels);
        self.last_end_pts = packaged.pts + packaged.duration;
        Ok(packaged)
    }

    /// 把重采样输出拷贝打包为引擎的音频帧
    fn package(
        resampled: &util::frame::Audio,
        pts: i64,
        sample_rate: u32,
        channels: u16,
    ) -> AudioFrame {
        let samples = resampled.samples();
        let data_size = samples * channels as usize;
        let mut data = vec![0f32; data_size];

        let frame_data = resampled.data(0);
        let byte_slice =
            unsafe { std::slice::from_raw_parts(frame_data.as_ptr() as *const f32, data_size) };
        data.copy_from_slice(byte_slice);

        let duration = if sample_rate > 0 {
            (samples as i64 * 1000) / sample_rate as i64
        } else {
            0
        };

        AudioFrame {
            pts,
            duration,
            samples,
            sample_rate,
            channels,
            format: SampleFormat::F32,
            data,
        }
    }
}

/// 冲洗重采样器的内部延迟；None 表示没有残留样本
fn resampler_tail(
    resampler: &mut software::resampling::Context,
) -> Result<Option<util::frame::Audio>> {
    let pending = resampler.delay().map(|d| d.output).unwrap_or(0);
    if pending <= 0 {
        return Ok(None);
    }

    let mut tail = util::frame::Audio::new(
        resampler.output().format,
        pending as usize,
        resampler.output().channel_layout,
    );
    resampler.flush(&mut tail)?;

    if tail.samples() == 0 {
        return Ok(None);
    }
    Ok(Some(tail))
}
