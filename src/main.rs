use anyhow::Result;
use log::info;

use aurora_player::player::{NullAudioSink, NullVideoSink, PlaybackEngine, PlayerEvent};
use aurora_player::PlayerConfig;
use std::time::Duration;

/// 无头播放演示：打开文件、播放到结束，把事件打到日志
fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let uri = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("用法: aurora_player <媒体文件或URL>"))?;

    info!("🎬 AuroraStream 播放引擎启动");

    // 初始化 FFmpeg
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("FFmpeg 初始化失败: {}", e))?;

    let mut engine = PlaybackEngine::new(PlayerConfig::new());
    engine.set_video_sink(Box::new(NullVideoSink::default()));
    engine.set_audio_sink(Box::new(NullAudioSink::default()));
    let events = engine.subscribe();

    let descriptor = engine.open(&uri)?;
    info!(
        "已打开: {}x{} @ {:.2}fps, {} Hz/{} 声道, 时长 {} ms",
        descriptor.width,
        descriptor.height,
        descriptor.frame_rate,
        descriptor.sample_rate,
        descriptor.channels,
        descriptor.duration
    );

    engine.play()?;

    // 轮询事件直到播放结束或出错
    loop {
        match events.recv_timeout(Duration::from_secs(30)) {
            Ok(PlayerEvent::PositionChanged(position)) => {
                info!("位置: {} ms", position);
            }
            Ok(PlayerEvent::StateChanged(state)) => {
                info!("状态: {:?}", state);
            }
            Ok(PlayerEvent::Finished) => {
                info!("✅ 播放结束");
                break;
            }
            Ok(PlayerEvent::Error(message)) => {
                anyhow::bail!("播放出错: {}", message);
            }
            Ok(event) => {
                info!("事件: {:?}", event);
            }
            Err(_) => anyhow::bail!("等待事件超时"),
        }
    }

    Ok(())
}
