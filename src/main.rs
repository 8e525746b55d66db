mod audio;
mod config;
mod controller;
mod display_bridge;
mod error;
mod net_link;
mod protocol;

use audio::{AudioConfig, AudioSystem, CaptureEvent, PlaybackScheduler};
use config::Config;
use controller::SessionController;
use display_bridge::DisplayBridge;
use net_link::{LinkStateCell, NetCommand, NetEvent, NetLink};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let mut config = Config::new().map_err(|e| anyhow::anyhow!(e))?;

    // 客户端标识，每次启动生成，用于连接请求头
    config.client_id = Uuid::new_v4().to_string();

    log::info!(
        "{} v{} starting, client id {}",
        config.app_name,
        config.app_version,
        config.client_id
    );

    // 创建通道，用于组件间通信
    // 事件通道
    let (tx_net_event, mut rx_net_event) = mpsc::channel::<NetEvent>(100);

    // 命令通道
    let (tx_net_cmd, rx_net_cmd) = mpsc::channel::<NetCommand>(100);

    // 采集帧通道
    let (tx_capture, mut rx_capture) = mpsc::channel::<CaptureEvent>(100);

    // 启动显示桥，优先启动，用于播报设备或连接错误
    let display = Arc::new(DisplayBridge::new(&config).await?);

    // 启动音频系统；设备打开失败时在建立链路前中止会话
    let audio_config = AudioConfig {
        capture_device: config.capture_device.to_string(),
        playback_device: config.playback_device.to_string(),
        sample_rate: config.sample_rate,
        channels: config.channels,
        capture_block_size: config.capture_block_size,
        playback_period_size: config.playback_period_size,
    };
    let (mut audio_system, sink) = match AudioSystem::start(audio_config, tx_capture) {
        Ok(v) => v,
        Err(e) => {
            log::error!("{}", e);
            let _ = display.send_error("Audio device unavailable").await;
            return Err(e.into());
        }
    };
    let capture_gate = audio_system.capture_gate();

    // 播放调度器，驱动混音线程
    let scheduler = PlaybackScheduler::new(Box::new(sink), config.sample_rate);

    // 链路状态，网络任务写，其余组件只读
    let link_state = Arc::new(LinkStateCell::new());

    // 启动网络链接，与远端服务通信
    let net_link = NetLink::new(config.clone(), link_state.clone(), tx_net_event, rx_net_cmd);
    tokio::spawn(async move {
        net_link.run().await;
    });

    let mut controller =
        SessionController::new(link_state, capture_gate, tx_net_cmd, scheduler, display);

    log::info!("Relay core started");

    // 主事件循环，处理各组件事件
    loop {
        tokio::select! {
            // 监听 Ctrl+C 信号
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }

            // 监听与服务器的网络事件
            Some(event) = rx_net_event.recv() => {
                controller.handle_net_event(event).await;
            }

            // 监听采集线程发来的帧
            Some(event) = rx_capture.recv() => {
                controller.handle_capture_event(event).await;
            }
        }
    }

    // 关闭：丢弃控制器让命令通道关闭（链路走 Closing→Closed），然后停音频线程
    drop(controller);
    audio_system.stop();
    Ok(())
}
