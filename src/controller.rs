use crate::audio::{CaptureEvent, PlaybackScheduler};
use crate::display_bridge::DisplayBridge;
use crate::error::RelayError;
use crate::net_link::{LinkStateCell, NetCommand, NetEvent};
use crate::protocol::{self, ControlMessage};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Per-session state of the relay: everything that starts on connect and is
/// torn down on disconnect lives here, not in globals.
pub struct SessionController {
    link_state: Arc<LinkStateCell>,
    capture_gate: Arc<AtomicBool>,
    net_tx: mpsc::Sender<NetCommand>,
    scheduler: PlaybackScheduler,
    display: Arc<DisplayBridge>,
}

impl SessionController {
    pub fn new(
        link_state: Arc<LinkStateCell>,
        capture_gate: Arc<AtomicBool>,
        net_tx: mpsc::Sender<NetCommand>,
        scheduler: PlaybackScheduler,
        display: Arc<DisplayBridge>,
    ) -> Self {
        Self {
            link_state,
            capture_gate,
            net_tx,
            scheduler,
            display,
        }
    }

    pub async fn handle_net_event(&mut self, event: NetEvent) {
        match event {
            NetEvent::Text(text) => self.process_control_text(&text).await,
            NetEvent::Binary(data) => self.accept_audio(&data),
            NetEvent::Connected => {
                log::info!("WebSocket Connected");
                self.capture_gate.store(true, Ordering::Release);
                if let Err(e) = self.display.send_status("Connected - streaming...").await {
                    log::error!("Failed to send to display: {}", e);
                }
            }
            NetEvent::Error(msg) => {
                if let Err(e) = self
                    .display
                    .send_error(&format!("Connection error: {}", msg))
                    .await
                {
                    log::error!("Failed to send to display: {}", e);
                }
            }
            NetEvent::Disconnected => {
                log::info!("WebSocket Disconnected");
                // 会话全停：停采集、清空播放时间线
                self.capture_gate.store(false, Ordering::Release);
                self.scheduler.flush();
                if let Err(e) = self.display.send_status("Disconnected").await {
                    log::error!("Failed to send to display: {}", e);
                }
            }
        }
    }

    async fn process_control_text(&mut self, text: &str) {
        match protocol::parse(text) {
            Ok(ControlMessage::Audio { data }) => match STANDARD.decode(&data) {
                Ok(bytes) => self.accept_audio(&bytes),
                Err(e) => log::warn!(
                    "{}",
                    RelayError::Decode(format!("invalid base64 payload: {}", e))
                ),
            },
            Ok(ControlMessage::Transcript { text }) => {
                log::info!("Transcript: {}", text);
                if let Err(e) = self.display.send_transcript(&text).await {
                    log::error!("Failed to send to display: {}", e);
                }
            }
            Ok(ControlMessage::Error { message }) => {
                log::error!("Error from server: {}", message);
                if let Err(e) = self.display.send_error(&format!("Error: {}", message)).await {
                    log::error!("Failed to send to display: {}", e);
                }
            }
            Ok(ControlMessage::Unknown) => {
                log::debug!("Unhandled control message: {}", text);
            }
            // 解析失败只记录诊断，流水线继续
            Err(e) => log::warn!("{}", e),
        }
    }

    /// Both delivery encodings (binary frame, base64-in-text) land here once
    /// raw bytes are in hand.
    fn accept_audio(&mut self, data: &[u8]) {
        if let Err(e) = self.scheduler.accept_fragment(data) {
            // 坏分片丢弃，不影响已排期的单元
            log::warn!("{}", e);
        }
    }

    pub async fn handle_capture_event(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Frame(frame) => {
                // 链路未打开：静默丢弃，不排队不重试（实时优先于完整性）
                if !self.link_state.is_open() {
                    return;
                }
                match self.net_tx.try_send(NetCommand::SendBinary(frame)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        log::debug!("Outbound channel full, dropping capture frame");
                    }
                    Err(TrySendError::Closed(_)) => {
                        log::error!("Failed to send audio to NetLink: channel closed");
                    }
                }
            }
        }
    }
}
