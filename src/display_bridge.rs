use crate::config::Config;
use serde_json::json;
use std::sync::Arc;
use tokio::net::UdpSocket;

// 显示进程和Core进程通过本地UDP通信，端口在配置中指定
// 仅发送：状态文本和转写文本，单向通知
pub struct DisplayBridge {
    socket: Arc<UdpSocket>,
    target_addr: String,
}

impl DisplayBridge {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        Self::bind(config.display_local_port, config.display_remote_port).await
    }

    pub async fn bind(local_port: u16, remote_port: u16) -> anyhow::Result<Self> {
        // 绑定本地UDP端口
        let socket = UdpSocket::bind(format!("0.0.0.0:{}", local_port)).await?;
        let target_addr = format!("127.0.0.1:{}", remote_port);

        Ok(Self {
            socket: Arc::new(socket),
            target_addr,
        })
    }

    /// Status line shown to the user ("Connected - streaming...", ...).
    pub async fn send_status(&self, text: &str) -> anyhow::Result<()> {
        self.send(json!({"type": "status", "error": false, "text": text}).to_string())
            .await
    }

    /// Status line flagged as an error state.
    pub async fn send_error(&self, text: &str) -> anyhow::Result<()> {
        self.send(json!({"type": "status", "error": true, "text": text}).to_string())
            .await
    }

    /// Transcript text from the remote peer.
    pub async fn send_transcript(&self, text: &str) -> anyhow::Result<()> {
        self.send(json!({"type": "transcript", "text": text}).to_string())
            .await
    }

    async fn send(&self, msg: String) -> anyhow::Result<()> {
        self.socket
            .send_to(msg.as_bytes(), &self.target_addr)
            .await?;
        Ok(())
    }
}
