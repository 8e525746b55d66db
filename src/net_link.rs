use crate::config::Config;
use crate::error::RelayError;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

/// Lifecycle of the duplex channel as observed by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState {
    Closed = 0,
    Opening = 1,
    Open = 2,
    Closing = 3,
}

/// Shared, lock-free view of the current [`LinkState`].
///
/// The net link task is the only writer; every other component holds a read
/// handle and uses it to decide whether sends are permitted.
#[derive(Debug, Default)]
pub struct LinkStateCell(AtomicU8);

impl LinkStateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(LinkState::Closed as u8))
    }

    pub fn get(&self) -> LinkState {
        match self.0.load(Ordering::Acquire) {
            1 => LinkState::Opening,
            2 => LinkState::Open,
            3 => LinkState::Closing,
            _ => LinkState::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        self.get() == LinkState::Open
    }

    // 仅由网络链路任务调用
    pub(crate) fn set(&self, state: LinkState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

#[derive(Debug)]
pub enum NetEvent {
    Text(String),
    Binary(Vec<u8>),
    Connected,
    Disconnected,
    Error(String),
}

#[derive(Debug)]
pub enum NetCommand {
    SendBinary(Vec<u8>),
}

pub struct NetLink {
    config: Config,
    state: Arc<LinkStateCell>,
    tx: mpsc::Sender<NetEvent>,
    rx_cmd: mpsc::Receiver<NetCommand>,
}

impl NetLink {
    pub fn new(
        config: Config,
        state: Arc<LinkStateCell>,
        tx: mpsc::Sender<NetEvent>,
        rx_cmd: mpsc::Receiver<NetCommand>,
    ) -> Self {
        Self { config, state, tx, rx_cmd }
    }

    // 如果发生错误断开连接，指数退避后重连
    pub async fn run(mut self) {
        let mut retry_delay = 1;
        loop {
            match self.connect_and_loop(&mut retry_delay).await {
                Ok(()) => {
                    // connect_and_loop returns Ok only when the command channel
                    // closed, i.e. the owner is shutting down.
                    break;
                }
                Err(e) => {
                    self.state.set(LinkState::Closed);
                    let err = RelayError::Connection(format!("{:#}", e));
                    log::error!("{}. Retrying in {}s...", err, retry_delay);
                    let _ = self.tx.send(NetEvent::Error(err.to_string())).await;
                    if self.tx.send(NetEvent::Disconnected).await.is_err() {
                        // 主循环已退出
                        break;
                    }
                    tokio::time::sleep(tokio::time::Duration::from_secs(retry_delay)).await;
                    retry_delay = std::cmp::min(retry_delay * 2, 60);
                }
            }
        }
    }

    // 进入连接和主循环，处理WebSocket消息和发送命令
    async fn connect_and_loop(&mut self, retry_delay: &mut u64) -> anyhow::Result<()> {
        self.state.set(LinkState::Opening);

        // 根据配置构建WebSocket请求
        let url = Url::parse(self.config.ws_url.as_ref())?;
        let host = url.host_str().unwrap_or("localhost");

        let request = tokio_tungstenite::tungstenite::http::Request::builder()
            .method("GET")
            .uri(self.config.ws_url)
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .header("Client-Id", &self.config.client_id)
            .body(())?;

        log::info!("Connecting to {}...", self.config.ws_url);
        let (ws_stream, _) = connect_async(request).await?;
        log::info!("Connected!");

        let (mut write, mut read) = ws_stream.split();

        // 丢弃断线期间堆积的过期命令：链路不在 Open 状态时帧应被丢弃而不是排队
        while self.rx_cmd.try_recv().is_ok() {}

        self.state.set(LinkState::Open);
        self.tx.send(NetEvent::Connected).await?;
        *retry_delay = 1;

        // 主循环，处理读取和写入
        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(msg)) => {
                            match msg {
                                Message::Text(text) => {
                                    self.tx.send(NetEvent::Text(text.to_string())).await?;
                                }
                                Message::Binary(data) => {
                                    self.tx.send(NetEvent::Binary(data.to_vec())).await?;
                                }
                                Message::Close(frame) => {
                                    log::info!("Server closed connection: {:?}", frame);
                                    return Err(anyhow::anyhow!("Connection closed"));
                                }
                                _ => {}
                            }
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(anyhow::anyhow!("Connection closed")),
                    }
                }
                cmd = self.rx_cmd.recv() => {
                    match cmd {
                        Some(NetCommand::SendBinary(data)) => {
                            write.send(Message::Binary(data.into())).await?;
                        }
                        None => {
                            // 命令通道关闭 => 主动关闭链路
                            self.state.set(LinkState::Closing);
                            let _ = write.send(Message::Close(None)).await;
                            self.state.set(LinkState::Closed);
                            log::info!("Link closed");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_cell_starts_closed() {
        let cell = LinkStateCell::new();
        assert_eq!(cell.get(), LinkState::Closed);
        assert!(!cell.is_open());
    }

    #[test]
    fn state_cell_walks_full_lifecycle() {
        let cell = LinkStateCell::new();
        for state in [
            LinkState::Opening,
            LinkState::Open,
            LinkState::Closing,
            LinkState::Closed,
        ] {
            cell.set(state);
            assert_eq!(cell.get(), state);
        }
    }

    #[test]
    fn only_open_permits_sends() {
        let cell = LinkStateCell::new();
        cell.set(LinkState::Opening);
        assert!(!cell.is_open());
        cell.set(LinkState::Open);
        assert!(cell.is_open());
        cell.set(LinkState::Closing);
        assert!(!cell.is_open());
    }
}
