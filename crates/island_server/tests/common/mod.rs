//! A minimal masked WebSocket client and relay startup for island tests.

#![allow(dead_code)]

use island_server::config::IslandSettings;
use island_server::relay::Envelope;
use island_server::Relay;
use socket_engine::frame::{self, Decoded, Frame};
use socket_engine::{CloseFrame, EngineConfig, Opcode, ServerError, ShutdownHandle, WebSocketServer};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Island {
    pub addr: SocketAddr,
    shutdown: ShutdownHandle,
    task: JoinHandle<Result<(), ServerError>>,
}

impl Island {
    pub async fn start(idle_timeout_ms: u64) -> Self {
        let config = EngineConfig {
            port: 0,
            tick_ms: 20,
            ..Default::default()
        };
        let settings = IslandSettings {
            name: "Skerry".into(),
            idle_timeout_ms,
        };
        let server = WebSocketServer::bind(config, Relay::new(&settings)).expect("bind failed");
        let addr = server.local_addr().expect("no local address");
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(server.run());
        Self { addr, shutdown, task }
    }

    pub async fn stop(self) {
        self.shutdown.shutdown();
        timeout(IO_TIMEOUT, self.task)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
            .expect("server returned an error");
    }
}

pub struct Player {
    stream: TcpStream,
    buffer: Vec<u8>,
    /// Connection id announced in the welcome envelope.
    pub id: u64,
}

impl Player {
    /// Connects, upgrades and consumes the welcome envelope.
    pub async fn join(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect failed");
        let mut player = Self {
            stream,
            buffer: Vec::new(),
            id: 0,
        };
        let request = "GET /island HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
                       Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";
        player.stream.write_all(request.as_bytes()).await.expect("write failed");
        loop {
            if let Some(end) = player.buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                let head: Vec<u8> = player.buffer.drain(..end + 4).collect();
                assert!(head.starts_with(b"HTTP/1.1 101"), "upgrade refused");
                break;
            }
            assert!(player.fill().await > 0, "closed during upgrade");
        }

        let welcome = player.read_envelope().await;
        assert_eq!((welcome.namespace.as_str(), welcome.event.as_str()), ("system", "welcome"));
        assert_eq!(welcome.data["island"], "Skerry");
        player.id = welcome.data["id"].as_u64().expect("welcome without id");
        player
    }

    async fn fill(&mut self) -> usize {
        let mut chunk = [0u8; 4096];
        let n = timeout(IO_TIMEOUT, self.stream.read(&mut chunk))
            .await
            .expect("read timed out")
            .unwrap_or(0);
        self.buffer.extend_from_slice(&chunk[..n]);
        n
    }

    pub async fn send_frame(&mut self, opcode: Opcode, payload: &[u8]) {
        let mask: [u8; 4] = rand::random();
        let bytes = frame::encode_masked(payload, opcode, true, mask);
        self.stream.write_all(&bytes).await.expect("write failed");
    }

    pub async fn send_text(&mut self, text: &str) {
        self.send_frame(Opcode::Text, text.as_bytes()).await;
    }

    pub async fn read_frame(&mut self) -> Frame {
        loop {
            if let Decoded::Frame { frame, consumed } = frame::decode(&self.buffer, false).expect("invalid frame") {
                self.buffer.drain(..consumed);
                return frame;
            }
            assert!(self.fill().await > 0, "closed before a frame arrived");
        }
    }

    pub async fn read_envelope(&mut self) -> Envelope {
        let frame = self.read_frame().await;
        assert_eq!(frame.opcode, Opcode::Text, "expected a text frame, got {:?}", frame.opcode);
        serde_json::from_slice(&frame.payload).expect("invalid envelope")
    }

    pub async fn read_close(&mut self) -> CloseFrame {
        loop {
            let frame = self.read_frame().await;
            if frame.opcode == Opcode::Close {
                return CloseFrame::parse(&frame.payload).expect("invalid close payload");
            }
        }
    }
}
