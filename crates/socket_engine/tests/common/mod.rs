//! Shared helpers for the socket engine integration tests: a minimal masked
//! client, a recording handler and server startup.

#![allow(dead_code)]

use socket_engine::frame::{self, Decoded, Frame};
use socket_engine::{
    CloseCode, CloseFrame, ConnectionId, Context, EngineConfig, Handler, Opcode, OpenInfo, ServerError,
    ShutdownHandle, WebSocketServer,
};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

pub const IO_TIMEOUT: Duration = Duration::from_secs(5);
pub const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
pub const SAMPLE_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

/// Engine configuration on an ephemeral port with a fast tick.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        host: "127.0.0.1".into(),
        port: 0,
        tick_ms: 20,
        max_message_bytes: 64 * 1024,
        ..Default::default()
    }
}

pub struct RunningServer {
    pub addr: SocketAddr,
    pub shutdown: ShutdownHandle,
    pub task: JoinHandle<Result<(), ServerError>>,
}

impl RunningServer {
    pub async fn stop(self) {
        self.shutdown.shutdown();
        timeout(IO_TIMEOUT, self.task)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
            .expect("server returned an error");
    }
}

pub async fn start_server<H: Handler>(config: EngineConfig, handler: H) -> RunningServer {
    let server = WebSocketServer::bind(config, handler).expect("bind failed");
    let addr = server.local_addr().expect("no local address");
    let shutdown = server.shutdown_handle();
    let task = tokio::spawn(server.run());
    RunningServer { addr, shutdown, task }
}

/// Callback invocations observed by [`Recorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open(ConnectionId, OpenInfo),
    Message(ConnectionId, Opcode, Vec<u8>),
    Ping(ConnectionId, Vec<u8>),
    Pong(ConnectionId, Vec<u8>),
    Close(ConnectionId, Option<u16>, Option<String>),
    Error(ConnectionId, String),
    Tick,
}

/// Handler that reports every callback on a channel and optionally echoes
/// messages back to their sender.
pub struct Recorder {
    events: mpsc::UnboundedSender<Event>,
    echo: bool,
}

impl Recorder {
    pub fn new(echo: bool) -> (Self, Events) {
        let (events, receiver) = mpsc::unbounded_channel();
        (Self { events, echo }, Events { receiver })
    }

    fn record(&self, event: Event) {
        let _ = self.events.send(event);
    }
}

impl Handler for Recorder {
    fn on_open(&mut self, _ctx: &mut Context<'_>, id: ConnectionId, info: &OpenInfo) {
        self.record(Event::Open(id, info.clone()));
    }

    fn on_message(&mut self, ctx: &mut Context<'_>, id: ConnectionId, opcode: Opcode, payload: &[u8]) {
        self.record(Event::Message(id, opcode, payload.to_vec()));
        if self.echo {
            match opcode {
                Opcode::Text => ctx.send(id, String::from_utf8_lossy(payload).into_owned()),
                _ => ctx.send(id, payload),
            };
        }
    }

    fn on_ping(&mut self, _ctx: &mut Context<'_>, id: ConnectionId, payload: &[u8]) {
        self.record(Event::Ping(id, payload.to_vec()));
    }

    fn on_pong(&mut self, _ctx: &mut Context<'_>, id: ConnectionId, payload: &[u8]) {
        self.record(Event::Pong(id, payload.to_vec()));
    }

    fn on_close(&mut self, _ctx: &mut Context<'_>, id: ConnectionId, code: Option<CloseCode>, reason: Option<&str>) {
        self.record(Event::Close(id, code.map(CloseCode::as_u16), reason.map(str::to_string)));
    }

    fn on_error(&mut self, _ctx: &mut Context<'_>, id: ConnectionId, message: &str) {
        self.record(Event::Error(id, message.to_string()));
    }

    fn on_tick(&mut self, _ctx: &mut Context<'_>) {
        self.record(Event::Tick);
    }
}

pub struct Events {
    receiver: mpsc::UnboundedReceiver<Event>,
}

impl Events {
    /// Next non-tick event.
    pub async fn next(&mut self) -> Event {
        loop {
            let event = timeout(IO_TIMEOUT, self.receiver.recv())
                .await
                .expect("timed out waiting for an event")
                .expect("event channel closed");
            if event != Event::Tick {
                return event;
            }
        }
    }

    /// Waits for the next open event and returns its connection id.
    pub async fn opened(&mut self) -> ConnectionId {
        match self.next().await {
            Event::Open(id, _) => id,
            other => panic!("expected open, got {other:?}"),
        }
    }

    /// Every non-tick event that arrives within `window`.
    pub async fn quiet_for(&mut self, window: Duration) -> Vec<Event> {
        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, self.receiver.recv()).await {
            if event != Event::Tick {
                seen.push(event);
            }
        }
        seen
    }

    /// Counts ticks arriving within `window`, discarding other events.
    pub async fn count_ticks(&mut self, window: Duration) -> usize {
        let mut ticks = 0;
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, self.receiver.recv()).await {
            if event == Event::Tick {
                ticks += 1;
            }
        }
        ticks
    }
}

pub fn upgrade_request(path: &str, extra_headers: &[(&str, &str)]) -> String {
    let mut request = format!(
        "GET {path} HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Key: {SAMPLE_KEY}\r\nSec-WebSocket-Version: 13\r\n"
    );
    for (name, value) in extra_headers {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    request.push_str("\r\n");
    request
}

/// A bare-bones client speaking masked frames over a raw TCP stream.
pub struct TestClient {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = timeout(IO_TIMEOUT, TcpStream::connect(addr))
            .await
            .expect("connect timed out")
            .expect("connect failed");
        Self {
            stream,
            buffer: Vec::new(),
        }
    }

    /// Connects and completes the upgrade, returning the response head.
    pub async fn open(addr: SocketAddr, path: &str, extra_headers: &[(&str, &str)]) -> (Self, String) {
        let mut client = Self::connect(addr).await;
        client.send_raw(upgrade_request(path, extra_headers).as_bytes()).await;
        let head = client.read_http_response().await;
        assert!(head.starts_with("HTTP/1.1 101"), "upgrade refused: {head}");
        (client, head)
    }

    /// Gives up the client wrapper for tests that drive the socket directly.
    /// Anything already buffered is dropped.
    pub fn into_stream(self) -> TcpStream {
        self.stream
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("write failed");
    }

    pub async fn send_frame(&mut self, opcode: Opcode, fin: bool, payload: &[u8]) {
        let mask: [u8; 4] = rand::random();
        self.send_raw(&frame::encode_masked(payload, opcode, fin, mask)).await;
    }

    pub async fn send_text(&mut self, text: &str) {
        self.send_frame(Opcode::Text, true, text.as_bytes()).await;
    }

    pub async fn send_close(&mut self, code: CloseCode, reason: &str) {
        let payload = CloseFrame::new(code, reason).to_payload();
        self.send_frame(Opcode::Close, true, &payload).await;
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

    /// Reads up to the end of an HTTP response head. Bytes after it stay
    /// buffered for frame reads.
    pub async fn read_http_response(&mut self) -> String {
        loop {
            if let Some(end) = self.buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                let head: Vec<u8> = self.buffer.drain(..end + 4).collect();
                return String::from_utf8(head).expect("response head is not UTF-8");
            }
            assert!(self.fill().await > 0, "connection closed before the response ended");
        }
    }

    pub async fn read_frame(&mut self) -> Frame {
        loop {
            if let Decoded::Frame { frame, consumed } = frame::decode(&self.buffer, false).expect("invalid server frame") {
                self.buffer.drain(..consumed);
                return frame;
            }
            assert!(self.fill().await > 0, "connection closed before a frame arrived");
        }
    }

    /// Reads frames until a close frame arrives and returns its payload.
    pub async fn read_close(&mut self) -> CloseFrame {
        loop {
            let frame = self.read_frame().await;
            if frame.opcode == Opcode::Close {
                return CloseFrame::parse(&frame.payload).expect("invalid close payload");
            }
        }
    }

    /// True once the server has closed the socket.
    pub async fn closed_by_server(&mut self) -> bool {
        loop {
            if self.fill().await == 0 {
                return true;
            }
        }
    }
}
