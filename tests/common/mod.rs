//! Shared helpers for the integration tests: client plumbing over real
//! loopback TCP plus a scripted hardware interface.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

use canhubd::{
    ApiFrame, CanFrame, CanInterface, CanMode, CanServer, Frame, FrameArray, InterfaceError,
    InterfaceFeatures, StatisticsSnapshot, FRAME_ARRAY_SIZE,
};

/// Dispatch period used by the tests, short so scenarios settle quickly.
pub const TEST_DISPATCH_MS: u64 = 5;
/// Statistics period used by the tests.
pub const TEST_STATISTICS_MS: u64 = 50;

const IO_TIMEOUT: Duration = Duration::from_secs(2);
const SILENCE_WINDOW: Duration = Duration::from_millis(150);

/// Wait long enough for several dispatch and statistics periods.
pub async fn settle() {
    sleep(Duration::from_millis(200)).await;
}

/// Add a test-configured network to the server and enable it on an
/// ephemeral loopback port.
pub async fn start_network(server: &mut CanServer) -> (u8, SocketAddr) {
    let network = server.add_network(0).unwrap();
    network.set_server_address("127.0.0.1".parse().unwrap());
    network.set_dispatch_period(TEST_DISPATCH_MS);
    network.set_statistics_period(TEST_STATISTICS_MS);
    let id = network.id();
    network.enable().await.unwrap();
    let addr = network.server_address().unwrap();
    (id, addr)
}

pub async fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.unwrap()
}

/// Read exactly `count` frames off the stream.
pub async fn read_frames(stream: &mut TcpStream, count: usize) -> Vec<Frame> {
    let mut buf = vec![0u8; count * FRAME_ARRAY_SIZE];
    timeout(IO_TIMEOUT, stream.read_exact(&mut buf))
        .await
        .expect("timed out waiting for frames")
        .expect("stream closed while waiting for frames");
    buf.chunks_exact(FRAME_ARRAY_SIZE)
        .map(|chunk| Frame::decode(chunk).expect("received frame must decode"))
        .collect()
}

/// Read the two-frame connection preamble: NAME, then BITRATE.
pub async fn read_preamble(stream: &mut TcpStream) -> (String, i32, i32) {
    let frames = read_frames(stream, 2).await;
    let name = match &frames[0] {
        Frame::Api(ApiFrame::Name(name)) => name.clone(),
        other => panic!("expected NAME frame first, got {other:?}"),
    };
    let (nominal, data) = match &frames[1] {
        Frame::Api(ApiFrame::Bitrate { nominal, data }) => (*nominal, *data),
        other => panic!("expected BITRATE frame second, got {other:?}"),
    };
    (name, nominal, data)
}

/// Connect a client and consume its preamble.
pub async fn connect_client(addr: SocketAddr) -> TcpStream {
    let mut stream = connect(addr).await;
    read_preamble(&mut stream).await;
    stream
}

/// Assert the stream delivers nothing (and does not close) for a while.
pub async fn expect_silence(stream: &mut TcpStream) {
    let mut buf = [0u8; 1];
    match timeout(SILENCE_WINDOW, stream.read(&mut buf)).await {
        Err(_) => {}
        Ok(Ok(0)) => panic!("stream was closed while silence was expected"),
        Ok(Ok(_)) => panic!("unexpected bytes received"),
        Ok(Err(e)) => panic!("read failed: {e}"),
    }
}

/// Wait for the next statistics snapshot.
pub async fn next_snapshot(rx: &mut broadcast::Receiver<StatisticsSnapshot>) -> StatisticsSnapshot {
    timeout(IO_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for a statistics snapshot")
        .expect("statistics channel closed")
}

/// Scripted hardware interface state, shared with the test body.
pub struct MockState {
    pub connected: bool,
    /// Journal of interface operations, in call order.
    pub calls: Vec<String>,
    /// Frame arrays the "hardware" will deliver to `read`.
    pub rx_queue: VecDeque<FrameArray>,
    /// CAN frames the network wrote to the hardware.
    pub written: Vec<CanFrame>,
    pub features: InterfaceFeatures,
    pub fail_connect: bool,
    pub fail_bitrate: bool,
    pub fail_mode: bool,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            connected: false,
            calls: Vec::new(),
            rx_queue: VecDeque::new(),
            written: Vec::new(),
            features: InterfaceFeatures::ERROR_FRAMES | InterfaceFeatures::CAN_FD,
            fail_connect: false,
            fail_bitrate: false,
            fail_mode: false,
        }
    }
}

/// A hardware plugin whose behavior is scripted through [`MockState`].
pub struct MockInterface {
    state: Arc<Mutex<MockState>>,
}

impl MockInterface {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn handle(&self) -> Arc<Mutex<MockState>> {
        Arc::clone(&self.state)
    }
}

impl CanInterface for MockInterface {
    fn connect(&mut self) -> Result<(), InterfaceError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("connect".to_string());
        if state.fail_connect {
            return Err(InterfaceError::Device);
        }
        state.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.calls.push("disconnect".to_string());
        state.connected = false;
    }

    fn connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    fn supported_features(&self) -> InterfaceFeatures {
        self.state.lock().unwrap().features
    }

    fn set_mode(&mut self, mode: CanMode) -> Result<(), InterfaceError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("set_mode {mode:?}"));
        if state.fail_mode {
            return Err(InterfaceError::Mode);
        }
        Ok(())
    }

    fn set_bitrate(&mut self, nominal: i32, data: i32) -> Result<(), InterfaceError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("set_bitrate {nominal} {data}"));
        if state.fail_bitrate {
            return Err(InterfaceError::Bitrate);
        }
        Ok(())
    }

    fn read(&mut self) -> Result<Option<FrameArray>, InterfaceError> {
        Ok(self.state.lock().unwrap().rx_queue.pop_front())
    }

    fn write(&mut self, frame: &CanFrame) -> Result<(), InterfaceError> {
        self.state.lock().unwrap().written.push(frame.clone());
        Ok(())
    }
}

/// Convenience for test payloads.
pub fn can_frame(id: u32, data: &[u8]) -> CanFrame {
    CanFrame::new(id, data).unwrap()
}

/// Write one frame to the server and flush it.
pub async fn send_frame(stream: &mut TcpStream, bytes: &[u8]) {
    stream.write_all(bytes).await.unwrap();
    stream.flush().await.unwrap();
}
