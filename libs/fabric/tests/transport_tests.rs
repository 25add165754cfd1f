use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use vox_fabric::{
    error::Error,
    transport::{
        dialer_for, Connection, Dialer, Event, FrameSink, FrameStream, MemoryDialer, TcpDialer,
        Transport, WsDialer,
    },
    Result,
};

/// Helper to get a free port
async fn get_listener() -> (TcpListener, std::net::SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Poll until `cond` holds, for at most two seconds
async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

fn received(event: Event) -> String {
    match event {
        Event::Received(frame) => frame,
        other => panic!("Expected a frame, got {:?}", other),
    }
}

#[tokio::test]
async fn tcp_send_receive_single_frame() {
    let (listener, addr) = get_listener().await;

    // Spawn server that echoes one line
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        write.write_all(format!("{line}\n").as_bytes()).await.unwrap();
    });

    let mut conn = TcpDialer::new(format!("tcp://{addr}"))
        .unwrap()
        .dial()
        .await
        .unwrap();
    conn.sink.send("VERTEX:ON:LAMP:VOX").await.unwrap();

    assert_eq!(received(conn.stream.receive().await), "VERTEX:ON:LAMP:VOX");
}

#[tokio::test]
async fn tcp_multiple_frames_preserve_boundaries_and_skip_blank_lines() {
    let (listener, addr) = get_listener().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream
            .write_all(b"VOX:OK:A:HUB\n\r\nVOX:OK:B:HUB\nVOX:OK:C:HUB\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
    });

    let mut conn = TcpDialer::new(format!("tcp://{addr}"))
        .unwrap()
        .dial()
        .await
        .unwrap();

    for expected in ["VOX:OK:A:HUB", "VOX:OK:B:HUB", "VOX:OK:C:HUB"] {
        assert_eq!(received(conn.stream.receive().await), expected);
    }
}

#[tokio::test]
async fn tcp_oversized_line_is_read_failure_and_stream_recovers() {
    let (listener, addr) = get_listener().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let flood = vec![b'A'; 1024 * 1024];
        stream.write_all(&flood).await.unwrap();
        stream.write_all(b"\nVOX:OK:LAMP:VERTEX\n").await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
    });

    let mut conn = TcpDialer::new(format!("tcp://{addr}"))
        .unwrap()
        .dial()
        .await
        .unwrap();

    match conn.stream.receive().await {
        Event::ReadFailure(_) => {}
        e => panic!("Expected ReadFailure, got {:?}", e),
    }
    assert_eq!(received(conn.stream.receive().await), "VOX:OK:LAMP:VERTEX");
}

#[tokio::test]
async fn tcp_peer_close_is_closed_event() {
    let (listener, addr) = get_listener().await;

    // Spawn server that immediately closes
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
    });

    let mut conn = TcpDialer::new(format!("tcp://{addr}"))
        .unwrap()
        .dial()
        .await
        .unwrap();

    match conn.stream.receive().await {
        Event::Closed(_) => {}
        e => panic!("Expected Closed, got {:?}", e),
    }
}

#[tokio::test]
async fn tcp_unreachable_endpoint_is_dial_error() {
    let (listener, addr) = get_listener().await;
    drop(listener);

    let result = TcpDialer::new(format!("tcp://{addr}")).unwrap().dial().await;
    assert!(matches!(result, Err(Error::Dial { .. })));
}

#[tokio::test]
async fn websocket_text_frames_and_close() {
    let (listener, addr) = get_listener().await;

    // Spawn hub that answers one frame, then closes
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let msg = ws.next().await.unwrap().unwrap();
        assert_eq!(msg.to_text().unwrap(), "VERTEX:ON:LAMP:VOX");
        ws.send(WsMessage::Text("VOX:OK:LAMP:VERTEX".to_string().into()))
            .await
            .unwrap();
        ws.close(None).await.unwrap();
    });

    let mut conn = WsDialer::new(format!("ws://{addr}")).dial().await.unwrap();
    conn.sink.send("VERTEX:ON:LAMP:VOX").await.unwrap();

    assert_eq!(received(conn.stream.receive().await), "VOX:OK:LAMP:VERTEX");
    match conn.stream.receive().await {
        Event::Closed(_) => {}
        e => panic!("Expected Closed, got {:?}", e),
    }
}

#[tokio::test]
async fn dialer_selected_by_scheme() {
    assert_eq!(
        dialer_for("ws://localhost:8092").unwrap().endpoint(),
        "ws://localhost:8092"
    );
    assert_eq!(
        dialer_for("tcp://localhost:7000").unwrap().endpoint(),
        "tcp://localhost:7000"
    );
    assert!(matches!(
        dialer_for("http://localhost"),
        Err(Error::InvalidEndpoint(_))
    ));
}

#[tokio::test]
async fn connect_fails_when_hub_unreachable() {
    let (dialer, _hub) = MemoryDialer::pair("memory://hub");
    dialer.set_online(false);

    let result = Transport::connect(dialer, Duration::from_millis(10), None).await;
    assert!(matches!(result, Err(Error::Dial { .. })));
}

#[tokio::test]
async fn read_failure_leaves_connection_usable() {
    let (dialer, mut hub) = MemoryDialer::pair("memory://hub");
    let transport = Transport::connect(dialer, Duration::from_millis(10), None)
        .await
        .unwrap();
    let peer = hub.accept().await.unwrap();

    peer.fail_read("garbled").unwrap();
    peer.send("VOX:OK:LAMP:HUB").unwrap();

    assert!(matches!(transport.read().await, Event::ReadFailure(_)));
    assert_eq!(received(transport.read().await), "VOX:OK:LAMP:HUB");
}

#[tokio::test]
async fn transport_reconnects_after_closure() {
    let (dialer, mut hub) = MemoryDialer::pair("memory://hub");
    let transport = Arc::new(
        Transport::connect(dialer.clone(), Duration::from_millis(5), None)
            .await
            .unwrap(),
    );

    let peer = hub.accept().await.unwrap();
    peer.send("VOX:OK:A:HUB").unwrap();
    assert_eq!(received(transport.read().await), "VOX:OK:A:HUB");

    // Hub goes away; the next read reports closure
    dialer.set_online(false);
    drop(peer);
    assert!(matches!(transport.read().await, Event::Closed(_)));

    // Writes against the dead connection fail until reconnected
    assert!(transport.write("HUB:PING:BUS:VOX").await.is_err());

    let (_stop, mut shutdown) = watch::channel(false);
    let reconnect = tokio::spawn({
        let transport = transport.clone();
        async move { transport.reconnect(&mut shutdown).await }
    });

    // One initial dial plus at least two failed retries
    eventually(|| dialer.attempts() >= 3).await;
    assert!(!transport.is_connected());

    dialer.set_online(true);
    reconnect.await.unwrap().unwrap();
    assert!(transport.is_connected());

    let mut peer = hub.accept().await.unwrap();
    peer.send("VOX:OK:B:HUB").unwrap();
    assert_eq!(received(transport.read().await), "VOX:OK:B:HUB");

    transport.write("HUB:PING:BUS:VOX").await.unwrap();
    assert_eq!(peer.recv().await.unwrap(), "HUB:PING:BUS:VOX");
}

#[tokio::test]
async fn reconnect_stops_on_shutdown() {
    let (dialer, _hub) = MemoryDialer::pair("memory://hub");
    let transport = Arc::new(
        Transport::connect(dialer.clone(), Duration::from_secs(60), None)
            .await
            .unwrap(),
    );
    dialer.set_online(false);

    let (stop, mut shutdown) = watch::channel(false);
    let reconnect = tokio::spawn({
        let transport = transport.clone();
        async move { transport.reconnect(&mut shutdown).await }
    });

    eventually(|| dialer.attempts() >= 2).await;
    stop.send(true).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(1), reconnect)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(Error::Shutdown)));
}

#[tokio::test]
async fn timed_out_write_retires_connection_without_splicing_frames() {
    let (listener, addr) = get_listener().await;
    let dialer: Arc<dyn Dialer> = Arc::new(TcpDialer::new(format!("tcp://{addr}")).unwrap());
    let transport = Transport::connect(
        dialer,
        Duration::from_millis(5),
        Some(Duration::from_millis(20)),
    )
    .await
    .unwrap();

    // The hub does not read, so the socket buffers fill up
    let (mut hub, _) = listener.accept().await.unwrap();
    let big = format!("VERTEX:SET:LAMP:{}:VOX", "7".repeat(50_000));
    let mut timed_out = false;
    for _ in 0..2000 {
        match transport.write(&big).await {
            Ok(()) => {}
            Err(Error::Timeout(_)) => {
                timed_out = true;
                break;
            }
            Err(e) => panic!("unexpected write error: {e}"),
        }
    }
    assert!(timed_out, "writes never blocked");

    // No more bytes go out on the retired connection
    assert!(matches!(
        transport.write("VERTEX:ON:LAMP:VOX").await,
        Err(Error::ConnectionClosed)
    ));
    let event = tokio::time::timeout(Duration::from_secs(1), transport.read())
        .await
        .unwrap();
    assert!(matches!(event, Event::Closed(_)));

    let mut wire = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), hub.read_to_end(&mut wire))
        .await
        .unwrap()
        .unwrap();
    let wire = String::from_utf8(wire).unwrap();
    let mut lines: Vec<&str> = wire.split('\n').collect();
    let tail = lines.pop().unwrap();
    assert!(!lines.is_empty());
    for line in lines {
        assert_eq!(line.len(), big.len());
        assert_eq!(line, big);
    }
    assert!(big.starts_with(tail));

    // A reconnect brings writes back
    let (_stop, mut shutdown) = watch::channel(false);
    let (reconnected, accepted) = tokio::join!(transport.reconnect(&mut shutdown), listener.accept());
    reconnected.unwrap();
    let (hub, _) = accepted.unwrap();

    transport.write("VERTEX:ON:LAMP:VOX").await.unwrap();
    let mut lines = BufReader::new(hub).lines();
    assert_eq!(
        lines.next_line().await.unwrap().unwrap(),
        "VERTEX:ON:LAMP:VOX"
    );
}

/// Connection whose writes never complete and which never receives
struct StalledDialer;

struct StalledSink;

struct SilentStream;

#[async_trait::async_trait]
impl FrameSink for StalledSink {
    async fn send(&mut self, _frame: &str) -> Result<()> {
        std::future::pending().await
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl FrameStream for SilentStream {
    async fn receive(&mut self) -> Event {
        std::future::pending().await
    }
}

#[async_trait::async_trait]
impl Dialer for StalledDialer {
    fn endpoint(&self) -> &str {
        "stalled://hub"
    }

    async fn dial(&self) -> Result<Connection> {
        Ok(Connection::new(StalledSink, SilentStream))
    }
}

#[tokio::test]
async fn reconnect_is_not_blocked_by_stuck_write() {
    let transport = Arc::new(
        Transport::connect(Arc::new(StalledDialer), Duration::from_millis(5), None)
            .await
            .unwrap(),
    );

    let stuck = tokio::spawn({
        let transport = transport.clone();
        async move { transport.write("VERTEX:ON:LAMP:VOX").await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!stuck.is_finished());

    let (_stop, mut shutdown) = watch::channel(false);
    tokio::time::timeout(Duration::from_secs(1), transport.reconnect(&mut shutdown))
        .await
        .expect("reconnect waited on a stuck write")
        .unwrap();
    assert!(transport.is_connected());

    let abandoned = tokio::time::timeout(Duration::from_secs(1), stuck)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(abandoned, Err(Error::ConnectionClosed)));
}
