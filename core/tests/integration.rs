use std::{
    io,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use relay_api::{Frame, Kind};
use tokio::{
    io::BufReader,
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use topicrelay::{
    handlers::demo_relay,
    ipc::{read_frame, write_frame},
    transport::tcp,
    Relay, RouterSettings,
};

struct LogWriter(Arc<Mutex<Vec<u8>>>);
impl io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
struct MakeLogWriter(Arc<Mutex<Vec<u8>>>);
impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for MakeLogWriter {
    type Writer = LogWriter;
    fn make_writer(&'a self) -> Self::Writer {
        LogWriter(self.0.clone())
    }
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (r, w) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(r),
            writer: w,
        };
        assert_eq!(client.recv().await.kind, Kind::Connected);
        client
    }

    async fn send(&mut self, frame: Frame) {
        write_frame(&mut self.writer, &frame).await.unwrap();
    }

    async fn recv(&mut self) -> Frame {
        timeout(Duration::from_secs(2), read_frame(&mut self.reader))
            .await
            .expect("frame within timeout")
            .unwrap()
            .expect("connection open")
    }

    async fn subscribe(&mut self, destination: &str) -> String {
        self.send(Frame::subscribe(destination)).await;
        let reply = self.recv().await;
        assert_eq!(reply.kind, Kind::Subscribed);
        reply.subscription.unwrap()
    }
}

async fn spawn_relay() -> (SocketAddr, Arc<Relay>, CancellationToken) {
    let relay = demo_relay(RouterSettings::default());
    relay.set_broker_availability(true);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(tcp::serve(listener, relay.clone(), shutdown.clone()));
    (addr, relay, shutdown)
}

#[tokio::test]
async fn tcp_client_session() {
    let (addr, relay, shutdown) = spawn_relay().await;
    let mut client = Client::connect(addr).await;

    let one_time = client.subscribe("/app/subscribe").await;
    let msg = client.recv().await;
    assert_eq!(msg.kind, Kind::Message);
    assert_eq!(msg.subscription.as_deref(), Some(one_time.as_str()));
    assert_eq!(
        msg.payload.as_deref(),
        Some("server one-time message via the application")
    );

    let responses = client.subscribe("/queue/responses").await;
    let errors = client.subscribe("/queue/errors").await;

    client
        .send(Frame::send("/app/request", "one-time message from client"))
        .await;
    let msg = client.recv().await;
    assert_eq!(msg.subscription.as_deref(), Some(responses.as_str()));
    assert_eq!(
        msg.payload.as_deref(),
        Some("response to one-time message from client")
    );

    client.send(Frame::send("/app/request", "zero")).await;
    let msg = client.recv().await;
    assert_eq!(msg.subscription.as_deref(), Some(errors.as_str()));
    assert_eq!(
        msg.payload.as_deref(),
        Some("server exception: 'zero' is rejected")
    );

    client.send(Frame::unsubscribe(errors)).await;
    client.send(Frame::send("/app/request", "zero")).await;
    client.send(Frame::send("/queue/responses", "direct")).await;
    // the failure has no subscribers left, so the next frame is the direct one
    let msg = client.recv().await;
    assert_eq!(msg.payload.as_deref(), Some("direct"));

    drop(client);
    timeout(Duration::from_secs(2), async {
        while relay.stats().connections > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session closed");
    assert_eq!(relay.stats().subscriptions, 0);
    shutdown.cancel();
}

#[tokio::test]
async fn malformed_frames_are_reported_not_fatal() {
    let (addr, relay, shutdown) = spawn_relay().await;
    let mut client = Client::connect(addr).await;
    tokio::io::AsyncWriteExt::write_all(&mut client.writer, b"{not json}\n")
        .await
        .unwrap();
    let reply = client.recv().await;
    assert_eq!(reply.kind, Kind::Error);
    assert_eq!(reply.error.unwrap().code, "malformed_frame");

    client.send(Frame::send("/app/request", "")).await;
    client.send(Frame::subscribe("/topic/periodic")).await;
    assert_eq!(client.recv().await.kind, Kind::Subscribed);

    tokio::io::AsyncWriteExt::write_all(&mut client.writer, b"\xff\xfe\n")
        .await
        .unwrap();
    let reply = client.recv().await;
    assert_eq!(reply.kind, Kind::Error);
    assert_eq!(reply.error.unwrap().code, "malformed_frame");

    client.send(Frame::subscribe("/topic/performance")).await;
    let reply = client.recv().await;
    assert_eq!(reply.kind, Kind::Subscribed);
    assert_eq!(reply.destination.as_deref(), Some("/topic/performance"));
    assert_eq!(relay.stats().connections, 1);
    shutdown.cancel();
}

#[tokio::test]
async fn dropped_and_failed_messages_are_logged() {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(MakeLogWriter(buf.clone()))
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let relay = demo_relay(RouterSettings::default());
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let id = relay.on_connect(tx);
    relay.on_client_message(id, "/app/unknown", "x").unwrap();
    relay.on_client_message(id, "/app/request", "zero").unwrap();

    let logs = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
    assert!(logs.contains("no handler bound, message dropped"), "logs: {logs}");
    assert!(logs.contains("handler failed"), "logs: {logs}");
    assert!(logs.contains("'zero' is rejected"), "logs: {logs}");
}
