use anyhow::Result;
use clap::Parser;
use relay_api::{Frame, Kind};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter},
    net::TcpStream,
};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser)]
struct Opts {
    /// Relay address (host:port).
    #[arg(long, default_value = "127.0.0.1:61613")]
    addr: String,
    /// Message sent to the explicit-response handler.
    #[arg(long, default_value = "one-time message from client")]
    message: String,
    /// Exit after this many message frames; run forever when omitted.
    #[arg(long)]
    limit: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let opts = Opts::parse();
    let stream = TcpStream::connect(&opts.addr).await?;
    let (r, w) = stream.into_split();
    let mut reader = BufReader::new(r);
    let mut writer = BufWriter::new(w);

    let hello = read(&mut reader).await?;
    if hello.kind != Kind::Connected {
        anyhow::bail!("expected connected frame, got {:?}", hello.kind);
    }
    info!(connection = ?hello.payload, "client connected");

    for destination in ["/app/subscribe", "/queue/responses", "/queue/errors", "/topic/periodic"] {
        send(&mut writer, &Frame::subscribe(destination)).await?;
    }

    info!("client sends: {}", opts.message);
    let mut request = Frame::send("/app/request", opts.message.clone());
    request.correlation = Some(Uuid::new_v4().to_string());
    send(&mut writer, &request).await?;
    // exercise the failure path as well
    send(&mut writer, &Frame::send("/app/request", "zero")).await?;

    let mut received = 0;
    loop {
        let frame = read(&mut reader).await?;
        match frame.kind {
            Kind::Message => {
                info!(
                    destination = ?frame.destination,
                    subscription = ?frame.subscription,
                    "client received: {}",
                    frame.payload.unwrap_or_default()
                );
                received += 1;
                if opts.limit.is_some_and(|limit| received >= limit) {
                    break;
                }
            }
            Kind::Subscribed => {
                info!(
                    destination = ?frame.destination,
                    subscription = ?frame.subscription,
                    "subscribed"
                )
            }
            Kind::Error => error!(error = ?frame.error, "client error"),
            _ => {}
        }
    }
    Ok(())
}

async fn send<W: AsyncWriteExt + Unpin>(w: &mut W, frame: &Frame) -> Result<()> {
    let s = serde_json::to_string(frame)?;
    w.write_all(s.as_bytes()).await?;
    w.write_all(b"\n").await?;
    w.flush().await?;
    Ok(())
}

async fn read<R: AsyncBufReadExt + Unpin>(r: &mut R) -> Result<Frame> {
    let mut line = String::new();
    r.read_line(&mut line).await?;
    if line.is_empty() {
        anyhow::bail!("relay closed the connection")
    }
    Frame::parse(&line)
}
