use std::sync::Arc;

use anyhow::Result;
use relay_api::Frame;
use tokio::{
    io::{BufReader, BufWriter},
    net::{TcpListener, TcpStream},
    sync::mpsc::unbounded_channel,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Session;
use crate::{
    ipc::{read_frame, write_frame},
    relay::Relay,
    services::log::{self, Direction},
};

/// Accept line-delimited JSON clients until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    relay: Arc<Relay>,
    shutdown: CancellationToken,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "tcp transport listening");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "tcp client accepted");
                    let relay = relay.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, relay, shutdown).await {
                            warn!(%peer, "tcp session ended: {err:#}");
                        }
                    });
                }
                Err(err) => warn!("accept failed: {err}"),
            }
        }
    }
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    relay: Arc<Relay>,
    shutdown: CancellationToken,
) -> Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut writer = BufWriter::new(write_half);
    let (session, mut deliveries) = Session::open(relay, "tcp");

    // read_line is not cancel safe, so reading gets its own task
    let (inbound_tx, mut inbound) = unbounded_channel();
    let reader_task = tokio::spawn(async move {
        let mut reader = BufReader::new(read_half);
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(frame)) => {
                    if inbound_tx.send(Ok(frame)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    let fatal = err.downcast_ref::<std::io::Error>().is_some();
                    if inbound_tx.send(Err(err)).is_err() || fatal {
                        break;
                    }
                }
            }
        }
    });

    send(&mut writer, &session.connected_frame()).await?;
    let result = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            received = inbound.recv() => {
                let reply = match received {
                    Some(Ok(frame)) => {
                        log::frame(Direction::Inbound, "tcp", &frame);
                        session.handle(frame)
                    }
                    Some(Err(err)) => Some(Frame::error("malformed_frame", format!("{err:#}"))),
                    None => break Ok(()),
                };
                if let Some(reply) = reply {
                    if let Err(err) = send(&mut writer, &reply).await {
                        break Err(err);
                    }
                }
            }
            Some(delivery) = deliveries.recv() => {
                if let Err(err) = send(&mut writer, &Session::delivery_frame(delivery)).await {
                    break Err(err);
                }
            }
        }
    };
    reader_task.abort();
    debug!(connection = %session.id(), "tcp client disconnected");
    result
}

async fn send<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    log::frame(Direction::Outbound, "tcp", frame);
    write_frame(writer, frame).await
}
