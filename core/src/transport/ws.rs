use std::{net::TcpListener, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use relay_api::Frame;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Session;
use crate::{
    relay::Relay,
    services::log::{self, Direction},
    stats::StatsSnapshot,
};

#[derive(Clone)]
pub struct GatewayState {
    relay: Arc<Relay>,
    shutdown: CancellationToken,
}

/// Build the HTTP application: the `/relay` WebSocket endpoint and the
/// read-only `/stats` export.
pub fn build_router(relay: Arc<Relay>, shutdown: CancellationToken) -> Router {
    Router::new()
        .route("/relay", get(ws_handler))
        .route("/stats", get(stats))
        .with_state(GatewayState { relay, shutdown })
}

async fn stats(State(state): State<GatewayState>) -> Json<StatsSnapshot> {
    Json(state.relay.stats())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: GatewayState) {
    let (mut sender, mut receiver) = socket.split();
    let (session, mut deliveries) = Session::open(state.relay, "ws");
    if send(&mut sender, &session.connected_frame()).await.is_err() {
        return;
    }
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            inbound = receiver.next() => {
                let reply = match inbound {
                    Some(Ok(Message::Text(text))) => match Frame::parse(&text) {
                        Ok(frame) => {
                            log::frame(Direction::Inbound, "ws", &frame);
                            session.handle(frame)
                        }
                        Err(err) => Some(Frame::error("malformed_frame", format!("{err:#}"))),
                    },
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => None,
                };
                if let Some(reply) = reply {
                    if send(&mut sender, &reply).await.is_err() {
                        break;
                    }
                }
            }
            Some(delivery) = deliveries.recv() => {
                if send(&mut sender, &Session::delivery_frame(delivery)).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!(connection = %session.id(), "ws client disconnected");
}

async fn send(sender: &mut SplitSink<WebSocket, Message>, frame: &Frame) -> Result<()> {
    log::frame(Direction::Outbound, "ws", frame);
    sender.send(Message::Text(frame.to_json()?)).await?;
    Ok(())
}

/// Serve the gateway on an already bound, non-blocking listener until
/// `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    relay: Arc<Relay>,
    shutdown: CancellationToken,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "websocket transport listening");
    let app = build_router(relay, shutdown.clone());
    axum::Server::from_tcp(listener)
        .context("adopting websocket listener")?
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("websocket server failed")?;
    Ok(())
}
