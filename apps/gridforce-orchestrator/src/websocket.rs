use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use gridforce_protocol::{Envelope, ProtocolMessage};
use metrics::counter;
use tracing::{debug, info, warn};

use crate::handshake;
use crate::registry::ProviderLink;
use crate::session::{ConnectionKey, SessionStatus};
use crate::state::AppState;

pub async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, ConnectionKey::from(addr)))
}

async fn handle_connection(socket: WebSocket, state: AppState, key: ConnectionKey) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (link, mut outbound) = ProviderLink::channel(state.outbound_buffer());

    let session = match state.registry.admit(key.clone(), link) {
        Ok(session) => session,
        Err(err) => {
            warn!(connection = %key, error = %err, "rejecting provider connection");
            return;
        }
    };
    counter!("gridforce_connections_total").increment(1);
    if let Err(err) = state
        .store
        .mark_node(
            key.as_str(),
            &session.ip,
            SessionStatus::Connected.as_str(),
            session.last_seen,
        )
        .await
    {
        warn!(connection = %key, error = %err, "failed to record node connect");
    }
    info!(connection = %key, "provider connected");

    let writer_key = key.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let written = ws_tx.send(Message::Text(frame.text)).await.is_ok();
            let _ = frame.ack.send(written);
            if !written {
                break;
            }
        }
        debug!(connection = %writer_key, "writer task finished");
    });

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => handle_frame(&state, &key, text.as_bytes()).await,
            Ok(Message::Binary(bytes)) => handle_frame(&state, &key, &bytes).await,
            Ok(Message::Close(frame)) => {
                info!(
                    connection = %key,
                    reason = ?frame.map(|f| f.reason.to_string()),
                    "provider closed websocket"
                );
                break;
            }
            Ok(_) => continue,
            Err(err) => {
                warn!(connection = %key, error = %err, "error receiving message");
                break;
            }
        }
    }

    state.registry.remove(&key);
    writer.abort();
    counter!("gridforce_connections_closed_total").increment(1);
    if let Err(err) = state
        .store
        .mark_node(
            key.as_str(),
            &session.ip,
            SessionStatus::Disconnected.as_str(),
            Utc::now(),
        )
        .await
    {
        warn!(connection = %key, error = %err, "failed to record node disconnect");
    }
    info!(connection = %key, "provider disconnected");
}

/// Routes one inbound frame. Undecodable frames are dropped and the
/// connection stays open.
pub(crate) async fn handle_frame(state: &AppState, key: &ConnectionKey, bytes: &[u8]) {
    state.registry.update(key, |session| session.touch());

    let message = match Envelope::from_slice(bytes).and_then(|envelope| envelope.decode()) {
        Ok(message) => message,
        Err(err) => {
            counter!("gridforce_decode_errors_total", "reason" => err.metric_label()).increment(1);
            warn!(connection = %key, error = %err, "dropping undecodable frame");
            return;
        }
    };

    match message {
        ProtocolMessage::Auth(auth) => {
            if let Err(err) =
                handshake::authenticate(&state.registry, state.store.as_ref(), key, auth).await
            {
                warn!(connection = %key, error = %err, "handshake failed");
            }
        }
        ProtocolMessage::JobResult(result) => {
            state.ledger.apply(key, &result).await;
        }
        ProtocolMessage::Heartbeat => {
            debug!(connection = %key, "heartbeat");
        }
        ProtocolMessage::JobOffer(_) => {
            warn!(connection = %key, "ignoring JOB_OFFER sent by provider");
        }
    }
}
