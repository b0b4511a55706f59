//! Serves one websocket channel between a client and a session: greets it
//! with `Welcome`, feeds decoded intents into the session and forwards the
//! session's pushes back out.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, decrement_gauge, increment_gauge};
use scrum_poker_core::codec::{self, Inbound};
use scrum_poker_core::ClientId;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::session::{ConnectionKey, Rejection, Session};
use crate::telemetry::{
    BROADCAST_DROPS_TOTAL, CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, INTENTS_REJECTED_TOTAL,
    INTENTS_TOTAL,
};
use crate::AppState;

pub(crate) async fn serve_channel(
    socket: WebSocket,
    state: Arc<AppState>,
    session: Arc<Session>,
    client_id: ClientId,
) {
    let session_id = session.id().clone();
    let connection_id = Uuid::new_v4();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let welcome = match codec::encode_inbound(&Inbound::Welcome) {
        Ok(text) => text,
        Err(err) => {
            warn!(%session_id, error = %err, "failed to encode welcome");
            return;
        }
    };
    if let Err(err) = ws_tx.send(Message::Text(welcome)).await {
        debug!(%session_id, %connection_id, error = %err, "client gone before welcome");
        return;
    }

    let (tx, mut rx) = mpsc::channel(state.config.per_connection_buffer);
    let key = session.attach(client_id.clone(), tx);
    counter!(CONNECTIONS_TOTAL, 1);
    increment_gauge!(CONNECTIONS_ACTIVE, 1.0);
    info!(%session_id, %client_id, %connection_id, "channel opened");

    let writer_session = session_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
        debug!(session_id = %writer_session, %connection_id, "writer task finished");
    });

    let reason = loop {
        let message = match timeout(state.config.read_timeout, ws_rx.next()).await {
            Err(_) => break "read timeout",
            Ok(None) => break "stream ended",
            Ok(Some(Err(err))) => {
                warn!(%session_id, %connection_id, error = %err, "error receiving message");
                break "receive error";
            }
            Ok(Some(Ok(message))) => message,
        };
        let text = match message {
            Message::Text(text) => text,
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    record_malformed(&session, "invalid_utf8");
                    continue;
                }
            },
            Message::Close(_) => break "client closed",
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        handle_frame(&session, key, &text);
    };

    let detached = session.detach(key, Instant::now());
    writer.abort();
    decrement_gauge!(CONNECTIONS_ACTIVE, 1.0);
    info!(
        %session_id,
        %client_id,
        %connection_id,
        reason,
        remaining = detached.remaining,
        member_left = detached.member_left,
        "channel closed"
    );
}

fn handle_frame(session: &Session, key: ConnectionKey, text: &str) {
    let intent = match codec::decode_intent(text) {
        Ok(intent) => intent,
        Err(err) => {
            warn!(session_id = %session.id(), error = %err, "dropping malformed frame");
            record_malformed(session, "malformed_frame");
            return;
        }
    };
    let kind = intent.kind();
    counter!(INTENTS_TOTAL, 1, "kind" => kind);

    match session.apply(key, intent) {
        Ok(report) => {
            for rejection in &report.rejected {
                record_rejection(session, kind, rejection);
            }
            if report.broadcast.dropped > 0 {
                counter!(BROADCAST_DROPS_TOTAL, report.broadcast.dropped as u64);
            }
        }
        Err(rejection) => record_rejection(session, kind, &rejection),
    }
}

fn record_rejection(session: &Session, kind: &'static str, rejection: &Rejection) {
    debug!(session_id = %session.id(), kind, %rejection, "intent ignored");
    counter!(INTENTS_REJECTED_TOTAL, 1, "reason" => rejection.metric_label());
}

fn record_malformed(session: &Session, reason: &'static str) {
    debug!(session_id = %session.id(), reason, "frame ignored");
    counter!(INTENTS_REJECTED_TOTAL, 1, "reason" => reason);
}
