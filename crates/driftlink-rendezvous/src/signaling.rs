//! WebSocket signaling relay: envelope parsing, PIN pairing, and opaque
//! handshake-payload relay between paired connections.
//!
//! Grounded in `InfamousVague-Umbra`'s `handler::handle_websocket` —
//! split socket, one `mpsc` outbound channel registered per connection,
//! a `tokio::select!` loop over inbound frames and that channel — adapted
//! from Umbra's DID-keyed registration to this spec's PIN-pairing flow.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::RegistryError;
use crate::session::SessionRegistry;

/// An inbound client → server envelope.
///
/// Accepts either `action` or `type` as the routing-discriminator key per
/// spec.md §6 and §9 — clients speaking either convention are tolerated.
#[derive(Debug, Deserialize)]
struct InboundEnvelope {
    #[serde(alias = "type")]
    action: Option<String>,
    #[serde(default)]
    pin: Option<String>,
    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

/// An outbound server → client envelope. Always tagged with `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum Outbound {
    Register { pin: String },
    PeerJoined,
    Joined { pin: String },
    Offer { payload: Value },
    Answer { payload: Value },
    Candidate { payload: Value },
    Control { payload: Value },
    PeerLeft,
    Error { message: String, code: &'static str },
}

/// Shared state for the signaling route: the session registry plus a
/// per-connection outbound-channel table, mirroring `RelayState::clients`.
#[derive(Clone)]
pub struct SignalingState {
    registry: Arc<SessionRegistry>,
    connections: Arc<DashMap<String, mpsc::UnboundedSender<Outbound>>>,
}

impl SignalingState {
    /// Build signaling state over `registry`.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            connections: Arc::new(DashMap::new()),
        }
    }

    fn send_to(&self, conn_id: &str, msg: Outbound) {
        if let Some(tx) = self.connections.get(conn_id) {
            let _ = tx.send(msg);
        }
    }
}

/// Route handler: upgrades the HTTP connection and hands it to
/// [`handle_socket`].
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SignalingState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive a single signaling connection for its lifetime.
async fn handle_socket(socket: WebSocket, state: SignalingState) {
    let conn_id = Uuid::new_v4().to_string();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    state.connections.insert(conn_id.clone(), tx);

    let sender_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let Ok(json) = serde_json::to_string(&msg) else {
                continue;
            };
            if ws_sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                handle_envelope(&state, &conn_id, &text).await;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    handle_disconnect(&state, &conn_id).await;
    sender_task.abort();
    state.connections.remove(&conn_id);
}

async fn handle_envelope(state: &SignalingState, conn_id: &str, text: &str) {
    let envelope: InboundEnvelope = match serde_json::from_str(text) {
        Ok(env) => env,
        Err(e) => {
            state.send_to(
                conn_id,
                Outbound::Error {
                    message: format!("malformed signaling envelope: {e}"),
                    code: "MALFORMED_MESSAGE",
                },
            );
            return;
        }
    };

    let Some(action) = envelope.action else {
        state.send_to(
            conn_id,
            Outbound::Error {
                message: "missing action/type discriminator".into(),
                code: "MALFORMED_MESSAGE",
            },
        );
        return;
    };

    match action.as_str() {
        "register" => handle_register(state, conn_id).await,
        "join" => handle_join(state, conn_id, &envelope).await,
        "offer" => relay(state, conn_id, &envelope, Outbound::Offer { payload: payload_of(&envelope) }).await,
        "answer" => relay(state, conn_id, &envelope, Outbound::Answer { payload: payload_of(&envelope) }).await,
        "candidate" => {
            relay(
                state,
                conn_id,
                &envelope,
                Outbound::Candidate { payload: payload_of(&envelope) },
            )
            .await;
        }
        "control" => {
            relay(
                state,
                conn_id,
                &envelope,
                Outbound::Control { payload: payload_of(&envelope) },
            )
            .await;
        }
        other => {
            state.send_to(
                conn_id,
                Outbound::Error {
                    message: format!("unrecognised action '{other}'"),
                    code: "MALFORMED_MESSAGE",
                },
            );
        }
    }
}

/// Extract everything but the routing key as an opaque payload to relay
/// verbatim — the registry never interprets these fields.
fn payload_of(envelope: &InboundEnvelope) -> Value {
    Value::Object(envelope.extra.clone().into_iter().collect())
}

async fn handle_register(state: &SignalingState, conn_id: &str) {
    match state.registry.create_session(conn_id).await {
        Ok(pin) => state.send_to(conn_id, Outbound::Register { pin }),
        Err(e) => send_error(state, conn_id, &e),
    }
}

async fn handle_join(state: &SignalingState, conn_id: &str, envelope: &InboundEnvelope) {
    let Some(pin) = &envelope.pin else {
        state.send_to(
            conn_id,
            Outbound::Error {
                message: "join requires a pin".into(),
                code: "MALFORMED_MESSAGE",
            },
        );
        return;
    };

    match state.registry.join_session(pin, conn_id).await {
        Ok(record) => {
            state.send_to(&record.sender_conn_id, Outbound::PeerJoined);
            state.send_to(conn_id, Outbound::Joined { pin: record.pin });
        }
        Err(e) => send_error(state, conn_id, &e),
    }
}

/// Look up the PIN `conn_id` belongs to and forward `msg` to the other party.
///
/// Silently drops the message if no session is found, per spec.md §4.5 — a
/// stale or unpaired connection relaying is not itself an error worth
/// surfacing to the sender.
async fn relay(state: &SignalingState, conn_id: &str, _envelope: &InboundEnvelope, msg: Outbound) {
    let Ok(Some(pin)) = state.registry.get_pin_by_connection_id(conn_id).await else {
        return;
    };
    let Ok(Some(record)) = state.registry.get_session(&pin).await else {
        return;
    };
    let other = if record.sender_conn_id == conn_id {
        record.receiver_conn_id
    } else {
        Some(record.sender_conn_id)
    };
    if let Some(other) = other {
        state.send_to(&other, msg);
    }
}

async fn handle_disconnect(state: &SignalingState, conn_id: &str) {
    let Ok(Some(pin)) = state.registry.get_pin_by_connection_id(conn_id).await else {
        return;
    };
    if let Ok(Some(record)) = state.registry.get_session(&pin).await {
        let survivor = if record.sender_conn_id == conn_id {
            record.receiver_conn_id
        } else {
            Some(record.sender_conn_id)
        };
        if let Some(survivor) = survivor {
            state.send_to(&survivor, Outbound::PeerLeft);
        }
    }
    let _ = state.registry.remove_session(&pin).await;
}

fn send_error(state: &SignalingState, conn_id: &str, err: &RegistryError) {
    tracing::warn!(conn_id, error = %err, "signaling request failed");
    state.send_to(
        conn_id,
        Outbound::Error {
            message: err.to_string(),
            code: err.wire_code(),
        },
    );
}
