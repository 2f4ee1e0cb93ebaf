//! WebSocket bridge to the agent.
//!
//! One socket per client. Inbound messages submit queries and toggle voice;
//! outbound traffic is the orchestrator's lifecycle event stream plus a
//! direct response message per query, so a UI can render incrementally
//! without polling the REST API.

use crate::state::AppState;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use sage_core::AgentEvent;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Messages sent from the client to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A query for the agent.
    Query {
        text: String,
        #[serde(default)]
        voice: bool,
    },
    /// Toggles spoken responses.
    SetVoiceEnabled { enabled: bool },
    /// Clears memory and provider sessions.
    Reset,
}

/// Messages sent from the server to the client.
#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The agent's answer to a `query` message.
    Response { text: String },
    /// A lifecycle event from the agent.
    Event { event: AgentEvent },
    /// A malformed client message was ignored.
    Error { message: String },
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[instrument(skip_all)]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("WebSocket client connected");
    let (mut sink, mut stream) = socket.split();

    // All outbound traffic funnels through one channel so the event
    // forwarder and query responses never interleave a partial write.
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(64);

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize server message");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let forwarder = {
        let out_tx = out_tx.clone();
        let mut events = state.orchestrator.subscribe_events();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if out_tx.send(ServerMessage::Event { event }).await.is_err() {
                    break;
                }
            }
        })
    };

    while let Some(Ok(message)) = stream.next().await {
        let WsMessage::Text(text) = message else {
            continue;
        };
        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Query { text, voice }) => {
                let response = state.orchestrator.process_query(&text, voice).await;
                if out_tx
                    .send(ServerMessage::Response { text: response })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(ClientMessage::SetVoiceEnabled { enabled }) => {
                debug!(enabled, "Client toggled voice");
                state.orchestrator.set_voice_enabled(enabled);
            }
            Ok(ClientMessage::Reset) => {
                if let Err(e) = state.orchestrator.reset().await {
                    let _ = out_tx
                        .send(ServerMessage::Error {
                            message: e.to_string(),
                        })
                        .await;
                }
            }
            Err(e) => {
                let _ = out_tx
                    .send(ServerMessage::Error {
                        message: format!("unrecognized message: {e}"),
                    })
                    .await;
            }
        }
    }

    forwarder.abort();
    drop(out_tx);
    let _ = writer.await;
    info!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_parsing() {
        let query: ClientMessage =
            serde_json::from_str(r#"{"type": "query", "text": "hi", "voice": true}"#).unwrap();
        match query {
            ClientMessage::Query { text, voice } => {
                assert_eq!(text, "hi");
                assert!(voice);
            }
            other => panic!("expected query, got {:?}", other),
        }

        let toggle: ClientMessage =
            serde_json::from_str(r#"{"type": "set_voice_enabled", "enabled": false}"#).unwrap();
        assert!(matches!(
            toggle,
            ClientMessage::SetVoiceEnabled { enabled: false }
        ));

        assert!(matches!(
            serde_json::from_str::<ClientMessage>(r#"{"type": "reset"}"#).unwrap(),
            ClientMessage::Reset
        ));
    }

    #[test]
    fn test_server_message_serialization() {
        let json = serde_json::to_string(&ServerMessage::Response {
            text: "answer".to_string(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"response""#));

        let json = serde_json::to_string(&ServerMessage::Event {
            event: AgentEvent::SystemReset,
        })
        .unwrap();
        assert!(json.contains(r#""type":"event""#));
        assert!(json.contains("system_reset"));
    }
}
