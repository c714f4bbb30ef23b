//! WebSocket delivery endpoint.
//!
//! One socket maps to one hub connection. The client manages its own
//! subscription set with text frames:
//!
//! ```json
//! { "subscribe": "conversation:<uuid>" }
//! { "unsubscribe": "notifications:<uuid>" }
//! ```
//!
//! Hub events are pushed to the client as JSON text frames. On close the
//! hub connection is dropped along with its entire subscription set.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use palabre_hub::Topic;
use palabre_shared::types::UserId;

use crate::api::{actor_id, AppState};
use crate::error::ServerError;

#[derive(Deserialize)]
pub struct WsQuery {
    /// Fallback identity for clients that cannot set headers on the
    /// upgrade request (browsers).
    user_id: Option<Uuid>,
}

/// Client-to-server control frames.
#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum ClientFrame {
    Subscribe(String),
    Unsubscribe(String),
}

pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ServerError> {
    let actor = match actor_id(&headers) {
        Ok(actor) => actor,
        Err(_) => query
            .user_id
            .map(UserId)
            .ok_or_else(|| ServerError::BadRequest("Missing x-user-id header".into()))?,
    };

    Ok(ws.on_upgrade(move |socket| handle_socket(state, socket, actor)))
}

async fn handle_socket(state: AppState, socket: WebSocket, actor: UserId) {
    let (connection, mut events) = state.hub.connect(actor).await;
    debug!(%connection, user = %actor, "websocket opened");

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let frame = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(error = %e, "failed to serialize hub event");
                        continue;
                    }
                };
                if sink.send(WsMessage::Text(frame)).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_frame(&state, connection, &mut sink, &text).await;
                    }
                    Some(Ok(WsMessage::Ping(payload))) => {
                        if sink.send(WsMessage::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(%connection, error = %e, "websocket read error");
                        break;
                    }
                }
            }
        }
    }

    state.hub.disconnect(connection).await;
    debug!(%connection, "websocket closed");
}

async fn handle_frame(
    state: &AppState,
    connection: palabre_hub::ConnectionId,
    sink: &mut (impl SinkExt<WsMessage> + Unpin),
    text: &str,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            send_error(sink, &format!("unrecognized frame: {e}")).await;
            return;
        }
    };

    match frame {
        ClientFrame::Subscribe(topic) => {
            let Some(topic) = Topic::parse(&topic) else {
                send_error(sink, &format!("unknown topic: {topic}")).await;
                return;
            };
            if let Err(e) = state.hub.subscribe(connection, topic).await {
                send_error(sink, &e.to_string()).await;
            } else {
                let ack = serde_json::json!({ "subscribed": topic.to_string() });
                let _ = sink.send(WsMessage::Text(ack.to_string())).await;
            }
        }
        ClientFrame::Unsubscribe(topic) => {
            let Some(topic) = Topic::parse(&topic) else {
                send_error(sink, &format!("unknown topic: {topic}")).await;
                return;
            };
            state.hub.unsubscribe(connection, topic).await;
            let ack = serde_json::json!({ "unsubscribed": topic.to_string() });
            let _ = sink.send(WsMessage::Text(ack.to_string())).await;
        }
    }
}

async fn send_error(sink: &mut (impl SinkExt<WsMessage> + Unpin), message: &str) {
    let frame = serde_json::json!({ "error": message });
    let _ = sink.send(WsMessage::Text(frame.to_string())).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_parse() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"subscribe":"notifications:4fe4007e-31c1-44d9-bd42-d0e0c5f4a7bc"}"#)
                .unwrap();
        assert!(matches!(frame, ClientFrame::Subscribe(_)));

        let frame: ClientFrame =
            serde_json::from_str(r#"{"unsubscribe":"conversation:4fe4007e-31c1-44d9-bd42-d0e0c5f4a7bc"}"#)
                .unwrap();
        assert!(matches!(frame, ClientFrame::Unsubscribe(_)));

        assert!(serde_json::from_str::<ClientFrame>(r#"{"ping":true}"#).is_err());
    }
}
