use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use palabre_hub::{ConversationSummary, Hub, SendMessage};
use palabre_shared::constants::DEFAULT_PAGE_LIMIT;
use palabre_shared::types::{
    Attachment, CallId, CallKind, ConversationId, ConversationKind, MessageId, NotificationId,
    UserId,
};
use palabre_store::{CallSession, Conversation, Message, Notification};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/conversations", post(create_conversation))
        .route("/conversations", get(list_conversations))
        .route("/conversations/:id/participants", post(add_participant))
        .route(
            "/conversations/:id/participants/:user_id",
            delete(remove_participant),
        )
        .route("/conversations/:id/archive", post(archive_conversation))
        .route("/conversations/:id/messages", post(append_message))
        .route("/conversations/:id/messages", get(get_messages))
        .route("/conversations/:id/read", post(mark_read))
        .route("/conversations/:id/unread", get(unread_count))
        .route("/calls", post(initiate_call))
        .route("/calls", get(call_history))
        .route("/calls/:id/accept", post(accept_call))
        .route("/calls/:id/reject", post(reject_call))
        .route("/calls/:id/end", post(end_call))
        .route("/notifications", get(unread_notifications))
        .route("/notifications/read-all", post(mark_all_notifications_read))
        .route("/notifications/:id/read", post(mark_notification_read))
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Read the authenticated actor from the `x-user-id` header.
///
/// Identity is an external collaborator: the value is an opaque id set by
/// the fronting auth layer and is trusted as-is.
pub fn actor_id(headers: &HeaderMap) -> Result<UserId, ServerError> {
    let raw = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServerError::BadRequest("Missing x-user-id header".into()))?;

    let uuid = Uuid::parse_str(raw.trim())
        .map_err(|e| ServerError::BadRequest(format!("Invalid x-user-id: {e}")))?;
    Ok(UserId(uuid))
}

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    instance: String,
}

#[derive(Deserialize)]
struct CreateConversationRequest {
    kind: ConversationKind,
    #[serde(default)]
    participant_ids: Vec<UserId>,
    name: Option<String>,
}

#[derive(Deserialize)]
struct AddParticipantRequest {
    user_id: UserId,
}

#[derive(Deserialize)]
struct SendMessageRequest {
    content: Option<String>,
    attachment: Option<Attachment>,
    reply_to: Option<MessageId>,
    #[serde(default)]
    mentions: Vec<UserId>,
}

#[derive(Deserialize)]
struct MessagesQuery {
    since_seq: Option<u64>,
    limit: Option<u32>,
}

#[derive(Deserialize)]
struct MarkReadRequest {
    upto_seq: u64,
}

#[derive(Serialize)]
struct UnreadResponse {
    unread: u64,
}

#[derive(Deserialize)]
struct InitiateCallRequest {
    receiver_id: UserId,
    kind: CallKind,
}

#[derive(Deserialize, Default)]
struct EndCallRequest {
    /// Advisory only; the server recomputes and clamps.
    duration_secs: Option<u64>,
}

#[derive(Deserialize)]
struct CallHistoryQuery {
    limit: Option<u32>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        instance: state.config.instance_name.clone(),
    })
}

async fn create_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateConversationRequest>,
) -> Result<Json<Conversation>, ServerError> {
    let actor = actor_id(&headers)?;
    let conversation = state
        .hub
        .create_conversation(actor, req.kind, &req.participant_ids, req.name)
        .await?;
    Ok(Json(conversation))
}

async fn list_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ConversationSummary>>, ServerError> {
    let actor = actor_id(&headers)?;
    let summaries = state.hub.conversations_for_user(actor).await?;
    Ok(Json(summaries))
}

async fn add_participant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<AddParticipantRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let actor = actor_id(&headers)?;
    state
        .hub
        .add_participant(actor, ConversationId(id), req.user_id)
        .await?;
    Ok(Json(serde_json::json!({ "added": true })))
}

async fn remove_participant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let actor = actor_id(&headers)?;
    state
        .hub
        .remove_participant(actor, ConversationId(id), UserId(user_id))
        .await?;
    Ok(Json(serde_json::json!({ "removed": true })))
}

async fn archive_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let actor = actor_id(&headers)?;
    state
        .hub
        .archive_conversation(actor, ConversationId(id))
        .await?;
    Ok(Json(serde_json::json!({ "archived": true })))
}

async fn append_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<Message>, ServerError> {
    let actor = actor_id(&headers)?;
    let message = state
        .hub
        .append(
            ConversationId(id),
            actor,
            SendMessage {
                content: req.content,
                attachment: req.attachment,
                reply_to: req.reply_to,
                mentions: req.mentions,
            },
        )
        .await?;
    Ok(Json(message))
}

async fn get_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let actor = actor_id(&headers)?;
    let messages = state
        .hub
        .messages_since(
            actor,
            ConversationId(id),
            query.since_seq.unwrap_or(0),
            query.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
        )
        .await?;
    Ok(Json(messages))
}

async fn mark_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<MarkReadRequest>,
) -> Result<Json<UnreadResponse>, ServerError> {
    let actor = actor_id(&headers)?;
    let unread = state
        .hub
        .mark_read(ConversationId(id), actor, req.upto_seq)
        .await?;
    Ok(Json(UnreadResponse { unread }))
}

async fn unread_count(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<UnreadResponse>, ServerError> {
    let actor = actor_id(&headers)?;
    let unread = state.hub.unread_count(ConversationId(id), actor).await?;
    Ok(Json(UnreadResponse { unread }))
}

async fn initiate_call(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<InitiateCallRequest>,
) -> Result<Json<CallSession>, ServerError> {
    let actor = actor_id(&headers)?;
    let session = state
        .hub
        .initiate_call(actor, req.receiver_id, req.kind)
        .await?;
    info!(call = %session.id, "call initiated via API");
    Ok(Json(session))
}

async fn accept_call(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<CallSession>, ServerError> {
    let actor = actor_id(&headers)?;
    let session = state.hub.accept_call(actor, CallId(id)).await?;
    Ok(Json(session))
}

async fn reject_call(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<CallSession>, ServerError> {
    let actor = actor_id(&headers)?;
    let session = state.hub.reject_call(actor, CallId(id)).await?;
    Ok(Json(session))
}

async fn end_call(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<EndCallRequest>,
) -> Result<Json<CallSession>, ServerError> {
    let actor = actor_id(&headers)?;
    let session = state
        .hub
        .end_call(actor, CallId(id), req.duration_secs)
        .await?;
    Ok(Json(session))
}

async fn call_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CallHistoryQuery>,
) -> Result<Json<Vec<CallSession>>, ServerError> {
    let actor = actor_id(&headers)?;
    let calls = state
        .hub
        .calls_for_user(actor, query.limit.unwrap_or(DEFAULT_PAGE_LIMIT))
        .await?;
    Ok(Json(calls))
}

async fn unread_notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Notification>>, ServerError> {
    let actor = actor_id(&headers)?;
    let notifications = state.hub.unread_notifications(actor).await?;
    Ok(Json(notifications))
}

async fn mark_notification_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let actor = actor_id(&headers)?;
    state
        .hub
        .mark_notification_read(actor, NotificationId(id))
        .await?;
    Ok(Json(serde_json::json!({ "read": true })))
}

async fn mark_all_notifications_read(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServerError> {
    let actor = actor_id(&headers)?;
    let marked = state.hub.mark_all_notifications_read(actor).await?;
    Ok(Json(serde_json::json!({ "marked": marked })))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_header_is_parsed_and_validated() {
        let mut headers = HeaderMap::new();
        assert!(actor_id(&headers).is_err());

        headers.insert("x-user-id", "not-a-uuid".parse().unwrap());
        assert!(actor_id(&headers).is_err());

        let user = UserId::new();
        headers.insert("x-user-id", user.to_string().parse().unwrap());
        assert_eq!(actor_id(&headers).unwrap(), user);
    }
}
