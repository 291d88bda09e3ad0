use agora_core::UserStub;
use axum::{
    http::header::CONTENT_TYPE,
    response::{Html, IntoResponse},
};
use serde::{Deserialize, Serialize};

use super::{core::METRICS_TEXT_CONTENT_TYPE, metrics::render_metrics};

/// Client-visible view of one connection's session, pushed as
/// `currentSession` and returned from login/register replies. The token
/// rides in the payload because the channel cannot set cookies after the
/// upgrade; the client persists it itself.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionSnapshot {
    pub(crate) status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) user: Option<UserStub>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) expires_at_unix: Option<i64>,
}

/// Online-list entry: a user annotated with the timestamp of their last
/// private message toward the viewing user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserWithMessageDate {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) last_message_at_unix: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CategoryPayload {
    pub(crate) id: i64,
    pub(crate) name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CommentPayload {
    pub(crate) id: i64,
    pub(crate) post_id: i64,
    pub(crate) content: String,
    pub(crate) author: UserStub,
    pub(crate) created_at_unix: i64,
    pub(crate) likes: i64,
    pub(crate) dislikes: i64,
    pub(crate) viewer_reaction: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PostPayload {
    pub(crate) id: i64,
    pub(crate) theme: String,
    pub(crate) content: String,
    pub(crate) author: UserStub,
    pub(crate) created_at_unix: i64,
    pub(crate) categories: Vec<CategoryPayload>,
    pub(crate) likes: i64,
    pub(crate) dislikes: i64,
    pub(crate) viewer_reaction: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) comments: Vec<CommentPayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChatMessagePayload {
    pub(crate) id: i64,
    pub(crate) content: String,
    pub(crate) author: UserStub,
    pub(crate) date_unix: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PrivateChatPayload {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) current_user: UserStub,
    pub(crate) recipient_user: UserStub,
    pub(crate) messages: Vec<ChatMessagePayload>,
}

/// Push delivered to the recipient of a just-sent chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InputChatMessagePayload {
    pub(crate) message_content: String,
    pub(crate) author: UserStub,
    pub(crate) date_unix: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub(crate) struct CredentialsDto {
    #[serde(default)]
    pub(crate) username: String,
    #[serde(default)]
    pub(crate) email: String,
    #[serde(default)]
    pub(crate) password: String,
    #[serde(default)]
    pub(crate) date_birth: String,
    #[serde(default)]
    pub(crate) gender: String,
    #[serde(default)]
    pub(crate) first_name: String,
    #[serde(default)]
    pub(crate) last_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub(crate) struct NewPostDto {
    pub(crate) theme: String,
    pub(crate) content: String,
    #[serde(rename = "categoriesID")]
    pub(crate) categories_id: Vec<i64>,
    pub(crate) date_unix: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub(crate) struct NewCommentDto {
    pub(crate) post_id: i64,
    pub(crate) content: String,
    pub(crate) date_unix: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub(crate) struct ChatMessageDto {
    pub(crate) message_content: String,
    pub(crate) date_unix: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ReactionTargetKind {
    Post,
    Comment,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub(crate) struct ReactionDto {
    pub(crate) target: ReactionTargetKind,
    pub(crate) target_id: i64,
    pub(crate) is_like: bool,
}

pub(crate) async fn health() -> &'static str {
    "ok"
}

pub(crate) async fn metrics_text() -> impl IntoResponse {
    ([(CONTENT_TYPE, METRICS_TEXT_CONTENT_TYPE)], render_metrics())
}

// Page rendering proper lives with the web client; the server only keeps
// the path occupied.
pub(crate) async fn index() -> Html<&'static str> {
    Html("<!doctype html><title>agora</title><p>agora forum server</p>")
}
