#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum allowed bytes for one inbound websocket frame.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Suffix every client request type ends with; replies strip it and
/// append [`REPLY_SUFFIX`] instead.
pub const REQUEST_SUFFIX: &str = "Request";
pub const REPLY_SUFFIX: &str = "Reply";

// Request types carried over the channel.
pub const REGISTER_REQUEST: &str = "registerRequest";
pub const LOGIN_REQUEST: &str = "loginRequest";
pub const LOGOUT_REQUEST: &str = "logoutRequest";
pub const POSTS_PORTION_REQUEST: &str = "postsPortionRequest";
pub const FULL_POST_AND_COMMENTS_REQUEST: &str = "fullPostAndCommentsRequest";
pub const NEW_POST_REQUEST: &str = "newPostRequest";
pub const NEW_COMMENT_REQUEST: &str = "newCommentRequest";
pub const REACTION_REQUEST: &str = "reactionRequest";
pub const OPEN_CHAT_REQUEST: &str = "openChatRequest";
// The misspelling is part of the wire contract the web client speaks.
pub const SEND_MESSAGE_TO_OPEND_CHAT_REQUEST: &str = "sendMessageToOpendChatRequest";
pub const CLOSE_CHAT_REQUEST: &str = "closeChatRequest";
pub const CHAT_PORTION_REQUEST: &str = "chatPortionRequest";

// Unsolicited server-pushed types.
pub const CURRENT_SESSION: &str = "currentSession";
pub const ONLINE_USERS: &str = "onlineUsers";
pub const NEW_ONLINE_USER: &str = "newOnlineUser";
pub const OFFLINE_USER: &str = "offlineUser";
pub const INPUT_CHAT_MESSAGE: &str = "inputChatMessage";
pub const ERROR_TYPE: &str = "ERROR";

// Result discriminators carried in every payload.
pub const RESULT_SUCCESS: &str = "success";
pub const RESULT_ERROR: &str = "error";
pub const RESULT_SERVER_ERROR: &str = "serverError";

/// One framed unit of communication: `{"type": …, "payload": …}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub payload: Value,
}

/// Payload shape of every reply and server push:
/// `{"result": "success"|"error"|"serverError", "data": …}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub result: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame exceeds max size: max={max} bytes actual={actual} bytes")]
    OversizedFrame { max: usize, actual: usize },
    #[error("invalid json frame")]
    InvalidJson,
    #[error("bad request message type: {0}")]
    BadRequestType(String),
    #[error("message serialization failed")]
    Serialize,
}

impl From<serde_json::Error> for ProtocolError {
    fn from(_: serde_json::Error) -> Self {
        Self::InvalidJson
    }
}

/// Parse and validate an inbound frame at the network boundary.
///
/// # Errors
/// Returns [`ProtocolError`] if the frame exceeds [`MAX_FRAME_BYTES`] or
/// is not a well-formed `{type, payload}` envelope.
pub fn parse_envelope(input: &[u8]) -> Result<Envelope, ProtocolError> {
    if input.len() > MAX_FRAME_BYTES {
        return Err(ProtocolError::OversizedFrame {
            max: MAX_FRAME_BYTES,
            actual: input.len(),
        });
    }
    let envelope: Envelope = serde_json::from_slice(input)?;
    Ok(envelope)
}

/// Authentication-class requests run through the authentication dispatch
/// table instead of the logged-in data table.
#[must_use]
pub fn is_authentication(message_type: &str) -> bool {
    message_type.starts_with("login")
        || message_type.starts_with("logout")
        || message_type.starts_with("register")
}

/// Reply type for a request type: strip `Request`, append `Reply`.
///
/// # Errors
/// Returns [`ProtocolError::BadRequestType`] when the type does not end
/// in the request suffix.
pub fn reply_type(request_type: &str) -> Result<String, ProtocolError> {
    let stem = request_type
        .strip_suffix(REQUEST_SUFFIX)
        .ok_or_else(|| ProtocolError::BadRequestType(request_type.to_owned()))?;
    Ok(format!("{stem}{REPLY_SUFFIX}"))
}

/// Serialize an outbound envelope with the standard payload shape.
///
/// # Errors
/// Returns [`ProtocolError::Serialize`] when the data cannot be encoded.
pub fn build_message<T: Serialize>(
    message_type: &str,
    result: &str,
    data: T,
) -> Result<String, ProtocolError> {
    let envelope = Envelope {
        message_type: message_type.to_owned(),
        payload: serde_json::to_value(Payload {
            result: result.to_owned(),
            data: serde_json::to_value(data).map_err(|_| ProtocolError::Serialize)?,
        })
        .map_err(|_| ProtocolError::Serialize)?,
    };
    serde_json::to_string(&envelope).map_err(|_| ProtocolError::Serialize)
}

/// Serialize the success/error reply mirroring a request type.
///
/// # Errors
/// Propagates [`reply_type`] and [`build_message`] failures.
pub fn build_reply<T: Serialize>(
    request_type: &str,
    result: &str,
    data: T,
) -> Result<String, ProtocolError> {
    let message_type = reply_type(request_type)?;
    build_message(&message_type, result, data)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{
        build_message, build_reply, is_authentication, parse_envelope, reply_type, ProtocolError,
        MAX_FRAME_BYTES,
    };

    #[test]
    fn parse_accepts_valid_envelope() {
        let envelope = parse_envelope(br#"{"type":"openChatRequest","payload":7}"#).unwrap();
        assert_eq!(envelope.message_type, "openChatRequest");
        assert_eq!(envelope.payload, Value::from(7));
    }

    #[test]
    fn parse_rejects_unknown_fields() {
        let error = parse_envelope(br#"{"type":"x","payload":1,"extra":2}"#).unwrap_err();
        assert_eq!(error, ProtocolError::InvalidJson);
    }

    #[test]
    fn parse_rejects_malformed_json() {
        let error = parse_envelope(b"{not json").unwrap_err();
        assert_eq!(error, ProtocolError::InvalidJson);
    }

    #[test]
    fn parse_rejects_oversized_frame() {
        let frame = vec![b'x'; MAX_FRAME_BYTES + 1];
        let error = parse_envelope(&frame).unwrap_err();
        assert_eq!(
            error,
            ProtocolError::OversizedFrame {
                max: MAX_FRAME_BYTES,
                actual: MAX_FRAME_BYTES + 1,
            }
        );
    }

    #[test]
    fn reply_type_mirrors_request_naming() {
        assert_eq!(reply_type("openChatRequest").unwrap(), "openChatReply");
        assert_eq!(
            reply_type("sendMessageToOpendChatRequest").unwrap(),
            "sendMessageToOpendChatReply"
        );
    }

    #[test]
    fn reply_type_rejects_non_request() {
        let error = reply_type("onlineUsers").unwrap_err();
        assert_eq!(
            error,
            ProtocolError::BadRequestType(String::from("onlineUsers"))
        );
    }

    #[test]
    fn authentication_classification_uses_type_prefix() {
        assert!(is_authentication("loginRequest"));
        assert!(is_authentication("logoutRequest"));
        assert!(is_authentication("registerRequest"));
        assert!(!is_authentication("newPostRequest"));
    }

    #[test]
    fn build_message_wraps_result_and_data() {
        let message = build_message("onlineUsers", "success", json!([{"id": 1}])).unwrap();
        let value: Value = serde_json::from_str(&message).unwrap();
        assert_eq!(value["type"], "onlineUsers");
        assert_eq!(value["payload"]["result"], "success");
        assert_eq!(value["payload"]["data"][0]["id"], 1);
    }

    #[test]
    fn build_message_omits_null_data() {
        let message = build_message("closeChatReply", "success", Value::Null).unwrap();
        let value: Value = serde_json::from_str(&message).unwrap();
        assert_eq!(value["payload"].get("data"), None);
    }

    #[test]
    fn build_reply_round_trips_through_request_type() {
        let message = build_reply("loginRequest", "error", "Wrong password").unwrap();
        let value: Value = serde_json::from_str(&message).unwrap();
        assert_eq!(value["type"], "loginReply");
        assert_eq!(value["payload"]["result"], "error");
        assert_eq!(value["payload"]["data"], "Wrong password");
    }
}
