use std::fmt::Display;

use anyhow::anyhow;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::server::{
    core::AppState,
    errors::HandlerError,
    metrics::{record_message_dropped, record_message_emitted},
};

fn enqueue(
    outbox: &mpsc::Sender<String>,
    message_type: &str,
    message: String,
) -> Result<(), HandlerError> {
    match outbox.try_send(message) {
        Ok(()) => {
            record_message_emitted("connection", message_type);
            Ok(())
        }
        Err(mpsc::error::TrySendError::Full(_)) => {
            record_message_dropped("connection", message_type, "full_queue");
            Err(HandlerError::Fatal(anyhow!(
                "outbound queue full for '{message_type}'"
            )))
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            record_message_dropped("connection", message_type, "closed");
            Err(HandlerError::Fatal(anyhow!(
                "outbound queue closed for '{message_type}'"
            )))
        }
    }
}

/// Enqueues a server-pushed message onto the requester's own outbox.
pub(crate) fn send_message<T: Serialize>(
    outbox: &mpsc::Sender<String>,
    message_type: &str,
    data: T,
) -> Result<(), HandlerError> {
    let message = agora_protocol::build_message(message_type, agora_protocol::RESULT_SUCCESS, data)
        .map_err(|e| HandlerError::Fatal(e.into()))?;
    enqueue(outbox, message_type, message)
}

/// Enqueues the success reply mirroring the request type.
pub(crate) fn send_success_reply<T: Serialize>(
    outbox: &mpsc::Sender<String>,
    request_type: &str,
    data: T,
) -> Result<(), HandlerError> {
    let message_type =
        agora_protocol::reply_type(request_type).map_err(|e| HandlerError::Fatal(e.into()))?;
    let message =
        agora_protocol::build_message(&message_type, agora_protocol::RESULT_SUCCESS, data)
            .map_err(|e| HandlerError::Fatal(e.into()))?;
    enqueue(outbox, &message_type, message)
}

/// Reports a domain-expected failure to the requester as an error-result
/// reply and returns the matching `Warning`. Failure to even enqueue the
/// reply escalates to a fatal error.
pub(crate) fn warn_reply(
    outbox: &mpsc::Sender<String>,
    request_type: &str,
    text: impl Into<String>,
) -> HandlerError {
    let text = text.into();
    tracing::debug!(event = "channel.warning", request_type, warning = %text);
    let built = agora_protocol::reply_type(request_type).and_then(|message_type| {
        agora_protocol::build_message(&message_type, agora_protocol::RESULT_ERROR, &text)
            .map(|message| (message_type, message))
    });
    match built {
        Ok((message_type, message)) => {
            if let Err(fatal) = enqueue(outbox, &message_type, message) {
                return fatal;
            }
        }
        Err(error) => {
            return HandlerError::Fatal(anyhow!(
                "building warning reply for '{request_type}' failed: {error}"
            ));
        }
    }
    HandlerError::Warning(text)
}

fn send_error_envelope(outbox: &mpsc::Sender<String>, context: &str) {
    let Ok(message) = agora_protocol::build_message(
        agora_protocol::ERROR_TYPE,
        agora_protocol::RESULT_SERVER_ERROR,
        context,
    ) else {
        return;
    };
    match outbox.try_send(message) {
        Ok(()) => record_message_emitted("connection", agora_protocol::ERROR_TYPE),
        Err(_) => record_message_dropped("connection", agora_protocol::ERROR_TYPE, "undeliverable"),
    }
}

/// Reports a collaborator fault: an `ERROR` envelope goes to the
/// requester (best effort) and the returned error terminates the
/// connection.
pub(crate) fn server_error(
    outbox: &mpsc::Sender<String>,
    context: &str,
    error: impl Display,
) -> HandlerError {
    tracing::error!(event = "channel.server_error", context, error = %error);
    send_error_envelope(outbox, context);
    HandlerError::Fatal(anyhow!("{context}: {error}"))
}

/// Aggregates partial fan-out failures into one non-fatal report toward
/// the originating connection.
pub(crate) fn batch_warning(
    outbox: &mpsc::Sender<String>,
    context: &str,
    failures: &[String],
) -> HandlerError {
    let text = format!(
        "{context} failed for {} peer(s): {}",
        failures.len(),
        failures.join("; ")
    );
    tracing::warn!(event = "channel.fanout.partial", context, failures = failures.len());
    send_error_envelope(outbox, &text);
    HandlerError::Warning(text)
}

/// Pushes a message into another connection's outbox through the
/// registry's non-blocking enqueue-or-evict policy.
pub(crate) async fn send_push<T: Serialize>(
    state: &AppState,
    connection_id: Uuid,
    message_type: &str,
    data: &T,
) -> anyhow::Result<()> {
    let message =
        agora_protocol::build_message(message_type, agora_protocol::RESULT_SUCCESS, data)?;
    match state.registry.send_to(connection_id, message).await {
        Ok(()) => {
            record_message_emitted("peer", message_type);
            Ok(())
        }
        Err(error) => {
            record_message_dropped("peer", message_type, "undeliverable");
            Err(anyhow!(
                "deliver '{message_type}' to connection {connection_id}: {error}"
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    use super::{send_success_reply, warn_reply};

    #[tokio::test]
    async fn success_reply_mirrors_request_type() {
        let (tx, mut rx) = mpsc::channel(4);
        send_success_reply(&tx, "openChatRequest", json!({"id": 1})).unwrap();
        let raw = rx.recv().await.unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["type"], "openChatReply");
        assert_eq!(value["payload"]["result"], "success");
    }

    #[tokio::test]
    async fn warning_sends_error_result_reply_and_classifies_as_warning() {
        let (tx, mut rx) = mpsc::channel(4);
        let error = warn_reply(&tx, "newPostRequest", "not logged in");
        assert!(error.is_warning());

        let raw = rx.recv().await.unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["type"], "newPostReply");
        assert_eq!(value["payload"]["result"], "error");
        assert_eq!(value["payload"]["data"], "not logged in");
    }

    #[tokio::test]
    async fn full_own_outbox_escalates_to_fatal() {
        let (tx, _rx) = mpsc::channel(1);
        send_success_reply(&tx, "postsPortionRequest", 1).unwrap();
        let error = send_success_reply(&tx, "postsPortionRequest", 2).unwrap_err();
        assert!(!error.is_warning());
    }
}
