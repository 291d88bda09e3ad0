use agora_core::{is_blank, validate_content_date, UserStub};
use anyhow::anyhow;
use serde_json::Value;

use crate::server::{
    core::{AppState, CHAT_MESSAGES_PAGE_SIZE},
    errors::HandlerError,
    store::chats,
    types::{ChatMessageDto, InputChatMessagePayload, PrivateChatPayload},
};

use super::{
    connection::{ConnectionSeat, OpenChat},
    reply,
};

/// Opens the private chat with an online peer: resolves (or creates)
/// the chat for the unordered user pair, loads the newest history page,
/// and records the single open chat of this connection.
pub(crate) async fn open_chat(
    state: &AppState,
    seat: &mut ConnectionSeat,
    payload: &Value,
) -> Result<Value, HandlerError> {
    let request_type = agora_protocol::OPEN_CHAT_REQUEST;
    let peer_user_id: i64 = serde_json::from_value(payload.clone()).map_err(|error| {
        reply::server_error(&seat.outbox, "invalid userID payload for opening a chat", error)
    })?;
    if peer_user_id <= 0 {
        return Err(reply::warn_reply(&seat.outbox, request_type, "invalid user's ID"));
    }

    let Some(peer_connection) = state.registry.find_by_user(peer_user_id).await else {
        return Err(reply::warn_reply(
            &seat.outbox,
            request_type,
            format!("user with id {peer_user_id} is offline"),
        ));
    };
    let Some(peer) = state.registry.user_of(peer_connection).await else {
        return Err(reply::warn_reply(
            &seat.outbox,
            request_type,
            format!("user with id {peer_user_id} is offline"),
        ));
    };
    let current = seat_user(seat)?;

    let (chat, created) = chats::find_or_create_private_chat(state, current.id, peer.id)
        .await
        .map_err(|error| reply::server_error(&seat.outbox, "resolve the chat failed", error))?;
    let messages = if created {
        Vec::new()
    } else {
        chats::page_chat_messages(state, chat.id, 0, CHAT_MESSAGES_PAGE_SIZE)
            .await
            .map_err(|error| {
                reply::server_error(&seat.outbox, "get the chat messages from the store failed", error)
            })?
    };

    seat.open_chat = Some(OpenChat {
        chat_id: chat.id,
        chat_name: chat.name.clone(),
        peer: peer.clone(),
        peer_connection,
    });
    tracing::info!(event = "chat.opened", chat_id = chat.id, peer_user_id = peer.id);

    to_reply_value(PrivateChatPayload {
        id: chat.id,
        name: chat.name,
        current_user: current,
        recipient_user: peer,
        messages,
    })
}

/// Delivers a message into the currently open chat. The message is
/// persisted first; if the peer turns out to be gone (after one
/// re-resolution attempt covering reconnects) or the push into its
/// outbox fails, the persisted row is deleted again so no message
/// lingers for a recipient that can never receive it.
pub(crate) async fn send_message_to_open_chat(
    state: &AppState,
    seat: &mut ConnectionSeat,
    payload: &Value,
) -> Result<Value, HandlerError> {
    let request_type = agora_protocol::SEND_MESSAGE_TO_OPEND_CHAT_REQUEST;
    let Some(open_chat) = seat.open_chat.clone() else {
        return Err(reply::warn_reply(&seat.outbox, request_type, "no chat is open"));
    };
    let message: ChatMessageDto = serde_json::from_value(payload.clone()).map_err(|error| {
        reply::server_error(&seat.outbox, "invalid payload for a chat message", error)
    })?;
    if is_blank(&message.message_content) {
        return Err(reply::warn_reply(&seat.outbox, request_type, "text is missing"));
    }
    if validate_content_date(message.date_unix).is_err() {
        return Err(reply::warn_reply(&seat.outbox, request_type, "Date is too old"));
    }

    let current = seat_user(seat)?;
    let message_id = chats::append_chat_message(
        state,
        open_chat.chat_id,
        current.id,
        &message.message_content,
        message.date_unix,
    )
    .await
    .map_err(|error| {
        reply::server_error(&seat.outbox, "save chat message in the store failed", error)
    })?;

    // The remembered handle may be stale if the peer reconnected under
    // a new connection; re-resolve by user id before giving up.
    let mut peer_connection = open_chat.peer_connection;
    if !state.registry.is_live(peer_connection).await {
        match state.registry.find_by_user(open_chat.peer.id).await {
            Some(fresh) => {
                peer_connection = fresh;
                if let Some(open) = seat.open_chat.as_mut() {
                    open.peer_connection = fresh;
                }
            }
            None => {
                delete_undeliverable(state, message_id).await;
                return Err(reply::warn_reply(
                    &seat.outbox,
                    request_type,
                    format!("user with id {} is offline", open_chat.peer.id),
                ));
            }
        }
    }

    let push = InputChatMessagePayload {
        message_content: message.message_content,
        author: current,
        date_unix: message.date_unix,
    };
    if let Err(error) = reply::send_push(
        state,
        peer_connection,
        agora_protocol::INPUT_CHAT_MESSAGE,
        &push,
    )
    .await
    {
        delete_undeliverable(state, message_id).await;
        return Err(reply::server_error(
            &seat.outbox,
            "deliver the chat message to the recipient failed",
            error,
        ));
    }

    Ok(Value::String(String::from("delivered")))
}

/// Clears the connection's open chat.
pub(crate) fn close_chat(seat: &mut ConnectionSeat) -> Result<Value, HandlerError> {
    let Some(open_chat) = seat.open_chat.take() else {
        return Err(reply::warn_reply(
            &seat.outbox,
            agora_protocol::CLOSE_CHAT_REQUEST,
            "no chat is open",
        ));
    };
    tracing::info!(event = "chat.closed", chat_id = open_chat.chat_id);
    Ok(Value::Null)
}

/// Loads the page of the open chat strictly before the given message id.
pub(crate) async fn chat_portion(
    state: &AppState,
    seat: &mut ConnectionSeat,
    payload: &Value,
) -> Result<Value, HandlerError> {
    let request_type = agora_protocol::CHAT_PORTION_REQUEST;
    let Some(open_chat) = seat.open_chat.clone() else {
        return Err(reply::warn_reply(&seat.outbox, request_type, "no chat is open"));
    };
    let before_message_id: i64 = serde_json::from_value(payload.clone()).map_err(|error| {
        reply::server_error(
            &seat.outbox,
            "invalid payload for the portion of chat messages",
            error,
        )
    })?;

    let messages = chats::page_chat_messages(
        state,
        open_chat.chat_id,
        before_message_id,
        CHAT_MESSAGES_PAGE_SIZE,
    )
    .await
    .map_err(|error| {
        reply::server_error(
            &seat.outbox,
            "get the next portion of chat messages from the store failed",
            error,
        )
    })?;

    let current = seat_user(seat)?;
    to_reply_value(PrivateChatPayload {
        id: open_chat.chat_id,
        name: open_chat.chat_name,
        current_user: current,
        recipient_user: open_chat.peer,
        messages,
    })
}

async fn delete_undeliverable(state: &AppState, message_id: i64) {
    if let Err(error) = chats::delete_chat_message(state, message_id).await {
        tracing::error!(
            event = "chat.cleanup_failed",
            message_id,
            error = %error
        );
    }
}

fn seat_user(seat: &ConnectionSeat) -> Result<UserStub, HandlerError> {
    seat.session
        .user_stub()
        .ok_or_else(|| HandlerError::Fatal(anyhow!("authenticated handler without a session user")))
}

fn to_reply_value<T: serde::Serialize>(payload: T) -> Result<Value, HandlerError> {
    serde_json::to_value(payload).map_err(|error| HandlerError::Fatal(error.into()))
}
