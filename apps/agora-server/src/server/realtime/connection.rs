use agora_core::UserStub;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::server::{
    auth::session_cookie_token,
    core::{AppState, ConnectionControl},
    errors::HandlerError,
    metrics::{record_frame_rejected, record_ws_disconnect},
    registry::Member,
    session::{self, Session},
};

use super::{dispatch, presence, reply, write_pump};

/// The single open chat of one connection: at most one at a time. The
/// remembered peer connection may go stale across a reconnect; senders
/// re-resolve it by user id before giving up.
#[derive(Debug, Clone)]
pub(crate) struct OpenChat {
    pub(crate) chat_id: i64,
    pub(crate) chat_name: String,
    pub(crate) peer: UserStub,
    pub(crate) peer_connection: Uuid,
}

/// Connection-local state owned by the read pump. Handlers mutate the
/// session and open chat in place between frames; nothing else holds a
/// mutable reference.
pub(crate) struct ConnectionSeat {
    pub(crate) connection_id: Uuid,
    pub(crate) outbox: mpsc::Sender<String>,
    pub(crate) session: Session,
    pub(crate) open_chat: Option<OpenChat>,
}

/// Websocket endpoint of the forum. The session rides in on the cookie
/// token presented with the upgrade request.
pub(crate) async fn forum_ws(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let token = session_cookie_token(&headers);
    let session = match session::from_token(&state, token).await {
        Ok(session) => session,
        Err(error) => {
            tracing::error!(event = "channel.session.load_failed", error = %error);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    Ok(ws.on_upgrade(move |socket| async move {
        handle_connection(state, socket, session).await;
    }))
}

#[allow(clippy::too_many_lines)]
pub(crate) async fn handle_connection(state: AppState, socket: WebSocket, session: Session) {
    let connection_id = Uuid::new_v4();
    let (sink, mut stream) = socket.split();

    let (outbox_tx, outbox_rx) = mpsc::channel::<String>(state.runtime.outbound_queue);
    let (control_tx, control_rx) = watch::channel(ConnectionControl::Open);
    state
        .registry
        .register(
            connection_id,
            Member {
                user: session.user_stub(),
                outbox: outbox_tx.clone(),
                control: control_tx,
            },
        )
        .await;
    tracing::info!(event = "channel.connection.open", connection_id = %connection_id);

    let write_task = tokio::spawn(write_pump::run(
        sink,
        outbox_rx,
        control_rx,
        state.runtime.clone(),
    ));

    let mut seat = ConnectionSeat {
        connection_id,
        outbox: outbox_tx,
        session,
        open_chat: None,
    };

    let mut disconnect_reason = "connection_closed";
    let mut setup_failed = false;
    if seat.session.is_logged_in() {
        if let Err(error) = presence::announce_online(&state, &seat).await {
            if error.is_warning() {
                tracing::warn!(event = "channel.presence.partial", error = %error);
            } else {
                tracing::error!(event = "channel.presence.failed", error = %error);
                disconnect_reason = "setup_failed";
                setup_failed = true;
            }
        }
    }
    if !setup_failed {
        if let Err(error) = reply::send_message(
            &seat.outbox,
            agora_protocol::CURRENT_SESSION,
            seat.session.snapshot(),
        ) {
            tracing::error!(event = "channel.session.push_failed", error = %error);
            disconnect_reason = "setup_failed";
            setup_failed = true;
        }
    }

    if !setup_failed {
        loop {
            let frame = tokio::time::timeout(state.runtime.read_deadline, stream.next()).await;
            let message = match frame {
                Err(_) => {
                    disconnect_reason = "read_deadline";
                    break;
                }
                Ok(None) => {
                    disconnect_reason = "connection_closed";
                    break;
                }
                Ok(Some(Err(_))) => {
                    disconnect_reason = "socket_error";
                    break;
                }
                Ok(Some(Ok(message))) => message,
            };

            let payload: Vec<u8> = match message {
                Message::Text(text) => {
                    if text.len() > state.runtime.max_frame_bytes {
                        record_frame_rejected("oversized");
                        disconnect_reason = "frame_too_large";
                        break;
                    }
                    text.as_bytes().to_vec()
                }
                Message::Binary(bytes) => {
                    if bytes.len() > state.runtime.max_frame_bytes {
                        record_frame_rejected("oversized");
                        disconnect_reason = "frame_too_large";
                        break;
                    }
                    bytes.to_vec()
                }
                Message::Close(_) => {
                    disconnect_reason = "client_close";
                    break;
                }
                // Any control frame from the peer resets the idle-read
                // deadline by arriving at all.
                Message::Ping(_) | Message::Pong(_) => continue,
            };

            let envelope = match agora_protocol::parse_envelope(&payload) {
                Ok(envelope) => envelope,
                Err(error) => {
                    record_frame_rejected("invalid_envelope");
                    tracing::warn!(event = "channel.frame.rejected", error = %error);
                    disconnect_reason = "invalid_envelope";
                    break;
                }
            };

            match dispatch::dispatch_envelope(&state, &mut seat, &envelope).await {
                Ok(()) => {}
                Err(HandlerError::Warning(warning)) => {
                    tracing::debug!(
                        event = "channel.request.warning",
                        request_type = %envelope.message_type,
                        warning
                    );
                }
                Err(HandlerError::Fatal(error)) => {
                    tracing::error!(
                        event = "channel.request.failed",
                        request_type = %envelope.message_type,
                        error = %error
                    );
                    disconnect_reason = "handler_error";
                    break;
                }
            }
        }
    }

    // A connection the registry already evicted as a slow consumer still
    // owes its peers the departure notice; the seat's session names the
    // user in that case. Logout clears both, so nothing fires twice.
    let departed = match state.registry.user_of(connection_id).await {
        Some(user) => Some(user),
        None => seat.session.user_stub(),
    };
    state.registry.unregister(connection_id).await;
    if let Some(user) = departed {
        let failures = presence::announce_offline(&state, &user).await;
        if !failures.is_empty() {
            tracing::warn!(
                event = "channel.presence.offline_partial",
                user_id = user.id,
                failures = failures.len()
            );
        }
    }

    record_ws_disconnect(disconnect_reason);
    tracing::info!(
        event = "channel.connection.close",
        connection_id = %connection_id,
        reason = disconnect_reason
    );

    // Dropping the seat closes the outbox; the write pump drains what is
    // queued, sends the close frame, and exits. Abort it only if it
    // fails to do so within the write deadline.
    let write_deadline = state.runtime.write_deadline;
    let write_abort = write_task.abort_handle();
    drop(seat);
    if tokio::time::timeout(write_deadline, write_task).await.is_err() {
        write_abort.abort();
        tracing::warn!(event = "channel.write_pump.stalled", connection_id = %connection_id);
    }
}
