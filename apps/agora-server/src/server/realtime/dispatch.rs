use agora_protocol::Envelope;

use crate::server::{core::AppState, errors::HandlerError, metrics::record_unknown_request};

use super::{chat, connection::ConnectionSeat, forum, handlers_auth, reply};

/// Requests that are themselves authentication actions and therefore
/// bypass the logged-in check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuthRequest {
    Register,
    Login,
    Logout,
}

impl AuthRequest {
    pub(crate) fn from_message_type(message_type: &str) -> Option<Self> {
        match message_type {
            agora_protocol::REGISTER_REQUEST => Some(Self::Register),
            agora_protocol::LOGIN_REQUEST => Some(Self::Login),
            agora_protocol::LOGOUT_REQUEST => Some(Self::Logout),
            _ => None,
        }
    }
}

/// Requests that require a prior authentication check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DataRequest {
    PostsPortion,
    FullPostAndComments,
    NewPost,
    NewComment,
    Reaction,
    OpenChat,
    SendMessageToOpenChat,
    CloseChat,
    ChatPortion,
}

impl DataRequest {
    pub(crate) fn from_message_type(message_type: &str) -> Option<Self> {
        match message_type {
            agora_protocol::POSTS_PORTION_REQUEST => Some(Self::PostsPortion),
            agora_protocol::FULL_POST_AND_COMMENTS_REQUEST => Some(Self::FullPostAndComments),
            agora_protocol::NEW_POST_REQUEST => Some(Self::NewPost),
            agora_protocol::NEW_COMMENT_REQUEST => Some(Self::NewComment),
            agora_protocol::REACTION_REQUEST => Some(Self::Reaction),
            agora_protocol::OPEN_CHAT_REQUEST => Some(Self::OpenChat),
            agora_protocol::SEND_MESSAGE_TO_OPEND_CHAT_REQUEST => Some(Self::SendMessageToOpenChat),
            agora_protocol::CLOSE_CHAT_REQUEST => Some(Self::CloseChat),
            agora_protocol::CHAT_PORTION_REQUEST => Some(Self::ChatPortion),
            _ => None,
        }
    }
}

/// Routes one inbound envelope to its handler and frames the reply. A
/// type matching neither table is logged and ignored.
pub(crate) async fn dispatch_envelope(
    state: &AppState,
    seat: &mut ConnectionSeat,
    envelope: &Envelope,
) -> Result<(), HandlerError> {
    let message_type = envelope.message_type.as_str();

    if agora_protocol::is_authentication(message_type) {
        let Some(request) = AuthRequest::from_message_type(message_type) else {
            log_unknown(message_type);
            return Ok(());
        };
        return match request {
            AuthRequest::Register => handlers_auth::reply_register(state, seat, &envelope.payload).await,
            AuthRequest::Login => handlers_auth::reply_login(state, seat, &envelope.payload).await,
            AuthRequest::Logout => handlers_auth::reply_logout(state, seat).await,
        };
    }

    let Some(request) = DataRequest::from_message_type(message_type) else {
        log_unknown(message_type);
        return Ok(());
    };

    check_logged_status(state, seat, message_type).await?;

    let data = match request {
        DataRequest::PostsPortion => forum::posts_portion(state, seat, &envelope.payload).await?,
        DataRequest::FullPostAndComments => {
            forum::full_post_and_comments(state, seat, &envelope.payload).await?
        }
        DataRequest::NewPost => forum::new_post(state, seat, &envelope.payload).await?,
        DataRequest::NewComment => forum::new_comment(state, seat, &envelope.payload).await?,
        DataRequest::Reaction => forum::reaction(state, seat, &envelope.payload).await?,
        DataRequest::OpenChat => chat::open_chat(state, seat, &envelope.payload).await?,
        DataRequest::SendMessageToOpenChat => {
            chat::send_message_to_open_chat(state, seat, &envelope.payload).await?
        }
        DataRequest::CloseChat => chat::close_chat(seat)?,
        DataRequest::ChatPortion => chat::chat_portion(state, seat, &envelope.payload).await?,
    };

    reply::send_success_reply(&seat.outbox, message_type, data)
}

/// Tidies the session and verifies it is logged in, synthesizing the
/// "not logged in" warning reply otherwise.
async fn check_logged_status(
    state: &AppState,
    seat: &mut ConnectionSeat,
    request_type: &str,
) -> Result<(), HandlerError> {
    if let Err(error) = seat.session.tidy(state).await {
        return Err(reply::server_error(
            &seat.outbox,
            "invalid session status",
            error,
        ));
    }
    if !seat.session.is_logged_in() {
        return Err(reply::warn_reply(&seat.outbox, request_type, "not logged in"));
    }
    Ok(())
}

fn log_unknown(message_type: &str) {
    record_unknown_request(message_type);
    tracing::warn!(event = "channel.request.unknown", request_type = %message_type);
}

#[cfg(test)]
mod tests {
    use super::{AuthRequest, DataRequest};

    #[test]
    fn every_request_type_has_exactly_one_dispatch_target() {
        let auth_types = ["registerRequest", "loginRequest", "logoutRequest"];
        for message_type in auth_types {
            assert!(AuthRequest::from_message_type(message_type).is_some());
            assert!(DataRequest::from_message_type(message_type).is_none());
        }

        let data_types = [
            "postsPortionRequest",
            "fullPostAndCommentsRequest",
            "newPostRequest",
            "newCommentRequest",
            "reactionRequest",
            "openChatRequest",
            "sendMessageToOpendChatRequest",
            "closeChatRequest",
            "chatPortionRequest",
        ];
        for message_type in data_types {
            assert!(DataRequest::from_message_type(message_type).is_some());
            assert!(AuthRequest::from_message_type(message_type).is_none());
        }

        assert!(AuthRequest::from_message_type("loginsRequest").is_none());
        assert!(DataRequest::from_message_type("mysteryRequest").is_none());
    }
}
