use agora_core::UserStub;

use crate::server::{
    core::AppState,
    errors::HandlerError,
    store,
    types::UserWithMessageDate,
};

use super::{connection::ConnectionSeat, reply};

/// Presence fan-out for a connection that just became authenticated:
/// the new connection receives the annotated online-user list, every
/// other online connection receives a `newOnlineUser` notification
/// annotated from its own perspective. Individual peer failures are
/// collected into one batch warning and never abort the remaining
/// deliveries.
pub(crate) async fn announce_online(
    state: &AppState,
    seat: &ConnectionSeat,
) -> Result<(), HandlerError> {
    let Some(current) = seat.session.user_stub() else {
        return Ok(());
    };
    state
        .registry
        .set_user(seat.connection_id, Some(current.clone()))
        .await;

    let online = state.registry.list_online().await;
    let online_ids: Vec<i64> = online.keys().copied().collect();
    let users = store::users::list_users_ordered_by_last_message_to(state, current.id, &online_ids)
        .await
        .map_err(|error| {
            reply::server_error(&seat.outbox, "get the online users from the store failed", error)
        })?;
    reply::send_message(&seat.outbox, agora_protocol::ONLINE_USERS, &users)?;

    let mut failures = Vec::new();
    for (user_id, connection_id) in &online {
        if *user_id == current.id {
            continue;
        }
        match store::chats::last_message_at(state, current.id, *user_id).await {
            Ok(last_message_at_unix) => {
                let notification = UserWithMessageDate {
                    id: current.id,
                    name: current.name.clone(),
                    last_message_at_unix,
                };
                if let Err(error) = reply::send_push(
                    state,
                    *connection_id,
                    agora_protocol::NEW_ONLINE_USER,
                    &notification,
                )
                .await
                {
                    failures.push(format!("user {user_id}: {error}"));
                }
            }
            Err(error) => failures.push(format!("user {user_id}: {error}")),
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(reply::batch_warning(
            &seat.outbox,
            "presence notification",
            &failures,
        ))
    }
}

/// Notifies every remaining online connection that a user went offline.
/// Returns the individual failures; callers decide whether to warn the
/// requester (logout) or just log them (disconnect).
pub(crate) async fn announce_offline(state: &AppState, departed: &UserStub) -> Vec<String> {
    let online = state.registry.list_online().await;
    let mut failures = Vec::new();
    for (user_id, connection_id) in &online {
        if let Err(error) = reply::send_push(
            state,
            *connection_id,
            agora_protocol::OFFLINE_USER,
            departed,
        )
        .await
        {
            failures.push(format!("user {user_id}: {error}"));
        }
    }
    failures
}
