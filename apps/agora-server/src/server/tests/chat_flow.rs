use agora_core::UserStub;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::server::{
    auth::now_unix,
    core::{AppConfig, AppState, ConnectionControl, UserRecord},
    errors::HandlerError,
    realtime::{chat, dispatch, ConnectionSeat},
    registry::Member,
    session,
    store::{chats, users},
};

fn new_user(name: &str) -> users::NewUserRecord {
    users::NewUserRecord {
        name: name.to_owned(),
        email: format!("{name}@example.com"),
        password_hash: String::from("$argon2id$fake"),
        first_name: String::from("Test"),
        last_name: String::from("User"),
        gender: String::from("other"),
        date_birth: String::from("1990-01-01"),
        created_at_unix: now_unix(),
    }
}

async fn seat_for(
    state: &AppState,
    user: &UserRecord,
) -> (ConnectionSeat, mpsc::Receiver<String>) {
    let session = session::create(state, user).await.unwrap();
    let (outbox, outbox_rx) = mpsc::channel(32);
    let (control, _control_rx) = watch::channel(ConnectionControl::Open);
    let connection_id = Uuid::new_v4();
    state
        .registry
        .register(
            connection_id,
            Member {
                user: Some(UserStub {
                    id: user.id,
                    name: user.name.clone(),
                }),
                outbox: outbox.clone(),
                control,
            },
        )
        .await;
    (
        ConnectionSeat {
            connection_id,
            outbox,
            session,
            open_chat: None,
        },
        outbox_rx,
    )
}

fn parse(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap()
}

#[tokio::test]
async fn sending_to_a_departed_recipient_leaves_no_persisted_residue() {
    let state = AppState::new(&AppConfig::default()).unwrap();
    let ada = users::add_user(&state, new_user("ada")).await.unwrap();
    let brin = users::add_user(&state, new_user("brin")).await.unwrap();

    let (mut ada_seat, mut ada_rx) = seat_for(&state, &ada).await;
    let (brin_seat, _brin_rx) = seat_for(&state, &brin).await;

    let opened = chat::open_chat(&state, &mut ada_seat, &json!(brin.id))
        .await
        .unwrap();
    assert_eq!(opened["messages"], json!([]));
    let chat_id = opened["id"].as_i64().unwrap();

    // The recipient disconnects before the send.
    state.registry.unregister(brin_seat.connection_id).await;

    let payload = json!({"messageContent": "hello", "dateUnix": now_unix()});
    let error = chat::send_message_to_open_chat(&state, &mut ada_seat, &payload)
        .await
        .unwrap_err();
    assert!(error.is_warning());

    let residue = chats::page_chat_messages(&state, chat_id, 0, 10).await.unwrap();
    assert!(residue.is_empty());

    let reply = parse(&ada_rx.recv().await.unwrap());
    assert_eq!(reply["type"], "sendMessageToOpendChatReply");
    assert_eq!(reply["payload"]["result"], "error");
}

#[tokio::test]
async fn stale_peer_handle_is_reresolved_after_a_reconnect() {
    let state = AppState::new(&AppConfig::default()).unwrap();
    let ada = users::add_user(&state, new_user("ada")).await.unwrap();
    let brin = users::add_user(&state, new_user("brin")).await.unwrap();

    let (mut ada_seat, _ada_rx) = seat_for(&state, &ada).await;
    let (brin_seat, _old_rx) = seat_for(&state, &brin).await;
    let stale_connection = brin_seat.connection_id;

    chat::open_chat(&state, &mut ada_seat, &json!(brin.id))
        .await
        .unwrap();

    // Reconnect: the old handle dies, a fresh one takes the seat.
    state.registry.unregister(stale_connection).await;
    let (fresh_seat, mut fresh_rx) = seat_for(&state, &brin).await;

    let payload = json!({"messageContent": "still there?", "dateUnix": now_unix()});
    let delivered = chat::send_message_to_open_chat(&state, &mut ada_seat, &payload)
        .await
        .unwrap();
    assert_eq!(delivered, json!("delivered"));
    assert_eq!(
        ada_seat.open_chat.as_ref().unwrap().peer_connection,
        fresh_seat.connection_id
    );

    let pushed = parse(&fresh_rx.recv().await.unwrap());
    assert_eq!(pushed["type"], "inputChatMessage");
    assert_eq!(pushed["payload"]["data"]["messageContent"], "still there?");
    assert_eq!(pushed["payload"]["data"]["author"]["name"], "ada");
}

#[tokio::test]
async fn chat_requests_without_an_open_chat_warn() {
    let state = AppState::new(&AppConfig::default()).unwrap();
    let ada = users::add_user(&state, new_user("ada")).await.unwrap();
    let (mut seat, mut rx) = seat_for(&state, &ada).await;

    let payload = json!({"messageContent": "into the void", "dateUnix": now_unix()});
    let error = chat::send_message_to_open_chat(&state, &mut seat, &payload)
        .await
        .unwrap_err();
    assert!(error.is_warning());
    let reply = parse(&rx.recv().await.unwrap());
    assert_eq!(reply["payload"]["data"], "no chat is open");

    let error = chat::close_chat(&mut seat).unwrap_err();
    assert!(error.is_warning());
}

#[tokio::test]
async fn anonymous_data_request_warns_and_leaves_the_dispatch_usable() {
    let state = AppState::new(&AppConfig::default()).unwrap();
    let (outbox, mut rx) = mpsc::channel(32);
    let (control, _control_rx) = watch::channel(ConnectionControl::Open);
    let connection_id = Uuid::new_v4();
    state
        .registry
        .register(
            connection_id,
            Member {
                user: None,
                outbox: outbox.clone(),
                control,
            },
        )
        .await;
    let mut seat = ConnectionSeat {
        connection_id,
        outbox,
        session: session::Session::not_logged_in(),
        open_chat: None,
    };

    let envelope = agora_protocol::Envelope {
        message_type: String::from("newPostRequest"),
        payload: json!(0),
    };
    let error = dispatch::dispatch_envelope(&state, &mut seat, &envelope)
        .await
        .unwrap_err();
    assert!(error.is_warning());
    let reply = parse(&rx.recv().await.unwrap());
    assert_eq!(reply["type"], "newPostReply");
    assert_eq!(reply["payload"]["result"], "error");
    assert_eq!(reply["payload"]["data"], "not logged in");

    // An unknown type afterwards is ignored without closing anything.
    let unknown = agora_protocol::Envelope {
        message_type: String::from("mysteryRequest"),
        payload: Value::Null,
    };
    assert!(matches!(
        dispatch::dispatch_envelope(&state, &mut seat, &unknown).await,
        Ok(())
    ));
}

#[tokio::test]
async fn duplicate_login_is_a_warning_not_a_disconnect() {
    let state = AppState::new(&AppConfig::default()).unwrap();
    let ada = users::add_user(&state, new_user("ada")).await.unwrap();
    let (mut seat, mut rx) = seat_for(&state, &ada).await;

    let envelope = agora_protocol::Envelope {
        message_type: String::from("loginRequest"),
        payload: json!({"username": "ada", "password": "whatever"}),
    };
    let error = dispatch::dispatch_envelope(&state, &mut seat, &envelope)
        .await
        .unwrap_err();
    match error {
        HandlerError::Warning(text) => assert!(text.contains("already logged in")),
        HandlerError::Fatal(error) => panic!("expected warning, got fatal: {error}"),
    }
    let reply = parse(&rx.recv().await.unwrap());
    assert_eq!(reply["type"], "loginReply");
    assert_eq!(reply["payload"]["result"], "error");
}
