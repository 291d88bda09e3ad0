use agora_core::{is_blank, EmailAddress, Username};
use serde_json::Value;

use crate::server::{
    auth::{hash_password, now_unix, verify_password},
    core::AppState,
    errors::{HandlerError, StoreError},
    metrics::record_auth_failure,
    session::{self, LoginStatus, Session},
    store::users::{self, NewUserRecord},
    types::CredentialsDto,
};

use super::{connection::ConnectionSeat, presence, reply};

/// Registration: validates the submitted profile, persists the user,
/// opens a fresh session, replies with its snapshot, and re-seats the
/// connection as online.
pub(crate) async fn reply_register(
    state: &AppState,
    seat: &mut ConnectionSeat,
    payload: &Value,
) -> Result<(), HandlerError> {
    let request_type = agora_protocol::REGISTER_REQUEST;
    if tidy_for_auth(state, seat).await? == LoginStatus::LoggedIn {
        return Err(reply::warn_reply(
            &seat.outbox,
            request_type,
            "register is forbidden: a user has already logged in",
        ));
    }

    let credentials: CredentialsDto = serde_json::from_value(payload.clone()).map_err(|error| {
        reply::server_error(&seat.outbox, "invalid payload for user credentials", error)
    })?;
    if let Err(warning) = validate_registration(&credentials) {
        return Err(reply::warn_reply(&seat.outbox, request_type, warning));
    }

    let password_hash = hash_password(&credentials.password)
        .map_err(|error| reply::server_error(&seat.outbox, "password hashing failed", error))?;
    let user = match users::add_user(
        state,
        NewUserRecord {
            name: credentials.username.clone(),
            email: credentials.email.clone(),
            password_hash,
            first_name: credentials.first_name,
            last_name: credentials.last_name,
            gender: credentials.gender,
            date_birth: credentials.date_birth,
            created_at_unix: now_unix(),
        },
    )
    .await
    {
        Ok(user) => user,
        Err(StoreError::UniqueName) => {
            return Err(reply::warn_reply(
                &seat.outbox,
                request_type,
                format!("Username '{}' is already taken", credentials.username),
            ));
        }
        Err(StoreError::UniqueEmail) => {
            return Err(reply::warn_reply(
                &seat.outbox,
                request_type,
                format!("Account with email '{}' already exists", credentials.email),
            ));
        }
        Err(error) => {
            return Err(reply::server_error(
                &seat.outbox,
                "add a new user to the store failed",
                error,
            ));
        }
    };

    let new_session = session::create(state, &user)
        .await
        .map_err(|error| reply::server_error(&seat.outbox, "session creation failed", error))?;
    reply::send_success_reply(&seat.outbox, request_type, new_session.snapshot())?;
    tracing::info!(event = "auth.registered", user_id = user.id);

    seat.session = new_session;
    presence::announce_online(state, seat).await
}

/// Login: resolves the credential key (username or email), verifies the
/// password, opens a fresh session, replies, and re-seats the connection
/// as online.
pub(crate) async fn reply_login(
    state: &AppState,
    seat: &mut ConnectionSeat,
    payload: &Value,
) -> Result<(), HandlerError> {
    let request_type = agora_protocol::LOGIN_REQUEST;
    if tidy_for_auth(state, seat).await? == LoginStatus::LoggedIn {
        return Err(reply::warn_reply(
            &seat.outbox,
            request_type,
            "login is forbidden: a user has already logged in",
        ));
    }

    let credentials: CredentialsDto = serde_json::from_value(payload.clone()).map_err(|error| {
        reply::server_error(&seat.outbox, "invalid payload for user credentials", error)
    })?;
    if is_blank(&credentials.username) {
        return Err(reply::warn_reply(&seat.outbox, request_type, "Username missing"));
    }
    if is_blank(&credentials.password) {
        return Err(reply::warn_reply(&seat.outbox, request_type, "Password missing"));
    }

    let user = match users::find_user_by_credential_key(state, &credentials.username).await {
        Ok(user) => user,
        Err(StoreError::NotFound) => {
            // Burn a verification on the dummy hash so unknown users
            // cost the same as wrong passwords.
            let _ = verify_password(&state.dummy_password_hash, &credentials.password);
            record_auth_failure("unknown_user");
            return Err(reply::warn_reply(
                &seat.outbox,
                request_type,
                format!("User '{}' doesn't exist", credentials.username),
            ));
        }
        Err(error) => {
            return Err(reply::server_error(
                &seat.outbox,
                "get the user from the store failed",
                error,
            ));
        }
    };
    if !verify_password(&user.password_hash, &credentials.password) {
        record_auth_failure("wrong_password");
        return Err(reply::warn_reply(&seat.outbox, request_type, "Wrong password"));
    }

    let new_session = session::create(state, &user)
        .await
        .map_err(|error| reply::server_error(&seat.outbox, "session creation failed", error))?;
    reply::send_success_reply(&seat.outbox, request_type, new_session.snapshot())?;
    tracing::info!(event = "auth.logged_in", user_id = user.id);

    seat.session = new_session;
    presence::announce_online(state, seat).await
}

/// Logout: deletes the backing session record, replies with the reset
/// snapshot, and re-seats the connection as anonymous, notifying the
/// remaining users.
pub(crate) async fn reply_logout(
    state: &AppState,
    seat: &mut ConnectionSeat,
) -> Result<(), HandlerError> {
    let request_type = agora_protocol::LOGOUT_REQUEST;
    if tidy_for_auth(state, seat).await? == LoginStatus::NotLoggedIn {
        return Err(reply::warn_reply(
            &seat.outbox,
            request_type,
            "logout is forbidden: no logged user",
        ));
    }

    if let Some(user) = seat.session.user() {
        if let Err(error) = crate::server::store::sessions::delete_session(state, &user.token).await
        {
            return Err(reply::server_error(&seat.outbox, "session delete failed", error));
        }
    }
    let departed = seat.session.user_stub();
    seat.session = Session::not_logged_in();
    reply::send_success_reply(&seat.outbox, request_type, seat.session.snapshot())?;

    state.registry.set_user(seat.connection_id, None).await;
    if let Some(user) = departed {
        tracing::info!(event = "auth.logged_out", user_id = user.id);
        let failures = presence::announce_offline(state, &user).await;
        if !failures.is_empty() {
            return Err(reply::batch_warning(
                &seat.outbox,
                "offline notification",
                &failures,
            ));
        }
    }
    Ok(())
}

async fn tidy_for_auth(
    state: &AppState,
    seat: &mut ConnectionSeat,
) -> Result<LoginStatus, HandlerError> {
    seat.session
        .tidy(state)
        .await
        .map_err(|error| reply::server_error(&seat.outbox, "invalid session status", error))
}

fn validate_registration(credentials: &CredentialsDto) -> Result<(), String> {
    Username::try_from(credentials.username.clone())
        .map_err(|_| String::from("username missing or invalid"))?;
    EmailAddress::try_from(credentials.email.clone()).map_err(|_| String::from("wrong email"))?;
    if is_blank(&credentials.password) {
        return Err(String::from("password missing"));
    }
    if is_blank(&credentials.date_birth) {
        return Err(String::from("dateBirth missing"));
    }
    if is_blank(&credentials.gender) {
        return Err(String::from("gender missing"));
    }
    if is_blank(&credentials.first_name) {
        return Err(String::from("First name missing"));
    }
    if is_blank(&credentials.last_name) {
        return Err(String::from("Last name missing"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::server::types::CredentialsDto;

    use super::validate_registration;

    fn full_credentials() -> CredentialsDto {
        CredentialsDto {
            username: String::from("margo"),
            email: String::from("margo@example.com"),
            password: String::from("super-secure"),
            date_birth: String::from("1990-04-01"),
            gender: String::from("other"),
            first_name: String::from("Margo"),
            last_name: String::from("Faulkner"),
        }
    }

    #[test]
    fn complete_registration_passes_validation() {
        assert!(validate_registration(&full_credentials()).is_ok());
    }

    #[test]
    fn each_missing_field_names_itself() {
        let mut no_email = full_credentials();
        no_email.email = String::new();
        assert_eq!(validate_registration(&no_email).unwrap_err(), "wrong email");

        let mut no_password = full_credentials();
        no_password.password = String::from("  ");
        assert_eq!(
            validate_registration(&no_password).unwrap_err(),
            "password missing"
        );

        let mut undefined_gender = full_credentials();
        undefined_gender.gender = String::from("undefined");
        assert_eq!(
            validate_registration(&undefined_gender).unwrap_err(),
            "gender missing"
        );
    }
}
