use agora_core::UserStub;

use super::{
    auth::{mint_session_token, now_unix},
    core::{AppState, UserRecord},
    errors::StoreError,
    store::sessions,
    types::SessionSnapshot,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoginStatus {
    LoggedIn,
    Expired,
    NotLoggedIn,
}

#[derive(Debug, Clone)]
pub(crate) struct AuthedUser {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) token: String,
    pub(crate) expires_at_unix: i64,
}

/// Per-connection authentication state machine.
///
/// Invariants: `LoggedIn` and `Expired` imply a present user; the
/// `Expired -> NotLoggedIn` transition in [`Session::tidy`] deletes the
/// backing session record exactly once.
#[derive(Debug, Clone)]
pub(crate) struct Session {
    status: LoginStatus,
    user: Option<AuthedUser>,
}

impl Session {
    pub(crate) fn not_logged_in() -> Self {
        Self {
            status: LoginStatus::NotLoggedIn,
            user: None,
        }
    }

    fn logged_in(user: AuthedUser) -> Self {
        Self {
            status: LoginStatus::LoggedIn,
            user: Some(user),
        }
    }

    fn expired(user: AuthedUser) -> Self {
        Self {
            status: LoginStatus::Expired,
            user: Some(user),
        }
    }

    pub(crate) fn status(&self) -> LoginStatus {
        self.status
    }

    pub(crate) fn is_logged_in(&self) -> bool {
        self.status == LoginStatus::LoggedIn
            && self
                .user
                .as_ref()
                .is_some_and(|user| user.expires_at_unix > now_unix())
    }

    pub(crate) fn user(&self) -> Option<&AuthedUser> {
        self.user.as_ref()
    }

    pub(crate) fn user_stub(&self) -> Option<UserStub> {
        self.user.as_ref().map(|user| UserStub {
            id: user.id,
            name: user.name.clone(),
        })
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        let status = match self.status {
            LoginStatus::LoggedIn => "loggedIn",
            LoginStatus::Expired => "expired",
            LoginStatus::NotLoggedIn => "notLoggedIn",
        };
        SessionSnapshot {
            status,
            user: self.user_stub(),
            token: self.user.as_ref().map(|user| user.token.clone()),
            expires_at_unix: self.user.as_ref().map(|user| user.expires_at_unix),
        }
    }

    /// Reconciles the recorded status against the clock and the
    /// persisted record. Expiry is detected lazily here; the expired
    /// record is deleted on the following call, and a session close to
    /// expiry is refreshed with a new token so a request arriving near
    /// the boundary does not race a client-visible expiry.
    pub(crate) async fn tidy(&mut self, state: &AppState) -> Result<LoginStatus, StoreError> {
        match self.status {
            LoginStatus::NotLoggedIn => Ok(LoginStatus::NotLoggedIn),
            LoginStatus::LoggedIn => {
                if self.user.is_none() {
                    self.status = LoginStatus::NotLoggedIn;
                    return Err(StoreError::Internal(String::from(
                        "logged-in session without a user",
                    )));
                }
                let now = now_unix();
                let expires_at_unix = self.user.as_ref().map_or(0, |user| user.expires_at_unix);
                if now >= expires_at_unix {
                    self.status = LoginStatus::Expired;
                    return Ok(LoginStatus::Expired);
                }
                if expires_at_unix - now < state.runtime.session_refresh_window_secs {
                    self.refresh(state).await?;
                }
                Ok(LoginStatus::LoggedIn)
            }
            LoginStatus::Expired => {
                let Some(user) = &self.user else {
                    self.status = LoginStatus::NotLoggedIn;
                    return Err(StoreError::Internal(String::from(
                        "expired session without a user",
                    )));
                };
                // Delete before advancing so a failed delete keeps the
                // cleanup obligation alive.
                sessions::delete_session(state, &user.token).await?;
                self.user = None;
                self.status = LoginStatus::NotLoggedIn;
                Ok(LoginStatus::NotLoggedIn)
            }
        }
    }

    async fn refresh(&mut self, state: &AppState) -> Result<(), StoreError> {
        let Some(user) = self.user.clone() else {
            return Ok(());
        };
        let token = mint_session_token();
        let expires_at_unix = now_unix() + state.runtime.session_ttl_secs;
        sessions::create_session(state, user.id, &token, expires_at_unix).await?;
        sessions::delete_session(state, &user.token).await?;
        tracing::debug!(event = "session.refreshed", user_id = user.id);
        self.user = Some(AuthedUser {
            id: user.id,
            name: user.name,
            token,
            expires_at_unix,
        });
        Ok(())
    }
}

/// Session for a connection presenting `token`, or `NotLoggedIn` when
/// the token is absent or unknown. A token within the refresh window is
/// reissued; a stale token yields `Expired` and the first `tidy` call
/// performs the cleanup.
pub(crate) async fn from_token(
    state: &AppState,
    token: Option<String>,
) -> Result<Session, StoreError> {
    let Some(token) = token else {
        return Ok(Session::not_logged_in());
    };
    let (user, expires_at_unix) = match sessions::find_user_by_session_token(state, &token).await {
        Ok(found) => found,
        Err(StoreError::NotFound) => return Ok(Session::not_logged_in()),
        Err(error) => return Err(error),
    };
    let authed = AuthedUser {
        id: user.id,
        name: user.name,
        token,
        expires_at_unix,
    };
    if expires_at_unix <= now_unix() {
        return Ok(Session::expired(authed));
    }
    let mut session = Session::logged_in(authed);
    if expires_at_unix - now_unix() < state.runtime.session_refresh_window_secs {
        session.refresh(state).await?;
    }
    Ok(session)
}

/// Fresh logged-in session for a user who just authenticated: mints an
/// opaque token and persists the record with the configured TTL.
pub(crate) async fn create(state: &AppState, user: &UserRecord) -> Result<Session, StoreError> {
    let token = mint_session_token();
    let expires_at_unix = now_unix() + state.runtime.session_ttl_secs;
    sessions::create_session(state, user.id, &token, expires_at_unix).await?;
    tracing::info!(event = "session.created", user_id = user.id);
    Ok(Session::logged_in(AuthedUser {
        id: user.id,
        name: user.name.clone(),
        token,
        expires_at_unix,
    }))
}

#[cfg(test)]
mod tests {
    use crate::server::{
        auth::now_unix,
        core::{AppConfig, AppState},
        store::{
            sessions::{create_session, find_user_by_session_token},
            users::{add_user, tests::new_user},
        },
    };

    use super::{create, from_token, AuthedUser, LoginStatus, Session};

    #[tokio::test]
    async fn tidy_is_idempotent_once_not_logged_in() {
        let state = AppState::new(&AppConfig::default()).unwrap();
        let ada = add_user(&state, new_user("ada")).await.unwrap();
        create_session(&state, ada.id, "stale", now_unix() - 10)
            .await
            .unwrap();

        let mut session = Session {
            status: LoginStatus::Expired,
            user: Some(AuthedUser {
                id: ada.id,
                name: ada.name.clone(),
                token: String::from("stale"),
                expires_at_unix: now_unix() - 10,
            }),
        };

        assert_eq!(session.tidy(&state).await.unwrap(), LoginStatus::NotLoggedIn);
        assert!(find_user_by_session_token(&state, "stale").await.is_err());

        // Re-seed a record under the same token: a second tidy must not
        // re-trigger the delete.
        create_session(&state, ada.id, "stale", now_unix() + 60)
            .await
            .unwrap();
        assert_eq!(session.tidy(&state).await.unwrap(), LoginStatus::NotLoggedIn);
        assert!(find_user_by_session_token(&state, "stale").await.is_ok());
    }

    #[tokio::test]
    async fn logged_in_session_expires_lazily() {
        let state = AppState::new(&AppConfig::default()).unwrap();
        let ada = add_user(&state, new_user("ada")).await.unwrap();
        let mut session = Session {
            status: LoginStatus::LoggedIn,
            user: Some(AuthedUser {
                id: ada.id,
                name: ada.name.clone(),
                token: String::from("old"),
                expires_at_unix: now_unix() - 1,
            }),
        };

        assert_eq!(session.tidy(&state).await.unwrap(), LoginStatus::Expired);
        assert!(!session.is_logged_in());
    }

    #[tokio::test]
    async fn near_expiry_session_is_refreshed_with_a_new_token() {
        let state = AppState::new(&AppConfig::default()).unwrap();
        let ada = add_user(&state, new_user("ada")).await.unwrap();
        let closing_in = now_unix() + 5;
        create_session(&state, ada.id, "closing", closing_in)
            .await
            .unwrap();

        let session = from_token(&state, Some(String::from("closing")))
            .await
            .unwrap();

        assert!(session.is_logged_in());
        let user = session.user().unwrap();
        assert_ne!(user.token, "closing");
        assert!(user.expires_at_unix > closing_in);
        assert!(find_user_by_session_token(&state, "closing").await.is_err());
        assert!(find_user_by_session_token(&state, &user.token).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_or_absent_token_is_not_logged_in() {
        let state = AppState::new(&AppConfig::default()).unwrap();
        let anonymous = from_token(&state, None).await.unwrap();
        assert_eq!(anonymous.status(), LoginStatus::NotLoggedIn);
        let unknown = from_token(&state, Some(String::from("ghost"))).await.unwrap();
        assert_eq!(unknown.status(), LoginStatus::NotLoggedIn);
    }

    #[tokio::test]
    async fn create_persists_a_record_and_snapshot_carries_token() {
        let state = AppState::new(&AppConfig::default()).unwrap();
        let ada = add_user(&state, new_user("ada")).await.unwrap();
        let session = create(&state, &ada).await.unwrap();
        assert!(session.is_logged_in());

        let token = session.user().unwrap().token.clone();
        assert!(find_user_by_session_token(&state, &token).await.is_ok());

        let snapshot = serde_json::to_value(session.snapshot()).unwrap();
        assert_eq!(snapshot["status"], "loggedIn");
        assert_eq!(snapshot["token"], serde_json::Value::from(token));
    }
}
