use sqlx::Row;

use crate::server::{
    core::{AppState, SessionRecord, UserRecord},
    db::ready_pool,
    errors::StoreError,
};

pub(crate) async fn create_session(
    state: &AppState,
    user_id: i64,
    token: &str,
    expires_at_unix: i64,
) -> Result<(), StoreError> {
    if let Some(pool) = ready_pool(state).await? {
        sqlx::query("INSERT INTO sessions (token, user_id, expires_at_unix) VALUES ($1, $2, $3)")
            .bind(token)
            .bind(user_id)
            .bind(expires_at_unix)
            .execute(pool)
            .await
            .map_err(StoreError::from)?;
        return Ok(());
    }

    let mut sessions = state.sessions.write().await;
    sessions.insert(
        token.to_owned(),
        SessionRecord {
            user_id,
            expires_at_unix,
        },
    );
    Ok(())
}

/// Removes the backing session record. Returns whether it existed.
pub(crate) async fn delete_session(state: &AppState, token: &str) -> Result<bool, StoreError> {
    if let Some(pool) = ready_pool(state).await? {
        let result = sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(pool)
            .await
            .map_err(StoreError::from)?;
        return Ok(result.rows_affected() > 0);
    }

    let mut sessions = state.sessions.write().await;
    Ok(sessions.remove(token).is_some())
}

pub(crate) async fn find_user_by_session_token(
    state: &AppState,
    token: &str,
) -> Result<(UserRecord, i64), StoreError> {
    if let Some(pool) = ready_pool(state).await? {
        let row = sqlx::query(
            "SELECT u.user_id, u.name, u.email, u.password_hash, u.first_name, u.last_name,
                    u.gender, u.date_birth, u.created_at_unix, s.expires_at_unix
             FROM sessions s
             JOIN users u ON u.user_id = s.user_id
             WHERE s.token = $1",
        )
        .bind(token)
        .fetch_optional(pool)
        .await
        .map_err(StoreError::from)?
        .ok_or(StoreError::NotFound)?;
        let expires_at_unix: i64 = row.try_get("expires_at_unix").map_err(StoreError::from)?;
        let user = UserRecord {
            id: row.try_get("user_id").map_err(StoreError::from)?,
            name: row.try_get("name").map_err(StoreError::from)?,
            email: row.try_get("email").map_err(StoreError::from)?,
            password_hash: row.try_get("password_hash").map_err(StoreError::from)?,
            first_name: row.try_get("first_name").map_err(StoreError::from)?,
            last_name: row.try_get("last_name").map_err(StoreError::from)?,
            gender: row.try_get("gender").map_err(StoreError::from)?,
            date_birth: row.try_get("date_birth").map_err(StoreError::from)?,
            created_at_unix: row.try_get("created_at_unix").map_err(StoreError::from)?,
        };
        return Ok((user, expires_at_unix));
    }

    let record = {
        let sessions = state.sessions.read().await;
        sessions.get(token).cloned().ok_or(StoreError::NotFound)?
    };
    let users = state.users.read().await;
    let user = users
        .get(&record.user_id)
        .cloned()
        .ok_or(StoreError::NotFound)?;
    Ok((user, record.expires_at_unix))
}

#[cfg(test)]
mod tests {
    use crate::server::{
        auth::now_unix,
        core::{AppConfig, AppState},
        errors::StoreError,
        store::users::{add_user, tests::new_user},
    };

    use super::{create_session, delete_session, find_user_by_session_token};

    #[tokio::test]
    async fn session_round_trip_and_single_delete() {
        let state = AppState::new(&AppConfig::default()).unwrap();
        let ada = add_user(&state, new_user("ada")).await.unwrap();
        let expiry = now_unix() + 60;
        create_session(&state, ada.id, "tok-1", expiry).await.unwrap();

        let (found, found_expiry) = find_user_by_session_token(&state, "tok-1").await.unwrap();
        assert_eq!(found.id, ada.id);
        assert_eq!(found_expiry, expiry);

        assert!(delete_session(&state, "tok-1").await.unwrap());
        assert!(!delete_session(&state, "tok-1").await.unwrap());
        let gone = find_user_by_session_token(&state, "tok-1").await;
        assert!(matches!(gone, Err(StoreError::NotFound)));
    }
}
