use agora_core::looks_like_email;
use sqlx::Row;

use super::next_id;
use crate::server::{
    core::{AppState, UserRecord},
    db::ready_pool,
    errors::StoreError,
    types::UserWithMessageDate,
};

pub(crate) struct NewUserRecord {
    pub(crate) name: String,
    pub(crate) email: String,
    pub(crate) password_hash: String,
    pub(crate) first_name: String,
    pub(crate) last_name: String,
    pub(crate) gender: String,
    pub(crate) date_birth: String,
    pub(crate) created_at_unix: i64,
}

fn user_from_row(row: &sqlx::postgres::PgRow) -> Result<UserRecord, StoreError> {
    Ok(UserRecord {
        id: row.try_get("user_id").map_err(StoreError::from)?,
        name: row.try_get("name").map_err(StoreError::from)?,
        email: row.try_get("email").map_err(StoreError::from)?,
        password_hash: row.try_get("password_hash").map_err(StoreError::from)?,
        first_name: row.try_get("first_name").map_err(StoreError::from)?,
        last_name: row.try_get("last_name").map_err(StoreError::from)?,
        gender: row.try_get("gender").map_err(StoreError::from)?,
        date_birth: row.try_get("date_birth").map_err(StoreError::from)?,
        created_at_unix: row.try_get("created_at_unix").map_err(StoreError::from)?,
    })
}

const USER_COLUMNS: &str =
    "user_id, name, email, password_hash, first_name, last_name, gender, date_birth, created_at_unix";

pub(crate) async fn add_user(
    state: &AppState,
    new_user: NewUserRecord,
) -> Result<UserRecord, StoreError> {
    if let Some(pool) = ready_pool(state).await? {
        let row = sqlx::query(
            "INSERT INTO users
                (name, email, password_hash, first_name, last_name, gender, date_birth, created_at_unix)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING user_id",
        )
        .bind(&new_user.name)
        .bind(&new_user.email)
        .bind(&new_user.password_hash)
        .bind(&new_user.first_name)
        .bind(&new_user.last_name)
        .bind(&new_user.gender)
        .bind(&new_user.date_birth)
        .bind(new_user.created_at_unix)
        .fetch_one(pool)
        .await
        .map_err(StoreError::from)?;
        let id: i64 = row.try_get("user_id").map_err(StoreError::from)?;
        return Ok(UserRecord {
            id,
            name: new_user.name,
            email: new_user.email,
            password_hash: new_user.password_hash,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            gender: new_user.gender,
            date_birth: new_user.date_birth,
            created_at_unix: new_user.created_at_unix,
        });
    }

    let mut users = state.users.write().await;
    if users.values().any(|user| user.name == new_user.name) {
        return Err(StoreError::UniqueName);
    }
    if users.values().any(|user| user.email == new_user.email) {
        return Err(StoreError::UniqueEmail);
    }
    let id = next_id(&state.user_seq);
    let record = UserRecord {
        id,
        name: new_user.name,
        email: new_user.email,
        password_hash: new_user.password_hash,
        first_name: new_user.first_name,
        last_name: new_user.last_name,
        gender: new_user.gender,
        date_birth: new_user.date_birth,
        created_at_unix: new_user.created_at_unix,
    };
    users.insert(id, record.clone());
    Ok(record)
}

/// Email-shaped keys resolve by email, anything else by username.
pub(crate) async fn find_user_by_credential_key(
    state: &AppState,
    credential_key: &str,
) -> Result<UserRecord, StoreError> {
    let by_email = looks_like_email(credential_key);
    if let Some(pool) = ready_pool(state).await? {
        let query = if by_email {
            format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1")
        } else {
            format!("SELECT {USER_COLUMNS} FROM users WHERE name = $1")
        };
        let row = sqlx::query(&query)
            .bind(credential_key)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::from)?
            .ok_or(StoreError::NotFound)?;
        return user_from_row(&row);
    }

    let users = state.users.read().await;
    users
        .values()
        .find(|user| {
            if by_email {
                user.email == credential_key
            } else {
                user.name == credential_key
            }
        })
        .cloned()
        .ok_or(StoreError::NotFound)
}

/// Online-user listing for presence: every candidate except the viewer,
/// annotated with the last private message from that user to the viewer,
/// newest first, ties broken by case-insensitive name.
pub(crate) async fn list_users_ordered_by_last_message_to(
    state: &AppState,
    for_user_id: i64,
    candidate_ids: &[i64],
) -> Result<Vec<UserWithMessageDate>, StoreError> {
    if let Some(pool) = ready_pool(state).await? {
        let rows = sqlx::query(
            "SELECT u.user_id, u.name, MAX(m.created_at_unix) AS last_message_at_unix
             FROM users u
             LEFT JOIN chats c
               ON (c.member_a = u.user_id AND c.member_b = $1)
               OR (c.member_a = $1 AND c.member_b = u.user_id)
             LEFT JOIN chat_messages m
               ON m.chat_id = c.chat_id AND m.author_id = u.user_id
             WHERE u.user_id <> $1 AND u.user_id = ANY($2)
             GROUP BY u.user_id, u.name
             ORDER BY MAX(m.created_at_unix) DESC NULLS LAST, LOWER(u.name)",
        )
        .bind(for_user_id)
        .bind(candidate_ids)
        .fetch_all(pool)
        .await
        .map_err(StoreError::from)?;
        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            users.push(UserWithMessageDate {
                id: row.try_get("user_id").map_err(StoreError::from)?,
                name: row.try_get("name").map_err(StoreError::from)?,
                last_message_at_unix: row
                    .try_get("last_message_at_unix")
                    .map_err(StoreError::from)?,
            });
        }
        return Ok(users);
    }

    let stubs: Vec<(i64, String)> = {
        let users = state.users.read().await;
        candidate_ids
            .iter()
            .filter(|id| **id != for_user_id)
            .filter_map(|id| users.get(id).map(|user| (user.id, user.name.clone())))
            .collect()
    };
    let mut annotated = Vec::with_capacity(stubs.len());
    for (id, name) in stubs {
        let last_message_at_unix = super::chats::last_message_at(state, id, for_user_id).await?;
        annotated.push(UserWithMessageDate {
            id,
            name,
            last_message_at_unix,
        });
    }
    annotated.sort_by(|a, b| match (a.last_message_at_unix, b.last_message_at_unix) {
        (Some(a_at), Some(b_at)) => b_at
            .cmp(&a_at)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase())),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    });
    Ok(annotated)
}
