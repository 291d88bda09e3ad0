use sqlx::PgPool;

use super::{
    core::{AppState, DEFAULT_CATEGORY_NAMES},
    errors::StoreError,
};

/// Returns the pool with the schema guaranteed present, or `None` when
/// the process runs on the in-memory store.
pub(crate) async fn ready_pool(state: &AppState) -> Result<Option<&PgPool>, StoreError> {
    if state.db_pool.is_some() {
        ensure_db_schema(state).await?;
    }
    Ok(state.db_pool.as_ref())
}

pub(crate) async fn ensure_db_schema(state: &AppState) -> Result<(), StoreError> {
    const SCHEMA_INIT_LOCK_ID: i64 = 0x0041_474f_5241;
    let Some(pool) = &state.db_pool else {
        return Ok(());
    };

    state
        .db_init
        .get_or_try_init(|| async move {
            let mut tx = pool.begin().await?;
            sqlx::query("SELECT pg_advisory_xact_lock($1)")
                .bind(SCHEMA_INIT_LOCK_ID)
                .execute(&mut *tx)
                .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS users (
                    user_id BIGSERIAL PRIMARY KEY,
                    name TEXT NOT NULL,
                    email TEXT NOT NULL,
                    password_hash TEXT NOT NULL,
                    first_name TEXT NOT NULL DEFAULT '',
                    last_name TEXT NOT NULL DEFAULT '',
                    gender TEXT NOT NULL DEFAULT '',
                    date_birth TEXT NOT NULL DEFAULT '',
                    created_at_unix BIGINT NOT NULL,
                    CONSTRAINT users_name_key UNIQUE (name),
                    CONSTRAINT users_email_key UNIQUE (email)
                )",
            )
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS sessions (
                    token TEXT PRIMARY KEY,
                    user_id BIGINT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    expires_at_unix BIGINT NOT NULL
                )",
            )
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS categories (
                    category_id BIGSERIAL PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE
                )",
            )
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS posts (
                    post_id BIGSERIAL PRIMARY KEY,
                    theme TEXT NOT NULL,
                    content TEXT NOT NULL,
                    author_id BIGINT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    created_at_unix BIGINT NOT NULL
                )",
            )
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS post_categories (
                    post_id BIGINT NOT NULL REFERENCES posts(post_id) ON DELETE CASCADE,
                    category_id BIGINT NOT NULL REFERENCES categories(category_id) ON DELETE CASCADE,
                    PRIMARY KEY (post_id, category_id)
                )",
            )
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS comments (
                    comment_id BIGSERIAL PRIMARY KEY,
                    post_id BIGINT NOT NULL REFERENCES posts(post_id) ON DELETE CASCADE,
                    author_id BIGINT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    content TEXT NOT NULL,
                    created_at_unix BIGINT NOT NULL
                )",
            )
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS post_reactions (
                    post_id BIGINT NOT NULL REFERENCES posts(post_id) ON DELETE CASCADE,
                    user_id BIGINT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    is_like BOOLEAN NOT NULL,
                    PRIMARY KEY (post_id, user_id)
                )",
            )
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS comment_reactions (
                    comment_id BIGINT NOT NULL REFERENCES comments(comment_id) ON DELETE CASCADE,
                    user_id BIGINT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    is_like BOOLEAN NOT NULL,
                    PRIMARY KEY (comment_id, user_id)
                )",
            )
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS chats (
                    chat_id BIGSERIAL PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    member_a BIGINT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    member_b BIGINT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE
                )",
            )
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "CREATE TABLE IF NOT EXISTS chat_messages (
                    message_id BIGSERIAL PRIMARY KEY,
                    chat_id BIGINT NOT NULL REFERENCES chats(chat_id) ON DELETE CASCADE,
                    author_id BIGINT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                    content TEXT NOT NULL,
                    created_at_unix BIGINT NOT NULL
                )",
            )
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "CREATE INDEX IF NOT EXISTS idx_chat_messages_chat_message
                    ON chat_messages(chat_id, message_id DESC)",
            )
            .execute(&mut *tx)
            .await?;

            for name in DEFAULT_CATEGORY_NAMES {
                sqlx::query("INSERT INTO categories (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
                    .bind(name)
                    .execute(&mut *tx)
                    .await?;
            }

            tx.commit().await?;
            Ok::<(), sqlx::Error>(())
        })
        .await
        .map_err(StoreError::from)?;
    Ok(())
}
