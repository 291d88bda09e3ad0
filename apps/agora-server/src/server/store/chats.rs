use agora_core::{chat_pair_name, UserStub};
use sqlx::Row;

use super::next_id;
use crate::server::{
    core::{AppState, ChatMessageRecord, ChatRecord},
    db::ready_pool,
    errors::StoreError,
    types::ChatMessagePayload,
};

/// Resolves the private chat for the unordered user pair, creating it on
/// first use. The pairing key is order-independent.
pub(crate) async fn find_or_create_private_chat(
    state: &AppState,
    user_a: i64,
    user_b: i64,
) -> Result<(ChatRecord, bool), StoreError> {
    let name = chat_pair_name(user_a, user_b);
    let member_a = user_a.min(user_b);
    let member_b = user_a.max(user_b);

    if let Some(pool) = ready_pool(state).await? {
        let existing = sqlx::query("SELECT chat_id FROM chats WHERE name = $1")
            .bind(&name)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::from)?;
        if let Some(row) = existing {
            let id: i64 = row.try_get("chat_id").map_err(StoreError::from)?;
            return Ok((
                ChatRecord {
                    id,
                    name,
                    member_a,
                    member_b,
                },
                false,
            ));
        }
        let row = sqlx::query(
            "INSERT INTO chats (name, member_a, member_b) VALUES ($1, $2, $3)
             ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
             RETURNING chat_id",
        )
        .bind(&name)
        .bind(member_a)
        .bind(member_b)
        .fetch_one(pool)
        .await
        .map_err(StoreError::from)?;
        let id: i64 = row.try_get("chat_id").map_err(StoreError::from)?;
        return Ok((
            ChatRecord {
                id,
                name,
                member_a,
                member_b,
            },
            true,
        ));
    }

    let mut chats = state.chats.write().await;
    if let Some(chat) = chats.values().find(|chat| chat.name == name) {
        return Ok((chat.clone(), false));
    }
    let id = next_id(&state.chat_seq);
    let record = ChatRecord {
        id,
        name,
        member_a,
        member_b,
    };
    chats.insert(id, record.clone());
    Ok((record, true))
}

pub(crate) async fn append_chat_message(
    state: &AppState,
    chat_id: i64,
    author_id: i64,
    content: &str,
    created_at_unix: i64,
) -> Result<i64, StoreError> {
    if let Some(pool) = ready_pool(state).await? {
        let row = sqlx::query(
            "INSERT INTO chat_messages (chat_id, author_id, content, created_at_unix)
             VALUES ($1, $2, $3, $4)
             RETURNING message_id",
        )
        .bind(chat_id)
        .bind(author_id)
        .bind(content)
        .bind(created_at_unix)
        .fetch_one(pool)
        .await
        .map_err(StoreError::from)?;
        return row.try_get("message_id").map_err(StoreError::from);
    }

    if !state.chats.read().await.contains_key(&chat_id) {
        return Err(StoreError::NotFound);
    }
    let id = next_id(&state.chat_message_seq);
    let mut messages = state.chat_messages.write().await;
    messages.insert(
        id,
        ChatMessageRecord {
            id,
            chat_id,
            author_id,
            content: content.to_owned(),
            created_at_unix,
        },
    );
    Ok(id)
}

/// Removes a persisted message again; the undo half of the
/// insert-then-verify-delivery protocol.
pub(crate) async fn delete_chat_message(state: &AppState, message_id: i64) -> Result<(), StoreError> {
    if let Some(pool) = ready_pool(state).await? {
        sqlx::query("DELETE FROM chat_messages WHERE message_id = $1")
            .bind(message_id)
            .execute(pool)
            .await
            .map_err(StoreError::from)?;
        return Ok(());
    }

    let mut messages = state.chat_messages.write().await;
    messages.remove(&message_id);
    Ok(())
}

/// Page of chat history strictly before `before_message_id` (0 means
/// newest), newest first, capped at `page_size`.
pub(crate) async fn page_chat_messages(
    state: &AppState,
    chat_id: i64,
    before_message_id: i64,
    page_size: usize,
) -> Result<Vec<ChatMessagePayload>, StoreError> {
    let limit = i64::try_from(page_size).unwrap_or(i64::MAX);
    if let Some(pool) = ready_pool(state).await? {
        let rows = sqlx::query(
            "SELECT m.message_id, m.content, m.created_at_unix, u.user_id, u.name
             FROM chat_messages m
             JOIN users u ON u.user_id = m.author_id
             WHERE m.chat_id = $1 AND ($2 <= 0 OR m.message_id < $2)
             ORDER BY m.message_id DESC
             LIMIT $3",
        )
        .bind(chat_id)
        .bind(before_message_id)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(StoreError::from)?;
        let mut page = Vec::with_capacity(rows.len());
        for row in rows {
            page.push(ChatMessagePayload {
                id: row.try_get("message_id").map_err(StoreError::from)?,
                content: row.try_get("content").map_err(StoreError::from)?,
                author: UserStub {
                    id: row.try_get("user_id").map_err(StoreError::from)?,
                    name: row.try_get("name").map_err(StoreError::from)?,
                },
                date_unix: row.try_get("created_at_unix").map_err(StoreError::from)?,
            });
        }
        return Ok(page);
    }

    let mut records: Vec<ChatMessageRecord> = {
        let messages = state.chat_messages.read().await;
        messages
            .values()
            .filter(|message| message.chat_id == chat_id)
            .filter(|message| before_message_id <= 0 || message.id < before_message_id)
            .cloned()
            .collect()
    };
    records.sort_by(|a, b| b.id.cmp(&a.id));
    records.truncate(page_size);

    let users = state.users.read().await;
    let mut page = Vec::with_capacity(records.len());
    for record in records {
        let author = users
            .get(&record.author_id)
            .map(|user| UserStub {
                id: user.id,
                name: user.name.clone(),
            })
            .ok_or(StoreError::NotFound)?;
        page.push(ChatMessagePayload {
            id: record.id,
            content: record.content,
            author,
            date_unix: record.created_at_unix,
        });
    }
    Ok(page)
}

/// Timestamp of the newest private message from one user to another, if
/// they have ever exchanged one.
pub(crate) async fn last_message_at(
    state: &AppState,
    from_user_id: i64,
    to_user_id: i64,
) -> Result<Option<i64>, StoreError> {
    let name = chat_pair_name(from_user_id, to_user_id);
    if let Some(pool) = ready_pool(state).await? {
        let row = sqlx::query(
            "SELECT MAX(m.created_at_unix) AS last_message_at_unix
             FROM chat_messages m
             JOIN chats c ON c.chat_id = m.chat_id
             WHERE c.name = $1 AND m.author_id = $2",
        )
        .bind(&name)
        .bind(from_user_id)
        .fetch_one(pool)
        .await
        .map_err(StoreError::from)?;
        return row
            .try_get::<Option<i64>, _>("last_message_at_unix")
            .map_err(StoreError::from);
    }

    let chat_id = {
        let chats = state.chats.read().await;
        chats.values().find(|chat| chat.name == name).map(|c| c.id)
    };
    let Some(chat_id) = chat_id else {
        return Ok(None);
    };
    let messages = state.chat_messages.read().await;
    Ok(messages
        .values()
        .filter(|message| message.chat_id == chat_id && message.author_id == from_user_id)
        .map(|message| message.created_at_unix)
        .max())
}

#[cfg(test)]
mod tests {
    use crate::server::{
        auth::now_unix,
        core::{AppConfig, AppState},
        store::users::{add_user, tests::new_user},
    };

    use super::{
        append_chat_message, delete_chat_message, find_or_create_private_chat, last_message_at,
        page_chat_messages,
    };

    #[tokio::test]
    async fn open_chat_pairing_is_idempotent_and_order_independent() {
        let state = AppState::new(&AppConfig::default()).unwrap();
        let ada = add_user(&state, new_user("ada")).await.unwrap();
        let brin = add_user(&state, new_user("brin")).await.unwrap();

        let (first, created_first) = find_or_create_private_chat(&state, ada.id, brin.id)
            .await
            .unwrap();
        let (second, created_second) = find_or_create_private_chat(&state, brin.id, ada.id)
            .await
            .unwrap();

        assert!(created_first);
        assert!(!created_second);
        assert_eq!(first.id, second.id);
        assert_eq!(first.name, second.name);
    }

    #[tokio::test]
    async fn paging_stays_strictly_below_the_cursor_and_descends() {
        let state = AppState::new(&AppConfig::default()).unwrap();
        let ada = add_user(&state, new_user("ada")).await.unwrap();
        let brin = add_user(&state, new_user("brin")).await.unwrap();
        let (chat, _) = find_or_create_private_chat(&state, ada.id, brin.id)
            .await
            .unwrap();

        let base = now_unix();
        let mut ids = Vec::new();
        for n in 0..25 {
            let id = append_chat_message(&state, chat.id, ada.id, &format!("m{n}"), base + n)
                .await
                .unwrap();
            ids.push(id);
        }

        let cursor = ids[20];
        let page = page_chat_messages(&state, chat.id, cursor, 10).await.unwrap();
        assert_eq!(page.len(), 10);
        assert!(page.iter().all(|message| message.id < cursor));
        assert!(page.windows(2).all(|pair| pair[0].id > pair[1].id));

        let newest = page_chat_messages(&state, chat.id, 0, 10).await.unwrap();
        assert_eq!(newest[0].id, *ids.last().unwrap());
    }

    #[tokio::test]
    async fn deleted_message_leaves_no_residue() {
        let state = AppState::new(&AppConfig::default()).unwrap();
        let ada = add_user(&state, new_user("ada")).await.unwrap();
        let brin = add_user(&state, new_user("brin")).await.unwrap();
        let (chat, _) = find_or_create_private_chat(&state, ada.id, brin.id)
            .await
            .unwrap();

        let id = append_chat_message(&state, chat.id, ada.id, "oops", now_unix())
            .await
            .unwrap();
        delete_chat_message(&state, id).await.unwrap();

        let page = page_chat_messages(&state, chat.id, 0, 10).await.unwrap();
        assert!(page.is_empty());
        assert_eq!(last_message_at(&state, ada.id, brin.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn last_message_at_is_directional() {
        let state = AppState::new(&AppConfig::default()).unwrap();
        let ada = add_user(&state, new_user("ada")).await.unwrap();
        let brin = add_user(&state, new_user("brin")).await.unwrap();
        let (chat, _) = find_or_create_private_chat(&state, ada.id, brin.id)
            .await
            .unwrap();

        let at = now_unix();
        append_chat_message(&state, chat.id, ada.id, "from ada", at)
            .await
            .unwrap();

        assert_eq!(last_message_at(&state, ada.id, brin.id).await.unwrap(), Some(at));
        assert_eq!(last_message_at(&state, brin.id, ada.id).await.unwrap(), None);
    }
}
