use std::collections::HashMap;

use agora_core::UserStub;
use sqlx::Row;

use super::next_id;
use crate::server::{
    core::{AppState, CategoryRecord, CommentRecord, PostRecord},
    db::ready_pool,
    errors::StoreError,
    types::{CategoryPayload, CommentPayload, PostPayload},
};

pub(crate) async fn find_category(
    state: &AppState,
    category_id: i64,
) -> Result<CategoryRecord, StoreError> {
    if let Some(pool) = ready_pool(state).await? {
        let row = sqlx::query("SELECT category_id, name FROM categories WHERE category_id = $1")
            .bind(category_id)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::from)?
            .ok_or(StoreError::NotFound)?;
        return Ok(CategoryRecord {
            id: row.try_get("category_id").map_err(StoreError::from)?,
            name: row.try_get("name").map_err(StoreError::from)?,
        });
    }

    let categories = state.categories.read().await;
    categories
        .get(&category_id)
        .cloned()
        .ok_or(StoreError::NotFound)
}

pub(crate) async fn insert_post(
    state: &AppState,
    theme: &str,
    content: &str,
    author_id: i64,
    created_at_unix: i64,
    category_ids: &[i64],
) -> Result<i64, StoreError> {
    if let Some(pool) = ready_pool(state).await? {
        let mut tx = pool.begin().await.map_err(StoreError::from)?;
        let row = sqlx::query(
            "INSERT INTO posts (theme, content, author_id, created_at_unix)
             VALUES ($1, $2, $3, $4)
             RETURNING post_id",
        )
        .bind(theme)
        .bind(content)
        .bind(author_id)
        .bind(created_at_unix)
        .fetch_one(&mut *tx)
        .await
        .map_err(StoreError::from)?;
        let post_id: i64 = row.try_get("post_id").map_err(StoreError::from)?;
        for category_id in category_ids {
            sqlx::query(
                "INSERT INTO post_categories (post_id, category_id) VALUES ($1, $2)
                 ON CONFLICT DO NOTHING",
            )
            .bind(post_id)
            .bind(category_id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;
        }
        tx.commit().await.map_err(StoreError::from)?;
        return Ok(post_id);
    }

    let id = next_id(&state.post_seq);
    let mut posts = state.posts.write().await;
    posts.insert(
        id,
        PostRecord {
            id,
            theme: theme.to_owned(),
            content: content.to_owned(),
            author_id,
            created_at_unix,
            category_ids: category_ids.to_vec(),
        },
    );
    Ok(id)
}

pub(crate) async fn insert_comment(
    state: &AppState,
    post_id: i64,
    author_id: i64,
    content: &str,
    created_at_unix: i64,
) -> Result<i64, StoreError> {
    if let Some(pool) = ready_pool(state).await? {
        let exists = sqlx::query("SELECT 1 FROM posts WHERE post_id = $1")
            .bind(post_id)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::from)?;
        if exists.is_none() {
            return Err(StoreError::NotFound);
        }
        let row = sqlx::query(
            "INSERT INTO comments (post_id, author_id, content, created_at_unix)
             VALUES ($1, $2, $3, $4)
             RETURNING comment_id",
        )
        .bind(post_id)
        .bind(author_id)
        .bind(content)
        .bind(created_at_unix)
        .fetch_one(pool)
        .await
        .map_err(StoreError::from)?;
        return row.try_get("comment_id").map_err(StoreError::from);
    }

    if !state.posts.read().await.contains_key(&post_id) {
        return Err(StoreError::NotFound);
    }
    let id = next_id(&state.comment_seq);
    let mut comments = state.comments.write().await;
    comments.insert(
        id,
        CommentRecord {
            id,
            post_id,
            author_id,
            content: content.to_owned(),
            created_at_unix,
        },
    );
    Ok(id)
}

/// Page of posts with id strictly below `before_post_id` (0 means
/// newest), newest first, annotated with reaction counts and the
/// viewer's own reaction. Content is full length; callers preview it.
pub(crate) async fn page_posts(
    state: &AppState,
    before_post_id: i64,
    page_size: usize,
    viewer_id: i64,
) -> Result<Vec<PostPayload>, StoreError> {
    let limit = i64::try_from(page_size).unwrap_or(i64::MAX);
    if let Some(pool) = ready_pool(state).await? {
        let rows = sqlx::query(
            "SELECT p.post_id, p.theme, p.content, p.created_at_unix, u.user_id, u.name,
                (SELECT COUNT(*) FROM post_reactions r WHERE r.post_id = p.post_id AND r.is_like) AS likes,
                (SELECT COUNT(*) FROM post_reactions r WHERE r.post_id = p.post_id AND NOT r.is_like) AS dislikes,
                (SELECT r.is_like FROM post_reactions r WHERE r.post_id = p.post_id AND r.user_id = $2) AS viewer_reaction
             FROM posts p
             JOIN users u ON u.user_id = p.author_id
             WHERE $1 <= 0 OR p.post_id < $1
             ORDER BY p.post_id DESC
             LIMIT $3",
        )
        .bind(before_post_id)
        .bind(viewer_id)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(StoreError::from)?;

        let mut page = Vec::with_capacity(rows.len());
        for row in rows {
            page.push(post_from_row(&row)?);
        }
        let post_ids: Vec<i64> = page.iter().map(|post| post.id).collect();
        let category_map = categories_for_posts(pool, &post_ids).await?;
        for post in &mut page {
            post.categories = category_map.get(&post.id).cloned().unwrap_or_default();
        }
        return Ok(page);
    }

    let mut records: Vec<PostRecord> = {
        let posts = state.posts.read().await;
        posts
            .values()
            .filter(|post| before_post_id <= 0 || post.id < before_post_id)
            .cloned()
            .collect()
    };
    records.sort_by(|a, b| b.id.cmp(&a.id));
    records.truncate(page_size);

    let mut page = Vec::with_capacity(records.len());
    for record in records {
        page.push(post_payload_in_memory(state, &record, viewer_id).await?);
    }
    Ok(page)
}

pub(crate) async fn find_post(
    state: &AppState,
    post_id: i64,
    viewer_id: i64,
) -> Result<PostPayload, StoreError> {
    if let Some(pool) = ready_pool(state).await? {
        let row = sqlx::query(
            "SELECT p.post_id, p.theme, p.content, p.created_at_unix, u.user_id, u.name,
                (SELECT COUNT(*) FROM post_reactions r WHERE r.post_id = p.post_id AND r.is_like) AS likes,
                (SELECT COUNT(*) FROM post_reactions r WHERE r.post_id = p.post_id AND NOT r.is_like) AS dislikes,
                (SELECT r.is_like FROM post_reactions r WHERE r.post_id = p.post_id AND r.user_id = $2) AS viewer_reaction
             FROM posts p
             JOIN users u ON u.user_id = p.author_id
             WHERE p.post_id = $1",
        )
        .bind(post_id)
        .bind(viewer_id)
        .fetch_optional(pool)
        .await
        .map_err(StoreError::from)?
        .ok_or(StoreError::NotFound)?;
        let mut post = post_from_row(&row)?;
        let category_map = categories_for_posts(pool, &[post.id]).await?;
        post.categories = category_map.get(&post.id).cloned().unwrap_or_default();
        return Ok(post);
    }

    let record = {
        let posts = state.posts.read().await;
        posts.get(&post_id).cloned().ok_or(StoreError::NotFound)?
    };
    post_payload_in_memory(state, &record, viewer_id).await
}

/// All comments of one post in creation order, annotated like posts.
pub(crate) async fn list_comments(
    state: &AppState,
    post_id: i64,
    viewer_id: i64,
) -> Result<Vec<CommentPayload>, StoreError> {
    if let Some(pool) = ready_pool(state).await? {
        let rows = sqlx::query(
            "SELECT c.comment_id, c.post_id, c.content, c.created_at_unix, u.user_id, u.name,
                (SELECT COUNT(*) FROM comment_reactions r WHERE r.comment_id = c.comment_id AND r.is_like) AS likes,
                (SELECT COUNT(*) FROM comment_reactions r WHERE r.comment_id = c.comment_id AND NOT r.is_like) AS dislikes,
                (SELECT r.is_like FROM comment_reactions r WHERE r.comment_id = c.comment_id AND r.user_id = $2) AS viewer_reaction
             FROM comments c
             JOIN users u ON u.user_id = c.author_id
             WHERE c.post_id = $1
             ORDER BY c.comment_id",
        )
        .bind(post_id)
        .bind(viewer_id)
        .fetch_all(pool)
        .await
        .map_err(StoreError::from)?;
        let mut comments = Vec::with_capacity(rows.len());
        for row in rows {
            comments.push(CommentPayload {
                id: row.try_get("comment_id").map_err(StoreError::from)?,
                post_id: row.try_get("post_id").map_err(StoreError::from)?,
                content: row.try_get("content").map_err(StoreError::from)?,
                author: UserStub {
                    id: row.try_get("user_id").map_err(StoreError::from)?,
                    name: row.try_get("name").map_err(StoreError::from)?,
                },
                created_at_unix: row.try_get("created_at_unix").map_err(StoreError::from)?,
                likes: row.try_get("likes").map_err(StoreError::from)?,
                dislikes: row.try_get("dislikes").map_err(StoreError::from)?,
                viewer_reaction: row
                    .try_get::<Option<bool>, _>("viewer_reaction")
                    .map_err(StoreError::from)?,
            });
        }
        return Ok(comments);
    }

    let mut records: Vec<CommentRecord> = {
        let comments = state.comments.read().await;
        comments
            .values()
            .filter(|comment| comment.post_id == post_id)
            .cloned()
            .collect()
    };
    records.sort_by(|a, b| a.id.cmp(&b.id));

    let users = state.users.read().await;
    let reactions = state.comment_reactions.read().await;
    let mut comments = Vec::with_capacity(records.len());
    for record in records {
        let author = users
            .get(&record.author_id)
            .map(|user| UserStub {
                id: user.id,
                name: user.name.clone(),
            })
            .ok_or(StoreError::NotFound)?;
        let by_user = reactions.get(&record.id);
        let likes = by_user.map_or(0, |m| m.values().filter(|liked| **liked).count()) as i64;
        let dislikes = by_user.map_or(0, |m| m.values().filter(|liked| !**liked).count()) as i64;
        let viewer_reaction = by_user.and_then(|m| m.get(&viewer_id)).copied();
        comments.push(CommentPayload {
            id: record.id,
            post_id: record.post_id,
            content: record.content,
            author,
            created_at_unix: record.created_at_unix,
            likes,
            dislikes,
            viewer_reaction,
        });
    }
    Ok(comments)
}

fn post_from_row(row: &sqlx::postgres::PgRow) -> Result<PostPayload, StoreError> {
    Ok(PostPayload {
        id: row.try_get("post_id").map_err(StoreError::from)?,
        theme: row.try_get("theme").map_err(StoreError::from)?,
        content: row.try_get("content").map_err(StoreError::from)?,
        author: UserStub {
            id: row.try_get("user_id").map_err(StoreError::from)?,
            name: row.try_get("name").map_err(StoreError::from)?,
        },
        created_at_unix: row.try_get("created_at_unix").map_err(StoreError::from)?,
        categories: Vec::new(),
        likes: row.try_get("likes").map_err(StoreError::from)?,
        dislikes: row.try_get("dislikes").map_err(StoreError::from)?,
        viewer_reaction: row
            .try_get::<Option<bool>, _>("viewer_reaction")
            .map_err(StoreError::from)?,
        comments: Vec::new(),
    })
}

async fn categories_for_posts(
    pool: &sqlx::PgPool,
    post_ids: &[i64],
) -> Result<HashMap<i64, Vec<CategoryPayload>>, StoreError> {
    if post_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = sqlx::query(
        "SELECT pc.post_id, c.category_id, c.name
         FROM post_categories pc
         JOIN categories c ON c.category_id = pc.category_id
         WHERE pc.post_id = ANY($1)
         ORDER BY c.category_id",
    )
    .bind(post_ids)
    .fetch_all(pool)
    .await
    .map_err(StoreError::from)?;
    let mut map: HashMap<i64, Vec<CategoryPayload>> = HashMap::new();
    for row in rows {
        let post_id: i64 = row.try_get("post_id").map_err(StoreError::from)?;
        map.entry(post_id).or_default().push(CategoryPayload {
            id: row.try_get("category_id").map_err(StoreError::from)?,
            name: row.try_get("name").map_err(StoreError::from)?,
        });
    }
    Ok(map)
}

async fn post_payload_in_memory(
    state: &AppState,
    record: &PostRecord,
    viewer_id: i64,
) -> Result<PostPayload, StoreError> {
    let author = {
        let users = state.users.read().await;
        users
            .get(&record.author_id)
            .map(|user| UserStub {
                id: user.id,
                name: user.name.clone(),
            })
            .ok_or(StoreError::NotFound)?
    };
    let categories = {
        let categories = state.categories.read().await;
        let mut resolved: Vec<CategoryPayload> = record
            .category_ids
            .iter()
            .filter_map(|id| categories.get(id))
            .map(|category| CategoryPayload {
                id: category.id,
                name: category.name.clone(),
            })
            .collect();
        resolved.sort_by_key(|category| category.id);
        resolved
    };
    let reactions = state.post_reactions.read().await;
    let by_user = reactions.get(&record.id);
    let likes = by_user.map_or(0, |m| m.values().filter(|liked| **liked).count()) as i64;
    let dislikes = by_user.map_or(0, |m| m.values().filter(|liked| !**liked).count()) as i64;
    let viewer_reaction = by_user.and_then(|m| m.get(&viewer_id)).copied();
    Ok(PostPayload {
        id: record.id,
        theme: record.theme.clone(),
        content: record.content.clone(),
        author,
        created_at_unix: record.created_at_unix,
        categories,
        likes,
        dislikes,
        viewer_reaction,
        comments: Vec::new(),
    })
}
