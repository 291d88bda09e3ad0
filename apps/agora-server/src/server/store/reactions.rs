use sqlx::Row;

use crate::server::{
    core::{AppState, ReactionCounts},
    db::ready_pool,
    errors::StoreError,
};

/// Applies a like/dislike to a post. Repeating the current reaction
/// removes it; the opposite reaction replaces it. Returns the new
/// counts.
pub(crate) async fn set_post_reaction(
    state: &AppState,
    post_id: i64,
    user_id: i64,
    is_like: bool,
) -> Result<ReactionCounts, StoreError> {
    if let Some(pool) = ready_pool(state).await? {
        let exists = sqlx::query("SELECT 1 FROM posts WHERE post_id = $1")
            .bind(post_id)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::from)?;
        if exists.is_none() {
            return Err(StoreError::NotFound);
        }

        let current = sqlx::query(
            "SELECT is_like FROM post_reactions WHERE post_id = $1 AND user_id = $2",
        )
        .bind(post_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(StoreError::from)?;
        let current: Option<bool> = match current {
            Some(row) => Some(row.try_get("is_like").map_err(StoreError::from)?),
            None => None,
        };

        if current == Some(is_like) {
            sqlx::query("DELETE FROM post_reactions WHERE post_id = $1 AND user_id = $2")
                .bind(post_id)
                .bind(user_id)
                .execute(pool)
                .await
                .map_err(StoreError::from)?;
        } else {
            sqlx::query(
                "INSERT INTO post_reactions (post_id, user_id, is_like) VALUES ($1, $2, $3)
                 ON CONFLICT (post_id, user_id) DO UPDATE SET is_like = EXCLUDED.is_like",
            )
            .bind(post_id)
            .bind(user_id)
            .bind(is_like)
            .execute(pool)
            .await
            .map_err(StoreError::from)?;
        }

        let row = sqlx::query(
            "SELECT COUNT(*) FILTER (WHERE is_like) AS likes,
                    COUNT(*) FILTER (WHERE NOT is_like) AS dislikes
             FROM post_reactions WHERE post_id = $1",
        )
        .bind(post_id)
        .fetch_one(pool)
        .await
        .map_err(StoreError::from)?;
        return Ok(ReactionCounts {
            likes: row.try_get("likes").map_err(StoreError::from)?,
            dislikes: row.try_get("dislikes").map_err(StoreError::from)?,
        });
    }

    if !state.posts.read().await.contains_key(&post_id) {
        return Err(StoreError::NotFound);
    }
    let mut reactions = state.post_reactions.write().await;
    let by_user = reactions.entry(post_id).or_default();
    if by_user.get(&user_id) == Some(&is_like) {
        by_user.remove(&user_id);
    } else {
        by_user.insert(user_id, is_like);
    }
    let likes = by_user.values().filter(|liked| **liked).count() as i64;
    let dislikes = by_user.values().filter(|liked| !**liked).count() as i64;
    Ok(ReactionCounts { likes, dislikes })
}

/// Comment counterpart of [`set_post_reaction`]; a separate path against
/// the comment tables, not a retargeted copy of the post one.
pub(crate) async fn set_comment_reaction(
    state: &AppState,
    comment_id: i64,
    user_id: i64,
    is_like: bool,
) -> Result<ReactionCounts, StoreError> {
    if let Some(pool) = ready_pool(state).await? {
        let exists = sqlx::query("SELECT 1 FROM comments WHERE comment_id = $1")
            .bind(comment_id)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::from)?;
        if exists.is_none() {
            return Err(StoreError::NotFound);
        }

        let current = sqlx::query(
            "SELECT is_like FROM comment_reactions WHERE comment_id = $1 AND user_id = $2",
        )
        .bind(comment_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(StoreError::from)?;
        let current: Option<bool> = match current {
            Some(row) => Some(row.try_get("is_like").map_err(StoreError::from)?),
            None => None,
        };

        if current == Some(is_like) {
            sqlx::query("DELETE FROM comment_reactions WHERE comment_id = $1 AND user_id = $2")
                .bind(comment_id)
                .bind(user_id)
                .execute(pool)
                .await
                .map_err(StoreError::from)?;
        } else {
            sqlx::query(
                "INSERT INTO comment_reactions (comment_id, user_id, is_like) VALUES ($1, $2, $3)
                 ON CONFLICT (comment_id, user_id) DO UPDATE SET is_like = EXCLUDED.is_like",
            )
            .bind(comment_id)
            .bind(user_id)
            .bind(is_like)
            .execute(pool)
            .await
            .map_err(StoreError::from)?;
        }

        let row = sqlx::query(
            "SELECT COUNT(*) FILTER (WHERE is_like) AS likes,
                    COUNT(*) FILTER (WHERE NOT is_like) AS dislikes
             FROM comment_reactions WHERE comment_id = $1",
        )
        .bind(comment_id)
        .fetch_one(pool)
        .await
        .map_err(StoreError::from)?;
        return Ok(ReactionCounts {
            likes: row.try_get("likes").map_err(StoreError::from)?,
            dislikes: row.try_get("dislikes").map_err(StoreError::from)?,
        });
    }

    if !state.comments.read().await.contains_key(&comment_id) {
        return Err(StoreError::NotFound);
    }
    let mut reactions = state.comment_reactions.write().await;
    let by_user = reactions.entry(comment_id).or_default();
    if by_user.get(&user_id) == Some(&is_like) {
        by_user.remove(&user_id);
    } else {
        by_user.insert(user_id, is_like);
    }
    let likes = by_user.values().filter(|liked| **liked).count() as i64;
    let dislikes = by_user.values().filter(|liked| !**liked).count() as i64;
    Ok(ReactionCounts { likes, dislikes })
}

#[cfg(test)]
mod tests {
    use crate::server::{
        auth::now_unix,
        core::{AppConfig, AppState, ReactionCounts},
        errors::StoreError,
        store::{
            posts::{insert_comment, insert_post},
            users::{add_user, tests::new_user},
        },
    };

    use super::{set_comment_reaction, set_post_reaction};

    #[tokio::test]
    async fn post_reaction_toggles_and_switches() {
        let state = AppState::new(&AppConfig::default()).unwrap();
        let ada = add_user(&state, new_user("ada")).await.unwrap();
        let post_id = insert_post(&state, "t", "body", ada.id, now_unix(), &[1])
            .await
            .unwrap();

        let liked = set_post_reaction(&state, post_id, ada.id, true).await.unwrap();
        assert_eq!(liked, ReactionCounts { likes: 1, dislikes: 0 });

        let switched = set_post_reaction(&state, post_id, ada.id, false).await.unwrap();
        assert_eq!(switched, ReactionCounts { likes: 0, dislikes: 1 });

        let removed = set_post_reaction(&state, post_id, ada.id, false).await.unwrap();
        assert_eq!(removed, ReactionCounts { likes: 0, dislikes: 0 });
    }

    #[tokio::test]
    async fn comment_reactions_do_not_touch_post_counters() {
        let state = AppState::new(&AppConfig::default()).unwrap();
        let ada = add_user(&state, new_user("ada")).await.unwrap();
        let post_id = insert_post(&state, "t", "body", ada.id, now_unix(), &[1])
            .await
            .unwrap();
        let comment_id = insert_comment(&state, post_id, ada.id, "c", now_unix())
            .await
            .unwrap();

        let comment_counts = set_comment_reaction(&state, comment_id, ada.id, true)
            .await
            .unwrap();
        assert_eq!(comment_counts, ReactionCounts { likes: 1, dislikes: 0 });

        let post_counts = set_post_reaction(&state, post_id, ada.id, true).await.unwrap();
        assert_eq!(post_counts, ReactionCounts { likes: 1, dislikes: 0 });
    }

    #[tokio::test]
    async fn reacting_to_missing_targets_is_not_found() {
        let state = AppState::new(&AppConfig::default()).unwrap();
        let ada = add_user(&state, new_user("ada")).await.unwrap();
        assert!(matches!(
            set_post_reaction(&state, 42, ada.id, true).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            set_comment_reaction(&state, 42, ada.id, true).await,
            Err(StoreError::NotFound)
        ));
    }
}
