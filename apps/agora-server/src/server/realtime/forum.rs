use agora_core::{content_preview, is_blank, validate_content_date, UserStub};
use anyhow::anyhow;
use serde_json::Value;

use crate::server::{
    core::{AppState, POSTS_PAGE_SIZE, POST_PREVIEW_CHARS},
    errors::{HandlerError, StoreError},
    store::{posts, reactions},
    types::{NewCommentDto, NewPostDto, PostPayload, ReactionDto, ReactionTargetKind},
};

use super::{connection::ConnectionSeat, reply};

/// Page of posts with id below the cursor, previewed for the listing.
pub(crate) async fn posts_portion(
    state: &AppState,
    seat: &mut ConnectionSeat,
    payload: &Value,
) -> Result<Value, HandlerError> {
    let before_post_id: i64 = serde_json::from_value(payload.clone()).map_err(|error| {
        reply::server_error(&seat.outbox, "invalid payload for the portion of posts", error)
    })?;
    let viewer = seat_user(seat)?;
    let page = load_posts_page(state, seat, before_post_id, viewer.id).await?;
    to_reply_value(page)
}

/// One post with its full content and all comments.
pub(crate) async fn full_post_and_comments(
    state: &AppState,
    seat: &mut ConnectionSeat,
    payload: &Value,
) -> Result<Value, HandlerError> {
    let request_type = agora_protocol::FULL_POST_AND_COMMENTS_REQUEST;
    let post_id: i64 = serde_json::from_value(payload.clone()).map_err(|error| {
        reply::server_error(&seat.outbox, "invalid payload for a post id", error)
    })?;
    let viewer = seat_user(seat)?;
    let post = load_full_post(state, seat, request_type, post_id, viewer.id).await?;
    to_reply_value(post)
}

/// Creates a post after validating the submitted form and the category
/// references, then replies with the refreshed first page.
pub(crate) async fn new_post(
    state: &AppState,
    seat: &mut ConnectionSeat,
    payload: &Value,
) -> Result<Value, HandlerError> {
    let request_type = agora_protocol::NEW_POST_REQUEST;
    let post: NewPostDto = serde_json::from_value(payload.clone()).map_err(|error| {
        reply::server_error(&seat.outbox, "invalid payload for a new post", error)
    })?;

    if is_blank(&post.theme) {
        return Err(reply::warn_reply(&seat.outbox, request_type, "Post's theme missing"));
    }
    if is_blank(&post.content) {
        return Err(reply::warn_reply(&seat.outbox, request_type, "Post's text missing"));
    }
    if post.categories_id.is_empty() {
        return Err(reply::warn_reply(
            &seat.outbox,
            request_type,
            "Choose at least one category",
        ));
    }
    if validate_content_date(post.date_unix).is_err() {
        return Err(reply::warn_reply(&seat.outbox, request_type, "Date is too old"));
    }
    for category_id in &post.categories_id {
        match posts::find_category(state, *category_id).await {
            Ok(_) => {}
            Err(StoreError::NotFound) => {
                return Err(reply::warn_reply(
                    &seat.outbox,
                    request_type,
                    format!("no category with id '{category_id}'"),
                ));
            }
            Err(error) => {
                return Err(reply::server_error(
                    &seat.outbox,
                    "get a category from the store failed",
                    error,
                ));
            }
        }
    }

    let author = seat_user(seat)?;
    let post_id = posts::insert_post(
        state,
        post.theme.trim(),
        &post.content,
        author.id,
        post.date_unix,
        &post.categories_id,
    )
    .await
    .map_err(|error| {
        reply::server_error(&seat.outbox, "insert a new post to the store failed", error)
    })?;
    tracing::info!(event = "forum.post.created", post_id, author_id = author.id);

    let page = load_posts_page(state, seat, 0, author.id).await?;
    to_reply_value(page)
}

/// Appends a comment to an existing post and replies with the refreshed
/// full post.
pub(crate) async fn new_comment(
    state: &AppState,
    seat: &mut ConnectionSeat,
    payload: &Value,
) -> Result<Value, HandlerError> {
    let request_type = agora_protocol::NEW_COMMENT_REQUEST;
    let comment: NewCommentDto = serde_json::from_value(payload.clone()).map_err(|error| {
        reply::server_error(&seat.outbox, "invalid payload for a new comment", error)
    })?;

    if is_blank(&comment.content) {
        return Err(reply::warn_reply(
            &seat.outbox,
            request_type,
            "Comment's text missing",
        ));
    }
    if comment.post_id <= 0 {
        return Err(reply::warn_reply(&seat.outbox, request_type, "invalid post's ID"));
    }
    if validate_content_date(comment.date_unix).is_err() {
        return Err(reply::warn_reply(&seat.outbox, request_type, "Date is too old"));
    }

    let author = seat_user(seat)?;
    match posts::insert_comment(
        state,
        comment.post_id,
        author.id,
        &comment.content,
        comment.date_unix,
    )
    .await
    {
        Ok(comment_id) => {
            tracing::info!(event = "forum.comment.created", comment_id, post_id = comment.post_id);
        }
        Err(StoreError::NotFound) => {
            return Err(reply::warn_reply(
                &seat.outbox,
                request_type,
                format!("cannot find a post with id '{}'", comment.post_id),
            ));
        }
        Err(error) => {
            return Err(reply::server_error(
                &seat.outbox,
                "insert a new comment to the store failed",
                error,
            ));
        }
    }

    let post = load_full_post(state, seat, request_type, comment.post_id, author.id).await?;
    to_reply_value(post)
}

/// Applies a like/dislike. Post and comment targets are genuinely
/// distinct paths against distinct reaction stores.
pub(crate) async fn reaction(
    state: &AppState,
    seat: &mut ConnectionSeat,
    payload: &Value,
) -> Result<Value, HandlerError> {
    let request_type = agora_protocol::REACTION_REQUEST;
    let reaction: ReactionDto = serde_json::from_value(payload.clone()).map_err(|error| {
        reply::server_error(&seat.outbox, "invalid payload for a reaction", error)
    })?;
    if reaction.target_id <= 0 {
        return Err(reply::warn_reply(&seat.outbox, request_type, "invalid target id"));
    }

    let viewer = seat_user(seat)?;
    let counts = match reaction.target {
        ReactionTargetKind::Post => {
            reactions::set_post_reaction(state, reaction.target_id, viewer.id, reaction.is_like)
                .await
        }
        ReactionTargetKind::Comment => {
            reactions::set_comment_reaction(state, reaction.target_id, viewer.id, reaction.is_like)
                .await
        }
    };
    match counts {
        Ok(counts) => to_reply_value(counts),
        Err(StoreError::NotFound) => Err(reply::warn_reply(
            &seat.outbox,
            request_type,
            match reaction.target {
                ReactionTargetKind::Post => {
                    format!("cannot find a post with id '{}'", reaction.target_id)
                }
                ReactionTargetKind::Comment => {
                    format!("cannot find a comment with id '{}'", reaction.target_id)
                }
            },
        )),
        Err(error) => Err(reply::server_error(
            &seat.outbox,
            "store error during reaction handling",
            error,
        )),
    }
}

async fn load_posts_page(
    state: &AppState,
    seat: &ConnectionSeat,
    before_post_id: i64,
    viewer_id: i64,
) -> Result<Vec<PostPayload>, HandlerError> {
    let mut page = posts::page_posts(state, before_post_id, POSTS_PAGE_SIZE, viewer_id)
        .await
        .map_err(|error| {
            reply::server_error(&seat.outbox, "get the posts from the store failed", error)
        })?;
    for post in &mut page {
        post.content = content_preview(&post.content, POST_PREVIEW_CHARS);
    }
    Ok(page)
}

async fn load_full_post(
    state: &AppState,
    seat: &ConnectionSeat,
    request_type: &str,
    post_id: i64,
    viewer_id: i64,
) -> Result<PostPayload, HandlerError> {
    let mut post = match posts::find_post(state, post_id, viewer_id).await {
        Ok(post) => post,
        Err(StoreError::NotFound) => {
            return Err(reply::warn_reply(
                &seat.outbox,
                request_type,
                format!("cannot find a post with id '{post_id}'"),
            ));
        }
        Err(error) => {
            return Err(reply::server_error(
                &seat.outbox,
                "get the post from the store failed",
                error,
            ));
        }
    };
    post.comments = posts::list_comments(state, post_id, viewer_id)
        .await
        .map_err(|error| {
            reply::server_error(&seat.outbox, "get the comments from the store failed", error)
        })?;
    Ok(post)
}

fn seat_user(seat: &ConnectionSeat) -> Result<UserStub, HandlerError> {
    seat.session
        .user_stub()
        .ok_or_else(|| HandlerError::Fatal(anyhow!("authenticated handler without a session user")))
}

fn to_reply_value<T: serde::Serialize>(payload: T) -> Result<Value, HandlerError> {
    serde_json::to_value(payload).map_err(|error| HandlerError::Fatal(error.into()))
}
