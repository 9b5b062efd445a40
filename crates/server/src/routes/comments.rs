use axum::{
    extract::{Path, State},
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    db::models::Comment,
    error::Result,
    middleware::auth::{caller_of, AuthUser},
    AppState,
};

/// Thread routes, mounted under `/listings`.
pub fn listing_router() -> Router<AppState> {
    Router::new().route("/:id/comments", get(list_comments).post(create_comment))
}

/// Single-comment routes, mounted under `/comments`.
pub fn router() -> Router<AppState> {
    Router::new().route("/:id", put(edit_comment).delete(delete_comment))
}

#[derive(Debug, Deserialize)]
pub struct CommentTextRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct CommentsListResponse {
    pub comments: Vec<Comment>,
}

async fn list_comments(
    State(state): State<AppState>,
    Path(listing_id): Path<String>,
) -> Result<Json<CommentsListResponse>> {
    let comments = state.comments.list_comments(&listing_id).await?;
    Ok(Json(CommentsListResponse { comments }))
}

async fn create_comment(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Path(listing_id): Path<String>,
    Json(body): Json<CommentTextRequest>,
) -> Result<Json<Comment>> {
    let comment = state
        .comments
        .add_comment(caller_of(&user).as_ref(), &listing_id, &body.text)
        .await?;
    Ok(Json(comment))
}

async fn edit_comment(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<CommentTextRequest>,
) -> Result<Json<Comment>> {
    let comment = state
        .comments
        .edit_comment(caller_of(&user).as_ref(), &id, &body.text)
        .await?;
    Ok(Json(comment))
}

async fn delete_comment(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<()>> {
    state
        .comments
        .delete_comment(caller_of(&user).as_ref(), &id)
        .await?;
    Ok(Json(()))
}
