use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    db::models::RatingAggregate,
    error::Result,
    middleware::auth::{caller_of, AuthUser},
    AppState,
};

/// Mounted under `/listings`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:id/rating", get(get_aggregate))
        .route("/:id/rating/me", get(get_my_rating).put(submit_rating))
}

#[derive(Debug, Deserialize)]
pub struct SubmitRatingRequest {
    pub stars: i64,
}

#[derive(Debug, Serialize)]
pub struct MyRatingResponse {
    pub stars: Option<u8>,
}

async fn get_aggregate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RatingAggregate>> {
    Ok(Json(state.ratings.aggregate(&id).await?))
}

async fn get_my_rating(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<MyRatingResponse>> {
    let stars = state
        .ratings
        .my_rating(caller_of(&user).as_ref(), &id)
        .await?;
    Ok(Json(MyRatingResponse {
        stars: stars.map(|s| s.get()),
    }))
}

async fn submit_rating(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<SubmitRatingRequest>,
) -> Result<Json<RatingAggregate>> {
    let aggregate = state
        .ratings
        .submit_rating(caller_of(&user).as_ref(), &id, body.stars)
        .await?;
    Ok(Json(aggregate))
}
