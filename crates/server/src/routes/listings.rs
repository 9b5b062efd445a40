use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    db::models::Listing,
    error::{AppError, Result},
    middleware::auth::{caller_of, AuthUser},
    services::{
        lifecycle::{days_remaining, CascadeReport, LifecycleState, SweepReport},
        listings::{ListingDraft, ListingFilter},
        require_caller,
    },
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_listings).post(create_listing))
        .route(
            "/:id",
            get(get_listing).put(update_listing).delete(delete_listing),
        )
        .route("/:id/extend", post(extend_listing))
        .route(
            "/:id/favourite",
            put(add_favourite).delete(remove_favourite),
        )
}

pub fn favourites_router() -> Router<AppState> {
    Router::new().route("/", get(list_favourites))
}

pub fn sweep_router() -> Router<AppState> {
    Router::new().route("/", post(run_sweep))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingResponse {
    #[serde(flatten)]
    pub listing: Listing,
    pub short_address: String,
    pub lifecycle: LifecycleState,
    pub days_remaining: i64,
}

#[derive(Debug, Serialize)]
pub struct ListingListResponse {
    pub listings: Vec<ListingResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendResponse {
    pub expires_at: DateTime<Utc>,
}

fn view(state: &AppState, listing: Listing) -> ListingResponse {
    let now = state.clock.now();
    ListingResponse {
        short_address: listing.short_address(),
        lifecycle: state.lifecycle.state_of(listing.expires_at),
        days_remaining: days_remaining(listing.expires_at, now),
        listing,
    }
}

fn view_all(state: &AppState, listings: Vec<Listing>) -> ListingListResponse {
    ListingListResponse {
        listings: listings.into_iter().map(|l| view(state, l)).collect(),
    }
}

async fn list_listings(
    State(state): State<AppState>,
    Query(filter): Query<ListingFilter>,
) -> Result<Json<ListingListResponse>> {
    let listings = state.listings.list(&filter).await?;
    Ok(Json(view_all(&state, listings)))
}

async fn create_listing(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Json(body): Json<ListingDraft>,
) -> Result<Json<ListingResponse>> {
    let listing = state
        .listings
        .create(caller_of(&user).as_ref(), body)
        .await?;
    Ok(Json(view(&state, listing)))
}

async fn get_listing(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ListingResponse>> {
    let listing = state.listings.get(&id).await?;
    Ok(Json(view(&state, listing)))
}

async fn update_listing(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Path(id): Path<String>,
    Json(body): Json<ListingDraft>,
) -> Result<Json<ListingResponse>> {
    let listing = state
        .listings
        .update(caller_of(&user).as_ref(), &id, body)
        .await?;
    Ok(Json(view(&state, listing)))
}

async fn delete_listing(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<CascadeReport>> {
    let report = state
        .lifecycle
        .delete_listing(caller_of(&user).as_ref(), &id)
        .await?;
    Ok(Json(report))
}

async fn extend_listing(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<ExtendResponse>> {
    let expires_at = state
        .lifecycle
        .extend_expiry(caller_of(&user).as_ref(), &id)
        .await?;
    Ok(Json(ExtendResponse { expires_at }))
}

async fn add_favourite(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<()>> {
    state
        .listings
        .add_favourite(caller_of(&user).as_ref(), &id)
        .await?;
    Ok(Json(()))
}

async fn remove_favourite(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<()>> {
    state
        .listings
        .remove_favourite(caller_of(&user).as_ref(), &id)
        .await?;
    Ok(Json(()))
}

async fn list_favourites(
    State(state): State<AppState>,
    user: Option<AuthUser>,
) -> Result<Json<ListingListResponse>> {
    let listings = state.listings.favourites(caller_of(&user).as_ref()).await?;
    Ok(Json(view_all(&state, listings)))
}

async fn run_sweep(
    State(state): State<AppState>,
    user: Option<AuthUser>,
) -> Result<Json<SweepReport>> {
    let caller = caller_of(&user);
    if !require_caller(caller.as_ref())?.is_admin() {
        return Err(AppError::Forbidden(
            "Only admins can run the expiry sweep".to_string(),
        ));
    }
    Ok(Json(state.lifecycle.sweep_expired().await?))
}
