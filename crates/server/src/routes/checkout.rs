use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::{
    error::Result,
    services::checkout::{CheckoutMarkers, CheckoutRequest},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_checkout_session))
        .route("/markers", get(markers))
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub url: String,
}

async fn create_checkout_session(
    State(state): State<AppState>,
    Json(body): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>> {
    let line = body.validate()?;
    let url = state.checkout.create_session(&line).await?;
    tracing::info!(amount = line.amount_minor, currency = line.currency, "checkout session created");
    Ok(Json(CheckoutResponse { url }))
}

async fn markers(State(state): State<AppState>) -> Json<CheckoutMarkers> {
    Json(state.checkout.markers())
}
