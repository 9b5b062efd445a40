use axum::{
    extract::{Multipart, State},
    routing::post,
    Json, Router,
};
use serde::Serialize;

use crate::{
    error::{AppError, Result},
    middleware::auth::AuthUser,
    services::media::MediaStore,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(upload_media))
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub uploaded: Vec<String>,
    pub errors: Vec<String>,
}

/// Stores each image part and returns the durable URLs to put on a listing.
async fn upload_media(
    State(state): State<AppState>,
    _user: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let mut uploaded = Vec::new();
    let mut errors = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read multipart field: {e}")))?
    {
        let label = field
            .file_name()
            .or(field.name())
            .unwrap_or("upload")
            .to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();

        let data = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                errors.push(format!("Failed to read file {label}: {e}"));
                continue;
            }
        };

        match state.media.upload(data.to_vec(), &content_type).await {
            Ok(url) => uploaded.push(url),
            Err(e) => errors.push(format!("{label}: {e}")),
        }
    }

    Ok(Json(UploadResponse { uploaded, errors }))
}
