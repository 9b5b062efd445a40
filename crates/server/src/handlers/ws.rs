// WebSocket live feeds for listing ratings and comment threads

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};

use crate::{error::Result, services::LiveFeed, AppState};

pub async fn comments_ws(
    ws: WebSocketUpgrade,
    Path(listing_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Response> {
    let feed = state.comments.stream_comments(&listing_id).await?;
    Ok(ws.on_upgrade(move |socket| pump(socket, feed)))
}

pub async fn rating_ws(
    ws: WebSocketUpgrade,
    Path(listing_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Response> {
    let feed = state.ratings.subscribe(&listing_id).await?;
    Ok(ws.on_upgrade(move |socket| pump(socket, feed)))
}

/// Forwards every feed item to the socket as JSON until either side ends.
async fn pump<F: LiveFeed + 'static>(socket: WebSocket, mut feed: F) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            item = feed.next() => match item {
                Some(Ok(value)) => {
                    let text = match serde_json::to_string(&value) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to encode feed item");
                            break;
                        }
                    };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "live feed failed");
                    let body = serde_json::json!({ "error": e.code(), "message": e.to_string() });
                    let _ = sender.send(Message::Text(body.to_string())).await;
                    break;
                }
                // Listing was deleted
                None => break,
            },
            msg = receiver.next() => match msg {
                Some(Ok(Message::Ping(data))) => {
                    let _ = sender.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}
