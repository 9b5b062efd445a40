use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{middleware as axum_middleware, routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod routes;
mod services;

use services::{
    checkout::StripeCheckout,
    clock::{Clock, SystemClock},
    comments::CommentStore,
    events::EventHub,
    lifecycle::ListingLifecycle,
    listings::ListingStore,
    media::{DiskMediaStore, MediaStore},
    ratings::RatingStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "artisthive_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::from_env();

    // Ensure media directory exists
    let media = DiskMediaStore::new(&config.media_path, format!("{}/media", config.public_url));
    media.init().await?;

    // Initialize database
    let db = db::Database::connect(&config.database_url).await?;
    db.run_migrations().await?;

    let state = AppState::new(db, config.clone(), Arc::new(media), Arc::new(SystemClock));

    if config.sweep_interval_secs > 0 {
        spawn_sweeper(
            state.lifecycle.clone(),
            Duration::from_secs(config.sweep_interval_secs),
        );
    }

    let app = app(state).nest_service("/media", ServeDir::new(&config.media_path));

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Builds the full router for a prepared state.
pub fn app(state: AppState) -> Router {
    let listings = routes::listings::router()
        .merge(routes::ratings::router())
        .merge(routes::comments::listing_router());

    let api_router = Router::new()
        .nest("/auth", routes::auth::router())
        .nest("/listings", listings)
        .nest("/comments", routes::comments::router())
        .nest("/favourites", routes::listings::favourites_router())
        .nest("/sweep", routes::listings::sweep_router())
        .nest("/media", routes::media::router())
        .nest("/checkout", routes::checkout::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/ws/listings/:id/comments", get(handlers::ws::comments_ws))
        .route("/ws/listings/:id/rating", get(handlers::ws::rating_ws))
        .nest("/api", api_router)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Periodic expiry sweep, in addition to the sweep on every listing load.
fn spawn_sweeper(lifecycle: ListingLifecycle, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match lifecycle.sweep_expired().await {
                Ok(report) if !report.removed.is_empty() => {
                    tracing::info!(removed = report.removed.len(), "background sweep finished")
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "background sweep failed"),
            }
        }
    });
}

async fn health_check() -> &'static str {
    "OK"
}

#[derive(Clone)]
pub struct AppState {
    pub db: db::Database,
    pub config: config::Config,
    pub clock: Arc<dyn Clock>,
    pub media: Arc<dyn MediaStore>,
    pub listings: ListingStore,
    pub lifecycle: ListingLifecycle,
    pub ratings: RatingStore,
    pub comments: CommentStore,
    pub checkout: StripeCheckout,
}

impl AppState {
    pub fn new(
        db: db::Database,
        config: config::Config,
        media: Arc<dyn MediaStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let events = Arc::new(EventHub::new());
        let pool = db.pool.clone();

        let lifecycle =
            ListingLifecycle::new(pool.clone(), media.clone(), events.clone(), clock.clone());
        let listings = ListingStore::new(pool.clone(), media.clone(), lifecycle.clone(), clock.clone());
        let ratings = RatingStore::new(pool.clone(), events.clone(), clock.clone());
        let comments = CommentStore::new(pool, events, clock.clone());
        let checkout = StripeCheckout::new(config.stripe.clone());

        Self {
            db,
            config,
            clock,
            media,
            listings,
            lifecycle,
            ratings,
            comments,
            checkout,
        }
    }
}
