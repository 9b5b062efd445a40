pub mod checkout;
pub mod clock;
pub mod comments;
pub mod events;
pub mod lifecycle;
pub mod listings;
pub mod media;
pub mod ratings;

use axum::async_trait;
use serde::Serialize;

use crate::{
    db::models::Role,
    error::{AppError, Result},
};

/// Identity of whoever is invoking a store operation.
///
/// Handlers build this from the request's auth extension and pass it down
/// explicitly; stores never look up a session on their own.
#[derive(Debug, Clone)]
pub struct Caller {
    pub id: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub role: Role,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

pub fn require_caller(caller: Option<&Caller>) -> Result<&Caller> {
    caller.ok_or(AppError::Unauthorized)
}

/// A subscription that yields the full current state first and again after
/// every change. `None` means the subject is gone and the feed is over.
#[async_trait]
pub trait LiveFeed: Send {
    type Item: Serialize + Send;

    async fn next(&mut self) -> Option<Result<Self::Item>>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use chrono::TimeZone;

    use super::{
        clock::ManualClock, comments::CommentStore, events::EventHub, lifecycle::ListingLifecycle,
        listings::{ListingDraft, ListingStore}, media::DiskMediaStore, ratings::RatingStore,
        Caller,
    };
    use crate::db::{models::Role, Database};

    pub fn user(id: &str) -> Caller {
        Caller {
            id: id.to_string(),
            name: format!("User {id}"),
            avatar_url: None,
            role: Role::User,
        }
    }

    pub fn admin(id: &str) -> Caller {
        Caller {
            role: Role::Admin,
            ..user(id)
        }
    }

    pub fn draft(name: &str) -> ListingDraft {
        ListingDraft {
            name: name.to_string(),
            category: "Painting".to_string(),
            address: "Str. Republicii 10, Brasov, Romania".to_string(),
            location: None,
            description: "Oil on canvas, commissions welcome".to_string(),
            email: "artist@example.com".to_string(),
            phone: None,
            website: None,
            price: 120.0,
            currency: "RON".to_string(),
            photos: Vec::new(),
            is_open_now: true,
        }
    }

    pub const MEDIA_BASE: &str = "http://localhost:3000/media";

    /// Every store wired to one in-memory database, a temp media dir and a
    /// manual clock.
    pub struct Harness {
        pub db: Database,
        pub clock: Arc<ManualClock>,
        pub media: Arc<DiskMediaStore>,
        pub events: Arc<EventHub>,
        pub listings: ListingStore,
        pub lifecycle: ListingLifecycle,
        pub ratings: RatingStore,
        pub comments: CommentStore,
        pub media_dir: tempfile::TempDir,
    }

    impl Harness {
        pub async fn new() -> Self {
            Self::with_db(Database::in_memory().await, tempfile::tempdir().unwrap()).await
        }

        /// Same wiring over a pooled database file, for tests that need real
        /// concurrent connections.
        pub async fn on_disk() -> Self {
            let media_dir = tempfile::tempdir().unwrap();
            let url = format!("sqlite:{}", media_dir.path().join("listings.db").display());
            let db = Database::connect(&url).await.unwrap();
            db.run_migrations().await.unwrap();
            Self::with_db(db, media_dir).await
        }

        async fn with_db(db: Database, media_dir: tempfile::TempDir) -> Self {
            let clock = Arc::new(ManualClock::at(
                chrono::Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap(),
            ));
            let media = Arc::new(DiskMediaStore::new(media_dir.path(), MEDIA_BASE));
            let events = Arc::new(EventHub::new());

            let lifecycle = ListingLifecycle::new(
                db.pool.clone(),
                media.clone(),
                events.clone(),
                clock.clone(),
            );
            let listings = ListingStore::new(
                db.pool.clone(),
                media.clone(),
                lifecycle.clone(),
                clock.clone(),
            );
            let ratings = RatingStore::new(db.pool.clone(), events.clone(), clock.clone());
            let comments = CommentStore::new(db.pool.clone(), events.clone(), clock.clone());

            Self {
                db,
                clock,
                media,
                events,
                listings,
                lifecycle,
                ratings,
                comments,
                media_dir,
            }
        }

        pub fn media_exists(&self, url: &str) -> bool {
            url.strip_prefix(MEDIA_BASE)
                .map(|key| self.media_dir.path().join(key.trim_start_matches('/')).exists())
                .unwrap_or(false)
        }
    }
}
