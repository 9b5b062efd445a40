// Listing expiry and the sweep that prunes expired listings

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::{
    db::timestamp,
    error::{AppError, Result},
    services::{
        clock::Clock,
        events::{EventHub, ListingEvent},
        listings::{fetch_listing, gone},
        media::MediaStore,
        require_caller, Caller,
    },
};

pub const LISTING_TTL_DAYS: i64 = 30;
pub const EXTENSION_DAYS: i64 = 29;
pub const EXPIRING_SOON_DAYS: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Active,
    ExpiringSoon,
    Expired,
}

pub fn initial_expiry(created_at: DateTime<Utc>) -> DateTime<Utc> {
    created_at + Duration::days(LISTING_TTL_DAYS)
}

pub fn lifecycle_state(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> LifecycleState {
    let remaining = expires_at - now;
    if remaining <= Duration::zero() {
        LifecycleState::Expired
    } else if remaining <= Duration::days(EXPIRING_SOON_DAYS) {
        LifecycleState::ExpiringSoon
    } else {
        LifecycleState::Active
    }
}

/// Whole days left before expiry, never negative.
pub fn days_remaining(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (expires_at - now).num_days().max(0)
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct CascadeReport {
    pub photos_deleted: usize,
    pub photo_failures: usize,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct SweepReport {
    pub removed: Vec<String>,
    pub photo_failures: usize,
}

#[derive(Clone)]
pub struct ListingLifecycle {
    pool: SqlitePool,
    media: Arc<dyn MediaStore>,
    events: Arc<EventHub>,
    clock: Arc<dyn Clock>,
}

impl ListingLifecycle {
    pub fn new(
        pool: SqlitePool,
        media: Arc<dyn MediaStore>,
        events: Arc<EventHub>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pool,
            media,
            events,
            clock,
        }
    }

    pub fn state_of(&self, expires_at: DateTime<Utc>) -> LifecycleState {
        lifecycle_state(expires_at, self.clock.now())
    }

    /// Pushes the stored expiry out by 29 days. The base is the value read
    /// from the store, never the caller's copy or the wall clock.
    ///
    /// The write only applies if `expires_at` still holds the value it was
    /// computed from; a concurrent extension sends us round again, where the
    /// listing is no longer expiring soon.
    pub async fn extend_expiry(
        &self,
        caller: Option<&Caller>,
        listing_id: &str,
    ) -> Result<DateTime<Utc>> {
        let caller = require_caller(caller)?;

        loop {
            let (owner_id, stored) = sqlx::query_as::<_, (Option<String>, String)>(
                "SELECT owner_id, expires_at FROM listings WHERE id = ?",
            )
            .bind(listing_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| gone(listing_id))?;

            if owner_id.as_deref() != Some(caller.id.as_str()) {
                return Err(AppError::Forbidden(
                    "Only the owner can extend this listing".to_string(),
                ));
            }

            let current = crate::db::parse_timestamp(&stored)?;
            match self.state_of(current) {
                LifecycleState::ExpiringSoon => {}
                LifecycleState::Active => {
                    return Err(AppError::Validation(format!(
                        "Listings can only be extended within {EXPIRING_SOON_DAYS} day of expiry"
                    )))
                }
                LifecycleState::Expired => {
                    return Err(AppError::Validation(
                        "Listing has already expired".to_string(),
                    ))
                }
            }

            let extended = current + Duration::days(EXTENSION_DAYS);
            let result = sqlx::query(
                "UPDATE listings SET expires_at = ?, updated_at = ? WHERE id = ? AND expires_at = ?",
            )
            .bind(timestamp(extended))
            .bind(timestamp(self.clock.now()))
            .bind(listing_id)
            .bind(&stored)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                tracing::info!(listing_id, expires_at = %extended, "listing extended");
                return Ok(extended);
            }
            tracing::debug!(listing_id, "expiry changed underneath extension, rereading");
        }
    }

    /// Owner or admin delete, sharing the sweep's cascade path.
    pub async fn delete_listing(&self, caller: Option<&Caller>, listing_id: &str) -> Result<CascadeReport> {
        let caller = require_caller(caller)?;
        let listing = fetch_listing(&self.pool, listing_id)
            .await?
            .ok_or_else(|| gone(listing_id))?;

        if !listing.is_owned_by(&caller.id) && !caller.is_admin() {
            return Err(AppError::Forbidden(
                "Only the owner or an admin can delete this listing".to_string(),
            ));
        }

        // A concurrent sweep may have won the race; that still counts as deleted.
        Ok(self
            .delete_listing_cascade(listing_id)
            .await?
            .unwrap_or_default())
    }

    /// Removes a listing with its photos, ratings, comments and favourites.
    ///
    /// Returns `None` when the listing does not exist. Photo deletions are
    /// best effort: failures are logged and counted, never fatal.
    pub async fn delete_listing_cascade(&self, listing_id: &str) -> Result<Option<CascadeReport>> {
        let Some(listing) = fetch_listing(&self.pool, listing_id).await? else {
            return Ok(None);
        };

        let outcomes = join_all(
            listing
                .photos
                .iter()
                .map(|url| async move { (url, self.media.delete_by_url(url).await) }),
        )
        .await;

        let mut report = CascadeReport::default();
        for (url, outcome) in outcomes {
            match outcome {
                Ok(()) => report.photos_deleted += 1,
                Err(e) => {
                    tracing::warn!(listing_id, photo = %url, error = %e, "failed to delete listing photo");
                    report.photo_failures += 1;
                }
            }
        }

        let mut tx = self.pool.begin().await?;
        for table in ["ratings", "comments", "favourites"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE listing_id = ?"))
                .bind(listing_id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM listings WHERE id = ?")
            .bind(listing_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.events.publish(listing_id, ListingEvent::Removed).await;
        tracing::info!(
            listing_id,
            photos_deleted = report.photos_deleted,
            photo_failures = report.photo_failures,
            "listing deleted"
        );
        Ok(Some(report))
    }

    /// Deletes every listing whose expiry is not in the future.
    pub async fn sweep_expired(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let expired = sqlx::query_scalar::<_, String>(
            "SELECT id FROM listings WHERE expires_at <= ? ORDER BY expires_at ASC",
        )
        .bind(timestamp(now))
        .fetch_all(&self.pool)
        .await?;

        let mut report = SweepReport::default();
        for id in expired {
            if let Some(cascade) = self.delete_listing_cascade(&id).await? {
                report.photo_failures += cascade.photo_failures;
                report.removed.push(id);
            }
        }

        if !report.removed.is_empty() {
            tracing::info!(removed = report.removed.len(), "expired listings swept");
        }
        Ok(report)
    }
}
