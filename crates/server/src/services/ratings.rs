use std::sync::Arc;

use axum::async_trait;
use sqlx::SqlitePool;

use crate::{
    db::{
        models::{RatingAggregate, Stars},
        timestamp,
    },
    error::Result,
    services::{
        clock::Clock,
        events::{EventHub, ListingEvent, Subscription},
        listings::gone,
        require_caller, Caller, LiveFeed,
    },
};

#[derive(Clone)]
pub struct RatingStore {
    pool: SqlitePool,
    events: Arc<EventHub>,
    clock: Arc<dyn Clock>,
}

impl RatingStore {
    pub fn new(pool: SqlitePool, events: Arc<EventHub>, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            events,
            clock,
        }
    }

    /// Upserts the caller's rating, then rebuilds the listing's cached
    /// average and count from every stored rating.
    ///
    /// Both steps share one transaction, so concurrent raters cannot leave a
    /// cache that disagrees with the ratings table.
    pub async fn submit_rating(
        &self,
        caller: Option<&Caller>,
        listing_id: &str,
        stars: i64,
    ) -> Result<RatingAggregate> {
        let caller = require_caller(caller)?;
        let stars = Stars::new(stars)?;

        // The upsert is the first statement so the transaction holds the write
        // lock before it reads anything.
        let mut tx = self.pool.begin().await?;

        let written = sqlx::query(
            r#"
            INSERT INTO ratings (listing_id, user_id, stars, updated_at)
            SELECT ?1, ?2, ?3, ?4 WHERE EXISTS (SELECT 1 FROM listings WHERE id = ?1)
            ON CONFLICT (listing_id, user_id) DO UPDATE SET
                stars = excluded.stars,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(listing_id)
        .bind(&caller.id)
        .bind(i64::from(stars.get()))
        .bind(timestamp(self.clock.now()))
        .execute(&mut *tx)
        .await?;
        if written.rows_affected() == 0 {
            return Err(gone(listing_id));
        }

        let (avg_rating, ratings_count) = sqlx::query_as::<_, (f64, i64)>(
            "SELECT COALESCE(AVG(stars), 0.0), COUNT(*) FROM ratings WHERE listing_id = ?",
        )
        .bind(listing_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE listings SET avg_rating = ?, ratings_count = ? WHERE id = ?")
            .bind(avg_rating)
            .bind(ratings_count)
            .bind(listing_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let aggregate = RatingAggregate {
            avg_rating,
            ratings_count,
        };
        tracing::debug!(listing_id, user_id = %caller.id, stars = stars.get(), ?aggregate, "rating stored");
        self.events
            .publish(listing_id, ListingEvent::RatingChanged)
            .await;

        Ok(aggregate)
    }

    pub async fn my_rating(&self, caller: Option<&Caller>, listing_id: &str) -> Result<Option<Stars>> {
        let caller = require_caller(caller)?;
        sqlx::query_scalar::<_, i64>(
            "SELECT stars FROM ratings WHERE listing_id = ? AND user_id = ?",
        )
        .bind(listing_id)
        .bind(&caller.id)
        .fetch_optional(&self.pool)
        .await?
        .map(Stars::new)
        .transpose()
    }

    pub async fn aggregate(&self, listing_id: &str) -> Result<RatingAggregate> {
        let (avg_rating, ratings_count) = sqlx::query_as::<_, (f64, i64)>(
            "SELECT avg_rating, ratings_count FROM listings WHERE id = ?",
        )
        .bind(listing_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| gone(listing_id))?;

        Ok(RatingAggregate {
            avg_rating,
            ratings_count,
        })
    }

    /// Live aggregate: the current value first, then a fresh read after each
    /// change. Events only signal; the value always comes from the store, so
    /// publishes landing out of commit order cannot roll the feed back.
    pub async fn subscribe(&self, listing_id: &str) -> Result<RatingFeed> {
        let subscription = self.events.subscribe(listing_id).await;
        // Probe after subscribing so no change slips between the two.
        if let Err(e) = self.aggregate(listing_id).await {
            drop(subscription);
            self.events.release(listing_id).await;
            return Err(e);
        }

        Ok(RatingFeed {
            store: self.clone(),
            listing_id: listing_id.to_string(),
            subscription,
            pending: true,
        })
    }
}

pub struct RatingFeed {
    store: RatingStore,
    listing_id: String,
    subscription: Subscription,
    pending: bool,
}

#[async_trait]
impl LiveFeed for RatingFeed {
    type Item = RatingAggregate;

    async fn next(&mut self) -> Option<Result<RatingAggregate>> {
        loop {
            if self.pending {
                let snapshot = self.store.aggregate(&self.listing_id).await;
                self.pending = false;
                return Some(snapshot);
            }
            match self.subscription.recv().await? {
                ListingEvent::RatingChanged | ListingEvent::Resync => self.pending = true,
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::AppError,
        services::testing::{draft, user, Harness},
    };

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[tokio::test]
    async fn aggregate_tracks_latest_rating_per_user() {
        let h = Harness::new().await;
        let listing = h.listings.create(None, draft("Trio")).await.unwrap();

        for (who, stars) in [("a", 5), ("b", 3), ("c", 4)] {
            h.ratings
                .submit_rating(Some(&user(who)), &listing.id, stars)
                .await
                .unwrap();
        }
        let agg = h.ratings.aggregate(&listing.id).await.unwrap();
        assert_close(agg.avg_rating, 4.0);
        assert_eq!(agg.ratings_count, 3);

        let agg = h
            .ratings
            .submit_rating(Some(&user("a")), &listing.id, 1)
            .await
            .unwrap();
        assert_close(agg.avg_rating, 8.0 / 3.0);
        assert_eq!(agg.ratings_count, 3);

        let stored = h.listings.get(&listing.id).await.unwrap();
        assert_close(stored.avg_rating, 8.0 / 3.0);
        assert_eq!(stored.ratings_count, 3);
    }

    #[tokio::test]
    async fn recompute_heals_drifted_cache() {
        let h = Harness::new().await;
        let listing = h.listings.create(None, draft("Drift")).await.unwrap();
        h.ratings
            .submit_rating(Some(&user("a")), &listing.id, 2)
            .await
            .unwrap();

        sqlx::query("UPDATE listings SET avg_rating = 5, ratings_count = 40 WHERE id = ?")
            .bind(&listing.id)
            .execute(&h.db.pool)
            .await
            .unwrap();

        let agg = h
            .ratings
            .submit_rating(Some(&user("b")), &listing.id, 4)
            .await
            .unwrap();
        assert_close(agg.avg_rating, 3.0);
        assert_eq!(agg.ratings_count, 2);
    }

    #[tokio::test]
    async fn rejected_submissions_leave_aggregate_untouched() {
        let h = Harness::new().await;
        let listing = h.listings.create(None, draft("Strict")).await.unwrap();
        h.ratings
            .submit_rating(Some(&user("a")), &listing.id, 5)
            .await
            .unwrap();

        for stars in [0, 6, -1] {
            assert!(matches!(
                h.ratings
                    .submit_rating(Some(&user("b")), &listing.id, stars)
                    .await,
                Err(AppError::Validation(_))
            ));
        }
        assert!(matches!(
            h.ratings.submit_rating(None, &listing.id, 3).await,
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            h.ratings
                .submit_rating(Some(&user("b")), "missing", 3)
                .await,
            Err(AppError::NotFound(_))
        ));

        let agg = h.ratings.aggregate(&listing.id).await.unwrap();
        assert_close(agg.avg_rating, 5.0);
        assert_eq!(agg.ratings_count, 1);
    }

    #[tokio::test]
    async fn my_rating_reflects_resubmission() {
        let h = Harness::new().await;
        let listing = h.listings.create(None, draft("Mine")).await.unwrap();
        let me = user("me");

        assert_eq!(h.ratings.my_rating(Some(&me), &listing.id).await.unwrap(), None);
        h.ratings
            .submit_rating(Some(&me), &listing.id, 2)
            .await
            .unwrap();
        h.ratings
            .submit_rating(Some(&me), &listing.id, 4)
            .await
            .unwrap();
        assert_eq!(
            h.ratings
                .my_rating(Some(&me), &listing.id)
                .await
                .unwrap()
                .map(|s| s.get()),
            Some(4)
        );
    }

    #[tokio::test]
    async fn feed_pushes_current_value_then_updates() {
        let h = Harness::new().await;
        let listing = h.listings.create(None, draft("Live")).await.unwrap();
        let mut feed = h.ratings.subscribe(&listing.id).await.unwrap();

        let first = feed.next().await.unwrap().unwrap();
        assert_eq!(first.ratings_count, 0);

        h.ratings
            .submit_rating(Some(&user("a")), &listing.id, 3)
            .await
            .unwrap();
        let second = feed.next().await.unwrap().unwrap();
        assert_eq!(second.ratings_count, 1);
        assert_close(second.avg_rating, 3.0);

        h.lifecycle
            .delete_listing_cascade(&listing.id)
            .await
            .unwrap();
        assert!(feed.next().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_raters_all_land_on_pooled_file() {
        let h = Harness::on_disk().await;
        let listing = h.listings.create(None, draft("Crowd")).await.unwrap();

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let ratings = h.ratings.clone();
                let listing_id = listing.id.clone();
                tokio::spawn(async move {
                    ratings
                        .submit_rating(Some(&user(&format!("rater-{i}"))), &listing_id, 1 + i % 5)
                        .await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        // Stars cycle 1..=5 four times.
        let agg = h.ratings.aggregate(&listing.id).await.unwrap();
        assert_eq!(agg.ratings_count, 20);
        assert_close(agg.avg_rating, 3.0);
    }

    #[tokio::test]
    async fn feed_reads_latest_value_whatever_the_publish_order() {
        let h = Harness::new().await;
        let listing = h.listings.create(None, draft("Ordered")).await.unwrap();
        let mut feed = h.ratings.subscribe(&listing.id).await.unwrap();
        feed.next().await.unwrap().unwrap();

        h.ratings
            .submit_rating(Some(&user("a")), &listing.id, 5)
            .await
            .unwrap();
        h.ratings
            .submit_rating(Some(&user("b")), &listing.id, 1)
            .await
            .unwrap();
        // A change signal arriving late, after newer commits.
        h.events
            .publish(&listing.id, ListingEvent::RatingChanged)
            .await;

        for _ in 0..3 {
            let agg = feed.next().await.unwrap().unwrap();
            assert_eq!(agg.ratings_count, 2);
            assert_close(agg.avg_rating, 3.0);
        }
    }
}
