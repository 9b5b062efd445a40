use std::sync::Arc;

use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    db::{
        models::{Category, Currency, GeoPoint, Listing, ListingRow},
        timestamp,
    },
    error::{AppError, Result},
    services::{
        clock::Clock,
        lifecycle::{initial_expiry, ListingLifecycle},
        media::MediaStore,
        require_caller, Caller,
    },
};

/// Editable listing fields as submitted by the create and edit forms.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingDraft {
    pub name: String,
    pub category: String,
    pub address: String,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub description: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    pub price: f64,
    pub currency: String,
    #[serde(default)]
    pub photos: Vec<String>,
    #[serde(default)]
    pub is_open_now: bool,
}

struct CheckedDraft {
    name: String,
    category: Category,
    address: String,
    location: Option<GeoPoint>,
    description: String,
    email: String,
    phone: Option<String>,
    website: Option<String>,
    price: f64,
    currency: Currency,
    photos: Vec<String>,
    is_open_now: bool,
}

fn required(value: &str, field: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::Validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ListingDraft {
    fn check(self) -> Result<CheckedDraft> {
        let email = required(&self.email, "Email")?;
        if !email.contains('@') {
            return Err(AppError::Validation("Invalid email address".to_string()));
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(AppError::Validation(
                "Price must be a positive number".to_string(),
            ));
        }
        let location = self
            .location
            .map(|p| GeoPoint::new(p.lat, p.lng))
            .transpose()?;

        let mut photos = Vec::with_capacity(self.photos.len());
        for photo in self.photos {
            let photo = photo.trim().to_string();
            if !(photo.starts_with("http://") || photo.starts_with("https://")) {
                return Err(AppError::Validation(format!(
                    "Photo must be an http(s) URL: {photo:?}"
                )));
            }
            photos.push(photo);
        }

        Ok(CheckedDraft {
            name: required(&self.name, "Name")?,
            category: self.category.parse()?,
            address: required(&self.address, "Address")?,
            location,
            description: required(&self.description, "Description")?,
            email,
            phone: optional(self.phone),
            website: optional(self.website),
            price: self.price,
            currency: self.currency.parse()?,
            photos,
            is_open_now: self.is_open_now,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingFilter {
    pub category: Option<String>,
    /// Case-insensitive match against name and address.
    pub q: Option<String>,
    pub owner_id: Option<String>,
}

pub(crate) async fn fetch_listing(pool: &SqlitePool, id: &str) -> Result<Option<Listing>> {
    sqlx::query_as::<_, ListingRow>("SELECT * FROM listings WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(Listing::try_from)
        .transpose()
}

pub(crate) fn gone(id: &str) -> AppError {
    AppError::NotFound(format!("Listing {id} is no longer available"))
}

#[derive(Clone)]
pub struct ListingStore {
    pool: SqlitePool,
    media: Arc<dyn MediaStore>,
    lifecycle: ListingLifecycle,
    clock: Arc<dyn Clock>,
}

impl ListingStore {
    pub fn new(
        pool: SqlitePool,
        media: Arc<dyn MediaStore>,
        lifecycle: ListingLifecycle,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pool,
            media,
            lifecycle,
            clock,
        }
    }

    /// Anonymous callers may create listings; they simply have no owner.
    pub async fn create(&self, caller: Option<&Caller>, draft: ListingDraft) -> Result<Listing> {
        let draft = draft.check()?;
        let id = Uuid::new_v4().to_string();
        let now = self.clock.now();

        sqlx::query(
            r#"
            INSERT INTO listings (
                id, name, category, address, latitude, longitude, description,
                email, phone, website, price, currency, photos, is_open_now,
                avg_rating, ratings_count, owner_id, created_at, updated_at, expires_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&draft.name)
        .bind(draft.category.label())
        .bind(&draft.address)
        .bind(draft.location.map(|p| p.lat))
        .bind(draft.location.map(|p| p.lng))
        .bind(&draft.description)
        .bind(&draft.email)
        .bind(&draft.phone)
        .bind(&draft.website)
        .bind(draft.price)
        .bind(draft.currency.code())
        .bind(serde_json::to_string(&draft.photos)?)
        .bind(draft.is_open_now)
        .bind(caller.map(|c| c.id.as_str()))
        .bind(timestamp(now))
        .bind(timestamp(now))
        .bind(timestamp(initial_expiry(now)))
        .execute(&self.pool)
        .await?;

        tracing::info!(listing_id = %id, owner = ?caller.map(|c| &c.id), "listing created");
        self.get(&id).await
    }

    pub async fn get(&self, id: &str) -> Result<Listing> {
        fetch_listing(&self.pool, id).await?.ok_or_else(|| gone(id))
    }

    /// Loads the collection, pruning expired listings first.
    pub async fn list(&self, filter: &ListingFilter) -> Result<Vec<Listing>> {
        self.lifecycle.sweep_expired().await?;

        let category = filter
            .category
            .as_deref()
            .map(str::parse::<Category>)
            .transpose()?;

        let rows = sqlx::query_as::<_, ListingRow>(
            r#"
            SELECT * FROM listings
            WHERE (?1 IS NULL OR category = ?1)
              AND (?2 IS NULL OR owner_id = ?2)
            ORDER BY name COLLATE NOCASE ASC
            "#,
        )
        .bind(category.map(|c| c.label()))
        .bind(filter.owner_id.as_deref())
        .fetch_all(&self.pool)
        .await?;

        let needle = filter
            .q
            .as_deref()
            .map(|q| q.trim().to_lowercase())
            .filter(|q| !q.is_empty());

        rows.into_iter()
            .map(Listing::try_from)
            .filter(|listing| match (&needle, listing) {
                (Some(needle), Ok(l)) => {
                    l.name.to_lowercase().contains(needle)
                        || l.address.to_lowercase().contains(needle)
                }
                _ => true,
            })
            .collect()
    }

    /// Replaces every editable field. Identity, timestamps, expiry and the
    /// rating cache are never touched here.
    pub async fn update(
        &self,
        caller: Option<&Caller>,
        id: &str,
        draft: ListingDraft,
    ) -> Result<Listing> {
        let caller = require_caller(caller)?;
        let existing = self.get(id).await?;
        if !existing.is_owned_by(&caller.id) && !caller.is_admin() {
            return Err(AppError::Forbidden(
                "Only the owner can edit this listing".to_string(),
            ));
        }
        let draft = draft.check()?;

        let result = sqlx::query(
            r#"
            UPDATE listings SET
                name = ?, category = ?, address = ?, latitude = ?, longitude = ?,
                description = ?, email = ?, phone = ?, website = ?, price = ?,
                currency = ?, photos = ?, is_open_now = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&draft.name)
        .bind(draft.category.label())
        .bind(&draft.address)
        .bind(draft.location.map(|p| p.lat))
        .bind(draft.location.map(|p| p.lng))
        .bind(&draft.description)
        .bind(&draft.email)
        .bind(&draft.phone)
        .bind(&draft.website)
        .bind(draft.price)
        .bind(draft.currency.code())
        .bind(serde_json::to_string(&draft.photos)?)
        .bind(draft.is_open_now)
        .bind(timestamp(self.clock.now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(gone(id));
        }

        // Photos dropped by the edit are no longer referenced anywhere.
        for photo in existing
            .photos
            .iter()
            .filter(|url| !draft.photos.contains(url))
        {
            if let Err(e) = self.media.delete_by_url(photo).await {
                tracing::warn!(listing_id = %id, photo = %photo, error = %e, "failed to delete removed photo");
            }
        }

        self.get(id).await
    }

    pub async fn add_favourite(&self, caller: Option<&Caller>, listing_id: &str) -> Result<()> {
        let caller = require_caller(caller)?;

        let written = sqlx::query(
            r#"
            INSERT OR IGNORE INTO favourites (user_id, listing_id, created_at)
            SELECT ?1, ?2, ?3 WHERE EXISTS (SELECT 1 FROM listings WHERE id = ?2)
            "#,
        )
        .bind(&caller.id)
        .bind(listing_id)
        .bind(timestamp(self.clock.now()))
        .execute(&self.pool)
        .await?;

        // Nothing written means either already a favourite or no listing.
        if written.rows_affected() == 0 {
            self.get(listing_id).await?;
        }
        Ok(())
    }

    pub async fn remove_favourite(&self, caller: Option<&Caller>, listing_id: &str) -> Result<()> {
        let caller = require_caller(caller)?;
        sqlx::query("DELETE FROM favourites WHERE user_id = ? AND listing_id = ?")
            .bind(&caller.id)
            .bind(listing_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn favourites(&self, caller: Option<&Caller>) -> Result<Vec<Listing>> {
        let caller = require_caller(caller)?;
        sqlx::query_as::<_, ListingRow>(
            r#"
            SELECT l.* FROM listings l
            JOIN favourites f ON f.listing_id = l.id
            WHERE f.user_id = ?
            ORDER BY f.created_at ASC
            "#,
        )
        .bind(&caller.id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Listing::try_from)
        .collect()
    }
}
