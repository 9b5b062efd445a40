use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    db::parse_timestamp,
    error::{AppError, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(AppError::Internal(format!("Unknown role {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub role: String,
    pub password_hash: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Painting,
    Music,
    Sculpture,
    Photography,
    #[serde(rename = "Digital Art")]
    DigitalArt,
    PrintMaking,
    Ceramics,
    #[serde(rename = "Textile & Fiber")]
    TextileFiber,
    #[serde(rename = "Jewelry & Wearables")]
    JewelryWearables,
    #[serde(rename = "Graphic Design & Illustration")]
    GraphicDesign,
    #[serde(rename = "Performance Art")]
    PerformanceArt,
    #[serde(rename = "Video & Animation")]
    VideoAnimation,
    #[serde(rename = "Crafts & Handmade")]
    CraftsHandmade,
    Other,
}

impl Category {
    pub const ALL: [Category; 14] = [
        Category::Painting,
        Category::Music,
        Category::Sculpture,
        Category::Photography,
        Category::DigitalArt,
        Category::PrintMaking,
        Category::Ceramics,
        Category::TextileFiber,
        Category::JewelryWearables,
        Category::GraphicDesign,
        Category::PerformanceArt,
        Category::VideoAnimation,
        Category::CraftsHandmade,
        Category::Other,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Category::Painting => "Painting",
            Category::Music => "Music",
            Category::Sculpture => "Sculpture",
            Category::Photography => "Photography",
            Category::DigitalArt => "Digital Art",
            Category::PrintMaking => "PrintMaking",
            Category::Ceramics => "Ceramics",
            Category::TextileFiber => "Textile & Fiber",
            Category::JewelryWearables => "Jewelry & Wearables",
            Category::GraphicDesign => "Graphic Design & Illustration",
            Category::PerformanceArt => "Performance Art",
            Category::VideoAnimation => "Video & Animation",
            Category::CraftsHandmade => "Crafts & Handmade",
            Category::Other => "Other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Category {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Category::ALL
            .into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::Validation(format!("Unknown category {s:?}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Ron,
    Eur,
    Usd,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Ron => "RON",
            Currency::Eur => "EUR",
            Currency::Usd => "USD",
        }
    }
}

impl FromStr for Currency {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RON" => Ok(Currency::Ron),
            "EUR" => Ok(Currency::Eur),
            "USD" => Ok(Currency::Usd),
            _ => Err(AppError::Validation(format!(
                "Currency must be one of RON, EUR, USD (got {s:?})"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(AppError::Validation(
                "Coordinates are out of range".to_string(),
            ));
        }
        Ok(Self { lat, lng })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ListingRow {
    pub id: String,
    pub name: String,
    pub category: String,
    pub address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub description: String,
    pub email: String,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub price: f64,
    pub currency: String,
    pub photos: String,
    pub is_open_now: bool,
    pub avg_rating: f64,
    pub ratings_count: i64,
    pub owner_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub expires_at: String,
}

/// An artist announcement as stored, decoded into checked types.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: String,
    pub name: String,
    pub category: Category,
    pub address: String,
    pub location: Option<GeoPoint>,
    pub description: String,
    pub email: String,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub price: f64,
    pub currency: Currency,
    pub photos: Vec<String>,
    pub is_open_now: bool,
    pub avg_rating: f64,
    pub ratings_count: i64,
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TryFrom<ListingRow> for Listing {
    type Error = AppError;

    fn try_from(row: ListingRow) -> Result<Self> {
        let location = match (row.latitude, row.longitude) {
            (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
            _ => None,
        };

        Ok(Listing {
            category: row.category.parse()?,
            currency: row.currency.parse()?,
            photos: serde_json::from_str(&row.photos)?,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            expires_at: parse_timestamp(&row.expires_at)?,
            id: row.id,
            name: row.name,
            address: row.address,
            location,
            description: row.description,
            email: row.email,
            phone: row.phone,
            website: row.website,
            price: row.price,
            is_open_now: row.is_open_now,
            avg_rating: row.avg_rating,
            ratings_count: row.ratings_count,
            owner_id: row.owner_id,
        })
    }
}

impl Listing {
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id.as_deref() == Some(user_id)
    }

    pub fn short_address(&self) -> String {
        short_address(&self.address)
    }
}

/// Display form of a free-text address: its first two non-empty segments.
pub fn short_address(address: &str) -> String {
    address
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .take(2)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Star value of a single rating, always within 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Stars(u8);

impl Stars {
    pub fn new(value: i64) -> Result<Self> {
        match u8::try_from(value) {
            Ok(v @ 1..=5) => Ok(Self(v)),
            _ => Err(AppError::Validation(format!(
                "Rating must be between 1 and 5 stars (got {value})"
            ))),
        }
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingAggregate {
    pub avg_rating: f64,
    pub ratings_count: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CommentRow {
    pub id: String,
    pub listing_id: String,
    pub author_id: String,
    pub author_name: String,
    pub author_avatar: Option<String>,
    pub text: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub listing_id: String,
    pub author_id: String,
    /// Captured when the comment was written; not refreshed on profile edits.
    pub author_name: String,
    pub author_avatar: Option<String>,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<CommentRow> for Comment {
    type Error = AppError;

    fn try_from(row: CommentRow) -> Result<Self> {
        Ok(Comment {
            created_at: parse_timestamp(&row.created_at)?,
            id: row.id,
            listing_id: row.listing_id,
            author_id: row.author_id,
            author_name: row.author_name,
            author_avatar: row.author_avatar,
            text: row.text,
        })
    }
}
