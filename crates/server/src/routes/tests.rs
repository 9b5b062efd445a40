use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, TimeZone, Utc};
use serde_json::{json, Value};
use tower::util::ServiceExt;

use crate::{
    app,
    config::Config,
    db::{models::Role, timestamp, Database},
    routes::auth::{create_token, UserResponse},
    services::{clock::ManualClock, media::DiskMediaStore},
    AppState,
};

struct TestApp {
    router: Router,
    state: AppState,
    clock: Arc<ManualClock>,
    _media_dir: tempfile::TempDir,
}

impl TestApp {
    async fn new() -> Self {
        let db = Database::in_memory().await;
        let clock = Arc::new(ManualClock::at(
            Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap(),
        ));
        let media_dir = tempfile::tempdir().unwrap();

        let mut config = Config::from_env();
        config.jwt_secret = "test-secret".to_string();
        config.admin_emails = vec!["admin@artisthive.test".to_string()];

        let media = Arc::new(DiskMediaStore::new(
            media_dir.path(),
            "http://localhost:3000/media",
        ));
        let state = AppState::new(db, config, media, clock.clone());

        Self {
            router: app(state.clone()),
            state,
            clock,
            _media_dir: media_dir,
        }
    }

    /// Inserts a user directly and returns a bearer token for it.
    async fn user(&self, id: &str, role: Role) -> String {
        let user = UserResponse {
            id: id.to_string(),
            email: format!("{id}@artisthive.test"),
            name: format!("User {id}"),
            avatar_url: None,
            role,
        };
        sqlx::query(
            "INSERT INTO users (id, email, name, role, password_hash, created_at) VALUES (?, ?, ?, ?, 'x', ?)",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(role.as_str())
        .bind(timestamp(Utc::now()))
        .execute(&self.state.db.pool)
        .await
        .unwrap();

        create_token(&user, &self.state.config.jwt_secret).unwrap()
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn create_listing(&self, token: &str, name: &str) -> String {
        let (status, body) = self
            .call(
                Method::POST,
                "/api/listings",
                Some(token),
                Some(json!({
                    "name": name,
                    "category": "Ceramics",
                    "address": "Bd. Eroilor 5, Cluj-Napoca, Romania",
                    "description": "Hand-thrown stoneware",
                    "email": "studio@example.com",
                    "price": 80,
                    "currency": "EUR",
                    "location": { "lat": 46.77, "lng": 23.59 }
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["id"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn health_check_responds() {
    let app = TestApp::new().await;
    let response = app
        .router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn register_login_and_admin_promotion() {
    let app = TestApp::new().await;

    let (status, body) = app
        .call(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "email": "Admin@ArtistHive.test", "name": "Ops", "password": "correct horse" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["role"], "admin");

    let (status, body) = app
        .call(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "admin@artisthive.test", "password": "correct horse" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = app.call(Method::GET, "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Ops");

    let (status, body) = app
        .call(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "admin@artisthive.test", "password": "wrong password" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthenticated");
}

#[tokio::test]
async fn invalid_token_is_rejected() {
    let app = TestApp::new().await;
    let (status, _) = app
        .call(Method::GET, "/api/listings", Some("not-a-jwt"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn rating_scenario_over_http() {
    let app = TestApp::new().await;
    let owner = app.user("owner", Role::User).await;
    let listing = app.create_listing(&owner, "Clay & Co").await;

    let mut raters = Vec::new();
    for (who, stars) in [("r1", 5), ("r2", 3), ("r3", 4)] {
        let token = app.user(who, Role::User).await;
        let (status, _) = app
            .call(
                Method::PUT,
                &format!("/api/listings/{listing}/rating/me"),
                Some(&token),
                Some(json!({ "stars": stars })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        raters.push(token);
    }

    let (_, agg) = app
        .call(Method::GET, &format!("/api/listings/{listing}/rating"), None, None)
        .await;
    assert!((agg["avgRating"].as_f64().unwrap() - 4.0).abs() < 1e-9);
    assert_eq!(agg["ratingsCount"], 3);

    let (_, agg) = app
        .call(
            Method::PUT,
            &format!("/api/listings/{listing}/rating/me"),
            Some(&raters[0]),
            Some(json!({ "stars": 1 })),
        )
        .await;
    assert!((agg["avgRating"].as_f64().unwrap() - 8.0 / 3.0).abs() < 1e-9);
    assert_eq!(agg["ratingsCount"], 3);

    let (_, mine) = app
        .call(
            Method::GET,
            &format!("/api/listings/{listing}/rating/me"),
            Some(&raters[0]),
            None,
        )
        .await;
    assert_eq!(mine["stars"], 1);

    let (status, body) = app
        .call(
            Method::PUT,
            &format!("/api/listings/{listing}/rating/me"),
            None,
            Some(json!({ "stars": 4 })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthenticated");

    let (status, body) = app
        .call(
            Method::PUT,
            &format!("/api/listings/{listing}/rating/me"),
            Some(&raters[1]),
            Some(json!({ "stars": 9 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");
}

#[tokio::test]
async fn comment_permissions_over_http() {
    let app = TestApp::new().await;
    let owner = app.user("owner", Role::User).await;
    let author = app.user("author", Role::User).await;
    let stranger = app.user("stranger", Role::User).await;
    let admin = app.user("admin", Role::Admin).await;
    let listing = app.create_listing(&owner, "Talkative").await;

    let (status, comment) = app
        .call(
            Method::POST,
            &format!("/api/listings/{listing}/comments"),
            Some(&author),
            Some(json!({ "text": "Do you take commissions?" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(comment["authorName"], "User author");
    let comment_id = comment["id"].as_str().unwrap();

    let (status, _) = app
        .call(
            Method::PUT,
            &format!("/api/comments/{comment_id}"),
            Some(&stranger),
            Some(json!({ "text": "spam" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .call(
            Method::POST,
            &format!("/api/listings/{listing}/comments"),
            Some(&author),
            Some(json!({ "text": "   " })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Comment can't be empty");

    let (status, _) = app
        .call(
            Method::DELETE,
            &format!("/api/comments/{comment_id}"),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, thread) = app
        .call(
            Method::GET,
            &format!("/api/listings/{listing}/comments"),
            None,
            None,
        )
        .await;
    assert_eq!(thread["comments"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn expired_listing_disappears_after_load() {
    let app = TestApp::new().await;
    let owner = app.user("owner", Role::User).await;
    let listing = app.create_listing(&owner, "Ephemeral").await;

    let (_, body) = app
        .call(Method::GET, &format!("/api/listings/{listing}"), None, None)
        .await;
    assert_eq!(body["lifecycle"], "active");
    assert_eq!(body["daysRemaining"], 30);
    assert_eq!(body["shortAddress"], "Bd. Eroilor 5, Cluj-Napoca");

    app.clock.advance(Duration::days(29) + Duration::hours(12));
    let (_, body) = app
        .call(Method::GET, &format!("/api/listings/{listing}"), None, None)
        .await;
    assert_eq!(body["lifecycle"], "expiring_soon");

    let (status, body) = app
        .call(
            Method::POST,
            &format!("/api/listings/{listing}/extend"),
            Some(&owner),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["expiresAt"],
        json!(Utc.with_ymd_and_hms(2025, 7, 30, 10, 0, 0).unwrap())
    );

    app.clock.advance(Duration::days(40));
    let (_, body) = app.call(Method::GET, "/api/listings", None, None).await;
    assert!(body["listings"].as_array().unwrap().is_empty());

    let (status, body) = app
        .call(Method::GET, &format!("/api/listings/{listing}"), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn only_admin_or_owner_deletes_listing() {
    let app = TestApp::new().await;
    let owner = app.user("owner", Role::User).await;
    let stranger = app.user("stranger", Role::User).await;
    let admin = app.user("admin", Role::Admin).await;
    let listing = app.create_listing(&owner, "Contested").await;

    let (status, _) = app
        .call(
            Method::DELETE,
            &format!("/api/listings/{listing}"),
            Some(&stranger),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .call(Method::POST, "/api/sweep", Some(&stranger), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .call(
            Method::DELETE,
            &format!("/api/listings/{listing}"),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn checkout_validates_before_calling_provider() {
    let app = TestApp::new().await;
    let (status, body) = app
        .call(
            Method::POST,
            "/api/checkout",
            None,
            Some(json!({ "amount": 10, "currency": "gbp", "name": "Print" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");
}
