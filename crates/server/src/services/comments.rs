use std::sync::Arc;

use axum::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    db::{
        models::{Comment, CommentRow},
        timestamp,
    },
    error::{AppError, Result},
    services::{
        clock::Clock,
        events::{EventHub, ListingEvent, Subscription},
        listings::gone,
        require_caller, Caller, LiveFeed,
    },
};

fn checked_text(text: &str) -> Result<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::Validation("Comment can't be empty".to_string()));
    }
    Ok(text.to_string())
}

#[derive(Clone)]
pub struct CommentStore {
    pool: SqlitePool,
    events: Arc<EventHub>,
    clock: Arc<dyn Clock>,
}

impl CommentStore {
    pub fn new(pool: SqlitePool, events: Arc<EventHub>, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            events,
            clock,
        }
    }

    /// Appends a comment authored by the caller. The author's current name and
    /// avatar are copied onto the comment.
    pub async fn add_comment(
        &self,
        caller: Option<&Caller>,
        listing_id: &str,
        text: &str,
    ) -> Result<Comment> {
        let author = require_caller(caller)?;
        let text = checked_text(text)?;

        let comment = Comment {
            id: Uuid::new_v4().to_string(),
            listing_id: listing_id.to_string(),
            author_id: author.id.clone(),
            author_name: author.name.clone(),
            author_avatar: author.avatar_url.clone(),
            text,
            created_at: self.clock.now(),
        };

        // Guarded insert: a listing deleted concurrently cannot gain an orphan.
        let written = sqlx::query(
            r#"
            INSERT INTO comments (id, listing_id, author_id, author_name, author_avatar, text, created_at)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7 WHERE EXISTS (SELECT 1 FROM listings WHERE id = ?2)
            "#,
        )
        .bind(&comment.id)
        .bind(&comment.listing_id)
        .bind(&comment.author_id)
        .bind(&comment.author_name)
        .bind(&comment.author_avatar)
        .bind(&comment.text)
        .bind(timestamp(comment.created_at))
        .execute(&self.pool)
        .await?;
        if written.rows_affected() == 0 {
            return Err(gone(listing_id));
        }

        self.events
            .publish(listing_id, ListingEvent::CommentsChanged)
            .await;
        Ok(comment)
    }

    pub async fn get_comment(&self, comment_id: &str) -> Result<Comment> {
        sqlx::query_as::<_, CommentRow>("SELECT * FROM comments WHERE id = ?")
            .bind(comment_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))?
            .try_into()
    }

    /// Author-only text edit; the creation time is left as it was.
    pub async fn edit_comment(
        &self,
        caller: Option<&Caller>,
        comment_id: &str,
        new_text: &str,
    ) -> Result<Comment> {
        let caller = require_caller(caller)?;
        let mut comment = self.get_comment(comment_id).await?;

        if comment.author_id != caller.id {
            return Err(AppError::Forbidden(
                "Only the author can edit this comment".to_string(),
            ));
        }
        let text = checked_text(new_text)?;

        let result = sqlx::query("UPDATE comments SET text = ? WHERE id = ?")
            .bind(&text)
            .bind(comment_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Comment not found".to_string()));
        }

        comment.text = text;
        self.events
            .publish(&comment.listing_id, ListingEvent::CommentsChanged)
            .await;
        Ok(comment)
    }

    pub async fn delete_comment(&self, caller: Option<&Caller>, comment_id: &str) -> Result<()> {
        let caller = require_caller(caller)?;
        let comment = self.get_comment(comment_id).await?;

        if comment.author_id != caller.id && !caller.is_admin() {
            return Err(AppError::Forbidden(
                "Cannot delete this comment".to_string(),
            ));
        }

        sqlx::query("DELETE FROM comments WHERE id = ?")
            .bind(comment_id)
            .execute(&self.pool)
            .await?;

        self.events
            .publish(&comment.listing_id, ListingEvent::CommentsChanged)
            .await;
        Ok(())
    }

    /// All comments on a listing, oldest first.
    pub async fn list_comments(&self, listing_id: &str) -> Result<Vec<Comment>> {
        sqlx::query_as::<_, CommentRow>(
            "SELECT * FROM comments WHERE listing_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(listing_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Comment::try_from)
        .collect()
    }

    /// Live thread: the full ordered list now, and again after every change.
    pub async fn stream_comments(&self, listing_id: &str) -> Result<CommentFeed> {
        let subscription = self.events.subscribe(listing_id).await;

        let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM listings WHERE id = ?")
            .bind(listing_id)
            .fetch_one(&self.pool)
            .await?;
        if exists == 0 {
            drop(subscription);
            self.events.release(listing_id).await;
            return Err(gone(listing_id));
        }

        Ok(CommentFeed {
            store: self.clone(),
            listing_id: listing_id.to_string(),
            subscription,
            pending: true,
        })
    }
}

pub struct CommentFeed {
    store: CommentStore,
    listing_id: String,
    subscription: Subscription,
    pending: bool,
}

#[async_trait]
impl LiveFeed for CommentFeed {
    type Item = Vec<Comment>;

    async fn next(&mut self) -> Option<Result<Vec<Comment>>> {
        loop {
            if self.pending {
                let snapshot = self.store.list_comments(&self.listing_id).await;
                self.pending = false;
                return Some(snapshot);
            }
            match self.subscription.recv().await? {
                ListingEvent::CommentsChanged | ListingEvent::Resync => self.pending = true,
                _ => {}
            }
        }
    }
}
