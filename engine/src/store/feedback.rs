/// Feedback memory
///
/// Ratings of past routing decisions. Each record keeps the embedding of
/// its query so later requests can pull the closest well-rated examples
/// into the planning prompt.
use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::llm::embedding::{cosine_similarity, EmbeddingProvider};

pub const MIN_RATING: i64 = 1;
pub const MAX_RATING: i64 = 5;

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackRecord {
    pub id: i64,
    pub timestamp: i64,
    pub query: String,
    pub handler: String,
    pub tool: String,
    pub rating: i64,
}

/// A stored record and its similarity to the lookup query
#[derive(Debug, Clone, Serialize)]
pub struct SimilarFeedback {
    pub record: FeedbackRecord,
    pub similarity: f32,
}

pub struct FeedbackRepository {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl FeedbackRepository {
    pub fn new(
        pool: SqlitePool,
        write_lock: Arc<Mutex<()>>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            pool,
            write_lock,
            embedder,
        }
    }

    /// Append a rating; out-of-range ratings are clamped to 1..=5
    pub async fn record_feedback(
        &self,
        query: &str,
        handler: &str,
        tool: &str,
        rating: i64,
    ) -> Result<FeedbackRecord> {
        let rating = rating.clamp(MIN_RATING, MAX_RATING);
        let embedding = self
            .embedder
            .embed(query)
            .await
            .with_context(|| format!("Failed to embed feedback query via {}", self.embedder.name()))?;
        let embedding_json = serde_json::to_string(&embedding)?;
        let timestamp = chrono::Utc::now().timestamp();

        let id = {
            let _guard = self.write_lock.lock().await;
            sqlx::query(
                "INSERT INTO feedback (timestamp, query, handler, tool, rating, embedding) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(timestamp)
            .bind(query)
            .bind(handler)
            .bind(tool)
            .bind(rating)
            .bind(&embedding_json)
            .execute(&self.pool)
            .await
            .context("Failed to write feedback")?
            .last_insert_rowid()
        };

        tracing::info!("Feedback #{}: {}.{} rated {}", id, handler, tool, rating);

        Ok(FeedbackRecord {
            id,
            timestamp,
            query: query.to_string(),
            handler: handler.to_string(),
            tool: tool.to_string(),
            rating,
        })
    }

    /// Top `k` records rated at least `min_rating`
    ///
    /// Ordered by similarity to `query`, then by rating, then newest first.
    /// Records with no similarity at all are left out.
    pub async fn find_similar(
        &self,
        query: &str,
        k: usize,
        min_rating: i64,
    ) -> Result<Vec<SimilarFeedback>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let target = self
            .embedder
            .embed(query)
            .await
            .with_context(|| format!("Failed to embed query via {}", self.embedder.name()))?;

        let rows = sqlx::query(
            "SELECT id, timestamp, query, handler, tool, rating, embedding \
             FROM feedback WHERE rating >= ?",
        )
        .bind(min_rating)
        .fetch_all(&self.pool)
        .await
        .context("Failed to read feedback")?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let embedding_json: String = row.try_get("embedding")?;
            let embedding: Vec<f32> = match serde_json::from_str(&embedding_json) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!("Skipping feedback row with bad embedding: {}", e);
                    continue;
                }
            };
            let similarity = cosine_similarity(&target, &embedding);
            if similarity <= 0.0 {
                continue;
            }
            scored.push(SimilarFeedback {
                record: FeedbackRecord {
                    id: row.try_get("id")?,
                    timestamp: row.try_get("timestamp")?,
                    query: row.try_get("query")?,
                    handler: row.try_get("handler")?,
                    tool: row.try_get("tool")?,
                    rating: row.try_get("rating")?,
                },
                similarity,
            });
        }

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then(b.record.rating.cmp(&a.record.rating))
                .then(b.record.id.cmp(&a.record.id))
        });
        scored.truncate(k);
        Ok(scored)
    }
}
