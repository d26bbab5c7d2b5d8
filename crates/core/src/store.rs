//! Persistence for Sources, ScrapedUrls, and Entries (the parts of the Store
//! that are not job-lease bookkeeping; see `job_queue` for that half).
//! See SPEC_FULL §3, Invariant E1.

use crate::models::{Entry, NewEntry, NewSource, Source, SourceStatus};
use crate::{Result, WorkerError};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_source(&self, new_source: NewSource) -> Result<Source> {
        let selectors = serde_json::to_value(&new_source.selectors)?;
        let source: Source = sqlx::query_as(
            r#"
            INSERT INTO sources (name, base_url, source_type, crawl_depth, update_frequency,
                                  selectors, allow_patterns, ignore_patterns)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, name, base_url, source_type, crawl_depth, update_frequency,
                      selectors, allow_patterns, ignore_patterns, status, last_scraped_at,
                      created_at, updated_at
            "#,
        )
        .bind(&new_source.name)
        .bind(&new_source.base_url)
        .bind(new_source.source_type)
        .bind(new_source.crawl_depth)
        .bind(new_source.update_frequency)
        .bind(&selectors)
        .bind(&new_source.allow_patterns)
        .bind(&new_source.ignore_patterns)
        .fetch_one(&self.pool)
        .await?;
        Ok(source)
    }

    pub async fn get_source(&self, source_id: Uuid) -> Result<Source> {
        sqlx::query_as(
            r#"
            SELECT id, name, base_url, source_type, crawl_depth, update_frequency,
                   selectors, allow_patterns, ignore_patterns, status, last_scraped_at,
                   created_at, updated_at
            FROM sources WHERE id = $1
            "#,
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(WorkerError::SourceNotFound(source_id))
    }

    pub async fn list_sources(&self) -> Result<Vec<Source>> {
        let sources: Vec<Source> = sqlx::query_as(
            r#"
            SELECT id, name, base_url, source_type, crawl_depth, update_frequency,
                   selectors, allow_patterns, ignore_patterns, status, last_scraped_at,
                   created_at, updated_at
            FROM sources ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(sources)
    }

    /// Sources that are `active` and have never produced an Entry — the
    /// Bootstrap Scheduler's (C8) enqueue candidates.
    pub async fn unscraped_active_sources(&self) -> Result<Vec<Source>> {
        let sources: Vec<Source> = sqlx::query_as(
            r#"
            SELECT s.id, s.name, s.base_url, s.source_type, s.crawl_depth, s.update_frequency,
                   s.selectors, s.allow_patterns, s.ignore_patterns, s.status, s.last_scraped_at,
                   s.created_at, s.updated_at
            FROM sources s
            WHERE s.status = 'active'
              AND NOT EXISTS (SELECT 1 FROM entries e WHERE e.source_id = s.id)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(sources)
    }

    pub async fn set_source_status(&self, source_id: Uuid, status: SourceStatus) -> Result<()> {
        sqlx::query("UPDATE sources SET status = $2, updated_at = now() WHERE id = $1")
            .bind(source_id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Records the crawl attempt's completion time. Does not touch `status`;
    /// the caller sets that separately via `set_source_status` once it knows
    /// whether the crawl succeeded.
    pub async fn mark_source_scraped(&self, source_id: Uuid, when: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE sources SET last_scraped_at = $2, updated_at = now() WHERE id = $1")
            .bind(source_id)
            .bind(when)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Returns the subset of `urls` (already normalized) previously recorded
    /// for `source_id`. Used by the Crawl Engine to build its `seen` set.
    pub async fn existing_scraped_urls(&self, source_id: Uuid) -> Result<HashSet<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT normalized_url FROM scraped_urls WHERE source_id = $1")
                .bind(source_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(u,)| u).collect())
    }

    /// Records that `normalized_url` was persisted for `source_id`, creating
    /// the row on first sight and bumping `last_seen_at` on re-crawl.
    pub async fn record_scraped_url(&self, source_id: Uuid, normalized_url: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scraped_urls (source_id, normalized_url)
            VALUES ($1, $2)
            ON CONFLICT (source_id, normalized_url)
            DO UPDATE SET last_seen_at = now()
            "#,
        )
        .bind(source_id)
        .bind(normalized_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Upserts an Entry by `content_hash` (Invariant E1 / property P6): a
    /// hash collision updates `url`, `title`, `last_updated_at` on the
    /// existing row rather than inserting a new one.
    pub async fn upsert_entry(&self, entry: NewEntry) -> Result<Entry> {
        let stored: Entry = sqlx::query_as(
            r#"
            INSERT INTO entries (source_id, url, title, content, content_hash, section_type)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (content_hash)
            DO UPDATE SET url = EXCLUDED.url, title = EXCLUDED.title, last_updated_at = now()
            RETURNING id, source_id, url, title, content, content_hash, extracted_at,
                      last_updated_at, section_type
            "#,
        )
        .bind(entry.source_id)
        .bind(&entry.url)
        .bind(&entry.title)
        .bind(&entry.content)
        .bind(&entry.content_hash)
        .bind(entry.section_type)
        .fetch_one(&self.pool)
        .await?;
        Ok(stored)
    }

    pub async fn entry_count_for_source(&self, source_id: Uuid) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM entries WHERE source_id = $1")
                .bind(source_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0)
    }
}
