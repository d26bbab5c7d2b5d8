//! Atomic lease operations over `jobs` rows. See SPEC_FULL §4.1.
//!
//! Every operation here is a single transaction; callers never observe a
//! partial write. `lease` is the only operation that depends on
//! `SELECT ... FOR UPDATE SKIP LOCKED` to give concurrent workers disjoint
//! candidates (property P2).

use crate::models::{CrawlResultSummary, Job, JobParams, JobStatus, QueueStats};
use crate::{WorkerError, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub source_id: Option<Uuid>,
    pub status: Option<JobStatus>,
}

#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueues a new job for `source_id`. Fails with `SourceNotFound` if the
    /// source is absent, or `DuplicateJob` if a non-terminal job for the
    /// source already exists (Invariant Q1).
    pub async fn enqueue(
        &self,
        source_id: Uuid,
        params: &JobParams,
        lock_timeout_seconds: i64,
    ) -> Result<Uuid> {
        let mut tx = self.pool.begin().await?;

        let source_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM sources WHERE id = $1)")
                .bind(source_id)
                .fetch_one(&mut *tx)
                .await?;
        if !source_exists {
            return Err(WorkerError::SourceNotFound(source_id));
        }

        let existing: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM jobs WHERE source_id = $1 AND status IN ('pending', 'in_progress')",
        )
        .bind(source_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(existing_job_id) = existing {
            return Err(WorkerError::DuplicateJob {
                source_id,
                existing_job_id,
            });
        }

        let job_data = serde_json::to_value(params)?;

        let job_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (source_id, status, job_data, lock_timeout_seconds)
            VALUES ($1, 'pending', $2, $3)
            RETURNING id
            "#,
        )
        .bind(source_id)
        .bind(&job_data)
        .bind(lock_timeout_seconds)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(job_id)
    }

    /// Atomically leases the highest-priority pending job, breaking ties by
    /// `created_at` (property P3). Returns `None` if the queue is empty.
    pub async fn lease(&self, worker_id: &str) -> Result<Option<Job>> {
        let mut tx = self.pool.begin().await?;

        let candidate: Option<Job> = sqlx::query_as(
            r#"
            SELECT id, source_id, status, job_data, locked_by, locked_at,
                   lock_timeout_seconds, created_at, started_at, completed_at,
                   pages_scraped, error_message, result_data
            FROM jobs
            WHERE status = 'pending'
            ORDER BY (job_data->>'priority')::int ASC, created_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(candidate) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };

        let leased: Job = sqlx::query_as(
            r#"
            UPDATE jobs
            SET status = 'in_progress', locked_by = $2, locked_at = now(), started_at = now()
            WHERE id = $1
            RETURNING id, source_id, status, job_data, locked_by, locked_at,
                      lock_timeout_seconds, created_at, started_at, completed_at,
                      pages_scraped, error_message, result_data
            "#,
        )
        .bind(candidate.id)
        .bind(worker_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(leased))
    }

    /// Extends a lease. Fails with `NotOwner` if `worker_id` does not hold
    /// the lock or the job is no longer `in_progress`.
    pub async fn heartbeat(&self, job_id: Uuid, worker_id: &str) -> Result<()> {
        let updated: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE jobs
            SET locked_at = now()
            WHERE id = $1 AND locked_by = $2 AND status = 'in_progress'
            RETURNING id
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        if updated.is_some() {
            Ok(())
        } else {
            self.ensure_exists(job_id).await?;
            Err(WorkerError::NotOwner {
                job_id,
                worker_id: worker_id.to_string(),
            })
        }
    }

    /// Marks a job completed. Requires ownership.
    pub async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: &CrawlResultSummary,
    ) -> Result<()> {
        let result_data = serde_json::to_value(result)?;

        let updated: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE jobs
            SET status = 'completed',
                completed_at = now(),
                pages_scraped = $3,
                result_data = $4,
                locked_by = NULL,
                locked_at = NULL
            WHERE id = $1 AND locked_by = $2 AND status = 'in_progress'
            RETURNING id
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(result.pages_scraped)
        .bind(&result_data)
        .fetch_optional(&self.pool)
        .await?;

        if updated.is_some() {
            Ok(())
        } else {
            self.ensure_exists(job_id).await?;
            Err(WorkerError::NotOwner {
                job_id,
                worker_id: worker_id.to_string(),
            })
        }
    }

    /// Marks a job failed. Requires ownership *unless* the lock has already
    /// expired, in which case any worker may fail it (property P4).
    pub async fn fail(&self, job_id: Uuid, worker_id: &str, error: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let job: Job = sqlx::query_as(
            r#"
            SELECT id, source_id, status, job_data, locked_by, locked_at,
                   lock_timeout_seconds, created_at, started_at, completed_at,
                   pages_scraped, error_message, result_data
            FROM jobs WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(WorkerError::JobNotFound(job_id))?;

        let owns = job.locked_by.as_deref() == Some(worker_id);
        let expired = job.is_lock_expired(Utc::now());
        if job.status != JobStatus::InProgress || (!owns && !expired) {
            return Err(WorkerError::NotOwner {
                job_id,
                worker_id: worker_id.to_string(),
            });
        }

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', completed_at = now(), error_message = $2,
                locked_by = NULL, locked_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Reverts `in_progress` jobs whose lock has expired back to `pending`.
    /// Idempotent: returns 0 once nothing is left to reclaim.
    pub async fn release_expired(&self, max_age_minutes: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', locked_by = NULL, locked_at = NULL, started_at = NULL
            WHERE status = 'in_progress'
              AND now() - locked_at > (GREATEST($1::bigint, lock_timeout_seconds) * interval '1 second')
            "#,
        )
        .bind(max_age_minutes.max(0) * 60)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Job> {
        sqlx::query_as(
            r#"
            SELECT id, source_id, status, job_data, locked_by, locked_at,
                   lock_timeout_seconds, created_at, started_at, completed_at,
                   pages_scraped, error_message, result_data
            FROM jobs WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(WorkerError::JobNotFound(job_id))
    }

    pub async fn list(&self, filter: &JobFilter, limit: i64) -> Result<Vec<Job>> {
        let jobs: Vec<Job> = sqlx::query_as(
            r#"
            SELECT id, source_id, status, job_data, locked_by, locked_at,
                   lock_timeout_seconds, created_at, started_at, completed_at,
                   pages_scraped, error_message, result_data
            FROM jobs
            WHERE ($1::uuid IS NULL OR source_id = $1)
              AND ($2::job_status IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(filter.source_id)
        .bind(filter.status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let row: (i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending'),
                COUNT(*) FILTER (WHERE status = 'in_progress'),
                COUNT(*) FILTER (WHERE status = 'completed'),
                COUNT(*) FILTER (WHERE status = 'failed'),
                COUNT(*) FILTER (WHERE status = 'cancelled')
            FROM jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            pending: row.0,
            in_progress: row.1,
            completed: row.2,
            failed: row.3,
            cancelled: row.4,
        })
    }

    /// Deletes terminal jobs older than `older_than_days`. The single place
    /// retention is enforced (see SPEC_FULL §9 Open Question on retention).
    pub async fn cleanup_completed(&self, older_than_days: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN ('completed', 'failed', 'cancelled')
              AND completed_at < now() - ($1::bigint * interval '1 day')
            "#,
        )
        .bind(older_than_days.max(0))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Sets a job `failed` with a cancellation message, waiving the
    /// ownership check (SPEC_FULL §6 `cancel_job`).
    pub async fn cancel(&self, job_id: Uuid) -> Result<()> {
        let updated: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE jobs
            SET status = 'failed', completed_at = now(),
                error_message = 'cancelled', locked_by = NULL, locked_at = NULL
            WHERE id = $1 AND status IN ('pending', 'in_progress')
            RETURNING id
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        if updated.is_some() {
            Ok(())
        } else {
            self.ensure_exists(job_id).await.map(|_| ())
        }
    }

    async fn ensure_exists(&self, job_id: Uuid) -> Result<()> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM jobs WHERE id = $1)")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await?;
        if exists {
            Ok(())
        } else {
            Err(WorkerError::JobNotFound(job_id))
        }
    }
}

/// Whether `locked_at + lock_timeout_seconds < now`. Exposed for tests that
/// want to reason about expiry without round-tripping through the database.
pub fn lock_expired_at(locked_at: DateTime<Utc>, lock_timeout_seconds: i64, now: DateTime<Utc>) -> bool {
    now - locked_at > chrono::Duration::seconds(lock_timeout_seconds)
}
