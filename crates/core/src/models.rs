use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[sqlx(type_name = "source_type", rename_all = "lowercase")]
pub enum SourceType {
    Api,
    Guide,
    Reference,
    Tutorial,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[sqlx(type_name = "update_frequency", rename_all = "lowercase")]
pub enum UpdateFrequency {
    Hourly,
    Daily,
    Weekly,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[sqlx(type_name = "source_status", rename_all = "snake_case")]
pub enum SourceStatus {
    Active,
    InProgress,
    Completed,
    Failed,
    Paused,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[sqlx(type_name = "section_type", rename_all = "lowercase")]
pub enum SectionType {
    Content,
    Code,
    Example,
    Api,
}

/// A registered documentation site. See SPEC_FULL §3.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    pub base_url: String,
    pub source_type: SourceType,
    pub crawl_depth: i32,
    pub update_frequency: UpdateFrequency,
    /// JSON object, name -> CSS selector. `content` is the honored key.
    pub selectors: serde_json::Value,
    pub allow_patterns: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub status: SourceStatus,
    pub last_scraped_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSource {
    pub name: String,
    pub base_url: String,
    pub source_type: SourceType,
    pub crawl_depth: i32,
    pub update_frequency: UpdateFrequency,
    pub selectors: HashMap<String, String>,
    pub allow_patterns: Vec<String>,
    pub ignore_patterns: Vec<String>,
}

impl Source {
    pub fn selectors_map(&self) -> HashMap<String, String> {
        serde_json::from_value(self.selectors.clone()).unwrap_or_default()
    }
}

/// The fixed-schema record stored inside `Job.job_data`, replacing the
/// duck-typed dictionary payload of the original implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobParams {
    pub priority: u8,
    pub source_url: String,
    pub crawl_depth: u32,
    #[serde(default)]
    pub selectors: HashMap<String, String>,
    #[serde(default)]
    pub allow_patterns: Vec<String>,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(default)]
    pub include_subdomains: bool,
    #[serde(default)]
    pub force_refresh: bool,
}

impl JobParams {
    pub fn from_source(source: &Source, force_refresh: bool) -> Self {
        JobParams {
            priority: 5,
            source_url: source.base_url.clone(),
            crawl_depth: source.crawl_depth.max(0) as u32,
            selectors: source.selectors_map(),
            allow_patterns: source.allow_patterns.clone(),
            ignore_patterns: source.ignore_patterns.clone(),
            include_subdomains: false,
            force_refresh,
        }
    }
}

/// One scraping task for a `Source`. See SPEC_FULL §3 / §4.1 for the
/// invariants Q1-Q3 this type's transitions must uphold.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    pub id: Uuid,
    pub source_id: Uuid,
    pub status: JobStatus,
    pub job_data: serde_json::Value,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub lock_timeout_seconds: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub pages_scraped: i32,
    pub error_message: Option<String>,
    pub result_data: Option<serde_json::Value>,
}

impl Job {
    pub fn params(&self) -> serde_json::Result<JobParams> {
        serde_json::from_value(self.job_data.clone())
    }

    pub fn priority(&self) -> u8 {
        self.job_data
            .get("priority")
            .and_then(|v| v.as_u64())
            .map(|v| v as u8)
            .unwrap_or(5)
    }

    /// Whether the owning worker's lock has expired, per `locked_at +
    /// lock_timeout_seconds < now`.
    pub fn is_lock_expired(&self, now: DateTime<Utc>) -> bool {
        match self.locked_at {
            Some(locked_at) => {
                now - locked_at > chrono::Duration::seconds(self.lock_timeout_seconds)
            }
            None => false,
        }
    }
}

/// Deduplication index of URLs ever persisted for a source.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScrapedUrl {
    pub source_id: Uuid,
    pub normalized_url: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// One stored page's extracted content. `content_hash` is globally unique
/// across all entries (Invariant E1); upserts match on hash.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Entry {
    pub id: Uuid,
    pub source_id: Uuid,
    pub url: String,
    pub title: String,
    pub content: String,
    pub content_hash: String,
    pub extracted_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub section_type: SectionType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEntry {
    pub source_id: Uuid,
    pub url: String,
    pub title: String,
    pub content: String,
    pub content_hash: String,
    pub section_type: SectionType,
}

/// Summary of a completed or failed crawl run, persisted as `Job.result_data`
/// and returned to the tool-call layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlResultSummary {
    pub success: bool,
    pub pages_scraped: i32,
    pub scraped_urls: Vec<String>,
    pub failed_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}
