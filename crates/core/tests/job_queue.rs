//! Integration tests against a live Postgres instance. Skipped when
//! `DATABASE_URL` is unset, following the same env-gated pattern
//! `WorkerConfig::from_env` uses for required configuration (SPEC_FULL §8).

use core::job_queue::JobQueue;
use core::models::{JobParams, JobStatus, NewSource, SourceType, UpdateFrequency};
use core::store::Store;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect to test database");
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    Some(pool)
}

async fn seed_source(store: &Store, name: &str) -> uuid::Uuid {
    let source = store
        .create_source(NewSource {
            name: name.to_string(),
            base_url: format!("https://{name}.example.com/"),
            source_type: SourceType::Guide,
            crawl_depth: 2,
            update_frequency: UpdateFrequency::Daily,
            selectors: HashMap::new(),
            allow_patterns: vec![],
            ignore_patterns: vec![],
        })
        .await
        .expect("create source");
    source.id
}

fn params_for(source_url: &str, priority: u8) -> JobParams {
    JobParams {
        priority,
        source_url: source_url.to_string(),
        crawl_depth: 2,
        selectors: HashMap::new(),
        allow_patterns: vec![],
        ignore_patterns: vec![],
        include_subdomains: false,
        force_refresh: false,
    }
}

#[tokio::test]
async fn duplicate_enqueue_is_rejected() {
    let Some(pool) = test_pool().await else { return };
    let store = Store::new(pool.clone());
    let queue = JobQueue::new(pool);

    let source_id = seed_source(&store, "dup").await;
    let params = params_for("https://dup.example.com/", 5);

    let first = queue.enqueue(source_id, &params, 3600).await.unwrap();
    let second = queue.enqueue(source_id, &params, 3600).await;

    match second {
        Err(core::WorkerError::DuplicateJob { existing_job_id, .. }) => {
            assert_eq!(existing_job_id, first);
        }
        other => panic!("expected DuplicateJob, got {other:?}"),
    }
}

#[tokio::test]
async fn lease_returns_priority_order() {
    let Some(pool) = test_pool().await else { return };
    let store = Store::new(pool.clone());
    let queue = JobQueue::new(pool);

    let s5 = seed_source(&store, "prio5").await;
    let s1 = seed_source(&store, "prio1").await;
    let s3 = seed_source(&store, "prio3").await;

    queue.enqueue(s5, &params_for("https://prio5.example.com/", 5), 3600).await.unwrap();
    queue.enqueue(s1, &params_for("https://prio1.example.com/", 1), 3600).await.unwrap();
    queue.enqueue(s3, &params_for("https://prio3.example.com/", 3), 3600).await.unwrap();

    let j1 = queue.lease("w1").await.unwrap().expect("job");
    let j2 = queue.lease("w1").await.unwrap().expect("job");
    let j3 = queue.lease("w1").await.unwrap().expect("job");

    assert_eq!(
        vec![j1.priority(), j2.priority(), j3.priority()],
        vec![1, 3, 5]
    );
}

#[tokio::test]
async fn expired_lease_is_reclaimed_and_ownership_lost() {
    let Some(pool) = test_pool().await else { return };
    let store = Store::new(pool.clone());
    let queue = JobQueue::new(pool);

    let source_id = seed_source(&store, "expire").await;
    let params = params_for("https://expire.example.com/", 5);
    let job_id = queue.enqueue(source_id, &params, 1).await.unwrap();

    let leased = queue.lease("w1").await.unwrap().expect("job");
    assert_eq!(leased.id, job_id);
    assert_eq!(leased.status, JobStatus::InProgress);

    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    let released = queue.release_expired(0).await.unwrap();
    assert_eq!(released, 1);

    let reloaded = queue.get(job_id).await.unwrap();
    assert_eq!(reloaded.status, JobStatus::Pending);
    assert!(reloaded.locked_by.is_none());

    let relaunched = queue.lease("w2").await.unwrap().expect("job");
    assert_eq!(relaunched.id, job_id);

    let result = core::models::CrawlResultSummary {
        success: true,
        pages_scraped: 1,
        scraped_urls: vec![],
        failed_urls: vec![],
        error: None,
    };
    let complete = queue.complete(job_id, "w1", &result).await;
    assert!(matches!(complete, Err(core::WorkerError::NotOwner { .. })));
}
