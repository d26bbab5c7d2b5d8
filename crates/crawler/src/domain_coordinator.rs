//! Per-process registry of normalized host -> currently-scraping job set.
//! See SPEC_FULL §4.2, Invariant D1.
//!
//! This is an explicitly-constructed value owned by the worker process and
//! passed into the Crawl Engine by reference (SPEC_FULL §9 REDESIGN FLAGS)
//! — never a global/static singleton. Cross-process host serialization is
//! not attempted here; it relies entirely on the Job Queue's one-active-job-
//! per-source invariant (SPEC_FULL §9 Open Questions).

use core::url_normalizer::extract_host;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct DomainCoordinator {
    busy: Mutex<HashMap<String, HashSet<Uuid>>>,
}

impl DomainCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_busy(&self, url: &str, job_id: Uuid) {
        let host = match extract_host(url) {
            Ok(h) => h,
            Err(_) => return,
        };
        let mut busy = self.busy.lock().expect("domain coordinator mutex poisoned");
        busy.entry(host).or_default().insert(job_id);
    }

    pub fn is_busy(&self, url: &str) -> bool {
        let Ok(host) = extract_host(url) else {
            return false;
        };
        let busy = self.busy.lock().expect("domain coordinator mutex poisoned");
        busy.get(&host).is_some_and(|set| !set.is_empty())
    }

    pub fn release(&self, url: &str, job_id: Uuid) {
        let Ok(host) = extract_host(url) else {
            return;
        };
        let mut busy = self.busy.lock().expect("domain coordinator mutex poisoned");
        if let Some(set) = busy.get_mut(&host) {
            set.remove(&job_id);
            if set.is_empty() {
                busy.remove(&host);
            }
        }
    }

    /// Polls at 1s intervals until the host is free or `timeout` elapses.
    /// Returns `true` if it became available.
    pub async fn wait_for_availability(&self, url: &str, timeout: Duration) -> bool {
        if !self.is_busy(url) {
            return true;
        }
        let deadline = tokio::time::Instant::now() + timeout;
        while self.is_busy(url) {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_tracks_per_host_not_per_url() {
        let coord = DomainCoordinator::new();
        let job = Uuid::new_v4();
        assert!(!coord.is_busy("https://docs.example.com/a"));

        coord.mark_busy("https://docs.example.com/a", job);
        assert!(coord.is_busy("https://docs.example.com/b"));

        coord.release("https://docs.example.com/a", job);
        assert!(!coord.is_busy("https://docs.example.com/b"));
    }

    #[test]
    fn multiple_jobs_on_same_host_keep_it_busy_until_all_release() {
        let coord = DomainCoordinator::new();
        let j1 = Uuid::new_v4();
        let j2 = Uuid::new_v4();

        coord.mark_busy("https://docs.example.com/", j1);
        coord.mark_busy("https://docs.example.com/", j2);
        coord.release("https://docs.example.com/", j1);
        assert!(coord.is_busy("https://docs.example.com/"));

        coord.release("https://docs.example.com/", j2);
        assert!(!coord.is_busy("https://docs.example.com/"));
    }

    #[tokio::test]
    async fn wait_for_availability_returns_once_released() {
        let coord = std::sync::Arc::new(DomainCoordinator::new());
        let job = Uuid::new_v4();
        coord.mark_busy("https://docs.example.com/", job);

        let waiter = {
            let coord = coord.clone();
            tokio::spawn(async move {
                coord
                    .wait_for_availability("https://docs.example.com/", Duration::from_secs(5))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        coord.release("https://docs.example.com/", job);

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn wait_for_availability_times_out() {
        let coord = DomainCoordinator::new();
        let job = Uuid::new_v4();
        coord.mark_busy("https://docs.example.com/", job);

        let became_available = coord
            .wait_for_availability("https://docs.example.com/", Duration::from_millis(50))
            .await;
        assert!(!became_available);
    }
}
