//! Breadth-first crawl of a single source. See SPEC_FULL §4.5.
//!
//! One call to `crawl` drives one job from its seed URL to completion,
//! yielding a `CrawlResultSummary` the caller persists on the job. The
//! engine holds no state across calls — everything it needs is passed in or
//! read from the `Store`.

use crate::browser_session::BrowserSession;
use crate::domain_coordinator::DomainCoordinator;
use crate::error::CrawlError;
use core::models::{JobParams, NewEntry, SectionType};
use core::url_normalizer;
use core::{Store, WorkerError};
use rand::Rng;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

const SAFETY_CAP: usize = 1000;
const MIN_CONTENT_LEN: usize = 20;
const WALL_CLOCK_CEILING: Duration = Duration::from_secs(3600);

/// Hosts that are never worth crawling regardless of scope/allow rules:
/// chat widgets, social share links, and common non-documentation chrome.
const BUILTIN_IGNORED_HOSTS: &[&str] = &[
    "twitter.com",
    "x.com",
    "facebook.com",
    "linkedin.com",
    "discord.com",
    "discord.gg",
    "slack.com",
];

/// URL path patterns that are never worth crawling regardless of
/// scope/allow rules: executables and old versioned-doc trees.
fn builtin_ignore_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r"\.exe$").expect("valid builtin pattern"),
            Regex::new(r"/docs/v\d+\.\d+/").expect("valid builtin pattern"),
        ]
    })
}

pub struct CrawlOutcome {
    pub pages_scraped: i32,
    pub scraped_urls: Vec<String>,
    pub failed_urls: Vec<String>,
}

pub struct CrawlEngine<'a> {
    store: &'a Store,
    coordinator: &'a DomainCoordinator,
    max_pages: usize,
}

impl<'a> CrawlEngine<'a> {
    pub fn new(store: &'a Store, coordinator: &'a DomainCoordinator, max_pages: usize) -> Self {
        Self {
            store,
            coordinator,
            max_pages: max_pages.min(SAFETY_CAP),
        }
    }

    pub async fn crawl(
        &self,
        job_id: Uuid,
        source_id: Uuid,
        params: &JobParams,
        browser: &mut BrowserSession,
    ) -> Result<CrawlOutcome, WorkerError> {
        let base_url = Url::parse(&params.source_url)
            .map_err(|e| WorkerError::InvalidUrl(format!("{}: {e}", params.source_url)))?;
        let base_domain = base_url
            .host_str()
            .ok_or_else(|| WorkerError::InvalidUrl(format!("{}: missing host", params.source_url)))?
            .to_string();

        let allow_patterns = compile_patterns(&params.allow_patterns);
        let ignore_patterns = compile_patterns(&params.ignore_patterns);
        let content_selector = params.selectors.get("content").map(|s| s.as_str());

        let mut seen: HashSet<String> = if params.force_refresh {
            HashSet::new()
        } else {
            self.store.existing_scraped_urls(source_id).await?
        };

        let mut crawled: HashSet<String> = HashSet::new();
        let mut to_crawl: VecDeque<(String, u32)> = VecDeque::new();
        to_crawl.push_back((params.source_url.clone(), 0));

        let mut scraped_urls = Vec::new();
        let mut failed_urls = Vec::new();

        self.coordinator.mark_busy(&params.source_url, job_id);
        let result = self
            .crawl_loop(
                job_id,
                source_id,
                params,
                &base_domain,
                &allow_patterns,
                &ignore_patterns,
                content_selector,
                browser,
                &mut to_crawl,
                &mut crawled,
                &mut seen,
                &mut scraped_urls,
                &mut failed_urls,
            )
            .await;
        self.coordinator.release(&params.source_url, job_id);
        result?;

        Ok(CrawlOutcome {
            pages_scraped: scraped_urls.len() as i32,
            scraped_urls,
            failed_urls,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn crawl_loop(
        &self,
        job_id: Uuid,
        source_id: Uuid,
        params: &JobParams,
        base_domain: &str,
        allow_patterns: &[Regex],
        ignore_patterns: &[Regex],
        content_selector: Option<&str>,
        browser: &mut BrowserSession,
        to_crawl: &mut VecDeque<(String, u32)>,
        crawled: &mut HashSet<String>,
        seen: &mut HashSet<String>,
        scraped_urls: &mut Vec<String>,
        failed_urls: &mut Vec<String>,
    ) -> Result<(), WorkerError> {
        let started = tokio::time::Instant::now();

        while let Some((current_url, depth)) = to_crawl.pop_front() {
            if started.elapsed() >= WALL_CLOCK_CEILING {
                return Err(WorkerError::Io(std::io::Error::other(format!(
                    "crawl exceeded the {WALL_CLOCK_CEILING:?} wall-clock ceiling"
                ))));
            }
            if scraped_urls.len() >= self.max_pages {
                warn!(job_id = %job_id, cap = self.max_pages, "crawl safety cap reached");
                break;
            }
            if crawled.contains(&current_url) || depth > params.crawl_depth {
                continue;
            }
            if !should_crawl(
                &current_url,
                base_domain,
                params.include_subdomains,
                allow_patterns,
                ignore_patterns,
            ) {
                continue;
            }

            let normalized = match url_normalizer::normalize(&current_url) {
                Ok(n) => n,
                Err(_) => {
                    crawled.insert(current_url);
                    continue;
                }
            };

            if seen.contains(&normalized) {
                crawled.insert(current_url);
                continue;
            }

            crawled.insert(current_url.clone());

            match browser.fetch(&current_url, content_selector).await {
                Ok(page) => {
                    let text_len = strip_tags_len(&page.content);
                    if text_len < MIN_CONTENT_LEN {
                        debug!(url = %current_url, "content below minimum length, skipping store");
                    } else {
                        let content_hash = hash_content(&page.content);
                        self.store
                            .upsert_entry(NewEntry {
                                source_id,
                                url: current_url.clone(),
                                title: page.title,
                                content: page.content,
                                content_hash,
                                section_type: SectionType::Content,
                            })
                            .await?;
                        self.store.record_scraped_url(source_id, &normalized).await?;
                        seen.insert(normalized);
                        scraped_urls.push(current_url.clone());
                    }

                    for link in page.links {
                        if !crawled.contains(&link)
                            && !to_crawl.iter().any(|(u, d)| u == &link && *d == depth + 1)
                        {
                            to_crawl.push_back((link, depth + 1));
                        }
                    }

                    let delay_ms = rand::rng().random_range(500..=1500);
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Err(CrawlError::Fetch { url, reason }) => {
                    warn!(url = %url, reason = %reason, "fetch failed");
                    failed_urls.push(url);
                }
                Err(CrawlError::Extract { url, reason }) => {
                    warn!(url = %url, reason = %reason, "extract failed");
                    failed_urls.push(url);
                }
                Err(CrawlError::WorkerFatal(reason)) => {
                    return Err(WorkerError::Io(std::io::Error::other(reason)));
                }
            }
        }

        info!(
            job_id = %job_id,
            scraped = scraped_urls.len(),
            failed = failed_urls.len(),
            "crawl loop finished"
        );
        Ok(())
    }
}

fn compile_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern = %p, error = %e, "ignoring invalid pattern");
                None
            }
        })
        .collect()
}

fn should_crawl(
    url: &str,
    base_domain: &str,
    include_subdomains: bool,
    allow_patterns: &[Regex],
    ignore_patterns: &[Regex],
) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };

    if BUILTIN_IGNORED_HOSTS.iter().any(|h| host == *h || host.ends_with(&format!(".{h}"))) {
        return false;
    }

    if builtin_ignore_patterns().iter().any(|re| re.is_match(url)) {
        return false;
    }

    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }

    if include_subdomains {
        if !host.ends_with(base_domain) {
            return false;
        }
    } else if host != base_domain {
        return false;
    }

    if ignore_patterns.iter().any(|re| re.is_match(url)) {
        return false;
    }

    if !allow_patterns.is_empty() {
        return allow_patterns.iter().any(|re| re.is_match(url));
    }

    true
}

fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Crude tag-stripped length check used only to decide whether a fetched
/// page is substantial enough to store; not used as stored content.
fn strip_tags_len(html: &str) -> usize {
    let mut len = 0;
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag && !c.is_whitespace() => len += 1,
            _ => {}
        }
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_cross_domain_without_subdomains() {
        assert!(!should_crawl(
            "https://other.com/page",
            "docs.example.com",
            false,
            &[],
            &[]
        ));
        assert!(should_crawl(
            "https://docs.example.com/page",
            "docs.example.com",
            false,
            &[],
            &[]
        ));
    }

    #[test]
    fn include_subdomains_allows_suffix_match() {
        assert!(should_crawl(
            "https://api.docs.example.com/page",
            "docs.example.com",
            true,
            &[],
            &[]
        ));
    }

    #[test]
    fn ignore_patterns_take_priority_over_allow() {
        let allow = compile_patterns(&["/guide/.*".to_string()]);
        let ignore = compile_patterns(&["/guide/archived".to_string()]);
        assert!(!should_crawl(
            "https://docs.example.com/guide/archived/old",
            "docs.example.com",
            false,
            &allow,
            &ignore
        ));
        assert!(should_crawl(
            "https://docs.example.com/guide/intro",
            "docs.example.com",
            false,
            &allow,
            &ignore
        ));
    }

    #[test]
    fn allow_patterns_reject_unmatched_urls() {
        let allow = compile_patterns(&["/api/.*".to_string()]);
        assert!(!should_crawl(
            "https://docs.example.com/blog/post",
            "docs.example.com",
            false,
            &allow,
            &[]
        ));
    }

    #[test]
    fn rejects_builtin_ignored_hosts() {
        assert!(!should_crawl(
            "https://twitter.com/share?url=x",
            "twitter.com",
            false,
            &[],
            &[]
        ));
    }

    #[test]
    fn rejects_executables_and_old_versioned_docs() {
        assert!(!should_crawl(
            "https://docs.example.com/downloads/installer.exe",
            "docs.example.com",
            false,
            &[],
            &[]
        ));
        assert!(!should_crawl(
            "https://docs.example.com/docs/v1.2/old",
            "docs.example.com",
            false,
            &[],
            &[]
        ));
        assert!(should_crawl(
            "https://docs.example.com/docs/latest/guide",
            "docs.example.com",
            false,
            &[],
            &[]
        ));
    }

    #[test]
    fn content_hash_is_stable_and_distinguishes_content() {
        let a = hash_content("<p>hello</p>");
        let b = hash_content("<p>hello</p>");
        let c = hash_content("<p>different</p>");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn strip_tags_len_counts_visible_text_only() {
        assert_eq!(strip_tags_len("<p>hello world</p>"), 10);
        assert_eq!(strip_tags_len("<div></div>"), 0);
    }
}
