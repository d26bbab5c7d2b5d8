//! Headless-browser-driven page fetch. See SPEC_FULL §4.4.
//!
//! A `BrowserSession` owns one persistent `chromiumoxide` browser instance
//! backed by a per-worker user-data directory, kept warm across jobs and
//! closed after `browser_idle_timeout_secs` of inactivity (SPEC_FULL §5).

use crate::error::CrawlError;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const NAV_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(6),
];

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

const TITLE_FALLBACK_SELECTORS: &[&str] = &["h1", "h2"];
const CONTENT_SELECTORS: &[&str] = &[
    "main",
    "article",
    ".content",
    "#content",
    ".main-content",
    ".documentation",
    "[role=main]",
    "body",
];

/// Selectors below this many trimmed characters of visible text are
/// considered boilerplate (nav chrome, empty containers) and skipped.
const MIN_CONTENT_SELECTOR_LEN: usize = 100;

/// One extracted page: title, raw HTML content of the matched selector, and
/// same-document links discovered on the page.
pub struct FetchedPage {
    pub title: String,
    pub content: String,
    pub links: Vec<String>,
}

pub struct BrowserSession {
    data_dir: PathBuf,
    browser: Option<Browser>,
    handler: Option<JoinHandle<()>>,
    last_used: Option<tokio::time::Instant>,
    idle_timeout: Duration,
}

impl BrowserSession {
    pub fn new(data_dir: PathBuf, idle_timeout: Duration) -> Self {
        Self {
            data_dir,
            browser: None,
            handler: None,
            last_used: None,
            idle_timeout,
        }
    }

    /// Launches the browser if it isn't already running. Removes stale
    /// single-instance lock files left behind by an unclean shutdown, as
    /// a fresh launch into a dirty profile directory otherwise hangs.
    pub async fn ensure_open(&mut self) -> Result<(), CrawlError> {
        if self.browser.is_some() {
            self.last_used = Some(tokio::time::Instant::now());
            return Ok(());
        }

        clean_stale_locks(&self.data_dir);

        let config = BrowserConfig::builder()
            .user_data_dir(&self.data_dir)
            .args(vec![
                "--disable-blink-features=AutomationControlled",
                "--no-first-run",
                "--no-default-browser-check",
            ])
            .build()
            .map_err(|e| CrawlError::WorkerFatal(format!("browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| CrawlError::WorkerFatal(format!("browser launch: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!(error = %e, "browser handler event error");
                }
            }
        });

        self.browser = Some(browser);
        self.handler = Some(handler_task);
        self.last_used = Some(tokio::time::Instant::now());
        info!(data_dir = %self.data_dir.display(), "browser session started");
        Ok(())
    }

    /// Closes the browser if it has been idle longer than `idle_timeout`.
    pub async fn close_if_idle(&mut self) {
        let Some(last_used) = self.last_used else {
            return;
        };
        if last_used.elapsed() >= self.idle_timeout {
            self.close().await;
        }
    }

    pub async fn close(&mut self) {
        if let Some(browser) = self.browser.as_mut() {
            if let Err(e) = browser.close().await {
                warn!(error = %e, "error closing browser");
            }
        }
        self.browser = None;
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
        self.last_used = None;
        info!("browser session closed");
    }

    /// Navigates to `url` (retrying on transient navigation failure) and
    /// extracts title, content HTML for the first matching selector, and
    /// same-document links.
    pub async fn fetch(
        &mut self,
        url: &str,
        content_selector: Option<&str>,
    ) -> Result<FetchedPage, CrawlError> {
        self.ensure_open().await?;
        let browser = self.browser.as_ref().expect("ensure_open just populated this");

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| CrawlError::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let mut last_err = None;
        let mut navigated = false;
        for delay in std::iter::once(Duration::ZERO).chain(NAV_RETRY_DELAYS) {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let nav = tokio::time::timeout(NAVIGATION_TIMEOUT, page.goto(url)).await;
            match nav {
                Ok(Ok(_)) => {
                    navigated = true;
                    break;
                }
                Ok(Err(e)) => {
                    debug!(url, error = %e, "navigation attempt failed, retrying");
                    last_err = Some(e.to_string());
                }
                Err(_) => {
                    debug!(url, "navigation timed out after {:?}, retrying", NAVIGATION_TIMEOUT);
                    last_err = Some(format!("navigation timed out after {NAVIGATION_TIMEOUT:?}"));
                }
            }
        }
        if !navigated {
            return Err(CrawlError::Fetch {
                url: url.to_string(),
                reason: last_err.unwrap_or_else(|| "unknown navigation failure".to_string()),
            });
        }

        if let Err(e) = page.wait_for_navigation().await {
            debug!(url, error = %e, "wait_for_navigation reported an error, continuing anyway");
        }

        let title = extract_title(&page).await?;
        let content = extract_content(&page, content_selector).await?;
        let links = extract_links(&page).await?;

        self.last_used = Some(tokio::time::Instant::now());

        if let Err(e) = page.close().await {
            debug!(url, error = %e, "failed to close page after extraction");
        }

        Ok(FetchedPage { title, content, links })
    }
}

async fn extract_title(page: &chromiumoxide::Page) -> Result<String, CrawlError> {
    if let Ok(result) = page.evaluate("document.title").await {
        if let Ok(text) = result.into_value::<String>() {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                return Ok(trimmed.to_string());
            }
        }
    }

    for selector in TITLE_FALLBACK_SELECTORS {
        if let Ok(element) = page.find_element(selector).await {
            if let Ok(Some(text)) = element.inner_text().await {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    return Ok(trimmed.to_string());
                }
            }
        }
    }
    Ok(String::from("untitled"))
}

/// Tries each candidate selector in order and accepts the first whose
/// visible text, trimmed, is at least `MIN_CONTENT_SELECTOR_LEN` long.
/// Falls back to the full page's visible text if nothing qualifies.
async fn extract_content(
    page: &chromiumoxide::Page,
    preferred_selector: Option<&str>,
) -> Result<String, CrawlError> {
    let mut selectors: Vec<&str> = Vec::new();
    if let Some(s) = preferred_selector {
        selectors.push(s);
    }
    selectors.extend(CONTENT_SELECTORS.iter().copied());

    for selector in selectors {
        if let Ok(element) = page.find_element(selector).await {
            if let Ok(Some(text)) = element.inner_text().await {
                let trimmed = text.trim();
                if trimmed.len() >= MIN_CONTENT_SELECTOR_LEN {
                    return Ok(trimmed.to_string());
                }
            }
        }
    }

    let body = page
        .find_element("body")
        .await
        .map_err(|e| CrawlError::Extract {
            url: page.url().ok().flatten().unwrap_or_default(),
            reason: e.to_string(),
        })?;
    let text = body
        .inner_text()
        .await
        .map_err(|e| CrawlError::Extract {
            url: page.url().ok().flatten().unwrap_or_default(),
            reason: e.to_string(),
        })?
        .unwrap_or_default();
    Ok(text.trim().to_string())
}

async fn extract_links(page: &chromiumoxide::Page) -> Result<Vec<String>, CrawlError> {
    let result = page
        .evaluate(
            r#"Array.from(document.querySelectorAll('a[href]')).map(a => a.href)"#,
        )
        .await
        .map_err(|e| CrawlError::Extract {
            url: page.url().ok().flatten().unwrap_or_default(),
            reason: e.to_string(),
        })?;

    result
        .into_value::<Vec<String>>()
        .map_err(|e| CrawlError::Extract {
            url: page.url().ok().flatten().unwrap_or_default(),
            reason: e.to_string(),
        })
}

/// Playwright/Chrome leave a `SingletonLock` (and similar marker files) in
/// the profile directory when killed uncleanly; a later launch into the same
/// directory then blocks forever waiting for a lock that will never release.
fn clean_stale_locks(data_dir: &Path) {
    for name in ["SingletonLock", "SingletonCookie", "SingletonSocket", "lockfile"] {
        let path = data_dir.join(name);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to remove stale browser lock file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_stale_locks_removes_known_files() {
        let dir = tempfile::tempdir().unwrap();
        let lock = dir.path().join("SingletonLock");
        std::fs::write(&lock, b"stale").unwrap();

        clean_stale_locks(dir.path());

        assert!(!lock.exists());
    }

    #[test]
    fn clean_stale_locks_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        clean_stale_locks(dir.path());
    }
}
