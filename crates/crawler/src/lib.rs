pub mod bootstrap;
pub mod browser_session;
pub mod crawl_engine;
pub mod domain_coordinator;
pub mod error;
pub mod worker;

pub use error::CrawlError;
