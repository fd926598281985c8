pub mod cli;
pub mod config;
pub mod crawler;
pub mod extractor;
pub mod gc;
pub mod link_graph;
pub mod logging;
pub mod network;
pub mod preview;
pub mod seeder;
pub mod url_policy;
pub mod validator_cache;

// Re-export main types for library usage
pub use config::{Config, MirrorConfig};
pub use crawler::{run_mirror, CrawlError, CrawlReport, Crawler, MirrorError};
pub use link_graph::{GraphNode, LinkGraph};
pub use network::{FetchError, FetchOutcome, HttpClient};
pub use url_policy::PathPolicy;
pub use validator_cache::ValidatorCache;
