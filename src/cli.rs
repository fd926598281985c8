use clap::Parser;
use std::path::PathBuf;

/// gssg cli
#[derive(Parser, Debug)]
#[command(name = "gssg")]
#[command(about = "Mirror a dynamic blog into a static directory tree")]
#[command(version)]
pub struct Cli {
    /// source origin
    #[arg(long, help = "Origin to mirror, e.g. https://blog.example.com")]
    pub domain: String,

    /// production domain
    #[arg(
        long,
        help = "Public domain the post-processors substitute into text files"
    )]
    pub production_domain: Option<String>,

    /// output directory
    #[arg(long, default_value = "static", help = "Output root directory")]
    pub dest: PathBuf,

    /// cache directory
    #[arg(
        long,
        default_value = ".gssg-cache",
        help = "Directory for the validator and graph manifests"
    )]
    pub cache_dir: PathBuf,

    /// worker cap
    #[arg(long, default_value = "10", help = "Maximum concurrent fetches")]
    pub concurrency: usize,

    /// allowlisted 404 patterns
    #[arg(
        long = "allow-404",
        value_name = "PATTERN",
        help = "Substring pattern for 404s that should not be reported (repeatable)"
    )]
    pub allow_404: Vec<String>,

    /// serve the output tree after the run
    #[arg(long, help = "Serve the output tree on localhost after the run")]
    pub preview: bool,

    /// fail on crawl errors
    #[arg(long, help = "Exit non-zero if any non-allowlisted error occurred")]
    pub fail_on_error: bool,

    /// verbose logging
    #[arg(short, long, help = "Enable debug logging")]
    pub verbose: bool,
}

impl Cli {
    /// parse args
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
