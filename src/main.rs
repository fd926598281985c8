use gssg::cli::Cli;
use gssg::config::{Config, MirrorConfig};
use gssg::{logging, preview, run_mirror};
use url::Url;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse_args();

    logging::init(&cli.cache_dir.join("logs"), cli.verbose)?;

    let origin = Url::parse(&cli.domain)
        .map_err(|e| format!("invalid --domain {}: {}", cli.domain, e))?;
    let production_domain = cli
        .production_domain
        .as_deref()
        .map(Url::parse)
        .transpose()
        .map_err(|e| format!("invalid --production-domain: {}", e))?;

    let mut config = MirrorConfig::new(origin, cli.dest.clone());
    config.production_domain = production_domain;
    config.cache_dir = cli.cache_dir;
    config.concurrency = cli.concurrency.max(1);
    config.not_found_allowlist = cli.allow_404;
    config.fail_on_error = cli.fail_on_error;

    println!("Mirroring {}", config.origin);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("  Destination:  {}", config.dest.display());
    println!("  Cache dir:    {}", config.cache_dir.display());
    println!("  Concurrency:  {}", config.concurrency);
    if let Some(prod) = &config.production_domain {
        println!("  Production:   {} (rewritten by post-processors)", prod);
    }
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let fail_on_error = config.fail_on_error;
    let dest = config.dest.clone();
    let report = run_mirror(config).await?;

    println!();
    println!("Crawled {} URLs: {} written, {} unchanged", report.crawled, report.written, report.unchanged);
    println!(
        "GC: scanned {}, deleted {} files, pruned {} dirs",
        report.gc.scanned, report.gc.deleted_files, report.gc.deleted_dirs
    );

    if !report.errors.is_empty() {
        eprintln!("\n{} crawl error(s):", report.errors.len());
        for error in &report.errors {
            eprintln!("  {}", error);
        }
    }
    if report.disk_errors > 0 {
        eprintln!("\n{} disk write error(s); the tree may be incomplete", report.disk_errors);
    }

    if report.failed(fail_on_error) {
        std::process::exit(1);
    }

    println!("\n✅ Mirror up to date");

    if cli.preview {
        preview::serve(&dest, Config::PREVIEW_PORT)?;
    }

    Ok(())
}
