use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Url;
use std::path::PathBuf;
use std::sync::Arc;

use helpcenter_watchbot::config;
use helpcenter_watchbot::helpcenter::{Fetcher, HelpCenterClient};
use helpcenter_watchbot::model;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Fetch every page of the article listing and print it newest first"
)]
struct Args {
    /// Path to YAML config file (reads only `source`)
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Print at most this many articles
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

#[derive(Debug, serde::Deserialize)]
struct SourceOnlyConfig {
    #[serde(default)]
    source: config::Source,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let source = match std::fs::read_to_string(&args.config) {
        Ok(raw) => serde_yaml::from_str::<SourceOnlyConfig>(&raw)?.source,
        Err(_) => config::Source::default(),
    };
    let policy = source.retry_policy();

    let base_url = Url::parse(&source.base_url).context("invalid source.base_url")?;
    let client = HelpCenterClient::with_base_url(base_url)?;
    let fetcher = Fetcher::new(Arc::new(client), policy, source.per_page);

    let mut articles = fetcher.fetch_all().await?;
    model::sort_descending(&mut articles);
    println!("Fetched {} articles", articles.len());
    for article in articles.iter().take(args.limit) {
        println!("[{}] {} ({})", article.id, article.title, article.updated_at);
        println!("    {}", article.url);
    }
    Ok(())
}
