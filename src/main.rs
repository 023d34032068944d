use anyhow::{bail, Context, Result};
use clap::Parser;
use reqwest::Url;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::{error, info};

use helpcenter_watchbot::config::{self, StateBackend};
use helpcenter_watchbot::db::SqliteCursorStore;
use helpcenter_watchbot::discovery::DiscoveryEngine;
use helpcenter_watchbot::handlers;
use helpcenter_watchbot::helpcenter::{Fetcher, HelpCenterClient};
use helpcenter_watchbot::publisher::TelegramPublisher;
use helpcenter_watchbot::shutdown::Shutdown;
use helpcenter_watchbot::state::{CursorStore, JsonFileStore};
use helpcenter_watchbot::watcher::Watcher;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Run a single check cycle and exit
    #[arg(long)]
    run_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let store: Arc<dyn CursorStore> = match cfg.app.state_backend {
        StateBackend::Json => Arc::new(JsonFileStore::in_dir(&cfg.app.data_dir)),
        StateBackend::Sqlite => {
            let database_url =
                std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.default_database_url());
            Arc::new(SqliteCursorStore::connect(&database_url).await?)
        }
    };

    let base_url = Url::parse(&cfg.source.base_url).context("invalid source.base_url")?;
    let source = HelpCenterClient::with_base_url(base_url)?;
    let fetcher = Fetcher::new(Arc::new(source), cfg.retry_policy(), cfg.source.per_page);

    let bot = Bot::new(cfg.telegram.bot_token.clone());
    let publisher = TelegramPublisher::new(bot.clone(), cfg.telegram.chat_id);

    let shutdown = Arc::new(Shutdown::default());
    let engine = Arc::new(
        DiscoveryEngine::new(fetcher, store, Arc::new(publisher), cfg.recent_window())
            .with_shutdown(shutdown.clone()),
    );
    let watcher = Watcher::new(engine.clone(), cfg.poll_interval(), shutdown.clone());

    if args.run_once || cfg.app.run_once {
        info!("run-once mode: executing a single cycle");
        if !watcher.run_once().await {
            bail!("check cycle failed");
        }
        return Ok(());
    }

    let worker = tokio::spawn(async move { watcher.run().await });

    let allowed_users = Arc::new(cfg.telegram.allowed_users.clone());
    info!("starting telegram bot");
    teloxide::repl(bot, move |bot: Bot, msg: Message| {
        let engine = engine.clone();
        let allowed_users = allowed_users.clone();
        async move {
            if let Err(err) = handlers::handle_update(&bot, &engine, &allowed_users, &msg).await {
                error!(?err, "failed to handle update");
            }
            respond(())
        }
    })
    .await;

    info!("telegram bot stopped; waiting for the current cycle to finish");
    shutdown.request();
    if let Err(err) = worker.await {
        error!(?err, "scheduler task failed");
    }
    Ok(())
}
