use anyhow::{anyhow, Context, Result};
use clap::Parser;
use feed_sync::config::{Cli, Command, Settings};
use feed_sync::{
    FeedParser, Fetcher, MemoryErrorLedger, MemorySourceRegistry, PgSourceRegistry,
    RedisErrorLedger, Scheduler, SyncOrchestrator, SyncOutcome, SyncReport, WeChatAdapter,
};
use interfaces::{ErrorLedger, SourceRegistry};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if cli.command == Command::InitDb {
        let registry = connect_registry(&cli.settings).await?;
        registry.setup_schema().await?;
        return Ok(());
    }

    let orchestrator = build_orchestrator(&cli.settings).await?;

    if !cli.settings.feeds.is_empty() {
        let seeded = orchestrator.add_feeds(&cli.settings.feeds).await?;
        info!("{} feeds registered from --feed", seeded.len());
    } else if cli.settings.dry_run && matches!(cli.command, Command::Run | Command::Sync) {
        warn!("Dry run without --feed: there is nothing to sync");
    }

    match cli.command {
        Command::Run => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("Ctrl-C received, finishing in-flight sources"),
                    Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
                }
                let _ = shutdown_tx.send(true);
            });

            Scheduler::new(orchestrator).run(shutdown_rx).await;
        }
        Command::Sync => {
            let report = Scheduler::new(orchestrator).trigger().await;
            print_report(&report);
        }
        Command::AddFeed { url, group, name } => {
            let source = orchestrator.add_feed(&url, group, name).await?;
            println!("{} {} {}", source.id, source.kind.as_str(), source.url);
        }
        Command::AddWechat { profile_url, group } => {
            let source = orchestrator.add_wechat_account(&profile_url, group).await?;
            println!(
                "{} {} {}",
                source.id,
                source.name.as_deref().unwrap_or("-"),
                source.url
            );
        }
        Command::Errors { source_id } => match orchestrator.last_error(source_id).await? {
            Some(record) => {
                println!("{} {} {}", record.timestamp.to_rfc3339(), record.url, record.error)
            }
            None => println!("no recorded error for {}", source_id),
        },
        Command::InitDb => {}
    }

    Ok(())
}

async fn connect_registry(settings: &Settings) -> Result<PgSourceRegistry> {
    let database_url = settings
        .database_url
        .as_deref()
        .ok_or_else(|| {
            anyhow!("DATABASE_URL is not set (use --dry-run to keep everything in memory)")
        })?;

    PgSourceRegistry::connect(database_url)
        .await
        .context("failed to connect to the database")
}

async fn build_orchestrator(settings: &Settings) -> Result<SyncOrchestrator> {
    let (registry, ledger): (Arc<dyn SourceRegistry>, Arc<dyn ErrorLedger>) = if settings.dry_run {
        warn!("Dry run: sources, items and errors are kept in memory only");
        (Arc::new(MemorySourceRegistry::new()), Arc::new(MemoryErrorLedger::new()))
    } else {
        let registry = connect_registry(settings).await?;
        let redis_url = settings
            .redis_url
            .as_deref()
            .ok_or_else(|| {
                anyhow!("REDIS_URL is not set (use --dry-run to keep everything in memory)")
            })?;
        let ledger = RedisErrorLedger::new(redis_url).context("invalid Redis URL")?;
        (Arc::new(registry), Arc::new(ledger))
    };

    let config = settings.sync_config();
    let parser = FeedParser::new(Fetcher::new(&config)?);
    let wechat = WeChatAdapter::new(settings.relay_config())?;

    Ok(SyncOrchestrator::new(registry, ledger, parser, wechat, config))
}

fn print_report(report: &SyncReport) {
    let elapsed = report.finished_at - report.started_at;
    println!(
        "{} sources in {}ms: {} new items, {} failed, {} skipped",
        report.outcomes.len(),
        elapsed.num_milliseconds(),
        report.inserted_total(),
        report.failed().len(),
        report.skipped()
    );

    for outcome in &report.outcomes {
        if let SyncOutcome::Failed { source_id, record } = outcome {
            println!("  {} {}: {}", source_id, record.url, record.error);
        }
    }
}
