mod cli;

use crate::cli::{Command, LogFormatArg, StorageBackendArg, CLI};
use anyhow::Context;
use clap::Parser;
use linkvault_core::{LinkStore, OwnerId, Shortener};
use linkvault_deleter::DeletionPipeline;
use linkvault_shortener::ShortenerService;
use linkvault_storage::{InMemoryLinkStore, MySqlLinkStore};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CLI::parse();
    init_tracing(config.log_format);

    info!(storage_backend = %config.storage, base_url = %config.base_url, "starting linkvault");

    match config.storage {
        StorageBackendArg::InMemory => run(Arc::new(InMemoryLinkStore::new()), config).await,
        StorageBackendArg::Mysql => {
            let mysql_dsn = config
                .mysql_dsn
                .clone()
                .context("mysql dsn is required when storage backend is mysql")?;
            let store = MySqlLinkStore::connect(&mysql_dsn)
                .await
                .context("failed to connect to mysql")?;
            store.migrate().await.context("failed to apply schema")?;
            run(Arc::new(store), config).await
        }
    }
}

fn init_tracing(format: LogFormatArg) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormatArg::Pretty => builder.init(),
        LogFormatArg::Json => builder.json().init(),
    }
}

async fn run<S: LinkStore>(store: Arc<S>, config: CLI) -> anyhow::Result<()> {
    let pipeline = DeletionPipeline::start(Arc::clone(&store), config.batch.settings())?;
    let service = ShortenerService::new(store, pipeline.submitter(), config.base_url);

    let outcome = execute(&service, config.command).await;

    // Only a delete leaves work in the queue worth applying before exit.
    let applied = pipeline.shutdown().await?;
    if applied > 0 {
        info!(applied, "applied pending deletions");
    }
    outcome
}

async fn execute<S: LinkStore>(
    service: &ShortenerService<S>,
    command: Command,
) -> anyhow::Result<()> {
    match command {
        Command::Shorten { owner, urls } => {
            let owner = OwnerId::from(owner);
            for url in urls {
                let shortened = service.shorten(&owner, &url).await?;
                if shortened.outcome.is_conflict() {
                    println!("{}\t{url}\t(already owned)", shortened.short_url);
                } else {
                    println!("{}\t{url}", shortened.short_url);
                }
            }
        }
        Command::Resolve { code } => {
            println!("{}", service.resolve(&code).await?);
        }
        Command::List { owner } => {
            for link in service.list(&OwnerId::from(owner)).await? {
                println!("{}\t{}", link.short_url, link.original_url);
            }
        }
        Command::Delete { owner, codes } => {
            let accepted = service.delete(&OwnerId::from(owner), codes).await?;
            println!("queued {accepted} deletion(s)");
        }
        Command::Stats => {
            let stats = service.stats().await?;
            println!("urls\t{}\nowners\t{}", stats.urls, stats.owners);
        }
        Command::Ping => {
            service.ping().await?;
            println!("ok");
        }
    }

    Ok(())
}
