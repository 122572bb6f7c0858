use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use roster_core::normalize;
use roster_sync::{build_orchestrator, open_stores, RunOptions, SyncConfig};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "roster-cli")]
#[command(about = "Artist roster sync command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one full sync (the default).
    Sync(SyncArgs),
    /// Last run, lock holder and queue counts.
    Status,
    /// Upstream artists not yet published.
    Missing {
        #[arg(long)]
        use_cache: bool,
    },
    /// Enqueue every missing artist for research without publishing.
    PrepareResearch,
    #[command(subcommand)]
    Queue(QueueCommand),
    /// Same-locale duplicates in the published catalog.
    Duplicates,
    Migrate,
    Serve,
    #[command(subcommand)]
    Lock(LockCommand),
}

#[derive(Debug, Default, Args)]
struct SyncArgs {
    #[arg(long)]
    max_artists: Option<usize>,
    /// Use the last stored upstream snapshot instead of fetching.
    #[arg(long)]
    use_cache: bool,
}

#[derive(Debug, Subcommand)]
enum QueueCommand {
    Stats,
    /// Remove completed entries.
    Cleanup,
    /// Put failed entries back to pending.
    Reset {
        /// Artist name or identity; every failed entry when omitted.
        artist: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum LockCommand {
    Status,
    ForceRelease,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roster=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync(SyncArgs::default())) {
        Commands::Sync(args) => {
            let orchestrator = build_orchestrator(&config).await?;
            let report = orchestrator
                .run(RunOptions {
                    max_artists: args.max_artists,
                    use_cached_snapshot: args.use_cache,
                })
                .await?;
            println!(
                "sync complete: run_id={} success={} failed={} skipped={} duration={:.1}s",
                report.run_id,
                report.success.len(),
                report.failed.len(),
                report.skipped.len(),
                report.duration_seconds
            );
            for failure in &report.failed {
                println!("  failed {} at {} ({}): {}", failure.name, failure.stage, failure.kind, failure.error);
            }
        }
        Commands::Status => {
            let stores = open_stores(&config).await?;
            print_json(&stores.status().await?)?;
        }
        Commands::Missing { use_cache } => {
            let orchestrator = build_orchestrator(&config).await?;
            let diff = orchestrator.diff(use_cache).await?;
            println!(
                "{} upstream, {} published, {} missing",
                diff.upstream_count,
                diff.published_count,
                diff.missing.len()
            );
            for candidate in &diff.missing {
                println!("  {} ({})", candidate.display_name, candidate.canonical_identity);
            }
            for near in &diff.near_matches {
                println!("  review: {} ~ {} ({:.2})", near.candidate, near.published, near.score);
            }
        }
        Commands::PrepareResearch => {
            let orchestrator = build_orchestrator(&config).await?;
            print_json(&orchestrator.populate_queue_only().await?)?;
        }
        Commands::Queue(command) => {
            let stores = open_stores(&config).await?;
            match command {
                QueueCommand::Stats => print_json(&stores.queue.stats().await?)?,
                QueueCommand::Cleanup => {
                    let removed = stores.queue.cleanup_completed().await?;
                    println!("removed {removed} completed entries");
                }
                QueueCommand::Reset { artist: Some(artist) } => {
                    let identity = normalize(&artist);
                    if identity.is_empty() {
                        bail!("{artist:?} has no canonical identity");
                    }
                    stores.queue.reset_failed(&identity).await?;
                    println!("reset {identity}");
                }
                QueueCommand::Reset { artist: None } => {
                    let failed = stores.queue.list_failed().await?;
                    for entry in &failed {
                        stores.queue.reset_failed(&entry.canonical_identity).await?;
                    }
                    println!("reset {} failed entries", failed.len());
                }
            }
        }
        Commands::Duplicates => {
            let orchestrator = build_orchestrator(&config).await?;
            let groups = orchestrator.audit_published().await?;
            if groups.is_empty() {
                println!("no duplicates");
            }
            for group in &groups {
                println!(
                    "{} [{}]: keep {:?}, duplicates {:?} ({})",
                    group.identity,
                    group.locale,
                    group.keep_id,
                    group.duplicate_ids,
                    group.names.join(" / ")
                );
            }
        }
        Commands::Migrate => {
            open_stores(&config).await?;
            println!("migrations applied to {}", config.database_url);
        }
        Commands::Serve => {
            roster_web::serve_from_env().await?;
        }
        Commands::Lock(LockCommand::Status) => {
            let stores = open_stores(&config).await?;
            match stores.lock.info().await? {
                Some(info) => print_json(&info)?,
                None => println!("unlocked"),
            }
        }
        Commands::Lock(LockCommand::ForceRelease) => {
            let stores = open_stores(&config).await?;
            if stores.lock.force_release().await? {
                println!("lock released");
            } else {
                println!("no lock was held");
            }
        }
    }

    Ok(())
}
