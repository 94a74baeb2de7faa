//! Outreach CLI — run the scheduler, drain the queue, inspect state.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use outreach_channels::SmtpChannel;
use outreach_core::OutreachConfig;
use outreach_core::traits::Notifier;
use outreach_scheduler::{Dispatcher, LogNotifier, Runtime, WebhookNotifier};
use outreach_security::CredentialVault;
use outreach_store::Store;

#[derive(Parser)]
#[command(name = "outreach", version, about = "Campaign scheduler and multi-identity email dispatcher")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler and the queue drain loop until interrupted.
    Serve,
    /// Run one drain pass over pending and retryable entries.
    Drain,
    /// Task operations.
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },
    /// Show per-identity daily usage.
    Identities {
        /// Owner whose identities to list.
        #[arg(long)]
        owner: String,
    },
    /// Send a probe message through one identity.
    SendTest {
        /// Identity id to test.
        #[arg(long)]
        identity: String,
        /// Probe recipient address.
        #[arg(long)]
        to: String,
    },
    /// Delete settled queue entries older than the given age.
    Purge {
        /// Retention window in days.
        #[arg(long, default_value_t = 90)]
        days: i64,
    },
}

#[derive(Subcommand)]
enum TaskCommand {
    /// List all tasks with status and next run.
    List,
    /// Fire one task immediately (manual trigger).
    Fire { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = OutreachConfig::load().context("loading config")?;
    let tz = config.tz_offset().context("parsing timezone offset")?;
    let store = Arc::new(Store::open(&OutreachConfig::db_path()).context("opening database")?);

    let notifier: Arc<dyn Notifier> = match &config.escalation.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url)),
        None => Arc::new(LogNotifier),
    };
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        Arc::new(SmtpChannel::new(config.dispatch.send_timeout_secs)),
        Arc::new(CredentialVault::new()),
        notifier,
        config.dispatch.clone(),
        tz,
    ));

    match cli.command {
        Command::Serve => {
            let runtime = Arc::new(Runtime::new(
                store,
                dispatcher.clone(),
                config.scheduler.clone(),
                tz,
            ));
            runtime.start().context("starting scheduler")?;
            tokio::spawn(runtime.clone().run());

            let drain_dispatcher = dispatcher.clone();
            let drain_secs = config.scheduler.tick_interval_secs;
            tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(std::time::Duration::from_secs(drain_secs));
                loop {
                    interval.tick().await;
                    if let Err(e) = drain_dispatcher.drain_pending().await {
                        tracing::error!(error = %e, "drain pass failed");
                    }
                }
            });

            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            runtime.stop();
        }
        Command::Drain => {
            let report = dispatcher.drain_pending().await?;
            println!(
                "attempted {}, delivered {}, failed {}",
                report.attempted, report.success, report.failed
            );
        }
        Command::Task { command } => match command {
            TaskCommand::List => {
                for task in store.load_all_tasks()? {
                    println!(
                        "{}  {:<30}  {:<10}  next: {}  ok/fail: {}/{}",
                        task.id,
                        task.name,
                        task.status.as_str(),
                        task.next_run
                            .map(|t| t.with_timezone(&tz).to_rfc3339())
                            .unwrap_or_else(|| "-".into()),
                        task.successful_executions,
                        task.failed_executions,
                    );
                }
            }
            TaskCommand::Fire { id } => {
                let runtime = Runtime::new(store, dispatcher.clone(), config.scheduler.clone(), tz);
                let report = runtime.fire_now(&id).await?;
                println!("{}", report.summary());
            }
        },
        Command::Identities { owner } => {
            let today = chrono::Utc::now().with_timezone(&tz).date_naive();
            for usage in dispatcher.ledger().identity_status(&owner, today)? {
                println!(
                    "{:<40} limit {:>5}  sent {:>5}  failed {:>5}  remaining {:>5}{}",
                    usage.address,
                    usage.daily_limit,
                    usage.sent,
                    usage.failed,
                    usage.remaining,
                    if usage.exceeded { "  (exceeded)" } else { "" },
                );
            }
        }
        Command::SendTest { identity, to } => match dispatcher.probe_identity(&identity, &to).await
        {
            Ok(()) => println!("probe delivered via {identity}"),
            Err(e) => {
                println!("probe failed ({}): {e}", e.kind());
                std::process::exit(1);
            }
        },
        Command::Purge { days } => {
            let cutoff = chrono::Utc::now() - chrono::Duration::days(days);
            let purged = store.purge_entries_before(cutoff)?;
            println!("purged {purged} settled entries older than {days} days");
        }
    }

    Ok(())
}
