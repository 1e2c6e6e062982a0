use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use property_notify::config::NotifyConfig;
use property_notify::email_log::{Dispatcher, LockManager, NewEmail};
use property_notify::mail::SmtpMailTransport;
use property_notify::matching::{MatchingEngine, QueueingMatchTracker, SnapshotDirectory};
use property_notify::render::{ContentRenderer, MessageComposer, StyleInliner, TemplateRenderer};
use property_notify::scheduler::{self, Task};
use property_notify::service::NotificationService;
use property_notify::store::LibSqlBackend;

#[derive(Parser, Debug)]
#[command(
    name = "property-notify",
    about = "Deliver queued notification email and match new properties to applicants",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run both tasks on their cron schedules (default command)
    Serve,
    /// Run one email log invocation and exit
    ProcessEmailLog,
    /// Run one automatic matching pass and exit
    AutoMatch,
    /// Queue a single email
    Enqueue(EnqueueArgs),
    /// Print the number of queued emails per status
    Status,
}

#[derive(Args, Debug)]
struct EnqueueArgs {
    /// Recipient address
    #[arg(long)]
    to: String,
    #[arg(long)]
    subject: String,
    /// Body text or HTML
    #[arg(long)]
    body: String,
    /// Contact the email belongs to; enables the unsubscribe link
    #[arg(long)]
    contact_id: Option<i64>,
    /// Defaults to the configured sender name
    #[arg(long)]
    from_name: Option<String>,
    /// Defaults to the configured sender address
    #[arg(long)]
    from_address: Option<String>,
    /// RFC 3339 time before which the email is not sent
    #[arg(long)]
    send_at: Option<DateTime<Utc>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // lettre's rustls transport needs a process-wide crypto provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = NotifyConfig::from_env().context("invalid configuration")?;
    let service = Arc::new(build_service(&config).await?);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(service, &config).await?,
        Command::ProcessEmailLog => {
            let run = service.process_email_log().await?;
            print_json(&run)?;
            print_json(&service.status_counts().await?)?;
        }
        Command::AutoMatch => {
            let report = service.auto_email_match().await?;
            print_json(&report)?;
            print_json(&service.status_counts().await?)?;
        }
        Command::Enqueue(args) => {
            let mut email = NewEmail::new(
                args.to,
                args.from_name
                    .unwrap_or_else(|| config.matching.sender_name.clone()),
                args.from_address
                    .unwrap_or_else(|| config.matching.sender_address.clone()),
                args.subject,
                args.body,
            );
            if let Some(contact_id) = args.contact_id {
                email = email.with_contact(contact_id);
            }
            if let Some(at) = args.send_at {
                email = email.send_at(at);
            }
            let id = service.dispatcher().enqueue(&email).await?;
            println!("{id}");
        }
        Command::Status => print_json(&service.status_counts().await?)?,
    }

    Ok(())
}

async fn build_service(config: &NotifyConfig) -> anyhow::Result<NotificationService> {
    let db = Arc::new(
        LibSqlBackend::new_local(&config.store.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.store.db_path.display()))?,
    );

    let renderer: Arc<dyn ContentRenderer> = match &config.template_dir {
        Some(dir) => Arc::new(
            TemplateRenderer::from_dir(dir)
                .with_context(|| format!("failed to load templates from {}", dir.display()))?,
        ),
        None => Arc::new(TemplateRenderer::new()),
    };
    let composer = Arc::new(MessageComposer::new(
        renderer.clone(),
        Arc::new(StyleInliner),
        config.matching.site_url.clone(),
    ));
    let transport = Arc::new(SmtpMailTransport::new(&config.smtp)?);

    let dispatcher = Arc::new(Dispatcher::new(
        db.clone(),
        transport,
        composer,
        config.queue.send_timeout,
    ));
    let lock = LockManager::new(db.clone(), config.queue.batch_size, config.queue.stale_after);

    let directory = Arc::new(
        match &config.snapshot_path {
            Some(path) => SnapshotDirectory::from_path(path)?,
            None => SnapshotDirectory::default(),
        }
        .with_history(db.clone()),
    );
    let tracker = Arc::new(QueueingMatchTracker::new(dispatcher.clone(), db.clone()));
    let matching = MatchingEngine::new(
        config.matching.clone(),
        directory.clone(),
        directory,
        tracker,
        renderer,
    );

    Ok(NotificationService::new(db, lock, dispatcher, matching))
}

async fn serve(service: Arc<NotificationService>, config: &NotifyConfig) -> anyhow::Result<()> {
    let email_log = scheduler::parse_schedule(&config.schedule.email_log)?;
    let auto_match = scheduler::parse_schedule(&config.schedule.auto_match)?;

    eprintln!("Property Notify v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.store.db_path.display());
    eprintln!("   Email log: {}", config.schedule.email_log);
    match config.matching.active_since() {
        Some(since) => eprintln!(
            "   Auto-match: {} (properties since {})",
            config.schedule.auto_match,
            since.to_rfc3339()
        ),
        None => eprintln!("   Auto-match: disabled"),
    }

    let handles = [
        scheduler::spawn_cron_ticker(service.clone(), Task::EmailLog, email_log),
        scheduler::spawn_cron_ticker(service, Task::AutoMatch, auto_match),
    ];

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");
    for handle in handles {
        handle.abort();
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
