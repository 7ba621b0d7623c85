//! kioku-sync
//!
//! Command-line front of the sync engine.
//!
//! # Commands
//!
//! - `quick` - Drain the queue, then pull changes since the stored cursors
//! - `full` - Drain the queue, then pull and verify every resource
//! - `drain` - Submit queued mutations only
//! - `status` - Local counts, queue and cursors
//! - `dead-letters` - List or resolve terminally failed mutations

use clap::{Parser, Subcommand};
use kioku::client::local_db::LocalDatabase;
use kioku::client::offline::{DrainReport, PendingMutationQueue, QueueProcessor};
use kioku::client::remote::{HttpRemote, RemoteService};
use kioku::client::sync::{SyncOrchestrator, SyncOutcome, SyncStateHandle};
use kioku::client::{Config, SyncResult};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Offline-first study sync engine
#[derive(Parser)]
#[command(name = "kioku-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the config file
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Path to the local database (overrides config)
    #[arg(global = true, short, long)]
    database: Option<PathBuf>,

    /// Print reports as JSON
    #[arg(global = true, long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drain the queue, then pull changes since the stored cursors
    Quick,

    /// Drain the queue, then pull and verify every resource
    Full,

    /// Submit queued mutations only
    Drain,

    /// Show local counts, queue and sync cursors
    Status,

    /// List or resolve terminally failed mutations
    DeadLetters {
        /// Let the queue pass over this dead letter
        #[arg(long, conflicts_with_all = ["requeue", "discard"])]
        skip: Option<i64>,

        /// Retry this dead letter
        #[arg(long, conflicts_with = "discard")]
        requeue: Option<i64>,

        /// Drop this dead letter and its optimistic display
        #[arg(long)]
        discard: Option<i64>,
    },
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> SyncResult<()> {
    let config_path = cli.config.clone().or_else(Config::default_path);
    let mut config = Config::load(config_path.as_deref())?;
    if let Some(path) = cli.database {
        config.app.database_path = Some(path);
    }

    let db_path = config
        .app
        .database_path
        .clone()
        .unwrap_or_else(LocalDatabase::default_path);
    let db = LocalDatabase::open(&db_path).await?;

    let recovered = db.recover_in_flight().await?;
    if recovered > 0 {
        tracing::warn!("Recovered {} mutation(s) left in flight", recovered);
    }

    match cli.command {
        Commands::Status => print_status(&db, cli.json).await,
        Commands::DeadLetters {
            skip,
            requeue,
            discard,
        } => dead_letters(&db, skip, requeue, discard).await,
        Commands::Drain => {
            let (processor, _) = engine(&config, db)?;
            print_drain(&processor.process_queue().await, cli.json);
            Ok(())
        }
        Commands::Quick | Commands::Full => {
            let full = matches!(cli.command, Commands::Full);
            let (processor, orchestrator) = engine(&config, db)?;
            let drain = processor.process_queue().await;
            orchestrator.record_drain(&drain).await;
            print_drain(&drain, cli.json);

            let outcome = if full {
                orchestrator.run_full_refresh().await
            } else {
                orchestrator.run_quick_sync().await
            };
            print_outcome(&outcome, cli.json);
            Ok(())
        }
    }
}

fn engine(config: &Config, db: LocalDatabase) -> SyncResult<(QueueProcessor, SyncOrchestrator)> {
    let remote: Arc<dyn RemoteService> = Arc::new(HttpRemote::new(&config.app)?);
    let state = SyncStateHandle::new();
    let processor = QueueProcessor::new(
        db.clone(),
        Arc::clone(&remote),
        config.sync.backoff.clone(),
        config.sync.dead_letter_policy,
        state.clone(),
    );
    let orchestrator = SyncOrchestrator::new(db, remote, config.sync.clone(), state);
    Ok((processor, orchestrator))
}

async fn print_status(db: &LocalDatabase, json: bool) -> SyncResult<()> {
    let stats = db.get_stats().await?;
    let cursors = db.sync_cursors().await?;
    let now = chrono::Utc::now();
    let reviews = db.available_review_count(now).await?;
    let lessons = db.available_lesson_count().await?;

    if json {
        let value = serde_json::json!({
            "subjects": stats.subject_count,
            "assignments": stats.assignment_count,
            "study_materials": stats.study_material_count,
            "pending_mutations": stats.pending_mutations,
            "dead_letters": stats.dead_letters,
            "available_reviews": reviews,
            "available_lessons": lessons,
            "cursors": cursors,
        });
        println!("{}", value);
        return Ok(());
    }

    println!("Subjects:          {}", stats.subject_count);
    println!("Assignments:       {}", stats.assignment_count);
    println!("Study materials:   {}", stats.study_material_count);
    println!("Pending mutations: {}", stats.pending_mutations);
    println!("Dead letters:      {}", stats.dead_letters);
    println!("Reviews available: {}", reviews);
    println!("Lessons available: {}", lessons);
    println!();
    for cursor in cursors {
        println!(
            "{:<20} cursor {:<32} {}",
            cursor.resource.name(),
            cursor
                .cursor
                .map(|c| c.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
            cursor
                .resume_token
                .map(|t| format!("resume at {}", t))
                .unwrap_or_default()
        );
    }
    Ok(())
}

async fn dead_letters(
    db: &LocalDatabase,
    skip: Option<i64>,
    requeue: Option<i64>,
    discard: Option<i64>,
) -> SyncResult<()> {
    let queue = PendingMutationQueue::new(db.clone());

    let action = if let Some(sequence) = skip {
        Some(("skipped", sequence, queue.skip_dead_letter(sequence).await?))
    } else if let Some(sequence) = requeue {
        Some(("requeued", sequence, queue.requeue_dead_letter(sequence).await?))
    } else if let Some(sequence) = discard {
        Some(("discarded", sequence, queue.discard_dead_letter(sequence).await?))
    } else {
        None
    };

    match action {
        Some((verb, sequence, true)) => println!("#{} {}", sequence, verb),
        Some((_, sequence, false)) => println!("#{} is not a dead letter", sequence),
        None => {
            let letters = queue.dead_letters().await?;
            if letters.is_empty() {
                println!("No dead letters");
            }
            for letter in letters {
                println!(
                    "#{:<6} {:<13} subject {:<8} attempts {:<3} {}{}",
                    letter.sequence,
                    letter.kind,
                    letter.subject_id,
                    letter.attempts,
                    letter.last_error.as_deref().unwrap_or(""),
                    if letter.skipped { " (skipped)" } else { "" }
                );
            }
        }
    }
    Ok(())
}

fn print_drain(report: &DrainReport, json: bool) {
    if json {
        println!("{}", serde_json::to_string(report).unwrap_or_default());
    } else {
        println!(
            "Queue: {:?}, {} submitted, {} dead-lettered",
            report.outcome, report.submitted, report.dead_lettered
        );
    }
}

fn print_outcome(outcome: &SyncOutcome, json: bool) {
    match outcome {
        SyncOutcome::Ran(report) if json => {
            println!("{}", serde_json::to_string(report).unwrap_or_default());
        }
        SyncOutcome::Ran(report) => {
            for phase in &report.phases {
                println!(
                    "{:<20} {:>4} page(s) {:>7} written {:>7} stale",
                    phase.resource.name(),
                    phase.pages,
                    phase.items_written,
                    phase.items_skipped
                );
                if let Some(check) = &phase.verification {
                    println!(
                        "{:<20} local {} / server {:?}, pruned {}",
                        "",
                        check.local_count,
                        check.remote_count,
                        check.pruned
                    );
                }
            }
            if let Some(failure) = &report.failure {
                println!("Stopped at {}: {}", failure.resource, failure.error);
            } else if report.cancelled {
                println!("Cancelled");
            }
        }
        SyncOutcome::Coalesced => println!("Another run is active"),
        SyncOutcome::AuthRequired => println!("Re-authentication required"),
        SyncOutcome::Stopped => println!("Sync engine is shutting down"),
    }
}
