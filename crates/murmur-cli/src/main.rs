// ============================================================================
// murmur: terminal front end for Murmur
// ============================================================================
// Usage:
//   murmur say "buy milk and call mom tomorrow"   Run one turn
//   murmur chat                                   Interactive session
//   murmur list [--status STATUS] [--category C]  List entries
//   murmur balance | top-up N                     Credit ledger
//   murmur memory [--clear]                       Agent memory
//   murmur stats | export                         Database inspection
// ============================================================================

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use murmur_core::credits::CreditGate;
use murmur_core::session::{ThreadItemKind, TurnSummary, UndoOutcome};
use murmur_core::{
    DbEntryStore, EntryCategory, EntryFilter, EntryStatus, HttpAgentClient, LocalCreditGate,
    LogScheduler, MurmurConfig, MurmurDb, Pipeline, SessionController, SessionError, TurnReport,
};

/// Murmur voice/text entry agent
#[derive(Parser)]
#[command(name = "murmur", version, about = "Turn typed input into todos, reminders and notes")]
struct Cli {
    /// Path to the database file (default: ~/.murmur/murmur.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single turn on the given text
    Say {
        /// Text to process
        text: Vec<String>,
    },

    /// Interactive session (/undo, /retry, /reset, /quit)
    Chat,

    /// List entries with optional filters
    List {
        /// active, snoozed, completed, archived
        #[arg(long)]
        status: Option<String>,

        /// todo, reminder, habit, idea, note, ...
        #[arg(long)]
        category: Option<String>,
    },

    /// Show the credit balance
    Balance,

    /// Add credits to the ledger
    TopUp {
        credits: i64,
    },

    /// Show or clear the agent's memory
    Memory {
        #[arg(long)]
        clear: bool,
    },

    /// Show database statistics
    Stats,

    /// Export full database contents as JSON
    Export,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("murmur_core=info,murmur=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = MurmurConfig::from_env();
    if cli.db_path.is_some() {
        config.storage.db_path = cli.db_path.clone();
    }

    let db = Arc::new(MurmurDb::open(config.storage.db_path.as_deref())?);

    match cli.command {
        Commands::Say { text } => {
            let session = build_session(&config, &db)?;
            let text = text.join(" ");
            match session.submit_text(&text).await {
                Ok(report) => print_report(&report),
                Err(e) => print_session_error(&e),
            }
            Ok(())
        }
        Commands::Chat => {
            let session = build_session(&config, &db)?;
            run_chat(session).await
        }
        Commands::List { status, category } => cmd_list(&db, status, category),
        Commands::Balance => {
            let gate = open_gate(&config, &db)?;
            println!("Balance: {} credits", gate.balance().await);
            Ok(())
        }
        Commands::TopUp { credits } => {
            let gate = open_gate(&config, &db)?;
            let balance = gate.top_up(credits).await?;
            println!("Added {} credits. Balance: {}", credits, balance);
            Ok(())
        }
        Commands::Memory { clear } => {
            if clear {
                db.store_memory("")?;
                println!("Memory cleared.");
            } else {
                let memory = db.get_memory()?;
                if memory.is_empty() {
                    println!("(no memory saved)");
                } else {
                    println!("{}", memory);
                }
            }
            Ok(())
        }
        Commands::Stats => cmd_stats(&db),
        Commands::Export => {
            let export = db.export_json()?;
            println!("{}", serde_json::to_string_pretty(&export)?);
            Ok(())
        }
    }
}

fn open_gate(config: &MurmurConfig, db: &Arc<MurmurDb>) -> Result<Arc<LocalCreditGate>> {
    let gate = LocalCreditGate::open(Box::new(db.clone()), config.credits.starter_credits)?;
    Ok(Arc::new(gate))
}

fn build_session(config: &MurmurConfig, db: &Arc<MurmurDb>) -> Result<Arc<SessionController>> {
    config.validate()?;

    let agent = Arc::new(HttpAgentClient::new(config.agent.clone())?);
    let pipeline = Pipeline::new(agent)
        .with_credits(open_gate(config, db)?, config.pricing.clone())
        .with_memory(db.clone());

    Ok(SessionController::new(
        pipeline,
        Box::new(DbEntryStore::new(db.clone())),
        Arc::new(LogScheduler),
        config.session.clone(),
    ))
}

// ============================================================================
// Chat loop
// ============================================================================

async fn run_chat(session: Arc<SessionController>) -> Result<()> {
    println!("murmur chat. /undo, /retry, /reset, /quit. Ctrl-C cancels a running turn.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                session.reset().await;
                println!("New conversation.");
            }
            "/undo" => undo_last(&session).await?,
            "/retry" => {
                let Some(id) = last_item(&session, |k| matches!(k, ThreadItemKind::Error { .. })).await
                else {
                    println!("Nothing to retry.");
                    continue;
                };
                let turn = {
                    let session = session.clone();
                    tokio::spawn(async move { session.retry(id).await })
                };
                await_turn(&session, turn).await?;
            }
            text => {
                let text = text.to_string();
                let turn = {
                    let session = session.clone();
                    tokio::spawn(async move { session.submit_text(&text).await })
                };
                await_turn(&session, turn).await?;
            }
        }
    }

    Ok(())
}

async fn await_turn(
    session: &SessionController,
    mut turn: tokio::task::JoinHandle<Result<TurnReport, SessionError>>,
) -> Result<()> {
    let result = tokio::select! {
        result = &mut turn => result?,
        _ = tokio::signal::ctrl_c() => {
            session.cancel_processing().await;
            turn.await?
        }
    };
    match result {
        Ok(report) => print_report(&report),
        Err(e) => print_session_error(&e),
    }
    Ok(())
}

async fn last_item(
    session: &SessionController,
    pred: impl Fn(&ThreadItemKind) -> bool,
) -> Option<u64> {
    session
        .items()
        .await
        .iter()
        .rev()
        .find(|item| pred(&item.kind))
        .map(|item| item.id)
}

async fn undo_last(session: &SessionController) -> Result<()> {
    let Some(id) = last_item(session, |k| matches!(k, ThreadItemKind::ActionResult { .. })).await else {
        println!("Nothing to undo.");
        return Ok(());
    };
    match session.undo(id).await {
        Ok(UndoOutcome::Reverted(summary)) => {
            println!("Undone {} change(s).", summary.reverted);
            if summary.missing > 0 {
                println!("{} entry(s) had already been removed.", summary.missing);
            }
        }
        Ok(UndoOutcome::Stale) => println!("Too late to undo that turn."),
        Ok(UndoOutcome::NothingToUndo) => println!("Nothing to undo."),
        Err(e) => print_session_error(&e),
    }
    Ok(())
}

// ============================================================================
// Output
// ============================================================================

fn print_report(report: &TurnReport) {
    let summary: &TurnSummary = match report {
        TurnReport::Completed(summary) => summary,
        TurnReport::Superseded { .. } => {
            println!("(cancelled)");
            return;
        }
    };

    if let Some(text) = &summary.agent_text {
        println!("{}", text);
    }
    for line in &summary.report.lines {
        println!("  {}", line);
    }
    if summary.report.parse_failures > 0 {
        println!("  ({} tool call(s) could not be read)", summary.report.parse_failures);
    }
    for message in &summary.confirmations {
        println!("? {}", message);
    }
    match &summary.receipt {
        Some(receipt) => println!(
            "{} ({} credits, {} left)",
            summary.report.summary, receipt.credits_charged, receipt.new_balance
        ),
        None => println!("{}", summary.report.summary),
    }
}

fn print_session_error(error: &SessionError) {
    tracing::debug!("Session error: {:?}", error);
    eprintln!("{}", error.user_message());
}

// ============================================================================
// Inspection
// ============================================================================

fn cmd_list(db: &MurmurDb, status: Option<String>, category: Option<String>) -> Result<()> {
    let mut filter = EntryFilter::all();
    if let Some(s) = status {
        let status = EntryStatus::parse(&s).ok_or_else(|| {
            anyhow!("Unknown status '{}'. Valid values: active, snoozed, completed, archived", s)
        })?;
        filter.statuses = Some(vec![status]);
    }
    if let Some(c) = category {
        filter.category =
            Some(EntryCategory::parse(&c).ok_or_else(|| anyhow!("Unknown category '{}'", c))?);
    }

    let entries = db.list_entries(&filter)?;
    if entries.is_empty() {
        println!("No entries found.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<10}  {:<10}  {:<17}  {}",
        "ID", "STATUS", "CATEGORY", "DUE", "SUMMARY"
    );
    println!("{}", "-".repeat(80));

    for entry in &entries {
        let due = entry
            .due_date
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let summary: String = entry.summary.chars().take(40).collect();
        println!(
            "{:<8}  {:<10}  {:<10}  {:<17}  {}",
            entry.short_id(),
            entry.status.to_string(),
            entry.category.to_string(),
            due,
            summary
        );
    }

    println!("\nTotal: {} entries", entries.len());
    Ok(())
}

fn cmd_stats(db: &MurmurDb) -> Result<()> {
    let stats = db.stats()?;

    println!("=== Murmur Database Stats ===");
    println!("Database: {}", db.path().display());
    println!();
    println!("Entries:  {} total", stats.total_entries);
    for (status, count) in &stats.status_counts {
        println!("  {:12} {}", status, count);
    }
    match stats.balance {
        Some(balance) => println!("Credits:  {}", balance),
        None => println!("Credits:  (ledger not initialised)"),
    }
    println!("Memory:   {} words", stats.memory_words);

    Ok(())
}
