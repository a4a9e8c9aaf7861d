use std::{
    error::Error,
    fs::OpenOptions,
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    process::exit,
    str::FromStr,
    sync::Arc,
};

use clap::{Parser, Subcommand};
use time::macros::format_description;
use tokio::sync::mpsc::unbounded_channel;
use tracing_subscriber::{EnvFilter, Layer, filter, layer::SubscriberExt, util::SubscriberInitExt};

use pocket_ledger::{
    Category, EXPENSES_COLLECTION, Entry, EntryCandidate, EntryId, EntryKind, MutationController,
    RecordStore, SqliteStore, SyncEngine, aggregate,
};

/// Record income and expenses in a personal ledger.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to the ledger's SQLite database. Created if it does not exist.
    #[arg(long)]
    db_path: PathBuf,

    /// The collection that holds the ledger entries.
    #[arg(long, default_value = EXPENSES_COLLECTION)]
    collection: String,

    /// Append debug logs to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show every entry, newest first, followed by the totals.
    List,

    /// Add a new entry.
    Add {
        /// What the money was for, e.g. "Lunch".
        #[arg(long)]
        title: String,

        /// How much money, greater than zero.
        #[arg(long)]
        amount: String,

        /// Either "income" or "expense".
        #[arg(long)]
        kind: String,

        /// One of salary, food, transport, bills, shopping or other.
        #[arg(long, value_parser = Category::from_str)]
        category: Option<Category>,

        /// Extra details.
        #[arg(long, default_value = "")]
        note: String,
    },

    /// Change an existing entry. Fields that are not given keep their current value.
    Edit {
        /// The ID of the entry to change.
        id: EntryId,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        amount: Option<String>,

        #[arg(long)]
        kind: Option<String>,

        #[arg(long, value_parser = Category::from_str, conflicts_with = "clear_category")]
        category: Option<Category>,

        /// Remove the entry's category.
        #[arg(long)]
        clear_category: bool,

        #[arg(long)]
        note: Option<String>,
    },

    /// Delete an entry after asking for confirmation.
    Delete {
        /// The ID of the entry to delete.
        id: EntryId,

        /// Delete without asking.
        #[arg(long, short)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    setup_logging(args.log_file.as_deref())?;
    validate_db_path(&args.db_path);

    let store: Arc<dyn RecordStore> = Arc::new(SqliteStore::open(&args.db_path)?);
    let engine = SyncEngine::new(store.clone(), &args.collection);
    let controller = MutationController::new(store, &args.collection);

    match args.command {
        Command::List => list_entries(&engine).await?,
        Command::Add {
            title,
            amount,
            kind,
            category,
            note,
        } => {
            let candidate = EntryCandidate {
                title,
                amount: EntryCandidate::parse_amount(&amount),
                kind: parse_kind(&kind),
                category,
                note,
            };

            match controller.create(&candidate).await {
                Ok(id) => println!("Added entry {id}"),
                Err(error) => exit_with_error(error),
            }
        }
        Command::Edit {
            id,
            title,
            amount,
            kind,
            category,
            clear_category,
            note,
        } => {
            let Some(entry) = engine.fetch(&id).await? else {
                exit_with_error(format!("There is no entry with the ID {id}."));
            };

            let mut candidate = EntryCandidate::from_entry(&entry);
            if let Some(title) = title {
                candidate.title = title;
            }
            if let Some(amount) = amount {
                candidate.amount = EntryCandidate::parse_amount(&amount);
            }
            if let Some(kind) = kind {
                candidate.kind = parse_kind(&kind);
            }
            if category.is_some() || clear_category {
                candidate.category = category;
            }
            if let Some(note) = note {
                candidate.note = note;
            }

            match controller.update(&id, &candidate).await {
                Ok(()) => println!("Updated entry {id}"),
                Err(error) => exit_with_error(error),
            }
        }
        Command::Delete { id, yes } => {
            let Some(entry) = engine.fetch(&id).await? else {
                exit_with_error(format!("There is no entry with the ID {id}."));
            };

            controller.request_delete(id)?;

            if !yes && !confirm(&format!("Delete \"{}\"?", entry.title))? {
                controller.cancel_delete();
                println!("Nothing was deleted.");
                return Ok(());
            }

            match controller.confirm_delete().await {
                Ok(id) => println!("Deleted entry {id}"),
                Err(error) => exit_with_error(error),
            }
        }
    }

    Ok(())
}

/// Wait for the first snapshot of the ledger and print it.
async fn list_entries(engine: &SyncEngine) -> Result<(), Box<dyn Error>> {
    let (sender, mut receiver) = unbounded_channel();
    let mut subscription = engine.subscribe(move |entries| {
        let _ = sender.send(entries);
    })?;

    let entries = receiver.recv().await.unwrap_or_default();
    subscription.unsubscribe();

    if entries.is_empty() {
        println!("No entries yet.");
        return Ok(());
    }

    for entry in &entries {
        println!("{}", format_entry(entry));
    }

    let totals = aggregate(&entries);
    println!();
    println!(
        "Income: {:.2}  Expenses: {:.2}  Net: {:.2}",
        totals.income_sum,
        totals.expense_sum,
        totals.net()
    );

    Ok(())
}

fn format_entry(entry: &Entry) -> String {
    let date = entry
        .created_at
        .and_then(|created_at| {
            created_at
                .format(format_description!("[year]-[month]-[day]"))
                .ok()
        })
        .unwrap_or_else(|| "----------".to_owned());

    let sign = match entry.kind {
        EntryKind::Income => '+',
        EntryKind::Expense => '-',
    };

    let category = entry
        .category
        .map_or("uncategorised", |category| category.as_str());

    format!(
        "{:>5}  {date}  {sign}{:>10.2}  {}  ({category})",
        entry.id, entry.amount, entry.title
    )
}

/// Unrecognised input is treated like an unset selection, which fails validation.
fn parse_kind(text: &str) -> Option<EntryKind> {
    EntryKind::from_str(text.trim()).ok()
}

fn confirm(question: &str) -> Result<bool, io::Error> {
    print!("{question} [y/N] ");
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;

    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn validate_db_path(db_path: &Path) {
    match db_path.extension() {
        Some(extension) if !extension.is_empty() => {}
        _ => exit_with_error("Database path must include a file extension (e.g., 'ledger.db')."),
    }
}

fn setup_logging(log_file: Option<&Path>) -> Result<(), io::Error> {
    let stderr_log = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    let debug_log = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;

            Some(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_ansi(false)
                    .with_writer(Arc::new(file))
                    .with_filter(filter::LevelFilter::DEBUG),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_log)
        .with(debug_log)
        .init();

    Ok(())
}

fn exit_with_error(error: impl ToString) -> ! {
    eprintln!("\x1b[31;1m{}\x1b[0m", error.to_string());
    exit(1);
}
