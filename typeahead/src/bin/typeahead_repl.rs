//! Interactive type-ahead over a SQLite table or a word list.
//!
//! Every stdin line replaces the field's text. Lines starting with `:` are
//! commands: `:select N`, `:retry`, `:cancel`, `:clear`, `:stats`, `:quit`.
//!
//! Usage:
//!     cargo run --bin typeahead-repl -- --db customers.sqlite
//!     cargo run --bin typeahead-repl -- --words names.txt --debounce-ms 100

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use typeahead::{
    DisplayState, PipelinePhase, QueuedDispatcher, ResultPresenter, SearchConfig, SearchPipeline,
    SharedWorkerPool, SqliteProvider, StaticProvider,
};

const DEFAULT_SQL: &str =
    "SELECT name FROM customers WHERE name LIKE ?1 ESCAPE '\\' ORDER BY name LIMIT ?2";

/// How long to pump results after a line before prompting again
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// SQLite database to search
    #[arg(short, long, conflicts_with = "words")]
    db: Option<PathBuf>,

    /// Lookup statement: ?1 is the LIKE pattern, ?2 the row limit
    #[arg(long, default_value = DEFAULT_SQL)]
    sql: String,

    /// Plain-text file with one candidate per line
    #[arg(short, long)]
    words: Option<PathBuf>,

    /// JSON search config; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    debounce_ms: Option<u64>,

    #[arg(short = 'n', long)]
    max_suggestions: Option<usize>,

    /// Enable the approximate-match ranking tier
    #[arg(long)]
    fuzzy: bool,
}

fn first_column(row: &rusqlite::Row<'_>) -> rusqlite::Result<String> {
    row.get(0)
}

fn load_config(args: &Args) -> Result<SearchConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            SearchConfig::from_json(&json)?
        }
        None => SearchConfig::default(),
    };
    if let Some(ms) = args.debounce_ms {
        config.debounce_delay_ms = ms;
    }
    if let Some(n) = args.max_suggestions {
        config.max_suggestions = n;
    }
    config.fuzzy_fallback |= args.fuzzy;
    Ok(config)
}

fn print_suggestions(presenter: &ResultPresenter<String>) {
    match presenter.display_state() {
        DisplayState::Results => {
            for (i, candidate) in presenter.suggestions().iter().enumerate() {
                println!("  [{}] {} ({:.1})", i, candidate.display, candidate.score);
            }
        }
        DisplayState::NoResults => match presenter.status() {
            Some(status) => println!("  (no results: {})", status),
            None => println!("  (no results)"),
        },
        DisplayState::Searching => println!("  searching..."),
        DisplayState::NotSearched => {}
    }
}

/// Pump deliveries until the search started at `revision` has shown something.
fn settle(field: &SearchPipeline<String>, dispatcher: &QueuedDispatcher, revision: u64) {
    let deadline = Instant::now() + SETTLE_TIMEOUT;
    while Instant::now() < deadline {
        dispatcher.run_pending();
        let phase = field.phase();
        if phase == PipelinePhase::Idle
            || (phase == PipelinePhase::Presenting && field.revision() != revision)
        {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    println!("  (still searching)");
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    let pool = SharedWorkerPool::default();
    let dispatcher = Arc::new(QueuedDispatcher::new());
    let field: SearchPipeline<String> =
        SearchPipeline::with_dispatcher(&pool, config, dispatcher.clone())?;
    field.set_display_fn(|name: &String| name.clone());
    field.set_change_listener(print_suggestions);
    field.set_selection_handler(|name: String| println!("  selected: {}", name));

    match (&args.db, &args.words) {
        (Some(db), _) => {
            let provider = SqliteProvider::open(db, args.sql.clone(), first_column)
                .with_context(|| format!("Failed to open {}", db.display()))?;
            field.set_query_provider(provider);
            info!(db = %db.display(), "searching database");
        }
        (None, Some(words)) => {
            let text = std::fs::read_to_string(words)
                .with_context(|| format!("Failed to read {}", words.display()))?;
            let items: Vec<String> = text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect();
            info!(count = items.len(), "searching word list");
            field.set_query_provider(StaticProvider::new(items));
        }
        (None, None) => bail!("Pass --db or --words"),
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    print!("> ");
    stdout.flush()?;

    for line in stdin.lock().lines() {
        let line = line?;
        match line.trim().split_once(' ').unwrap_or((line.trim(), "")) {
            (":quit", _) | (":q", _) => break,
            (":retry", _) => {
                let revision = field.revision();
                field.retry();
                settle(&field, &dispatcher, revision);
            }
            (":cancel", _) => field.cancel_pending(),
            (":clear", _) => {
                field.clear_cache();
                println!("  cache cleared");
            }
            (":stats", _) => {
                let stats = field.cache_stats();
                println!(
                    "  cache: {} entries, {} hits, {} misses, {} evictions",
                    field.cache_len(),
                    stats.hits,
                    stats.misses,
                    stats.evictions
                );
            }
            (":select", index) => match index.trim().parse::<usize>() {
                Ok(index) => {
                    if field.select(index).is_none() {
                        println!("  nothing at {}", index);
                    }
                }
                Err(_) => println!("  usage: :select N"),
            },
            _ => {
                let revision = field.revision();
                field.submit_text(&line);
                settle(&field, &dispatcher, revision);
            }
        }

        print!("> ");
        stdout.flush()?;
    }

    field.dispose();
    Ok(())
}
