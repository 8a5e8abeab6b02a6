use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use songplay_etl::config::AppConfig;
use songplay_etl::db::models::TableCounts;
use songplay_etl::db::queries::ConflictPolicy;
use songplay_etl::extract::RecordPolicy;
use songplay_etl::pipeline::{EtlOptions, PhaseSummary, RunSummary};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "songplay-etl", version, about = "Load song catalog and listening logs into a star schema")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Config file (defaults to ~/.config/songplay-etl/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Defaults to `run` when omitted
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OnConflict {
    /// Keep existing songs and artists
    Ignore,
    /// Overwrite songs and artists with the latest catalog data
    Update,
}

impl From<OnConflict> for ConflictPolicy {
    fn from(c: OnConflict) -> Self {
        match c {
            OnConflict::Ignore => ConflictPolicy::Ignore,
            OnConflict::Update => ConflictPolicy::Update,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Load catalog files, then event logs
    Run {
        /// Song catalog root (defaults to config song_data_dir)
        #[arg(long)]
        song_data: Option<PathBuf>,

        /// Event log root (defaults to config log_data_dir)
        #[arg(long)]
        log_data: Option<PathBuf>,

        /// Conflict handling for songs and artists
        #[arg(long, value_enum)]
        on_conflict: Option<OnConflict>,

        /// Reject a whole file on its first malformed record
        #[arg(long)]
        strict: bool,

        /// Stop at the first file that fails to load
        #[arg(long)]
        fail_fast: bool,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Drop and recreate all tables
    Reset,

    /// Show row counts per table
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };

    // Resolve database path: CLI > config > XDG default
    let db_path = cli.db_path
        .or(config.db_path.clone())
        .unwrap_or_else(songplay_etl::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    let db = songplay_etl::db::Database::open(&db_path)
        .context("Failed to open database")?;

    let command = cli.command.unwrap_or(Commands::Run {
        song_data: None,
        log_data: None,
        on_conflict: None,
        strict: false,
        fail_fast: false,
        no_progress: false,
    });

    match command {
        Commands::Run { song_data, log_data, on_conflict, strict, fail_fast, no_progress } => {
            let song_dir = song_data.unwrap_or_else(|| config.song_data_dir.clone());
            let log_dir = log_data.unwrap_or_else(|| config.log_data_dir.clone());
            let opts = EtlOptions {
                extension: config.extension.clone(),
                conflict: on_conflict.map(Into::into).unwrap_or(config.conflict),
                record_policy: if strict { RecordPolicy::Abort } else { config.record_policy() },
                fail_fast: fail_fast || config.fail_fast,
                show_progress: !no_progress,
            };

            let summary = songplay_etl::pipeline::run_etl(&db, &song_dir, &log_dir, &opts)
                .context("ETL run failed")?;
            print_summary(&summary);

            let failed = summary.files_failed();
            if failed > 0 {
                anyhow::bail!("{} file(s) failed to load", failed);
            }
        }

        Commands::Reset => {
            db.reset().context("Failed to reset tables")?;
            println!("Tables dropped and recreated in {}", db_path.display());
        }

        Commands::Stats => {
            let counts = db.table_counts().context("Failed to count rows")?;
            println!("Table Row Counts");
            println!("================");
            print_counts(&counts);
        }
    }

    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    print_phase("Song catalog", &summary.catalog);
    print_phase("Event logs", &summary.events);
    println!(
        "Inserted: {} songs, {} artists, {} time, {} users, {} songplays ({} matched to a song)",
        summary.catalog.rows.songs,
        summary.catalog.rows.artists,
        summary.events.rows.time,
        summary.events.rows.users,
        summary.events.rows.songplays,
        summary.events.rows.resolved,
    );
    println!(
        "Updated: {} existing rows",
        summary.catalog.rows.updated + summary.events.rows.updated,
    );
    println!();
    println!("Table totals:");
    print_counts(&summary.totals);
}

fn print_phase(label: &str, phase: &PhaseSummary) {
    println!(
        "{}: {} files found, {} loaded, {} failed, {} records skipped",
        label,
        phase.files_found,
        phase.files_loaded,
        phase.failures.len(),
        phase.records_skipped,
    );
    for (path, cause) in &phase.failures {
        println!("  FAILED {}: {}", path.display(), cause);
    }
}

fn print_counts(counts: &TableCounts) {
    println!("  {:<10} {}", "songs", counts.songs);
    println!("  {:<10} {}", "artists", counts.artists);
    println!("  {:<10} {}", "users", counts.users);
    println!("  {:<10} {}", "time", counts.time);
    println!("  {:<10} {}", "songplays", counts.songplays);
}
