use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kihap-sync")]
#[command(about = "Keep the Kihap local database and Supabase in step")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run sync passes on an interval until interrupted
    Run {
        /// Minutes between passes (defaults to SYNC_INTERVAL_MINUTES)
        #[arg(
            long,
            value_name = "N",
            value_parser = clap::value_parser!(u64).range(1..=1_440)
        )]
        interval_minutes: Option<u64>,
    },
    /// Run a single pass over every table, or one round for a single table
    Once {
        /// Table to sync (e.g. leads, students)
        #[arg(long, value_name = "NAME")]
        table: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the watermark of every table
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Forget watermarks so the next round resyncs from scratch
    Reset {
        /// Table whose watermark to forget
        #[arg(
            long,
            value_name = "NAME",
            required_unless_present = "all",
            conflicts_with = "all"
        )]
        table: Option<String>,
        /// Forget the watermarks of every table
        #[arg(long)]
        all: bool,
    },
    /// List recently logged last-write-wins conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
