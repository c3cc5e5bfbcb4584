mod commands;
mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tdb_store::TempleDb;

#[derive(Parser)]
#[command(name = "tdb", about = "TempleDB — content-addressable project store and agent work coordinator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Bind the current (or given) directory to a TempleDB project
    Init {
        /// Directory to initialize (defaults to current directory)
        path: Option<PathBuf>,
        /// Project slug (defaults to the directory name)
        #[arg(long)]
        slug: Option<String>,
    },

    /// Rescan the working directory and refresh tracked file state
    Sync,

    /// Show working tree status (added / modified / deleted / staged)
    Status,

    /// Stage files for commit
    Add {
        /// Substrings to match against tracked relative paths
        pathspec: Vec<String>,
        /// Stage every changed file
        #[arg(short = 'A', long)]
        all: bool,
    },

    /// Unstage files
    Reset {
        pathspec: Vec<String>,
        #[arg(short = 'A', long)]
        all: bool,
    },

    /// Record staged changes as a commit
    Commit {
        #[arg(short, long)]
        message: String,
        /// How to handle version-skew against the bound checkout (abort, force, rebase)
        #[arg(long, default_value = "abort")]
        on_conflict: String,
    },

    /// Show commit history for the current branch
    Log {
        #[arg(long)]
        oneline: bool,
        #[arg(short)]
        n: Option<u32>,
    },

    /// Show a unified diff of a path between two revisions (default: latest commit vs its parent)
    Diff {
        path: String,
        #[arg(long = "from")]
        commit_a: Option<String>,
        #[arg(long = "to")]
        commit_b: Option<String>,
    },

    /// Create or list branches
    Branch {
        name: Option<String>,
        #[arg(long)]
        from: Option<String>,
    },

    /// Project-level commands
    Project {
        #[command(subcommand)]
        action: commands::project::ProjectAction,
    },

    /// Agent work-item coordination commands
    Work {
        #[command(subcommand)]
        action: commands::work::WorkAction,
    },

    /// Agent session commands
    Agent {
        #[command(subcommand)]
        action: commands::agent::AgentAction,
    },

    /// Cathedral package export/import
    Cathedral {
        #[command(subcommand)]
        action: commands::cathedral::CathedralAction,
    },

    /// Materialize a project onto disk, and manage existing checkouts
    Checkout {
        #[command(subcommand)]
        action: commands::checkout::CheckoutAction,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color || std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }

    let cfg = tdb_store::TdbConfig::from_env();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&cfg.log_level))
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(run(cli, cfg))
}

async fn run(cli: Cli, cfg: tdb_store::TdbConfig) -> Result<()> {
    let db = TempleDb::open(&cfg.db_path).await?;

    match cli.command {
        Commands::Init { path, slug } => commands::vcs::init(&db, path, slug).await,
        Commands::Sync => commands::vcs::sync(&db).await,
        Commands::Status => commands::vcs::status(&db).await,
        Commands::Add { pathspec, all } => commands::vcs::add(&db, pathspec, all).await,
        Commands::Reset { pathspec, all } => commands::vcs::reset(&db, pathspec, all).await,
        Commands::Commit { message, on_conflict } => commands::vcs::commit(&db, message, on_conflict).await,
        Commands::Log { oneline, n } => commands::vcs::log(&db, oneline, n).await,
        Commands::Diff { path, commit_a, commit_b } => commands::vcs::diff(&db, path, commit_a, commit_b).await,
        Commands::Branch { name, from } => commands::vcs::branch(&db, name, from).await,
        Commands::Project { action } => commands::project::run(&db, action).await,
        Commands::Work { action } => commands::work::run(&db, action).await,
        Commands::Agent { action } => commands::agent::run(&db, action).await,
        Commands::Cathedral { action } => commands::cathedral::run(&db, action).await,
        Commands::Checkout { action } => commands::checkout::run(&db, action).await,
    }
}
