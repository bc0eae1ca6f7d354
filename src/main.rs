use clap::{Parser, Subcommand};
use std::env;
use wc_status_cache::commands::*;
use wc_status_cache::core::{
    error::{Result, StatusCacheError},
    print_error,
};

#[derive(Parser)]
#[command(name = "wc-status")]
#[command(about = "Cached version-control status of a working copy")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the status of paths (default: the working-copy root)
    Status { paths: Vec<String> },
    /// List files whose status matches a filter
    List {
        /// Comma separated statuses or groups, e.g. "modified,added" or "changes"
        #[arg(short, long)]
        status: Option<String>,
        paths: Vec<String>,
    },
    /// Tell whether anything under the paths has local changes
    Dirty { paths: Vec<String> },
    /// Move a file or directory, keeping version control in step
    Mv { from: String, to: String },
    /// Copy a file or directory, keeping version control in step
    Cp { from: String, to: String },
    /// Delete files, scheduling versioned ones for removal
    Rm {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Show revision, author and date labels
    Label {
        /// Also classify the mime type
        #[arg(long)]
        mime: bool,
        paths: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    // Configure logging based on --debug flag
    let level = if cli.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(cli.command) {
        match e {
            StatusCacheError::NotInWorkingCopy => print_error("Not in a git working copy"),
            e => print_error(&e.to_string()),
        }
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<()> {
    log::debug!("cwd: {:?}", env::current_dir().ok());
    match command {
        Commands::Status { paths } => execute_status(paths),
        Commands::List { status, paths } => execute_list(paths, status),
        Commands::Dirty { paths } => execute_dirty(paths).map(|_| ()),
        Commands::Mv { from, to } => execute_move(from, to),
        Commands::Cp { from, to } => execute_copy(from, to),
        Commands::Rm { paths } => execute_remove(paths),
        Commands::Label { mime, paths } => execute_label(paths, mime),
    }
}
