mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, cooldown::CooldownSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "pacer",
    about = "Rate-limited action scheduler: inspect quotas, cooldowns and dry-run proposals",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .pacer/)
    #[arg(long, global = true, env = "PACER_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Log scheduler decisions to stderr
    #[arg(long, global = true, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .pacer/ with a default config
    Init {
        /// Account the ledger belongs to (default: directory name)
        #[arg(long)]
        account: Option<String>,
    },

    /// Show window usage and cooldown state
    Status,

    /// Ask the gate whether an action would be admitted now, without recording it
    Check {
        /// follow, unfollow, like or comment
        kind: String,
    },

    /// Propose an action and dispatch it to the dry-run executor if admitted
    Propose {
        /// follow, unfollow, like or comment
        kind: String,
        /// Account handle or post id the action targets
        target: String,
        /// Wait out a denial if it clears within this many seconds
        #[arg(long, value_name = "SECS")]
        wait: Option<u64>,
    },

    /// Start or clear the account-wide cooldown
    Cooldown {
        #[command(subcommand)]
        subcommand: CooldownSubcommand,
    },

    /// Validate the pacer configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init { account } => cmd::init::run(&root, account.as_deref()),
        Commands::Status => cmd::status::run(&root, cli.json),
        Commands::Check { kind } => cmd::check::run(&root, &kind, cli.json),
        Commands::Propose { kind, target, wait } => {
            cmd::propose::run(&root, &kind, &target, wait, cli.json)
        }
        Commands::Cooldown { subcommand } => cmd::cooldown::run(&root, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
