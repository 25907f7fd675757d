mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{catalog::CatalogSubcommand, config::ConfigSubcommand, rules::RulesSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "flagdeck",
    about = "Turn simulation telemetry into named signals and edge-triggered flag actions",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from flagdeck.yaml)
    #[arg(long, global = true, env = "FLAGDECK_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write flagdeck.yaml, catalog.yaml and rules.yaml if missing
    Init,

    /// Inspect the signal catalog
    Catalog {
        #[command(subcommand)]
        subcommand: CatalogSubcommand,
    },

    /// Inspect the rule document
    Rules {
        #[command(subcommand)]
        subcommand: RulesSubcommand,
    },

    /// Validate the project configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Derive every signal for a single frame
    Derive {
        /// JSON file holding one frame
        #[arg(long)]
        frame: PathBuf,

        /// Derivation time (RFC 3339); defaults to the frame timestamp
        #[arg(long)]
        at: Option<String>,
    },

    /// Feed a JSON-lines frame log through the engines
    Replay {
        /// Frame log, one JSON frame per line
        file: PathBuf,

        /// Actor for lines that do not name one
        #[arg(long)]
        actor: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Replay { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
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
        Commands::Init => cmd::init::run(&root),
        Commands::Catalog { subcommand } => cmd::catalog::run(&root, subcommand, cli.json),
        Commands::Rules { subcommand } => cmd::rules::run(&root, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::Derive { frame, at } => cmd::derive::run(&root, &frame, at.as_deref(), cli.json),
        Commands::Replay { file, actor } => {
            cmd::replay::run(&root, &file, actor.as_deref(), cli.json)
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
