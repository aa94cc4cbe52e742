use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coopnet::config::Config;
use coopnet::ledger::Ledger;
use coopnet::node::CoopNode;
use coopnet::web::WebServer;
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "coopnet")]
#[command(about = "Federated cooperative-economics engine", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP facade
    Serve,

    /// Run the built-in cooperative production demo
    Demo,

    /// Verify a dumped ledger file and exit non-zero on corruption
    Validate {
        /// Path to a ledger JSON dump
        path: PathBuf,
    },

    /// Verify a dumped ledger file and print the chain to stdout as JSON
    Dump {
        /// Path to a ledger JSON dump
        path: PathBuf,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .init();

    match cli.command {
        Commands::Serve => {
            let node = CoopNode::new(config);
            let server = WebServer::new(node);
            server
                .start()
                .await
                .map_err(|e| anyhow::anyhow!("web server failed: {e}"))?;
        }
        Commands::Demo => {
            coopnet::demo::run_demo()?;
        }
        Commands::Validate { path } => {
            let dump = fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            match Ledger::load(config.node.node_id.as_str(), &dump) {
                Ok(ledger) => {
                    println!("ledger is valid ({} entries)", ledger.len());
                }
                Err(e) => {
                    eprintln!("ledger is NOT valid: {e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Dump { path } => {
            let dump = fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let ledger = Ledger::load(config.node.node_id.as_str(), &dump)
                .map_err(|e| anyhow::anyhow!("refusing to dump an invalid ledger: {e}"))?;
            println!("{}", ledger.dump()?);
        }
    }
    Ok(())
}
