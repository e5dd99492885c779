use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use colarun::config::Config;

mod cmd;

#[derive(Parser)]
#[command(name = "colarun")]
#[command(version, about = "Lattice QCD job-lifecycle orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Path to colarun.toml. Overrides COLARUN_CONFIG and .colarun/colarun.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the sweep for one configuration, then submit the next one
    Run {
        /// 1-based configuration index (defaults to COLARUN_NTH_CONFIG)
        #[arg(short, long)]
        nth_config: Option<u32>,

        /// Do not submit a follow-up job
        #[arg(long)]
        no_chain: bool,

        /// Replace every solver and the scheduler with logging stand-ins
        #[arg(long)]
        dry_run: bool,
    },
    /// Submit a job for one configuration (starts a chain)
    Submit {
        #[arg(short, long)]
        nth_config: u32,

        /// Log the submission instead of calling the scheduler
        #[arg(long)]
        dry_run: bool,
    },
    /// List configurations whose correlators are not all present
    Check {
        /// Read archive cfglists instead of opening every archive
        #[arg(long)]
        quick: bool,

        /// Write the missing list here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the run-state log
    Status {
        /// Only entries for this configuration id
        #[arg(long)]
        cfg: Option<String>,

        /// Number of recent entries to show
        #[arg(short = 'n', long, default_value = "10")]
        recent: usize,

        /// Print the matching entries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Clear the run-state log
    Reset {
        #[arg(long)]
        force: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default colarun.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    colarun::logging::init(cli.verbose, cli.log_json);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    // Built per command so `config init` works before a valid file exists
    let config = || Config::new(project_dir.clone(), cli.verbose, cli.config.clone());

    match &cli.command {
        Commands::Run {
            nth_config,
            no_chain,
            dry_run,
        } => cmd::cmd_run(&config()?, *nth_config, *no_chain, *dry_run).await?,
        Commands::Submit {
            nth_config,
            dry_run,
        } => cmd::cmd_submit(&config()?, *nth_config, *dry_run).await?,
        Commands::Check { quick, output } => {
            cmd::cmd_check(&config()?, *quick, output.as_deref())?
        }
        Commands::Status { cfg, recent, json } => {
            cmd::cmd_status(&config()?, cfg.as_deref(), *recent, *json)?
        }
        Commands::Reset { force } => cmd::cmd_reset(&config()?, *force)?,
        Commands::Config { command } => {
            cmd::cmd_config(&project_dir, cli.config.clone(), command.clone())?
        }
    }

    Ok(())
}
