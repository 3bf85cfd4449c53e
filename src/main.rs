use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod generate;
mod output;
mod quiz;
mod results;
mod retry;
mod runner;
mod scoring;
mod stance;
mod statements;

use crate::config::Config;
use crate::output::OutputFormat;
use crate::runner::Runner;

/// Probe the political leanings of language models: generate responses to
/// ideology statements, classify their stance, submit the quiz, chart the
/// results.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    config_file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate responses to the probe statements
    Respond {
        /// Restrict to one configured model (key or full identifier)
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Classify stances and write score files
    Score {
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Drive the quiz site and write result files
    Submit {
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Run respond, score, and submit for each model
    Run {
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Collect result files and print the shareable chart URL
    Results {
        /// Output format: plain or json
        #[arg(short, long, default_value = "plain")]
        output: OutputFormat,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = Config::from_file(&args.config_file)?;
    let runner = Runner::new(config);

    match args.command {
        Command::Respond { model } => runner.respond(model.as_deref()).await?,
        Command::Score { model } => runner.score(model.as_deref()).await?,
        Command::Submit { model } => runner.submit(model.as_deref()).await?,
        Command::Run { model } => runner.run(model.as_deref()).await?,
        Command::Results { output } => {
            let entries = results::collect(&runner.config().results_dir())?;
            output::print_results(&entries, output);
        }
    }

    Ok(())
}
