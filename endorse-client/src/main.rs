use endorse_client::{ClientConfig, Session, TransactionProposal};

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use simple_logger::SimpleLogger;

#[derive(Debug, Parser)]
#[command(
    name = "endorse-client",
    version = "0.1.0",
    author = "Shapooo",
    about = "Submit and evaluate chaincode transactions"
)]
struct Cli {
    /// Client config file, defaults to `client_config.yaml' next to the binary
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Endorse, order and wait for the commit of a transaction
    Invoke {
        chaincode: String,
        function: String,
        args: Vec<String>,
        /// Private input passed to endorsers only, as key=value
        #[arg(short, long = "transient", value_parser = parse_key_value)]
        transient: Vec<(String, String)>,
    },
    /// Evaluate a read-only function on the first peer that answers
    Query {
        chaincode: String,
        function: String,
        args: Vec<String>,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String)> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected key=value, got `{s}'"))?;
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .init()?;
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ClientConfig::from_path(path)?,
        None => ClientConfig::new()?,
    };
    let session = Session::connect(&config)?;

    match cli.command {
        Command::Invoke {
            chaincode,
            function,
            args,
            transient,
        } => {
            let proposal = transient.into_iter().fold(
                TransactionProposal::builder(chaincode, function).args(args),
                |builder, (key, value)| builder.transient(key, value),
            );
            let committed = session.submit_and_wait(proposal).await.map_err(|e| {
                anyhow!("{} (stage: {}, retryable: {})", e, e.stage(), e.is_retryable())
            })?;
            println!(
                "{} committed in block {}: {}",
                committed.tx_id,
                committed.block_number,
                String::from_utf8_lossy(&committed.payload)
            );
        }
        Command::Query {
            chaincode,
            function,
            args,
        } => {
            let proposal = TransactionProposal::builder(chaincode, function).args(args);
            let result = session
                .evaluate(proposal)
                .await
                .map_err(|e| anyhow!("{} (stage: {})", e, e.stage()))?;
            println!("{}", String::from_utf8_lossy(&result.payload));
        }
    }
    Ok(())
}
