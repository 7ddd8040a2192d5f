use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use escrow_oracle::config::OracleConfig;
use escrow_oracle::models::event::ContractCall;
use escrow_oracle::models::verification::JobResponse;
use escrow_oracle::services::ledger::{Connector, EvmConnector};
use escrow_oracle::services::storage::{ArtifactStore, IpfsStore};

#[derive(Parser)]
#[command(name = "oracle_admin")]
#[command(about = "Operator tools for the escrow verification oracle", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the on-chain record of a job
    Job {
        job_id: u64,
    },

    /// Settle a disputed job as the oracle
    Resolve {
        job_id: u64,

        /// Release the escrow to the freelancer
        #[arg(long, conflicts_with = "refund", required_unless_present = "refund")]
        release: bool,

        /// Refund the escrow to the client
        #[arg(long)]
        refund: bool,
    },

    /// Add a local file to IPFS and print its hash
    Upload {
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = OracleConfig::from_env().context("Failed to load configuration")?;

    match cli.command {
        Commands::Job { job_id } => {
            let ledger = EvmConnector::from_config(&config)?.connect().await?;
            let job = ledger.read_job(job_id).await?;
            println!("{}", serde_json::to_string_pretty(&JobResponse::from(job))?);
        }
        Commands::Resolve {
            job_id,
            release,
            refund,
        } => {
            if release == refund {
                bail!("pass exactly one of --release or --refund");
            }
            let ledger = EvmConnector::from_config(&config)?.connect().await?;
            let receipt = ledger
                .submit(ContractCall::ResolveDispute {
                    job_id,
                    release_to_freelancer: release,
                })
                .await?;
            if !receipt.success {
                bail!("resolveDispute reverted in transaction {:?}", receipt.tx_hash);
            }
            println!("resolved job {} in transaction {:?}", job_id, receipt.tx_hash);
        }
        Commands::Upload { path } => {
            let store = IpfsStore::new(
                &config.ipfs_api_url,
                config.ipfs_timeout(),
                config.scratch_root(),
            )?;
            let hash = store
                .store(&path)
                .await
                .with_context(|| format!("Failed to upload {}", path.display()))?;
            println!("{}", hash);
        }
    }

    Ok(())
}
