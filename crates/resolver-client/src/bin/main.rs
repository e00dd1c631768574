//! linked-resolve CLI
//!
//! Usage:
//!   linked-resolve --config resolver.json raffy.chonk.eth text description
//!   linked-resolve --config resolver.json --snapshot state.json raffy.eth addr 60
//!   linked-resolve --config resolver.json --handshake a.b.c.raffy.eth contenthash

use std::path::PathBuf;

use alloy_primitives::U256;
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use resolver_client::{
    ClientConfig, Handshake, HttpProver, LocalProver, LookupOutcome, Prover, RecordValue,
    ResolverBuilder, RpcCaller,
};
use resolver_core::{Delegation, DelegationStatus, MemoryState, RecordKind};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "linked-resolve")]
#[command(about = "Resolve linked names through storage-proof programs")]
struct Args {
    /// Client config file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the prover URL
    #[arg(long)]
    prover_url: Option<String>,

    /// Override the JSON-RPC URL
    #[arg(long)]
    rpc_url: Option<String>,

    /// Override the block tag
    #[arg(long)]
    block: Option<String>,

    /// Evaluate against a local storage snapshot instead of a remote prover
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Go through the resolving contract's OffchainLookup handshake
    #[arg(long)]
    handshake: bool,

    /// Check leased delegations against this unix timestamp
    #[arg(long)]
    now: Option<u64>,

    /// Name to resolve
    name: String,

    #[command(subcommand)]
    record: Record,
}

#[derive(Subcommand, Debug)]
enum Record {
    /// Address record for a coin type
    Addr {
        #[arg(default_value_t = 60)]
        coin_type: u64,
    },
    /// Text record
    Text { key: String },
    /// Content hash
    Contenthash,
    /// Public key `(x, y)`
    Pubkey,
}

impl From<Record> for RecordKind {
    fn from(record: Record) -> Self {
        match record {
            Record::Addr { coin_type } => RecordKind::Addr(U256::from(coin_type)),
            Record::Text { key } => RecordKind::Text(key),
            Record::Contenthash => RecordKind::Contenthash,
            Record::Pubkey => RecordKind::Pubkey,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    if let Some(url) = args.prover_url {
        config.prover_url = url;
    }
    if let Some(url) = args.rpc_url {
        config.rpc_url = url;
    }
    if let Some(block) = args.block {
        config.block = block;
    }

    let record = RecordKind::from(args.record);
    let delegation = match args.now {
        Some(now) => Delegation::Leased { now },
        None => Delegation::Registry,
    };

    match args.snapshot {
        Some(path) => {
            let prover = LocalProver::new(MemoryState::load(&path)?);
            run(&config, args.handshake, &args.name, record, delegation, prover).await
        }
        None => {
            let prover =
                HttpProver::with_timeout(&config.prover_url, &config.block, config.timeout())?;
            run(&config, args.handshake, &args.name, record, delegation, prover).await
        }
    }
}

async fn run<P: Prover>(
    config: &ClientConfig,
    handshake: bool,
    name: &str,
    record: RecordKind,
    delegation: Delegation,
    prover: P,
) -> Result<()> {
    if handshake {
        let resolver = config
            .resolver
            .ok_or_else(|| anyhow!("--handshake needs `resolver` in the config"))?;
        let caller = RpcCaller::with_timeout(&config.rpc_url, &config.block, config.timeout())?;

        let outcome = Handshake::new(caller, prover, resolver)
            .with_retries(config.prover_retries)
            .lookup(name, record)
            .await?;

        match outcome {
            LookupOutcome::Answered(value) => println!("{}", value),
            LookupOutcome::Aborted { exit_code } => {
                println!("<absent: program aborted with exit code {}>", exit_code)
            }
        }
        return Ok(());
    }

    let resolver = ResolverBuilder::from_config(config)
        .delegation(delegation)
        .build(prover);
    let resolved = resolver.resolve(name, &record).await?;

    if let DelegationStatus::Absent { exit_code } = resolved.delegation {
        println!("<absent: delegation unavailable, exit code {}>", exit_code);
        return Ok(());
    }

    println!("{}", RecordValue::from_raw(&record, resolved.value));
    Ok(())
}
