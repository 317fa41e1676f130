//! caeth command line
//!
//! Derives MPC-controlled addresses, prints signing payloads, finishes a
//! redirected signature request and relays signed transactions.

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use ethers_core::types::Bytes;
use std::path::PathBuf;

use caeth_core::api::{EthRpc, JsonRpcClient};
use caeth_core::config::Config;
use caeth_core::pipeline::describe_session;
use caeth_core::signing::{
    ContinuationChannel, FileSessionStore, NearSignerTransport, SessionStore, SignerClient,
};
use caeth_core::tx::{self, codec, FeeOverrides};
use caeth_core::types::{parse_address, parse_wei, DerivationPath, DEFAULT_DERIVATION_PATH};
use caeth_core::utils::init_tracing;
use caeth_core::wallet;
use caeth_core::{Pipeline, PipelineOutcome};

#[derive(Parser)]
#[command(name = "caeth")]
#[command(about = "Chain-signature client for MPC-controlled Ethereum accounts")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// TOML configuration file (defaults to Sepolia + NEAR testnet)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive the Ethereum address controlled by a NEAR account and path
    Derive(DeriveArgs),
    /// Build an unsigned transaction and print its signing payload
    Payload(PayloadArgs),
    /// Finish a redirected signature request from the wallet's return URL
    Resume(ResumeArgs),
    /// Broadcast a signed transaction
    Relay(RelayArgs),
}

#[derive(ClapArgs)]
struct DeriveArgs {
    /// NEAR account that owns the key
    #[arg(long)]
    owner: String,
    #[arg(long, default_value = DEFAULT_DERIVATION_PATH)]
    path: String,
    /// Also fetch the address balance
    #[arg(long, default_value_t = false)]
    balance: bool,
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(ClapArgs)]
struct PayloadArgs {
    #[arg(long)]
    from: String,
    #[arg(long)]
    to: String,
    /// Amount in wei, decimal or 0x-hex
    #[arg(long)]
    value_wei: String,
    /// Calldata as hex
    #[arg(long)]
    data: Option<String>,
    #[arg(long)]
    nonce: Option<u64>,
    #[arg(long)]
    gas_limit: Option<u64>,
    /// Max fee per gas in wei
    #[arg(long)]
    max_fee: Option<String>,
    /// Max priority fee per gas in wei
    #[arg(long)]
    priority_fee: Option<String>,
    /// Use the fixed gas limits instead of eth_estimateGas
    #[arg(long, default_value_t = false)]
    skip_estimation: bool,
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(ClapArgs)]
struct ResumeArgs {
    /// URL the wallet returned to
    #[arg(long, required_unless_present = "abandon")]
    url: Option<String>,
    /// NEAR account that made the request
    #[arg(long)]
    owner: String,
    /// Session file holding the pending request
    #[arg(long, default_value = "caeth-session.json")]
    session: PathBuf,
    /// Relay the transaction once it is signed
    #[arg(long, default_value_t = false)]
    relay: bool,
    /// Drop the pending request instead of finishing it
    #[arg(long, default_value_t = false, conflicts_with_all = ["url", "relay"])]
    abandon: bool,
}

#[derive(ClapArgs)]
struct RelayArgs {
    /// Signed transaction as hex
    #[arg(long)]
    raw: String,
    /// Wait for the receipt
    #[arg(long, default_value_t = false)]
    wait: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let config = load_config(args.config.as_ref())?;

    match args.command {
        Commands::Derive(derive_args) => run_derive(&config, derive_args),
        Commands::Payload(payload_args) => run_payload(&config, payload_args),
        Commands::Resume(resume_args) => run_resume(config, resume_args),
        Commands::Relay(relay_args) => run_relay(&config, relay_args),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::sepolia_testnet(),
    };
    let config = config.apply_env()?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn run_derive(config: &Config, args: DeriveArgs) -> Result<()> {
    let path = DerivationPath::new(args.owner, args.path)?;
    let account = wallet::derive(&config.root_key()?, &path)?;

    let balance = if args.balance {
        let rpc = JsonRpcClient::new(config.rpc_url.clone())?;
        Some(rpc.balance(account.address)?)
    } else {
        None
    };

    if args.json {
        let mut out = serde_json::json!({
            "owner": path.owner_id,
            "path": path.path,
            "address": account.address_checksummed(),
            "public_key": account.public_key_hex(),
        });
        if let Some(balance) = balance {
            out["balance_wei"] = serde_json::Value::String(balance.to_string());
        }
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("Address:    {}", account.address_checksummed());
        println!("Public key: {}", account.public_key_hex());
        if let Some(balance) = balance {
            println!("Balance:    {} wei", balance);
        }
    }
    Ok(())
}

fn run_payload(config: &Config, args: PayloadArgs) -> Result<()> {
    let sender = parse_address(&args.from)?;
    let to = parse_address(&args.to)?;
    let value = parse_wei(&args.value_wei)?;
    let data = match &args.data {
        Some(hex_data) => Some(Bytes::from(hex::decode(hex_data.trim_start_matches("0x"))?)),
        None => None,
    };

    let overrides = FeeOverrides {
        nonce: args.nonce,
        gas_limit: args.gas_limit,
        max_fee_per_gas: args.max_fee.as_deref().map(parse_wei).transpose()?,
        max_priority_fee_per_gas: args.priority_fee.as_deref().map(parse_wei).transpose()?,
        skip_estimation: args.skip_estimation,
    };

    let rpc = JsonRpcClient::new(config.rpc_url.clone())?;
    let unsigned = tx::build(&rpc, config.chain_id, sender, to, value, data, &overrides)?;
    let payload = codec::hash(&unsigned);
    let encoded = format!("0x{}", hex::encode(codec::encode_unsigned(&unsigned)));
    let max_cost = codec::max_cost(&unsigned);

    if args.json {
        let out = serde_json::json!({
            "transaction": unsigned,
            "unsigned": encoded,
            "payload": payload.to_hex(),
            "max_cost_wei": max_cost.to_string(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("Unsigned: {}", encoded);
        println!("Payload:  {}", payload.to_hex());
        println!("Max cost: {} wei", max_cost);
    }
    Ok(())
}

fn run_resume(config: Config, args: ResumeArgs) -> Result<()> {
    let rpc = JsonRpcClient::new(config.rpc_url.clone())?;
    let transport = NearSignerTransport::new(
        config.near_rpc_url.clone(),
        config.signer_contract.clone(),
        args.owner.clone(),
    )?;
    let signer = SignerClient::new(transport, config.key_version, config.deposit_yocto);
    let store = FileSessionStore::new(&args.session);
    let pipeline = Pipeline::new(config, args.owner, rpc, signer, store)?;

    let Some(url) = args.url else {
        match pipeline.abandon_pending()? {
            Some(token) => println!("Abandoned:  pending request for {}", token.path),
            None => println!("No pending signature request"),
        }
        return Ok(());
    };

    let outcome = pipeline.resume(&url)?;
    println!("Return URL: {}", ContinuationChannel::clear(&url)?);

    let signed = match outcome {
        Some(PipelineOutcome::Signed(signed)) => signed,
        Some(other) => bail!("unexpected outcome: {:?}", other),
        None => {
            println!("No pending signature request");
            println!("Session:    {}", describe_session(&pipeline.store().load()?));
            return Ok(());
        }
    };
    println!("Signed:     {}", codec::raw_hex(&signed));

    if args.relay {
        let id = pipeline.relay(&signed)?;
        println!("Relayed:    {}", id);
        if let Some(url) = id.explorer_url(pipeline.config().chain_id) {
            println!("Explorer:   {}", url);
        }
    }
    Ok(())
}

fn run_relay(config: &Config, args: RelayArgs) -> Result<()> {
    let rpc = JsonRpcClient::new(config.rpc_url.clone())?;
    let id = tx::submit_raw_hex(&rpc, &args.raw)?;
    println!("Transaction: {}", id);
    if let Some(url) = id.explorer_url(config.chain_id) {
        println!("Explorer:    {}", url);
    }

    if args.wait {
        let status = tx::await_receipt(&rpc, &id, config.receipt_poll_interval(), config.receipt_timeout())?;
        println!("Status:      {:?}", status);
    }
    Ok(())
}
