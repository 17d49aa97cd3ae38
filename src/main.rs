//! Unstaker CLI
//!
//! Builds, signs and broadcasts staking withdrawal transactions.
//!
//! Usage:
//!   unstaker withdraw <staking_tx_hash> <btc_addr> --delegations <file> [options]
//!   unstaker params [--height <h>]
//!   unstaker status <txid>
//!   unstaker keygen

use std::env;
use std::fs;
use std::process;
use std::sync::Arc;

use unstaker::config::UnstakerConfig;
use unstaker::esplora::EsploraClient;
use unstaker::types::units;
use unstaker::types::Delegation;
use unstaker::withdrawal::{
    resolve_params_version, HttpParamsSource, ParamsSource, SingleKeySigner, StaticParamsSource,
    WithdrawalService,
};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return;
    }

    match args[1].as_str() {
        "withdraw" => cmd_withdraw(&args[2..]).await,
        "params" => cmd_params(&args[2..]).await,
        "status" => cmd_status(&args[2..]).await,
        "keygen" => cmd_keygen(),
        "help" | "--help" | "-h" => print_usage(),
        _ => print_usage(),
    }
}

fn print_usage() {
    println!("Unstaker - Staking Withdrawal Tool");
    println!();
    println!("Usage:");
    println!("  unstaker withdraw <staking_tx_hash> <btc_addr> --delegations <file> [options]");
    println!("  unstaker params [--height <h>]          Show parameter versions");
    println!("  unstaker status <txid>                  Show confirmation status");
    println!("  unstaker keygen                         Generate a new signing key");
    println!();
    println!("Withdraw options:");
    println!("  --delegations <file>   JSON file with the delegation records (required)");
    println!("  --params <file>        Read parameter versions from a file instead of the API");
    println!("  --fee-rate <n>         Fee rate in sats/vbyte (default: from environment)");
    println!("  --dry-run              Build the unsigned transaction without signing");
    println!();
    println!("Examples:");
    println!("  unstaker withdraw f4184f... tb1p... --delegations delegations.json --dry-run");
    println!("  unstaker params --height 200000");
    println!();
    println!("Environment:");
    println!("  UNSTAKER_NETWORK       mainnet | testnet | signet (default: signet)");
    println!("  UNSTAKER_PARAMS_URL    Staking API endpoint for parameter versions");
    println!("  UNSTAKER_ESPLORA_URL   Esplora API URL (defaults per network)");
    println!("  UNSTAKER_SIGNER_KEY    Hex-encoded 32-byte signing key");
    println!("  UNSTAKER_FEE_RATE      Default fee rate in sats/vbyte");
}

fn load_config() -> UnstakerConfig {
    match UnstakerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    }
}

fn load_delegations(path: &str) -> Vec<Delegation> {
    let body = match fs::read_to_string(path) {
        Ok(body) => body,
        Err(e) => {
            eprintln!("Error: cannot read {}: {}", path, e);
            process::exit(1);
        }
    };
    match serde_json::from_str(&body) {
        Ok(delegations) => delegations,
        Err(e) => {
            eprintln!("Error: cannot parse {}: {}", path, e);
            process::exit(1);
        }
    }
}

fn params_source(config: &UnstakerConfig, file: Option<&str>) -> Arc<dyn ParamsSource> {
    match file {
        Some(path) => {
            let body = match fs::read_to_string(path) {
                Ok(body) => body,
                Err(e) => {
                    eprintln!("Error: cannot read {}: {}", path, e);
                    process::exit(1);
                }
            };
            match serde_json::from_str(&body) {
                Ok(versions) => Arc::new(StaticParamsSource::new(versions)),
                Err(e) => {
                    eprintln!("Error: cannot parse {}: {}", path, e);
                    process::exit(1);
                }
            }
        }
        None => Arc::new(HttpParamsSource::new(&config.params_url)),
    }
}

async fn cmd_withdraw(args: &[String]) {
    if args.len() < 2 {
        println!("Usage: unstaker withdraw <staking_tx_hash> <btc_addr> --delegations <file>");
        return;
    }

    let staking_tx_hash = &args[0];
    let destination = &args[1];

    let mut delegations_file: Option<&str> = None;
    let mut params_file: Option<&str> = None;
    let mut fee_rate: Option<u64> = None;
    let mut dry_run = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--delegations" if i + 1 < args.len() => {
                delegations_file = Some(&args[i + 1]);
                i += 2;
            }
            "--params" if i + 1 < args.len() => {
                params_file = Some(&args[i + 1]);
                i += 2;
            }
            "--fee-rate" if i + 1 < args.len() => {
                fee_rate = args[i + 1].parse().ok();
                i += 2;
            }
            "--dry-run" => {
                dry_run = true;
                i += 1;
            }
            _ => i += 1,
        }
    }

    let config = load_config();
    if let Err(e) = unstaker::logging::init_from_config(&config) {
        eprintln!("Warning: {}", e);
    }

    let delegations_file = match delegations_file {
        Some(path) => path,
        None => {
            println!("Error: --delegations <file> is required");
            return;
        }
    };
    let delegations = load_delegations(delegations_file);
    let fee_rate = fee_rate.unwrap_or(config.fee_rate);

    let signer = match &config.signer_key {
        Some(key_hex) => match SingleKeySigner::from_hex(key_hex) {
            Ok(signer) => signer,
            Err(e) => {
                eprintln!("Error: invalid UNSTAKER_SIGNER_KEY: {}", e);
                process::exit(1);
            }
        },
        None if dry_run => SingleKeySigner::generate(),
        None => {
            eprintln!("Error: UNSTAKER_SIGNER_KEY is required to sign");
            eprintln!("Use 'unstaker keygen' to generate one, or pass --dry-run.");
            process::exit(1);
        }
    };

    let network = config.network.bitcoin_network();
    let service = WithdrawalService::new(
        network,
        params_source(&config, params_file),
        Arc::new(signer),
        Arc::new(EsploraClient::new(&config.esplora_url)),
    );

    if dry_run {
        match service
            .create_withdrawal_tx(staking_tx_hash, &delegations, destination, fee_rate)
            .await
        {
            Ok(unsigned) => {
                println!("Unsigned withdrawal built:");
                println!("  TXID: {}", unsigned.txid());
                println!("  Fee: {}", units::format_sats(unsigned.fee_sats()));
                println!("  PSBT: {}", hex::encode(unsigned.psbt_bytes()));
            }
            Err(e) => {
                eprintln!("Error [{}]: {}", e.error_code(), e);
                process::exit(1);
            }
        }
        return;
    }

    match service
        .sign_withdrawal_tx(staking_tx_hash, &delegations, destination, fee_rate)
        .await
    {
        Ok(outcome) => {
            println!("Withdrawal broadcast!");
            println!("  TXID: {}", outcome.txid);
            println!("  Fee: {}", units::format_sats(outcome.fee_sats));
            println!("  Destination: {}", destination);
        }
        Err(e) => {
            eprintln!("Error [{}]: {}", e.error_code(), e);
            process::exit(1);
        }
    }
}

async fn cmd_params(args: &[String]) {
    let mut height: Option<u64> = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--height" if i + 1 < args.len() => {
                height = args[i + 1].parse().ok();
                i += 2;
            }
            _ => i += 1,
        }
    }

    let config = load_config();
    let source = HttpParamsSource::new(&config.params_url);

    let versions = match source.fetch_versions().await {
        Ok(versions) => versions,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    if let Some(height) = height {
        match resolve_params_version(height, &versions) {
            Ok(params) => {
                println!("Version active at height {}:", height);
                println!("  Version: {}", params.version);
                println!("  Activation Height: {}", params.activation_height);
                println!("  Covenant Quorum: {}/{}", params.covenant_quorum, params.covenant_pks.len());
                println!("  Unbonding Time: {} blocks", params.unbonding_time);
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    println!("=== Parameter Versions ({}) ===", versions.len());
    println!();
    for params in &versions {
        println!("---");
        println!("Version: {}", params.version);
        println!("Activation Height: {}", params.activation_height);
        println!("Covenant Quorum: {}/{}", params.covenant_quorum, params.covenant_pks.len());
        println!("Unbonding Time: {} blocks", params.unbonding_time);
        println!(
            "Staking Amount: {} - {}",
            units::format_sats(params.min_staking_amount_sat),
            units::format_sats(params.max_staking_amount_sat)
        );
        println!(
            "Staking Time: {} - {} blocks",
            params.min_staking_time_blocks, params.max_staking_time_blocks
        );
    }
}

async fn cmd_status(args: &[String]) {
    if args.is_empty() {
        println!("Usage: unstaker status <txid>");
        return;
    }

    let txid = &args[0];
    let config = load_config();
    let client = EsploraClient::new(&config.esplora_url);

    let tip = match client.tip_height().await {
        Ok(tip) => tip,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    match client.tx_status(txid).await {
        Ok(status) => {
            println!("=== Transaction Status ===");
            println!();
            println!("TXID: {}", txid);
            println!("Chain Tip: {}", tip);
            if status.confirmed {
                let confirmations = client.confirmations(txid).await.unwrap_or(0);
                println!("Confirmed: yes");
                if let Some(height) = status.block_height {
                    println!("Block Height: {}", height);
                }
                println!("Confirmations: {}", confirmations);
            } else {
                println!("Confirmed: no (in mempool or unknown)");
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn cmd_keygen() {
    let signer = SingleKeySigner::generate();

    println!("=== New Signing Key Generated ===");
    println!();
    println!("Public Key: {}", signer.public_key_hex());
    println!("Secret Key: {}", signer.secret_hex());
    println!();
    println!("IMPORTANT: Save the secret key securely!");
    println!();
    println!("To use this key, set:");
    println!("  export UNSTAKER_SIGNER_KEY={}", signer.secret_hex());
}
