//! pegbtc CLI
//!
//! Commands:
//!   balance                        Show your sidechain address and balance
//!   send <address> <amount>        Send peg units to another sidechain account
//!   deposit                        Print a Bitcoin deposit address, then block
//!                                  through the full deposit flow
//!   withdraw <address> <amount>    Withdraw to a Bitcoin address, blocking
//!                                  until the payout confirms
//!
//! Amounts are satoshis. Exits non-zero when a session fails.

use std::env;
use std::process;
use std::sync::Arc;

use pegbtc::builder::FeePolicy;
use pegbtc::config::PegConfig;
use pegbtc::deposit::DepositCoordinator;
use pegbtc::sidechain::SidechainClient;
use pegbtc::units;
use pegbtc::wallet::{FileKeyProvider, KeyProvider};
use pegbtc::withdrawal::{ReservationLedger, WithdrawalCoordinator};
use pegbtc::{
    DepositState, EsploraClient, HttpSidechainClient, SqliteSessionStore, TxBuilder,
    WithdrawalState,
};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    if let Err(e) = pegbtc::logging::init_from_env() {
        eprintln!("warning: {}", e);
    }

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return;
    }

    let result = match args[1].as_str() {
        "balance" if args.len() == 2 => run_balance().await,
        "send" if args.len() == 4 => run_send(&args[2], &args[3]).await,
        "deposit" if args.len() == 2 => run_deposit().await,
        "withdraw" if args.len() == 4 => run_withdraw(&args[2], &args[3]).await,
        "help" | "--help" | "-h" => {
            print_usage();
            return;
        }
        _ => {
            print_usage();
            process::exit(2);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn print_usage() {
    println!("pegbtc - Bitcoin peg client");
    println!();
    println!("Usage: pegbtc [command]");
    println!();
    println!("Commands:");
    println!("  balance                       Display your sidechain address and balance");
    println!("  send     <address> <amount>   Send peg units to another account (sats)");
    println!("  deposit                       Generate and display a Bitcoin deposit address");
    println!("  withdraw <address> <amount>   Withdraw to a Bitcoin address (sats)");
    println!();
    println!("Environment:");
    println!("  PEG_NETWORK         mainnet | testnet | signet (default: testnet)");
    println!("  PEG_SIDECHAIN_RPC   sidechain RPC endpoint (required)");
    println!("  PEG_ESPLORA_URL     Esplora API endpoint (default per network)");
}

struct App {
    config: PegConfig,
    chain: Arc<EsploraClient>,
    sidechain: Arc<HttpSidechainClient>,
    store: Arc<SqliteSessionStore>,
    wallet: FileKeyProvider,
}

fn build_app() -> pegbtc::Result<App> {
    let config = PegConfig::from_env()?;

    let chain = Arc::new(EsploraClient::new(&config.esplora_url));
    let sidechain = Arc::new(HttpSidechainClient::new(&config.sidechain_rpc));
    let store = Arc::new(SqliteSessionStore::new(&config.db_path)?);
    let wallet = FileKeyProvider::new(&config.wallet_path);

    Ok(App {
        config,
        chain,
        sidechain,
        store,
        wallet,
    })
}

fn tx_builder(config: &PegConfig) -> TxBuilder {
    TxBuilder::new(config.network.bitcoin_network())
        .with_fee_policy(FeePolicy::Rate(config.fee_rate))
}

async fn run_balance() -> pegbtc::Result<()> {
    let app = build_app()?;
    let address = app.wallet.account_address()?;
    let balance = app.sidechain.balance(&address).await?;

    println!("Your address: {}", address);
    println!("Your balance: {}", units::format_sats(balance));
    Ok(())
}

async fn run_send(to: &str, amount: &str) -> pegbtc::Result<()> {
    let app = build_app()?;
    let amount = parse_amount(amount)?;
    app.sidechain.transfer(to, amount).await?;

    println!("Sent {} to {}", units::format_sats(amount), to);
    Ok(())
}

async fn run_deposit() -> pegbtc::Result<()> {
    let app = build_app()?;
    let recipient = app.wallet.account_address()?;

    let coordinator = DepositCoordinator::new(
        app.config.network.bitcoin_network(),
        app.config.deposit_policy(),
        app.chain.clone(),
        app.sidechain.clone(),
        app.store.clone(),
        tx_builder(&app.config),
    );

    let handle = coordinator.begin(&recipient).await?;
    println!("Deposit address: {}", handle.address());
    println!();
    println!("Waiting for deposit...");

    let session = coordinator.drive(handle).await?;
    match session.state {
        DepositState::Completed => {
            println!(
                "Deposit of {} confirmed (forward tx {}).",
                units::format_sats(session.detected_sats),
                session.forward_txid.as_deref().unwrap_or("unknown"),
            );
            println!();
            println!("Check your balance with:");
            println!("$ pegbtc balance");
            Ok(())
        }
        _ => {
            eprintln!(
                "Deposit failed: {}",
                session.error.as_deref().unwrap_or("unknown error")
            );
            process::exit(1);
        }
    }
}

async fn run_withdraw(address: &str, amount: &str) -> pegbtc::Result<()> {
    let app = build_app()?;
    let amount = parse_amount(amount)?;

    let coordinator = WithdrawalCoordinator::new(
        app.config.network.bitcoin_network(),
        app.config.withdrawal_policy(),
        app.chain.clone(),
        app.sidechain.clone(),
        app.store.clone(),
        tx_builder(&app.config),
        Arc::new(ReservationLedger::new()),
    );

    let session = coordinator.submit(address, amount).await?;
    println!("Withdrawal submitted.");
    println!("Waiting for signatories to build the Bitcoin transaction...");

    let session = coordinator.drive(session).await?;
    match session.state {
        WithdrawalState::Completed => {
            println!(
                "Withdrawal of {} confirmed (payout tx {}).",
                units::format_sats(session.amount_sats),
                session.payout_txid.as_deref().unwrap_or("unknown"),
            );
            Ok(())
        }
        _ => {
            eprintln!(
                "Withdrawal failed: {}",
                session.error.as_deref().unwrap_or("unknown error")
            );
            process::exit(1);
        }
    }
}

fn parse_amount(raw: &str) -> pegbtc::Result<u64> {
    raw.parse().map_err(|_| {
        pegbtc::config::ConfigError::InvalidValue("amount".to_string(), raw.to_string()).into()
    })
}
