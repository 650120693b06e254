//! Environment-based Configuration
//!
//! All runtime knobs come from environment variables (loaded via dotenv in
//! the binary). Bridge policy lives here: confirmation depth, poll
//! intervals, timeouts, fee policy and broadcast retry bounds.
//!
//! # Environment Variables
//!
//! - `PEG_NETWORK` - "mainnet", "testnet" or "signet" (default: "testnet")
//! - `PEG_ESPLORA_URL` - Esplora API endpoint (default per network)
//! - `PEG_SIDECHAIN_RPC` - sidechain RPC endpoint
//! - `PEG_REQUIRED_DEPTH` - confirmations required on peg transactions
//! - `PEG_POLL_INTERVAL_SECS` - chain poll interval
//! - `PEG_FUNDS_TIMEOUT_SECS` - how long `deposit` waits for funds
//! - `PEG_CONFIRM_TIMEOUT_SECS` - how long confirmation waits may take
//! - `PEG_SIGNATURE_TIMEOUT_SECS` - how long `withdraw` waits for signatories
//! - `PEG_FEE_RATE` - sats/vbyte for forward transactions
//! - `PEG_BROADCAST_RETRIES` - broadcast attempts before failing
//! - `PEG_DB_PATH` - SQLite session database (default: ~/.pegbtc/sessions.db)
//! - `PEG_WALLET_PATH` - wallet key file (default: ~/.pegbtc/wallet.key)
//! - `PEG_LOG_LEVEL` - logging level (debug, info, warn, error)

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::deposit::coordinator::DepositPolicy;
use crate::withdrawal::coordinator::WithdrawalPolicy;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Network environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Signet,
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "signet" => Ok(Network::Signet),
            _ => Err(ConfigError::InvalidValue(
                "PEG_NETWORK".to_string(),
                format!("unknown network: {}", s),
            )),
        }
    }
}

impl Network {
    /// Default Esplora API for this network
    pub fn default_esplora_api(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://blockstream.info/api",
            Network::Testnet => "https://blockstream.info/testnet/api",
            Network::Signet => "https://blockstream.info/signet/api",
        }
    }

    /// The bitcoin crate's network enum
    pub fn bitcoin_network(&self) -> bitcoin::Network {
        match self {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Signet => bitcoin::Network::Signet,
        }
    }
}

/// Peg client configuration
#[derive(Debug, Clone)]
pub struct PegConfig {
    /// Network environment
    pub network: Network,
    /// Esplora API endpoint
    pub esplora_url: String,
    /// Sidechain RPC endpoint
    pub sidechain_rpc: String,
    /// Confirmations required on peg transactions
    pub required_depth: u32,
    /// Chain poll interval
    pub poll_interval: Duration,
    /// How long a deposit session waits for incoming funds
    pub funds_timeout: Duration,
    /// How long confirmation waits may take
    pub confirm_timeout: Duration,
    /// How long a withdrawal waits for the signatories' payout
    pub signature_timeout: Duration,
    /// Fee rate in sats/vbyte
    pub fee_rate: u64,
    /// Broadcast attempts before a session fails
    pub broadcast_retries: u32,
    /// SQLite session database path
    pub db_path: PathBuf,
    /// Wallet key file path
    pub wallet_path: PathBuf,
}

impl PegConfig {
    /// Load configuration from the environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let network: Network = env_or("PEG_NETWORK", "testnet").parse()?;

        let esplora_url =
            env::var("PEG_ESPLORA_URL").unwrap_or_else(|_| network.default_esplora_api().to_string());

        let sidechain_rpc = env::var("PEG_SIDECHAIN_RPC")
            .map_err(|_| ConfigError::MissingEnvVar("PEG_SIDECHAIN_RPC".to_string()))?;

        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let data_dir = PathBuf::from(home).join(".pegbtc");

        let db_path = env::var("PEG_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("sessions.db"));
        let wallet_path = env::var("PEG_WALLET_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("wallet.key"));

        Ok(Self {
            network,
            esplora_url,
            sidechain_rpc,
            required_depth: parse_env("PEG_REQUIRED_DEPTH", 1)?,
            poll_interval: Duration::from_secs(parse_env("PEG_POLL_INTERVAL_SECS", 15)?),
            funds_timeout: Duration::from_secs(parse_env("PEG_FUNDS_TIMEOUT_SECS", 86_400)?),
            confirm_timeout: Duration::from_secs(parse_env("PEG_CONFIRM_TIMEOUT_SECS", 7_200)?),
            signature_timeout: Duration::from_secs(parse_env("PEG_SIGNATURE_TIMEOUT_SECS", 3_600)?),
            fee_rate: parse_env("PEG_FEE_RATE", 10)?,
            broadcast_retries: parse_env("PEG_BROADCAST_RETRIES", 3)?,
            db_path,
            wallet_path,
        })
    }

    /// Deposit-flow policy derived from this configuration
    pub fn deposit_policy(&self) -> DepositPolicy {
        DepositPolicy {
            required_depth: self.required_depth,
            poll_interval: self.poll_interval,
            funds_timeout: self.funds_timeout,
            confirm_timeout: self.confirm_timeout,
            broadcast_retries: self.broadcast_retries,
            broadcast_backoff: Duration::from_secs(5),
        }
    }

    /// Withdrawal-flow policy derived from this configuration
    pub fn withdrawal_policy(&self) -> WithdrawalPolicy {
        WithdrawalPolicy {
            required_depth: self.required_depth,
            poll_interval: self.poll_interval,
            signature_timeout: self.signature_timeout,
            confirm_timeout: self.confirm_timeout,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_parsing() {
        assert_eq!(Network::from_str("mainnet").unwrap(), Network::Mainnet);
        assert_eq!(Network::from_str("Testnet").unwrap(), Network::Testnet);
        assert_eq!(Network::from_str("signet").unwrap(), Network::Signet);
        assert!(Network::from_str("regtest").is_err());
    }

    #[test]
    fn test_bitcoin_network_mapping() {
        assert_eq!(
            Network::Mainnet.bitcoin_network(),
            bitcoin::Network::Bitcoin
        );
        assert_eq!(
            Network::Testnet.bitcoin_network(),
            bitcoin::Network::Testnet
        );
    }

    #[test]
    fn test_default_esplora_urls() {
        assert!(Network::Mainnet
            .default_esplora_api()
            .starts_with("https://blockstream.info"));
        assert!(Network::Testnet.default_esplora_api().contains("testnet"));
    }
}
