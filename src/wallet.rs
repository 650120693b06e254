//! Wallet Key Provider
//!
//! The ambient wallet key (the user's sidechain account identity) is not
//! core state: coordinators receive it through the [`KeyProvider`]
//! capability. The file-backed implementation reads a hex key from disk or
//! generates one on first use.
//!
//! Sidechain account addresses use the same hash160 + base58check shape as
//! Bitcoin addresses, with their own version byte.

use bitcoin::hashes::{hash160, Hash};
use bitcoin::{base58, PublicKey};
use secp256k1::{Secp256k1, SecretKey};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::keys::DepositKey;

/// Version byte prefixing sidechain account payloads
pub const ACCOUNT_VERSION: u8 = 0x42;

/// Wallet errors
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("failed to read wallet key: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored wallet key is invalid: {0}")]
    InvalidKey(String),

    #[error("invalid account address: {0}")]
    InvalidAddress(String),
}

/// Supplies the wallet's signing key to the coordinators
pub trait KeyProvider: Send + Sync {
    /// Load the wallet key, creating one if none exists yet
    fn load_or_generate(&self) -> Result<SecretKey, WalletError>;

    /// The wallet's sidechain account address
    fn account_address(&self) -> Result<String, WalletError> {
        let secp = Secp256k1::new();
        let secret = self.load_or_generate()?;
        let public = PublicKey::new(secp256k1::PublicKey::from_secret_key(&secp, &secret));
        Ok(account_address(&public))
    }
}

/// File-backed key provider (hex-encoded secret on disk)
pub struct FileKeyProvider {
    path: PathBuf,
}

impl FileKeyProvider {
    /// Provider reading from an explicit path
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Default location under the user's home directory
    pub fn default_path() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Self::new(Path::new(&home).join(".pegbtc").join("wallet.key"))
    }
}

impl KeyProvider for FileKeyProvider {
    fn load_or_generate(&self) -> Result<SecretKey, WalletError> {
        if self.path.exists() {
            let hex_key = std::fs::read_to_string(&self.path)?;
            let bytes = hex::decode(hex_key.trim())
                .map_err(|e| WalletError::InvalidKey(e.to_string()))?;
            return SecretKey::from_slice(&bytes)
                .map_err(|e| WalletError::InvalidKey(e.to_string()));
        }

        let key = DepositKey::generate();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, key.secret_hex())?;

        Ok(*key.secret_key())
    }
}

/// Encode a public key as a sidechain account address
pub fn account_address(public: &PublicKey) -> String {
    let digest = hash160::Hash::hash(&public.to_bytes());

    let mut payload = Vec::with_capacity(21);
    payload.push(ACCOUNT_VERSION);
    payload.extend_from_slice(digest.as_byte_array());

    base58::encode_check(&payload)
}

/// Decode a sidechain account address to its 20-byte account hash.
///
/// This is the commitment embedded in deposit forwards.
pub fn decode_account(address: &str) -> Result<[u8; 20], WalletError> {
    let payload =
        base58::decode_check(address).map_err(|e| WalletError::InvalidAddress(e.to_string()))?;

    if payload.len() != 21 || payload[0] != ACCOUNT_VERSION {
        return Err(WalletError::InvalidAddress(format!(
            "unexpected account payload in {}",
            address
        )));
    }

    let mut account = [0u8; 20];
    account.copy_from_slice(&payload[1..]);
    Ok(account)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_address_round_trip() {
        let key = DepositKey::generate();
        let address = account_address(&key.public_key());

        let decoded = decode_account(&address).unwrap();
        let expected = hash160::Hash::hash(&key.public_key().to_bytes());
        assert_eq!(decoded, *expected.as_byte_array());
    }

    #[test]
    fn test_account_address_is_deterministic() {
        let key = DepositKey::generate();
        assert_eq!(
            account_address(&key.public_key()),
            account_address(&key.public_key())
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_account("not-base58-0OIl").is_err());
    }

    #[test]
    fn test_decode_rejects_wrong_version() {
        let payload = vec![0x00; 21];
        let address = base58::encode_check(&payload);
        assert!(decode_account(&address).is_err());
    }

    #[test]
    fn test_file_provider_generates_then_reloads() {
        let dir = std::env::temp_dir().join(format!("pegbtc-test-{:x}", rand::random::<u64>()));
        let provider = FileKeyProvider::new(dir.join("wallet.key"));

        let first = provider.load_or_generate().unwrap();
        let second = provider.load_or_generate().unwrap();
        assert_eq!(first, second);

        std::fs::remove_dir_all(&dir).ok();
    }
}
