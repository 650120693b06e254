//! Ephemeral Deposit Keys
//!
//! Each deposit gets its own throwaway secp256k1 keypair. The derived
//! address receives exactly one user's funds before they are forwarded to
//! the reserve, so the key is held in memory for the lifetime of the
//! deposit session and discarded afterwards.

use bitcoin::{Address, Network, PublicKey, ScriptBuf};
use secp256k1::{Secp256k1, SecretKey};
use std::str::FromStr;
use thiserror::Error;

/// Key derivation errors
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key: {0}")]
    InvalidKey(String),

    #[error("address encoding failed: {0}")]
    Encoding(String),
}

/// A single-use deposit keypair
#[derive(Clone)]
pub struct DepositKey {
    secret: SecretKey,
    public: PublicKey,
}

impl DepositKey {
    /// Generate a fresh random keypair.
    ///
    /// Draws 32 random bytes and rejects any draw that is not a valid
    /// secp256k1 scalar (zero or >= the curve order), re-drawing until one
    /// passes. Rejection is astronomically unlikely but must not be
    /// silently accepted.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let secret = loop {
            let bytes: [u8; 32] = rand::random();
            match SecretKey::from_slice(&bytes) {
                Ok(key) => break key,
                Err(_) => continue,
            }
        };
        let public = PublicKey::new(secp256k1::PublicKey::from_secret_key(&secp, &secret));

        Self { secret, public }
    }

    /// Reconstruct a keypair from stored secret bytes (session resume).
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let secp = Secp256k1::new();
        let secret =
            SecretKey::from_slice(bytes).map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        let public = PublicKey::new(secp256k1::PublicKey::from_secret_key(&secp, &secret));

        Ok(Self { secret, public })
    }

    /// Reconstruct from a hex-encoded secret (session resume).
    pub fn from_secret_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key).map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        Self::from_secret_bytes(&bytes)
    }

    /// The secret scalar
    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    /// Secret bytes for session persistence
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.secret_bytes()
    }

    /// Hex-encoded secret for session persistence
    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret_bytes())
    }

    /// The compressed public key
    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    /// The deposit address for this key on the given network
    pub fn address(&self, network: Network) -> Result<Address, KeyError> {
        derive_address(&self.public, network)
    }

    /// The scriptPubKey funds to this key must match
    pub fn script_pubkey(&self) -> ScriptBuf {
        ScriptBuf::new_p2pkh(&self.public.pubkey_hash())
    }
}

impl std::fmt::Debug for DepositKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print the secret
        f.debug_struct("DepositKey")
            .field("public", &self.public)
            .finish()
    }
}

/// Derive the standard pay-to-pubkey-hash address for a compressed public
/// key: SHA-256 then RIPEMD-160 over the key bytes, version prefix,
/// base58check.
///
/// The encode is verified by decoding it back; a mismatch means the
/// checksum machinery itself is broken and surfaces as `KeyError::Encoding`.
pub fn derive_address(public: &PublicKey, network: Network) -> Result<Address, KeyError> {
    let address = Address::p2pkh(public.pubkey_hash(), network);

    let rendered = address.to_string();
    let reparsed = Address::from_str(&rendered)
        .map_err(|e| KeyError::Encoding(e.to_string()))?
        .require_network(network)
        .map_err(|e| KeyError::Encoding(e.to_string()))?;

    if reparsed != address {
        return Err(KeyError::Encoding(format!(
            "address round-trip mismatch for {}",
            rendered
        )));
    }

    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_produces_valid_key() {
        let key = DepositKey::generate();
        // secret round-trips through the library's own validation
        assert!(SecretKey::from_slice(&key.secret_bytes()).is_ok());
    }

    #[test]
    fn test_generated_keys_are_unique() {
        let a = DepositKey::generate();
        let b = DepositKey::generate();
        assert_ne!(a.secret_bytes(), b.secret_bytes());
    }

    #[test]
    fn test_address_derivation_is_deterministic() {
        let key = DepositKey::generate();
        let addr1 = key.address(Network::Testnet).unwrap();
        let addr2 = key.address(Network::Testnet).unwrap();
        assert_eq!(addr1, addr2);
    }

    #[test]
    fn test_address_checksum_decodes() {
        let key = DepositKey::generate();
        let addr = key.address(Network::Testnet).unwrap();

        let parsed = Address::from_str(&addr.to_string())
            .unwrap()
            .require_network(Network::Testnet)
            .unwrap();
        assert_eq!(parsed, addr);
    }

    #[test]
    fn test_address_matches_script_pubkey() {
        let key = DepositKey::generate();
        let addr = key.address(Network::Testnet).unwrap();
        assert_eq!(addr.script_pubkey(), key.script_pubkey());
    }

    #[test]
    fn test_secret_hex_round_trip() {
        let key = DepositKey::generate();
        let restored = DepositKey::from_secret_hex(&key.secret_hex()).unwrap();
        assert_eq!(restored.secret_bytes(), key.secret_bytes());
        assert_eq!(restored.public_key(), key.public_key());
    }

    #[test]
    fn test_invalid_secret_rejected() {
        // zero is not a valid scalar
        assert!(DepositKey::from_secret_bytes(&[0u8; 32]).is_err());
        // wrong length
        assert!(DepositKey::from_secret_bytes(&[1u8; 16]).is_err());
    }
}
