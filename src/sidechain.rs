//! Sidechain Client Seam
//!
//! The sidechain supplies already-verified state: the validator voting
//! powers, each validator's registered signatory (Bitcoin) key, the
//! wallet's balance/send surface, and withdrawal submission. This core
//! consumes it read-only behind [`SidechainClient`]; how the sidechain
//! reaches that state is out of scope.

use async_trait::async_trait;
use bitcoin::{PublicKey, ScriptBuf};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// Sidechain access errors
#[derive(Debug, Error)]
pub enum SidechainError {
    #[error("sidechain request failed: {0}")]
    Request(String),

    #[error("sidechain rejected the transaction: {0}")]
    Rejected(String),

    #[error("malformed sidechain response: {0}")]
    Parse(String),
}

/// The validator snapshot the peg derives its signatory set from.
///
/// `validators` maps consensus keys (hex) to voting power; `signatory_keys`
/// maps the same consensus keys to the compressed Bitcoin public key each
/// validator registered for reserve custody.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeggingInfo {
    /// consensus key -> voting power
    pub validators: HashMap<String, u64>,
    /// consensus key -> hex-encoded compressed secp256k1 key
    pub signatory_keys: HashMap<String, String>,
}

impl PeggingInfo {
    /// Join voting powers onto registered signatory keys.
    ///
    /// Validators that have not registered a signatory key do not custody
    /// funds and are skipped; their power does not count toward the
    /// threshold.
    pub fn signatory_powers(&self) -> Result<HashMap<PublicKey, u64>, SidechainError> {
        let mut powers = HashMap::new();

        for (consensus_key, power) in &self.validators {
            let Some(signatory_hex) = self.signatory_keys.get(consensus_key) else {
                debug!(consensus_key, "validator has no signatory key, skipping");
                continue;
            };

            let bytes = hex::decode(signatory_hex)
                .map_err(|e| SidechainError::Parse(e.to_string()))?;
            let pubkey =
                PublicKey::from_slice(&bytes).map_err(|e| SidechainError::Parse(e.to_string()))?;

            *powers.entry(pubkey).or_insert(0) += power;
        }

        Ok(powers)
    }
}

/// Read-only sidechain access used by the coordinators
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SidechainClient: Send + Sync {
    /// Current validator powers and signatory keys
    async fn pegging_info(&self) -> Result<PeggingInfo, SidechainError>;

    /// Balance of a sidechain account, in satoshi-denominated peg units
    async fn balance(&self, address: &str) -> Result<u64, SidechainError>;

    /// Transfer peg units between sidechain accounts
    async fn transfer(&self, to: &str, amount: u64) -> Result<(), SidechainError>;

    /// Submit a withdrawal: burns `amount` on the sidechain and emits the
    /// obligation the signatories must fulfill toward `dest_script`.
    /// Burn and obligation are atomic on the sidechain's side.
    async fn submit_withdrawal(
        &self,
        dest_script: &ScriptBuf,
        amount: u64,
    ) -> Result<(), SidechainError>;
}

/// HTTP implementation against the sidechain's RPC surface
#[derive(Debug, Clone)]
pub struct HttpSidechainClient {
    client: Client,
    base_url: String,
}

impl HttpSidechainClient {
    /// Create a client for the given RPC endpoint
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, SidechainError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SidechainError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(SidechainError::Request(format!(
                "{} returned {}",
                path,
                resp.status()
            )));
        }

        resp.json()
            .await
            .map_err(|e| SidechainError::Parse(e.to_string()))
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<(), SidechainError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| SidechainError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SidechainError::Rejected(text));
        }

        Ok(())
    }
}

#[derive(Serialize)]
struct TransferBody<'a> {
    to: &'a str,
    amount: u64,
}

#[derive(Serialize)]
struct WithdrawalBody {
    /// hex-encoded destination output script
    script: String,
    amount: u64,
}

#[derive(Deserialize)]
struct BalanceResponse {
    balance: u64,
}

#[async_trait]
impl SidechainClient for HttpSidechainClient {
    async fn pegging_info(&self) -> Result<PeggingInfo, SidechainError> {
        self.get_json("/peg/info").await
    }

    async fn balance(&self, address: &str) -> Result<u64, SidechainError> {
        let resp: BalanceResponse = self.get_json(&format!("/accounts/{}", address)).await?;
        Ok(resp.balance)
    }

    async fn transfer(&self, to: &str, amount: u64) -> Result<(), SidechainError> {
        self.post_json("/transfers", &TransferBody { to, amount })
            .await
    }

    async fn submit_withdrawal(
        &self,
        dest_script: &ScriptBuf,
        amount: u64,
    ) -> Result<(), SidechainError> {
        let body = WithdrawalBody {
            script: hex::encode(dest_script.as_bytes()),
            amount,
        };
        self.post_json("/withdrawals", &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::DepositKey;

    #[test]
    fn test_signatory_powers_joins_on_consensus_key() {
        let key_a = DepositKey::generate().public_key();
        let key_b = DepositKey::generate().public_key();

        let mut info = PeggingInfo::default();
        info.validators.insert("val-1".into(), 60);
        info.validators.insert("val-2".into(), 40);
        info.signatory_keys
            .insert("val-1".into(), key_a.to_string());
        info.signatory_keys
            .insert("val-2".into(), key_b.to_string());

        let powers = info.signatory_powers().unwrap();
        assert_eq!(powers.len(), 2);
        assert_eq!(powers[&key_a], 60);
        assert_eq!(powers[&key_b], 40);
    }

    #[test]
    fn test_unregistered_validator_skipped() {
        let key_a = DepositKey::generate().public_key();

        let mut info = PeggingInfo::default();
        info.validators.insert("val-1".into(), 60);
        info.validators.insert("val-2".into(), 40);
        info.signatory_keys
            .insert("val-1".into(), key_a.to_string());

        let powers = info.signatory_powers().unwrap();
        assert_eq!(powers.len(), 1);
        assert_eq!(powers[&key_a], 60);
    }

    #[test]
    fn test_malformed_signatory_key_rejected() {
        let mut info = PeggingInfo::default();
        info.validators.insert("val-1".into(), 60);
        info.signatory_keys
            .insert("val-1".into(), "zz-not-hex".into());

        assert!(matches!(
            info.signatory_powers(),
            Err(SidechainError::Parse(_))
        ));
    }
}
