//! Esplora API Client
//!
//! Blockstream-style REST implementation of [`ChainClient`], used for UTXO
//! lookup, confirmation queries and transaction broadcast.

use async_trait::async_trait;
use bitcoin::{ScriptBuf, Txid};
use reqwest::Client;
use serde::Deserialize;
use std::str::FromStr;

use crate::chain::{ChainClient, ChainError, TxStatus, Utxo};

/// Esplora API endpoints
pub const MAINNET_URL: &str = "https://blockstream.info/api";
pub const TESTNET_URL: &str = "https://blockstream.info/testnet/api";

/// Esplora HTTP client
#[derive(Debug, Clone)]
pub struct EsploraClient {
    client: Client,
    base_url: String,
}

impl EsploraClient {
    /// Create a new client with custom URL
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create a client for Bitcoin mainnet
    pub fn new_mainnet() -> Self {
        Self::new(MAINNET_URL)
    }

    /// Create a client for Bitcoin testnet
    pub fn new_testnet() -> Self {
        Self::new(TESTNET_URL)
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The scriptPubKey controlling an address. Esplora's UTXO listing
    /// omits the script, so it is reconstructed from the address itself.
    fn address_script(&self, address: &str) -> Result<ScriptBuf, ChainError> {
        let parsed = bitcoin::Address::from_str(address)
            .map_err(|e| ChainError::Parse(e.to_string()))?
            .assume_checked();
        Ok(parsed.script_pubkey())
    }
}

#[async_trait]
impl ChainClient for EsploraClient {
    async fn utxos(&self, address: &str) -> Result<Vec<Utxo>, ChainError> {
        let url = format!("{}/address/{}/utxo", self.base_url, address);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ChainError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ChainError::Request(format!(
                "UTXO lookup failed for {}",
                address
            )));
        }

        let raw: Vec<EsploraUtxo> = resp
            .json()
            .await
            .map_err(|e| ChainError::Parse(e.to_string()))?;

        let script_pubkey = self.address_script(address)?;

        raw.into_iter()
            .map(|u| {
                let txid =
                    Txid::from_str(&u.txid).map_err(|e| ChainError::Parse(e.to_string()))?;
                Ok(Utxo {
                    txid,
                    vout: u.vout,
                    value: u.value,
                    script_pubkey: script_pubkey.clone(),
                    block_height: u.status.block_height,
                })
            })
            .collect()
    }

    async fn tx_status(&self, txid: &Txid) -> Result<TxStatus, ChainError> {
        let url = format!("{}/tx/{}/status", self.base_url, txid);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ChainError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ChainError::TxNotFound(txid.to_string()));
        }

        let status: EsploraTxStatus = resp
            .json()
            .await
            .map_err(|e| ChainError::Parse(e.to_string()))?;

        Ok(TxStatus {
            confirmed: status.confirmed,
            block_height: status.block_height,
        })
    }

    async fn tip_height(&self) -> Result<u64, ChainError> {
        let url = format!("{}/blocks/tip/height", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ChainError::Request(e.to_string()))?;

        resp.text()
            .await
            .map_err(|e| ChainError::Request(e.to_string()))?
            .trim()
            .parse()
            .map_err(|e| ChainError::Parse(format!("invalid height: {}", e)))
    }

    async fn broadcast(&self, tx_hex: &str) -> Result<Txid, ChainError> {
        let url = format!("{}/tx", self.base_url);
        let resp = self
            .client
            .post(&url)
            .body(tx_hex.to_string())
            .send()
            .await
            .map_err(|e| ChainError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            return Err(ChainError::BroadcastRejected(error_text));
        }

        let txid_text = resp
            .text()
            .await
            .map_err(|e| ChainError::Request(e.to_string()))?;

        Txid::from_str(txid_text.trim()).map_err(|e| ChainError::Parse(e.to_string()))
    }
}

// =============================================================================
// Esplora API Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct EsploraUtxo {
    txid: String,
    vout: u32,
    value: u64,
    status: EsploraTxStatus,
}

#[derive(Debug, Clone, Deserialize)]
struct EsploraTxStatus {
    confirmed: bool,
    block_height: Option<u64>,
}
