//! Peg Transaction Builder
//!
//! Constructs the two transaction shapes the peg needs:
//!
//! - the deposit forward: spends everything at an ephemeral deposit address
//!   into the reserve, tagging the output with a commitment to the
//!   destination sidechain account, signed here with the ephemeral key
//! - the withdrawal: spends reserve UTXOs to a destination script, left
//!   unsigned for the signatories' cooperative signing
//!
//! Both constructions are deterministic: independent parties building from
//! the same inputs must produce byte-identical transactions. All amounts
//! are integer satoshis.

use bitcoin::hashes::Hash;
use bitcoin::absolute::LockTime;
use bitcoin::script::{Builder as ScriptBuilder, PushBytesBuf};
use bitcoin::sighash::SighashCache;
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, EcdsaSighashType, Network, ScriptBuf, Sequence, Transaction, TxIn, TxOut,
    Witness,
};
use secp256k1::{Message, Secp256k1};
use std::str::FromStr;
use thiserror::Error;

use crate::chain::Utxo;
use crate::keys::DepositKey;
use crate::signatory::SignatorySet;

/// Outputs below this are uneconomical to spend
pub const DUST_THRESHOLD: u64 = 546;

/// Tag prefixing the destination commitment in the forward's OP_RETURN
pub const COMMITMENT_TAG: &[u8; 4] = b"PEG0";

/// Transaction overhead in vbytes (version, locktime, counts)
const TX_OVERHEAD_VSIZE: u64 = 10;

/// Legacy P2PKH input: outpoint + scriptSig (sig + pubkey) + sequence
const P2PKH_INPUT_VSIZE: u64 = 148;

/// P2WSH output: value + script length + 34-byte script
const P2WSH_OUTPUT_VSIZE: u64 = 43;

/// OP_RETURN output carrying the 24-byte tagged commitment
const COMMITMENT_OUTPUT_VSIZE: u64 = 35;

/// Builder errors
#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("no UTXOs provided")]
    NoUtxos,

    #[error("input does not belong to the deposit address: {0}")]
    InvalidUtxo(String),

    #[error("insufficient funds: need {required} sats, have {available} sats")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

/// Fee policy: a flat per-transaction fee, or a rate applied to the
/// estimated virtual size.
#[derive(Debug, Clone, Copy)]
pub enum FeePolicy {
    /// Fixed fee in satoshis
    Flat(u64),
    /// Sats per vbyte
    Rate(u64),
}

/// Builds peg transactions
pub struct TxBuilder {
    /// Network (mainnet, testnet, signet)
    network: Network,
    /// Fee policy for both transaction shapes
    fee_policy: FeePolicy,
}

impl TxBuilder {
    /// Create a new builder with the default fee rate
    pub fn new(network: Network) -> Self {
        Self {
            network,
            fee_policy: FeePolicy::Rate(10),
        }
    }

    /// Create testnet builder
    pub fn new_testnet() -> Self {
        Self::new(Network::Testnet)
    }

    /// Override the fee policy
    pub fn with_fee_policy(mut self, policy: FeePolicy) -> Self {
        self.fee_policy = policy;
        self
    }

    /// The network this builder targets
    pub fn network(&self) -> Network {
        self.network
    }

    /// Fee for a forward spending `num_inputs` deposit UTXOs
    pub fn forward_fee(&self, num_inputs: usize) -> u64 {
        match self.fee_policy {
            FeePolicy::Flat(fee) => fee,
            FeePolicy::Rate(rate) => {
                let vsize = TX_OVERHEAD_VSIZE
                    + num_inputs as u64 * P2PKH_INPUT_VSIZE
                    + P2WSH_OUTPUT_VSIZE
                    + COMMITMENT_OUTPUT_VSIZE;
                vsize * rate
            }
        }
    }

    /// Fee for a withdrawal spending `num_inputs` reserve UTXOs.
    ///
    /// The reserve witness grows with the signatory count, so the estimate
    /// is parameterized on the set. It depends only on (set, num_inputs),
    /// keeping independent signatories' fee computations identical.
    pub fn withdrawal_fee(&self, set: &SignatorySet, num_inputs: usize) -> u64 {
        match self.fee_policy {
            FeePolicy::Flat(fee) => fee,
            FeePolicy::Rate(rate) => {
                // witness: one signature slot (~73 bytes) per signatory plus
                // the script itself, discounted 4x
                let witness_bytes = set.reserve_script().len() as u64 + set.len() as u64 * 73;
                let input_vsize = 41 + witness_bytes / 4;
                let vsize = TX_OVERHEAD_VSIZE
                    + num_inputs as u64 * input_vsize
                    + 2 * P2WSH_OUTPUT_VSIZE;
                vsize * rate
            }
        }
    }

    /// Validate a Bitcoin address for this network
    pub fn validate_address(&self, address: &str) -> Result<Address, BuilderError> {
        Address::from_str(address)
            .map_err(|e| BuilderError::InvalidAddress(e.to_string()))?
            .require_network(self.network)
            .map_err(|e| BuilderError::InvalidAddress(e.to_string()))
    }

    /// Build and sign the deposit forward.
    ///
    /// Spends every UTXO at the ephemeral address into a single reserve
    /// output of value (total - fee), plus a zero-value OP_RETURN
    /// committing to the destination sidechain account. All inputs are
    /// single-key controlled, so the ephemeral key signs everything here.
    pub fn build_deposit_forward(
        &self,
        key: &DepositKey,
        set: &SignatorySet,
        destination: &[u8; 20],
        utxos: &[Utxo],
    ) -> Result<DepositForward, BuilderError> {
        if utxos.is_empty() {
            return Err(BuilderError::NoUtxos);
        }

        let expected_script = key.script_pubkey();
        for utxo in utxos {
            if utxo.script_pubkey != expected_script {
                return Err(BuilderError::InvalidUtxo(format!(
                    "{}:{}",
                    utxo.txid, utxo.vout
                )));
            }
        }

        // canonical input order
        let mut inputs: Vec<&Utxo> = utxos.iter().collect();
        inputs.sort_by_key(|u| u.outpoint());

        let total_in: u64 = inputs.iter().map(|u| u.value).sum();
        let fee = self.forward_fee(inputs.len());

        if fee >= total_in {
            return Err(BuilderError::InsufficientFunds {
                required: fee + 1,
                available: total_in,
            });
        }
        let forward_value = total_in - fee;

        let tx_inputs: Vec<TxIn> = inputs
            .iter()
            .map(|utxo| TxIn {
                previous_output: utxo.outpoint(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            })
            .collect();

        let outputs = vec![
            TxOut {
                value: Amount::from_sat(forward_value),
                script_pubkey: set.output_script(),
            },
            TxOut {
                value: Amount::ZERO,
                script_pubkey: commitment_script(destination)?,
            },
        ];

        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: tx_inputs,
            output: outputs,
        };

        self.sign_p2pkh_inputs(&mut tx, key)?;

        Ok(DepositForward {
            tx,
            fee,
            forward_value,
        })
    }

    /// Build the canonical unsigned withdrawal.
    ///
    /// Coin selection is largest-first with outpoint tie-break, so every
    /// signatory independently selecting over the same reserve UTXO set
    /// arrives at the same transaction bit-for-bit. Change above dust goes
    /// back to the reserve; sub-dust change is absorbed into the fee.
    pub fn build_withdrawal(
        &self,
        reserve_utxos: &[Utxo],
        destination_script: ScriptBuf,
        amount: u64,
        set: &SignatorySet,
    ) -> Result<UnsignedWithdrawalTx, BuilderError> {
        if reserve_utxos.is_empty() {
            return Err(BuilderError::NoUtxos);
        }

        let mut candidates: Vec<&Utxo> = reserve_utxos.iter().collect();
        candidates.sort_by(|a, b| {
            b.value
                .cmp(&a.value)
                .then_with(|| a.outpoint().cmp(&b.outpoint()))
        });

        let mut selected: Vec<Utxo> = Vec::new();
        let mut total_in = 0u64;
        let mut fee = 0u64;
        let mut covered = false;

        for utxo in candidates {
            total_in += utxo.value;
            selected.push(utxo.clone());
            fee = self.withdrawal_fee(set, selected.len());
            if total_in >= amount.saturating_add(fee) {
                covered = true;
                break;
            }
        }

        if !covered {
            return Err(BuilderError::InsufficientFunds {
                required: amount.saturating_add(fee),
                available: total_in,
            });
        }

        let mut change = total_in - amount - fee;
        if change <= DUST_THRESHOLD {
            // sub-dust change is not worth an output
            fee += change;
            change = 0;
        }

        let inputs: Vec<TxIn> = selected
            .iter()
            .map(|utxo| TxIn {
                previous_output: utxo.outpoint(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            })
            .collect();

        let mut outputs = vec![TxOut {
            value: Amount::from_sat(amount),
            script_pubkey: destination_script,
        }];

        if change > 0 {
            outputs.push(TxOut {
                value: Amount::from_sat(change),
                script_pubkey: set.output_script(),
            });
        }

        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: inputs,
            output: outputs,
        };

        Ok(UnsignedWithdrawalTx {
            tx,
            selected,
            fee,
            amount,
        })
    }

    /// Sign every input of a transaction whose inputs all pay the deposit
    /// key's P2PKH script.
    fn sign_p2pkh_inputs(&self, tx: &mut Transaction, key: &DepositKey) -> Result<(), BuilderError> {
        let secp = Secp256k1::new();
        let script_pubkey = key.script_pubkey();
        let pubkey = key.public_key();

        let mut script_sigs = Vec::with_capacity(tx.input.len());
        {
            let cache = SighashCache::new(&*tx);
            for i in 0..tx.input.len() {
                let sighash = cache
                    .legacy_signature_hash(i, &script_pubkey, EcdsaSighashType::All.to_u32())
                    .map_err(|e| BuilderError::Signing(e.to_string()))?;

                let msg = Message::from_digest(sighash.to_byte_array());
                let sig = secp.sign_ecdsa(&msg, key.secret_key());

                let signature = bitcoin::ecdsa::Signature {
                    signature: sig,
                    sighash_type: EcdsaSighashType::All,
                };
                let sig_push = PushBytesBuf::try_from(signature.to_vec())
                    .map_err(|e| BuilderError::Signing(e.to_string()))?;

                script_sigs.push(
                    ScriptBuilder::new()
                        .push_slice(sig_push)
                        .push_key(&pubkey)
                        .into_script(),
                );
            }
        }

        for (input, script_sig) in tx.input.iter_mut().zip(script_sigs) {
            input.script_sig = script_sig;
        }

        Ok(())
    }
}

/// Build the OP_RETURN script committing to a sidechain account
fn commitment_script(destination: &[u8; 20]) -> Result<ScriptBuf, BuilderError> {
    let mut payload = Vec::with_capacity(COMMITMENT_TAG.len() + destination.len());
    payload.extend_from_slice(COMMITMENT_TAG);
    payload.extend_from_slice(destination);

    let push = PushBytesBuf::try_from(payload).map_err(|e| BuilderError::Signing(e.to_string()))?;
    Ok(ScriptBuf::new_op_return(push))
}

/// Extract the committed sidechain account from a forward's outputs, if
/// present (used by observers attributing deposits).
pub fn extract_commitment(tx: &Transaction) -> Option<[u8; 20]> {
    for output in &tx.output {
        let script = &output.script_pubkey;
        if !script.is_op_return() {
            continue;
        }
        // OP_RETURN <push 24> TAG || account
        let bytes = script.as_bytes();
        if bytes.len() == 26 && &bytes[2..6] == COMMITMENT_TAG {
            let mut account = [0u8; 20];
            account.copy_from_slice(&bytes[6..26]);
            return Some(account);
        }
    }
    None
}

/// A signed deposit-forward transaction
#[derive(Debug, Clone)]
pub struct DepositForward {
    /// The signed transaction
    pub tx: Transaction,
    /// Fee paid, in satoshis
    pub fee: u64,
    /// Value forwarded into the reserve
    pub forward_value: u64,
}

impl DepositForward {
    /// Transaction ID
    pub fn txid(&self) -> bitcoin::Txid {
        self.tx.compute_txid()
    }

    /// Consensus-serialized hex, ready for broadcast
    pub fn serialize_hex(&self) -> String {
        bitcoin::consensus::encode::serialize_hex(&self.tx)
    }
}

/// The canonical unsigned withdrawal both signatories and observers must
/// agree on bit-for-bit
#[derive(Debug, Clone)]
pub struct UnsignedWithdrawalTx {
    /// The unsigned transaction
    pub tx: Transaction,
    /// Reserve UTXOs being spent
    pub selected: Vec<Utxo>,
    /// Fee in satoshis
    pub fee: u64,
    /// Amount being sent
    pub amount: u64,
}

impl UnsignedWithdrawalTx {
    /// Transaction ID (changes once witnesses are attached)
    pub fn txid(&self) -> bitcoin::Txid {
        self.tx.compute_txid()
    }

    /// Outpoints this withdrawal consumes
    pub fn outpoints(&self) -> Vec<bitcoin::OutPoint> {
        self.selected.iter().map(|u| u.outpoint()).collect()
    }

    /// Consensus serialization
    pub fn serialize(&self) -> Vec<u8> {
        bitcoin::consensus::encode::serialize(&self.tx)
    }
}
