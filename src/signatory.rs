//! Signatory Set and Reserve Script
//!
//! A snapshot of the sidechain validator set, mapped to the Bitcoin script
//! that custodies reserve funds. Spending requires signatories whose
//! combined voting power strictly exceeds the supermajority threshold.
//!
//! The script accumulates weight instead of counting keys, so the set is
//! not capped at the small participant limit of standard N-of-M multisig:
//!
//! ```text
//! <pk0> OP_CHECKSIG OP_IF <w0> OP_ELSE 0 OP_ENDIF
//! OP_SWAP <pk1> OP_CHECKSIG OP_IF <w1> OP_ADD OP_ENDIF
//! ...
//! <threshold> OP_GREATERTHAN
//! ```
//!
//! Everyone who computes the script from the same validator snapshot must
//! get byte-identical output, so signatories are ordered canonically by
//! compressed pubkey bytes and weights are normalized deterministically.

use bitcoin::opcodes::all::{OP_ADD, OP_CHECKSIG, OP_ELSE, OP_ENDIF, OP_GREATERTHAN, OP_IF, OP_SWAP};
use bitcoin::script::Builder as ScriptBuilder;
use bitcoin::{Address, Network, PublicKey, ScriptBuf};
use std::collections::HashMap;
use thiserror::Error;

/// Default supermajority fraction: spends need strictly more than 2/3 of
/// total voting power.
pub const DEFAULT_THRESHOLD_NUMERATOR: u64 = 2;
pub const DEFAULT_THRESHOLD_DENOMINATOR: u64 = 3;

/// Signatory set errors
#[derive(Debug, Error)]
pub enum SignatoryError {
    #[error("signatory set is empty")]
    EmptySet,

    #[error("signatory set has zero total voting power")]
    DegenerateWeight,

    #[error("invalid threshold fraction {0}/{1}")]
    InvalidThreshold(u64, u64),
}

/// A validator-controlled Bitcoin key with its voting power
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signatory {
    /// Compressed secp256k1 public key
    pub pubkey: PublicKey,
    /// Voting power, normalized to fit script arithmetic
    pub voting_power: u64,
}

/// An ordered snapshot of the signatory set.
///
/// Immutable once captured; a new deposit or withdrawal against a changed
/// validator set must capture a fresh snapshot and re-derive the script.
#[derive(Debug, Clone)]
pub struct SignatorySet {
    signatories: Vec<Signatory>,
    total_power: u64,
    threshold_numerator: u64,
    threshold_denominator: u64,
}

impl SignatorySet {
    /// Build the canonical set from an unordered validator mapping.
    ///
    /// Input keys are unique by construction (map keyed on pubkey); the
    /// output order is pubkey byte order so that independent parties derive
    /// identical scripts from the same logical set.
    pub fn from_validators(validators: &HashMap<PublicKey, u64>) -> Result<Self, SignatoryError> {
        Self::with_threshold(
            validators,
            DEFAULT_THRESHOLD_NUMERATOR,
            DEFAULT_THRESHOLD_DENOMINATOR,
        )
    }

    /// Build with an explicit supermajority fraction.
    pub fn with_threshold(
        validators: &HashMap<PublicKey, u64>,
        numerator: u64,
        denominator: u64,
    ) -> Result<Self, SignatoryError> {
        if denominator == 0 || numerator >= denominator {
            return Err(SignatoryError::InvalidThreshold(numerator, denominator));
        }

        if validators.is_empty() {
            return Err(SignatoryError::EmptySet);
        }

        let mut signatories: Vec<Signatory> = validators
            .iter()
            .map(|(pubkey, power)| Signatory {
                pubkey: *pubkey,
                voting_power: *power,
            })
            .collect();

        signatories.sort_by_key(|s| s.pubkey.to_bytes());

        normalize_weights(&mut signatories);

        let total_power: u64 = signatories.iter().map(|s| s.voting_power).sum();
        if total_power == 0 {
            return Err(SignatoryError::DegenerateWeight);
        }

        Ok(Self {
            signatories,
            total_power,
            threshold_numerator: numerator,
            threshold_denominator: denominator,
        })
    }

    /// Signatories in canonical order
    pub fn signatories(&self) -> &[Signatory] {
        &self.signatories
    }

    /// Number of signatories
    pub fn len(&self) -> usize {
        self.signatories.len()
    }

    /// True if the set is empty (cannot happen post-construction)
    pub fn is_empty(&self) -> bool {
        self.signatories.is_empty()
    }

    /// Total normalized voting power
    pub fn total_power(&self) -> u64 {
        self.total_power
    }

    /// The weight a coalition must strictly exceed to authorize a spend
    pub fn threshold_weight(&self) -> u64 {
        self.total_power * self.threshold_numerator / self.threshold_denominator
    }

    /// Whether a combined weight authorizes a spend
    pub fn meets_threshold(&self, combined_weight: u64) -> bool {
        combined_weight > self.threshold_weight()
    }

    /// The weighted-threshold witness script for this set.
    ///
    /// Recomputed on demand, never cached: an address derived from an old
    /// script is unspendable by a rotated set and must be swept before
    /// rotation completes.
    pub fn reserve_script(&self) -> ScriptBuf {
        let mut builder = ScriptBuilder::new();

        for (i, signatory) in self.signatories.iter().enumerate() {
            if i == 0 {
                builder = builder
                    .push_key(&signatory.pubkey)
                    .push_opcode(OP_CHECKSIG)
                    .push_opcode(OP_IF)
                    .push_int(signatory.voting_power as i64)
                    .push_opcode(OP_ELSE)
                    .push_int(0)
                    .push_opcode(OP_ENDIF);
            } else {
                builder = builder
                    .push_opcode(OP_SWAP)
                    .push_key(&signatory.pubkey)
                    .push_opcode(OP_CHECKSIG)
                    .push_opcode(OP_IF)
                    .push_int(signatory.voting_power as i64)
                    .push_opcode(OP_ADD)
                    .push_opcode(OP_ENDIF);
            }
        }

        builder
            .push_int(self.threshold_weight() as i64)
            .push_opcode(OP_GREATERTHAN)
            .into_script()
    }

    /// The P2WSH scriptPubKey paying into the reserve
    pub fn output_script(&self) -> ScriptBuf {
        ScriptBuf::new_p2wsh(&self.reserve_script().wscript_hash())
    }

    /// The reserve address on the given network
    pub fn address(&self, network: Network) -> Address {
        Address::p2wsh(&self.reserve_script(), network)
    }
}

/// Right-shift all weights uniformly until the total fits signed 32-bit
/// script arithmetic. The shift depends only on the weights themselves, so
/// independent parties normalize identically.
fn normalize_weights(signatories: &mut [Signatory]) {
    let mut shift = 0u32;
    loop {
        let total: u64 = signatories
            .iter()
            .map(|s| s.voting_power >> shift)
            .sum();
        if total <= i32::MAX as u64 {
            break;
        }
        shift += 1;
    }

    if shift > 0 {
        for signatory in signatories.iter_mut() {
            signatory.voting_power >>= shift;
        }
    }
}
