//! Input validation against the chain.
//!
//! An input is accepted when it exists unspent, is confirmed (or chains off
//! a coinjoin this coordinator finalized earlier — that carve-out is what
//! allows back-to-back remixing), pays to witness_v0_keyhash, and comes
//! with an ownership proof signed over the exact blinded commitment being
//! submitted. Binding the proof to the blinded bytes stops a proof from
//! being replayed under a different blinded value.
//!
//! Read-only: nothing here mutates round state, so it runs before the
//! registration critical section.

use crate::chain::ChainQuery;
use crate::error::{Result, TumblerError};
use crate::store::Store;
use bitcoin::secp256k1::{self, Secp256k1};
use bitcoin::sign_message::{signed_msg_hash, MessageSignature};
use bitcoin::{OutPoint, Script, ScriptBuf, TxOut};
use std::sync::Arc;

pub struct UtxoValidator {
    chain: Arc<dyn ChainQuery>,
    store: Arc<Store>,
    secp: Secp256k1<secp256k1::All>,
}

impl UtxoValidator {
    pub fn new(chain: Arc<dyn ChainQuery>, store: Arc<Store>) -> Self {
        Self { chain, store, secp: Secp256k1::new() }
    }

    /// Validate one claimed input. Checks run in order and short-circuit on
    /// the first failure.
    pub async fn validate(
        &self,
        outpoint: OutPoint,
        proof: &[u8],
        blinded: &[u8],
    ) -> Result<TxOut> {
        let utxo = self
            .chain
            .unspent_output(outpoint)
            .await?
            .ok_or(TumblerError::NotUnspent)?;

        if utxo.confirmations == 0 {
            let chains_off_ours = self
                .store
                .is_succeeded_coinjoin(outpoint.txid)
                .map_err(|e| TumblerError::Internal(e.to_string()))?;
            if !chains_off_ours {
                return Err(TumblerError::NotConfirmed);
            }
        }

        if !utxo.script_pubkey.is_p2wpkh() {
            return Err(TumblerError::WrongScriptType);
        }

        verify_ownership_proof(&self.secp, &utxo.script_pubkey, proof, blinded)?;

        Ok(TxOut { value: utxo.value, script_pubkey: utxo.script_pubkey })
    }
}

/// The message an input owner signs to prove control: the standard Bitcoin
/// signed-message hash over the hex of the blinded commitment.
pub fn proof_msg_hash(blinded: &[u8]) -> bitcoin::hashes::sha256d::Hash {
    let hex = hex::encode(blinded);
    signed_msg_hash(&hex)
}

fn verify_ownership_proof(
    secp: &Secp256k1<secp256k1::All>,
    script_pubkey: &Script,
    proof: &[u8],
    blinded: &[u8],
) -> Result<()> {
    let signature =
        MessageSignature::from_slice(proof).map_err(|_| TumblerError::InvalidProof)?;
    let msg_hash = proof_msg_hash(blinded);
    let pubkey = signature
        .recover_pubkey(secp, msg_hash)
        .map_err(|_| TumblerError::InvalidProof)?;
    let wpkh = pubkey.wpubkey_hash().map_err(|_| TumblerError::InvalidProof)?;
    if ScriptBuf::new_p2wpkh(&wpkh).as_script() != script_pubkey {
        return Err(TumblerError::InvalidProof);
    }
    Ok(())
}
