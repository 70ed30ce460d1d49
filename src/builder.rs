//! Joint-transaction assembly and signature accumulation.
//!
//! The unsigned coinjoin is built exactly once per round, at the moment the
//! round enters `Signing`, and is deterministic given the registry:
//!
//! - inputs: Alices in registration order, each Alice's inputs in the order
//!   she submitted them;
//! - outputs: one denomination output per Bob in Bob registration order,
//!   then one change output per Alice (registration order) for every Alice
//!   whose change is non-zero.
//!
//! Every party that fetches the unsigned transaction therefore computes the
//! same txid and signs the same sighashes.
//!
//! [`SigningState`] is the working copy that accumulates one witness per
//! input. Batches are all-or-nothing: the whole submission is verified
//! before any witness is recorded.

use crate::error::{Result, TumblerError};
use crate::registry::{AliceRecord, ParticipantRegistry};
use crate::round::RoundParameters;
use bitcoin::hashes::Hash;
use bitcoin::key::CompressedPublicKey;
use bitcoin::secp256k1::{self, Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{
    absolute, transaction, Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut,
    Witness,
};

/// Assemble the unsigned joint transaction from the registry's accepted
/// records. Zero-value change is omitted: an Alice whose inputs exactly
/// cover denomination + fee gets no change output.
pub fn build_unsigned(params: &RoundParameters, registry: &ParticipantRegistry) -> Transaction {
    let input = registry
        .alices()
        .iter()
        .flat_map(|alice| alice.inputs.iter())
        .map(|(outpoint, _)| TxIn {
            previous_output: *outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        })
        .collect();

    let mut output: Vec<TxOut> = registry
        .bobs()
        .iter()
        .map(|bob| TxOut {
            value: params.denomination,
            script_pubkey: bob.output_address.script_pubkey(),
        })
        .collect();
    output.extend(
        registry
            .alices()
            .iter()
            .filter(|alice| alice.change_amount > Amount::ZERO)
            .map(|alice| TxOut {
                value: alice.change_amount,
                script_pubkey: alice.change_address.script_pubkey(),
            }),
    );

    Transaction {
        version: transaction::Version::TWO,
        lock_time: absolute::LockTime::ZERO,
        input,
        output,
    }
}

pub struct SigningState {
    tx: Transaction,
    /// Prevout for each input, aligned with `tx.input`.
    prevouts: Vec<TxOut>,
    satisfied: Vec<bool>,
    secp: Secp256k1<secp256k1::All>,
}

impl SigningState {
    /// Create the working copy. The input set is frozen here; it is always
    /// exactly the unsigned transaction's input set.
    pub fn new(unsigned: &Transaction, registry: &ParticipantRegistry) -> Result<Self> {
        let mut prevouts = Vec::with_capacity(unsigned.input.len());
        for txin in &unsigned.input {
            let prevout = registry
                .alices()
                .iter()
                .flat_map(|a| a.inputs.iter())
                .find(|(op, _)| *op == txin.previous_output)
                .map(|(_, txout)| txout.clone())
                .ok_or_else(|| {
                    TumblerError::Internal("coinjoin input missing from registry".into())
                })?;
            prevouts.push(prevout);
        }
        Ok(Self {
            satisfied: vec![false; unsigned.input.len()],
            tx: unsigned.clone(),
            prevouts,
            secp: Secp256k1::new(),
        })
    }

    pub fn remaining(&self) -> usize {
        self.satisfied.iter().filter(|s| !**s).count()
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }

    fn position_of(&self, outpoint: OutPoint) -> Option<usize> {
        self.tx
            .input
            .iter()
            .position(|i| i.previous_output == outpoint)
    }

    /// Record a batch of witnesses from one Alice. The batch is rejected
    /// whole — nothing is applied — if any witness targets an input that is
    /// not hers, is already satisfied, or fails verification.
    pub fn submit(
        &mut self,
        alice: &AliceRecord,
        witnesses: &[(OutPoint, Witness)],
    ) -> Result<usize> {
        let mut staged: Vec<usize> = Vec::with_capacity(witnesses.len());
        for (outpoint, witness) in witnesses {
            let index = self.position_of(*outpoint).ok_or(TumblerError::UnknownInput)?;
            if !alice.owns_input(*outpoint) {
                return Err(TumblerError::UnknownInput);
            }
            if self.satisfied[index] || staged.contains(&index) {
                return Err(TumblerError::AlreadySigned);
            }
            self.verify_witness(index, witness)?;
            staged.push(index);
        }

        for (index, (_, witness)) in staged.into_iter().zip(witnesses) {
            self.tx.input[index].witness = witness.clone();
            self.satisfied[index] = true;
        }
        Ok(self.remaining())
    }

    /// Check that `witness` is a valid P2WPKH spend of input `index`:
    /// signature over this transaction's BIP-143 sighash for the input's
    /// prevout value, by the key hashing to the prevout's witness program.
    fn verify_witness(&self, index: usize, witness: &Witness) -> Result<()> {
        if witness.len() != 2 {
            return Err(TumblerError::InvalidWitness);
        }
        let sig_bytes = witness.nth(0).ok_or(TumblerError::InvalidWitness)?;
        let pk_bytes = witness.nth(1).ok_or(TumblerError::InvalidWitness)?;

        let signature = bitcoin::ecdsa::Signature::from_slice(sig_bytes)
            .map_err(|_| TumblerError::InvalidWitness)?;
        if signature.sighash_type != EcdsaSighashType::All {
            return Err(TumblerError::InvalidWitness);
        }
        let pubkey =
            CompressedPublicKey::from_slice(pk_bytes).map_err(|_| TumblerError::InvalidWitness)?;

        let prevout = &self.prevouts[index];
        if ScriptBuf::new_p2wpkh(&pubkey.wpubkey_hash()) != prevout.script_pubkey {
            return Err(TumblerError::InvalidWitness);
        }

        let mut cache = SighashCache::new(&self.tx);
        let sighash = cache
            .p2wpkh_signature_hash(
                index,
                &prevout.script_pubkey,
                prevout.value,
                signature.sighash_type,
            )
            .map_err(|e| TumblerError::Internal(e.to_string()))?;
        let msg = Message::from_digest(sighash.to_byte_array());
        self.secp
            .verify_ecdsa(&msg, &signature.signature, &pubkey.0)
            .map_err(|_| TumblerError::InvalidWitness)?;
        Ok(())
    }

    /// Hand back the fully signed transaction.
    pub fn finalize(self) -> Result<Transaction> {
        if !self.is_complete() {
            return Err(TumblerError::Internal(
                "finalize called with unsigned inputs remaining".into(),
            ));
        }
        Ok(self.tx)
    }
}
