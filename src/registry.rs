//! Participant registry for the active round.
//!
//! Holds the Alices (input contributors) and Bobs (mixed-output receivers)
//! and enforces the uniqueness and state invariants: no input reference is
//! ever owned by two Alices, Alice state only moves forward, and a Bob
//! record carries nothing that could link it back to an Alice.
//!
//! Pure in-memory state with synchronous operations. The coordinator wraps
//! every mutation in the round's critical section; nothing here blocks.

use crate::error::{Result, TumblerError};
use bitcoin::{Address, Amount, OutPoint, TxOut};
use std::fmt;

/// Opaque registration token handed to an Alice. Random, never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AliceId([u8; 16]);

impl AliceId {
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|_| TumblerError::MalformedRequest("invalid alice id".into()))?;
        let bytes: [u8; 16] = bytes
            .try_into()
            .map_err(|_| TumblerError::MalformedRequest("invalid alice id".into()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for AliceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AliceId({})", self.to_hex())
    }
}

impl fmt::Display for AliceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Forward-only Alice lifecycle within a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AliceState {
    InputsRegistered,
    ConnectionConfirmed,
    AskedForCoinJoin,
}

#[derive(Clone, Debug)]
pub struct AliceRecord {
    pub id: AliceId,
    /// Accepted inputs with their chain-side value and script, kept for fee
    /// math and later witness verification.
    pub inputs: Vec<(OutPoint, TxOut)>,
    pub change_address: Address,
    pub change_amount: Amount,
    pub state: AliceState,
}

impl AliceRecord {
    pub fn owns_input(&self, outpoint: OutPoint) -> bool {
        self.inputs.iter().any(|(op, _)| *op == outpoint)
    }
}

/// A mixed-output receiver. Deliberately carries only the destination —
/// any extra field here is a linkability hazard.
#[derive(Clone, Debug)]
pub struct BobRecord {
    pub output_address: Address,
}

#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    alices: Vec<AliceRecord>,
    bobs: Vec<BobRecord>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alice_count(&self) -> usize {
        self.alices.len()
    }

    pub fn bob_count(&self) -> usize {
        self.bobs.len()
    }

    pub fn alices(&self) -> &[AliceRecord] {
        &self.alices
    }

    pub fn bobs(&self) -> &[BobRecord] {
        &self.bobs
    }

    /// Is this outpoint already claimed by any Alice of the round?
    pub fn owns_input(&self, outpoint: OutPoint) -> bool {
        self.alices.iter().any(|a| a.owns_input(outpoint))
    }

    /// Insert a fully validated record. The caller has already rejected
    /// intra-request duplicates and checked funds; the cross-Alice input
    /// collision check here is the authoritative one.
    pub fn register_alice(&mut self, record: AliceRecord) -> Result<()> {
        for (outpoint, _) in &record.inputs {
            if self.owns_input(*outpoint) {
                return Err(TumblerError::InputAlreadyRegistered);
            }
        }
        self.alices.push(record);
        Ok(())
    }

    pub fn find_alice(&self, id: AliceId) -> Result<&AliceRecord> {
        self.alices
            .iter()
            .find(|a| a.id == id)
            .ok_or(TumblerError::UnknownId)
    }

    fn find_alice_mut(&mut self, id: AliceId) -> Result<&mut AliceRecord> {
        self.alices
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(TumblerError::UnknownId)
    }

    /// First confirm succeeds; any repeat is an error, never a no-op.
    pub fn confirm_connection(&mut self, id: AliceId) -> Result<()> {
        let alice = self.find_alice_mut(id)?;
        match alice.state {
            AliceState::InputsRegistered => {
                alice.state = AliceState::ConnectionConfirmed;
                Ok(())
            }
            _ => Err(TumblerError::AlreadyConfirmed),
        }
    }

    pub fn all_confirmed(&self) -> bool {
        self.alices
            .iter()
            .all(|a| a.state != AliceState::InputsRegistered)
    }

    /// Record that an Alice fetched the unsigned coinjoin. One fetch each.
    pub fn mark_asked_for_coinjoin(&mut self, id: AliceId) -> Result<()> {
        let alice = self.find_alice_mut(id)?;
        match alice.state {
            AliceState::ConnectionConfirmed => {
                alice.state = AliceState::AskedForCoinJoin;
                Ok(())
            }
            AliceState::AskedForCoinJoin => Err(TumblerError::AlreadyRequested),
            AliceState::InputsRegistered => Err(TumblerError::Internal(
                "unconfirmed alice survived into signing phase".into(),
            )),
        }
    }

    /// Append a Bob. Rejects an output address already registered this
    /// round — the only way that happens is a replayed registration, since
    /// each blinded commitment is signed at most once.
    pub fn register_bob(&mut self, record: BobRecord) -> Result<()> {
        if self
            .bobs
            .iter()
            .any(|b| b.output_address == record.output_address)
        {
            return Err(TumblerError::MalformedRequest(
                "output address already registered".into(),
            ));
        }
        self.bobs.push(record);
        Ok(())
    }
}
