//! Round phase machinery.
//!
//! A round is a single pass through
//! `InputRegistration → ConnectionConfirmation → OutputRegistration →
//! Signing → Finished`. The state machine owns the phase, the immutable
//! round parameters, the participant registry and the joint-transaction
//! state, and gates every externally visible operation on
//! "right phase AND currently accepting requests". The coordinator holds
//! exactly one of these behind its round lock, so every method here runs
//! inside a critical section.

use crate::builder::SigningState;
use crate::error::{Result, TumblerError};
use crate::registry::ParticipantRegistry;
use bitcoin::{Amount, Transaction};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    InputRegistration,
    ConnectionConfirmation,
    OutputRegistration,
    Signing,
    Finished,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::InputRegistration => "InputRegistration",
            Phase::ConnectionConfirmation => "ConnectionConfirmation",
            Phase::OutputRegistration => "OutputRegistration",
            Phase::Signing => "Signing",
            Phase::Finished => "Finished",
        };
        f.write_str(name)
    }
}

/// Parameters fixed for the lifetime of one round.
#[derive(Clone, Debug)]
pub struct RoundParameters {
    /// Target number of Alices; the round leaves input registration exactly
    /// when this many have registered.
    pub anonymity_set: usize,
    pub denomination: Amount,
    pub fee_per_input: Amount,
    pub fee_per_output: Amount,
    pub max_inputs_per_alice: usize,
}

impl RoundParameters {
    /// Coordinator fee an Alice owes: one share per input plus two outputs
    /// (her mixed output and her change output).
    pub fn fee_to_pay(&self, input_count: usize) -> Amount {
        self.fee_per_input * input_count as u64 + self.fee_per_output * 2
    }
}

pub struct RoundStateMachine {
    seq: u64,
    params: RoundParameters,
    phase: Phase,
    accepting: bool,
    pub registry: ParticipantRegistry,
    phase_started: Instant,
    started: Instant,
    /// Total time the round spent in input registration; frozen when the
    /// phase advances.
    input_registration_time: Option<Duration>,
    unsigned: Option<Transaction>,
    signing: Option<SigningState>,
}

impl RoundStateMachine {
    pub fn new(seq: u64, params: RoundParameters) -> Self {
        let now = Instant::now();
        Self {
            seq,
            params,
            phase: Phase::InputRegistration,
            accepting: true,
            registry: ParticipantRegistry::new(),
            phase_started: now,
            started: now,
            input_registration_time: None,
            unsigned: None,
            signing: None,
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn params(&self) -> &RoundParameters {
        &self.params
    }

    /// Gate an operation on its required phase. Evaluated inside the same
    /// critical section as the mutation it protects, so a request can never
    /// be validated against a phase that changes mid-operation.
    pub fn ensure_phase(&self, expected: Phase) -> Result<()> {
        if self.phase != expected || !self.accepting {
            return Err(TumblerError::WrongPhase { expected, actual: self.phase });
        }
        Ok(())
    }

    /// Move to the next phase. Transitions are driven exclusively by the
    /// operation that satisfied the trigger condition.
    pub fn advance(&mut self, to: Phase) {
        if self.phase == Phase::InputRegistration && to != Phase::InputRegistration {
            self.input_registration_time = Some(self.phase_started.elapsed());
        }
        self.phase = to;
        self.phase_started = Instant::now();
    }

    /// Stop taking requests without tearing state down, e.g. while the
    /// finalized transaction is being handed off for broadcast.
    pub fn pause_intake(&mut self) {
        self.accepting = false;
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    pub fn elapsed_in_phase(&self) -> Duration {
        self.phase_started.elapsed()
    }

    pub fn input_registration_elapsed(&self) -> Duration {
        self.input_registration_time
            .unwrap_or_else(|| self.started.elapsed())
    }

    /// Restart the stopwatches without touching registrations. Used when an
    /// empty round times out: nothing to discard, nothing to announce.
    pub fn restart_stopwatches(&mut self) {
        let now = Instant::now();
        self.phase_started = now;
        self.started = now;
    }

    /// Install the unsigned joint transaction. Building it twice in one
    /// round is a coordinator bug, not a request failure.
    pub fn set_unsigned(&mut self, tx: Transaction) -> Result<()> {
        if self.unsigned.is_some() {
            return Err(TumblerError::Internal(
                "unsigned coinjoin built twice in one round".into(),
            ));
        }
        self.unsigned = Some(tx);
        Ok(())
    }

    pub fn unsigned(&self) -> Option<&Transaction> {
        self.unsigned.as_ref()
    }

    /// The signing working copy, created on first use. Its input set is the
    /// unsigned transaction's input set, verbatim, for the rest of the round.
    pub fn signing_state(&mut self) -> Result<&mut SigningState> {
        if self.signing.is_none() {
            let unsigned = self.unsigned.as_ref().ok_or_else(|| {
                TumblerError::Internal("signing phase without an unsigned coinjoin".into())
            })?;
            let signing = SigningState::new(unsigned, &self.registry)?;
            self.signing = Some(signing);
        }
        Ok(self.signing.as_mut().expect("just ensured"))
    }

    pub fn take_signing(&mut self) -> Option<SigningState> {
        self.signing.take()
    }
}
