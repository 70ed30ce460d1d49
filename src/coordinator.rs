//! Round coordination façade.
//!
//! One `RoundCoordinator` instance owns the single active round and
//! sequences every request against it: phase guard, validation, mutation
//! and transition trigger all happen under the round lock, so two
//! concurrent registrations naming the same input can never both succeed
//! and "anonymity set reached → advance" is evaluated against a consistent
//! snapshot. Chain-side input validation is read-only and runs *before*
//! the critical section; the lock covers only the re-check-and-commit
//! step.
//!
//! Requests enter through the transport layer (`rpc/`), which translates
//! wire shapes and nothing else. All protocol rules live here and below.

use crate::blindsig::BlindSigner;
use crate::builder;
use crate::chain::ChainQuery;
use crate::config::CoordinatorConfig;
use crate::error::{Result, TumblerError};
use crate::metrics::Metrics;
use crate::notify::Notifier;
use crate::registry::{AliceId, AliceRecord, AliceState, BobRecord};
use crate::round::{Phase, RoundStateMachine};
use crate::store::Store;
use crate::validate::UtxoValidator;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::{Address, Amount, Network, OutPoint, Transaction, Witness};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;

/// One claimed input with its ownership proof.
#[derive(Clone, Debug)]
pub struct InputProof {
    pub outpoint: OutPoint,
    pub proof: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct RegisterInputRequest {
    pub blinded_output: Vec<u8>,
    pub change_address: Address,
    pub inputs: Vec<InputProof>,
}

#[derive(Clone, Debug)]
pub struct StatusSnapshot {
    pub round: u64,
    pub phase: Phase,
    pub denomination: Amount,
    pub anonymity_set: usize,
    pub input_registration_elapsed: Duration,
    pub fee_per_input: Amount,
    pub fee_per_output: Amount,
    pub max_inputs_per_alice: usize,
}

#[derive(Clone, Debug)]
pub struct InputRegistrationStatus {
    pub elapsed: Duration,
    pub required_peer_count: usize,
    pub registered_peer_count: usize,
}

pub struct RoundCoordinator {
    config: CoordinatorConfig,
    signer: BlindSigner,
    validator: UtxoValidator,
    chain: Arc<dyn ChainQuery>,
    store: Arc<Store>,
    notifier: Notifier,
    metrics: Metrics,
    round: RwLock<RoundStateMachine>,
    /// Digests of blinded messages that already received a signature.
    /// Deliberately not cleared on round reset: replaying a blinded value
    /// across rounds must not mint a second signature.
    issued: Mutex<HashSet<[u8; 32]>>,
    public_key_der: Vec<u8>,
}

impl RoundCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        signer: BlindSigner,
        chain: Arc<dyn ChainQuery>,
        store: Arc<Store>,
        notifier: Notifier,
        metrics: Metrics,
    ) -> Result<Self> {
        let public_key_der = signer.public_der()?;
        let validator = UtxoValidator::new(chain.clone(), store.clone());
        let round = RoundStateMachine::new(1, config.round_parameters());
        metrics.inc_rounds_started();
        notifier.publish(1, Phase::InputRegistration);
        Ok(Self {
            config,
            signer,
            validator,
            chain,
            store,
            notifier,
            metrics,
            round: RwLock::new(round),
            issued: Mutex::new(HashSet::new()),
            public_key_der,
        })
    }

    pub fn network(&self) -> Network {
        self.config.network
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// DER-encoded coordinator public key clients blind against.
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }

    // ── Read-only operations ────────────────────────────────────────────

    pub async fn status(&self) -> StatusSnapshot {
        let r = self.round.read().await;
        StatusSnapshot {
            round: r.seq(),
            phase: r.phase(),
            denomination: r.params().denomination,
            anonymity_set: r.params().anonymity_set,
            input_registration_elapsed: r.input_registration_elapsed(),
            fee_per_input: r.params().fee_per_input,
            fee_per_output: r.params().fee_per_output,
            max_inputs_per_alice: r.params().max_inputs_per_alice,
        }
    }

    pub async fn input_registration_status(&self) -> Result<InputRegistrationStatus> {
        let r = self.round.read().await;
        r.ensure_phase(Phase::InputRegistration)?;
        Ok(InputRegistrationStatus {
            elapsed: r.input_registration_elapsed(),
            required_peer_count: r.params().anonymity_set,
            registered_peer_count: r.registry.alice_count(),
        })
    }

    // ── Input registration ──────────────────────────────────────────────

    /// Register an Alice: validate every claimed input, compute her change,
    /// issue the blind signature and insert the record — the check-and-insert
    /// tail is one atomic unit under the round lock.
    pub async fn register_input(&self, req: RegisterInputRequest) -> Result<(AliceId, Vec<u8>)> {
        if req.blinded_output.is_empty() {
            return Err(TumblerError::MalformedRequest("missing blinded output".into()));
        }
        if req.inputs.is_empty() {
            return Err(TumblerError::MalformedRequest("no inputs provided".into()));
        }
        for i in 0..req.inputs.len() {
            for j in i + 1..req.inputs.len() {
                if req.inputs[i].outpoint == req.inputs[j].outpoint {
                    return Err(TumblerError::DuplicateInput);
                }
            }
        }

        // Cheap fail-fast before any chain traffic.
        {
            let r = self.round.read().await;
            r.ensure_phase(Phase::InputRegistration)?;
            if req.inputs.len() > r.params().max_inputs_per_alice {
                return Err(TumblerError::MalformedRequest("too many inputs provided".into()));
            }
        }

        // Chain-side validation is read-only; keep it outside the lock.
        let mut validated = Vec::with_capacity(req.inputs.len());
        for input in &req.inputs {
            let txout = self
                .validator
                .validate(input.outpoint, &input.proof, &req.blinded_output)
                .await?;
            validated.push((input.outpoint, txout));
        }

        let mut r = self.round.write().await;
        r.ensure_phase(Phase::InputRegistration)?;
        for (outpoint, _) in &validated {
            if r.registry.owns_input(*outpoint) {
                return Err(TumblerError::InputAlreadyRegistered);
            }
        }

        let total = validated
            .iter()
            .fold(Amount::ZERO, |acc, (_, txout)| acc + txout.value);
        let required = r.params().denomination + r.params().fee_to_pay(validated.len());
        let change_amount = total
            .checked_sub(required)
            .ok_or(TumblerError::InsufficientFunds)?;

        let digest = sha256::Hash::hash(&req.blinded_output).to_byte_array();
        let mut issued = self.issued.lock().expect("issued set poisoned");
        if issued.contains(&digest) {
            return Err(TumblerError::MalformedRequest(
                "blinded output was already signed".into(),
            ));
        }
        let signature = self.signer.blind_sign(&req.blinded_output)?;

        let id = AliceId::random();
        r.registry.register_alice(AliceRecord {
            id,
            inputs: validated,
            change_address: req.change_address,
            change_amount,
            state: AliceState::InputsRegistered,
        })?;
        issued.insert(digest);
        drop(issued);

        self.metrics.inc_alices_registered();
        tracing::info!(
            "Alice {} registered ({}/{})",
            id,
            r.registry.alice_count(),
            r.params().anonymity_set
        );
        if r.registry.alice_count() == r.params().anonymity_set {
            self.advance(&mut r, Phase::ConnectionConfirmation);
        }
        Ok((id, signature))
    }

    // ── Connection confirmation ─────────────────────────────────────────

    pub async fn confirm_connection(&self, id: AliceId) -> Result<()> {
        let mut r = self.round.write().await;
        r.ensure_phase(Phase::ConnectionConfirmation)?;
        r.registry.confirm_connection(id)?;
        if r.registry.all_confirmed() {
            self.advance(&mut r, Phase::OutputRegistration);
        }
        Ok(())
    }

    // ── Output registration ─────────────────────────────────────────────

    /// Register a Bob output. The unblinded signature must verify over the
    /// revealed output's scriptPubKey; the record stores nothing else.
    pub async fn register_output(&self, output_address: Address, unblinded_sig: &[u8]) -> Result<()> {
        let mut r = self.round.write().await;
        r.ensure_phase(Phase::OutputRegistration)?;

        let script = output_address.script_pubkey();
        if !self.signer.verify(script.as_bytes(), unblinded_sig) {
            return Err(TumblerError::InvalidSignature);
        }
        r.registry.register_bob(BobRecord { output_address })?;
        self.metrics.inc_bobs_registered();

        if r.registry.bob_count() == r.registry.alice_count() {
            let unsigned = builder::build_unsigned(r.params(), &r.registry);
            if let Err(e) = r.set_unsigned(unsigned) {
                return Err(self.internal_failure(&mut r, e));
            }
            self.advance(&mut r, Phase::Signing);
        }
        Ok(())
    }

    // ── Signing ─────────────────────────────────────────────────────────

    /// Hand the unsigned coinjoin to an Alice. One fetch per Alice.
    pub async fn unsigned_transaction(&self, id: AliceId) -> Result<Transaction> {
        let mut r = self.round.write().await;
        r.ensure_phase(Phase::Signing)?;
        r.registry.mark_asked_for_coinjoin(id)?;
        match r.unsigned().cloned() {
            Some(tx) => Ok(tx),
            None => {
                let e = TumblerError::Internal("signing phase without unsigned coinjoin".into());
                Err(self.internal_failure(&mut r, e))
            }
        }
    }

    /// Accept a batch of witnesses from one Alice. When the last input is
    /// satisfied the transaction is finalized and handed off for broadcast;
    /// only a successful hand-off moves the round to `Finished`.
    pub async fn submit_signatures(
        &self,
        id: AliceId,
        witnesses: Vec<(OutPoint, Witness)>,
    ) -> Result<usize> {
        if witnesses.is_empty() {
            return Err(TumblerError::MalformedRequest("no signatures provided".into()));
        }

        let (round_seq, final_tx) = {
            let mut r = self.round.write().await;
            r.ensure_phase(Phase::Signing)?;
            let alice = r.registry.find_alice(id)?.clone();
            let remaining = match r.signing_state() {
                Ok(signing) => signing.submit(&alice, &witnesses)?,
                Err(e) => return Err(self.internal_failure(&mut r, e)),
            };
            self.metrics.inc_signature_batches();
            if remaining > 0 {
                return Ok(remaining);
            }
            // Every input satisfied: stop intake and pull the finished
            // transaction out before releasing the lock for broadcast.
            r.pause_intake();
            let signing = r.take_signing().expect("signing state just used");
            match signing.finalize() {
                Ok(tx) => (r.seq(), tx),
                Err(e) => return Err(self.internal_failure(&mut r, e)),
            }
        };

        match self.chain.broadcast(&final_tx).await {
            Ok(txid) => {
                if let Err(e) = self.store.record_coinjoin_success(txid) {
                    tracing::error!("Failed to persist coinjoin {}: {}", txid, e);
                }
                tracing::info!(
                    "Coinjoin {} broadcast: {} inputs, {} outputs",
                    txid,
                    final_tx.input.len(),
                    final_tx.output.len()
                );
                self.metrics.inc_rounds_completed();
                let mut r = self.round.write().await;
                if r.seq() == round_seq {
                    self.advance(&mut r, Phase::Finished);
                    self.begin_next_round(&mut r);
                }
                Ok(0)
            }
            Err(e) => {
                let mut r = self.round.write().await;
                if r.seq() == round_seq {
                    self.reset_round(&mut r, "broadcast failed");
                }
                Err(e)
            }
        }
    }

    // ── Round lifecycle ─────────────────────────────────────────────────

    fn advance(&self, r: &mut RoundStateMachine, to: Phase) {
        r.advance(to);
        self.notifier.publish(r.seq(), to);
    }

    fn begin_next_round(&self, r: &mut RoundStateMachine) {
        let seq = r.seq() + 1;
        *r = RoundStateMachine::new(seq, self.config.round_parameters());
        self.metrics.inc_rounds_started();
        self.notifier.publish(seq, Phase::InputRegistration);
    }

    /// Discard the round wholesale and start fresh. Registrations do not
    /// carry over; inputs may be resubmitted next round.
    fn reset_round(&self, r: &mut RoundStateMachine, reason: &str) {
        tracing::warn!("Aborting round {}: {}", r.seq(), reason);
        self.metrics.inc_rounds_aborted();
        self.begin_next_round(r);
    }

    fn internal_failure(&self, r: &mut RoundStateMachine, err: TumblerError) -> TumblerError {
        tracing::error!("Coordinator invariant violation in round {}: {}", r.seq(), err);
        self.reset_round(r, "internal invariant violation");
        err
    }

    /// Phase-deadline enforcement tick. Deadline misses are round-level
    /// events, not request errors: the round is discarded and a new one
    /// announced.
    pub async fn enforce_deadlines(&self) {
        let mut r = self.round.write().await;
        // Intake paused means a finalized transaction is mid-hand-off; the
        // broadcast path owns the round's fate.
        if !r.is_accepting() {
            return;
        }
        let deadline = match r.phase() {
            Phase::InputRegistration => self.config.input_registration_timeout_secs,
            Phase::ConnectionConfirmation => self.config.connection_confirmation_timeout_secs,
            Phase::OutputRegistration => self.config.output_registration_timeout_secs,
            Phase::Signing => self.config.signing_timeout_secs,
            Phase::Finished => return,
        };
        if r.elapsed_in_phase() < Duration::from_secs(deadline) {
            return;
        }
        // An empty round that timed out has nothing to discard or announce.
        if r.phase() == Phase::InputRegistration && r.registry.alice_count() == 0 {
            r.restart_stopwatches();
            return;
        }
        let reason = match r.phase() {
            Phase::InputRegistration => "anonymity set not reached before deadline",
            Phase::ConnectionConfirmation => "connections not confirmed before deadline",
            Phase::OutputRegistration => "outputs not registered before deadline",
            _ => "signatures not collected before deadline",
        };
        self.reset_round(&mut r, reason);
    }

    pub fn spawn_deadline_watcher(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                coordinator.enforce_deadlines().await;
            }
        })
    }
}
