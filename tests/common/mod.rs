//! Shared fixtures: an in-memory chain backend, a reusable coordinator
//! key, and a scriptable Alice that performs real blinding, ownership
//! proofs and P2WPKH signing against the coordinator.
#![allow(dead_code)]

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::key::CompressedPublicKey;
use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::sign_message::MessageSignature;
use bitcoin::{Address, Amount, Network, OutPoint, Transaction, Txid, Witness};
use blind_rsa_signatures::{BlindSignature, BlindingResult, PublicKey as RsaPublicKey};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tumbler::blindsig::{signing_options, BlindSigner};
use tumbler::chain::{ChainQuery, UnspentOut};
use tumbler::config::CoordinatorConfig;
use tumbler::coordinator::{InputProof, RegisterInputRequest, RoundCoordinator};
use tumbler::error::{Result as TumblerResult, TumblerError};
use tumbler::metrics::Metrics;
use tumbler::notify::Notifier;
use tumbler::store::Store;
use tumbler::validate::proof_msg_hash;

/// 0.1 BTC, matching the default round denomination used in tests.
pub const DENOMINATION: u64 = 10_000_000;
/// Fee for a single-input Alice: 1 input + 2 outputs.
pub const SINGLE_INPUT_FEE: u64 = 5_000 + 2 * 2_500;

pub struct MockChain {
    utxos: Mutex<HashMap<OutPoint, UnspentOut>>,
    pub broadcasts: Mutex<Vec<Transaction>>,
    pub fail_broadcast: AtomicBool,
    next_txid: AtomicU8,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            utxos: Mutex::new(HashMap::new()),
            broadcasts: Mutex::new(Vec::new()),
            fail_broadcast: AtomicBool::new(false),
            next_txid: AtomicU8::new(1),
        }
    }

    /// Create a confirmed (or not) P2WPKH UTXO paying to `pk`.
    pub fn fund(&self, pk: &CompressedPublicKey, value: u64, confirmations: u32) -> OutPoint {
        let n = self.next_txid.fetch_add(1, Ordering::SeqCst);
        let outpoint = OutPoint { txid: Txid::from_byte_array([n; 32]), vout: 0 };
        let script_pubkey = Address::p2wpkh(pk, Network::Regtest).script_pubkey();
        self.utxos.lock().unwrap().insert(
            outpoint,
            UnspentOut { value: Amount::from_sat(value), script_pubkey, confirmations },
        );
        outpoint
    }
}

#[async_trait]
impl ChainQuery for MockChain {
    async fn unspent_output(&self, outpoint: OutPoint) -> TumblerResult<Option<UnspentOut>> {
        Ok(self.utxos.lock().unwrap().get(&outpoint).cloned())
    }

    async fn broadcast(&self, tx: &Transaction) -> TumblerResult<Txid> {
        if self.fail_broadcast.load(Ordering::SeqCst) {
            return Err(TumblerError::Chain("node rejected transaction".into()));
        }
        self.broadcasts.lock().unwrap().push(tx.clone());
        Ok(tx.compute_txid())
    }
}

/// RSA keygen is the slow part of these tests; generate the coordinator
/// key once per test binary and rebuild signers from its DER.
static SIGNER_DER: OnceLock<Vec<u8>> = OnceLock::new();

pub fn shared_signer() -> BlindSigner {
    let der = SIGNER_DER.get_or_init(|| {
        let signer = BlindSigner::generate(2048).unwrap();
        signer.secret_der().unwrap()
    });
    BlindSigner::from_der(der).unwrap()
}

pub fn test_config(anonymity_set: usize) -> CoordinatorConfig {
    CoordinatorConfig {
        network: Network::Regtest,
        denomination_sats: DENOMINATION,
        anonymity_set,
        fee_per_input_sats: 5_000,
        fee_per_output_sats: 2_500,
        max_inputs_per_alice: 7,
        ..Default::default()
    }
}

pub struct TestBed {
    pub _dir: tempfile::TempDir,
    pub chain: Arc<MockChain>,
    pub store: Arc<Store>,
    pub notifier: Notifier,
    pub coordinator: Arc<RoundCoordinator>,
}

pub fn testbed(anonymity_set: usize) -> TestBed {
    testbed_with_config(test_config(anonymity_set))
}

pub fn testbed_with_config(config: CoordinatorConfig) -> TestBed {
    let dir = tempfile::TempDir::new().unwrap();
    let chain = Arc::new(MockChain::new());
    let store = Arc::new(Store::open(dir.path().join("db")).unwrap());
    let notifier = Notifier::new();
    let coordinator = Arc::new(
        RoundCoordinator::new(
            config,
            shared_signer(),
            chain.clone(),
            store.clone(),
            notifier.clone(),
            Metrics::new(),
        )
        .unwrap(),
    );
    TestBed { _dir: dir, chain, store, notifier, coordinator }
}

/// A wallet-side participant: owns inputs as an Alice and a fresh
/// destination as the eventual Bob.
pub struct TestAlice {
    pub wallet_sk: SecretKey,
    pub wallet_pk: CompressedPublicKey,
    pub change_address: Address,
    pub dest_address: Address,
    pub blinded: Vec<u8>,
    blinding: BlindingResult,
}

impl TestAlice {
    /// Deterministic keys from a small seed; blinds the destination's
    /// scriptPubKey against the coordinator key.
    pub fn new(seed: u8, signer_pk: &RsaPublicKey) -> Self {
        let secp = Secp256k1::new();
        let wallet_sk = SecretKey::from_slice(&[seed; 32]).unwrap();
        let wallet_pk = CompressedPublicKey(wallet_sk.public_key(&secp));
        let change_sk = SecretKey::from_slice(&[seed.wrapping_add(100); 32]).unwrap();
        let change_pk = CompressedPublicKey(change_sk.public_key(&secp));
        let dest_sk = SecretKey::from_slice(&[seed.wrapping_add(200); 32]).unwrap();
        let dest_pk = CompressedPublicKey(dest_sk.public_key(&secp));

        let change_address = Address::p2wpkh(&change_pk, Network::Regtest);
        let dest_address = Address::p2wpkh(&dest_pk, Network::Regtest);

        let msg = dest_address.script_pubkey();
        let blinding = signer_pk
            .blind(&mut rand::thread_rng(), msg.as_bytes(), false, &signing_options())
            .unwrap();
        let blinded = blinding.blind_msg.0.clone();

        Self { wallet_sk, wallet_pk, change_address, dest_address, blinded, blinding }
    }

    /// Ownership proof over this Alice's blinded commitment.
    pub fn proof(&self) -> Vec<u8> {
        self.proof_for(&self.blinded)
    }

    /// Ownership proof over arbitrary blinded bytes (for mismatch tests).
    pub fn proof_for(&self, blinded: &[u8]) -> Vec<u8> {
        let secp = Secp256k1::new();
        let msg = Message::from_digest(proof_msg_hash(blinded).to_byte_array());
        let sig = secp.sign_ecdsa_recoverable(&msg, &self.wallet_sk);
        MessageSignature::new(sig, true).serialize().to_vec()
    }

    pub fn register_request(&self, outpoints: &[OutPoint]) -> RegisterInputRequest {
        RegisterInputRequest {
            blinded_output: self.blinded.clone(),
            change_address: self.change_address.clone(),
            inputs: outpoints
                .iter()
                .map(|op| InputProof { outpoint: *op, proof: self.proof() })
                .collect(),
        }
    }

    /// Unblind the coordinator's blind signature into the signature a Bob
    /// presents at output registration.
    pub fn unblind(&self, blind_sig: &[u8], signer_pk: &RsaPublicKey) -> Vec<u8> {
        let msg = self.dest_address.script_pubkey();
        signer_pk
            .finalize(
                &BlindSignature(blind_sig.to_vec()),
                &self.blinding.secret,
                self.blinding.msg_randomizer,
                msg.as_bytes(),
                &signing_options(),
            )
            .unwrap()
            .0
    }

    /// P2WPKH witness for this Alice's input at `outpoint` in `tx`.
    pub fn witness(&self, tx: &Transaction, outpoint: OutPoint, value: Amount) -> Witness {
        let secp = Secp256k1::new();
        let index = tx
            .input
            .iter()
            .position(|i| i.previous_output == outpoint)
            .expect("input present in coinjoin");
        let script_pubkey = Address::p2wpkh(&self.wallet_pk, Network::Regtest).script_pubkey();
        let mut cache = SighashCache::new(tx);
        let sighash = cache
            .p2wpkh_signature_hash(index, &script_pubkey, value, EcdsaSighashType::All)
            .unwrap();
        let msg = Message::from_digest(sighash.to_byte_array());
        let signature = bitcoin::ecdsa::Signature {
            signature: secp.sign_ecdsa(&msg, &self.wallet_sk),
            sighash_type: EcdsaSighashType::All,
        };
        Witness::p2wpkh(&signature, &self.wallet_pk.0)
    }
}
