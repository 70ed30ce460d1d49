//! Coordinator configuration.
//!
//! Loaded from `config.json` in the data directory; a default file is
//! written on first start so operators have something to edit.

use crate::round::RoundParameters;
use anyhow::{Context, Result};
use bitcoin::{Amount, Network};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub network: Network,
    /// The fixed amount every Bob output receives, in satoshis.
    pub denomination_sats: u64,
    /// Target number of Alices (and therefore mixed outputs) per round.
    pub anonymity_set: usize,
    pub fee_per_input_sats: u64,
    pub fee_per_output_sats: u64,
    pub max_inputs_per_alice: usize,
    /// How long a round may sit in input registration before the intake is
    /// discarded and restarted.
    pub input_registration_timeout_secs: u64,
    pub connection_confirmation_timeout_secs: u64,
    pub output_registration_timeout_secs: u64,
    pub signing_timeout_secs: u64,
    pub rsa_key_bits: usize,
    pub rpc_port: u16,
    pub bitcoind_url: String,
    pub bitcoind_user: Option<String>,
    pub bitcoind_password: Option<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            network: Network::Regtest,
            denomination_sats: 10_000_000, // 0.1 BTC
            anonymity_set: 10,
            fee_per_input_sats: 5_000,
            fee_per_output_sats: 2_500,
            max_inputs_per_alice: 7,
            input_registration_timeout_secs: 3_600,
            connection_confirmation_timeout_secs: 60,
            output_registration_timeout_secs: 60,
            signing_timeout_secs: 120,
            rsa_key_bits: crate::blindsig::DEFAULT_KEY_BITS,
            rpc_port: 37127,
            bitcoind_url: "http://127.0.0.1:18443".into(),
            bitcoind_user: None,
            bitcoind_password: None,
        }
    }
}

impl CoordinatorConfig {
    /// Read the config file, or write defaults if it does not exist yet.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let config = Self::default();
            std::fs::write(path, serde_json::to_string_pretty(&config)?)
                .with_context(|| format!("writing {}", path.display()))?;
            tracing::info!("Wrote default config to {}", path.display());
            Ok(config)
        }
    }

    /// Parameters for the next round. Re-drawn on every round reset, so a
    /// config edit plus restart changes future rounds only.
    pub fn round_parameters(&self) -> RoundParameters {
        RoundParameters {
            anonymity_set: self.anonymity_set.max(2),
            denomination: Amount::from_sat(self.denomination_sats),
            fee_per_input: Amount::from_sat(self.fee_per_input_sats),
            fee_per_output: Amount::from_sat(self.fee_per_output_sats),
            max_inputs_per_alice: self.max_inputs_per_alice.max(1),
        }
    }

    pub fn bitcoind_auth(&self) -> Option<(String, String)> {
        match (&self.bitcoind_user, &self.bitcoind_password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        }
    }
}
