//! Blind-RSA signing capability.
//!
//! Wraps a coordinator RSA key pair behind the two operations the round
//! protocol needs: signing an opaque blinded byte string during input
//! registration, and verifying an unblinded signature against a revealed
//! output during output registration. The coordinator never sees the
//! unblinded message at signing time, which is what makes the Alice→Bob
//! mapping unlinkable.
//!
//! RSA-PSS over SHA-256 with a 32-byte salt, the same parameters the
//! Whirlpool-style clients expect. No phase awareness lives here.

use crate::error::{Result, TumblerError};
use blind_rsa_signatures::{Hash, KeyPair, Options, PublicKey, SecretKey, Signature};

/// Default modulus size for a freshly generated coordinator key.
pub const DEFAULT_KEY_BITS: usize = 2048;

pub struct BlindSigner {
    keypair: KeyPair,
    options: Options,
}

/// The signing options every party must agree on.
pub fn signing_options() -> Options {
    Options::new(Hash::Sha256, false, 32)
}

impl BlindSigner {
    /// Generate a fresh coordinator key.
    pub fn generate(modulus_bits: usize) -> Result<Self> {
        let keypair = KeyPair::generate(&mut rand::thread_rng(), modulus_bits)
            .map_err(|e| TumblerError::CryptoError(e.to_string()))?;
        Ok(Self { keypair, options: signing_options() })
    }

    /// Reconstruct a signer from a DER-encoded secret key.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let sk = SecretKey::from_der(der)
            .map_err(|e| TumblerError::CryptoError(e.to_string()))?;
        let pk = sk
            .public_key()
            .map_err(|e| TumblerError::CryptoError(e.to_string()))?;
        Ok(Self { keypair: KeyPair { pk, sk }, options: signing_options() })
    }

    /// DER encoding of the secret key, for the key store.
    pub fn secret_der(&self) -> Result<Vec<u8>> {
        self.keypair
            .sk
            .to_der()
            .map_err(|e| TumblerError::CryptoError(e.to_string()))
    }

    /// DER encoding of the public key. Clients need this to blind and
    /// unblind output commitments.
    pub fn public_der(&self) -> Result<Vec<u8>> {
        self.keypair
            .pk
            .to_der()
            .map_err(|e| TumblerError::CryptoError(e.to_string()))
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.keypair.pk
    }

    /// Sign a blinded message. Deterministic w.r.t. the key; fails only on
    /// input that is not a valid blinded value for this modulus.
    pub fn blind_sign(&self, blinded: &[u8]) -> Result<Vec<u8>> {
        let sig = self
            .keypair
            .sk
            .blind_sign(&mut rand::thread_rng(), blinded, &self.options)
            .map_err(|e| TumblerError::CryptoError(e.to_string()))?;
        Ok(sig.0)
    }

    /// Verify an unblinded signature over the revealed message.
    pub fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
        Signature(sig.to_vec())
            .verify(&self.keypair.pk, None, msg, &self.options)
            .is_ok()
    }
}
