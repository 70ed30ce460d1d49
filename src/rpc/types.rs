use crate::round::Phase;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub phase: Phase,
    pub round: u64,
    pub denomination_sats: u64,
    pub anonymity_set: usize,
    pub input_registration_elapsed_secs: u64,
    pub fee_per_input_sats: u64,
    pub fee_per_output_sats: u64,
    pub max_inputs_per_alice: usize,
    /// DER-encoded RSA public key, hex. Clients blind against this.
    pub signer_public_key: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InputProofModel {
    /// Outpoint as `txid:vout`.
    pub input: String,
    /// Recoverable signature over the blinded output, hex (65 bytes).
    pub proof: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InputsRequest {
    /// Blinded output commitment, hex.
    pub blinded_output: String,
    /// Change address for this Alice.
    pub change_output: String,
    pub inputs: Vec<InputProofModel>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InputsResponse {
    pub unique_id: String,
    /// Blind signature over the submitted commitment, hex.
    pub signed_blinded_output: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InputRegistrationStatusResponse {
    pub elapsed_seconds: u64,
    pub required_peer_count: usize,
    pub registered_peer_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectionConfirmationRequest {
    pub unique_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OutputRequest {
    /// Destination address for the mixed denomination. The unblinded
    /// signature must verify over this address's scriptPubKey bytes.
    pub output: String,
    /// Unblinded coordinator signature, hex.
    pub signature: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CoinJoinRequest {
    pub unique_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CoinJoinResponse {
    /// Consensus-serialized unsigned transaction, hex.
    pub transaction: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignatureModel {
    /// Outpoint as `txid:vout`.
    pub input: String,
    /// Consensus-serialized witness, hex.
    pub witness: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignatureRequest {
    pub unique_id: String,
    pub signatures: Vec<SignatureModel>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignatureResponse {
    /// Inputs still waiting for a witness; 0 means the round finished.
    pub remaining: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
