use crate::round::Phase;
use thiserror::Error;

/// Specialisation of `std::Result` for coordinator operations.
pub type Result<T, E = TumblerError> = std::result::Result<T, E>;

/// Every business-rule violation a request can run into.
///
/// All variants are recoverable at the request boundary: the operation that
/// produced one has not mutated round state. Genuine coordinator invariant
/// violations surface as [`TumblerError::Internal`] and abort the round.
#[derive(Debug, Error)]
pub enum TumblerError {
    #[error("wrong phase: operation requires {expected}, round is in {actual}")]
    WrongPhase { expected: Phase, actual: Phase },

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("attempting to register an input twice is not permitted")]
    DuplicateInput,

    #[error("input is already registered by another alice")]
    InputAlreadyRegistered,

    #[error("provided input is not unspent")]
    NotUnspent,

    #[error("provided input is not confirmed, nor spends a previous coinjoin of this coordinator")]
    NotConfirmed,

    #[error("provided input is not witness_v0_keyhash")]
    WrongScriptType,

    #[error("provided ownership proof is invalid")]
    InvalidProof,

    #[error("total provided inputs must cover denomination + fee")]
    InsufficientFunds,

    #[error("unknown alice id")]
    UnknownId,

    #[error("connection is already confirmed")]
    AlreadyConfirmed,

    #[error("unsigned coinjoin has already been requested")]
    AlreadyRequested,

    #[error("signature does not verify against the revealed output")]
    InvalidSignature,

    #[error("witness targets an input that is not yours or does not exist")]
    UnknownInput,

    #[error("input has already been signed")]
    AlreadySigned,

    #[error("witness does not validate against its input")]
    InvalidWitness,

    #[error("crypto error: {0}")]
    CryptoError(String),

    #[error("chain backend error: {0}")]
    Chain(String),

    #[error("internal coordinator error: {0}")]
    Internal(String),
}

impl TumblerError {
    /// True for failures that indicate a coordinator-side problem rather
    /// than a bad request.
    pub fn is_server_side(&self) -> bool {
        matches!(self, TumblerError::Chain(_) | TumblerError::Internal(_))
    }
}
