use super::types::*;
use crate::coordinator::{InputProof, RegisterInputRequest, RoundCoordinator};
use crate::error::TumblerError;
use crate::registry::AliceId;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bitcoin::address::NetworkUnchecked;
use bitcoin::consensus::encode;
use bitcoin::{Address, OutPoint, Witness};
use std::sync::Arc;

type AppState = Arc<RoundCoordinator>;

/// A request failure, rendered as `{ "error": ... }` with a status code
/// derived from the taxonomy.
pub struct ApiError(pub TumblerError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_server_side() {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::BAD_REQUEST
        };
        (status, Json(ErrorResponse { error: self.0.to_string() })).into_response()
    }
}

fn reject(state: &AppState, err: TumblerError) -> ApiError {
    state.metrics().inc_rejected_requests();
    ApiError(err)
}

fn parse_hex(s: &str, label: &str) -> Result<Vec<u8>, TumblerError> {
    hex::decode(s).map_err(|_| TumblerError::MalformedRequest(format!("invalid {} hex", label)))
}

fn parse_outpoint(s: &str) -> Result<OutPoint, TumblerError> {
    s.parse::<OutPoint>()
        .map_err(|_| TumblerError::MalformedRequest("invalid outpoint, expected txid:vout".into()))
}

fn parse_address(state: &AppState, s: &str) -> Result<Address, TumblerError> {
    s.parse::<Address<NetworkUnchecked>>()
        .map_err(|_| TumblerError::MalformedRequest("invalid address".into()))?
        .require_network(state.network())
        .map_err(|_| TumblerError::MalformedRequest("address is for the wrong network".into()))
}

pub async fn health() -> &'static str {
    "OK"
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snapshot = state.status().await;
    Json(StatusResponse {
        phase: snapshot.phase,
        round: snapshot.round,
        denomination_sats: snapshot.denomination.to_sat(),
        anonymity_set: snapshot.anonymity_set,
        input_registration_elapsed_secs: snapshot.input_registration_elapsed.as_secs(),
        fee_per_input_sats: snapshot.fee_per_input.to_sat(),
        fee_per_output_sats: snapshot.fee_per_output.to_sat(),
        max_inputs_per_alice: snapshot.max_inputs_per_alice,
        signer_public_key: hex::encode(state.public_key_der()),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn register_inputs(
    State(state): State<AppState>,
    Json(req): Json<InputsRequest>,
) -> Result<Json<InputsResponse>, ApiError> {
    let request = parse_inputs_request(&state, &req).map_err(|e| reject(&state, e))?;
    let (id, signature) = state
        .register_input(request)
        .await
        .map_err(|e| reject(&state, e))?;
    Ok(Json(InputsResponse {
        unique_id: id.to_hex(),
        signed_blinded_output: hex::encode(signature),
    }))
}

fn parse_inputs_request(
    state: &AppState,
    req: &InputsRequest,
) -> Result<RegisterInputRequest, TumblerError> {
    let blinded_output = parse_hex(&req.blinded_output, "blinded_output")?;
    let change_address = parse_address(state, &req.change_output)?;
    let inputs = req
        .inputs
        .iter()
        .map(|m| {
            Ok(InputProof {
                outpoint: parse_outpoint(&m.input)?,
                proof: parse_hex(&m.proof, "proof")?,
            })
        })
        .collect::<Result<Vec<_>, TumblerError>>()?;
    Ok(RegisterInputRequest { blinded_output, change_address, inputs })
}

pub async fn input_registration_status(
    State(state): State<AppState>,
) -> Result<Json<InputRegistrationStatusResponse>, ApiError> {
    let status = state
        .input_registration_status()
        .await
        .map_err(|e| reject(&state, e))?;
    Ok(Json(InputRegistrationStatusResponse {
        elapsed_seconds: status.elapsed.as_secs(),
        required_peer_count: status.required_peer_count,
        registered_peer_count: status.registered_peer_count,
    }))
}

pub async fn connection_confirmation(
    State(state): State<AppState>,
    Json(req): Json<ConnectionConfirmationRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let id = AliceId::from_hex(&req.unique_id).map_err(|e| reject(&state, e))?;
    state
        .confirm_connection(id)
        .await
        .map_err(|e| reject(&state, e))?;
    Ok(Json(SuccessResponse { success: true }))
}

pub async fn register_output(
    State(state): State<AppState>,
    Json(req): Json<OutputRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let address = parse_address(&state, &req.output).map_err(|e| reject(&state, e))?;
    let signature = parse_hex(&req.signature, "signature").map_err(|e| reject(&state, e))?;
    state
        .register_output(address, &signature)
        .await
        .map_err(|e| reject(&state, e))?;
    Ok(Json(SuccessResponse { success: true }))
}

pub async fn coinjoin(
    State(state): State<AppState>,
    Json(req): Json<CoinJoinRequest>,
) -> Result<Json<CoinJoinResponse>, ApiError> {
    let id = AliceId::from_hex(&req.unique_id).map_err(|e| reject(&state, e))?;
    let tx = state
        .unsigned_transaction(id)
        .await
        .map_err(|e| reject(&state, e))?;
    Ok(Json(CoinJoinResponse { transaction: encode::serialize_hex(&tx) }))
}

pub async fn signature(
    State(state): State<AppState>,
    Json(req): Json<SignatureRequest>,
) -> Result<Json<SignatureResponse>, ApiError> {
    let id = AliceId::from_hex(&req.unique_id).map_err(|e| reject(&state, e))?;
    let witnesses = req
        .signatures
        .iter()
        .map(|m| {
            let outpoint = parse_outpoint(&m.input)?;
            let raw = parse_hex(&m.witness, "witness")?;
            let witness: Witness = encode::deserialize(&raw)
                .map_err(|_| TumblerError::MalformedRequest("invalid witness encoding".into()))?;
            Ok((outpoint, witness))
        })
        .collect::<Result<Vec<_>, TumblerError>>()
        .map_err(|e| reject(&state, e))?;
    let remaining = state
        .submit_signatures(id, witnesses)
        .await
        .map_err(|e| reject(&state, e))?;
    Ok(Json(SignatureResponse { remaining }))
}
