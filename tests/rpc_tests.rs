//! HTTP surface tests: the axum layer is a thin adapter, so these focus on
//! wire shapes, status codes and one full round driven entirely over HTTP.

mod common;

use bitcoin::consensus::encode;
use bitcoin::{Amount, Transaction};
use blind_rsa_signatures::PublicKey as RsaPublicKey;
use common::*;
use std::time::Duration;
use tumbler::rpc::types::*;
use tumbler::rpc::RpcServer;

/// Start a coordinator + RPC server, return the port, client, and the
/// testbed that must stay alive.
async fn start_rpc(anonymity_set: usize) -> (u16, reqwest::Client, TestBed) {
    let bed = testbed(anonymity_set);

    // Use a random high port to reduce collisions.
    let rpc_port = 18500 + (rand::random::<u16>() % 1000);
    let server = RpcServer::new(rpc_port);
    let coordinator = bed.coordinator.clone();

    tokio::spawn(async move {
        server.run(coordinator).await.unwrap();
    });

    // Give the server time to bind
    tokio::time::sleep(Duration::from_millis(150)).await;

    (rpc_port, reqwest::Client::new(), bed)
}

fn url(port: u16, path: &str) -> String {
    format!("http://127.0.0.1:{}{}", port, path)
}

#[tokio::test]
async fn test_rpc_health() {
    let (port, client, _bed) = start_rpc(2).await;
    let resp = client.get(url(port, "/health")).send().await.unwrap();
    assert!(resp.status().is_success());
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_rpc_status_shape() {
    let (port, client, _bed) = start_rpc(3).await;
    let resp = client.get(url(port, "/status")).send().await.unwrap();
    assert!(resp.status().is_success());

    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["phase"], "input_registration");
    assert_eq!(json["round"], 1);
    assert_eq!(json["denomination_sats"], DENOMINATION);
    assert_eq!(json["anonymity_set"], 3);
    assert_eq!(json["max_inputs_per_alice"], 7);
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));

    // The signer key must round-trip into a usable RSA public key.
    let der = hex::decode(json["signer_public_key"].as_str().unwrap()).unwrap();
    RsaPublicKey::from_der(&der).unwrap();
}

#[tokio::test]
async fn test_rpc_malformed_inputs_rejected() {
    let (port, client, _bed) = start_rpc(2).await;

    let req = InputsRequest {
        blinded_output: "not hex".into(),
        change_output: "bcrt1qqqqq".into(),
        inputs: vec![],
    };
    let resp = client
        .post(url(port, "/inputs"))
        .json(&req)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let err: ErrorResponse = resp.json().await.unwrap();
    assert!(err.error.contains("invalid blinded_output hex"));
}

#[tokio::test]
async fn test_rpc_wrong_phase_is_a_client_error() {
    let (port, client, _bed) = start_rpc(2).await;

    let req = ConnectionConfirmationRequest { unique_id: "00".repeat(16) };
    let resp = client
        .post(url(port, "/connection-confirmation"))
        .json(&req)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let err: ErrorResponse = resp.json().await.unwrap();
    assert!(err.error.contains("wrong phase"));
}

#[tokio::test]
async fn test_rpc_full_round_over_http() {
    let (port, client, bed) = start_rpc(2).await;

    // Pick up the coordinator key the way a real client would.
    let status: StatusResponse = client
        .get(url(port, "/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let signer_pk =
        RsaPublicKey::from_der(&hex::decode(&status.signer_public_key).unwrap()).unwrap();

    let funded = DENOMINATION + SINGLE_INPUT_FEE + 50_000;
    let alices: Vec<TestAlice> = vec![
        TestAlice::new(1, &signer_pk),
        TestAlice::new(2, &signer_pk),
    ];
    let outpoints: Vec<_> = alices
        .iter()
        .map(|a| bed.chain.fund(&a.wallet_pk, funded, 6))
        .collect();

    // Register both Alices.
    let mut ids = Vec::new();
    let mut blind_sigs = Vec::new();
    for (alice, outpoint) in alices.iter().zip(&outpoints) {
        let req = InputsRequest {
            blinded_output: hex::encode(&alice.blinded),
            change_output: alice.change_address.to_string(),
            inputs: vec![InputProofModel {
                input: outpoint.to_string(),
                proof: hex::encode(alice.proof()),
            }],
        };
        let resp = client
            .post(url(port, "/inputs"))
            .json(&req)
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success(), "{}", resp.text().await.unwrap());
        let body: InputsResponse = resp.json().await.unwrap();
        ids.push(body.unique_id);
        blind_sigs.push(hex::decode(body.signed_blinded_output).unwrap());
    }

    // Confirm both connections.
    for id in &ids {
        let resp = client
            .post(url(port, "/connection-confirmation"))
            .json(&ConnectionConfirmationRequest { unique_id: id.clone() })
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
    }

    // Register both outputs with unblinded signatures.
    for (alice, blind_sig) in alices.iter().zip(&blind_sigs) {
        let resp = client
            .post(url(port, "/output"))
            .json(&OutputRequest {
                output: alice.dest_address.to_string(),
                signature: hex::encode(alice.unblind(blind_sig, &signer_pk)),
            })
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success(), "{}", resp.text().await.unwrap());
    }

    // Fetch the unsigned coinjoin and sign it.
    let resp = client
        .post(url(port, "/coinjoin"))
        .json(&CoinJoinRequest { unique_id: ids[0].clone() })
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: CoinJoinResponse = resp.json().await.unwrap();
    let tx: Transaction =
        encode::deserialize(&hex::decode(&body.transaction).unwrap()).unwrap();
    assert_eq!(tx.input.len(), 2);

    let mut last_remaining = usize::MAX;
    for ((alice, outpoint), id) in alices.iter().zip(&outpoints).zip(&ids) {
        let witness = alice.witness(&tx, *outpoint, Amount::from_sat(funded));
        let resp = client
            .post(url(port, "/signature"))
            .json(&SignatureRequest {
                unique_id: id.clone(),
                signatures: vec![SignatureModel {
                    input: outpoint.to_string(),
                    witness: hex::encode(encode::serialize(&witness)),
                }],
            })
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success(), "{}", resp.text().await.unwrap());
        let body: SignatureResponse = resp.json().await.unwrap();
        last_remaining = body.remaining;
    }
    assert_eq!(last_remaining, 0);

    // The round completed and a new one is accepting registrations.
    assert_eq!(bed.chain.broadcasts.lock().unwrap().len(), 1);
    let status: StatusResponse = client
        .get(url(port, "/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status.round, 2);
}
