//! Chain-query and broadcast collaborators.
//!
//! The coordinator only ever asks two things of the Bitcoin network: "is
//! this outpoint an unspent output, and what does it look like?" and
//! "broadcast this transaction". Both are behind [`ChainQuery`] so the
//! round logic stays testable without a node.

use crate::error::{Result, TumblerError};
use async_trait::async_trait;
use bitcoin::consensus::encode;
use bitcoin::{Amount, OutPoint, ScriptBuf, Transaction, Txid};
use serde_json::json;

/// What the chain knows about an unspent output.
#[derive(Clone, Debug)]
pub struct UnspentOut {
    pub value: Amount,
    pub script_pubkey: ScriptBuf,
    pub confirmations: u32,
}

#[async_trait]
pub trait ChainQuery: Send + Sync {
    /// Look up an outpoint in the UTXO set. `None` means spent or unknown.
    async fn unspent_output(&self, outpoint: OutPoint) -> Result<Option<UnspentOut>>;

    /// Submit a final transaction to the network.
    async fn broadcast(&self, tx: &Transaction) -> Result<Txid>;
}

/// `ChainQuery` against a bitcoind JSON-RPC endpoint (`gettxout`,
/// `sendrawtransaction`).
pub struct BitcoindRpc {
    url: String,
    auth: Option<(String, String)>,
    client: reqwest::Client,
}

impl BitcoindRpc {
    pub fn new(url: impl Into<String>, auth: Option<(String, String)>) -> Self {
        Self {
            url: url.into(),
            auth,
            client: reqwest::Client::new(),
        }
    }

    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let body = json!({
            "jsonrpc": "1.0",
            "id": "tumbler",
            "method": method,
            "params": params,
        });
        let mut req = self.client.post(&self.url).json(&body);
        if let Some((user, pass)) = &self.auth {
            req = req.basic_auth(user, Some(pass));
        }
        let resp: serde_json::Value = req
            .send()
            .await
            .map_err(|e| TumblerError::Chain(e.to_string()))?
            .json()
            .await
            .map_err(|e| TumblerError::Chain(e.to_string()))?;

        if !resp["error"].is_null() {
            return Err(TumblerError::Chain(resp["error"].to_string()));
        }
        Ok(resp["result"].clone())
    }
}

#[async_trait]
impl ChainQuery for BitcoindRpc {
    async fn unspent_output(&self, outpoint: OutPoint) -> Result<Option<UnspentOut>> {
        let result = self
            .call(
                "gettxout",
                json!([outpoint.txid.to_string(), outpoint.vout, true]),
            )
            .await?;
        if result.is_null() {
            return Ok(None);
        }

        let btc = result["value"]
            .as_f64()
            .ok_or_else(|| TumblerError::Chain("gettxout: missing value".into()))?;
        let value = Amount::from_btc(btc).map_err(|e| TumblerError::Chain(e.to_string()))?;
        let script_hex = result["scriptPubKey"]["hex"]
            .as_str()
            .ok_or_else(|| TumblerError::Chain("gettxout: missing scriptPubKey".into()))?;
        let script_pubkey =
            ScriptBuf::from_hex(script_hex).map_err(|e| TumblerError::Chain(e.to_string()))?;
        let confirmations = result["confirmations"].as_u64().unwrap_or(0) as u32;

        Ok(Some(UnspentOut { value, script_pubkey, confirmations }))
    }

    async fn broadcast(&self, tx: &Transaction) -> Result<Txid> {
        let result = self
            .call("sendrawtransaction", json!([encode::serialize_hex(tx)]))
            .await?;
        let txid = result
            .as_str()
            .ok_or_else(|| TumblerError::Chain("sendrawtransaction: no txid".into()))?
            .parse::<Txid>()
            .map_err(|e| TumblerError::Chain(e.to_string()))?;
        Ok(txid)
    }
}
