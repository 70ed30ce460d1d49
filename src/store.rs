//! Persistent coordinator state: the signing key blob and the set of
//! CoinJoin transactions this coordinator finalized successfully. The
//! latter backs the confirmation carve-out that lets an input chain
//! directly off a previous round's unconfirmed coinjoin.

use anyhow::Result;
use bitcoin::Txid;
use serde::{Deserialize, Serialize};
use std::path::Path;

const SIGNING_KEY: &[u8] = b"signing_key";
const COINJOIN_TREE: &str = "coinjoins";

#[derive(Debug, Serialize, Deserialize)]
struct CoinJoinRecord {
    finalized_at: u64,
}

pub struct Store {
    db: sled::Db,
    coinjoins: sled::Tree,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        let coinjoins = db.open_tree(COINJOIN_TREE)?;
        Ok(Self { db, coinjoins })
    }

    pub fn save_signing_key(&self, blob: &[u8]) -> Result<()> {
        self.db.insert(SIGNING_KEY, blob)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn load_signing_key(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(SIGNING_KEY)?.map(|v| v.to_vec()))
    }

    /// Record a successfully broadcast coinjoin.
    pub fn record_coinjoin_success(&self, txid: Txid) -> Result<()> {
        let record = CoinJoinRecord { finalized_at: unix_now() };
        self.coinjoins
            .insert(txid_key(txid), bincode::serialize(&record)?)?;
        self.coinjoins.flush()?;
        Ok(())
    }

    /// Did this coordinator finalize `txid` in a previous round?
    pub fn is_succeeded_coinjoin(&self, txid: Txid) -> Result<bool> {
        Ok(self.coinjoins.get(txid_key(txid))?.is_some())
    }

    pub fn coinjoin_count(&self) -> usize {
        self.coinjoins.len()
    }
}

fn txid_key(txid: Txid) -> [u8; 32] {
    use bitcoin::hashes::Hash;
    txid.to_byte_array()
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}
