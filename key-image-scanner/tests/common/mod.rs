//! An in-memory daemon for scan tests.

#![allow(dead_code)]

use botho_key_image_scanner::{
    rpc::{self, BlockHeaderSummary, LedgerClient, RawTransaction, TransactionsResponse},
    KeyImage, KeyImageStore, TxHash,
};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use tempfile::TempDir;

#[derive(Default)]
struct Chain {
    height: u64,
    blocks: BTreeMap<u64, Vec<TxHash>>,
    bodies: HashMap<TxHash, (u64, String)>,
    withheld: HashSet<TxHash>,
    next_id: u64,
}

/// A daemon serving a chain kept in memory, counting the requests it gets.
#[derive(Default)]
pub struct FakeLedger {
    chain: Mutex<Chain>,
    transient_failures: AtomicUsize,
    chain_height_calls: AtomicUsize,
    header_range_calls: AtomicUsize,
    block_calls: AtomicUsize,
    transactions_calls: AtomicUsize,
    stop_after: Mutex<Option<(usize, Arc<AtomicBool>)>>,
}

pub fn key_image_json(key_image: &KeyImage) -> String {
    format!(r#"{{"key":{{"amount":0,"key_offsets":[3,9],"k_image":"{key_image}"}}}}"#)
}

pub fn migration_json(key_image: &KeyImage) -> String {
    format!(r#"{{"migration":{{"amount":10,"k_image":"{key_image}"}}}}"#)
}

pub fn tx_json(inputs: &[String]) -> String {
    format!(
        r#"{{"version":2,"unlock_time":0,"vin":[{}],"vout":[],"extra":[]}}"#,
        inputs.join(",")
    )
}

/// A key image that is unique per `(tx, index)`.
pub fn key_image(tx: u64, index: u8) -> KeyImage {
    let mut bytes = [0xAB; 32];
    bytes[..8].copy_from_slice(&tx.to_be_bytes());
    bytes[8] = index;
    KeyImage(bytes)
}

impl FakeLedger {
    pub fn new(height: u64) -> Arc<Self> {
        let ledger = Self::default();
        ledger.set_height(height);
        Arc::new(ledger)
    }

    pub fn set_height(&self, height: u64) {
        self.chain.lock().unwrap().height = height;
    }

    pub fn height(&self) -> u64 {
        self.chain.lock().unwrap().height
    }

    /// Add a transaction with the given body to the block at `height`.
    pub fn add_raw_tx(&self, height: u64, as_json: String) -> TxHash {
        let mut chain = self.chain.lock().unwrap();
        chain.next_id += 1;
        let mut bytes = [0x5A; 32];
        bytes[..8].copy_from_slice(&chain.next_id.to_be_bytes());
        let tx_hash = TxHash(bytes);

        chain.blocks.entry(height).or_default().push(tx_hash);
        chain.bodies.insert(tx_hash, (height, as_json));
        tx_hash
    }

    /// Add a transaction spending `key_images` with regular inputs.
    pub fn add_tx(&self, height: u64, key_images: &[KeyImage]) -> TxHash {
        let inputs: Vec<String> = key_images.iter().map(key_image_json).collect();
        self.add_raw_tx(height, tx_json(&inputs))
    }

    pub fn replace_body(&self, tx_hash: &TxHash, as_json: String) {
        let mut chain = self.chain.lock().unwrap();
        if let Some(body) = chain.bodies.get_mut(tx_hash) {
            body.1 = as_json;
        }
    }

    /// Report the transaction in `missed_tx` instead of returning it.
    pub fn withhold(&self, tx_hash: &TxHash, withhold: bool) {
        let mut chain = self.chain.lock().unwrap();
        if withhold {
            chain.withheld.insert(*tx_hash);
        } else {
            chain.withheld.remove(tx_hash);
        }
    }

    /// Fail the next `count` requests with a transient error.
    pub fn fail_next(&self, count: usize) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Set `flag` once `count` transaction fetches have been served.
    pub fn stop_after_fetches(&self, count: usize, flag: Arc<AtomicBool>) {
        *self.stop_after.lock().unwrap() = Some((count, flag));
    }

    pub fn chain_height_calls(&self) -> usize {
        self.chain_height_calls.load(Ordering::SeqCst)
    }

    pub fn header_range_calls(&self) -> usize {
        self.header_range_calls.load(Ordering::SeqCst)
    }

    pub fn block_calls(&self) -> usize {
        self.block_calls.load(Ordering::SeqCst)
    }

    pub fn transactions_calls(&self) -> usize {
        self.transactions_calls.load(Ordering::SeqCst)
    }

    fn maybe_fail(&self, method: &str) -> Result<(), rpc::Error> {
        let failed = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            Err(rpc::Error::Transient(
                method.to_string(),
                "connection reset by peer".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

impl LedgerClient for FakeLedger {
    fn chain_height(&self) -> Result<u64, rpc::Error> {
        self.chain_height_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail("get_height")?;
        Ok(self.height())
    }

    fn header_range(&self, start: u64, end: u64) -> Result<Vec<BlockHeaderSummary>, rpc::Error> {
        self.header_range_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail("get_block_headers_range")?;

        let chain = self.chain.lock().unwrap();
        if end >= chain.height || start > end {
            return Err(rpc::Error::Protocol(
                "get_block_headers_range".to_string(),
                format!("invalid range {start}..={end}"),
            ));
        }
        Ok((start..=end)
            .map(|height| BlockHeaderSummary {
                height,
                tx_count: chain.blocks.get(&height).map_or(0, |txs| txs.len() as u64),
            })
            .collect())
    }

    fn block_tx_hashes(&self, height: u64) -> Result<Vec<TxHash>, rpc::Error> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail("get_block")?;

        let chain = self.chain.lock().unwrap();
        Ok(chain.blocks.get(&height).cloned().unwrap_or_default())
    }

    fn transactions(&self, tx_hashes: &[TxHash]) -> Result<TransactionsResponse, rpc::Error> {
        let served = self.transactions_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.maybe_fail("get_transactions")?;

        let mut response = TransactionsResponse::default();
        {
            let chain = self.chain.lock().unwrap();
            for tx_hash in tx_hashes {
                match chain.bodies.get(tx_hash) {
                    Some((height, as_json)) if !chain.withheld.contains(tx_hash) => {
                        response.txs.push(RawTransaction {
                            tx_hash: tx_hash.to_hex(),
                            block_height: *height,
                            as_json: as_json.clone(),
                        });
                    }
                    _ => response.missed.push(*tx_hash),
                }
            }
        }

        if let Some((count, flag)) = self.stop_after.lock().unwrap().as_ref() {
            if served >= *count {
                flag.store(true, Ordering::SeqCst);
            }
        }

        Ok(response)
    }
}

pub fn open_store() -> (TempDir, Arc<KeyImageStore>) {
    let dir = TempDir::new().unwrap();
    let store = KeyImageStore::open(dir.path()).unwrap();
    (dir, Arc::new(store))
}
