//! Collect transaction ids for a set of blocks and fetch their bodies in
//! fixed-size chunks.

use crate::rpc::{self, LedgerClient, RawTransaction};
use bth_key_image_db::TxHash;
use std::collections::{HashMap, HashSet};

/// Log discovery progress every this many blocks.
const PROGRESS_INTERVAL: usize = 1000;

/// A transaction id together with the height of the block it was listed in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DiscoveredTx {
    pub tx_hash: TxHash,
    pub height: u64,
}

/// Bodies returned for one chunk.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FetchedChunk {
    pub transactions: Vec<RawTransaction>,
    /// Requested transactions the daemon did not return.
    pub missed: Vec<DiscoveredTx>,
    /// Highest `block_height` among the returned transactions.
    pub max_block_height: Option<u64>,
}

#[derive(Clone, Copy, Debug)]
pub struct TransactionBatcher {
    chunk_size: usize,
}

impl TransactionBatcher {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// List the transactions of every block in `heights`, in block order and
    /// then in the order the daemon lists them within a block.
    pub fn discover(
        &self,
        client: &impl LedgerClient,
        heights: &[u64],
    ) -> Result<Vec<DiscoveredTx>, rpc::Error> {
        let mut discovered = Vec::new();

        for (index, &height) in heights.iter().enumerate() {
            let tx_hashes = client.block_tx_hashes(height)?;
            discovered.extend(
                tx_hashes
                    .into_iter()
                    .map(|tx_hash| DiscoveredTx { tx_hash, height }),
            );

            let loaded = index + 1;
            if loaded % PROGRESS_INTERVAL == 0 {
                tracing::info!(
                    "Loaded {} of {} blocks ({} transactions)",
                    loaded,
                    heights.len(),
                    discovered.len()
                );
            }
        }

        tracing::debug!(
            blocks = heights.len(),
            transactions = discovered.len(),
            "Discovered transactions"
        );
        Ok(discovered)
    }

    /// Split `discovered` into consecutive chunks of at most `chunk_size`.
    pub fn chunks<'a>(&self, discovered: &'a [DiscoveredTx]) -> std::slice::Chunks<'a, DiscoveredTx> {
        discovered.chunks(self.chunk_size)
    }

    /// Fetch the bodies of one chunk with a single request.
    pub fn fetch_chunk(
        &self,
        client: &impl LedgerClient,
        chunk: &[DiscoveredTx],
    ) -> Result<FetchedChunk, rpc::Error> {
        let hashes: Vec<TxHash> = chunk.iter().map(|tx| tx.tx_hash).collect();
        let response = client.transactions(&hashes)?;

        let requested: HashMap<TxHash, u64> =
            chunk.iter().map(|tx| (tx.tx_hash, tx.height)).collect();
        let mut returned = HashSet::new();

        for raw in &response.txs {
            // Unparseable hashes are left to the extractor to reject.
            if let Ok(tx_hash) = TxHash::from_hex(&raw.tx_hash) {
                if !requested.contains_key(&tx_hash) {
                    return Err(rpc::Error::Protocol(
                        "get_transactions".into(),
                        format!("daemon returned unrequested transaction {tx_hash}"),
                    ));
                }
                returned.insert(tx_hash);
            }
        }

        let missed = chunk
            .iter()
            .filter(|tx| !returned.contains(&tx.tx_hash))
            .copied()
            .collect();

        let max_block_height = response.txs.iter().map(|raw| raw.block_height).max();

        Ok(FetchedChunk {
            transactions: response.txs,
            missed,
            max_block_height,
        })
    }
}
