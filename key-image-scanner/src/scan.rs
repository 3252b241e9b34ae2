//! The scan loop.
//!
//! A pass reads the persisted cursor, locates the transaction-bearing blocks
//! between the cursor and the chain tip, fetches their transactions chunk by
//! chunk and commits each chunk's key images together with a cursor advance.
//! Passes are strictly sequential and resume from whatever was last
//! committed, so an aborted pass loses no committed progress.

use crate::{
    batcher::{DiscoveredTx, TransactionBatcher},
    config::ScannerConfig,
    extractor::KeyImageExtractor,
    locator::BlockRangeLocator,
    rpc::{self, LedgerClient},
};
use bth_key_image_db::{self as db, KeyImageStore};
use displaydoc::Display;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

/// Granularity of the stop flag checks while waiting for the next poll.
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Display)]
pub enum ScanError {
    /// Ledger RPC: {0}
    Rpc(rpc::Error),

    /// Index store: {0}
    Store(db::Error),
}

impl ScanError {
    /// True if the pass may succeed when run again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScanError::Rpc(err) => err.should_retry(),
            ScanError::Store(_) => false,
        }
    }

    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, ScanError::Store(err) if err.is_integrity_violation())
    }
}

impl std::error::Error for ScanError {}

impl From<rpc::Error> for ScanError {
    fn from(src: rpc::Error) -> Self {
        ScanError::Rpc(src)
    }
}

impl From<db::Error> for ScanError {
    fn from(src: db::Error) -> Self {
        ScanError::Store(src)
    }
}

/// What a single pass did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PassSummary {
    /// Daemon chain height at the start of the pass.
    pub chain_height: u64,
    /// Cursor at the start of the pass.
    pub start_cursor: u64,
    /// Highest height the pass was allowed to scan.
    pub ceiling: u64,
    /// Blocks with transactions in the window.
    pub blocks: usize,
    /// Transactions listed by those blocks.
    pub transactions: usize,
    /// Records newly stored.
    pub inserted: usize,
    /// Records that were already stored.
    pub duplicates: usize,
    /// Transactions that could not be parsed.
    pub skipped: usize,
    /// Transactions the daemon did not return.
    pub missed: usize,
    /// Number of store commits.
    pub commits: usize,
    /// Cursor at the end of the pass.
    pub cursor: u64,
    /// The stop flag ended the pass early.
    pub interrupted: bool,
}

impl PassSummary {
    /// True if some transactions of the window have to be retried.
    pub fn has_gaps(&self) -> bool {
        self.skipped > 0 || self.missed > 0
    }

    /// True if the pass reached its ceiling without leaving anything behind.
    pub fn is_complete(&self) -> bool {
        !self.interrupted && !self.has_gaps()
    }
}

pub struct ScanLoop<C: LedgerClient> {
    client: C,
    store: Arc<KeyImageStore>,
    locator: BlockRangeLocator,
    batcher: TransactionBatcher,
    extractor: KeyImageExtractor,
}

impl<C: LedgerClient> ScanLoop<C> {
    pub fn new(client: C, store: Arc<KeyImageStore>, config: &ScannerConfig) -> Self {
        Self {
            client,
            store,
            locator: BlockRangeLocator::new(config.reorg_margin, config.header_batch_size),
            batcher: TransactionBatcher::new(config.chunk_size),
            extractor: KeyImageExtractor::new(),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn store(&self) -> &Arc<KeyImageStore> {
        &self.store
    }

    /// Scan from the persisted cursor up to the current ceiling.
    ///
    /// `stop` is checked before every chunk; a set flag ends the pass after
    /// the last completed commit.
    pub fn run_pass(&mut self, stop: &AtomicBool) -> Result<PassSummary, ScanError> {
        let start_cursor = self.store.cursor()?;
        let chain_height = self.client.chain_height()?;
        let window = self
            .locator
            .locate(&self.client, start_cursor, chain_height)?;

        let mut summary = PassSummary {
            chain_height,
            start_cursor,
            ceiling: window.ceiling,
            blocks: window.heights.len(),
            cursor: start_cursor,
            ..Default::default()
        };

        if window.is_empty() {
            tracing::info!("Local index is up to date with block {}", start_cursor);
            return Ok(summary);
        }

        tracing::info!(
            "Scanning blocks {} to {} ({} with transactions), chain height {}",
            start_cursor + 1,
            window.ceiling,
            window.heights.len(),
            chain_height
        );

        let discovered = self.batcher.discover(&self.client, &window.heights)?;
        summary.transactions = discovered.len();

        if discovered.is_empty() {
            let commit = self.store.commit_batch(window.ceiling, &[])?;
            summary.commits = 1;
            summary.cursor = commit.cursor;
            tracing::info!("Local index is up to date with block {}", commit.cursor);
            return Ok(summary);
        }

        let chunks: Vec<&[DiscoveredTx]> = self.batcher.chunks(&discovered).collect();
        let mut lowest_failed: Option<u64> = None;

        for (index, chunk) in chunks.iter().enumerate() {
            if stop.load(Ordering::SeqCst) {
                tracing::info!("Stop requested, ending pass at block {}", summary.cursor);
                summary.interrupted = true;
                break;
            }

            let fetched = self.batcher.fetch_chunk(&self.client, chunk)?;
            tracing::debug!(
                chunk = index,
                returned = fetched.transactions.len(),
                max_block_height = ?fetched.max_block_height,
                "Fetched transaction chunk"
            );

            for missed in &fetched.missed {
                tracing::warn!(
                    "Daemon did not return transaction {} of block {}, it will be retried",
                    missed.tx_hash,
                    missed.height
                );
                summary.missed += 1;
                lowest_failed = lowest(lowest_failed, missed.height);
            }

            let mut records = Vec::with_capacity(fetched.transactions.len());
            let mut max_extracted: Option<u64> = None;
            for raw in &fetched.transactions {
                match self.extractor.extract(raw) {
                    Ok(record) => {
                        records.push(record);
                        max_extracted = max_extracted.max(Some(raw.block_height));
                    }
                    Err(err) => {
                        tracing::warn!(
                            "Skipping transaction of block {}: {}",
                            raw.block_height,
                            err
                        );
                        summary.skipped += 1;
                        lowest_failed = lowest(lowest_failed, raw.block_height);
                    }
                }
            }

            let next_pending = chunks.get(index + 1).map(|next| next[0].height);
            let proposed =
                propose_cursor(max_extracted, window.ceiling, next_pending, lowest_failed);

            let commit = self.store.commit_batch(proposed, &records)?;
            summary.commits += 1;
            summary.inserted += commit.inserted;
            summary.duplicates += commit.duplicates;
            summary.cursor = commit.cursor;

            tracing::info!(
                "Loaded {} of {} transactions, {} new key images, cursor at block {}",
                (index * self.batcher.chunk_size() + chunk.len()).min(discovered.len()),
                discovered.len(),
                commit.key_images_indexed,
                commit.cursor
            );
        }

        if summary.has_gaps() {
            tracing::warn!(
                "{} transactions skipped and {} missed, cursor held at block {}",
                summary.skipped,
                summary.missed,
                summary.cursor
            );
        }
        if summary.is_complete() {
            tracing::info!("Local index is up to date with block {}", summary.cursor);
        } else {
            tracing::info!("Pass ended with cursor at block {}", summary.cursor);
        }

        Ok(summary)
    }

    /// Run passes every `poll_interval` until `stop` is set.
    ///
    /// Passes failing with a retryable error are logged and retried on the
    /// next poll. Any other error ends the loop.
    pub fn run(&mut self, stop: &AtomicBool, poll_interval: Duration) -> Result<(), ScanError> {
        while !stop.load(Ordering::SeqCst) {
            match self.run_pass(stop) {
                Ok(summary) => {
                    if summary.inserted > 0 {
                        tracing::info!(
                            "Indexed {} transactions, synced to block {}",
                            summary.inserted,
                            summary.cursor
                        );
                    }
                }
                Err(err) if err.is_retryable() => {
                    tracing::error!("Scan pass aborted: {}", err);
                }
                Err(err) => return Err(err),
            }

            wait_for_next_poll(stop, poll_interval);
        }

        tracing::info!("Scanner stopped");
        Ok(())
    }
}

fn lowest(current: Option<u64>, height: u64) -> Option<u64> {
    Some(current.map_or(height, |current| current.min(height)))
}

/// The height a chunk commit may advance the cursor to.
///
/// Starts from the highest block of the chunk's extracted transactions and
/// stays below both the next chunk's first block, if that block is still
/// pending, and the lowest block with a transaction that failed this pass.
pub(crate) fn propose_cursor(
    max_extracted: Option<u64>,
    ceiling: u64,
    next_pending: Option<u64>,
    lowest_failed: Option<u64>,
) -> u64 {
    let mut proposed = max_extracted.unwrap_or(0).min(ceiling);
    for height in [next_pending, lowest_failed].into_iter().flatten() {
        proposed = proposed.min(height.saturating_sub(1));
    }
    proposed
}

fn wait_for_next_poll(stop: &AtomicBool, poll_interval: Duration) {
    let mut waited = Duration::ZERO;
    while waited < poll_interval && !stop.load(Ordering::SeqCst) {
        let step = STOP_CHECK_INTERVAL.min(poll_interval - waited);
        thread::sleep(step);
        waited += step;
    }
}
