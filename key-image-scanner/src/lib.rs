//! Botho Key Image Scanner
//!
//! Incrementally scans a CryptoNote-style daemon and maintains a persistent
//! index from key image to the transaction that spent it, so that "which
//! transaction spent this key image?" is answered without re-scanning the
//! chain.
//!
//! # Architecture
//!
//! A [ScanLoop] pass reads the persisted cursor, asks the
//! [BlockRangeLocator] which blocks between the cursor and the chain tip hold
//! transactions, collects and fetches their bodies in chunks with the
//! [TransactionBatcher], turns every body into a record with the
//! [KeyImageExtractor] and commits each chunk to the [KeyImageStore]
//! together with the cursor advance it covers.
//!
//! All network access goes through the [LedgerClient] trait. The
//! [LookupService] reads the store independently and may run on other
//! threads while a scan is committing.

pub mod batcher;
pub mod config;
pub mod extractor;
pub mod locator;
pub mod lookup;
pub mod rpc;
pub mod scan;

pub use batcher::{DiscoveredTx, FetchedChunk, TransactionBatcher};
pub use bth_key_image_db::{KeyImage, KeyImageStore, TransactionRecord, TxHash, TxKind};
pub use config::ScannerConfig;
pub use extractor::{ExtractionError, KeyImageExtractor};
pub use locator::{BlockRangeLocator, ScanWindow};
pub use lookup::{LookupError, LookupService, Resolution};
pub use rpc::{HttpLedgerClient, LedgerClient, RetryPolicy, RetryingLedgerClient};
pub use scan::{PassSummary, ScanError, ScanLoop};
