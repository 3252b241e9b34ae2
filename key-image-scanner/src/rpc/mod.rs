//! Access to the remote daemon.
//!
//! [LedgerClient] is the only boundary the scanner has with the network. The
//! HTTP implementation talks to a CryptoNote-style daemon; the retrying
//! wrapper adds a backoff policy on top of any client.

mod http;
mod retrying;

pub use http::HttpLedgerClient;
pub use retrying::{RetryPolicy, RetryingLedgerClient};

use bth_key_image_db::TxHash;
use displaydoc::Display;
use serde::Deserialize;
use std::sync::Arc;

/// Errors returned by a [LedgerClient].
#[derive(Debug, Display)]
pub enum Error {
    /// Transient network error calling {0}: {1}
    Transient(String, String),

    /// Protocol error calling {0}: {1}
    Protocol(String, String),

    /// Invalid daemon url {0}: {1}
    InvalidUrl(String, url::ParseError),

    /// Could not set up HTTP client: {0}
    ClientSetup(String),
}

impl Error {
    /// Transient errors may succeed when the same request is sent again.
    pub fn should_retry(&self) -> bool {
        matches!(self, Error::Transient(..))
    }
}

impl std::error::Error for Error {}

/// Height and transaction count of one block header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockHeaderSummary {
    pub height: u64,
    /// Number of non-coinbase transactions in the block.
    pub tx_count: u64,
}

/// A transaction body as returned by the daemon, not yet interpreted.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct RawTransaction {
    /// Transaction hash (hex)
    pub tx_hash: String,
    /// Height of the block containing the transaction
    pub block_height: u64,
    /// The transaction decoded as a JSON document
    pub as_json: String,
}

/// Result of a [LedgerClient::transactions] call.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TransactionsResponse {
    pub txs: Vec<RawTransaction>,
    /// Requested hashes the daemon reported it does not know.
    pub missed: Vec<TxHash>,
}

/// Read-only view of the remote chain.
///
/// Every method is a single blocking request.
#[cfg_attr(test, mockall::automock)]
pub trait LedgerClient {
    /// Current chain height, as reported by the daemon.
    fn chain_height(&self) -> Result<u64, Error>;

    /// Headers for heights `start..=end`, in ascending order.
    fn header_range(&self, start: u64, end: u64) -> Result<Vec<BlockHeaderSummary>, Error>;

    /// Hashes of the (non-coinbase) transactions in the block at `height`.
    fn block_tx_hashes(&self, height: u64) -> Result<Vec<TxHash>, Error>;

    /// Decoded bodies of the given transactions.
    fn transactions(&self, tx_hashes: &[TxHash]) -> Result<TransactionsResponse, Error>;
}

impl<C: LedgerClient + ?Sized> LedgerClient for Arc<C> {
    fn chain_height(&self) -> Result<u64, Error> {
        (**self).chain_height()
    }

    fn header_range(&self, start: u64, end: u64) -> Result<Vec<BlockHeaderSummary>, Error> {
        (**self).header_range(start, end)
    }

    fn block_tx_hashes(&self, height: u64) -> Result<Vec<TxHash>, Error> {
        (**self).block_tx_hashes(height)
    }

    fn transactions(&self, tx_hashes: &[TxHash]) -> Result<TransactionsResponse, Error> {
        (**self).transactions(tx_hashes)
    }
}
