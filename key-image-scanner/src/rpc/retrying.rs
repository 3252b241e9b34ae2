//! Retry transient [LedgerClient] failures with a Fibonacci backoff.

use super::{BlockHeaderSummary, Error, LedgerClient, TransactionsResponse};
use bth_key_image_db::TxHash;
use retry::{
    delay::{jitter, Fibonacci},
    OperationResult,
};
use std::time::Duration;

/// How often and how patiently a failed request is sent again.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: usize,
    /// First delay of the Fibonacci sequence.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        Fibonacci::from_millis(base_ms.max(1))
            .take(self.max_retries)
            .map(jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(100))
    }
}

/// Wraps a [LedgerClient], retrying calls that fail with
/// [Error::Transient]. Other errors are returned immediately.
#[derive(Clone)]
pub struct RetryingLedgerClient<C: LedgerClient> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: LedgerClient> RetryingLedgerClient<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn with_retry<T>(&self, mut call: impl FnMut(&C) -> Result<T, Error>) -> Result<T, Error> {
        retry::retry_with_index(self.policy.delays(), |attempt| match call(&self.inner) {
            Ok(value) => OperationResult::Ok(value),
            Err(err) if err.should_retry() => {
                tracing::warn!(attempt, "{}, retrying", err);
                OperationResult::Retry(err)
            }
            Err(err) => OperationResult::Err(err),
        })
        .map_err(|err| err.error)
    }
}

impl<C: LedgerClient> LedgerClient for RetryingLedgerClient<C> {
    fn chain_height(&self) -> Result<u64, Error> {
        self.with_retry(|client| client.chain_height())
    }

    fn header_range(&self, start: u64, end: u64) -> Result<Vec<BlockHeaderSummary>, Error> {
        self.with_retry(|client| client.header_range(start, end))
    }

    fn block_tx_hashes(&self, height: u64) -> Result<Vec<TxHash>, Error> {
        self.with_retry(|client| client.block_tx_hashes(height))
    }

    fn transactions(&self, tx_hashes: &[TxHash]) -> Result<TransactionsResponse, Error> {
        self.with_retry(|client| client.transactions(tx_hashes))
    }
}
