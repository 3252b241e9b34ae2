//! Read-only queries against the key image index.

use bth_key_image_db::{self as db, KeyImage, KeyImageStore, ParseIdError, TransactionRecord, TxHash};
use displaydoc::Display;
use std::sync::Arc;

#[derive(Debug, Display)]
pub enum LookupError {
    /// Invalid key image "{0}": {1}
    InvalidKeyImage(String, ParseIdError),

    /// Index store: {0}
    Store(db::Error),
}

impl std::error::Error for LookupError {}

impl From<db::Error> for LookupError {
    fn from(src: db::Error) -> Self {
        LookupError::Store(src)
    }
}

/// Outcome of resolving a key image.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Resolution {
    /// The key image was spent by this transaction.
    Found { tx_hash: TxHash },

    /// No indexed transaction up to block `scanned_up_to` spends the key
    /// image. It is only known to be unspent if that block is the chain tip.
    NotFound { scanned_up_to: u64 },
}

impl Resolution {
    pub fn tx_hash(&self) -> Option<TxHash> {
        match self {
            Resolution::Found { tx_hash } => Some(*tx_hash),
            Resolution::NotFound { .. } => None,
        }
    }
}

/// Answers key image queries. Safe to use from any number of threads while
/// a scan is committing.
#[derive(Clone)]
pub struct LookupService {
    store: Arc<KeyImageStore>,
}

impl LookupService {
    pub fn new(store: Arc<KeyImageStore>) -> Self {
        Self { store }
    }

    pub fn resolve(&self, key_image: &KeyImage) -> Result<Resolution, LookupError> {
        let (tx_hash, cursor) = self.store.lookup_with_cursor(key_image)?;
        Ok(match tx_hash {
            Some(tx_hash) => Resolution::Found { tx_hash },
            None => Resolution::NotFound {
                scanned_up_to: cursor,
            },
        })
    }

    /// Like [Self::resolve], for a hex encoded key image.
    pub fn resolve_hex(&self, key_image: &str) -> Result<Resolution, LookupError> {
        let parsed = KeyImage::from_hex(key_image)
            .map_err(|err| LookupError::InvalidKeyImage(key_image.to_string(), err))?;
        self.resolve(&parsed)
    }

    /// The stored record of a transaction, with its kind and key images.
    pub fn transaction(&self, tx_hash: &TxHash) -> Result<Option<TransactionRecord>, LookupError> {
        Ok(self.store.get_transaction(tx_hash)?)
    }
}
