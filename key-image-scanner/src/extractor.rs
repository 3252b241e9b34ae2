//! Turn a daemon transaction into a [TransactionRecord].
//!
//! Only the transaction inputs matter here. Every input spending a regular
//! output carries a `key.k_image`, every input spending a legacy output a
//! `migration.k_image`. Other input types (coinbase `gen`, token inputs, ...)
//! spend no key image and are ignored.

use crate::rpc::RawTransaction;
use bth_key_image_db::{KeyImage, ParseIdError, TransactionRecord, TxHash, TxKind};
use displaydoc::Display;
use serde::Deserialize;

#[derive(Debug, Display)]
pub enum ExtractionError {
    /// Invalid transaction hash "{0}": {1}
    InvalidTxHash(String, ParseIdError),

    /// Transaction {0} is not valid JSON: {1}
    InvalidJson(TxHash, String),

    /// Transaction {tx_hash} has an invalid key image "{value}": {error}
    InvalidKeyImage {
        tx_hash: TxHash,
        value: String,
        error: ParseIdError,
    },
}

impl std::error::Error for ExtractionError {}

#[derive(Deserialize)]
struct TxBody {
    vin: Vec<TxInput>,
}

#[derive(Deserialize)]
struct TxInput {
    #[serde(default)]
    key: Option<KeySpend>,
    #[serde(default)]
    migration: Option<KeySpend>,
}

#[derive(Deserialize)]
struct KeySpend {
    k_image: String,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct KeyImageExtractor;

impl KeyImageExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, raw: &RawTransaction) -> Result<TransactionRecord, ExtractionError> {
        let tx_hash = TxHash::from_hex(&raw.tx_hash)
            .map_err(|err| ExtractionError::InvalidTxHash(raw.tx_hash.clone(), err))?;

        let body: TxBody = serde_json::from_str(&raw.as_json)
            .map_err(|err| ExtractionError::InvalidJson(tx_hash, err.to_string()))?;

        let parse = |spend: &KeySpend| {
            KeyImage::from_hex(&spend.k_image).map_err(|error| ExtractionError::InvalidKeyImage {
                tx_hash,
                value: spend.k_image.clone(),
                error,
            })
        };

        let mut kind = TxKind::Standard;
        let mut key_images = Vec::new();
        for input in &body.vin {
            if let Some(spend) = &input.migration {
                kind = TxKind::Migration;
                key_images.push(parse(spend)?);
            }
            if let Some(spend) = &input.key {
                key_images.push(parse(spend)?);
            }
        }

        Ok(TransactionRecord::new(tx_hash, kind, key_images))
    }
}
