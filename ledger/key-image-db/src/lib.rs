// Copyright (c) 2024 Botho Foundation

//! Persistent reverse index from key image to the transaction that spent it.
//!
//! The index is kept together with a scan cursor, the highest block height
//! whose transactions are fully indexed. Both are written in the same LMDB
//! transaction so the cursor never runs ahead of the data it claims to cover.

mod error;
mod store;
mod types;

pub use crate::{
    error::Error,
    store::{
        CommitSummary, IndexStats, KeyImageStore, DB_FILE_NAME, DB_VERSION, DEFAULT_MAP_SIZE,
        LAST_BLOCK_SCANNED_KEY,
    },
    types::{KeyImage, ParseIdError, TransactionRecord, TxHash, TxKind, ID_LEN},
};
