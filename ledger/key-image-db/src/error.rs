// Copyright (c) 2024 Botho Foundation

//! Errors returned by the key image store.

use crate::types::{KeyImage, TxHash};
use displaydoc::Display;

#[derive(Debug, Display)]
pub enum Error {
    /// LMDB error: {0}
    Lmdb(lmdb::Error),

    /// IO error: {0}
    Io(std::io::Error),

    /// Serialization error: {0}
    Serialization(String),

    /// Key image {key_image} is already owned by tx {existing}, refusing to assign it to tx {conflicting}
    Integrity {
        key_image: KeyImage,
        existing: TxHash,
        conflicting: TxHash,
    },

    /// Store schema version {found} is not supported (expected {expected})
    IncompatibleVersion { found: u32, expected: u32 },

    /// Corrupt value stored under {0}
    CorruptValue(String),
}

impl Error {
    /// True for a key image claimed by two different transactions.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, Error::Integrity { .. })
    }
}

impl std::error::Error for Error {}

impl From<lmdb::Error> for Error {
    fn from(src: lmdb::Error) -> Self {
        Error::Lmdb(src)
    }
}

impl From<std::io::Error> for Error {
    fn from(src: std::io::Error) -> Self {
        Error::Io(src)
    }
}

impl From<bincode::Error> for Error {
    fn from(src: bincode::Error) -> Self {
        Error::Serialization(src.to_string())
    }
}
