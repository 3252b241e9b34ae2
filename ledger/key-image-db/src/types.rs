// Copyright (c) 2024 Botho Foundation

//! Identifiers and records stored in the key image index.

use displaydoc::Display;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Length in bytes of key images and transaction hashes.
pub const ID_LEN: usize = 32;

/// An error parsing a hex-encoded identifier.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum ParseIdError {
    /// Invalid hex: {0}
    InvalidHex(String),

    /// Expected {expected} bytes, got {actual}
    InvalidLength { expected: usize, actual: usize },
}

impl std::error::Error for ParseIdError {}

fn decode_id(src: &str) -> Result<[u8; ID_LEN], ParseIdError> {
    let bytes = hex::decode(src.trim()).map_err(|e| ParseIdError::InvalidHex(e.to_string()))?;
    let actual = bytes.len();
    bytes.try_into().map_err(|_| ParseIdError::InvalidLength {
        expected: ID_LEN,
        actual,
    })
}

macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
        pub struct $name(pub [u8; ID_LEN]);

        impl $name {
            /// Parse from a 64 character hex string.
            pub fn from_hex(src: &str) -> Result<Self, ParseIdError> {
                decode_id(src).map(Self)
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn as_bytes(&self) -> &[u8; ID_LEN] {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(src: &str) -> Result<Self, Self::Err> {
                Self::from_hex(src)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = ParseIdError;

            fn try_from(src: &[u8]) -> Result<Self, Self::Error> {
                <[u8; ID_LEN]>::try_from(src)
                    .map(Self)
                    .map_err(|_| ParseIdError::InvalidLength {
                        expected: ID_LEN,
                        actual: src.len(),
                    })
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }
    };
}

hex_id!(
    /// A key image: the unique tag left on chain by spending an output.
    KeyImage
);

hex_id!(
    /// A transaction hash, as reported by the daemon.
    TxHash
);

/// The kind of a transaction, as far as key images are concerned.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TxKind {
    /// Only regular key-spend inputs.
    Standard,
    /// At least one input spends a legacy (migration) output.
    Migration,
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxKind::Standard => f.write_str("standard"),
            TxKind::Migration => f.write_str("migration"),
        }
    }
}

/// A transaction observed on chain together with the key images it spends.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub tx_hash: TxHash,
    pub kind: TxKind,
    /// Key images in input order, without duplicates.
    pub key_images: Vec<KeyImage>,
}

impl TransactionRecord {
    pub fn new(tx_hash: TxHash, kind: TxKind, key_images: Vec<KeyImage>) -> Self {
        let mut unique: Vec<KeyImage> = Vec::with_capacity(key_images.len());
        for key_image in key_images {
            if !unique.contains(&key_image) {
                unique.push(key_image);
            }
        }
        Self {
            tx_hash,
            kind,
            key_images: unique,
        }
    }
}
