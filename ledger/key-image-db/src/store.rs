// Copyright (c) 2024 Botho Foundation

//! LMDB-backed storage for the key image index and its scan cursor.
//!
//! Every batch of transaction records is written in a single LMDB write
//! transaction together with the cursor advance that covers it, so a reader
//! (or a process restarting after a crash) always observes a cursor that
//! matches the records on disk. LMDB allows one writer and any number of
//! readers; readers work on a snapshot and never see a half-applied batch.

use crate::{
    error::Error,
    types::{KeyImage, TransactionRecord, TxHash},
};
use lmdb::{
    Database, DatabaseFlags, Environment, EnvironmentFlags, RwTransaction, Transaction, WriteFlags,
};
use std::{
    fs,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, info};

/// File name of the LMDB environment inside the store directory.
pub const DB_FILE_NAME: &str = "key_images.mdb";

/// Default LMDB map size (16 GiB, sparse on disk).
pub const DEFAULT_MAP_SIZE: usize = 1 << 34;

/// Schema version written on creation.
pub const DB_VERSION: u32 = 1;

// LMDB Database names.
pub const META_DB_NAME: &str = "key_image_store:meta";
pub const TRANSACTIONS_DB_NAME: &str = "key_image_store:transactions";
pub const KEY_IMAGES_DB_NAME: &str = "key_image_store:tx_hash_by_key_image";

// Keys used by the `meta` database.
pub const LAST_BLOCK_SCANNED_KEY: &[u8] = b"last_block_scanned";
pub const DB_VERSION_KEY: &[u8] = b"db_version";
pub const NUM_TRANSACTIONS_KEY: &[u8] = b"num_transactions";
pub const NUM_KEY_IMAGES_KEY: &[u8] = b"num_key_images";
pub const LAST_COMMIT_TIMESTAMP_KEY: &[u8] = b"last_commit_timestamp";

/// Outcome of a successful [KeyImageStore::commit_batch].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommitSummary {
    /// Records newly written.
    pub inserted: usize,
    /// Records skipped because their transaction was already stored.
    pub duplicates: usize,
    /// Key image entries newly written.
    pub key_images_indexed: usize,
    /// Cursor after the commit.
    pub cursor: u64,
}

/// Aggregate numbers describing the store.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct IndexStats {
    pub cursor: u64,
    pub num_transactions: u64,
    pub num_key_images: u64,
    /// Unix timestamp of the last commit, 0 if nothing was ever committed.
    pub last_commit_timestamp: u64,
}

pub struct KeyImageStore {
    env: Environment,

    /// Metadata
    /// * `LAST_BLOCK_SCANNED_KEY` --> scan cursor (u64)
    /// * `DB_VERSION_KEY` --> schema version (u32)
    /// * `NUM_TRANSACTIONS_KEY`, `NUM_KEY_IMAGES_KEY` --> counts (u64)
    /// * `LAST_COMMIT_TIMESTAMP_KEY` --> unix seconds (u64)
    meta: Database,

    /// `tx_hash -> bincode(TransactionRecord)`
    transactions: Database,

    /// `key_image -> tx_hash`
    tx_hash_by_key_image: Database,
}

impl KeyImageStore {
    /// Open the store in `path`, creating it if it doesn't exist.
    pub fn open(path: &Path) -> Result<Self, Error> {
        Self::open_with_map_size(path, DEFAULT_MAP_SIZE)
    }

    pub fn open_with_map_size(path: &Path, map_size: usize) -> Result<Self, Error> {
        fs::create_dir_all(path)?;

        let env = Environment::new()
            .set_flags(EnvironmentFlags::NO_SUB_DIR)
            .set_max_dbs(3)
            .set_map_size(map_size)
            .open(&path.join(DB_FILE_NAME))?;

        let meta = env.create_db(Some(META_DB_NAME), DatabaseFlags::empty())?;
        let transactions = env.create_db(Some(TRANSACTIONS_DB_NAME), DatabaseFlags::empty())?;
        let tx_hash_by_key_image = env.create_db(Some(KEY_IMAGES_DB_NAME), DatabaseFlags::empty())?;

        let store = Self {
            env,
            meta,
            transactions,
            tx_hash_by_key_image,
        };
        store.init_or_check_version(path)?;
        Ok(store)
    }

    fn init_or_check_version(&self, path: &Path) -> Result<(), Error> {
        let mut txn = self.env.begin_rw_txn()?;

        let found = match txn.get(self.meta, &DB_VERSION_KEY) {
            Ok(bytes) => Some(u32::from_le_bytes(bytes.try_into().map_err(|_| {
                Error::CorruptValue(String::from_utf8_lossy(DB_VERSION_KEY).into_owned())
            })?)),
            Err(lmdb::Error::NotFound) => None,
            Err(e) => return Err(e.into()),
        };

        match found {
            Some(version) if version != DB_VERSION => {
                return Err(Error::IncompatibleVersion {
                    found: version,
                    expected: DB_VERSION,
                });
            }
            Some(_) => {
                // Nothing written, let the transaction abort on drop.
                let cursor = read_u64(&txn, self.meta, LAST_BLOCK_SCANNED_KEY)?.unwrap_or(0);
                info!(?path, cursor, "Opened key image store");
            }
            None => {
                txn.put(
                    self.meta,
                    &DB_VERSION_KEY,
                    &DB_VERSION.to_le_bytes(),
                    WriteFlags::empty(),
                )?;
                for key in [
                    LAST_BLOCK_SCANNED_KEY,
                    NUM_TRANSACTIONS_KEY,
                    NUM_KEY_IMAGES_KEY,
                    LAST_COMMIT_TIMESTAMP_KEY,
                ] {
                    txn.put(self.meta, &key, &0u64.to_le_bytes(), WriteFlags::empty())?;
                }
                txn.commit()?;
                info!(?path, "Created key image store");
            }
        }

        Ok(())
    }

    /// Atomically store `records` and advance the cursor to
    /// `max(cursor, proposed_height)`.
    ///
    /// Records whose transaction is already stored are skipped. If any key
    /// image of a new record is already owned by a different transaction the
    /// whole batch is rejected with [Error::Integrity] and nothing is written.
    pub fn commit_batch(
        &self,
        proposed_height: u64,
        records: &[TransactionRecord],
    ) -> Result<CommitSummary, Error> {
        let mut txn = self.env.begin_rw_txn()?;
        let mut summary = CommitSummary::default();

        for record in records {
            if self.contains_transaction(&txn, &record.tx_hash)? {
                summary.duplicates += 1;
                continue;
            }

            summary.key_images_indexed += self.index_key_images(&mut txn, record)?;

            txn.put(
                self.transactions,
                &record.tx_hash,
                &bincode::serialize(record)?,
                WriteFlags::NO_OVERWRITE,
            )?;
            summary.inserted += 1;
        }

        let current = read_u64(&txn, self.meta, LAST_BLOCK_SCANNED_KEY)?.unwrap_or(0);
        summary.cursor = current.max(proposed_height);

        add_u64(&mut txn, self.meta, NUM_TRANSACTIONS_KEY, summary.inserted as u64)?;
        add_u64(
            &mut txn,
            self.meta,
            NUM_KEY_IMAGES_KEY,
            summary.key_images_indexed as u64,
        )?;
        txn.put(
            self.meta,
            &LAST_BLOCK_SCANNED_KEY,
            &summary.cursor.to_le_bytes(),
            WriteFlags::empty(),
        )?;
        txn.put(
            self.meta,
            &LAST_COMMIT_TIMESTAMP_KEY,
            &unix_now().to_le_bytes(),
            WriteFlags::empty(),
        )?;

        txn.commit()?;

        debug!(
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            key_images = summary.key_images_indexed,
            cursor = summary.cursor,
            "Committed batch"
        );
        Ok(summary)
    }

    /// Write the key image entries of one record. Returns how many were new.
    fn index_key_images(
        &self,
        txn: &mut RwTransaction,
        record: &TransactionRecord,
    ) -> Result<usize, Error> {
        let mut indexed = 0;
        for key_image in &record.key_images {
            let existing = match txn.get(self.tx_hash_by_key_image, key_image) {
                Ok(bytes) => Some(TxHash::try_from(bytes).map_err(|_| {
                    Error::CorruptValue(format!("key image {key_image}"))
                })?),
                Err(lmdb::Error::NotFound) => None,
                Err(e) => return Err(e.into()),
            };

            match existing {
                Some(owner) if owner == record.tx_hash => {}
                Some(owner) => {
                    return Err(Error::Integrity {
                        key_image: *key_image,
                        existing: owner,
                        conflicting: record.tx_hash,
                    });
                }
                None => {
                    txn.put(
                        self.tx_hash_by_key_image,
                        key_image,
                        &record.tx_hash,
                        WriteFlags::NO_OVERWRITE,
                    )?;
                    indexed += 1;
                }
            }
        }
        Ok(indexed)
    }

    fn contains_transaction<T: Transaction>(
        &self,
        txn: &T,
        tx_hash: &TxHash,
    ) -> Result<bool, Error> {
        match txn.get(self.transactions, tx_hash) {
            Ok(_) => Ok(true),
            Err(lmdb::Error::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// The highest block height whose transactions are fully indexed.
    pub fn cursor(&self) -> Result<u64, Error> {
        let txn = self.env.begin_ro_txn()?;
        Ok(read_u64(&txn, self.meta, LAST_BLOCK_SCANNED_KEY)?.unwrap_or(0))
    }

    /// The transaction that spent `key_image`, if it has been indexed.
    pub fn lookup(&self, key_image: &KeyImage) -> Result<Option<TxHash>, Error> {
        let txn = self.env.begin_ro_txn()?;
        self.lookup_in(&txn, key_image)
    }

    /// Like [KeyImageStore::lookup], also returning the cursor read from the
    /// same snapshot.
    pub fn lookup_with_cursor(&self, key_image: &KeyImage) -> Result<(Option<TxHash>, u64), Error> {
        let txn = self.env.begin_ro_txn()?;
        let tx_hash = self.lookup_in(&txn, key_image)?;
        let cursor = read_u64(&txn, self.meta, LAST_BLOCK_SCANNED_KEY)?.unwrap_or(0);
        Ok((tx_hash, cursor))
    }

    fn lookup_in<T: Transaction>(
        &self,
        txn: &T,
        key_image: &KeyImage,
    ) -> Result<Option<TxHash>, Error> {
        match txn.get(self.tx_hash_by_key_image, key_image) {
            Ok(bytes) => TxHash::try_from(bytes)
                .map(Some)
                .map_err(|_| Error::CorruptValue(format!("key image {key_image}"))),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Get a stored transaction record by hash.
    pub fn get_transaction(&self, tx_hash: &TxHash) -> Result<Option<TransactionRecord>, Error> {
        let txn = self.env.begin_ro_txn()?;
        match txn.get(self.transactions, tx_hash) {
            Ok(bytes) => Ok(Some(bincode::deserialize(bytes)?)),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn stats(&self) -> Result<IndexStats, Error> {
        let txn = self.env.begin_ro_txn()?;
        Ok(IndexStats {
            cursor: read_u64(&txn, self.meta, LAST_BLOCK_SCANNED_KEY)?.unwrap_or(0),
            num_transactions: read_u64(&txn, self.meta, NUM_TRANSACTIONS_KEY)?.unwrap_or(0),
            num_key_images: read_u64(&txn, self.meta, NUM_KEY_IMAGES_KEY)?.unwrap_or(0),
            last_commit_timestamp: read_u64(&txn, self.meta, LAST_COMMIT_TIMESTAMP_KEY)?
                .unwrap_or(0),
        })
    }
}

fn read_u64<T: Transaction>(txn: &T, db: Database, key: &[u8]) -> Result<Option<u64>, Error> {
    match txn.get(db, &key) {
        Ok(bytes) => {
            let bytes: [u8; 8] = bytes.try_into().map_err(|_| {
                Error::CorruptValue(String::from_utf8_lossy(key).into_owned())
            })?;
            Ok(Some(u64::from_le_bytes(bytes)))
        }
        Err(lmdb::Error::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn add_u64(txn: &mut RwTransaction, db: Database, key: &[u8], delta: u64) -> Result<(), Error> {
    let value = read_u64(&*txn, db, key)?.unwrap_or(0) + delta;
    txn.put(db, &key, &value.to_le_bytes(), WriteFlags::empty())?;
    Ok(())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
