//! # oracle-memories
//!
//! Durable state of the oracle server, kept as two pretty-printed JSON
//! documents in the profile directory:
//!
//! - `vote_records.json` — `round -> VoteRecord`, everything needed to reveal
//!   the last commitment after a restart
//! - `outlier_record.json` — the latest outlier penalty, drives the vote
//!   cool-down
//!
//! Every flush rewrites the whole document through a temporary file and a
//! rename, so a crash mid-write leaves the previous version in place.
//!
//! The documents load independently. One that does not parse is moved to
//! `<name>.corrupt` and treated as absent; the other is still used.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use oracle_types::{OutlierRecord, VoteRecord};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

/// File holding the vote record map.
pub const VOTE_RECORDS_FILE: &str = "vote_records.json";

/// File holding the latest outlier record.
pub const OUTLIER_RECORD_FILE: &str = "outlier_record.json";

/// Suffix a malformed document is renamed with.
pub const CORRUPT_SUFFIX: &str = "corrupt";

/// Persistence error types.
#[derive(Debug, thiserror::Error)]
pub enum MemoriesError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, MemoriesError>;

/// A document that can be persisted. The set of kinds is closed.
#[derive(Debug, Clone, Copy)]
pub enum Record<'a> {
    VoteRecords(&'a BTreeMap<u64, VoteRecord>),
    Outlier(&'a OutlierRecord),
}

impl Record<'_> {
    /// File the record is stored in.
    pub fn file_name(&self) -> &'static str {
        match self {
            Record::VoteRecords(_) => VOTE_RECORDS_FILE,
            Record::Outlier(_) => OUTLIER_RECORD_FILE,
        }
    }
}

/// Everything loaded at startup.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub vote_records: BTreeMap<u64, VoteRecord>,
    pub outlier: Option<OutlierRecord>,
}

/// Handle on the profile directory.
#[derive(Debug, Clone)]
pub struct Memories {
    dir: PathBuf,
}

impl Memories {
    /// Use `dir` for persistence, creating it if needed.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|source| MemoriesError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Load both documents. A missing file means "no history".
    ///
    /// Only I/O failures are errors; a malformed document is set aside.
    pub fn init(&self) -> Result<Snapshot> {
        let vote_records = self
            .load_or_quarantine::<BTreeMap<u64, VoteRecord>>(VOTE_RECORDS_FILE)?
            .unwrap_or_default();
        let outlier = self.load_or_quarantine::<OutlierRecord>(OUTLIER_RECORD_FILE)?;
        debug!(
            dir = %self.dir.display(),
            records = vote_records.len(),
            outlier = outlier.is_some(),
            "memories loaded"
        );
        Ok(Snapshot {
            vote_records,
            outlier,
        })
    }

    /// Rewrite the document for `record`.
    pub fn flush(&self, record: Record<'_>) -> Result<()> {
        match record {
            Record::VoteRecords(records) => self.write(record.file_name(), records),
            Record::Outlier(outlier) => self.write(record.file_name(), outlier),
        }
    }

    fn load_or_quarantine<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.load(name) {
            Err(MemoriesError::Json { path, source }) => {
                let aside = self.dir.join(format!("{name}.{CORRUPT_SUFFIX}"));
                fs::rename(&path, &aside).map_err(|source| MemoriesError::Io {
                    path: path.clone(),
                    source,
                })?;
                warn!(
                    path = %path.display(),
                    moved_to = %aside.display(),
                    error = %source,
                    "malformed document set aside"
                );
                Ok(None)
            }
            other => other,
        }
    }

    fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.dir.join(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(MemoriesError::Io { path, source }),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| MemoriesError::Json { path, source })
    }

    fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.tmp"));
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| MemoriesError::Io { path, source }
        };

        let file = File::create(&tmp).map_err(io_err(&tmp))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value).map_err(|source| {
            MemoriesError::Json {
                path: tmp.clone(),
                source,
            }
        })?;
        writer.write_all(b"\n").map_err(io_err(&tmp))?;
        let file = writer
            .into_inner()
            .map_err(|e| MemoriesError::Io {
                path: tmp.clone(),
                source: e.into_error(),
            })?;
        file.sync_all().map_err(io_err(&tmp))?;

        fs::rename(&tmp, &path).map_err(io_err(&path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oracle_types::{Address, Report, B256, U256};

    fn record(round: u64) -> VoteRecord {
        VoteRecord {
            round_id: round,
            round_height: round * 30,
            vote_period: 30,
            symbols: vec!["EUR-USD".to_string()],
            prices: BTreeMap::new(),
            reports: vec![Report {
                price: 1_080_000_000_000_000_000,
                confidence: 100,
            }],
            salt: 7,
            commitment_hash: B256::repeat_byte(round as u8),
            tx_hash: Some(B256::repeat_byte(0xAA)),
            tx_nonce: round,
            tx_cost: U256::from(21_000u64),
            mined: false,
            error: None,
        }
    }

    fn outlier() -> OutlierRecord {
        OutlierRecord {
            last_penalized_at_block: 500,
            participant: Address::repeat_byte(0x71),
            symbol: "NTN-USD".to_string(),
            median: U256::from(10u64),
            reported: U256::from(20u64),
            slashing_amount: U256::from(3u64),
            logged_at: 1_700_000_000,
        }
    }

    #[test]
    fn test_init_empty_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let memories = Memories::open(dir.path()).expect("open");
        let snapshot = memories.init().expect("init");
        assert!(snapshot.vote_records.is_empty());
        assert!(snapshot.outlier.is_none());
    }

    #[test]
    fn test_flush_and_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let memories = Memories::open(dir.path()).expect("open");

        let mut records = BTreeMap::new();
        records.insert(4, record(4));
        records.insert(5, record(5));
        memories
            .flush(Record::VoteRecords(&records))
            .expect("flush records");
        memories.flush(Record::Outlier(&outlier())).expect("flush outlier");

        let reopened = Memories::open(dir.path()).expect("reopen");
        let snapshot = reopened.init().expect("init");
        assert_eq!(snapshot.vote_records, records);
        assert_eq!(snapshot.outlier, Some(outlier()));
    }

    #[test]
    fn test_flush_overwrites() {
        let dir = tempfile::tempdir().expect("tempdir");
        let memories = Memories::open(dir.path()).expect("open");

        let mut records = BTreeMap::new();
        records.insert(1, record(1));
        memories.flush(Record::VoteRecords(&records)).expect("flush");
        records.remove(&1);
        records.insert(2, record(2));
        memories.flush(Record::VoteRecords(&records)).expect("flush");

        let snapshot = memories.init().expect("init");
        assert_eq!(snapshot.vote_records.keys().copied().collect::<Vec<_>>(), vec![2]);
        assert!(!dir.path().join("vote_records.json.tmp").exists());
    }

    #[test]
    fn test_document_is_pretty_and_readable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let memories = Memories::open(dir.path()).expect("open");
        let mut records = BTreeMap::new();
        records.insert(9, record(9));
        memories.flush(Record::VoteRecords(&records)).expect("flush");

        let raw = fs::read_to_string(dir.path().join(VOTE_RECORDS_FILE)).expect("read");
        assert!(raw.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value["9"]["reports"][0]["price"], "1080000000000000000");
        assert_eq!(value["9"]["reports"][0]["confidence"], 100);
    }

    #[test]
    fn test_malformed_outlier_keeps_vote_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let memories = Memories::open(dir.path()).expect("open");
        let mut records = BTreeMap::new();
        records.insert(2, record(2));
        memories.flush(Record::VoteRecords(&records)).expect("flush");
        fs::write(dir.path().join(OUTLIER_RECORD_FILE), "{not json").expect("write");

        let snapshot = memories.init().expect("init");
        assert_eq!(snapshot.vote_records, records);
        assert!(snapshot.outlier.is_none());
        assert!(!dir.path().join(OUTLIER_RECORD_FILE).exists());
        let aside = fs::read_to_string(dir.path().join("outlier_record.json.corrupt")).expect("aside");
        assert_eq!(aside, "{not json");

        // Vote records on disk are untouched by the recovery.
        let again = memories.init().expect("init again");
        assert_eq!(again.vote_records, records);
    }

    #[test]
    fn test_malformed_vote_records_keeps_outlier() {
        let dir = tempfile::tempdir().expect("tempdir");
        let memories = Memories::open(dir.path()).expect("open");
        memories.flush(Record::Outlier(&outlier())).expect("flush");
        fs::write(dir.path().join(VOTE_RECORDS_FILE), "[1, 2").expect("write");

        let snapshot = memories.init().expect("init");
        assert!(snapshot.vote_records.is_empty());
        assert_eq!(snapshot.outlier, Some(outlier()));
        assert!(dir.path().join("vote_records.json.corrupt").exists());
    }

    #[test]
    fn test_record_file_names() {
        let records = BTreeMap::new();
        assert_eq!(Record::VoteRecords(&records).file_name(), VOTE_RECORDS_FILE);
        assert_eq!(Record::Outlier(&outlier()).file_name(), OUTLIER_RECORD_FILE);
    }
}
