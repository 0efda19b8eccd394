//! ACID-durable record store backed by redb.
//!
//! Every record table maps a `u64` id to a bincode-encoded value. Ids are
//! allocated monotonically by the owning in-memory store, so iterating a table
//! in key order replays records in insertion order.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;
use crate::store::StoreResult;

const TRIPLES: TableDefinition<u64, &[u8]> = TableDefinition::new("triples");
const RULES: TableDefinition<u64, &[u8]> = TableDefinition::new("rules");
const PATTERNS: TableDefinition<u64, &[u8]> = TableDefinition::new("patterns");
const HYPEREDGES: TableDefinition<u64, &[u8]> = TableDefinition::new("hyperedges");

/// The record tables kept in the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordTable {
    Triples,
    Rules,
    Patterns,
    HyperEdges,
}

impl RecordTable {
    const ALL: [RecordTable; 4] = [
        RecordTable::Triples,
        RecordTable::Rules,
        RecordTable::Patterns,
        RecordTable::HyperEdges,
    ];

    fn definition(self) -> TableDefinition<'static, u64, &'static [u8]> {
        match self {
            RecordTable::Triples => TRIPLES,
            RecordTable::Rules => RULES,
            RecordTable::Patterns => PATTERNS,
            RecordTable::HyperEdges => HYPEREDGES,
        }
    }
}

fn redb_err(context: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Redb {
        message: format!("{context} failed: {e}"),
    }
}

/// ACID-durable store using redb.
///
/// All writes go through transactions that commit before returning. Reads use
/// MVCC snapshots.
pub struct DurableStore {
    db: Arc<Database>,
}

impl DurableStore {
    /// Open or create a durable store in the given directory.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| StoreError::Io { source: e })?;
        let db_path = data_dir.join("noesis.redb");
        let db = Database::create(&db_path).map_err(|e| StoreError::Redb {
            message: format!("failed to open redb at {}: {e}", db_path.display()),
        })?;

        // Create every table up front so read transactions never see a
        // missing table on a fresh database.
        let txn = db.begin_write().map_err(|e| redb_err("begin_write", e))?;
        for table in RecordTable::ALL {
            txn.open_table(table.definition())
                .map_err(|e| redb_err("open_table", e))?;
        }
        txn.commit().map_err(|e| redb_err("commit", e))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Insert or replace a record.
    pub fn put<T: Serialize>(&self, table: RecordTable, id: u64, record: &T) -> StoreResult<()> {
        self.put_all(table, &[(id, record)])
    }

    /// Insert or replace several records in one transaction. Every record is
    /// encoded before the transaction opens, so an encoding failure writes
    /// nothing.
    pub fn put_all<T: Serialize>(&self, table: RecordTable, records: &[(u64, &T)]) -> StoreResult<()> {
        let encoded = records
            .iter()
            .map(|(id, record)| {
                bincode::serialize(record)
                    .map(|bytes| (*id, bytes))
                    .map_err(|e| StoreError::Serialization {
                        message: format!("failed to encode {table:?} record {id}: {e}"),
                    })
            })
            .collect::<StoreResult<Vec<_>>>()?;

        let txn = self
            .db
            .begin_write()
            .map_err(|e| redb_err("begin_write", e))?;
        {
            let mut t = txn
                .open_table(table.definition())
                .map_err(|e| redb_err("open_table", e))?;
            for (id, bytes) in &encoded {
                t.insert(*id, bytes.as_slice())
                    .map_err(|e| redb_err("insert", e))?;
            }
        }
        txn.commit().map_err(|e| redb_err("commit", e))?;
        Ok(())
    }

    /// Load every record of a table in id order.
    pub fn load_all<T: DeserializeOwned>(&self, table: RecordTable) -> StoreResult<Vec<(u64, T)>> {
        let txn = self.db.begin_read().map_err(|e| redb_err("begin_read", e))?;
        let t = txn
            .open_table(table.definition())
            .map_err(|e| redb_err("open_table", e))?;
        let mut out = Vec::new();
        for entry in t.iter().map_err(|e| redb_err("iter", e))? {
            let (key, value) = entry.map_err(|e| redb_err("iter", e))?;
            let id = key.value();
            out.push((id, decode(table, id, value.value())?));
        }
        Ok(out)
    }
}

fn decode<T: DeserializeOwned>(table: RecordTable, id: u64, bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization {
        message: format!("failed to decode {table:?} record {id}: {e}"),
    })
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serializer;
    use tempfile::TempDir;

    /// Encodes as a plain string unless told to fail.
    struct Record {
        value: &'static str,
        fail: bool,
    }

    impl Serialize for Record {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            if self.fail {
                return Err(serde::ser::Error::custom("refused"));
            }
            serializer.serialize_str(self.value)
        }
    }

    fn strings(store: &DurableStore, table: RecordTable) -> Vec<(u64, String)> {
        store.load_all(table).unwrap()
    }

    #[test]
    fn overwrite_replaces_record() {
        let dir = TempDir::new().unwrap();
        let store = DurableStore::open(dir.path()).unwrap();

        store.put(RecordTable::Patterns, 1, &"v1".to_string()).unwrap();
        store.put(RecordTable::Patterns, 1, &"v2".to_string()).unwrap();
        assert_eq!(strings(&store, RecordTable::Patterns), vec![(1, "v2".to_string())]);
    }

    #[test]
    fn load_all_is_id_ordered_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = DurableStore::open(dir.path()).unwrap();
            for id in [3u64, 1, 2] {
                store
                    .put(RecordTable::Triples, id, &format!("record-{id}"))
                    .unwrap();
            }
        }

        let store = DurableStore::open(dir.path()).unwrap();
        let all = strings(&store, RecordTable::Triples);
        let ids: Vec<u64> = all.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(all[0].1, "record-1");
    }

    #[test]
    fn tables_are_independent() {
        let dir = TempDir::new().unwrap();
        let store = DurableStore::open(dir.path()).unwrap();
        store.put(RecordTable::HyperEdges, 1, &"edge".to_string()).unwrap();
        assert_eq!(strings(&store, RecordTable::HyperEdges).len(), 1);
        assert!(strings(&store, RecordTable::Triples).is_empty());
    }

    #[test]
    fn put_all_commits_every_record() {
        let dir = TempDir::new().unwrap();
        let store = DurableStore::open(dir.path()).unwrap();
        let a = Record { value: "a", fail: false };
        let b = Record { value: "b", fail: false };
        store.put_all(RecordTable::Rules, &[(4, &a), (9, &b)]).unwrap();
        assert_eq!(
            strings(&store, RecordTable::Rules),
            vec![(4, "a".to_string()), (9, "b".to_string())]
        );
    }

    #[test]
    fn put_all_writes_nothing_when_one_record_fails() {
        let dir = TempDir::new().unwrap();
        let store = DurableStore::open(dir.path()).unwrap();
        let good = Record { value: "kept?", fail: false };
        let bad = Record { value: "", fail: true };

        let err = store
            .put_all(RecordTable::Patterns, &[(1, &good), (2, &bad)])
            .unwrap_err();
        assert!(matches!(err, StoreError::Serialization { .. }));
        assert!(strings(&store, RecordTable::Patterns).is_empty());
    }
}
