// src/history/change_data/sqlite.rs

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::debug;

use super::{ChangeDataError, ChangeDataRecord, ChangeDataStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS change_data (
    entry_id INTEGER NOT NULL,
    data_key TEXT NOT NULL,
    payload  TEXT NOT NULL,
    PRIMARY KEY (entry_id, data_key)
);
";

/// Change data kept in a SQLite file. Also the persisted form used by the
/// history store.
#[derive(Debug)]
pub struct SqliteChangeDataStore {
    conn: Mutex<Connection>,
}

impl SqliteChangeDataStore {
    pub fn open(path: &Path) -> Result<Self, ChangeDataError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch(SCHEMA)?;
        debug!("SqliteChangeDataStore: opened {:?}", path);
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Opens an existing file without writing to it: no pragma, no schema.
    pub fn open_read_only(path: &Path) -> Result<Self, ChangeDataError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        debug!("SqliteChangeDataStore: opened {:?} read-only", path);
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Writes `records` to a new file at `path`. The file keeps the default
    /// rollback journal so it can later be opened read-only on its own.
    pub fn create_file(path: &Path, records: &[ChangeDataRecord]) -> Result<(), ChangeDataError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        let store = Self { conn: Mutex::new(conn) };
        store.import(records)?;
        debug!("SqliteChangeDataStore: wrote {} records to {:?}", records.len(), path);
        Ok(())
    }

    pub fn open_in_memory() -> Result<Self, ChangeDataError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Replaces the whole content with `records` in one transaction.
    pub fn import(&self, records: &[ChangeDataRecord]) -> Result<(), ChangeDataError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM change_data", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO change_data (entry_id, data_key, payload) VALUES (?1, ?2, ?3)",
            )?;
            for record in records {
                let payload = serde_json::to_string(&record.data)?;
                stmt.execute(params![record.entry_id as i64, record.key, payload])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

impl ChangeDataStore for SqliteChangeDataStore {
    fn get(&self, entry_id: u64, key: &str) -> Result<Option<serde_json::Value>, ChangeDataError> {
        let conn = self.conn.lock();
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM change_data WHERE entry_id = ?1 AND data_key = ?2",
                params![entry_id as i64, key],
                |row| row.get(0),
            )
            .optional()?;
        match payload {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    fn put(&self, entry_id: u64, key: &str, data: serde_json::Value) -> Result<(), ChangeDataError> {
        let payload = serde_json::to_string(&data)?;
        self.conn.lock().execute(
            "INSERT INTO change_data (entry_id, data_key, payload) VALUES (?1, ?2, ?3)
             ON CONFLICT(entry_id, data_key) DO UPDATE SET payload = excluded.payload",
            params![entry_id as i64, key, payload],
        )?;
        Ok(())
    }

    fn evict(&self, entry_id: u64) -> Result<(), ChangeDataError> {
        self.conn
            .lock()
            .execute("DELETE FROM change_data WHERE entry_id = ?1", params![entry_id as i64])?;
        Ok(())
    }

    fn records(&self) -> Result<Vec<ChangeDataRecord>, ChangeDataError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT entry_id, data_key, payload FROM change_data ORDER BY entry_id, data_key",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;
        let mut records = Vec::new();
        for row in rows {
            let (entry_id, key, payload) = row?;
            records.push(ChangeDataRecord {
                entry_id: entry_id as u64,
                key,
                data: serde_json::from_str(&payload)?,
            });
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upsert_and_evict() {
        let store = SqliteChangeDataStore::open_in_memory().unwrap();
        store.put(1, "rows", json!([1])).unwrap();
        store.put(1, "rows", json!([1, 2])).unwrap();
        store.put(2, "rows", json!([])).unwrap();
        assert_eq!(store.get(1, "rows").unwrap(), Some(json!([1, 2])));

        store.evict(1).unwrap();
        assert_eq!(store.get(1, "rows").unwrap(), None);
        assert_eq!(store.records().unwrap().len(), 1);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("change_data.sqlite");
        {
            let store = SqliteChangeDataStore::open(&path).unwrap();
            store
                .import(&[ChangeDataRecord {
                    entry_id: 42,
                    key: "flagged-rows".to_string(),
                    data: json!([0, 3]),
                }])
                .unwrap();
        }
        let reopened = SqliteChangeDataStore::open(&path).unwrap();
        assert_eq!(reopened.get(42, "flagged-rows").unwrap(), Some(json!([0, 3])));
    }

    #[test]
    fn test_read_only_open_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("change_data.sqlite");
        let record = ChangeDataRecord { entry_id: 7, key: "flagged-rows".to_string(), data: json!([2]) };
        SqliteChangeDataStore::create_file(&path, &[record]).unwrap();
        let before = std::fs::read(&path).unwrap();

        let store = SqliteChangeDataStore::open_read_only(&path).unwrap();
        assert_eq!(store.records().unwrap().len(), 1);
        assert_eq!(store.get(7, "flagged-rows").unwrap(), Some(json!([2])));
        assert!(store.put(8, "flagged-rows", json!([])).is_err());
        drop(store);

        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_read_only_open_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SqliteChangeDataStore::open_read_only(&dir.path().join("missing.sqlite")).is_err());
    }
}
