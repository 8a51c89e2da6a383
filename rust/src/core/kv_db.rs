// Device-local key/value storage (session record, analytics keys).

use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StorageError;

const KV_DB_FILE: &str = "yeet_kv.sqlite3";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS kv (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

pub fn open_kv_db(data_dir: &str) -> Result<Connection, rusqlite::Error> {
    let path = std::path::Path::new(data_dir).join(KV_DB_FILE);
    let conn = Connection::open(&path)?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

/// Async facade over the sqlite table. Every call hops to the blocking pool,
/// so each read and each write is a suspension point for the caller.
#[derive(Clone)]
pub struct KvStore {
    conn: Arc<Mutex<Connection>>,
}

impl KvStore {
    pub fn open(data_dir: &str) -> Result<Self, StorageError> {
        Ok(Self::from_conn(open_kv_db(data_dir)?))
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::from_conn(conn))
    }

    fn from_conn(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
        })
        .await
    }

    pub async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map(|_| ())
        })
        .await
    }

    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
                .map(|_| ())
        })
        .await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value)?;
        self.set(key, raw).await
    }

    async fn with_conn<R, F>(&self, f: F) -> Result<R, StorageError>
    where
        R: Send + 'static,
        F: FnOnce(&Connection) -> Result<R, rusqlite::Error> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let out = tokio::task::spawn_blocking(move || {
            let guard = match conn.lock() {
                Ok(g) => g,
                Err(poison) => poison.into_inner(),
            };
            f(&guard)
        })
        .await
        .map_err(|e| StorageError::Join(e.to_string()))?;
        Ok(out?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_remove() {
        let kv = KvStore::in_memory().unwrap();
        assert_eq!(kv.get("user").await.unwrap(), None);

        kv.set("user", "first".into()).await.unwrap();
        kv.set("user", "second".into()).await.unwrap();
        assert_eq!(kv.get("user").await.unwrap().as_deref(), Some("second"));

        kv.remove("user").await.unwrap();
        kv.remove("user").await.unwrap();
        assert_eq!(kv.get("user").await.unwrap(), None);
    }

    #[tokio::test]
    async fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();
        {
            let kv = KvStore::open(data_dir).unwrap();
            kv.set_json("buttonStats-alice", &serde_json::json!({"like": 2}))
                .await
                .unwrap();
        }
        let kv = KvStore::open(data_dir).unwrap();
        let stats: serde_json::Value = kv.get_json("buttonStats-alice").await.unwrap().unwrap();
        assert_eq!(stats["like"], 2);
    }

    #[tokio::test]
    async fn corrupt_json_is_an_encode_error() {
        let kv = KvStore::in_memory().unwrap();
        kv.set("screenViews-alice", "not json".into()).await.unwrap();
        let err = kv.get_json::<Vec<String>>("screenViews-alice").await.unwrap_err();
        assert!(matches!(err, StorageError::Encode(_)));
    }
}
