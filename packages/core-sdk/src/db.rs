use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use crate::models::Profile;

const PROFILES_KEY: &str = "llm.profiles";
const ACTIVE_ID_KEY: &str = "llm.activeProfileId";
const TELEMETRY_KEY: &str = "telemetry_enabled";

/**
 * \brief Durable string key-value storage behind the profile store.
 * \details `set` replaces the whole value in one statement; readers never see partial writes.
 */
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/**
 * \brief Open a database file with the busy timeout used everywhere in the SDK.
 */
pub fn open_db(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();
    let conn = Connection::open(path)
        .with_context(|| format!("open database {}", path.display()))?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/**
 * \brief Run migrations, creating the config table.
 */
pub fn migrate(conn: &Connection) -> Result<()> {
    retry_on_locked(|| {
        conn.execute_batch(
            r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS app_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
        )
    })?;
    Ok(())
}

/**
 * \brief SQLite-backed store using the `app_config` table.
 */
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(open_db(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        migrate(&conn).context("apply migrations failed")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().map_err(|_| anyhow!("database lock poisoned"))?;
        let value = conn
            .query_row(
                "SELECT value FROM app_config WHERE key=?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| anyhow!("database lock poisoned"))?;
        retry_on_locked(|| {
            conn.execute(
                "INSERT INTO app_config (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
                params![key, value],
            )
        })?;
        Ok(())
    }
}

/**
 * \brief Ephemeral store for tests and throwaway sessions.
 */
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/**
 * \brief Persistence of the profile list and the active profile id.
 * \details Two entries: a JSON array of profile records and a scalar active id.
 */
#[derive(Clone)]
pub struct ProfileStore {
    kv: Arc<dyn KeyValueStore>,
}

impl ProfileStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /**
     * \brief Read the profile list; a missing or corrupt entry reads as empty.
     */
    pub fn get_profiles(&self) -> Result<Vec<Profile>> {
        let raw = match self.kv.get(PROFILES_KEY)? {
            Some(raw) if !raw.trim().is_empty() => raw,
            _ => return Ok(Vec::new()),
        };
        Ok(serde_json::from_str::<Option<Vec<Profile>>>(&raw)
            .ok()
            .flatten()
            .unwrap_or_default())
    }

    pub fn set_profiles(&self, profiles: &[Profile]) -> Result<()> {
        let raw = serde_json::to_string(profiles)?;
        self.kv.set(PROFILES_KEY, &raw)
    }

    pub fn get_active_id(&self) -> Result<String> {
        Ok(self.kv.get(ACTIVE_ID_KEY)?.unwrap_or_default())
    }

    /** \brief Empty ids are ignored. */
    pub fn set_active_id(&self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Ok(());
        }
        self.kv.set(ACTIVE_ID_KEY, id)
    }

    pub fn get_telemetry_enabled(&self) -> Result<bool> {
        Ok(self
            .kv
            .get(TELEMETRY_KEY)?
            .map(|s| s == "1")
            .unwrap_or(false))
    }

    pub fn set_telemetry_enabled(&self, enabled: bool) -> Result<()> {
        self.kv.set(TELEMETRY_KEY, if enabled { "1" } else { "0" })
    }
}

/**
 * \brief Retry helper for SQLite lock contention.
 * \details Retries `database is locked`/`database table is locked` with linear backoff, at most 6 tries.
 */
fn retry_on_locked<T, F>(mut action: F) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    const MAX_RETRIES: usize = 5;
    for attempt in 0..=MAX_RETRIES {
        match action() {
            Ok(value) => return Ok(value),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) && attempt < MAX_RETRIES =>
            {
                let backoff = Duration::from_millis(200 * (attempt as u64 + 1));
                thread::sleep(backoff);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    unreachable!("retry_on_locked should have returned within the loop");
}
