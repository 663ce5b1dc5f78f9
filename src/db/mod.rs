//! Persistence for saved devices and pairing credentials. Both stores have an
//! in-memory implementation for tests and a SQLite implementation for the CLI.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::error::Result;
use crate::network::device_control::types::{TvBrand, TvDevice};

/// Saved TV devices, keyed by device id
pub trait DeviceStore: Send + Sync {
    fn list_saved_devices(&self) -> Result<Vec<TvDevice>>;

    /// Insert or replace by id
    fn save_device(&self, device: &TvDevice) -> Result<()>;

    fn delete_device(&self, id: &str) -> Result<bool>;
}

/// Pairing secrets (Samsung tokens, LG client keys), keyed by brand and host
pub trait CredentialStore: Send + Sync {
    fn get_credential(&self, brand: TvBrand, host: &str) -> Result<Option<String>>;

    fn put_credential(&self, brand: TvBrand, host: &str, secret: &str) -> Result<()>;

    fn remove_credential(&self, brand: TvBrand, host: &str) -> Result<bool>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
pub struct MemoryStore {
    devices: Mutex<Vec<TvDevice>>,
    credentials: Mutex<HashMap<(TvBrand, String), String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceStore for MemoryStore {
    fn list_saved_devices(&self) -> Result<Vec<TvDevice>> {
        Ok(lock(&self.devices).clone())
    }

    fn save_device(&self, device: &TvDevice) -> Result<()> {
        let mut devices = lock(&self.devices);
        match devices.iter_mut().find(|d| d.id == device.id) {
            Some(existing) => *existing = device.clone(),
            None => devices.push(device.clone()),
        }
        Ok(())
    }

    fn delete_device(&self, id: &str) -> Result<bool> {
        let mut devices = lock(&self.devices);
        let before = devices.len();
        devices.retain(|d| d.id != id);
        Ok(devices.len() != before)
    }
}

impl CredentialStore for MemoryStore {
    fn get_credential(&self, brand: TvBrand, host: &str) -> Result<Option<String>> {
        Ok(lock(&self.credentials)
            .get(&(brand, host.to_string()))
            .cloned())
    }

    fn put_credential(&self, brand: TvBrand, host: &str, secret: &str) -> Result<()> {
        lock(&self.credentials).insert((brand, host.to_string()), secret.to_string());
        Ok(())
    }

    fn remove_credential(&self, brand: TvBrand, host: &str) -> Result<bool> {
        Ok(lock(&self.credentials)
            .remove(&(brand, host.to_string()))
            .is_some())
    }
}

/// SQLite-backed store. Devices are kept as JSON documents so new fields do
/// not need migrations.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Busy timeout first, it needs no locks
        let _ = conn.execute("PRAGMA busy_timeout = 30000;", []);
        // May fail while another connection holds a transaction
        let _ = conn.query_row("PRAGMA journal_mode = WAL;", [], |_| Ok(()));
        let _ = conn.execute("PRAGMA synchronous = NORMAL;", []);

        debug!(path = %path.display(), "opened device database");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        Self::create_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tv_devices (
                id TEXT PRIMARY KEY,
                ip TEXT NOT NULL,
                brand TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            );
            CREATE TABLE IF NOT EXISTS tv_credentials (
                brand TEXT NOT NULL,
                host TEXT NOT NULL,
                secret TEXT NOT NULL,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
                PRIMARY KEY (brand, host)
            );",
        )
    }
}

impl DeviceStore for SqliteStore {
    fn list_saved_devices(&self) -> Result<Vec<TvDevice>> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare("SELECT data FROM tv_devices ORDER BY updated_at, id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut devices = Vec::new();
        for row in rows {
            devices.push(serde_json::from_str(&row?)?);
        }
        Ok(devices)
    }

    fn save_device(&self, device: &TvDevice) -> Result<()> {
        let data = serde_json::to_string(device)?;
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT INTO tv_devices (id, ip, brand, data) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET ip = ?2, brand = ?3, data = ?4,
             updated_at = strftime('%s', 'now')",
            params![device.id, device.ip, device.brand.to_string(), data],
        )?;
        Ok(())
    }

    fn delete_device(&self, id: &str) -> Result<bool> {
        let conn = lock(&self.conn);
        Ok(conn.execute("DELETE FROM tv_devices WHERE id = ?1", [id])? > 0)
    }
}

impl CredentialStore for SqliteStore {
    fn get_credential(&self, brand: TvBrand, host: &str) -> Result<Option<String>> {
        let conn = lock(&self.conn);
        let secret = conn
            .query_row(
                "SELECT secret FROM tv_credentials WHERE brand = ?1 AND host = ?2",
                params![brand.to_string(), host],
                |row| row.get(0),
            )
            .optional()?;
        Ok(secret)
    }

    fn put_credential(&self, brand: TvBrand, host: &str, secret: &str) -> Result<()> {
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT OR REPLACE INTO tv_credentials (brand, host, secret) VALUES (?1, ?2, ?3)",
            params![brand.to_string(), host, secret],
        )?;
        Ok(())
    }

    fn remove_credential(&self, brand: TvBrand, host: &str) -> Result<bool> {
        let conn = lock(&self.conn);
        let removed = conn.execute(
            "DELETE FROM tv_credentials WHERE brand = ?1 AND host = ?2",
            params![brand.to_string(), host],
        )?;
        Ok(removed > 0)
    }
}
