//! SQLite-backed order log.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite library
//! is required.  Writes go through a single writer connection; reads use a
//! small pool of read-only connections so lookups and range scans can run
//! side by side.  A reader-writer gate makes a write exclude all readers,
//! because a connection is never assumed to tolerate concurrent statements.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::debug;

use super::store::{OrderLog, OrderRecord};

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Order log backed by a single SQLite database file.
pub struct SqliteOrderLog {
    /// Database path (`":memory:"` for an ephemeral log).
    path: String,
    /// Shared for reads, exclusive for writes.
    gate: RwLock<()>,
    /// The only connection that ever writes.
    writer: Mutex<Connection>,
    /// Idle read-only connections.
    readers: Mutex<Vec<Connection>>,
    /// Upper bound on idle read connections kept around.
    max_readers: usize,
}

impl SqliteOrderLog {
    /// Open (or create) the log at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests);
    /// reads then share the writer connection.
    pub fn new(path: &str, read_connections: usize) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        let log = Self {
            path: path.to_string(),
            gate: RwLock::new(()),
            writer: Mutex::new(conn),
            readers: Mutex::new(Vec::new()),
            max_readers: read_connections,
        };
        log.apply_pragmas()?;
        log.init_db()?;
        Ok(log)
    }

    fn apply_pragmas(&self) -> anyhow::Result<()> {
        let conn = self.writer.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create the `order_log` table if it does not already exist.
    /// Idempotent -- safe to call on every startup.
    fn init_db(&self) -> anyhow::Result<()> {
        let _exclusive = self.gate.write().expect("rwlock poisoned");
        let conn = self.writer.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS order_log (
                order_num     INTEGER PRIMARY KEY,
                product_name  TEXT NOT NULL,
                quantity      INTEGER NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn in_memory(&self) -> bool {
        self.path == ":memory:" || self.max_readers == 0
    }

    fn open_reader(&self) -> anyhow::Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        debug!(path = %self.path, "Opened read connection");
        Ok(conn)
    }

    /// Run `f` against a read connection while holding the gate shared.
    fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> anyhow::Result<T> {
        let _shared = self.gate.read().expect("rwlock poisoned");

        if self.in_memory() {
            let conn = self.writer.lock().expect("mutex poisoned");
            return Ok(f(&conn)?);
        }

        let pooled = self.readers.lock().expect("mutex poisoned").pop();
        let conn = match pooled {
            Some(conn) => conn,
            None => self.open_reader()?,
        };
        let result = f(&conn);

        let mut idle = self.readers.lock().expect("mutex poisoned");
        if idle.len() < self.max_readers {
            idle.push(conn);
        }
        Ok(result?)
    }

    /// Run `f` against the writer connection while holding the gate exclusively.
    fn write<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> anyhow::Result<T> {
        let _exclusive = self.gate.write().expect("rwlock poisoned");
        let conn = self.writer.lock().expect("mutex poisoned");
        Ok(f(&conn)?)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<OrderRecord> {
    Ok(OrderRecord {
        order_number: row.get(0)?,
        product_name: row.get(1)?,
        quantity: row.get(2)?,
    })
}

// ── OrderLog implementation ────────────────────────────────────────

impl OrderLog for SqliteOrderLog {
    fn insert(
        &self,
        record: OrderRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        Box::pin(async move {
            let changed = self.write(|conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO order_log (order_num, product_name, quantity)
                     VALUES (?1, ?2, ?3)",
                    params![record.order_number, record.product_name, record.quantity],
                )
            })?;
            Ok(changed == 1)
        })
    }

    fn insert_batch(
        &self,
        records: Vec<OrderRecord>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<usize>> + Send + '_>> {
        Box::pin(async move {
            if records.is_empty() {
                return Ok(0);
            }
            self.write(|conn| {
                let tx = conn.unchecked_transaction()?;
                let mut inserted = 0;
                {
                    let mut stmt = tx.prepare_cached(
                        "INSERT OR IGNORE INTO order_log (order_num, product_name, quantity)
                         VALUES (?1, ?2, ?3)",
                    )?;
                    for record in &records {
                        inserted += stmt.execute(params![
                            record.order_number,
                            record.product_name,
                            record.quantity
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(inserted)
            })
        })
    }

    fn get(
        &self,
        order_number: i64,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<OrderRecord>>> + Send + '_>> {
        Box::pin(async move {
            self.read(|conn| {
                conn.query_row(
                    "SELECT order_num, product_name, quantity
                     FROM order_log WHERE order_num = ?1",
                    params![order_number],
                    row_to_record,
                )
                .optional()
            })
        })
    }

    fn range_after(
        &self,
        order_number: i64,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<OrderRecord>>> + Send + '_>> {
        Box::pin(async move {
            self.read(|conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT order_num, product_name, quantity
                     FROM order_log WHERE order_num > ?1 ORDER BY order_num",
                )?;
                let rows = stmt.query_map(params![order_number], row_to_record)?;
                rows.collect()
            })
        })
    }

    fn max_key(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<i64>> + Send + '_>> {
        Box::pin(async move {
            self.read(|conn| {
                conn.query_row("SELECT COALESCE(MAX(order_num), 0) FROM order_log", [], |row| {
                    row.get(0)
                })
            })
        })
    }
}
