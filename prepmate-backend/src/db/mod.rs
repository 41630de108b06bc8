//! Sqlite persistence for payment records and credit balances.
//!
//! `Database` owns a single connection behind a mutex; domain-specific
//! methods live in `tables/` as `impl Database` extension blocks.

pub mod tables;

use rusqlite::{Connection, Result as SqliteResult};
use std::path::Path;
use std::sync::Mutex;

pub use tables::payment_records::PaymentRecord;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(database_url: &str) -> SqliteResult<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = Path::new(database_url).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }

        let conn = Connection::open(database_url)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();

        // Payment records: the durable audit trail of every payment attempt.
        // transaction_id is UNIQUE so duplicate crediting fails at the store
        // even across server instances.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS payment_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                transaction_id TEXT UNIQUE NOT NULL,
                user_id TEXT NOT NULL,
                expected_amount INTEGER NOT NULL,
                token TEXT NOT NULL,
                recipient TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_payment_records_user_status
             ON payment_records(user_id, status)",
            [],
        )?;

        // Credit balances: one row per user, mutated only by the ledger
        // methods in tables/credits.rs.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS credit_balances (
                user_id TEXT PRIMARY KEY,
                balance INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }
}
