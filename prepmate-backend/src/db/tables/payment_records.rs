//! Database methods for the payment_records table.
//!
//! Every payment attempt leaves a row here, keyed by transaction id.
//! Rows are never deleted; status only moves pending -> confirmed or
//! pending -> failed.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{OptionalExtension, Result as SqliteResult, Row};
use serde::Serialize;

use crate::db::Database;
use crate::payments::types::PaymentStatus;

/// Prefix for synthetic placeholder ids created at challenge time, before
/// the real on-chain signature is known. Base58 signatures never contain
/// ':' so a placeholder can never collide with a real id.
pub const PLACEHOLDER_PREFIX: &str = "challenge:";

/// How far back `update_payment_status` searches for a placeholder to
/// rebind when the incoming transaction id has no record yet.
const REBIND_WINDOW_MINUTES: i64 = 30;

/// A single payment attempt row.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentRecord {
    pub id: i64,
    pub transaction_id: String,
    pub user_id: String,
    /// Expected amount in the token's atomic units.
    pub expected_amount: i64,
    /// Token mint address.
    pub token: String,
    pub recipient: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Build a placeholder transaction id for a challenge that has no on-chain
/// signature yet. The random tail keeps two challenges issued in the same
/// millisecond from colliding on the unique key.
pub fn placeholder_transaction_id(user_id: &str) -> String {
    format!(
        "{}{}:{}:{}",
        PLACEHOLDER_PREFIX,
        user_id,
        Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4().simple()
    )
}

fn map_payment_record_row(row: &Row) -> rusqlite::Result<PaymentRecord> {
    let status_str: String = row.get(6)?;
    let created_at_str: String = row.get(7)?;
    let updated_at_str: String = row.get(8)?;

    Ok(PaymentRecord {
        id: row.get(0)?,
        transaction_id: row.get(1)?,
        user_id: row.get(2)?,
        expected_amount: row.get(3)?,
        token: row.get(4)?,
        recipient: row.get(5)?,
        status: PaymentStatus::parse(&status_str),
        created_at: DateTime::parse_from_rfc3339(&created_at_str)
            .unwrap()
            .with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at_str)
            .unwrap()
            .with_timezone(&Utc),
    })
}

const SELECT_COLUMNS: &str = "id, transaction_id, user_id, expected_amount, token, recipient, status, created_at, updated_at";

impl Database {
    /// Insert a new pending payment record. Fails if the transaction id is
    /// already recorded.
    pub fn insert_pending_payment(
        &self,
        transaction_id: &str,
        user_id: &str,
        expected_amount: i64,
        token: &str,
        recipient: &str,
    ) -> SqliteResult<PaymentRecord> {
        self.insert_payment_with_status(
            transaction_id,
            user_id,
            expected_amount,
            token,
            recipient,
            PaymentStatus::Pending,
        )
    }

    pub(crate) fn insert_payment_with_status(
        &self,
        transaction_id: &str,
        user_id: &str,
        expected_amount: i64,
        token: &str,
        recipient: &str,
        status: PaymentStatus,
    ) -> SqliteResult<PaymentRecord> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO payment_records (transaction_id, user_id, expected_amount, token, recipient, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            rusqlite::params![
                transaction_id,
                user_id,
                expected_amount,
                token,
                recipient,
                status.to_string(),
                now.to_rfc3339(),
            ],
        )?;

        let id = conn.last_insert_rowid();

        Ok(PaymentRecord {
            id,
            transaction_id: transaction_id.to_string(),
            user_id: user_id.to_string(),
            expected_amount,
            token: token.to_string(),
            recipient: recipient.to_string(),
            status,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_payment_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> SqliteResult<Option<PaymentRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM payment_records WHERE transaction_id = ?1",
            SELECT_COLUMNS
        ))?;

        stmt.query_row([transaction_id], map_payment_record_row)
            .optional()
    }

    /// Pending records for a user created within the last `minutes_back`
    /// minutes, most recent first.
    pub fn get_pending_payments_by_user(
        &self,
        user_id: &str,
        minutes_back: i64,
    ) -> SqliteResult<Vec<PaymentRecord>> {
        let conn = self.conn.lock().unwrap();
        let cutoff = (Utc::now() - Duration::minutes(minutes_back)).to_rfc3339();

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM payment_records
             WHERE user_id = ?1 AND status = 'pending' AND created_at >= ?2
             ORDER BY created_at DESC",
            SELECT_COLUMNS
        ))?;

        let rows = stmt.query_map([user_id, cutoff.as_str()], map_payment_record_row)?;
        rows.collect()
    }

    /// Recent payment attempts for a user (any status), most recent first.
    pub fn get_recent_payments_by_user(
        &self,
        user_id: &str,
        limit: i64,
    ) -> SqliteResult<Vec<PaymentRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM payment_records WHERE user_id = ?1
             ORDER BY created_at DESC LIMIT ?2",
            SELECT_COLUMNS
        ))?;

        let rows = stmt.query_map(
            rusqlite::params![user_id, limit],
            map_payment_record_row,
        )?;
        rows.collect()
    }

    pub fn count_pending_payments_by_user(&self, user_id: &str) -> SqliteResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM payment_records WHERE user_id = ?1 AND status = 'pending'",
            [user_id],
            |row| row.get(0),
        )
    }

    /// Replace a placeholder transaction id with the real on-chain
    /// signature. Only pending rows can be rebound.
    pub fn rebind_transaction_id(&self, old_id: &str, new_id: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let affected = conn.execute(
            "UPDATE payment_records SET transaction_id = ?1, updated_at = ?2
             WHERE transaction_id = ?3 AND status = 'pending'",
            rusqlite::params![new_id, now, old_id],
        )?;
        Ok(affected > 0)
    }

    /// Move a pending record to a terminal status. Returns false when no
    /// pending row exists under this id; confirmed/failed rows are never
    /// touched, so a terminal status cannot be reversed.
    pub fn set_payment_status(
        &self,
        transaction_id: &str,
        status: PaymentStatus,
    ) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let affected = conn.execute(
            "UPDATE payment_records SET status = ?1, updated_at = ?2
             WHERE transaction_id = ?3 AND status = 'pending'",
            rusqlite::params![status.to_string(), now, transaction_id],
        )?;
        Ok(affected > 0)
    }

    /// Record the outcome of a settlement attempt, guaranteeing a durable
    /// trace even when the incoming transaction id was never seen before.
    ///
    /// Fallback chain:
    /// 1. a pending row exists under this id - update it in place;
    /// 2. no row under this id - rebind the user's most recent pending
    ///    placeholder to this id and retry;
    /// 3. no placeholder either - synthesize a new row with the final
    ///    status directly.
    ///
    /// Two concurrent settlements racing through step 2 can each synthesize
    /// a row; the UNIQUE constraint makes the second insert fail rather
    /// than double-record.
    pub fn update_payment_status(
        &self,
        user_id: &str,
        transaction_id: &str,
        status: PaymentStatus,
        expected_amount: i64,
        token: &str,
        recipient: &str,
    ) -> SqliteResult<PaymentRecord> {
        if self.set_payment_status(transaction_id, status)? {
            return Ok(self
                .get_payment_by_transaction_id(transaction_id)?
                .expect("row updated but not found"));
        }

        if let Some(existing) = self.get_payment_by_transaction_id(transaction_id)? {
            // Already terminal; leave it alone.
            return Ok(existing);
        }

        let placeholders = self.get_pending_payments_by_user(user_id, REBIND_WINDOW_MINUTES)?;
        if let Some(placeholder) = placeholders
            .iter()
            .find(|r| r.transaction_id.starts_with(PLACEHOLDER_PREFIX))
        {
            if self.rebind_transaction_id(&placeholder.transaction_id, transaction_id)? {
                self.set_payment_status(transaction_id, status)?;
                return Ok(self
                    .get_payment_by_transaction_id(transaction_id)?
                    .expect("rebound row not found"));
            }
        }

        log::warn!(
            "[payment_records] No record or placeholder for {} - synthesizing {} row",
            transaction_id,
            status
        );
        self.insert_payment_with_status(
            transaction_id,
            user_id,
            expected_amount,
            token,
            recipient,
            status,
        )
    }
}
