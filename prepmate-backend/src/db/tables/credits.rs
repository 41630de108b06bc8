//! Database methods for the credit_balances table.
//!
//! The ledger is the only writer of credit balances. Both mutations are
//! single SQL statements so there is no read-modify-write window: deduction
//! carries its floor check in the WHERE clause and simply affects zero rows
//! when the balance is insufficient.

use chrono::Utc;
use rusqlite::Result as SqliteResult;

use crate::db::Database;

impl Database {
    /// Current balance for a user; users without a row have zero credits.
    pub fn get_credit_balance(&self, user_id: &str) -> SqliteResult<i64> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT balance FROM credit_balances WHERE user_id = ?1")?;

        let balance = stmt.query_row([user_id], |row| row.get(0));
        match balance {
            Ok(b) => Ok(b),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Add credits to a user's balance, creating the row if needed.
    /// Returns the new balance.
    pub fn add_credits(&self, user_id: &str, amount: i64) -> SqliteResult<i64> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO credit_balances (user_id, balance, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                balance = balance + excluded.balance,
                updated_at = excluded.updated_at",
            rusqlite::params![user_id, amount, now],
        )?;

        conn.query_row(
            "SELECT balance FROM credit_balances WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )
    }

    /// Deduct credits if and only if the balance covers the amount.
    /// Returns the new balance, or None when the balance was insufficient
    /// (in which case nothing changed).
    pub fn deduct_credits(&self, user_id: &str, amount: i64) -> SqliteResult<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let affected = conn.execute(
            "UPDATE credit_balances SET balance = balance - ?2, updated_at = ?3
             WHERE user_id = ?1 AND balance >= ?2",
            rusqlite::params![user_id, amount, now],
        )?;

        if affected == 0 {
            return Ok(None);
        }

        conn.query_row(
            "SELECT balance FROM credit_balances WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )
        .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::new(path.to_str().unwrap()).unwrap();
        (db, dir)
    }

    #[test]
    fn test_unknown_user_has_zero_balance() {
        let (db, _dir) = test_db();
        assert_eq!(db.get_credit_balance("nobody").unwrap(), 0);
    }

    #[test]
    fn test_add_accumulates() {
        let (db, _dir) = test_db();
        assert_eq!(db.add_credits("user-1", 5).unwrap(), 5);
        assert_eq!(db.add_credits("user-1", 10).unwrap(), 15);
        assert_eq!(db.get_credit_balance("user-1").unwrap(), 15);
    }

    #[test]
    fn test_deduct_with_floor() {
        let (db, _dir) = test_db();
        db.add_credits("user-1", 10).unwrap();

        assert_eq!(db.deduct_credits("user-1", 4).unwrap(), Some(6));
        // Insufficient: nothing changes.
        assert_eq!(db.deduct_credits("user-1", 7).unwrap(), None);
        assert_eq!(db.get_credit_balance("user-1").unwrap(), 6);
        // Balance never goes negative.
        assert_eq!(db.deduct_credits("user-1", 6).unwrap(), Some(0));
        assert_eq!(db.deduct_credits("user-1", 1).unwrap(), None);
    }
}
