//! Database model modules - extends Database with domain-specific methods
//!
//! Each module adds `impl Database` blocks with methods for a specific table.

pub mod credits; // credit_balances (per-user credit ledger)
pub mod payment_records; // payment_records (payment attempt audit trail)
