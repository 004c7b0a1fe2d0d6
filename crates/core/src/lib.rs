//! `loyalty-core` — domain foundation for the loyalty-points ledger.
//!
//! This crate contains **pure domain** primitives (no IO, no async, no
//! infrastructure concerns): the money codec, order-number validation,
//! ledger entry types and the domain error taxonomy.

pub mod entry;
pub mod error;
pub mod money;
pub mod order_number;

pub use entry::{Balance, EntryKind, EntryStatus, LedgerEntry};
pub use error::{LedgerError, LedgerResult};
pub use money::MoneyError;
