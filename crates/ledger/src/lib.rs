//! `loyalty-ledger` — the authoritative order/withdrawal ledger.
//!
//! Defines the [`LedgerStore`] contract every backing store must satisfy and
//! ships the process-memory implementation. The relational implementation
//! lives in `loyalty-infra`; both are behaviorally identical with respect to
//! the ledger invariants (global id uniqueness, monotone charge lifecycle,
//! atomic withdrawal sufficiency).

pub mod memory;
pub mod store;

pub use memory::MemoryLedger;
pub use store::{LedgerStore, SubmissionOutcome};
