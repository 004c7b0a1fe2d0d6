//! Domain error model.

use thiserror::Error;

/// Result type used across the ledger domain.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// duplicates, sufficiency). Infrastructure failures are funneled through
/// `Storage` so callers can tell them apart from rule violations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The order number failed checksum validation.
    #[error("invalid order number")]
    InvalidIdentifier,

    /// A withdrawal was requested for a zero amount.
    #[error("withdrawal amount must be positive")]
    InvalidAmount,

    /// The order number was already submitted by the same owner.
    #[error("order already submitted by this user")]
    AlreadyExistsSameOwner,

    /// The order number was already submitted by a different owner.
    #[error("order already submitted by another user")]
    AlreadyExistsOtherOwner,

    /// The owner's spendable balance does not cover the withdrawal.
    #[error("insufficient points for withdrawal")]
    InsufficientFunds,

    /// The referenced order does not exist in the ledger.
    #[error("order not found")]
    NotFound,

    /// The entry already reached INVALID/PROCESSED and cannot change again.
    #[error("order already reached a terminal status")]
    AlreadyTerminal,

    /// The owner login is not known to the backing store.
    #[error("unknown user: {0}")]
    UnknownOwner(String),

    /// An infrastructure failure (pool, connection, lock poisoning).
    #[error("storage failure: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn unknown_owner(login: impl Into<String>) -> Self {
        Self::UnknownOwner(login.into())
    }
}
