//! The ledger contract.

use async_trait::async_trait;

use loyalty_core::{Balance, EntryStatus, LedgerEntry, LedgerError, LedgerResult};

/// Backing store for the order/withdrawal ledger.
///
/// All mutations affecting one owner are mutually exclusive with each other;
/// reads may run concurrently with unrelated owners' writes. Implementations
/// never retry: callers map errors straight to their own responses.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Record a new charge with status NEW and amount zero.
    ///
    /// The order number is checksum-validated first. Duplicate ids are
    /// reported as [`LedgerError::AlreadyExistsSameOwner`] or
    /// [`LedgerError::AlreadyExistsOtherOwner`] depending on who holds them.
    async fn submit_charge(&self, owner: &str, id: &str) -> LedgerResult<()>;

    /// Record a withdrawal of `amount` minor units.
    ///
    /// The sufficiency check (PROCESSED charge total minus existing
    /// withdrawal total must cover `amount`) is atomic with the insert with
    /// respect to concurrent withdrawals from the same owner.
    async fn submit_withdrawal(&self, owner: &str, id: &str, amount: u64) -> LedgerResult<()>;

    /// Charges of one owner, newest first. Empty for unknown owners.
    async fn list_charges(&self, owner: &str) -> LedgerResult<Vec<LedgerEntry>>;

    /// Withdrawals of one owner, newest first. Empty for unknown owners.
    async fn list_withdrawals(&self, owner: &str) -> LedgerResult<Vec<LedgerEntry>>;

    /// Aggregate balance; zero (not an error) for unknown owners.
    async fn get_balance(&self, owner: &str) -> LedgerResult<Balance>;

    /// Charges in any of `statuses`, across all owners, OLDEST first so
    /// long-pending orders are never starved by the reconciliation loop.
    async fn list_pending(&self, statuses: &[EntryStatus]) -> LedgerResult<Vec<LedgerEntry>>;

    /// Overwrite status/amount of a pending charge.
    ///
    /// Fails with [`LedgerError::NotFound`] for unknown ids and with
    /// [`LedgerError::AlreadyTerminal`] when the entry already reached
    /// INVALID/PROCESSED; the latter is tolerated and ignored by the
    /// reconciliation worker.
    async fn apply_verdict(&self, id: &str, status: EntryStatus, amount: u64) -> LedgerResult<()>;
}

/// How the request layer is expected to present a submission result.
///
/// Re-submitting an order the caller already owns is idempotent from the
/// caller's perspective; the same order under another owner is a conflict.
/// This is caller-side policy, not a ledger invariant, so it lives next to
/// the contract instead of inside the stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Accepted,
    AlreadyMine,
    Conflict,
    Rejected,
    InsufficientFunds,
}

impl SubmissionOutcome {
    /// Fold a submit result into the user-visible outcome, passing real
    /// failures (storage and the like) back through.
    pub fn from_submit(result: LedgerResult<()>) -> LedgerResult<Self> {
        match result {
            Ok(()) => Ok(SubmissionOutcome::Accepted),
            Err(LedgerError::AlreadyExistsSameOwner) => Ok(SubmissionOutcome::AlreadyMine),
            Err(LedgerError::AlreadyExistsOtherOwner) => Ok(SubmissionOutcome::Conflict),
            Err(LedgerError::InvalidIdentifier | LedgerError::InvalidAmount) => {
                Ok(SubmissionOutcome::Rejected)
            }
            Err(LedgerError::InsufficientFunds) => Ok(SubmissionOutcome::InsufficientFunds),
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_under_same_owner_reads_as_idempotent_success() {
        assert_eq!(
            SubmissionOutcome::from_submit(Err(LedgerError::AlreadyExistsSameOwner)),
            Ok(SubmissionOutcome::AlreadyMine)
        );
    }

    #[test]
    fn duplicate_under_other_owner_reads_as_conflict() {
        assert_eq!(
            SubmissionOutcome::from_submit(Err(LedgerError::AlreadyExistsOtherOwner)),
            Ok(SubmissionOutcome::Conflict)
        );
    }

    #[test]
    fn validation_failures_read_as_rejected() {
        assert_eq!(
            SubmissionOutcome::from_submit(Err(LedgerError::InvalidIdentifier)),
            Ok(SubmissionOutcome::Rejected)
        );
        assert_eq!(
            SubmissionOutcome::from_submit(Err(LedgerError::InvalidAmount)),
            Ok(SubmissionOutcome::Rejected)
        );
    }

    #[test]
    fn storage_failures_pass_through() {
        assert_eq!(
            SubmissionOutcome::from_submit(Err(LedgerError::storage("pool closed"))),
            Err(LedgerError::storage("pool closed"))
        );
    }
}
