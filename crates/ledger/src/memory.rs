//! Process-memory ledger.
//!
//! Intended for tests/dev and as the behavioral reference for the relational
//! store. A global map keyed by order number enforces id uniqueness; each
//! owner additionally gets a dedicated mutex so the withdrawal sufficiency
//! check and insert form one critical section per owner instead of one
//! process-wide lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;

use loyalty_core::{
    Balance, EntryKind, EntryStatus, LedgerEntry, LedgerError, LedgerResult, order_number,
};

use crate::store::LedgerStore;

#[derive(Debug, Default)]
pub struct MemoryLedger {
    /// All entries, keyed by order number (globally unique).
    entries: RwLock<HashMap<String, LedgerEntry>>,
    /// Per-owner mutation locks, created lazily.
    owner_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch (or create) the mutation lock of one owner.
    fn owner_lock(&self, owner: &str) -> LedgerResult<Arc<Mutex<()>>> {
        let mut locks = self
            .owner_locks
            .lock()
            .map_err(|_| LedgerError::storage("owner lock table poisoned"))?;
        Ok(locks.entry(owner.to_string()).or_default().clone())
    }

    /// PROCESSED charge total minus withdrawal total for one owner.
    ///
    /// Callers that mutate must hold the owner lock so the figure cannot be
    /// undercut by a concurrent withdrawal between check and insert.
    fn spendable(entries: &HashMap<String, LedgerEntry>, owner: &str) -> u64 {
        let mut accrued = 0u64;
        let mut withdrawn = 0u64;
        for entry in entries.values().filter(|e| e.owner == owner) {
            match entry.kind {
                EntryKind::Charge if entry.status == EntryStatus::Processed => {
                    accrued += entry.amount;
                }
                EntryKind::Withdrawal => withdrawn += entry.amount,
                EntryKind::Charge => {}
            }
        }
        accrued.saturating_sub(withdrawn)
    }

    fn duplicate_error(existing: &LedgerEntry, owner: &str) -> LedgerError {
        if existing.owner == owner {
            LedgerError::AlreadyExistsSameOwner
        } else {
            LedgerError::AlreadyExistsOtherOwner
        }
    }

    fn entries_of(&self, owner: &str, kind: EntryKind) -> LedgerResult<Vec<LedgerEntry>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| LedgerError::storage("entry map poisoned"))?;

        let mut matched: Vec<LedgerEntry> = entries
            .values()
            .filter(|e| e.owner == owner && e.kind == kind)
            .cloned()
            .collect();

        // Newest first; id as deterministic tie-break.
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(matched)
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn submit_charge(&self, owner: &str, id: &str) -> LedgerResult<()> {
        if !order_number::is_valid(id) {
            return Err(LedgerError::InvalidIdentifier);
        }

        let lock = self.owner_lock(owner)?;
        let _owner_guard = lock
            .lock()
            .map_err(|_| LedgerError::storage("owner lock poisoned"))?;

        let mut entries = self
            .entries
            .write()
            .map_err(|_| LedgerError::storage("entry map poisoned"))?;

        if let Some(existing) = entries.get(id) {
            return Err(Self::duplicate_error(existing, owner));
        }

        entries.insert(id.to_string(), LedgerEntry::new_charge(owner, id));
        Ok(())
    }

    async fn submit_withdrawal(&self, owner: &str, id: &str, amount: u64) -> LedgerResult<()> {
        if !order_number::is_valid(id) {
            return Err(LedgerError::InvalidIdentifier);
        }
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let lock = self.owner_lock(owner)?;
        let _owner_guard = lock
            .lock()
            .map_err(|_| LedgerError::storage("owner lock poisoned"))?;

        let mut entries = self
            .entries
            .write()
            .map_err(|_| LedgerError::storage("entry map poisoned"))?;

        if let Some(existing) = entries.get(id) {
            return Err(Self::duplicate_error(existing, owner));
        }

        if Self::spendable(&entries, owner) < amount {
            return Err(LedgerError::InsufficientFunds);
        }

        entries.insert(id.to_string(), LedgerEntry::new_withdrawal(owner, id, amount));
        Ok(())
    }

    async fn list_charges(&self, owner: &str) -> LedgerResult<Vec<LedgerEntry>> {
        self.entries_of(owner, EntryKind::Charge)
    }

    async fn list_withdrawals(&self, owner: &str) -> LedgerResult<Vec<LedgerEntry>> {
        self.entries_of(owner, EntryKind::Withdrawal)
    }

    async fn get_balance(&self, owner: &str) -> LedgerResult<Balance> {
        let entries = self
            .entries
            .read()
            .map_err(|_| LedgerError::storage("entry map poisoned"))?;

        let mut accrued = 0u64;
        let mut withdrawn = 0u64;
        for entry in entries.values().filter(|e| e.owner == owner) {
            match entry.kind {
                EntryKind::Charge if entry.status == EntryStatus::Processed => {
                    accrued += entry.amount;
                }
                EntryKind::Withdrawal => withdrawn += entry.amount,
                EntryKind::Charge => {}
            }
        }

        Ok(Balance {
            current: accrued.saturating_sub(withdrawn),
            withdrawn,
        })
    }

    async fn list_pending(&self, statuses: &[EntryStatus]) -> LedgerResult<Vec<LedgerEntry>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| LedgerError::storage("entry map poisoned"))?;

        let mut pending: Vec<LedgerEntry> = entries
            .values()
            .filter(|e| e.kind == EntryKind::Charge && statuses.contains(&e.status))
            .cloned()
            .collect();

        // Oldest first: bounds starvation of long-pending charges.
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(pending)
    }

    async fn apply_verdict(&self, id: &str, status: EntryStatus, amount: u64) -> LedgerResult<()> {
        // Entries are never removed, so the owner read stays valid after the
        // map lock is dropped and reacquired below.
        let owner = {
            let entries = self
                .entries
                .read()
                .map_err(|_| LedgerError::storage("entry map poisoned"))?;
            match entries.get(id) {
                Some(entry) => entry.owner.clone(),
                None => return Err(LedgerError::NotFound),
            }
        };

        let lock = self.owner_lock(&owner)?;
        let _owner_guard = lock
            .lock()
            .map_err(|_| LedgerError::storage("owner lock poisoned"))?;

        let mut entries = self
            .entries
            .write()
            .map_err(|_| LedgerError::storage("entry map poisoned"))?;

        let entry = entries.get_mut(id).ok_or(LedgerError::NotFound)?;
        if entry.status.is_terminal() {
            return Err(LedgerError::AlreadyTerminal);
        }

        entry.status = status;
        entry.amount = amount;
        entry.updated_at = chrono::Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use proptest::prelude::*;

    use super::*;
    use crate::store::LedgerStore;

    const ORDER: &str = "79927398713";

    /// Build a Luhn-valid order number from a seed.
    fn valid_order(seed: u64) -> String {
        let base = format!("{seed:010}");
        let mut sum = 0u32;
        let mut double = true;
        for ch in base.chars().rev() {
            let mut d = ch.to_digit(10).unwrap();
            if double {
                d *= 2;
                if d > 9 {
                    d -= 9;
                }
            }
            sum += d;
            double = !double;
        }
        format!("{base}{}", (10 - sum % 10) % 10)
    }

    async fn processed_charge(ledger: &MemoryLedger, owner: &str, id: &str, amount: u64) {
        ledger.submit_charge(owner, id).await.unwrap();
        ledger
            .apply_verdict(id, EntryStatus::Processed, amount)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn charge_submission_is_recorded_as_new() {
        let ledger = MemoryLedger::new();
        ledger.submit_charge("alice", ORDER).await.unwrap();

        let charges = ledger.list_charges("alice").await.unwrap();
        assert_eq!(charges.len(), 1);
        assert_eq!(charges[0].status, EntryStatus::New);
        assert_eq!(charges[0].amount, 0);
    }

    #[tokio::test]
    async fn invalid_order_numbers_are_rejected() {
        let ledger = MemoryLedger::new();
        assert_eq!(
            ledger.submit_charge("alice", "79927398710").await,
            Err(LedgerError::InvalidIdentifier)
        );
        assert_eq!(
            ledger.submit_withdrawal("alice", "abc123", 10).await,
            Err(LedgerError::InvalidIdentifier)
        );
        assert!(ledger.list_charges("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resubmission_distinguishes_owners() {
        let ledger = MemoryLedger::new();
        ledger.submit_charge("alice", ORDER).await.unwrap();

        assert_eq!(
            ledger.submit_charge("alice", ORDER).await,
            Err(LedgerError::AlreadyExistsSameOwner)
        );
        assert_eq!(
            ledger.submit_charge("bob", ORDER).await,
            Err(LedgerError::AlreadyExistsOtherOwner)
        );

        // Neither duplicate mutated anything.
        assert_eq!(ledger.list_charges("alice").await.unwrap().len(), 1);
        assert!(ledger.list_charges("bob").await.unwrap().is_empty());
        assert_eq!(ledger.get_balance("bob").await.unwrap(), Balance::default());
    }

    #[tokio::test]
    async fn unprocessed_charges_are_not_spendable() {
        let ledger = MemoryLedger::new();
        ledger.submit_charge("alice", ORDER).await.unwrap();
        ledger
            .apply_verdict(ORDER, EntryStatus::Processing, 0)
            .await
            .unwrap();

        assert_eq!(
            ledger
                .submit_withdrawal("alice", &valid_order(1), 1)
                .await,
            Err(LedgerError::InsufficientFunds)
        );
    }

    #[tokio::test]
    async fn withdrawal_respects_balance_and_is_final() {
        let ledger = MemoryLedger::new();
        processed_charge(&ledger, "alice", ORDER, 50_000).await;

        ledger
            .submit_withdrawal("alice", &valid_order(1), 50_000)
            .await
            .unwrap();

        let balance = ledger.get_balance("alice").await.unwrap();
        assert_eq!(balance.current, 0);
        assert_eq!(balance.withdrawn, 50_000);

        let withdrawals = ledger.list_withdrawals("alice").await.unwrap();
        assert_eq!(withdrawals.len(), 1);
        assert!(withdrawals[0].status.is_terminal());

        assert_eq!(
            ledger.submit_withdrawal("alice", &valid_order(2), 1).await,
            Err(LedgerError::InsufficientFunds)
        );
    }

    #[tokio::test]
    async fn overdraft_attempt_leaves_ledger_unchanged() {
        let ledger = MemoryLedger::new();
        processed_charge(&ledger, "alice", ORDER, 100).await;

        assert_eq!(
            ledger
                .submit_withdrawal("alice", &valid_order(1), 101)
                .await,
            Err(LedgerError::InsufficientFunds)
        );

        let balance = ledger.get_balance("alice").await.unwrap();
        assert_eq!(balance.current, 100);
        assert_eq!(balance.withdrawn, 0);
        assert!(ledger.list_withdrawals("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_amount_withdrawal_is_rejected() {
        let ledger = MemoryLedger::new();
        processed_charge(&ledger, "alice", ORDER, 100).await;
        assert_eq!(
            ledger.submit_withdrawal("alice", &valid_order(1), 0).await,
            Err(LedgerError::InvalidAmount)
        );
    }

    #[tokio::test]
    async fn listings_are_newest_first() {
        let ledger = MemoryLedger::new();
        for seed in 0..3u64 {
            ledger
                .submit_charge("alice", &valid_order(seed))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let charges = ledger.list_charges("alice").await.unwrap();
        assert_eq!(charges.len(), 3);
        assert!(charges.windows(2).all(|w| w[0].created_at >= w[1].created_at));
        assert_eq!(charges[0].id, valid_order(2));
    }

    #[tokio::test]
    async fn pending_listing_is_oldest_first_and_skips_withdrawals() {
        let ledger = MemoryLedger::new();
        for seed in 0..3u64 {
            ledger
                .submit_charge("alice", &valid_order(seed))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        ledger
            .apply_verdict(&valid_order(1), EntryStatus::Processed, 10_000)
            .await
            .unwrap();
        ledger
            .submit_withdrawal("alice", &valid_order(9), 1)
            .await
            .unwrap();

        let pending = ledger
            .list_pending(&[EntryStatus::New, EntryStatus::Processing])
            .await
            .unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, valid_order(0));
        assert_eq!(pending[1].id, valid_order(2));
        assert!(pending.iter().all(|e| e.kind == EntryKind::Charge));
    }

    #[tokio::test]
    async fn verdicts_never_overwrite_terminal_entries() {
        let ledger = MemoryLedger::new();
        processed_charge(&ledger, "alice", ORDER, 500).await;

        assert_eq!(
            ledger
                .apply_verdict(ORDER, EntryStatus::Invalid, 0)
                .await,
            Err(LedgerError::AlreadyTerminal)
        );

        let charges = ledger.list_charges("alice").await.unwrap();
        assert_eq!(charges[0].status, EntryStatus::Processed);
        assert_eq!(charges[0].amount, 500);
    }

    #[tokio::test]
    async fn verdict_for_unknown_order_is_not_found() {
        let ledger = MemoryLedger::new();
        assert_eq!(
            ledger.apply_verdict(ORDER, EntryStatus::Processed, 1).await,
            Err(LedgerError::NotFound)
        );
    }

    #[tokio::test]
    async fn unknown_owner_has_zero_balance_and_empty_listings() {
        let ledger = MemoryLedger::new();
        assert_eq!(
            ledger.get_balance("nobody").await.unwrap(),
            Balance::default()
        );
        assert!(ledger.list_charges("nobody").await.unwrap().is_empty());
        assert!(ledger.list_withdrawals("nobody").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_withdrawals_cannot_jointly_overdraw() {
        let ledger = Arc::new(MemoryLedger::new());
        processed_charge(&ledger, "alice", ORDER, 1_000).await;

        // Each individually fits; together they exceed the balance, so at
        // most one may succeed.
        let mut handles = Vec::new();
        for seed in 1..=4u64 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .submit_withdrawal("alice", &valid_order(seed), 600)
                    .await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => successes += 1,
                Err(LedgerError::InsufficientFunds) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(successes, 1);

        let balance = ledger.get_balance("alice").await.unwrap();
        assert_eq!(balance.current, 400);
        assert_eq!(balance.withdrawn, 600);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: current + withdrawn always equals the PROCESSED charge
        /// total, no matter which withdrawal attempts succeed.
        #[test]
        fn balance_conserves_processed_accruals(
            accruals in prop::collection::vec(1u64..100_000, 1..8),
            withdrawal_requests in prop::collection::vec(1u64..150_000, 0..8),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();

            rt.block_on(async {
                let ledger = MemoryLedger::new();
                let mut seed = 0u64;

                let mut processed_total = 0u64;
                for amount in &accruals {
                    let id = valid_order(seed);
                    seed += 1;
                    ledger.submit_charge("alice", &id).await.unwrap();
                    ledger
                        .apply_verdict(&id, EntryStatus::Processed, *amount)
                        .await
                        .unwrap();
                    processed_total += amount;
                }

                for amount in &withdrawal_requests {
                    let id = valid_order(seed);
                    seed += 1;
                    match ledger.submit_withdrawal("alice", &id, *amount).await {
                        Ok(()) | Err(LedgerError::InsufficientFunds) => {}
                        Err(other) => panic!("unexpected error: {other}"),
                    }
                }

                let balance = ledger.get_balance("alice").await.unwrap();
                assert_eq!(balance.current + balance.withdrawn, processed_total);
            });
        }
    }
}
