//! Ledger entry types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What an entry does to the owner's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryKind {
    /// A submitted purchase order awaiting/holding an accrual verdict.
    Charge,
    /// A spend of accumulated points; final at creation.
    Withdrawal,
}

impl EntryKind {
    /// Storage representation (`kind` column).
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Charge => "CHARGE",
            EntryKind::Withdrawal => "WITHDRAWAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CHARGE" => Some(EntryKind::Charge),
            "WITHDRAWAL" => Some(EntryKind::Withdrawal),
            _ => None,
        }
    }
}

/// Accrual lifecycle of a charge. Meaningful only for [`EntryKind::Charge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryStatus {
    New,
    Processing,
    Invalid,
    Processed,
}

impl EntryStatus {
    /// INVALID and PROCESSED entries never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, EntryStatus::Invalid | EntryStatus::Processed)
    }

    /// Storage representation (`status` column).
    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::New => "NEW",
            EntryStatus::Processing => "PROCESSING",
            EntryStatus::Invalid => "INVALID",
            EntryStatus::Processed => "PROCESSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEW" => Some(EntryStatus::New),
            "PROCESSING" => Some(EntryStatus::Processing),
            "INVALID" => Some(EntryStatus::Invalid),
            "PROCESSED" => Some(EntryStatus::Processed),
            _ => None,
        }
    }
}

/// One ledger record: a charge or a withdrawal.
///
/// `id` is the externally supplied order number and is unique across all
/// owners. `amount` is held in minor units and stays zero for a charge until
/// the accrual verdict arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub owner: String,
    pub kind: EntryKind,
    pub status: EntryStatus,
    pub amount: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// A freshly submitted charge: status NEW, amount zero.
    pub fn new_charge(owner: impl Into<String>, id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            owner: owner.into(),
            kind: EntryKind::Charge,
            status: EntryStatus::New,
            amount: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// A withdrawal entry; withdrawals are final at creation.
    pub fn new_withdrawal(
        owner: impl Into<String>,
        id: impl Into<String>,
        amount: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            owner: owner.into(),
            kind: EntryKind::Withdrawal,
            status: EntryStatus::Processed,
            amount,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Aggregated point position of one owner, in minor units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// PROCESSED charge total minus withdrawal total.
    pub current: u64,
    /// Withdrawal total.
    pub withdrawn: u64,
}
