//! Infrastructure layer: Postgres-backed ledger, accrual service client,
//! reconciliation worker, configuration and observability wiring.

pub mod accrual;
pub mod config;
pub mod observability;
pub mod postgres;
pub mod reconciler;

pub use accrual::{AccrualClient, AccrualClientConfig, AccrualError, AccrualVerdict, VerdictSource};
pub use config::ServiceConfig;
pub use postgres::PostgresLedger;
pub use reconciler::{Reconciler, ReconcilerConfig, ReconcilerHandle};
