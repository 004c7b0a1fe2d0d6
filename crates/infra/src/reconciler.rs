//! Reconciliation worker.
//!
//! A single background task polls the ledger for pending charges on a fixed
//! interval, asks the accrual service for verdicts and writes them back.
//! Ticks never overlap: the loop is one task, and a tick that runs long
//! simply delays the next one. Per-entry failures are logged and the entry
//! stays pending for the next tick; nothing in here is fatal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use loyalty_core::{EntryStatus, LedgerEntry, LedgerError, money};
use loyalty_ledger::LedgerStore;

use crate::accrual::VerdictSource;

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// How often to poll for pending charges.
    pub poll_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Periodic reconciliation of pending charges against the accrual service.
pub struct Reconciler<L, V> {
    ledger: Arc<L>,
    source: Arc<V>,
    config: ReconcilerConfig,
}

impl<L, V> Reconciler<L, V>
where
    L: LedgerStore + 'static,
    V: VerdictSource + 'static,
{
    pub fn new(ledger: Arc<L>, source: Arc<V>, config: ReconcilerConfig) -> Self {
        Self {
            ledger,
            source,
            config,
        }
    }

    /// Spawn the worker task and return its control handle.
    pub fn start(self) -> ReconcilerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let join = tokio::spawn(run_loop(self.ledger, self.source, self.config, stop_rx));
        ReconcilerHandle {
            stop: stop_tx,
            join: Some(join),
        }
    }
}

/// Handle to control and join the running worker.
///
/// The stop signal travels over a watch channel, so it is retained whatever
/// the timing: requesting shutdown before the loop ever polls still stops it.
/// Consuming the handle makes a second stop unrepresentable, and dropping it
/// without calling [`shutdown`](Self::shutdown) also terminates the loop
/// (without waiting for it).
#[derive(Debug)]
pub struct ReconcilerHandle {
    stop: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl ReconcilerHandle {
    /// Request graceful shutdown and wait for the worker to finish.
    ///
    /// Any in-flight verdict application completes before this returns; no
    /// ledger mutation happens afterwards.
    pub async fn shutdown(mut self) {
        let _ = self.stop.send(true);
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

async fn run_loop<L: LedgerStore, V: VerdictSource>(
    ledger: Arc<L>,
    source: Arc<V>,
    config: ReconcilerConfig,
    mut stop: watch::Receiver<bool>,
) {
    info!(interval_ms = config.poll_interval.as_millis() as u64, "reconciliation worker started");

    let mut ticker = tokio::time::interval(config.poll_interval);
    // A long tick delays the next one instead of bursting to catch up.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // Resolves on a stop request, or when the handle is dropped.
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                run_tick(&*ledger, &*source, &stop).await;
                if *stop.borrow() {
                    break;
                }
            }
        }
    }

    info!("reconciliation worker stopped");
}

/// One polling pass over all pending charges.
async fn run_tick<L: LedgerStore, V: VerdictSource>(
    ledger: &L,
    source: &V,
    stop: &watch::Receiver<bool>,
) {
    let pending = match ledger
        .list_pending(&[EntryStatus::New, EntryStatus::Processing])
        .await
    {
        Ok(pending) => pending,
        Err(err) => {
            warn!(error = %err, "failed to list pending charges");
            return;
        }
    };

    if pending.is_empty() {
        debug!("no pending charges");
        return;
    }

    debug!(count = pending.len(), "reconciling pending charges");
    for entry in &pending {
        // Entries left behind stay pending and are picked up on restart.
        if *stop.borrow() {
            debug!("shutdown requested mid-tick");
            return;
        }
        reconcile_entry(ledger, source, entry).await;
    }
}

async fn reconcile_entry<L: LedgerStore, V: VerdictSource>(
    ledger: &L,
    source: &V,
    entry: &LedgerEntry,
) {
    let verdict = match source.fetch_verdict(&entry.id).await {
        Ok(Some(verdict)) => verdict,
        Ok(None) => {
            debug!(order = %entry.id, "order not yet known upstream");
            return;
        }
        Err(err) => {
            warn!(order = %entry.id, error = %err, "verdict fetch failed, retrying next tick");
            return;
        }
    };

    let status = verdict.status.as_entry_status();
    if status == entry.status {
        debug!(order = %entry.id, status = ?status, "status unchanged");
        return;
    }

    let amount = match verdict.accrual {
        Some(decimal) => match money::external_to_minor_units(decimal) {
            Ok(minor) => minor,
            Err(err) => {
                warn!(order = %entry.id, accrual = decimal, error = %err,
                    "accrual amount not representable, leaving order pending");
                return;
            }
        },
        None => 0,
    };

    match ledger.apply_verdict(&entry.id, status, amount).await {
        Ok(()) => {
            info!(order = %entry.id, status = ?status, amount, "verdict applied");
        }
        Err(LedgerError::AlreadyTerminal) => {
            debug!(order = %entry.id, "entry reached terminal status meanwhile, verdict ignored");
        }
        Err(LedgerError::NotFound) => {
            debug!(order = %entry.id, "entry unknown to ledger, verdict dropped");
        }
        Err(err) => {
            warn!(order = %entry.id, error = %err, "failed to apply verdict, retrying next tick");
        }
    }
}
