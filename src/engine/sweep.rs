//! Periodic offer scheduling.
//!
//! Each tick settles refunds first, then visits every distributable lead:
//! due eligibility passes are resolved, overdue offers expired and the next
//! candidate offered. Expiry is only observed at tick time, so an offer may
//! outlive its deadline by up to one sweep interval.
//!
//! Leads are processed in parallel by a bounded worker pool. A lead that
//! lost a version race is left for the next tick.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::model::LeadId;

use super::{EngineError, LeadEngine, LeadSweep, RefundSweep};

/// Totals of one sweep over the whole engine.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub refunds: RefundSweep,
    pub leads: usize,
    pub offered: usize,
    pub expired: usize,
    pub exhausted: usize,
    pub deferred: usize,
    pub failed: usize,
}

impl SweepReport {
    fn record(&mut self, lead: LeadId, result: Result<LeadSweep, EngineError>) {
        self.leads += 1;
        match result {
            Ok(outcome) => {
                self.offered += usize::from(outcome.offered);
                self.expired += usize::from(outcome.expired);
                self.exhausted += usize::from(outcome.exhausted);
                self.deferred += usize::from(outcome.deferred);
            }
            Err(e) if e.is_conflict() => {
                self.deferred += 1;
                debug!(lead = %lead, reason = %e, "lead changed during sweep");
            }
            Err(e) => {
                self.failed += 1;
                warn!(lead = %lead, reason = %e, "lead sweep failed");
            }
        }
    }

    /// Nothing happened.
    pub fn is_idle(&self) -> bool {
        self.refunds == RefundSweep::default()
            && self.offered == 0
            && self.expired == 0
            && self.exhausted == 0
            && self.failed == 0
    }
}

impl LeadEngine {
    /// One full sweep on the calling thread.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport {
            refunds: self.sweep_refunds(now),
            ..SweepReport::default()
        };
        for lead in self.store.distributable_leads() {
            report.record(lead, self.sweep_lead(lead, now));
        }
        report
    }
}

/// Drives sweeps on the tokio runtime.
pub struct Scheduler {
    engine: Arc<LeadEngine>,
    workers: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(engine: Arc<LeadEngine>) -> Self {
        let workers = Arc::new(Semaphore::new(engine.config().sweep_workers.max(1)));
        Self { engine, workers }
    }

    /// One sweep with leads fanned out over the worker pool.
    pub async fn tick(&self, now: DateTime<Utc>) -> SweepReport {
        let engine = self.engine.clone();
        let refunds = match tokio::task::spawn_blocking(move || engine.sweep_refunds(now)).await {
            Ok(refunds) => refunds,
            Err(e) => {
                warn!(reason = %e, "refund sweep aborted");
                RefundSweep {
                    failed: 1,
                    ..RefundSweep::default()
                }
            }
        };
        let mut report = SweepReport {
            refunds,
            ..SweepReport::default()
        };

        let mut tasks = JoinSet::new();
        for lead in self.engine.store.distributable_leads() {
            let Ok(permit) = self.workers.clone().acquire_owned().await else {
                break;
            };
            let engine = self.engine.clone();
            tasks.spawn_blocking(move || {
                let _permit = permit;
                (lead, engine.sweep_lead(lead, now))
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((lead, result)) => report.record(lead, result),
                Err(e) => {
                    report.leads += 1;
                    report.failed += 1;
                    warn!(reason = %e, "lead sweep task aborted");
                }
            }
        }
        report
    }

    /// Tick every `sweep_interval` until `shutdown` resolves.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        let mut interval = tokio::time::interval(self.engine.config().sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("scheduler stopped");
                    return;
                }
                _ = interval.tick() => {
                    let report = self.tick(Utc::now()).await;
                    if !report.is_idle() {
                        info!(?report, "sweep");
                    }
                }
            }
        }
    }
}
