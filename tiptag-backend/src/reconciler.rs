// Pending-tip reconciler
//
// Polls the payment provider for tips still waiting on a confirmation, and fails
// the ones that stayed pending past their time-to-live.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::LedgerError;
use crate::ledger::Ledger;
use crate::models::Tip;
use crate::payment::{PaymentProvider, PaymentStatus};

const BATCH_SIZE: i64 = 50;
const EXPIRED_REASON: &str = "payment confirmation timed out";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub completed: usize,
    pub failed: usize,
    pub still_pending: usize,
}

pub struct Reconciler {
    ledger: Ledger,
    provider: Arc<dyn PaymentProvider>,
    interval: Duration,
    pending_ttl: Duration,
}

impl Reconciler {
    pub fn new(
        ledger: Ledger,
        provider: Arc<dyn PaymentProvider>,
        interval: Duration,
        pending_ttl: Duration,
    ) -> Self {
        Self {
            ledger,
            provider,
            interval,
            pending_ttl,
        }
    }

    pub async fn run(&self) {
        info!(
            "Starting reconciler (interval {:?}, pending ttl {:?})",
            self.interval, self.pending_ttl
        );

        loop {
            match self.reconcile_once().await {
                Ok(report) if report != ReconcileReport::default() => {
                    info!(
                        "Reconciled pending tips: {} completed, {} failed, {} still pending",
                        report.completed, report.failed, report.still_pending
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Error reconciling pending tips: {}", e);
                }
            }

            tokio::time::sleep(self.interval).await;
        }
    }

    /// One pass over the oldest batch of pending tips
    pub async fn reconcile_once(&self) -> Result<ReconcileReport, LedgerError> {
        let pending = self.ledger.pending_tips(BATCH_SIZE).await?;
        let mut report = ReconcileReport::default();

        for tip in &pending {
            match self.reconcile_tip(tip).await {
                Ok(Outcome::Completed) => report.completed += 1,
                Ok(Outcome::Failed) => report.failed += 1,
                Ok(Outcome::Pending) => report.still_pending += 1,
                Err(e) => {
                    warn!("Failed to reconcile tip {}: {}", tip.id, e);
                    report.still_pending += 1;
                }
            }
        }

        Ok(report)
    }

    async fn reconcile_tip(&self, tip: &Tip) -> Result<Outcome, LedgerError> {
        let reference = tip.provider_reference.as_str();

        match self.provider.payment_status(reference).await {
            Ok(PaymentStatus::Succeeded) => {
                self.ledger.complete_tip(reference).await?;
                return Ok(Outcome::Completed);
            }
            Ok(PaymentStatus::Failed { reason }) => {
                self.ledger.fail_tip(reference, &reason).await?;
                return Ok(Outcome::Failed);
            }
            Ok(PaymentStatus::Pending) => {
                debug!("Tip {} still pending at provider", tip.id);
            }
            Err(e) => {
                warn!("Could not fetch status of {}: {}", reference, e);
            }
        }

        if self.is_expired(tip) {
            self.ledger.fail_tip(reference, EXPIRED_REASON).await?;
            return Ok(Outcome::Failed);
        }
        Ok(Outcome::Pending)
    }

    fn is_expired(&self, tip: &Tip) -> bool {
        let age = Utc::now().signed_duration_since(tip.created_at);
        age.to_std().map(|age| age > self.pending_ttl).unwrap_or(false)
    }
}

enum Outcome {
    Completed,
    Failed,
    Pending,
}
