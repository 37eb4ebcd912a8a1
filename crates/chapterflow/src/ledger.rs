//! Points accounting around a job's life.
//!
//! A job is charged at most once, and only after extraction has produced
//! pages. A job that ends `failed` after being charged gets exactly one
//! refund. Summed per job, the ledger is therefore always `0` or `-cost`.

use log::{info, warn};

use crate::db::ledger_repo::{self, ChargeOutcome};
use crate::db::{user_repo, Database};
use crate::error::{ChapterflowError, Result};
use crate::pipeline::job::Job;

#[derive(Clone)]
pub struct LedgerReconciler {
    db: Database,
}

impl LedgerReconciler {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn balance(&self, user_id: &str) -> Result<i64> {
        let balance = self
            .db
            .with_conn(|conn| user_repo::balance(conn, user_id))?
            .ok_or_else(|| ChapterflowError::Forbidden {
                reason: format!("unknown principal '{}'", user_id),
            })?;
        Ok(balance)
    }

    /// Rejects a submission up front when the balance cannot cover `cost`.
    /// Nothing is written either way.
    pub fn precheck(&self, user_id: &str, cost: i64) -> Result<()> {
        if cost <= 0 {
            return Ok(());
        }
        let current = self.balance(user_id)?;
        if current < cost {
            return Err(ChapterflowError::InsufficientBalance {
                required: cost,
                current,
            });
        }
        Ok(())
    }

    /// Debits the job's cost. Returns `false` when the job had already been
    /// charged. Fails with `InsufficientBalance` if the balance dropped
    /// below the cost since the precheck; in that case nothing is written.
    pub fn charge(&self, job: &Job) -> Result<bool> {
        if job.cost <= 0 {
            return Ok(false);
        }

        match ledger_repo::charge(&self.db, &job.owner_id, &job.id, job.cost)? {
            ChargeOutcome::Charged => {
                info!("Charged {} points for job {}", job.cost, job.id);
                Ok(true)
            }
            ChargeOutcome::AlreadyCharged => {
                warn!("Job {} was already charged; skipping", job.id);
                Ok(false)
            }
            ChargeOutcome::Insufficient { current } => Err(ChapterflowError::InsufficientBalance {
                required: job.cost,
                current,
            }),
        }
    }

    /// Credits the cost back for a charged job. Returns `false` if there was
    /// nothing to refund (never charged, or refunded before).
    pub fn refund(&self, job: &Job) -> Result<bool> {
        if job.cost <= 0 {
            return Ok(false);
        }

        let refunded = ledger_repo::refund(&self.db, &job.owner_id, &job.id, job.cost)?;
        if refunded {
            info!("Refunded {} points for job {}", job.cost, job.id);
        }
        Ok(refunded)
    }

    /// Signed sum of ledger entries for the job.
    pub fn job_total(&self, job_id: &str) -> Result<i64> {
        Ok(ledger_repo::job_total(&self.db, job_id)?)
    }
}
