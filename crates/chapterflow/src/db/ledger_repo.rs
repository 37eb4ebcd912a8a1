//! Ledger entries and the transactional charge/refund primitives.
//!
//! A charge is: debit the user (only if the balance covers it), flip the
//! job's `cost_charged` flag, write a negative entry. A refund is: flip
//! `cost_refunded` (only if charged and not yet refunded), credit the
//! user, write a positive entry. Each runs in one transaction, so the
//! flags and the entries can never disagree.

use chrono::Utc;
use rusqlite::{params, Connection, Row};

use super::{job_repo, user_repo, Database, DatabaseError};

pub const REASON_CHARGE: &str = "translation_charge";
pub const REASON_REFUND: &str = "translation_refund";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: i64,
    pub user_id: String,
    pub amount: i64,
    pub reason: String,
    pub job_id: Option<String>,
    pub created_at: String,
}

impl LedgerEntry {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            amount: row.get("amount")?,
            reason: row.get("reason")?,
            job_id: row.get("job_id")?,
            created_at: row.get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeOutcome {
    Charged,
    /// The job already carries a charge; nothing changed.
    AlreadyCharged,
    /// The balance does not cover the cost; nothing changed.
    Insufficient { current: i64 },
}

fn insert_entry(
    conn: &Connection,
    user_id: &str,
    amount: i64,
    reason: &str,
    job_id: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO ledger_entries (user_id, amount, reason, job_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![user_id, amount, reason, job_id, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

pub fn charge(
    db: &Database,
    user_id: &str,
    job_id: &str,
    cost: i64,
) -> Result<ChargeOutcome, DatabaseError> {
    db.with_transaction(|tx| {
        let current = user_repo::balance(tx, user_id)?.ok_or_else(|| DatabaseError::MissingRow {
            table: "users",
            id: user_id.to_string(),
        })?;

        if !user_repo::deduct(tx, user_id, cost)? {
            return Ok(ChargeOutcome::Insufficient { current });
        }

        if !job_repo::mark_charged(tx, job_id)? {
            // Lost the race to another charge for this job: put the points back.
            user_repo::credit(tx, user_id, cost)?;
            return Ok(ChargeOutcome::AlreadyCharged);
        }

        insert_entry(tx, user_id, -cost, REASON_CHARGE, job_id)?;
        Ok(ChargeOutcome::Charged)
    })
}

/// Returns `true` if a refund was written, `false` if the job was never
/// charged or was already refunded.
pub fn refund(
    db: &Database,
    user_id: &str,
    job_id: &str,
    cost: i64,
) -> Result<bool, DatabaseError> {
    db.with_transaction(|tx| {
        if !job_repo::mark_refunded(tx, job_id)? {
            return Ok(false);
        }
        user_repo::credit(tx, user_id, cost)?;
        insert_entry(tx, user_id, cost, REASON_REFUND, job_id)?;
        Ok(true)
    })
}

/// Signed sum of all entries referencing the job.
pub fn job_total(db: &Database, job_id: &str) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM ledger_entries WHERE job_id = ?1",
            params![job_id],
            |r| r.get(0),
        )?)
    })
}

pub fn list_for_job(db: &Database, job_id: &str) -> Result<Vec<LedgerEntry>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM ledger_entries WHERE job_id = ?1 ORDER BY id ASC")?;
        let entries = stmt
            .query_map(params![job_id], LedgerEntry::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::user_repo::NewUser;
    use crate::pipeline::job::{Job, JobKind};

    fn setup(points: i64) -> (Database, Job) {
        let db = Database::open_in_memory().unwrap();
        user_repo::create(
            &db,
            &NewUser {
                id: Some("u1".to_string()),
                username: "reader".to_string(),
                points: Some(points),
                is_privileged: false,
            },
        )
        .unwrap();
        let job = Job::new(JobKind::Translate, "u1", "vol1.cbz", 20);
        job_repo::insert(&db, &job).unwrap();
        (db, job)
    }

    fn balance_of(db: &Database) -> i64 {
        db.with_conn(|conn| user_repo::balance(conn, "u1"))
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_charge_debits_and_records() {
        let (db, job) = setup(100);
        assert_eq!(
            charge(&db, "u1", &job.id, 20).unwrap(),
            ChargeOutcome::Charged
        );
        assert_eq!(balance_of(&db), 80);
        assert_eq!(job_total(&db, &job.id).unwrap(), -20);

        let entries = list_for_job(&db, &job.id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].reason, REASON_CHARGE);
    }

    #[test]
    fn test_second_charge_is_noop() {
        let (db, job) = setup(100);
        charge(&db, "u1", &job.id, 20).unwrap();
        assert_eq!(
            charge(&db, "u1", &job.id, 20).unwrap(),
            ChargeOutcome::AlreadyCharged
        );
        assert_eq!(balance_of(&db), 80);
        assert_eq!(job_total(&db, &job.id).unwrap(), -20);
    }

    #[test]
    fn test_insufficient_balance_changes_nothing() {
        let (db, job) = setup(10);
        assert_eq!(
            charge(&db, "u1", &job.id, 20).unwrap(),
            ChargeOutcome::Insufficient { current: 10 }
        );
        assert_eq!(balance_of(&db), 10);
        assert_eq!(job_total(&db, &job.id).unwrap(), 0);
        assert!(!job_repo::find_by_id(&db, &job.id).unwrap().unwrap().cost_charged);
    }

    #[test]
    fn test_refund_without_charge_is_noop() {
        let (db, job) = setup(100);
        assert!(!refund(&db, "u1", &job.id, 20).unwrap());
        assert_eq!(balance_of(&db), 100);
        assert_eq!(job_total(&db, &job.id).unwrap(), 0);
    }

    #[test]
    fn test_refund_happens_once() {
        let (db, job) = setup(100);
        charge(&db, "u1", &job.id, 20).unwrap();

        assert!(refund(&db, "u1", &job.id, 20).unwrap());
        assert!(!refund(&db, "u1", &job.id, 20).unwrap());

        assert_eq!(balance_of(&db), 100);
        assert_eq!(job_total(&db, &job.id).unwrap(), 0);
        assert_eq!(list_for_job(&db, &job.id).unwrap().len(), 2);
    }

    #[test]
    fn test_charge_unknown_user() {
        let (db, job) = setup(100);
        assert!(matches!(
            charge(&db, "ghost", &job.id, 20),
            Err(DatabaseError::MissingRow { .. })
        ));
    }
}
