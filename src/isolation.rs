//! Post-hoc verification that a batch of test runs never shared state.

use std::collections::{BTreeSet, HashSet};

use crate::error::{PgcovError, Result};
use crate::model::TestRun;
use crate::pool::Pool;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IsolationViolationKind {
    DuplicateDatabaseName,
    DatabaseStillPresent,
    ConnectionLeak,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationViolation {
    pub kind: IsolationViolationKind,
    pub detail: String,
}

#[derive(Debug, Default)]
pub struct IsolationReport {
    pub violations: Vec<IsolationViolation>,
}

impl IsolationReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Verify uniqueness of database names, that every database was actually
/// dropped, and that no backend connection to it survives.
pub async fn verify(batch: &[TestRun], admin: &Pool) -> Result<IsolationReport> {
    let mut violations = Vec::new();
    let mut seen = HashSet::new();
    for run in batch {
        if !seen.insert(run.database.name.clone()) {
            violations.push(IsolationViolation {
                kind: IsolationViolationKind::DuplicateDatabaseName,
                detail: run.database.name.clone(),
            });
        }
    }

    for run in batch {
        if database_exists(admin, &run.database.name).await? {
            violations.push(IsolationViolation {
                kind: IsolationViolationKind::DatabaseStillPresent,
                detail: run.database.name.clone(),
            });
        }
        if connection_count(admin, &run.database.name).await? > 0 {
            violations.push(IsolationViolation {
                kind: IsolationViolationKind::ConnectionLeak,
                detail: run.database.name.clone(),
            });
        }
    }

    Ok(IsolationReport { violations })
}

/// Compare two runs of the same test, asserting the replay contract: same
/// status, different database names, identical observed signal set.
pub fn verify_stateless(a: &TestRun, b: &TestRun) -> bool {
    a.test == b.test && a.status == b.status && a.database.name != b.database.name && signal_id_set(a) == signal_id_set(b)
}

fn signal_id_set(run: &TestRun) -> BTreeSet<String> {
    run.signals.iter().map(|s| s.signal_id.clone()).collect()
}

async fn database_exists(admin: &Pool, name: &str) -> Result<bool> {
    let conn = admin.acquire().await?;
    let row = conn
        .query_one("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)", &[&name])
        .await
        .map_err(PgcovError::Database)?;
    Ok(row.get(0))
}

async fn connection_count(admin: &Pool, name: &str) -> Result<i64> {
    let conn = admin.acquire().await?;
    let row = conn
        .query_one("SELECT count(*) FROM pg_stat_activity WHERE datname = $1", &[&name])
        .await
        .map_err(PgcovError::Database)?;
    Ok(row.get(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CoverageSignal, TempDatabase, TestStatus};
    use chrono::Utc;
    use std::path::PathBuf;

    fn run(test: &str, db: &str, status: TestStatus, signal_ids: &[&str]) -> TestRun {
        let now = Utc::now();
        TestRun {
            test: PathBuf::from(test),
            database: TempDatabase {
                name: db.to_string(),
                created_at: now,
                connection_string: String::new(),
            },
            start_time: now,
            end_time: now,
            status,
            error: None,
            signals: signal_ids
                .iter()
                .map(|id| CoverageSignal {
                    signal_id: id.to_string(),
                    timestamp: now,
                })
                .collect(),
        }
    }

    #[test]
    fn stateless_replay_requires_distinct_databases_and_equal_signals() {
        let a = run("t.sql", "pgcov_test_a", TestStatus::Passed, &["0:1:2"]);
        let b = run("t.sql", "pgcov_test_b", TestStatus::Passed, &["0:1:2"]);
        assert!(verify_stateless(&a, &b));

        let same_db = run("t.sql", "pgcov_test_a", TestStatus::Passed, &["0:1:2"]);
        assert!(!verify_stateless(&a, &same_db));

        let different_signals = run("t.sql", "pgcov_test_b", TestStatus::Passed, &["0:1:3"]);
        assert!(!verify_stateless(&a, &different_signals));
    }

    #[test]
    fn is_clean_reflects_violation_presence() {
        let mut report = IsolationReport::default();
        assert!(report.is_clean());
        report.violations.push(IsolationViolation {
            kind: IsolationViolationKind::DuplicateDatabaseName,
            detail: "x".to_string(),
        });
        assert!(!report.is_clean());
    }
}
