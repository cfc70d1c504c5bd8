//! Per-test execution workflow: create a temp database, load instrumented
//! sources, run the test file, drain coverage signals, and unconditionally
//! tear the database back down.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, warn, Instrument};

use crate::error::PgcovError;
use crate::listener::Listener;
use crate::model::{CoverageSignal, InstrumentedSql, TempDatabase, TestRun, TestStatus};
use crate::pool::{self, Pool, TempDatabaseHandle};

/// How long to keep draining the listener for in-flight notifications
/// after the test body finishes.
const DRAIN_WINDOW: Duration = Duration::from_millis(100);
/// Deferred cleanup runs detached from the caller's cancellation, bounded
/// by this timeout so a stuck drop can never hang the batch forever.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Run one test file to completion and return its full [`TestRun`] record.
/// Errors from any step are attached to the returned run rather than
/// propagated — the caller always gets a result, never an `Err`.
pub async fn execute_test(
    admin: &Pool,
    sources: &[InstrumentedSql],
    test_path: &Path,
    cancel: &CancellationToken,
    timeout: Duration,
) -> TestRun {
    let span = info_span!("execute_test", test = %test_path.display());
    async move {
        let start_time = Utc::now();

        let handle = match pool::create_temp_database(admin).await {
            Ok(h) => h,
            Err(e) => {
                return TestRun {
                    test: test_path.to_path_buf(),
                    database: placeholder_database(test_path, start_time),
                    start_time,
                    end_time: Utc::now(),
                    status: TestStatus::Failed,
                    error: Some(e.to_string()),
                    signals: Vec::new(),
                };
            }
        };

        let database = handle.database.clone();
        let outcome = run_test_body(&handle, sources, test_path, cancel, timeout).await;

        let cleanup = tokio::time::timeout(CLEANUP_TIMEOUT, pool::destroy_temp_database(admin, handle)).await;
        match cleanup {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "temp database cleanup failed"),
            Err(_elapsed) => warn!("temp database cleanup timed out after {CLEANUP_TIMEOUT:?}"),
        }

        let end_time = Utc::now();
        match outcome {
            Ok(signals) => TestRun {
                test: test_path.to_path_buf(),
                database,
                start_time,
                end_time,
                status: TestStatus::Passed,
                error: None,
                signals,
            },
            Err((message, status)) => TestRun {
                test: test_path.to_path_buf(),
                database,
                start_time,
                end_time,
                status,
                error: Some(message),
                signals: Vec::new(),
            },
        }
    }
    .instrument(span)
    .await
}

async fn run_test_body(
    handle: &TempDatabaseHandle,
    sources: &[InstrumentedSql],
    test_path: &Path,
    cancel: &CancellationToken,
    timeout: Duration,
) -> Result<Vec<CoverageSignal>, (String, TestStatus)> {
    let mut listener = Listener::connect(handle.pool.config().clone())
        .await
        .map_err(|e| (e.to_string(), TestStatus::Failed))?;

    let mut signals = Vec::new();
    for source in sources {
        let conn = handle.pool.acquire().await.map_err(|e| (e.to_string(), TestStatus::Failed))?;
        conn.batch_execute(&source.instrumented_text)
            .await
            .map_err(|e| (e.to_string(), TestStatus::Failed))?;
        for point in &source.locations {
            if point.implicit_coverage {
                signals.push(CoverageSignal {
                    signal_id: point.signal_id.clone(),
                    timestamp: Utc::now(),
                });
            }
        }
    }

    let test_sql = tokio::fs::read_to_string(test_path)
        .await
        .map_err(|e| (PgcovError::Io(e).to_string(), TestStatus::Failed))?;

    let run_result = tokio::time::timeout(timeout, run_statement(handle, &test_sql)).await;
    match run_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err((e.to_string(), TestStatus::Failed)),
        Err(_elapsed) => return Err((format!("test exceeded {timeout:?} timeout"), TestStatus::Timeout)),
    }

    let drained = listener.collect_signals(DRAIN_WINDOW, cancel).await;
    signals.extend(drained);
    listener.close().await;

    Ok(signals)
}

async fn run_statement(handle: &TempDatabaseHandle, sql: &str) -> Result<(), PgcovError> {
    let conn = handle.pool.acquire().await?;
    conn.batch_execute(sql).await.map_err(PgcovError::Database)
}

fn placeholder_database(test_path: &Path, created_at: chrono::DateTime<Utc>) -> TempDatabase {
    TempDatabase {
        name: format!("<unavailable:{}>", test_path.display()),
        created_at,
        connection_string: String::new(),
    }
}

/// A synthetic failed run for a test that was never dispatched because
/// cancellation fired first. Keeps the worker pool's result count equal to
/// the input test count.
pub(crate) fn cancelled_test_run(test_path: &Path) -> TestRun {
    let now = Utc::now();
    TestRun {
        test: test_path.to_path_buf(),
        database: placeholder_database(test_path, now),
        start_time: now,
        end_time: now,
        status: TestStatus::Failed,
        error: Some("cancelled before dispatch".to_string()),
        signals: Vec::new(),
    }
}
