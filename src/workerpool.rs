//! Bounded-parallel dispatch of the test batch.
//!
//! `execute_parallel` always returns exactly `tests.len()` results, in
//! input order, regardless of dispatch order or cancellation. With
//! `workers <= 1` or a single test it degrades to plain sequential
//! execution — no channels, no extra tasks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::executor::{self, cancelled_test_run};
use crate::model::{InstrumentedSql, TestRun};
use crate::pool::Pool;

pub async fn execute_parallel(
    admin: Arc<Pool>,
    sources: Arc<[InstrumentedSql]>,
    tests: &[PathBuf],
    workers: usize,
    timeout: Duration,
    cancel: CancellationToken,
) -> Vec<TestRun> {
    if workers <= 1 || tests.len() <= 1 {
        let mut out = Vec::with_capacity(tests.len());
        for test in tests {
            if cancel.is_cancelled() {
                out.push(cancelled_test_run(test));
            } else {
                out.push(executor::execute_test(&admin, &sources, test, &cancel, timeout).await);
            }
        }
        return out;
    }

    let (job_tx, job_rx) = mpsc::channel::<(usize, PathBuf)>(tests.len());
    for (idx, test) in tests.iter().enumerate() {
        job_tx.send((idx, test.clone())).await.expect("job channel receiver held below");
    }
    drop(job_tx);
    let job_rx = Arc::new(Mutex::new(job_rx));

    let (result_tx, mut result_rx) = mpsc::channel::<(usize, TestRun)>(tests.len());

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let job_rx = job_rx.clone();
        let result_tx = result_tx.clone();
        let admin = admin.clone();
        let sources = sources.clone();
        let cancel = cancel.clone();

        handles.push(tokio::spawn(async move {
            loop {
                let job = {
                    let mut rx = job_rx.lock().await;
                    rx.recv().await
                };
                let Some((idx, test)) = job else { break };

                let run = if cancel.is_cancelled() {
                    cancelled_test_run(&test)
                } else {
                    executor::execute_test(&admin, &sources, &test, &cancel, timeout).await
                };
                if result_tx.send((idx, run)).await.is_err() {
                    break;
                }
            }
        }));
    }
    drop(result_tx);

    for handle in handles {
        let _ = handle.await;
    }

    let mut results: Vec<Option<TestRun>> = (0..tests.len()).map(|_| None).collect();
    while let Some((idx, run)) = result_rx.recv().await {
        results[idx] = Some(run);
    }
    results
        .into_iter()
        .enumerate()
        .map(|(idx, r)| r.unwrap_or_else(|| cancelled_test_run(&tests[idx])))
        .collect()
}
