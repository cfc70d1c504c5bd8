//! Core data model shared across the pipeline.
//!
//! Types here are intentionally dumb: construction and validation live in
//! the component that produces each value ([`crate::parser`],
//! [`crate::instrument`], [`crate::executor`], ...). Everything is
//! immutable after construction except [`Coverage`], which the
//! [`crate::collector::Collector`] mutates under a mutex.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a top-level statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementType {
    Function,
    Procedure,
    Trigger,
    View,
    Do,
    Other,
    Unknown,
}

/// One `;`-terminated top-level statement, in source order.
#[derive(Debug, Clone)]
pub struct Statement {
    pub raw_sql: String,
    pub start_pos: usize,
    pub start_line: u32,
    pub end_line: u32,
    pub stmt_type: StatementType,
    pub language: Option<String>,
    /// Unquoted function/procedure/DO body, if any.
    pub body: Option<String>,
    /// Offset of `body`'s first byte within `raw_sql`.
    pub body_start: Option<usize>,
}

impl Statement {
    /// Byte offset of the body's start within the *whole source file*
    /// (`start_pos + body_start`).
    pub fn absolute_body_start(&self) -> Option<usize> {
        self.body_start.map(|b| self.start_pos + b)
    }
}

/// A parsed source file: its path and its statements in source order.
#[derive(Debug, Clone)]
pub struct ParsedSql {
    pub file: PathBuf,
    pub statements: Vec<Statement>,
}

/// A single coverage-point definition, carrying its own wire-format id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoveragePoint {
    pub file: PathBuf,
    pub start_pos: usize,
    pub length: usize,
    pub branch: Option<u32>,
    pub signal_id: String,
    /// Implicit points are counted covered when the containing DDL/DML
    /// statement executes successfully; no probe is emitted for them.
    pub implicit_coverage: bool,
}

/// The output of instrumentation for one source file.
#[derive(Debug, Clone)]
pub struct InstrumentedSql {
    pub original: ParsedSql,
    pub instrumented_text: String,
    pub locations: Vec<CoveragePoint>,
}

/// An ephemeral, single-test-owned PostgreSQL database.
#[derive(Debug, Clone)]
pub struct TempDatabase {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub connection_string: String,
}

/// One observed execution of a coverage point, explicit or synthesized.
#[derive(Debug, Clone)]
pub struct CoverageSignal {
    pub signal_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Outcome status of a single test file's execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Timeout,
}

/// The full record of one test file's execution.
#[derive(Debug, Clone)]
pub struct TestRun {
    pub test: PathBuf,
    pub database: TempDatabase,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: TestStatus,
    pub error: Option<String>,
    pub signals: Vec<CoverageSignal>,
}

/// Aggregated coverage, as persisted to disk.
///
/// `positions[file]["<startPos>:<length>"] = hitCount`. `BTreeMap` is used
/// rather than a hash map so serialization order is stable across runs
/// without a separate sort pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub positions: BTreeMap<String, BTreeMap<String, u64>>,
}

impl Coverage {
    pub fn new() -> Self {
        Coverage {
            version: "1.0".to_string(),
            timestamp: Utc::now(),
            positions: BTreeMap::new(),
        }
    }

    /// Fraction of positions in `file` with a non-zero hit count, `0..=100`.
    pub fn file_percent(&self, file: &str) -> f64 {
        match self.positions.get(file) {
            Some(points) if !points.is_empty() => {
                let covered = points.values().filter(|&&h| h > 0).count();
                (covered as f64 / points.len() as f64) * 100.0
            }
            _ => 0.0,
        }
    }

    /// Fraction of positions across all files with a non-zero hit count.
    pub fn total_percent(&self) -> f64 {
        let mut covered = 0usize;
        let mut total = 0usize;
        for points in self.positions.values() {
            total += points.len();
            covered += points.values().filter(|&&h| h > 0).count();
        }
        if total == 0 {
            0.0
        } else {
            (covered as f64 / total as f64) * 100.0
        }
    }
}

impl Default for Coverage {
    fn default() -> Self {
        Self::new()
    }
}
