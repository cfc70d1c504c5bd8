//! Error types for pgcov.
//!
//! All errors that can occur within the engine are represented by
//! [`PgcovError`]. Errors are propagated via `Result<T, PgcovError>`
//! throughout the codebase and mapped to a process exit code at the CLI
//! boundary via [`PgcovError::exit_code`].
//!
//! # Error Classification
//!
//! Errors fall into a fixed set of classes. Some
//! terminate the whole run (configuration, connection, pool construction);
//! others are attached to a single [`crate::model::TestRun`] and let the
//! batch continue.
//!
//! - **Config** — bad flags/env. Never retried, exit code 2.
//! - **Connection** — admin pool could not be established. Terminates the run.
//! - **Parse** — a source file failed to lex/parse. That file is skipped.
//! - **Instrumentation** — a statement could not be instrumented. That
//!   file's implicit coverage is lost but the run continues.
//! - **TestFailure** / **Timeout** — attached to a single `TestRun`.
//! - **Cleanup** — non-fatal, but flagged by the isolation guard.

use std::fmt;

/// Primary error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum PgcovError {
    /// A configuration value was missing or invalid.
    #[error("configuration error: field `{field}` {problem}{}", suggestion.as_deref().map(|s| format!(" ({s})")).unwrap_or_default())]
    Config {
        field: String,
        problem: String,
        suggestion: Option<String>,
    },

    /// The admin connection/pool could not be established.
    #[error("connection error: could not reach {host}:{port}: {message}{}", suggestion.as_deref().map(|s| format!(" ({s})")).unwrap_or_default())]
    Connection {
        host: String,
        port: u16,
        message: String,
        suggestion: Option<String>,
    },

    /// A source file could not be lexed or parsed.
    #[error("parse error in {file}:{line}:{column}: {message}")]
    Parse {
        file: String,
        line: u32,
        column: u32,
        message: String,
    },

    /// A statement could not be instrumented.
    #[error("instrumentation error in {file}: {message}")]
    Instrumentation { file: String, message: String },

    /// A test's SQL failed with a server-side error.
    #[error("test failure in {test}: {sqlstate} {message}")]
    TestFailure {
        test: String,
        sqlstate: String,
        message: String,
    },

    /// Cleanup (temp database drop / backend termination) failed.
    #[error("cleanup error for database {database}: {cause}")]
    Cleanup { database: String, cause: String },

    /// A test exceeded its configured timeout.
    #[error("test {test} timed out after {elapsed_ms}ms")]
    Timeout { test: String, elapsed_ms: u64 },

    /// A signal id could not be parsed.
    #[error("signal codec error: {0}")]
    SignalCodec(#[from] crate::signal::SignalCodecError),

    /// Underlying database driver error, not otherwise classified.
    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// Underlying filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Coverage store (de)serialization error.
    #[error("coverage store error: {0}")]
    Store(#[from] serde_json::Error),
}

impl PgcovError {
    /// Construct a [`PgcovError::Config`] without a suggestion.
    pub fn config(field: impl Into<String>, problem: impl Into<String>) -> Self {
        PgcovError::Config {
            field: field.into(),
            problem: problem.into(),
            suggestion: None,
        }
    }

    /// Construct a [`PgcovError::Config`] with a human-facing suggestion.
    pub fn config_with_suggestion(
        field: impl Into<String>,
        problem: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        PgcovError::Config {
            field: field.into(),
            problem: problem.into(),
            suggestion: Some(suggestion.into()),
        }
    }

    /// Classify the error for monitoring/reporting.
    pub fn kind(&self) -> PgcovErrorKind {
        match self {
            PgcovError::Config { .. } => PgcovErrorKind::Config,
            PgcovError::Connection { .. } => PgcovErrorKind::Connection,
            PgcovError::Parse { .. } => PgcovErrorKind::Parse,
            PgcovError::Instrumentation { .. } => PgcovErrorKind::Instrumentation,
            PgcovError::TestFailure { .. } => PgcovErrorKind::TestFailure,
            PgcovError::Cleanup { .. } => PgcovErrorKind::Cleanup,
            PgcovError::Timeout { .. } => PgcovErrorKind::Timeout,
            PgcovError::SignalCodec(_) => PgcovErrorKind::SignalCodec,
            PgcovError::Database(_) => PgcovErrorKind::Database,
            PgcovError::Io(_) => PgcovErrorKind::Io,
            PgcovError::Store(_) => PgcovErrorKind::Store,
        }
    }

    /// Whether this error is fatal to the whole run (vs. attachable to a
    /// single `TestRun` while the rest of the batch proceeds).
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            PgcovError::Config { .. } | PgcovError::Connection { .. }
        )
    }

    /// The process exit code this error should produce when it escapes to
    /// the CLI boundary: 0 success, 1 test/runtime failure, 2 configuration
    /// error.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            PgcovErrorKind::Config => 2,
            _ => 1,
        }
    }
}

/// Classification of error kind, used for monitoring/reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgcovErrorKind {
    Config,
    Connection,
    Parse,
    Instrumentation,
    TestFailure,
    Cleanup,
    Timeout,
    SignalCodec,
    Database,
    Io,
    Store,
}

impl fmt::Display for PgcovErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PgcovErrorKind::Config => "CONFIG",
            PgcovErrorKind::Connection => "CONNECTION",
            PgcovErrorKind::Parse => "PARSE",
            PgcovErrorKind::Instrumentation => "INSTRUMENTATION",
            PgcovErrorKind::TestFailure => "TEST_FAILURE",
            PgcovErrorKind::Cleanup => "CLEANUP",
            PgcovErrorKind::Timeout => "TIMEOUT",
            PgcovErrorKind::SignalCodec => "SIGNAL_CODEC",
            PgcovErrorKind::Database => "DATABASE",
            PgcovErrorKind::Io => "IO",
            PgcovErrorKind::Store => "STORE",
        };
        write!(f, "{s}")
    }
}

pub type Result<T> = std::result::Result<T, PgcovError>;
