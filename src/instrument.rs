//! Instrumentation rewriter.
//!
//! Splices `pg_notify('pgcov', <signal-id>)` probes into PL/pgSQL and
//! SQL-language function bodies, and records an implicit [`CoveragePoint`]
//! for every other (DDL/DML) statement. All emitted `CoveragePoint`
//! positions reference the *original* source, never the instrumented
//! text — downstream consumers never map instrumented offsets back. The
//! signal id's `file` field carries the source file's path as `NOTIFY`
//! sees it, so the collector can key aggregated coverage by path without
//! a side table.

use crate::error::PgcovError;
use crate::lexer;
use crate::model::{CoveragePoint, InstrumentedSql, ParsedSql, Statement, StatementType};
use crate::signal;
use crate::token::{Token, TokenKind};

/// `NOTIFY`'s payload is capped at 8000 bytes server-side; a signal id
/// that would exceed it can never round-trip through `pg_notify`.
const MAX_SIGNAL_ID_LEN: usize = 8000;

/// Instrument one parsed file. `src` is the original full file text.
/// Fails if a probe's signal id would exceed `NOTIFY`'s payload limit —
/// this can only happen for pathologically long source file paths.
pub fn instrument(parsed: ParsedSql, src: &str) -> Result<InstrumentedSql, PgcovError> {
    let file_key = parsed.file.to_string_lossy().into_owned();
    let mut instrumented_text = String::with_capacity(src.len());
    let mut locations = Vec::new();
    let mut cursor = 0usize;

    for stmt in &parsed.statements {
        match plan_for(stmt) {
            Plan::Implicit => {
                let signal_id = signal::format(&file_key, stmt.start_pos as u32, stmt.raw_sql.len() as u32, None);
                check_signal_id_len(&file_key, &signal_id)?;
                let point = CoveragePoint {
                    file: parsed.file.clone(),
                    start_pos: stmt.start_pos,
                    length: stmt.raw_sql.len(),
                    branch: None,
                    signal_id,
                    implicit_coverage: true,
                };
                locations.push(point);
            }
            Plan::InstrumentBody { cmd, skip_to_begin } => {
                let body_start_abs = stmt.absolute_body_start().expect("body statements carry body_start");
                let body = stmt.body.as_deref().expect("body statements carry body");
                let body_end_abs = body_start_abs + body.len();

                instrumented_text.push_str(&src[cursor..body_start_abs]);
                let (new_body, points) = instrument_body(body, cmd, skip_to_begin, &file_key, body_start_abs, &parsed.file)?;
                instrumented_text.push_str(&new_body);
                locations.extend(points);
                cursor = body_end_abs;
            }
        }
    }
    instrumented_text.push_str(&src[cursor..]);

    Ok(InstrumentedSql {
        original: parsed,
        instrumented_text,
        locations,
    })
}

fn check_signal_id_len(file_key: &str, signal_id: &str) -> Result<(), PgcovError> {
    if signal_id.len() > MAX_SIGNAL_ID_LEN {
        return Err(PgcovError::Instrumentation {
            file: file_key.to_string(),
            message: format!(
                "signal id is {} bytes, over NOTIFY's {MAX_SIGNAL_ID_LEN}-byte payload limit",
                signal_id.len()
            ),
        });
    }
    Ok(())
}

enum Plan {
    Implicit,
    InstrumentBody { cmd: &'static str, skip_to_begin: bool },
}

fn plan_for(stmt: &Statement) -> Plan {
    match stmt.stmt_type {
        StatementType::Do => Plan::InstrumentBody {
            cmd: "PERFORM",
            skip_to_begin: true,
        },
        StatementType::Function | StatementType::Procedure => match stmt.language.as_deref() {
            Some("plpgsql") => Plan::InstrumentBody {
                cmd: "PERFORM",
                skip_to_begin: true,
            },
            Some("sql") => Plan::InstrumentBody {
                cmd: "SELECT",
                skip_to_begin: false,
            },
            _ => Plan::Implicit,
        },
        _ => Plan::Implicit,
    }
}

/// Segment the body, decide which segments are executable, splice probes
/// in front of them, and return the new body text plus the `CoveragePoint`s
/// it carries (positions already in original-source coordinates).
fn instrument_body(
    body: &str,
    cmd: &'static str,
    skip_to_begin: bool,
    file_key: &str,
    body_start_abs: usize,
    file: &std::path::Path,
) -> Result<(String, Vec<CoveragePoint>), PgcovError> {
    let tokens = lexer::scan(body);
    let start_idx = if skip_to_begin {
        tokens
            .iter()
            .position(|t| t.is_word("begin"))
            .map(|i| i + 1)
            .unwrap_or(0)
    } else {
        0
    };

    let segments = find_segments(&tokens, start_idx);

    let mut new_body = String::with_capacity(body.len() + segments.len() * 48);
    let mut points = Vec::with_capacity(segments.len());
    let mut cursor = 0usize;

    for (seg_start, seg_end) in segments {
        let start_pos_abs = body_start_abs + seg_start;
        let length = seg_end - seg_start;
        let signal_id = signal::format(file_key, start_pos_abs as u32, length as u32, None);
        check_signal_id_len(file_key, &signal_id)?;

        new_body.push_str(&body[cursor..seg_start]);
        let indent = indent_for(body, seg_start);
        let escaped_id = signal_id.replace('\'', "''");
        new_body.push_str(&format!("{indent}{cmd} pg_notify('pgcov', '{escaped_id}');\n"));
        cursor = seg_start;

        points.push(CoveragePoint {
            file: file.to_path_buf(),
            start_pos: start_pos_abs,
            length,
            branch: None,
            signal_id,
            implicit_coverage: false,
        });
    }
    new_body.push_str(&body[cursor..]);

    Ok((new_body, points))
}

/// Walk tokens from `start_idx`, grouping into `;`-closed segments (plus a
/// trailing unterminated one if it has content) and keeping only the
/// executable ones: the segment's first non-comment token must not be
/// `BEGIN`, `END`, `LOOP`, `DECLARE`, or `EXCEPTION`.
fn find_segments(tokens: &[Token<'_>], start_idx: usize) -> Vec<(usize, usize)> {
    let mut segments = Vec::new();
    let mut seg_start: Option<usize> = None;
    let mut first_tok: Option<Token<'_>> = None;

    for tok in &tokens[start_idx.min(tokens.len())..] {
        if tok.kind.is_comment() {
            continue;
        }
        if seg_start.is_none() {
            seg_start = Some(tok.pos);
            first_tok = Some(*tok);
        }
        if tok.kind == TokenKind::Semicolon {
            if is_executable(first_tok) {
                segments.push((seg_start.unwrap(), tok.end()));
            }
            seg_start = None;
            first_tok = None;
        }
    }
    if let (Some(s), Some(_)) = (seg_start, first_tok) {
        if let Some(last) = tokens.last() {
            if is_executable(first_tok) {
                segments.push((s, last.end()));
            }
        }
    }
    segments
}

fn is_executable(first_tok: Option<Token<'_>>) -> bool {
    match first_tok {
        Some(t) => {
            !(t.is_word("begin") || t.is_word("end") || t.is_word("loop") || t.is_word("declare") || t.is_word("exception"))
        }
        None => false,
    }
}

fn indent_for(body: &str, pos: usize) -> String {
    let line_start = body[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line = &body[line_start..pos.max(line_start)];
    let trimmed = line.trim_start_matches([' ', '\t']);
    line[..line.len() - trimmed.len()].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use std::path::PathBuf;

    #[test]
    fn plpgsql_function_gets_one_probe() {
        let src = "CREATE FUNCTION f() RETURNS int AS $$\nBEGIN\n  RETURN 1;\nEND $$ LANGUAGE plpgsql;";
        let file = PathBuf::from("f.sql");
        let parsed = parser::parse(&file, src).unwrap();
        let instrumented = instrument(parsed, src).unwrap();

        assert_eq!(instrumented.locations.len(), 1);
        let point = &instrumented.locations[0];
        assert!(!point.implicit_coverage);
        assert_eq!(&src[point.start_pos..point.start_pos + point.length], "RETURN 1;");
        assert!(instrumented.instrumented_text.contains("PERFORM pg_notify('pgcov'"));
    }

    #[test]
    fn sql_function_uses_select_pg_notify_without_begin_skip() {
        let src = "CREATE FUNCTION f() RETURNS int AS $$ select 1; $$ LANGUAGE sql;";
        let file = PathBuf::from("f.sql");
        let parsed = parser::parse(&file, src).unwrap();
        let instrumented = instrument(parsed, src).unwrap();

        assert_eq!(instrumented.locations.len(), 1);
        assert!(instrumented.instrumented_text.contains("SELECT pg_notify('pgcov'"));
        assert!(!instrumented.instrumented_text.contains("PERFORM pg_notify"));
    }

    #[test]
    fn ddl_statement_is_implicit_and_unmodified() {
        let src = "CREATE TABLE t(x int);";
        let file = PathBuf::from("f.sql");
        let parsed = parser::parse(&file, src).unwrap();
        let instrumented = instrument(parsed, src).unwrap();

        assert_eq!(instrumented.locations.len(), 1);
        assert!(instrumented.locations[0].implicit_coverage);
        assert_eq!(instrumented.instrumented_text, src);
    }

    #[test]
    fn multiple_statements_in_body_get_multiple_probes() {
        let src = "CREATE FUNCTION f() RETURNS int AS $$\nBEGIN\n  PERFORM 1;\n  PERFORM 2;\nEND $$ LANGUAGE plpgsql;";
        let file = PathBuf::from("f.sql");
        let parsed = parser::parse(&file, src).unwrap();
        let instrumented = instrument(parsed, src).unwrap();
        assert_eq!(instrumented.locations.len(), 2);
    }

    #[test]
    fn declare_and_end_segments_are_not_instrumented() {
        let src = "CREATE FUNCTION f() RETURNS int AS $$\nDECLARE x int;\nBEGIN\n  x := 1;\nEND $$ LANGUAGE plpgsql;";
        let file = PathBuf::from("f.sql");
        let parsed = parser::parse(&file, src).unwrap();
        let instrumented = instrument(parsed, src).unwrap();
        // Only the assignment inside BEGIN..END should be instrumented; the
        // DECLARE line is before BEGIN and out of scope entirely.
        assert_eq!(instrumented.locations.len(), 1);
        let point = &instrumented.locations[0];
        assert_eq!(&src[point.start_pos..point.start_pos + point.length], "x := 1;");
    }

    #[test]
    fn signal_ids_carry_the_source_files_path() {
        let src = "CREATE FUNCTION f() RETURNS int AS $$\nBEGIN\n  RETURN 1;\nEND $$ LANGUAGE plpgsql;";
        let file = PathBuf::from("migrations/f.sql");
        let parsed = parser::parse(&file, src).unwrap();
        let instrumented = instrument(parsed, src).unwrap();
        let point = &instrumented.locations[0];
        let decoded = signal::parse(&point.signal_id).unwrap();
        assert_eq!(decoded.file, "migrations/f.sql");
        assert_eq!(decoded.start_pos as usize, point.start_pos);
        assert_eq!(decoded.length as usize, point.length);
    }

    #[test]
    fn oversized_signal_id_is_an_instrumentation_error() {
        let src = "CREATE FUNCTION f() RETURNS int AS $$\nBEGIN\n  RETURN 1;\nEND $$ LANGUAGE plpgsql;";
        let long_name = "x".repeat(MAX_SIGNAL_ID_LEN);
        let file = PathBuf::from(long_name);
        let parsed = parser::parse(&file, src).unwrap();
        let err = instrument(parsed, src).unwrap_err();
        assert!(matches!(err, PgcovError::Instrumentation { .. }));
    }
}
