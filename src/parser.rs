//! Statement splitter and classifier.
//!
//! Turns a token stream into [`Statement`]s: split on every top-level `;`
//! token (always top-level, by construction of the lexer — semicolons
//! inside strings, dollar-quotes, and comments never become `;` tokens),
//! then classify each group and, for functions/procedures/DO blocks,
//! extract the language and unquoted body.

use std::path::Path;

use crate::error::PgcovError;
use crate::lexer;
use crate::model::{ParsedSql, Statement, StatementType};
use crate::token::{Token, TokenKind};

/// Parse a whole source file into its top-level statements. Fails if a
/// function, procedure, or `DO` block needs a body to instrument (its
/// language is `plpgsql`/`sql`, or it's a `DO` block) but none could be
/// located — e.g. a malformed `CREATE FUNCTION` missing its `AS` clause.
pub fn parse(file: &Path, src: &str) -> Result<ParsedSql, PgcovError> {
    let tokens = lexer::scan(src);
    let mut statements = Vec::new();

    let mut group_start = 0usize;
    for (i, tok) in tokens.iter().enumerate() {
        if tok.kind == TokenKind::Semicolon {
            if let Some(stmt) = build_statement(file, src, &tokens[group_start..=i])? {
                statements.push(stmt);
            }
            group_start = i + 1;
        }
    }
    if group_start < tokens.len() {
        if let Some(stmt) = build_statement(file, src, &tokens[group_start..])? {
            statements.push(stmt);
        }
    }

    Ok(ParsedSql {
        file: file.to_path_buf(),
        statements,
    })
}

fn line_number(src: &str, byte_pos: usize) -> u32 {
    1 + src.as_bytes()[..byte_pos.min(src.len())]
        .iter()
        .filter(|&&b| b == b'\n')
        .count() as u32
}

fn build_statement(file: &Path, src: &str, group: &[Token<'_>]) -> Result<Option<Statement>, PgcovError> {
    let significant: Vec<Token<'_>> = group.iter().copied().filter(|t| !t.kind.is_comment()).collect();
    let Some(first) = significant.first().copied() else {
        return Ok(None);
    };
    let Some(last) = group.last().copied() else {
        return Ok(None);
    };

    let start_pos = first.pos;
    let end_pos = last.end();
    let raw_sql = src[start_pos..end_pos].to_string();

    let stmt_type = classify(&significant);
    let language = extract_language(&significant);
    let (body, body_start) = extract_body(&significant, stmt_type, start_pos);

    let language = match (stmt_type, language) {
        (StatementType::Do, None) => Some("plpgsql".to_string()),
        (_, lang) => lang,
    };

    if body.is_none() && needs_body(stmt_type, language.as_deref()) {
        return Err(PgcovError::Parse {
            file: file.display().to_string(),
            line: line_number(src, start_pos),
            column: 1,
            message: "could not locate a body to instrument for this statement".to_string(),
        });
    }

    Ok(Some(Statement {
        raw_sql,
        start_pos,
        start_line: line_number(src, start_pos),
        end_line: line_number(src, end_pos.saturating_sub(1).max(start_pos)),
        stmt_type,
        language,
        body,
        body_start,
    }))
}

/// Whether this statement's instrumentation plan requires a body: every
/// `DO` block, and every `CREATE FUNCTION`/`CREATE PROCEDURE` declared
/// `LANGUAGE plpgsql` or `LANGUAGE sql`.
fn needs_body(stmt_type: StatementType, language: Option<&str>) -> bool {
    match stmt_type {
        StatementType::Do => true,
        StatementType::Function | StatementType::Procedure => matches!(language, Some("plpgsql") | Some("sql")),
        _ => false,
    }
}

fn classify(sig: &[Token<'_>]) -> StatementType {
    let Some(first) = sig.first() else {
        return StatementType::Unknown;
    };

    if first.is_word("create") {
        let mut idx = 1;
        if sig.get(idx).is_some_and(|t| t.is_word("or")) && sig.get(idx + 1).is_some_and(|t| t.is_word("replace")) {
            idx += 2;
        }
        return match sig.get(idx) {
            Some(t) if t.is_word("function") => StatementType::Function,
            Some(t) if t.is_word("procedure") => StatementType::Procedure,
            Some(t) if t.is_word("trigger") => StatementType::Trigger,
            Some(t) if t.is_word("view") => StatementType::View,
            _ => StatementType::Other,
        };
    }
    if first.is_word("do") {
        return StatementType::Do;
    }
    StatementType::Other
}

fn extract_language(sig: &[Token<'_>]) -> Option<String> {
    let idx = sig.iter().position(|t| t.is_word("language"))?;
    let tok = sig.get(idx + 1)?;
    Some(unquote_name(tok).to_ascii_lowercase())
}

fn unquote_name(tok: &Token<'_>) -> &str {
    match tok.kind {
        TokenKind::SConst => {
            let (start, end) = sconst_inner_bounds(tok.text);
            &tok.text[start..end]
        }
        TokenKind::QuotedIdent => {
            let t = tok.text;
            &t[1..t.len() - 1]
        }
        _ => tok.text,
    }
}

/// For function/procedure/DO statements, locate the body's SConst token
/// and unquote it. Returns `(body, body_start_within_raw_sql)`.
fn extract_body(
    sig: &[Token<'_>],
    stmt_type: StatementType,
    stmt_start_pos: usize,
) -> (Option<String>, Option<usize>) {
    let body_tok = match stmt_type {
        StatementType::Function | StatementType::Procedure => sig
            .iter()
            .position(|t| t.is_word("as"))
            .and_then(|as_idx| sig.get(as_idx + 1))
            .filter(|t| t.kind == TokenKind::SConst)
            .copied(),
        StatementType::Do => sig.iter().skip(1).find(|t| t.kind == TokenKind::SConst).copied(),
        _ => None,
    };

    let Some(tok) = body_tok else {
        return (None, None);
    };

    let (inner_start, inner_end) = sconst_inner_bounds(tok.text);
    let body = tok.text[inner_start..inner_end].to_string();
    let body_start = (tok.pos - stmt_start_pos) + inner_start;
    (Some(body), Some(body_start))
}

/// The `(start, end)` byte range of the content inside an SConst token's
/// delimiters: `'...'`, `E'...'`, or `$tag$...$tag$`. Never unescapes
/// doubled quotes or backslash escapes, since that would break the
/// verbatim-substring invariant between the statement's `rawSQL` and the
/// extracted `body`.
fn sconst_inner_bounds(text: &str) -> (usize, usize) {
    if let Some(rest) = text.strip_prefix('$') {
        let tag_len = rest.find('$').unwrap_or(0);
        let delim_len = tag_len + 2; // leading `$`, tag, trailing `$`
        return (delim_len, text.len() - delim_len);
    }
    if text.starts_with('\'') {
        return (1, text.len() - 1);
    }
    if text.len() >= 2 && (text.starts_with('E') || text.starts_with('e')) && text.as_bytes()[1] == b'\'' {
        return (2, text.len() - 1);
    }
    (0, text.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse_str(src: &str) -> ParsedSql {
        parse(&PathBuf::from("t.sql"), src).unwrap()
    }

    #[test]
    fn dollar_quote_split_produces_two_statements() {
        let src = "DO $$BEGIN PERFORM 1; PERFORM 2; END$$; SELECT 1;";
        let parsed = parse_str(src);
        assert_eq!(parsed.statements.len(), 2);
        assert_eq!(parsed.statements[0].stmt_type, StatementType::Do);
        assert_eq!(parsed.statements[0].language.as_deref(), Some("plpgsql"));
        assert_eq!(parsed.statements[1].stmt_type, StatementType::Other);
    }

    #[test]
    fn function_body_and_language_extracted() {
        let src = "CREATE FUNCTION f() RETURNS int AS $$\nBEGIN\n  RETURN 1;\nEND $$ LANGUAGE plpgsql;";
        let parsed = parse_str(src);
        assert_eq!(parsed.statements.len(), 1);
        let stmt = &parsed.statements[0];
        assert_eq!(stmt.stmt_type, StatementType::Function);
        assert_eq!(stmt.language.as_deref(), Some("plpgsql"));
        let body = stmt.body.as_ref().unwrap();
        assert!(body.contains("RETURN 1"));
        let body_start = stmt.body_start.unwrap();
        assert_eq!(&stmt.raw_sql[body_start..body_start + body.len()], body.as_str());
    }

    #[test]
    fn create_or_replace_function_classified() {
        let src = "CREATE OR REPLACE FUNCTION f() RETURNS void AS 'select 1' LANGUAGE sql;";
        let parsed = parse_str(src);
        assert_eq!(parsed.statements[0].stmt_type, StatementType::Function);
        assert_eq!(parsed.statements[0].language.as_deref(), Some("sql"));
    }

    #[test]
    fn comment_only_group_is_discarded() {
        let src = "SELECT 1; -- trailing comment only, no semicolon";
        let parsed = parse_str(src);
        assert_eq!(parsed.statements.len(), 1);
    }

    #[test]
    fn ddl_statement_is_other_with_no_body() {
        let src = "CREATE TABLE t(x int);";
        let parsed = parse_str(src);
        assert_eq!(parsed.statements.len(), 1);
        assert_eq!(parsed.statements[0].stmt_type, StatementType::Other);
        assert!(parsed.statements[0].body.is_none());
    }

    #[test]
    fn plpgsql_function_missing_as_clause_is_a_parse_error() {
        let src = "CREATE FUNCTION f() RETURNS void LANGUAGE plpgsql;";
        let err = parse(&PathBuf::from("bad.sql"), src).unwrap_err();
        assert!(matches!(err, crate::error::PgcovError::Parse { .. }));
    }

    #[test]
    fn do_block_missing_body_is_a_parse_error() {
        let src = "DO LANGUAGE plpgsql;";
        let err = parse(&PathBuf::from("bad.sql"), src).unwrap_err();
        assert!(matches!(err, crate::error::PgcovError::Parse { .. }));
    }
}
