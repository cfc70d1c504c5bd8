//! Keyword table distinguishing reserved from unreserved PL/pgSQL keywords.
//!
//! This is not the full PostgreSQL `kwlist.h` — it carries the keywords
//! the lexer, parser, and instrumenter actually need to recognize
//! (statement classification, body extraction, and segment
//! executability checks). Anything else lexes as a plain [`TokenKind::Ident`].

use crate::token::TokenKind;

/// Reserved keywords: cannot be used as an identifier anywhere in
/// PL/pgSQL. Both spellings of `elsif`/`elseif` are folded to one entry.
const RESERVED: &[&str] = &[
    "all", "and", "any", "as", "asc", "between", "both", "case", "cast", "check", "collate",
    "column", "constraint", "create", "cross", "current_date", "current_role", "current_time",
    "current_timestamp", "current_user", "default", "deferrable", "desc", "distinct", "do",
    "else", "elsif", "elseif", "end", "except", "exists", "false", "fetch", "for", "foreign",
    "from", "full", "grant", "group", "having", "in", "initially", "inner", "intersect", "into",
    "is", "isnull", "join", "leading", "left", "like", "limit", "localtime", "localtimestamp",
    "natural", "not", "notnull", "null", "offset", "on", "only", "or", "order", "outer",
    "overlaps", "placing", "primary", "references", "returning", "right", "select", "session_user",
    "similar", "some", "symmetric", "table", "then", "to", "trailing", "true", "union", "unique",
    "user", "using", "variadic", "when", "where", "window", "with",
];

/// Unreserved keywords: recognized contextually (e.g. as the second word
/// of a two-word construct), but usable as an identifier elsewhere.
const UNRESERVED: &[&str] = &[
    "begin", "body", "call", "declare", "exception", "execute", "function", "language", "loop",
    "notify", "perform", "procedure", "raise", "replace", "return", "returns", "trigger", "type",
    "view", "while", "listen", "unlisten", "strict", "immutable", "stable", "volatile", "security",
    "invoker", "definer", "cost", "rows", "sql", "plpgsql", "out", "inout", "raise_exception",
    "get", "diagnostics", "continue", "exit", "foreach", "slice", "reverse", "open", "close",
    "fetch_", "move", "query", "refcursor", "record", "assert", "array", "anyelement",
];

/// Classify a bare identifier's spelling as reserved, unreserved, or a
/// plain identifier. Lookup is case-insensitive.
pub fn classify(word: &str) -> TokenKind {
    let lower = word.to_ascii_lowercase();
    if RESERVED.contains(&lower.as_str()) {
        return TokenKind::ReservedKeyword;
    }
    if UNRESERVED.contains(&lower.as_str()) {
        return TokenKind::UnreservedKeyword;
    }
    TokenKind::Ident
}
