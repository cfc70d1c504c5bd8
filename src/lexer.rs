//! Byte-accurate PL/pgSQL lexer.
//!
//! Produces a token stream intended to be byte-exact with what the
//! PostgreSQL core scanner, followed by the PL/pgSQL wrapper, would
//! produce — minus catalog-dependent datum resolution, which this tool
//! never needs.
//!
//! The scanner is hand-written rather than generated: the quote
//! continuation rule, the trailing `+`/`-` stripping rule, and nested
//! block comments don't map cleanly onto a single DFA without the same
//! kind of rule-order tie-breaking flex itself relies on, so the dispatch
//! in [`Lexer::next_token`] encodes that order explicitly.

use crate::keywords;
use crate::token::{Token, TokenKind};

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

fn is_ident_continue(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit() || b == b'$'
}

fn is_dollar_tag_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

fn is_dollar_tag_continue(b: u8) -> bool {
    is_dollar_tag_start(b) || b.is_ascii_digit()
}

fn is_op_char(b: u8) -> bool {
    matches!(
        b,
        b'+' | b'-' | b'*' | b'/' | b'<' | b'>' | b'=' | b'~' | b'!' | b'@' | b'#' | b'^' | b'&' | b'|' | b'`' | b'?' | b'%'
    )
}

fn is_qualifying(b: u8) -> bool {
    matches!(
        b,
        b'~' | b'!' | b'@' | b'#' | b'^' | b'&' | b'|' | b'`' | b'?' | b'%'
    )
}

/// A streaming, zero-copy tokenizer over a single source buffer.
pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer { src, pos: 0 }
    }

    fn byte_at(&self, i: usize) -> Option<u8> {
        self.src.as_bytes().get(i).copied()
    }

    fn skip_whitespace(&mut self) {
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    /// Scan and return the next token, or `None` at end of input. Unlike
    /// [`TokenKind::Eof`] (a sentinel for consumers that want an explicit
    /// terminator token), this streaming form never yields one.
    pub fn next_token(&mut self) -> Option<Token<'a>> {
        self.skip_whitespace();
        let start = self.pos;
        let b = *self.src.as_bytes().get(start)?;

        if b == b'-' && self.byte_at(start + 1) == Some(b'-') {
            return Some(self.scan_line_comment(start));
        }
        if b == b'/' && self.byte_at(start + 1) == Some(b'*') {
            return Some(self.scan_block_comment(start));
        }
        if (b == b'e' || b == b'E') && self.byte_at(start + 1) == Some(b'\'') {
            return Some(self.scan_quoted(start, start + 1, true, TokenKind::SConst));
        }
        if (b == b'b' || b == b'B') && self.byte_at(start + 1) == Some(b'\'') {
            return Some(self.scan_quoted(start, start + 1, false, TokenKind::BConst));
        }
        if (b == b'x' || b == b'X') && self.byte_at(start + 1) == Some(b'\'') {
            return Some(self.scan_quoted(start, start + 1, false, TokenKind::XConst));
        }
        if (b == b'u' || b == b'U') && self.byte_at(start + 1) == Some(b'&') {
            match self.byte_at(start + 2) {
                Some(b'\'') => return Some(self.scan_quoted(start, start + 2, true, TokenKind::UscConst)),
                Some(b'"') => return Some(self.scan_dquoted(start, start + 2, TokenKind::UIdent)),
                _ => {} // fall through: `U` is a plain identifier, `&` a separate operator
            }
        }
        if b == b'\'' {
            return Some(self.scan_quoted(start, start, true, TokenKind::SConst));
        }
        if b == b'"' {
            return Some(self.scan_dquoted(start, start, TokenKind::QuotedIdent));
        }
        if b == b'$' {
            return Some(self.scan_dollar(start));
        }
        if b.is_ascii_digit() || (b == b'.' && self.byte_at(start + 1).is_some_and(|c| c.is_ascii_digit())) {
            return Some(self.scan_number(start));
        }
        if is_ident_start(b) {
            return Some(self.scan_ident(start));
        }
        if b == b':' {
            if self.byte_at(start + 1) == Some(b':') {
                self.pos = start + 2;
                return Some(Token::new(TokenKind::TypeCast, &self.src[start..start + 2], start));
            }
            if self.byte_at(start + 1) == Some(b'=') {
                self.pos = start + 2;
                return Some(Token::new(TokenKind::Assign, &self.src[start..start + 2], start));
            }
            self.pos = start + 1;
            return Some(Token::new(TokenKind::Colon, &self.src[start..start + 1], start));
        }
        if b == b'.' {
            if self.byte_at(start + 1) == Some(b'.') {
                self.pos = start + 2;
                return Some(Token::new(TokenKind::DotDot, &self.src[start..start + 2], start));
            }
            self.pos = start + 1;
            return Some(Token::new(TokenKind::Dot, &self.src[start..start + 1], start));
        }
        let single = match b {
            b';' => Some(TokenKind::Semicolon),
            b',' => Some(TokenKind::Comma),
            b'(' => Some(TokenKind::LParen),
            b')' => Some(TokenKind::RParen),
            b'[' => Some(TokenKind::LBracket),
            b']' => Some(TokenKind::RBracket),
            _ => None,
        };
        if let Some(kind) = single {
            self.pos = start + 1;
            return Some(Token::new(kind, &self.src[start..start + 1], start));
        }
        if is_op_char(b) {
            return Some(self.scan_operator(start));
        }

        // Unrecognized byte (stray control character, etc). Consume one
        // byte so the scanner always makes progress.
        self.pos = start + 1;
        Some(Token::new(TokenKind::Op, &self.src[start..start + 1], start))
    }

    fn scan_line_comment(&mut self, start: usize) -> Token<'a> {
        let end = self.src[start..]
            .find('\n')
            .map(|rel| start + rel)
            .unwrap_or(self.src.len());
        self.pos = end;
        Token::new(TokenKind::LineComment, &self.src[start..end], start)
    }

    fn scan_block_comment(&mut self, start: usize) -> Token<'a> {
        let bytes = self.src.as_bytes();
        let mut i = start + 2;
        let mut depth = 1i32;
        while i < bytes.len() && depth > 0 {
            if i + 1 < bytes.len() && bytes[i] == b'/' && bytes[i + 1] == b'*' {
                depth += 1;
                i += 2;
            } else if i + 1 < bytes.len() && bytes[i] == b'*' && bytes[i + 1] == b'/' {
                depth -= 1;
                i += 2;
            } else {
                i += 1;
            }
        }
        self.pos = i;
        Token::new(TokenKind::BlockComment, &self.src[start..i], start)
    }

    /// Scans a single- or double-quoted literal starting the *quote* at
    /// `quote_pos` (which may be after a prefix like `E`/`U&`, beginning
    /// at `token_start`). `allow_backslash` enables `E`-string-style
    /// backslash escapes in addition to doubled-quote escapes.
    fn scan_quoted(&mut self, token_start: usize, quote_pos: usize, allow_backslash: bool, kind: TokenKind) -> Token<'a> {
        let bytes = self.src.as_bytes();
        let mut i = quote_pos + 1;
        loop {
            if i >= bytes.len() {
                break; // unterminated; best-effort: consume to EOF
            }
            if allow_backslash && bytes[i] == b'\\' {
                i = (i + 2).min(bytes.len());
                continue;
            }
            if bytes[i] == b'\'' {
                if i + 1 < bytes.len() && bytes[i + 1] == b'\'' {
                    i += 2;
                    continue;
                }
                i += 1;
                break;
            }
            i += 1;
        }
        self.pos = i;
        Token::new(kind, &self.src[token_start..i], token_start)
    }

    fn scan_dquoted(&mut self, token_start: usize, quote_pos: usize, kind: TokenKind) -> Token<'a> {
        let bytes = self.src.as_bytes();
        let mut i = quote_pos + 1;
        loop {
            if i >= bytes.len() {
                break;
            }
            if bytes[i] == b'"' {
                if i + 1 < bytes.len() && bytes[i + 1] == b'"' {
                    i += 2;
                    continue;
                }
                i += 1;
                break;
            }
            i += 1;
        }
        self.pos = i;
        Token::new(kind, &self.src[token_start..i], token_start)
    }

    fn scan_dollar(&mut self, start: usize) -> Token<'a> {
        let bytes = self.src.as_bytes();
        let mut i = start + 1;

        if i < bytes.len() && bytes[i].is_ascii_digit() {
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            self.pos = i;
            return Token::new(TokenKind::Param, &self.src[start..i], start);
        }

        let tag_start = i;
        let mut j = i;
        if j < bytes.len() && is_dollar_tag_start(bytes[j]) {
            j += 1;
            while j < bytes.len() && is_dollar_tag_continue(bytes[j]) {
                j += 1;
            }
        }
        if j < bytes.len() && bytes[j] == b'$' {
            let tag = &self.src[tag_start..j];
            let close_delim = format!("${tag}$");
            let body_begin = j + 1;
            let end = self.src[body_begin..]
                .find(close_delim.as_str())
                .map(|rel| body_begin + rel + close_delim.len())
                .unwrap_or(self.src.len());
            self.pos = end;
            return Token::new(TokenKind::SConst, &self.src[start..end], start);
        }

        // Literal `$`, not a parameter or a dollar-quote opener.
        self.pos = start + 1;
        Token::new(TokenKind::Op, &self.src[start..start + 1], start)
    }

    fn scan_number(&mut self, start: usize) -> Token<'a> {
        let bytes = self.src.as_bytes();
        let mut i = start;

        if bytes[i] == b'0' && i + 1 < bytes.len() && matches!(bytes[i + 1], b'x' | b'X' | b'o' | b'O' | b'b' | b'B') {
            let radix = bytes[i + 1];
            i += 2;
            let ok: fn(u8) -> bool = match radix {
                b'x' | b'X' => |c: u8| c.is_ascii_hexdigit(),
                b'o' | b'O' => |c: u8| (b'0'..=b'7').contains(&c),
                _ => |c: u8| c == b'0' || c == b'1',
            };
            while i < bytes.len() && (ok(bytes[i]) || bytes[i] == b'_') {
                i += 1;
            }
            self.pos = i;
            return Token::new(TokenKind::IConst, &self.src[start..i], start);
        }

        let mut is_float = false;

        if bytes[i] == b'.' {
            is_float = true;
            i += 1;
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'_') {
                i += 1;
            }
        } else {
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'_') {
                i += 1;
            }
            if i < bytes.len() && bytes[i] == b'.' {
                // `1..2` tokenizes as IConst, DotDot, IConst: don't consume
                // the dot here if a second dot follows.
                if i + 1 < bytes.len() && bytes[i + 1] == b'.' {
                    // leave both dots for the next token
                } else {
                    is_float = true;
                    i += 1;
                    while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'_') {
                        i += 1;
                    }
                }
            }
        }

        if i < bytes.len() && matches!(bytes[i], b'e' | b'E') {
            let mut j = i + 1;
            if j < bytes.len() && matches!(bytes[j], b'+' | b'-') {
                j += 1;
            }
            if j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                i = j;
                is_float = true;
            }
        }

        self.pos = i;
        let kind = if is_float { TokenKind::FConst } else { TokenKind::IConst };
        Token::new(kind, &self.src[start..i], start)
    }

    fn scan_ident(&mut self, start: usize) -> Token<'a> {
        let bytes = self.src.as_bytes();
        let mut i = start + 1;
        while i < bytes.len() && is_ident_continue(bytes[i]) {
            i += 1;
        }
        self.pos = i;
        let text = &self.src[start..i];
        Token::new(keywords::classify(text), text, start)
    }

    fn scan_operator(&mut self, start: usize) -> Token<'a> {
        let bytes = self.src.as_bytes();
        let mut end = start;
        while end < bytes.len() && is_op_char(bytes[end]) {
            end += 1;
        }

        // Truncate before an embedded `--` or `/*` so those are rescanned
        // as a comment on the next call.
        let mut i = start;
        while i + 1 < end {
            if &bytes[i..i + 2] == b"--" || &bytes[i..i + 2] == b"/*" {
                end = i;
                break;
            }
            i += 1;
        }

        let mut text = &self.src[start..end];

        // Strip trailing `+`/`-` unless a qualifying character appears
        // earlier in the match.
        if text.len() > 1 && !text.as_bytes().iter().any(|&c| is_qualifying(c)) {
            let tb = text.as_bytes();
            let mut new_len = tb.len();
            while new_len > 1 && matches!(tb[new_len - 1], b'+' | b'-') {
                new_len -= 1;
            }
            text = &text[..new_len];
        }

        self.pos = start + text.len();
        let kind = match text {
            "#" => TokenKind::Hash,
            "<<" => TokenKind::LessLess,
            ">>" => TokenKind::GreaterGreater,
            "<=" => TokenKind::LessEquals,
            ">=" => TokenKind::GreaterEquals,
            "=>" => TokenKind::EqualsGreater,
            "<>" | "!=" => TokenKind::NotEquals,
            _ => TokenKind::Op,
        };
        Token::new(kind, text, start)
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        self.next_token()
    }
}

/// Whether a quote-continuation gap (whitespace, optionally interleaved
/// with line/block comments) between two string literal tokens contains
/// at least one newline.
fn fuse_run_end(tokens: &[Token<'_>], src: &str, start_idx: usize) -> usize {
    let mut end_idx = start_idx;
    loop {
        let mut k = end_idx + 1;
        if k >= tokens.len() {
            break;
        }
        let mut cursor = tokens[end_idx].end();
        let mut newline_seen = false;
        while k < tokens.len() && tokens[k].kind.is_comment() {
            if src[cursor..tokens[k].pos].contains('\n') {
                newline_seen = true;
            }
            cursor = tokens[k].end();
            k += 1;
        }
        if k >= tokens.len() {
            break;
        }
        if src[cursor..tokens[k].pos].contains('\n') {
            newline_seen = true;
        }
        let is_plain_sconst = tokens[k].kind == TokenKind::SConst && !tokens[k].text.starts_with('$');
        if newline_seen && is_plain_sconst {
            end_idx = k;
            continue;
        }
        break;
    }
    end_idx
}

/// Scan `src` to completion, applying the quote-continuation fusion rule:
/// two adjacent plain (non-dollar-quoted) string literal tokens separated
/// only by whitespace containing a newline (optionally interspersed with
/// comments) are fused into a single `SConst` token spanning both
/// fragments and everything between them.
pub fn scan(src: &str) -> Vec<Token<'_>> {
    let raw: Vec<Token<'_>> = Lexer::new(src).collect();
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let tok = raw[i];
        if tok.kind == TokenKind::SConst && !tok.text.starts_with('$') {
            let end_idx = fuse_run_end(&raw, src, i);
            if end_idx > i {
                let fused_text = &src[tok.pos..raw[end_idx].end()];
                out.push(Token::new(TokenKind::SConst, fused_text, tok.pos));
                i = end_idx + 1;
                continue;
            }
        }
        out.push(tok);
        i += 1;
    }
    out
}
