//! Property-based tests for the quantified invariants: lexer position
//! exactness, statement partitioning, semicolon transparency inside
//! strings, and signal id round-tripping.

use pgcov::collector::Collector;
use pgcov::model::CoverageSignal;
use pgcov::signal;
use pgcov::{lexer, parser};
use proptest::prelude::*;
use std::path::PathBuf;

fn covered_set(c: &pgcov::model::Coverage) -> std::collections::BTreeMap<String, std::collections::BTreeSet<String>> {
    c.positions
        .iter()
        .map(|(file, points)| {
            let covered = points
                .iter()
                .filter(|(_, &hits)| hits > 0)
                .map(|(pos, _)| pos.clone())
                .collect();
            (file.clone(), covered)
        })
        .collect()
}

// ── Lexer position exactness ────────────────────────────────────────────

/// Strategy: a run of statements built from a small alphabet of SQL-ish
/// fragments, wide enough to exercise identifiers, numbers, strings,
/// operators, and whitespace without needing a full SQL grammar.
fn arb_sql_fragment() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z_][a-zA-Z0-9_]{0,8}".prop_map(|s| s),
        "[0-9]{1,5}".prop_map(|s| s),
        Just("SELECT".to_string()),
        Just("FROM".to_string()),
        Just("WHERE".to_string()),
        Just("+".to_string()),
        Just("-".to_string()),
        Just("*".to_string()),
        Just(",".to_string()),
        Just("(".to_string()),
        Just(")".to_string()),
        Just(";".to_string()),
        "'[a-zA-Z0-9 ]{0,10}'".prop_map(|s| s),
    ]
}

fn arb_sql_source() -> impl Strategy<Value = String> {
    prop::collection::vec(arb_sql_fragment(), 0..30).prop_map(|parts| parts.join(" "))
}

/// A plausible, colon-free source file name (the colon-bearing-path case
/// is covered by `signal.rs`'s own unit tests).
fn arb_file_name() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_./]{1,20}".prop_map(|s| s)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Every token's text is an exact slice of the source at its position:
    /// `S[T.pos .. T.pos + T.text.len()] == T.text`.
    #[test]
    fn prop_lexer_position_exactness(src in arb_sql_source()) {
        let tokens = lexer::scan(&src);
        for tok in &tokens {
            prop_assert!(tok.end() <= src.len());
            prop_assert_eq!(&src[tok.pos..tok.end()], tok.text);
        }
    }

    /// Tokens never overlap and appear in non-decreasing position order.
    #[test]
    fn prop_lexer_tokens_are_ordered_and_non_overlapping(src in arb_sql_source()) {
        let tokens = lexer::scan(&src);
        for pair in tokens.windows(2) {
            prop_assert!(pair[0].end() <= pair[1].pos);
        }
    }

    /// Statement partitioning covers the source: concatenating every
    /// statement's `raw_sql` (in order, ignoring the gaps of whitespace
    /// between them) reproduces the non-gap bytes of the source, and every
    /// statement's `raw_sql` is itself a verbatim slice of the source at
    /// `start_pos`.
    #[test]
    fn prop_statement_raw_sql_is_a_verbatim_slice(src in arb_sql_source()) {
        let Ok(parsed) = parser::parse(&PathBuf::from("prop.sql"), &src) else { return Ok(()); };
        for stmt in &parsed.statements {
            let end = stmt.start_pos + stmt.raw_sql.len();
            prop_assert!(end <= src.len());
            prop_assert_eq!(&src[stmt.start_pos..end], stmt.raw_sql.as_str());
        }
    }

    /// Statements appear in non-decreasing source order and never overlap.
    #[test]
    fn prop_statements_are_ordered_and_non_overlapping(src in arb_sql_source()) {
        let Ok(parsed) = parser::parse(&PathBuf::from("prop.sql"), &src) else { return Ok(()); };
        for pair in parsed.statements.windows(2) {
            let prev_end = pair[0].start_pos + pair[0].raw_sql.len();
            prop_assert!(prev_end <= pair[1].start_pos);
        }
    }

    /// Semicolons inside a dollar-quoted string never split a statement:
    /// wrapping a fixed number of semicolons in an arbitrary dollar tag
    /// produces exactly one statement, regardless of how many `;` the
    /// body contains.
    #[test]
    fn prop_semicolons_inside_dollar_quotes_are_transparent(
        tag in "[a-z]{0,6}",
        semis in 0usize..10,
    ) {
        let body: String = std::iter::repeat(';').take(semis).collect();
        let src = format!("DO ${tag}${body}${tag}$;");
        let parsed = parser::parse(&PathBuf::from("prop.sql"), &src).unwrap();
        prop_assert_eq!(parsed.statements.len(), 1);
    }

    /// Semicolons inside a plain string literal are likewise transparent.
    #[test]
    fn prop_semicolons_inside_string_literals_are_transparent(
        prefix in "[a-zA-Z0-9 ]{0,5}",
        semis in 0usize..10,
        suffix in "[a-zA-Z0-9 ]{0,5}",
    ) {
        let body: String = std::iter::repeat(';').take(semis).collect();
        let src = format!("SELECT '{prefix}{body}{suffix}';");
        let parsed = parser::parse(&PathBuf::from("prop.sql"), &src).unwrap();
        prop_assert_eq!(parsed.statements.len(), 1);
    }

    // ── Signal id round-trip ────────────────────────────────────────

    #[test]
    fn prop_signal_id_round_trips_without_branch(file in arb_file_name(), start_pos in 0u32..1_000_000, length in 0u32..100_000) {
        let id = signal::format(&file, start_pos, length, None);
        let decoded = signal::parse(&id).unwrap();
        prop_assert_eq!(decoded.file, file);
        prop_assert_eq!(decoded.start_pos, start_pos);
        prop_assert_eq!(decoded.length, length);
        prop_assert_eq!(decoded.branch, None);
    }

    #[test]
    fn prop_signal_id_round_trips_with_branch(
        file in arb_file_name(),
        start_pos in 0u32..1_000_000,
        length in 0u32..100_000,
        branch in 0u32..16,
    ) {
        let id = signal::format(&file, start_pos, length, Some(branch));
        let decoded = signal::parse(&id).unwrap();
        prop_assert_eq!(decoded.file, file);
        prop_assert_eq!(decoded.start_pos, start_pos);
        prop_assert_eq!(decoded.length, length);
        prop_assert_eq!(decoded.branch, Some(branch));
    }

    /// Any field carrying an explicit `-` sign is rejected as negative
    /// rather than silently accepted or misparsed as a different field.
    #[test]
    fn prop_signal_id_rejects_a_negative_field(
        file in 0u32..100,
        length in 0u32..100,
        magnitude in 1u32..100_000,
    ) {
        let id = format!("{file}:-{magnitude}:{length}");
        prop_assert!(matches!(signal::parse(&id), Err(signal::SignalCodecError::Negative(_, _))));
    }

    /// A non-numeric field is always rejected, never silently coerced.
    #[test]
    fn prop_signal_id_rejects_alphabetic_field(file in 0u32..100, junk in "[a-zA-Z]{1,8}") {
        let id = format!("{file}:{junk}:5");
        prop_assert!(matches!(signal::parse(&id), Err(signal::SignalCodecError::InvalidNumber(_, _))));
    }

    // ── Collector: order independence and idempotence ────────────────

    /// Aggregating the same batch of signals in any order produces the
    /// same covered/uncovered status per position (hit counts may only
    /// differ in how they're reached, never in the zero/non-zero split).
    #[test]
    fn prop_collector_order_independence(
        positions in prop::collection::vec((0u32..5, 0u32..1000, 1u32..50), 1..20),
        seed in 0u64..1000,
    ) {
        let collector_a = Collector::new();
        for (file, start, len) in &positions {
            let sig = CoverageSignal {
                signal_id: signal::format(&format!("file{}.sql", file % 2), *start, *len, None),
                timestamp: chrono::Utc::now(),
            };
            collector_a.add_signal(&sig).unwrap();
        }

        let mut shuffled = positions.clone();
        // Deterministic shuffle keyed on `seed`.
        let n = shuffled.len();
        for i in 0..n {
            let j = ((seed as usize).wrapping_add(i * 2654435761)) % n;
            shuffled.swap(i, j);
        }

        let collector_b = Collector::new();
        for (file, start, len) in &shuffled {
            let sig = CoverageSignal {
                signal_id: signal::format(&format!("file{}.sql", file % 2), *start, *len, None),
                timestamp: chrono::Utc::now(),
            };
            collector_b.add_signal(&sig).unwrap();
        }

        prop_assert_eq!(covered_set(&collector_a.snapshot()), covered_set(&collector_b.snapshot()));
    }

    /// Recording the exact same batch of signals twice leaves the
    /// covered/uncovered split unchanged; only hit counts may grow.
    #[test]
    fn prop_collector_idempotent_coverage_status(
        positions in prop::collection::vec((0u32..3, 0u32..1000, 1u32..50), 1..15),
    ) {
        let collector = Collector::new();
        for (file, start, len) in &positions {
            let sig = CoverageSignal {
                signal_id: signal::format(&format!("file{file}.sql"), *start, *len, None),
                timestamp: chrono::Utc::now(),
            };
            collector.add_signal(&sig).unwrap();
        }
        let once = covered_set(&collector.snapshot());

        for (file, start, len) in &positions {
            let sig = CoverageSignal {
                signal_id: signal::format(&format!("file{file}.sql"), *start, *len, None),
                timestamp: chrono::Utc::now(),
            };
            collector.add_signal(&sig).unwrap();
        }
        let twice = covered_set(&collector.snapshot());

        prop_assert_eq!(once, twice);
    }
}
