use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::Result;
use crate::model::Coverage;

use super::{line_of, parse_position_key, Reporter, SourceReader};

/// Maps each byte-range position to a source line and emits the standard
/// `TN:`/`SF:`/`DA:`/`end_of_record` LCOV tracefile grammar. LCOV has no
/// sub-line granularity, so positions mapping to the same line sum their
/// hit counts for that line's `DA` record.
pub struct LcovReporter;

impl Reporter for LcovReporter {
    fn render(&self, coverage: &Coverage, sources: &dyn SourceReader) -> Result<String> {
        let mut out = String::new();
        writeln!(out, "TN:").ok();

        for (file, positions) in &coverage.positions {
            let src = sources.read(file).unwrap_or_default();
            let mut by_line: BTreeMap<usize, u64> = BTreeMap::new();
            for (key, hits) in positions {
                if let Some((start, _length)) = parse_position_key(key) {
                    let line = line_of(&src, start);
                    *by_line.entry(line).or_insert(0) += hits;
                }
            }

            writeln!(out, "SF:{file}").ok();
            for (line, hits) in &by_line {
                writeln!(out, "DA:{line},{hits}").ok();
            }
            writeln!(out, "end_of_record").ok();
        }

        Ok(out)
    }
}
