//! Coverage report rendering: JSON, LCOV, and self-contained HTML.

mod html;
mod json;
mod lcov;

pub use html::{file_page_name, HtmlReporter};
pub use json::JsonReporter;
pub use lcov::LcovReporter;

use crate::error::Result;
use crate::model::Coverage;

/// Abstracts reading a source file's content by the path key used in
/// `Coverage::positions`, so reporters are unit-testable without touching
/// a filesystem.
pub trait SourceReader {
    fn read(&self, file: &str) -> std::io::Result<String>;
}

/// Reads directly from disk, resolving the key as a path relative to the
/// current working directory (the same root `discover` walked from).
pub struct FsSourceReader;

impl SourceReader for FsSourceReader {
    fn read(&self, file: &str) -> std::io::Result<String> {
        std::fs::read_to_string(file)
    }
}

pub trait Reporter {
    fn render(&self, coverage: &Coverage, sources: &dyn SourceReader) -> Result<String>;
}

/// 1-based line number containing byte offset `pos` in `src`.
pub(crate) fn line_of(src: &str, pos: usize) -> usize {
    1 + src.as_bytes()[..pos.min(src.len())].iter().filter(|&&b| b == b'\n').count()
}

/// Parse a `"<startPos>:<length>"` position key into `(start, length)`.
pub(crate) fn parse_position_key(key: &str) -> Option<(usize, usize)> {
    let (start, length) = key.split_once(':')?;
    Some((start.parse().ok()?, length.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_of_counts_newlines_before_position() {
        let src = "a\nb\nc";
        assert_eq!(line_of(src, 0), 1);
        assert_eq!(line_of(src, 2), 2);
        assert_eq!(line_of(src, 4), 3);
    }

    #[test]
    fn parse_position_key_splits_on_first_colon() {
        assert_eq!(parse_position_key("10:5"), Some((10, 5)));
        assert_eq!(parse_position_key("bad"), None);
    }
}
