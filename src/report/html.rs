use std::collections::BTreeMap;

use crate::error::Result;
use crate::model::Coverage;

use super::{parse_position_key, Reporter, SourceReader};

const STYLE: &str = "body{font-family:monospace;background:#1e1e1e;color:#ddd;margin:0;padding:1em}\
a{color:#6cb6ff}\
.file-view{display:flex}\
.gutter{text-align:right;opacity:.45;user-select:none;margin-right:1em;white-space:pre}\
.code{white-space:pre-wrap;flex:1}\
.hit{background-color:#234d26}\
.miss{background-color:#4d2323}";

/// Shades each byte range in `positions` green (hit) or red (miss),
/// rendering a self-contained HTML page per source file plus an index.
/// No external JS/CSS — every page is viewable offline on its own.
pub struct HtmlReporter;

impl HtmlReporter {
    /// The coverage summary / index page listing every file.
    pub fn render_index(&self, coverage: &Coverage) -> String {
        let mut rows = String::new();
        for file in coverage.positions.keys() {
            let pct = coverage.file_percent(file);
            let href = file_page_name(file);
            rows.push_str(&format!(
                "<tr><td><a href=\"{href}\">{file}</a></td><td>{pct:.1}%</td></tr>\n"
            ));
        }
        format!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>pgcov coverage</title><style>{STYLE}\
            table{{border-collapse:collapse;width:100%}} td{{padding:.3em .6em;border-bottom:1px solid #333}}</style></head>\
            <body><h1>pgcov coverage — {total:.1}% total</h1><table><tr><th>File</th><th>Coverage</th></tr>\n{rows}</table></body></html>",
            total = coverage.total_percent(),
        )
    }

    /// A per-file page with byte-range shading and a line-number gutter.
    pub fn render_file(&self, file: &str, positions: &BTreeMap<String, u64>, src: &str) -> String {
        let mut ranges: Vec<(usize, usize, u64)> = positions
            .iter()
            .filter_map(|(k, &hits)| parse_position_key(k).map(|(start, len)| (start, start + len, hits)))
            .collect();
        ranges.sort_by_key(|r| r.0);

        let mut body = String::new();
        let mut cursor = 0usize;
        for (start, end, hits) in &ranges {
            let start = (*start).max(cursor).min(src.len());
            let end = (*end).max(start).min(src.len());
            if start > cursor {
                body.push_str(&html_escape(&src[cursor..start]));
            }
            let class = if *hits > 0 { "hit" } else { "miss" };
            body.push_str(&format!("<span class=\"{class}\" title=\"{hits} hits\">"));
            body.push_str(&html_escape(&src[start..end]));
            body.push_str("</span>");
            cursor = end;
        }
        if cursor < src.len() {
            body.push_str(&html_escape(&src[cursor..]));
        }

        let line_count = src.bytes().filter(|&b| b == b'\n').count() + 1;
        let gutter: String = (1..=line_count).map(|n| n.to_string()).collect::<Vec<_>>().join("\n");

        format!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{file}</title><style>{STYLE}</style></head>\
            <body><h1>{file}</h1><p><a href=\"index.html\">&larr; index</a></p>\
            <div class=\"file-view\"><pre class=\"gutter\">{gutter}</pre><pre class=\"code\">{body}</pre></div>\
            </body></html>"
        )
    }
}

impl Reporter for HtmlReporter {
    fn render(&self, coverage: &Coverage, _sources: &dyn SourceReader) -> Result<String> {
        Ok(self.render_index(coverage))
    }
}

/// The filename a source path's per-file report page is written under.
pub fn file_page_name(file: &str) -> String {
    format!("{}.html", file.replace(['/', '\\', ':'], "_"))
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_file_wraps_hit_and_miss_ranges() {
        let mut positions = BTreeMap::new();
        positions.insert("0:4".to_string(), 1u64);
        positions.insert("5:4".to_string(), 0u64);
        let src = "foo; bar;";
        let html = HtmlReporter.render_file("t.sql", &positions, src);
        assert!(html.contains("class=\"hit\""));
        assert!(html.contains("class=\"miss\""));
        assert!(html.contains("foo;"));
    }

    #[test]
    fn html_escape_handles_angle_brackets() {
        assert_eq!(html_escape("<a> & <b>"), "&lt;a&gt; &amp; &lt;b&gt;");
    }

    #[test]
    fn file_page_name_sanitizes_separators() {
        assert_eq!(file_page_name("a/b.sql"), "a_b.sql.html");
    }

    #[test]
    fn render_index_lists_every_file_with_percentage() {
        let mut coverage = Coverage::new();
        let mut points = BTreeMap::new();
        points.insert("0:1".to_string(), 1u64);
        coverage.positions.insert("a.sql".to_string(), points);
        let html = HtmlReporter.render_index(&coverage);
        assert!(html.contains("a.sql"));
        assert!(html.contains("100.0%"));
    }
}
