//! Discover source and test files under a search path.
//!
//! A directory is part of the run only if it contains at least one
//! `*_test.sql` file (case insensitive); every other `*.sql` file in such
//! a directory is a source file. Both returned lists are sorted so
//! dispatch order is deterministic and reproducible to read in logs, even
//! though the aggregate result is order-independent.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Sources and tests discovered under one search path.
pub struct Discovered {
    pub sources: Vec<PathBuf>,
    pub tests: Vec<PathBuf>,
}

fn is_sql(path: &Path) -> bool {
    path.extension().is_some_and(|e| e.eq_ignore_ascii_case("sql"))
}

fn is_test_file(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.to_ascii_lowercase().ends_with("_test"))
}

pub fn discover(search_path: &Path) -> Discovered {
    let mut by_dir: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();

    for entry in WalkDir::new(search_path)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !entry.file_type().is_file() || !is_sql(path) {
            continue;
        }
        let dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        by_dir.entry(dir).or_default().push(path.to_path_buf());
    }

    let mut sources = Vec::new();
    let mut tests = Vec::new();
    for files in by_dir.into_values() {
        if !files.iter().any(|f| is_test_file(f)) {
            continue;
        }
        for f in files {
            if is_test_file(&f) {
                tests.push(f);
            } else {
                sources.push(f);
            }
        }
    }
    sources.sort();
    tests.sort();

    Discovered { sources, tests }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn directory_without_test_file_is_excluded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("schema.sql"), "CREATE TABLE t(x int);").unwrap();
        let found = discover(dir.path());
        assert!(found.sources.is_empty());
        assert!(found.tests.is_empty());
    }

    #[test]
    fn directory_with_test_file_includes_both() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("schema.sql"), "CREATE TABLE t(x int);").unwrap();
        fs::write(dir.path().join("schema_test.sql"), "SELECT 1;").unwrap();
        let found = discover(dir.path());
        assert_eq!(found.sources.len(), 1);
        assert_eq!(found.tests.len(), 1);
        assert!(found.tests[0].ends_with("schema_test.sql"));
    }

    #[test]
    fn test_suffix_match_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a_TEST.SQL"), "SELECT 1;").unwrap();
        let found = discover(dir.path());
        assert_eq!(found.tests.len(), 1);
    }

    #[test]
    fn results_are_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("z_test.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("b.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("a.sql"), "SELECT 1;").unwrap();
        let found = discover(dir.path());
        assert_eq!(found.sources[0].file_name().unwrap(), "a.sql");
        assert_eq!(found.sources[1].file_name().unwrap(), "b.sql");
    }
}
