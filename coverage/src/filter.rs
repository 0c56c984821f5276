// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::Path;

use debuggable_module::path::FilePath;
use regex::RegexSet;

use crate::allowlist::AllowList;
use crate::diff::{DiffSpec, UnifiedDiff};
use crate::error::FilterConfigError;
use crate::source::Line;

/// Decides which modules, source files and lines are in scope for coverage.
///
/// Every decision is a pure function of the configuration and its inputs.
#[derive(Clone, Debug)]
pub struct CoverageFilter {
    modules: AllowList,
    sources: AllowList,
    excluded_lines: RegexSet,
    diffs: Vec<DiffSpec>,
}

impl CoverageFilter {
    pub fn builder() -> CoverageFilterBuilder {
        CoverageFilterBuilder::default()
    }

    pub fn is_module_selected(&self, path: &FilePath) -> bool {
        self.modules.is_allowed(path)
    }

    /// Source patterns must allow `path` and, when diffs are configured, one must name it.
    pub fn is_file_selected(&self, path: &FilePath) -> bool {
        if !self.sources.is_allowed(path) {
            return false;
        }

        self.diffs.is_empty() || self.diffs.iter().any(|diff| diff.matches_file(path))
    }

    /// Whether a line of a selected file is counted.
    ///
    /// `text` is the source text of the line, if the file could be read. An excluded
    /// line regex match always wins.
    pub fn is_line_selected(&self, file: &FilePath, line: Line, text: Option<&str>) -> bool {
        if let Some(text) = text {
            if self.excluded_lines.is_match(text) {
                return false;
            }
        }

        if self.diffs.is_empty() {
            return true;
        }

        self.diffs
            .iter()
            .filter(|diff| diff.matches_file(file))
            .any(|diff| diff.contains(line))
    }

    /// True if any line regex is configured, so line text is needed.
    pub fn uses_line_text(&self) -> bool {
        !self.excluded_lines.is_empty()
    }
}

impl Default for CoverageFilter {
    fn default() -> Self {
        Self {
            modules: AllowList::default(),
            sources: AllowList::default(),
            excluded_lines: RegexSet::empty(),
            diffs: vec![],
        }
    }
}

#[derive(Debug, Default)]
pub struct CoverageFilterBuilder {
    modules: AllowList,
    sources: AllowList,
    excluded_lines: Vec<String>,
    diffs: Vec<DiffSpec>,
}

impl CoverageFilterBuilder {
    pub fn modules(mut self, modules: AllowList) -> Self {
        self.modules = modules;
        self
    }

    pub fn sources(mut self, sources: AllowList) -> Self {
        self.sources = sources;
        self
    }

    pub fn excluded_line_regex(mut self, regex: impl Into<String>) -> Self {
        self.excluded_lines.push(regex.into());
        self
    }

    pub fn diff(mut self, diff: DiffSpec) -> Self {
        self.diffs.push(diff);
        self
    }

    /// Add every file of the unified diff at `path`.
    pub fn unified_diff(
        mut self,
        path: impl AsRef<Path>,
        root: Option<&Path>,
    ) -> Result<Self, FilterConfigError> {
        let specs = UnifiedDiff::load(path, root)?;
        self.diffs.extend(specs);
        Ok(self)
    }

    pub fn build(self) -> Result<CoverageFilter, FilterConfigError> {
        // Check each regex alone, to name the bad one.
        for regex in &self.excluded_lines {
            regex::Regex::new(regex).map_err(|source| FilterConfigError::LineRegex {
                regex: regex.clone(),
                source,
            })?;
        }

        let excluded_lines =
            RegexSet::new(&self.excluded_lines).map_err(|source| FilterConfigError::LineRegex {
                regex: self.excluded_lines.join(" | "),
                source,
            })?;

        Ok(CoverageFilter {
            modules: self.modules,
            sources: self.sources,
            excluded_lines,
            diffs: self.diffs,
        })
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    fn line(number: u32) -> Line {
        Line::new(number).unwrap()
    }

    fn path(path: &str) -> FilePath {
        FilePath::new(path).unwrap()
    }

    #[test]
    fn test_default_selects_everything() {
        let filter = CoverageFilter::default();
        let main = path("/src/main.c");

        assert!(filter.is_module_selected(&path("/bin/app")));
        assert!(filter.is_file_selected(&main));
        assert!(filter.is_line_selected(&main, line(1), Some("int x;")));
        assert!(filter.is_line_selected(&main, line(2), None));
        assert!(!filter.uses_line_text());
    }

    #[test]
    fn test_module_and_source_patterns() -> Result<()> {
        let filter = CoverageFilter::builder()
            .modules(AllowList::new(["/opt/app/*"], ["*.so*"])?)
            .sources(AllowList::new(["/src/*"], Vec::<String>::new())?)
            .build()?;

        assert!(filter.is_module_selected(&path("/opt/app/bin/server")));
        assert!(!filter.is_module_selected(&path("/opt/app/lib/libfoo.so.1")));
        assert!(!filter.is_module_selected(&path("/usr/bin/env")));

        assert!(filter.is_file_selected(&path("/src/server.c")));
        assert!(!filter.is_file_selected(&path("/usr/include/stdio.h")));

        Ok(())
    }

    #[test]
    fn test_excluded_line_regex_wins() -> Result<()> {
        let main = path("/src/main.c");
        let filter = CoverageFilter::builder()
            .excluded_line_regex(r".*LCOV_EXCL_LINE.*")
            .diff(DiffSpec::new("main.c", [5]))
            .build()?;

        assert!(filter.uses_line_text());
        assert!(filter.is_line_selected(&main, line(5), Some("x += 1;")));
        assert!(!filter.is_line_selected(&main, line(5), Some("abort(); // LCOV_EXCL_LINE")));

        // Without text, no regex can match.
        assert!(filter.is_line_selected(&main, line(5), None));

        Ok(())
    }

    #[test]
    fn test_diff_narrows_selection() -> Result<()> {
        let foo = path("/work/foo.cpp");
        let bar = path("/work/bar.cpp");

        let filter = CoverageFilter::builder()
            .diff(DiffSpec::new("foo.cpp", 10..=12))
            .build()?;

        assert!(filter.is_file_selected(&foo));
        assert!(!filter.is_file_selected(&bar));

        assert!(!filter.is_line_selected(&foo, line(9), None));
        assert!(filter.is_line_selected(&foo, line(10), None));
        assert!(filter.is_line_selected(&foo, line(12), None));
        assert!(!filter.is_line_selected(&foo, line(13), None));

        Ok(())
    }

    #[test]
    fn test_diff_does_not_widen_source_patterns() -> Result<()> {
        let filter = CoverageFilter::builder()
            .sources(AllowList::new(Vec::<String>::new(), ["/work/*"])?)
            .diff(DiffSpec::new("foo.cpp", [1]))
            .build()?;

        assert!(!filter.is_file_selected(&path("/work/foo.cpp")));

        Ok(())
    }

    #[test]
    fn test_invalid_line_regex() {
        let err = CoverageFilter::builder()
            .excluded_line_regex("(unclosed")
            .build()
            .unwrap_err();

        assert!(matches!(err, FilterConfigError::LineRegex { regex, .. } if regex == "(unclosed"));
    }

    #[test]
    fn test_selection_is_deterministic() -> Result<()> {
        let main = path("/src/main.c");
        let filter = CoverageFilter::builder()
            .excluded_line_regex(r"^\s*}\s*$")
            .build()?;

        for _ in 0..3 {
            assert!(!filter.is_line_selected(&main, line(3), Some("  }")));
            assert!(filter.is_line_selected(&main, line(3), Some("  return 0;")));
        }

        Ok(())
    }
}
