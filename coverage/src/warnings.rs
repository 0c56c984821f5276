// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use debuggable_module::path::FilePath;

/// A recoverable problem met while collecting or merging coverage.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Warning {
    /// Debug info of a selected module could not be used.
    ModuleSkipped { module: FilePath, reason: String },

    /// A source path named by debug info is not a readable file.
    UnmatchedPath { path: FilePath },

    /// Count of unmatched paths not reported individually.
    UnmatchedPathsHidden { count: usize },

    /// A crash signal the target did not handle.
    Exception { pid: i32, signal: String },

    /// A persisted coverage input that was skipped.
    InvalidInput { path: PathBuf, reason: String },

    Cancelled,

    Timeout(Duration),
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ModuleSkipped { module, reason } => {
                write!(f, "skipped module `{module}`: {reason}")
            }
            Self::UnmatchedPath { path } => {
                write!(f, "cannot find source file `{path}`")
            }
            Self::UnmatchedPathsHidden { count } => write!(
                f,
                "{count} more source files were not found (use --verbose to list them)"
            ),
            Self::Exception { pid, signal } => {
                write!(f, "unhandled {signal} in process {pid}")
            }
            Self::InvalidInput { path, reason } => {
                write!(f, "skipped coverage input `{}`: {reason}", path.display())
            }
            Self::Cancelled => write!(f, "coverage run was cancelled, results are partial"),
            Self::Timeout(timeout) => {
                write!(f, "target exceeded timeout of {timeout:?}, results are partial")
            }
        }
    }
}

/// Ordered warnings of one run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Warnings(Vec<Warning>);

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, warning: Warning) {
        warn!("{warning}");
        self.0.push(warning);
    }

    pub fn extend(&mut self, other: Warnings) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Warning> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoIterator for Warnings {
    type Item = Warning;
    type IntoIter = std::vec::IntoIter<Warning>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Reports each missing source path once, up to a limit.
#[derive(Clone, Debug, Default)]
pub struct UnmatchedPaths {
    limit: Option<usize>,
    seen: HashSet<FilePath>,
    hidden: usize,
}

impl UnmatchedPaths {
    /// `None` reports every path.
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn report(&mut self, path: &FilePath, warnings: &mut Warnings) {
        if !self.seen.insert(path.clone()) {
            return;
        }

        match self.limit {
            Some(limit) if self.seen.len() > limit => {
                debug!("cannot find source file `{path}`");
                self.hidden += 1;
            }
            _ => warnings.push(Warning::UnmatchedPath { path: path.clone() }),
        }
    }

    /// Append the summary of hidden paths, if any.
    pub fn finish(&mut self, warnings: &mut Warnings) {
        if self.hidden > 0 {
            warnings.push(Warning::UnmatchedPathsHidden { count: self.hidden });
            self.hidden = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_unmatched_paths_are_capped() -> Result<()> {
        let mut unmatched = UnmatchedPaths::new(Some(2));
        let mut warnings = Warnings::new();

        for name in ["a.c", "b.c", "a.c", "c.c", "d.c"] {
            unmatched.report(&FilePath::new(format!("/src/{name}"))?, &mut warnings);
        }
        unmatched.finish(&mut warnings);

        let expected = vec![
            Warning::UnmatchedPath {
                path: FilePath::new("/src/a.c")?,
            },
            Warning::UnmatchedPath {
                path: FilePath::new("/src/b.c")?,
            },
            Warning::UnmatchedPathsHidden { count: 2 },
        ];
        assert_eq!(warnings.into_iter().collect::<Vec<_>>(), expected);

        Ok(())
    }

    #[test]
    fn test_unmatched_paths_unlimited() -> Result<()> {
        let mut unmatched = UnmatchedPaths::new(None);
        let mut warnings = Warnings::new();

        for index in 0..50 {
            unmatched.report(&FilePath::new(format!("/src/{index}.c"))?, &mut warnings);
        }
        unmatched.finish(&mut warnings);

        assert_eq!(warnings.len(), 50);
        assert!(warnings
            .iter()
            .all(|w| matches!(w, Warning::UnmatchedPath { .. })));

        Ok(())
    }

    #[test]
    fn test_display() -> Result<()> {
        let warning = Warning::ModuleSkipped {
            module: FilePath::new("/lib/libfoo.so")?,
            reason: "corrupt debug info".into(),
        };
        assert_eq!(
            warning.to_string(),
            "skipped module `/lib/libfoo.so`: corrupt debug info"
        );

        let warning = Warning::Exception {
            pid: 42,
            signal: "SIGSEGV".into(),
        };
        assert_eq!(warning.to_string(), "unhandled SIGSEGV in process 42");

        Ok(())
    }
}
