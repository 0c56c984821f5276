// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{bail, Result};
use debuggable_module::path::FilePath;

/// Line coverage of one run of a target, or of merged runs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunCoverage {
    /// Exit code of the root target process. `None` for data that was only loaded.
    pub exit_code: Option<i32>,

    /// Modules in load order. Paths are unique.
    pub modules: Vec<ModuleCoverage>,
}

impl RunCoverage {
    pub fn module(&self, path: &FilePath) -> Option<&ModuleCoverage> {
        self.modules.iter().find(|m| &m.path == path)
    }

    /// Index of the module with `path`, appending an empty one if absent.
    pub fn module_index_or_insert(&mut self, path: &FilePath) -> usize {
        if let Some(index) = self.modules.iter().position(|m| &m.path == path) {
            return index;
        }

        self.modules.push(ModuleCoverage::new(path.clone()));
        self.modules.len() - 1
    }

    pub fn module_mut_or_insert(&mut self, path: &FilePath) -> &mut ModuleCoverage {
        let index = self.module_index_or_insert(path);
        &mut self.modules[index]
    }

    /// Append a module. Fails if a module with the same path is present.
    pub fn insert_module(&mut self, module: ModuleCoverage) -> Result<()> {
        if self.module(&module.path).is_some() {
            bail!("duplicate module path: {}", module.path);
        }

        self.modules.push(module);

        Ok(())
    }

    pub fn summary(&self) -> Summary {
        self.modules.iter().map(ModuleCoverage::summary).sum()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModuleCoverage {
    pub path: FilePath,
    pub files: BTreeMap<FilePath, FileCoverage>,
}

impl ModuleCoverage {
    pub fn new(path: FilePath) -> Self {
        Self {
            path,
            files: BTreeMap::new(),
        }
    }

    /// Add the files of `other` into `self`, summing counts.
    pub fn add(&mut self, other: &ModuleCoverage) {
        for (path, file) in &other.files {
            self.files.entry(path.clone()).or_default().add(file);
        }
    }

    pub fn summary(&self) -> Summary {
        self.files.values().map(FileCoverage::summary).sum()
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FileCoverage {
    pub lines: BTreeMap<Line, LineCoverage>,
}

impl FileCoverage {
    pub fn add(&mut self, other: &FileCoverage) {
        for (line, coverage) in &other.lines {
            self.lines.entry(*line).or_default().add(coverage);
        }
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();

        for line in self.lines.values() {
            if line.is_reportable() {
                summary.lines_valid += 1;

                if line.count.reached() {
                    summary.lines_covered += 1;
                }
            }
        }

        summary
    }
}

/// 1-based source line number.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Line(u32);

impl Line {
    pub fn new(number: u32) -> Result<Self> {
        if number == 0 {
            bail!("source lines must be 1-indexed");
        }

        Ok(Self(number))
    }

    pub fn number(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LineCoverage {
    pub has_instrumentation_point: bool,
    pub selected: bool,
    pub count: Count,
}

impl LineCoverage {
    pub fn new(has_instrumentation_point: bool, selected: bool) -> Self {
        Self {
            has_instrumentation_point,
            selected,
            count: Count(0),
        }
    }

    /// Record one execution. Lines that are unselected or have no instrumentation point
    /// are never counted.
    pub fn hit(&mut self) {
        if self.is_reportable() {
            self.count.increment();
        }
    }

    /// Selected and instrumentable.
    pub fn is_reportable(&self) -> bool {
        self.has_instrumentation_point && self.selected
    }

    pub fn add(&mut self, other: &LineCoverage) {
        self.has_instrumentation_point |= other.has_instrumentation_point;
        self.selected |= other.selected;
        self.count.add(other.count);
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
pub struct Count(pub u32);

impl Count {
    pub fn increment(&mut self) {
        self.0 = self.0.saturating_add(1);
    }

    pub fn add(&mut self, other: Count) {
        self.0 = self.0.saturating_add(other.0);
    }

    pub fn reached(&self) -> bool {
        self.0 > 0
    }
}

/// Counts of selected lines with an instrumentation point.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Summary {
    pub lines_valid: u64,
    pub lines_covered: u64,
}

impl Summary {
    pub fn rate(&self) -> f64 {
        if self.lines_valid == 0 {
            return 0.0;
        }

        self.lines_covered as f64 / self.lines_valid as f64
    }
}

impl std::ops::Add for Summary {
    type Output = Summary;

    fn add(self, rhs: Summary) -> Summary {
        Summary {
            lines_valid: self.lines_valid + rhs.lines_valid,
            lines_covered: self.lines_covered + rhs.lines_covered,
        }
    }
}

impl std::iter::Sum for Summary {
    fn sum<I: Iterator<Item = Summary>>(iter: I) -> Summary {
        iter.fold(Summary::default(), |acc, s| acc + s)
    }
}
