// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use debuggable_module::error::SymbolLoadError;
use debuggable_module::lines::{self, ResolveOptions, SourceLines};
use debuggable_module::path::FilePath;
use debuggable_module::{Module, Offset};

use crate::filter::CoverageFilter;
use crate::source::{Line, LineCoverage, ModuleCoverage};
use crate::warnings::{UnmatchedPaths, Warnings};

/// Source line that owns a breakpoint address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourceLocation {
    pub file: FilePath,
    pub line: Line,
}

/// Where to put breakpoints in one module, and what they count.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModuleSites {
    /// Initial coverage of the module: every recorded line, with zero counts.
    pub coverage: ModuleCoverage,

    /// Breakpoint offsets of selected lines. Inlined code can give one offset several
    /// source locations.
    pub offsets: BTreeMap<Offset, Vec<SourceLocation>>,
}

impl ModuleSites {
    pub fn is_empty(&self) -> bool {
        self.coverage.files.is_empty()
    }
}

/// Filter the line table of a module into coverage sites.
///
/// Files rejected by the filter are dropped. Lines of kept files are all recorded, but
/// only selected lines get breakpoints.
pub fn find_coverage_sites(
    module: &FilePath,
    lines: &SourceLines,
    filter: &CoverageFilter,
    sources: &mut SourceCache,
    unmatched: &mut UnmatchedPaths,
    warnings: &mut Warnings,
) -> ModuleSites {
    let mut coverage = ModuleCoverage::new(module.clone());
    let mut offsets: BTreeMap<Offset, Vec<SourceLocation>> = BTreeMap::new();

    for (path, table) in lines.files() {
        if !filter.is_file_selected(path) {
            trace!("skipping unselected source file: {path}");
            continue;
        }

        // Text is only read when a line regex needs it.
        let text = if filter.uses_line_text() {
            sources.get(path)
        } else {
            None
        };

        let found = text.is_some() || sources.exists(path);
        if !found {
            unmatched.report(path, warnings);
        }

        let file = coverage.files.entry(path.clone()).or_default();

        for (number, ranges) in table {
            let Ok(line) = Line::new(*number) else {
                continue;
            };

            let line_text = text
                .as_ref()
                .and_then(|text| text.get(*number as usize - 1))
                .map(String::as_str);

            let selected = filter.is_line_selected(path, line, line_text);
            file.lines.insert(line, LineCoverage::new(true, selected));

            if !selected {
                continue;
            }

            for offset in ranges.starts() {
                offsets.entry(offset).or_default().push(SourceLocation {
                    file: path.clone(),
                    line,
                });
            }
        }
    }

    ModuleSites { coverage, offsets }
}

/// Line tables of modules, resolved once per module path.
pub struct DebugInfoCache {
    options: ResolveOptions,
    cache: Mutex<HashMap<FilePath, Arc<SourceLines>>>,
}

impl DebugInfoCache {
    pub fn new(options: ResolveOptions) -> Self {
        Self {
            options,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    pub fn get_or_insert<'data>(
        &self,
        module: &dyn Module<'data>,
    ) -> Result<Arc<SourceLines>, SymbolLoadError> {
        let path = module.executable_path();

        if let Some(cached) = self.get(path) {
            return Ok(cached);
        }

        // Resolve without holding the lock. A racing insert for the same module is
        // harmless, both results are equal.
        let resolved = Arc::new(lines::resolve(module, &self.options)?);

        let mut cache = self.cache.lock().unwrap_or_else(|err| err.into_inner());
        let cached = cache.entry(path.clone()).or_insert(resolved);

        Ok(cached.clone())
    }

    pub fn get(&self, path: &FilePath) -> Option<Arc<SourceLines>> {
        let cache = self.cache.lock().unwrap_or_else(|err| err.into_inner());
        cache.get(path).cloned()
    }
}

impl Default for DebugInfoCache {
    fn default() -> Self {
        Self::new(ResolveOptions::default())
    }
}

/// Source file text, read once per path. Unreadable files are remembered as missing.
#[derive(Debug, Default)]
pub struct SourceCache {
    files: HashMap<FilePath, Option<Arc<[String]>>>,
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, path: &FilePath) -> Option<Arc<[String]>> {
        self.files
            .entry(path.clone())
            .or_insert_with(|| read_lines(path))
            .clone()
    }

    /// Whether `path` names a readable file, without reading it.
    pub fn exists(&self, path: &FilePath) -> bool {
        match self.files.get(path) {
            Some(text) => text.is_some(),
            None => std::fs::File::open(path).is_ok(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn read_lines(path: &FilePath) -> Option<Arc<[String]>> {
    match std::fs::read(path) {
        Ok(data) => {
            let text = String::from_utf8_lossy(&data);
            Some(text.lines().map(str::to_owned).collect())
        }
        Err(err) => {
            debug!("unable to read source file `{path}`: {err}");
            None
        }
    }
}
