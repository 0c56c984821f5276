// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Source line tables for modules.
//!
//! Maps each source line named by a module's debug info to the module-relative address
//! ranges of the machine code generated for it.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::path::Path;

use symbolic::debuginfo::{Function, Object};

use crate::error::SymbolLoadError;
use crate::path::{FilePath, PathSubstitutions};
use crate::{Module, Offset};

#[derive(Clone, Debug, Default)]
pub struct ResolveOptions {
    /// Rewrites applied to absolute source paths before they are emitted.
    pub substitutions: PathSubstitutions,

    /// Also resolve the line records of inlined functions.
    ///
    /// When unset, inlined code is only attributed to its call site.
    pub inlinees: bool,
}

/// Code ranges of one source line, keyed by start offset.
///
/// Ranges sharing a start offset are merged into the longest one.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AddressRanges {
    ranges: BTreeMap<Offset, u64>,
}

impl AddressRanges {
    pub fn insert(&mut self, start: Offset, size: u64) {
        let known = self.ranges.entry(start).or_insert(size);
        *known = u64::max(*known, size);
    }

    pub fn starts(&self) -> impl Iterator<Item = Offset> + '_ {
        self.ranges.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = Range<Offset>> + '_ {
        self.ranges
            .iter()
            .map(|(start, size)| *start..Offset(start.0.saturating_add(*size)))
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SourceLines {
    files: BTreeMap<FilePath, BTreeMap<u32, AddressRanges>>,
}

impl SourceLines {
    pub fn insert(&mut self, file: FilePath, line: u32, start: Offset, size: u64) {
        self.files
            .entry(file)
            .or_default()
            .entry(line)
            .or_default()
            .insert(start, size);
    }

    pub fn files(&self) -> impl Iterator<Item = (&FilePath, &BTreeMap<u32, AddressRanges>)> {
        self.files.iter()
    }

    pub fn file(&self, path: &FilePath) -> Option<&BTreeMap<u32, AddressRanges>> {
        self.files.get(path)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Build the source line table of `module` from its debug info.
///
/// A module without debug info has an empty table.
pub fn resolve<'data>(
    module: &dyn Module<'data>,
    options: &ResolveOptions,
) -> Result<SourceLines, SymbolLoadError> {
    let path = module.debuginfo_path();

    let object =
        Object::parse(module.debuginfo_data()).map_err(|err| SymbolLoadError::Parse {
            path: path.clone(),
            message: err.to_string(),
        })?;

    if !object.has_debug_info() {
        debug!("no debug info in `{path}`");
        return Ok(SourceLines::default());
    }

    let session = object
        .debug_session()
        .map_err(|err| SymbolLoadError::Session {
            path: path.clone(),
            message: err.to_string(),
        })?;

    let mut resolver = Resolver::new(options);

    for function in session.functions() {
        let function = function.map_err(|err| SymbolLoadError::Corrupt {
            path: path.clone(),
            message: err.to_string(),
        })?;

        resolver.add_function(&function);
    }

    debug!(
        "resolved {} source files for `{}`",
        resolver.lines.files.len(),
        module.executable_path()
    );

    Ok(resolver.lines)
}

struct Resolver<'o> {
    options: &'o ResolveOptions,
    lines: SourceLines,

    // Joined debug info path to final source path, `None` if unusable.
    paths: HashMap<String, Option<FilePath>>,
}

impl<'o> Resolver<'o> {
    fn new(options: &'o ResolveOptions) -> Self {
        Self {
            options,
            lines: SourceLines::default(),
            paths: HashMap::new(),
        }
    }

    fn add_function(&mut self, function: &Function) {
        let compilation_dir = String::from_utf8_lossy(function.compilation_dir);

        for line in &function.lines {
            // Not attributable to source.
            if line.line == 0 {
                continue;
            }

            let size = line.size.unwrap_or(1);
            if size == 0 {
                continue;
            }

            let Ok(number) = u32::try_from(line.line) else {
                continue;
            };

            let raw = line.file.path_str();
            let Some(file) = self.source_path(&compilation_dir, raw) else {
                continue;
            };

            // `line.address` is already relative to the image base.
            self.lines.insert(file, number, Offset(line.address), size);
        }

        if self.options.inlinees {
            for inlinee in &function.inlinees {
                self.add_function(inlinee);
            }
        }
    }

    fn source_path(&mut self, compilation_dir: &str, raw: String) -> Option<FilePath> {
        // Relative paths only mean something together with their compilation dir.
        let key = Path::new(compilation_dir)
            .join(&raw)
            .to_string_lossy()
            .into_owned();

        if let Some(known) = self.paths.get(&key) {
            return known.clone();
        }

        let path = source_path(compilation_dir, &raw, &self.options.substitutions);

        if path.is_none() {
            trace!("unusable source path in debug info: `{raw}`");
        }

        self.paths.insert(key, path.clone());
        path
    }
}

/// Make a debug info source path absolute, normalize it, then apply substitutions.
pub fn source_path(
    compilation_dir: &str,
    raw: &str,
    substitutions: &PathSubstitutions,
) -> Option<FilePath> {
    if raw.is_empty() {
        return None;
    }

    let joined = Path::new(compilation_dir).join(raw);
    let normal = FilePath::normalized(joined).ok()?;
    let substituted = substitutions.apply(normal.as_path());

    FilePath::new(substituted.to_string_lossy().into_owned()).ok()
}
