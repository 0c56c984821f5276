// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Unified diff parsing, for selecting only the lines a change touched.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use debuggable_module::path::FilePath;

use crate::error::FilterConfigError;
use crate::source::Line;

/// Added or modified lines of one file, named by a diff.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiffSpec {
    path: PathBuf,
    changed: BTreeSet<u32>,
}

impl DiffSpec {
    pub fn new(path: impl Into<PathBuf>, changed: impl IntoIterator<Item = u32>) -> Self {
        Self {
            path: path.into(),
            changed: changed.into_iter().collect(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn changed(&self) -> impl Iterator<Item = u32> + '_ {
        self.changed.iter().copied()
    }

    /// An absolute diff path must name `file` exactly. A relative one matches any file
    /// whose trailing path components are equal to it.
    pub fn matches_file(&self, file: &FilePath) -> bool {
        if cfg!(windows) {
            let spec = self.path.to_string_lossy().to_lowercase();
            let file = file.as_str().to_lowercase();
            return matches_path(Path::new(&spec), Path::new(&file));
        }

        matches_path(&self.path, file.as_path())
    }

    pub fn contains(&self, line: Line) -> bool {
        self.changed.contains(&line.number())
    }
}

fn matches_path(spec: &Path, file: &Path) -> bool {
    if spec.is_absolute() {
        spec == file
    } else {
        file.ends_with(spec)
    }
}

pub struct UnifiedDiff;

impl UnifiedDiff {
    /// Read the diff file at `path`. Relative target paths are joined onto `root`.
    pub fn load(
        path: impl AsRef<Path>,
        root: Option<&Path>,
    ) -> Result<Vec<DiffSpec>, FilterConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| FilterConfigError::Read {
            path: path.to_owned(),
            source,
        })?;

        Self::parse(&text, root)
    }

    pub fn parse(text: &str, root: Option<&Path>) -> Result<Vec<DiffSpec>, FilterConfigError> {
        let mut parser = Parser::new(root);

        for (index, line) in text.lines().enumerate() {
            parser
                .line(line)
                .map_err(|message| FilterConfigError::Diff {
                    line: index + 1,
                    message,
                })?;
        }

        Ok(parser.finish())
    }
}

#[derive(Default)]
struct Hunk {
    // Next line number in the new file.
    next: u32,
    old_remaining: u32,
    new_remaining: u32,
}

impl Hunk {
    fn is_open(&self) -> bool {
        self.old_remaining > 0 || self.new_remaining > 0
    }

    fn advance(&mut self) -> Result<(), String> {
        self.next = self
            .next
            .checked_add(1)
            .ok_or_else(|| format!("line number overflow after line {}", self.next))?;

        Ok(())
    }
}

struct Parser<'r> {
    root: Option<&'r Path>,
    specs: Vec<DiffSpec>,

    // Header of the file being read, `None` for deleted files.
    current: Option<Option<DiffSpec>>,
    old_header: Option<String>,
    hunk: Hunk,
}

impl<'r> Parser<'r> {
    fn new(root: Option<&'r Path>) -> Self {
        Self {
            root,
            specs: vec![],
            current: None,
            old_header: None,
            hunk: Hunk::default(),
        }
    }

    fn line(&mut self, line: &str) -> Result<(), String> {
        if self.hunk.is_open() {
            return self.hunk_line(line);
        }

        if let Some(old) = line.strip_prefix("--- ") {
            self.old_header = Some(header_path(old).to_owned());
            return Ok(());
        }

        if let Some(new) = line.strip_prefix("+++ ") {
            self.start_file(header_path(new));
            return Ok(());
        }

        if let Some(range) = line.strip_prefix("@@ ") {
            if self.current.is_none() {
                return Err("hunk before any `+++` file header".into());
            }

            self.hunk = parse_hunk_header(range)?;
            return Ok(());
        }

        // `diff --git`, `index`, mode lines and other preamble.
        Ok(())
    }

    fn hunk_line(&mut self, line: &str) -> Result<(), String> {
        let hunk = &mut self.hunk;

        match line.as_bytes().first() {
            Some(b'+') => {
                if hunk.new_remaining == 0 {
                    return Err("hunk has more added lines than its header declares".into());
                }

                if let Some(Some(spec)) = &mut self.current {
                    spec.changed.insert(hunk.next);
                }

                hunk.advance()?;
                hunk.new_remaining -= 1;
            }
            Some(b'-') => {
                if hunk.old_remaining == 0 {
                    return Err("hunk has more removed lines than its header declares".into());
                }

                hunk.old_remaining -= 1;
            }
            // `\ No newline at end of file`
            Some(b'\\') => {}
            // Context. Some tools strip the leading space of blank context lines.
            Some(b' ') | None => {
                if hunk.old_remaining == 0 || hunk.new_remaining == 0 {
                    return Err("hunk has more context lines than its header declares".into());
                }

                hunk.advance()?;
                hunk.old_remaining -= 1;
                hunk.new_remaining -= 1;
            }
            Some(_) => {
                return Err(format!("unexpected line in hunk: `{line}`"));
            }
        }

        Ok(())
    }

    fn start_file(&mut self, new: &str) {
        self.finish_file();

        let old = self.old_header.take();

        if new == "/dev/null" {
            self.current = Some(None);
            return;
        }

        // Git-style headers carry `a/` and `b/` prefixes.
        let git_style = matches!(&old, Some(old) if old.starts_with("a/") || old == "/dev/null");
        let new = match new.strip_prefix("b/") {
            Some(stripped) if git_style => stripped,
            _ => new,
        };

        let path = match self.root {
            Some(root) if Path::new(new).is_relative() => root.join(new),
            _ => PathBuf::from(new),
        };

        self.current = Some(Some(DiffSpec::new(path, [])));
    }

    fn finish_file(&mut self) {
        if let Some(Some(spec)) = self.current.take() {
            self.specs.push(spec);
        }
    }

    fn finish(mut self) -> Vec<DiffSpec> {
        self.finish_file();
        self.specs
    }
}

// Drop the optional tab-separated timestamp.
fn header_path(header: &str) -> &str {
    header.split('\t').next().unwrap_or(header).trim_end()
}

// Parses `-<start>[,<count>] +<start>[,<count>] @@[ <section>]`.
fn parse_hunk_header(text: &str) -> Result<Hunk, String> {
    let invalid = || format!("invalid hunk header: `@@ {text}`");

    let mut parts = text.split_whitespace();
    let old = parts.next().and_then(|p| p.strip_prefix('-')).ok_or_else(invalid)?;
    let new = parts.next().and_then(|p| p.strip_prefix('+')).ok_or_else(invalid)?;

    if parts.next() != Some("@@") {
        return Err(invalid());
    }

    let (_, old_count) = parse_range(old).ok_or_else(invalid)?;
    let (new_start, new_count) = parse_range(new).ok_or_else(invalid)?;

    // The hunk must end within the line number range.
    if new_start.checked_add(new_count).is_none() {
        return Err(format!("hunk range out of bounds: `@@ {text}`"));
    }

    Ok(Hunk {
        next: new_start,
        old_remaining: old_count,
        new_remaining: new_count,
    })
}

fn parse_range(range: &str) -> Option<(u32, u32)> {
    match range.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((range.parse().ok()?, 1)),
    }
}
