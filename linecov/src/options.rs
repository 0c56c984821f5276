// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::ffi::OsString;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use coverage::allowlist::AllowList;
use coverage::filter::CoverageFilter;
use coverage::record::{StartInfo, DEFAULT_MAX_UNMATCHED_PATHS};
use coverage_file_format::export::{ExportKind, ExportSpec};
use debuggable_module::path::{PathSubstitution, PathSubstitutions};
use log::LevelFilter;

/// Record line coverage of a native program, merge persisted runs, and export reports.
#[derive(Parser, Debug)]
#[command(name = "linecov", version, args_override_self = true)]
pub struct Options {
    /// Include modules matching the pattern.
    #[arg(long = "modules", value_name = "GLOB")]
    pub modules: Vec<String>,

    /// Exclude modules matching the pattern.
    #[arg(long, value_name = "GLOB")]
    pub excluded_modules: Vec<String>,

    /// Include source files matching the pattern.
    #[arg(long = "sources", value_name = "GLOB")]
    pub sources: Vec<String>,

    /// Exclude source files matching the pattern.
    #[arg(long, value_name = "GLOB")]
    pub excluded_sources: Vec<String>,

    #[arg(long, value_name = "FILE")]
    pub module_allowlist: Vec<PathBuf>,

    #[arg(long, value_name = "FILE")]
    pub source_allowlist: Vec<PathBuf>,

    /// Never count lines whose text matches the regex.
    #[arg(long, value_name = "REGEX")]
    pub excluded_line_regex: Vec<String>,

    /// Only count lines added or changed by the diff. Relative paths in the diff are
    /// resolved against ROOT.
    #[arg(long, value_name = "DIFF[?ROOT]")]
    pub unified_diff: Vec<DiffArg>,

    /// Read sources built under BUILD from LOCAL instead.
    #[arg(long, value_name = "BUILD?LOCAL")]
    pub substitute_source_path: Vec<PathSubstitution>,

    /// Also record processes the target creates.
    #[arg(long)]
    pub cover_children: bool,

    /// Keep running after an unhandled crash signal.
    #[arg(long)]
    pub continue_after_exception: bool,

    /// Attribute code inlined by the optimizer to its source lines.
    #[arg(long)]
    pub optimized_build: bool,

    /// Report coverage per source file instead of per module.
    #[arg(long)]
    pub aggregate_by_file: bool,

    /// Persisted coverage to merge into the result.
    #[arg(long, value_name = "FILE")]
    pub input_coverage: Vec<PathBuf>,

    /// Fail the whole merge on an unreadable input instead of skipping it.
    #[arg(long)]
    pub abort_on_invalid_input: bool,

    /// Output format, and optionally where to write it.
    #[arg(long, value_name = "KIND[:PATH]")]
    pub export_type: Vec<ExportSpec>,

    #[arg(long, value_name = "DIR")]
    pub working_dir: Option<PathBuf>,

    /// Record a running process instead of launching one.
    #[arg(long, value_name = "PID", conflicts_with = "program")]
    pub attach: Option<i32>,

    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Read more options from a file, one per line.
    #[arg(long, value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    #[arg(short, long)]
    pub quiet: bool,

    /// Program to record, and its arguments.
    #[arg(last = true, value_name = "PROGRAM")]
    pub program: Vec<OsString>,
}

/// A `--unified-diff` argument.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiffArg {
    pub path: PathBuf,
    pub root: Option<PathBuf>,
}

impl FromStr for DiffArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, root) = match s.split_once('?') {
            Some((path, root)) => (path, Some(root)),
            None => (s, None),
        };

        if path.is_empty() || root.map_or(false, str::is_empty) {
            return Err(format!("expected `DIFF[?ROOT]`, found `{s}`"));
        }

        Ok(Self {
            path: path.into(),
            root: root.map(PathBuf::from),
        })
    }
}

/// Engine switches for a live recording.
#[derive(Clone, Debug, Default)]
pub struct RecordSettings {
    pub substitutions: PathSubstitutions,
    pub cover_children: bool,
    pub continue_after_exception: bool,
    pub optimized_build: bool,
    pub max_unmatched_paths: Option<usize>,
    pub timeout: Option<Duration>,
}

/// Validated, immutable configuration of one invocation.
#[derive(Debug)]
pub struct Config {
    pub filter: CoverageFilter,
    pub settings: RecordSettings,
    pub start: Option<StartInfo>,
    pub inputs: Vec<PathBuf>,
    pub abort_on_invalid_input: bool,
    pub aggregate_by_file: bool,
    pub exports: Vec<ExportSpec>,
}

impl Options {
    /// Parse `args`, then again with the options of `--config-file` placed first, so
    /// the command line wins.
    pub fn from_args(args: Vec<OsString>) -> Result<Self> {
        let options = Self::try_parse_from(&args)?;

        let path = match &options.config_file {
            Some(path) => path,
            None => return Ok(options),
        };

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read config file `{}`", path.display()))?;
        let extra = config_file_args(&text)
            .with_context(|| format!("invalid config file `{}`", path.display()))?;

        let mut expanded = args[..1].to_vec();
        expanded.extend(extra);
        expanded.extend_from_slice(&args[1..]);

        Ok(Self::try_parse_from(expanded)?)
    }

    pub fn log_level(&self) -> LevelFilter {
        if self.verbose {
            LevelFilter::Debug
        } else if self.quiet {
            LevelFilter::Error
        } else {
            LevelFilter::Info
        }
    }

    pub fn config(&self) -> Result<Config> {
        let start = self.start_info()?;

        if start.is_none() && self.input_coverage.is_empty() {
            bail!("nothing to do: give a program after `--`, `--attach` or `--input-coverage`");
        }

        let exports = if self.export_type.is_empty() {
            vec![ExportSpec::new(ExportKind::Binary)]
        } else {
            self.export_type.clone()
        };

        Ok(Config {
            filter: self.filter()?,
            settings: self.settings(),
            start,
            inputs: self.input_coverage.clone(),
            abort_on_invalid_input: self.abort_on_invalid_input,
            aggregate_by_file: self.aggregate_by_file,
            exports,
        })
    }

    fn start_info(&self) -> Result<Option<StartInfo>> {
        if let Some(pid) = self.attach {
            if self.working_dir.is_some() {
                bail!("`--working-dir` cannot be used with `--attach`");
            }

            return Ok(Some(StartInfo::Attach { pid }));
        }

        let (program, args) = match self.program.split_first() {
            Some(split) => split,
            None => return Ok(None),
        };

        Ok(Some(StartInfo::Launch {
            program: program.into(),
            args: args.to_vec(),
            working_dir: self.working_dir.clone(),
        }))
    }

    fn filter(&self) -> Result<CoverageFilter> {
        let mut modules = AllowList::new(&self.modules, &self.excluded_modules)?;
        for path in &self.module_allowlist {
            modules.extend(&AllowList::load(path)?)?;
        }

        let mut sources = AllowList::new(&self.sources, &self.excluded_sources)?;
        for path in &self.source_allowlist {
            sources.extend(&AllowList::load(path)?)?;
        }

        let mut builder = CoverageFilter::builder().modules(modules).sources(sources);

        for regex in &self.excluded_line_regex {
            builder = builder.excluded_line_regex(regex);
        }

        for diff in &self.unified_diff {
            builder = builder.unified_diff(&diff.path, diff.root.as_deref())?;
        }

        Ok(builder.build()?)
    }

    fn settings(&self) -> RecordSettings {
        // Verbose runs list every unmatched source path.
        let max_unmatched_paths = if self.verbose {
            None
        } else {
            Some(DEFAULT_MAX_UNMATCHED_PATHS)
        };

        RecordSettings {
            substitutions: PathSubstitutions::new(self.substitute_source_path.clone()),
            cover_children: self.cover_children,
            continue_after_exception: self.continue_after_exception,
            optimized_build: self.optimized_build,
            max_unmatched_paths,
            timeout: self.timeout.map(Duration::from_secs),
        }
    }
}

/// Turn config file lines into long options.
///
/// Each line is `name`, `name=value` or `name value`, with or without a leading `--`.
/// Blank lines and lines starting with `#` are ignored.
fn config_file_args(text: &str) -> Result<Vec<OsString>> {
    let mut args = vec![];

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let option = line.strip_prefix("--").unwrap_or(line);

        let (name, value) = match option.split_once(|c: char| c == '=' || c.is_whitespace()) {
            Some((name, value)) => (name, Some(value.trim())),
            None => (option, None),
        };

        if name.is_empty() {
            bail!("line {}: expected an option, found `{line}`", index + 1);
        }

        let arg = match value {
            Some(value) => format!("--{name}={value}"),
            None => format!("--{name}"),
        };

        args.push(arg.into());
    }

    Ok(args)
}
