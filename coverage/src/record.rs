// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Result};
use debuggable_module::lines::ResolveOptions;
use debuggable_module::loader::Loader;
use debuggable_module::path::{FilePath, PathSubstitutions};
use debuggable_module::{Address, Offset};

use crate::binary::{DebugInfoCache, ModuleSites};
use crate::cancel::Cancellation;
use crate::error::StartupError;
use crate::filter::CoverageFilter;
use crate::source::RunCoverage;
use crate::timer::{Interruption, Supervised};
use crate::warnings::{UnmatchedPaths, Warning, Warnings};

#[cfg(target_os = "linux")]
pub mod linux;

/// How long an interrupted debugger gets to report before its results are snapshotted.
const GRACE_PERIOD: Duration = Duration::from_secs(5);

// `128 + SIGINT`, like a shell reports a target stopped with ctrl-c.
const INTERRUPTED_EXIT_CODE: i32 = 130;

pub const DEFAULT_MAX_UNMATCHED_PATHS: usize = 30;

/// How the root target process comes under debugger control.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StartInfo {
    Launch {
        program: PathBuf,
        args: Vec<OsString>,
        working_dir: Option<PathBuf>,
    },
    Attach {
        pid: i32,
    },
}

impl StartInfo {
    pub fn launch(
        program: impl Into<PathBuf>,
        args: impl IntoIterator<Item = impl Into<OsString>>,
    ) -> Self {
        Self::Launch {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
        }
    }

    /// The launched program, if any.
    pub fn program(&self) -> Option<&Path> {
        match self {
            Self::Launch { program, .. } => Some(program),
            Self::Attach { .. } => None,
        }
    }
}

pub struct CoverageRecorder {
    start: StartInfo,
    filter: Arc<CoverageFilter>,
    substitutions: PathSubstitutions,
    cover_children: bool,
    continue_after_exception: bool,
    optimized_build: bool,
    max_unmatched_paths: Option<usize>,
    timeout: Option<Duration>,
    cancellation: Cancellation,
    loader: Arc<Loader>,
    cache: Option<Arc<DebugInfoCache>>,
}

impl CoverageRecorder {
    pub fn new(start: StartInfo) -> Self {
        Self {
            start,
            filter: Arc::new(CoverageFilter::default()),
            substitutions: PathSubstitutions::default(),
            cover_children: false,
            continue_after_exception: false,
            optimized_build: false,
            max_unmatched_paths: Some(DEFAULT_MAX_UNMATCHED_PATHS),
            timeout: None,
            cancellation: Cancellation::new(),
            loader: Arc::new(Loader::new()),
            cache: None,
        }
    }

    pub fn filter(mut self, filter: impl Into<Arc<CoverageFilter>>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn substitutions(mut self, substitutions: PathSubstitutions) -> Self {
        self.substitutions = substitutions;
        self
    }

    pub fn cover_children(mut self, cover_children: bool) -> Self {
        self.cover_children = cover_children;
        self
    }

    pub fn continue_after_exception(mut self, continue_after_exception: bool) -> Self {
        self.continue_after_exception = continue_after_exception;
        self
    }

    /// Attribute inlined code to the lines of the inlined functions.
    pub fn optimized_build(mut self, optimized_build: bool) -> Self {
        self.optimized_build = optimized_build;
        self
    }

    /// Limit individual unmatched source path warnings. `None` reports every path.
    pub fn max_unmatched_paths(mut self, max_unmatched_paths: Option<usize>) -> Self {
        self.max_unmatched_paths = max_unmatched_paths;
        self
    }

    pub fn timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.timeout = timeout.into();
        self
    }

    pub fn cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn loader(mut self, loader: impl Into<Arc<Loader>>) -> Self {
        self.loader = loader.into();
        self
    }

    /// Share resolved line tables across recordings.
    ///
    /// The cache's own resolve options are used, `substitutions` and `optimized_build`
    /// are then ignored.
    pub fn debuginfo_cache(mut self, cache: impl Into<Arc<DebugInfoCache>>) -> Self {
        self.cache = Some(cache.into());
        self
    }

    #[cfg(target_os = "linux")]
    pub fn record(self) -> Result<Recorded> {
        use linux::debugger::{Debugger, DebuggerOptions, ProcessTree};
        use linux::LinuxRecorder;

        let cache = self.cache.unwrap_or_else(|| {
            Arc::new(DebugInfoCache::new(ResolveOptions {
                substitutions: self.substitutions,
                inlinees: self.optimized_build,
            }))
        });

        let collector = Arc::new(Mutex::new(Collector::new(self.max_unmatched_paths)));
        lock(&collector).launching();

        let tree = ProcessTree::default();

        let worker = {
            let collector = collector.clone();
            let tree = tree.clone();
            let loader = self.loader.clone();
            let filter = self.filter.clone();
            let start = self.start;
            let options = DebuggerOptions {
                cover_children: self.cover_children,
            };
            let continue_after_exception = self.continue_after_exception;

            move || -> Result<()> {
                let mut recorder = LinuxRecorder::new(
                    &loader,
                    filter,
                    cache,
                    collector,
                    continue_after_exception,
                );
                let dbg = Debugger::new(&mut recorder, options, tree);
                dbg.run(start)
            }
        };

        let supervised = crate::timer::supervise(
            worker,
            self.timeout,
            GRACE_PERIOD,
            &self.cancellation,
            |_| tree.kill_all(),
        )?;

        conclude(&collector, supervised)
    }

    #[cfg(not(target_os = "linux"))]
    pub fn record(self) -> Result<Recorded> {
        Err(StartupError::Unsupported.into())
    }
}

/// Result of a live run.
#[derive(Clone, Debug)]
pub struct Recorded {
    pub coverage: RunCoverage,
    pub warnings: Warnings,

    /// The run was stopped early. Coverage is partial.
    pub cancelled: bool,
}

// Turn the worker outcome and whatever it collected into a recording.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn conclude(
    collector: &Mutex<Collector>,
    supervised: Supervised<Result<()>>,
) -> Result<Recorded> {
    let interrupted = supervised.interrupted;

    match supervised.output {
        Some(Err(err)) if interrupted.is_none() || err.is::<StartupError>() => {
            return Err(err);
        }
        Some(Err(err)) => {
            // Expected when the tree was killed under the debugger.
            debug!("debugger stopped after interruption: {err:#}");
        }
        Some(Ok(())) => {}
        None => {
            warn!("snapshotting coverage of an unresponsive debugger");
        }
    }

    let (mut coverage, mut warnings) = lock(collector).finish();

    match interrupted {
        Some(Interruption::Cancelled) => warnings.push(Warning::Cancelled),
        Some(Interruption::Timeout(timeout)) => warnings.push(Warning::Timeout(timeout)),
        None => {}
    }

    if interrupted.is_some() && coverage.exit_code.is_none() {
        coverage.exit_code = Some(INTERRUPTED_EXIT_CODE);
    }

    Ok(Recorded {
        coverage,
        warnings,
        cancelled: interrupted.is_some(),
    })
}

fn lock(collector: &Mutex<Collector>) -> MutexGuard<'_, Collector> {
    // A panicking worker leaves consistent data: every update is a single insert.
    collector.lock().unwrap_or_else(|err| err.into_inner())
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RecorderState {
    #[default]
    NotStarted,
    Launching,
    Running,
    Exited,
}

/// What the debugger reports while a process tree is running.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DebugEvent {
    ModuleLoaded {
        pid: i32,
        path: FilePath,
        base: Address,
    },
    Breakpoint {
        pid: i32,
        module: usize,
        offset: Offset,
    },
    Exception {
        pid: i32,
        signal: String,
        handled: bool,
    },
    ThreadCreated {
        pid: i32,
        tid: i32,
    },
    ProcessCreated {
        pid: i32,
        parent: Option<i32>,
    },
    ProcessExited {
        pid: i32,
        exit_code: i32,
    },
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EventCounts {
    pub modules: usize,
    pub breakpoints: usize,
    pub exceptions: usize,
    pub threads: usize,
    pub processes: usize,
}

/// The run under construction, shared by the debugger and the waiting thread.
pub struct Collector {
    state: RecorderState,
    root: Option<i32>,
    coverage: RunCoverage,

    // Parallel to `coverage.modules`.
    sites: Vec<Arc<ModuleSites>>,

    warnings: Warnings,
    unmatched: UnmatchedPaths,
    counts: EventCounts,
}

impl Collector {
    pub fn new(max_unmatched_paths: Option<usize>) -> Self {
        Self {
            state: RecorderState::NotStarted,
            root: None,
            coverage: RunCoverage::default(),
            sites: vec![],
            warnings: Warnings::new(),
            unmatched: UnmatchedPaths::new(max_unmatched_paths),
            counts: EventCounts::default(),
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn counts(&self) -> EventCounts {
        self.counts
    }

    pub fn launching(&mut self) {
        self.state = RecorderState::Launching;
    }

    pub fn observe(&mut self, event: &DebugEvent) {
        trace!("debug event: {event:?}");

        match event {
            DebugEvent::ProcessCreated { pid, parent: None } => {
                self.root = Some(*pid);
                self.state = RecorderState::Running;
                self.counts.processes += 1;
            }
            DebugEvent::ProcessCreated { .. } => self.counts.processes += 1,
            DebugEvent::ProcessExited { pid, exit_code } => {
                if self.root == Some(*pid) {
                    info!("target exited with code {exit_code}");
                    self.coverage.exit_code = Some(*exit_code);
                    self.state = RecorderState::Exited;
                }
            }
            DebugEvent::ThreadCreated { .. } => self.counts.threads += 1,
            DebugEvent::ModuleLoaded { .. } => self.counts.modules += 1,
            DebugEvent::Breakpoint { .. } => self.counts.breakpoints += 1,
            DebugEvent::Exception { .. } => self.counts.exceptions += 1,
        }
    }

    pub fn warnings_mut(&mut self) -> &mut Warnings {
        &mut self.warnings
    }

    /// Split borrow for `binary::find_coverage_sites()`.
    pub fn unmatched_and_warnings(&mut self) -> (&mut UnmatchedPaths, &mut Warnings) {
        (&mut self.unmatched, &mut self.warnings)
    }

    /// Add the sites of a module to the run, returning the module index.
    ///
    /// A module loaded again, by a child process or after a reload, keeps its first index
    /// and coverage.
    pub fn add_module(&mut self, sites: ModuleSites) -> usize {
        if let Some(index) = self
            .coverage
            .modules
            .iter()
            .position(|m| m.path == sites.coverage.path)
        {
            return index;
        }

        self.coverage.modules.push(sites.coverage.clone());
        self.sites.push(Arc::new(sites));

        self.sites.len() - 1
    }

    pub fn sites(&self, module: usize) -> Option<Arc<ModuleSites>> {
        self.sites.get(module).cloned()
    }

    /// Count the lines of a breakpoint. A line counts at most once per live run.
    pub fn record_hit(&mut self, module: usize, offset: Offset) -> Result<()> {
        let Some(sites) = self.sites.get(module) else {
            bail!("no module with index {module}");
        };

        let Some(locations) = sites.offsets.get(&offset) else {
            bail!("no coverage site at offset {offset:x} of {}", sites.coverage.path);
        };

        let coverage = &mut self.coverage.modules[module];

        for location in locations {
            let line = coverage
                .files
                .get_mut(&location.file)
                .and_then(|file| file.lines.get_mut(&location.line));

            if let Some(line) = line {
                if !line.count.reached() {
                    line.hit();
                }
            }
        }

        Ok(())
    }

    /// Take the collected run, leaving an empty one.
    pub fn finish(&mut self) -> (RunCoverage, Warnings) {
        self.unmatched.finish(&mut self.warnings);

        let coverage = std::mem::take(&mut self.coverage);
        let warnings = std::mem::take(&mut self.warnings);
        self.sites.clear();

        (coverage, warnings)
    }
}
