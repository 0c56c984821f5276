// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use debuggable_module::linux::LinuxModule;
use debuggable_module::load_module::LoadModule;
use debuggable_module::loader::Loader;
use debuggable_module::path::FilePath;
use pete::Tracee;

pub mod debugger;
use debugger::{
    BreakpointSite, DebugEventHandler, DebuggerContext, Exception, ExceptionAction, ModuleImage,
};

use crate::binary::{find_coverage_sites, DebugInfoCache, SourceCache};
use crate::filter::CoverageFilter;
use crate::record::{lock, Collector, DebugEvent};
use crate::warnings::Warning;

pub struct LinuxRecorder<'data> {
    loader: &'data Loader,
    filter: Arc<CoverageFilter>,
    cache: Arc<DebugInfoCache>,
    collector: Arc<Mutex<Collector>>,
    continue_after_exception: bool,
    sources: SourceCache,

    // Run module index by path, `None` for modules without coverage sites.
    planned: HashMap<FilePath, Option<usize>>,
}

impl<'data> LinuxRecorder<'data> {
    pub fn new(
        loader: &'data Loader,
        filter: Arc<CoverageFilter>,
        cache: Arc<DebugInfoCache>,
        collector: Arc<Mutex<Collector>>,
        continue_after_exception: bool,
    ) -> Self {
        Self {
            loader,
            filter,
            cache,
            collector,
            continue_after_exception,
            sources: SourceCache::new(),
            planned: HashMap::new(),
        }
    }

    // Decide once per module path whether and where it is instrumented.
    fn plan(&mut self, path: &FilePath) -> Option<usize> {
        if !self.filter.is_module_selected(path) {
            debug!("skipping unselected module: {path}");
            return None;
        }

        let module = match LinuxModule::load(self.loader, path.clone()) {
            Ok(module) => module,
            Err(err) => {
                debug!("skipping unloadable module `{path}`: {err:#}");
                return None;
            }
        };

        let lines = match self.cache.get_or_insert(&module) {
            Ok(lines) => lines,
            Err(err) => {
                lock(&self.collector).warnings_mut().push(Warning::ModuleSkipped {
                    module: path.clone(),
                    reason: err.to_string(),
                });
                return None;
            }
        };

        if lines.is_empty() {
            debug!("no source lines for module: {path}");
            return None;
        }

        let mut collector = lock(&self.collector);
        let (unmatched, warnings) = collector.unmatched_and_warnings();
        let sites = find_coverage_sites(
            path,
            &lines,
            &self.filter,
            &mut self.sources,
            unmatched,
            warnings,
        );

        if sites.is_empty() {
            debug!("no selected source files in module: {path}");
            return None;
        }

        Some(collector.add_module(sites))
    }

    fn do_on_module_load(
        &mut self,
        context: &mut DebuggerContext,
        tracee: &mut Tracee,
        image: &ModuleImage,
    ) -> Result<()> {
        let path = image.path();

        let index = match self.planned.get(path) {
            Some(index) => *index,
            None => {
                let index = self.plan(path);
                self.planned.insert(path.clone(), index);
                index
            }
        };

        let Some(index) = index else {
            return Ok(());
        };

        let Some(sites) = lock(&self.collector).sites(index) else {
            return Ok(());
        };

        for offset in sites.offsets.keys().copied() {
            let addr = image.base().offset_by(offset)?;
            let site = BreakpointSite {
                module: index,
                offset,
            };

            context.set_breakpoint(tracee, addr, site)?;
        }

        debug!(
            "armed {} breakpoints in `{path}` at {:x}",
            sites.offsets.len(),
            image.base()
        );

        Ok(())
    }

    fn do_on_exception(&mut self, exception: &Exception) -> ExceptionAction {
        let signal = format!("{:?}", exception.signal);

        let mut collector = lock(&self.collector);
        collector.observe(&DebugEvent::Exception {
            pid: exception.pid,
            signal: signal.clone(),
            handled: exception.handled,
        });

        if exception.handled {
            debug!(
                "{signal} at {:x} in {} is handled by the target",
                exception.address, exception.tid
            );
            return ExceptionAction::Continue;
        }

        collector.warnings_mut().push(Warning::Exception {
            pid: exception.pid,
            signal,
        });

        if self.continue_after_exception {
            ExceptionAction::Continue
        } else {
            ExceptionAction::Terminate
        }
    }
}

impl<'data> DebugEventHandler for LinuxRecorder<'data> {
    fn on_module_load(
        &mut self,
        context: &mut DebuggerContext,
        tracee: &mut Tracee,
        image: &ModuleImage,
    ) -> Result<()> {
        self.do_on_module_load(context, tracee, image)
    }

    fn on_breakpoint(
        &mut self,
        _context: &mut DebuggerContext,
        tracee: &mut Tracee,
        site: BreakpointSite,
    ) -> Result<()> {
        let mut collector = lock(&self.collector);

        collector.observe(&DebugEvent::Breakpoint {
            pid: tracee.pid.as_raw(),
            module: site.module,
            offset: site.offset,
        });
        collector.record_hit(site.module, site.offset)
    }

    fn on_exception(
        &mut self,
        _context: &mut DebuggerContext,
        exception: &Exception,
    ) -> Result<ExceptionAction> {
        Ok(self.do_on_exception(exception))
    }

    fn on_event(&mut self, event: DebugEvent) {
        lock(&self.collector).observe(&event);
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use debuggable_module::lines::ResolveOptions;
    use debuggable_module::Address;
    use pete::Signal;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::allowlist::AllowList;

    fn recorder(
        loader: &Loader,
        filter: CoverageFilter,
        continue_after_exception: bool,
    ) -> (LinuxRecorder<'_>, Arc<Mutex<Collector>>) {
        let collector = Arc::new(Mutex::new(Collector::new(None)));
        let recorder = LinuxRecorder::new(
            loader,
            Arc::new(filter),
            Arc::new(DebugInfoCache::new(ResolveOptions::default())),
            collector.clone(),
            continue_after_exception,
        );

        (recorder, collector)
    }

    fn segfault(handled: bool) -> Exception {
        Exception {
            pid: 100,
            tid: 101,
            signal: Signal::SIGSEGV,
            handled,
            address: Address(0x1000),
        }
    }

    #[test]
    fn test_handled_exception_continues_without_warning() {
        let loader = Loader::new();
        let (mut recorder, collector) = recorder(&loader, CoverageFilter::default(), false);

        let action = recorder.do_on_exception(&segfault(true));

        assert_eq!(action, ExceptionAction::Continue);

        let mut collector = lock(&collector);
        assert_eq!(collector.counts().exceptions, 1);

        let (_, warnings) = collector.finish();
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_unhandled_exception_terminates_by_default() {
        let loader = Loader::new();
        let (mut recorder, collector) = recorder(&loader, CoverageFilter::default(), false);

        let action = recorder.do_on_exception(&segfault(false));

        assert_eq!(action, ExceptionAction::Terminate);

        let (_, warnings) = lock(&collector).finish();
        assert_eq!(
            warnings.iter().cloned().collect::<Vec<_>>(),
            vec![Warning::Exception {
                pid: 100,
                signal: "SIGSEGV".into(),
            }]
        );
    }

    #[test]
    fn test_unhandled_exception_continues_when_asked() {
        let loader = Loader::new();
        let (mut recorder, collector) = recorder(&loader, CoverageFilter::default(), true);

        let action = recorder.do_on_exception(&segfault(false));

        assert_eq!(action, ExceptionAction::Continue);

        // Still reported.
        let (_, warnings) = lock(&collector).finish();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_excluded_module_contributes_nothing() -> Result<()> {
        let exe = FilePath::new(std::env::current_exe()?.to_string_lossy())?;

        let modules = AllowList::new(Vec::<String>::new(), [exe.to_string()])?;
        let filter = CoverageFilter::builder().modules(modules).build()?;

        let loader = Loader::new();
        let (mut recorder, collector) = recorder(&loader, filter, false);

        assert_eq!(recorder.plan(&exe), None);

        let (coverage, warnings) = lock(&collector).finish();
        assert!(coverage.modules.is_empty());
        assert!(warnings.is_empty());

        Ok(())
    }

    #[test]
    fn test_selected_module_is_planned_once() -> Result<()> {
        let exe = FilePath::new(std::env::current_exe()?.to_string_lossy())?;

        let loader = Loader::new();
        let (mut recorder, collector) = recorder(&loader, CoverageFilter::default(), false);

        let index = recorder.plan(&exe);
        assert_eq!(index, Some(0));

        // A reload of the same path reuses its index.
        assert_eq!(recorder.plan(&exe), index);

        let (coverage, _) = lock(&collector).finish();
        assert_eq!(coverage.modules.len(), 1);
        assert_eq!(coverage.modules[0].path, exe);

        Ok(())
    }
}
