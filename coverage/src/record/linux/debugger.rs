// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use debuggable_module::path::FilePath;
use debuggable_module::{Address, Offset};
use pete::ptracer::Options;
use pete::{Pid, Ptracer, Restart, Signal, Stop, Tracee};
use procfs::process::{MMPermissions, MMapPath, MemoryMap, Process};

use crate::error::StartupError;
use crate::record::{DebugEvent, StartInfo};

pub trait DebugEventHandler {
    fn on_module_load(
        &mut self,
        context: &mut DebuggerContext,
        tracee: &mut Tracee,
        image: &ModuleImage,
    ) -> Result<()>;

    /// Called once per breakpoint address, after the original code was restored.
    fn on_breakpoint(
        &mut self,
        context: &mut DebuggerContext,
        tracee: &mut Tracee,
        site: BreakpointSite,
    ) -> Result<()>;

    fn on_exception(
        &mut self,
        context: &mut DebuggerContext,
        exception: &Exception,
    ) -> Result<ExceptionAction>;

    /// Process and thread lifecycle notifications.
    fn on_event(&mut self, event: DebugEvent);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DebuggerOptions {
    /// Instrument child processes too. Otherwise they are detached.
    pub cover_children: bool,
}

pub struct Debugger<'eh> {
    context: DebuggerContext,
    event_handler: &'eh mut dyn DebugEventHandler,
}

impl<'eh> Debugger<'eh> {
    pub fn new(
        event_handler: &'eh mut dyn DebugEventHandler,
        options: DebuggerOptions,
        tree: ProcessTree,
    ) -> Self {
        let context = DebuggerContext::new(options, tree);

        Self {
            context,
            event_handler,
        }
    }

    pub fn run(mut self, start: StartInfo) -> Result<()> {
        let tracee = match start {
            StartInfo::Launch {
                program,
                args,
                working_dir,
            } => self.launch(program, args, working_dir)?,
            StartInfo::Attach { pid } => {
                // Detaching must not take the target down with us.
                self.context
                    .ptrace_options
                    .remove(Options::PTRACE_O_EXITKILL);

                self.attach(pid)?
            }
        };

        if let Err(err) = self.wait_on_stops(tracee) {
            // Ignore errors from processes that already exited.
            self.context.tree.kill_all();

            return Err(err);
        }

        Ok(())
    }

    fn launch(
        &mut self,
        program: PathBuf,
        args: Vec<OsString>,
        working_dir: Option<PathBuf>,
    ) -> Result<Tracee> {
        let mut cmd = Command::new(&program);
        cmd.args(args);

        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let child = self
            .context
            .tracer
            .spawn(cmd)
            .map_err(|err| StartupError::Launch {
                program: program.clone(),
                message: err.to_string(),
            })?;

        // Save the PID so the process can be killed on timeout.
        self.context.tree.insert(child.id() as i32);

        // Continue the tracee process until the return from its initial `execve()`.
        continue_to_init_execve(&mut self.context.tracer)
    }

    fn attach(&mut self, pid: i32) -> Result<Tracee> {
        let attach_error = |message: String| StartupError::Attach { pid, message };

        let tasks: Vec<i32> = Process::new(pid)
            .and_then(|process| process.tasks())
            .map_err(|err| attach_error(err.to_string()))?
            .flatten()
            .map(|task| task.tid)
            .collect();

        for tid in tasks {
            self.context
                .tracer
                .attach(Pid::from_raw(tid))
                .map_err(|err| attach_error(err.to_string()))?;

            self.context.threads.insert(tid, pid);
        }

        self.context.tree.insert(pid);

        // Other threads may stop first. Let them go until the leader reports.
        while let Some(mut tracee) = self.context.tracer.wait()? {
            if tracee.pid.as_raw() == pid {
                return Ok(tracee);
            }

            tracee.set_options(self.context.ptrace_options)?;
            tracee.pending = None;
            self.context.tracer.restart(tracee, Restart::Syscall)?;
        }

        Err(attach_error("process exited during attach".into()).into())
    }

    fn wait_on_stops(&mut self, mut tracee: Tracee) -> Result<()> {
        let root = tracee.pid.as_raw();
        tracee.set_options(self.context.ptrace_options)?;

        self.context.add_process(root);
        self.event_handler.on_event(DebugEvent::ProcessCreated {
            pid: root,
            parent: None,
        });

        // Initialize index of mapped modules now that we have a PID to query.
        self.update_images(&mut tracee)?;

        // Restart tracee and enter the main debugger loop.
        self.context.tracer.restart(tracee, Restart::Syscall)?;

        while let Some(tracee) = self.context.tracer.wait()? {
            self.handle_stop(tracee)?;
        }

        Ok(())
    }

    fn handle_stop(&mut self, mut tracee: Tracee) -> Result<()> {
        let tid = tracee.pid.as_raw();

        let first_stop =
            matches!(tracee.stop, Stop::Attach) || !self.context.threads.contains_key(&tid);

        if first_stop {
            return self.on_first_stop(tracee);
        }

        match tracee.stop {
            Stop::SyscallEnter => trace!("syscall-enter: {:?}", tracee.stop),
            Stop::SyscallExit => {
                if is_module_map_syscall(&tracee)? {
                    self.update_images(&mut tracee)?;
                }
            }
            Stop::SignalDelivery {
                signal: Signal::SIGTRAP,
            } => {
                if self.restore_and_call_if_breakpoint(&mut tracee)? {
                    tracee.pending = None;
                } else {
                    self.on_signal(&mut tracee, Signal::SIGTRAP)?;
                }
            }
            Stop::SignalDelivery { signal } => {
                self.on_signal(&mut tracee, signal)?;
            }
            Stop::Clone { new } => self.on_spawn(tid, new.as_raw(), SpawnKind::Clone)?,
            Stop::Fork { new } => self.on_spawn(tid, new.as_raw(), SpawnKind::Fork)?,
            Stop::Vfork { new } => self.on_spawn(tid, new.as_raw(), SpawnKind::Vfork)?,
            Stop::Exec { old } => {
                if self.on_exec(&mut tracee, old.as_raw())? == Resume::Detached {
                    return Ok(());
                }
            }
            Stop::Exiting { exit_code } => self.on_exiting(tid, exit_code),
            _ => {
                debug!("stop: {:?}", tracee.stop);
            }
        }

        self.restart(tracee);

        Ok(())
    }

    fn restart(&mut self, tracee: Tracee) {
        if let Err(err) = self.context.tracer.restart(tracee, Restart::Syscall) {
            error!("unable to restart tracee: {}", err);
        }
    }

    fn on_first_stop(&mut self, mut tracee: Tracee) -> Result<()> {
        let tid = tracee.pid.as_raw();

        // Threads we attached to ourselves.
        if self.context.threads.contains_key(&tid) {
            tracee.set_options(self.context.ptrace_options)?;
            tracee.pending = None;
            self.restart(tracee);
            return Ok(());
        }

        let Some(spawn) = self.context.spawned.remove(&tid) else {
            // The parent's clone event has not been reported yet. Hold the child.
            trace!("holding new tracee {tid} until its parent reports it");
            self.context.orphans.insert(tid, tracee);
            return Ok(());
        };

        self.adopt(tracee, spawn)
    }

    fn on_spawn(&mut self, parent_tid: i32, new: i32, kind: SpawnKind) -> Result<()> {
        let parent = self.context.tgid(parent_tid);

        let spawn = match kind {
            SpawnKind::Clone if thread_group(new).unwrap_or(new) == parent => {
                Spawn::Thread { tgid: parent }
            }
            SpawnKind::Vfork => Spawn::SharedMemory { parent },
            SpawnKind::Clone | SpawnKind::Fork => {
                let snapshot = self.context.processes.get(&parent).cloned();
                Spawn::Copy { parent, snapshot }
            }
        };

        self.context.spawned.insert(new, spawn);

        if let Some(child) = self.context.orphans.remove(&new) {
            if let Some(spawn) = self.context.spawned.remove(&new) {
                self.adopt(child, spawn)?;
            }
        }

        Ok(())
    }

    fn adopt(&mut self, mut tracee: Tracee, spawn: Spawn) -> Result<()> {
        let tid = tracee.pid.as_raw();
        tracee.pending = None;

        match spawn {
            Spawn::Thread { tgid } => {
                self.context.threads.insert(tid, tgid);
                self.event_handler
                    .on_event(DebugEvent::ThreadCreated { pid: tgid, tid });
            }
            Spawn::SharedMemory { parent } => {
                // Shares the parent's memory, so also its breakpoints, until `execve()`.
                self.context.threads.insert(tid, parent);
                self.context.vforked.insert(tid);
                self.context.tree.insert(tid);
                self.event_handler.on_event(DebugEvent::ProcessCreated {
                    pid: tid,
                    parent: Some(parent),
                });
            }
            Spawn::Copy { parent, snapshot } => {
                let snapshot = snapshot.unwrap_or_else(|| ProcessState::new(tid));

                if !self.context.options.cover_children {
                    // The child has a copy of every armed breakpoint.
                    snapshot.breakpoints.scrub(&mut tracee)?;
                    detach(tid)?;
                    debug!("detached uncovered child process {tid}");
                    return Ok(());
                }

                self.context.processes.insert(tid, snapshot.forked(tid));
                self.context.threads.insert(tid, tid);
                self.context.tree.insert(tid);
                self.event_handler.on_event(DebugEvent::ProcessCreated {
                    pid: tid,
                    parent: Some(parent),
                });
            }
        }

        tracee.set_options(self.context.ptrace_options)?;
        self.restart(tracee);

        Ok(())
    }

    fn on_exec(&mut self, tracee: &mut Tracee, old: i32) -> Result<Resume> {
        let pid = tracee.pid.as_raw();

        // A non-leader thread that execs takes over the leader's PID.
        if old != pid {
            self.context.threads.remove(&old);
        }

        // Every other thread of the group is gone.
        self.context
            .threads
            .retain(|tid, tgid| *tgid != pid || *tid == pid);

        let vforked = self.context.vforked.remove(&pid);

        if vforked && !self.context.options.cover_children {
            // The new image has no breakpoints.
            self.context.threads.remove(&pid);
            self.context.tree.remove(pid);
            detach(pid)?;
            debug!("detached uncovered child process {pid} after exec");
            return Ok(Resume::Detached);
        }

        info!("process {pid} exec");
        self.context.add_process(pid);
        self.update_images(tracee)?;

        Ok(Resume::Restart)
    }

    fn on_exiting(&mut self, tid: i32, status: i32) {
        let Some(tgid) = self.context.threads.remove(&tid) else {
            return;
        };

        let exit_code = decode_wait_status(status);

        if self.context.vforked.remove(&tid) {
            self.context.tree.remove(tid);
            self.event_handler
                .on_event(DebugEvent::ProcessExited { pid: tid, exit_code });
            return;
        }

        if tid == tgid {
            self.context.processes.remove(&tgid);
            self.context.tree.remove(tgid);
            self.event_handler
                .on_event(DebugEvent::ProcessExited { pid: tgid, exit_code });
        }
    }

    fn on_signal(&mut self, tracee: &mut Tracee, signal: Signal) -> Result<()> {
        // Deliver the signal, whatever we decide below.
        tracee.pending = Some(signal);

        if !is_crash_signal(signal) {
            return Ok(());
        }

        let tid = tracee.pid.as_raw();
        let pid = self.context.tgid(tid);
        let handled = is_signal_handled(pid, signal).unwrap_or_else(|err| {
            debug!("unable to read signal dispositions of {pid}: {err}");
            false
        });

        let exception = Exception {
            pid,
            tid,
            signal,
            handled,
            address: Address(arch::pc(&tracee.registers()?)),
        };

        let action = self
            .event_handler
            .on_exception(&mut self.context, &exception)?;

        if action == ExceptionAction::Terminate {
            info!("terminating monitored processes after exception in {pid}");
            self.context.tree.kill_all_except(pid);
        }

        Ok(())
    }

    fn restore_and_call_if_breakpoint(&mut self, tracee: &mut Tracee) -> Result<bool> {
        let mut regs = tracee.registers()?;

        // Compute what the last PC would have been _if_ we stopped due to a soft breakpoint.
        //
        // If we don't have a registered breakpoint, then we will not use this value.
        let pc = Address(arch::pc(&regs).saturating_sub(arch::PC_ADJUST));

        let tgid = self.context.tgid(tracee.pid.as_raw());
        let Some(process) = self.context.processes.get_mut(&tgid) else {
            return Ok(false);
        };

        let cleared = process.breakpoints.clear(tracee, pc)?;

        let Some(cleared) = cleared else {
            return Ok(false);
        };

        // We restored the original, breakpoint-clobbered instruction in `clear()`. Now
        // set the tracee's registers to execute it on restart. Do this _before_ the
        // callback to simulate a hardware breakpoint.
        arch::set_pc(&mut regs, pc.0);
        tracee.set_registers(regs)?;

        match cleared {
            Cleared::First(site) => {
                self.event_handler
                    .on_breakpoint(&mut self.context, tracee, site)?;
            }
            Cleared::Again => {
                trace!("breakpoint at {pc:x} already hit by another thread");
            }
        }

        Ok(true)
    }

    fn update_images(&mut self, tracee: &mut Tracee) -> Result<()> {
        let tgid = self.context.tgid(tracee.pid.as_raw());

        let Some(process) = self.context.processes.get_mut(&tgid) else {
            bail!("internal error: no state for process {tgid}");
        };

        let events = process.images.update()?;

        for (_base, image) in &events.unloaded {
            debug!("module unload: {} in {tgid}", image.path());
            process.breakpoints.forget(|addr| image.contains(addr));
        }

        for (_base, image) in &events.loaded {
            info!("module load: {} in {tgid}", image.path());

            self.event_handler.on_event(DebugEvent::ModuleLoaded {
                pid: tgid,
                path: image.path().clone(),
                base: image.base(),
            });
            self.event_handler
                .on_module_load(&mut self.context, tracee, image)?;
        }

        Ok(())
    }
}

pub struct DebuggerContext {
    pub tracer: Ptracer,
    options: DebuggerOptions,
    ptrace_options: Options,
    tree: ProcessTree,

    // Breakpoint and image state, by thread group ID.
    processes: BTreeMap<i32, ProcessState>,

    // Thread ID to thread group ID. A vfork child maps to its parent.
    threads: BTreeMap<i32, i32>,

    // Children created with `vfork()` that have not exec'd yet.
    vforked: BTreeSet<i32>,

    // Creation info of new tracees, recorded at the parent's event until their first stop.
    spawned: BTreeMap<i32, Spawn>,

    // First stops of new tracees that arrived before the parent's event.
    orphans: BTreeMap<i32, Tracee>,
}

impl DebuggerContext {
    fn new(options: DebuggerOptions, tree: ProcessTree) -> Self {
        Self {
            tracer: Ptracer::new(),
            options,
            ptrace_options: Options::all(),
            tree,
            processes: BTreeMap::new(),
            threads: BTreeMap::new(),
            vforked: BTreeSet::new(),
            spawned: BTreeMap::new(),
            orphans: BTreeMap::new(),
        }
    }

    /// Arm a breakpoint in the process of `tracee`.
    pub fn set_breakpoint(
        &mut self,
        tracee: &mut Tracee,
        addr: Address,
        site: BreakpointSite,
    ) -> Result<()> {
        let tgid = self.tgid(tracee.pid.as_raw());

        let Some(process) = self.processes.get_mut(&tgid) else {
            bail!("internal error: no state for process {tgid}");
        };

        process.breakpoints.set(tracee, addr, site)
    }

    fn tgid(&self, tid: i32) -> i32 {
        self.threads.get(&tid).copied().unwrap_or(tid)
    }

    // Fresh state for a new or exec'd process.
    fn add_process(&mut self, pid: i32) {
        self.processes.insert(pid, ProcessState::new(pid));
        self.threads.insert(pid, pid);
        self.tree.insert(pid);
    }
}

/// Debugger state of one address space.
#[derive(Clone, Debug)]
pub struct ProcessState {
    pub images: Images,
    pub breakpoints: Breakpoints,
}

impl ProcessState {
    fn new(pid: i32) -> Self {
        Self {
            images: Images::new(pid),
            breakpoints: Breakpoints::default(),
        }
    }

    // Copy of a parent's state for a forked child.
    fn forked(&self, pid: i32) -> Self {
        let mut images = self.images.clone();
        images.pid = pid;

        Self {
            images,
            breakpoints: self.breakpoints.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum SpawnKind {
    Clone,
    Fork,
    Vfork,
}

#[derive(Debug)]
enum Spawn {
    Thread {
        tgid: i32,
    },
    SharedMemory {
        parent: i32,
    },
    Copy {
        parent: i32,
        snapshot: Option<ProcessState>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Resume {
    Restart,
    Detached,
}

/// A crash signal stop in a monitored thread.
#[derive(Clone, Debug)]
pub struct Exception {
    pub pid: i32,
    pub tid: i32,
    pub signal: Signal,

    /// The target installed a handler for the signal.
    pub handled: bool,

    pub address: Address,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExceptionAction {
    Continue,
    Terminate,
}

/// PIDs of every monitored process, shared with the thread waiting on the debugger.
#[derive(Clone, Debug, Default)]
pub struct ProcessTree {
    pids: Arc<Mutex<BTreeSet<i32>>>,
}

impl ProcessTree {
    pub fn insert(&self, pid: i32) {
        self.lock().insert(pid);
    }

    pub fn remove(&self, pid: i32) {
        self.lock().remove(&pid);
    }

    pub fn pids(&self) -> Vec<i32> {
        self.lock().iter().copied().collect()
    }

    pub fn kill_all(&self) {
        for pid in self.pids() {
            kill(pid);
        }
    }

    pub fn kill_all_except(&self, survivor: i32) {
        for pid in self.pids() {
            if pid != survivor {
                kill(pid);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<i32>> {
        self.pids.lock().unwrap_or_else(|err| err.into_inner())
    }
}

fn kill(pid: i32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // Try to clean up, ignore errors due to earlier exits.
    if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGKILL) {
        debug!("unable to kill process {pid}: {err}");
    }
}

fn detach(tid: i32) -> Result<()> {
    use nix::unistd::Pid;

    nix::sys::ptrace::detach(Pid::from_raw(tid), None)
        .with_context(|| format!("unable to detach from {tid}"))
}

/// Executable memory-mapped files for a process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Images {
    mapped: BTreeMap<Address, ModuleImage>,
    pid: i32,
}

impl Images {
    pub fn new(pid: i32) -> Self {
        let mapped = BTreeMap::default();

        Self { mapped, pid }
    }

    pub fn update(&mut self) -> Result<LoadEvents> {
        let proc = Process::new(self.pid)?;

        let mut new = BTreeMap::new();
        let mut group: Vec<MemoryMap> = vec![];

        for map in proc.maps()? {
            if let Some(last) = group.last() {
                if last.pathname != map.pathname {
                    // The current memory mapping is the start of a new group.
                    //
                    // Consume the current group, and track any new module image.
                    insert_image(&mut new, std::mem::take(&mut group));
                }
            }

            group.push(map);
        }

        insert_image(&mut new, group);

        let events = LoadEvents::new(&self.mapped, &new);

        self.mapped = new;

        Ok(events)
    }
}

fn insert_image(images: &mut BTreeMap<Address, ModuleImage>, group: Vec<MemoryMap>) {
    if let Ok(image) = ModuleImage::new(group) {
        images.insert(image.base(), image);
    }
}

/// A `MemoryMap` that is known to be file-backed and executable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleImage {
    base: Address,
    maps: Vec<MemoryMap>,
    path: FilePath,
}

impl ModuleImage {
    // Accepts an increasing sequence of memory mappings with a common file-backed
    // pathname.
    pub fn new(mut maps: Vec<MemoryMap>) -> Result<Self> {
        maps.sort_by_key(|m| m.address);

        let Some(first) = maps.first() else {
            bail!("no mapping for module image");
        };

        if !maps
            .iter()
            .any(|m| m.perms.contains(MMPermissions::EXECUTE))
        {
            bail!("no executable mapping for module image");
        }

        let path = if let MMapPath::Path(path) = &first.pathname {
            FilePath::new(path.to_string_lossy())?
        } else {
            bail!("module image mappings must be file-backed");
        };

        for map in &maps {
            if map.pathname != first.pathname {
                bail!("module image mapping not file-backed");
            }
        }

        let base = Address(first.address.0);

        let image = ModuleImage { base, maps, path };

        Ok(image)
    }

    pub fn path(&self) -> &FilePath {
        &self.path
    }

    pub fn base(&self) -> Address {
        self.base
    }

    pub fn contains(&self, addr: &Address) -> bool {
        for map in &self.maps {
            let lo = Address(map.address.0);
            let hi = Address(map.address.1);
            if (lo..hi).contains(addr) {
                return true;
            }
        }

        false
    }
}

pub struct LoadEvents {
    pub loaded: Vec<(Address, ModuleImage)>,
    pub unloaded: Vec<(Address, ModuleImage)>,
}

impl LoadEvents {
    pub fn new(old: &BTreeMap<Address, ModuleImage>, new: &BTreeMap<Address, ModuleImage>) -> Self {
        // New not in old.
        let loaded: Vec<_> = new
            .iter()
            .filter(|(nva, n)| !matches!(old.get(nva), Some(i) if i.path() == n.path()))
            .map(|(va, i)| (*va, i.clone()))
            .collect();

        // Old not in new.
        let unloaded: Vec<_> = old
            .iter()
            .filter(|(iva, i)| !matches!(new.get(iva), Some(n) if n.path() == i.path()))
            .map(|(va, i)| (*va, i.clone()))
            .collect();

        Self { loaded, unloaded }
    }
}

/// What a breakpoint counts: a module of the run, and an offset in it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BreakpointSite {
    pub module: usize,
    pub offset: Offset,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum BreakpointState {
    Armed,
    Hit,
}

#[derive(Clone, Debug)]
struct Breakpoint {
    site: BreakpointSite,
    original: [u8; arch::BREAKPOINT.len()],
    state: BreakpointState,
}

enum Cleared {
    First(BreakpointSite),

    // Raced through by another thread before the first hit was handled.
    Again,
}

/// One-shot software breakpoints of one address space.
#[derive(Clone, Debug, Default)]
pub struct Breakpoints {
    saved: BTreeMap<Address, Breakpoint>,
}

impl Breakpoints {
    pub fn set(&mut self, tracee: &mut Tracee, addr: Address, site: BreakpointSite) -> Result<()> {
        // Return if the breakpoint exists. We don't want to conclude that the
        // saved instruction bytes were the breakpoint.
        if self.saved.contains_key(&addr) {
            return Ok(());
        }

        let mut original = [0u8; arch::BREAKPOINT.len()];
        tracee.read_memory_mut(addr.0, &mut original)?;
        tracee.write_memory(addr.0, &arch::BREAKPOINT)?;

        self.saved.insert(
            addr,
            Breakpoint {
                site,
                original,
                state: BreakpointState::Armed,
            },
        );

        Ok(())
    }

    fn clear(&mut self, tracee: &mut Tracee, addr: Address) -> Result<Option<Cleared>> {
        let Some(breakpoint) = self.saved.get_mut(&addr) else {
            return Ok(None);
        };

        if breakpoint.state == BreakpointState::Hit {
            return Ok(Some(Cleared::Again));
        }

        tracee.write_memory(addr.0, &breakpoint.original)?;
        breakpoint.state = BreakpointState::Hit;

        Ok(Some(Cleared::First(breakpoint.site)))
    }

    /// Restore the original code at every armed breakpoint.
    fn scrub(&self, tracee: &mut Tracee) -> Result<()> {
        for (addr, breakpoint) in &self.saved {
            if breakpoint.state == BreakpointState::Armed {
                tracee.write_memory(addr.0, &breakpoint.original)?;
            }
        }

        Ok(())
    }

    /// Drop breakpoints of unmapped code.
    fn forget(&mut self, unmapped: impl Fn(&Address) -> bool) {
        self.saved.retain(|addr, _| !unmapped(addr));
    }
}

#[cfg(target_arch = "x86_64")]
mod arch {
    use pete::Registers;

    // `int3`
    pub const BREAKPOINT: [u8; 1] = [0xcc];

    // The trap is reported after `int3` executes.
    pub const PC_ADJUST: u64 = 1;

    // `mmap`, `mprotect`
    pub const MAP_SYSCALLS: [u64; 2] = [9, 10];

    pub fn pc(regs: &Registers) -> u64 {
        regs.rip
    }

    pub fn set_pc(regs: &mut Registers, pc: u64) {
        regs.rip = pc;
    }

    pub fn syscall_number(regs: &Registers) -> u64 {
        regs.orig_rax
    }
}

#[cfg(target_arch = "aarch64")]
mod arch {
    use pete::Registers;

    // `brk #0`
    pub const BREAKPOINT: [u8; 4] = [0x00, 0x00, 0x20, 0xd4];

    // The trap is reported at the `brk` instruction.
    pub const PC_ADJUST: u64 = 0;

    // `mmap`, `mprotect`
    pub const MAP_SYSCALLS: [u64; 2] = [222, 226];

    pub fn pc(regs: &Registers) -> u64 {
        regs.pc
    }

    pub fn set_pc(regs: &mut Registers, pc: u64) {
        regs.pc = pc;
    }

    pub fn syscall_number(regs: &Registers) -> u64 {
        regs.regs[8]
    }
}

fn is_module_map_syscall(tracee: &Tracee) -> Result<bool> {
    let regs = tracee.registers()?;
    Ok(arch::MAP_SYSCALLS.contains(&arch::syscall_number(&regs)))
}

fn is_crash_signal(signal: Signal) -> bool {
    matches!(
        signal,
        Signal::SIGSEGV
            | Signal::SIGBUS
            | Signal::SIGILL
            | Signal::SIGFPE
            | Signal::SIGABRT
            | Signal::SIGSYS
            | Signal::SIGTRAP
    )
}

// True if the process installed a handler for `signal`.
fn is_signal_handled(pid: i32, signal: Signal) -> Result<bool> {
    let status = Process::new(pid)?.status()?;
    Ok(sigset_contains(status.sigcgt, signal as i32))
}

fn sigset_contains(set: u64, signo: i32) -> bool {
    (1..=64).contains(&signo) && set & (1 << (signo - 1)) != 0
}

fn thread_group(pid: i32) -> Result<i32> {
    Ok(Process::new(pid)?.status()?.tgid)
}

/// Exit code of a raw wait status: the exit status, or `128 + signo` for signal deaths.
pub fn decode_wait_status(status: i32) -> i32 {
    let signo = status & 0x7f;

    if signo == 0 {
        (status >> 8) & 0xff
    } else {
        128 + signo
    }
}

fn continue_to_init_execve(tracer: &mut Ptracer) -> Result<Tracee> {
    while let Some(tracee) = tracer.wait()? {
        if let Stop::SyscallExit = &tracee.stop {
            return Ok(tracee);
        }

        tracer.restart(tracee, Restart::Continue)?;
    }

    Err(StartupError::NoInitialExec.into())
}
