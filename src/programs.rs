//! Built-in programs and the dispatcher that runs them.
//!
//! There is no loader, so the programs a user would normally run are
//! compiled into the kernel. A program is a small state machine stepped once
//! per dispatched quantum; everything it does to the system goes through the
//! syscall layer, exactly as a user binary would.
//!
//! - [`Worker`]: CPU-bound child that sets its own ticket count.
//! - [`LotteryTest`]: forks three workers at 30/20/10 tickets, lets them
//!   compete, then reports their tick counts from `getpinfo`.
//! - [`Ps`]: prints the `getpinfo` table.
//! - [`Init`]: runs `lotterytest` then `ps`, then reaps orphans forever.

use core::fmt::Write;
use core::hint::black_box;

use log::{debug, error};

use crate::param::{NPROC, TIMER_HZ};
use crate::process::pcb::{ProcessId, Slot};
use crate::process::pstat::PStat;
use crate::process::table::ProcessTable;
use crate::sched::scheduler::Dispatcher;
use crate::syscalls::{
    self, handle_syscall, SyscallArgs, SyscallContext, SyscallError, SyscallNumber, WaitStatus,
};
use crate::uaccess::UserRegion;

/// What a program wants after its quantum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Exit(i32),
}

/// The kernel as one program sees it during one quantum.
pub struct Env<'a> {
    table: &'a ProcessTable,
    pid: ProcessId,
    console: &'a mut dyn Write,
    programs: &'a mut [Option<Program>; NPROC],
}

impl<'a> Env<'a> {
    fn syscall(&mut self, number: SyscallNumber, args: SyscallArgs, memory: &mut UserRegion) -> i64 {
        let mut ctx = SyscallContext::new(self.table, self.pid, memory);
        handle_syscall(&mut ctx, number as u64, args).as_int()
    }

    fn context<'b>(&'b self, memory: &'b mut UserRegion) -> SyscallContext<'b> {
        SyscallContext::new(self.table, self.pid, memory)
    }

    pub fn getpid(&self) -> ProcessId {
        self.pid
    }

    pub fn console(&mut self) -> &mut dyn Write {
        &mut *self.console
    }

    /// `settickets(n)`: 0 on success, -1 if `n < 1`.
    pub fn settickets(&mut self, n: i32) -> i64 {
        let args = SyscallArgs::one(n as i64 as u64);
        self.syscall(SyscallNumber::SetTickets, args, &mut UserRegion::empty())
    }

    /// `getpinfo(ps)`: 0 on success, -1 on failure.
    pub fn getpinfo(&mut self, ps: &mut PStat) -> i64 {
        let addr = ps as *mut PStat as u64;
        let mut region = UserRegion::for_object(ps);
        self.syscall(SyscallNumber::GetPInfo, SyscallArgs::one(addr), &mut region)
    }

    /// Fork the caller; `child` is what the new process will run.
    pub fn fork(&mut self, child: Program) -> Result<ProcessId, SyscallError> {
        let mut memory = UserRegion::empty();
        let pid = syscalls::sys_fork(&mut self.context(&mut memory))?;
        if let Some(slot) = self.table.lock().find(pid) {
            self.programs[slot] = Some(child);
        }
        Ok(pid)
    }

    pub fn wait(&mut self) -> Result<WaitStatus, SyscallError> {
        let mut memory = UserRegion::empty();
        syscalls::sys_wait(&mut self.context(&mut memory))
    }

    pub fn kill(&mut self, pid: ProcessId) -> i64 {
        let args = SyscallArgs::one(u64::from(pid));
        self.syscall(SyscallNumber::Kill, args, &mut UserRegion::empty())
    }

    /// Sleep for `ticks` timer ticks, starting when this quantum ends.
    pub fn sleep(&mut self, ticks: i32) -> i64 {
        let args = SyscallArgs::one(ticks as i64 as u64);
        self.syscall(SyscallNumber::Sleep, args, &mut UserRegion::empty())
    }

    pub fn uptime(&mut self) -> u64 {
        let uptime = self.syscall(SyscallNumber::Uptime, SyscallArgs::default(), &mut UserRegion::empty());
        uptime as u64
    }
}

/// A program the kernel knows how to run.
#[derive(Debug, Clone)]
pub enum Program {
    Init(Init),
    LotteryTest(LotteryTest),
    Worker(Worker),
    Ps(Ps),
}

impl Program {
    /// Run one quantum.
    pub fn step(&mut self, env: &mut Env) -> Step {
        match self {
            Program::Init(p) => p.step(env),
            Program::LotteryTest(p) => p.step(env),
            Program::Worker(p) => p.step(env),
            Program::Ps(p) => p.step(env),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Program::Init(_) => "init",
            Program::LotteryTest(_) => "lotterytest",
            Program::Worker(_) => "worker",
            Program::Ps(_) => "ps",
        }
    }
}

/// CPU-bound child: claims its tickets on the first quantum, then spins.
#[derive(Debug, Clone)]
pub struct Worker {
    label: char,
    tickets: i32,
    spin: u32,
    started: bool,
}

impl Worker {
    pub fn new(label: char, tickets: i32, spin: u32) -> Self {
        Self {
            label,
            tickets,
            spin,
            started: false,
        }
    }

    fn step(&mut self, env: &mut Env) -> Step {
        if !self.started {
            self.started = true;
            if env.settickets(self.tickets) < 0 {
                let _ = writeln!(env.console(), "Process {}: settickets({}) failed", self.label, self.tickets);
                return Step::Exit(1);
            }
            let pid = env.getpid();
            let _ = writeln!(
                env.console(),
                "Process {} (PID {}): {} tickets",
                self.label,
                pid,
                self.tickets
            );
        }
        for i in 0..self.spin {
            black_box(i);
        }
        Step::Continue
    }
}

/// Tickets for workers A, B and C.
pub const LOTTERY_TICKETS: [i32; 3] = [30, 20, 10];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LotteryPhase {
    Fork,
    Measure,
    Report,
    Reap,
}

/// `lotterytest`: three workers at a 3:2:1 ticket ratio, tick counts compared
/// after a measurement window.
#[derive(Debug, Clone)]
pub struct LotteryTest {
    phase: LotteryPhase,
    window: i32,
    spin: u32,
    children: [ProcessId; 3],
    forked: usize,
    reaped: usize,
}

impl LotteryTest {
    /// `window` is how many timer ticks the workers compete for.
    pub fn new(window: i32, spin: u32) -> Self {
        Self {
            phase: LotteryPhase::Fork,
            window,
            spin,
            children: [0; 3],
            forked: 0,
            reaped: 0,
        }
    }

    fn step(&mut self, env: &mut Env) -> Step {
        match self.phase {
            LotteryPhase::Fork => {
                let i = self.forked;
                let label = (b'A' + i as u8) as char;
                let worker = Worker::new(label, LOTTERY_TICKETS[i], self.spin);
                match env.fork(Program::Worker(worker)) {
                    Ok(pid) => {
                        self.children[i] = pid;
                        self.forked += 1;
                        if self.forked == self.children.len() {
                            self.phase = LotteryPhase::Measure;
                        }
                        Step::Continue
                    }
                    Err(err) => {
                        let _ = writeln!(env.console(), "lotterytest: fork failed: {}", err);
                        self.kill_children(env);
                        Step::Exit(1)
                    }
                }
            }
            LotteryPhase::Measure => {
                env.sleep(self.window);
                self.phase = LotteryPhase::Report;
                Step::Continue
            }
            LotteryPhase::Report => {
                let mut ps = PStat::zeroed();
                if env.getpinfo(&mut ps) != 0 {
                    let _ = writeln!(env.console(), "Error: getpinfo failed");
                } else {
                    self.report(env, &ps);
                }
                self.kill_children(env);
                self.phase = LotteryPhase::Reap;
                Step::Continue
            }
            LotteryPhase::Reap => match env.wait() {
                Ok(WaitStatus::Reaped { .. }) => {
                    self.reaped += 1;
                    if self.reaped == self.forked {
                        Step::Exit(0)
                    } else {
                        Step::Continue
                    }
                }
                Ok(WaitStatus::Blocked) => Step::Continue,
                Err(_) => Step::Exit(0),
            },
        }
    }

    fn kill_children(&self, env: &mut Env) {
        for &pid in &self.children[..self.forked] {
            env.kill(pid);
        }
    }

    fn report(&self, env: &mut Env, ps: &PStat) {
        let out = env.console();
        let _ = writeln!(out, "\nLottery Scheduling Results:");
        let _ = writeln!(out, "PID\tTickets\tTicks");
        let mut ticks = [0i32; 3];
        for (pid, tickets, t) in ps.live() {
            if let Some(i) = self.children.iter().position(|&c| c as i32 == pid) {
                ticks[i] = t;
                let _ = writeln!(out, "{}\t{}\t{}", pid, tickets, t);
            }
        }

        let _ = writeln!(out, "\nExpected ratio: 3:2:1 (30:20:10 tickets)");
        let [a, b, c] = ticks;
        if c > 0 {
            let (a_whole, a_tenth) = ratio_tenths(a, c);
            let (b_whole, b_tenth) = ratio_tenths(b, c);
            let _ = writeln!(
                out,
                "Actual ratio: {}.{}:{}.{}:1",
                a_whole, a_tenth, b_whole, b_tenth
            );
        } else {
            let _ = writeln!(out, "Actual ratio: undefined, process C never ran");
        }
    }
}

/// `x / base` to one decimal, integer only. `base` must be positive.
fn ratio_tenths(x: i32, base: i32) -> (i64, i64) {
    let tenths = i64::from(x) * 10 / i64::from(base);
    (tenths / 10, tenths % 10)
}

/// `ps`: one row per in-use slot.
#[derive(Debug, Clone, Default)]
pub struct Ps;

impl Ps {
    fn step(&mut self, env: &mut Env) -> Step {
        let mut ps = PStat::zeroed();
        if env.getpinfo(&mut ps) != 0 {
            let _ = writeln!(env.console(), "Error: getpinfo failed");
            return Step::Exit(1);
        }
        let _ = write!(env.console(), "{}", ps);
        Step::Exit(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitStage {
    StartLotteryTest,
    AwaitLotteryTest(ProcessId),
    StartPs,
    AwaitPs(ProcessId),
    Reap,
}

/// First process: runs the demo programs in order, then reaps orphans.
#[derive(Debug, Clone)]
pub struct Init {
    stage: InitStage,
    window: i32,
    spin: u32,
}

impl Init {
    pub fn new(window: i32, spin: u32) -> Self {
        Self {
            stage: InitStage::StartLotteryTest,
            window,
            spin,
        }
    }

    fn step(&mut self, env: &mut Env) -> Step {
        self.stage = match self.stage {
            InitStage::StartLotteryTest => {
                let program = Program::LotteryTest(LotteryTest::new(self.window, self.spin));
                match env.fork(program) {
                    Ok(pid) => InitStage::AwaitLotteryTest(pid),
                    Err(_) => InitStage::StartPs,
                }
            }
            InitStage::AwaitLotteryTest(pid) if Self::await_child(env, pid) => InitStage::StartPs,
            InitStage::AwaitLotteryTest(pid) => InitStage::AwaitLotteryTest(pid),
            InitStage::StartPs => match env.fork(Program::Ps(Ps)) {
                Ok(pid) => InitStage::AwaitPs(pid),
                Err(_) => InitStage::Reap,
            },
            InitStage::AwaitPs(pid) if Self::await_child(env, pid) => InitStage::Reap,
            InitStage::AwaitPs(pid) => InitStage::AwaitPs(pid),
            InitStage::Reap => {
                if let Err(SyscallError::NoChildren) = env.wait() {
                    env.sleep(TIMER_HZ as i32);
                }
                InitStage::Reap
            }
        };
        Step::Continue
    }

    /// Reap whatever exited; true once `pid` itself is gone.
    fn await_child(env: &mut Env, pid: ProcessId) -> bool {
        match env.wait() {
            Ok(WaitStatus::Reaped { pid: reaped, .. }) => reaped == pid,
            Ok(WaitStatus::Blocked) => false,
            Err(_) => true,
        }
    }
}

/// Runs built-in programs, one step per dispatched quantum.
///
/// Serves a single CPU: the program of a forked child is installed before
/// this dispatcher can be asked to run it.
pub struct ProgramDispatcher<W: Write> {
    programs: [Option<Program>; NPROC],
    console: W,
    idle: fn(),
}

const NO_PROGRAM: Option<Program> = None;

impl<W: Write> ProgramDispatcher<W> {
    pub fn new(console: W, idle: fn()) -> Self {
        Self {
            programs: [NO_PROGRAM; NPROC],
            console,
            idle,
        }
    }

    /// Create the init process running `program`.
    pub fn boot(&mut self, table: &ProcessTable, program: Program) -> Result<ProcessId, SyscallError> {
        let mut procs = table.lock();
        let pid = procs.spawn_init()?;
        if let Some(slot) = procs.find(pid) {
            self.programs[slot] = Some(program);
        }
        Ok(pid)
    }

    pub fn console(&self) -> &W {
        &self.console
    }

    fn terminate(table: &ProcessTable, pid: ProcessId, status: i32) {
        if let Err(err) = table.lock().exit(pid, status) {
            error!("could not retire pid {}: {}", pid, err);
        }
    }
}

impl<W: Write> Dispatcher for ProgramDispatcher<W> {
    fn switch_to(&mut self, table: &ProcessTable, slot: Slot, pid: ProcessId) {
        let mut program = match self.programs[slot].take() {
            Some(program) => program,
            None => {
                error!("pid {} (slot {}) has no program", pid, slot);
                Self::terminate(table, pid, -1);
                return;
            }
        };
        if table.lock().get(slot).killed() {
            debug!("pid {} ({}) killed", pid, program.name());
            Self::terminate(table, pid, -1);
            return;
        }

        let mut env = Env {
            table,
            pid,
            console: &mut self.console,
            programs: &mut self.programs,
        };
        match program.step(&mut env) {
            Step::Continue => self.programs[slot] = Some(program),
            Step::Exit(status) => {
                debug!("pid {} ({}) exited with {}", pid, program.name(), status);
                Self::terminate(table, pid, status);
            }
        }
    }

    fn idle(&mut self) {
        (self.idle)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::pcb::ProcessState;
    use crate::sched::scheduler::{Round, Scheduler};

    fn no_idle() {}

    fn run(table: &ProcessTable, d: &mut ProgramDispatcher<String>, rounds: usize) {
        let mut cpu = Scheduler::new(0);
        for _ in 0..rounds {
            cpu.schedule_once(table, d);
            table.timer_tick();
        }
    }

    #[test]
    fn ps_prints_live_processes() {
        let table = ProcessTable::new(3);
        let mut d = ProgramDispatcher::new(String::new(), no_idle);
        let init = d.boot(&table, Program::Ps(Ps)).unwrap();
        run(&table, &mut d, 1);
        assert_eq!(d.console(), &format!("PID\tTickets\tTicks\n{}\t1\t1\n", init));
        assert_eq!(table.lock().proc(init).unwrap().state(), ProcessState::Zombie);
    }

    #[test]
    fn worker_claims_tickets_on_first_quantum() {
        let table = ProcessTable::new(3);
        let mut d = ProgramDispatcher::new(String::new(), no_idle);
        let pid = d.boot(&table, Program::Worker(Worker::new('A', 30, 0))).unwrap();
        run(&table, &mut d, 3);
        assert_eq!(d.console(), &format!("Process A (PID {}): 30 tickets\n", pid));
        let t = table.lock();
        assert_eq!(t.proc(pid).unwrap().tickets(), 30);
        assert_eq!(t.proc(pid).unwrap().ticks(), 3);
    }

    #[test]
    fn worker_with_bad_tickets_exits() {
        let table = ProcessTable::new(3);
        let mut d = ProgramDispatcher::new(String::new(), no_idle);
        let pid = d.boot(&table, Program::Worker(Worker::new('Z', 0, 0))).unwrap();
        run(&table, &mut d, 1);
        assert!(d.console().contains("settickets(0) failed"));
        let t = table.lock();
        assert_eq!(t.proc(pid).unwrap().state(), ProcessState::Zombie);
        assert_eq!(t.proc(pid).unwrap().tickets(), 1);
    }

    #[test]
    fn killed_process_is_retired_instead_of_run() {
        let table = ProcessTable::new(3);
        let mut d = ProgramDispatcher::new(String::new(), no_idle);
        let pid = d.boot(&table, Program::Worker(Worker::new('K', 5, 0))).unwrap();
        table.lock().kill(pid).unwrap();
        let mut cpu = Scheduler::new(0);
        assert!(matches!(cpu.schedule_once(&table, &mut d), Round::Ran { .. }));
        assert!(d.console().is_empty());
        assert_eq!(table.lock().proc(pid).unwrap().state(), ProcessState::Zombie);
        assert_eq!(cpu.schedule_once(&table, &mut d), Round::Idle);
    }

    #[test]
    fn ratio_is_integer_tenths() {
        assert_eq!(ratio_tenths(3000, 1000), (3, 0));
        assert_eq!(ratio_tenths(2050, 1000), (2, 0));
        assert_eq!(ratio_tenths(2990, 1000), (2, 9));
        assert_eq!(ratio_tenths(7, 2), (3, 5));
    }

    #[test]
    fn init_runs_lotterytest_then_ps() {
        let table = ProcessTable::new(0xABCD);
        let mut d = ProgramDispatcher::new(String::new(), no_idle);
        d.boot(&table, Program::Init(Init::new(600, 0))).unwrap();
        run(&table, &mut d, 2_000);

        let out = d.console();
        let results = out.find("Lottery Scheduling Results").expect("no report");
        let ps_header = out.rfind("PID\tTickets\tTicks").unwrap();
        assert!(ps_header > results);
        assert!(out.contains("Expected ratio: 3:2:1"));
        assert!(out.contains("Actual ratio: "));

        // only init is left, asleep in its reaper loop or runnable
        let t = table.lock();
        assert_eq!(t.iter().count(), 1);
    }
}
