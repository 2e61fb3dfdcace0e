// Per-CPU lottery scheduler loop
use log::{error, trace};

use crate::process::pcb::{CpuId, ProcessId, Slot};
use crate::process::table::ProcessTable;

/// Hands the CPU to a chosen process.
///
/// `switch_to` is the context-switch primitive: it returns once the process
/// gives the CPU back (quantum expired, yield, sleep or exit). It is called
/// without the process table lock held. `idle` waits for the next
/// interrupt when nothing is runnable.
pub trait Dispatcher {
    fn switch_to(&mut self, table: &ProcessTable, slot: Slot, pid: ProcessId);
    fn idle(&mut self);
}

/// Where a CPU is in its scheduling round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuState {
    Idle,
    Drawing,
    Dispatching,
}

/// Result of one scheduling round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Round {
    Ran { slot: Slot, pid: ProcessId },
    Idle,
}

/// Scheduler statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub dispatches: u64,
    pub idle_rounds: u64,
}

/// Scheduler state owned by one CPU.
#[derive(Debug)]
pub struct Scheduler {
    cpu: CpuId,
    state: CpuState,
    current: Option<(Slot, ProcessId)>,
    stats: SchedulerStats,
}

impl Scheduler {
    pub const fn new(cpu: CpuId) -> Self {
        Self {
            cpu,
            state: CpuState::Idle,
            current: None,
            stats: SchedulerStats {
                dispatches: 0,
                idle_rounds: 0,
            },
        }
    }

    pub fn cpu(&self) -> CpuId {
        self.cpu
    }

    pub fn state(&self) -> CpuState {
        self.state
    }

    /// Process this CPU handed itself to, while it runs.
    pub fn current(&self) -> Option<(Slot, ProcessId)> {
        self.current
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// One pass of the loop: draw a winner and run it for a quantum, or idle.
    pub fn schedule_once<D: Dispatcher>(&mut self, table: &ProcessTable, dispatcher: &mut D) -> Round {
        self.state = CpuState::Drawing;
        let chosen = {
            let mut procs = table.lock();
            procs.wake_expired(table.uptime());
            match procs.draw() {
                Ok(slot) => match procs.dispatch(slot, self.cpu) {
                    Ok(pid) => Some((slot, pid)),
                    Err(err) => {
                        error!("cpu {}: lottery picked slot {}: {}", self.cpu, slot, err);
                        None
                    }
                },
                Err(_) => None,
            }
        };

        let (slot, pid) = match chosen {
            Some(winner) => winner,
            None => {
                self.state = CpuState::Idle;
                self.stats.idle_rounds += 1;
                dispatcher.idle();
                return Round::Idle;
            }
        };

        trace!("cpu {}: running pid {} (slot {})", self.cpu, pid, slot);
        self.state = CpuState::Dispatching;
        self.current = Some((slot, pid));
        self.stats.dispatches += 1;
        dispatcher.switch_to(table, slot, pid);

        table.lock().release(slot, pid);
        self.current = None;
        self.state = CpuState::Idle;
        Round::Ran { slot, pid }
    }

    /// Schedule forever.
    pub fn run<D: Dispatcher>(&mut self, table: &ProcessTable, dispatcher: &mut D) -> ! {
        loop {
            self.schedule_once(table, dispatcher);
        }
    }
}
