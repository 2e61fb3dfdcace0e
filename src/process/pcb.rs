// Process descriptor for the lottery-scheduled kernel
use core::fmt;

/// Process ID type
pub type ProcessId = u32;

/// Position of a descriptor in the process table.
pub type Slot = usize;

/// Identifier of a CPU running a scheduler loop.
pub type CpuId = usize;

/// Process state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Unused,   // Free slot
    Embryo,   // Slot claimed, process not yet runnable
    Runnable, // Ready to run, takes part in the lottery
    Running,  // Currently executing on a CPU
    Sleeping, // Waiting on a channel
    Zombie,   // Exited, waiting for the parent to reap it
}

impl ProcessState {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessState::Unused => "unused",
            ProcessState::Embryo => "embryo",
            ProcessState::Runnable => "runnable",
            ProcessState::Running => "running",
            ProcessState::Sleeping => "sleeping",
            ProcessState::Zombie => "zombie",
        }
    }
}

/// What a sleeping process is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// A parent blocked in `wait` until one of its children exits.
    Child(ProcessId),
    /// Woken once the uptime counter reaches the given tick.
    Uptime(u64),
}

/// One process table slot.
///
/// Fields are only reachable through the table lock; the scheduler core owns
/// `tickets` and `ticks`, lifecycle code owns the rest.
#[derive(Debug, Clone, Copy)]
pub struct Proc {
    pub(crate) pid: ProcessId,
    pub(crate) parent: Option<ProcessId>,
    pub(crate) state: ProcessState,
    pub(crate) tickets: u32,
    pub(crate) ticks: u64,
    pub(crate) chan: Option<Channel>,
    pub(crate) killed: bool,
    pub(crate) exit_status: i32,
    pub(crate) cpu: Option<CpuId>,
}

impl Proc {
    pub const UNUSED: Proc = Proc {
        pid: 0,
        parent: None,
        state: ProcessState::Unused,
        tickets: 0,
        ticks: 0,
        chan: None,
        killed: false,
        exit_status: 0,
        cpu: None,
    };

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    pub fn parent(&self) -> Option<ProcessId> {
        self.parent
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn tickets(&self) -> u32 {
        self.tickets
    }

    /// Number of quanta this process has been dispatched for.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn channel(&self) -> Option<Channel> {
        self.chan
    }

    pub fn killed(&self) -> bool {
        self.killed
    }

    /// CPU the process is running on, if any.
    pub fn cpu(&self) -> Option<CpuId> {
        self.cpu
    }

    pub fn is_used(&self) -> bool {
        self.state != ProcessState::Unused
    }

    pub fn is_runnable(&self) -> bool {
        self.state == ProcessState::Runnable
    }
}

/// Process management errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    InvalidTickets,
    NoFreeSlot,
    ProcessNotFound,
    NoChildren,
    NotRunnable,
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProcessError::InvalidTickets => write!(f, "Ticket count must be at least 1"),
            ProcessError::NoFreeSlot => write!(f, "Process table full"),
            ProcessError::ProcessNotFound => write!(f, "Process not found"),
            ProcessError::NoChildren => write!(f, "No children to wait for"),
            ProcessError::NotRunnable => write!(f, "Process is not runnable"),
        }
    }
}
