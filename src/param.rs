// Kernel-wide constants for the lottery scheduler

/// Number of process table slots.
pub const NPROC: usize = 64;

/// Maximum number of CPUs that may run a scheduler loop.
pub const NCPU: usize = 8;

/// Tickets given to a process that has no parent to inherit from and never
/// called `settickets`.
pub const DEFAULT_TICKETS: u32 = 1;

/// PIT frequency; one scheduling quantum per timer interrupt.
pub const TIMER_HZ: u32 = 100;

/// Pid handed to the first process. Orphans are re-parented to it.
pub const INIT_PID: u32 = 1;
