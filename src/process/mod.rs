// Process management for the lottery-scheduled kernel
pub mod pcb;
pub mod pstat;
pub mod table;
pub mod tickets;

pub use pcb::{Channel, CpuId, Proc, ProcessError, ProcessId, ProcessState, Slot};
pub use pstat::PStat;
pub use table::{ProcTable, ProcessTable};
