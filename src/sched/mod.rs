// Lottery scheduling: random source, draw and per-CPU loop
pub mod lottery;
pub mod rand;
pub mod scheduler;

pub use lottery::{draw, EmptyPool};
pub use rand::Xorshift64Star;
pub use scheduler::{CpuState, Dispatcher, Round, Scheduler, SchedulerStats};
