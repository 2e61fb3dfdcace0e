// Weighted lottery over the runnable slots
use core::fmt;

use log::trace;
use rand_core::RngCore;

use crate::param::NPROC;
use crate::process::pcb::{Proc, Slot};
use crate::process::tickets::lottery_weight;
use crate::sched::rand::below;

/// No runnable process at draw time; the caller falls back to idling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmptyPool;

impl fmt::Display for EmptyPool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "No runnable process")
    }
}

/// Slot owning ticket `winner`.
///
/// Slot `i` owns `[acc_before, acc_before + weights[i])`, walking in
/// ascending index order. Zero weights own nothing.
pub fn pick(weights: &[u64], winner: u64) -> Option<Slot> {
    let mut acc = 0u64;
    for (slot, &w) in weights.iter().enumerate() {
        acc += w;
        if winner < acc {
            return Some(slot);
        }
    }
    None
}

/// Draw the next process to run.
///
/// The pool total is recomputed from `procs` on every call; non-runnable
/// slots weigh zero. Must run under the process table lock so the slot
/// states cannot move between summing and walking.
pub fn draw<R: RngCore>(procs: &[Proc; NPROC], rng: &mut R) -> Result<Slot, EmptyPool> {
    let mut weights = [0u64; NPROC];
    let mut total = 0u64;
    for (w, p) in weights.iter_mut().zip(procs.iter()) {
        if p.is_runnable() {
            *w = lottery_weight(p);
            total += *w;
        }
    }
    if total == 0 {
        return Err(EmptyPool);
    }

    let winner = below(rng, total);
    let slot = pick(&weights, winner).ok_or(EmptyPool)?;
    trace!(
        "lottery: ticket {} of {} -> slot {} (pid {})",
        winner,
        total,
        slot,
        procs[slot].pid()
    );
    Ok(slot)
}
