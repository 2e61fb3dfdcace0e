// Ticket accounting: assignment, inheritance and validation
use log::error;

use crate::param::DEFAULT_TICKETS;
use crate::process::pcb::{Proc, ProcessError};

/// Check a user-requested ticket count.
pub fn validate(requested: i32) -> Result<u32, ProcessError> {
    if requested < 1 {
        return Err(ProcessError::InvalidTickets);
    }
    Ok(requested as u32)
}

/// Set `proc`'s ticket count. On error the previous count is kept.
pub fn set_tickets(proc: &mut Proc, requested: i32) -> Result<(), ProcessError> {
    proc.tickets = validate(requested)?;
    Ok(())
}

/// Give a freshly claimed slot the baseline ticket count and a clean usage counter.
pub fn assign_default(proc: &mut Proc) {
    proc.tickets = DEFAULT_TICKETS;
    proc.ticks = 0;
}

/// Fork-time hook: the child starts with the parent's tickets and no usage.
pub fn inherit_tickets(parent: &Proc, child: &mut Proc) {
    child.tickets = parent.tickets;
    child.ticks = 0;
}

/// Weight a runnable slot contributes to the lottery pool.
///
/// A zero count cannot come from `set_tickets` or inheritance, so seeing one
/// means some other path corrupted the slot. It is reported and counted as a
/// single ticket.
pub fn lottery_weight(proc: &Proc) -> u64 {
    if proc.tickets == 0 {
        error!(
            "pid {} is {} with zero tickets, weighting it as 1",
            proc.pid,
            proc.state.as_str()
        );
        return 1;
    }
    u64::from(proc.tickets)
}
