// Snapshot of the process table handed out by `getpinfo`
use core::fmt;

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::param::NPROC;

/// `struct pstat` as seen by user programs: four parallel arrays indexed by
/// process table slot.
///
/// This is a copy, it has no link back to the table once produced.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct PStat {
    pub inuse: [i32; NPROC],   // 1 if the slot holds a process
    pub pid: [i32; NPROC],     // Process identifier
    pub tickets: [i32; NPROC], // Current lottery weight
    pub ticks: [i32; NPROC],   // Quanta the process has been dispatched for
}

impl PStat {
    pub const fn zeroed() -> Self {
        Self {
            inuse: [0; NPROC],
            pid: [0; NPROC],
            tickets: [0; NPROC],
            ticks: [0; NPROC],
        }
    }

    /// Iterate over `(pid, tickets, ticks)` of in-use slots.
    pub fn live(&self) -> impl Iterator<Item = (i32, i32, i32)> + '_ {
        (0..NPROC)
            .filter(move |&i| self.inuse[i] != 0)
            .map(move |i| (self.pid[i], self.tickets[i], self.ticks[i]))
    }

    /// Find the entry for `pid`, returning `(tickets, ticks)`.
    pub fn lookup(&self, pid: i32) -> Option<(i32, i32)> {
        self.live()
            .find(|&(p, _, _)| p == pid)
            .map(|(_, tickets, ticks)| (tickets, ticks))
    }
}

impl Default for PStat {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// `ps`-style listing of the in-use slots.
impl fmt::Display for PStat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "PID\tTickets\tTicks")?;
        for (pid, tickets, ticks) in self.live() {
            writeln!(f, "{}\t{}\t{}", pid, tickets, ticks)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::size_of;

    #[test]
    fn layout_matches_c_struct() {
        assert_eq!(size_of::<PStat>(), 4 * NPROC * size_of::<i32>());
        let mut ps = PStat::zeroed();
        ps.pid[0] = 0x0102_0304;
        let bytes = ps.as_bytes();
        // pid[] follows inuse[]
        let off = NPROC * size_of::<i32>();
        assert_eq!(&bytes[off..off + 4], &0x0102_0304i32.to_ne_bytes());
    }

    #[test]
    fn display_lists_only_live_slots() {
        let mut ps = PStat::zeroed();
        ps.inuse[3] = 1;
        ps.pid[3] = 5;
        ps.tickets[3] = 30;
        ps.ticks[3] = 120;
        ps.pid[4] = 9; // stale, not in use
        assert_eq!(format!("{}", ps), "PID\tTickets\tTicks\n5\t30\t120\n");
        assert_eq!(ps.lookup(5), Some((30, 120)));
        assert_eq!(ps.lookup(9), None);
    }
}
