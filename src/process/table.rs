// Process table: fixed arena of slots behind one spinlock
use core::sync::atomic::{AtomicU64, Ordering};

use log::{debug, error, info, warn};
use spin::{Mutex, MutexGuard};

use crate::param::{INIT_PID, NPROC};
use crate::process::pcb::{Channel, CpuId, Proc, ProcessError, ProcessId, ProcessState, Slot};
use crate::process::pstat::PStat;
use crate::process::tickets;
use crate::sched::lottery::{self, EmptyPool};
use crate::sched::rand::Xorshift64Star;

/// The shared process table.
///
/// Built once at boot and passed by reference to every scheduler loop and
/// syscall. All slot state lives behind a single mutex; the only field
/// outside it is the uptime counter bumped from the timer interrupt.
pub struct ProcessTable {
    inner: Mutex<ProcTable>,
    uptime: AtomicU64,
}

impl ProcessTable {
    /// Create an empty table whose lottery generator starts from `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Mutex::new(ProcTable::new(seed)),
            uptime: AtomicU64::new(0),
        }
    }

    /// Acquire the table lock.
    pub fn lock(&self) -> MutexGuard<'_, ProcTable> {
        self.inner.lock()
    }

    /// Timer interrupt callback. Takes no lock; sleepers whose deadline
    /// passed are woken by the next scheduling round.
    pub fn timer_tick(&self) -> u64 {
        self.uptime.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Timer ticks since boot.
    pub fn uptime(&self) -> u64 {
        self.uptime.load(Ordering::Relaxed)
    }

    /// Copy every slot out in one critical section.
    pub fn snapshot(&self) -> PStat {
        self.lock().snapshot()
    }
}

/// Lock-protected contents of the process table.
pub struct ProcTable {
    procs: [Proc; NPROC],
    next_pid: ProcessId,
    rng: Xorshift64Star,
}

impl ProcTable {
    fn new(seed: u64) -> Self {
        Self {
            procs: [Proc::UNUSED; NPROC],
            next_pid: INIT_PID,
            rng: Xorshift64Star::new(seed),
        }
    }

    /// Descriptor at `slot`.
    pub fn get(&self, slot: Slot) -> &Proc {
        &self.procs[slot]
    }

    /// Slot holding live process `pid`.
    pub fn find(&self, pid: ProcessId) -> Option<Slot> {
        self.procs
            .iter()
            .position(|p| p.is_used() && p.pid == pid)
    }

    /// Descriptor of live process `pid`.
    pub fn proc(&self, pid: ProcessId) -> Option<&Proc> {
        self.find(pid).map(|slot| &self.procs[slot])
    }

    /// `(slot, descriptor)` for every in-use slot.
    pub fn iter(&self) -> impl Iterator<Item = (Slot, &Proc)> {
        self.procs.iter().enumerate().filter(|(_, p)| p.is_used())
    }

    pub fn count(&self, state: ProcessState) -> usize {
        self.procs.iter().filter(|p| p.state == state).count()
    }

    fn slot_of(&self, pid: ProcessId) -> Result<Slot, ProcessError> {
        self.find(pid).ok_or(ProcessError::ProcessNotFound)
    }

    /// Claim a free slot: UNUSED -> EMBRYO with a fresh pid, default tickets
    /// and zeroed usage.
    pub fn alloc(&mut self) -> Result<Slot, ProcessError> {
        let slot = self
            .procs
            .iter()
            .position(|p| p.state == ProcessState::Unused)
            .ok_or(ProcessError::NoFreeSlot)?;
        let pid = self.next_pid;
        self.next_pid += 1;

        let p = &mut self.procs[slot];
        *p = Proc::UNUSED;
        p.pid = pid;
        p.state = ProcessState::Embryo;
        tickets::assign_default(p);
        Ok(slot)
    }

    /// EMBRYO -> RUNNABLE.
    pub fn make_runnable(&mut self, slot: Slot) -> Result<(), ProcessError> {
        let p = &mut self.procs[slot];
        if p.state != ProcessState::Embryo {
            return Err(ProcessError::NotRunnable);
        }
        p.state = ProcessState::Runnable;
        Ok(())
    }

    /// Create the first process. It has no parent and the baseline tickets.
    pub fn spawn_init(&mut self) -> Result<ProcessId, ProcessError> {
        let slot = self.alloc()?;
        self.make_runnable(slot)?;
        let pid = self.procs[slot].pid;
        info!("init process created: pid {} in slot {}", pid, slot);
        Ok(pid)
    }

    /// Copy the parent's tickets into the child slot and clear the child's usage.
    pub fn inherit_tickets(&mut self, parent_slot: Slot, child_slot: Slot) {
        let parent = self.procs[parent_slot];
        tickets::inherit_tickets(&parent, &mut self.procs[child_slot]);
    }

    /// Fork `parent`: the child inherits its ticket count and becomes runnable.
    pub fn fork(&mut self, parent: ProcessId) -> Result<ProcessId, ProcessError> {
        let parent_slot = self.slot_of(parent)?;
        let child_slot = self.alloc()?;
        self.inherit_tickets(parent_slot, child_slot);
        self.procs[child_slot].parent = Some(parent);
        self.make_runnable(child_slot)?;

        let child = &self.procs[child_slot];
        debug!(
            "fork: pid {} -> pid {} (slot {}, {} tickets)",
            parent, child.pid, child_slot, child.tickets
        );
        Ok(child.pid)
    }

    /// Change the caller's own ticket count.
    pub fn set_tickets(&mut self, pid: ProcessId, requested: i32) -> Result<(), ProcessError> {
        let slot = self.slot_of(pid)?;
        tickets::set_tickets(&mut self.procs[slot], requested).map_err(|e| {
            warn!("settickets({}) rejected for pid {}", requested, pid);
            e
        })?;
        debug!("pid {} now holds {} tickets", pid, requested);
        Ok(())
    }

    /// Terminate `pid`: ZOMBIE until reaped, children handed to init, parent woken.
    pub fn exit(&mut self, pid: ProcessId, status: i32) -> Result<(), ProcessError> {
        let slot = self.slot_of(pid)?;
        if self.procs[slot].state == ProcessState::Zombie {
            return Err(ProcessError::ProcessNotFound);
        }
        if pid == INIT_PID {
            warn!("init process exiting with status {}", status);
        }

        let init = if pid == INIT_PID { None } else { Some(INIT_PID) };
        let mut orphaned_zombie = false;
        for p in self.procs.iter_mut() {
            if p.is_used() && p.parent == Some(pid) {
                p.parent = init;
                orphaned_zombie |= p.state == ProcessState::Zombie;
            }
        }
        if orphaned_zombie {
            self.wakeup(Channel::Child(INIT_PID));
        }

        let p = &mut self.procs[slot];
        p.state = ProcessState::Zombie;
        p.exit_status = status;
        p.chan = None;
        let parent = p.parent;
        debug!("exit: pid {} status {} after {} ticks", pid, status, p.ticks);

        if let Some(parent) = parent {
            self.wakeup(Channel::Child(parent));
        }
        Ok(())
    }

    /// Reap one exited child of `pid`.
    ///
    /// Returns `Ok(Some((child, status)))` after freeing a zombie child,
    /// `Ok(None)` after putting the caller to sleep because its children are
    /// still alive, and `NoChildren` if there is nothing to wait for.
    pub fn wait(&mut self, pid: ProcessId) -> Result<Option<(ProcessId, i32)>, ProcessError> {
        let slot = self.slot_of(pid)?;
        let mut have_children = false;
        for child in self.procs.iter_mut() {
            if !child.is_used() || child.parent != Some(pid) {
                continue;
            }
            have_children = true;
            if child.state == ProcessState::Zombie {
                let reaped = (child.pid, child.exit_status);
                *child = Proc::UNUSED;
                debug!("wait: pid {} reaped pid {}", pid, reaped.0);
                return Ok(Some(reaped));
            }
        }
        if !have_children || self.procs[slot].killed {
            return Err(ProcessError::NoChildren);
        }
        self.sleep(slot, Channel::Child(pid));
        Ok(None)
    }

    /// Put `pid` to sleep until the uptime counter reaches `deadline`.
    pub fn sleep_until(&mut self, pid: ProcessId, deadline: u64) -> Result<(), ProcessError> {
        let slot = self.slot_of(pid)?;
        self.sleep(slot, Channel::Uptime(deadline));
        Ok(())
    }

    fn sleep(&mut self, slot: Slot, chan: Channel) {
        let p = &mut self.procs[slot];
        p.state = ProcessState::Sleeping;
        p.chan = Some(chan);
    }

    /// Make every process sleeping on `chan` runnable.
    pub fn wakeup(&mut self, chan: Channel) -> usize {
        let mut woken = 0;
        for p in self.procs.iter_mut() {
            if p.state == ProcessState::Sleeping && p.chan == Some(chan) {
                p.state = ProcessState::Runnable;
                p.chan = None;
                woken += 1;
            }
        }
        woken
    }

    /// Wake sleepers whose uptime deadline is at or before `now`.
    pub fn wake_expired(&mut self, now: u64) -> usize {
        let mut woken = 0;
        for p in self.procs.iter_mut() {
            if let (ProcessState::Sleeping, Some(Channel::Uptime(deadline))) = (p.state, p.chan) {
                if deadline <= now {
                    p.state = ProcessState::Runnable;
                    p.chan = None;
                    woken += 1;
                }
            }
        }
        woken
    }

    /// Mark `pid` killed. A sleeping victim is made runnable so it can be
    /// torn down the next time it is dispatched.
    pub fn kill(&mut self, pid: ProcessId) -> Result<(), ProcessError> {
        let slot = self.slot_of(pid)?;
        let p = &mut self.procs[slot];
        if p.state == ProcessState::Zombie {
            return Err(ProcessError::ProcessNotFound);
        }
        p.killed = true;
        if p.state == ProcessState::Sleeping {
            p.state = ProcessState::Runnable;
            p.chan = None;
        }
        debug!("kill: pid {}", pid);
        Ok(())
    }

    /// Run the lottery over the current runnable set.
    pub fn draw(&mut self) -> Result<Slot, EmptyPool> {
        lottery::draw(&self.procs, &mut self.rng)
    }

    /// RUNNABLE -> RUNNING on `cpu`, charging the winner one tick.
    pub fn dispatch(&mut self, slot: Slot, cpu: CpuId) -> Result<ProcessId, ProcessError> {
        let p = &mut self.procs[slot];
        if p.state != ProcessState::Runnable {
            error!(
                "dispatch of slot {} (pid {}) in state {}",
                slot,
                p.pid,
                p.state.as_str()
            );
            return Err(ProcessError::NotRunnable);
        }
        p.state = ProcessState::Running;
        p.cpu = Some(cpu);
        p.ticks += 1;
        Ok(p.pid)
    }

    /// Take the CPU back from `pid` after its quantum.
    ///
    /// A process still RUNNING goes back to RUNNABLE; one that slept or
    /// exited during the quantum keeps that state.
    pub fn release(&mut self, slot: Slot, pid: ProcessId) {
        let p = &mut self.procs[slot];
        if p.pid != pid || !p.is_used() {
            return;
        }
        p.cpu = None;
        if p.state == ProcessState::Running {
            p.state = ProcessState::Runnable;
        }
    }

    /// Point-in-time copy of every slot.
    pub fn snapshot(&self) -> PStat {
        let mut ps = PStat::zeroed();
        for (i, p) in self.procs.iter().enumerate() {
            if !p.is_used() {
                continue;
            }
            ps.inuse[i] = 1;
            ps.pid[i] = p.pid as i32;
            ps.tickets[i] = p.tickets as i32;
            ps.ticks[i] = i32::try_from(p.ticks).unwrap_or(i32::MAX);
        }
        ps
    }

    #[cfg(test)]
    pub(crate) fn get_mut(&mut self, slot: Slot) -> &mut Proc {
        &mut self.procs[slot]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::DEFAULT_TICKETS;

    fn table_with_init() -> (ProcessTable, ProcessId) {
        let table = ProcessTable::new(1);
        let init = table.lock().spawn_init().unwrap();
        (table, init)
    }

    #[test]
    fn init_gets_default_tickets() {
        let (table, init) = table_with_init();
        let t = table.lock();
        let p = t.proc(init).unwrap();
        assert_eq!(init, INIT_PID);
        assert_eq!(p.tickets(), DEFAULT_TICKETS);
        assert_eq!(p.ticks(), 0);
        assert_eq!(p.state(), ProcessState::Runnable);
        assert_eq!(p.parent(), None);
    }

    #[test]
    fn fork_after_settickets_inherits_count() {
        let (table, init) = table_with_init();
        let mut t = table.lock();
        t.set_tickets(init, 25).unwrap();
        let slot = t.find(init).unwrap();
        t.dispatch(slot, 0).unwrap();
        assert_eq!(t.get(slot).ticks(), 1);

        let child = t.fork(init).unwrap();
        let c = t.proc(child).unwrap();
        assert_eq!(c.tickets(), 25);
        assert_eq!(c.ticks(), 0);
        assert_eq!(c.parent(), Some(init));
        assert_eq!(c.state(), ProcessState::Runnable);
    }

    #[test]
    fn settickets_rejects_non_positive() {
        let (table, init) = table_with_init();
        let mut t = table.lock();
        t.set_tickets(init, 8).unwrap();
        assert_eq!(t.set_tickets(init, 0), Err(ProcessError::InvalidTickets));
        assert_eq!(t.set_tickets(init, -3), Err(ProcessError::InvalidTickets));
        assert_eq!(t.proc(init).unwrap().tickets(), 8);
        assert_eq!(t.set_tickets(999, 5), Err(ProcessError::ProcessNotFound));
    }

    #[test]
    fn table_fills_up() {
        let (table, init) = table_with_init();
        let mut t = table.lock();
        for _ in 1..NPROC {
            t.fork(init).unwrap();
        }
        assert_eq!(t.fork(init), Err(ProcessError::NoFreeSlot));
    }

    #[test]
    fn reused_slot_starts_clean() {
        let (table, init) = table_with_init();
        let mut t = table.lock();
        let child = t.fork(init).unwrap();
        let slot = t.find(child).unwrap();
        t.set_tickets(child, 40).unwrap();
        t.dispatch(slot, 0).unwrap();
        t.exit(child, 0).unwrap();
        assert_eq!(t.wait(init), Ok(Some((child, 0))));
        assert_eq!(t.get(slot).state(), ProcessState::Unused);

        let again = t.fork(init).unwrap();
        assert_eq!(t.find(again), Some(slot));
        assert_ne!(again, child);
        assert_eq!(t.get(slot).ticks(), 0);
        assert_eq!(t.get(slot).tickets(), DEFAULT_TICKETS);
    }

    #[test]
    fn wait_sleeps_until_child_exits() {
        let (table, init) = table_with_init();
        let mut t = table.lock();
        let child = t.fork(init).unwrap();
        assert_eq!(t.wait(init), Ok(None));
        assert_eq!(t.proc(init).unwrap().state(), ProcessState::Sleeping);
        assert_eq!(t.proc(init).unwrap().channel(), Some(Channel::Child(init)));

        t.exit(child, 7).unwrap();
        assert_eq!(t.proc(init).unwrap().state(), ProcessState::Runnable);
        assert_eq!(t.wait(init), Ok(Some((child, 7))));
        assert_eq!(t.wait(init), Err(ProcessError::NoChildren));
    }

    #[test]
    fn orphans_go_to_init() {
        let (table, init) = table_with_init();
        let mut t = table.lock();
        let mid = t.fork(init).unwrap();
        let leaf = t.fork(mid).unwrap();
        t.exit(leaf, 3).unwrap();
        // init is waiting for its own children meanwhile
        assert_eq!(t.wait(init), Ok(None));
        t.exit(mid, 0).unwrap();
        assert_eq!(t.proc(leaf).unwrap().parent(), Some(init));
        assert_eq!(t.proc(init).unwrap().state(), ProcessState::Runnable);

        let mut reaped = [t.wait(init).unwrap().unwrap().0, t.wait(init).unwrap().unwrap().0];
        reaped.sort();
        assert_eq!(reaped, [mid, leaf]);
    }

    #[test]
    fn sleepers_wake_at_deadline() {
        let (table, init) = table_with_init();
        let mut t = table.lock();
        t.sleep_until(init, 5).unwrap();
        assert_eq!(t.wake_expired(4), 0);
        assert_eq!(t.proc(init).unwrap().state(), ProcessState::Sleeping);
        assert_eq!(t.wake_expired(5), 1);
        assert_eq!(t.proc(init).unwrap().state(), ProcessState::Runnable);
    }

    #[test]
    fn kill_wakes_sleeper() {
        let (table, init) = table_with_init();
        let mut t = table.lock();
        let child = t.fork(init).unwrap();
        t.sleep_until(child, 1_000).unwrap();
        t.kill(child).unwrap();
        let c = t.proc(child).unwrap();
        assert!(c.killed());
        assert_eq!(c.state(), ProcessState::Runnable);
    }

    #[test]
    fn dispatch_and_release_cycle() {
        let (table, init) = table_with_init();
        let mut t = table.lock();
        let slot = t.draw().unwrap();
        assert_eq!(t.dispatch(slot, 3), Ok(init));
        assert_eq!(t.get(slot).state(), ProcessState::Running);
        assert_eq!(t.get(slot).cpu(), Some(3));
        assert_eq!(t.draw(), Err(EmptyPool));
        assert_eq!(t.dispatch(slot, 0), Err(ProcessError::NotRunnable));

        t.release(slot, init);
        assert_eq!(t.get(slot).state(), ProcessState::Runnable);
        assert_eq!(t.get(slot).cpu(), None);
        assert_eq!(t.get(slot).ticks(), 1);
    }

    #[test]
    fn release_keeps_sleep_state() {
        let (table, init) = table_with_init();
        let mut t = table.lock();
        let slot = t.draw().unwrap();
        t.dispatch(slot, 0).unwrap();
        t.sleep_until(init, 10).unwrap();
        t.release(slot, init);
        assert_eq!(t.get(slot).state(), ProcessState::Sleeping);
    }

    #[test]
    fn snapshot_mirrors_live_slots() {
        let (table, init) = table_with_init();
        let child = {
            let mut t = table.lock();
            let child = t.fork(init).unwrap();
            t.set_tickets(child, 12).unwrap();
            let slot = t.find(child).unwrap();
            t.dispatch(slot, 0).unwrap();
            t.release(slot, child);
            child
        };
        let ps = table.snapshot();
        assert_eq!(ps.live().count(), 2);
        assert_eq!(ps.lookup(init as i32), Some((1, 0)));
        assert_eq!(ps.lookup(child as i32), Some((12, 1)));
        assert!(ps.live().all(|(_, tickets, _)| tickets > 0));
    }

    #[test]
    fn uptime_counts_timer_ticks() {
        let table = ProcessTable::new(9);
        assert_eq!(table.uptime(), 0);
        table.timer_tick();
        assert_eq!(table.timer_tick(), 2);
        assert_eq!(table.uptime(), 2);
    }
}
