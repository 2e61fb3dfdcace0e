// System call layer for the lottery-scheduled kernel
use core::fmt;

use log::{debug, warn};
use zerocopy::AsBytes;

use crate::process::pcb::{ProcessError, ProcessId};
use crate::process::table::ProcessTable;
use crate::uaccess::{MemoryError, UserMemory};

/// System call numbers (xv6 numbering)
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallNumber {
    Fork = 1,
    Exit = 2,
    Wait = 3,
    Kill = 6,
    GetPid = 11,
    Sleep = 13,
    Uptime = 14,
    SetTickets = 22,
    GetPInfo = 23,
}

impl TryFrom<u64> for SyscallNumber {
    type Error = SyscallError;

    fn try_from(num: u64) -> Result<Self, SyscallError> {
        Ok(match num {
            1 => SyscallNumber::Fork,
            2 => SyscallNumber::Exit,
            3 => SyscallNumber::Wait,
            6 => SyscallNumber::Kill,
            11 => SyscallNumber::GetPid,
            13 => SyscallNumber::Sleep,
            14 => SyscallNumber::Uptime,
            22 => SyscallNumber::SetTickets,
            23 => SyscallNumber::GetPInfo,
            _ => return Err(SyscallError::InvalidSyscall),
        })
    }
}

/// System call arguments (up to 6 arguments in x86_64)
#[derive(Debug, Clone, Copy, Default)]
pub struct SyscallArgs {
    pub arg0: u64, // rdi
    pub arg1: u64, // rsi
    pub arg2: u64, // rdx
    pub arg3: u64, // r10
    pub arg4: u64, // r8
    pub arg5: u64, // r9
}

impl SyscallArgs {
    pub fn one(arg0: u64) -> Self {
        Self {
            arg0,
            ..Self::default()
        }
    }

    /// First argument as a C `int`.
    fn int0(&self) -> i32 {
        self.arg0 as i32
    }
}

/// System call result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallResult {
    Success(u64),
    Error(SyscallError),
}

/// System call errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    InvalidSyscall,
    InvalidArgument,
    InvalidPointer,
    ProcessNotFound,
    NoChildren,
    NoFreeSlot,
}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyscallError::InvalidSyscall => write!(f, "Invalid syscall number"),
            SyscallError::InvalidArgument => write!(f, "Invalid argument"),
            SyscallError::InvalidPointer => write!(f, "Invalid user pointer"),
            SyscallError::ProcessNotFound => write!(f, "Process not found"),
            SyscallError::NoChildren => write!(f, "No children"),
            SyscallError::NoFreeSlot => write!(f, "Process table full"),
        }
    }
}

impl From<ProcessError> for SyscallError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::InvalidTickets => SyscallError::InvalidArgument,
            ProcessError::NoFreeSlot => SyscallError::NoFreeSlot,
            ProcessError::ProcessNotFound => SyscallError::ProcessNotFound,
            ProcessError::NoChildren => SyscallError::NoChildren,
            ProcessError::NotRunnable => SyscallError::ProcessNotFound,
        }
    }
}

impl From<MemoryError> for SyscallError {
    fn from(_: MemoryError) -> Self {
        SyscallError::InvalidPointer
    }
}

impl<E: Into<SyscallError>> From<Result<u64, E>> for SyscallResult {
    fn from(result: Result<u64, E>) -> Self {
        match result {
            Ok(value) => SyscallResult::Success(value),
            Err(err) => SyscallResult::Error(err.into()),
        }
    }
}

/// Value left in the return register: errors are `-1`.
impl From<SyscallResult> for u64 {
    fn from(result: SyscallResult) -> u64 {
        match result {
            SyscallResult::Success(value) => value,
            SyscallResult::Error(_) => -1i64 as u64,
        }
    }
}

impl SyscallResult {
    /// Return value as the C caller sees it.
    pub fn as_int(self) -> i64 {
        u64::from(self) as i64
    }
}

/// Outcome of `wait` as seen by kernel-side callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Reaped { pid: ProcessId, status: i32 },
    /// The caller now sleeps until a child exits; retry when it runs again.
    Blocked,
}

/// Everything a syscall needs to know about its caller.
pub struct SyscallContext<'a> {
    pub table: &'a ProcessTable,
    pub caller: ProcessId,
    pub memory: &'a mut dyn UserMemory,
}

impl<'a> SyscallContext<'a> {
    pub fn new(table: &'a ProcessTable, caller: ProcessId, memory: &'a mut dyn UserMemory) -> Self {
        Self {
            table,
            caller,
            memory,
        }
    }
}

/// Handle a system call
pub fn handle_syscall(ctx: &mut SyscallContext, syscall_num: u64, args: SyscallArgs) -> SyscallResult {
    let number = match SyscallNumber::try_from(syscall_num) {
        Ok(number) => number,
        Err(err) => {
            warn!("pid {} issued unknown syscall {}", ctx.caller, syscall_num);
            return SyscallResult::Error(err);
        }
    };

    match number {
        SyscallNumber::Fork => sys_fork(ctx).map(u64::from).into(),
        SyscallNumber::Exit => sys_exit(ctx, args.int0()).map(|_| 0u64).into(),
        SyscallNumber::Wait => match sys_wait(ctx) {
            Ok(WaitStatus::Reaped { pid, .. }) => SyscallResult::Success(u64::from(pid)),
            // The trap return path re-issues the call once the caller is woken.
            Ok(WaitStatus::Blocked) => SyscallResult::Success(0),
            Err(err) => SyscallResult::Error(err),
        },
        SyscallNumber::Kill => sys_kill(ctx, args.int0()).map(|_| 0u64).into(),
        SyscallNumber::GetPid => SyscallResult::Success(u64::from(sys_getpid(ctx))),
        SyscallNumber::Sleep => sys_sleep(ctx, args.int0()).map(|_| 0u64).into(),
        SyscallNumber::Uptime => SyscallResult::Success(sys_uptime(ctx)),
        SyscallNumber::SetTickets => sys_settickets(ctx, args.int0()).map(|_| 0u64).into(),
        SyscallNumber::GetPInfo => sys_getpinfo(ctx, args.arg0).map(|_| 0u64).into(),
    }
}

// Individual syscall implementations

/// Set the caller's ticket count. `n < 1` leaves the count unchanged.
pub fn sys_settickets(ctx: &mut SyscallContext, n: i32) -> Result<(), SyscallError> {
    debug!("[SYSCALL] settickets({}) from pid {}", n, ctx.caller);
    ctx.table.lock().set_tickets(ctx.caller, n)?;
    Ok(())
}

/// Copy a snapshot of the process table to `out` in the caller's memory.
///
/// The snapshot is taken in one critical section and the lock is dropped
/// before touching user memory.
pub fn sys_getpinfo(ctx: &mut SyscallContext, out: u64) -> Result<(), SyscallError> {
    debug!("[SYSCALL] getpinfo(0x{:x}) from pid {}", out, ctx.caller);
    let snapshot = ctx.table.snapshot();
    ctx.memory.copy_out(out, snapshot.as_bytes()).map_err(|err| {
        warn!("getpinfo from pid {}: {}", ctx.caller, err);
        SyscallError::from(err)
    })
}

pub fn sys_fork(ctx: &mut SyscallContext) -> Result<ProcessId, SyscallError> {
    let child = ctx.table.lock().fork(ctx.caller)?;
    debug!("[SYSCALL] fork from pid {} -> {}", ctx.caller, child);
    Ok(child)
}

pub fn sys_exit(ctx: &mut SyscallContext, status: i32) -> Result<(), SyscallError> {
    debug!("[SYSCALL] exit({}) from pid {}", status, ctx.caller);
    ctx.table.lock().exit(ctx.caller, status)?;
    Ok(())
}

pub fn sys_wait(ctx: &mut SyscallContext) -> Result<WaitStatus, SyscallError> {
    match ctx.table.lock().wait(ctx.caller)? {
        Some((pid, status)) => Ok(WaitStatus::Reaped { pid, status }),
        None => Ok(WaitStatus::Blocked),
    }
}

pub fn sys_kill(ctx: &mut SyscallContext, pid: i32) -> Result<(), SyscallError> {
    let pid = ProcessId::try_from(pid).map_err(|_| SyscallError::ProcessNotFound)?;
    debug!("[SYSCALL] kill({}) from pid {}", pid, ctx.caller);
    ctx.table.lock().kill(pid)?;
    Ok(())
}

pub fn sys_getpid(ctx: &mut SyscallContext) -> ProcessId {
    ctx.caller
}

/// Sleep for `n` timer ticks.
pub fn sys_sleep(ctx: &mut SyscallContext, n: i32) -> Result<(), SyscallError> {
    if n < 0 {
        return Err(SyscallError::InvalidArgument);
    }
    let deadline = ctx.table.uptime() + n as u64;
    ctx.table.lock().sleep_until(ctx.caller, deadline)?;
    Ok(())
}

pub fn sys_uptime(ctx: &mut SyscallContext) -> u64 {
    ctx.table.uptime()
}
