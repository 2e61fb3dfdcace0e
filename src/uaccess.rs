// Copying kernel data out to a caller's address space
use core::fmt;
use core::mem::size_of;
use core::ptr;

/// Why a copy to user memory was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    NullPointer,
    OutOfRange { addr: u64, len: usize },
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MemoryError::NullPointer => write!(f, "Null pointer"),
            MemoryError::OutOfRange { addr, len } => {
                write!(f, "Range 0x{:x}+{} is not writable", addr, len)
            }
        }
    }
}

/// Memory-management collaborator used by syscalls that return data.
///
/// Implementations validate the whole destination range before writing
/// anything, so a refused copy leaves the caller's memory untouched.
pub trait UserMemory {
    fn copy_out(&mut self, dst: u64, src: &[u8]) -> Result<(), MemoryError>;
}

/// One contiguous writable range, addressed directly.
///
/// Stands in for a page-table walk on a kernel where user programs share the
/// kernel's address space.
#[derive(Debug, Clone, Copy)]
pub struct UserRegion {
    start: u64,
    end: u64,
}

impl UserRegion {
    /// # Safety
    /// `[start, start + len)` must be mapped, writable and not aliased by any
    /// live Rust reference for as long as the region is used.
    pub const unsafe fn new(start: u64, len: u64) -> Self {
        Self {
            start,
            end: start + len,
        }
    }

    /// Region that refuses every non-empty copy.
    pub const fn empty() -> Self {
        Self { start: 0, end: 0 }
    }

    /// Region covering exactly `obj`.
    ///
    /// The borrow ends when this returns, so writes through the region must
    /// happen before `obj` is touched again.
    pub fn for_object<T>(obj: &mut T) -> Self {
        let start = obj as *mut T as u64;
        // Safety: the range is one live, exclusively borrowed object.
        unsafe { Self::new(start, size_of::<T>() as u64) }
    }

    /// Check that `[addr, addr + len)` lies inside the region.
    pub fn check(&self, addr: u64, len: usize) -> Result<(), MemoryError> {
        if addr == 0 {
            return Err(MemoryError::NullPointer);
        }
        let end = addr
            .checked_add(len as u64)
            .ok_or(MemoryError::OutOfRange { addr, len })?;
        if addr < self.start || end > self.end {
            return Err(MemoryError::OutOfRange { addr, len });
        }
        Ok(())
    }
}

impl UserMemory for UserRegion {
    fn copy_out(&mut self, dst: u64, src: &[u8]) -> Result<(), MemoryError> {
        self.check(dst, src.len())?;
        // Safety: the range was validated against a region the constructor
        // vouched for.
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst as *mut u8, src.len()) };
        Ok(())
    }
}
