//! Lottery-scheduled kernel core.
//!
//! The process table, ticket accounting, the draw and the per-CPU scheduler
//! loop are plain `no_std` code and run under the host test harness; the
//! hardware glue behind the `kernel-image` feature boots them on x86_64.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(feature = "kernel-image", feature(abi_x86_interrupt))]

pub mod logger;
pub mod param;
pub mod process;
pub mod programs;
pub mod sched;
pub mod syscalls;
pub mod uaccess;

#[cfg(feature = "kernel-image")]
pub mod gdt;
#[cfg(feature = "kernel-image")]
pub mod interrupts;
#[cfg(feature = "kernel-image")]
pub mod serial;
#[cfg(feature = "kernel-image")]
pub mod vga_buffer;

/// Load the GDT and IDT, remap the PICs and start the PIT. Interrupts stay
/// disabled until the caller enables them.
#[cfg(feature = "kernel-image")]
pub fn init() {
    gdt::init();
    interrupts::init_idt();
    unsafe { interrupts::PICS.lock().initialize() };
    interrupts::init_pit(param::TIMER_HZ);
}

#[cfg(feature = "kernel-image")]
pub fn hlt_loop() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}
