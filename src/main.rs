#![no_std]
#![no_main]

use bootloader::{entry_point, BootInfo};
use core::panic::PanicInfo;
use lazy_static::lazy_static;
use log::{error, info, LevelFilter};

use lotos::logger::{self, KernelLogger};
use lotos::process::ProcessTable;
use lotos::programs::{Init, Program, ProgramDispatcher};
use lotos::sched::Scheduler;
use lotos::vga_buffer::Console;
use lotos::{interrupts, println, serial, serial_println};

/// Timer ticks the lottery demo lets its workers compete for.
const LOTTERY_WINDOW: i32 = 500;
/// Busy-loop iterations per worker quantum.
const WORKER_SPIN: u32 = 50_000;

static LOGGER: KernelLogger = KernelLogger::new(serial::_print, LevelFilter::Info);

lazy_static! {
    static ref TABLE: ProcessTable = ProcessTable::new(boot_seed());
}

fn boot_seed() -> u64 {
    unsafe { core::arch::x86_64::_rdtsc() }
}

fn on_timer() {
    TABLE.timer_tick();
}

fn idle() {
    x86_64::instructions::interrupts::enable_and_hlt();
}

entry_point!(kernel_main);

fn kernel_main(_boot_info: &'static BootInfo) -> ! {
    println!("lotos: lottery scheduling kernel");
    if logger::init(&LOGGER).is_err() {
        serial_println!("logger already installed");
    }
    lotos::init();

    // build the table before the first timer tick can reach it
    lazy_static::initialize(&TABLE);
    interrupts::set_timer_hook(on_timer);

    let mut dispatcher = ProgramDispatcher::new(Console, idle);
    let init = Program::Init(Init::new(LOTTERY_WINDOW, WORKER_SPIN));
    match dispatcher.boot(&TABLE, init) {
        Ok(pid) => info!("booted init as pid {}", pid),
        Err(err) => {
            error!("cannot create init: {}", err);
            lotos::hlt_loop();
        }
    }

    x86_64::instructions::interrupts::enable();
    Scheduler::new(0).run(&TABLE, &mut dispatcher)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    println!("{}", info);
    serial_println!("{}", info);
    lotos::hlt_loop();
}
