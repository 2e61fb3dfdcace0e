use lotos::process::{ProcessId, ProcessState, ProcessTable, Slot};
use lotos::programs::{LotteryTest, Program, ProgramDispatcher};
use lotos::sched::{Dispatcher, Round, Scheduler};

fn no_idle() {}

/// Dispatcher whose processes do nothing but burn their quantum.
struct Spinner;

impl Dispatcher for Spinner {
    fn switch_to(&mut self, _table: &ProcessTable, _slot: Slot, _pid: ProcessId) {}
    fn idle(&mut self) {}
}

/// `(tickets, ticks)` rows of the results table `lotterytest` printed.
fn result_rows(out: &str) -> Vec<(i32, i32)> {
    let results = out
        .split("Lottery Scheduling Results:")
        .nth(1)
        .expect("lotterytest printed no results");
    results
        .lines()
        .skip_while(|line| !line.starts_with("PID"))
        .skip(1)
        .take_while(|line| !line.is_empty())
        .map(|line| {
            let cols: Vec<i32> = line.split('\t').map(|c| c.parse().unwrap()).collect();
            (cols[1], cols[2])
        })
        .collect()
}

fn ratio(rows: &[(i32, i32)], tickets: i32) -> i32 {
    rows.iter()
        .find(|(t, _)| *t == tickets)
        .map(|&(_, ticks)| ticks)
        .unwrap_or_else(|| panic!("no worker with {} tickets", tickets))
}

#[test]
fn lotterytest_reports_three_two_one() {
    let table = ProcessTable::new(0x5EED_1234);
    let mut d = ProgramDispatcher::new(String::new(), no_idle);
    let pid = d
        .boot(&table, Program::LotteryTest(LotteryTest::new(30_000, 0)))
        .unwrap();
    let mut cpu = Scheduler::new(0);

    for _ in 0..40_000 {
        cpu.schedule_once(&table, &mut d);
        table.timer_tick();
        if table.lock().proc(pid).unwrap().state() == ProcessState::Zombie {
            break;
        }
    }
    assert_eq!(table.lock().proc(pid).unwrap().state(), ProcessState::Zombie);

    let out = d.console();
    assert!(out.contains("Process A (PID 2): 30 tickets"));
    assert!(out.contains("Process C (PID 4): 10 tickets"));
    assert!(out.contains("Expected ratio: 3:2:1 (30:20:10 tickets)"));
    assert!(out.contains("Actual ratio: "));

    let rows = result_rows(out);
    assert_eq!(rows.len(), 3);
    let (a, b, c) = (ratio(&rows, 30), ratio(&rows, 20), ratio(&rows, 10));
    assert!(a + b + c >= 29_000, "only {} quanta measured", a + b + c);
    let a_over_c = a as f64 / c as f64;
    let b_over_c = b as f64 / c as f64;
    assert!((2.7..=3.3).contains(&a_over_c), "A:C = {}", a_over_c);
    assert!((1.8..=2.2).contains(&b_over_c), "B:C = {}", b_over_c);

    // workers were killed and reaped; only the exited parent remains
    let t = table.lock();
    assert_eq!(t.iter().count(), 1);
}

fn spawn_competitors(table: &ProcessTable, tickets: &[i32]) -> Vec<ProcessId> {
    let mut t = table.lock();
    let init = t.spawn_init().unwrap();
    let pids = tickets
        .iter()
        .map(|&n| {
            let pid = t.fork(init).unwrap();
            t.set_tickets(pid, n).unwrap();
            pid
        })
        .collect();
    t.sleep_until(init, u64::MAX).unwrap();
    pids
}

fn ticks_of(table: &ProcessTable, pid: ProcessId) -> u64 {
    table.lock().proc(pid).unwrap().ticks()
}

#[test]
fn equal_tickets_split_evenly() {
    let table = ProcessTable::new(77);
    let pids = spawn_competitors(&table, &[5, 5]);
    let mut cpu = Scheduler::new(0);
    for _ in 0..10_000 {
        cpu.schedule_once(&table, &mut Spinner);
    }
    let (x, y) = (ticks_of(&table, pids[0]), ticks_of(&table, pids[1]));
    assert_eq!(x + y, 10_000);
    assert!((4_700..=5_300).contains(&x), "split {}/{}", x, y);
}

#[test]
fn ticket_change_applies_from_next_draw() {
    let table = ProcessTable::new(4242);
    let pids = spawn_competitors(&table, &[1, 1]);
    let mut cpu = Scheduler::new(0);
    for _ in 0..5_000 {
        cpu.schedule_once(&table, &mut Spinner);
    }
    let before = (ticks_of(&table, pids[0]), ticks_of(&table, pids[1]));

    table.lock().set_tickets(pids[0], 9).unwrap();
    for _ in 0..10_000 {
        cpu.schedule_once(&table, &mut Spinner);
    }
    let gained = ticks_of(&table, pids[0]) - before.0;
    let other = ticks_of(&table, pids[1]) - before.1;
    assert_eq!(gained + other, 10_000);
    // expected 9000 / 1000
    assert!((8_600..=9_400).contains(&gained), "gained {}", gained);
}

#[test]
fn idle_until_something_is_runnable() {
    let table = ProcessTable::new(1);
    let mut cpu = Scheduler::new(0);
    assert_eq!(cpu.schedule_once(&table, &mut Spinner), Round::Idle);

    let init = table.lock().spawn_init().unwrap();
    table.lock().sleep_until(init, 3).unwrap();
    for _ in 0..3 {
        assert_eq!(cpu.schedule_once(&table, &mut Spinner), Round::Idle);
        table.timer_tick();
    }
    assert!(matches!(cpu.schedule_once(&table, &mut Spinner), Round::Ran { pid, .. } if pid == init));
    assert_eq!(cpu.stats().idle_rounds, 4);
}
