//! Synchronization primitives through the SVC surface: mutex ownership and priority
//! inheritance, events, semaphores, timers and address arbiters.

mod common;

use common::boot;
use mikan_kernel::{
    ObjectData, ResultCode, ThreadStatus, ERR_INVALID_COMBINATION_KERNEL,
    ERR_OUT_OF_RANGE_KERNEL, ERR_WRONG_LOCKING_THREAD, RESULT_SUCCESS, RESULT_TIMEOUT,
};
use mikan_mem::HEAP_VADDR;
use pretty_assertions::assert_eq;

const SVC_CONTROL_MEMORY: u32 = 0x01;
const SVC_CREATE_MUTEX: u32 = 0x13;
const SVC_RELEASE_MUTEX: u32 = 0x14;
const SVC_CREATE_SEMAPHORE: u32 = 0x15;
const SVC_RELEASE_SEMAPHORE: u32 = 0x16;
const SVC_CREATE_EVENT: u32 = 0x17;
const SVC_SIGNAL_EVENT: u32 = 0x18;
const SVC_CLEAR_EVENT: u32 = 0x19;
const SVC_CREATE_TIMER: u32 = 0x1A;
const SVC_SET_TIMER: u32 = 0x1B;
const SVC_CANCEL_TIMER: u32 = 0x1C;
const SVC_CREATE_ADDRESS_ARBITER: u32 = 0x21;
const SVC_ARBITRATE_ADDRESS: u32 = 0x22;
const SVC_WAIT_SYNCHRONIZATION1: u32 = 0x24;

const INFINITE_LO: u32 = 0xFFFF_FFFF;
const INFINITE_HI: u32 = 0xFFFF_FFFF;

const RESET_ONESHOT: u32 = 0;
const RESET_STICKY: u32 = 1;

#[test]
fn priority_inheritance_boosts_and_reverts() {
    let mut fixture = boot();
    // Main (priority 48) creates and holds the mutex.
    fixture.svc(SVC_CREATE_MUTEX, &[(1, 1)]);
    let handle = fixture.reg(1);
    let main = fixture.main;
    let waiter = fixture.spawn("waiter", 10);
    fixture.kernel.reschedule();
    assert_eq!(fixture.current(), waiter);
    // The high-priority waiter blocks on the held mutex.
    fixture.svc(
        SVC_WAIT_SYNCHRONIZATION1,
        &[(0, handle), (2, INFINITE_LO), (3, INFINITE_HI)],
    );
    assert_eq!(fixture.thread(waiter).status, ThreadStatus::WaitSynchAny);
    // Inheritance: the holder runs at the waiter's priority now.
    assert_eq!(fixture.thread(main).current_priority, 10);
    assert_eq!(fixture.thread(main).nominal_priority, 48);
    assert_eq!(fixture.current(), main);
    // Releasing hands the mutex to the waiter and reverts the boost.
    fixture.svc(SVC_RELEASE_MUTEX, &[(0, handle)]);
    assert_eq!(fixture.result(), RESULT_SUCCESS);
    assert_eq!(fixture.thread(main).current_priority, 48);
    assert_eq!(fixture.current(), waiter);
    assert_eq!(fixture.thread_reg(waiter, 0), RESULT_SUCCESS.0);
}

#[test]
fn dying_holder_releases_its_mutexes_to_waiters() {
    let mut fixture = boot();
    let holder = fixture.spawn("holder", 20);
    fixture.kernel.reschedule();
    assert_eq!(fixture.current(), holder);
    fixture.svc(SVC_CREATE_MUTEX, &[(1, 1)]);
    let handle = fixture.reg(1);
    let main = fixture.main;
    // Main blocks on the mutex held by the worker.
    fixture.svc(0x0A, &[(0, 0), (1, 0)]); // yield so main runs
    assert_eq!(fixture.current(), main);
    fixture.svc(
        SVC_WAIT_SYNCHRONIZATION1,
        &[(0, handle), (2, INFINITE_LO), (3, INFINITE_HI)],
    );
    assert_eq!(fixture.thread(main).status, ThreadStatus::WaitSynchAny);
    fixture.kernel.advance_time(0);
    assert_eq!(fixture.current(), holder);
    // The holder exits without releasing; the waiter must still get the mutex.
    fixture.svc(0x09, &[]);
    assert_eq!(fixture.current(), main);
    assert_eq!(fixture.thread_reg(main, 0), RESULT_SUCCESS.0);
}

#[test]
fn oneshot_event_round_trip_auto_clears() {
    let mut fixture = boot();
    fixture.svc(SVC_CREATE_EVENT, &[(1, RESET_ONESHOT)]);
    assert_eq!(fixture.result(), RESULT_SUCCESS);
    let handle = fixture.reg(1);
    fixture.svc(SVC_SIGNAL_EVENT, &[(0, handle)]);
    assert_eq!(fixture.result(), RESULT_SUCCESS);
    // Poll-only wait succeeds once...
    fixture.svc(SVC_WAIT_SYNCHRONIZATION1, &[(0, handle), (2, 0), (3, 0)]);
    assert_eq!(fixture.result(), RESULT_SUCCESS);
    // ...and the auto-clear makes the next poll time out.
    fixture.svc(SVC_WAIT_SYNCHRONIZATION1, &[(0, handle), (2, 0), (3, 0)]);
    assert_eq!(fixture.result(), RESULT_TIMEOUT);
    assert_eq!(fixture.result(), ResultCode(0x09401BFE));
}

#[test]
fn sticky_event_stays_signaled_until_cleared() {
    let mut fixture = boot();
    fixture.svc(SVC_CREATE_EVENT, &[(1, RESET_STICKY)]);
    let handle = fixture.reg(1);
    fixture.svc(SVC_SIGNAL_EVENT, &[(0, handle)]);
    for _ in 0..3 {
        fixture.svc(SVC_WAIT_SYNCHRONIZATION1, &[(0, handle), (2, 0), (3, 0)]);
        assert_eq!(fixture.result(), RESULT_SUCCESS);
    }
    fixture.svc(SVC_CLEAR_EVENT, &[(0, handle)]);
    fixture.svc(SVC_WAIT_SYNCHRONIZATION1, &[(0, handle), (2, 0), (3, 0)]);
    assert_eq!(fixture.result(), RESULT_TIMEOUT);
}

#[test]
fn semaphore_release_wakes_one_waiter_and_returns_previous_count() {
    let mut fixture = boot();
    fixture.svc(SVC_CREATE_SEMAPHORE, &[(1, 0), (2, 1)]);
    assert_eq!(fixture.result(), RESULT_SUCCESS);
    let handle = fixture.reg(1);
    let main = fixture.main;
    let first = fixture.spawn("first", 20);
    let second = fixture.spawn("second", 25);
    // Both workers block on the empty semaphore.
    fixture.kernel.reschedule();
    assert_eq!(fixture.current(), first);
    fixture.svc(
        SVC_WAIT_SYNCHRONIZATION1,
        &[(0, handle), (2, INFINITE_LO), (3, INFINITE_HI)],
    );
    assert_eq!(fixture.current(), second);
    fixture.svc(
        SVC_WAIT_SYNCHRONIZATION1,
        &[(0, handle), (2, INFINITE_LO), (3, INFINITE_HI)],
    );
    assert_eq!(fixture.current(), main);
    // One release wakes exactly one waiter (the better-priority one), which preempts us
    // straight away; the old count of zero lands in the caller's saved registers.
    fixture.svc(SVC_RELEASE_SEMAPHORE, &[(1, handle), (2, 1)]);
    assert_eq!(fixture.current(), first);
    assert_eq!(fixture.reg(0), RESULT_SUCCESS.0);
    assert_eq!(fixture.thread_reg(main, 0), RESULT_SUCCESS.0);
    assert_eq!(fixture.thread_reg(main, 1), 0);
    assert_eq!(fixture.thread(second).status, ThreadStatus::WaitSynchAny);
}

#[test]
fn semaphore_limits_are_enforced() {
    let mut fixture = boot();
    // initial > max is an invalid combination.
    fixture.svc(SVC_CREATE_SEMAPHORE, &[(1, 2), (2, 1)]);
    assert_eq!(fixture.result(), ERR_INVALID_COMBINATION_KERNEL);
    fixture.svc(SVC_CREATE_SEMAPHORE, &[(1, 1), (2, 1)]);
    assert_eq!(fixture.result(), RESULT_SUCCESS);
    let handle = fixture.reg(1);
    // Releasing past max_count is out of range.
    fixture.svc(SVC_RELEASE_SEMAPHORE, &[(1, handle), (2, 1)]);
    assert_eq!(fixture.result(), ERR_OUT_OF_RANGE_KERNEL);
}

#[test]
fn timer_fires_then_refires_on_its_interval() {
    let mut fixture = boot();
    fixture.svc(SVC_CREATE_TIMER, &[(1, RESET_ONESHOT)]);
    let handle = fixture.reg(1);
    // First fire after 1 ms, then every 2 ms.
    fixture.svc(
        SVC_SET_TIMER,
        &[(0, handle), (2, 1_000_000), (3, 0), (1, 2_000_000), (4, 0)],
    );
    assert_eq!(fixture.result(), RESULT_SUCCESS);
    fixture.svc(SVC_WAIT_SYNCHRONIZATION1, &[(0, handle), (2, 0), (3, 0)]);
    assert_eq!(fixture.result(), RESULT_TIMEOUT);
    fixture.kernel.advance_time(1_000_000);
    fixture.svc(SVC_WAIT_SYNCHRONIZATION1, &[(0, handle), (2, 0), (3, 0)]);
    assert_eq!(fixture.result(), RESULT_SUCCESS);
    // The one-shot acquire cleared it; the interval brings it back.
    fixture.svc(SVC_WAIT_SYNCHRONIZATION1, &[(0, handle), (2, 0), (3, 0)]);
    assert_eq!(fixture.result(), RESULT_TIMEOUT);
    fixture.kernel.advance_time(2_000_000);
    fixture.svc(SVC_WAIT_SYNCHRONIZATION1, &[(0, handle), (2, 0), (3, 0)]);
    assert_eq!(fixture.result(), RESULT_SUCCESS);
    // Cancelling stops further fires.
    fixture.svc(SVC_CANCEL_TIMER, &[(0, handle)]);
    fixture.kernel.advance_time(10_000_000);
    fixture.svc(SVC_WAIT_SYNCHRONIZATION1, &[(0, handle), (2, 0), (3, 0)]);
    assert_eq!(fixture.result(), RESULT_TIMEOUT);
}

#[test]
fn negative_timer_delays_are_out_of_range() {
    let mut fixture = boot();
    fixture.svc(SVC_CREATE_TIMER, &[(1, RESET_ONESHOT)]);
    let handle = fixture.reg(1);
    fixture.svc(
        SVC_SET_TIMER,
        &[
            (0, handle),
            (2, 0xFFFF_FFFF),
            (3, 0xFFFF_FFFF),
            (1, 0),
            (4, 0),
        ],
    );
    assert_eq!(fixture.result(), ERR_OUT_OF_RANGE_KERNEL);
}

// Commits a heap page and returns its address, for arbiter tests that need guest memory.
fn commit_heap_page(fixture: &mut common::Fixture) -> u32 {
    fixture.svc(
        SVC_CONTROL_MEMORY,
        &[(0, 3), (1, HEAP_VADDR), (2, 0), (3, 0x1000), (4, 3)],
    );
    assert_eq!(fixture.result(), RESULT_SUCCESS);
    fixture.reg(1)
}

#[test]
fn arbiter_wait_if_less_than_blocks_and_signal_wakes_by_priority() {
    let mut fixture = boot();
    fixture.svc(SVC_CREATE_ADDRESS_ARBITER, &[]);
    let handle = fixture.reg(1);
    let addr = commit_heap_page(&mut fixture);
    let process = fixture.process;
    fixture.kernel.mem_write32(process, addr, 0).unwrap();
    let main = fixture.main;
    // The low-priority thread queues first.
    let low = fixture.spawn("low", 40);
    fixture.kernel.reschedule();
    assert_eq!(fixture.current(), low);
    fixture.svc(
        SVC_ARBITRATE_ADDRESS,
        &[(0, handle), (1, addr), (2, 1), (3, 10), (4, 0), (5, 0)],
    );
    assert_eq!(fixture.current(), main);
    let high = fixture.spawn("high", 20);
    fixture.kernel.reschedule();
    assert_eq!(fixture.current(), high);
    fixture.svc(
        SVC_ARBITRATE_ADDRESS,
        &[(0, handle), (1, addr), (2, 1), (3, 10), (4, 0), (5, 0)],
    );
    assert_eq!(fixture.current(), main);
    assert_eq!(fixture.thread(low).status, ThreadStatus::WaitArb);
    assert_eq!(fixture.thread(high).status, ThreadStatus::WaitArb);
    // Signal one: the higher-priority waiter wins even though it queued second, and
    // preempts the signalling thread straight away.
    fixture.svc(
        SVC_ARBITRATE_ADDRESS,
        &[(0, handle), (1, addr), (2, 0), (3, 1), (4, 0), (5, 0)],
    );
    assert_eq!(fixture.current(), high);
    assert_eq!(fixture.thread_reg(main, 0), RESULT_SUCCESS.0);
    assert_eq!(fixture.thread(low).status, ThreadStatus::WaitArb);
    // Signal all (-1), issued from the woken thread, drains the rest. The remaining waiter
    // is worse-priority, so it only becomes ready.
    fixture.svc(
        SVC_ARBITRATE_ADDRESS,
        &[(0, handle), (1, addr), (2, 0), (3, 0xFFFF_FFFF), (4, 0), (5, 0)],
    );
    assert_eq!(fixture.current(), high);
    assert_eq!(fixture.thread(low).status, ThreadStatus::Ready);
}

#[test]
fn arbiter_wait_skips_when_value_is_not_less() {
    let mut fixture = boot();
    fixture.svc(SVC_CREATE_ADDRESS_ARBITER, &[]);
    let handle = fixture.reg(1);
    let addr = commit_heap_page(&mut fixture);
    let process = fixture.process;
    fixture.kernel.mem_write32(process, addr, 10).unwrap();
    fixture.svc(
        SVC_ARBITRATE_ADDRESS,
        &[(0, handle), (1, addr), (2, 1), (3, 10), (4, 0), (5, 0)],
    );
    // 10 < 10 is false: no block, plain success.
    assert_eq!(fixture.result(), RESULT_SUCCESS);
    assert_eq!(fixture.current(), fixture.main);
}

#[test]
fn arbiter_decrement_variant_decrements_before_waiting() {
    let mut fixture = boot();
    fixture.svc(SVC_CREATE_ADDRESS_ARBITER, &[]);
    let handle = fixture.reg(1);
    let addr = commit_heap_page(&mut fixture);
    let process = fixture.process;
    fixture.kernel.mem_write32(process, addr, 5).unwrap();
    let worker = fixture.spawn("worker", 20);
    fixture.kernel.reschedule();
    assert_eq!(fixture.current(), worker);
    fixture.svc(
        SVC_ARBITRATE_ADDRESS,
        &[(0, handle), (1, addr), (2, 2), (3, 10), (4, 0), (5, 0)],
    );
    assert_eq!(fixture.thread(worker).status, ThreadStatus::WaitArb);
    assert_eq!(fixture.kernel.mem_read32(process, addr).unwrap(), 4);
}

#[test]
fn arbiter_timeout_variant_reports_timeout_even_without_blocking() {
    let mut fixture = boot();
    fixture.svc(SVC_CREATE_ADDRESS_ARBITER, &[]);
    let handle = fixture.reg(1);
    let addr = commit_heap_page(&mut fixture);
    let process = fixture.process;
    fixture.kernel.mem_write32(process, addr, 99).unwrap();
    // Value is not less than 10, so no wait happens, yet the result is Timeout.
    fixture.svc(
        SVC_ARBITRATE_ADDRESS,
        &[(0, handle), (1, addr), (2, 3), (3, 10), (4, 1000), (5, 0)],
    );
    assert_eq!(fixture.result(), RESULT_TIMEOUT);
    assert_eq!(fixture.current(), fixture.main);
}

#[test]
fn arbiter_timed_wait_resolves_by_timeout() {
    let mut fixture = boot();
    fixture.svc(SVC_CREATE_ADDRESS_ARBITER, &[]);
    let handle = fixture.reg(1);
    let addr = commit_heap_page(&mut fixture);
    let process = fixture.process;
    fixture.kernel.mem_write32(process, addr, 0).unwrap();
    let main = fixture.main;
    fixture.svc(
        SVC_ARBITRATE_ADDRESS,
        &[(0, handle), (1, addr), (2, 3), (3, 10), (4, 1_000_000), (5, 0)],
    );
    assert_eq!(fixture.thread(main).status, ThreadStatus::WaitArb);
    fixture.kernel.advance_time(1_000_000);
    assert_eq!(fixture.current(), main);
    // r0 kept the Timeout code written when the call blocked.
    assert_eq!(fixture.result(), RESULT_TIMEOUT);
}

#[test]
fn unknown_arbitration_type_is_an_enum_error() {
    let mut fixture = boot();
    fixture.svc(SVC_CREATE_ADDRESS_ARBITER, &[]);
    let handle = fixture.reg(1);
    fixture.svc(
        SVC_ARBITRATE_ADDRESS,
        &[(0, handle), (1, 0), (2, 99), (3, 0), (4, 0), (5, 0)],
    );
    assert_eq!(fixture.result(), ResultCode(0xD8E04BED));
}

#[test]
fn mutex_release_by_non_holder_is_rejected_and_holder_unchanged() {
    let mut fixture = boot();
    fixture.svc(SVC_CREATE_MUTEX, &[(1, 1)]);
    let handle = fixture.reg(1);
    let main = fixture.main;
    let pid = fixture.kernel.current_process().unwrap();
    let mutex_id = {
        let process = match &fixture.kernel.object(pid).unwrap().data {
            ObjectData::Process(process) => process,
            _ => unreachable!(),
        };
        process.handle_table.get(handle).unwrap()
    };
    let intruder = fixture.spawn("intruder", 30);
    fixture.kernel.reschedule();
    assert_eq!(fixture.current(), intruder);
    fixture.svc(SVC_RELEASE_MUTEX, &[(0, handle)]);
    assert_eq!(fixture.result(), ERR_WRONG_LOCKING_THREAD);
    match &fixture.kernel.object(mutex_id).unwrap().data {
        ObjectData::Mutex(mutex) => {
            assert_eq!(mutex.holding_thread, Some(main));
            assert_eq!(mutex.lock_count, 1);
        }
        _ => unreachable!(),
    }
}
