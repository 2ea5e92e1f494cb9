//! Scheduler behaviour: strict-priority selection, quantum fairness for pre-empted threads,
//! sleep timeouts and starvation boosting.

mod common;

use common::{boot, boot_with_config, MAIN_PRIORITY};
use mikan_kernel::{KernelConfig, ResultCode, ThreadStatus, RESULT_SUCCESS};
use pretty_assertions::assert_eq;

const SVC_EXIT_THREAD: u32 = 0x09;
const SVC_SLEEP_THREAD: u32 = 0x0A;

#[test]
fn main_thread_is_running_after_boot() {
    let fixture = boot();
    assert_eq!(fixture.current(), fixture.main);
    assert_eq!(fixture.thread(fixture.main).status, ThreadStatus::Running);
    assert_eq!(fixture.thread(fixture.main).current_priority, MAIN_PRIORITY);
}

#[test]
fn strictly_better_priority_preempts_the_running_thread() {
    let mut fixture = boot();
    let a = fixture.spawn("a", 30);
    fixture.kernel.reschedule();
    // 30 beats the main thread's 48.
    assert_eq!(fixture.current(), a);
    let b = fixture.spawn("b", 10);
    fixture.kernel.reschedule();
    // B's priority is strictly better, so A is switched out immediately.
    assert_eq!(fixture.current(), b);
    assert_eq!(fixture.thread(a).status, ThreadStatus::Ready);
}

#[test]
fn equal_priority_does_not_cause_a_switch() {
    let mut fixture = boot();
    let a = fixture.spawn("a", 30);
    fixture.kernel.reschedule();
    assert_eq!(fixture.current(), a);
    let b = fixture.spawn("b", 30);
    fixture.kernel.reschedule();
    // No needless switching among equals: A keeps running.
    assert_eq!(fixture.current(), a);
    assert_eq!(fixture.thread(b).status, ThreadStatus::Ready);
}

#[test]
fn preempted_thread_returns_to_the_front_of_its_bucket() {
    let mut fixture = boot();
    let a = fixture.spawn("a", 30);
    fixture.kernel.reschedule();
    assert_eq!(fixture.current(), a);
    let c = fixture.spawn("c", 30);
    let b = fixture.spawn("b", 10);
    fixture.kernel.reschedule();
    assert_eq!(fixture.current(), b);
    // B exits; A was pre-empted without yielding, so it resumes before C despite C being
    // queued first.
    fixture.svc(SVC_EXIT_THREAD, &[]);
    assert_eq!(fixture.current(), a);
    assert_eq!(fixture.thread(c).status, ThreadStatus::Ready);
}

#[test]
fn sleeping_thread_wakes_when_its_deadline_passes() {
    let mut fixture = boot();
    fixture.svc(SVC_SLEEP_THREAD, &[(0, 1_000_000), (1, 0)]);
    // Nothing else is runnable, so the core idles.
    assert_eq!(fixture.kernel.current_thread(), None);
    assert_eq!(fixture.thread(fixture.main).status, ThreadStatus::WaitSleep);
    fixture.kernel.advance_time(999_999);
    assert_eq!(fixture.kernel.current_thread(), None);
    fixture.kernel.advance_time(1);
    assert_eq!(fixture.current(), fixture.main);
}

#[test]
fn zero_sleep_yields_to_an_equal_priority_thread() {
    let mut fixture = boot();
    let a = fixture.spawn("a", 30);
    fixture.kernel.reschedule();
    assert_eq!(fixture.current(), a);
    let b = fixture.spawn("b", 30);
    fixture.svc(SVC_SLEEP_THREAD, &[(0, 0), (1, 0)]);
    // A went to sleep voluntarily, so B gets the core; A comes back on the next tick.
    assert_eq!(fixture.current(), b);
    fixture.kernel.advance_time(0);
    assert_eq!(fixture.thread(a).status, ThreadStatus::Ready);
}

#[test]
fn infinite_sleep_never_arms_a_timer() {
    let mut fixture = boot();
    let ns = -1i64 as u64;
    fixture.svc(
        SVC_SLEEP_THREAD,
        &[(0, ns as u32), (1, (ns >> 32) as u32)],
    );
    assert_eq!(fixture.kernel.current_thread(), None);
    fixture.kernel.advance_time(u32::MAX as u64);
    // Deadlocked on purpose, mirroring hardware.
    assert_eq!(fixture.kernel.current_thread(), None);
    assert_eq!(fixture.thread(fixture.main).status, ThreadStatus::WaitSleep);
}

#[test]
fn starvation_boost_lifts_long_ready_threads_to_the_floor() {
    let mut fixture = boot_with_config(KernelConfig {
        priority_boost: true,
    });
    let hog = fixture.spawn("hog", 10);
    let helper = fixture.spawn("helper", 20);
    let starved = fixture.spawn("starved", 50);
    fixture.kernel.reschedule();
    assert_eq!(fixture.current(), hog);
    // 2,000,000 ARM11 ticks is ~7.5 ms of guest time; give it 20 ms.
    fixture.kernel.advance_time(20_000_000);
    fixture.kernel.reschedule();
    // Boosted toward best-ready minus one (the helper's 20) but floored at priority 40.
    assert_eq!(fixture.thread(starved).current_priority, 40);
    assert_eq!(fixture.thread(starved).nominal_priority, 50);
    assert_eq!(fixture.thread(helper).nominal_priority, 20);
    // The hog keeps the core: 40 is still not strictly better than 10.
    assert_eq!(fixture.current(), hog);
}

#[test]
fn exited_thread_is_dead_and_joiners_wake() {
    let mut fixture = boot();
    let worker = fixture.spawn("worker", 30);
    // Keep our own reference so the corpse is observable after the kernel lets go.
    fixture.kernel.retain(worker);
    fixture.kernel.reschedule();
    assert_eq!(fixture.current(), worker);
    fixture.svc(SVC_EXIT_THREAD, &[]);
    assert_eq!(fixture.thread(worker).status, ThreadStatus::Dead);
    assert_eq!(fixture.current(), fixture.main);
}

#[test]
fn joining_a_thread_wakes_when_it_dies() {
    let mut fixture = boot();
    // Priority 50 is worse than the main thread's, so creation does not switch away and the
    // handle is still readable from the caller's registers.
    fixture.svc(
        0x08, // CreateThread
        &[(0, 50), (1, common::ENTRY), (2, 0), (3, 0x0FFF_0000), (4, 0)],
    );
    assert_eq!(fixture.result(), RESULT_SUCCESS);
    let handle = fixture.reg(1);
    let main = fixture.main;
    // A live thread is a wait object that blocks until it dies.
    fixture.svc(
        0x24, // WaitSynchronization1, infinite timeout
        &[(0, handle), (2, 0xFFFF_FFFF), (3, 0xFFFF_FFFF)],
    );
    assert_eq!(fixture.thread(main).status, ThreadStatus::WaitSynchAny);
    fixture.svc(SVC_EXIT_THREAD, &[]);
    assert_eq!(fixture.current(), main);
    assert_eq!(fixture.thread_reg(main, 0), RESULT_SUCCESS.0);
}

#[test]
fn dead_thread_tls_slot_is_reused() {
    let mut fixture = boot();
    let first = fixture.spawn("first", 30);
    let first_tls = fixture.thread(first).tls_address;
    fixture.kernel.reschedule();
    assert_eq!(fixture.current(), first);
    fixture.svc(SVC_EXIT_THREAD, &[]);
    let second = fixture.spawn("second", 30);
    assert_eq!(fixture.thread(second).tls_address, first_tls);
}

#[test]
fn svc_results_are_plain_values() {
    // Sanity-check the fixture plumbing: an unknown handle close produces the canonical
    // invalid-handle code in r0.
    let mut fixture = boot();
    fixture.svc(0x23, &[(0, 0xDEAD)]);
    assert_eq!(fixture.result(), ResultCode(0xD8E007F7));
    assert_ne!(fixture.result(), RESULT_SUCCESS);
}
