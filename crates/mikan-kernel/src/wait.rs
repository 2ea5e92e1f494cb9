//! The wait-object capability: `should_wait`, `acquire`, and waiter-set maintenance,
//! dispatched over the closed set of waitable object kinds.
//!
//! `acquire` must only be called when `should_wait` is false; violating that is a host bug
//! and panics. The waiter set is a set, not a list: adding a thread twice is a no-op.

use crate::object::{ObjectData, ObjectId, ObjectKind};
use crate::thread::{ThreadStatus, ThreadWakeupReason, WakeOutcome, THREAD_PRIO_LOWEST};
use crate::Kernel;

impl Kernel {
    /// Whether a handle to this object can be blocked on at all.
    pub(crate) fn is_waitable(&self, object: ObjectId) -> bool {
        matches!(
            self.object_kind(object),
            Some(
                ObjectKind::Thread
                    | ObjectKind::Event
                    | ObjectKind::Mutex
                    | ObjectKind::Semaphore
                    | ObjectKind::Timer
                    | ObjectKind::ServerPort
                    | ObjectKind::ServerSession
                    | ObjectKind::AddressArbiter
            )
        )
    }

    /// True if `thread` attempting to acquire `object` right now would have to block.
    pub(crate) fn should_wait(&self, object: ObjectId, thread: ObjectId) -> bool {
        let entry = self.object(object).expect("stale wait object id");
        match &entry.data {
            // A thread-as-join-target blocks until it is dead.
            ObjectData::Thread(target) => target.status != ThreadStatus::Dead,
            ObjectData::Event(event) => !event.signaled,
            ObjectData::Timer(timer) => !timer.signaled,
            ObjectData::Mutex(mutex) => {
                mutex.lock_count > 0 && mutex.holding_thread != Some(thread)
            }
            ObjectData::Semaphore(semaphore) => semaphore.available_count <= 0,
            ObjectData::ServerPort(port) => port.pending_sessions.is_empty(),
            ObjectData::ServerSession(session) => {
                // A closed session never waits; the error surfaces on receive.
                session.client.is_some()
                    && (session.pending_requesting_threads.is_empty()
                        || session.currently_handling.is_some())
            }
            // Arbiters never block through the synchronization path.
            ObjectData::AddressArbiter(_) => false,
            other => panic!("{:?} is not waitable", other.kind()),
        }
    }

    /// Commits the acquisition of `object` by `thread`.
    pub(crate) fn acquire(&mut self, object: ObjectId, thread: ObjectId) {
        assert!(!self.should_wait(object, thread), "object unavailable");
        match self.object_kind(object).expect("stale wait object id") {
            // Nothing to consume; the woken thread accepts a pending port session itself.
            ObjectKind::Thread | ObjectKind::AddressArbiter | ObjectKind::ServerPort => {}
            ObjectKind::Event => self.event_mut(object).acquire(),
            ObjectKind::Timer => self.timer_mut(object).acquire(),
            ObjectKind::Semaphore => self.semaphore_mut(object).available_count -= 1,
            ObjectKind::Mutex => self.acquire_mutex(object, thread),
            ObjectKind::ServerSession => self.acquire_server_session(object),
            kind => panic!("{kind:?} is not waitable"),
        }
    }

    /// Adds `thread` to `object`'s waiter set (a set: duplicates are ignored), taking a
    /// reference on the thread.
    pub(crate) fn add_waiting_thread(&mut self, object: ObjectId, thread: ObjectId) {
        let added = {
            let entry = self.object_mut(object).expect("stale wait object id");
            if entry.waiting_threads.contains(&thread) {
                false
            } else {
                entry.waiting_threads.push(thread);
                true
            }
        };
        if added {
            self.retain(thread);
        }
        if self.object_kind(object) == Some(ObjectKind::Mutex) {
            let pending = &mut self.thread_mut(thread).pending_mutexes;
            if !pending.contains(&object) {
                pending.push(object);
            }
            // A new waiter may raise the mutex priority and, through it, the holder's.
            self.update_mutex_priority(object);
        }
    }

    pub(crate) fn remove_waiting_thread(&mut self, object: ObjectId, thread: ObjectId) {
        let removed = {
            let entry = self.object_mut(object).expect("stale wait object id");
            match entry.waiting_threads.iter().position(|&t| t == thread) {
                Some(pos) => {
                    entry.waiting_threads.remove(pos);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.release(thread);
        }
        if self.object_kind(object) == Some(ObjectKind::Mutex) {
            let pending = &mut self.thread_mut(thread).pending_mutexes;
            if let Some(pos) = pending.iter().position(|&m| m == object) {
                pending.remove(pos);
            }
            self.update_mutex_priority(object);
        }
    }

    // Best waiter that is actually ready to run: for wait-all sleepers every object of their
    // episode must be available, for the rest this object alone decides. Priority order,
    // FIFO within a level.
    fn highest_priority_ready_waiter(&self, object: ObjectId) -> Option<ObjectId> {
        let entry = self.object(object).expect("stale wait object id");
        let mut candidate = None;
        let mut candidate_priority = THREAD_PRIO_LOWEST + 1;
        for &tid in &entry.waiting_threads {
            let thread = self.thread(tid);
            debug_assert!(
                matches!(
                    thread.status,
                    ThreadStatus::WaitSynchAny
                        | ThreadStatus::WaitSynchAll
                        | ThreadStatus::WaitHleEvent
                ),
                "inconsistent status in a waiter set"
            );
            if thread.current_priority >= candidate_priority {
                continue;
            }
            if self.should_wait(object, tid) {
                continue;
            }
            let ready_to_run = if thread.status == ThreadStatus::WaitSynchAll {
                thread
                    .wait_objects
                    .iter()
                    .all(|&awaited| !self.should_wait(awaited, tid))
            } else {
                true
            };
            if ready_to_run {
                candidate = Some(tid);
                candidate_priority = thread.current_priority;
            }
        }
        candidate
    }

    /// Signal half of wait resolution: repeatedly picks the best eligible waiter, commits the
    /// acquisition(s), runs the wakeup callback, detaches the thread from its wait episode
    /// and resumes it — until nobody eligible remains.
    pub(crate) fn wakeup_all_waiting_threads(&mut self, object: ObjectId) {
        while let Some(tid) = self.highest_priority_ready_waiter(object) {
            if self.thread(tid).status == ThreadStatus::WaitSynchAll {
                let awaited = self.thread(tid).wait_objects.clone();
                for other in awaited {
                    self.acquire(other, tid);
                }
            } else {
                self.acquire(object, tid);
            }
            let outcome = self.invoke_wakeup_callback(tid, ThreadWakeupReason::Signal, Some(object));
            if outcome == WakeOutcome::KeepWaiting {
                continue;
            }
            let wait_objects = std::mem::take(&mut self.thread_mut(tid).wait_objects);
            for awaited in wait_objects {
                self.remove_waiting_thread(awaited, tid);
                self.release(awaited);
            }
            self.resume_from_wait(tid);
        }
    }
}
