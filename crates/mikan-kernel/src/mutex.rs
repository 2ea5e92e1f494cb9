//! Recursive guest mutexes with priority inheritance.
//!
//! A mutex carries a priority of its own: the best current priority among its waiters
//! (lowest priority when nobody waits). A holder's effective priority is the best of its
//! nominal priority and the priorities of everything it holds, so a high-priority waiter
//! lifts a low-priority holder for exactly as long as the mutex is held.

use tracing::error;

use crate::object::{ObjectData, ObjectId};
use crate::result::{ResultCode, ERR_WRONG_LOCKING_THREAD, RESULT_SUCCESS};
use crate::thread::THREAD_PRIO_LOWEST;
use crate::Kernel;

#[derive(Debug)]
pub struct Mutex {
    /// Lock depth; the mutex is free at zero.
    pub lock_count: u32,
    /// Best waiter priority, propagated into the holder's effective priority.
    pub priority: u32,
    pub holding_thread: Option<ObjectId>,
}

impl Kernel {
    /// Creates a mutex, optionally acquired on behalf of the calling thread. Caller owns the
    /// returned reference.
    pub fn create_mutex(&mut self, initial_locked: bool, name: &str) -> ObjectId {
        let id = self.insert_object(
            name,
            ObjectData::Mutex(Mutex {
                lock_count: 0,
                priority: THREAD_PRIO_LOWEST,
                holding_thread: None,
            }),
        );
        if initial_locked {
            let thread = self.current_thread_id();
            self.acquire(id, thread);
        }
        id
    }

    // Acquire half of the wait-object contract. Re-acquisition by the holder just deepens
    // the lock count.
    pub(crate) fn acquire_mutex(&mut self, mutex: ObjectId, thread: ObjectId) {
        let first_lock = {
            let state = self.mutex_mut(mutex);
            state.lock_count += 1;
            state.lock_count == 1
        };
        if first_lock {
            let priority = self.thread(thread).current_priority;
            {
                let state = self.mutex_mut(mutex);
                state.priority = priority;
                state.holding_thread = Some(thread);
            }
            let newly_held = {
                let held = &mut self.thread_mut(thread).held_mutexes;
                if held.contains(&mutex) {
                    false
                } else {
                    held.push(mutex);
                    true
                }
            };
            if newly_held {
                self.retain(mutex);
            }
            self.update_thread_priority(thread);
        }
    }

    /// Releases one lock level. Fails without touching the holder if `thread` does not hold
    /// the mutex. A full release hands ownership to the best waiter before anything else can
    /// run.
    pub fn release_mutex(&mut self, mutex: ObjectId, thread: ObjectId) -> ResultCode {
        if self.mutex(mutex).holding_thread != Some(thread) {
            if self.mutex(mutex).holding_thread.is_some() {
                error!(
                    mutex = mutex.0,
                    thread = thread.0,
                    "mutex released by a thread that does not hold it"
                );
            }
            return ERR_WRONG_LOCKING_THREAD;
        }
        let fully_released = {
            let state = self.mutex_mut(mutex);
            state.lock_count -= 1;
            state.lock_count == 0
        };
        if fully_released {
            self.mutex_mut(mutex).holding_thread = None;
            let held_ref = {
                let held = &mut self.thread_mut(thread).held_mutexes;
                match held.iter().position(|&m| m == mutex) {
                    Some(pos) => {
                        held.remove(pos);
                        true
                    }
                    None => false,
                }
            };
            self.update_thread_priority(thread);
            // Ownership transfers inside the wake: the best eligible waiter acquires before
            // any other thread can observe the mutex unlocked.
            self.wakeup_all_waiting_threads(mutex);
            if held_ref {
                self.release(mutex);
            }
        }
        RESULT_SUCCESS
    }

    // Recomputes the mutex priority from its waiters and propagates a change to the holder.
    pub(crate) fn update_mutex_priority(&mut self, mutex: ObjectId) {
        let best = {
            let entry = self.object(mutex).expect("stale mutex id");
            let mut best = THREAD_PRIO_LOWEST;
            for &waiter in &entry.waiting_threads {
                best = best.min(self.thread(waiter).current_priority);
            }
            best
        };
        if self.mutex(mutex).priority != best {
            self.mutex_mut(mutex).priority = best;
            if let Some(holder) = self.mutex(mutex).holding_thread {
                self.update_thread_priority(holder);
            }
        }
    }
}
