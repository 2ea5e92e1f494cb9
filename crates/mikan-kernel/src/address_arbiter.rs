//! Address arbiters: futex-like wait/signal primitives keyed by a guest virtual address
//! instead of a handle.
//!
//! Waiters park with status `WaitArb` and their wait address recorded on the thread; signals
//! wake by address in priority order, FIFO within a priority level. The timeout-taking
//! arbitration types return Timeout at call time even when they do not block, which is what
//! the real kernel does.

use tracing::error;

use crate::object::{ObjectData, ObjectId};
use crate::result::{
    ResultCode, ERR_INVALID_ENUM_VALUE_FND, RESULT_SUCCESS, RESULT_TIMEOUT,
};
use crate::thread::ThreadStatus;
use crate::Kernel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbitrationType {
    Signal,
    WaitIfLessThan,
    DecrementAndWaitIfLessThan,
    WaitIfLessThanWithTimeout,
    DecrementAndWaitIfLessThanWithTimeout,
}

impl ArbitrationType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Signal),
            1 => Some(Self::WaitIfLessThan),
            2 => Some(Self::DecrementAndWaitIfLessThan),
            3 => Some(Self::WaitIfLessThanWithTimeout),
            4 => Some(Self::DecrementAndWaitIfLessThanWithTimeout),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct AddressArbiter {}

impl Kernel {
    /// Caller owns the returned reference.
    pub fn create_address_arbiter(&mut self, name: &str) -> ObjectId {
        self.insert_object(name, ObjectData::AddressArbiter(AddressArbiter {}))
    }

    pub fn arbitrate_address(
        &mut self,
        arbiter: ObjectId,
        thread: ObjectId,
        arbitration_type: u32,
        address: u32,
        value: u32,
        nanoseconds: i64,
    ) -> ResultCode {
        let Some(arbitration_type) = ArbitrationType::from_raw(arbitration_type) else {
            error!(arbitration_type, "unknown arbitration type");
            return ERR_INVALID_ENUM_VALUE_FND;
        };
        let process = self.thread(thread).owner_process;
        match arbitration_type {
            ArbitrationType::Signal => {
                if (value as i32) < 0 {
                    while self.arbiter_resume_next(arbiter, address) {}
                } else {
                    for _ in 0..value {
                        if !self.arbiter_resume_next(arbiter, address) {
                            break;
                        }
                    }
                }
            }
            ArbitrationType::WaitIfLessThan => {
                if let Ok(memory_value) = self.mem_read32(process, address) {
                    if (memory_value as i32) < value as i32 {
                        self.arbiter_wait_thread(arbiter, thread, address);
                    }
                }
            }
            ArbitrationType::WaitIfLessThanWithTimeout => {
                if let Ok(memory_value) = self.mem_read32(process, address) {
                    if (memory_value as i32) < value as i32 {
                        self.arbiter_wait_thread(arbiter, thread, address);
                        self.wake_after_delay(thread, nanoseconds);
                    }
                }
            }
            ArbitrationType::DecrementAndWaitIfLessThan => {
                if let Ok(memory_value) = self.mem_read32(process, address) {
                    if (memory_value as i32) < value as i32 {
                        let _ = self.mem_write32(process, address, memory_value.wrapping_sub(1));
                        self.arbiter_wait_thread(arbiter, thread, address);
                    }
                }
            }
            ArbitrationType::DecrementAndWaitIfLessThanWithTimeout => {
                if let Ok(memory_value) = self.mem_read32(process, address) {
                    if (memory_value as i32) < value as i32 {
                        let _ = self.mem_write32(process, address, memory_value.wrapping_sub(1));
                        self.arbiter_wait_thread(arbiter, thread, address);
                        self.wake_after_delay(thread, nanoseconds);
                    }
                }
            }
        }
        // The timeout-taking types report Timeout even when the thread did not block.
        match arbitration_type {
            ArbitrationType::WaitIfLessThanWithTimeout
            | ArbitrationType::DecrementAndWaitIfLessThanWithTimeout => RESULT_TIMEOUT,
            _ => RESULT_SUCCESS,
        }
    }

    fn arbiter_wait_thread(&mut self, arbiter: ObjectId, thread: ObjectId, address: u32) {
        {
            let state = self.thread_mut(thread);
            state.wait_address = address;
            state.status = ThreadStatus::WaitArb;
        }
        self.add_waiting_thread(arbiter, thread);
        self.retain(arbiter);
        self.thread_mut(thread).wait_objects = vec![arbiter];
        self.prepare_reschedule();
    }

    // Wakes the best-priority thread parked on `address`; first-queued wins a tie.
    fn arbiter_resume_next(&mut self, arbiter: ObjectId, address: u32) -> bool {
        let candidate = {
            let entry = self.object(arbiter).expect("stale arbiter id");
            let mut best: Option<(u32, ObjectId)> = None;
            for &tid in &entry.waiting_threads {
                let thread = self.thread(tid);
                debug_assert_eq!(thread.status, ThreadStatus::WaitArb);
                if thread.wait_address != address {
                    continue;
                }
                if best.map_or(true, |(priority, _)| thread.current_priority < priority) {
                    best = Some((thread.current_priority, tid));
                }
            }
            best.map(|(_, tid)| tid)
        };
        let Some(tid) = candidate else {
            return false;
        };
        let wait_objects = std::mem::take(&mut self.thread_mut(tid).wait_objects);
        for object in wait_objects {
            self.remove_waiting_thread(object, tid);
            self.release(object);
        }
        self.resume_from_wait(tid);
        true
    }
}
