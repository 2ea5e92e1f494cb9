//! Threads, the ready queue and the scheduler.
//!
//! A thread is a state machine (see [`ThreadStatus`]) plus a saved CPU context. Exactly one
//! thread is Running at a time; Ready threads sit in the priority-bucketed queue; blocked
//! threads are members of the waiter sets of the objects they wait on. Wakeups are one-shot:
//! either a signal on an awaited object or the timeout event fires, never both, guarded by
//! the Ready-state early return in [`Kernel::resume_from_wait`].

use mikan_cpu::ThreadContext;
use mikan_mem::{
    MemoryPermission, MemoryRegionName, MemoryState, PAGE_SIZE, TLS_AREA_VADDR, TLS_ENTRY_SIZE,
};
use mikan_timing::ticks_from_ns;
use tracing::{error, trace};

use crate::object::{process_entry, thread_entry_mut, ObjectData, ObjectId, ObjectKind};
use crate::ready_queue::ReadyQueue;
use crate::result::{
    ErrorDescription, ErrorLevel, ErrorModule, ErrorSummary, ResultCode, ERR_OUT_OF_MEMORY,
    ERR_OUT_OF_RANGE, ERR_OUT_OF_RANGE_KERNEL, RESULT_SUCCESS, RESULT_TIMEOUT,
};
use crate::{Kernel, TimeoutKey};

pub const THREAD_PRIO_HIGHEST: u32 = 0;
pub const THREAD_PRIO_LOWEST: u32 = 63;

pub const PROCESSOR_ID_DEFAULT: i32 = -2;
pub const PROCESSOR_ID_ALL: i32 = -1;
pub const PROCESSOR_ID_APP_CORE: i32 = 0;
pub const PROCESSOR_ID_SYS_CORE: i32 = 1;
pub const PROCESSOR_ID_MAX: i32 = 3;

/// Offset of the IPC command buffer inside a thread's TLS slot.
pub const IPC_COMMAND_BUFFER_OFFSET: u32 = 0x80;

// Starvation boosting: threads Ready longer than this many ticks are lifted toward the best
// ready priority minus one, floored at priority 40.
const STARVATION_BOOST_TICKS: u64 = 2_000_000;
const STARVATION_BOOST_FLOOR: u32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Created but never scheduled.
    Dormant,
    Ready,
    Running,
    WaitSynchAny,
    WaitSynchAll,
    WaitSleep,
    WaitArb,
    WaitIpc,
    WaitHleEvent,
    /// Terminal.
    Dead,
}

impl ThreadStatus {
    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            ThreadStatus::WaitSynchAny
                | ThreadStatus::WaitSynchAll
                | ThreadStatus::WaitSleep
                | ThreadStatus::WaitArb
                | ThreadStatus::WaitIpc
                | ThreadStatus::WaitHleEvent
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadWakeupReason {
    /// An awaited object satisfied the wait.
    Signal,
    /// The wakeup timer fired first.
    Timeout,
}

/// Pending wait resolution, stored as data rather than a capturing closure so ownership stays
/// simple across the suspension. Consumed exactly once per wait episode by
/// [`Kernel::invoke_wakeup_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeupCallback {
    WaitSynch1,
    WaitSynchAll,
    WaitSynchAny,
    ReplyAndReceive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WakeOutcome {
    Proceed,
    /// The wake was consumed without resuming the thread; it stays parked on its objects.
    KeepWaiting,
}

#[derive(Debug)]
pub struct Thread {
    pub thread_id: u32,
    pub status: ThreadStatus,
    pub context: ThreadContext,
    pub entry_point: u32,
    pub stack_top: u32,
    /// Priority assigned by the owner; never changed by inheritance or boosting.
    pub nominal_priority: u32,
    /// Effective priority the scheduler uses.
    pub current_priority: u32,
    pub last_running_ticks: u64,
    pub processor_id: i32,
    /// Objects of the current wait episode; holds a reference on each.
    pub wait_objects: Vec<ObjectId>,
    /// Arbitration address while in `WaitArb`.
    pub wait_address: u32,
    pub held_mutexes: Vec<ObjectId>,
    pub pending_mutexes: Vec<ObjectId>,
    pub owner_process: ObjectId,
    pub tls_address: u32,
    pub wakeup_callback: Option<WakeupCallback>,
}

impl Thread {
    pub fn command_buffer_address(&self) -> u32 {
        self.tls_address + IPC_COMMAND_BUFFER_OFFSET
    }

    /// Index of `object` in this wait episode's object list; the last occurrence wins when a
    /// duplicated handle names the same object twice.
    pub fn wait_object_index(&self, object: ObjectId) -> i32 {
        self.wait_objects
            .iter()
            .rposition(|&o| o == object)
            .expect("object is not part of the wait episode") as i32
    }
}

#[derive(Debug)]
pub struct ThreadManager {
    pub(crate) ready_queue: ReadyQueue,
    pub(crate) thread_list: Vec<ObjectId>,
    pub(crate) current_thread: Option<ObjectId>,
    next_thread_id: u32,
}

impl ThreadManager {
    pub(crate) fn new() -> Self {
        Self {
            ready_queue: ReadyQueue::new(),
            thread_list: Vec::new(),
            current_thread: None,
            next_thread_id: 1,
        }
    }

    fn new_thread_id(&mut self) -> u32 {
        let id = self.next_thread_id;
        self.next_thread_id += 1;
        id
    }
}

impl Kernel {
    /// The thread currently executing guest code.
    pub fn current_thread(&self) -> Option<ObjectId> {
        self.threads.current_thread
    }

    pub(crate) fn current_thread_id(&self) -> ObjectId {
        self.threads.current_thread.expect("no current thread")
    }

    /// Creates a thread in `owner`, queues it Ready, and returns it with a caller-owned
    /// reference.
    pub fn create_thread(
        &mut self,
        name: &str,
        entry_point: u32,
        priority: u32,
        arg: u32,
        processor_id: i32,
        stack_top: u32,
        owner: ObjectId,
    ) -> Result<ObjectId, ResultCode> {
        if priority > THREAD_PRIO_LOWEST {
            error!(priority, "invalid thread priority");
            return Err(ERR_OUT_OF_RANGE);
        }
        if processor_id > PROCESSOR_ID_MAX {
            error!(processor_id, "invalid processor id");
            return Err(ERR_OUT_OF_RANGE_KERNEL);
        }
        if !self.process(owner).address_space.is_valid(entry_point) {
            error!(name, entry_point, "thread entry point is not mapped");
            return Err(ResultCode::new(
                ErrorDescription::InvalidAddress,
                ErrorModule::Kernel,
                ErrorSummary::InvalidArgument,
                ErrorLevel::Permanent,
            ));
        }
        let tls_address = self.allocate_tls_slot(owner)?;
        let mut context = ThreadContext::new();
        context.set_cpu_register(0, arg);
        context.set_program_counter(entry_point);
        context.set_stack_pointer(stack_top);
        // Usermode, THUMB if the entry point has the interworking bit set.
        context.set_cpsr(mikan_cpu::USER32_MODE | ((entry_point & 1) << 5));
        let thread_id = self.threads.new_thread_id();
        let last_running_ticks = ticks_from_ns(self.timing.now_ns());
        let tid = self.insert_object(
            name,
            ObjectData::Thread(Thread {
                thread_id,
                status: ThreadStatus::Dormant,
                context,
                entry_point,
                stack_top,
                nominal_priority: priority,
                current_priority: priority,
                last_running_ticks,
                processor_id,
                wait_objects: Vec::new(),
                wait_address: 0,
                held_mutexes: Vec::new(),
                pending_mutexes: Vec::new(),
                owner_process: owner,
                tls_address,
                wakeup_callback: None,
            }),
        );
        self.retain(tid);
        self.threads.thread_list.push(tid);
        self.threads.ready_queue.push_back(priority, tid);
        self.thread_mut(tid).status = ThreadStatus::Ready;
        Ok(tid)
    }

    // Finds a free TLS slot in `owner`, allocating and mapping a fresh page from the Base
    // region when every existing page is full. The slot is zeroed.
    fn allocate_tls_slot(&mut self, owner: ObjectId) -> Result<u32, ResultCode> {
        let existing = self
            .process(owner)
            .tls_slots
            .iter()
            .enumerate()
            .find_map(|(page, &bits)| {
                (bits != 0xFF).then(|| (page as u32, (!bits).trailing_zeros()))
            });
        let (page, slot) = match existing {
            Some(free) => free,
            None => {
                let frame = self
                    .memory
                    .region_mut(MemoryRegionName::Base)
                    .linear_allocate(PAGE_SIZE)
                    .ok_or_else(|| {
                        error!("no space left in the Base region for a new TLS page");
                        ERR_OUT_OF_MEMORY
                    })?;
                let process = self.process_mut(owner);
                let page = process.tls_slots.len() as u32;
                process
                    .address_space
                    .map(
                        TLS_AREA_VADDR + page * PAGE_SIZE,
                        &[frame],
                        MemoryState::Locked,
                        MemoryPermission::READ_WRITE,
                    )
                    .expect("TLS area collision");
                process.tls_slots.push(0);
                process.memory_used += PAGE_SIZE;
                (page, 0)
            }
        };
        let process = self.process_mut(owner);
        process.tls_slots[page as usize] |= 1u8 << slot;
        let tls_address = TLS_AREA_VADDR + page * PAGE_SIZE + slot * TLS_ENTRY_SIZE;
        let process = process_entry(&self.objects, owner);
        process
            .address_space
            .zero_block(&mut self.memory.fcram, tls_address, TLS_ENTRY_SIZE)
            .expect("freshly mapped TLS page is accessible");
        Ok(tls_address)
    }

    /// Kills a thread: wakes its joiners, detaches it from everything it waits on, releases
    /// its mutexes and frees its TLS slot. Irreversible.
    pub(crate) fn stop_thread(&mut self, tid: ObjectId) {
        self.timing.cancel(TimeoutKey::ThreadWakeup(tid));
        let (status, priority, tls_address, owner) = {
            let thread = self.thread(tid);
            (
                thread.status,
                thread.current_priority,
                thread.tls_address,
                thread.owner_process,
            )
        };
        if status == ThreadStatus::Dead {
            return;
        }
        if status == ThreadStatus::Ready {
            self.threads.ready_queue.remove(priority, tid);
        }
        self.thread_mut(tid).status = ThreadStatus::Dead;
        // A dead thread is acquirable: wake anything joined on it.
        self.wakeup_all_waiting_threads(tid);
        let wait_objects = std::mem::take(&mut self.thread_mut(tid).wait_objects);
        for object in wait_objects {
            self.remove_waiting_thread(object, tid);
            self.release(object);
        }
        // Held mutexes are force-released; their waiters re-arbitrate ownership.
        let held = std::mem::take(&mut self.thread_mut(tid).held_mutexes);
        for mutex in held {
            {
                let mutex = self.mutex_mut(mutex);
                mutex.lock_count = 0;
                mutex.holding_thread = None;
            }
            self.wakeup_all_waiting_threads(mutex);
            self.release(mutex);
        }
        let index = (tls_address - TLS_AREA_VADDR) / TLS_ENTRY_SIZE;
        self.process_mut(owner).tls_slots[(index / 8) as usize] &= !(1u8 << (index % 8));
        if self.threads.current_thread == Some(tid) {
            self.prepare_reschedule();
        }
    }

    pub fn exit_current_thread(&mut self) {
        let tid = self.current_thread_id();
        self.stop_thread(tid);
        if let Some(pos) = self.threads.thread_list.iter().position(|&t| t == tid) {
            self.threads.thread_list.remove(pos);
            self.release(tid);
        }
        self.prepare_reschedule();
    }

    /// Arms the one-shot wakeup timer. `-1` nanoseconds means wait forever: no timer.
    pub(crate) fn wake_after_delay(&mut self, tid: ObjectId, nanoseconds: i64) {
        if nanoseconds == -1 {
            return;
        }
        self.timing
            .schedule(nanoseconds.max(0) as u64, TimeoutKey::ThreadWakeup(tid));
    }

    // Timeout half of wait resolution, fired from the virtual clock.
    pub(crate) fn thread_wakeup(&mut self, tid: ObjectId) {
        if !self.objects.contains_key(&tid) {
            error!(tid = tid.0, "wakeup event fired for a vanished thread");
            return;
        }
        let status = self.thread(tid).status;
        if matches!(
            status,
            ThreadStatus::WaitSynchAny
                | ThreadStatus::WaitSynchAll
                | ThreadStatus::WaitArb
                | ThreadStatus::WaitHleEvent
        ) {
            // Resolve the callback before tearing down the wait-object memberships.
            self.invoke_wakeup_callback(tid, ThreadWakeupReason::Timeout, None);
            let wait_objects = std::mem::take(&mut self.thread_mut(tid).wait_objects);
            for object in wait_objects {
                self.remove_waiting_thread(object, tid);
                self.release(object);
            }
        }
        self.resume_from_wait(tid);
    }

    /// Moves a blocked thread back to Ready. Idempotent per wait episode: a thread already
    /// made Ready by a competing signal or timeout is left alone.
    pub(crate) fn resume_from_wait(&mut self, tid: ObjectId) {
        debug_assert!(
            self.thread(tid).wait_objects.is_empty(),
            "thread waking up while still queued on wait objects"
        );
        let status = self.thread(tid).status;
        match status {
            ThreadStatus::Ready => {
                // Double-wake: the first resolution already re-queued the thread.
                debug_assert!(self.thread(tid).wakeup_callback.is_none());
                return;
            }
            ThreadStatus::Running => {
                debug_assert!(false, "thread {tid:?} has already resumed");
                return;
            }
            ThreadStatus::Dead => {
                debug_assert!(false, "dead thread {tid:?} cannot resume");
                return;
            }
            _ => {}
        }
        self.thread_mut(tid).wakeup_callback = None;
        if self.threads.current_thread == Some(tid) {
            // The thread never actually switched out (its blocking SVC resolved inline);
            // there is nothing to queue.
            self.thread_mut(tid).status = ThreadStatus::Running;
            return;
        }
        let priority = self.thread(tid).current_priority;
        self.threads.ready_queue.push_back(priority, tid);
        self.thread_mut(tid).status = ThreadStatus::Ready;
        self.prepare_reschedule();
    }

    // Runs the one-shot wakeup callback for this wait episode, if any.
    pub(crate) fn invoke_wakeup_callback(
        &mut self,
        tid: ObjectId,
        reason: ThreadWakeupReason,
        object: Option<ObjectId>,
    ) -> WakeOutcome {
        let Some(callback) = self.thread_mut(tid).wakeup_callback.take() else {
            return WakeOutcome::Proceed;
        };
        match callback {
            WakeupCallback::WaitSynch1 | WakeupCallback::WaitSynchAll => {
                let result = match reason {
                    ThreadWakeupReason::Timeout => RESULT_TIMEOUT,
                    ThreadWakeupReason::Signal => RESULT_SUCCESS,
                };
                self.set_thread_wait_result(tid, result);
            }
            WakeupCallback::WaitSynchAny => match reason {
                ThreadWakeupReason::Timeout => self.set_thread_wait_result(tid, RESULT_TIMEOUT),
                ThreadWakeupReason::Signal => {
                    let object = object.expect("signal wake without a signalling object");
                    let index = self.thread(tid).wait_object_index(object);
                    self.set_thread_wait_result(tid, RESULT_SUCCESS);
                    self.set_thread_wait_output(tid, index);
                }
            },
            WakeupCallback::ReplyAndReceive => {
                assert_eq!(
                    reason,
                    ThreadWakeupReason::Signal,
                    "ReplyAndReceive waits arm no timeout"
                );
                let object = object.expect("signal wake without a signalling object");
                let mut result = RESULT_SUCCESS;
                if self.object_kind(object) == Some(ObjectKind::ServerSession) {
                    match self.receive_ipc_request(object, tid) {
                        Ok(code) => result = code,
                        Err(()) => {
                            // Receive-side translation failed; the client was already given
                            // the error and this thread goes back to waiting on the same
                            // objects.
                            self.thread_mut(tid).wakeup_callback =
                                Some(WakeupCallback::ReplyAndReceive);
                            return WakeOutcome::KeepWaiting;
                        }
                    }
                }
                let index = self.thread(tid).wait_object_index(object);
                self.set_thread_wait_result(tid, result);
                self.set_thread_wait_output(tid, index);
            }
        }
        WakeOutcome::Proceed
    }

    /// Writes the r0 a blocked thread observes when its wait resolves. When the target is the
    /// thread whose SVC is still in flight, the value is routed through the dispatch epilogue
    /// instead of the saved context (which would be overwritten on switch-out).
    pub(crate) fn set_thread_wait_result(&mut self, tid: ObjectId, result: ResultCode) {
        if self.threads.current_thread == Some(tid) {
            self.svc_result_override = Some(result);
        } else {
            self.thread_mut(tid).context.set_cpu_register(0, result.0);
        }
    }

    pub(crate) fn set_thread_wait_output(&mut self, tid: ObjectId, output: i32) {
        if self.threads.current_thread == Some(tid) {
            self.cpu.set_reg(1, output as u32);
        } else {
            self.thread_mut(tid).context.set_cpu_register(1, output as u32);
        }
    }

    /// Sets both nominal and effective priority, re-bucketing a Ready thread.
    pub fn set_thread_priority(&mut self, tid: ObjectId, priority: u32) {
        assert!(priority <= THREAD_PRIO_LOWEST, "invalid priority value");
        let (status, current) = {
            let thread = self.thread(tid);
            (thread.status, thread.current_priority)
        };
        if status == ThreadStatus::Ready {
            self.threads.ready_queue.move_thread(tid, current, priority);
        }
        let thread = self.thread_mut(tid);
        thread.nominal_priority = priority;
        thread.current_priority = priority;
    }

    /// Recomputes the effective priority: the best of the nominal priority and the priorities
    /// of all held mutexes (priority inheritance).
    pub(crate) fn update_thread_priority(&mut self, tid: ObjectId) {
        let best = {
            let thread = self.thread(tid);
            let mut best = thread.nominal_priority;
            for &mutex in &thread.held_mutexes {
                best = best.min(self.mutex(mutex).priority);
            }
            best
        };
        self.boost_thread_priority(tid, best);
    }

    /// Changes only the effective priority, re-bucketing a Ready thread.
    pub(crate) fn boost_thread_priority(&mut self, tid: ObjectId, priority: u32) {
        let (status, current) = {
            let thread = self.thread(tid);
            (thread.status, thread.current_priority)
        };
        if status == ThreadStatus::Ready {
            self.threads.ready_queue.move_thread(tid, current, priority);
        }
        self.thread_mut(tid).current_priority = priority;
    }

    // Lifts threads that have sat Ready past the starvation threshold toward the priority of
    // the best ready thread, floored at priority 40.
    fn priority_boost_starved_threads(&mut self) {
        let now = ticks_from_ns(self.timing.now_ns());
        let candidates = self.threads.thread_list.clone();
        for tid in candidates {
            let Some((best_priority, _)) = self.threads.ready_queue.first() else {
                return;
            };
            let thread = self.thread(tid);
            if thread.status == ThreadStatus::Ready
                && now.saturating_sub(thread.last_running_ticks) > STARVATION_BOOST_TICKS
            {
                let boost = best_priority.saturating_sub(1).max(STARVATION_BOOST_FLOOR);
                self.boost_thread_priority(tid, boost);
            }
        }
    }

    pub fn have_ready_threads(&self) -> bool {
        !self.threads.ready_queue.is_empty()
    }

    pub(crate) fn prepare_reschedule(&mut self) {
        self.reschedule_pending = true;
    }

    pub(crate) fn wait_current_thread_sleep(&mut self) {
        let tid = self.current_thread_id();
        self.thread_mut(tid).status = ThreadStatus::WaitSleep;
    }

    fn pop_next_ready_thread(&mut self) -> Option<ObjectId> {
        match self.threads.current_thread {
            Some(current) if self.thread(current).status == ThreadStatus::Running => {
                // Only switch away from a still-running thread for a strictly better one.
                let priority = self.thread(current).current_priority;
                Some(
                    self.threads
                        .ready_queue
                        .pop_first_better(priority)
                        .unwrap_or(current),
                )
            }
            _ => self.threads.ready_queue.pop_first(),
        }
    }

    /// Picks the next thread and swaps CPU state over to it. Idling leaves the current
    /// process and address space untouched.
    pub fn reschedule(&mut self) {
        self.reschedule_pending = false;
        if self.config.priority_boost {
            self.priority_boost_starved_threads();
        }
        let next = self.pop_next_ready_thread();
        match (self.threads.current_thread, next) {
            (Some(from), Some(to)) if from != to => {
                trace!(from = from.0, to = to.0, "context switch")
            }
            (Some(from), None) => trace!(from = from.0, "context switch to idle"),
            (None, Some(to)) => trace!(to = to.0, "context switch from idle"),
            _ => {}
        }
        self.switch_context(next);
    }

    /// The current-thread slot owns a reference, so an exited thread survives in the arena
    /// until the scheduler has switched away from it.
    pub(crate) fn switch_context(&mut self, new_thread: Option<ObjectId>) {
        let previous = self.threads.current_thread;
        if let Some(prev_id) = previous {
            let now_ticks = ticks_from_ns(self.timing.now_ns());
            let prev = thread_entry_mut(&mut self.objects, prev_id);
            prev.last_running_ticks = now_ticks;
            self.cpu.save_context(&mut prev.context);
            if prev.status == ThreadStatus::Running {
                // Pre-empted without yielding: back of nothing, front of its bucket, so it
                // keeps the rest of its turn.
                let priority = prev.current_priority;
                prev.status = ThreadStatus::Ready;
                self.threads.ready_queue.push_front(priority, prev_id);
            }
        }
        match new_thread {
            Some(new_id) => {
                assert_eq!(
                    self.thread(new_id).status,
                    ThreadStatus::Ready,
                    "thread must be ready to become running"
                );
                self.timing.cancel(TimeoutKey::ThreadWakeup(new_id));
                self.retain(new_id);
                let previous_process = self.current_process;
                self.threads.current_thread = Some(new_id);
                // The scheduler may already have dequeued the thread; a pre-empted previous
                // thread re-entering is still queued.
                let priority = self.thread(new_id).current_priority;
                if self.threads.ready_queue.contains(priority, new_id) {
                    self.threads.ready_queue.remove(priority, new_id);
                }
                let restore_nominal = self.config.priority_boost;
                let new = thread_entry_mut(&mut self.objects, new_id);
                new.status = ThreadStatus::Running;
                if restore_nominal {
                    new.current_priority = new.nominal_priority;
                }
                let tls_address = new.tls_address;
                let owner = new.owner_process;
                self.cpu.load_context(&new.context);
                self.cpu.set_tls_base(tls_address);
                if previous_process != Some(owner) {
                    self.current_process = Some(owner);
                }
            }
            None => self.threads.current_thread = None,
        }
        if let Some(prev_id) = previous {
            // Drop the current-thread reference last so prev == new stays alive throughout.
            self.release(prev_id);
        }
    }
}
