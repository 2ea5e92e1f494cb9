//! HLE kernel core: scheduler, wait objects, synchronization primitives, synchronous IPC,
//! and the SVC dispatch layer guest code invokes kernel services through.
//!
//! All mutable kernel state lives in one explicit [`Kernel`] object — no ambient singletons.
//! Kernel objects sit in a single arena keyed by stable [`ObjectId`]s with explicit reference
//! counts; handles are per-process slot/generation indices into that arena. Guest-visible
//! failures are packed [`ResultCode`] values, never host errors; host bugs (acquiring an
//! unavailable object, resuming a dead thread) are fatal assertions.
//!
//! Time is guest-virtual: the embedder drives [`Kernel::advance_time`], which fires thread
//! wakeups and timer signals and then lets the scheduler run. Hosts with real threads wrap
//! the kernel in [`SharedKernel`], whose lock is the single coarse-grained mutual exclusion
//! for every guest-visible mutation, held for whole SVC calls.

mod address_arbiter;
mod event;
mod handle;
mod ipc;
mod mutex;
mod object;
mod process;
mod ready_queue;
mod resource_limit;
mod result;
mod semaphore;
mod session;
mod shared_memory;
mod svc;
mod thread;
mod timer;
mod wait;

pub use address_arbiter::{AddressArbiter, ArbitrationType};
pub use event::{Event, ResetType};
pub use handle::{Handle, HandleTable, CURRENT_PROCESS_HANDLE, CURRENT_THREAD_HANDLE};
pub use ipc::{
    calling_pid_desc, command_id_from_header, copy_handles_desc, make_header, mapped_buffer_desc,
    move_handles_desc, static_buffer_desc, COMMAND_BUFFER_LENGTH,
};
pub use mutex::Mutex;
pub use object::{KernelObject, ObjectData, ObjectId, ObjectKind};
pub use process::{Process, ProcessStatus};
pub use ready_queue::{ReadyQueue, PRIORITY_LEVELS};
pub use resource_limit::{ResourceLimit, ResourceLimitCategory, ResourceType};
pub use result::*;
pub use semaphore::Semaphore;
pub use session::{
    ClientPort, ClientSession, ServerPort, ServerSession, PORT_NAME_MAX_LENGTH,
};
pub use shared_memory::SharedMemory;
pub use thread::{
    Thread, ThreadManager, ThreadStatus, ThreadWakeupReason, WakeupCallback,
    IPC_COMMAND_BUFFER_OFFSET, PROCESSOR_ID_ALL, PROCESSOR_ID_APP_CORE, PROCESSOR_ID_DEFAULT,
    PROCESSOR_ID_MAX, PROCESSOR_ID_SYS_CORE, THREAD_PRIO_HIGHEST, THREAD_PRIO_LOWEST,
};
pub use timer::Timer;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use mikan_cpu::Cpu;
use mikan_mem::MemorySystem;
use mikan_timing::EventQueue;

/// Kernel tunables, plain data with defaults.
#[derive(Debug, Clone, Default)]
pub struct KernelConfig {
    /// Enables starvation anti-starvation boosting during reschedules.
    pub priority_boost: bool,
}

// Keys for deferred work in the virtual clock. One pending deadline per key; cancellation is
// unschedule-by-key and idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimeoutKey {
    ThreadWakeup(ObjectId),
    TimerFire(ObjectId),
}

/// The whole kernel: object arena, thread manager, named ports, virtual clock, guest memory,
/// and the CPU execution-context boundary.
pub struct Kernel {
    pub(crate) config: KernelConfig,
    pub(crate) cpu: Box<dyn Cpu + Send>,
    pub(crate) memory: MemorySystem,
    pub(crate) timing: EventQueue<TimeoutKey>,
    pub(crate) objects: HashMap<ObjectId, KernelObject>,
    pub(crate) next_object_id: u32,
    pub(crate) next_process_id: u32,
    pub(crate) threads: ThreadManager,
    pub(crate) current_process: Option<ObjectId>,
    pub(crate) process_list: Vec<ObjectId>,
    pub(crate) named_ports: HashMap<String, ObjectId>,
    pub(crate) resource_limits: Vec<ObjectId>,
    pub(crate) reschedule_pending: bool,
    // Result for an in-flight SVC whose wait resolved before the call returned; consumed by
    // the dispatch epilogue.
    pub(crate) svc_result_override: Option<ResultCode>,
}

impl Kernel {
    pub fn new(config: KernelConfig, cpu: Box<dyn Cpu + Send>) -> Self {
        let mut kernel = Self {
            config,
            cpu,
            memory: MemorySystem::new(),
            timing: EventQueue::new(),
            objects: HashMap::new(),
            next_object_id: 1,
            next_process_id: 1,
            threads: ThreadManager::new(),
            current_process: None,
            process_list: Vec::new(),
            named_ports: HashMap::new(),
            resource_limits: Vec::new(),
            reschedule_pending: false,
            svc_result_override: None,
        };
        kernel.init_resource_limits();
        kernel
    }

    pub fn cpu(&self) -> &dyn Cpu {
        &*self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut dyn Cpu {
        &mut *self.cpu
    }

    pub fn memory(&self) -> &MemorySystem {
        &self.memory
    }

    pub fn current_process(&self) -> Option<ObjectId> {
        self.current_process
    }

    /// Guest virtual time since reset.
    pub fn now_ns(&self) -> u64 {
        self.timing.now_ns()
    }

    /// Drives the virtual clock forward, delivering due thread wakeups and timer fires, then
    /// reschedules if anything changed.
    pub fn advance_time(&mut self, delta_ns: u64) {
        for due in self.timing.advance(delta_ns) {
            match due.key {
                TimeoutKey::ThreadWakeup(thread) => self.thread_wakeup(thread),
                TimeoutKey::TimerFire(timer) => self.timer_fired(timer, due.lateness_ns),
            }
        }
        if self.reschedule_pending {
            self.reschedule();
        }
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("objects", &self.objects.len())
            .field("current_thread", &self.threads.current_thread)
            .field("current_process", &self.current_process)
            .field("now_ns", &self.timing.now_ns())
            .finish_non_exhaustive()
    }
}

/// The kernel behind its global lock.
///
/// The lock is the sole mechanism serializing guest-visible kernel mutation against host
/// threads (renderer, networking); [`SharedKernel::call_svc`] holds it for the entire
/// supervisor call, mirroring the coarse-grained kernel lock of the real dispatch path.
#[derive(Clone)]
pub struct SharedKernel {
    inner: Arc<StdMutex<Kernel>>,
}

impl SharedKernel {
    pub fn new(kernel: Kernel) -> Self {
        Self {
            inner: Arc::new(StdMutex::new(kernel)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Kernel> {
        self.inner.lock().expect("kernel lock poisoned")
    }

    /// Dispatches one supervisor call under the global kernel lock.
    pub fn call_svc(&self, immediate: u32) {
        self.lock().call_svc(immediate);
    }

    /// Advances guest time under the global kernel lock.
    pub fn advance_time(&self, delta_ns: u64) {
        self.lock().advance_time(delta_ns);
    }
}
