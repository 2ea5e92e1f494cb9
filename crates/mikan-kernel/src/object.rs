//! The kernel object arena.
//!
//! Every kernel object lives in one table keyed by a stable [`ObjectId`] and carries an
//! explicit reference count. Handle tables, waiter sets, and pending-request lists hold ids
//! and own one reference each; back-references between objects (session peers, mutex holders)
//! are plain optional ids that are cleared on teardown, so a stale id is always detectable by
//! a failed lookup rather than being undefined behaviour.

use std::collections::HashMap;

use tracing::warn;

use crate::address_arbiter::AddressArbiter;
use crate::event::Event;
use crate::mutex::Mutex;
use crate::process::Process;
use crate::resource_limit::ResourceLimit;
use crate::semaphore::Semaphore;
use crate::session::{ClientPort, ClientSession, ServerPort, ServerSession};
use crate::shared_memory::SharedMemory;
use crate::thread::{Thread, ThreadStatus};
use crate::timer::Timer;
use crate::{Kernel, TimeoutKey, ERR_SESSION_CLOSED_BY_REMOTE};

/// Stable identity of a kernel object for the lifetime of the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

/// Discriminant of [`ObjectData`], used for handle type checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Thread,
    Process,
    Event,
    Mutex,
    Semaphore,
    Timer,
    AddressArbiter,
    SharedMemory,
    ClientPort,
    ServerPort,
    ClientSession,
    ServerSession,
    ResourceLimit,
}

#[derive(Debug)]
pub enum ObjectData {
    Thread(Thread),
    Process(Process),
    Event(Event),
    Mutex(Mutex),
    Semaphore(Semaphore),
    Timer(Timer),
    AddressArbiter(AddressArbiter),
    SharedMemory(SharedMemory),
    ClientPort(ClientPort),
    ServerPort(ServerPort),
    ClientSession(ClientSession),
    ServerSession(ServerSession),
    ResourceLimit(ResourceLimit),
}

impl ObjectData {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectData::Thread(_) => ObjectKind::Thread,
            ObjectData::Process(_) => ObjectKind::Process,
            ObjectData::Event(_) => ObjectKind::Event,
            ObjectData::Mutex(_) => ObjectKind::Mutex,
            ObjectData::Semaphore(_) => ObjectKind::Semaphore,
            ObjectData::Timer(_) => ObjectKind::Timer,
            ObjectData::AddressArbiter(_) => ObjectKind::AddressArbiter,
            ObjectData::SharedMemory(_) => ObjectKind::SharedMemory,
            ObjectData::ClientPort(_) => ObjectKind::ClientPort,
            ObjectData::ServerPort(_) => ObjectKind::ServerPort,
            ObjectData::ClientSession(_) => ObjectKind::ClientSession,
            ObjectData::ServerSession(_) => ObjectKind::ServerSession,
            ObjectData::ResourceLimit(_) => ObjectKind::ResourceLimit,
        }
    }
}

#[derive(Debug)]
pub struct KernelObject {
    pub id: ObjectId,
    pub name: String,
    pub(crate) refcount: u32,
    /// Threads currently queued on this object. A set: no duplicate entries.
    pub(crate) waiting_threads: Vec<ObjectId>,
    pub data: ObjectData,
}

// Typed projections out of the arena map. These are free functions over the map field so
// callers can split-borrow `Kernel` (e.g. hold the CPU mutably at the same time). A missing
// or mistyped id is a kernel bug, not a guest-reachable condition, hence the panics.
pub(crate) fn thread_entry(objects: &HashMap<ObjectId, KernelObject>, id: ObjectId) -> &Thread {
    match &objects.get(&id).expect("stale thread id").data {
        ObjectData::Thread(thread) => thread,
        _ => panic!("object {id:?} is not a thread"),
    }
}

pub(crate) fn thread_entry_mut(
    objects: &mut HashMap<ObjectId, KernelObject>,
    id: ObjectId,
) -> &mut Thread {
    match &mut objects.get_mut(&id).expect("stale thread id").data {
        ObjectData::Thread(thread) => thread,
        _ => panic!("object {id:?} is not a thread"),
    }
}

pub(crate) fn process_entry(objects: &HashMap<ObjectId, KernelObject>, id: ObjectId) -> &Process {
    match &objects.get(&id).expect("stale process id").data {
        ObjectData::Process(process) => process,
        _ => panic!("object {id:?} is not a process"),
    }
}

pub(crate) fn process_entry_mut(
    objects: &mut HashMap<ObjectId, KernelObject>,
    id: ObjectId,
) -> &mut Process {
    match &mut objects.get_mut(&id).expect("stale process id").data {
        ObjectData::Process(process) => process,
        _ => panic!("object {id:?} is not a process"),
    }
}

impl Kernel {
    pub(crate) fn insert_object(&mut self, name: impl Into<String>, data: ObjectData) -> ObjectId {
        let id = ObjectId(self.next_object_id);
        self.next_object_id += 1;
        self.objects.insert(
            id,
            KernelObject {
                id,
                name: name.into(),
                refcount: 1,
                waiting_threads: Vec::new(),
                data,
            },
        );
        id
    }

    pub fn object(&self, id: ObjectId) -> Option<&KernelObject> {
        self.objects.get(&id)
    }

    pub(crate) fn object_mut(&mut self, id: ObjectId) -> Option<&mut KernelObject> {
        self.objects.get_mut(&id)
    }

    pub fn object_kind(&self, id: ObjectId) -> Option<ObjectKind> {
        self.objects.get(&id).map(|object| object.data.kind())
    }

    /// Takes an additional reference to `id`. Embedders use this when stashing an id outside
    /// the kernel's own tables.
    pub fn retain(&mut self, id: ObjectId) {
        let object = self.objects.get_mut(&id).expect("retain of a stale object id");
        object.refcount += 1;
    }

    /// Drops one reference; tears the object down when the last reference goes away.
    pub fn release(&mut self, id: ObjectId) {
        let object = self.objects.get_mut(&id).expect("release of a stale object id");
        assert!(object.refcount > 0, "refcount underflow on {id:?}");
        object.refcount -= 1;
        if object.refcount == 0 {
            let object = self.objects.remove(&id).expect("object vanished during release");
            self.destroy_object(object);
        }
    }

    fn destroy_object(&mut self, object: KernelObject) {
        let id = object.id;
        match object.data {
            ObjectData::ServerSession(session) => {
                // Clear the peer's back-reference first so nothing resolves us again.
                if let Some(client_id) = session.client {
                    if let Some(ObjectData::ClientSession(client)) =
                        self.objects.get_mut(&client_id).map(|o| &mut o.data)
                    {
                        client.server = None;
                    }
                }
                // Every client blocked on this session resolves with "closed by remote"
                // instead of hanging.
                let mut blocked = session.pending_requesting_threads;
                blocked.extend(session.currently_handling);
                for tid in blocked {
                    if matches!(
                        self.objects.get(&tid).map(|o| o.data.kind()),
                        Some(ObjectKind::Thread)
                    ) && thread_entry(&self.objects, tid).status == ThreadStatus::WaitIpc
                    {
                        self.set_thread_wait_result(tid, ERR_SESSION_CLOSED_BY_REMOTE);
                        self.resume_from_wait(tid);
                    }
                    self.release(tid);
                }
            }
            ObjectData::ClientSession(session) => {
                if let Some(port_id) = session.port {
                    if let Some(ObjectData::ClientPort(port)) =
                        self.objects.get_mut(&port_id).map(|o| &mut o.data)
                    {
                        port.active_sessions -= 1;
                    }
                    self.release(port_id);
                }
                // Wake server-side waiters so a pending ReplyAndReceive observes the closed
                // session rather than sleeping forever.
                if let Some(server_id) = session.server {
                    let mut wake_server = false;
                    if let Some(ObjectData::ServerSession(server)) =
                        self.objects.get_mut(&server_id).map(|o| &mut o.data)
                    {
                        server.client = None;
                        wake_server = true;
                    }
                    if wake_server {
                        self.wakeup_all_waiting_threads(server_id);
                    }
                }
            }
            ObjectData::ClientPort(port) => {
                if let Some(server_port) = port.server_port {
                    self.release(server_port);
                }
            }
            ObjectData::ServerPort(port) => {
                for session in port.pending_sessions {
                    self.release(session);
                }
            }
            ObjectData::Timer(_) => {
                self.timing.cancel(TimeoutKey::TimerFire(id));
            }
            ObjectData::Process(process) => {
                for object in process.handle_table.drain() {
                    self.release(object);
                }
                self.release(process.resource_limit);
            }
            ObjectData::SharedMemory(block) => {
                if block.owns_backing {
                    let region = self.memory.region_mut(block.backing_region);
                    for frame in block.backing {
                        region.free(frame, mikan_mem::PAGE_SIZE);
                    }
                }
            }
            ObjectData::Thread(thread) => {
                if thread.status != ThreadStatus::Dead
                    && thread.status != ThreadStatus::Dormant
                {
                    warn!(id = id.0, "live thread dropped its last reference");
                }
            }
            ObjectData::Event(_)
            | ObjectData::Mutex(_)
            | ObjectData::Semaphore(_)
            | ObjectData::AddressArbiter(_)
            | ObjectData::ResourceLimit(_) => {}
        }
    }

    pub(crate) fn thread(&self, id: ObjectId) -> &Thread {
        thread_entry(&self.objects, id)
    }

    pub(crate) fn thread_mut(&mut self, id: ObjectId) -> &mut Thread {
        thread_entry_mut(&mut self.objects, id)
    }

    pub(crate) fn process(&self, id: ObjectId) -> &Process {
        process_entry(&self.objects, id)
    }

    pub(crate) fn process_mut(&mut self, id: ObjectId) -> &mut Process {
        process_entry_mut(&mut self.objects, id)
    }

    pub(crate) fn mutex(&self, id: ObjectId) -> &Mutex {
        match &self.objects.get(&id).expect("stale mutex id").data {
            ObjectData::Mutex(mutex) => mutex,
            _ => panic!("object {id:?} is not a mutex"),
        }
    }

    pub(crate) fn mutex_mut(&mut self, id: ObjectId) -> &mut Mutex {
        match &mut self.objects.get_mut(&id).expect("stale mutex id").data {
            ObjectData::Mutex(mutex) => mutex,
            _ => panic!("object {id:?} is not a mutex"),
        }
    }
}
