//! Per-process handle tables.
//!
//! A handle is an opaque 32-bit value packing a table slot and a generation counter. The
//! generation changes every time a slot is reused, so a handle kept across a close resolves
//! to nothing instead of to an unrelated object. Handles never collide with the two
//! pseudo-handles, which have the top bit set.

use crate::object::{ObjectId, ObjectKind};
use crate::{
    Kernel, ResultCode, ERR_INVALID_HANDLE, ERR_OUT_OF_HANDLES, RESULT_SUCCESS,
};

pub type Handle = u32;

/// Pseudo-handle for the calling thread.
pub const CURRENT_THREAD_HANDLE: Handle = 0xFFFF_8000;
/// Pseudo-handle for the calling process.
pub const CURRENT_PROCESS_HANDLE: Handle = 0xFFFF_8001;

const MAX_COUNT: usize = 4096;
const GENERATION_MASK: u32 = 0x7FFF;

#[derive(Debug, Default, Clone, Copy)]
struct Slot {
    object: Option<ObjectId>,
    generation: u16,
}

/// Slot/generation handle table. Object reference counts are managed by the kernel wrappers
/// ([`Kernel::handle_create`] and friends); the table itself only stores ids.
#[derive(Debug, Default)]
pub struct HandleTable {
    slots: Vec<Slot>,
    free_slots: Vec<u16>,
    next_generation: u16,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            next_generation: 1,
        }
    }

    fn advance_generation(&mut self) -> u16 {
        let generation = self.next_generation;
        self.next_generation += 1;
        // Generation 0 is reserved: handle 0 must never be valid.
        if self.next_generation > GENERATION_MASK as u16 {
            self.next_generation = 1;
        }
        generation
    }

    pub fn create(&mut self, object: ObjectId) -> Result<Handle, ResultCode> {
        let slot = match self.free_slots.pop() {
            Some(slot) => slot as usize,
            None if self.slots.len() < MAX_COUNT => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
            None => return Err(ERR_OUT_OF_HANDLES),
        };
        let generation = self.advance_generation();
        self.slots[slot] = Slot {
            object: Some(object),
            generation,
        };
        Ok(((slot as u32) << 15) | generation as u32)
    }

    pub fn get(&self, handle: Handle) -> Option<ObjectId> {
        let slot = (handle >> 15) as usize;
        let generation = (handle & GENERATION_MASK) as u16;
        let entry = self.slots.get(slot)?;
        (entry.generation == generation).then_some(entry.object?)
    }

    /// Removes the entry; the caller is responsible for releasing the returned object.
    pub fn close(&mut self, handle: Handle) -> Option<ObjectId> {
        let slot = (handle >> 15) as usize;
        let generation = (handle & GENERATION_MASK) as u16;
        let entry = self.slots.get_mut(slot)?;
        if entry.generation != generation {
            return None;
        }
        let object = entry.object.take()?;
        self.free_slots.push(slot as u16);
        Some(object)
    }

    /// Empties the table, returning every held object for release. Used at process teardown.
    pub fn drain(mut self) -> Vec<ObjectId> {
        self.slots.iter_mut().filter_map(|slot| slot.object.take()).collect()
    }
}

impl Kernel {
    /// Creates a handle to `object` in `process`'s table, taking a new reference.
    pub(crate) fn handle_create(
        &mut self,
        process: ObjectId,
        object: ObjectId,
    ) -> Result<Handle, ResultCode> {
        self.retain(object);
        match self.process_mut(process).handle_table.create(object) {
            Ok(handle) => Ok(handle),
            Err(err) => {
                self.release(object);
                Err(err)
            }
        }
    }

    pub(crate) fn handle_close(&mut self, process: ObjectId, handle: Handle) -> ResultCode {
        match self.process_mut(process).handle_table.close(handle) {
            Some(object) => {
                self.release(object);
                RESULT_SUCCESS
            }
            None => ERR_INVALID_HANDLE,
        }
    }

    pub(crate) fn handle_duplicate(
        &mut self,
        process: ObjectId,
        handle: Handle,
    ) -> Result<Handle, ResultCode> {
        let object = self.handle_resolve(process, handle).ok_or(ERR_INVALID_HANDLE)?;
        self.handle_create(process, object)
    }

    /// Resolves a handle in `process`'s table, honouring the two pseudo-handles.
    pub(crate) fn handle_resolve(&self, process: ObjectId, handle: Handle) -> Option<ObjectId> {
        match handle {
            CURRENT_THREAD_HANDLE => self.threads.current_thread,
            CURRENT_PROCESS_HANDLE => self.current_process,
            _ => self.process(process).handle_table.get(handle),
        }
    }

    /// Resolves a handle and checks the object kind.
    pub(crate) fn handle_of_kind(
        &self,
        process: ObjectId,
        handle: Handle,
        kind: ObjectKind,
    ) -> Result<ObjectId, ResultCode> {
        let object = self.handle_resolve(process, handle).ok_or(ERR_INVALID_HANDLE)?;
        if self.object_kind(object) == Some(kind) {
            Ok(object)
        } else {
            Err(ERR_INVALID_HANDLE)
        }
    }

    /// Resolves a handle to any object a thread can block on.
    pub(crate) fn waitable_by_handle(
        &self,
        process: ObjectId,
        handle: Handle,
    ) -> Result<ObjectId, ResultCode> {
        let object = self.handle_resolve(process, handle).ok_or(ERR_INVALID_HANDLE)?;
        if self.is_waitable(object) {
            Ok(object)
        } else {
            Err(ERR_INVALID_HANDLE)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn handles_resolve_until_closed() {
        let mut table = HandleTable::new();
        let a = table.create(ObjectId(7)).unwrap();
        let b = table.create(ObjectId(8)).unwrap();
        assert_ne!(a, b);
        assert_eq!(table.get(a), Some(ObjectId(7)));
        assert_eq!(table.get(b), Some(ObjectId(8)));
        assert_eq!(table.close(a), Some(ObjectId(7)));
        assert_eq!(table.get(a), None);
        assert_eq!(table.close(a), None);
    }

    #[test]
    fn reused_slots_get_a_fresh_generation() {
        let mut table = HandleTable::new();
        let a = table.create(ObjectId(1)).unwrap();
        table.close(a);
        let b = table.create(ObjectId(2)).unwrap();
        // Same slot, different generation: the stale handle must not alias the new object.
        assert_eq!(a >> 15, b >> 15);
        assert_ne!(a, b);
        assert_eq!(table.get(a), None);
        assert_eq!(table.get(b), Some(ObjectId(2)));
    }

    #[test]
    fn handle_zero_is_never_issued() {
        let mut table = HandleTable::new();
        for _ in 0..100 {
            let handle = table.create(ObjectId(3)).unwrap();
            assert_ne!(handle, 0);
            table.close(handle);
        }
        assert_eq!(table.get(0), None);
    }

    #[test]
    fn table_overflows_into_an_error() {
        let mut table = HandleTable::new();
        for _ in 0..4096 {
            table.create(ObjectId(1)).unwrap();
        }
        assert_eq!(table.create(ObjectId(1)), Err(ERR_OUT_OF_HANDLES));
    }
}
