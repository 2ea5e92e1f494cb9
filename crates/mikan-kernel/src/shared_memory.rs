//! Shared memory blocks.
//!
//! A block is backed either by fresh pages from the Base region (created with address zero)
//! or by the creator's own already-mapped pages. Mapping into a process checks the requested
//! permissions against what the creator granted that side.

use mikan_mem::{MemoryPermission, MemoryRegionName, MemoryState, PAGE_SIZE};
use tracing::error;

use crate::object::{process_entry_mut, ObjectData, ObjectId};
use crate::result::{
    result_from_memory_error, ResultCode, ERR_INVALID_ADDRESS, ERR_OUT_OF_MEMORY,
    ERR_WRONG_PERMISSION, RESULT_SUCCESS,
};
use crate::Kernel;

#[derive(Debug)]
pub struct SharedMemory {
    pub size: u32,
    /// Permissions granted to the owner process.
    pub permissions: MemoryPermission,
    /// Permissions granted to everyone else.
    pub other_permissions: MemoryPermission,
    pub owner_process: Option<ObjectId>,
    /// Owner-side mapping address when created over existing pages.
    pub base_address: u32,
    pub(crate) backing: Vec<u32>,
    /// Whether the backing frames came from a region allocator and must go back to it.
    pub(crate) owns_backing: bool,
    pub(crate) backing_region: MemoryRegionName,
}

impl Kernel {
    /// Creates a shared memory block. `addr == 0` allocates fresh backing from `region`;
    /// otherwise the block aliases the creator's pages at `addr`. Caller owns the returned
    /// reference.
    pub fn create_shared_memory(
        &mut self,
        owner: ObjectId,
        size: u32,
        permissions: MemoryPermission,
        other_permissions: MemoryPermission,
        addr: u32,
        region: MemoryRegionName,
        name: &str,
    ) -> Result<ObjectId, ResultCode> {
        let (backing, owns_backing) = if addr == 0 {
            let offset = self
                .memory
                .region_mut(region)
                .linear_allocate(size)
                .ok_or_else(|| {
                    error!(size, "no region space for a shared memory block");
                    ERR_OUT_OF_MEMORY
                })?;
            let frames = (0..size / PAGE_SIZE).map(|i| offset + i * PAGE_SIZE).collect();
            self.process_mut(owner).memory_used += size;
            (frames, true)
        } else {
            let space = &self.process(owner).address_space;
            let mut frames = Vec::with_capacity((size / PAGE_SIZE) as usize);
            for page in 0..size / PAGE_SIZE {
                frames.push(
                    space
                        .translate(addr + page * PAGE_SIZE)
                        .ok_or(ERR_INVALID_ADDRESS)?,
                );
            }
            (frames, false)
        };
        Ok(self.insert_object(
            name,
            ObjectData::SharedMemory(SharedMemory {
                size,
                permissions,
                other_permissions,
                owner_process: Some(owner),
                base_address: addr,
                backing,
                owns_backing,
                backing_region: region,
            }),
        ))
    }

    /// Maps the block into `process` at `addr` with the requested permissions.
    pub fn map_shared_memory(
        &mut self,
        block: ObjectId,
        process: ObjectId,
        addr: u32,
        permissions: MemoryPermission,
    ) -> ResultCode {
        let (granted, backing) = {
            let state = self.shared_memory(block);
            let granted = if state.owner_process == Some(process) {
                state.permissions
            } else {
                state.other_permissions
            };
            (granted, state.backing.clone())
        };
        let effective = if permissions == MemoryPermission::DONT_CARE {
            granted
        } else {
            permissions
        };
        if effective.intersects(!granted) {
            error!(
                requested = effective.bits(),
                granted = granted.bits(),
                "shared memory mapped with more permissions than granted"
            );
            return ERR_WRONG_PERMISSION;
        }
        if addr == 0 {
            return ERR_INVALID_ADDRESS;
        }
        let space = &mut process_entry_mut(&mut self.objects, process).address_space;
        match space.map(addr, &backing, MemoryState::Shared, effective) {
            Ok(()) => RESULT_SUCCESS,
            Err(err) => result_from_memory_error(err),
        }
    }

    pub fn unmap_shared_memory(
        &mut self,
        block: ObjectId,
        process: ObjectId,
        addr: u32,
    ) -> ResultCode {
        let size = self.shared_memory(block).size;
        let space = &mut process_entry_mut(&mut self.objects, process).address_space;
        match space.unmap(addr, size) {
            Ok(_) => RESULT_SUCCESS,
            Err(err) => result_from_memory_error(err),
        }
    }

    pub(crate) fn shared_memory(&self, id: ObjectId) -> &SharedMemory {
        match &self.object(id).expect("stale shared memory id").data {
            ObjectData::SharedMemory(block) => block,
            _ => panic!("object {id:?} is not a shared memory block"),
        }
    }
}
