//! Guest memory for the HLE kernel: FCRAM backing, region allocators, and per-process
//! address spaces.
//!
//! The console carries 128 MiB of FCRAM, statically carved into three regions
//! (Application/System/Base) that the kernel allocates pages from. Each process owns an
//! [`AddressSpace`] mapping its virtual pages onto FCRAM frames; the kernel consults it for
//! address validity, aligned 8/32/64-bit access, block copies, and layout queries.
//!
//! Errors at this boundary are host-side values ([`MemoryError`]); the kernel maps them onto
//! guest-visible result codes at the syscall layer.

mod address_space;
mod fcram;
mod region;

pub use address_space::{AddressSpace, MemoryInfo, Vma};
pub use fcram::Fcram;
pub use region::RegionAllocator;

use bitflags::bitflags;
use thiserror::Error;

/// Smallest mappable unit.
pub const PAGE_SIZE: u32 = 0x1000;
pub const PAGE_MASK: u32 = PAGE_SIZE - 1;

/// Physical address FCRAM is visible at on the bus.
pub const FCRAM_PADDR: u32 = 0x2000_0000;
/// Total FCRAM size (128 MiB).
pub const FCRAM_SIZE: u32 = 0x0800_0000;

pub const APPLICATION_REGION_SIZE: u32 = 0x0400_0000;
pub const SYSTEM_REGION_SIZE: u32 = 0x02C0_0000;
pub const BASE_REGION_SIZE: u32 = 0x0140_0000;

// Virtual layout of a userland process.
pub const PROCESS_IMAGE_VADDR: u32 = 0x0010_0000;
pub const HEAP_VADDR: u32 = 0x0800_0000;
pub const HEAP_VADDR_END: u32 = 0x1000_0000;
pub const SHARED_MEMORY_VADDR: u32 = 0x1000_0000;
pub const SHARED_MEMORY_VADDR_END: u32 = 0x1400_0000;
pub const LINEAR_HEAP_VADDR: u32 = 0x1400_0000;
pub const LINEAR_HEAP_VADDR_END: u32 = 0x1C00_0000;
pub const TLS_AREA_VADDR: u32 = 0x1FF8_2000;
/// Size of one thread-local-storage slot; eight fit in a page.
pub const TLS_ENTRY_SIZE: u32 = 0x200;
/// End of the userland virtual address space.
pub const USER_SPACE_VADDR_END: u32 = 0x4000_0000;

bitflags! {
    /// Guest-visible page permissions, encoded exactly as syscall arguments carry them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemoryPermission: u32 {
        const READ = 1;
        const WRITE = 2;
        const EXECUTE = 4;
        const DONT_CARE = 0x1000_0000;
    }
}

impl MemoryPermission {
    pub const NONE: Self = Self::empty();
    pub const READ_WRITE: Self = Self::READ.union(Self::WRITE);
    pub const READ_EXECUTE: Self = Self::READ.union(Self::EXECUTE);
}

/// Memory-info state of a mapped range, as reported by layout queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MemoryState {
    Free = 0,
    Reserved = 1,
    Io = 2,
    Static = 3,
    Code = 4,
    Private = 5,
    Shared = 6,
    Continuous = 7,
    Aliased = 8,
    Alias = 9,
    AliasCode = 10,
    Locked = 11,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    #[error("address {addr:#010x} is not mapped")]
    NotMapped { addr: u32 },
    #[error("address {addr:#010x} is outside the accepted range")]
    InvalidAddress { addr: u32 },
    #[error("address {addr:#010x} is misaligned")]
    MisalignedAddress { addr: u32 },
    #[error("size {size:#x} is not page-aligned")]
    MisalignedSize { size: u32 },
    #[error("page at {addr:#010x} is already mapped")]
    AlreadyMapped { addr: u32 },
    #[error("backing region exhausted ({needed:#x} bytes requested)")]
    OutOfMemory { needed: u32 },
}

/// Which FCRAM region an allocation is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegionName {
    Application,
    System,
    Base,
}

/// FCRAM backing plus the three fixed region allocators carved out of it.
#[derive(Debug)]
pub struct MemorySystem {
    pub fcram: Fcram,
    application: RegionAllocator,
    system: RegionAllocator,
    base: RegionAllocator,
}

impl MemorySystem {
    pub fn new() -> Self {
        Self {
            fcram: Fcram::new(),
            application: RegionAllocator::new(0, APPLICATION_REGION_SIZE),
            system: RegionAllocator::new(APPLICATION_REGION_SIZE, SYSTEM_REGION_SIZE),
            base: RegionAllocator::new(
                APPLICATION_REGION_SIZE + SYSTEM_REGION_SIZE,
                BASE_REGION_SIZE,
            ),
        }
    }

    pub fn region(&self, name: MemoryRegionName) -> &RegionAllocator {
        match name {
            MemoryRegionName::Application => &self.application,
            MemoryRegionName::System => &self.system,
            MemoryRegionName::Base => &self.base,
        }
    }

    pub fn region_mut(&mut self, name: MemoryRegionName) -> &mut RegionAllocator {
        match name {
            MemoryRegionName::Application => &mut self.application,
            MemoryRegionName::System => &mut self.system,
            MemoryRegionName::Base => &mut self.base,
        }
    }
}

impl Default for MemorySystem {
    fn default() -> Self {
        Self::new()
    }
}
