//! Processes: handle table, address space, resource limits, TLS bookkeeping, and the
//! memory-management operations guest code reaches through `ControlMemory`/`QueryMemory`.

use mikan_cpu::{FPSCR_DEFAULT_NAN, FPSCR_FLUSH_TO_ZERO, FPSCR_IXC, FPSCR_ROUND_TOZERO};
use mikan_mem::{
    AddressSpace, MemoryInfo, MemoryPermission, MemoryRegionName, MemoryState, HEAP_VADDR,
    HEAP_VADDR_END, LINEAR_HEAP_VADDR, LINEAR_HEAP_VADDR_END, PAGE_MASK, PAGE_SIZE,
    PROCESS_IMAGE_VADDR,
};
use tracing::{debug, error, info, warn};

use crate::handle::HandleTable;
use crate::object::{process_entry, process_entry_mut, ObjectData, ObjectId};
use crate::resource_limit::ResourceLimitCategory;
use crate::result::{
    result_from_memory_error, ResultCode, ERR_INVALID_ADDRESS, ERR_INVALID_COMBINATION,
    ERR_MISALIGNED_ADDRESS, ERR_MISALIGNED_SIZE,
};
use crate::thread::PROCESSOR_ID_APP_CORE;
use crate::Kernel;

// ControlMemory operation encoding: low byte is the operation, a region override sits in the
// next nibble, and the linear flag selects the linear heap.
const MEMOP_FREE: u32 = 1;
const MEMOP_COMMIT: u32 = 3;
const MEMOP_MAP: u32 = 4;
const MEMOP_UNMAP: u32 = 5;
const MEMOP_PROTECT: u32 = 6;
const MEMOP_OPERATION_MASK: u32 = 0xFF;
const MEMOP_REGION_MASK: u32 = 0xF00;
const MEMOP_LINEAR: u32 = 0x10000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Exited,
}

#[derive(Debug)]
pub struct Process {
    pub process_id: u32,
    pub status: ProcessStatus,
    pub handle_table: HandleTable,
    pub address_space: AddressSpace,
    pub resource_limit: ObjectId,
    /// One byte per TLS page; each bit marks a slot in use.
    pub tls_slots: Vec<u8>,
    pub memory_used: u32,
    pub ideal_processor: i32,
    pub memory_region: MemoryRegionName,
    pub shared_device_mem: bool,
}

impl Kernel {
    /// Creates a process with `code_size` bytes of image mapped at the usual base. The
    /// process joins the kernel's process list and stays alive until it is removed from it.
    pub fn create_process(&mut self, name: &str, code_size: u32) -> ObjectId {
        let resource_limit = self.resource_limit_for_category(ResourceLimitCategory::Application);
        self.retain(resource_limit);
        let process_id = self.next_process_id;
        self.next_process_id += 1;
        let mut address_space = AddressSpace::new();
        let code_pages = code_size.div_ceil(PAGE_SIZE);
        let mut frames = Vec::with_capacity(code_pages as usize);
        for _ in 0..code_pages {
            frames.push(
                self.memory
                    .region_mut(MemoryRegionName::Application)
                    .allocate(PAGE_SIZE)
                    .expect("application region exhausted at process creation"),
            );
        }
        address_space
            .map(
                PROCESS_IMAGE_VADDR,
                &frames,
                MemoryState::Code,
                MemoryPermission::READ_EXECUTE,
            )
            .expect("image area is free in a fresh address space");
        let id = self.insert_object(
            name,
            ObjectData::Process(Process {
                process_id,
                status: ProcessStatus::Running,
                handle_table: HandleTable::new(),
                address_space,
                resource_limit,
                tls_slots: Vec::new(),
                memory_used: code_pages * PAGE_SIZE,
                ideal_processor: PROCESSOR_ID_APP_CORE,
                memory_region: MemoryRegionName::Application,
                shared_device_mem: false,
            }),
        );
        // The creation reference is owned by the process list.
        self.process_list.push(id);
        if self.current_process.is_none() {
            self.current_process = Some(id);
        }
        id
    }

    /// Creates the first thread of `process` and schedules it in.
    pub fn setup_main_thread(
        &mut self,
        process: ObjectId,
        entry_point: u32,
        priority: u32,
    ) -> ObjectId {
        let ideal_processor = self.process(process).ideal_processor;
        let thread = self
            .create_thread(
                "main",
                entry_point,
                priority,
                0,
                ideal_processor,
                HEAP_VADDR_END,
                process,
            )
            .expect("main thread creation failed");
        self.thread_mut(thread)
            .context
            .set_fpscr(FPSCR_DEFAULT_NAN | FPSCR_FLUSH_TO_ZERO | FPSCR_ROUND_TOZERO | FPSCR_IXC);
        // The thread list keeps it alive; drop the creation reference.
        self.release(thread);
        self.reschedule();
        thread
    }

    /// Terminates the current process: every one of its threads is stopped and the process
    /// will accept no further syscalls.
    pub fn exit_current_process(&mut self) {
        let pid = self.current_process.expect("no current process");
        info!(
            process_id = self.process(pid).process_id,
            "process exiting"
        );
        assert_eq!(
            self.process(pid).status,
            ProcessStatus::Running,
            "process has already exited"
        );
        self.process_mut(pid).status = ProcessStatus::Exited;
        let current = self.current_thread_id();
        let threads = self.threads.thread_list.clone();
        for tid in threads {
            if self.thread(tid).owner_process != pid || tid == current {
                continue;
            }
            if !self.thread(tid).status.is_waiting() {
                warn!(tid = tid.0, "stopping a non-waiting thread at process exit");
            }
            self.stop_thread(tid);
        }
        self.stop_thread(current);
        self.prepare_reschedule();
    }

    /// `ControlMemory`: heap and linear-heap management plus map/unmap/protect, operating on
    /// the current process. Returns the resulting address.
    pub(crate) fn control_memory(
        &mut self,
        operation: u32,
        addr0: u32,
        addr1: u32,
        size: u32,
        permissions: u32,
    ) -> Result<u32, ResultCode> {
        debug!(
            operation = format_args!("{operation:#x}"),
            addr0 = format_args!("{addr0:#010x}"),
            addr1 = format_args!("{addr1:#010x}"),
            size = format_args!("{size:#x}"),
            permissions,
            "ControlMemory"
        );
        if addr0 & PAGE_MASK != 0 || addr1 & PAGE_MASK != 0 {
            return Err(ERR_MISALIGNED_ADDRESS);
        }
        if size & PAGE_MASK != 0 {
            return Err(ERR_MISALIGNED_SIZE);
        }
        if operation & MEMOP_REGION_MASK != 0 {
            warn!(
                region = (operation & MEMOP_REGION_MASK) >> 8,
                "region-specific ControlMemory is not supported"
            );
        }
        if permissions & !MemoryPermission::READ_WRITE.bits() != 0 {
            return Err(ERR_INVALID_COMBINATION);
        }
        let perms = MemoryPermission::from_bits_truncate(permissions);
        let pid = self.current_process.expect("no current process");
        let region_name = self.process(pid).memory_region;
        match operation & MEMOP_OPERATION_MASK {
            MEMOP_FREE => {
                let in_heap = (HEAP_VADDR..HEAP_VADDR_END).contains(&addr0);
                let in_linear = (LINEAR_HEAP_VADDR..LINEAR_HEAP_VADDR_END).contains(&addr0);
                let process = process_entry_mut(&mut self.objects, pid);
                let region = self.memory.region_mut(region_name);
                let result = if in_heap {
                    process.address_space.heap_free(region, addr0, size)
                } else if in_linear {
                    process.address_space.linear_free(region, addr0, size)
                } else {
                    return Err(ERR_INVALID_ADDRESS);
                };
                result.map_err(result_from_memory_error)?;
                self.process_mut(pid).memory_used -= size;
                Ok(addr0)
            }
            MEMOP_COMMIT => {
                let used_before = self.memory.region(region_name).used();
                let target = {
                    let process = process_entry_mut(&mut self.objects, pid);
                    let region = self.memory.region_mut(region_name);
                    let result = if operation & MEMOP_LINEAR != 0 {
                        process.address_space.linear_allocate(region, addr0, size, perms)
                    } else {
                        process.address_space.heap_allocate(region, addr0, size, perms)
                    };
                    result.map_err(result_from_memory_error)?
                };
                let delta = self.memory.region(region_name).used() - used_before;
                self.process_mut(pid).memory_used += delta;
                Ok(target)
            }
            MEMOP_MAP => {
                let process = process_entry_mut(&mut self.objects, pid);
                process
                    .address_space
                    .alias(addr1, addr0, size, perms)
                    .map_err(result_from_memory_error)?;
                Ok(addr0)
            }
            MEMOP_UNMAP => {
                let process = process_entry_mut(&mut self.objects, pid);
                process
                    .address_space
                    .unalias(addr1, addr0, size)
                    .map_err(result_from_memory_error)?;
                Ok(addr0)
            }
            MEMOP_PROTECT => {
                let process = process_entry_mut(&mut self.objects, pid);
                process
                    .address_space
                    .reprotect(addr0, size, perms)
                    .map_err(result_from_memory_error)?;
                Ok(addr0)
            }
            unknown => {
                error!(operation = unknown, "unknown ControlMemory operation");
                Err(ERR_INVALID_COMBINATION)
            }
        }
    }

    /// `QueryMemory` semantics: the containing range with compatible neighbours merged.
    pub(crate) fn query_process_memory(
        &self,
        process: ObjectId,
        addr: u32,
    ) -> Result<MemoryInfo, ResultCode> {
        process_entry(&self.objects, process)
            .address_space
            .query(addr)
            .map_err(result_from_memory_error)
    }
}
