//! Supervisor-call dispatch.
//!
//! A fixed table maps each opcode to a named handler or to nothing (unimplemented calls log
//! and change no state). Handlers marshal their arguments straight out of the CPU registers
//! and write results back the same way: the result code goes to r0, outputs to r1 and up,
//! 64-bit values split across a register pair.

use mikan_mem::{
    MemoryPermission, MemoryRegionName, FCRAM_PADDR, LINEAR_HEAP_VADDR, PAGE_SIZE,
    PROCESS_IMAGE_VADDR, SHARED_MEMORY_VADDR_END,
};
use mikan_timing::{ns_from_ticks_ceil, ticks_from_ns};
use tracing::{debug, error, trace, warn};

use crate::event::ResetType;
use crate::handle::Handle;
use crate::ipc::command_id_from_header;
use crate::object::{ObjectId, ObjectKind};
use crate::process::ProcessStatus;
use crate::result::{
    ResultCode, ERR_INVALID_COMBINATION, ERR_INVALID_ENUM_VALUE, ERR_INVALID_POINTER,
    ERR_MISALIGNED_SIZE, ERR_NOT_AUTHORIZED, ERR_NOT_FOUND, ERR_NOT_IMPLEMENTED,
    ERR_OUT_OF_RANGE, ERR_OUT_OF_RANGE_KERNEL, ERR_PORT_NAME_TOO_LONG,
    ERR_SESSION_CLOSED_BY_REMOTE, ERR_INVALID_ADDRESS, RESULT_NO_PENDING_REPLY, RESULT_SUCCESS,
    RESULT_TIMEOUT,
};
use crate::session::PORT_NAME_MAX_LENGTH;
use crate::thread::{
    ThreadStatus, WakeupCallback, PROCESSOR_ID_ALL, PROCESSOR_ID_DEFAULT, PROCESSOR_ID_SYS_CORE,
    THREAD_PRIO_LOWEST,
};
use crate::resource_limit::ResourceType;
use crate::Kernel;

type SvcHandler = fn(&mut Kernel) -> Option<ResultCode>;

struct SvcDef {
    name: &'static str,
    handler: Option<SvcHandler>,
}

const fn def(name: &'static str, handler: SvcHandler) -> SvcDef {
    SvcDef {
        name,
        handler: Some(handler),
    }
}

const fn stub(name: &'static str) -> SvcDef {
    SvcDef {
        name,
        handler: None,
    }
}

// Reads a 64-bit syscall argument split across a register pair.
fn reg_pair_i64(kernel: &Kernel, high: usize, low: usize) -> i64 {
    ((kernel.cpu.reg(high) as i64) << 32) | kernel.cpu.reg(low) as i64
}

impl Kernel {
    /// Dispatches one supervisor call. The embedding host must hold the kernel lock (see
    /// [`crate::SharedKernel`]) for the duration; everything in here assumes exclusive
    /// access to kernel state.
    pub fn call_svc(&mut self, immediate: u32) {
        let process = self.current_process.expect("SVC issued with no current process");
        debug_assert_eq!(
            self.process(process).status,
            ProcessStatus::Running,
            "running threads from an exited process is unsupported"
        );
        match SVC_TABLE.get(immediate as usize) {
            None => error!(immediate = format_args!("{immediate:#04X}"), "unknown SVC"),
            Some(entry) => match entry.handler {
                Some(handler) => {
                    trace!(name = entry.name, "SVC");
                    let result = handler(self);
                    // A nested wait resolution for the calling thread overrides whatever the
                    // handler returned.
                    let result = self.svc_result_override.take().or(result);
                    if let Some(result) = result {
                        self.cpu.set_reg(0, result.0);
                    }
                }
                None => error!(name = entry.name, "unimplemented SVC function"),
            },
        }
        if self.reschedule_pending {
            self.reschedule();
        }
    }
}

fn svc_control_memory(kernel: &mut Kernel) -> Option<ResultCode> {
    let operation = kernel.cpu.reg(0);
    let addr0 = kernel.cpu.reg(1);
    let addr1 = kernel.cpu.reg(2);
    let size = kernel.cpu.reg(3);
    let permissions = kernel.cpu.reg(4);
    Some(
        match kernel.control_memory(operation, addr0, addr1, size, permissions) {
            Ok(addr) => {
                kernel.cpu.set_reg(1, addr);
                RESULT_SUCCESS
            }
            Err(code) => code,
        },
    )
}

fn svc_query_memory(kernel: &mut Kernel) -> Option<ResultCode> {
    let addr = kernel.cpu.reg(2);
    let process = kernel.current_process.expect("no current process");
    query_memory_into_registers(kernel, process, addr)
}

fn svc_query_process_memory(kernel: &mut Kernel) -> Option<ResultCode> {
    let handle = kernel.cpu.reg(1);
    let addr = kernel.cpu.reg(2);
    let pid = kernel.current_process.expect("no current process");
    let process = match kernel.handle_of_kind(pid, handle, ObjectKind::Process) {
        Ok(process) => process,
        Err(code) => return Some(code),
    };
    query_memory_into_registers(kernel, process, addr)
}

fn query_memory_into_registers(
    kernel: &mut Kernel,
    process: ObjectId,
    addr: u32,
) -> Option<ResultCode> {
    match kernel.query_process_memory(process, addr) {
        Ok(info) => {
            kernel.cpu.set_reg(1, info.base_address);
            kernel.cpu.set_reg(2, info.size);
            kernel.cpu.set_reg(3, info.permission.bits());
            kernel.cpu.set_reg(4, info.state as u32);
            kernel.cpu.set_reg(5, 0); // page flags
            Some(RESULT_SUCCESS)
        }
        Err(code) => Some(code),
    }
}

fn svc_exit_process(kernel: &mut Kernel) -> Option<ResultCode> {
    kernel.exit_current_process();
    None
}

fn svc_create_thread(kernel: &mut Kernel) -> Option<ResultCode> {
    let priority = kernel.cpu.reg(0);
    let entry_point = kernel.cpu.reg(1);
    let arg = kernel.cpu.reg(2);
    let stack_top = kernel.cpu.reg(3);
    let mut processor_id = kernel.cpu.reg(4) as i32;
    if priority > THREAD_PRIO_LOWEST {
        return Some(ERR_OUT_OF_RANGE);
    }
    let pid = kernel.current_process.expect("no current process");
    let limit = kernel.process(pid).resource_limit;
    if kernel.resource_limit(limit).max_value(ResourceType::Priority as u32) > priority as i64 {
        return Some(ERR_NOT_AUTHORIZED);
    }
    if processor_id == PROCESSOR_ID_DEFAULT {
        processor_id = kernel.process(pid).ideal_processor;
        assert_ne!(processor_id, PROCESSOR_ID_DEFAULT);
    }
    match processor_id {
        PROCESSOR_ID_ALL => {
            debug!("thread may run on any core; scheduling it on the application core")
        }
        PROCESSOR_ID_SYS_CORE => {
            error!("system-core threads are not modelled; running on the application core")
        }
        _ => {}
    }
    let name = format!("thread-{entry_point:08X}");
    let thread = match kernel.create_thread(
        &name,
        entry_point,
        priority,
        arg,
        processor_id,
        stack_top,
        pid,
    ) {
        Ok(thread) => thread,
        Err(code) => return Some(code),
    };
    kernel.thread_mut(thread).context.set_fpscr(
        mikan_cpu::FPSCR_DEFAULT_NAN | mikan_cpu::FPSCR_FLUSH_TO_ZERO
            | mikan_cpu::FPSCR_ROUND_TOZERO,
    );
    let handle = match kernel.handle_create(pid, thread) {
        Ok(handle) => handle,
        Err(code) => {
            kernel.release(thread);
            return Some(code);
        }
    };
    kernel.release(thread);
    kernel.prepare_reschedule();
    trace!(
        entry_point = format_args!("{entry_point:#010X}"),
        priority,
        handle = format_args!("{handle:#010X}"),
        "created thread"
    );
    kernel.cpu.set_reg(1, handle);
    Some(RESULT_SUCCESS)
}

fn svc_exit_thread(kernel: &mut Kernel) -> Option<ResultCode> {
    trace!(pc = format_args!("{:#010X}", kernel.cpu.pc()), "ExitThread");
    kernel.exit_current_thread();
    None
}

fn svc_sleep_thread(kernel: &mut Kernel) -> Option<ResultCode> {
    let nanoseconds = reg_pair_i64(kernel, 1, 0);
    trace!(nanoseconds, "SleepThread");
    // A zero-length sleep with nothing else to run would only bounce through the idle
    // scheduler; skip it.
    if nanoseconds == 0 && !kernel.have_ready_threads() {
        return None;
    }
    let thread = kernel.current_thread_id();
    kernel.wait_current_thread_sleep();
    kernel.wake_after_delay(thread, nanoseconds);
    kernel.prepare_reschedule();
    None
}

fn svc_get_thread_priority(kernel: &mut Kernel) -> Option<ResultCode> {
    let handle = kernel.cpu.reg(1);
    let pid = kernel.current_process.expect("no current process");
    match kernel.handle_of_kind(pid, handle, ObjectKind::Thread) {
        Ok(thread) => {
            let priority = kernel.thread(thread).current_priority;
            kernel.cpu.set_reg(1, priority);
            Some(RESULT_SUCCESS)
        }
        Err(code) => Some(code),
    }
}

fn svc_set_thread_priority(kernel: &mut Kernel) -> Option<ResultCode> {
    let handle = kernel.cpu.reg(0);
    let priority = kernel.cpu.reg(1);
    if priority > THREAD_PRIO_LOWEST {
        return Some(ERR_OUT_OF_RANGE);
    }
    let pid = kernel.current_process.expect("no current process");
    let thread = match kernel.handle_of_kind(pid, handle, ObjectKind::Thread) {
        Ok(thread) => thread,
        Err(code) => return Some(code),
    };
    // The check uses the caller's resource limit, not the thread owner's.
    let limit = kernel.process(pid).resource_limit;
    if kernel.resource_limit(limit).max_value(ResourceType::Priority as u32) > priority as i64 {
        return Some(ERR_NOT_AUTHORIZED);
    }
    kernel.set_thread_priority(thread, priority);
    kernel.update_thread_priority(thread);
    // A nominal-priority change shifts what this thread contributes to mutexes it waits on.
    let pending = kernel.thread(thread).pending_mutexes.clone();
    for mutex in pending {
        kernel.update_mutex_priority(mutex);
    }
    kernel.prepare_reschedule();
    Some(RESULT_SUCCESS)
}

fn svc_create_mutex(kernel: &mut Kernel) -> Option<ResultCode> {
    let initial_locked = kernel.cpu.reg(1) != 0;
    let name = format!("mutex-{:08x}", kernel.cpu.reg(14));
    let mutex = kernel.create_mutex(initial_locked, &name);
    let pid = kernel.current_process.expect("no current process");
    let handle = match kernel.handle_create(pid, mutex) {
        Ok(handle) => handle,
        Err(code) => {
            kernel.release(mutex);
            return Some(code);
        }
    };
    kernel.release(mutex);
    trace!(initial_locked, handle = format_args!("{handle:#010X}"), "created mutex");
    kernel.cpu.set_reg(1, handle);
    Some(RESULT_SUCCESS)
}

fn svc_release_mutex(kernel: &mut Kernel) -> Option<ResultCode> {
    let handle = kernel.cpu.reg(0);
    let pid = kernel.current_process.expect("no current process");
    let mutex = match kernel.handle_of_kind(pid, handle, ObjectKind::Mutex) {
        Ok(mutex) => mutex,
        Err(code) => return Some(code),
    };
    let thread = kernel.current_thread_id();
    Some(kernel.release_mutex(mutex, thread))
}

fn svc_create_semaphore(kernel: &mut Kernel) -> Option<ResultCode> {
    let initial_count = kernel.cpu.reg(1) as i32;
    let max_count = kernel.cpu.reg(2) as i32;
    let name = format!("semaphore-{:08x}", kernel.cpu.reg(14));
    let semaphore = match kernel.create_semaphore(initial_count, max_count, &name) {
        Ok(semaphore) => semaphore,
        Err(code) => return Some(code),
    };
    let pid = kernel.current_process.expect("no current process");
    let handle = match kernel.handle_create(pid, semaphore) {
        Ok(handle) => handle,
        Err(code) => {
            kernel.release(semaphore);
            return Some(code);
        }
    };
    kernel.release(semaphore);
    kernel.cpu.set_reg(1, handle);
    Some(RESULT_SUCCESS)
}

fn svc_release_semaphore(kernel: &mut Kernel) -> Option<ResultCode> {
    let handle = kernel.cpu.reg(1);
    let release_count = kernel.cpu.reg(2) as i32;
    let pid = kernel.current_process.expect("no current process");
    let semaphore = match kernel.handle_of_kind(pid, handle, ObjectKind::Semaphore) {
        Ok(semaphore) => semaphore,
        Err(code) => return Some(code),
    };
    match kernel.release_semaphore(semaphore, release_count) {
        Ok(previous) => {
            kernel.cpu.set_reg(1, previous as u32);
            Some(RESULT_SUCCESS)
        }
        Err(code) => Some(code),
    }
}

fn svc_create_event(kernel: &mut Kernel) -> Option<ResultCode> {
    let Some(reset_type) = ResetType::from_raw(kernel.cpu.reg(1)) else {
        return Some(ERR_INVALID_ENUM_VALUE);
    };
    let name = format!("event-{:08x}", kernel.cpu.reg(14));
    let event = kernel.create_event(reset_type, &name);
    let pid = kernel.current_process.expect("no current process");
    let handle = match kernel.handle_create(pid, event) {
        Ok(handle) => handle,
        Err(code) => {
            kernel.release(event);
            return Some(code);
        }
    };
    kernel.release(event);
    kernel.cpu.set_reg(1, handle);
    Some(RESULT_SUCCESS)
}

fn svc_signal_event(kernel: &mut Kernel) -> Option<ResultCode> {
    let handle = kernel.cpu.reg(0);
    let pid = kernel.current_process.expect("no current process");
    match kernel.handle_of_kind(pid, handle, ObjectKind::Event) {
        Ok(event) => {
            kernel.signal_event(event);
            Some(RESULT_SUCCESS)
        }
        Err(code) => Some(code),
    }
}

fn svc_clear_event(kernel: &mut Kernel) -> Option<ResultCode> {
    let handle = kernel.cpu.reg(0);
    let pid = kernel.current_process.expect("no current process");
    match kernel.handle_of_kind(pid, handle, ObjectKind::Event) {
        Ok(event) => {
            kernel.clear_event(event);
            Some(RESULT_SUCCESS)
        }
        Err(code) => Some(code),
    }
}

fn svc_create_timer(kernel: &mut Kernel) -> Option<ResultCode> {
    let Some(reset_type) = ResetType::from_raw(kernel.cpu.reg(1)) else {
        return Some(ERR_INVALID_ENUM_VALUE);
    };
    let name = format!("timer-{:08x}", kernel.cpu.reg(14));
    let timer = kernel.create_timer(reset_type, &name);
    let pid = kernel.current_process.expect("no current process");
    let handle = match kernel.handle_create(pid, timer) {
        Ok(handle) => handle,
        Err(code) => {
            kernel.release(timer);
            return Some(code);
        }
    };
    kernel.release(timer);
    kernel.cpu.set_reg(1, handle);
    Some(RESULT_SUCCESS)
}

fn svc_set_timer(kernel: &mut Kernel) -> Option<ResultCode> {
    let handle = kernel.cpu.reg(0);
    let initial = reg_pair_i64(kernel, 3, 2);
    let interval = reg_pair_i64(kernel, 4, 1);
    if initial < 0 || interval < 0 {
        return Some(ERR_OUT_OF_RANGE_KERNEL);
    }
    let pid = kernel.current_process.expect("no current process");
    match kernel.handle_of_kind(pid, handle, ObjectKind::Timer) {
        Ok(timer) => {
            kernel.set_timer(timer, initial, interval);
            Some(RESULT_SUCCESS)
        }
        Err(code) => Some(code),
    }
}

fn svc_cancel_timer(kernel: &mut Kernel) -> Option<ResultCode> {
    let handle = kernel.cpu.reg(0);
    let pid = kernel.current_process.expect("no current process");
    match kernel.handle_of_kind(pid, handle, ObjectKind::Timer) {
        Ok(timer) => {
            kernel.cancel_timer(timer);
            Some(RESULT_SUCCESS)
        }
        Err(code) => Some(code),
    }
}

fn svc_clear_timer(kernel: &mut Kernel) -> Option<ResultCode> {
    let handle = kernel.cpu.reg(0);
    let pid = kernel.current_process.expect("no current process");
    match kernel.handle_of_kind(pid, handle, ObjectKind::Timer) {
        Ok(timer) => {
            kernel.clear_timer(timer);
            Some(RESULT_SUCCESS)
        }
        Err(code) => Some(code),
    }
}

fn valid_memory_block_permission(raw: u32) -> bool {
    matches!(raw, 0 | 1 | 2 | 3) || raw == MemoryPermission::DONT_CARE.bits()
}

fn svc_create_memory_block(kernel: &mut Kernel) -> Option<ResultCode> {
    let other_permission = kernel.cpu.reg(0);
    let addr = kernel.cpu.reg(1);
    let size = kernel.cpu.reg(2);
    let my_permission = kernel.cpu.reg(3);
    if size % PAGE_SIZE != 0 {
        return Some(ERR_MISALIGNED_SIZE);
    }
    // Blocks can not be created executable.
    if !valid_memory_block_permission(my_permission)
        || !valid_memory_block_permission(other_permission)
    {
        return Some(ERR_INVALID_COMBINATION);
    }
    if addr != 0
        && (addr < PROCESS_IMAGE_VADDR || addr.saturating_add(size) > SHARED_MEMORY_VADDR_END)
    {
        return Some(ERR_INVALID_ADDRESS);
    }
    let pid = kernel.current_process.expect("no current process");
    let region = if addr == 0 && kernel.process(pid).shared_device_mem {
        kernel.process(pid).memory_region
    } else {
        MemoryRegionName::Base
    };
    let name = format!("memblock-{:08x}", kernel.cpu.reg(14));
    let block = match kernel.create_shared_memory(
        pid,
        size,
        MemoryPermission::from_bits_truncate(my_permission),
        MemoryPermission::from_bits_truncate(other_permission),
        addr,
        region,
        &name,
    ) {
        Ok(block) => block,
        Err(code) => return Some(code),
    };
    let handle = match kernel.handle_create(pid, block) {
        Ok(handle) => handle,
        Err(code) => {
            kernel.release(block);
            return Some(code);
        }
    };
    kernel.release(block);
    kernel.cpu.set_reg(1, handle);
    Some(RESULT_SUCCESS)
}

fn svc_map_memory_block(kernel: &mut Kernel) -> Option<ResultCode> {
    let handle = kernel.cpu.reg(0);
    let addr = kernel.cpu.reg(1);
    let permissions = kernel.cpu.reg(2);
    trace!(
        handle = format_args!("{handle:#010X}"),
        addr = format_args!("{addr:#010X}"),
        permissions,
        "MapMemoryBlock"
    );
    let pid = kernel.current_process.expect("no current process");
    let block = match kernel.handle_of_kind(pid, handle, ObjectKind::SharedMemory) {
        Ok(block) => block,
        Err(code) => return Some(code),
    };
    let Some(permissions) = MemoryPermission::from_bits(permissions) else {
        error!(permissions, "unknown memory block permissions");
        return Some(ERR_INVALID_COMBINATION);
    };
    Some(kernel.map_shared_memory(block, pid, addr, permissions))
}

fn svc_unmap_memory_block(kernel: &mut Kernel) -> Option<ResultCode> {
    let handle = kernel.cpu.reg(0);
    let addr = kernel.cpu.reg(1);
    let pid = kernel.current_process.expect("no current process");
    let block = match kernel.handle_of_kind(pid, handle, ObjectKind::SharedMemory) {
        Ok(block) => block,
        Err(code) => return Some(code),
    };
    Some(kernel.unmap_shared_memory(block, pid, addr))
}

fn svc_create_address_arbiter(kernel: &mut Kernel) -> Option<ResultCode> {
    let arbiter = kernel.create_address_arbiter("arbiter");
    let pid = kernel.current_process.expect("no current process");
    let handle = match kernel.handle_create(pid, arbiter) {
        Ok(handle) => handle,
        Err(code) => {
            kernel.release(arbiter);
            return Some(code);
        }
    };
    kernel.release(arbiter);
    trace!(handle = format_args!("{handle:#010X}"), "created address arbiter");
    kernel.cpu.set_reg(1, handle);
    Some(RESULT_SUCCESS)
}

fn svc_arbitrate_address(kernel: &mut Kernel) -> Option<ResultCode> {
    let handle = kernel.cpu.reg(0);
    let address = kernel.cpu.reg(1);
    let arbitration_type = kernel.cpu.reg(2);
    let value = kernel.cpu.reg(3);
    let nanoseconds = reg_pair_i64(kernel, 5, 4);
    let pid = kernel.current_process.expect("no current process");
    let arbiter = match kernel.handle_of_kind(pid, handle, ObjectKind::AddressArbiter) {
        Ok(arbiter) => arbiter,
        Err(code) => return Some(code),
    };
    let thread = kernel.current_thread_id();
    let result =
        kernel.arbitrate_address(arbiter, thread, arbitration_type, address, value, nanoseconds);
    kernel.prepare_reschedule();
    Some(result)
}

fn svc_close_handle(kernel: &mut Kernel) -> Option<ResultCode> {
    let handle = kernel.cpu.reg(0);
    trace!(handle = format_args!("{handle:#010X}"), "closing handle");
    let pid = kernel.current_process.expect("no current process");
    Some(kernel.handle_close(pid, handle))
}

fn svc_wait_synchronization1(kernel: &mut Kernel) -> Option<ResultCode> {
    let handle = kernel.cpu.reg(0);
    let nanoseconds = reg_pair_i64(kernel, 3, 2);
    let pid = kernel.current_process.expect("no current process");
    let object = match kernel.waitable_by_handle(pid, handle) {
        Ok(object) => object,
        Err(code) => return Some(code),
    };
    let thread = kernel.current_thread_id();
    if !kernel.should_wait(object, thread) {
        kernel.acquire(object, thread);
        return Some(RESULT_SUCCESS);
    }
    if nanoseconds == 0 {
        return Some(RESULT_TIMEOUT);
    }
    kernel.thread_mut(thread).status = ThreadStatus::WaitSynchAny;
    kernel.retain(object);
    kernel.thread_mut(thread).wait_objects = vec![object];
    kernel.add_waiting_thread(object, thread);
    kernel.wake_after_delay(thread, nanoseconds);
    kernel.thread_mut(thread).wakeup_callback = Some(WakeupCallback::WaitSynch1);
    kernel.prepare_reschedule();
    // r0 keeps the timeout code unless a signal overwrites it on wakeup.
    Some(RESULT_TIMEOUT)
}

fn svc_wait_synchronization_n(kernel: &mut Kernel) -> Option<ResultCode> {
    let nanoseconds = reg_pair_i64(kernel, 4, 0);
    let handles_address = kernel.cpu.reg(1);
    let handle_count = kernel.cpu.reg(2) as i32;
    let wait_all = kernel.cpu.reg(3) != 0;
    let pid = kernel.current_process.expect("no current process");
    if !kernel.mem_is_valid(pid, handles_address) {
        return Some(ERR_INVALID_POINTER);
    }
    if handle_count < 0 {
        return Some(ERR_OUT_OF_RANGE);
    }
    let mut objects = Vec::with_capacity(handle_count as usize);
    for i in 0..handle_count as u32 {
        let handle = match kernel.mem_read32(pid, handles_address + i * 4) {
            Ok(handle) => handle,
            Err(code) => return Some(code),
        };
        match kernel.waitable_by_handle(pid, handle) {
            Ok(object) => objects.push(object),
            Err(code) => return Some(code),
        }
    }
    let thread = kernel.current_thread_id();
    if wait_all {
        let all_available = objects.iter().all(|&object| !kernel.should_wait(object, thread));
        if all_available {
            // Acquire everything right now; the output index is left untouched.
            for &object in &objects {
                kernel.acquire(object, thread);
            }
            return Some(RESULT_SUCCESS);
        }
        if nanoseconds == 0 {
            return Some(RESULT_TIMEOUT);
        }
        kernel.thread_mut(thread).status = ThreadStatus::WaitSynchAll;
        for &object in &objects {
            kernel.add_waiting_thread(object, thread);
            kernel.retain(object);
        }
        kernel.thread_mut(thread).wait_objects = objects;
        kernel.wake_after_delay(thread, nanoseconds);
        kernel.thread_mut(thread).wakeup_callback = Some(WakeupCallback::WaitSynchAll);
        kernel.prepare_reschedule();
        kernel.cpu.set_reg(1, -1i32 as u32);
        Some(RESULT_TIMEOUT)
    } else {
        if let Some(index) = objects
            .iter()
            .position(|&object| !kernel.should_wait(object, thread))
        {
            kernel.acquire(objects[index], thread);
            kernel.cpu.set_reg(1, index as u32);
            return Some(RESULT_SUCCESS);
        }
        if nanoseconds == 0 {
            return Some(RESULT_TIMEOUT);
        }
        // No handles and no timeout deadlocks the thread, matching hardware.
        kernel.thread_mut(thread).status = ThreadStatus::WaitSynchAny;
        for &object in &objects {
            kernel.add_waiting_thread(object, thread);
            kernel.retain(object);
        }
        kernel.thread_mut(thread).wait_objects = objects;
        kernel.wake_after_delay(thread, nanoseconds);
        kernel.thread_mut(thread).wakeup_callback = Some(WakeupCallback::WaitSynchAny);
        kernel.prepare_reschedule();
        kernel.cpu.set_reg(1, -1i32 as u32);
        Some(RESULT_TIMEOUT)
    }
}

fn svc_duplicate_handle(kernel: &mut Kernel) -> Option<ResultCode> {
    let handle = kernel.cpu.reg(1);
    let pid = kernel.current_process.expect("no current process");
    match kernel.handle_duplicate(pid, handle) {
        Ok(duplicated) => {
            trace!(
                handle = format_args!("{handle:#010X}"),
                duplicated = format_args!("{duplicated:#010X}"),
                "duplicated handle"
            );
            kernel.cpu.set_reg(1, duplicated);
            Some(RESULT_SUCCESS)
        }
        Err(code) => Some(code),
    }
}

fn svc_get_system_tick(kernel: &mut Kernel) -> Option<ResultCode> {
    let ticks = ticks_from_ns(kernel.timing.now_ns());
    kernel.cpu.set_reg(0, ticks as u32);
    kernel.cpu.set_reg(1, (ticks >> 32) as u32);
    // Advance time so tight tick-polling loops observe progress.
    kernel.timing.skip_ns(ns_from_ticks_ceil(150));
    None
}

fn svc_get_system_info(kernel: &mut Kernel) -> Option<ResultCode> {
    let info_type = kernel.cpu.reg(1);
    let param = kernel.cpu.reg(2) as i32;
    trace!(info_type, param, "GetSystemInfo");
    let out: i64 = match info_type {
        // Memory usage per region.
        0 => match param {
            0 => {
                (kernel.memory.region(MemoryRegionName::Application).used()
                    + kernel.memory.region(MemoryRegionName::System).used()
                    + kernel.memory.region(MemoryRegionName::Base).used()) as i64
            }
            1 => kernel.memory.region(MemoryRegionName::Application).used() as i64,
            2 => kernel.memory.region(MemoryRegionName::System).used() as i64,
            3 => kernel.memory.region(MemoryRegionName::Base).used() as i64,
            _ => {
                error!(param, "unknown GetSystemInfo memory-usage region");
                0
            }
        },
        2 => {
            error!("GetSystemInfo kernel-allocated-pages is unimplemented");
            0
        }
        26 => kernel.process_list.len() as i64,
        _ => {
            error!(info_type, param, "unknown GetSystemInfo type");
            0
        }
    };
    kernel.cpu.set_reg(1, out as u32);
    kernel.cpu.set_reg(2, (out >> 32) as u32);
    // Never errors, even for invalid parameters.
    Some(RESULT_SUCCESS)
}

fn svc_get_process_info(kernel: &mut Kernel) -> Option<ResultCode> {
    let handle = kernel.cpu.reg(1);
    let info_type = kernel.cpu.reg(2);
    let pid = kernel.current_process.expect("no current process");
    let process = match kernel.handle_of_kind(pid, handle, ObjectKind::Process) {
        Ok(process) => process,
        Err(code) => return Some(code),
    };
    let mut out: i64 = 0;
    match info_type {
        0 | 2 => {
            out = kernel.process(process).memory_used as i64;
            if out % PAGE_SIZE as i64 != 0 {
                error!("process memory usage is not page-aligned");
                return Some(ERR_MISALIGNED_SIZE);
            }
        }
        1 | 3..=8 => {
            error!(info_type, "unimplemented GetProcessInfo type");
        }
        20 => out = (FCRAM_PADDR - LINEAR_HEAP_VADDR) as i64,
        21..=23 => {
            error!(info_type, "unknown GetProcessInfo type");
            return Some(ERR_NOT_IMPLEMENTED);
        }
        _ => {
            error!(info_type, "unknown GetProcessInfo type");
            return Some(ERR_INVALID_ENUM_VALUE);
        }
    }
    kernel.cpu.set_reg(1, out as u32);
    kernel.cpu.set_reg(2, (out >> 32) as u32);
    Some(RESULT_SUCCESS)
}

fn svc_connect_to_port(kernel: &mut Kernel) -> Option<ResultCode> {
    let name_address = kernel.cpu.reg(1);
    let pid = kernel.current_process.expect("no current process");
    if !kernel.mem_is_valid(pid, name_address) {
        return Some(ERR_NOT_FOUND);
    }
    // Read one byte past the limit to detect names that are too long.
    let name = match kernel.mem_read_cstring(pid, name_address, PORT_NAME_MAX_LENGTH + 1) {
        Ok(name) => name,
        Err(code) => return Some(code),
    };
    if name.len() > PORT_NAME_MAX_LENGTH as usize {
        return Some(ERR_PORT_NAME_TOO_LONG);
    }
    trace!(name, "ConnectToPort");
    let Some(port) = kernel.named_port(&name) else {
        warn!(name, "connect to unknown port");
        return Some(ERR_NOT_FOUND);
    };
    let session = match kernel.connect_to_port(port) {
        Ok(session) => session,
        Err(code) => return Some(code),
    };
    let handle = match kernel.handle_create(pid, session) {
        Ok(handle) => handle,
        Err(code) => {
            kernel.release(session);
            return Some(code);
        }
    };
    kernel.release(session);
    kernel.cpu.set_reg(1, handle);
    Some(RESULT_SUCCESS)
}

fn svc_send_sync_request(kernel: &mut Kernel) -> Option<ResultCode> {
    let handle = kernel.cpu.reg(0);
    let pid = kernel.current_process.expect("no current process");
    let session = match kernel.handle_of_kind(pid, handle, ObjectKind::ClientSession) {
        Ok(session) => session,
        Err(code) => return Some(code),
    };
    trace!(handle = format_args!("{handle:#010X}"), "SendSyncRequest");
    let thread = kernel.current_thread_id();
    kernel.prepare_reschedule();
    Some(kernel.send_sync_request(session, thread))
}

fn svc_get_process_id(kernel: &mut Kernel) -> Option<ResultCode> {
    let handle = kernel.cpu.reg(1);
    let pid = kernel.current_process.expect("no current process");
    match kernel.handle_of_kind(pid, handle, ObjectKind::Process) {
        Ok(process) => {
            let process_id = kernel.process(process).process_id;
            kernel.cpu.set_reg(1, process_id);
            Some(RESULT_SUCCESS)
        }
        Err(code) => Some(code),
    }
}

fn svc_get_process_id_of_thread(kernel: &mut Kernel) -> Option<ResultCode> {
    let handle = kernel.cpu.reg(1);
    let pid = kernel.current_process.expect("no current process");
    match kernel.handle_of_kind(pid, handle, ObjectKind::Thread) {
        Ok(thread) => {
            let owner = kernel.thread(thread).owner_process;
            let process_id = kernel.process(owner).process_id;
            kernel.cpu.set_reg(1, process_id);
            Some(RESULT_SUCCESS)
        }
        Err(code) => Some(code),
    }
}

fn svc_get_thread_id(kernel: &mut Kernel) -> Option<ResultCode> {
    let handle = kernel.cpu.reg(1);
    let pid = kernel.current_process.expect("no current process");
    match kernel.handle_of_kind(pid, handle, ObjectKind::Thread) {
        Ok(thread) => {
            let thread_id = kernel.thread(thread).thread_id;
            kernel.cpu.set_reg(1, thread_id);
            Some(RESULT_SUCCESS)
        }
        Err(code) => Some(code),
    }
}

fn svc_get_resource_limit(kernel: &mut Kernel) -> Option<ResultCode> {
    let handle = kernel.cpu.reg(1);
    let pid = kernel.current_process.expect("no current process");
    let process = match kernel.handle_of_kind(pid, handle, ObjectKind::Process) {
        Ok(process) => process,
        Err(code) => return Some(code),
    };
    let limit = kernel.process(process).resource_limit;
    match kernel.handle_create(pid, limit) {
        Ok(handle) => {
            kernel.cpu.set_reg(1, handle);
            Some(RESULT_SUCCESS)
        }
        Err(code) => Some(code),
    }
}

fn resource_limit_values(kernel: &mut Kernel, current: bool) -> Option<ResultCode> {
    let values_address = kernel.cpu.reg(0);
    let handle = kernel.cpu.reg(1);
    let names_address = kernel.cpu.reg(2);
    let name_count = kernel.cpu.reg(3);
    let pid = kernel.current_process.expect("no current process");
    let limit = match kernel.handle_of_kind(pid, handle, ObjectKind::ResourceLimit) {
        Ok(limit) => limit,
        Err(code) => return Some(code),
    };
    for i in 0..name_count {
        let name = match kernel.mem_read32(pid, names_address + i * 4) {
            Ok(name) => name,
            Err(code) => return Some(code),
        };
        let value = if current {
            kernel.resource_limit(limit).current_value(name)
        } else {
            kernel.resource_limit(limit).max_value(name)
        };
        if let Err(code) = kernel.mem_write64(pid, values_address + i * 8, value as u64) {
            return Some(code);
        }
    }
    Some(RESULT_SUCCESS)
}

fn svc_get_resource_limit_limit_values(kernel: &mut Kernel) -> Option<ResultCode> {
    resource_limit_values(kernel, false)
}

fn svc_get_resource_limit_current_values(kernel: &mut Kernel) -> Option<ResultCode> {
    resource_limit_values(kernel, true)
}

fn svc_break(kernel: &mut Kernel) -> Option<ResultCode> {
    let reason = match kernel.cpu.reg(0) & 0xFF {
        0 => "PANIC",
        1 => "ASSERT",
        2 => "USER",
        _ => "UNKNOWN",
    };
    error!(reason, "emulated program broke execution");
    None
}

fn svc_output_debug_string(kernel: &mut Kernel) -> Option<ResultCode> {
    let address = kernel.cpu.reg(0);
    let len = kernel.cpu.reg(1) as i32;
    if len <= 0 {
        return None;
    }
    let pid = kernel.current_process.expect("no current process");
    let mut buf = vec![0u8; len as usize];
    if kernel.mem_read_block(pid, address, &mut buf).is_ok() {
        debug!(message = %String::from_utf8_lossy(&buf), "guest debug output");
    }
    None
}

fn svc_create_port(kernel: &mut Kernel) -> Option<ResultCode> {
    let name_address = kernel.cpu.reg(2);
    let max_sessions = kernel.cpu.reg(3);
    let pid = kernel.current_process.expect("no current process");
    let name = if name_address != 0 {
        let name = match kernel.mem_read_cstring(pid, name_address, PORT_NAME_MAX_LENGTH + 1) {
            Ok(name) => name,
            Err(code) => return Some(code),
        };
        if name.len() > PORT_NAME_MAX_LENGTH as usize {
            return Some(ERR_PORT_NAME_TOO_LONG);
        }
        Some(name)
    } else {
        None
    };
    let label = name.clone().unwrap_or_else(|| "port".to_owned());
    let (server, client) = kernel.create_port_pair(max_sessions, &label);
    if let Some(name) = name {
        kernel.register_named_port(&name, client);
    }
    let client_handle = match kernel.handle_create(pid, client) {
        Ok(handle) => handle,
        Err(code) => {
            kernel.release(client);
            kernel.release(server);
            return Some(code);
        }
    };
    kernel.release(client);
    let server_handle = match kernel.handle_create(pid, server) {
        Ok(handle) => handle,
        Err(code) => {
            kernel.release(server);
            return Some(code);
        }
    };
    kernel.release(server);
    trace!(max_sessions, "created port pair");
    kernel.cpu.set_reg(1, server_handle);
    kernel.cpu.set_reg(2, client_handle);
    Some(RESULT_SUCCESS)
}

fn svc_create_session_to_port(kernel: &mut Kernel) -> Option<ResultCode> {
    let handle = kernel.cpu.reg(1);
    let pid = kernel.current_process.expect("no current process");
    let port = match kernel.handle_of_kind(pid, handle, ObjectKind::ClientPort) {
        Ok(port) => port,
        Err(code) => return Some(code),
    };
    let session = match kernel.connect_to_port(port) {
        Ok(session) => session,
        Err(code) => return Some(code),
    };
    let session_handle = match kernel.handle_create(pid, session) {
        Ok(handle) => handle,
        Err(code) => {
            kernel.release(session);
            return Some(code);
        }
    };
    kernel.release(session);
    kernel.cpu.set_reg(1, session_handle);
    Some(RESULT_SUCCESS)
}

fn svc_create_session(kernel: &mut Kernel) -> Option<ResultCode> {
    let pid = kernel.current_process.expect("no current process");
    let (server, client) = kernel.create_session_pair(None, "session");
    let server_handle = match kernel.handle_create(pid, server) {
        Ok(handle) => handle,
        Err(code) => {
            kernel.release(server);
            kernel.release(client);
            return Some(code);
        }
    };
    kernel.release(server);
    let client_handle = match kernel.handle_create(pid, client) {
        Ok(handle) => handle,
        Err(code) => {
            kernel.release(client);
            return Some(code);
        }
    };
    kernel.release(client);
    trace!("created session pair");
    kernel.cpu.set_reg(1, server_handle);
    kernel.cpu.set_reg(2, client_handle);
    Some(RESULT_SUCCESS)
}

fn svc_accept_session(kernel: &mut Kernel) -> Option<ResultCode> {
    let handle = kernel.cpu.reg(1);
    let pid = kernel.current_process.expect("no current process");
    let port = match kernel.handle_of_kind(pid, handle, ObjectKind::ServerPort) {
        Ok(port) => port,
        Err(code) => return Some(code),
    };
    let session = match kernel.accept_session(port) {
        Ok(session) => session,
        Err(code) => return Some(code),
    };
    let session_handle = match kernel.handle_create(pid, session) {
        Ok(handle) => handle,
        Err(code) => {
            kernel.release(session);
            return Some(code);
        }
    };
    kernel.release(session);
    kernel.cpu.set_reg(1, session_handle);
    Some(RESULT_SUCCESS)
}

fn svc_reply_and_receive(kernel: &mut Kernel) -> Option<ResultCode> {
    let handles_address = kernel.cpu.reg(1);
    let handle_count = kernel.cpu.reg(2) as i32;
    let reply_target: Handle = kernel.cpu.reg(3);
    let pid = kernel.current_process.expect("no current process");
    if !kernel.mem_is_valid(pid, handles_address) {
        return Some(ERR_INVALID_POINTER);
    }
    if handle_count < 0 {
        return Some(ERR_OUT_OF_RANGE);
    }
    let mut objects = Vec::with_capacity(handle_count as usize);
    for i in 0..handle_count as u32 {
        let handle = match kernel.mem_read32(pid, handles_address + i * 4) {
            Ok(handle) => handle,
            Err(code) => return Some(code),
        };
        match kernel.waitable_by_handle(pid, handle) {
            Ok(object) => objects.push(object),
            Err(code) => return Some(code),
        }
    }
    let thread = kernel.current_thread_id();
    let command_buffer = kernel.thread(thread).command_buffer_address();
    let header = match kernel.mem_read32(pid, command_buffer) {
        Ok(header) => header,
        Err(code) => return Some(code),
    };
    let command_id = command_id_from_header(header);
    // Command id 0xFFFF in the staged buffer means "receive only, no reply".
    if reply_target != 0 && command_id != 0xFFFF {
        let session = match kernel.handle_of_kind(pid, reply_target, ObjectKind::ServerSession) {
            Ok(session) => session,
            Err(code) => return Some(code),
        };
        let request_thread = kernel.server_session_mut(session).currently_handling.take();
        let client_alive = kernel.server_session(session).client.is_some();
        match request_thread {
            Some(request_thread) if client_alive => {
                let source = kernel.thread(thread).command_buffer_address();
                let target = kernel.thread(request_thread).command_buffer_address();
                let translation =
                    kernel.translate_command_buffer(thread, request_thread, source, target);
                // There is no recovery path for a failed reply translation.
                assert!(
                    translation.is_ok(),
                    "reply-side command buffer translation failed"
                );
                kernel.resume_from_wait(request_thread);
                kernel.release(request_thread);
            }
            stale => {
                if let Some(request_thread) = stale {
                    kernel.release(request_thread);
                }
                kernel.cpu.set_reg(1, -1i32 as u32);
                return Some(ERR_SESSION_CLOSED_BY_REMOTE);
            }
        }
    }
    if handle_count == 0 {
        kernel.cpu.set_reg(1, 0);
        if reply_target == 0 || command_id == 0xFFFF {
            return Some(RESULT_NO_PENDING_REPLY);
        }
        return Some(RESULT_SUCCESS);
    }
    // Pick up anything already available; a failed receive translation consumes the request
    // (the client got the error) and the scan continues.
    loop {
        let ready = objects
            .iter()
            .position(|&object| !kernel.should_wait(object, thread));
        let Some(index) = ready else {
            break;
        };
        let object = objects[index];
        kernel.acquire(object, thread);
        if kernel.object_kind(object) != Some(ObjectKind::ServerSession) {
            kernel.cpu.set_reg(1, index as u32);
            return Some(RESULT_SUCCESS);
        }
        match kernel.receive_ipc_request(object, thread) {
            Ok(code) => {
                kernel.cpu.set_reg(1, index as u32);
                return Some(code);
            }
            Err(()) => continue,
        }
    }
    // Nothing ready: park on the whole list.
    kernel.thread_mut(thread).status = ThreadStatus::WaitSynchAny;
    for &object in &objects {
        kernel.add_waiting_thread(object, thread);
        kernel.retain(object);
    }
    kernel.thread_mut(thread).wait_objects = objects;
    kernel.thread_mut(thread).wakeup_callback = Some(WakeupCallback::ReplyAndReceive);
    kernel.prepare_reschedule();
    kernel.cpu.set_reg(1, -1i32 as u32);
    Some(RESULT_SUCCESS)
}

static SVC_TABLE: [SvcDef; 0x7E] = [
    stub("Unknown"),                                                   // 0x00
    def("ControlMemory", svc_control_memory),                          // 0x01
    def("QueryMemory", svc_query_memory),                              // 0x02
    def("ExitProcess", svc_exit_process),                              // 0x03
    stub("GetProcessAffinityMask"),                                    // 0x04
    stub("SetProcessAffinityMask"),                                    // 0x05
    stub("GetProcessIdealProcessor"),                                  // 0x06
    stub("SetProcessIdealProcessor"),                                  // 0x07
    def("CreateThread", svc_create_thread),                            // 0x08
    def("ExitThread", svc_exit_thread),                                // 0x09
    def("SleepThread", svc_sleep_thread),                              // 0x0A
    def("GetThreadPriority", svc_get_thread_priority),                 // 0x0B
    def("SetThreadPriority", svc_set_thread_priority),                 // 0x0C
    stub("GetThreadAffinityMask"),                                     // 0x0D
    stub("SetThreadAffinityMask"),                                     // 0x0E
    stub("GetThreadIdealProcessor"),                                   // 0x0F
    stub("SetThreadIdealProcessor"),                                   // 0x10
    stub("GetCurrentProcessorNumber"),                                 // 0x11
    stub("Run"),                                                       // 0x12
    def("CreateMutex", svc_create_mutex),                              // 0x13
    def("ReleaseMutex", svc_release_mutex),                            // 0x14
    def("CreateSemaphore", svc_create_semaphore),                      // 0x15
    def("ReleaseSemaphore", svc_release_semaphore),                    // 0x16
    def("CreateEvent", svc_create_event),                              // 0x17
    def("SignalEvent", svc_signal_event),                              // 0x18
    def("ClearEvent", svc_clear_event),                                // 0x19
    def("CreateTimer", svc_create_timer),                              // 0x1A
    def("SetTimer", svc_set_timer),                                    // 0x1B
    def("CancelTimer", svc_cancel_timer),                              // 0x1C
    def("ClearTimer", svc_clear_timer),                                // 0x1D
    def("CreateMemoryBlock", svc_create_memory_block),                 // 0x1E
    def("MapMemoryBlock", svc_map_memory_block),                       // 0x1F
    def("UnmapMemoryBlock", svc_unmap_memory_block),                   // 0x20
    def("CreateAddressArbiter", svc_create_address_arbiter),           // 0x21
    def("ArbitrateAddress", svc_arbitrate_address),                    // 0x22
    def("CloseHandle", svc_close_handle),                              // 0x23
    def("WaitSynchronization1", svc_wait_synchronization1),            // 0x24
    def("WaitSynchronizationN", svc_wait_synchronization_n),           // 0x25
    stub("SignalAndWait"),                                             // 0x26
    def("DuplicateHandle", svc_duplicate_handle),                      // 0x27
    def("GetSystemTick", svc_get_system_tick),                         // 0x28
    stub("GetHandleInfo"),                                             // 0x29
    def("GetSystemInfo", svc_get_system_info),                         // 0x2A
    def("GetProcessInfo", svc_get_process_info),                       // 0x2B
    stub("GetThreadInfo"),                                             // 0x2C
    def("ConnectToPort", svc_connect_to_port),                         // 0x2D
    stub("SendSyncRequest1"),                                          // 0x2E
    stub("SendSyncRequest2"),                                          // 0x2F
    stub("SendSyncRequest3"),                                          // 0x30
    stub("SendSyncRequest4"),                                          // 0x31
    def("SendSyncRequest", svc_send_sync_request),                     // 0x32
    stub("OpenProcess"),                                               // 0x33
    stub("OpenThread"),                                                // 0x34
    def("GetProcessId", svc_get_process_id),                           // 0x35
    def("GetProcessIdOfThread", svc_get_process_id_of_thread),         // 0x36
    def("GetThreadId", svc_get_thread_id),                             // 0x37
    def("GetResourceLimit", svc_get_resource_limit),                   // 0x38
    def("GetResourceLimitLimitValues", svc_get_resource_limit_limit_values), // 0x39
    def("GetResourceLimitCurrentValues", svc_get_resource_limit_current_values), // 0x3A
    stub("GetThreadContext"),                                          // 0x3B
    def("Break", svc_break),                                           // 0x3C
    def("OutputDebugString", svc_output_debug_string),                 // 0x3D
    stub("ControlPerformanceCounter"),                                 // 0x3E
    stub("Unknown"),                                                   // 0x3F
    stub("Unknown"),                                                   // 0x40
    stub("Unknown"),                                                   // 0x41
    stub("Unknown"),                                                   // 0x42
    stub("Unknown"),                                                   // 0x43
    stub("Unknown"),                                                   // 0x44
    stub("Unknown"),                                                   // 0x45
    stub("Unknown"),                                                   // 0x46
    def("CreatePort", svc_create_port),                                // 0x47
    def("CreateSessionToPort", svc_create_session_to_port),            // 0x48
    def("CreateSession", svc_create_session),                          // 0x49
    def("AcceptSession", svc_accept_session),                          // 0x4A
    stub("ReplyAndReceive1"),                                          // 0x4B
    stub("ReplyAndReceive2"),                                          // 0x4C
    stub("ReplyAndReceive3"),                                          // 0x4D
    stub("ReplyAndReceive4"),                                          // 0x4E
    def("ReplyAndReceive", svc_reply_and_receive),                     // 0x4F
    stub("BindInterrupt"),                                             // 0x50
    stub("UnbindInterrupt"),                                           // 0x51
    stub("InvalidateProcessDataCache"),                                // 0x52
    stub("StoreProcessDataCache"),                                     // 0x53
    stub("FlushProcessDataCache"),                                     // 0x54
    stub("StartInterProcessDma"),                                      // 0x55
    stub("StopDma"),                                                   // 0x56
    stub("GetDmaState"),                                               // 0x57
    stub("RestartDma"),                                                // 0x58
    stub("SetGpuProt"),                                                // 0x59
    stub("SetWifiEnabled"),                                            // 0x5A
    stub("Unknown"),                                                   // 0x5B
    stub("Unknown"),                                                   // 0x5C
    stub("Unknown"),                                                   // 0x5D
    stub("Unknown"),                                                   // 0x5E
    stub("Unknown"),                                                   // 0x5F
    stub("DebugActiveProcess"),                                        // 0x60
    stub("BreakDebugProcess"),                                         // 0x61
    stub("TerminateDebugProcess"),                                     // 0x62
    stub("GetProcessDebugEvent"),                                      // 0x63
    stub("ContinueDebugEvent"),                                        // 0x64
    stub("GetProcessList"),                                            // 0x65
    stub("GetThreadList"),                                             // 0x66
    stub("GetDebugThreadContext"),                                     // 0x67
    stub("SetDebugThreadContext"),                                     // 0x68
    stub("QueryDebugProcessMemory"),                                   // 0x69
    stub("ReadProcessMemory"),                                         // 0x6A
    stub("WriteProcessMemory"),                                        // 0x6B
    stub("SetHardwareBreakPoint"),                                     // 0x6C
    stub("GetDebugThreadParam"),                                       // 0x6D
    stub("Unknown"),                                                   // 0x6E
    stub("Unknown"),                                                   // 0x6F
    stub("ControlProcessMemory"),                                      // 0x70
    stub("MapProcessMemory"),                                          // 0x71
    stub("UnmapProcessMemory"),                                        // 0x72
    stub("CreateCodeSet"),                                             // 0x73
    stub("RandomStub"),                                                // 0x74
    stub("CreateProcess"),                                             // 0x75
    stub("TerminateProcess"),                                          // 0x76
    stub("SetProcessResourceLimits"),                                  // 0x77
    stub("CreateResourceLimit"),                                       // 0x78
    stub("SetResourceLimitValues"),                                    // 0x79
    stub("AddCodeSegment"),                                            // 0x7A
    stub("Backdoor"),                                                  // 0x7B
    stub("KernelSetState"),                                            // 0x7C
    def("QueryProcessMemory", svc_query_process_memory),               // 0x7D
];
