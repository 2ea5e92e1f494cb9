//! IPC command-buffer translation.
//!
//! The command buffer is a fixed-layout region in each thread's TLS slot: a header word, the
//! untranslated (normal) parameters, then translate parameters introduced by descriptor
//! words. Translation copies the buffer between the two threads' address spaces, re-homing
//! handle descriptors into the receiving process's handle table and copying static buffers
//! into the slots the receiver declared. Unsupported descriptor kinds fail with the
//! deterministic translation-error result.

use tracing::warn;

use crate::handle::{CURRENT_PROCESS_HANDLE, CURRENT_THREAD_HANDLE};
use crate::object::ObjectId;
use crate::result::{result_from_memory_error, ResultCode, ERR_TRANSLATION};
use crate::Kernel;

/// Length of the command buffer proper, in words; the static-buffer table follows it.
pub const COMMAND_BUFFER_LENGTH: u32 = 0x40;

/// Builds a command-buffer header word.
pub fn make_header(command_id: u16, normal_params: u32, translate_params: u32) -> u32 {
    ((command_id as u32) << 16) | ((normal_params & 0x3F) << 6) | (translate_params & 0x3F)
}

pub fn command_id_from_header(header: u32) -> u16 {
    (header >> 16) as u16
}

pub fn copy_handles_desc(count: u32) -> u32 {
    (count - 1) << 26
}

pub fn move_handles_desc(count: u32) -> u32 {
    0x10 | ((count - 1) << 26)
}

pub fn calling_pid_desc() -> u32 {
    0x20
}

pub fn static_buffer_desc(size: u32, buffer_id: u32) -> u32 {
    0x2 | (size << 14) | ((buffer_id & 0xF) << 10)
}

pub fn mapped_buffer_desc(size: u32, permissions: u32) -> u32 {
    0x8 | (size << 4) | (permissions & 0x6)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DescriptorType {
    CopyHandle,
    MoveHandle,
    CallingPid,
    StaticBuffer,
    MappedBuffer,
    Unknown,
}

// Handle-family descriptors keep the low nibble clear; buffer descriptors carry access
// rights down there, so the checks are ordered rather than exact matches.
fn descriptor_type(descriptor: u32) -> DescriptorType {
    if descriptor & 0xF == 0 {
        match descriptor & 0x30 {
            0x00 => DescriptorType::CopyHandle,
            0x10 => DescriptorType::MoveHandle,
            0x20 => DescriptorType::CallingPid,
            _ => DescriptorType::Unknown,
        }
    } else if descriptor & 0x8 != 0 {
        DescriptorType::MappedBuffer
    } else if descriptor & 0x4 != 0 {
        // PXI buffers only occur on sessions this kernel does not model.
        DescriptorType::Unknown
    } else {
        DescriptorType::StaticBuffer
    }
}

impl Kernel {
    /// Copies and translates the command buffer of `src_thread` into `dst_thread`'s, reading
    /// from `source` and writing to `target`.
    pub(crate) fn translate_command_buffer(
        &mut self,
        src_thread: ObjectId,
        dst_thread: ObjectId,
        source: u32,
        target: u32,
    ) -> Result<(), ResultCode> {
        let src_process = self.thread(src_thread).owner_process;
        let dst_process = self.thread(dst_thread).owner_process;
        let header = self.mem_read32(src_process, source)?;
        let normal_params = (header >> 6) & 0x3F;
        let translate_params = header & 0x3F;
        // The translate size covers the descriptor words themselves.
        let untranslated = 1 + normal_params as usize;
        let command_size = untranslated + translate_params as usize;
        let mut command = vec![0u32; command_size];
        for (i, word) in command.iter_mut().enumerate() {
            *word = self.mem_read32(src_process, source + 4 * i as u32)?;
        }
        let mut i = untranslated;
        while i < command_size {
            let descriptor = command[i];
            i += 1;
            match descriptor_type(descriptor) {
                kind @ (DescriptorType::CopyHandle | DescriptorType::MoveHandle) => {
                    let count = (descriptor >> 26) + 1;
                    for _ in 0..count {
                        let handle = command[i];
                        let object = match handle {
                            CURRENT_THREAD_HANDLE => Some(src_thread),
                            CURRENT_PROCESS_HANDLE => Some(src_process),
                            0 => None,
                            _ => self.process(src_process).handle_table.get(handle),
                        };
                        command[i] = match object {
                            Some(object) => {
                                if kind == DescriptorType::MoveHandle
                                    && handle != CURRENT_THREAD_HANDLE
                                    && handle != CURRENT_PROCESS_HANDLE
                                {
                                    // Keep the object alive across the source-handle close.
                                    self.retain(object);
                                    self.handle_close(src_process, handle);
                                    let moved =
                                        self.handle_create(dst_process, object).unwrap_or(0);
                                    self.release(object);
                                    moved
                                } else {
                                    self.handle_create(dst_process, object).unwrap_or(0)
                                }
                            }
                            None => {
                                // The real kernel nulls untranslatable handles in the target.
                                warn!(handle, "untranslatable handle in command buffer");
                                0
                            }
                        };
                        i += 1;
                    }
                }
                DescriptorType::CallingPid => {
                    command[i] = self.process(src_process).process_id;
                    i += 1;
                }
                DescriptorType::StaticBuffer => {
                    let size = descriptor >> 14;
                    let buffer_id = (descriptor >> 10) & 0xF;
                    let buffer_source = command[i];
                    // The receiver declares (descriptor, address) pairs for each buffer id
                    // right after its command buffer.
                    let slot = target + COMMAND_BUFFER_LENGTH * 4 + buffer_id * 8;
                    let buffer_target = self.mem_read32(dst_process, slot + 4)?;
                    let mut data = vec![0u8; size as usize];
                    self.mem_read_block(src_process, buffer_source, &mut data)?;
                    self.mem_write_block(dst_process, buffer_target, &data)?;
                    command[i] = buffer_target;
                    i += 1;
                }
                DescriptorType::MappedBuffer => {
                    warn!(descriptor, "mapped-buffer translation is not supported");
                    return Err(ERR_TRANSLATION);
                }
                DescriptorType::Unknown => {
                    warn!(descriptor, "unknown descriptor in command buffer");
                    return Err(ERR_TRANSLATION);
                }
            }
        }
        for (i, &word) in command.iter().enumerate() {
            self.mem_write32(dst_process, target + 4 * i as u32, word)?;
        }
        Ok(())
    }
}

// Guest-memory conveniences over the current address spaces; memory errors become the guest
// result codes the kernel reports for them.
impl Kernel {
    pub fn mem_read32(&self, process: ObjectId, vaddr: u32) -> Result<u32, ResultCode> {
        let process = crate::object::process_entry(&self.objects, process);
        process
            .address_space
            .read32(&self.memory.fcram, vaddr)
            .map_err(result_from_memory_error)
    }

    pub fn mem_read64(&self, process: ObjectId, vaddr: u32) -> Result<u64, ResultCode> {
        let process = crate::object::process_entry(&self.objects, process);
        process
            .address_space
            .read64(&self.memory.fcram, vaddr)
            .map_err(result_from_memory_error)
    }

    pub fn mem_write32(
        &mut self,
        process: ObjectId,
        vaddr: u32,
        value: u32,
    ) -> Result<(), ResultCode> {
        let process = crate::object::process_entry(&self.objects, process);
        process
            .address_space
            .write32(&mut self.memory.fcram, vaddr, value)
            .map_err(result_from_memory_error)
    }

    pub fn mem_write64(
        &mut self,
        process: ObjectId,
        vaddr: u32,
        value: u64,
    ) -> Result<(), ResultCode> {
        let process = crate::object::process_entry(&self.objects, process);
        process
            .address_space
            .write64(&mut self.memory.fcram, vaddr, value)
            .map_err(result_from_memory_error)
    }

    pub fn mem_read_block(
        &self,
        process: ObjectId,
        vaddr: u32,
        buf: &mut [u8],
    ) -> Result<(), ResultCode> {
        let process = crate::object::process_entry(&self.objects, process);
        process
            .address_space
            .read_block(&self.memory.fcram, vaddr, buf)
            .map_err(result_from_memory_error)
    }

    pub fn mem_write_block(
        &mut self,
        process: ObjectId,
        vaddr: u32,
        data: &[u8],
    ) -> Result<(), ResultCode> {
        let process = crate::object::process_entry(&self.objects, process);
        process
            .address_space
            .write_block(&mut self.memory.fcram, vaddr, data)
            .map_err(result_from_memory_error)
    }

    pub fn mem_read_cstring(
        &self,
        process: ObjectId,
        vaddr: u32,
        max_len: u32,
    ) -> Result<String, ResultCode> {
        let process = crate::object::process_entry(&self.objects, process);
        process
            .address_space
            .read_cstring(&self.memory.fcram, vaddr, max_len)
            .map_err(result_from_memory_error)
    }

    pub fn mem_is_valid(&self, process: ObjectId, vaddr: u32) -> bool {
        crate::object::process_entry(&self.objects, process)
            .address_space
            .is_valid(vaddr)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn header_packs_and_unpacks() {
        let header = make_header(0x4F, 2, 4);
        assert_eq!(header, 0x004F_0084);
        assert_eq!(command_id_from_header(header), 0x4F);
        assert_eq!((header >> 6) & 0x3F, 2);
        assert_eq!(header & 0x3F, 4);
    }

    #[test]
    fn descriptor_kinds_decode() {
        assert_eq!(descriptor_type(copy_handles_desc(1)), DescriptorType::CopyHandle);
        assert_eq!(descriptor_type(move_handles_desc(2)), DescriptorType::MoveHandle);
        assert_eq!(descriptor_type(calling_pid_desc()), DescriptorType::CallingPid);
        assert_eq!(
            descriptor_type(static_buffer_desc(0x100, 3)),
            DescriptorType::StaticBuffer
        );
        assert_eq!(
            descriptor_type(mapped_buffer_desc(0x100, 0x2)),
            DescriptorType::MappedBuffer
        );
    }
}
