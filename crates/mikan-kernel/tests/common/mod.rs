#![allow(dead_code)]

use mikan_cpu::HleCpu;
use mikan_kernel::{
    Kernel, KernelConfig, ObjectData, ObjectId, ResultCode, Thread,
};

pub const ENTRY: u32 = 0x0010_0000;
pub const MAIN_PRIORITY: u32 = 48;

/// A booted kernel: one process with a 16 KiB image and a running main thread.
pub struct Fixture {
    pub kernel: Kernel,
    pub process: ObjectId,
    pub main: ObjectId,
}

pub fn boot() -> Fixture {
    boot_with_config(KernelConfig::default())
}

pub fn boot_with_config(config: KernelConfig) -> Fixture {
    let mut kernel = Kernel::new(config, Box::new(HleCpu::new()));
    let process = kernel.create_process("app", 0x4000);
    let main = kernel.setup_main_thread(process, ENTRY, MAIN_PRIORITY);
    Fixture {
        kernel,
        process,
        main,
    }
}

impl Fixture {
    /// Stages registers and issues one supervisor call as the current thread.
    pub fn svc(&mut self, immediate: u32, regs: &[(usize, u32)]) {
        for &(index, value) in regs {
            self.kernel.cpu_mut().set_reg(index, value);
        }
        self.kernel.call_svc(immediate);
    }

    pub fn reg(&self, index: usize) -> u32 {
        self.kernel.cpu().reg(index)
    }

    /// The result code in r0 after a syscall.
    pub fn result(&self) -> ResultCode {
        ResultCode(self.reg(0))
    }

    pub fn thread(&self, id: ObjectId) -> &Thread {
        match &self.kernel.object(id).expect("thread vanished").data {
            ObjectData::Thread(thread) => thread,
            other => panic!("{:?} is not a thread", other.kind()),
        }
    }

    /// Register from a thread's saved context (live CPU registers for the current thread).
    pub fn thread_reg(&self, id: ObjectId, index: usize) -> u32 {
        if self.kernel.current_thread() == Some(id) {
            self.reg(index)
        } else {
            self.thread(id).context.cpu_register(index)
        }
    }

    pub fn current(&self) -> ObjectId {
        self.kernel.current_thread().expect("nothing is running")
    }

    /// Spawns an extra thread directly through the kernel (bypassing the priority
    /// authorization the SVC applies) and returns it.
    pub fn spawn(&mut self, name: &str, priority: u32) -> ObjectId {
        let thread = self
            .kernel
            .create_thread(name, ENTRY, priority, 0, 0, 0x0FFF_F000, self.process)
            .expect("thread creation failed");
        // The kernel's thread list keeps it alive; drop the creation reference.
        self.kernel.release(thread);
        thread
    }
}
