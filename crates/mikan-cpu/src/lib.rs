//! Execution-context boundary between the HLE kernel and the CPU component.
//!
//! The kernel never interprets instructions; it only needs a register file it can read SVC
//! arguments from, write results into, and swap wholesale on a context switch. [`Cpu`] is that
//! narrow surface, and [`ThreadContext`] is the per-thread blob the scheduler saves and
//! restores through it. A JIT or interpreter backend implements [`Cpu`] over its own state;
//! [`HleCpu`] is a register-file-only implementation for tests and for hosts that drive the
//! kernel directly.

/// CPSR mode bits for user mode on the emulated core.
pub const USER32_MODE: u32 = 0x10;

/// FPSCR default-NaN mode bit.
pub const FPSCR_DEFAULT_NAN: u32 = 1 << 25;
/// FPSCR flush-to-zero mode bit.
pub const FPSCR_FLUSH_TO_ZERO: u32 = 1 << 24;
/// FPSCR round-toward-zero rounding mode.
pub const FPSCR_ROUND_TOZERO: u32 = 3 << 22;
/// FPSCR inexact cumulative exception bit.
pub const FPSCR_IXC: u32 = 1 << 4;

const REG_SP: usize = 13;
const REG_PC: usize = 15;

/// Saved register state of one guest thread.
///
/// Treated as an opaque blob by everything except the CPU boundary: the kernel creates it,
/// resets it when a thread is (re)initialised, and pokes individual registers only to deliver
/// syscall results to suspended threads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadContext {
    regs: [u32; 16],
    cpsr: u32,
    fpscr: u32,
}

impl ThreadContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all register state back to power-on defaults.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn cpu_register(&self, index: usize) -> u32 {
        self.regs[index]
    }

    pub fn set_cpu_register(&mut self, index: usize, value: u32) {
        self.regs[index] = value;
    }

    pub fn program_counter(&self) -> u32 {
        self.regs[REG_PC]
    }

    pub fn set_program_counter(&mut self, value: u32) {
        self.regs[REG_PC] = value;
    }

    pub fn stack_pointer(&self) -> u32 {
        self.regs[REG_SP]
    }

    pub fn set_stack_pointer(&mut self, value: u32) {
        self.regs[REG_SP] = value;
    }

    pub fn cpsr(&self) -> u32 {
        self.cpsr
    }

    pub fn set_cpsr(&mut self, value: u32) {
        self.cpsr = value;
    }

    pub fn fpscr(&self) -> u32 {
        self.fpscr
    }

    pub fn set_fpscr(&mut self, value: u32) {
        self.fpscr = value;
    }
}

/// Register-level access to the active core.
///
/// All methods address the *currently loaded* context; the scheduler is responsible for
/// pairing `save_context`/`load_context` calls around a switch.
pub trait Cpu {
    /// Reads general-purpose register `index` (0..=15).
    fn reg(&self, index: usize) -> u32;

    /// Writes general-purpose register `index` (0..=15).
    fn set_reg(&mut self, index: usize, value: u32);

    fn pc(&self) -> u32 {
        self.reg(REG_PC)
    }

    fn set_pc(&mut self, value: u32) {
        self.set_reg(REG_PC, value);
    }

    /// Copies the live register file into `context`.
    fn save_context(&self, context: &mut ThreadContext);

    /// Replaces the live register file with `context`.
    fn load_context(&mut self, context: &ThreadContext);

    /// Publishes the thread-local-storage base through the read-only thread ID register
    /// (CP15 c13); guest code reads it to locate its TLS slot and IPC command buffer.
    fn set_tls_base(&mut self, vaddr: u32);
}

/// A [`Cpu`] that is nothing but a register file.
///
/// Sufficient for exercising the kernel: SVC arguments are staged with `set_reg`, results read
/// back with `reg`, and context switches behave exactly as they would on a real backend.
#[derive(Debug, Default)]
pub struct HleCpu {
    context: ThreadContext,
    tls_base: u32,
}

impl HleCpu {
    pub fn new() -> Self {
        Self::default()
    }

    /// The TLS base most recently published via [`Cpu::set_tls_base`].
    pub fn tls_base(&self) -> u32 {
        self.tls_base
    }
}

impl Cpu for HleCpu {
    fn reg(&self, index: usize) -> u32 {
        self.context.cpu_register(index)
    }

    fn set_reg(&mut self, index: usize, value: u32) {
        self.context.set_cpu_register(index, value);
    }

    fn save_context(&self, context: &mut ThreadContext) {
        *context = self.context.clone();
    }

    fn load_context(&mut self, context: &ThreadContext) {
        self.context = context.clone();
    }

    fn set_tls_base(&mut self, vaddr: u32) {
        self.tls_base = vaddr;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn context_round_trips_through_the_cpu() {
        let mut cpu = HleCpu::new();
        cpu.set_reg(0, 0xDEAD_BEEF);
        cpu.set_reg(13, 0x1000_0000);
        cpu.set_pc(0x0010_0000);

        let mut saved = ThreadContext::new();
        cpu.save_context(&mut saved);
        assert_eq!(saved.cpu_register(0), 0xDEAD_BEEF);
        assert_eq!(saved.stack_pointer(), 0x1000_0000);
        assert_eq!(saved.program_counter(), 0x0010_0000);

        let mut other = ThreadContext::new();
        other.set_cpu_register(0, 7);
        cpu.load_context(&other);
        assert_eq!(cpu.reg(0), 7);

        cpu.load_context(&saved);
        assert_eq!(cpu.reg(0), 0xDEAD_BEEF);
    }

    #[test]
    fn reset_clears_every_register() {
        let mut context = ThreadContext::new();
        context.set_cpu_register(4, 4);
        context.set_cpsr(USER32_MODE);
        context.set_fpscr(FPSCR_DEFAULT_NAN);
        context.reset();
        assert_eq!(context, ThreadContext::new());
    }
}
