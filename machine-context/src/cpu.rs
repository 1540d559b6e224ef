//! Per-architecture register layouts.
//!
//! Registers are stored as raw `u64` values in the order of
//! [`REGISTER_NAMES`], exception registers in the order of
//! [`EXCEPTION_REGISTER_NAMES`].

/// Stacks grow towards lower addresses on every supported architecture
pub const STACK_GROW_DIRECTION: isize = -1;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub const REGISTER_NAMES: &[&str] = &[
            "rax", "rbx", "rcx", "rdx", "rdi", "rsi", "rbp", "rsp", "r8", "r9", "r10", "r11",
            "r12", "r13", "r14", "r15", "rip", "rflags", "cs", "fs", "gs",
        ];
        pub const EXCEPTION_REGISTER_NAMES: &[&str] = &["trapno", "err", "faultvaddr"];

        const FRAME_POINTER: Option<usize> = Some(6);
        const STACK_POINTER: Option<usize> = Some(7);
        const INSTRUCTION_POINTER: Option<usize> = Some(16);
        const LINK_REGISTER: Option<usize> = None;
        const FAULT_ADDRESS: Option<usize> = Some(2);
    } else if #[cfg(target_arch = "aarch64")] {
        pub const REGISTER_NAMES: &[&str] = &[
            "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12",
            "x13", "x14", "x15", "x16", "x17", "x18", "x19", "x20", "x21", "x22", "x23", "x24",
            "x25", "x26", "x27", "x28", "fp", "lr", "sp", "pc", "cpsr",
        ];
        pub const EXCEPTION_REGISTER_NAMES: &[&str] = &["exception", "esr", "far"];

        const FRAME_POINTER: Option<usize> = Some(29);
        const STACK_POINTER: Option<usize> = Some(31);
        const INSTRUCTION_POINTER: Option<usize> = Some(32);
        const LINK_REGISTER: Option<usize> = Some(30);
        const FAULT_ADDRESS: Option<usize> = Some(2);
    } else {
        pub const REGISTER_NAMES: &[&str] = &[];
        pub const EXCEPTION_REGISTER_NAMES: &[&str] = &[];

        const FRAME_POINTER: Option<usize> = None;
        const STACK_POINTER: Option<usize> = None;
        const INSTRUCTION_POINTER: Option<usize> = None;
        const LINK_REGISTER: Option<usize> = None;
        const FAULT_ADDRESS: Option<usize> = None;
    }
}

pub const REGISTER_COUNT: usize = REGISTER_NAMES.len();
pub const EXCEPTION_REGISTER_COUNT: usize = EXCEPTION_REGISTER_NAMES.len();

/// Removes pointer authentication bits from a code address
#[inline]
pub fn normalize_instruction_pointer(address: usize) -> usize {
    cfg_if::cfg_if! {
        if #[cfg(all(target_arch = "aarch64", target_vendor = "apple"))] {
            address & 0x0000_000f_ffff_ffff
        } else if #[cfg(target_arch = "aarch64")] {
            address & 0x0000_ffff_ffff_ffff
        } else {
            address
        }
    }
}

/// The register state of a single thread
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuState {
    pub registers: [u64; REGISTER_COUNT],
    pub exception_registers: [u64; EXCEPTION_REGISTER_COUNT],
}

impl Default for CpuState {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl CpuState {
    pub const fn zeroed() -> Self {
        Self {
            registers: [0; REGISTER_COUNT],
            exception_registers: [0; EXCEPTION_REGISTER_COUNT],
        }
    }

    /// Builds a state with only the registers needed for unwinding set,
    /// registers the architecture doesn't have are ignored
    pub fn from_frame(
        instruction_pointer: usize,
        stack_pointer: usize,
        frame_pointer: usize,
        link_register: usize,
    ) -> Self {
        let mut cpu = Self::zeroed();
        cpu.set(INSTRUCTION_POINTER, instruction_pointer);
        cpu.set(STACK_POINTER, stack_pointer);
        cpu.set(FRAME_POINTER, frame_pointer);
        cpu.set(LINK_REGISTER, link_register);
        cpu
    }

    #[inline]
    fn set(&mut self, index: Option<usize>, value: usize) {
        if let Some(i) = index {
            self.registers[i] = value as u64;
        }
    }

    #[inline]
    fn get(&self, index: Option<usize>) -> usize {
        index.map_or(0, |i| self.registers[i] as usize)
    }

    #[inline]
    pub fn instruction_address(&self) -> usize {
        self.get(INSTRUCTION_POINTER)
    }

    #[inline]
    pub fn stack_pointer(&self) -> usize {
        self.get(STACK_POINTER)
    }

    #[inline]
    pub fn frame_pointer(&self) -> usize {
        self.get(FRAME_POINTER)
    }

    /// The link register, always 0 on architectures without one
    #[inline]
    pub fn link_register(&self) -> usize {
        self.get(LINK_REGISTER)
    }

    /// The faulting address recorded by the CPU, if it has been captured
    #[inline]
    pub fn fault_address(&self) -> usize {
        FAULT_ADDRESS.map_or(0, |i| self.exception_registers[i] as usize)
    }

    /// Iterates the basic registers along with their names
    pub fn named_registers(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        REGISTER_NAMES.iter().copied().zip(self.registers.iter().copied())
    }

    /// Iterates the exception registers along with their names
    pub fn named_exception_registers(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        EXCEPTION_REGISTER_NAMES
            .iter()
            .copied()
            .zip(self.exception_registers.iter().copied())
    }
}

cfg_if::cfg_if! {
    if #[cfg(all(any(target_os = "linux", target_os = "android"), target_arch = "x86_64"))] {
        impl CpuState {
            /// Reads the registers out of the context delivered to a signal handler
            pub fn from_ucontext(uc: &libc::ucontext_t) -> Self {
                let g = &uc.uc_mcontext.gregs;
                let r = |i: libc::c_int| g[i as usize] as u64;
                let segments = r(libc::REG_CSGSFS);

                Self {
                    registers: [
                        r(libc::REG_RAX),
                        r(libc::REG_RBX),
                        r(libc::REG_RCX),
                        r(libc::REG_RDX),
                        r(libc::REG_RDI),
                        r(libc::REG_RSI),
                        r(libc::REG_RBP),
                        r(libc::REG_RSP),
                        r(libc::REG_R8),
                        r(libc::REG_R9),
                        r(libc::REG_R10),
                        r(libc::REG_R11),
                        r(libc::REG_R12),
                        r(libc::REG_R13),
                        r(libc::REG_R14),
                        r(libc::REG_R15),
                        r(libc::REG_RIP),
                        r(libc::REG_EFL),
                        segments & 0xffff,
                        (segments >> 32) & 0xffff,
                        (segments >> 16) & 0xffff,
                    ],
                    exception_registers: [
                        r(libc::REG_TRAPNO),
                        r(libc::REG_ERR),
                        r(libc::REG_CR2),
                    ],
                }
            }
        }
    } else if #[cfg(all(any(target_os = "linux", target_os = "android"), target_arch = "aarch64"))] {
        impl CpuState {
            /// Reads the registers out of the context delivered to a signal handler
            pub fn from_ucontext(uc: &libc::ucontext_t) -> Self {
                let mc = &uc.uc_mcontext;
                let mut cpu = Self::zeroed();
                cpu.registers[..31].copy_from_slice(&mc.regs);
                cpu.registers[31] = mc.sp;
                cpu.registers[32] = mc.pc;
                cpu.registers[33] = mc.pstate;
                cpu.exception_registers[2] = mc.fault_address;
                cpu
            }
        }
    } else if #[cfg(any(target_os = "linux", target_os = "android"))] {
        impl CpuState {
            /// Register layouts are only known for x86_64 and aarch64
            pub fn from_ucontext(_uc: &libc::ucontext_t) -> Self {
                Self::zeroed()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tables_line_up() {
        assert_eq!(CpuState::zeroed().named_registers().count(), REGISTER_COUNT);

        let cpu = CpuState::from_frame(0x1000, 0x2000, 0x3000, 0x4000);
        if !REGISTER_NAMES.is_empty() {
            assert_eq!(cpu.instruction_address(), 0x1000);
            assert_eq!(cpu.stack_pointer(), 0x2000);
            assert_eq!(cpu.frame_pointer(), 0x3000);
        }

        if cfg!(target_arch = "aarch64") {
            assert_eq!(cpu.link_register(), 0x4000);
            let named: Vec<_> = cpu.named_registers().filter(|(_, v)| *v != 0).collect();
            assert_eq!(
                named,
                [("fp", 0x3000), ("lr", 0x4000), ("sp", 0x2000), ("pc", 0x1000)]
            );
        } else {
            assert_eq!(cpu.link_register(), 0);
        }
    }

    #[test]
    fn pointer_authentication_is_stripped() {
        let tagged = 0x0012_0000_dead_beef_usize;
        let stripped = normalize_instruction_pointer(tagged);

        if cfg!(target_arch = "aarch64") {
            assert_eq!(stripped, 0x0000_0000_dead_beef);
        } else {
            assert_eq!(stripped, tagged);
        }
    }
}
