//! MIPS32 debug support over EJTAG.

pub mod ejtag;
pub(crate) mod instructions;
pub mod mips32;
pub mod pracc;

#[cfg(test)]
pub(crate) mod test_support;

use crate::core::RegisterDescription;

/// Number of registers in the EJTAG register file exchanged by the
/// save/restore snippets: 32 GPRs plus status, lo, hi, badvaddr, cause and
/// pc, in exactly this wire order.
pub const MIPS32_NUM_CORE_REGS: usize = 38;

/// Cache index of the program counter.
pub const MIPS32_REG_PC: usize = 37;
/// Cache index of the status register.
pub const MIPS32_REG_STATUS: usize = 32;

#[rustfmt::skip]
pub(crate) const MIPS32_REGISTERS: [RegisterDescription; MIPS32_NUM_CORE_REGS] = [
    RegisterDescription { name: "zero", size: 32 },
    RegisterDescription { name: "at", size: 32 },
    RegisterDescription { name: "v0", size: 32 },
    RegisterDescription { name: "v1", size: 32 },
    RegisterDescription { name: "a0", size: 32 },
    RegisterDescription { name: "a1", size: 32 },
    RegisterDescription { name: "a2", size: 32 },
    RegisterDescription { name: "a3", size: 32 },
    RegisterDescription { name: "t0", size: 32 },
    RegisterDescription { name: "t1", size: 32 },
    RegisterDescription { name: "t2", size: 32 },
    RegisterDescription { name: "t3", size: 32 },
    RegisterDescription { name: "t4", size: 32 },
    RegisterDescription { name: "t5", size: 32 },
    RegisterDescription { name: "t6", size: 32 },
    RegisterDescription { name: "t7", size: 32 },
    RegisterDescription { name: "s0", size: 32 },
    RegisterDescription { name: "s1", size: 32 },
    RegisterDescription { name: "s2", size: 32 },
    RegisterDescription { name: "s3", size: 32 },
    RegisterDescription { name: "s4", size: 32 },
    RegisterDescription { name: "s5", size: 32 },
    RegisterDescription { name: "s6", size: 32 },
    RegisterDescription { name: "s7", size: 32 },
    RegisterDescription { name: "t8", size: 32 },
    RegisterDescription { name: "t9", size: 32 },
    RegisterDescription { name: "k0", size: 32 },
    RegisterDescription { name: "k1", size: 32 },
    RegisterDescription { name: "gp", size: 32 },
    RegisterDescription { name: "sp", size: 32 },
    RegisterDescription { name: "fp", size: 32 },
    RegisterDescription { name: "ra", size: 32 },
    RegisterDescription { name: "status", size: 32 },
    RegisterDescription { name: "lo", size: 32 },
    RegisterDescription { name: "hi", size: 32 },
    RegisterDescription { name: "badvaddr", size: 32 },
    RegisterDescription { name: "cause", size: 32 },
    RegisterDescription { name: "pc", size: 32 },
];

/// The instruction set the core executes out of debug mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsaMode {
    /// 32-bit MIPS32 encodings.
    Mips32,
    /// 16-bit MIPS16e encodings (DEPC bit 0 set).
    Mips16e,
}

impl std::fmt::Display for IsaMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            IsaMode::Mips32 => "MIPS32",
            IsaMode::Mips16e => "MIPS16e",
        })
    }
}
