//! Architecture-specific target backends.

pub mod arm;
pub mod mips;

/// The architecture family of a target core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    /// ARMv7-A, debugged through the ADIv5 DAP.
    Arm,
    /// MIPS32, debugged through EJTAG.
    Mips,
}
