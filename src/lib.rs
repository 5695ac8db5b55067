//! On-chip debug core for JTAG-attached targets.
//!
//! `ocd-core` drives a target microprocessor through its
//! architecture-specific debug interface: it halts and resumes execution,
//! reads and writes registers and memory, and manages breakpoints. Two
//! backends are provided: an ARM Cortex-A9 (ARMv7-A, debugged through the
//! ADIv5 DAP and the CoreSight CPUDBG register block) and a MIPS32 core
//! debugged through EJTAG's Processor Access mechanism. Both implement the
//! uniform [`CoreInterface`] facade; the session/scripting front end, the
//! GDB remote protocol glue and the raw probe drivers live elsewhere and
//! talk to this crate through the [`architecture::arm::DapAccess`] and
//! [`architecture::mips::ejtag::EjtagAccess`] transport traits.

#![warn(missing_docs)]

pub mod architecture;
pub mod config;
pub mod core;
mod error;
pub mod probe;

pub use crate::architecture::Architecture;
pub use crate::config::TargetConfig;
pub use crate::core::{
    AccessSize, Breakpoint, BreakpointType, CoreEvent, CoreInterface, CoreStatus, DebugReason,
    GdbRegister, MemParam, ParamDirection, RegParam, WorkingAreaPool,
};
pub use crate::error::Error;
pub use crate::probe::tap::{next_state, is_stable, tms_path, TapState, TapTracker, TmsSequence};
