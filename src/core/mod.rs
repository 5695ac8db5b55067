//! Architecture-neutral target facade.
//!
//! [`CoreInterface`] is the function table every target backend implements;
//! the session front end talks to a `Box<dyn CoreInterface>` and never sees
//! architecture-specific types.

pub mod breakpoints;
pub mod core_status;
pub(crate) mod memory_mapped_registers;
pub mod registers;
pub mod working_area;

use std::time::Duration;

pub use breakpoints::{Breakpoint, BreakpointType};
pub use core_status::{CoreEvent, CoreStatus, DebugReason};
pub use registers::{RegisterCache, RegisterDescription};
pub use working_area::{WorkingArea, WorkingAreaPool};

use crate::error::Error;

/// Width of a single memory access element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessSize {
    /// 8-bit accesses.
    Byte = 1,
    /// 16-bit accesses.
    Half = 2,
    /// 32-bit accesses.
    Word = 4,
}

impl AccessSize {
    /// Element size in bytes.
    pub fn bytes(self) -> usize {
        self as usize
    }

    /// The access size for a breakpoint/instruction length in bytes.
    pub fn from_length(length: u32) -> Result<Self, Error> {
        match length {
            1 => Ok(AccessSize::Byte),
            2 => Ok(AccessSize::Half),
            4 => Ok(AccessSize::Word),
            _ => Err(Error::InvalidArgument("unsupported access length")),
        }
    }
}

/// Direction of an algorithm parameter, from the host's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamDirection {
    /// Copied to the target before the run only.
    ToTarget,
    /// Read back from the target after the run only.
    FromTarget,
    /// Copied in before and read back after.
    Bidirectional,
}

/// A memory buffer exchanged with a downloaded algorithm.
#[derive(Debug)]
pub struct MemParam {
    /// Target address of the buffer.
    pub address: u32,
    /// Transfer direction.
    pub direction: ParamDirection,
    /// Host-side copy of the buffer.
    pub value: Vec<u8>,
}

/// A core register exchanged with a downloaded algorithm, by name.
#[derive(Debug)]
pub struct RegParam {
    /// Architectural register name, e.g. `"a0"`.
    pub name: &'static str,
    /// Transfer direction.
    pub direction: ParamDirection,
    /// Host-side copy of the value.
    pub value: u32,
}

/// One entry of the register list reported to GDB.
#[derive(Debug, Clone)]
pub struct GdbRegister {
    /// Register name.
    pub name: &'static str,
    /// Width in bits.
    pub bits: u32,
    /// Value bytes, little endian, `bits / 8` long.
    pub value: Vec<u8>,
}

/// Architecture-neutral target operations.
///
/// Memory buffers are laid out as `count` consecutive elements of `size`
/// bytes each, values little endian. When the MMU is enabled,
/// `read_memory`/`write_memory` translate the address and route to the
/// physical accessors.
pub trait CoreInterface {
    /// Probe the silicon once per session: debug-register identification,
    /// breakpoint-slot discovery, debug-access setup.
    fn examine(&mut self) -> Result<(), Error>;

    /// The last known execution state (no target traffic).
    fn status(&self) -> CoreStatus;

    /// Sample the target's execution state and run debug entry when the
    /// core halted since the last poll.
    fn poll(&mut self) -> Result<CoreStatus, Error>;

    /// Request a halt and wait for the core to reach debug state.
    ///
    /// Halting an already-halted core succeeds and changes nothing.
    fn halt(&mut self, timeout: Duration) -> Result<(), Error>;

    /// Leave debug state. `current` resumes at the cached PC, otherwise at
    /// `address`. With `debug_execution` the core runs on the debugger's
    /// behalf and events are reported as debug events.
    fn resume(
        &mut self,
        current: bool,
        address: u32,
        handle_breakpoints: bool,
        debug_execution: bool,
    ) -> Result<(), Error>;

    /// Execute one instruction and halt again.
    fn step(&mut self, current: bool, address: u32, handle_breakpoints: bool)
        -> Result<(), Error>;

    /// Read one core register through the cache.
    fn read_core_reg(&mut self, num: usize) -> Result<u32, Error>;

    /// Write one core register into the cache (flushed on resume).
    fn write_core_reg(&mut self, num: usize, value: u32) -> Result<(), Error>;

    /// The register list in the layout GDB expects for this architecture.
    fn gdb_reg_list(&mut self) -> Result<Vec<GdbRegister>, Error>;

    /// Read `count` elements of `size` bytes from the (virtual, when the
    /// MMU is on) address.
    fn read_memory(
        &mut self,
        address: u32,
        size: AccessSize,
        count: u32,
        buffer: &mut [u8],
    ) -> Result<(), Error>;

    /// Write `count` elements of `size` bytes to the (virtual, when the
    /// MMU is on) address.
    fn write_memory(
        &mut self,
        address: u32,
        size: AccessSize,
        count: u32,
        buffer: &[u8],
    ) -> Result<(), Error>;

    /// Word-oriented fast path for large downloads.
    fn bulk_write_memory(&mut self, address: u32, buffer: &[u8]) -> Result<(), Error> {
        if buffer.len() % 4 != 0 {
            return Err(Error::InvalidArgument(
                "bulk writes must be a whole number of words",
            ));
        }
        self.write_memory(address, AccessSize::Word, (buffer.len() / 4) as u32, buffer)
    }

    /// Read from physical memory, bypassing translation.
    fn read_phys_memory(
        &mut self,
        address: u32,
        size: AccessSize,
        count: u32,
        buffer: &mut [u8],
    ) -> Result<(), Error>;

    /// Write to physical memory, bypassing translation.
    fn write_phys_memory(
        &mut self,
        address: u32,
        size: AccessSize,
        count: u32,
        buffer: &[u8],
    ) -> Result<(), Error>;

    /// Whether address translation is active. Requires Halted.
    fn mmu_enabled(&mut self) -> Result<bool, Error>;

    /// Translate a virtual address to a physical one.
    fn virt2phys(&mut self, virt: u32) -> Result<u32, Error>;

    /// CRC-32 over `count` bytes at `address` (poly `0x04C11DB7`, init
    /// `0xFFFF_FFFF`, MSB first).
    fn checksum_memory(&mut self, address: u32, count: u32) -> Result<u32, Error>;

    /// AND-accumulate `count` bytes at `address`; `0xFF` means blank.
    fn blank_check_memory(&mut self, address: u32, count: u32) -> Result<u32, Error>;

    /// Install and arm a breakpoint.
    fn add_breakpoint(
        &mut self,
        address: u32,
        length: u32,
        bp_type: BreakpointType,
    ) -> Result<(), Error>;

    /// Disarm and destroy the breakpoint at `address`. Removing a
    /// breakpoint that is not installed is a no-op.
    fn remove_breakpoint(&mut self, address: u32) -> Result<(), Error>;

    /// Run a downloaded code snippet to completion.
    ///
    /// Copies the parameters in, resumes at `entry_point`, waits for the
    /// core to halt (forcing a halt after `timeout`), requires
    /// `PC == exit_point`, copies the parameters out and restores the full
    /// register context.
    fn run_algorithm(
        &mut self,
        mem_params: &mut [MemParam],
        reg_params: &mut [RegParam],
        entry_point: u32,
        exit_point: u32,
        timeout: Duration,
    ) -> Result<(), Error>;

    /// Pop the oldest undelivered lifecycle event.
    fn take_event(&mut self) -> Option<CoreEvent>;

    /// Convenience single-word read.
    fn read_word_32(&mut self, address: u32) -> Result<u32, Error> {
        let mut buffer = [0u8; 4];
        self.read_memory(address, AccessSize::Word, 1, &mut buffer)?;
        Ok(u32::from_le_bytes(buffer))
    }

    /// Convenience single-word write.
    fn write_word_32(&mut self, address: u32, value: u32) -> Result<(), Error> {
        self.write_memory(address, AccessSize::Word, 1, &value.to_le_bytes())
    }
}

/// Host-side CRC-32 matching the target-side checksum algorithms
/// (poly `0x04C11DB7`, init `0xFFFF_FFFF`, MSB first, no final xor).
pub(crate) fn crc32_checksum(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= (byte as u32) << 24;
        for _ in 0..8 {
            if crc & 0x8000_0000 != 0 {
                crc = (crc << 1) ^ 0x04C1_1DB7;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn crc32_matches_known_vectors() {
        // CRC-32/MPEG-2 catalogue check value.
        assert_eq!(crc32_checksum(b"123456789"), 0x0376_E6E7);
        assert_eq!(crc32_checksum(&[]), 0xFFFF_FFFF);
    }

    #[test]
    fn access_size_bytes() {
        assert_eq!(AccessSize::Byte.bytes(), 1);
        assert_eq!(AccessSize::Half.bytes(), 2);
        assert_eq!(AccessSize::Word.bytes(), 4);
    }
}
