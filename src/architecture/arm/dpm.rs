//! ARM Debug Programmer's Model.
//!
//! Instruction injection through the ITR plus word exchange through the
//! DCC, under the handshake invariant that `DSCR.InstrCompl` is set when
//! every operation returns. Callers hand in the DAP explicitly; the DPM
//! itself is a small value holding the debug base and the silicon ID.
//!
//! To reduce needless round-trips the last DSCR read is threaded through a
//! `&mut u32`; initialize it with [`DSCR_INSTR_COMP`] when no instruction
//! can be pending.

use std::time::{Duration, Instant};

use super::debug_regs::*;
use super::instructions::{build_mcr, build_mrc};
use super::{ArmError, DapAccess};
use crate::core::memory_mapped_registers::MemoryMappedRegister;

/// `DSCR.InstrCompl`, as a raw mask for threading through `exec_opcode`.
pub const DSCR_INSTR_COMP: u32 = 1 << 24;

/// Wall-clock budget for every DPM handshake.
const DPM_TIMEOUT: Duration = Duration::from_secs(1);

/// Slot index space of [`Dpm::bpwp_enable`]: indices 0..16 address
/// breakpoint register pairs, 16..32 watchpoint register pairs.
pub const WATCHPOINT_INDEX_BASE: usize = 16;

/// The Debug Programmer's Model of one ARMv7-A core.
#[derive(Debug, Clone, Copy)]
pub struct Dpm {
    debug_base: u32,
    didr: u32,
}

impl Dpm {
    /// A DPM for the CPUDBG block at `debug_base`, as identified by `didr`.
    pub fn new(debug_base: u32, didr: u32) -> Self {
        Self { debug_base, didr }
    }

    /// The raw DBGDIDR value captured at examination.
    pub fn didr(&self) -> u32 {
        self.didr
    }

    fn read_dscr(&self, dap: &mut dyn DapAccess) -> Result<u32, ArmError> {
        dap.read_word_32(Dbgdscr::get_mmio_address(self.debug_base)?)
    }

    /// Execute one ARM instruction on the halted core.
    ///
    /// Waits for `InstrCompl` before writing the opcode into the ITR and
    /// again before returning, so the invariant holds on both sides. The
    /// final DSCR value is left in `dscr`.
    pub fn exec_opcode(
        &self,
        dap: &mut dyn DapAccess,
        opcode: u32,
        dscr: &mut u32,
    ) -> Result<(), ArmError> {
        tracing::debug!("exec opcode {:#010x}", opcode);

        let start = Instant::now();
        while *dscr & DSCR_INSTR_COMP == 0 {
            *dscr = self.read_dscr(dap)?;
            if start.elapsed() > DPM_TIMEOUT {
                tracing::error!("timeout waiting to issue opcode {:#010x}", opcode);
                return Err(ArmError::Timeout("DSCR.InstrCompl"));
            }
        }

        dap.write_word_32(Dbgitr::get_mmio_address(self.debug_base)?, opcode)?;

        let start = Instant::now();
        loop {
            *dscr = self.read_dscr(dap)?;
            if *dscr & DSCR_INSTR_COMP != 0 {
                return Ok(());
            }
            if start.elapsed() > DPM_TIMEOUT {
                tracing::error!("timeout waiting for opcode {:#010x} to complete", opcode);
                return Err(ArmError::Timeout("DSCR.InstrCompl"));
            }
        }
    }

    /// Establish the post-condition that the instruction pipeline is idle
    /// and the DCC receive register is empty.
    pub fn prepare(&self, dap: &mut dyn DapAccess) -> Result<(), ArmError> {
        let mut dscr;
        let start = Instant::now();
        loop {
            dscr = self.read_dscr(dap)?;
            if dscr & DSCR_INSTR_COMP != 0 {
                break;
            }
            if start.elapsed() > DPM_TIMEOUT {
                return Err(ArmError::Timeout("DSCR.InstrCompl"));
            }
        }

        // This "should never happen": drain a stale host-to-target word.
        if Dbgdscr(dscr).rxfull() {
            tracing::error!("DSCR.DTRRXfull set on prepare, dscr {:#010x}", dscr);
            self.exec_opcode(dap, build_mrc(14, 0, 0, 0, 5, 0), &mut dscr)?;
        }

        Ok(())
    }

    /// Release per-call resources. Reserved for batching; nothing to do.
    pub fn finish(&self, _dap: &mut dyn DapAccess) -> Result<(), ArmError> {
        Ok(())
    }

    /// Put a word into DTRRX for the target to pick up.
    pub fn write_dcc(&self, dap: &mut dyn DapAccess, data: u32) -> Result<(), ArmError> {
        tracing::debug!("write DCC {:#010x}", data);
        dap.write_word_32(Dbgdtrrx::get_mmio_address(self.debug_base)?, data)
    }

    /// Wait for the target to fill DTRTX, then read it.
    pub fn read_dcc(&self, dap: &mut dyn DapAccess, dscr: &mut u32) -> Result<u32, ArmError> {
        let start = Instant::now();
        while *dscr & (1 << 29) == 0 {
            *dscr = self.read_dscr(dap)?;
            if start.elapsed() > DPM_TIMEOUT {
                tracing::error!("timeout waiting for DCC read");
                return Err(ArmError::Timeout("DSCR.DTRTXfull"));
            }
        }

        let data = dap.read_word_32(Dbgdtrtx::get_mmio_address(self.debug_base)?)?;
        tracing::debug!("read DCC {:#010x}", data);
        Ok(data)
    }

    /// Write `data` to DTRRX, then execute `opcode`, which consumes it
    /// (e.g. `MRC p14,0,Rt,c0,c5,0` or `LDC`/`STC` forms).
    pub fn instr_write_data_dcc(
        &self,
        dap: &mut dyn DapAccess,
        opcode: u32,
        data: u32,
    ) -> Result<(), ArmError> {
        let mut dscr = DSCR_INSTR_COMP;
        self.write_dcc(dap, data)?;
        self.exec_opcode(dap, opcode, &mut dscr)
    }

    /// Write `data` to r0 through the DCC, then execute `opcode`, which
    /// takes its input from r0.
    pub fn instr_write_data_r0(
        &self,
        dap: &mut dyn DapAccess,
        opcode: u32,
        data: u32,
    ) -> Result<(), ArmError> {
        let mut dscr = DSCR_INSTR_COMP;
        self.write_dcc(dap, data)?;

        // DCCRX to r0: MRC p14, 0, r0, c0, c5, 0
        self.exec_opcode(dap, build_mrc(14, 0, 0, 0, 5, 0), &mut dscr)?;

        // then the opcode, taking data from r0
        self.exec_opcode(dap, opcode, &mut dscr)
    }

    /// Prefetch flush after modifying the execution state in CPSR.
    pub fn instr_cpsr_sync(&self, dap: &mut dyn DapAccess) -> Result<(), ArmError> {
        // MCR p15, 0, r0, c7, c5, 4
        let mut dscr = DSCR_INSTR_COMP;
        self.exec_opcode(dap, build_mcr(15, 0, 0, 7, 5, 4), &mut dscr)
    }

    /// Execute `opcode`, which writes its result to the DCC, then read the
    /// word out of DTRTX.
    pub fn instr_read_data_dcc(
        &self,
        dap: &mut dyn DapAccess,
        opcode: u32,
    ) -> Result<u32, ArmError> {
        let mut dscr = DSCR_INSTR_COMP;
        self.exec_opcode(dap, opcode, &mut dscr)?;
        self.read_dcc(dap, &mut dscr)
    }

    /// Execute `opcode`, which leaves its result in r0, then move r0 out
    /// through the DCC.
    pub fn instr_read_data_r0(
        &self,
        dap: &mut dyn DapAccess,
        opcode: u32,
    ) -> Result<u32, ArmError> {
        let mut dscr = DSCR_INSTR_COMP;
        self.exec_opcode(dap, opcode, &mut dscr)?;

        // r0 to DCCTX: MCR p14, 0, r0, c0, c5, 0
        self.exec_opcode(dap, build_mcr(14, 0, 0, 0, 5, 0), &mut dscr)?;

        self.read_dcc(dap, &mut dscr)
    }

    fn bpwp_registers(&self, index: usize) -> Result<(u32, u32), ArmError> {
        let (vr_base, cr_base, slot) = if index < WATCHPOINT_INDEX_BASE {
            (
                Dbgbvr::get_mmio_address(self.debug_base)?,
                Dbgbcr::get_mmio_address(self.debug_base)?,
                index,
            )
        } else if index < 2 * WATCHPOINT_INDEX_BASE {
            (
                Dbgwvr::get_mmio_address(self.debug_base)?,
                Dbgwcr::get_mmio_address(self.debug_base)?,
                index - WATCHPOINT_INDEX_BASE,
            )
        } else {
            return Err(ArmError::InvalidRegister(index));
        };
        Ok((vr_base + 4 * slot as u32, cr_base + 4 * slot as u32))
    }

    /// Program and enable a breakpoint (indices 0..16) or watchpoint
    /// (16..32) register pair.
    pub fn bpwp_enable(
        &self,
        dap: &mut dyn DapAccess,
        index: usize,
        addr: u32,
        control: u32,
    ) -> Result<(), ArmError> {
        let (vr, cr) = self.bpwp_registers(index)?;
        tracing::debug!("bpwp enable, vr {:#010x} cr {:#010x}", vr, cr);
        dap.write_word_32(vr, addr)?;
        dap.write_word_32(cr, control)
    }

    /// Disable the indexed breakpoint/watchpoint slot by zeroing its
    /// control register.
    pub fn bpwp_disable(&self, dap: &mut dyn DapAccess, index: usize) -> Result<(), ArmError> {
        let (_, cr) = self.bpwp_registers(index)?;
        tracing::debug!("bpwp disable, cr {:#010x}", cr);
        dap.write_word_32(cr, 0)
    }
}
