//! MIPS32 target support over EJTAG.
//!
//! Run control uses the EJTAG control register (JTAGBRK to halt, `DERET`
//! to leave debug mode, CP0 Debug.SSt to single-step); all register and
//! memory traffic rides the PrAcc engine.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::ejtag::*;
use super::instructions::{
    build_b, build_mfc0, build_mtc0, build_ori, build_xori, cp0, neg16, MIPS16_SDBBP,
    MIPS32_DERET, MIPS32_SDBBP,
};
use super::{pracc, IsaMode, MIPS32_NUM_CORE_REGS, MIPS32_REGISTERS, MIPS32_REG_PC};
use crate::config::TargetConfig;
use crate::core::{
    breakpoints::{Breakpoint, BreakpointType, SOFT_BREAKPOINT_SET},
    AccessSize, CoreEvent, CoreInterface, CoreStatus, DebugReason, GdbRegister, MemParam,
    ParamDirection, RegParam, RegisterCache, WorkingAreaPool,
};
use crate::error::Error;

/// Budget for run-control handshakes.
const RUN_CONTROL_TIMEOUT: Duration = Duration::from_secs(1);

/// One EJTAG break comparator, as mirrored by the debugger.
#[derive(Debug, Clone, Copy)]
pub struct Comparator {
    /// Address of the comparator's register block (`IBAn`/`DBAn`).
    pub reg_address: u32,
    /// Claimed by an armed breakpoint or watchpoint.
    pub used: bool,
    /// The programmed compare address.
    pub bp_value: u32,
}

/// An armed data watchpoint.
#[derive(Debug, Clone, Copy)]
pub struct Watchpoint {
    /// Watched address.
    pub address: u32,
    /// Claimed comparator slot plus one; 0 when disarmed.
    pub set: u32,
}

/// One MIPS32 core behind an EJTAG TAP.
pub struct Mips32 {
    ejtag: MipsEjtag,
    #[allow(dead_code)]
    config: TargetConfig,
    examined: bool,

    state: CoreStatus,
    debug_reason: DebugReason,
    regs: RegisterCache,
    isa_mode: IsaMode,

    bp_scanned: bool,
    num_inst_bpoints: usize,
    num_inst_bpoints_avail: usize,
    inst_break_list: Vec<Comparator>,
    num_data_bpoints: usize,
    num_data_bpoints_avail: usize,
    data_break_list: Vec<Comparator>,
    breakpoints: Vec<Breakpoint>,
    watchpoints: Vec<Watchpoint>,

    working_areas: Option<WorkingAreaPool>,
    events: VecDeque<CoreEvent>,
}

impl Mips32 {
    /// Bind a target object to an EJTAG transport. No hardware is touched
    /// until [`CoreInterface::examine`].
    pub fn new(probe: Box<dyn EjtagAccess>, config: TargetConfig) -> Self {
        let working_areas = config
            .working_area
            .map(|wa| WorkingAreaPool::new(wa.base, wa.size));
        Self {
            ejtag: MipsEjtag::new(probe),
            config,
            examined: false,
            state: CoreStatus::Unknown,
            debug_reason: DebugReason::NotHalted,
            regs: RegisterCache::new(&MIPS32_REGISTERS),
            isa_mode: IsaMode::Mips32,
            bp_scanned: false,
            num_inst_bpoints: 0,
            num_inst_bpoints_avail: 0,
            inst_break_list: Vec::new(),
            num_data_bpoints: 0,
            num_data_bpoints_avail: 0,
            data_break_list: Vec::new(),
            breakpoints: Vec::new(),
            watchpoints: Vec::new(),
            working_areas,
            events: VecDeque::new(),
        }
    }

    /// The instruction set the core will resume into.
    pub fn isa_mode(&self) -> IsaMode {
        self.isa_mode
    }

    /// Why the core last entered debug mode.
    pub fn debug_reason(&self) -> DebugReason {
        self.debug_reason
    }

    /// Free instruction-break comparators.
    pub fn num_inst_bpoints_avail(&self) -> usize {
        self.num_inst_bpoints_avail
    }

    /// The instruction-break comparator mirror.
    pub fn inst_break_list(&self) -> &[Comparator] {
        &self.inst_break_list
    }

    /// Save the full register file and refresh the target mirror.
    fn debug_entry(&mut self) -> Result<(), Error> {
        let regs = pracc::read_regs(&mut self.ejtag)?;
        for (num, &value) in regs.iter().enumerate() {
            self.regs.update_from_target(num, value);
        }

        // DEPC bit 0 selects the compressed instruction set.
        self.isa_mode = if regs[MIPS32_REG_PC] & 1 != 0 {
            IsaMode::Mips16e
        } else {
            IsaMode::Mips32
        };

        tracing::info!(
            "target halted in {} mode, pc: {:#010x}",
            self.isa_mode,
            regs[MIPS32_REG_PC]
        );

        if !self.bp_scanned {
            self.configure_break_unit()?;
        }
        Ok(())
    }

    /// One-shot discovery of the break comparator blocks from DCR.
    fn configure_break_unit(&mut self) -> Result<(), Error> {
        if self.bp_scanned {
            return Ok(());
        }

        let dcr = pracc::read_u32(&mut self.ejtag, EJTAG_DCR)?;

        if dcr & EJTAG_DCR_IB != 0 {
            let ibs = pracc::read_u32(&mut self.ejtag, EJTAG_IBS)?;
            self.num_inst_bpoints = ((ibs >> 24) & 0x0F) as usize;
            self.num_inst_bpoints_avail = self.num_inst_bpoints;
            self.inst_break_list = (0..self.num_inst_bpoints)
                .map(|i| Comparator {
                    reg_address: EJTAG_IBA1 + 0x100 * i as u32,
                    used: false,
                    bp_value: 0,
                })
                .collect();
            // Clear stale break status.
            pracc::write_u32(&mut self.ejtag, EJTAG_IBS, 0)?;
        }

        if dcr & EJTAG_DCR_DB != 0 {
            let dbs = pracc::read_u32(&mut self.ejtag, EJTAG_DBS)?;
            self.num_data_bpoints = ((dbs >> 24) & 0x0F) as usize;
            self.num_data_bpoints_avail = self.num_data_bpoints;
            self.data_break_list = (0..self.num_data_bpoints)
                .map(|i| Comparator {
                    reg_address: EJTAG_DBA1 + 0x100 * i as u32,
                    used: false,
                    bp_value: 0,
                })
                .collect();
            pracc::write_u32(&mut self.ejtag, EJTAG_DBS, 0)?;
        }

        tracing::debug!(
            "DCR {:#010x} numinst {} numdata {}",
            dcr,
            self.num_inst_bpoints,
            self.num_data_bpoints
        );
        self.bp_scanned = true;
        Ok(())
    }

    /// Mask or unmask interrupts for non-debug execution via DCR.
    fn enable_interrupts(&mut self, enable: bool) -> Result<(), Error> {
        let dcr = pracc::read_u32(&mut self.ejtag, EJTAG_DCR)?;
        let wanted = if enable {
            dcr | EJTAG_DCR_INTE
        } else {
            dcr & !EJTAG_DCR_INTE
        };
        if wanted != dcr {
            pracc::write_u32(&mut self.ejtag, EJTAG_DCR, wanted)?;
        }
        Ok(())
    }

    /// Set or clear CP0 Debug.SSt around a single step.
    fn config_step(&mut self, enable: bool) -> Result<(), Error> {
        let code = [
            build_mtc0(1, cp0::DESAVE, 0),    // move $1 to COP0 DeSave
            build_mfc0(1, cp0::DEBUG, 0),     // move COP0 Debug to $1
            if enable {
                build_ori(1, 1, 0x0100)       // set SSt bit
            } else {
                build_xori(1, 1, 0x0100)      // clear SSt bit
            },
            build_mtc0(1, cp0::DEBUG, 0),     // move $1 to COP0 Debug
            build_b(neg16(5)),                // b start
            build_mfc0(1, cp0::DESAVE, 0),    // delay slot: restore $1
        ];
        pracc::exec(&mut self.ejtag, &code, &mut [], &mut [], true)?;
        Ok(())
    }

    /// Flush the cached register file back and leave debug mode with a
    /// one-shot `DERET`.
    fn exit_debug(&mut self) -> Result<(), Error> {
        let code = [MIPS32_DERET];
        pracc::exec(&mut self.ejtag, &code, &mut [], &mut [], false)?;
        Ok(())
    }

    fn restore_context(&mut self) -> Result<(), Error> {
        let mut image = [0u32; MIPS32_NUM_CORE_REGS];
        for (num, slot) in image.iter_mut().enumerate() {
            let reg = self.regs.get(num)?;
            if !reg.is_valid() {
                return Err(Error::Fail("register cache incomplete before resume"));
            }
            *slot = reg.value();
        }
        pracc::write_regs(&mut self.ejtag, &image)?;
        for num in 0..MIPS32_NUM_CORE_REGS {
            self.regs.mark_clean(num);
        }
        Ok(())
    }

    fn resume_internal(
        &mut self,
        current: bool,
        address: u32,
        _handle_breakpoints: bool,
        debug_execution: bool,
        enable_ints: bool,
    ) -> Result<(), Error> {
        if !self.state.is_halted() {
            tracing::warn!("target not halted");
            return Err(Error::NotHalted);
        }

        let mut resume_pc = if current {
            self.regs.get(MIPS32_REG_PC)?.value()
        } else {
            address
        };
        if self.isa_mode == IsaMode::Mips16e {
            resume_pc |= 1;
        }
        self.regs.set(MIPS32_REG_PC, resume_pc)?;
        tracing::debug!("resume pc = {:#010x}", resume_pc);

        self.restore_context()?;
        self.enable_interrupts(enable_ints)?;
        self.exit_debug()?;

        self.debug_reason = DebugReason::NotHalted;
        self.regs.invalidate_all();

        if !debug_execution {
            self.state = CoreStatus::Running;
            self.events.push_back(CoreEvent::Resumed);
            tracing::debug!("target resumed at {:#010x}", resume_pc);
        } else {
            self.state = CoreStatus::DebugRunning;
            self.events.push_back(CoreEvent::DebugResumed);
            tracing::debug!("target debug resumed at {:#010x}", resume_pc);
        }
        Ok(())
    }

    fn set_breakpoint_record(&mut self, bp: &mut Breakpoint) -> Result<(), Error> {
        if bp.is_set() {
            tracing::warn!("breakpoint already set");
            return Ok(());
        }

        match bp.bp_type {
            BreakpointType::Hard => {
                let Some(slot) = self.inst_break_list.iter().position(|c| !c.used) else {
                    tracing::error!("cannot find free instruction break comparator");
                    return Err(Error::ResourceNotAvailable("instruction break comparator"));
                };
                bp.set = slot as u32 + 1;
                self.inst_break_list[slot].used = true;
                self.inst_break_list[slot].bp_value = bp.address;

                let reg_address = self.inst_break_list[slot].reg_address;
                pracc::write_u32(&mut self.ejtag, reg_address, bp.address)?;
                // Exact match, then enable.
                pracc::write_u32(&mut self.ejtag, reg_address + 0x08, 0)?;
                pracc::write_u32(&mut self.ejtag, reg_address + 0x18, 1)?;
                tracing::debug!("ibp {} set at {:#010x}", slot, bp.address);
            }
            BreakpointType::Soft => {
                if bp.length == 4 {
                    let current = pracc::read_u32(&mut self.ejtag, bp.address)?;
                    bp.orig_instr = current.to_le_bytes();
                    pracc::write_u32(&mut self.ejtag, bp.address, MIPS32_SDBBP)?;
                    let verify = pracc::read_u32(&mut self.ejtag, bp.address)?;
                    if verify != MIPS32_SDBBP {
                        tracing::error!(
                            "unable to set 32-bit breakpoint at {:#010x}",
                            bp.address
                        );
                        return Err(Error::Fail("software breakpoint verification failed"));
                    }
                } else {
                    let mut half = [0u16];
                    pracc::read_mem16(&mut self.ejtag, bp.address, 1, &mut half)?;
                    bp.orig_instr[..2].copy_from_slice(&half[0].to_le_bytes());
                    pracc::write_mem16(&mut self.ejtag, bp.address, 1, &[MIPS16_SDBBP])?;
                    let mut verify = [0u16];
                    pracc::read_mem16(&mut self.ejtag, bp.address, 1, &mut verify)?;
                    if verify[0] != MIPS16_SDBBP {
                        tracing::error!(
                            "unable to set 16-bit breakpoint at {:#010x}",
                            bp.address
                        );
                        return Err(Error::Fail("software breakpoint verification failed"));
                    }
                }
                bp.set = SOFT_BREAKPOINT_SET;
            }
        }
        Ok(())
    }

    fn unset_breakpoint_record(&mut self, bp: &mut Breakpoint) -> Result<(), Error> {
        if !bp.is_set() {
            tracing::warn!("breakpoint not set");
            return Ok(());
        }

        match bp.bp_type {
            BreakpointType::Hard => {
                let slot = (bp.set - 1) as usize;
                if slot >= self.num_inst_bpoints {
                    tracing::debug!("invalid comparator number in breakpoint");
                    return Ok(());
                }
                self.inst_break_list[slot].used = false;
                self.inst_break_list[slot].bp_value = 0;
                let reg_address = self.inst_break_list[slot].reg_address;
                pracc::write_u32(&mut self.ejtag, reg_address + 0x18, 0)?;
            }
            BreakpointType::Soft => {
                if bp.length == 4 {
                    let current = pracc::read_u32(&mut self.ejtag, bp.address)?;
                    if current == MIPS32_SDBBP {
                        let orig = u32::from_le_bytes(bp.orig_instr);
                        pracc::write_u32(&mut self.ejtag, bp.address, orig)?;
                    } else {
                        tracing::warn!(
                            "memory at {:#010x} changed under a software breakpoint",
                            bp.address
                        );
                    }
                } else {
                    let mut current = [0u16];
                    pracc::read_mem16(&mut self.ejtag, bp.address, 1, &mut current)?;
                    if current[0] == MIPS16_SDBBP {
                        let orig = u16::from_le_bytes(bp.orig_instr[..2].try_into().unwrap());
                        pracc::write_mem16(&mut self.ejtag, bp.address, 1, &[orig])?;
                    } else {
                        tracing::warn!(
                            "memory at {:#010x} changed under a software breakpoint",
                            bp.address
                        );
                    }
                }
            }
        }
        bp.set = 0;
        Ok(())
    }

    /// Arm a data watchpoint on `address`.
    pub fn add_watchpoint(&mut self, address: u32) -> Result<(), Error> {
        if !self.state.is_halted() {
            return Err(Error::NotHalted);
        }
        self.configure_break_unit()?;

        let Some(slot) = self.data_break_list.iter().position(|c| !c.used) else {
            tracing::info!("no data break comparator available");
            return Err(Error::ResourceNotAvailable("data break comparator"));
        };
        self.data_break_list[slot].used = true;
        self.data_break_list[slot].bp_value = address;
        self.num_data_bpoints_avail -= 1;

        let reg_address = self.data_break_list[slot].reg_address;
        pracc::write_u32(&mut self.ejtag, reg_address, address)?;
        // Match every byte lane and access type, then enable.
        pracc::write_u32(&mut self.ejtag, reg_address + 0x08, 0)?;
        pracc::write_u32(&mut self.ejtag, reg_address + 0x18, 1)?;

        self.watchpoints.push(Watchpoint {
            address,
            set: slot as u32 + 1,
        });
        Ok(())
    }

    /// Disarm and forget the watchpoint on `address`. A missing
    /// watchpoint is a no-op.
    pub fn remove_watchpoint(&mut self, address: u32) -> Result<(), Error> {
        let Some(index) = self.watchpoints.iter().position(|w| w.address == address) else {
            return Ok(());
        };
        let wp = self.watchpoints.remove(index);
        if wp.set != 0 {
            let slot = (wp.set - 1) as usize;
            self.data_break_list[slot].used = false;
            self.data_break_list[slot].bp_value = 0;
            self.num_data_bpoints_avail += 1;
            let reg_address = self.data_break_list[slot].reg_address;
            pracc::write_u32(&mut self.ejtag, reg_address + 0x18, 0)?;
        }
        Ok(())
    }
}

impl CoreInterface for Mips32 {
    fn examine(&mut self) -> Result<(), Error> {
        if !self.examined {
            // Comparator discovery is deferred to the first debug entry;
            // it needs a halted core to run PrAcc.
            self.bp_scanned = false;
            self.num_inst_bpoints = 0;
            self.num_data_bpoints = 0;
            self.num_inst_bpoints_avail = 0;
            self.num_data_bpoints_avail = 0;
            self.examined = true;
        }
        self.poll()?;
        Ok(())
    }

    fn status(&self) -> CoreStatus {
        self.state
    }

    fn poll(&mut self) -> Result<CoreStatus, Error> {
        let ctrl = self.ejtag.control_scan(self.ejtag.ejtag_ctrl)?;

        if ctrl.rocc() {
            // The scan already wrote ROCC back as the acknowledge.
            tracing::warn!("reset occurred since last poll");
        }

        if ctrl.brkst() {
            let prev_state = self.state;
            if prev_state != CoreStatus::Halted {
                tracing::debug!("target halted");
                self.state = CoreStatus::Halted;
                self.debug_entry()?;
                if prev_state == CoreStatus::DebugRunning {
                    self.events.push_back(CoreEvent::DebugHalted);
                } else {
                    self.events.push_back(CoreEvent::Halted);
                }
            }
        } else if self.state != CoreStatus::DebugRunning {
            self.state = CoreStatus::Running;
        }

        Ok(self.state)
    }

    fn halt(&mut self, timeout: Duration) -> Result<(), Error> {
        if self.state.is_halted() {
            return Ok(());
        }

        self.ejtag.jtagbrk()?;

        let start = Instant::now();
        loop {
            if self.ejtag.is_in_debug()? {
                break;
            }
            if start.elapsed() > timeout {
                tracing::error!("timeout waiting for halt");
                return Err(Error::Timeout);
            }
        }

        self.debug_reason = DebugReason::DbgRq;
        self.poll()?;
        Ok(())
    }

    fn resume(
        &mut self,
        current: bool,
        address: u32,
        handle_breakpoints: bool,
        debug_execution: bool,
    ) -> Result<(), Error> {
        if !self.state.is_halted() {
            tracing::warn!("target not halted");
            return Err(Error::NotHalted);
        }

        if !debug_execution {
            if let Some(pool) = &mut self.working_areas {
                pool.free_all();
            }
            // Arm everything the front end installed but never armed.
            for index in 0..self.breakpoints.len() {
                if !self.breakpoints[index].is_set() {
                    let mut bp = self.breakpoints[index].clone();
                    self.set_breakpoint_record(&mut bp)?;
                    self.breakpoints[index] = bp;
                }
            }
        }

        self.resume_internal(
            current,
            address,
            handle_breakpoints,
            debug_execution,
            !debug_execution,
        )
    }

    fn step(
        &mut self,
        current: bool,
        address: u32,
        handle_breakpoints: bool,
    ) -> Result<(), Error> {
        if !self.state.is_halted() {
            tracing::warn!("target not halted");
            return Err(Error::NotHalted);
        }

        let address = if current {
            self.regs.get(MIPS32_REG_PC)?.value()
        } else {
            self.regs.set(MIPS32_REG_PC, address)?;
            address
        };

        let user_bp = if handle_breakpoints {
            self.breakpoints.iter().position(|bp| bp.address == address)
        } else {
            None
        };
        if let Some(index) = user_bp {
            let mut bp = self.breakpoints[index].clone();
            self.unset_breakpoint_record(&mut bp)?;
            self.breakpoints[index] = bp;
        }

        self.config_step(true)?;
        self.debug_reason = DebugReason::SingleStep;

        // Interrupts stay masked across a single step.
        let step_result = (|| -> Result<(), Error> {
            self.resume_internal(true, address, false, false, false)?;

            let start = Instant::now();
            while self.state != CoreStatus::Halted {
                self.poll()?;
                if start.elapsed() > RUN_CONTROL_TIMEOUT {
                    tracing::error!("timeout waiting for step to complete");
                    return Err(Error::Timeout);
                }
            }
            Ok(())
        })();

        let unstep_result = self.config_step(false);
        step_result?;
        unstep_result?;

        self.debug_reason = DebugReason::SingleStep;

        if let Some(index) = user_bp {
            let mut bp = self.breakpoints[index].clone();
            self.set_breakpoint_record(&mut bp)?;
            self.breakpoints[index] = bp;
        }
        Ok(())
    }

    fn read_core_reg(&mut self, num: usize) -> Result<u32, Error> {
        if self.regs.get(num)?.is_valid() {
            return Ok(self.regs.get(num)?.value());
        }
        if !self.state.is_halted() {
            return Err(Error::NotHalted);
        }
        // Refresh the whole file; single registers are not cheaper.
        let regs = pracc::read_regs(&mut self.ejtag)?;
        for (i, &value) in regs.iter().enumerate() {
            if !self.regs.get(i)?.is_dirty() {
                self.regs.update_from_target(i, value);
            }
        }
        Ok(self.regs.get(num)?.value())
    }

    fn write_core_reg(&mut self, num: usize, value: u32) -> Result<(), Error> {
        if !self.state.is_halted() {
            return Err(Error::NotHalted);
        }
        self.regs.set(num, value)
    }

    fn gdb_reg_list(&mut self) -> Result<Vec<GdbRegister>, Error> {
        let mut list = Vec::with_capacity(MIPS32_NUM_CORE_REGS + 52);
        for num in 0..MIPS32_NUM_CORE_REGS {
            let reg = self.regs.get(num)?;
            list.push(GdbRegister {
                name: reg.name(),
                bits: 32,
                value: reg.value().to_le_bytes().to_vec(),
            });
        }
        // fp0-fp31, fsr, fir plus the padding registers GDB asks about.
        for _ in 0..52 {
            list.push(GdbRegister {
                name: "fp-dummy",
                bits: 32,
                value: vec![0; 4],
            });
        }
        Ok(list)
    }

    fn read_memory(
        &mut self,
        address: u32,
        size: AccessSize,
        count: u32,
        buffer: &mut [u8],
    ) -> Result<(), Error> {
        // No MMU translation: PrAcc loads run in the core's own address
        // space, so KSEG windows behave exactly as they would for the
        // running program.
        self.read_phys_memory(address, size, count, buffer)
    }

    fn write_memory(
        &mut self,
        address: u32,
        size: AccessSize,
        count: u32,
        buffer: &[u8],
    ) -> Result<(), Error> {
        self.write_phys_memory(address, size, count, buffer)
    }

    fn read_phys_memory(
        &mut self,
        address: u32,
        size: AccessSize,
        count: u32,
        buffer: &mut [u8],
    ) -> Result<(), Error> {
        if buffer.len() != size.bytes() * count as usize {
            return Err(Error::InvalidArgument("buffer length mismatch"));
        }
        if !self.state.is_halted() {
            return Err(Error::NotHalted);
        }
        if count == 0 {
            return Ok(());
        }
        tracing::debug!(
            "reading memory at {:#010x}; size {}; count {}",
            address,
            size.bytes(),
            count
        );
        pracc::read_mem(&mut self.ejtag, address, size, count, buffer)?;
        Ok(())
    }

    fn write_phys_memory(
        &mut self,
        address: u32,
        size: AccessSize,
        count: u32,
        buffer: &[u8],
    ) -> Result<(), Error> {
        if buffer.len() != size.bytes() * count as usize {
            return Err(Error::InvalidArgument("buffer length mismatch"));
        }
        if !self.state.is_halted() {
            return Err(Error::NotHalted);
        }
        if count == 0 {
            return Ok(());
        }
        tracing::debug!(
            "writing memory at {:#010x}; size {}; count {}",
            address,
            size.bytes(),
            count
        );
        pracc::write_mem(&mut self.ejtag, address, size, count, buffer)?;
        Ok(())
    }

    fn mmu_enabled(&mut self) -> Result<bool, Error> {
        // Fixed-mapping kernel segments only; TLB walking is not wired up.
        Ok(false)
    }

    fn virt2phys(&mut self, virt: u32) -> Result<u32, Error> {
        // KSEG0/KSEG1 are fixed windows onto the low 512 MiB.
        Ok(match virt {
            0x8000_0000..=0xBFFF_FFFF => virt & 0x1FFF_FFFF,
            _ => virt,
        })
    }

    fn checksum_memory(&mut self, address: u32, count: u32) -> Result<u32, Error> {
        // See the MIPS32 CRC loader; polynomial 0x04C11DB7, MSB first.
        static MIPS_CRC_CODE: [u32; 23] = [
            0x248C_0000, // addiu $t4, $a0, 0
            0x24AA_0000, // addiu $t2, $a1, 0
            0x2404_FFFF, // addiu $a0, $zero, 0xffffffff
            0x1000_0010, // beq   $zero, $zero, ncomp
            0x240B_0000, // addiu $t3, $zero, 0
            /* nbyte: */
            0x8185_0000, // lb    $a1, ($t4)
            0x218C_0001, // addi  $t4, $t4, 1
            0x0005_2E00, // sll   $a1, $a1, 24
            0x3C02_04C1, // lui   $v0, 0x04c1
            0x0085_2026, // xor   $a0, $a0, $a1
            0x3447_1DB7, // ori   $a3, $v0, 0x1db7
            0x0000_3021, // addu  $a2, $zero, $zero
            /* loop: */
            0x0004_4040, // sll   $t0, $a0, 1
            0x24C6_0001, // addiu $a2, $a2, 1
            0x2884_0000, // slti  $a0, $a0, 0
            0x0107_4826, // xor   $t1, $t0, $a3
            0x0124_400B, // movn  $t0, $t1, $a0
            0x28C3_0008, // slti  $v1, $a2, 8
            0x1460_FFF9, // bne   $v1, $zero, loop
            0x0100_2021, // addu  $a0, $t0, $zero
            /* ncomp: */
            0x154B_FFF0, // bne   $t2, $t3, nbyte
            0x256B_0001, // addiu $t3, $t3, 1
            0x7000_003F, // sdbbp
        ];

        let Some(pool) = &mut self.working_areas else {
            return Err(Error::ResourceNotAvailable("working area"));
        };
        let area = pool.alloc((MIPS_CRC_CODE.len() * 4) as u32)?;

        let result = (|| -> Result<u32, Error> {
            for (i, &word) in MIPS_CRC_CODE.iter().enumerate() {
                self.write_word_32(area.address + (i * 4) as u32, word)?;
            }

            let mut reg_params = [
                RegParam {
                    name: "a0",
                    direction: ParamDirection::Bidirectional,
                    value: address,
                },
                RegParam {
                    name: "a1",
                    direction: ParamDirection::ToTarget,
                    value: count,
                },
            ];

            let timeout = Duration::from_millis(20_000 * (1 + count as u64 / (1024 * 1024)));
            self.run_algorithm(
                &mut [],
                &mut reg_params,
                area.address,
                // The sdbbp word.
                area.address + (MIPS_CRC_CODE.len() as u32 - 1) * 4,
                timeout,
            )?;

            Ok(reg_params[0].value)
        })();

        if let Some(pool) = &mut self.working_areas {
            pool.free(area);
        }
        result
    }

    fn blank_check_memory(&mut self, address: u32, count: u32) -> Result<u32, Error> {
        static ERASE_CHECK_CODE: [u32; 6] = [
            /* nbyte: */
            0x8088_0000, // lb    $t0, ($a0)
            0x00C8_3024, // and   $a2, $a2, $t0
            0x24A5_FFFF, // addiu $a1, $a1, -1
            0x14A0_FFFC, // bne   $a1, $zero, nbyte
            0x2484_0001, // addiu $a0, $a0, 1
            0x7000_003F, // sdbbp
        ];

        let Some(pool) = &mut self.working_areas else {
            return Err(Error::ResourceNotAvailable("working area"));
        };
        let area = pool.alloc((ERASE_CHECK_CODE.len() * 4) as u32)?;

        let result = (|| -> Result<u32, Error> {
            for (i, &word) in ERASE_CHECK_CODE.iter().enumerate() {
                self.write_word_32(area.address + (i * 4) as u32, word)?;
            }

            let mut reg_params = [
                RegParam {
                    name: "a0",
                    direction: ParamDirection::ToTarget,
                    value: address,
                },
                RegParam {
                    name: "a1",
                    direction: ParamDirection::ToTarget,
                    value: count,
                },
                RegParam {
                    name: "a2",
                    direction: ParamDirection::Bidirectional,
                    value: 0xFF,
                },
            ];

            self.run_algorithm(
                &mut [],
                &mut reg_params,
                area.address,
                area.address + (ERASE_CHECK_CODE.len() as u32 - 1) * 4,
                Duration::from_secs(10),
            )?;

            Ok(reg_params[2].value)
        })();

        if let Some(pool) = &mut self.working_areas {
            pool.free(area);
        }
        result
    }

    fn add_breakpoint(
        &mut self,
        address: u32,
        length: u32,
        bp_type: BreakpointType,
    ) -> Result<(), Error> {
        if !self.state.is_halted() {
            return Err(Error::NotHalted);
        }
        self.configure_break_unit()?;

        if bp_type == BreakpointType::Hard && self.num_inst_bpoints_avail < 1 {
            tracing::info!("no hardware breakpoint available");
            return Err(Error::ResourceNotAvailable("hardware breakpoint"));
        }

        let mut bp = Breakpoint::new(address, length, bp_type);
        if bp_type == BreakpointType::Hard {
            self.num_inst_bpoints_avail -= 1;
        }
        match self.set_breakpoint_record(&mut bp) {
            Ok(()) => {
                self.breakpoints.push(bp);
                Ok(())
            }
            Err(e) => {
                if bp_type == BreakpointType::Hard {
                    self.num_inst_bpoints_avail += 1;
                }
                Err(e)
            }
        }
    }

    fn remove_breakpoint(&mut self, address: u32) -> Result<(), Error> {
        let Some(index) = self.breakpoints.iter().position(|bp| bp.address == address) else {
            return Ok(());
        };
        let mut bp = self.breakpoints.remove(index);
        if bp.is_set() {
            self.unset_breakpoint_record(&mut bp)?;
            if bp.bp_type == BreakpointType::Hard {
                self.num_inst_bpoints_avail += 1;
            }
        }
        Ok(())
    }

    fn run_algorithm(
        &mut self,
        mem_params: &mut [MemParam],
        reg_params: &mut [RegParam],
        entry_point: u32,
        exit_point: u32,
        timeout: Duration,
    ) -> Result<(), Error> {
        if !self.state.is_halted() {
            tracing::warn!("target not halted");
            return Err(Error::NotHalted);
        }

        // Algorithms end on a software breakpoint at the exit point; the
        // context must come back exactly as it was.
        let mut context = [0u32; MIPS32_NUM_CORE_REGS];
        for (num, slot) in context.iter_mut().enumerate() {
            *slot = self.read_core_reg(num)?;
        }
        let saved_isa_mode = self.isa_mode;
        self.isa_mode = IsaMode::Mips32;

        for param in mem_params.iter() {
            if param.direction != ParamDirection::FromTarget {
                self.write_memory(
                    param.address,
                    AccessSize::Byte,
                    param.value.len() as u32,
                    &param.value,
                )?;
            }
        }

        for param in reg_params.iter() {
            let Some((num, _)) = self.regs.get_by_name(param.name) else {
                tracing::error!("register '{}' not found", param.name);
                return Err(Error::InvalidArgument("unknown register in reg_params"));
            };
            self.write_core_reg(num, param.value)?;
        }

        self.resume(false, entry_point, false, true)?;

        let start = Instant::now();
        while self.state != CoreStatus::Halted {
            self.poll()?;
            if start.elapsed() > timeout {
                // Force a halt so the session survives a wedged algorithm.
                tracing::error!("timeout waiting for algorithm to complete");
                self.halt(Duration::from_millis(500))?;
                return Err(Error::Timeout);
            }
        }

        let pc = self.read_core_reg(MIPS32_REG_PC)?;
        if pc != exit_point {
            tracing::debug!("algorithm halted at {:#010x}, expected exit", pc);
            return Err(Error::Fail("algorithm did not reach its exit point"));
        }

        for param in mem_params.iter_mut() {
            if param.direction != ParamDirection::ToTarget {
                let len = param.value.len() as u32;
                self.read_memory(param.address, AccessSize::Byte, len, &mut param.value)?;
            }
        }

        for param in reg_params.iter_mut() {
            if param.direction != ParamDirection::ToTarget {
                let (num, _) = self
                    .regs
                    .get_by_name(param.name)
                    .ok_or(Error::InvalidArgument("unknown register in reg_params"))?;
                param.value = self.read_core_reg(num)?;
            }
        }

        // Restore everything we saved before.
        for (num, &value) in context.iter().enumerate() {
            if self.read_core_reg(num)? != value {
                tracing::debug!(
                    "restoring register {} with value {:#010x}",
                    self.regs.get(num)?.name(),
                    value
                );
                self.write_core_reg(num, value)?;
            }
        }
        self.isa_mode = saved_isa_mode;

        Ok(())
    }

    fn take_event(&mut self) -> Option<CoreEvent> {
        self.events.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architecture::mips::test_support::SharedCore;
    use crate::config::WorkingAreaConfig;
    use crate::core::crc32_checksum;
    use pretty_assertions::assert_eq;

    const HALT_TIMEOUT: Duration = Duration::from_secs(1);

    fn make_target(core: &SharedCore, config: TargetConfig) -> Mips32 {
        Mips32::new(Box::new(core.clone()), config)
    }

    /// A core spinning at `pc` over NOP-filled memory.
    fn running_core(pc: u32) -> SharedCore {
        let core = SharedCore::new();
        {
            let mut sim = core.0.borrow_mut();
            sim.regs[29] = 0x8000_7F00; // sp
            sim.regs[8] = 0x0808_0808;
            sim.lo = 0x10;
            sim.hi = 0x20;
            sim.cop0[12] = 0x1234_0000; // status
            sim.set_pc(pc);
        }
        core
    }

    #[test]
    fn halt_saves_the_register_file() {
        let core = running_core(0x8000_0100);
        let mut target = make_target(&core, TargetConfig::default());
        target.examine().unwrap();
        assert_eq!(target.status(), CoreStatus::Running);

        target.halt(HALT_TIMEOUT).unwrap();

        assert_eq!(target.status(), CoreStatus::Halted);
        assert!(core.0.borrow().in_debug());
        assert_eq!(target.take_event(), Some(CoreEvent::Halted));
        assert!(target.regs.iter().all(|r| r.is_valid() && !r.is_dirty()));
        assert_eq!(target.read_core_reg(MIPS32_REG_PC).unwrap(), 0x8000_0100);
        assert_eq!(target.read_core_reg(8).unwrap(), 0x0808_0808);
        assert_eq!(target.read_core_reg(29).unwrap(), 0x8000_7F00);
        assert_eq!(target.read_core_reg(32).unwrap(), 0x1234_0000); // status
        assert_eq!(target.read_core_reg(33).unwrap(), 0x10); // lo
        assert_eq!(target.read_core_reg(34).unwrap(), 0x20); // hi
        assert_eq!(target.isa_mode(), IsaMode::Mips32);

        // Halting a halted target changes nothing.
        target.halt(HALT_TIMEOUT).unwrap();
        assert_eq!(target.status(), CoreStatus::Halted);
    }

    #[test]
    fn resume_runs_to_the_next_sdbbp() {
        let core = running_core(0x8000_0100);
        core.0
            .borrow_mut()
            .mem
            .insert(0x8000_0108, crate::architecture::mips::instructions::MIPS32_SDBBP);

        let mut target = make_target(&core, TargetConfig::default());
        target.examine().unwrap();
        target.halt(HALT_TIMEOUT).unwrap();
        let _ = target.take_event();

        target.resume(true, 0, false, false).unwrap();
        assert_eq!(target.take_event(), Some(CoreEvent::Resumed));
        // Every register-cache entry is invalid after resume.
        assert!(target.regs.iter().all(|r| !r.is_valid()));

        // The simulated core already hit the breakpoint; pick it up.
        target.poll().unwrap();
        assert_eq!(target.status(), CoreStatus::Halted);
        assert_eq!(target.take_event(), Some(CoreEvent::Halted));
        assert_eq!(target.read_core_reg(MIPS32_REG_PC).unwrap(), 0x8000_0108);
    }

    #[test]
    fn step_executes_exactly_one_instruction() {
        let core = running_core(0x8000_0100);
        let mut target = make_target(&core, TargetConfig::default());
        target.examine().unwrap();
        target.halt(HALT_TIMEOUT).unwrap();

        target.step(true, 0, true).unwrap();

        assert_eq!(target.status(), CoreStatus::Halted);
        assert_eq!(target.debug_reason, DebugReason::SingleStep);
        assert_eq!(target.read_core_reg(MIPS32_REG_PC).unwrap(), 0x8000_0104);
        // The SSt bit is cleared again after the step.
        assert_eq!(core.0.borrow().cop0[23] & 0x100, 0);
    }

    #[test]
    fn memory_round_trip_all_sizes() {
        let core = running_core(0x8000_0100);
        let mut target = make_target(&core, TargetConfig::default());
        target.examine().unwrap();
        target.halt(HALT_TIMEOUT).unwrap();

        for (size, count, pattern) in [
            (AccessSize::Byte, 5u32, &[9u8, 8, 7, 6, 5][..]),
            (AccessSize::Half, 2, &[0x11, 0x22, 0x33, 0x44][..]),
            (AccessSize::Word, 3, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12][..]),
        ] {
            target.write_memory(0xA000_1000, size, count, pattern).unwrap();
            let mut readback = vec![0u8; pattern.len()];
            target
                .read_memory(0xA000_1000, size, count, &mut readback)
                .unwrap();
            assert_eq!(readback, pattern);
        }
    }

    fn break_unit_core() -> SharedCore {
        let core = running_core(0x8000_0100);
        {
            let mut sim = core.0.borrow_mut();
            sim.mem.insert(EJTAG_DCR, EJTAG_DCR_IB | EJTAG_DCR_DB);
            sim.mem.insert(EJTAG_IBS, 2 << 24);
            sim.mem.insert(EJTAG_DBS, 1 << 24);
        }
        core
    }

    #[test]
    fn break_unit_is_discovered_once() {
        let core = break_unit_core();
        let mut target = make_target(&core, TargetConfig::default());
        target.examine().unwrap();
        target.halt(HALT_TIMEOUT).unwrap();

        assert!(target.bp_scanned);
        assert_eq!(target.num_inst_bpoints, 2);
        assert_eq!(target.num_inst_bpoints_avail(), 2);
        assert_eq!(target.num_data_bpoints, 1);
        assert_eq!(target.inst_break_list()[1].reg_address, EJTAG_IBA1 + 0x100);
        // The status registers were cleared after the scan.
        assert_eq!(core.0.borrow().mem.get(&EJTAG_IBS), Some(&0));
        assert_eq!(core.0.borrow().mem.get(&EJTAG_DBS), Some(&0));
    }

    #[test]
    fn hard_breakpoint_programs_a_comparator() {
        let core = break_unit_core();
        let mut target = make_target(&core, TargetConfig::default());
        target.examine().unwrap();
        target.halt(HALT_TIMEOUT).unwrap();

        target
            .add_breakpoint(0x8000_2000, 4, BreakpointType::Hard)
            .unwrap();
        assert_eq!(target.num_inst_bpoints_avail(), 1);
        {
            let sim = core.0.borrow();
            assert_eq!(sim.mem.get(&EJTAG_IBA1), Some(&0x8000_2000));
            assert_eq!(sim.mem.get(&(EJTAG_IBA1 + 0x08)), Some(&0));
            assert_eq!(sim.mem.get(&(EJTAG_IBA1 + 0x18)), Some(&1));
        }
        // Armed breakpoint reads back exactly what was programmed.
        assert_eq!(target.inst_break_list()[0].bp_value, 0x8000_2000);

        target.remove_breakpoint(0x8000_2000).unwrap();
        assert_eq!(target.num_inst_bpoints_avail(), 2);
        assert_eq!(core.0.borrow().mem.get(&(EJTAG_IBA1 + 0x18)), Some(&0));

        // Removing an uninstalled breakpoint is a no-op.
        target.remove_breakpoint(0x8000_2000).unwrap();
        assert_eq!(target.num_inst_bpoints_avail(), 2);
    }

    #[test]
    fn breakpoint_slots_are_a_bounded_pool() {
        let core = break_unit_core();
        let mut target = make_target(&core, TargetConfig::default());
        target.examine().unwrap();
        target.halt(HALT_TIMEOUT).unwrap();

        target.add_breakpoint(0x1000, 4, BreakpointType::Hard).unwrap();
        target.add_breakpoint(0x2000, 4, BreakpointType::Hard).unwrap();
        assert!(matches!(
            target.add_breakpoint(0x3000, 4, BreakpointType::Hard),
            Err(Error::ResourceNotAvailable(_))
        ));
        assert_eq!(
            target.num_inst_bpoints_avail(),
            target.inst_break_list().iter().filter(|c| !c.used).count()
        );
    }

    #[test]
    fn soft_breakpoint_patches_sdbbp() {
        let core = running_core(0x8000_0100);
        core.0.borrow_mut().mem.insert(0x8000_5000, 0x2484_0001);

        let mut target = make_target(&core, TargetConfig::default());
        target.examine().unwrap();
        target.halt(HALT_TIMEOUT).unwrap();

        target
            .add_breakpoint(0x8000_5000, 4, BreakpointType::Soft)
            .unwrap();
        assert_eq!(
            core.0.borrow().mem.get(&0x8000_5000),
            Some(&super::MIPS32_SDBBP)
        );

        target.remove_breakpoint(0x8000_5000).unwrap();
        assert_eq!(core.0.borrow().mem.get(&0x8000_5000), Some(&0x2484_0001));
    }

    #[test]
    fn watchpoints_use_the_data_comparators() {
        let core = break_unit_core();
        let mut target = make_target(&core, TargetConfig::default());
        target.examine().unwrap();
        target.halt(HALT_TIMEOUT).unwrap();

        target.add_watchpoint(0xA000_0040).unwrap();
        {
            let sim = core.0.borrow();
            assert_eq!(sim.mem.get(&EJTAG_DBA1), Some(&0xA000_0040));
            assert_eq!(sim.mem.get(&(EJTAG_DBA1 + 0x18)), Some(&1));
        }
        assert!(matches!(
            target.add_watchpoint(0xA000_0080),
            Err(Error::ResourceNotAvailable(_))
        ));

        target.remove_watchpoint(0xA000_0040).unwrap();
        assert_eq!(core.0.borrow().mem.get(&(EJTAG_DBA1 + 0x18)), Some(&0));
        target.remove_watchpoint(0xA000_0040).unwrap();
    }

    fn algorithm_config() -> TargetConfig {
        TargetConfig {
            working_area: Some(WorkingAreaConfig {
                base: 0x8000_8000,
                size: 0x400,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn checksum_runs_the_crc_algorithm_on_the_target() {
        let core = running_core(0x8000_0100);
        let mut target = make_target(&core, algorithm_config());
        target.examine().unwrap();
        target.halt(HALT_TIMEOUT).unwrap();

        let data = b"123456789";
        target
            .write_memory(0xA000_2000, AccessSize::Byte, data.len() as u32, data)
            .unwrap();

        let sp_before = target.read_core_reg(29).unwrap();
        let checksum = target.checksum_memory(0xA000_2000, data.len() as u32).unwrap();

        // The target-side loop computes the same CRC the host does.
        assert_eq!(checksum, crc32_checksum(data));
        assert_eq!(checksum, 0x0376_E6E7);

        // The register context survives the algorithm.
        assert_eq!(target.read_core_reg(29).unwrap(), sp_before);
        assert_eq!(target.status(), CoreStatus::Halted);
    }

    #[test]
    fn blank_check_reports_erased_and_dirty_memory() {
        let core = running_core(0x8000_0100);
        let mut target = make_target(&core, algorithm_config());
        target.examine().unwrap();
        target.halt(HALT_TIMEOUT).unwrap();

        target
            .write_memory(0xA000_3000, AccessSize::Byte, 4, &[0xFF; 4])
            .unwrap();
        assert_eq!(target.blank_check_memory(0xA000_3000, 4).unwrap(), 0xFF);

        target
            .write_memory(0xA000_3004, AccessSize::Byte, 4, &[0xFF, 0x7F, 0xFF, 0xFF])
            .unwrap();
        assert_ne!(target.blank_check_memory(0xA000_3004, 4).unwrap(), 0xFF);
    }

    #[test]
    fn checksum_without_working_area_is_resource_not_available() {
        let core = running_core(0x8000_0100);
        let mut target = make_target(&core, TargetConfig::default());
        target.examine().unwrap();
        target.halt(HALT_TIMEOUT).unwrap();

        assert!(matches!(
            target.checksum_memory(0xA000_0000, 4),
            Err(Error::ResourceNotAvailable(_))
        ));
    }

    #[test]
    fn run_algorithm_rejects_unknown_registers() {
        let core = running_core(0x8000_0100);
        let mut target = make_target(&core, TargetConfig::default());
        target.examine().unwrap();
        target.halt(HALT_TIMEOUT).unwrap();

        let mut regs = [RegParam {
            name: "x99",
            direction: ParamDirection::ToTarget,
            value: 0,
        }];
        assert!(matches!(
            target.run_algorithm(&mut [], &mut regs, 0x8000_8000, 0x8000_8004, HALT_TIMEOUT),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn not_halted_guards() {
        let core = running_core(0x8000_0100);
        let mut target = make_target(&core, TargetConfig::default());
        target.examine().unwrap();

        let mut buffer = [0u8; 4];
        assert!(matches!(
            target.read_memory(0, AccessSize::Word, 1, &mut buffer),
            Err(Error::NotHalted)
        ));
        assert!(matches!(
            target.resume(true, 0, false, false),
            Err(Error::NotHalted)
        ));
        assert!(matches!(target.step(true, 0, false), Err(Error::NotHalted)));
    }

    #[test]
    fn virt2phys_maps_the_kseg_windows() {
        let core = running_core(0x8000_0100);
        let mut target = make_target(&core, TargetConfig::default());
        assert_eq!(target.virt2phys(0x8000_1234).unwrap(), 0x0000_1234);
        assert_eq!(target.virt2phys(0xA000_1234).unwrap(), 0x0000_1234);
        assert_eq!(target.virt2phys(0x0040_0000).unwrap(), 0x0040_0000);
        assert!(!target.mmu_enabled().unwrap());
    }
}
