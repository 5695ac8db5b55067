//! Cortex-A9 target support.
//!
//! Run control, register and memory access for one ARMv7-A core behind an
//! ADIv5 DAP, built on the instruction-injection DPM. The debug registers
//! live in the CoreSight CPUDBG block; memory traffic goes through the
//! memory AP while debug-register traffic goes through the debug AP, and
//! the AP selector is restored around every operation.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::debug_regs::*;
use super::dpm::{Dpm, DSCR_INSTR_COMP};
use super::instructions::{
    build_bkpt, build_mcr, build_mov, build_mrc, build_mrs, build_msr, build_t_bkpt,
};
use super::mmu::{self, AddressMode};
use super::{with_ap, ArmError, DapAccess, DEBUG_AP, MEMORY_AP};
use crate::config::TargetConfig;
use crate::core::memory_mapped_registers::MemoryMappedRegister;
use crate::core::{
    breakpoints::{Breakpoint, BreakpointType, ComparatorSlot, SlotKind, SOFT_BREAKPOINT_SET},
    AccessSize, CoreEvent, CoreInterface, CoreStatus, DebugReason, GdbRegister, MemParam,
    ParamDirection, RegParam, RegisterCache, RegisterDescription, WorkingAreaPool,
};
use crate::error::Error;

/// Shift applied to the core id in the OMAP-style debug-base layout.
pub const CORTEX_A9_PADDRDBG_CPU_SHIFT: u32 = 13;

/// Budget for run-control handshakes (halt acknowledge, restart
/// acknowledge, step completion).
const RUN_CONTROL_TIMEOUT: Duration = Duration::from_secs(1);

/// Cortex-A9 caches have a fixed 64-byte line.
const CACHE_LINE_BYTES: u32 = 64;

const DSCR_CORE_HALTED: u32 = 1 << 0;
const DSCR_CORE_RESTARTED: u32 = 1 << 1;
const DSCR_ITR_EN: u32 = 1 << 13;
const DSCR_HALT_DBG_MODE: u32 = 1 << 14;
const DSCR_DTR_TX_FULL: u32 = 1 << 29;

const DRCR_HALT: u32 = 1 << 0;
const DRCR_RESTART: u32 = 1 << 1;
const DRCR_CLEAR_EXCEPTIONS: u32 = 1 << 2;

/// Register numbers of the facade-visible register set.
pub const ARM_REG_PC: usize = 15;
/// CPSR register number.
pub const ARM_REG_CPSR: usize = 16;

#[rustfmt::skip]
const AARCH32_REGISTERS: [RegisterDescription; 17] = [
    RegisterDescription { name: "r0", size: 32 },
    RegisterDescription { name: "r1", size: 32 },
    RegisterDescription { name: "r2", size: 32 },
    RegisterDescription { name: "r3", size: 32 },
    RegisterDescription { name: "r4", size: 32 },
    RegisterDescription { name: "r5", size: 32 },
    RegisterDescription { name: "r6", size: 32 },
    RegisterDescription { name: "r7", size: 32 },
    RegisterDescription { name: "r8", size: 32 },
    RegisterDescription { name: "r9", size: 32 },
    RegisterDescription { name: "r10", size: 32 },
    RegisterDescription { name: "r11", size: 32 },
    RegisterDescription { name: "r12", size: 32 },
    RegisterDescription { name: "sp", size: 32 },
    RegisterDescription { name: "lr", size: 32 },
    RegisterDescription { name: "pc", size: 32 },
    RegisterDescription { name: "cpsr", size: 32 },
];

/// Execution state decoded from CPSR.J/T.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmCoreState {
    /// A32 instruction set.
    Arm,
    /// T32 instruction set.
    Thumb,
    /// ThumbEE variant.
    ThumbEe,
    /// Jazelle bytecode state; cannot be resumed into.
    Jazelle,
}

impl ArmCoreState {
    fn from_cpsr(cpsr: u32) -> Self {
        let t = cpsr & (1 << 5) != 0;
        let j = cpsr & (1 << 24) != 0;
        match (j, t) {
            (false, false) => ArmCoreState::Arm,
            (false, true) => ArmCoreState::Thumb,
            (true, true) => ArmCoreState::ThumbEe,
            (true, false) => ArmCoreState::Jazelle,
        }
    }
}

/// Cache geometry parsed from the CP15 cache type register with the
/// ARMv4/5 layout. The A9 reports CCSIDR-style geometry instead, so this
/// stays display-only; nothing routes through it.
#[derive(Debug, Clone, Copy)]
pub struct CacheInfo {
    /// Raw cache type register value.
    pub ctype: u32,
    /// Separate I/D caches.
    pub separate: bool,
    /// D-cache (or unified) line length in bytes.
    pub d_linelen: u32,
    /// I-cache line length in bytes.
    pub i_linelen: u32,
}

impl CacheInfo {
    fn from_ctypr(ctype: u32) -> Self {
        let dsize = (ctype >> 12) & 0xFFF;
        let isize = ctype & 0xFFF;
        Self {
            ctype,
            separate: ctype & (1 << 24) != 0,
            d_linelen: 8 << (dsize & 0x3),
            i_linelen: 8 << (isize & 0x3),
        }
    }
}

/// An armed data watchpoint.
#[derive(Debug, Clone, Copy)]
pub struct ArmWatchpoint {
    /// Watched address.
    pub address: u32,
    /// Watched width in bytes.
    pub length: u32,
    /// Claimed watchpoint slot plus one; 0 when disarmed.
    pub set: u32,
}

/// One Cortex-A9 core behind an ADIv5 DAP.
pub struct CortexA9 {
    dap: Box<dyn DapAccess>,
    config: TargetConfig,
    debug_base: u32,
    dpm: Dpm,
    examined: bool,

    state: CoreStatus,
    debug_reason: DebugReason,
    core_state: ArmCoreState,
    regs: RegisterCache,
    cpudbg_dscr: u32,

    cp15_control: u32,
    mmu_on: bool,
    dcache_on: bool,
    icache_on: bool,
    cache_info: Option<CacheInfo>,
    current_address_mode: AddressMode,

    brp_num: usize,
    brp_num_context: usize,
    brp_num_available: usize,
    brp_list: Vec<ComparatorSlot>,
    wrp_num: usize,
    wrp_list: Vec<ComparatorSlot>,
    breakpoints: Vec<Breakpoint>,
    watchpoints: Vec<ArmWatchpoint>,

    working_areas: Option<WorkingAreaPool>,
    events: VecDeque<CoreEvent>,
    target_requests: VecDeque<u32>,
}

impl CortexA9 {
    /// Bind a target object to a DAP. No hardware is touched until
    /// [`CoreInterface::examine`].
    pub fn new(dap: Box<dyn DapAccess>, config: TargetConfig) -> Result<Self, Error> {
        if config.core_id > 3 {
            return Err(Error::InvalidArgument("cortex_a9 supports up to 4 cores"));
        }
        let debug_base = config.debug_base.unwrap_or(
            0x8000_0000 | ((config.core_id as u32 & 0x3) << CORTEX_A9_PADDRDBG_CPU_SHIFT),
        );
        let working_areas = config
            .working_area
            .map(|wa| WorkingAreaPool::new(wa.base, wa.size));
        Ok(Self {
            dap,
            config,
            debug_base,
            dpm: Dpm::new(debug_base, 0),
            examined: false,
            state: CoreStatus::Unknown,
            debug_reason: DebugReason::NotHalted,
            core_state: ArmCoreState::Arm,
            regs: RegisterCache::new(&AARCH32_REGISTERS),
            cpudbg_dscr: 0,
            cp15_control: 0,
            mmu_on: false,
            dcache_on: false,
            icache_on: false,
            cache_info: None,
            current_address_mode: AddressMode::Any,
            brp_num: 0,
            brp_num_context: 0,
            brp_num_available: 0,
            brp_list: Vec::new(),
            wrp_num: 0,
            wrp_list: Vec::new(),
            breakpoints: Vec::new(),
            watchpoints: Vec::new(),
            working_areas,
            events: VecDeque::new(),
            target_requests: VecDeque::new(),
        })
    }

    /// The discovered (or configured) CPUDBG base address.
    pub fn debug_base(&self) -> u32 {
        self.debug_base
    }

    /// Free hardware breakpoint slots.
    pub fn brp_num_available(&self) -> usize {
        self.brp_num_available
    }

    /// Mirror of the hardware breakpoint slot table.
    pub fn brp_list(&self) -> &[ComparatorSlot] {
        &self.brp_list
    }

    /// Execution state decoded from the last CPSR read.
    pub fn core_state(&self) -> ArmCoreState {
        self.core_state
    }

    /// Why the core last entered debug state.
    pub fn debug_reason(&self) -> DebugReason {
        self.debug_reason
    }

    /// Words received from the target over the DCC.
    pub fn take_target_request(&mut self) -> Option<u32> {
        self.target_requests.pop_front()
    }

    fn dscr_address(&self) -> Result<u32, ArmError> {
        Ok(Dbgdscr::get_mmio_address(self.debug_base)?)
    }

    fn read_dscr(&mut self) -> Result<u32, ArmError> {
        let address = self.dscr_address()?;
        self.dap.read_word_32(address)
    }

    fn write_dscr(&mut self, value: u32) -> Result<(), ArmError> {
        let address = self.dscr_address()?;
        self.dap.write_word_32(address, value)
    }

    fn write_drcr(&mut self, value: u32) -> Result<(), ArmError> {
        let address = Dbgdrcr::get_mmio_address(self.debug_base)?;
        self.dap.write_word_32(address, value)
    }

    /// First-time silicon probe: identification registers and breakpoint
    /// slot discovery.
    fn examine_first(&mut self) -> Result<(), Error> {
        let saved = self.dap.selected_ap();
        self.dap.select_ap(DEBUG_AP)?;
        let result = self.examine_first_inner();
        let restored = self.dap.select_ap(saved);
        result?;
        restored?;
        Ok(())
    }

    fn examine_first_inner(&mut self) -> Result<(), Error> {
        // The first access may happen before the debug port settled; read
        // CPUID twice and keep the second value.
        let cpuid_addr = Cpuid::get_mmio_address(self.debug_base).map_err(ArmError::from)?;
        let _ = self.dap.read_word_32(cpuid_addr)?;
        let cpuid = self.dap.read_word_32(cpuid_addr)?;
        let ctypr = self
            .dap
            .read_word_32(Ctypr::get_mmio_address(self.debug_base).map_err(ArmError::from)?)?;
        let ttypr = self
            .dap
            .read_word_32(Ttypr::get_mmio_address(self.debug_base).map_err(ArmError::from)?)?;
        let didr = self
            .dap
            .read_word_32(Dbgdidr::get_mmio_address(self.debug_base).map_err(ArmError::from)?)?;

        tracing::debug!("cpuid = {:#010x}", cpuid);
        tracing::debug!("ctypr = {:#010x}", ctypr);
        tracing::debug!("ttypr = {:#010x}", ttypr);
        tracing::debug!("didr = {:#010x}", didr);

        self.dpm = Dpm::new(self.debug_base, didr);

        let didr = Dbgdidr(didr);
        self.brp_num = didr.brps() as usize + 1;
        self.brp_num_context = didr.ctx_cmps() as usize + 1;
        self.brp_num_available = self.brp_num;
        self.brp_list = (0..self.brp_num)
            .map(|i| ComparatorSlot {
                number: i,
                kind: if i < self.brp_num - self.brp_num_context {
                    SlotKind::Normal
                } else {
                    SlotKind::Context
                },
                ..Default::default()
            })
            .collect();

        self.wrp_num = didr.wrps() as usize + 1;
        self.wrp_list = (0..self.wrp_num)
            .map(|i| ComparatorSlot {
                number: i,
                ..Default::default()
            })
            .collect();

        tracing::info!(
            "configured {} hw breakpoints, {} watchpoints",
            self.brp_num,
            self.wrp_num
        );

        self.examined = true;
        Ok(())
    }

    /// Unlock the debug registers and clear the sticky power-down flag.
    fn init_debug_access(&mut self) -> Result<(), Error> {
        let saved = self.dap.selected_ap();
        self.dap.select_ap(DEBUG_AP)?;
        let result = self.init_debug_access_inner();
        let restored = self.dap.select_ap(saved);
        result?;
        restored?;
        self.poll()?;
        Ok(())
    }

    fn init_debug_access_inner(&mut self) -> Result<(), Error> {
        let lock_addr = Dbglockaccess::get_mmio_address(self.debug_base).map_err(ArmError::from)?;

        // The debug port might be uninitialised, so try twice.
        if self.dap.write_word_32(lock_addr, LOCK_ACCESS_KEY).is_err() {
            self.dap.write_word_32(lock_addr, LOCK_ACCESS_KEY)?;
            tracing::warn!("unlocking debug access failed on first, succeeded on second try");
        }

        // Clear the sticky power-down status bit to enable access to the
        // registers in the core power domain.
        let prsr_addr = Dbgprsr::get_mmio_address(self.debug_base).map_err(ArmError::from)?;
        let _ = self.dap.read_word_32(prsr_addr)?;
        Ok(())
    }

    /// Read one core register from the target. The AP selector must point
    /// at the debug AP.
    fn read_coreregister_u32(&mut self, regnum: usize) -> Result<u32, ArmError> {
        let dpm = self.dpm;
        let dap = self.dap.as_mut();
        match regnum {
            0..=14 => {
                // Rn to DCCTX: MCR p14, 0, Rn, c0, c5, 0
                dpm.instr_read_data_dcc(dap, build_mcr(14, 0, regnum as u16, 0, 5, 0))
            }
            15 => {
                // MOV r0, pc, then r0 through the DCC; the captured value
                // carries the pipeline offset.
                let value = dpm.instr_read_data_r0(dap, build_mov(0, 15))?;
                let offset = match self.core_state {
                    ArmCoreState::Arm => 8,
                    _ => 4,
                };
                Ok(value.wrapping_sub(offset))
            }
            16 | 17 => {
                // MRS r0, CPSR / SPSR, then r0 through the DCC.
                dpm.instr_read_data_r0(dap, build_mrs(0, regnum == 17))
            }
            _ => Err(ArmError::InvalidRegister(regnum)),
        }
    }

    /// Write one core register on the target. The AP selector must point
    /// at the debug AP. Returns whether r0 was clobbered as a staging
    /// register.
    fn write_coreregister_u32(&mut self, regnum: usize, value: u32) -> Result<bool, ArmError> {
        let dpm = self.dpm;
        let dap = self.dap.as_mut();
        match regnum {
            0..=14 => {
                // DCCRX to Rn: MRC p14, 0, Rn, c0, c5, 0
                dpm.instr_write_data_dcc(dap, build_mrc(14, 0, regnum as u16, 0, 5, 0), value)?;
                Ok(regnum == 0)
            }
            15 => {
                // `mov pc, r0` rather than `bx r0`: BX is unpredictable in
                // debug state.
                dpm.instr_write_data_r0(dap, build_mov(15, 0), value)?;
                Ok(true)
            }
            16 => {
                dpm.instr_write_data_r0(dap, build_msr(0, 0xF, false), value)?;
                // Prefetch flush after modifying the execution state.
                dpm.instr_cpsr_sync(dap)?;
                self.core_state = ArmCoreState::from_cpsr(value);
                Ok(true)
            }
            17 => {
                dpm.instr_write_data_r0(dap, build_msr(0, 0xF, true), value)?;
                Ok(true)
            }
            _ => Err(ArmError::InvalidRegister(regnum)),
        }
    }

    /// Capture the full register context after the core entered debug
    /// state, enable the ITR and decode the entry reason.
    fn debug_entry(&mut self) -> Result<(), Error> {
        tracing::debug!("debug entry, dscr = {:#010x}", self.cpudbg_dscr);

        let dscr = self.read_dscr()?;
        self.write_dscr(dscr | DSCR_ITR_EN)?;

        self.debug_reason = Dbgdscr(dscr).debug_reason();

        if self.debug_reason == DebugReason::Watchpoint {
            let wfar = self
                .dap
                .read_word_32(Dbgwfar::get_mmio_address(self.debug_base).map_err(ArmError::from)?)?;
            tracing::debug!("watchpoint fault address {:#010x}", wfar);
        }

        let dpm = self.dpm;
        dpm.prepare(self.dap.as_mut())?;

        // r0 first: every r0-staged transfer after this clobbers it.
        let r0 = self.read_coreregister_u32(0)?;
        self.regs.update_from_target(0, r0);

        // CPSR before PC, so the PC pipeline offset uses the right state.
        let cpsr = self.read_coreregister_u32(ARM_REG_CPSR)?;
        self.core_state = ArmCoreState::from_cpsr(cpsr);
        self.regs.update_from_target(ARM_REG_CPSR, cpsr);

        for regnum in 1..=14 {
            let value = self.read_coreregister_u32(regnum)?;
            self.regs.update_from_target(regnum, value);
        }

        let pc = self.read_coreregister_u32(ARM_REG_PC)?;
        self.regs.update_from_target(ARM_REG_PC, pc);

        dpm.finish(self.dap.as_mut())?;

        self.post_debug_entry()?;
        Ok(())
    }

    /// Refresh the CP15 system-control mirror and, once, the cache
    /// identification.
    fn post_debug_entry(&mut self) -> Result<(), Error> {
        let dpm = self.dpm;

        // MRC p15,0,r0,c1,c0,0: read the system control register.
        self.cp15_control = dpm.instr_read_data_r0(self.dap.as_mut(), build_mrc(15, 0, 0, 1, 0, 0))?;
        tracing::debug!("cp15_control_reg: {:#010x}", self.cp15_control);

        if self.cache_info.is_none() {
            // MRC p15,0,r0,c0,c0,1: read the cache type register.
            let ctypr = dpm.instr_read_data_r0(self.dap.as_mut(), build_mrc(15, 0, 0, 0, 0, 1))?;
            let info = CacheInfo::from_ctypr(ctypr);
            tracing::debug!("cache type: {:?}", info);
            self.cache_info = Some(info);
        }

        self.mmu_on = self.cp15_control & 0x1 != 0;
        self.dcache_on = self.cp15_control & 0x4 != 0;
        self.icache_on = self.cp15_control & 0x1000 != 0;
        Ok(())
    }

    fn poll_inner(&mut self) -> Result<CoreStatus, Error> {
        let dscr = self.read_dscr()?;
        self.cpudbg_dscr = dscr;
        let prev_state = self.state;

        if dscr & (DSCR_CORE_HALTED | DSCR_CORE_RESTARTED)
            == (DSCR_CORE_HALTED | DSCR_CORE_RESTARTED)
        {
            if prev_state != CoreStatus::Halted {
                tracing::debug!("target halted");
                self.state = CoreStatus::Halted;
                match prev_state {
                    CoreStatus::Running | CoreStatus::Reset | CoreStatus::Unknown => {
                        self.debug_entry()?;
                        self.events.push_back(CoreEvent::Halted);
                    }
                    CoreStatus::DebugRunning => {
                        self.debug_entry()?;
                        self.events.push_back(CoreEvent::DebugHalted);
                    }
                    CoreStatus::Halted => {}
                }
            }
        } else if dscr & (DSCR_CORE_HALTED | DSCR_CORE_RESTARTED) == DSCR_CORE_RESTARTED {
            self.state = CoreStatus::Running;
        } else {
            tracing::debug!("unknown target state, dscr = {:#010x}", dscr);
            self.state = CoreStatus::Unknown;
        }

        Ok(self.state)
    }

    /// Flush dirty registers back to the target and, when requested,
    /// reprogram the armed hardware breakpoints.
    fn restore_context(&mut self, bpwp: bool) -> Result<(), Error> {
        let dpm = self.dpm;

        if bpwp {
            for bp in &self.breakpoints {
                if bp.is_set() && bp.bp_type == BreakpointType::Hard {
                    let slot = (bp.set - 1) as usize;
                    let mirror = self.brp_list[slot];
                    dpm.bpwp_enable(self.dap.as_mut(), slot, mirror.value, mirror.control)?;
                }
            }
        }

        let mut r0_clobbered = false;

        // CPSR first: it selects the register bank the rest lands in.
        if self.regs.get(ARM_REG_CPSR)?.is_dirty() {
            let value = self.regs.get(ARM_REG_CPSR)?.value();
            r0_clobbered |= self.write_coreregister_u32(ARM_REG_CPSR, value)?;
            self.regs.mark_clean(ARM_REG_CPSR);
        }

        for regnum in 1..=14 {
            if self.regs.get(regnum)?.is_dirty() {
                let value = self.regs.get(regnum)?.value();
                self.write_coreregister_u32(regnum, value)?;
                self.regs.mark_clean(regnum);
            }
        }

        if self.regs.get(ARM_REG_PC)?.is_dirty() {
            let value = self.regs.get(ARM_REG_PC)?.value();
            r0_clobbered |= self.write_coreregister_u32(ARM_REG_PC, value)?;
            self.regs.mark_clean(ARM_REG_PC);
        }

        // r0 goes last: it staged every transfer above.
        if self.regs.get(0)?.is_dirty() || (r0_clobbered && self.regs.get(0)?.is_valid()) {
            let value = self.regs.get(0)?.value();
            self.write_coreregister_u32(0, value)?;
            self.regs.mark_clean(0);
        }

        Ok(())
    }

    /// Arm a breakpoint record. `matchmode` 0 is an exact IVA match; 0x04
    /// is the IVA-mismatch mode `step` relies on.
    fn set_breakpoint_record(
        &mut self,
        bp: &mut Breakpoint,
        matchmode: u8,
    ) -> Result<(), Error> {
        if bp.is_set() {
            tracing::warn!("breakpoint already set");
            return Ok(());
        }

        match bp.bp_type {
            BreakpointType::Hard => {
                let Some(slot) = self.brp_list.iter().position(|s| !s.used) else {
                    tracing::error!("cannot find free breakpoint register pair");
                    return Err(Error::ResourceNotAvailable("breakpoint register pair"));
                };
                bp.set = slot as u32 + 1;

                let byte_addr_select: u32 = if bp.length == 2 {
                    3 << (bp.address & 0x2)
                } else {
                    0xF
                };
                let control =
                    ((matchmode as u32 & 0x7) << 20) | (byte_addr_select << 5) | (3 << 1) | 1;

                self.brp_list[slot].used = true;
                self.brp_list[slot].value = bp.address & 0xFFFF_FFFC;
                self.brp_list[slot].control = control;

                let mirror = self.brp_list[slot];
                let dpm = self.dpm;
                with_ap(self.dap.as_mut(), DEBUG_AP, |dap| {
                    dpm.bpwp_enable(dap, slot, mirror.value, mirror.control)
                })?;
                tracing::debug!(
                    "brp {} control {:#010x} value {:#010x}",
                    slot,
                    mirror.control,
                    mirror.value
                );
            }
            BreakpointType::Soft => {
                let address = bp.address & 0xFFFF_FFFE;
                let mut orig = [0u8; 4];
                self.read_memory(
                    address,
                    AccessSize::from_length(bp.length)?,
                    1,
                    &mut orig[..bp.length as usize],
                )?;
                bp.orig_instr = orig;

                let code: [u8; 4] = if bp.length == 2 {
                    let patch = build_t_bkpt(0x11).to_le_bytes();
                    [patch[0], patch[1], 0, 0]
                } else {
                    build_bkpt(0x11).to_le_bytes()
                };
                self.write_memory(
                    address,
                    AccessSize::from_length(bp.length)?,
                    1,
                    &code[..bp.length as usize],
                )?;
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
                if slot >= self.brp_num {
                    tracing::debug!("invalid breakpoint slot number in breakpoint");
                    return Ok(());
                }
                self.brp_list[slot].used = false;
                self.brp_list[slot].value = 0;
                self.brp_list[slot].control = 0;
                let dpm = self.dpm;
                let vr = Dbgbvr::get_mmio_address(self.debug_base).map_err(ArmError::from)? + 4 * slot as u32;
                with_ap(self.dap.as_mut(), DEBUG_AP, |dap| {
                    dpm.bpwp_disable(dap, slot)?;
                    dap.write_word_32(vr, 0)
                })?;
            }
            BreakpointType::Soft => {
                let address = bp.address & 0xFFFF_FFFE;
                let orig = bp.orig_instr;
                self.write_memory(
                    address,
                    AccessSize::from_length(bp.length)?,
                    1,
                    &orig[..bp.length as usize],
                )?;
            }
        }
        bp.set = 0;
        Ok(())
    }

    /// Read the active translation-table base for the latched address
    /// mode.
    fn get_ttb(&mut self) -> Result<u32, Error> {
        let dpm = self.dpm;
        let kernel = match self.current_address_mode {
            AddressMode::Kernel => true,
            AddressMode::User => false,
            AddressMode::Any => {
                // Fall back on the mode the core halted in.
                let cpsr = self.regs.get(ARM_REG_CPSR)?;
                if !cpsr.is_valid() {
                    return Err(Error::Fail("cannot choose a TTB without a valid CPSR"));
                }
                match cpsr.value() & 0x1F {
                    0x10 => false, // User
                    0x13 => true,  // Supervisor
                    _ => return Err(Error::Fail("don't know how to get ttb for current mode")),
                }
            }
        };

        // MRC p15,0,r0,c2,c0,{0,1}: TTBR0 for user space, TTBR1 for the
        // kernel.
        let op2 = kernel as u8;
        let ttb = dpm.instr_read_data_r0(self.dap.as_mut(), build_mrc(15, 0, 0, 2, 0, op2))?;
        Ok(ttb & 0xFFFF_C000)
    }

    /// Invalidate I/D cache lines covering a just-written physical range.
    /// Only meaningful while halted; the walk uses CPU maintenance ops
    /// carried through the DPM.
    fn invalidate_caches_for_write(&mut self, address: u32, len: u32) -> Result<(), Error> {
        if !(self.icache_on || self.dcache_on) {
            return Ok(());
        }

        let saved = self.dap.selected_ap();
        self.dap.select_ap(DEBUG_AP)?;
        let result = self.invalidate_caches_inner(address, len);
        let restored = self.dap.select_ap(saved);
        result?;
        restored?;
        Ok(())
    }

    fn invalidate_caches_inner(&mut self, address: u32, len: u32) -> Result<(), Error> {
        let dpm = self.dpm;
        dpm.prepare(self.dap.as_mut())?;

        // The walk will not work with the MMU active: the maintenance ops
        // take virtual addresses.
        if self.icache_on {
            // ICIMVAU: MCR p15, 0, r0, c7, c5, 1
            let mut line = address;
            while line < address.saturating_add(len) {
                dpm.instr_write_data_r0(self.dap.as_mut(), build_mcr(15, 0, 0, 7, 5, 1), line)?;
                line += CACHE_LINE_BYTES;
            }
        }

        if self.dcache_on {
            // DCIMVAC: MCR p15, 0, r0, c7, c6, 1
            let mut line = address;
            while line < address.saturating_add(len) {
                dpm.instr_write_data_r0(self.dap.as_mut(), build_mcr(15, 0, 0, 7, 6, 1), line)?;
                line += CACHE_LINE_BYTES;
            }
        }

        dpm.finish(self.dap.as_mut())?;
        Ok(())
    }

    fn wait_for_halt(&mut self, timeout: Duration) -> Result<(), Error> {
        let start = Instant::now();
        loop {
            let dscr = self.read_dscr()?;
            if dscr & DSCR_CORE_HALTED != 0 {
                return Ok(());
            }
            if start.elapsed() > timeout {
                tracing::error!("timeout waiting for halt");
                return Err(Error::Timeout);
            }
        }
    }
}

impl CoreInterface for CortexA9 {
    fn examine(&mut self) -> Result<(), Error> {
        // Don't re-probe hardware after each reset.
        if !self.examined {
            self.examine_first()?;
        }
        self.init_debug_access()
    }

    fn status(&self) -> CoreStatus {
        self.state
    }

    fn poll(&mut self) -> Result<CoreStatus, Error> {
        let saved = self.dap.selected_ap();
        self.dap.select_ap(DEBUG_AP)?;
        let result = self.poll_inner();
        let restored = self.dap.select_ap(saved);
        let state = result?;
        restored?;
        Ok(state)
    }

    fn halt(&mut self, timeout: Duration) -> Result<(), Error> {
        if self.state.is_halted() {
            return Ok(());
        }

        let saved = self.dap.selected_ap();
        self.dap.select_ap(DEBUG_AP)?;
        let result = (|| -> Result<(), Error> {
            // Ask the core to halt, then enter halting debug mode.
            self.write_drcr(DRCR_HALT)?;
            let dscr = self.read_dscr()?;
            self.write_dscr(dscr | DSCR_HALT_DBG_MODE)?;
            self.wait_for_halt(timeout)?;
            self.debug_reason = DebugReason::DbgRq;
            Ok(())
        })();
        let restored = self.dap.select_ap(saved);
        result?;
        restored?;

        // Pick up the halted state and run debug entry.
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
            return Err(Error::NotHalted);
        }

        if !debug_execution {
            if let Some(pool) = &mut self.working_areas {
                pool.free_all();
            }
        }

        let saved = self.dap.selected_ap();
        self.dap.select_ap(DEBUG_AP)?;
        let result = (|| -> Result<u32, Error> {
            let mut resume_pc = if current {
                self.regs.get(ARM_REG_PC)?.value()
            } else {
                address
            };

            // Keep the return address legal for the state we resume into.
            match self.core_state {
                ArmCoreState::Arm => resume_pc &= 0xFFFF_FFFC,
                ArmCoreState::Thumb | ArmCoreState::ThumbEe => resume_pc |= 0x1,
                ArmCoreState::Jazelle => {
                    tracing::error!("how do I resume into Jazelle state?");
                    return Err(ArmError::JazelleResume.into());
                }
            }
            tracing::debug!("resume pc = {:#010x}", resume_pc);
            self.regs.set(ARM_REG_PC, resume_pc)?;

            self.restore_context(handle_breakpoints)?;

            // Restart with ITR disabled and sticky exceptions cleared.
            let dscr = self.read_dscr()?;
            if dscr & DSCR_INSTR_COMP == 0 {
                tracing::error!("DSCR InstrCompl must be set before leaving debug!");
            }
            self.write_dscr(dscr & !DSCR_ITR_EN)?;
            self.write_drcr(DRCR_RESTART | DRCR_CLEAR_EXCEPTIONS)?;

            let start = Instant::now();
            loop {
                let dscr = self.read_dscr()?;
                if dscr & DSCR_CORE_RESTARTED != 0 {
                    break;
                }
                if start.elapsed() > RUN_CONTROL_TIMEOUT {
                    tracing::error!("timeout waiting for resume");
                    return Err(Error::Timeout);
                }
            }
            Ok(resume_pc)
        })();
        let restored = self.dap.select_ap(saved);
        let resume_pc = result?;
        restored?;

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

    fn step(
        &mut self,
        current: bool,
        address: u32,
        _handle_breakpoints: bool,
    ) -> Result<(), Error> {
        if !self.state.is_halted() {
            tracing::warn!("target not halted");
            return Err(Error::NotHalted);
        }

        let address = if current {
            self.regs.get(ARM_REG_PC)?.value()
        } else {
            self.regs.set(ARM_REG_PC, address)?;
            address
        };

        if self.brp_num_available == 0 {
            return Err(Error::ResourceNotAvailable("hardware breakpoint for step"));
        }

        // The step breakpoint is a hardware slot, so any user breakpoint at
        // the step address must give way; it is re-armed afterwards.
        let user_bp = self.breakpoints.iter().position(|bp| bp.address == address);
        if let Some(index) = user_bp {
            let mut bp = self.breakpoints[index].clone();
            self.unset_breakpoint_record(&mut bp)?;
            self.breakpoints[index] = bp;
        }

        let mut step_bp = Breakpoint::new(
            address,
            if self.core_state == ArmCoreState::Thumb {
                2
            } else {
                4
            },
            BreakpointType::Hard,
        );

        // Break on IVA mismatch.
        self.brp_num_available -= 1;
        let step_result = (|| -> Result<(), Error> {
            self.set_breakpoint_record(&mut step_bp, 0x04)?;
            self.debug_reason = DebugReason::SingleStep;

            self.resume(true, address, false, false)?;

            let start = Instant::now();
            while self.state != CoreStatus::Halted {
                self.poll()?;
                if start.elapsed() > RUN_CONTROL_TIMEOUT {
                    tracing::error!("timeout waiting for target halt");
                    return Err(Error::Timeout);
                }
            }
            Ok(())
        })();

        let unset_result = self.unset_breakpoint_record(&mut step_bp);
        self.brp_num_available += 1;
        step_result?;
        unset_result?;

        self.debug_reason = DebugReason::Breakpoint;

        if let Some(index) = user_bp {
            let mut bp = self.breakpoints[index].clone();
            self.set_breakpoint_record(&mut bp, 0x00)?;
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
        let saved = self.dap.selected_ap();
        self.dap.select_ap(DEBUG_AP)?;
        let result = self.read_coreregister_u32(num);
        let restored = self.dap.select_ap(saved);
        let value = result?;
        restored?;
        self.regs.update_from_target(num, value);
        Ok(value)
    }

    fn write_core_reg(&mut self, num: usize, value: u32) -> Result<(), Error> {
        if !self.state.is_halted() {
            return Err(Error::NotHalted);
        }
        self.regs.set(num, value)
    }

    fn gdb_reg_list(&mut self) -> Result<Vec<GdbRegister>, Error> {
        let mut list = Vec::with_capacity(26);
        for num in 0..=15 {
            let reg = self.regs.get(num)?;
            list.push(GdbRegister {
                name: reg.name(),
                bits: 32,
                value: reg.value().to_le_bytes().to_vec(),
            });
        }
        // The FPA registers GDB's ARM layout expects; always reported as
        // zero, like every modern core without an FPA unit.
        for name in ["f0", "f1", "f2", "f3", "f4", "f5", "f6", "f7"] {
            list.push(GdbRegister {
                name,
                bits: 96,
                value: vec![0; 12],
            });
        }
        list.push(GdbRegister {
            name: "fps",
            bits: 32,
            value: vec![0; 4],
        });
        let cpsr = self.regs.get(ARM_REG_CPSR)?;
        list.push(GdbRegister {
            name: cpsr.name(),
            bits: 32,
            value: cpsr.value().to_le_bytes().to_vec(),
        });
        Ok(list)
    }

    fn read_memory(
        &mut self,
        address: u32,
        size: AccessSize,
        count: u32,
        buffer: &mut [u8],
    ) -> Result<(), Error> {
        tracing::debug!(
            "reading memory at address {:#010x}; size {}; count {}",
            address,
            size.bytes(),
            count
        );
        let address = if self.mmu_enabled()? {
            let phys = self.virt2phys(address)?;
            tracing::debug!("translated v:{:#010x} to r:{:#010x}", address, phys);
            phys
        } else {
            address
        };
        self.read_phys_memory(address, size, count, buffer)
    }

    fn write_memory(
        &mut self,
        address: u32,
        size: AccessSize,
        count: u32,
        buffer: &[u8],
    ) -> Result<(), Error> {
        tracing::debug!(
            "writing memory at address {:#010x}; size {}; count {}",
            address,
            size.bytes(),
            count
        );
        let address = if self.mmu_enabled()? {
            let phys = self.virt2phys(address)?;
            tracing::debug!("translated v:{:#010x} to r:{:#010x}", address, phys);
            phys
        } else {
            address
        };
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
        if count == 0 {
            return Ok(());
        }

        // Unaligned accesses are legal; the memory AP handles them.
        with_ap(self.dap.as_mut(), MEMORY_AP, |dap| match size {
            AccessSize::Word => {
                let mut words = vec![0u32; count as usize];
                dap.read_32(address, &mut words)?;
                for (chunk, word) in buffer.chunks_exact_mut(4).zip(&words) {
                    chunk.copy_from_slice(&word.to_le_bytes());
                }
                Ok(())
            }
            AccessSize::Half => {
                let mut halves = vec![0u16; count as usize];
                dap.read_16(address, &mut halves)?;
                for (chunk, half) in buffer.chunks_exact_mut(2).zip(&halves) {
                    chunk.copy_from_slice(&half.to_le_bytes());
                }
                Ok(())
            }
            AccessSize::Byte => dap.read_8(address, buffer),
        })?;
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
        if count == 0 {
            return Ok(());
        }

        with_ap(self.dap.as_mut(), MEMORY_AP, |dap| match size {
            AccessSize::Word => {
                let words: Vec<u32> = buffer
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
                    .collect();
                dap.write_32(address, &words)
            }
            AccessSize::Half => {
                let halves: Vec<u16> = buffer
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes(c.try_into().unwrap()))
                    .collect();
                dap.write_16(address, &halves)
            }
            AccessSize::Byte => dap.write_8(address, buffer),
        })?;

        // A halted core may hold stale lines for the written range.
        if self.state.is_halted() {
            self.invalidate_caches_for_write(address, size.bytes() as u32 * count)?;
        }
        Ok(())
    }

    fn mmu_enabled(&mut self) -> Result<bool, Error> {
        if !self.state.is_halted() {
            tracing::error!("target not halted");
            return Err(Error::NotHalted);
        }
        Ok(self.mmu_on)
    }

    fn virt2phys(&mut self, virt: u32) -> Result<u32, Error> {
        // Linux-style split: everything below 0xC0000000 is user space.
        self.current_address_mode = if virt < 0xC000_0000 {
            AddressMode::User
        } else {
            AddressMode::Kernel
        };
        let result = (|| -> Result<u32, Error> {
            let ttb = self.get_ttb()?;
            let mut read = |addr: u32| -> Result<u32, ArmError> {
                with_ap(self.dap.as_mut(), MEMORY_AP, |dap| {
                    let mut word = [0u32];
                    dap.read_32(addr, &mut word)?;
                    Ok(word[0])
                })
            };
            Ok(mmu::translate_va(ttb, virt, &mut read)?)
        })();
        // Reset the latch so a stale mode is never reused.
        self.current_address_mode = AddressMode::Any;
        result
    }

    fn checksum_memory(&mut self, address: u32, count: u32) -> Result<u32, Error> {
        let mut data = vec![0u8; count as usize];
        self.read_memory(address, AccessSize::Byte, count, &mut data)?;
        Ok(crate::core::crc32_checksum(&data))
    }

    fn blank_check_memory(&mut self, address: u32, count: u32) -> Result<u32, Error> {
        let mut data = vec![0u8; count as usize];
        self.read_memory(address, AccessSize::Byte, count, &mut data)?;
        Ok(data.iter().fold(0xFFu32, |acc, &b| acc & b as u32))
    }

    fn add_breakpoint(
        &mut self,
        address: u32,
        length: u32,
        bp_type: BreakpointType,
    ) -> Result<(), Error> {
        if bp_type == BreakpointType::Hard && self.brp_num_available < 1 {
            tracing::info!("no hardware breakpoint available");
            return Err(Error::ResourceNotAvailable("hardware breakpoint"));
        }

        let mut bp = Breakpoint::new(address, length, bp_type);
        if bp_type == BreakpointType::Hard {
            self.brp_num_available -= 1;
        }
        match self.set_breakpoint_record(&mut bp, 0x00) {
            Ok(()) => {
                self.breakpoints.push(bp);
                Ok(())
            }
            Err(e) => {
                if bp_type == BreakpointType::Hard {
                    self.brp_num_available += 1;
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
                self.brp_num_available += 1;
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

        // Snapshot the full context; run_algorithm must be invisible.
        let mut context = [0u32; 17];
        for (num, slot) in context.iter_mut().enumerate() {
            *slot = self.read_core_reg(num)?;
        }

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

        // The algorithm must end on a breakpoint at its exit point.
        if self.brp_num_available == 0 {
            return Err(Error::ResourceNotAvailable("hardware breakpoint for algorithm"));
        }
        let mut exit_bp = Breakpoint::new(exit_point, 4, BreakpointType::Hard);
        self.brp_num_available -= 1;
        if let Err(e) = self.set_breakpoint_record(&mut exit_bp, 0x00) {
            self.brp_num_available += 1;
            return Err(e);
        }

        let run_result = (|| -> Result<(), Error> {
            self.resume(false, entry_point, false, true)?;

            let start = Instant::now();
            while self.state != CoreStatus::Halted {
                self.poll()?;
                if start.elapsed() > timeout {
                    // Force a halt so the context can still be recovered.
                    tracing::error!("timeout waiting for algorithm to complete");
                    self.halt(Duration::from_millis(500))?;
                    return Err(Error::Timeout);
                }
            }

            let pc = self.read_core_reg(ARM_REG_PC)?;
            if pc != exit_point {
                tracing::debug!("algorithm halted at {:#010x}, expected exit", pc);
                return Err(Error::Fail("algorithm did not reach its exit point"));
            }
            Ok(())
        })();

        let unset_result = self.unset_breakpoint_record(&mut exit_bp);
        self.brp_num_available += 1;
        run_result?;
        unset_result?;

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

        // Put back everything the algorithm touched.
        for (num, &value) in context.iter().enumerate() {
            if self.read_core_reg(num)? != value {
                self.write_core_reg(num, value)?;
            }
        }

        Ok(())
    }

    fn take_event(&mut self) -> Option<CoreEvent> {
        self.events.pop_front()
    }
}

impl CortexA9 {
    /// Arm a data watchpoint over `length` bytes (1, 2, 4 or 8) at
    /// `address`.
    pub fn add_watchpoint(&mut self, address: u32, length: u32) -> Result<(), Error> {
        if !matches!(length, 1 | 2 | 4 | 8) {
            return Err(Error::InvalidArgument("unsupported watchpoint length"));
        }
        let Some(slot) = self.wrp_list.iter().position(|s| !s.used) else {
            tracing::info!("no watchpoint register pair available");
            return Err(Error::ResourceNotAvailable("watchpoint register pair"));
        };

        let byte_lanes = (((1u32 << length) - 1) << (address & 0x3)) & 0xFF;
        // Watch loads and stores, in all privilege modes.
        let control = (byte_lanes << 5) | (0b11 << 3) | (0b11 << 1) | 1;
        self.wrp_list[slot].used = true;
        self.wrp_list[slot].value = address & 0xFFFF_FFFC;
        self.wrp_list[slot].control = control;

        let mirror = self.wrp_list[slot];
        let dpm = self.dpm;
        with_ap(self.dap.as_mut(), DEBUG_AP, |dap| {
            dpm.bpwp_enable(
                dap,
                super::dpm::WATCHPOINT_INDEX_BASE + slot,
                mirror.value,
                mirror.control,
            )
        })?;

        self.watchpoints.push(ArmWatchpoint {
            address,
            length,
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
            self.wrp_list[slot].used = false;
            self.wrp_list[slot].value = 0;
            self.wrp_list[slot].control = 0;
            let dpm = self.dpm;
            with_ap(self.dap.as_mut(), DEBUG_AP, |dap| {
                dpm.bpwp_disable(dap, super::dpm::WATCHPOINT_INDEX_BASE + slot)
            })?;
        }
        Ok(())
    }

    /// Poll for a target-initiated DCC message. Designed to be driven from
    /// a 1 ms periodic tick by the session layer while the target runs.
    pub fn handle_target_request(&mut self) -> Result<(), Error> {
        if !self.examined || !self.config.enable_debug_messages {
            return Ok(());
        }
        if self.state != CoreStatus::Running {
            return Ok(());
        }

        let saved = self.dap.selected_ap();
        self.dap.select_ap(DEBUG_AP)?;
        let result = (|| -> Result<(), Error> {
            let dscr = self.read_dscr()?;
            if dscr & DSCR_DTR_TX_FULL != 0 {
                let request = self
                    .dap
                    .read_word_32(Dbgdtrtx::get_mmio_address(self.debug_base).map_err(ArmError::from)?)?;
                tracing::debug!("target request {:#010x}", request);
                self.target_requests.push_back(request);
            }
            Ok(())
        })();
        let restored = self.dap.select_ap(saved);
        result?;
        restored?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::architecture::arm::ApAddress;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    pub(crate) const TEST_BASE: u32 = 0x8000_0000;

    const DSCR: u32 = TEST_BASE + 0x088;
    const ITR: u32 = TEST_BASE + 0x084;
    const DTRRX: u32 = TEST_BASE + 0x080;
    const DTRTX: u32 = TEST_BASE + 0x08C;
    const DRCR: u32 = TEST_BASE + 0x090;
    const BVR0: u32 = TEST_BASE + 0x100;
    const BCR0: u32 = TEST_BASE + 0x140;

    const INSTR_COMP: u32 = DSCR_INSTR_COMP;
    const TX_FULL: u32 = 1 << 29;
    const HALTED_RESTARTED: u32 = DSCR_CORE_HALTED | DSCR_CORE_RESTARTED;

    #[derive(Debug)]
    enum ExpectedOp {
        Read { address: u32, value: u32 },
        Write { address: u32, value: u32 },
    }

    /// Strict expectation-queue DAP mock. Word accesses must match the
    /// queued operations exactly; block accesses are served from a plain
    /// word-addressed memory image instead.
    pub(crate) struct MockDap {
        expected: std::collections::VecDeque<ExpectedOp>,
        selected: ApAddress,
        pub(crate) memory: Rc<RefCell<HashMap<u32, u32>>>,
    }

    impl MockDap {
        pub(crate) fn new() -> Self {
            Self {
                expected: Default::default(),
                selected: DEBUG_AP,
                memory: Rc::new(RefCell::new(HashMap::new())),
            }
        }

        pub(crate) fn expect_read(&mut self, address: u32, value: u32) {
            self.expected.push_back(ExpectedOp::Read { address, value });
        }

        pub(crate) fn expect_write(&mut self, address: u32, value: u32) {
            self.expected.push_back(ExpectedOp::Write { address, value });
        }

        pub(crate) fn verify_consumed(&mut self) {
            assert!(
                self.expected.is_empty(),
                "unconsumed expectations: {:?}",
                self.expected
            );
        }

        fn mem_byte(&self, address: u32) -> u8 {
            let word = *self.memory.borrow().get(&(address & !3)).unwrap_or(&0);
            word.to_le_bytes()[(address & 3) as usize]
        }

        fn set_mem_byte(&mut self, address: u32, value: u8) {
            let mut mem = self.memory.borrow_mut();
            let word = mem.entry(address & !3).or_insert(0);
            let mut bytes = word.to_le_bytes();
            bytes[(address & 3) as usize] = value;
            *word = u32::from_le_bytes(bytes);
        }
    }

    impl Drop for MockDap {
        fn drop(&mut self) {
            if !std::thread::panicking() && !self.expected.is_empty() {
                panic!("expectations not consumed: {:?}", self.expected);
            }
        }
    }

    impl DapAccess for MockDap {
        fn selected_ap(&self) -> ApAddress {
            self.selected
        }

        fn select_ap(&mut self, ap: ApAddress) -> Result<(), ArmError> {
            self.selected = ap;
            Ok(())
        }

        fn read_word_32(&mut self, address: u32) -> Result<u32, ArmError> {
            match self.expected.pop_front() {
                Some(ExpectedOp::Read { address: a, value }) => {
                    assert_eq!(a, address, "read from unexpected register");
                    Ok(value)
                }
                other => panic!("unexpected read_word_32 of {address:#010x}, queued: {other:?}"),
            }
        }

        fn write_word_32(&mut self, address: u32, value: u32) -> Result<(), ArmError> {
            match self.expected.pop_front() {
                Some(ExpectedOp::Write { address: a, value: v }) => {
                    assert_eq!(a, address, "write to unexpected register");
                    assert_eq!(v, value, "write value mismatch at {address:#010x}");
                    Ok(())
                }
                other => panic!("unexpected write_word_32 of {address:#010x}, queued: {other:?}"),
            }
        }

        fn read_8(&mut self, address: u32, data: &mut [u8]) -> Result<(), ArmError> {
            for (i, byte) in data.iter_mut().enumerate() {
                *byte = self.mem_byte(address + i as u32);
            }
            Ok(())
        }

        fn read_16(&mut self, address: u32, data: &mut [u16]) -> Result<(), ArmError> {
            for (i, half) in data.iter_mut().enumerate() {
                let a = address + 2 * i as u32;
                *half = u16::from_le_bytes([self.mem_byte(a), self.mem_byte(a + 1)]);
            }
            Ok(())
        }

        fn read_32(&mut self, address: u32, data: &mut [u32]) -> Result<(), ArmError> {
            for (i, word) in data.iter_mut().enumerate() {
                let a = address + 4 * i as u32;
                *word = u32::from_le_bytes([
                    self.mem_byte(a),
                    self.mem_byte(a + 1),
                    self.mem_byte(a + 2),
                    self.mem_byte(a + 3),
                ]);
            }
            Ok(())
        }

        fn write_8(&mut self, address: u32, data: &[u8]) -> Result<(), ArmError> {
            for (i, &byte) in data.iter().enumerate() {
                self.set_mem_byte(address + i as u32, byte);
            }
            Ok(())
        }

        fn write_16(&mut self, address: u32, data: &[u16]) -> Result<(), ArmError> {
            for (i, half) in data.iter().enumerate() {
                let bytes = half.to_le_bytes();
                self.write_8(address + 2 * i as u32, &bytes)?;
            }
            Ok(())
        }

        fn write_32(&mut self, address: u32, data: &[u32]) -> Result<(), ArmError> {
            for (i, word) in data.iter().enumerate() {
                let bytes = word.to_le_bytes();
                self.write_8(address + 4 * i as u32, &bytes)?;
            }
            Ok(())
        }
    }

    fn add_exec_expectations(dap: &mut MockDap, opcode: u32, dscr_after: u32) {
        dap.expect_write(ITR, opcode);
        dap.expect_read(DSCR, dscr_after);
    }

    fn add_read_reg_dcc(dap: &mut MockDap, reg: u16, value: u32) {
        add_exec_expectations(dap, build_mcr(14, 0, reg, 0, 5, 0), INSTR_COMP | TX_FULL);
        dap.expect_read(DTRTX, value);
    }

    fn add_read_reg_r0(dap: &mut MockDap, opcode: u32, value: u32) {
        add_exec_expectations(dap, opcode, INSTR_COMP);
        add_exec_expectations(dap, build_mcr(14, 0, 0, 0, 5, 0), INSTR_COMP | TX_FULL);
        dap.expect_read(DTRTX, value);
    }

    fn add_write_reg_dcc(dap: &mut MockDap, reg: u16, value: u32) {
        dap.expect_write(DTRRX, value);
        add_exec_expectations(dap, build_mrc(14, 0, reg, 0, 5, 0), INSTR_COMP);
    }

    fn add_write_reg_r0(dap: &mut MockDap, opcode: u32, value: u32) {
        dap.expect_write(DTRRX, value);
        add_exec_expectations(dap, build_mrc(14, 0, 0, 0, 5, 0), INSTR_COMP);
        add_exec_expectations(dap, opcode, INSTR_COMP);
    }

    /// All the traffic `debug_entry` generates for a DBGRQ halt.
    fn add_debug_entry_expectations(dap: &mut MockDap, cpsr: u32, pc_raw: u32, first_entry: bool) {
        // Re-read DSCR, then enable the ITR.
        dap.expect_read(DSCR, HALTED_RESTARTED);
        dap.expect_write(DSCR, HALTED_RESTARTED | DSCR_ITR_EN);
        // prepare(): pipeline idle, DTRRX empty.
        dap.expect_read(DSCR, INSTR_COMP);
        // r0 first.
        add_read_reg_dcc(dap, 0, 0x0A0A_0A0A);
        // CPSR before PC.
        add_read_reg_r0(dap, build_mrs(0, false), cpsr);
        for reg in 1..=14u16 {
            add_read_reg_dcc(dap, reg, reg as u32);
        }
        add_read_reg_r0(dap, build_mov(0, 15), pc_raw);
        // post_debug_entry: SCTLR, and the cache type once per session.
        add_read_reg_r0(dap, build_mrc(15, 0, 0, 1, 0, 0), 0);
        if first_entry {
            add_read_reg_r0(dap, build_mrc(15, 0, 0, 0, 0, 1), 0x0109_2092);
        }
    }

    fn add_halt_expectations(dap: &mut MockDap) {
        dap.expect_write(DRCR, DRCR_HALT);
        dap.expect_read(DSCR, 0);
        dap.expect_write(DSCR, DSCR_HALT_DBG_MODE);
        dap.expect_read(DSCR, DSCR_CORE_HALTED);
        // The trailing poll that runs debug entry.
        dap.expect_read(DSCR, HALTED_RESTARTED);
    }

    fn make_core(dap: MockDap) -> CortexA9 {
        CortexA9::new(Box::new(dap), TargetConfig::default()).unwrap()
    }

    /// Reach into the target the way `examine` would, without replaying
    /// the identification traffic in every test.
    fn fake_examined(core: &mut CortexA9, brp_num: usize) {
        core.examined = true;
        core.brp_num = brp_num;
        core.brp_num_context = 1;
        core.brp_num_available = brp_num;
        core.brp_list = (0..brp_num)
            .map(|i| ComparatorSlot {
                number: i,
                kind: if i < brp_num - 1 {
                    SlotKind::Normal
                } else {
                    SlotKind::Context
                },
                ..Default::default()
            })
            .collect();
        core.wrp_num = 2;
        core.wrp_list = (0..2)
            .map(|i| ComparatorSlot {
                number: i,
                ..Default::default()
            })
            .collect();
    }

    #[test]
    fn examine_discovers_breakpoint_slots() {
        let mut dap = MockDap::new();
        let mut didr = Dbgdidr(0);
        didr.set_brps(5); // 6 slots
        didr.set_ctx_cmps(1); // 2 of them context-capable
        didr.set_wrps(3); // 4 watchpoints

        dap.expect_read(TEST_BASE + 0xD00, 0x413F_C090);
        dap.expect_read(TEST_BASE + 0xD00, 0x413F_C090);
        dap.expect_read(TEST_BASE + 0xD04, 0x0109_2092);
        dap.expect_read(TEST_BASE + 0xD0C, 0);
        dap.expect_read(TEST_BASE + 0x000, didr.into());
        // init_debug_access: unlock, PRSR, then a poll showing "running".
        dap.expect_write(TEST_BASE + 0xFB0, LOCK_ACCESS_KEY);
        dap.expect_read(TEST_BASE + 0x314, 0x1);
        dap.expect_read(DSCR, DSCR_CORE_RESTARTED);

        let mut core = make_core(dap);
        core.examine().unwrap();

        assert_eq!(core.brp_num, 6);
        assert_eq!(core.brp_num_available, 6);
        assert_eq!(core.brp_list.len(), 6);
        assert_eq!(core.brp_list[3].kind, SlotKind::Normal);
        assert_eq!(core.brp_list[4].kind, SlotKind::Context);
        assert_eq!(core.wrp_num, 4);
        assert_eq!(core.status(), CoreStatus::Running);
    }

    #[test]
    fn halt_runs_debug_entry_and_is_idempotent() {
        let mut dap = MockDap::new();
        add_halt_expectations(&mut dap);
        // ARM state: T bit clear, pipeline offset 8.
        add_debug_entry_expectations(&mut dap, 0x0000_0013, 0x0000_1008, true);

        let mut core = make_core(dap);
        core.halt(Duration::from_secs(1)).unwrap();

        assert_eq!(core.status(), CoreStatus::Halted);
        assert_eq!(core.debug_reason, DebugReason::DbgRq);
        assert_eq!(core.take_event(), Some(CoreEvent::Halted));
        // Captured PC carries the ARM-state pipeline offset.
        assert_eq!(core.read_core_reg(ARM_REG_PC).unwrap(), 0x0000_1000);
        // All cache entries valid, none dirty.
        assert!(core.regs.iter().all(|r| r.is_valid() && !r.is_dirty()));

        // Idempotent: no further expectations queued.
        core.halt(Duration::from_secs(1)).unwrap();
        assert_eq!(core.status(), CoreStatus::Halted);
    }

    #[test]
    fn pc_adjustment_follows_the_t_bit() {
        // Thumb: captured PC - 4.
        let mut dap = MockDap::new();
        add_halt_expectations(&mut dap);
        add_debug_entry_expectations(&mut dap, 0x0000_0030, 0x0000_2004, true);
        let mut core = make_core(dap);
        core.halt(Duration::from_secs(1)).unwrap();
        assert_eq!(core.core_state(), ArmCoreState::Thumb);
        assert_eq!(core.read_core_reg(ARM_REG_PC).unwrap(), 0x0000_2000);

        // ARM: captured PC - 8.
        let mut dap = MockDap::new();
        add_halt_expectations(&mut dap);
        add_debug_entry_expectations(&mut dap, 0x0000_0013, 0x0000_2008, true);
        let mut core = make_core(dap);
        core.halt(Duration::from_secs(1)).unwrap();
        assert_eq!(core.core_state(), ArmCoreState::Arm);
        assert_eq!(core.read_core_reg(ARM_REG_PC).unwrap(), 0x0000_2000);
    }

    #[test]
    fn gpr_round_trip_uses_the_dcc() {
        let mut dap = MockDap::new();
        // Write: DTRRX, then MRC p14,0,r5,c0,c5,0.
        add_write_reg_dcc(&mut dap, 5, 0xDEAD_BEEF);
        // Read: MCR p14,0,r5,c0,c5,0, wait for TXfull, read DTRTX.
        add_read_reg_dcc(&mut dap, 5, 0xDEAD_BEEF);

        let mut core = make_core(dap);
        core.state = CoreStatus::Halted;

        core.write_coreregister_u32(5, 0xDEAD_BEEF).unwrap();
        assert_eq!(core.read_coreregister_u32(5).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn resume_invalidates_the_register_cache() {
        let mut dap = MockDap::new();
        add_halt_expectations(&mut dap);
        add_debug_entry_expectations(&mut dap, 0x0000_0013, 0x0000_1008, true);

        // resume: flush PC (always dirtied by the mask step) via r0, then
        // restore r0 itself.
        add_write_reg_r0(&mut dap, build_mov(15, 0), 0x0000_1000);
        add_write_reg_dcc(&mut dap, 0, 0x0A0A_0A0A);
        dap.expect_read(DSCR, INSTR_COMP | DSCR_ITR_EN);
        dap.expect_write(DSCR, INSTR_COMP);
        dap.expect_write(DRCR, DRCR_RESTART | DRCR_CLEAR_EXCEPTIONS);
        dap.expect_read(DSCR, DSCR_CORE_RESTARTED);

        let mut core = make_core(dap);
        core.halt(Duration::from_secs(1)).unwrap();
        let _ = core.take_event();

        core.resume(true, 0, false, false).unwrap();

        assert_eq!(core.status(), CoreStatus::Running);
        assert_eq!(core.take_event(), Some(CoreEvent::Resumed));
        // Property: every cache entry is invalid after resume.
        assert!(core.regs.iter().all(|r| !r.is_valid() && !r.is_dirty()));
    }

    #[test]
    fn resume_rejects_jazelle() {
        let mut dap = MockDap::new();
        add_halt_expectations(&mut dap);
        // CPSR with J set, T clear.
        add_debug_entry_expectations(&mut dap, 1 << 24, 0x1008, true);
        let mut core = make_core(dap);
        core.halt(Duration::from_secs(1)).unwrap();
        assert_eq!(core.core_state(), ArmCoreState::Jazelle);

        assert!(matches!(
            core.resume(true, 0, false, false),
            Err(Error::Arm(ArmError::JazelleResume))
        ));
    }

    #[test]
    fn hard_breakpoint_programs_a_slot() {
        let mut dap = MockDap::new();
        dap.expect_write(BVR0, 0x0000_4000);
        dap.expect_write(BCR0, (0xFu32 << 5) | (3 << 1) | 1);

        let mut core = make_core(dap);
        fake_examined(&mut core, 6);
        core.state = CoreStatus::Halted;

        core.add_breakpoint(0x0000_4000, 4, BreakpointType::Hard)
            .unwrap();
        assert_eq!(core.brp_num_available(), 5);
        assert_eq!(
            core.brp_num_available(),
            core.brp_list().iter().filter(|s| !s.used).count()
        );
        assert_eq!(core.brp_list()[0].value, 0x0000_4000);
        assert_eq!(core.brp_list()[0].control, 0x1E7);
        assert_eq!(core.breakpoints[0].set, 1);
    }

    #[test]
    fn short_breakpoint_selects_the_high_halfword() {
        let mut dap = MockDap::new();
        dap.expect_write(BVR0, 0x0000_2000);
        dap.expect_write(BCR0, ((3u32 << 2) << 5) | (3 << 1) | 1);

        let mut core = make_core(dap);
        fake_examined(&mut core, 6);
        core.state = CoreStatus::Halted;

        core.add_breakpoint(0x0000_2002, 2, BreakpointType::Hard)
            .unwrap();
        assert_eq!(core.brp_list()[0].value, 0x0000_2000);
    }

    #[test]
    fn remove_breakpoint_is_idempotent() {
        let mut dap = MockDap::new();
        dap.expect_write(BVR0, 0x0000_4000);
        dap.expect_write(BCR0, 0x1E7);
        dap.expect_write(BCR0, 0);
        dap.expect_write(BVR0, 0);

        let mut core = make_core(dap);
        fake_examined(&mut core, 6);
        core.state = CoreStatus::Halted;

        core.add_breakpoint(0x0000_4000, 4, BreakpointType::Hard)
            .unwrap();
        core.remove_breakpoint(0x0000_4000).unwrap();
        assert_eq!(core.brp_num_available(), 6);

        // Second remove: nothing installed, nothing to do.
        core.remove_breakpoint(0x0000_4000).unwrap();
        assert_eq!(core.brp_num_available(), 6);
    }

    #[test]
    fn breakpoint_slots_are_a_bounded_pool() {
        let mut dap = MockDap::new();
        for slot in 0..2u32 {
            dap.expect_write(BVR0 + 4 * slot, 0x1000 + 0x10 * slot);
            dap.expect_write(BCR0 + 4 * slot, 0x1E7);
        }

        let mut core = make_core(dap);
        fake_examined(&mut core, 2);
        core.state = CoreStatus::Halted;

        core.add_breakpoint(0x1000, 4, BreakpointType::Hard).unwrap();
        core.add_breakpoint(0x1010, 4, BreakpointType::Hard).unwrap();
        assert!(matches!(
            core.add_breakpoint(0x1020, 4, BreakpointType::Hard),
            Err(Error::ResourceNotAvailable(_))
        ));
    }

    #[test]
    fn soft_breakpoint_patches_memory() {
        let dap = MockDap::new();
        let dap_mem = dap.memory.clone();
        dap_mem.borrow_mut().insert(0x0000_4000, 0xE3A0_0001);
        let mut core = make_core(dap);

        fake_examined(&mut core, 6);
        core.state = CoreStatus::Halted;

        core.add_breakpoint(0x0000_4000, 4, BreakpointType::Soft)
            .unwrap();
        assert_eq!(
            *dap_mem.borrow().get(&0x0000_4000).unwrap(),
            build_bkpt(0x11)
        );
        assert_eq!(core.breakpoints[0].orig_instr, 0xE3A0_0001u32.to_le_bytes());
        // No hardware slot was claimed.
        assert_eq!(core.brp_num_available(), 6);

        core.remove_breakpoint(0x0000_4000).unwrap();
        assert_eq!(*dap_mem.borrow().get(&0x0000_4000).unwrap(), 0xE3A0_0001);
    }

    #[test]
    fn virt2phys_walks_the_tables() {
        let mut dap = MockDap::new();
        // User-space address selects TTBR0 (op2 = 0).
        add_read_reg_r0(&mut dap, build_mrc(15, 0, 0, 2, 0, 0), 0x4000_4012);
        let mem = dap.memory.clone();
        // Section descriptor for VA 0x0010_0234 under TTB 0x40004000.
        mem.borrow_mut().insert(0x4000_4004, 0x8010_0002);

        let mut core = make_core(dap);
        core.state = CoreStatus::Halted;

        let phys = core.virt2phys(0x0010_0234).unwrap();
        assert_eq!(phys, 0x8010_0234);
        assert_eq!(core.current_address_mode, AddressMode::Any);
    }

    #[test]
    fn checksum_and_blank_check_read_through_the_facade() {
        let dap = MockDap::new();
        let mem = dap.memory.clone();
        mem.borrow_mut().insert(0x1000, u32::from_le_bytes(*b"1234"));
        mem.borrow_mut().insert(0x1004, u32::from_le_bytes(*b"5678"));
        mem.borrow_mut().insert(0x1008, u32::from_le_bytes([b'9', 0xFF, 0xFF, 0xFF]));

        let mut core = make_core(dap);
        core.state = CoreStatus::Halted;

        assert_eq!(core.checksum_memory(0x1000, 9).unwrap(), 0x0376_E6E7);
        assert_eq!(core.blank_check_memory(0x1009, 3).unwrap(), 0xFF);
        assert_ne!(core.blank_check_memory(0x1000, 4).unwrap(), 0xFF);
    }

    #[test]
    fn memory_round_trip_all_sizes() {
        let dap = MockDap::new();
        let mut core = make_core(dap);
        core.state = CoreStatus::Halted;

        for (size, count, pattern) in [
            (AccessSize::Byte, 5u32, &[1u8, 2, 3, 4, 5][..]),
            (AccessSize::Half, 2, &[0xAA, 0xBB, 0xCC, 0xDD][..]),
            (AccessSize::Word, 2, &[1, 2, 3, 4, 5, 6, 7, 8][..]),
        ] {
            core.write_memory(0x2000, size, count, pattern).unwrap();
            let mut readback = vec![0u8; pattern.len()];
            core.read_memory(0x2000, size, count, &mut readback).unwrap();
            assert_eq!(readback, pattern);
        }
    }

    #[test]
    fn handle_target_request_drains_the_dcc() {
        let mut dap = MockDap::new();
        dap.expect_read(DSCR, DSCR_DTR_TX_FULL);
        dap.expect_read(DTRTX, 0xCAFE_0001);
        // Second tick: nothing pending.
        dap.expect_read(DSCR, 0);

        let mut core = make_core(dap);
        core.examined = true;
        core.config.enable_debug_messages = true;
        core.state = CoreStatus::Running;

        core.handle_target_request().unwrap();
        assert_eq!(core.take_target_request(), Some(0xCAFE_0001));
        core.handle_target_request().unwrap();
        assert_eq!(core.take_target_request(), None);
    }

    #[test]
    fn step_uses_a_one_shot_mismatch_breakpoint() {
        let mut dap = MockDap::new();
        // Arm the step breakpoint: IVA mismatch, matchmode 0x04.
        dap.expect_write(BVR0, 0x0000_1000);
        dap.expect_write(BCR0, (0x4u32 << 20) | (0xF << 5) | (3 << 1) | 1);
        // resume: flush PC via r0 (r0 invalid in this synthetic setup, so
        // no r0 restore), disable ITR, restart.
        add_write_reg_r0(&mut dap, build_mov(15, 0), 0x0000_1000);
        dap.expect_read(DSCR, INSTR_COMP);
        dap.expect_write(DSCR, INSTR_COMP);
        dap.expect_write(DRCR, DRCR_RESTART | DRCR_CLEAR_EXCEPTIONS);
        dap.expect_read(DSCR, DSCR_CORE_RESTARTED);
        // poll: halted again, full debug entry.
        dap.expect_read(DSCR, HALTED_RESTARTED);
        add_debug_entry_expectations(&mut dap, 0x0000_0013, 0x0000_100C, true);
        // Disarm the step breakpoint.
        dap.expect_write(BCR0, 0);
        dap.expect_write(BVR0, 0);

        let mut core = make_core(dap);
        fake_examined(&mut core, 6);
        core.state = CoreStatus::Halted;
        core.core_state = ArmCoreState::Arm;
        core.regs.update_from_target(ARM_REG_PC, 0x0000_1000);
        core.regs.update_from_target(ARM_REG_CPSR, 0x13);

        core.step(true, 0, true).unwrap();

        assert_eq!(core.status(), CoreStatus::Halted);
        assert_eq!(core.debug_reason, DebugReason::Breakpoint);
        assert_eq!(core.read_core_reg(ARM_REG_PC).unwrap(), 0x0000_1004);
        assert_eq!(core.brp_num_available(), 6);
    }

    #[test]
    fn watchpoint_programs_a_wrp_slot() {
        let mut dap = MockDap::new();
        // WVR0 / WCR0: watch 4 bytes, loads and stores, all modes.
        dap.expect_write(TEST_BASE + 0x180, 0x2000_0040);
        dap.expect_write(TEST_BASE + 0x1C0, (0xFu32 << 5) | (0b11 << 3) | (0b11 << 1) | 1);
        dap.expect_write(TEST_BASE + 0x1C0, 0);

        let mut core = make_core(dap);
        fake_examined(&mut core, 6);
        core.state = CoreStatus::Halted;

        core.add_watchpoint(0x2000_0040, 4).unwrap();
        assert!(core.wrp_list[0].used);

        core.remove_watchpoint(0x2000_0040).unwrap();
        assert!(!core.wrp_list[0].used);
        // Removing again is a no-op.
        core.remove_watchpoint(0x2000_0040).unwrap();

        assert!(matches!(
            core.add_watchpoint(0x3000, 3),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn not_halted_guards() {
        let dap = MockDap::new();
        let mut core = make_core(dap);
        core.state = CoreStatus::Running;

        assert!(matches!(
            core.resume(true, 0, false, false),
            Err(Error::NotHalted)
        ));
        assert!(matches!(core.mmu_enabled(), Err(Error::NotHalted)));
        assert!(matches!(core.write_core_reg(0, 0), Err(Error::NotHalted)));
    }
}
