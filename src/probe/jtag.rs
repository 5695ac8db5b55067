//! Bit-bang JTAG scan engine.
//!
//! [`JtagEngine`] turns a raw cable ([`JtagIo`]: one TCK pulse at a time)
//! into IR/DR scan operations. It owns the TAP state follower and emits the
//! shortest TMS path for every state change, so the mirror in
//! [`TapTracker`] stays bit-for-bit in sync with the hardware.

use bitvec::prelude::*;

use super::tap::{self, TapState, TapTracker};
use super::ProbeError;
use crate::architecture::mips::ejtag::{EjtagAccess, EjtagError};

/// A raw JTAG cable: one TCK pulse per call.
///
/// Implementations drive TMS/TDI before the rising edge and sample TDO
/// after it.
pub trait JtagIo {
    /// Clock one TCK cycle and return the sampled TDO level.
    fn clock(&mut self, tms: bool, tdi: bool) -> Result<bool, ProbeError>;

    /// Flush any buffered pulses to the hardware.
    fn flush(&mut self) -> Result<(), ProbeError> {
        Ok(())
    }
}

/// JTAG scan engine over a raw cable.
#[derive(Debug)]
pub struct JtagEngine<IO> {
    io: IO,
    tracker: TapTracker,
    ir_length: u8,
}

impl<IO: JtagIo> JtagEngine<IO> {
    /// Create an engine for a chain with a single TAP of the given IR
    /// length.
    pub fn new(io: IO, ir_length: u8) -> Self {
        Self {
            io,
            tracker: TapTracker::new(),
            ir_length,
        }
    }

    /// The engine's state follower.
    pub fn tracker(&self) -> &TapTracker {
        &self.tracker
    }

    fn clock(&mut self, tms: bool, tdi: bool) -> Result<bool, ProbeError> {
        let tdo = self.io.clock(tms, tdi)?;
        self.tracker.clock_tms(tms);
        Ok(tdo)
    }

    /// Force the TAP into Test-Logic-Reset and settle in Run-Test/Idle.
    ///
    /// Five TMS-high cycles reach Reset from any state, even when the
    /// mirror has diverged from the hardware.
    pub fn tap_reset(&mut self) -> Result<(), ProbeError> {
        for _ in 0..5 {
            self.io.clock(true, false)?;
        }
        self.tracker.set_state(TapState::Reset);
        self.move_to(TapState::Idle)
    }

    /// Move between stable states along the shortest TMS path.
    pub fn move_to(&mut self, target: TapState) -> Result<(), ProbeError> {
        let path = tap::tms_path(self.tracker.state(), target);
        for tms in path.iter() {
            self.clock(tms, false)?;
        }
        debug_assert_eq!(self.tracker.state(), target);
        Ok(())
    }

    /// Shift `data` through the register currently between TDI and TDO.
    ///
    /// Must be called in a shift state. The final bit is clocked with TMS
    /// high, leaving the TAP in the corresponding Exit1 state. Returns the
    /// captured bits.
    fn shift(&mut self, data: &BitSlice<u8, Lsb0>) -> Result<BitVec<u8, Lsb0>, ProbeError> {
        debug_assert!(matches!(
            self.tracker.state(),
            TapState::DrShift | TapState::IrShift
        ));

        let mut captured = BitVec::with_capacity(data.len());
        for (i, bit) in data.iter().by_vals().enumerate() {
            let last = i == data.len() - 1;
            captured.push(self.clock(last, bit)?);
        }
        Ok(captured)
    }

    /// From an Exit1 state, latch the register and return to Run-Test/Idle.
    fn update_and_idle(&mut self) -> Result<(), ProbeError> {
        self.clock(true, false)?;
        self.clock(false, false)?;
        debug_assert_eq!(self.tracker.state(), TapState::Idle);
        Ok(())
    }

    /// Select an instruction register value (SIR).
    pub fn write_ir(&mut self, ir: u32) -> Result<(), ProbeError> {
        tracing::trace!("SIR {:#x} ({} bits)", ir, self.ir_length);
        let bytes = ir.to_le_bytes();
        self.move_to(TapState::IrShift)?;
        self.shift(&bytes.view_bits::<Lsb0>()[..self.ir_length as usize])?;
        self.update_and_idle()
    }

    /// Perform a 32-bit DR scan (SDR), returning the captured word.
    pub fn scan_dr_32(&mut self, value: u32) -> Result<u32, ProbeError> {
        let bytes = value.to_le_bytes();
        self.move_to(TapState::DrShift)?;
        let captured = self.shift(bytes.view_bits::<Lsb0>())?;
        self.update_and_idle()?;
        let word = captured.load_le::<u32>();
        tracing::trace!("SDR out {:#010x} in {:#010x}", value, word);
        Ok(word)
    }

    /// Spend `count` TCK cycles in Run-Test/Idle.
    pub fn idle_clocks(&mut self, count: u32) -> Result<(), ProbeError> {
        self.move_to(TapState::Idle)?;
        for _ in 0..count {
            self.clock(false, false)?;
        }
        Ok(())
    }
}

impl<IO: JtagIo> EjtagAccess for JtagEngine<IO> {
    fn set_instr(&mut self, instr: u32) -> Result<(), EjtagError> {
        self.write_ir(instr).map_err(EjtagError::from)
    }

    fn drscan_32(&mut self, value: u32) -> Result<u32, EjtagError> {
        self.scan_dr_32(value).map_err(EjtagError::from)
    }

    fn add_clocks(&mut self, count: u32) -> Result<(), EjtagError> {
        self.idle_clocks(count).map_err(EjtagError::from)
    }

    fn execute_queue(&mut self) -> Result<(), EjtagError> {
        self.io.flush().map_err(EjtagError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::tap::next_state;
    use pretty_assertions::assert_eq;

    /// Software model of a single-TAP chain with a 5-bit IR and two DRs:
    /// IDCODE (IR 0x01) and BYPASS (anything else).
    struct SoftTap {
        state: TapState,
        ir_shift: u32,
        ir: u32,
        dr_shift: u64,
        idcode: u32,
    }

    impl SoftTap {
        fn new(idcode: u32) -> Self {
            Self {
                state: TapState::Reset,
                ir_shift: 0,
                ir: 0x01,
                dr_shift: 0,
                idcode,
            }
        }
    }

    impl JtagIo for SoftTap {
        fn clock(&mut self, tms: bool, tdi: bool) -> Result<bool, ProbeError> {
            let tdo = match self.state {
                TapState::IrShift => {
                    let out = self.ir_shift & 1 != 0;
                    self.ir_shift = (self.ir_shift >> 1) | ((tdi as u32) << 4);
                    out
                }
                TapState::DrShift => {
                    let out = self.dr_shift & 1 != 0;
                    self.dr_shift = (self.dr_shift >> 1) | ((tdi as u64) << 31);
                    out
                }
                _ => false,
            };

            self.state = next_state(self.state, tms);
            match self.state {
                TapState::IrCapture => self.ir_shift = 0b00001,
                TapState::IrUpdate => self.ir = self.ir_shift,
                TapState::DrCapture => {
                    self.dr_shift = if self.ir == 0x01 {
                        self.idcode as u64
                    } else {
                        0
                    };
                }
                _ => {}
            }
            Ok(tdo)
        }
    }

    #[test]
    fn engine_tracks_the_hardware_state() {
        let mut engine = JtagEngine::new(SoftTap::new(0xDEAD_BEEF), 5);
        engine.tap_reset().unwrap();
        assert_eq!(engine.tracker().state(), TapState::Idle);
        assert_eq!(engine.io.state, TapState::Idle);

        engine.move_to(TapState::DrPause).unwrap();
        assert_eq!(engine.io.state, TapState::DrPause);
        assert_eq!(engine.tracker().state(), TapState::DrPause);

        engine.move_to(TapState::Idle).unwrap();
        assert_eq!(engine.io.state, TapState::Idle);
    }

    #[test]
    fn idcode_scan_round_trip() {
        let mut engine = JtagEngine::new(SoftTap::new(0x4BA0_0477), 5);
        engine.tap_reset().unwrap();

        engine.write_ir(0x01).unwrap();
        assert_eq!(engine.io.ir, 0x01);

        let idcode = engine.scan_dr_32(0).unwrap();
        assert_eq!(idcode, 0x4BA0_0477);
        assert_eq!(engine.tracker().state(), TapState::Idle);
    }

    #[test]
    fn ir_latches_on_update() {
        let mut engine = JtagEngine::new(SoftTap::new(0), 5);
        engine.tap_reset().unwrap();
        engine.write_ir(0x0A).unwrap();
        assert_eq!(engine.io.ir, 0x0A);

        // A non-IDCODE IR selects the zeroed register.
        assert_eq!(engine.scan_dr_32(0xFFFF_FFFF).unwrap(), 0);
    }

    #[test]
    fn idle_clocks_stay_in_idle() {
        let mut engine = JtagEngine::new(SoftTap::new(0), 5);
        engine.tap_reset().unwrap();
        engine.idle_clocks(5).unwrap();
        assert_eq!(engine.io.state, TapState::Idle);
    }
}
