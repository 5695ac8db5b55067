//! EJTAG transport: the scan primitives the PrAcc engine drives.

use bitfield::bitfield;

use crate::probe::ProbeError;

/// EJTAG instruction register values.
pub const EJTAG_INST_IDCODE: u32 = 0x01;
/// Implementation register select.
pub const EJTAG_INST_IMPCODE: u32 = 0x03;
/// Address register select.
pub const EJTAG_INST_ADDRESS: u32 = 0x08;
/// Data register select.
pub const EJTAG_INST_DATA: u32 = 0x09;
/// Control register select.
pub const EJTAG_INST_CONTROL: u32 = 0x0A;
/// Combined address/data/control select.
pub const EJTAG_INST_ALL: u32 = 0x0B;
/// Boot straight into the debug exception.
pub const EJTAG_INST_EJTAGBOOT: u32 = 0x0C;
/// Boot normally.
pub const EJTAG_INST_NORMALBOOT: u32 = 0x0D;
/// Fastdata register select.
pub const EJTAG_INST_FASTDATA: u32 = 0x0E;
/// Bypass.
pub const EJTAG_INST_BYPASS: u32 = 0xFF;

/// Debug Control Register in drseg, and the breakpoint discovery block.
pub const EJTAG_DCR: u32 = 0xFF30_0000;
/// Instruction break status (count in bits 27:24).
pub const EJTAG_IBS: u32 = 0xFF30_0004;
/// First instruction break address register; slot `i` at `+ 0x100 * i`.
pub const EJTAG_IBA1: u32 = 0xFF30_0100;
/// Data break status (count in bits 27:24).
pub const EJTAG_DBS: u32 = 0xFF30_0008;
/// First data break address register; slot `i` at `+ 0x100 * i`.
pub const EJTAG_DBA1: u32 = 0xFF30_0200;

/// DCR bit: interrupts enabled while in non-debug mode.
pub const EJTAG_DCR_INTE: u32 = 1 << 4;
/// DCR bit: instruction break unit present.
pub const EJTAG_DCR_IB: u32 = 1 << 16;
/// DCR bit: data break unit present.
pub const EJTAG_DCR_DB: u32 = 1 << 17;

bitfield! {
    /// The 32-bit EJTAG control register.
    #[derive(Copy, Clone)]
    pub struct EjtagCtrl(u32);
    impl Debug;

    /// Reset occurred since last cleared (write 1 to acknowledge).
    pub rocc, set_rocc: 31;
    /// Processor access pending: the core stalled on a dmseg access.
    pub pracc, set_pracc: 18;
    /// Direction of the pending access: set = processor write.
    pub prnw, _: 19;
    /// Debug interrupt request.
    pub jtagbrk, set_jtagbrk: 12;
    /// Probe services dmseg accesses.
    pub proben, set_proben: 15;
    /// Probe trap: fetch the debug vector from dmseg.
    pub probtrap, set_probtrap: 14;
    /// Peripheral reset request.
    pub per_rst, set_per_rst: 20;
    /// Processor reset request.
    pub prrst, set_prrst: 16;
    /// Break status: the core is in debug mode.
    pub brkst, _: 3;
    /// The core is halted (pipeline stopped).
    pub halt, _: 21;
    /// The core is in low-power mode.
    pub doze, _: 22;
}

/// Base value driven on every control scan: acknowledge reset, keep the
/// probe enabled and trap the debug vector to dmseg, leave PrAcc pending.
pub const EJTAG_CTRL_BASE: u32 = (1 << 31) | (1 << 18) | (1 << 15) | (1 << 14);

/// MIPS EJTAG specific errors.
#[derive(Debug, thiserror::Error)]
pub enum EjtagError {
    /// The probe driver failed; propagated unchanged.
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// A handshake did not complete within its budget.
    #[error("timeout waiting for {0}")]
    Timeout(&'static str),

    /// The control register shows no pending processor access.
    #[error("no processor access in progress")]
    PrAccNotPending,

    /// The target issued a dmseg access outside every known region.
    #[error("unexpected processor access to address {0:#010x}")]
    UnexpectedAddress(u32),

    /// The injected snippet popped an empty debug stack.
    #[error("debug stack underflow")]
    StackUnderflow,

    /// The injected snippet overflowed the 32-entry debug stack.
    #[error("debug stack overflow")]
    StackOverflow,

    /// The core did not enter debug mode on request.
    #[error("target did not enter debug mode")]
    DebugModeNotEntered,
}

/// The raw scan operations the MIPS debug core consumes.
///
/// `drscan_32` shifts a 32-bit value through the selected data register
/// and returns the captured value. `add_clocks` queues idle TCK cycles and
/// `execute_queue` flushes any batching the driver does.
pub trait EjtagAccess {
    /// Select an EJTAG instruction register.
    fn set_instr(&mut self, instr: u32) -> Result<(), EjtagError>;

    /// 32-bit DR scan through the selected register.
    fn drscan_32(&mut self, value: u32) -> Result<u32, EjtagError>;

    /// Queue `count` TCK cycles in Run-Test/Idle.
    fn add_clocks(&mut self, count: u32) -> Result<(), EjtagError>;

    /// Flush queued scans to the hardware.
    fn execute_queue(&mut self) -> Result<(), EjtagError>;
}

/// EJTAG front end for one MIPS core.
///
/// Keeps the base control word scanned on every CONTROL access, the way
/// the hardware expects sticky bits to be re-driven.
pub struct MipsEjtag {
    probe: Box<dyn EjtagAccess>,
    /// Control word driven on polls; `& !PRACC` acknowledges an access.
    pub ejtag_ctrl: u32,
}

impl MipsEjtag {
    /// Wrap a raw EJTAG transport.
    pub fn new(probe: Box<dyn EjtagAccess>) -> Self {
        Self {
            probe,
            ejtag_ctrl: EJTAG_CTRL_BASE,
        }
    }

    /// Select an instruction register.
    pub fn set_instr(&mut self, instr: u32) -> Result<(), EjtagError> {
        self.probe.set_instr(instr)
    }

    /// Scan the selected data register.
    pub fn drscan_32(&mut self, value: u32) -> Result<u32, EjtagError> {
        self.probe.drscan_32(value)
    }

    /// Queue idle clocks between protocol steps.
    pub fn add_clocks(&mut self, count: u32) -> Result<(), EjtagError> {
        self.probe.add_clocks(count)
    }

    /// Flush the scan queue.
    pub fn execute_queue(&mut self) -> Result<(), EjtagError> {
        self.probe.execute_queue()
    }

    /// Scan the control register with `value` driven out.
    pub fn control_scan(&mut self, value: u32) -> Result<EjtagCtrl, EjtagError> {
        self.set_instr(EJTAG_INST_CONTROL)?;
        Ok(EjtagCtrl(self.drscan_32(value)?))
    }

    /// Request a debug interrupt (JTAGBRK).
    pub fn jtagbrk(&mut self) -> Result<(), EjtagError> {
        let mut ctrl = EjtagCtrl(self.ejtag_ctrl);
        ctrl.set_jtagbrk(true);
        self.control_scan(ctrl.0)?;
        Ok(())
    }

    /// Whether the core currently sits in debug mode.
    pub fn is_in_debug(&mut self) -> Result<bool, EjtagError> {
        Ok(self.control_scan(self.ejtag_ctrl)?.brkst())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn control_bits_line_up() {
        let mut ctrl = EjtagCtrl(0);
        ctrl.set_pracc(true);
        assert_eq!(ctrl.0, 1 << 18);
        ctrl.set_jtagbrk(true);
        assert_eq!(ctrl.0, (1 << 18) | (1 << 12));
        assert!(!ctrl.prnw());
        assert!(EjtagCtrl(1 << 19).prnw());
        assert!(EjtagCtrl(1 << 3).brkst());
    }

    #[test]
    fn base_control_word() {
        let base = EjtagCtrl(EJTAG_CTRL_BASE);
        assert!(base.rocc());
        assert!(base.pracc());
        assert!(base.proben());
        assert!(base.probtrap());
        assert!(!base.jtagbrk());
    }
}
