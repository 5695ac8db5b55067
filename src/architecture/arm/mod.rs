//! ARMv7-A debug support over the ADIv5 Debug Access Port.

pub mod cortex_a9;
pub mod debug_regs;
pub mod dpm;
pub(crate) mod instructions;
pub mod mmu;

use crate::core::memory_mapped_registers::RegisterAddressOutOfBounds;

/// Address of an access port within the DAP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApAddress(pub u8);

/// The AP wired to the system interconnect; carries bulk memory traffic.
pub const MEMORY_AP: ApAddress = ApAddress(0);

/// The AP wired to the CoreSight debug APB; carries CPUDBG register
/// accesses.
pub const DEBUG_AP: ApAddress = ApAddress(1);

/// ARM specific errors.
#[derive(Debug, thiserror::Error)]
pub enum ArmError {
    /// The DAP transport returned a fault; propagated unchanged.
    #[error("DAP transport fault: {0}")]
    Transport(String),

    /// A debug handshake bit did not settle within its budget.
    #[error("timeout waiting for {0}")]
    Timeout(&'static str),

    /// The operation requires the core to be halted.
    #[error("core is running but operation requires it to be halted")]
    CoreNotHalted,

    /// Register number outside the ARMv7-A set.
    #[error("register number {0} is not valid for ARMv7-A")]
    InvalidRegister(usize),

    /// The core cannot be resumed in its current execution state.
    #[error("cannot resume core in Jazelle state")]
    JazelleResume,

    /// A computed debug-register address left the 32-bit address space.
    #[error(transparent)]
    RegisterAddress(#[from] RegisterAddressOutOfBounds),

    /// An address translation walk hit a fault descriptor.
    #[error("address translation fault for {0:#010x}")]
    TranslationFault(u32),
}

/// The memory-mapped operations the debug core issues against the DAP.
///
/// One AP is selected at a time; the selector is shared mutable state, so
/// every borrower must restore the previous selection before returning
/// (see [`with_ap`]). Single-word accesses are *atomic*: the transport
/// flushes any queued transfers before returning. Block accesses may batch
/// on the wire but complete before the call returns.
pub trait DapAccess {
    /// The currently selected AP.
    fn selected_ap(&self) -> ApAddress;

    /// Select the AP for subsequent accesses.
    fn select_ap(&mut self, ap: ApAddress) -> Result<(), ArmError>;

    /// Atomic 32-bit read through the selected AP.
    fn read_word_32(&mut self, address: u32) -> Result<u32, ArmError>;

    /// Atomic 32-bit write through the selected AP.
    fn write_word_32(&mut self, address: u32, value: u32) -> Result<(), ArmError>;

    /// Block byte read through the selected AP.
    fn read_8(&mut self, address: u32, data: &mut [u8]) -> Result<(), ArmError>;

    /// Block halfword read through the selected AP.
    fn read_16(&mut self, address: u32, data: &mut [u16]) -> Result<(), ArmError>;

    /// Block word read through the selected AP.
    fn read_32(&mut self, address: u32, data: &mut [u32]) -> Result<(), ArmError>;

    /// Block byte write through the selected AP.
    fn write_8(&mut self, address: u32, data: &[u8]) -> Result<(), ArmError>;

    /// Block halfword write through the selected AP.
    fn write_16(&mut self, address: u32, data: &[u16]) -> Result<(), ArmError>;

    /// Block word write through the selected AP.
    fn write_32(&mut self, address: u32, data: &[u32]) -> Result<(), ArmError>;
}

/// Run `f` with `ap` selected, restoring the caller's selection afterwards
/// on both the success and the error path.
pub fn with_ap<R>(
    dap: &mut dyn DapAccess,
    ap: ApAddress,
    f: impl FnOnce(&mut dyn DapAccess) -> Result<R, ArmError>,
) -> Result<R, ArmError> {
    let saved = dap.selected_ap();
    dap.select_ap(ap)?;
    let result = f(dap);
    let restored = dap.select_ap(saved);
    match result {
        Ok(value) => restored.map(|()| value),
        Err(e) => {
            if let Err(restore_err) = restored {
                tracing::warn!("failed to restore AP selection: {restore_err}");
            }
            Err(e)
        }
    }
}
