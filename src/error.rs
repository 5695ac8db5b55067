//! The crate-wide error type.

use crate::architecture::arm::ArmError;
use crate::architecture::mips::ejtag::EjtagError;
use crate::probe::ProbeError;

/// The overarching error type which contains all possible errors as
/// variants.
///
/// Operations never abort the process; a failed operation leaves the debug
/// session intact and the caller decides how to proceed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error in the probe driver occurred.
    #[error("An error with the usage of the probe occurred")]
    Probe(#[from] ProbeError),
    /// An ARM specific error occurred.
    #[error("An ARM specific error occurred")]
    Arm(#[from] ArmError),
    /// A MIPS EJTAG specific error occurred.
    #[error("A MIPS EJTAG specific error occurred")]
    Ejtag(#[from] EjtagError),
    /// A handshake bit did not settle within its budget. The operation is
    /// aborted; the session survives.
    #[error("Timeout occurred while waiting for the target")]
    Timeout,
    /// The operation requires the target to be halted.
    #[error("The target is not halted")]
    NotHalted,
    /// A parameter was rejected before touching the target.
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// A bounded resource pool (hardware breakpoint slots, working areas)
    /// is exhausted.
    #[error("Resource not available: {0}")]
    ResourceNotAvailable(&'static str),
    /// An operational invariant was violated.
    #[error("Operation failed: {0}")]
    Fail(&'static str),
    /// Any other error occurred.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
