//! Cable-side plumbing: the TAP state model and the bit-bang JTAG engine.

pub mod jtag;
pub mod tap;

pub use jtag::{JtagEngine, JtagIo};
pub use tap::{TapState, TapTracker, TmsSequence};

/// Errors raised by the probe hardware itself.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The cable driver reported an I/O failure.
    #[error("probe I/O failed: {0}")]
    Io(String),
}
