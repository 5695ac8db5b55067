//! Breakpoint records shared by all targets.

/// Hardware comparator slot versus in-memory opcode patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointType {
    /// Occupies one hardware breakpoint register pair / comparator.
    Hard,
    /// Replaces the instruction in memory with a breakpoint opcode.
    Soft,
}

/// Sentinel stored in [`Breakpoint::set`] for an armed software breakpoint.
pub const SOFT_BREAKPOINT_SET: u32 = 0x11;

/// One breakpoint installed by the front end.
///
/// A breakpoint is *armed* iff `set != 0`. For hardware breakpoints `set`
/// is the claimed slot index plus one; for software breakpoints it is
/// [`SOFT_BREAKPOINT_SET`].
#[derive(Debug, Clone)]
pub struct Breakpoint {
    /// Instruction address.
    pub address: u32,
    /// Instruction length in bytes: 2 (Thumb / MIPS16e) or 4.
    pub length: u32,
    /// Hardware slot or software patch.
    pub bp_type: BreakpointType,
    /// 0 when disarmed; see the type-level docs.
    pub set: u32,
    /// Original instruction bytes, saved while a software breakpoint is
    /// armed (target endianness).
    pub orig_instr: [u8; 4],
}

impl Breakpoint {
    /// A new, disarmed breakpoint.
    pub fn new(address: u32, length: u32, bp_type: BreakpointType) -> Self {
        Self {
            address,
            length,
            bp_type,
            set: 0,
            orig_instr: [0; 4],
        }
    }

    /// Whether the breakpoint is currently armed on the target.
    pub fn is_set(&self) -> bool {
        self.set != 0
    }
}

/// One hardware breakpoint/watchpoint comparator slot as mirrored by the
/// debugger.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComparatorSlot {
    /// Whether the slot is claimed by an armed breakpoint.
    pub used: bool,
    /// Mirrored value (address) register.
    pub value: u32,
    /// Mirrored control register.
    pub control: u32,
    /// Hardware slot number.
    pub number: usize,
    /// Address-match versus context-match capability.
    pub kind: SlotKind,
}

/// Capability of a hardware breakpoint slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotKind {
    /// Plain address comparator.
    #[default]
    Normal,
    /// Context-ID comparator (kept at the tail of the slot table).
    Context,
}
