//! Support for memory-mapped, bitfield-backed debug registers.

/// Computing a register address overflowed the 32-bit address space.
#[derive(Debug, thiserror::Error)]
#[error("register {register} at offset {offset:#x} from base {base_address:#x} is out of the address space")]
pub struct RegisterAddressOutOfBounds {
    register: &'static str,
    base_address: u32,
    offset: u32,
}

/// A memory-mapped register located at a fixed offset from a discovered
/// base address (e.g. the CoreSight CPUDBG block of a Cortex-A core).
pub trait MemoryMappedRegister<T>: Clone + From<T> + Into<T> + Sized + std::fmt::Debug {
    /// Offset of the register from the block base.
    const ADDRESS_OFFSET: u32;
    /// The register's name.
    const NAME: &'static str;

    /// The register's address for a block mapped at `base_address`.
    fn get_mmio_address(base_address: u32) -> Result<u32, RegisterAddressOutOfBounds> {
        base_address
            .checked_add(Self::ADDRESS_OFFSET)
            .ok_or(RegisterAddressOutOfBounds {
                register: Self::NAME,
                base_address,
                offset: Self::ADDRESS_OFFSET,
            })
    }
}

/// Define a [`MemoryMappedRegister`] backed by a [`bitfield::bitfield!`]
/// struct.
///
/// ```ignore
/// memory_mapped_bitfield_register! {
///     /// DBGDRCR - Debug Run Control Register
///     pub struct Dbgdrcr(u32);
///     0x090, "DBGDRCR",
///     impl From;
///     pub _, set_hrq: 0;
/// }
/// ```
macro_rules! memory_mapped_bitfield_register {
    ($(#[$outer:meta])* $vis:vis struct $name:ident($reg_type:ty); $addr:expr, $reg_name:expr, impl From; $($rest:tt)*) => {
        bitfield::bitfield! {
            $(#[$outer])*
            #[derive(Copy, Clone)]
            ($vis) struct $name($reg_type);
            impl Debug;
            $($rest)*
        }

        impl $crate::core::memory_mapped_registers::MemoryMappedRegister<$reg_type> for $name {
            const ADDRESS_OFFSET: u32 = $addr;
            const NAME: &'static str = $reg_name;
        }

        impl From<$name> for $reg_type {
            fn from(register: $name) -> Self {
                register.0
            }
        }

        impl From<$reg_type> for $name {
            fn from(value: $reg_type) -> Self {
                Self(value)
            }
        }
    };
}

pub(crate) use memory_mapped_bitfield_register;
