//! ARMv7-A short-descriptor address translation.
//!
//! Walks the first- and second-level tables the same way the core's table
//! walker does, using physical reads supplied by the caller. TTB selection
//! lives with the Cortex-A9 target; this module only decodes descriptors.

use super::ArmError;

/// Which translation-table base the next walk should use.
///
/// Set by `virt2phys` from the address-space split before asking for the
/// TTB, and reset to `Any` as soon as the walk finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    /// No walk in progress; derive the TTB from the current CPU mode.
    Any,
    /// Walking a user-space address (TTBR0).
    User,
    /// Walking a kernel address (TTBR1).
    Kernel,
}

/// Translate `va` using the table rooted at `ttb` (already masked to a
/// 16 KiB boundary). `read_phys_word` performs an uncached physical word
/// read.
pub fn translate_va(
    ttb: u32,
    va: u32,
    read_phys_word: &mut dyn FnMut(u32) -> Result<u32, ArmError>,
) -> Result<u32, ArmError> {
    let first_lvl_addr = (ttb & 0xFFFF_C000) | ((va & 0xFFF0_0000) >> 18);
    let first = read_phys_word(first_lvl_addr)?;

    let second_lvl_addr = match first & 0x3 {
        // Section: 1 MiB mapping, done.
        0b10 => {
            let pa = (first & 0xFFF0_0000) | (va & 0x000F_FFFF);
            tracing::debug!("v2p section {:#010x} -> {:#010x}", va, pa);
            return Ok(pa);
        }
        // Coarse second-level table.
        0b01 => (first & 0xFFFF_FC00) | ((va & 0x000F_F000) >> 10),
        // Fine second-level table.
        0b11 => (first & 0xFFFF_F000) | ((va & 0x000F_FC00) >> 8),
        _ => return Err(ArmError::TranslationFault(va)),
    };

    let second = read_phys_word(second_lvl_addr)?;
    let pa = match second & 0x3 {
        // Large page, 64 KiB.
        0b01 => (second & 0xFFFF_0000) | (va & 0x0000_FFFF),
        // Small page, 4 KiB.
        0b10 => (second & 0xFFFF_F000) | (va & 0x0000_0FFF),
        // Tiny page, 1 KiB.
        0b11 => (second & 0xFFFF_FC00) | (va & 0x0000_03FF),
        _ => return Err(ArmError::TranslationFault(va)),
    };
    tracing::debug!("v2p page {:#010x} -> {:#010x}", va, pa);
    Ok(pa)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn reader(mem: HashMap<u32, u32>) -> impl FnMut(u32) -> Result<u32, ArmError> {
        move |addr| Ok(*mem.get(&addr).unwrap_or(&0))
    }

    const TTB: u32 = 0x4000_4000;

    #[test]
    fn section_translation() {
        // VA 0xC010_1234 -> section descriptor mapping to PA 0x8010_0000.
        let va: u32 = 0xC010_1234;
        let l1 = (TTB & 0xFFFF_C000) | ((va & 0xFFF0_0000) >> 18);
        let mut read = reader(HashMap::from([(l1, 0x8010_0000 | 0b10)]));
        assert_eq!(translate_va(TTB, va, &mut read).unwrap(), 0x8010_1234);
    }

    #[test]
    fn small_page_translation() {
        let va: u32 = 0x0001_2ABC;
        let l1 = (TTB & 0xFFFF_C000) | ((va & 0xFFF0_0000) >> 18);
        let l2_base: u32 = 0x4100_0400;
        let l2 = (l2_base & 0xFFFF_FC00) | ((va & 0x000F_F000) >> 10);
        let mut read = reader(HashMap::from([
            (l1, l2_base | 0b01),
            (l2, 0x8765_4000 | 0b10),
        ]));
        assert_eq!(translate_va(TTB, va, &mut read).unwrap(), 0x8765_4ABC);
    }

    #[test]
    fn large_page_translation() {
        let va: u32 = 0x0123_8765;
        let l1 = (TTB & 0xFFFF_C000) | ((va & 0xFFF0_0000) >> 18);
        let l2_base: u32 = 0x4100_0000;
        let l2 = (l2_base & 0xFFFF_FC00) | ((va & 0x000F_F000) >> 10);
        let mut read = reader(HashMap::from([
            (l1, l2_base | 0b01),
            (l2, 0x5555_0000 | 0b01),
        ]));
        assert_eq!(translate_va(TTB, va, &mut read).unwrap(), 0x5555_8765);
    }

    #[test]
    fn fault_descriptors_error() {
        let mut read = reader(HashMap::new());
        assert!(matches!(
            translate_va(TTB, 0x1000, &mut read),
            Err(ArmError::TranslationFault(0x1000))
        ));
    }
}
