//! Core register cache.
//!
//! One entry per architectural register, holding the last value exchanged
//! with the target plus the `valid`/`dirty` pair that drives context
//! save/restore: after debug entry every entry is valid and clean; writes
//! from the front end only mark entries dirty, and resume flushes them back
//! before restarting the core.

use crate::error::Error;

/// Static description of one core register.
#[derive(Debug, Clone, Copy)]
pub struct RegisterDescription {
    /// Architectural name, e.g. `"r5"` or `"badvaddr"`.
    pub name: &'static str,
    /// Width in bits.
    pub size: u32,
}

/// One cached register value.
#[derive(Debug, Clone)]
pub struct CachedRegister {
    desc: RegisterDescription,
    value: u32,
    valid: bool,
    dirty: bool,
}

impl CachedRegister {
    /// Architectural register name.
    pub fn name(&self) -> &'static str {
        self.desc.name
    }

    /// Register width in bits.
    pub fn size(&self) -> u32 {
        self.desc.size
    }

    /// Whether the cached value reflects the target.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Whether a write-back to the target is pending.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The cached value. Meaningless while `!is_valid()`.
    pub fn value(&self) -> u32 {
        self.value
    }
}

/// Register cache for one target.
#[derive(Debug)]
pub struct RegisterCache {
    regs: Vec<CachedRegister>,
}

impl RegisterCache {
    /// Build a cache with all entries invalid.
    pub fn new(descriptions: &[RegisterDescription]) -> Self {
        Self {
            regs: descriptions
                .iter()
                .map(|&desc| CachedRegister {
                    desc,
                    value: 0,
                    valid: false,
                    dirty: false,
                })
                .collect(),
        }
    }

    /// Number of registers in the cache.
    pub fn len(&self) -> usize {
        self.regs.len()
    }

    /// Whether the cache is empty (it never is for a real target).
    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }

    /// Look at one entry.
    pub fn get(&self, num: usize) -> Result<&CachedRegister, Error> {
        self.regs
            .get(num)
            .ok_or(Error::InvalidArgument("register number out of range"))
    }

    /// Find a register by architectural name.
    pub fn get_by_name(&self, name: &str) -> Option<(usize, &CachedRegister)> {
        self.regs
            .iter()
            .enumerate()
            .find(|(_, r)| r.desc.name == name)
    }

    /// Record a value read back from the target: valid, clean.
    pub fn update_from_target(&mut self, num: usize, value: u32) {
        let reg = &mut self.regs[num];
        reg.value = value;
        reg.valid = true;
        reg.dirty = false;
    }

    /// Record a value set by the debugger: valid, pending write-back.
    pub fn set(&mut self, num: usize, value: u32) -> Result<(), Error> {
        let reg = self
            .regs
            .get_mut(num)
            .ok_or(Error::InvalidArgument("register number out of range"))?;
        reg.value = value;
        reg.valid = true;
        reg.dirty = true;
        Ok(())
    }

    /// Mark an entry clean after its value was flushed to the target.
    pub fn mark_clean(&mut self, num: usize) {
        self.regs[num].dirty = false;
    }

    /// Drop all cached values, e.g. after the core ran.
    pub fn invalidate_all(&mut self) {
        for reg in &mut self.regs {
            reg.valid = false;
            reg.dirty = false;
        }
    }

    /// Indices of all entries with a pending write-back.
    pub fn dirty_registers(&self) -> Vec<usize> {
        self.regs
            .iter()
            .enumerate()
            .filter(|(_, r)| r.dirty)
            .map(|(i, _)| i)
            .collect()
    }

    /// Iterate all entries.
    pub fn iter(&self) -> impl Iterator<Item = &CachedRegister> {
        self.regs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DESCS: [RegisterDescription; 3] = [
        RegisterDescription {
            name: "r0",
            size: 32,
        },
        RegisterDescription {
            name: "r1",
            size: 32,
        },
        RegisterDescription {
            name: "pc",
            size: 32,
        },
    ];

    #[test]
    fn starts_invalid() {
        let cache = RegisterCache::new(&DESCS);
        assert!(cache.iter().all(|r| !r.is_valid() && !r.is_dirty()));
    }

    #[test]
    fn target_reads_are_clean_debugger_writes_are_dirty() {
        let mut cache = RegisterCache::new(&DESCS);
        cache.update_from_target(0, 0x1234);
        assert!(cache.get(0).unwrap().is_valid());
        assert!(!cache.get(0).unwrap().is_dirty());

        cache.set(1, 0x5678).unwrap();
        assert!(cache.get(1).unwrap().is_dirty());
        assert_eq!(cache.dirty_registers(), vec![1]);

        cache.mark_clean(1);
        assert!(cache.dirty_registers().is_empty());
    }

    #[test]
    fn invalidate_clears_everything() {
        let mut cache = RegisterCache::new(&DESCS);
        cache.update_from_target(2, 0x8000_0000);
        cache.set(0, 1).unwrap();
        cache.invalidate_all();
        assert!(cache.iter().all(|r| !r.is_valid() && !r.is_dirty()));
    }

    #[test]
    fn lookup_by_name() {
        let cache = RegisterCache::new(&DESCS);
        assert_eq!(cache.get_by_name("pc").unwrap().0, 2);
        assert!(cache.get_by_name("r9").is_none());
    }

    #[test]
    fn out_of_range_is_invalid_argument() {
        let mut cache = RegisterCache::new(&DESCS);
        assert!(cache.get(3).is_err());
        assert!(cache.set(3, 0).is_err());
    }
}
