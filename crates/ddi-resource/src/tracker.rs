//! Per-sub-resource validity tracking.
//!
//! Every sub-resource carries one [`LockEntry`]: the system-memory mirror location (when the
//! resource has one) and a set of "up to date" flags, one per [`Representation`]. The tracker is
//! the only place the engine consults before assuming a copy is current.

use bitflags::bitflags;

use crate::device::SysMemPtr;
use crate::error::{ResourceError, Result};

/// Physical copy of a logical sub-resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Representation {
    SysMem,
    VidMem,
    Msaa,
    MsaaResolved,
}

impl Representation {
    pub const ALL: [Representation; 4] = [
        Representation::SysMem,
        Representation::VidMem,
        Representation::Msaa,
        Representation::MsaaResolved,
    ];

    pub fn flag(self) -> ValidFlags {
        match self {
            Representation::SysMem => ValidFlags::SYS_MEM,
            Representation::VidMem => ValidFlags::VID_MEM,
            Representation::Msaa => ValidFlags::MSAA,
            Representation::MsaaResolved => ValidFlags::MSAA_RESOLVED,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ValidFlags: u8 {
        const SYS_MEM = 1 << 0;
        const VID_MEM = 1 << 1;
        const MSAA = 1 << 2;
        const MSAA_RESOLVED = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockEntry {
    pub data: Option<SysMemPtr>,
    pub pitch: u32,
    pub valid: ValidFlags,
    /// A CPU write landed in the mirror while the resolved surface was current; the resolved
    /// surface still has to pick up the written texels.
    pub ref_locked: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Tracker {
    entries: Vec<LockEntry>,
}

impl Tracker {
    /// `count` entries, each starting with `initial` valid.
    pub fn new(count: u32, initial: ValidFlags) -> Self {
        Self {
            entries: vec![
                LockEntry {
                    valid: initial,
                    ..LockEntry::default()
                };
                count as usize
            ],
        }
    }

    pub fn len(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, sub_resource: u32) -> Result<&LockEntry> {
        let count = self.len();
        self.entries
            .get(sub_resource as usize)
            .ok_or(ResourceError::InvalidSubResource {
                index: sub_resource,
                count,
            })
    }

    pub fn entry_mut(&mut self, sub_resource: u32) -> Result<&mut LockEntry> {
        let count = self.len();
        self.entries
            .get_mut(sub_resource as usize)
            .ok_or(ResourceError::InvalidSubResource {
                index: sub_resource,
                count,
            })
    }

    pub fn entries(&self) -> &[LockEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [LockEntry] {
        &mut self.entries
    }

    pub fn valid(&self, sub_resource: u32) -> ValidFlags {
        self.entries
            .get(sub_resource as usize)
            .map(|e| e.valid)
            .unwrap_or_default()
    }

    pub fn is_valid(&self, sub_resource: u32, repr: Representation) -> bool {
        self.valid(sub_resource).contains(repr.flag())
    }

    pub fn any_valid(&self, sub_resource: u32) -> bool {
        !self.valid(sub_resource).is_empty()
    }

    /// Records a write to `repr`: every other copy of the sub-resource becomes stale.
    pub fn mark_valid(&mut self, sub_resource: u32, repr: Representation) {
        if let Some(e) = self.entries.get_mut(sub_resource as usize) {
            e.valid = repr.flag();
        }
    }

    /// Records that `repr` was refreshed from another current copy.
    pub fn add_valid(&mut self, sub_resource: u32, repr: Representation) {
        if let Some(e) = self.entries.get_mut(sub_resource as usize) {
            e.valid |= repr.flag();
        }
    }

    pub fn invalidate(&mut self, sub_resource: u32, repr: Representation) {
        if let Some(e) = self.entries.get_mut(sub_resource as usize) {
            e.valid.remove(repr.flag());
        }
    }

    /// Only for reconfiguration, right before the caller marks the surviving copy.
    pub fn invalidate_all(&mut self, sub_resource: u32) {
        if let Some(e) = self.entries.get_mut(sub_resource as usize) {
            e.valid = ValidFlags::empty();
        }
    }

    pub fn is_ref_locked(&self, sub_resource: u32) -> bool {
        self.entries
            .get(sub_resource as usize)
            .is_some_and(|e| e.ref_locked)
    }

    pub fn set_ref_locked(&mut self, sub_resource: u32, ref_locked: bool) {
        if let Some(e) = self.entries.get_mut(sub_resource as usize) {
            e.ref_locked = ref_locked;
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_valid_clears_every_other_flag() {
        let mut t = Tracker::new(2, ValidFlags::all());
        t.mark_valid(1, Representation::Msaa);

        assert_eq!(t.valid(0), ValidFlags::all());
        assert_eq!(t.valid(1), ValidFlags::MSAA);
    }

    #[test]
    fn add_and_invalidate_are_per_representation() {
        let mut t = Tracker::new(1, ValidFlags::VID_MEM);
        t.add_valid(0, Representation::SysMem);
        assert!(t.is_valid(0, Representation::SysMem));
        assert!(t.is_valid(0, Representation::VidMem));

        t.invalidate(0, Representation::VidMem);
        assert_eq!(t.valid(0), ValidFlags::SYS_MEM);
        assert!(t.any_valid(0));

        t.invalidate_all(0);
        assert!(!t.any_valid(0));
    }

    #[test]
    fn out_of_range_sub_resource_is_reported() {
        let t = Tracker::new(1, ValidFlags::VID_MEM);
        assert_eq!(
            t.entry(3).unwrap_err(),
            ResourceError::InvalidSubResource { index: 3, count: 1 }
        );
        assert!(!t.is_valid(3, Representation::VidMem));
    }

    #[test]
    fn ref_lock_flag_round_trips() {
        let mut t = Tracker::new(1, ValidFlags::SYS_MEM);
        assert!(!t.is_ref_locked(0));
        t.set_ref_locked(0, true);
        assert!(t.is_ref_locked(0));
    }
}
