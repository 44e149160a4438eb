//! Local-storage slot allocation for one generated procedure.
//!
//! Temporaries are allocated and released in irregular order during
//! conversion sequences, so a stack discipline is not enough: the
//! allocator keeps a sorted table of occupied `(slot, width)` ranges and
//! places each request into the lowest gap that fits (first-fit
//! ascending). Keeping the table sorted makes the scan linear.

use smallvec::SmallVec;
use tracing::debug;

use crate::error::Error;

/// An occupied range of consecutive local slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRange {
    pub slot: u16,
    pub width: u16,
}

impl SlotRange {
    fn end(&self) -> u16 {
        self.slot + self.width
    }
}

/// Handle for a live temporary; release consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct SlotHandle {
    slot: u16,
    width: u16,
}

impl SlotHandle {
    pub fn slot(&self) -> u16 {
        self.slot
    }

    pub fn width(&self) -> u16 {
        self.width
    }
}

#[derive(Debug)]
pub struct SlotAllocator {
    /// First index beyond the procedure's fixed, pre-declared locals.
    first_free: u16,
    /// Occupied ranges, sorted by slot, never overlapping.
    occupied: SmallVec<[SlotRange; 8]>,
    /// One past the highest slot ever occupied; the procedure's frame size.
    high_water: u16,
}

impl SlotAllocator {
    pub fn new(first_free: u16) -> Self {
        Self {
            first_free,
            occupied: SmallVec::new(),
            high_water: first_free,
        }
    }

    pub fn first_free(&self) -> u16 {
        self.first_free
    }

    /// Total frame size the assembly step must reserve.
    pub fn frame_size(&self) -> u16 {
        self.high_water
    }

    /// Claim `width` consecutive slots at the lowest index that fits.
    pub fn allocate(&mut self, width: u16) -> Result<SlotHandle, Error> {
        if width == 0 {
            return Err(Error::allocator("zero-width slot allocation"));
        }
        let mut candidate = self.first_free;
        let mut insert_at = self.occupied.len();
        for (i, range) in self.occupied.iter().enumerate() {
            if candidate + width <= range.slot {
                insert_at = i;
                break;
            }
            // No gap before this range; continue past it.
            candidate = candidate.max(range.end());
        }
        let range = SlotRange {
            slot: candidate,
            width,
        };
        self.occupied.insert(insert_at, range);
        self.check_overlap()?;
        self.high_water = self.high_water.max(range.end());
        debug!(slot = range.slot, width, "slot allocated");
        Ok(SlotHandle {
            slot: range.slot,
            width,
        })
    }

    /// Return a temporary to the pool. Releasing a handle the table does
    /// not contain is a compiler defect, never ignored.
    pub fn release(&mut self, handle: SlotHandle) -> Result<(), Error> {
        let pos = self
            .occupied
            .iter()
            .position(|r| r.slot == handle.slot && r.width == handle.width);
        match pos {
            Some(i) => {
                self.occupied.remove(i);
                debug!(slot = handle.slot, width = handle.width, "slot released");
                Ok(())
            }
            None => Err(Error::allocator(format!(
                "release of untracked slot range ({}, {})",
                handle.slot, handle.width
            ))),
        }
    }

    pub fn occupied(&self) -> &[SlotRange] {
        &self.occupied
    }

    /// Defensive invariant check: sorted and non-overlapping.
    fn check_overlap(&self) -> Result<(), Error> {
        for pair in self.occupied.windows(2) {
            if pair[0].end() > pair[1].slot {
                return Err(Error::allocator(format!(
                    "overlapping slot ranges ({}, {}) and ({}, {})",
                    pair[0].slot, pair[0].width, pair[1].slot, pair[1].width
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_into_lowest_gap() {
        let mut a = SlotAllocator::new(5);
        let h1 = a.allocate(1).unwrap();
        assert_eq!(h1.slot(), 5);
        let h2 = a.allocate(2).unwrap();
        assert_eq!(h2.slot(), 6);
        a.release(h1).unwrap();
        let h3 = a.allocate(1).unwrap();
        assert_eq!(h3.slot(), 5);
        // The double-width range survived untouched.
        assert_eq!(a.occupied(), &[
            SlotRange { slot: 5, width: 1 },
            SlotRange { slot: 6, width: 2 },
        ]);
    }

    #[test]
    fn wide_request_skips_narrow_gap() {
        let mut a = SlotAllocator::new(0);
        let h0 = a.allocate(1).unwrap();
        let _h1 = a.allocate(1).unwrap();
        a.release(h0).unwrap();
        // Gap at 0 is one slot wide; a double must go past the blocker.
        let wide = a.allocate(2).unwrap();
        assert_eq!(wide.slot(), 2);
        let narrow = a.allocate(1).unwrap();
        assert_eq!(narrow.slot(), 0);
    }

    #[test]
    fn double_release_is_a_defect() {
        let mut a = SlotAllocator::new(0);
        let h = a.allocate(1).unwrap();
        let forged = SlotHandle {
            slot: h.slot(),
            width: h.width(),
        };
        a.release(h).unwrap();
        let err = a.release(forged).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::AllocatorInvariant);
    }

    #[test]
    fn frame_size_tracks_high_water() {
        let mut a = SlotAllocator::new(3);
        assert_eq!(a.frame_size(), 3);
        let h = a.allocate(2).unwrap();
        assert_eq!(a.frame_size(), 5);
        a.release(h).unwrap();
        // Frame size never shrinks; assembly reserves the peak.
        assert_eq!(a.frame_size(), 5);
    }
}
