//! GPU→CPU download ring (C6, spec §4.6): tracks which of the `N` staging
//! slots are safe to map without stalling the GPU. The actual texture copy
//! and `Map`/`Unmap` calls are platform-specific (behind [`StagingSlot`]);
//! the indices and the lag invariant are plain arithmetic and are what's
//! tested here (spec §8, testable property 4).

use svr_shared::constants::{DOWNLOAD_RING_LAG, VID_QUEUED_TEXTURES};

/// One ring slot's worth of plane textures the caller copies into and later
/// maps for CPU readback.
pub trait StagingSlot {
    /// Issues the GPU copy (conversion output → this slot's staging
    /// textures) and the explicit pipeline flush spec §4.6 calls for
    /// ("the converter issues an explicit pipeline flush after the copy").
    fn copy_and_flush(&mut self);
    /// Blocking `Map` + row-by-row pitch-aware copy into the caller's
    /// destination frame, followed by `Unmap`.
    fn map_and_copy_out(&mut self);
}

/// The two monotonic counters from spec §3/§4.6, with `N = VID_QUEUED_TEXTURES`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadRing {
    write_idx: u64,
    read_idx: u64,
}

impl DownloadRing {
    pub fn new() -> Self {
        Self { write_idx: 0, read_idx: 0 }
    }

    pub fn write_idx(&self) -> u64 {
        self.write_idx
    }

    pub fn read_idx(&self) -> u64 {
        self.read_idx
    }

    /// The ring-slot index the next write targets.
    pub fn write_slot(&self) -> u64 {
        self.write_idx % VID_QUEUED_TEXTURES
    }

    fn in_flight(&self) -> u64 {
        self.write_idx - self.read_idx
    }

    /// Copies the newly converted frame into the ring and, if the lag
    /// threshold is crossed, also drains one slot via `slot_at(read_idx)`
    /// (spec §4.6: "Mapping ... occurs when `write_idx − read_idx > N − 2`").
    pub fn push_and_maybe_drain(&mut self, write_slot: &mut impl StagingSlot, read_slot: impl FnOnce(u64) -> Option<()>) {
        write_slot.copy_and_flush();
        self.write_idx += 1;
        debug_assert!(self.in_flight() <= VID_QUEUED_TEXTURES, "download ring overflowed");

        if self.in_flight() > VID_QUEUED_TEXTURES - DOWNLOAD_RING_LAG {
            if read_slot(self.read_idx % VID_QUEUED_TEXTURES).is_some() {
                self.read_idx += 1;
            }
        }
    }

    /// Whether a map is currently permitted (spec §4.6's threshold),
    /// exposed separately so callers with owned-not-borrowed slot
    /// collections can drive the copy/map steps themselves.
    pub fn should_drain(&self) -> bool {
        self.in_flight() > VID_QUEUED_TEXTURES - DOWNLOAD_RING_LAG
    }

    pub fn advance_write(&mut self) {
        self.write_idx += 1;
        debug_assert!(self.in_flight() <= VID_QUEUED_TEXTURES, "download ring overflowed");
    }

    pub fn advance_read(&mut self) {
        debug_assert!(self.read_idx < self.write_idx, "nothing queued to read");
        self.read_idx += 1;
    }

    pub fn has_pending(&self) -> bool {
        self.in_flight() > 0
    }

    /// Spec §8, testable property 4: `0 ≤ write_idx − read_idx ≤ N` at every
    /// observable point.
    pub fn invariant_holds(&self) -> bool {
        self.write_idx >= self.read_idx && self.in_flight() <= VID_QUEUED_TEXTURES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSlot;
    impl StagingSlot for NullSlot {
        fn copy_and_flush(&mut self) {}
        fn map_and_copy_out(&mut self) {}
    }

    #[test]
    fn drains_only_once_lag_threshold_is_crossed() {
        let mut ring = DownloadRing::new();
        let mut slot = NullSlot;
        // Fill up to exactly N - LAG in-flight frames: no drain should occur.
        for _ in 0..(VID_QUEUED_TEXTURES - DOWNLOAD_RING_LAG) {
            ring.push_and_maybe_drain(&mut slot, |_| None);
        }
        assert_eq!(ring.read_idx(), 0);
        assert!(ring.invariant_holds());

        // One more push crosses the threshold and should drain.
        let mut drained = false;
        ring.push_and_maybe_drain(&mut slot, |_| {
            drained = true;
            Some(())
        });
        assert!(drained);
        assert_eq!(ring.read_idx(), 1);
    }

    #[test]
    fn invariant_holds_across_many_steady_state_frames() {
        let mut ring = DownloadRing::new();
        let mut slot = NullSlot;
        for _ in 0..500 {
            ring.push_and_maybe_drain(&mut slot, |_| Some(()));
            assert!(ring.invariant_holds());
            assert!(ring.in_flight() <= VID_QUEUED_TEXTURES);
        }
    }

    #[test]
    fn write_slot_wraps_modulo_ring_size() {
        let mut ring = DownloadRing::new();
        for i in 0..(VID_QUEUED_TEXTURES * 2) {
            assert_eq!(ring.write_slot(), i % VID_QUEUED_TEXTURES);
            ring.advance_write();
            if ring.has_pending() && ring.in_flight() > 1 {
                ring.advance_read();
            }
        }
    }

    #[test]
    fn teardown_drain_empties_the_ring() {
        let mut ring = DownloadRing::new();
        for _ in 0..10 {
            ring.advance_write();
        }
        let mut drains = 0;
        while ring.has_pending() {
            ring.advance_read();
            drains += 1;
        }
        assert_eq!(drains, 10);
        assert!(ring.invariant_holds());
    }
}
