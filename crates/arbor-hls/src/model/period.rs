use bytes::Bytes;
use tracing::warn;
use url::Url;

use super::{AdaptationSet, CryptoMode, EncryptionState, Segment, StreamType};

/// Reserved index of the "no encryption" PSSH-set entry.
pub const PSSH_SET_CLEAR: u16 = 0;

/// Lazily resolved key material for a PSSH set.
///
/// AES-128 keys are fetched on first use from `OnDataArrived`; `Unavailable`
/// records a fetch that failed for good so segments are emitted zero-filled
/// instead of retrying forever.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum KeyResolution {
    #[default]
    Pending,
    Resolved(Bytes),
    Unavailable,
}

/// The identity of an encryption descriptor, used for structural interning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PsshSetData {
    /// Opaque pssh payload: the key URL for AES-128, the base64 pssh box for
    /// Widevine.
    pub pssh: Bytes,
    pub default_kid: Bytes,
    pub iv: Bytes,
    pub crypto_mode: CryptoMode,
    pub stream_type: StreamType,
}

/// One slot of a period's key catalog.
#[derive(Clone, Debug)]
pub struct PsshSet {
    pub pssh: Bytes,
    pub default_kid: Bytes,
    pub iv: Bytes,
    pub crypto_mode: CryptoMode,
    pub stream_type: StreamType,
    /// Live references from representations and segments.
    pub usage_count: u32,
    pub key: KeyResolution,
}

impl PsshSet {
    fn clear_entry() -> Self {
        Self {
            pssh: Bytes::new(),
            default_kid: Bytes::new(),
            iv: Bytes::new(),
            crypto_mode: CryptoMode::None,
            stream_type: StreamType::NoType,
            usage_count: 0,
            key: KeyResolution::Pending,
        }
    }

    fn from_data(data: &PsshSetData) -> Self {
        Self {
            pssh: data.pssh.clone(),
            default_kid: data.default_kid.clone(),
            iv: data.iv.clone(),
            crypto_mode: data.crypto_mode,
            stream_type: data.stream_type,
            usage_count: 0,
            key: KeyResolution::Pending,
        }
    }

    fn matches(&self, data: &PsshSetData) -> bool {
        self.pssh == data.pssh
            && self.default_kid == data.default_kid
            && self.iv == data.iv
            && self.crypto_mode == data.crypto_mode
            && self.stream_type == data.stream_type
    }
}

/// A contiguous-PTS region of the presentation; boundaries are
/// discontinuities. Owns the adaptation sets and the per-period key catalog.
#[derive(Clone, Debug)]
pub struct Period {
    pub id: u32,
    /// Ticks per second for period-level durations.
    pub timescale: u64,
    pub start: u64,
    pub start_pts: u64,
    /// Duration in `timescale` ticks.
    pub duration: u64,
    /// Discontinuity sequence number of this period.
    pub sequence: u64,
    pub encryption_state: EncryptionState,
    /// Bitmask of stream types muxed into another representation.
    included_stream_mask: u32,
    pub base_url: Option<Url>,
    pub adaptation_sets: Vec<AdaptationSet>,
    pssh_sets: Vec<PsshSet>,
}

impl Period {
    pub fn new(timescale: u64) -> Self {
        Self {
            id: 0,
            timescale,
            start: 0,
            start_pts: 0,
            duration: 0,
            sequence: 0,
            encryption_state: EncryptionState::Clear,
            included_stream_mask: 0,
            base_url: None,
            adaptation_sets: Vec::new(),
            pssh_sets: vec![PsshSet::clear_entry()],
        }
    }

    pub fn pssh_sets(&self) -> &[PsshSet] {
        &self.pssh_sets
    }

    pub fn pssh_set(&self, index: u16) -> Option<&PsshSet> {
        self.pssh_sets.get(index as usize)
    }

    pub fn pssh_set_mut(&mut self, index: u16) -> Option<&mut PsshSet> {
        self.pssh_sets.get_mut(index as usize)
    }

    /// Intern an encryption descriptor, or count a clear reference when
    /// `data` is `None`.
    ///
    /// Interning is by structural equality over the whole descriptor,
    /// skipping the reserved clear slot. A matching slot that is still in
    /// use is reused; a matching slot whose usage dropped to zero is
    /// overwritten in place. The returned slot's usage count is incremented
    /// either way.
    pub fn insert_pssh_set(&mut self, data: Option<&PsshSetData>) -> u16 {
        let Some(data) = data else {
            self.pssh_sets[PSSH_SET_CLEAR as usize].usage_count += 1;
            return PSSH_SET_CLEAR;
        };

        let found = self
            .pssh_sets
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, slot)| slot.matches(data))
            .map(|(idx, _)| idx);

        let idx = match found {
            Some(idx) => {
                if self.pssh_sets[idx].usage_count == 0 {
                    // Repurpose the unused slot with the fresh descriptor
                    self.pssh_sets[idx] = PsshSet::from_data(data);
                }
                idx
            }
            None => {
                self.pssh_sets.push(PsshSet::from_data(data));
                self.pssh_sets.len() - 1
            }
        };

        self.pssh_sets[idx].usage_count += 1;
        idx as u16
    }

    /// Count one more live reference to an existing slot.
    pub fn retain_pssh_set(&mut self, index: u16) {
        match self.pssh_sets.get_mut(index as usize) {
            Some(slot) => slot.usage_count += 1,
            None => warn!(index, "arbor-hls: retain on missing PSSH set"),
        }
    }

    /// Drop one live reference from a slot.
    pub fn release_pssh_set(&mut self, index: u16) {
        match self.pssh_sets.get_mut(index as usize) {
            Some(slot) => slot.usage_count = slot.usage_count.saturating_sub(1),
            None => warn!(index, "arbor-hls: release on missing PSSH set"),
        }
    }

    /// Detach every representation referencing `index`.
    pub fn remove_pssh_set(&mut self, index: u16) {
        for adp_set in &mut self.adaptation_sets {
            adp_set.representations.retain(|rep| rep.pssh_set != index);
        }
    }

    pub fn mark_included_stream(&mut self, stream_type: StreamType) {
        self.included_stream_mask |= stream_type.bit();
    }

    pub fn includes_stream(&self, stream_type: StreamType) -> bool {
        self.included_stream_mask & stream_type.bit() != 0
    }

    /// Duplicate structural metadata for a discontinuity split.
    ///
    /// Adaptation sets and representations keep their positions so index
    /// addressing stays stable across periods; segment timelines and the key
    /// catalog start empty.
    pub fn copy_for_discontinuity(&self) -> Self {
        Self {
            id: 0,
            timescale: self.timescale,
            start: self.start,
            start_pts: self.start_pts,
            duration: self.duration,
            sequence: 0,
            encryption_state: self.encryption_state,
            included_stream_mask: self.included_stream_mask,
            base_url: self.base_url.clone(),
            adaptation_sets: self
                .adaptation_sets
                .iter()
                .map(AdaptationSet::copy_structure)
                .collect(),
            pssh_sets: vec![PsshSet::clear_entry()],
        }
    }

    /// Release the key references of a representation's timeline and clear it.
    pub fn free_segments(&mut self, adp: usize, rep: usize) {
        let old: Vec<u16> = {
            let Some(rep) = self
                .adaptation_sets
                .get_mut(adp)
                .and_then(|a| a.representations.get_mut(rep))
            else {
                return;
            };
            rep.timeline.drain(..).map(|s| s.pssh_set).collect()
        };
        for index in old {
            self.release_pssh_set(index);
        }
    }

    /// Replace a representation's timeline with a freshly built one.
    ///
    /// The old timeline is freed first, then the buffers are swapped, so
    /// readers observe either the old or the new timeline, never a partial
    /// one. `new_segments` is left empty.
    pub fn install_timeline(
        &mut self,
        adp: usize,
        rep: usize,
        new_segments: &mut Vec<Segment>,
        start_number: u64,
    ) {
        self.free_segments(adp, rep);
        if let Some(rep) = self
            .adaptation_sets
            .get_mut(adp)
            .and_then(|a| a.representations.get_mut(rep))
        {
            std::mem::swap(&mut rep.timeline, new_segments);
            rep.start_number = start_number;
        }
    }

    /// Replace a representation's initialization segment, keeping key usage
    /// counts balanced.
    pub fn set_initialization(&mut self, adp: usize, rep: usize, init: Segment) {
        let (old, pssh_set) = {
            let Some(rep) = self
                .adaptation_sets
                .get_mut(adp)
                .and_then(|a| a.representations.get_mut(rep))
            else {
                return;
            };
            let old = rep.initialization.take().map(|s| s.pssh_set);
            let pssh_set = init.pssh_set;
            rep.initialization = Some(init);
            rep.has_initialization = true;
            (old, pssh_set)
        };
        if let Some(old) = old {
            self.release_pssh_set(old);
        }
        self.retain_pssh_set(pssh_set);
    }
}

#[cfg(test)]
mod tests {
    use super::super::Representation;
    use super::*;

    fn data(pssh: &str, kid: &[u8]) -> PsshSetData {
        PsshSetData {
            pssh: Bytes::copy_from_slice(pssh.as_bytes()),
            default_kid: Bytes::copy_from_slice(kid),
            iv: Bytes::new(),
            crypto_mode: CryptoMode::None,
            stream_type: StreamType::Video,
        }
    }

    #[test]
    fn clear_insert_counts_on_slot_zero() {
        let mut period = Period::new(1_000_000);
        assert_eq!(period.insert_pssh_set(None), PSSH_SET_CLEAR);
        assert_eq!(period.insert_pssh_set(None), PSSH_SET_CLEAR);
        assert_eq!(period.pssh_sets()[0].usage_count, 2);
    }

    #[test]
    fn interning_dedups_structurally_equal_descriptors() {
        let mut period = Period::new(1_000_000);
        let k1 = data("https://keys/k1", b"0123456789abcdef");

        let a = period.insert_pssh_set(Some(&k1));
        let b = period.insert_pssh_set(Some(&k1));
        assert_eq!(a, b);
        assert_eq!(period.pssh_sets()[a as usize].usage_count, 2);

        let k2 = data("https://keys/k2", b"0123456789abcdef");
        let c = period.insert_pssh_set(Some(&k2));
        assert_ne!(a, c);
        assert_eq!(period.pssh_sets().len(), 3);
    }

    #[test]
    fn unused_slot_is_repurposed() {
        let mut period = Period::new(1_000_000);
        let k1 = data("https://keys/k1", b"0123456789abcdef");
        let idx = period.insert_pssh_set(Some(&k1));
        period.release_pssh_set(idx);
        assert_eq!(period.pssh_sets()[idx as usize].usage_count, 0);

        // A different descriptor lands in the freed slot only when it
        // matches; otherwise it appends.
        let k2 = data("https://keys/k2", b"0123456789abcdef");
        let idx2 = period.insert_pssh_set(Some(&k2));
        assert_ne!(idx, idx2);

        // Matching descriptor with zero usage overwrites in place.
        period.release_pssh_set(idx2);
        let idx3 = period.insert_pssh_set(Some(&k2));
        assert_eq!(idx2, idx3);
        assert_eq!(period.pssh_sets()[idx3 as usize].usage_count, 1);
    }

    #[test]
    fn remove_pssh_set_detaches_representations() {
        let mut period = Period::new(1_000_000);
        let mut adp = AdaptationSet::new(StreamType::Video);
        let mut attached = Representation::new();
        attached.pssh_set = 1;
        adp.representations.push(attached);
        adp.representations.push(Representation::new());
        period.adaptation_sets.push(adp);

        period.remove_pssh_set(1);
        assert_eq!(period.adaptation_sets[0].representations.len(), 1);
        assert!(
            period.adaptation_sets[0]
                .representations
                .iter()
                .all(|r| r.pssh_set != 1)
        );
    }

    #[test]
    fn copy_for_discontinuity_keeps_structure_not_state() {
        let mut period = Period::new(90_000);
        period.sequence = 7;
        period.mark_included_stream(StreamType::Audio);
        let mut adp = AdaptationSet::new(StreamType::Video);
        adp.representations.push(Representation::new());
        period.adaptation_sets.push(adp);
        period.insert_pssh_set(Some(&data("https://keys/k1", b"0123456789abcdef")));

        let copy = period.copy_for_discontinuity();
        assert_eq!(copy.timescale, 90_000);
        assert_eq!(copy.sequence, 0);
        assert!(copy.includes_stream(StreamType::Audio));
        assert_eq!(copy.adaptation_sets.len(), 1);
        assert_eq!(copy.adaptation_sets[0].representations.len(), 1);
        assert_eq!(copy.pssh_sets().len(), 1);
    }
}
