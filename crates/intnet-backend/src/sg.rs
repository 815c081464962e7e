//! Scatter-gather frame descriptor and the trunk-direction bits (spec
//! §4.9; original `INTNETSG`, `fSrc`/`fDst`).

use bitflags::bitflags;

use intnet_ring::GsoContext;

bitflags! {
    /// Which trunk sub-destinations a frame should reach. A trunk is
    /// conceptually two legs (host stack, physical wire); `xmit` gets told
    /// which legs apply so it doesn't have to re-derive that from the
    /// frame itself.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TrunkDst: u32 {
        const WIRE = 1 << 0;
        const HOST = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrunkSrc {
    Host,
    Wire,
}

/// Gather list of borrowed segments making up one frame, plus its optional
/// GSO context. Callers on the hot path build one of these over an
/// already-allocated ring payload rather than copying into an owned
/// buffer.
pub struct Sg<'a> {
    segments: Vec<&'a [u8]>,
    pub gso: Option<GsoContext>,
}

impl<'a> Sg<'a> {
    pub fn new(segments: Vec<&'a [u8]>, gso: Option<GsoContext>) -> Self {
        Self { segments, gso }
    }

    pub fn single(frame: &'a [u8]) -> Self {
        Self {
            segments: vec![frame],
            gso: None,
        }
    }

    pub fn segments(&self) -> &[&'a [u8]] {
        &self.segments
    }

    pub fn total_len(&self) -> usize {
        self.segments.iter().map(|s| s.len()).sum()
    }

    /// Copies every segment, in order, into `out`. Panics if `out` is
    /// shorter than `total_len()` — callers size their destination from
    /// `total_len()` first (mirrors `IntNetSgRead`).
    pub fn read_into(&self, out: &mut [u8]) {
        let mut offset = 0;
        for seg in &self.segments {
            out[offset..offset + seg.len()].copy_from_slice(seg);
            offset += seg.len();
        }
    }

    /// The first `n` bytes, assuming they all live in the first segment
    /// (true of every caller in this workspace, which always puts the full
    /// Ethernet header in one contiguous segment).
    pub fn header_bytes(&self, n: usize) -> Option<&'a [u8]> {
        let first = *self.segments.first()?;
        first.get(..n)
    }
}
