//! Lock-free single-producer/single-consumer frame ring (spec §3.1, §4.1).
//!
//! `off_start`/`off_end` collapse to the constants `0`/`capacity` here: each
//! `RingBuf` owns its own backing allocation rather than sharing one `mmap`
//! region with a sibling ring (see `intnet-wire::IntNetBuf`, which owns two
//! of these plus a stats header). The cursor arithmetic, wrap-via-padding
//! algorithm and acquire/release discipline are otherwise exactly what the
//! spec describes.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::header::{align_up, FrameType, GsoContext, GSO_CTX_SIZE, HDR_ALIGN, HDR_SIZE};

/// The ring refused the allocation: not enough free space for `needed`
/// bytes right now. Per §4.1/§7 this is never surfaced as a hard error to a
/// client; callers count it and either retry or drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overflow;

/// Free-running statistics, read with `Relaxed` loads — cross-thread reads
/// may be torn/stale and are advisory only (§5 "Sharing discipline").
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    pub frames: u64,
    pub bytes: u64,
    pub overflows: u64,
    pub bad_frames: u64,
}

struct Counters {
    frames: AtomicU64,
    bytes: AtomicU64,
    overflows: AtomicU64,
    bad_frames: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Self {
            frames: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            overflows: AtomicU64::new(0),
            bad_frames: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> RingStats {
        RingStats {
            frames: self.frames.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            bad_frames: self.bad_frames.load(Ordering::Relaxed),
        }
    }
}

pub struct RingBuf {
    cap: u32,
    data: UnsafeCell<Box<[u8]>>,
    off_read: AtomicU32,
    off_write: AtomicU32,
    counters: Counters,
}

// SAFETY: `off_read`/`off_write` are the single hand-off point between the
// one producer and one consumer. A producer only ever touches the byte
// range `[off_write, off_write + needed)` before publishing it with a
// `Release` store to `off_write`; a consumer only ever touches
// `[off_read, off_write)` as observed through an `Acquire` load, and only
// advances `off_read` past bytes it has fully read. The two ranges never
// overlap because `writable_bytes` always keeps at least `HDR_SIZE` bytes
// of slack between them.
unsafe impl Sync for RingBuf {}

/// A reserved-but-not-yet-committed frame slot. Write the payload through
/// [`payload_mut`](Self::payload_mut), then call [`RingBuf::commit`].
pub struct FrameReservation<'a> {
    ring: &'a RingBuf,
    header_off: u32,
    payload_off: u32,
    payload_len: u32,
    gso: Option<GsoContext>,
    new_write: u32,
}

impl<'a> FrameReservation<'a> {
    pub fn payload_mut(&mut self) -> &mut [u8] {
        // SAFETY: this range was reserved exclusively for this allocation
        // and isn't visible to the consumer until `commit` publishes it.
        unsafe { self.ring.slice_mut(self.payload_off, self.payload_len) }
    }

    pub fn len(&self) -> usize {
        self.payload_len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.payload_len == 0
    }
}

/// A readable (committed, not yet skipped) frame.
pub struct ReadableFrame<'a> {
    ring: &'a RingBuf,
    header_off: u32,
    payload_off: u32,
    payload_len: u32,
    is_gso: bool,
    next_read: u32,
}

impl<'a> ReadableFrame<'a> {
    pub fn payload(&self) -> &[u8] {
        // SAFETY: this range was published by `commit` (Release) before
        // `next_readable` observed it (Acquire), and the producer cannot
        // reuse it until `skip` advances `off_read` past it.
        unsafe { self.ring.slice(self.payload_off, self.payload_len) }
    }

    pub fn is_gso(&self) -> bool {
        self.is_gso
    }

    pub fn gso_context(&self) -> Option<GsoContext> {
        if !self.is_gso {
            return None;
        }
        let bytes = unsafe { self.ring.slice(self.header_off + HDR_SIZE, GSO_CTX_SIZE) };
        GsoContext::decode(bytes)
    }

    pub fn len(&self) -> usize {
        self.payload_len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.payload_len == 0
    }
}

impl RingBuf {
    /// `capacity_bytes` is rounded up to a multiple of [`HDR_ALIGN`]. Must
    /// be large enough to hold at least a handful of header-only records.
    pub fn new(capacity_bytes: u32) -> Self {
        let cap = align_up(capacity_bytes).max(HDR_ALIGN * 4);
        Self {
            cap,
            data: UnsafeCell::new(vec![0u8; cap as usize].into_boxed_slice()),
            off_read: AtomicU32::new(0),
            off_write: AtomicU32::new(0),
            counters: Counters::new(),
        }
    }

    pub fn capacity_bytes(&self) -> u32 {
        self.cap
    }

    pub fn stats(&self) -> RingStats {
        self.counters.snapshot()
    }

    fn occupied(&self, write: u32, read: u32) -> u32 {
        (write + self.cap - read) % self.cap
    }

    pub fn readable_bytes(&self) -> u32 {
        let write = self.off_write.load(Ordering::Acquire);
        let read = self.off_read.load(Ordering::Acquire);
        self.occupied(write, read)
    }

    pub fn writable_bytes(&self) -> u32 {
        self.cap - HDR_SIZE - self.readable_bytes()
    }

    unsafe fn slice(&self, offset: u32, len: u32) -> &[u8] {
        let ptr = (*self.data.get()).as_ptr();
        std::slice::from_raw_parts(ptr.add(offset as usize), len as usize)
    }

    unsafe fn slice_mut(&self, offset: u32, len: u32) -> &mut [u8] {
        let ptr = (*self.data.get()).as_mut_ptr();
        std::slice::from_raw_parts_mut(ptr.add(offset as usize), len as usize)
    }

    fn write_header_at(&self, offset: u32, hdr: crate::header::IntNetHdr) {
        // SAFETY: caller guarantees `offset` is a reserved, not-yet-visible
        // header slot.
        let bytes = unsafe { self.slice_mut(offset, HDR_SIZE) };
        hdr.encode(bytes);
    }

    fn allocate(
        &self,
        payload_len: u32,
        gso: Option<GsoContext>,
    ) -> Result<FrameReservation<'_>, Overflow> {
        let hdr_extra = if gso.is_some() { GSO_CTX_SIZE } else { 0 };
        let payload_aligned = align_up(payload_len);
        let needed = HDR_SIZE + hdr_extra + payload_aligned;

        if needed > self.cap - HDR_SIZE {
            self.counters.overflows.fetch_add(1, Ordering::Relaxed);
            return Err(Overflow);
        }

        let write = self.off_write.load(Ordering::Acquire);
        let read = self.off_read.load(Ordering::Acquire);
        let tail = self.cap - write;

        let (header_off, wrapped) = if tail >= needed {
            (write, false)
        } else {
            (0, true)
        };
        let gross = if wrapped { tail + needed } else { needed };

        if self.occupied(write, read) + gross > self.cap - HDR_SIZE {
            self.counters.overflows.fetch_add(1, Ordering::Relaxed);
            return Err(Overflow);
        }

        if wrapped && tail > 0 {
            // `tail` is a multiple of HDR_ALIGN (both `cap` and `write` are),
            // so it's always either 0 or >= HDR_SIZE: there's never too
            // little room to fit the Padding header itself.
            debug_assert!(tail >= HDR_SIZE);
            self.write_header_at(
                write,
                crate::header::IntNetHdr {
                    frame_type: FrameType::Padding,
                    len: tail,
                    payload_offset: 0,
                },
            );
        }

        let payload_off = header_off + HDR_SIZE + hdr_extra;
        Ok(FrameReservation {
            ring: self,
            header_off,
            payload_off,
            payload_len,
            gso,
            new_write: (header_off + needed) % self.cap,
        })
    }

    pub fn allocate_frame(&self, len: usize) -> Result<FrameReservation<'_>, Overflow> {
        self.allocate(len as u32, None)
    }

    pub fn allocate_gso_frame(
        &self,
        len: usize,
        gso_ctx: GsoContext,
    ) -> Result<FrameReservation<'_>, Overflow> {
        self.allocate(len as u32, Some(gso_ctx))
    }

    /// Publishes a reservation: payload writes (and the header write here)
    /// happen-before the `Release` store that makes it visible to the
    /// consumer.
    pub fn commit(&self, reservation: FrameReservation<'_>) {
        let frame_type = if reservation.gso.is_some() {
            FrameType::Gso
        } else {
            FrameType::Frame
        };
        if let Some(gso) = reservation.gso {
            let bytes = unsafe {
                self.slice_mut(reservation.header_off + HDR_SIZE, GSO_CTX_SIZE)
            };
            gso.encode(bytes);
        }
        self.write_header_at(
            reservation.header_off,
            crate::header::IntNetHdr {
                frame_type,
                len: reservation.payload_len,
                payload_offset: (reservation.payload_off - reservation.header_off) as i32,
            },
        );
        self.counters.frames.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes
            .fetch_add(reservation.payload_len as u64, Ordering::Relaxed);
        self.off_write.store(reservation.new_write, Ordering::Release);
    }

    /// Returns the next readable (non-padding) frame, silently skipping and
    /// counting padding/corrupt records in place.
    pub fn next_readable(&self) -> Option<ReadableFrame<'_>> {
        loop {
            let read = self.off_read.load(Ordering::Acquire);
            let write = self.off_write.load(Ordering::Acquire);
            if read == write {
                return None;
            }

            let header_bytes = unsafe { self.slice(read, HDR_SIZE) };
            let hdr = match crate::header::IntNetHdr::decode(header_bytes) {
                Some(h) => h,
                None => {
                    // Corrupt header type: count it and advance by one
                    // header width so a single garbled record can't wedge
                    // the ring forever.
                    self.counters.bad_frames.fetch_add(1, Ordering::Relaxed);
                    self.off_read
                        .store((read + HDR_SIZE) % self.cap, Ordering::Release);
                    continue;
                }
            };

            match hdr.frame_type {
                FrameType::Padding => {
                    let skip = hdr.len.max(HDR_SIZE);
                    self.off_read
                        .store((read + skip) % self.cap, Ordering::Release);
                    continue;
                }
                FrameType::Frame | FrameType::Gso => {
                    let is_gso = hdr.frame_type == FrameType::Gso;
                    let hdr_extra = if is_gso { GSO_CTX_SIZE } else { 0 };
                    let payload_off = read + HDR_SIZE + hdr_extra;
                    let needed = HDR_SIZE + hdr_extra + align_up(hdr.len);
                    return Some(ReadableFrame {
                        ring: self,
                        header_off: read,
                        payload_off,
                        payload_len: hdr.len,
                        is_gso,
                        next_read: (read + needed) % self.cap,
                    });
                }
            }
        }
    }

    pub fn skip(&self, frame: ReadableFrame<'_>) {
        self.off_read.store(frame.next_read, Ordering::Release);
    }

    pub fn is_empty(&self) -> bool {
        self.readable_bytes() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Matches the xorshift64 PRNG the teacher's own ring-buffer fuzz test
    /// uses to avoid pulling in `rand` for a std-only crate.
    struct Rng(u64);

    impl Rng {
        fn new(seed: u64) -> Self {
            Self(seed)
        }

        fn next_u32(&mut self) -> u32 {
            let mut x = self.0;
            x ^= x >> 12;
            x ^= x << 25;
            x ^= x >> 27;
            self.0 = x;
            ((x.wrapping_mul(0x2545F4914F6CDD1D)) >> 32) as u32
        }

        fn gen_range(&mut self, max_exclusive: u32) -> u32 {
            if max_exclusive == 0 {
                0
            } else {
                self.next_u32() % max_exclusive
            }
        }
    }

    fn push(rb: &RingBuf, payload: &[u8]) -> Result<(), Overflow> {
        let mut res = rb.allocate_frame(payload.len())?;
        res.payload_mut().copy_from_slice(payload);
        rb.commit(res);
        Ok(())
    }

    fn pop(rb: &RingBuf) -> Option<Vec<u8>> {
        let frame = rb.next_readable()?;
        let data = frame.payload().to_vec();
        rb.skip(frame);
        Some(data)
    }

    #[test]
    fn single_threaded_fuzz_matches_model() {
        let rb = RingBuf::new(512);
        let mut model: std::collections::VecDeque<Vec<u8>> = std::collections::VecDeque::new();
        let mut rng = Rng::new(0xDEAD_BEEF_1234_5678);

        for _ in 0..20_000 {
            match rng.gen_range(3) {
                0 => {
                    let len = rng.gen_range(64) as usize;
                    let data: Vec<u8> = (0..len).map(|_| (rng.next_u32() & 0xFF) as u8).collect();
                    if push(&rb, &data).is_ok() {
                        model.push_back(data);
                    }
                }
                1 => {
                    if let Some(got) = pop(&rb) {
                        assert_eq!(got, model.pop_front().expect("model has data"));
                    } else {
                        assert!(model.is_empty());
                    }
                }
                _ => {
                    let len = rng.gen_range(32) as usize;
                    let data: Vec<u8> = (0..len).map(|_| (rng.next_u32() & 0xFF) as u8).collect();
                    if push(&rb, &data).is_ok() {
                        model.push_back(data);
                    }
                    if let Some(got) = pop(&rb) {
                        assert_eq!(got, model.pop_front().expect("model has data"));
                    }
                }
            }
        }

        while let Some(got) = pop(&rb) {
            assert_eq!(got, model.pop_front().expect("model has data"));
        }
        assert!(model.is_empty());
    }

    #[test]
    fn spsc_preserves_order() {
        let rb = Arc::new(RingBuf::new(1024));
        let producer = rb.clone();
        let consumer = rb.clone();

        const N: u32 = 20_000;
        let writer = std::thread::spawn(move || {
            for i in 0..N {
                loop {
                    if push(&producer, &i.to_le_bytes()).is_ok() {
                        break;
                    }
                    std::thread::yield_now();
                }
            }
        });

        let reader = std::thread::spawn(move || {
            let mut expected = 0u32;
            while expected < N {
                if let Some(data) = pop(&consumer) {
                    let got = u32::from_le_bytes(data.try_into().unwrap());
                    assert_eq!(got, expected);
                    expected += 1;
                }
            }
        });

        writer.join().unwrap();
        reader.join().unwrap();
        assert!(rb.is_empty());
    }

    #[test]
    fn overflow_is_lossy_not_corrupting() {
        let rb = RingBuf::new(256);
        let frame = vec![0xABu8; 64];
        let mut pushed = 0;
        while push(&rb, &frame).is_ok() {
            pushed += 1;
        }
        assert!(pushed >= 1);
        assert!(rb.stats().overflows >= 1);
        assert!(rb.readable_bytes() <= 256);

        for _ in 0..pushed {
            let got = pop(&rb).expect("intact prefix");
            assert_eq!(got, frame);
        }
        assert!(rb.is_empty());
    }

    #[test]
    fn too_large_frame_is_overflow() {
        let rb = RingBuf::new(64);
        let payload = vec![0u8; 10_000];
        assert_eq!(rb.allocate_frame(payload.len()).err(), Some(Overflow));
    }

    #[test]
    fn gso_context_round_trips_through_ring() {
        use crate::header::{GsoContext, GsoType};

        let rb = RingBuf::new(512);
        let gso = GsoContext {
            gso_type: GsoType::Ipv4Tcp,
            header_len: 54,
            unit_size: 1460,
            checksum_offset: 36,
        };
        let mut res = rb.allocate_gso_frame(100, gso).unwrap();
        res.payload_mut().fill(0x42);
        rb.commit(res);

        let frame = rb.next_readable().unwrap();
        assert!(frame.is_gso());
        assert_eq!(frame.gso_context(), Some(gso));
        assert_eq!(frame.payload(), vec![0x42u8; 100].as_slice());
        rb.skip(frame);
        assert!(rb.is_empty());
    }

    #[test]
    fn corrupt_header_is_counted_and_skipped() {
        let rb = RingBuf::new(256);
        push(&rb, b"hello").unwrap();
        // Stomp the committed header's type tag to an invalid value.
        unsafe {
            let s = rb.slice_mut(0, 2);
            s.copy_from_slice(&99u16.to_le_bytes());
        }
        assert!(rb.next_readable().is_none());
        assert_eq!(rb.stats().bad_frames, 1);
    }
}
