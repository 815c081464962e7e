//! Guest-facing interface object (spec §3.1, §4.4; original `INTNETIF`).
//!
//! Each `If` owns one [`IntNetBuf`] (its recv/send ring pair) and is
//! addressed by an [`IfHandle`]. Delivery into an interface's recv ring
//! can come from several switching paths concurrently (unicast from
//! another guest, broadcast fan-out, trunk ingress) even though the ring
//! itself is single-producer — `recv_producer_lock` serializes those
//! writers into the single logical producer the ring expects (spec §5
//! lock order: ... → per-interface recv-producer spinlock).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

use intnet_backend::Sg;
use intnet_proto::{IfHandle, InterfaceOpenFlags};
use intnet_ring::Overflow;
use intnet_wire::{IntNetBuf, Mac};

use crate::busy::BusyCounter;

/// Outcome of a blocking `wait_for_recv` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    FrameAvailable,
    Timeout,
    /// The interface was closed (or is closing) while blocked, or will
    /// never see another frame — `IfAbortWait { no_more_waits: true }` was
    /// called. Permanent: every later wait on this handle reports this too.
    Destroyed,
}

pub struct If {
    pub handle: IfHandle,
    pub buf: IntNetBuf,
    mac: Mutex<Mac>,
    flags: InterfaceOpenFlags,
    active: AtomicBool,
    promiscuous: AtomicBool,
    pub busy: BusyCounter,
    recv_producer_lock: Mutex<()>,
    recv_available: Condvar,
    recv_wait_lock: Mutex<()>,
    /// One-shot wake request: set by `abort_wait(false)`, cleared again
    /// after the next wake so it doesn't affect subsequent waits.
    wake_requested: AtomicBool,
    /// Permanent: set by `abort_wait(true)`, never cleared.
    destroyed: AtomicBool,
}

impl If {
    pub fn new(handle: IfHandle, mac: Mac, flags: InterfaceOpenFlags, recv_cap: u32, send_cap: u32) -> Self {
        Self {
            handle,
            buf: IntNetBuf::new(recv_cap, send_cap),
            mac: Mutex::new(mac),
            flags,
            active: AtomicBool::new(false),
            promiscuous: AtomicBool::new(flags.wants_promiscuous()),
            busy: BusyCounter::new(),
            recv_producer_lock: Mutex::new(()),
            recv_available: Condvar::new(),
            recv_wait_lock: Mutex::new(()),
            wake_requested: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn mac(&self) -> Mac {
        *self.mac.lock().unwrap()
    }

    pub fn set_mac(&self, mac: Mac) {
        *self.mac.lock().unwrap() = mac;
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn is_promiscuous(&self) -> bool {
        self.promiscuous.load(Ordering::Acquire)
    }

    pub fn set_promiscuous(&self, on: bool) {
        self.promiscuous.store(on, Ordering::Release);
    }

    pub fn open_flags(&self) -> InterfaceOpenFlags {
        self.flags
    }

    /// Delivers `sg` into this interface's recv ring, serialized against
    /// any other switching path delivering to the same interface at the
    /// same time. Returns `Err(Overflow)` on a full ring — the caller
    /// counts the drop, it never blocks or retries on this path (spec
    /// §4.1: recv-side overflow is lossy).
    pub fn deliver(&self, sg: &Sg<'_>) -> Result<(), Overflow> {
        let _producer = self.recv_producer_lock.lock().unwrap();
        let mut reservation = match sg.gso {
            Some(gso) => self.buf.recv.allocate_gso_frame(sg.total_len(), gso)?,
            None => self.buf.recv.allocate_frame(sg.total_len())?,
        };
        sg.read_into(reservation.payload_mut());
        self.buf.recv.commit(reservation);
        drop(_producer);
        self.notify_recv_avail();
        Ok(())
    }

    fn notify_recv_avail(&self) {
        let _guard = self.recv_wait_lock.lock().unwrap();
        self.recv_available.notify_all();
    }

    /// Blocks up to `timeout` for a frame to become available in the recv
    /// ring, or until `abort_wait` is called.
    pub fn wait_for_recv(&self, timeout: Option<std::time::Duration>) -> WaitOutcome {
        if self.destroyed.load(Ordering::Acquire) {
            return WaitOutcome::Destroyed;
        }
        if !self.buf.recv.is_empty() {
            return WaitOutcome::FrameAvailable;
        }
        let guard = self.recv_wait_lock.lock().unwrap();
        let predicate = |_: &mut ()| {
            !self.destroyed.load(Ordering::Acquire)
                && !self.wake_requested.load(Ordering::Acquire)
                && self.buf.recv.is_empty()
        };
        match timeout {
            Some(d) => {
                let _ = self.recv_available.wait_timeout_while(guard, d, predicate).unwrap();
            }
            None => {
                let _ = self.recv_available.wait_while(guard, predicate).unwrap();
            }
        };
        self.wake_requested.store(false, Ordering::Release);
        if self.destroyed.load(Ordering::Acquire) {
            WaitOutcome::Destroyed
        } else if !self.buf.recv.is_empty() {
            WaitOutcome::FrameAvailable
        } else {
            WaitOutcome::Timeout
        }
    }

    /// `no_more_waits = true` permanently marks this interface destroyed
    /// (closing); `false` just wakes whoever is blocked right now without
    /// affecting later waits.
    pub fn abort_wait(&self, no_more_waits: bool) {
        if no_more_waits {
            self.destroyed.store(true, Ordering::Release);
        } else {
            self.wake_requested.store(true, Ordering::Release);
        }
        self.notify_recv_avail();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deliver_then_wait_sees_frame_without_blocking() {
        let iface = If::new(IfHandle::next(), Mac::DUMMY, InterfaceOpenFlags::empty(), 4096, 4096);
        let frame = vec![0xAAu8; 64];
        iface.deliver(&Sg::single(&frame)).unwrap();
        assert_eq!(
            iface.wait_for_recv(Some(std::time::Duration::from_millis(10))),
            WaitOutcome::FrameAvailable
        );
        assert!(!iface.buf.recv.is_empty());
    }

    #[test]
    fn wait_times_out_when_nothing_arrives() {
        let iface = If::new(IfHandle::next(), Mac::DUMMY, InterfaceOpenFlags::empty(), 4096, 4096);
        let got = iface.wait_for_recv(Some(std::time::Duration::from_millis(20)));
        assert_eq!(got, WaitOutcome::Timeout);
    }

    #[test]
    fn abort_wait_wakes_a_blocked_waiter() {
        use std::sync::Arc;
        let iface = Arc::new(If::new(IfHandle::next(), Mac::DUMMY, InterfaceOpenFlags::empty(), 4096, 4096));
        let waiter = {
            let iface = iface.clone();
            std::thread::spawn(move || iface.wait_for_recv(None))
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        iface.abort_wait(false);
        let got = waiter.join().unwrap();
        assert_eq!(got, WaitOutcome::Timeout);
    }

    #[test]
    fn abort_wait_permanent_marks_every_later_wait_destroyed() {
        let iface = If::new(IfHandle::next(), Mac::DUMMY, InterfaceOpenFlags::empty(), 4096, 4096);
        iface.abort_wait(true);
        assert_eq!(iface.wait_for_recv(Some(std::time::Duration::from_millis(10))), WaitOutcome::Destroyed);
        assert_eq!(iface.wait_for_recv(None), WaitOutcome::Destroyed);
    }
}
