use crate::topology::SlotId;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tracing::error;

/// Process wide counters for the write sessions of one round
#[derive(Debug)]
pub struct RoundMonitor {
    open: AtomicUsize,
    peak: AtomicUsize,
    held: Vec<AtomicBool>,
    collisions: AtomicUsize,
    bytes: AtomicU64,
    writes: AtomicUsize,
}

impl RoundMonitor {
    pub fn new(files: usize) -> Self {
        Self {
            open: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            held: (0..files).map(|_| AtomicBool::new(false)).collect(),
            collisions: AtomicUsize::new(0),
            bytes: AtomicU64::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// mark `slot` as open until the returned guard is dropped
    pub fn enter(&self, slot: SlotId) -> SlotGuard<'_> {
        let open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(open, Ordering::SeqCst);

        if let Some(held) = self.held.get(slot) {
            if held.swap(true, Ordering::SeqCst) {
                error!(slot, "Slot opened while another session still holds it");
                self.collisions.fetch_add(1, Ordering::SeqCst);
            }
        }

        SlotGuard {
            monitor: self,
            slot,
        }
    }

    pub fn record_write(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::SeqCst);
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// highest number of simultaneously open slot files seen so far
    pub fn peak_open(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// sessions that opened a slot someone else was still writing
    pub fn collisions(&self) -> usize {
        self.collisions.load(Ordering::SeqCst)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

/// Open slot marker, released on drop
#[derive(Debug)]
pub struct SlotGuard<'m> {
    monitor: &'m RoundMonitor,
    slot: SlotId,
}

impl SlotGuard<'_> {
    pub fn monitor(&self) -> &RoundMonitor {
        self.monitor
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if let Some(held) = self.monitor.held.get(self.slot) {
            held.store(false, Ordering::SeqCst);
        }

        self.monitor.open.fetch_sub(1, Ordering::SeqCst);
    }
}
