//! The two worker slots and which one receives live traffic.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::Mutex;

use crate::orchestrator::launcher::WorkerProcess;

/// Point-in-time view of one worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Worker {
    pub slot: usize,
    pub port: u16,
    pub is_active: bool,
}

/// Holds both worker slots. Exactly one slot is active at any time: the
/// active slot is stored as a single index, so the flags of the two
/// workers can never disagree.
pub struct WorkerPool {
    ports: [u16; 2],
    active: AtomicUsize,
    processes: Mutex<[Option<Box<dyn WorkerProcess>>; 2]>,
}

impl WorkerPool {
    /// Create a pool where `active_slot` (0 or 1) starts out live.
    pub fn new(ports: [u16; 2], active_slot: usize) -> Self {
        Self {
            ports,
            active: AtomicUsize::new(active_slot.min(1)),
            processes: Mutex::new([None, None]),
        }
    }

    fn worker(&self, slot: usize, active: usize) -> Worker {
        Worker {
            slot,
            port: self.ports[slot],
            is_active: slot == active,
        }
    }

    /// The worker currently receiving traffic. Read fresh on every call.
    pub fn active(&self) -> Worker {
        let active = self.active.load(Ordering::Acquire);
        self.worker(active, active)
    }

    pub fn inactive(&self) -> Worker {
        let active = self.active.load(Ordering::Acquire);
        self.worker(1 - active, active)
    }

    pub fn workers(&self) -> [Worker; 2] {
        let active = self.active.load(Ordering::Acquire);
        [self.worker(0, active), self.worker(1, active)]
    }

    /// Flip active and inactive in one step; returns the newly active worker.
    pub(crate) fn swap(&self) -> Worker {
        let previous = self.active.fetch_xor(1, Ordering::AcqRel);
        let active = previous ^ 1;
        self.worker(active, active)
    }

    pub(crate) async fn take_process(&self, slot: usize) -> Option<Box<dyn WorkerProcess>> {
        self.processes.lock().await[slot].take()
    }

    /// Store the live process for a slot, returning whatever was there.
    pub(crate) async fn install_process(
        &self,
        slot: usize,
        process: Box<dyn WorkerProcess>,
    ) -> Option<Box<dyn WorkerProcess>> {
        self.processes.lock().await[slot].replace(process)
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exactly_one_active(pool: &WorkerPool) -> bool {
        pool.workers().iter().filter(|w| w.is_active).count() == 1
    }

    #[test]
    fn starts_with_requested_slot_active() {
        let pool = WorkerPool::new([8001, 8002], 1);
        assert_eq!(pool.active().port, 8002);
        assert_eq!(pool.inactive().port, 8001);
        assert!(exactly_one_active(&pool));
    }

    #[test]
    fn swap_flips_and_keeps_single_active() {
        let pool = WorkerPool::new([8001, 8002], 1);
        for expected in [8001, 8002, 8001, 8002] {
            let now = pool.swap();
            assert_eq!(now.port, expected);
            assert!(now.is_active);
            assert_eq!(pool.active(), now);
            assert!(exactly_one_active(&pool));
        }
    }

    #[test]
    fn out_of_range_slot_is_clamped() {
        let pool = WorkerPool::new([1, 2], 7);
        assert_eq!(pool.active().slot, 1);
    }
}
