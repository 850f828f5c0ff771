//! Network Signal Adapter
//!
//! Implements the `NetworkMonitor` port with atomics that whatever receives
//! platform connectivity/storage broadcasts writes into.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::ports::{NetworkConditions, NetworkMonitor};

/// Latest network/storage readings, updated from any thread
#[derive(Debug, Default)]
pub struct SharedNetworkMonitor {
    throughput_bps: AtomicU64,
    available_storage_bytes: AtomicU64,
}

impl SharedNetworkMonitor {
    pub fn new(throughput_bps: u64, available_storage_bytes: u64) -> Self {
        Self {
            throughput_bps: AtomicU64::new(throughput_bps),
            available_storage_bytes: AtomicU64::new(available_storage_bytes),
        }
    }

    pub fn update_throughput(&self, bps: u64) {
        self.throughput_bps.store(bps, Ordering::Relaxed);
    }

    pub fn update_available_storage(&self, bytes: u64) {
        self.available_storage_bytes.store(bytes, Ordering::Relaxed);
    }
}

impl NetworkMonitor for SharedNetworkMonitor {
    fn conditions(&self) -> NetworkConditions {
        NetworkConditions {
            throughput_bps: self.throughput_bps.load(Ordering::Relaxed),
            available_storage_bytes: self.available_storage_bytes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_updates_are_visible() {
        let monitor = SharedNetworkMonitor::new(1_000, 2_000);
        assert_eq!(monitor.conditions(), NetworkConditions::new(1_000, 2_000));

        monitor.update_throughput(6_000_000);
        monitor.update_available_storage(42);
        assert_eq!(monitor.conditions(), NetworkConditions::new(6_000_000, 42));
    }
}
