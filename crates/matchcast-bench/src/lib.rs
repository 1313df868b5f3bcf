//! Shared helpers for Matchcast benchmarks.

use matchcast_core::{ConnectionId, Hub, Link, LinkError, Outbound};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// A [`Link`] that counts frames and drops them.
#[derive(Debug, Default)]
pub struct CountingLink {
    frames: AtomicU64,
    closed: AtomicBool,
}

impl CountingLink {
    /// Number of frames received so far.
    pub fn count(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl Link for CountingLink {
    fn send(&self, _frame: Outbound) -> Result<(), LinkError> {
        self.frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Relaxed)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

/// Register `count` counting links and return their IDs.
pub fn populate(hub: &Hub, count: usize) -> Vec<(ConnectionId, Arc<CountingLink>)> {
    (0..count)
        .map(|_| {
            let link = Arc::new(CountingLink::default());
            (hub.register(link.clone()), link)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_counting_link_counts_fan_out() {
        let hub = Hub::new();
        let conns = populate(&hub, 3);
        for (id, _) in &conns {
            hub.subscribe(id, "bench").unwrap();
        }

        hub.broadcast_to("bench", "tick", json!(1)).unwrap();
        assert!(conns.iter().all(|(_, link)| link.count() == 1));
    }
}
