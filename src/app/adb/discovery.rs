//! Wireless-debugging port discovery.
//!
//! The mDNS/NSD resolver itself lives on the platform side; it reports what it finds into a
//! [`DiscoveryState`] and the bootstrap only ever reads [`DiscoverySnapshot`]s.

use std::sync::Mutex;

use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiscoverySnapshot {
    pub pending_resolves: bool,
    pub adb_port: Option<u16>,
    /// When the resolver last found a service.
    pub alive_time: Option<Instant>,
}

pub trait DiscoveryProbe: Send + Sync {
    fn snapshot(&self) -> DiscoverySnapshot;
}

#[derive(Debug, Default)]
struct DiscoveryInner {
    pending: usize,
    adb_port: Option<u16>,
    alive_time: Option<Instant>,
}

/// Shared resolver state written by the NSD bridge.
#[derive(Debug, Default)]
pub struct DiscoveryState {
    inner: Mutex<DiscoveryInner>,
}

impl DiscoveryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_resolve(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.pending += 1;
            guard.alive_time = Some(Instant::now());
        }
    }

    pub fn end_resolve(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.pending = guard.pending.saturating_sub(1);
        }
    }

    pub fn record_port(&self, port: u16) {
        if let Ok(mut guard) = self.inner.lock() {
            debug!(port, "adb service resolved");
            guard.adb_port = Some(port);
            guard.alive_time = Some(Instant::now());
        }
    }

    pub fn forget_port(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.adb_port = None;
        }
    }
}

impl DiscoveryProbe for DiscoveryState {
    fn snapshot(&self) -> DiscoverySnapshot {
        match self.inner.lock() {
            Ok(guard) => DiscoverySnapshot {
                pending_resolves: guard.pending > 0,
                adb_port: guard.adb_port,
                alive_time: guard.alive_time,
            },
            Err(_) => DiscoverySnapshot::default(),
        }
    }
}
