// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Host port allocation.
//!
//! Ports are drawn uniformly at random from an inclusive pool and accepted
//! only if the host network stack lets us bind them. Other processes may hold
//! ports in the pool, so the OS is the authority on availability, not our own
//! bookkeeping.
//!
//! Ports handed out by this allocator stay reserved in-process until released,
//! so two concurrent creates cannot be given the same port. Nothing prevents a
//! foreign process from taking a port between the bind probe and the workload
//! launch; that launch then fails and the error reaches the caller.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, TcpListener};
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};

use rand::Rng;
use tracing::{debug, warn};

/// Attempts made before giving up on the pool.
pub const MAX_ALLOCATION_ATTEMPTS: u32 = 400;

/// Port allocation errors.
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    /// Every attempt hit an occupied port.
    #[error("No free port in pool {start}-{end} after {attempts} attempts")]
    Exhausted {
        /// Pool start.
        start: u16,
        /// Pool end.
        end: u16,
        /// Attempts made.
        attempts: u32,
    },

    /// The blocking allocation task did not complete.
    #[error("Port allocation task failed: {0}")]
    Interrupted(String),
}

/// Allocates host ports from a fixed pool.
pub struct PortAllocator {
    range: RangeInclusive<u16>,
    bind_addr: IpAddr,
    max_attempts: u32,
    reserved: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    /// Create an allocator over `start..=end`, probing on all interfaces.
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            range: start..=end,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            max_attempts: MAX_ALLOCATION_ATTEMPTS,
            reserved: Mutex::new(HashSet::new()),
        }
    }

    /// Probe on a specific address instead of all interfaces.
    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Override the attempt budget.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// The pool bounds.
    pub fn range(&self) -> RangeInclusive<u16> {
        self.range.clone()
    }

    /// Pick a free port and reserve it.
    pub fn allocate(&self) -> Result<u16, AllocationError> {
        let mut rng = rand::thread_rng();

        for attempt in 1..=self.max_attempts {
            let port = rng.gen_range(self.range.clone());

            if self.is_reserved(port) {
                continue;
            }
            if !self.is_bindable(port) {
                continue;
            }
            // Another caller may have reserved it while we probed.
            if self.reserve(port) {
                debug!(port, attempt, "Allocated host port");
                return Ok(port);
            }
        }

        warn!(
            start = *self.range.start(),
            end = *self.range.end(),
            attempts = self.max_attempts,
            "Port pool exhausted"
        );
        Err(AllocationError::Exhausted {
            start: *self.range.start(),
            end: *self.range.end(),
            attempts: self.max_attempts,
        })
    }

    /// [`allocate`](Self::allocate) on the blocking pool, for async callers.
    ///
    /// Each attempt is a synchronous bind probe.
    pub async fn allocate_off_thread(self: &Arc<Self>) -> Result<u16, AllocationError> {
        let allocator = Arc::clone(self);
        tokio::task::spawn_blocking(move || allocator.allocate())
            .await
            .map_err(|e| AllocationError::Interrupted(e.to_string()))?
    }

    /// Whether the port can be bound right now. The probe socket is closed
    /// before returning.
    pub fn is_bindable(&self, port: u16) -> bool {
        TcpListener::bind((self.bind_addr, port)).is_ok()
    }

    /// Mark a port as in use. Returns false if it was already reserved.
    pub fn reserve(&self, port: u16) -> bool {
        self.reserved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(port)
    }

    /// Return a port to the pool.
    pub fn release(&self, port: u16) {
        self.reserved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&port);
    }

    /// Whether a port is currently reserved.
    pub fn is_reserved(&self, port: u16) -> bool {
        self.reserved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&port)
    }
}
