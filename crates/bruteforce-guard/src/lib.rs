//! Failed-attempt lockout keyed by source address.
//!
//! Every failed secret check is recorded against the caller's address. Once
//! an address has `max_failures` failures inside one window, it is locked
//! until that window (counted from its first failure) elapses. The record
//! then resets.
//!
//! A successful attempt does not clear the record; only expiry does.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Addresses tracked at once before the oldest record is evicted.
const MAX_TRACKED_ADDRESSES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BruteforceConfig {
    /// Failures allowed inside one window before the address is locked.
    pub max_failures: u32,
    /// Window length, counted from the first failure.
    pub window: Duration,
}

impl Default for BruteforceConfig {
    fn default() -> Self {
        Self {
            max_failures: 3,
            window: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    failures: u32,
    first_failure: Instant,
}

/// Shared failure table. Cheap to wrap in an `Arc` and share between
/// endpoints.
#[derive(Debug, Default)]
pub struct BruteforceGuard {
    config: BruteforceConfig,
    records: Mutex<HashMap<IpAddr, FailureRecord>>,
}

impl BruteforceGuard {
    pub fn new(config: BruteforceConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> BruteforceConfig {
        self.config
    }

    pub fn is_locked(&self, addr: IpAddr) -> bool {
        self.is_locked_at(addr, Instant::now())
    }

    pub fn is_locked_at(&self, addr: IpAddr, now: Instant) -> bool {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        match records.get(&addr) {
            Some(record) if self.expired(record, now) => {
                records.remove(&addr);
                false
            }
            Some(record) => record.failures >= self.config.max_failures,
            None => false,
        }
    }

    pub fn record_failure(&self, addr: IpAddr) {
        self.record_failure_at(addr, Instant::now());
    }

    pub fn record_failure_at(&self, addr: IpAddr, now: Instant) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        self.cleanup(&mut records, now);

        let record = records.entry(addr).or_insert(FailureRecord {
            failures: 0,
            first_failure: now,
        });
        record.failures = record.failures.saturating_add(1);

        if record.failures == self.config.max_failures {
            warn!(%addr, failures = record.failures, "Address locked after repeated failures");
        } else {
            debug!(%addr, failures = record.failures, "Recorded failed attempt");
        }
    }

    /// Failures currently counted against `addr`.
    pub fn failures(&self, addr: IpAddr) -> u32 {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&addr)
            .map(|record| record.failures)
            .unwrap_or(0)
    }

    pub fn tracked(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn expired(&self, record: &FailureRecord, now: Instant) -> bool {
        now.saturating_duration_since(record.first_failure) >= self.config.window
    }

    fn cleanup(&self, records: &mut HashMap<IpAddr, FailureRecord>, now: Instant) {
        records.retain(|_, record| !self.expired(record, now));
        while records.len() >= MAX_TRACKED_ADDRESSES {
            let oldest = records
                .iter()
                .min_by_key(|(_, record)| record.first_failure)
                .map(|(addr, _)| *addr);
            match oldest {
                Some(addr) => {
                    records.remove(&addr);
                }
                None => break,
            }
        }
    }
}
