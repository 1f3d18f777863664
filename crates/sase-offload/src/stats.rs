//! Offload Statistics
//!
//! Lock-free counters, readable without taking the manager lock.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Manager counters
#[derive(Debug, Default)]
pub struct OffloadStats {
    pub sas_added: AtomicU64,
    pub sas_deleted: AtomicU64,
    pub sessions_added: AtomicU64,
    pub sessions_deduplicated: AtomicU64,
    pub sessions_deleted: AtomicU64,
    pub flag_raises: AtomicU64,
    pub doorbells: AtomicU64,
    pub rejected: AtomicU64,
}

impl OffloadStats {
    #[inline(always)]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> OffloadStatsSnapshot {
        OffloadStatsSnapshot {
            sas_added: self.sas_added.load(Ordering::Relaxed),
            sas_deleted: self.sas_deleted.load(Ordering::Relaxed),
            sessions_added: self.sessions_added.load(Ordering::Relaxed),
            sessions_deduplicated: self.sessions_deduplicated.load(Ordering::Relaxed),
            sessions_deleted: self.sessions_deleted.load(Ordering::Relaxed),
            flag_raises: self.flag_raises.load(Ordering::Relaxed),
            doorbells: self.doorbells.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Stats snapshot (non-atomic)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffloadStatsSnapshot {
    pub sas_added: u64,
    pub sas_deleted: u64,
    pub sessions_added: u64,
    pub sessions_deduplicated: u64,
    pub sessions_deleted: u64,
    pub flag_raises: u64,
    pub doorbells: u64,
    pub rejected: u64,
}

impl OffloadStatsSnapshot {
    /// SAs currently installed
    pub fn installed_sas(&self) -> u64 {
        self.sas_added.saturating_sub(self.sas_deleted)
    }
}
