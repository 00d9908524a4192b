// src/runtime/capacity.rs
//! Per-agent concurrency guard
//!
//! A counter of in-flight jobs behind a local mutex. Acquisition fails fast
//! at the limit instead of queueing; the permit releases its slot on drop, so
//! the release runs on every exit path of a job.

use crate::utils::errors::{FleetError, Result};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct CapacityGuard {
    max_jobs: usize,
    active: Arc<Mutex<usize>>,
}

impl CapacityGuard {
    pub fn new(max_jobs: usize) -> Self {
        Self {
            max_jobs,
            active: Arc::new(Mutex::new(0)),
        }
    }

    /// Take one slot or fail with `CapacityExceeded`
    pub fn acquire(&self) -> Result<CapacityPermit> {
        let mut active = self.active.lock();
        if *active >= self.max_jobs {
            return Err(FleetError::CapacityExceeded(format!(
                "maximum of {} concurrent jobs reached",
                self.max_jobs
            )));
        }
        *active += 1;

        Ok(CapacityPermit {
            active: Arc::clone(&self.active),
        })
    }

    /// Jobs currently holding a slot
    pub fn active(&self) -> usize {
        *self.active.lock()
    }
}

/// One held slot; dropping it releases the slot
#[derive(Debug)]
pub struct CapacityPermit {
    active: Arc<Mutex<usize>>,
}

impl Drop for CapacityPermit {
    fn drop(&mut self) {
        let mut active = self.active.lock();
        *active = active.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fails_exactly_once_past_limit() {
        let guard = CapacityGuard::new(3);
        let mut permits = Vec::new();

        for _ in 0..3 {
            permits.push(guard.acquire().unwrap());
        }
        assert_eq!(guard.active(), 3);

        let err = guard.acquire().unwrap_err();
        assert!(matches!(err, FleetError::CapacityExceeded(_)));
        assert_eq!(guard.active(), 3);

        permits.pop();
        assert_eq!(guard.active(), 2);
        permits.push(guard.acquire().unwrap());
        assert!(guard.acquire().is_err());
    }

    #[test]
    fn test_release_on_drop() {
        let guard = CapacityGuard::new(1);
        {
            let _permit = guard.acquire().unwrap();
            assert_eq!(guard.active(), 1);
        }
        assert_eq!(guard.active(), 0);
        assert!(guard.acquire().is_ok());
    }

    #[test]
    fn test_concurrent_acquisitions() {
        use std::thread;

        let guard = CapacityGuard::new(4);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let guard = guard.clone();
                thread::spawn(move || guard.acquire().ok())
            })
            .collect();

        let permits: Vec<CapacityPermit> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();

        assert_eq!(permits.len(), 4);
        assert_eq!(guard.active(), 4);
        drop(permits);
        assert_eq!(guard.active(), 0);
    }
}
