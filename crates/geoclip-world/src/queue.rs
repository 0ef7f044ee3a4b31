//! FIFO of level update jobs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use geoclip_core::SampleCoord;
use parking_lot::Mutex;

/// Request to bring `level` to `desired_origin`.
///
/// The drain retargets the level to the camera's latest origin; a differing
/// `desired_origin` is counted as a retargeted job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamingJob {
    pub level: usize,
    pub desired_origin: SampleCoord,
}

/// Per-level "job queued or running" flag.
#[derive(Debug, Default)]
pub struct PendingFlag(AtomicBool);

impl PendingFlag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Set the flag. Returns `false` when it was already set.
    #[inline]
    pub fn try_claim(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Mutex-guarded FIFO; no priorities, no coalescing.
#[derive(Debug, Default)]
pub struct StreamingJobQueue {
    jobs: Mutex<VecDeque<StreamingJob>>,
}

impl StreamingJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, job: StreamingJob) {
        self.jobs.lock().push_back(job);
    }

    /// Pop the oldest job. The queue lock is released before returning.
    pub fn pop(&self) -> Option<StreamingJob> {
        self.jobs.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Jobs in queue order.
    pub fn snapshot(&self) -> Vec<StreamingJob> {
        self.jobs.lock().iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let queue = StreamingJobQueue::new();
        for level in [3, 0, 2] {
            queue.push(StreamingJob {
                level,
                desired_origin: SampleCoord::ZERO,
            });
        }
        assert_eq!(queue.len(), 3);
        let order: Vec<_> = std::iter::from_fn(|| queue.pop()).map(|job| job.level).collect();
        assert_eq!(order, vec![3, 0, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn pending_flag_claims_once() {
        let flag = PendingFlag::new();
        assert!(flag.try_claim());
        assert!(!flag.try_claim());
        assert!(flag.is_set());
        flag.clear();
        assert!(flag.try_claim());
    }
}
