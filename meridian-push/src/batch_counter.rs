use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::errors::{Result, WatchError};

/// Completion tracker for the batches of one sync delivery.
///
/// Sized once at construction. Batch indices are 0-based.
#[derive(Debug)]
pub struct BatchTaskCounter {
    done: Box<[AtomicBool]>,
    remaining: AtomicUsize,
}

impl BatchTaskCounter {
    pub fn new(total_batch: usize) -> Self {
        Self {
            done: (0..total_batch).map(|_| AtomicBool::new(false)).collect(),
            remaining: AtomicUsize::new(total_batch),
        }
    }

    pub fn total_batch(&self) -> usize {
        self.done.len()
    }

    /// Mark batch `index` acknowledged.
    ///
    /// Returns `true` only for the call that acknowledged the last outstanding
    /// batch; repeated acknowledgements of the same batch are ignored.
    pub fn mark_batch_done(&self, index: usize) -> Result<bool> {
        let flag = self
            .done
            .get(index)
            .ok_or(WatchError::BatchIndexOutOfRange {
                index,
                total: self.done.len(),
            })?;

        if flag.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        Ok(self.remaining.fetch_sub(1, Ordering::AcqRel) == 1)
    }

    pub fn is_batch_done(&self, index: usize) -> bool {
        self.done
            .get(index)
            .map(|flag| flag.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub fn all_done(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }
}
