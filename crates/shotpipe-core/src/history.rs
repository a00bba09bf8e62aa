use std::collections::VecDeque;
use std::sync::Mutex;

use crate::models::{TaskError, TaskErrorKind, TaskRecord, TaskResult};

const MIN_CAPACITY: usize = 1;
const MAX_CAPACITY: usize = 100;

/// Fixed-capacity FIFO of recently completed tasks. All mutation is
/// serialized under one mutex; the oldest entry is evicted first, both on
/// insert at capacity and when the capacity is lowered.
pub struct RecentHistory {
    inner: Mutex<HistoryState>,
}

struct HistoryState {
    entries: VecDeque<TaskRecord>,
    capacity: usize,
}

impl RecentHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HistoryState {
                entries: VecDeque::new(),
                capacity: clamp_capacity(capacity),
            }),
        }
    }

    pub fn add(&self, record: TaskRecord) -> TaskResult<()> {
        let mut state = self.lock_state()?;
        while state.entries.len() >= state.capacity {
            state.entries.pop_front();
        }
        state.entries.push_back(record);
        Ok(())
    }

    pub fn set_capacity(&self, capacity: usize) -> TaskResult<()> {
        let mut state = self.lock_state()?;
        state.capacity = clamp_capacity(capacity);
        while state.entries.len() > state.capacity {
            state.entries.pop_front();
        }
        Ok(())
    }

    pub fn clear(&self) -> TaskResult<()> {
        self.lock_state()?.entries.clear();
        Ok(())
    }

    pub fn capacity(&self) -> TaskResult<usize> {
        Ok(self.lock_state()?.capacity)
    }

    pub fn len(&self) -> TaskResult<usize> {
        Ok(self.lock_state()?.entries.len())
    }

    pub fn is_empty(&self) -> TaskResult<bool> {
        Ok(self.lock_state()?.entries.is_empty())
    }

    /// Oldest first.
    pub fn snapshot(&self) -> TaskResult<Vec<TaskRecord>> {
        Ok(self.lock_state()?.entries.iter().cloned().collect())
    }

    fn lock_state(&self) -> TaskResult<std::sync::MutexGuard<'_, HistoryState>> {
        self.inner.lock().map_err(|_| {
            TaskError::new(TaskErrorKind::Internal, "recent history mutex poisoned")
        })
    }
}

fn clamp_capacity(capacity: usize) -> usize {
    capacity.clamp(MIN_CAPACITY, MAX_CAPACITY)
}
