//! Fixed-size table of started threads.

use parking_lot::Mutex;

use super::{ThreadInfo, ThreadPriority};

#[derive(Debug, Clone)]
struct Entry {
    name: String,
    priority: ThreadPriority,
}

/// Slot table bounded by [`OsConfig::thread_limit`](crate::OsConfig::thread_limit).
///
/// A slot is taken by `ThreadHandle::start` and given back by
/// `ThreadHandle::destroy`; freed slots are reused lowest-first.
#[derive(Debug)]
pub(crate) struct ThreadRegistry {
    slots: Mutex<Vec<Option<Entry>>>,
}

impl ThreadRegistry {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; limit]),
        }
    }

    /// Takes the lowest free slot, or `None` if the table is full.
    pub(crate) fn allocate(&self, name: &str, priority: ThreadPriority) -> Option<usize> {
        let mut slots = self.slots.lock();
        let slot = slots.iter().position(Option::is_none)?;
        slots[slot] = Some(Entry {
            name: name.to_owned(),
            priority,
        });
        drop(slots);
        tracing::trace!(slot, name, "registry slot allocated");
        Some(slot)
    }

    pub(crate) fn release(&self, slot: usize) {
        if let Some(entry) = self.slots.lock().get_mut(slot) {
            *entry = None;
        }
        tracing::trace!(slot, "registry slot released");
    }

    /// Number of occupied slots.
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    pub(crate) fn limit(&self) -> usize {
        self.slots.lock().len()
    }

    pub(crate) fn snapshot(&self) -> Vec<ThreadInfo> {
        self.slots
            .lock()
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| {
                entry.as_ref().map(|entry| ThreadInfo {
                    slot,
                    name: entry.name.clone(),
                    priority: entry.priority,
                })
            })
            .collect()
    }
}
