use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

/// Records, for every agency seen so far, whether it has finished submitting bets
#[derive(Debug, Default)]
pub struct CompletionTracker {
    // agency -> finished
    agencies: Mutex<HashMap<u32, bool>>,
}

impl CompletionTracker {
    /// Starts tracking an agency, without touching its state if it is already known
    pub fn register(&self, agency: u32) {
        self.lock().entry(agency).or_insert(false);
    }

    /// Marks an agency as finished
    ///
    /// returns false if the agency was already marked as finished.
    pub fn mark_finished(&self, agency: u32) -> bool {
        let mut agencies = self.lock();
        let finished = agencies.entry(agency).or_insert(false);

        !std::mem::replace(finished, true)
    }

    pub fn is_finished(&self, agency: u32) -> bool {
        self.lock().get(&agency).copied().unwrap_or(false)
    }

    /// True once at least `expected` agencies are known and all of them have finished
    pub fn is_everyone_finished(&self, expected: usize) -> bool {
        let agencies = self.lock();
        agencies.len() >= expected && agencies.values().all(|finished| *finished)
    }

    /// Agencies that are known but still submitting, in ascending order
    pub fn pending(&self) -> Vec<u32> {
        let mut pending = self
            .lock()
            .iter()
            .filter(|(_, finished)| !**finished)
            .map(|(agency, _)| *agency)
            .collect::<Vec<_>>();
        pending.sort_unstable();

        pending
    }

    // the map is always left consistent, a poisoned lock is still usable
    fn lock(&self) -> MutexGuard<'_, HashMap<u32, bool>> {
        self.agencies.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
