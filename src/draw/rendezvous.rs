use std::{
    collections::{hash_map, HashMap},
    future::pending,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// A reusable meeting point for a fixed number of parties
///
/// every caller of [`Rendezvous::arrive_and_wait`] is held back until
/// `expected` distinct parties have arrived, then all of them are let go
/// together and the next generation starts empty.
#[derive(Debug)]
pub struct Rendezvous {
    expected: usize,
    state: Mutex<State>,
    // carries the number of the last released generation
    released: watch::Sender<u64>,
}

#[derive(Debug, Default)]
struct State {
    generation: u64,
    // party -> number of callers currently waiting on its behalf
    waiting: HashMap<u32, usize>,
}

/// Returned to every party of a released generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arrival {
    pub generation: u64,
    // the arrival that completed the generation, there is exactly one per generation
    pub leader: bool,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RendezvousErr {
    #[error("gave up after waiting {0:?} for the rest of the parties")]
    TimedOut(Duration),

    #[error("stopped waiting, the server is shutting down")]
    Cancelled,
}

impl Rendezvous {
    pub fn new(expected: usize) -> Self {
        let (released, _) = watch::channel(0);

        Self {
            expected: expected.max(1),
            state: Mutex::default(),
            released,
        }
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// The number of distinct parties waiting in the current generation
    pub fn arrived(&self) -> usize {
        self.lock().waiting.len()
    }

    /// Registers the arrival of `party` and waits for the generation to fill up
    ///
    /// arriving again as a party that is already waiting does not count twice.
    /// a caller that stops waiting, by timeout, cancellation or by dropping the future,
    /// withdraws its arrival so it can't complete a generation it is no longer part of.
    pub async fn arrive_and_wait(
        &self,
        party: u32,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Arrival, RendezvousErr> {
        let (generation, mut released) = {
            let mut state = self.lock();
            let generation = state.generation;
            *state.waiting.entry(party).or_default() += 1;

            if state.waiting.len() >= self.expected {
                // the last one in releases everybody else
                state.waiting.clear();
                state.generation += 1;
                self.released.send_replace(state.generation);

                return Ok(Arrival {
                    generation,
                    leader: true,
                });
            }

            // subscribe while holding the lock, so the release can't be missed
            (generation, self.released.subscribe())
        };

        let mut departure = Departure {
            rendezvous: self,
            party,
            generation,
            settled: false,
        };

        let outcome = tokio::select! {
            result = async { released.wait_for(|released| *released > generation).await.map(|_| ()) } => {
                // the sender lives as long as self, this can't really fail
                result.map_err(|_| RendezvousErr::Cancelled)
            }
            _ = cancel.cancelled() => Err(RendezvousErr::Cancelled),
            _ = sleep_or_pending(timeout) => Err(RendezvousErr::TimedOut(timeout.unwrap_or_default())),
        };

        match outcome {
            Ok(()) => departure.settled = true,
            // the release may have raced with the timeout / cancellation
            Err(err) => {
                if departure.withdraw() {
                    return Err(err);
                }
            }
        }

        Ok(Arrival {
            generation,
            leader: false,
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn sleep_or_pending(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => pending().await,
    }
}

// withdraws a waiting party from its generation unless it was released
struct Departure<'a> {
    rendezvous: &'a Rendezvous,
    party: u32,
    generation: u64,
    settled: bool,
}

impl Departure<'_> {
    /// returns false if the generation has been released in the meantime
    fn withdraw(&mut self) -> bool {
        self.settled = true;

        let mut state = self.rendezvous.lock();
        if state.generation != self.generation {
            return false;
        }

        if let hash_map::Entry::Occupied(mut entry) = state.waiting.entry(self.party) {
            *entry.get_mut() -= 1;
            if *entry.get() == 0 {
                entry.remove();
            }
        }

        true
    }
}

impl Drop for Departure<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.withdraw();
        }
    }
}
