//! Cross connection coordination of the draw
//!
//! the [`CompletionTracker`] keeps track of which agencies are done submitting,
//! while the [`Rendezvous`] holds back every agency asking for its winners
//! until all of the expected agencies have asked.

pub mod rendezvous;
pub mod tracker;

pub use rendezvous::{Arrival, Rendezvous, RendezvousErr};
pub use tracker::CompletionTracker;
