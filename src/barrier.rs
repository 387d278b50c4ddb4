//! Software global barrier for persistent groups.
//!
//! Every participant must be running at the same time (one thread per group), otherwise the
//! barrier spins forever. Two arrival counters alternate by generation parity: the arrival that
//! completes a generation clears its counter before publishing the next generation, and a
//! participant that races ahead into the next generation counts on the other counter.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Spins before a waiting participant starts yielding its thread
const SPIN_LIMIT: u32 = 64;

/// Barrier across a fixed number of concurrently running participants
#[derive(Debug)]
pub struct GridBarrier {
    participants: usize,
    arrived: [AtomicUsize; 2],
    generation: AtomicUsize,
}

impl GridBarrier {
    /// Barrier for `participants` threads
    pub fn new(participants: usize) -> Self {
        assert!(participants > 0, "a barrier needs at least one participant");
        Self {
            participants,
            arrived    : [AtomicUsize::new(0), AtomicUsize::new(0)],
            generation : AtomicUsize::new(0),
        }
    }

    /// Number of participants
    pub fn participants(&self) -> usize {
        self.participants
    }

    /// Completed generations
    pub fn generation(&self) -> usize {
        self.generation.load(Ordering::Acquire)
    }

    /// Block until every participant has arrived. Returns `true` for exactly one participant
    /// per generation, the one whose arrival released it. Writes made before `wait` are
    /// visible to every participant after it.
    pub fn wait(&self) -> bool {
        let gen  = self.generation.load(Ordering::Acquire);
        let slot = &self.arrived[gen & 1];

        if slot.fetch_add(1, Ordering::AcqRel) + 1 == self.participants {
            slot.store(0, Ordering::Relaxed);
            self.generation.store(gen + 1, Ordering::Release);
            return true;
        }

        let mut spins = 0;
        while self.generation.load(Ordering::Acquire) == gen {
            if spins < SPIN_LIMIT {
                std::hint::spin_loop();
                spins += 1;
            } else {
                std::thread::yield_now();
            }
        }
        false
    }
}
