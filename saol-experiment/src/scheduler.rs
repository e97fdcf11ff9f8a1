//! Generation-tagged queue of deferred trial actions.
//!
//! Each trial opens a new [`Generation`]; actions are scheduled at an offset
//! from trial onset and tagged with the generation that was current when they
//! were scheduled. Opening a new generation (or cancelling) drops every
//! pending action of older generations, and [`TrialScheduler::pop_due`] never
//! yields an action whose generation is not current, so a stale timeline can
//! never bleed into the next trial.
//!
//! The queue is a list sorted by deadline. Among the actions that are due at a
//! given elapsed time, the one registered first is yielded first.

use saol_core::{Result, SaolError};
use tracing::debug;

/// Identifier of one trial's batch of scheduled actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(pub u64);

#[derive(Debug, Clone)]
struct ScheduledEvent<A> {
    generation: Generation,
    fire_offset_s: f64,
    seq: u64,
    action: A,
}

#[derive(Debug, Clone)]
pub struct TrialScheduler<A> {
    generation: Generation,
    next_seq: u64,
    queue: Vec<ScheduledEvent<A>>,
}

impl<A> Default for TrialScheduler<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> TrialScheduler<A> {
    pub fn new() -> Self {
        Self {
            generation: Generation::default(),
            next_seq: 0,
            queue: Vec::new(),
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        generation == self.generation
    }

    /// Number of actions still waiting in the current generation.
    pub fn pending(&self) -> usize {
        self.queue
            .iter()
            .filter(|e| e.generation == self.generation)
            .count()
    }

    /// Start a new generation, invalidating everything scheduled so far.
    pub fn begin_generation(&mut self) -> Generation {
        let dropped = self.queue.len();
        self.queue.clear();
        self.generation = Generation(self.generation.0 + 1);
        debug!(
            "Scheduler generation {} opened ({} stale actions dropped)",
            self.generation.0, dropped
        );
        self.generation
    }

    /// Invalidate the current generation without opening a timeline.
    pub fn cancel_all(&mut self) {
        let dropped = self.queue.len();
        self.queue.clear();
        self.generation = Generation(self.generation.0 + 1);
        debug!("Scheduler cancelled ({} pending actions dropped)", dropped);
    }

    /// Schedule `action` at `offset_s` seconds after trial onset, in the
    /// current generation.
    pub fn schedule(&mut self, offset_s: f64, action: A) -> Result<Generation> {
        let generation = self.generation;
        self.schedule_in(generation, offset_s, action)?;
        Ok(generation)
    }

    /// Schedule into an explicit generation. Scheduling into a superseded
    /// generation is rejected.
    pub fn schedule_in(&mut self, generation: Generation, offset_s: f64, action: A) -> Result<()> {
        if !self.is_current(generation) {
            return Err(SaolError::state(format!(
                "generation {} is no longer current (now {})",
                generation.0, self.generation.0
            )));
        }
        if !offset_s.is_finite() || offset_s < 0.0 {
            return Err(SaolError::argument(format!(
                "offset must be a non-negative number of seconds, got {offset_s}"
            )));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        // Insert after every event with an offset <= this one.
        let at = self.queue.partition_point(|e| e.fire_offset_s <= offset_s);
        self.queue.insert(
            at,
            ScheduledEvent {
                generation,
                fire_offset_s: offset_s,
                seq,
                action,
            },
        );
        Ok(())
    }

    /// Remove and return the earliest-registered current action whose offset
    /// has been reached.
    pub fn pop_due(&mut self, elapsed_s: f64) -> Option<A> {
        let current = self.generation;
        self.queue.retain(|e| e.generation == current);
        let due = self.queue.partition_point(|e| e.fire_offset_s <= elapsed_s);
        let (index, _) = self.queue[..due]
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.seq)?;
        Some(self.queue.remove(index).action)
    }
}
