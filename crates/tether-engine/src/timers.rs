//! Timer bookkeeping for `setTimeout` / `setInterval`.
//!
//! The callbacks themselves live on the JS side in a map keyed by timer id.
//! This queue only tracks ids and deadlines so the run loop knows when to
//! wake up and which ids to fire.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    next_id: u64,
    /// Ordered by (deadline, id) so equal deadlines fire in creation order.
    by_deadline: BTreeSet<(Instant, u64)>,
    deadlines: HashMap<u64, Instant>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a timer `delay` from now and return its id.
    pub fn schedule(&mut self, delay: Duration) -> u64 {
        self.schedule_at(Instant::now() + delay)
    }

    pub fn schedule_at(&mut self, deadline: Instant) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.by_deadline.insert((deadline, id));
        self.deadlines.insert(id, deadline);
        id
    }

    /// Cancel a timer. Returns false if it already fired or never existed.
    pub fn cancel(&mut self, id: u64) -> bool {
        match self.deadlines.remove(&id) {
            Some(deadline) => self.by_deadline.remove(&(deadline, id)),
            None => false,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.by_deadline.first().map(|(deadline, _)| *deadline)
    }

    /// Remove and return all timers due at `now`, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<u64> {
        let mut due = Vec::new();
        while let Some(&(deadline, id)) = self.by_deadline.first() {
            if deadline > now {
                break;
            }
            self.by_deadline.pop_first();
            self.deadlines.remove(&id);
            due.push(id);
        }
        due
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.deadlines.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}
