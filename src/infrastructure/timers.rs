//! Virtual-clock timer queue.
//!
//! Timers are ordered by deadline, then by scheduling order, so two timers
//! with the same deadline fire in the order they were set. Time only moves
//! when the host advances it.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Handle of a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Deadline-ordered timers over a virtual millisecond clock.
#[derive(Debug)]
pub struct TimerQueue<T> {
    now: u64,
    seq: u64,
    heap: BinaryHeap<Reverse<(u64, u64)>>,
    tasks: HashMap<u64, T>,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self {
            now: 0,
            seq: 0,
            heap: BinaryHeap::new(),
            tasks: HashMap::new(),
        }
    }
}

impl<T> TimerQueue<T> {
    /// Current virtual time in milliseconds.
    #[must_use]
    pub const fn now(&self) -> u64 {
        self.now
    }

    /// Schedules `task` to fire `delay` milliseconds from now.
    pub fn schedule(&mut self, delay: u64, task: T) -> TimerId {
        self.seq += 1;
        let deadline = self.now.saturating_add(delay);
        self.heap.push(Reverse((deadline, self.seq)));
        self.tasks.insert(self.seq, task);
        TimerId(self.seq)
    }

    /// Cancels a timer, returning its task if it had not fired yet.
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        self.tasks.remove(&id.0)
    }

    /// Pops the earliest task due at or before `until`, moving the clock to
    /// its deadline.
    ///
    /// # Examples
    ///
    /// ```
    /// use filedrop::infrastructure::TimerQueue;
    ///
    /// let mut timers = TimerQueue::default();
    /// timers.schedule(30, "late");
    /// timers.schedule(10, "early");
    ///
    /// assert_eq!(timers.pop_due(50), Some("early"));
    /// assert_eq!(timers.now(), 10);
    /// assert_eq!(timers.pop_due(50), Some("late"));
    /// assert_eq!(timers.pop_due(50), None);
    /// ```
    pub fn pop_due(&mut self, until: u64) -> Option<T> {
        while let Some(Reverse((deadline, seq))) = self.heap.peek().copied() {
            if deadline > until {
                return None;
            }
            self.heap.pop();
            if let Some(task) = self.tasks.remove(&seq) {
                self.now = self.now.max(deadline);
                return Some(task);
            }
        }
        None
    }

    /// Moves the clock forward without firing anything.
    pub fn advance_to(&mut self, until: u64) {
        self.now = self.now.max(until);
    }

    /// Number of live timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_deadlines_fire_in_schedule_order() {
        let mut timers = TimerQueue::default();
        timers.schedule(5, 'a');
        timers.schedule(5, 'b');
        timers.schedule(0, 'c');

        let fired: Vec<char> = std::iter::from_fn(|| timers.pop_due(5)).collect();
        assert_eq!(fired, vec!['c', 'a', 'b']);
    }

    #[test]
    fn cancelled_timers_never_fire() {
        let mut timers = TimerQueue::default();
        let id = timers.schedule(1, "gone");
        timers.schedule(2, "kept");

        assert_eq!(timers.cancel(id), Some("gone"));
        assert_eq!(timers.cancel(id), None);
        assert_eq!(timers.pop_due(10), Some("kept"));
        assert!(timers.is_empty());
    }

    #[test]
    fn schedule_is_relative_to_current_time() {
        let mut timers = TimerQueue::default();
        timers.advance_to(100);
        timers.schedule(20, ());
        assert_eq!(timers.pop_due(119), None);
        assert_eq!(timers.pop_due(120), Some(()));
        assert_eq!(timers.now(), 120);
    }
}
