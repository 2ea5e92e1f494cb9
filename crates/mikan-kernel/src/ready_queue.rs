//! Priority-bucketed ready queue.
//!
//! 64 FIFO buckets, priority 0 (highest) through 63 (lowest). A bitmap of non-empty buckets
//! keeps best-bucket lookup cheap. Threads know their own current priority, so membership
//! operations take the bucket index explicitly and assert consistency.

use std::collections::VecDeque;

use crate::object::ObjectId;

pub const PRIORITY_LEVELS: u32 = 64;

#[derive(Debug)]
pub struct ReadyQueue {
    buckets: Vec<VecDeque<ObjectId>>,
    nonempty: u64,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self {
            buckets: (0..PRIORITY_LEVELS).map(|_| VecDeque::new()).collect(),
            nonempty: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nonempty == 0
    }

    pub fn push_back(&mut self, priority: u32, thread: ObjectId) {
        debug_assert!(!self.contains(priority, thread), "thread queued twice");
        self.buckets[priority as usize].push_back(thread);
        self.nonempty |= 1 << priority;
    }

    /// Queues at the front of the bucket; used for threads pre-empted without yielding so
    /// they keep the remainder of their turn.
    pub fn push_front(&mut self, priority: u32, thread: ObjectId) {
        debug_assert!(!self.contains(priority, thread), "thread queued twice");
        self.buckets[priority as usize].push_front(thread);
        self.nonempty |= 1 << priority;
    }

    pub fn remove(&mut self, priority: u32, thread: ObjectId) {
        let bucket = &mut self.buckets[priority as usize];
        let before = bucket.len();
        bucket.retain(|&t| t != thread);
        debug_assert_eq!(bucket.len() + 1, before, "thread missing from its bucket");
        if bucket.is_empty() {
            self.nonempty &= !(1 << priority);
        }
    }

    pub fn contains(&self, priority: u32, thread: ObjectId) -> bool {
        self.buckets[priority as usize].contains(&thread)
    }

    /// Best-priority thread without dequeuing it.
    pub fn first(&self) -> Option<(u32, ObjectId)> {
        let priority = self.best_priority()?;
        Some((priority, self.buckets[priority as usize][0]))
    }

    pub fn pop_first(&mut self) -> Option<ObjectId> {
        let priority = self.best_priority()?;
        self.pop_from(priority)
    }

    /// Pops the best thread only if it is strictly better (numerically lower) than
    /// `priority`; used to avoid pointless switches among equal-priority threads.
    pub fn pop_first_better(&mut self, priority: u32) -> Option<ObjectId> {
        let best = self.best_priority()?;
        (best < priority).then(|| self.pop_from(best))?
    }

    pub fn move_thread(&mut self, thread: ObjectId, from: u32, to: u32) {
        if from == to {
            return;
        }
        self.remove(from, thread);
        self.push_back(to, thread);
    }

    fn best_priority(&self) -> Option<u32> {
        (self.nonempty != 0).then(|| self.nonempty.trailing_zeros())
    }

    fn pop_from(&mut self, priority: u32) -> Option<ObjectId> {
        let bucket = &mut self.buckets[priority as usize];
        let thread = bucket.pop_front();
        if bucket.is_empty() {
            self.nonempty &= !(1 << priority);
        }
        thread
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn pops_by_priority_with_fifo_tie_break() {
        let mut queue = ReadyQueue::new();
        queue.push_back(30, ObjectId(1));
        queue.push_back(10, ObjectId(2));
        queue.push_back(10, ObjectId(3));
        assert_eq!(queue.first(), Some((10, ObjectId(2))));
        assert_eq!(queue.pop_first(), Some(ObjectId(2)));
        assert_eq!(queue.pop_first(), Some(ObjectId(3)));
        assert_eq!(queue.pop_first(), Some(ObjectId(1)));
        assert_eq!(queue.pop_first(), None);
    }

    #[test]
    fn push_front_preserves_the_turn_of_a_preempted_thread() {
        let mut queue = ReadyQueue::new();
        queue.push_back(20, ObjectId(1));
        queue.push_front(20, ObjectId(2));
        assert_eq!(queue.pop_first(), Some(ObjectId(2)));
        assert_eq!(queue.pop_first(), Some(ObjectId(1)));
    }

    #[test]
    fn pop_first_better_requires_strict_improvement() {
        let mut queue = ReadyQueue::new();
        queue.push_back(20, ObjectId(1));
        assert_eq!(queue.pop_first_better(20), None);
        assert_eq!(queue.pop_first_better(21), Some(ObjectId(1)));
    }

    #[test]
    fn move_thread_changes_buckets() {
        let mut queue = ReadyQueue::new();
        queue.push_back(40, ObjectId(1));
        queue.move_thread(ObjectId(1), 40, 10);
        assert!(!queue.contains(40, ObjectId(1)));
        assert!(queue.contains(10, ObjectId(1)));
        assert_eq!(queue.pop_first(), Some(ObjectId(1)));
        assert!(queue.is_empty());
    }

    proptest! {
        // Model check against a naive sorted list: every thread sits in exactly the bucket we
        // last assigned it, and pop order is (priority, FIFO).
        #[test]
        fn matches_a_naive_model(ops in prop::collection::vec((0u8..3, 0u32..8, 0u32..64), 1..128)) {
            let mut queue = ReadyQueue::new();
            let mut model: Vec<(u32, u32)> = Vec::new(); // (priority, thread)
            for (op, thread, priority) in ops {
                let id = ObjectId(thread);
                match op {
                    0 => {
                        if !model.iter().any(|&(_, t)| t == thread) {
                            queue.push_back(priority, id);
                            model.push((priority, thread));
                        }
                    }
                    1 => {
                        if let Some(pos) = model.iter().position(|&(_, t)| t == thread) {
                            let (old, _) = model.remove(pos);
                            queue.remove(old, id);
                        }
                    }
                    _ => {
                        let expected = model
                            .iter()
                            .enumerate()
                            .min_by_key(|&(i, &(p, _))| (p, i))
                            .map(|(i, _)| i);
                        match expected {
                            Some(i) => {
                                let (_, t) = model.remove(i);
                                prop_assert_eq!(queue.pop_first(), Some(ObjectId(t)));
                            }
                            None => prop_assert_eq!(queue.pop_first(), None),
                        }
                    }
                }
                prop_assert_eq!(queue.is_empty(), model.is_empty());
            }
        }
    }
}
