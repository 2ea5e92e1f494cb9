use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;

/// An event returned by [`EventQueue::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueEvent<K> {
    pub key: K,
    /// How far past its deadline the event fired. Periodic consumers subtract this from the
    /// next interval so drift does not accumulate.
    pub lateness_ns: u64,
}

#[derive(Debug)]
struct Entry<K> {
    deadline_ns: u64,
    seq: u64,
    key: K,
}

// Ordering ignores the key: the heap pops strictly by (deadline, insertion order).
impl<K> PartialEq for Entry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline_ns == other.deadline_ns && self.seq == other.seq
    }
}

impl<K> Eq for Entry<K> {}

impl<K> PartialOrd for Entry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Entry<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the BinaryHeap (a max-heap) pops the earliest deadline first.
        (other.deadline_ns, other.seq).cmp(&(self.deadline_ns, self.seq))
    }
}

/// One-shot deadline queue over guest virtual time.
///
/// At most one event is pending per key: scheduling a key again supersedes the previous
/// deadline, and [`EventQueue::cancel`] is idempotent (cancelling a key that already fired or
/// was never scheduled is a no-op). Superseded and cancelled entries are dropped lazily when
/// the heap reaches them.
#[derive(Debug)]
pub struct EventQueue<K> {
    now_ns: u64,
    next_seq: u64,
    heap: BinaryHeap<Entry<K>>,
    pending: HashMap<K, u64>,
}

impl<K: Copy + Eq + Hash> EventQueue<K> {
    pub fn new() -> Self {
        Self {
            now_ns: 0,
            next_seq: 0,
            heap: BinaryHeap::new(),
            pending: HashMap::new(),
        }
    }

    /// Current guest time in nanoseconds since reset.
    pub fn now_ns(&self) -> u64 {
        self.now_ns
    }

    /// Schedules `key` to come due `after_ns` nanoseconds from now, superseding any pending
    /// deadline for the same key.
    pub fn schedule(&mut self, after_ns: u64, key: K) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let deadline_ns = self.now_ns.saturating_add(after_ns);
        self.pending.insert(key, seq);
        self.heap.push(Entry {
            deadline_ns,
            seq,
            key,
        });
    }

    /// Unschedules `key`. Idempotent: does nothing if the key is not pending.
    pub fn cancel(&mut self, key: K) {
        self.pending.remove(&key);
    }

    pub fn is_scheduled(&self, key: K) -> bool {
        self.pending.contains_key(&key)
    }

    /// Moves the clock forward without collecting due events; they are returned by the next
    /// [`EventQueue::advance`] call instead.
    pub fn skip_ns(&mut self, delta_ns: u64) {
        self.now_ns = self.now_ns.saturating_add(delta_ns);
    }

    /// Advances the clock by `delta_ns` and returns every event whose deadline was reached, in
    /// deadline order.
    pub fn advance(&mut self, delta_ns: u64) -> Vec<DueEvent<K>> {
        self.now_ns = self.now_ns.saturating_add(delta_ns);
        let mut due = Vec::new();
        while let Some(head) = self.heap.peek() {
            if head.deadline_ns > self.now_ns {
                break;
            }
            let entry = self.heap.pop().expect("peeked entry vanished");
            // Stale entries (cancelled or superseded by a re-schedule) are skipped here.
            if self.pending.get(&entry.key) != Some(&entry.seq) {
                continue;
            }
            self.pending.remove(&entry.key);
            due.push(DueEvent {
                key: entry.key,
                lateness_ns: self.now_ns - entry.deadline_ns,
            });
        }
        due
    }
}

impl<K: Copy + Eq + Hash> Default for EventQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}
