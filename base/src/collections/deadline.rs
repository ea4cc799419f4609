use std::cmp::Reverse;
use std::fmt::{self, Debug, Formatter};
use std::hash::Hash;
use std::time::Duration;

use keyed_priority_queue::KeyedPriorityQueue;

/// A set of keyed deadlines which yields the earliest first.  Each key
/// has at most one deadline; pushing a key again moves its deadline.
pub struct DeadlineQueue<K: Hash + Eq> {
    items: KeyedPriorityQueue<K, Reverse<Duration>>,
}

impl<K: Hash + Eq> DeadlineQueue<K> {
    pub fn new() -> DeadlineQueue<K> {
        DeadlineQueue {
            items: KeyedPriorityQueue::new(),
        }
    }

    /// Schedules `key` at `due`, returning its previous deadline if it
    /// had one.
    pub fn push(&mut self, key: K, due: Duration) -> Option<Duration> {
        self.items.push(key, Reverse(due)).map(|Reverse(d)| d)
    }

    pub fn peek(&self) -> Option<(&K, Duration)> {
        self.items.peek().map(|(k, Reverse(d))| (k, *d))
    }

    /// The earliest deadline, if any.
    pub fn next_due(&self) -> Option<Duration> {
        self.peek().map(|(_, d)| d)
    }

    /// Removes and returns the earliest entry, but only if it is due
    /// at or before `now`.
    pub fn pop_due(&mut self, now: Duration) -> Option<(K, Duration)> {
        match self.next_due() {
            Some(due) if due <= now => self.items.pop().map(|(k, Reverse(d))| (k, d)),
            _ => None,
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<Duration> {
        self.items.remove(key).map(|Reverse(d)| d)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.items.get_priority(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        while self.items.pop().is_some() {}
    }
}

impl<K: Hash + Eq> Default for DeadlineQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Debug> Debug for DeadlineQueue<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadlineQueue")
            .field("len", &self.items.len())
            .field("next", &self.peek())
            .finish()
    }
}

#[test]
fn test_empty() {
    let mut q: DeadlineQueue<u8> = DeadlineQueue::default();
    assert!(q.is_empty());
    assert_eq!(q.next_due(), None);
    assert_eq!(q.pop_due(Duration::MAX), None);
}

#[test]
fn test_earliest_first_regardless_of_insertion_order() {
    let mut q: DeadlineQueue<&str> = DeadlineQueue::new();
    q.push("printer", Duration::from_millis(30));
    q.push("plotter", Duration::from_millis(10));
    q.push("tape", Duration::from_millis(20));
    let now = Duration::from_secs(1);
    assert_eq!(q.pop_due(now), Some(("plotter", Duration::from_millis(10))));
    assert_eq!(q.pop_due(now), Some(("tape", Duration::from_millis(20))));
    assert_eq!(q.pop_due(now), Some(("printer", Duration::from_millis(30))));
    assert!(q.is_empty());
}

#[test]
fn test_not_yet_due() {
    let mut q: DeadlineQueue<u8> = DeadlineQueue::new();
    q.push(3, Duration::from_micros(500));
    assert_eq!(q.pop_due(Duration::from_micros(499)), None);
    assert_eq!(q.len(), 1);
    assert_eq!(q.pop_due(Duration::from_micros(500)), Some((3, Duration::from_micros(500))));
}

#[test]
fn test_repeat_push_moves_deadline() {
    let mut q: DeadlineQueue<u8> = DeadlineQueue::new();
    assert_eq!(q.push(1, Duration::from_millis(5)), None);
    assert_eq!(q.push(1, Duration::from_millis(2)), Some(Duration::from_millis(5)));
    assert_eq!(q.len(), 1);
    assert!(q.contains(&1));
    assert_eq!(q.remove(&1), Some(Duration::from_millis(2)));
    assert!(!q.contains(&1));
}
