//! Bounded, ordered buffers of accepted rows.
//!
//! Provides:
//! - **RingBuffer**: fixed-capacity circular buffer, oldest entry overwritten first
//! - **Window**: the engine's row buffer (bounded ring, or unbounded for the
//!   dynamic IQR accumulation mode)
//! - **TimeIndex**: synthetic timestamps derived from a session start instant

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::row::Row;

// ── Ring Buffer ─────────────────────────────────────────────────────────

/// A bounded circular buffer.
///
/// When full, pushing returns the oldest item, which has been overwritten.
#[derive(Clone, Debug)]
pub struct RingBuffer<T> {
    buffer: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T: Clone> RingBuffer<T> {
    /// Create a ring buffer with the given capacity (at least 1).
    pub fn new(capacity: usize) -> Self {
        let cap = capacity.max(1);
        Self {
            buffer: vec![None; cap],
            head: 0,
            len: 0,
        }
    }

    /// Push an item, returning the evicted oldest item if the buffer was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = self.buffer[self.head].replace(item);
        self.head = (self.head + 1) % self.buffer.len();
        if self.len < self.buffer.len() {
            self.len += 1;
        }
        evicted
    }

    /// Iterate over items in insertion order (oldest first).
    pub fn iter(&self) -> RingBufferIter<'_, T> {
        let start = if self.len < self.buffer.len() {
            0
        } else {
            self.head
        };
        RingBufferIter {
            buffer: &self.buffer,
            pos: start,
            remaining: self.len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }
}

/// Iterator over a RingBuffer.
pub struct RingBufferIter<'a, T> {
    buffer: &'a [Option<T>],
    pos: usize,
    remaining: usize,
}

impl<'a, T> Iterator for RingBufferIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let item = self.buffer[self.pos].as_ref();
        self.pos = (self.pos + 1) % self.buffer.len();
        self.remaining -= 1;
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

// ── Window ──────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
enum Storage {
    Bounded(RingBuffer<Row>),
    Unbounded(Vec<Row>),
}

/// The engine's buffer of accepted rows, oldest first.
///
/// A bounded window never holds more than its capacity; appending to a full
/// window evicts strictly the oldest row.
#[derive(Clone, Debug)]
pub struct Window {
    storage: Storage,
}

impl Window {
    pub fn bounded(capacity: usize) -> Self {
        Self {
            storage: Storage::Bounded(RingBuffer::new(capacity)),
        }
    }

    /// A window that keeps every accepted row.
    pub fn unbounded() -> Self {
        Self {
            storage: Storage::Unbounded(Vec::new()),
        }
    }

    /// Append at the tail. Returns the row evicted from the head, if any.
    pub fn append(&mut self, row: Row) -> Option<Row> {
        match &mut self.storage {
            Storage::Bounded(ring) => ring.push(row),
            Storage::Unbounded(rows) => {
                rows.push(row);
                None
            }
        }
    }

    /// Append several rows in order. Returns how many rows were evicted.
    pub fn extend<I: IntoIterator<Item = Row>>(&mut self, rows: I) -> usize {
        rows.into_iter()
            .filter_map(|row| self.append(row))
            .count()
    }

    pub fn size(&self) -> usize {
        match &self.storage {
            Storage::Bounded(ring) => ring.len(),
            Storage::Unbounded(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// `None` for an unbounded window.
    pub fn capacity(&self) -> Option<usize> {
        match &self.storage {
            Storage::Bounded(ring) => Some(ring.capacity()),
            Storage::Unbounded(_) => None,
        }
    }

    /// Iterate oldest first.
    pub fn iter(&self) -> Box<dyn Iterator<Item = &Row> + '_> {
        match &self.storage {
            Storage::Bounded(ring) => Box::new(ring.iter()),
            Storage::Unbounded(rows) => Box::new(rows.iter()),
        }
    }

    /// Immutable copy of the current contents, for fitting or scoring.
    pub fn snapshot(&self) -> Arc<[Row]> {
        self.iter().cloned().collect()
    }

    /// Immutable copy of the most recent `n` rows (fewer if the window is shorter).
    pub fn latest(&self, n: usize) -> Arc<[Row]> {
        let skip = self.size().saturating_sub(n);
        self.iter().skip(skip).cloned().collect()
    }
}

// ── Time Index ──────────────────────────────────────────────────────────

/// Derives a synthetic timestamp for each accepted row: session start plus
/// one step (one minute by default) per row sequence number.
///
/// Timestamps are recomputed from `Row::seq` on demand and never stored.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeIndex {
    session_start: DateTime<Utc>,
    step: Duration,
}

impl TimeIndex {
    pub fn new(session_start: DateTime<Utc>) -> Self {
        Self {
            session_start,
            step: Duration::minutes(1),
        }
    }

    pub fn session_start(&self) -> DateTime<Utc> {
        self.session_start
    }

    pub fn at(&self, seq: u64) -> DateTime<Utc> {
        let offset = i32::try_from(seq).unwrap_or(i32::MAX);
        self.session_start + self.step * offset
    }

    /// Timestamps for every row of `window`, oldest first.
    pub fn project(&self, window: &Window) -> Vec<DateTime<Utc>> {
        window.iter().map(|row| self.at(row.seq())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn row(seq: u64) -> Row {
        Row::new(seq, vec![seq as f64])
    }

    fn seqs(rows: &[Row]) -> Vec<u64> {
        rows.iter().map(|r| r.seq()).collect()
    }

    // ── RingBuffer tests ────────────────────────────────────────────

    #[test]
    fn ring_buffer_wrap_around() {
        let mut rb: RingBuffer<i32> = RingBuffer::new(3);
        assert_eq!(rb.push(1), None);
        rb.push(2);
        rb.push(3);
        assert_eq!(rb.push(4), Some(1));

        assert_eq!(rb.len(), 3);
        let items: Vec<&i32> = rb.iter().collect();
        assert_eq!(items, vec![&2, &3, &4]);
    }

    #[test]
    fn ring_buffer_zero_capacity_rounds_up() {
        let mut rb: RingBuffer<i32> = RingBuffer::new(0);
        assert_eq!(rb.capacity(), 1);
        rb.push(1);
        rb.push(2);
        let items: Vec<&i32> = rb.iter().collect();
        assert_eq!(items, vec![&2]);
    }

    // ── Window tests ────────────────────────────────────────────────

    #[test]
    fn bounded_window_evicts_oldest_first() {
        let mut window = Window::bounded(3);
        for seq in 0..3 {
            assert!(window.append(row(seq)).is_none());
        }
        let evicted = window.append(row(3)).unwrap();
        assert_eq!(evicted.seq(), 0);
        assert_eq!(seqs(&window.snapshot()), vec![1, 2, 3]);
    }

    #[test]
    fn latest_returns_tail_in_order() {
        let mut window = Window::bounded(10);
        window.extend((0..6).map(row));
        assert_eq!(seqs(&window.latest(3)), vec![3, 4, 5]);
        assert_eq!(seqs(&window.latest(100)), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn extend_reports_evictions() {
        let mut window = Window::bounded(4);
        assert_eq!(window.extend((0..6).map(row)), 2);
        assert_eq!(window.size(), 4);
    }

    #[test]
    fn unbounded_window_keeps_everything() {
        let mut window = Window::unbounded();
        window.extend((0..1000).map(row));
        assert_eq!(window.size(), 1000);
        assert_eq!(window.capacity(), None);
    }

    #[test]
    fn snapshot_is_detached_from_later_appends() {
        let mut window = Window::bounded(2);
        window.extend((0..2).map(row));
        let snap = window.snapshot();
        window.append(row(2));
        assert_eq!(seqs(&snap), vec![0, 1]);
    }

    // ── TimeIndex tests ─────────────────────────────────────────────

    #[test]
    fn time_index_steps_one_minute_per_row() {
        let start = Utc::now();
        let index = TimeIndex::new(start);
        assert_eq!(index.at(0), start);
        assert_eq!(index.at(5), start + Duration::minutes(5));

        let mut window = Window::bounded(2);
        window.extend((3..6).map(row));
        assert_eq!(
            index.project(&window),
            vec![start + Duration::minutes(4), start + Duration::minutes(5)]
        );
    }

    // ── Properties ──────────────────────────────────────────────────

    proptest! {
        #[test]
        fn property_size_never_exceeds_capacity(capacity in 1usize..64, count in 0usize..300) {
            let mut window = Window::bounded(capacity);
            for seq in 0..count as u64 {
                window.append(row(seq));
                prop_assert!(window.size() <= capacity);
            }
        }

        #[test]
        fn property_eviction_keeps_most_recent_in_order(capacity in 1usize..64, extra in 1usize..100) {
            let total = capacity + extra;
            let mut window = Window::bounded(capacity);
            window.extend((0..total as u64).map(row));
            let expected: Vec<u64> = ((total - capacity) as u64..total as u64).collect();
            prop_assert_eq!(seqs(&window.snapshot()), expected);
        }
    }
}
