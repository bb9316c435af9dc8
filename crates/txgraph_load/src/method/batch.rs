//! Size-bounded buffering and the single place where batches reach a sink.

use tracing::debug;

use crate::{
    component::sink::{BulkWrite, GraphSink},
    errors::{BatchContext, LoadError},
};

use super::LoadOptions;

/// A full (or final) buffer handed out by [`BatchBuffer`].
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T> {
    pub index: usize,
    pub items: Vec<T>,
}

/// Collects items and hands them back in batches of exactly `capacity`,
/// except for the last one.
pub struct BatchBuffer<T> {
    capacity: usize,
    items: Vec<T>,
    next_index: usize,
}

impl<T> BatchBuffer<T> {
    /// A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: Vec::with_capacity(capacity),
            next_index: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Adds an item, returning the batch as soon as it reaches capacity.
    pub fn push(&mut self, item: T) -> Option<Batch<T>> {
        self.items.push(item);
        if self.items.len() >= self.capacity {
            Some(self.take())
        } else {
            None
        }
    }

    /// Whatever is left over. Never returns an empty batch.
    pub fn finish(mut self) -> Option<Batch<T>> {
        if self.items.is_empty() {
            None
        } else {
            Some(self.take())
        }
    }

    fn take(&mut self) -> Batch<T> {
        let index = self.next_index;
        self.next_index += 1;
        let items = std::mem::replace(&mut self.items, Vec::with_capacity(self.capacity));
        Batch { index, items }
    }
}

/// Counters of one loader invocation. Updated after every batch so they are
/// still accurate when a later batch fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadProgress {
    pub batches_written: usize,
    pub batches_skipped: usize,
    pub rows_written: usize,
    /// Rows the store declined to apply (predictions with a missing endpoint).
    pub rows_dropped: usize,
    pub last_completed_batch: Option<usize>,
}

impl LoadProgress {
    fn record(&mut self, index: usize, submitted: usize, written: usize) {
        self.batches_written += 1;
        self.rows_written += written;
        self.rows_dropped += submitted.saturating_sub(written);
        self.last_completed_batch = Some(index);
    }
}

/// Sends one batch and waits for it. Batches before the resume point are
/// counted as skipped and not sent.
pub(crate) async fn flush_batch<S: GraphSink>(
    sink: &S,
    write: BulkWrite<'_>,
    context: impl FnOnce() -> BatchContext,
    index: usize,
    options: &LoadOptions,
    progress: &mut LoadProgress,
) -> Result<(), LoadError> {
    if options.skips(index) {
        debug!(batch = index, "skipping batch before resume point");
        progress.batches_skipped += 1;
        progress.last_completed_batch = Some(index);
        return Ok(());
    }
    let summary = sink
        .execute(&write)
        .await
        .map_err(|source| LoadError::BatchWrite {
            context: context(),
            batch_index: index,
            source,
        })?;
    progress.record(index, write.len(), summary.rows_written);
    Ok(())
}

#[test]
fn test_buffer_flushes_at_capacity() {
    let mut buffer = BatchBuffer::new(3);
    assert!(buffer.push(1).is_none());
    assert!(buffer.push(2).is_none());
    let batch = buffer.push(3).unwrap();
    assert_eq!(batch.index, 0);
    assert_eq!(batch.items, vec![1, 2, 3]);
    assert!(buffer.is_empty());
    assert!(buffer.push(4).is_none());
    assert_eq!(
        buffer.finish(),
        Some(Batch {
            index: 1,
            items: vec![4]
        })
    );
}

#[test]
fn test_buffer_finish_skips_empty_tail() {
    let mut buffer = BatchBuffer::new(2);
    buffer.push("a");
    assert!(buffer.push("b").is_some());
    assert!(buffer.finish().is_none());
}

#[test]
fn test_zero_capacity_acts_as_one() {
    let mut buffer = BatchBuffer::new(0);
    assert_eq!(buffer.push(7).map(|x| x.items), Some(vec![7]));
}

#[test]
fn test_progress_counts_dropped_rows() {
    let mut progress = LoadProgress::default();
    progress.record(0, 10, 10);
    progress.record(1, 10, 7);
    assert_eq!(progress.rows_written, 17);
    assert_eq!(progress.rows_dropped, 3);
    assert_eq!(progress.last_completed_batch, Some(1));
}
