//! Chunked execution of index calls.
//!
//! Splits a work list into contiguous chunks, runs one operation per chunk
//! in input order, and keeps going when a chunk fails. A failed chunk is not
//! rolled back and does not affect chunks already applied.

use std::future::Future;

use tracing::{debug, info, warn};

use reindex_types::ReindexError;

/// Progress after a chunk, successful or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchProgress {
    /// Items handed to the operation so far
    pub processed: usize,
    /// Items in the whole run
    pub total: usize,
    /// Chunks completed so far
    pub chunks: usize,
    /// Items in chunks that failed so far
    pub failed: usize,
}

/// Trait for receiving progress updates.
pub trait ProgressCallback: Send + Sync {
    /// Called after each chunk is processed.
    fn on_progress(&self, progress: &BatchProgress);
}

/// A no-op progress callback for when progress reporting isn't needed.
pub struct NoOpProgressCallback;

impl ProgressCallback for NoOpProgressCallback {
    fn on_progress(&self, _progress: &BatchProgress) {}
}

/// A callback that logs progress at info level.
pub struct LoggingProgressCallback {
    label: String,
}

impl LoggingProgressCallback {
    /// Create a new logging progress callback.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl ProgressCallback for LoggingProgressCallback {
    fn on_progress(&self, progress: &BatchProgress) {
        info!(
            operation = %self.label,
            processed = progress.processed,
            total = progress.total,
            failed = progress.failed,
            "{} {}/{}",
            self.label,
            progress.processed,
            progress.total
        );
    }
}

/// Outcome of one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkOutcome {
    /// Position of the chunk in the run, from 0
    pub index: usize,
    /// Number of items in the chunk
    pub len: usize,
    /// Error message when the operation failed
    pub error: Option<String>,
}

impl ChunkOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of an executor run.
#[derive(Debug, Clone)]
pub struct ExecutionReport<T> {
    /// Number of input items
    pub total: usize,
    /// Number of items handed to the operation
    pub processed: usize,
    /// One entry per chunk, in order
    pub chunks: Vec<ChunkOutcome>,
    /// Items from failed chunks, in input order
    pub failed_items: Vec<T>,
}

impl<T> ExecutionReport<T> {
    fn new(total: usize) -> Self {
        Self {
            total,
            processed: 0,
            chunks: Vec::new(),
            failed_items: Vec::new(),
        }
    }

    /// Number of operation calls made.
    pub fn chunk_calls(&self) -> usize {
        self.chunks.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed_items.len()
    }

    pub fn succeeded_count(&self) -> usize {
        self.processed - self.failed_items.len()
    }

    pub fn failed_chunks(&self) -> impl Iterator<Item = &ChunkOutcome> {
        self.chunks.iter().filter(|c| !c.is_success())
    }

    pub fn is_success(&self) -> bool {
        self.failed_items.is_empty()
    }
}

/// Runs an operation over bounded-size chunks of a work list.
#[derive(Debug, Clone, Copy)]
pub struct ChunkedBatchExecutor {
    chunk_size: usize,
}

impl ChunkedBatchExecutor {
    /// Default items per chunk.
    pub const DEFAULT_CHUNK_SIZE: usize = 50;

    /// Create an executor. A chunk size of zero is rejected.
    pub fn new(chunk_size: usize) -> Result<Self, ReindexError> {
        if chunk_size == 0 {
            return Err(ReindexError::InvalidInput(
                "chunk size must be positive".to_string(),
            ));
        }
        Ok(Self { chunk_size })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Run `op` once per chunk, sequentially and in input order.
    ///
    /// A failing chunk is recorded against its items and the run continues.
    /// `progress` is called after every chunk with a strictly increasing
    /// processed count.
    pub async fn run<T, F, Fut, P>(&self, items: Vec<T>, mut op: F, progress: &P) -> ExecutionReport<T>
    where
        T: Clone,
        F: FnMut(Vec<T>) -> Fut,
        Fut: Future<Output = Result<(), ReindexError>>,
        P: ProgressCallback + ?Sized,
    {
        let mut report = ExecutionReport::new(items.len());
        let mut state = BatchProgress {
            total: items.len(),
            ..Default::default()
        };

        for (index, chunk) in items.chunks(self.chunk_size).enumerate() {
            let len = chunk.len();
            debug!(chunk = index, len = len, "Running chunk");

            let error = match op(chunk.to_vec()).await {
                Ok(()) => None,
                Err(e) => {
                    warn!(chunk = index, len = len, error = %e, "Chunk failed");
                    report.failed_items.extend_from_slice(chunk);
                    state.failed += len;
                    Some(e.to_string())
                }
            };

            report.processed += len;
            report.chunks.push(ChunkOutcome { index, len, error });

            state.processed = report.processed;
            state.chunks = index + 1;
            progress.on_progress(&state);
        }

        report
    }
}

impl Default for ChunkedBatchExecutor {
    fn default() -> Self {
        Self {
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingProgress {
        seen: Mutex<Vec<BatchProgress>>,
    }

    impl ProgressCallback for RecordingProgress {
        fn on_progress(&self, progress: &BatchProgress) {
            self.seen.lock().unwrap().push(*progress);
        }
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(matches!(
            ChunkedBatchExecutor::new(0),
            Err(ReindexError::InvalidInput(_))
        ));
        assert_eq!(ChunkedBatchExecutor::default().chunk_size(), 50);
    }

    #[tokio::test]
    async fn test_chunk_count_and_order() {
        let executor = ChunkedBatchExecutor::new(3).unwrap();
        let seen = Mutex::new(Vec::new());

        let report = executor
            .run(
                (0..10).collect::<Vec<u32>>(),
                |chunk| {
                    seen.lock().unwrap().push(chunk);
                    async { Ok(()) }
                },
                &NoOpProgressCallback,
            )
            .await;

        let chunks = seen.into_inner().unwrap();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[3], vec![9]);
        assert_eq!(chunks.concat(), (0..10).collect::<Vec<u32>>());
        assert_eq!(report.chunk_calls(), 4);
        assert_eq!(report.processed, 10);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_exact_multiple_last_chunk_full() {
        let executor = ChunkedBatchExecutor::new(5).unwrap();
        let report = executor
            .run(
                (0..10).collect::<Vec<u32>>(),
                |_| async { Ok(()) },
                &NoOpProgressCallback,
            )
            .await;
        assert_eq!(report.chunk_calls(), 2);
        assert_eq!(report.chunks[1].len, 5);
    }

    #[tokio::test]
    async fn test_failure_is_isolated_to_chunk() {
        let executor = ChunkedBatchExecutor::new(2).unwrap();
        let progress = RecordingProgress::default();

        let report = executor
            .run(
                vec!["a", "b", "c", "d", "e"],
                |chunk| async move {
                    if chunk.contains(&"c") {
                        Err(ReindexError::TransientIndex("boom".into()))
                    } else {
                        Ok(())
                    }
                },
                &progress,
            )
            .await;

        assert_eq!(report.chunk_calls(), 3);
        assert_eq!(report.failed_items, vec!["c", "d"]);
        assert_eq!(report.succeeded_count(), 3);
        assert_eq!(report.failed_chunks().count(), 1);
        assert!(report.chunks[1].error.as_deref().unwrap().contains("boom"));

        let seen = progress.seen.lock().unwrap();
        let processed: Vec<usize> = seen.iter().map(|p| p.processed).collect();
        assert_eq!(processed, vec![2, 4, 5]);
        assert_eq!(seen.last().unwrap().failed, 2);
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_calls() {
        let executor = ChunkedBatchExecutor::default();
        let progress = RecordingProgress::default();
        let report = executor
            .run(Vec::<u8>::new(), |_| async { Ok(()) }, &progress)
            .await;
        assert_eq!(report.chunk_calls(), 0);
        assert!(progress.seen.lock().unwrap().is_empty());
    }
}
