//! Bounded worker pool for per-image detection.
//!
//! Jobs are pushed onto a crossbeam channel and drained by `workers` scoped
//! threads. The pool lives for a single call: every thread is joined before
//! the function returns, whether the jobs succeeded or not.

use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel::unbounded;
use tracing::trace;

use super::{DetectorOutput, MarkerDetector};
use crate::error::Result;

/// Detect markers in every path. Results are tagged with the input index and
/// come back in completion order.
pub(super) fn run_detection_pool<D: MarkerDetector + ?Sized>(
    detector: &D,
    paths: &[PathBuf],
    workers: usize,
) -> Vec<(usize, Result<DetectorOutput>)> {
    let (job_tx, job_rx) = unbounded::<(usize, &Path)>();
    let (result_tx, result_rx) = unbounded();

    for (idx, path) in paths.iter().enumerate() {
        // A failed send leaves a hole that the caller reports as a
        // cardinality mismatch.
        let _ = job_tx.send((idx, path.as_path()));
    }
    drop(job_tx);

    thread::scope(|scope| {
        for worker in 0..workers.max(1) {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for (idx, path) in job_rx.iter() {
                    trace!("Worker {} processing {:?}", worker, path);
                    let output = detector.detect(path);
                    if result_tx.send((idx, output)).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(result_tx);

    result_rx.try_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDetector {
        calls: AtomicUsize,
    }

    impl MarkerDetector for CountingDetector {
        fn detect(&self, _image_path: &Path) -> Result<DetectorOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(DetectorOutput {
                markers: Vec::new(),
                processed_width: 1,
                processed_height: 1,
            })
        }
    }

    #[test]
    fn test_every_job_runs_once() {
        let detector = CountingDetector {
            calls: AtomicUsize::new(0),
        };
        let paths: Vec<PathBuf> = (0..37).map(|i| PathBuf::from(format!("{i}.jpg"))).collect();

        let mut results = run_detection_pool(&detector, &paths, 5);
        results.sort_by_key(|(idx, _)| *idx);

        assert_eq!(detector.calls.load(Ordering::SeqCst), 37);
        assert_eq!(results.len(), 37);
        assert!(results.iter().enumerate().all(|(i, (idx, _))| i == *idx));
    }

    #[test]
    fn test_empty_input() {
        let detector = CountingDetector {
            calls: AtomicUsize::new(0),
        };

        assert!(run_detection_pool(&detector, &[], 4).is_empty());
    }
}
