//! Concurrent batch processing over a bounded worker pool.
//!
//! Each invoice runs through its own sequential pipeline pass; workers
//! pull paths from a shared queue so at most `concurrency` invoices are
//! in flight. Records are exclusively owned by their own run; only the
//! metrics registry is shared, behind a mutex.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::thread;

use crate::pipeline::InvoicePipeline;
use crate::record::{AgentMetrics, ProcessingRecord};

/// Cross-run accumulator for per-stage counters. Multiple pipeline runs
/// fold their metrics in concurrently.
#[derive(Default)]
pub struct MetricsRegistry {
    inner: Mutex<HashMap<String, AgentMetrics>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb(&self, record: &ProcessingRecord) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (stage, metrics) in &record.metrics {
            inner.entry(stage.clone()).or_default().merge(metrics);
        }
    }

    pub fn snapshot(&self) -> HashMap<String, AgentMetrics> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

pub struct BatchProcessor<'a> {
    pipeline: &'a InvoicePipeline,
    concurrency: usize,
}

impl<'a> BatchProcessor<'a> {
    pub fn new(pipeline: &'a InvoicePipeline, concurrency: usize) -> Self {
        Self {
            pipeline,
            concurrency: concurrency.max(1),
        }
    }

    /// Process every file, at most `concurrency` at a time. Results come
    /// back in input order. Cancellation stops workers between stages and
    /// leaves the remaining queue untouched.
    pub fn run(&self, files: Vec<PathBuf>, registry: &MetricsRegistry) -> Vec<ProcessingRecord> {
        let total = files.len();
        let queue: Mutex<std::vec::IntoIter<(usize, PathBuf)>> =
            Mutex::new(files.into_iter().enumerate().collect::<Vec<_>>().into_iter());
        let results: Mutex<Vec<Option<ProcessingRecord>>> =
            Mutex::new((0..total).map(|_| None).collect());
        let cancel = self.pipeline.cancel_flag();

        let workers = self.concurrency.min(total.max(1));
        tracing::info!(total, workers, "Starting batch run");

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if cancel.load(Ordering::SeqCst) {
                        break;
                    }
                    let next = {
                        let mut queue = queue
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                        queue.next()
                    };
                    let Some((index, path)) = next else { break };

                    let record = self.pipeline.process(&path);
                    registry.absorb(&record);

                    let mut results = results
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    results[index] = Some(record);
                });
            }
        });

        results
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .into_iter()
            .flatten()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExtractionConfig, PaymentConfig, RiskConfig, ValidationConfig};
    use crate::pipeline::extraction::backends::tests::make_test_pdf;
    use crate::pipeline::extraction::structurer::tests::{MockLlm, VALID_RESPONSE};
    use crate::pipeline::payment::tests::MockGateway;
    use crate::pipeline::validation::catalog::tests::sample_catalog;
    use crate::pipeline::{ExtractionStage, PaymentStage, RiskStage, ValidationStage};
    use crate::record::ProcessingStatus;
    use crate::retry::RetryPolicy;
    use std::io::Write;

    fn pipeline() -> InvoicePipeline {
        let extraction = ExtractionStage::new(
            &ExtractionConfig::default(),
            Box::new(MockLlm::new(VALID_RESPONSE)),
            RetryPolicy::none(),
        )
        .expect("default backends");
        let validation =
            ValidationStage::with_catalog(sample_catalog(), &ValidationConfig::default());
        let risk = RiskStage::new(&RiskConfig::default(), vec![5_000.0, 25_000.0]);
        let payment = PaymentStage::new(
            &PaymentConfig {
                retry_base_delay_ms: 0,
                ..PaymentConfig::default()
            },
            Box::new(MockGateway),
        );
        InvoicePipeline::with_stages(extraction, validation, risk, payment)
    }

    fn write_pdfs(count: usize) -> Vec<tempfile::NamedTempFile> {
        (0..count)
            .map(|i| {
                let bytes = make_test_pdf(&format!(
                    "Invoice INV-001 copy {i} for Test Customer, total 110.00."
                ));
                let mut file = tempfile::NamedTempFile::new().expect("temp pdf");
                file.write_all(&bytes).expect("write pdf");
                file
            })
            .collect()
    }

    #[test]
    fn batch_preserves_input_order_and_aggregates_metrics() {
        let pipeline = pipeline();
        let files = write_pdfs(6);
        let paths: Vec<PathBuf> = files.iter().map(|f| f.path().to_path_buf()).collect();

        let registry = MetricsRegistry::new();
        let records = BatchProcessor::new(&pipeline, 3).run(paths.clone(), &registry);

        assert_eq!(records.len(), 6);
        for (record, path) in records.iter().zip(&paths) {
            assert_eq!(
                record.file_name,
                path.file_name().unwrap().to_string_lossy()
            );
        }

        let metrics = registry.snapshot();
        assert_eq!(metrics["extraction"].executions, 6);
        assert_eq!(metrics["extraction"].failures, 0);
        assert_eq!(metrics["payment"].executions, 6);
    }

    #[test]
    fn single_worker_batch_still_completes_everything() {
        let pipeline = pipeline();
        let files = write_pdfs(3);
        let paths = files.iter().map(|f| f.path().to_path_buf()).collect();

        let registry = MetricsRegistry::new();
        let records = BatchProcessor::new(&pipeline, 1).run(paths, &registry);

        assert_eq!(records.len(), 3);
        assert!(records
            .iter()
            .all(|r| r.status == ProcessingStatus::Completed));
    }

    #[test]
    fn cancelled_batch_returns_only_finished_records() {
        let pipeline = pipeline();
        pipeline
            .cancel_flag()
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let files = write_pdfs(4);
        let paths = files.iter().map(|f| f.path().to_path_buf()).collect();

        let registry = MetricsRegistry::new();
        let records = BatchProcessor::new(&pipeline, 2).run(paths, &registry);

        // Workers saw the flag before pulling work.
        assert!(records.is_empty());
    }

    #[test]
    fn registry_merges_across_separate_runs() {
        let pipeline = pipeline();
        let registry = MetricsRegistry::new();

        for _ in 0..2 {
            let files = write_pdfs(2);
            let paths = files.iter().map(|f| f.path().to_path_buf()).collect();
            BatchProcessor::new(&pipeline, 2).run(paths, &registry);
        }

        let metrics = registry.snapshot();
        assert_eq!(metrics["extraction"].executions, 4);
        assert_eq!(metrics["extraction"].successes, 4);
    }
}
