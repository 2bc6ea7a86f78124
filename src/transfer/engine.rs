//! Chunked resumable transfer execution

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::RecvTimeoutError;

use crate::config::TransferConfig;
use crate::error::{ExodusError, Result};
use crate::events::{Event, EventSink, Phase};
use crate::kv::KvStore;
use crate::preflight::resources::sample_resources;
use crate::recovery::{Disposition, RecoveryController, RetryPolicy};
use crate::store::{is_dir_marker, ObjectStore};

use super::bandwidth::BandwidthLimiter;
use super::chunks::{ChunkMetadata, ChunkMetadataStore, TransferStatus};
use super::delta::{self, DeltaStats};
use super::metrics::{predict_chunk_size, MetricsLog, TransferMetric};
use super::queue::{Enqueued, TransferTask, WorkQueue};
use super::{optimal_threads, CancelToken};

/// How long a load sample drives admission decisions before resampling
const LOAD_SAMPLE_TTL: Duration = Duration::from_secs(5);

/// Poll interval while waiting for pool capacity
const DRAIN_POLL: Duration = Duration::from_secs(1);

/// Result of one object transfer
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub transfer_id: String,
    pub bytes_moved: u64,
    pub chunks: u32,
    pub resumed: bool,
    pub delta: Option<DeltaStats>,
}

/// Aggregate outcome of draining the queue
#[derive(Debug, Default, Clone)]
pub struct TransferReport {
    pub transferred: usize,
    pub failed: usize,
    pub requeued: usize,
    pub bytes_moved: u64,
}

/// Executes chunked transfers between source and target stores
#[derive(Clone)]
pub struct TransferEngine {
    source: Arc<dyn ObjectStore>,
    target: Arc<dyn ObjectStore>,
    config: TransferConfig,
    kv: Arc<KvStore>,
    metrics: Arc<MetricsLog>,
    sink: EventSink,
    cancel: CancelToken,
    load_cache: Arc<Mutex<Option<(Instant, f32)>>>,
    bandwidth: BandwidthLimiter,
    /// Object sizes remembered from discovery when smart caching is on
    size_cache: Arc<Mutex<HashMap<String, u64>>>,
}

impl TransferEngine {
    pub fn new(
        source: Arc<dyn ObjectStore>,
        target: Arc<dyn ObjectStore>,
        config: TransferConfig,
        kv: Arc<KvStore>,
        metrics: Arc<MetricsLog>,
        sink: EventSink,
        cancel: CancelToken,
    ) -> Self {
        let bandwidth = BandwidthLimiter::new(config.max_bandwidth);
        Self {
            source,
            target,
            config,
            kv,
            metrics,
            sink,
            cancel,
            load_cache: Arc::new(Mutex::new(None)),
            bandwidth,
            size_cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Discover source objects under the prefix and enqueue them,
    /// deduplicating by target key. Directory markers are skipped.
    pub fn discover(&self, prefix: &str, queue: &mut WorkQueue) -> Result<usize> {
        let mut admitted = 0;
        let listing = self.source.list(prefix)?;

        for batch in listing.chunks(self.config.queue_batch_size.max(1)) {
            for entry in batch {
                if is_dir_marker(&entry.key) {
                    continue;
                }
                if self.config.smart_caching {
                    self.size_cache
                        .lock()
                        .unwrap()
                        .insert(entry.key.clone(), entry.size);
                }
                let priority = classify_priority(entry.size);
                if queue.enqueue(&entry.key, &entry.key, priority) == Enqueued::Accepted {
                    admitted += 1;
                }
            }
        }

        tracing::info!(admitted, prefix, "source objects enqueued");
        Ok(admitted)
    }

    /// Current admission bound from the (cached) system load sample
    pub fn current_bound(&self) -> usize {
        let mut cache = self.load_cache.lock().unwrap();
        let load = match *cache {
            Some((at, load)) if at.elapsed() < LOAD_SAMPLE_TTL => load,
            _ => {
                let sample = sample_resources();
                let load = sample.load_percent();
                *cache = Some((Instant::now(), load));
                load
            }
        };
        optimal_threads(load, self.config.min_threads, self.config.max_threads)
            .max(1)
    }

    /// Drain the queue with the dynamically bounded worker pool,
    /// routing failures through the recovery controller
    pub fn process_queue(
        &self,
        queue: &mut WorkQueue,
        recovery: &RecoveryController,
    ) -> Result<TransferReport> {
        let total = queue.len();
        let mut report = TransferReport::default();
        let mut requeues: HashMap<String, u32> = HashMap::new();

        let (tx, rx) = crossbeam_channel::unbounded::<(TransferTask, Result<TransferOutcome>)>();
        let mut active = 0usize;

        loop {
            if !self.cancel.is_cancelled() {
                // Recompute the bound before every admission round
                let bound = self.current_bound();
                while active < bound {
                    let Some(task) = queue.pop() else { break };
                    let engine = self.clone();
                    let results = tx.clone();
                    std::thread::spawn(move || {
                        let outcome = engine.transfer_object(&task);
                        let _ = results.send((task, outcome));
                    });
                    active += 1;
                }
            }

            if active == 0 {
                if self.cancel.is_cancelled() {
                    return Err(ExodusError::Cancelled);
                }
                if queue.is_empty() {
                    break;
                }
                continue;
            }

            match rx.recv_timeout(DRAIN_POLL) {
                Ok((task, Ok(outcome))) => {
                    active -= 1;
                    report.transferred += 1;
                    report.bytes_moved += outcome.bytes_moved;
                    self.emit_progress(total, &report);
                    tracing::info!(
                        source = %task.source_key,
                        bytes = outcome.bytes_moved,
                        chunks = outcome.chunks,
                        resumed = outcome.resumed,
                        "object transferred"
                    );
                }
                Ok((task, Err(e))) => {
                    active -= 1;
                    match recovery.handle_error(&e.to_string(), e.kind(), &task.source_key) {
                        Disposition::Abort => {
                            self.cancel.cancel();
                            self.drain_active(&rx, active);
                            return Err(e);
                        }
                        Disposition::Retry { backoff } => {
                            let attempts = requeues.entry(task.target_key.clone()).or_insert(0);
                            *attempts += 1;
                            if *attempts > self.config.retry_limit {
                                recovery.queue_for_recovery(
                                    &task.source_key,
                                    &task.target_key,
                                    task.priority,
                                );
                                report.failed += 1;
                            } else {
                                std::thread::sleep(backoff);
                                queue.requeue(task);
                                report.requeued += 1;
                            }
                        }
                        Disposition::Continue => {
                            let attempts = requeues.entry(task.target_key.clone()).or_insert(0);
                            *attempts += 1;
                            if *attempts > self.config.retry_limit {
                                recovery.queue_for_recovery(
                                    &task.source_key,
                                    &task.target_key,
                                    task.priority,
                                );
                                report.failed += 1;
                            } else {
                                queue.requeue(task);
                                report.requeued += 1;
                            }
                        }
                        Disposition::Queued => {
                            recovery.queue_for_recovery(
                                &task.source_key,
                                &task.target_key,
                                task.priority,
                            );
                            report.failed += 1;
                        }
                    }
                    self.emit_progress(total, &report);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        Ok(report)
    }

    fn drain_active(
        &self,
        rx: &crossbeam_channel::Receiver<(TransferTask, Result<TransferOutcome>)>,
        mut active: usize,
    ) {
        while active > 0 {
            if rx.recv().is_err() {
                break;
            }
            active -= 1;
        }
    }

    fn emit_progress(&self, total: usize, report: &TransferReport) {
        if total == 0 {
            return;
        }
        let processed = report.transferred + report.failed;
        self.sink.emit(Event::Progress {
            phase: Phase::Transfer,
            percent: (processed as f64 / total as f64) * 100.0,
        });
    }

    /// Transfer one object: delta path for existing targets when enabled,
    /// chunked resumable transfer otherwise
    pub fn transfer_object(&self, task: &TransferTask) -> Result<TransferOutcome> {
        if self.cancel.is_cancelled() {
            return Err(ExodusError::Cancelled);
        }

        if self.config.delta_transfers {
            if let Some(stats) = delta::apply_delta(
                &self.source,
                &self.target,
                &task.source_key,
                &task.target_key,
                self.config.delta_block_size,
            )? {
                let outcome = TransferOutcome {
                    transfer_id: format!("delta-{}", task.seq),
                    bytes_moved: stats.bytes_fetched,
                    chunks: stats.changed_blocks,
                    resumed: false,
                    delta: Some(stats),
                };
                return Ok(outcome);
            }
        }

        self.transfer_chunked(task)
    }

    /// Chunked resumable transfer of one object.
    ///
    /// Re-invoking with existing metadata skips every chunk already in
    /// the completed set; that check is the whole resume mechanism.
    pub fn transfer_chunked(&self, task: &TransferTask) -> Result<TransferOutcome> {
        let chunk_store = ChunkMetadataStore::new(&self.kv);
        let start = Instant::now();

        let (mut metadata, mut version, resumed) =
            match chunk_store.find_active(&task.source_key, &task.target_key)? {
                Some((metadata, version)) => {
                    tracing::info!(
                        transfer_id = %metadata.transfer_id,
                        completed = metadata.completed_chunks.len(),
                        total = metadata.total_chunks,
                        "resuming transfer"
                    );
                    (metadata, version, true)
                }
                None => {
                    let size = self.object_size(&task.source_key)?;
                    let learned = if self.config.predictive_chunking {
                        self.metrics.optimal_settings().unwrap_or_default()
                    } else {
                        Vec::new()
                    };
                    let chunk_size =
                        predict_chunk_size(size, self.config.chunk_size_base, &learned);
                    let metadata =
                        ChunkMetadata::new(&task.source_key, &task.target_key, size, chunk_size);
                    // Persisted before the first byte moves
                    let version = chunk_store.create(&metadata)?;
                    (metadata, version, false)
                }
            };

        let policy = RetryPolicy::chunks(self.config.retry_limit, self.config.retry_delay_secs);
        let mut bytes_moved = 0u64;

        for index in metadata.remaining_chunks() {
            if self.cancel.is_cancelled() {
                // Metadata stays Started; parts stay in place for resume
                return Err(ExodusError::Cancelled);
            }

            let (offset, len) = metadata.chunk_range(index);
            let part_key = metadata.part_key(index);

            self.bandwidth.throttle(len);
            let chunk_started = Instant::now();
            let chunk_result = policy.run(
                || {
                    let bytes = self.source.get_range(&task.source_key, offset, len)?;
                    self.target.put(&part_key, &bytes)?;
                    Ok::<u64, ExodusError>(bytes.len() as u64)
                },
                |e| e.is_fatal(),
            );

            match chunk_result {
                Ok(n) => {
                    bytes_moved += n;
                    self.warn_if_stalled(&task.source_key, n, chunk_started);
                }
                Err(e) => {
                    self.record_metric(&metadata, start, false);
                    return Err(ExodusError::Transfer {
                        key: task.source_key.clone(),
                        message: format!(
                            "chunk {} failed after {} attempts: {}",
                            index, policy.max_attempts, e
                        ),
                    });
                }
            }

            metadata.completed_chunks.insert(index);
            version = chunk_store.update(&metadata, version)?;
        }

        self.assemble(&metadata)?;

        metadata.status = TransferStatus::Completed;
        metadata.finished_at = Some(Utc::now());
        chunk_store.update(&metadata, version)?;
        self.record_metric(&metadata, start, true);

        Ok(TransferOutcome {
            transfer_id: metadata.transfer_id.clone(),
            bytes_moved,
            chunks: metadata.total_chunks,
            resumed,
            delta: None,
        })
    }

    /// Object size from the discovery cache when smart caching is on,
    /// falling back to a live info call
    fn object_size(&self, key: &str) -> Result<u64> {
        if self.config.smart_caching {
            if let Some(size) = self.size_cache.lock().unwrap().get(key) {
                return Ok(*size);
            }
        }
        Ok(self.source.info(key)?.size)
    }

    /// Flag chunks that moved slower than the configured floor
    fn warn_if_stalled(&self, key: &str, bytes: u64, started: Instant) {
        if self.config.min_bandwidth == 0 {
            return;
        }
        let secs = started.elapsed().as_secs_f64();
        if secs <= 0.0 {
            return;
        }
        let observed = (bytes as f64 / secs) as u64;
        if observed < self.config.min_bandwidth {
            tracing::warn!(
                key,
                observed_bps = observed,
                floor_bps = self.config.min_bandwidth,
                "chunk below minimum expected bandwidth"
            );
        }
    }

    /// Concatenate part objects into the final key, strictly in chunk
    /// index order, then delete the parts
    fn assemble(&self, metadata: &ChunkMetadata) -> Result<()> {
        if metadata.total_chunks == 1 {
            let part = metadata.part_key(0);
            self.target.copy(&part, &metadata.target_key)?;
            self.target.delete(&part)?;
            return Ok(());
        }

        let mut assembled = Vec::with_capacity(metadata.total_size as usize);
        for index in 0..metadata.total_chunks {
            let part = self.target.get(&metadata.part_key(index))?;
            assembled.extend_from_slice(&part);
        }
        self.target.put(&metadata.target_key, &assembled)?;

        for index in 0..metadata.total_chunks {
            self.target.delete(&metadata.part_key(index))?;
        }
        Ok(())
    }

    fn record_metric(&self, metadata: &ChunkMetadata, start: Instant, success: bool) {
        let duration_ms = start.elapsed().as_millis() as u64;
        let bandwidth_bps = if duration_ms > 0 {
            metadata.total_size * 1000 / duration_ms
        } else {
            0
        };
        let metric = TransferMetric {
            transfer_id: metadata.transfer_id.clone(),
            size: metadata.total_size,
            chunk_size: metadata.chunk_size,
            threads: self.config.max_threads,
            duration_ms,
            bandwidth_bps,
            success,
            timestamp: Utc::now().to_rfc3339(),
        };
        if let Err(e) = self.metrics.record(&metric) {
            tracing::warn!("metric append failed: {}", e);
        }
        self.sink.emit(Event::TransferMetric(metric));
    }

    /// Re-run every persisted transfer that never completed. Idempotent:
    /// completed chunks are skipped by the resume check.
    pub fn resume_transfers(&self) -> Result<(usize, usize)> {
        let incomplete = {
            let chunk_store = ChunkMetadataStore::new(&self.kv);
            chunk_store.incomplete()?
        };

        let mut resumed = 0;
        let mut failed = 0;
        for metadata in incomplete {
            let task = TransferTask {
                source_key: metadata.source_key.clone(),
                target_key: metadata.target_key.clone(),
                priority: 3,
                seq: 0,
                enqueued_at: Utc::now(),
            };
            match self.transfer_chunked(&task) {
                Ok(_) => resumed += 1,
                Err(e) => {
                    failed += 1;
                    tracing::warn!(
                        source = %metadata.source_key,
                        error = %e,
                        "resume attempt failed"
                    );
                }
            }
        }
        Ok((resumed, failed))
    }
}

/// Queue priority by size class: small objects clear the queue first
fn classify_priority(size: u64) -> u8 {
    const MB: u64 = 1024 * 1024;
    if size < 10 * MB {
        3
    } else if size < 1024 * MB {
        2
    } else {
        1
    }
}
