/*!
 * System resource sampling, history, and prediction
 *
 * Samples CPU/memory/I-O load for the preflight availability check and the
 * transfer engine's dynamic concurrency bound. Samples append to a rolling
 * history file; with history present, preflight predicts peak usage with a
 * confidence margin and suggests the historically quietest hour.
 */

use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{Timelike, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::System;

use crate::error::Result;
use crate::events::{Event, EventSink, JsonlWriter};

/// Point-in-time resource usage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSample {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub io_percent: f32,
    /// Hour of day (0-23) the sample was taken, for run-window suggestion
    pub hour: u32,
    pub timestamp: String,
}

impl ResourceSample {
    /// Combined load figure driving the dynamic concurrency bound
    pub fn load_percent(&self) -> f32 {
        self.cpu_percent.max(self.memory_percent)
    }
}

/// Take one resource sample from the running system
pub fn sample_resources() -> ResourceSample {
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let cpu_percent = sys.global_cpu_usage();
    let memory_percent = if sys.total_memory() > 0 {
        (sys.used_memory() as f32 / sys.total_memory() as f32) * 100.0
    } else {
        0.0
    };

    // No portable I/O utilization counter; normalized 1-minute load
    // average stands in for I/O pressure
    let cores = sys.cpus().len().max(1) as f64;
    let io_percent = ((System::load_average().one / cores) * 100.0).min(100.0) as f32;

    let now = Utc::now();
    ResourceSample {
        cpu_percent,
        memory_percent,
        io_percent,
        hour: now.hour(),
        timestamp: now.to_rfc3339(),
    }
}

/// Predicted usage for one metric: rolling peak plus a confidence margin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Predicted {
    pub peak: f32,
    pub margin: f32,
}

impl Predicted {
    pub fn bound(&self) -> f32 {
        self.peak + self.margin
    }
}

/// Usage prediction computed from the sample history
#[derive(Debug, Clone)]
pub struct UsageForecast {
    pub cpu: Predicted,
    pub memory: Predicted,
    pub io: Predicted,
    /// Hour of day with the lowest historical average usage
    pub suggested_hour: Option<u32>,
}

/// Rolling sample history persisted between runs
pub struct ResourceHistory {
    path: PathBuf,
    /// Samples considered by predictions (newest retained)
    window: usize,
}

impl ResourceHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            window: 288,
        }
    }

    /// Append one sample to the history file
    pub fn record(&self, sample: &ResourceSample) -> Result<()> {
        JsonlWriter::append_to(&self.path)?.append(sample)
    }

    /// Load the most recent window of samples
    pub fn load(&self) -> Result<Vec<ResourceSample>> {
        let mut samples: Vec<ResourceSample> = crate::events::read_jsonl(&self.path)?;
        if samples.len() > self.window {
            samples.drain(..samples.len() - self.window);
        }
        Ok(samples)
    }

    /// Predict peak usage with a confidence margin and suggest a run window.
    /// Returns None when no history exists.
    pub fn forecast(&self, confidence: f32) -> Result<Option<UsageForecast>> {
        let samples = self.load()?;
        if samples.is_empty() {
            return Ok(None);
        }

        let cpu = predict(samples.iter().map(|s| s.cpu_percent), confidence);
        let memory = predict(samples.iter().map(|s| s.memory_percent), confidence);
        let io = predict(samples.iter().map(|s| s.io_percent), confidence);

        // Lowest average combined usage per hour of day
        let mut per_hour: [(f64, u32); 24] = [(0.0, 0); 24];
        for sample in &samples {
            let slot = &mut per_hour[(sample.hour % 24) as usize];
            slot.0 += sample.load_percent() as f64;
            slot.1 += 1;
        }
        let suggested_hour = per_hour
            .iter()
            .enumerate()
            .filter(|(_, (_, count))| *count > 0)
            .min_by(|(_, (sum_a, count_a)), (_, (sum_b, count_b))| {
                let avg_a = sum_a / *count_a as f64;
                let avg_b = sum_b / *count_b as f64;
                avg_a.partial_cmp(&avg_b).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(hour, _)| hour as u32);

        Ok(Some(UsageForecast {
            cpu,
            memory,
            io,
            suggested_hour,
        }))
    }
}

fn predict(values: impl Iterator<Item = f32>, confidence: f32) -> Predicted {
    let values: Vec<f32> = values.collect();
    let peak = values.iter().cloned().fold(0.0f32, f32::max);
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    let variance =
        values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / values.len() as f32;
    Predicted {
        peak,
        margin: variance.sqrt() * confidence,
    }
}

/// Periodic sampler with deterministic shutdown
pub struct ResourceMonitor {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl ResourceMonitor {
    /// Start sampling every `period`, appending to `history_path` and
    /// emitting each sample through the event sink
    pub fn start(history_path: &Path, period: Duration, sink: EventSink) -> Self {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let history = ResourceHistory::new(history_path);
        let thread_stop = stop.clone();

        let handle = std::thread::spawn(move || {
            let (flag, condvar) = &*thread_stop;
            loop {
                let sample = sample_resources();
                if let Err(e) = history.record(&sample) {
                    tracing::warn!("resource history append failed: {}", e);
                }
                sink.emit(Event::ResourceSample(sample));

                let guard = flag.lock().unwrap();
                let (guard, _) = condvar.wait_timeout(guard, period).unwrap();
                if *guard {
                    break;
                }
            }
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop the ticker and join the sampling thread
    pub fn stop(mut self) {
        self.signal_stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn signal_stop(&self) {
        let (flag, condvar) = &*self.stop;
        *flag.lock().unwrap() = true;
        condvar.notify_all();
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        self.signal_stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
