//! Connection history: a rolling time series of `Registry::count()`
//!
//! Samples live in memory, oldest first. When a history file is configured
//! every sample is also appended to it as one JSON line; the file is loaded
//! back on startup and compacted whenever old samples are pruned.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::registry::Registry;
use crate::types::{ControlResult, HistorySample};
use crate::utils::{atomic_write_jsonl, hours_to_duration};

/// Append-only, time-ordered connection count samples
pub struct HistoryRecorder {
    samples: RwLock<VecDeque<HistorySample>>,
    retention: chrono::Duration,
    file: Option<PathBuf>,
}

impl HistoryRecorder {
    /// In-memory recorder keeping `retention_hours` of samples
    pub fn new(retention_hours: f64) -> Self {
        Self {
            samples: RwLock::new(VecDeque::new()),
            retention: hours_to_duration(retention_hours).unwrap_or(chrono::Duration::hours(24)),
            file: None,
        }
    }

    /// Recorder backed by a JSONL file, loading samples still inside the window
    pub fn with_file<P: AsRef<Path>>(retention_hours: f64, path: P) -> ControlResult<Self> {
        let mut recorder = Self::new(retention_hours);
        let path = path.as_ref().to_path_buf();
        let loaded = load_samples(&path)?;
        let cutoff = Utc::now().checked_sub_signed(recorder.retention);
        {
            let mut samples = recorder.samples.write();
            for sample in loaded {
                if cutoff.map_or(true, |cutoff| sample.time >= cutoff) {
                    push_ordered(&mut samples, sample);
                }
            }
            info!(path = %path.display(), samples = samples.len(), "loaded connection history");
        }
        recorder.file = Some(path);
        Ok(recorder)
    }

    /// Append a sample taken now
    pub fn record(&self, connection_count: usize) -> HistorySample {
        self.record_at(connection_count, Utc::now())
    }

    /// Append a sample taken at `time`
    ///
    /// A timestamp earlier than the newest sample is clamped to it so the
    /// series stays ordered.
    pub fn record_at(&self, connection_count: usize, time: DateTime<Utc>) -> HistorySample {
        let sample = {
            let mut samples = self.samples.write();
            push_ordered(&mut samples, HistorySample::new(time, connection_count))
        };
        if let Some(path) = &self.file {
            if let Err(e) = append_sample(path, &sample) {
                warn!(path = %path.display(), error = %e, "failed to persist history sample");
            }
        }
        sample
    }

    /// Samples from the last `hours_back` hours, oldest first
    pub fn query(&self, hours_back: f64) -> Vec<HistorySample> {
        self.query_at(hours_back, Utc::now())
    }

    /// Samples with `time >= now - hours_back`
    ///
    /// Zero, negative or non-finite windows yield an empty result.
    pub fn query_at(&self, hours_back: f64, now: DateTime<Utc>) -> Vec<HistorySample> {
        let Some(window) = hours_to_duration(hours_back) else {
            return Vec::new();
        };
        let samples = self.samples.read();
        match now.checked_sub_signed(window) {
            Some(cutoff) => {
                let start = samples.partition_point(|s| s.time < cutoff);
                samples.range(start..).copied().collect()
            }
            None => samples.iter().copied().collect(),
        }
    }

    /// Drop samples older than the retention window; returns how many went
    pub fn prune_at(&self, now: DateTime<Utc>) -> usize {
        let Some(cutoff) = now.checked_sub_signed(self.retention) else {
            return 0;
        };
        let (removed, remaining) = {
            let mut samples = self.samples.write();
            let before = samples.len();
            while samples.front().is_some_and(|s| s.time < cutoff) {
                samples.pop_front();
            }
            let removed = before - samples.len();
            let remaining: Vec<HistorySample> = if removed > 0 && self.file.is_some() {
                samples.iter().copied().collect()
            } else {
                Vec::new()
            };
            (removed, remaining)
        };

        if removed > 0 {
            debug!(removed, "pruned connection history");
            if let Some(path) = &self.file {
                if let Err(e) = atomic_write_jsonl(path, &remaining) {
                    warn!(path = %path.display(), error = %e, "failed to compact history file");
                }
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.samples.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.read().is_empty()
    }

    /// Sample the registry every `sample_interval` until shutdown
    pub async fn run(
        self: Arc<Self>,
        registry: Arc<Registry>,
        sample_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = interval(sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = sample_interval.as_secs(), "history recorder started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Utc::now();
                    self.record_at(registry.count(), now);
                    self.prune_at(now);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("history recorder stopped");
    }
}

fn push_ordered(samples: &mut VecDeque<HistorySample>, mut sample: HistorySample) -> HistorySample {
    if let Some(last) = samples.back() {
        if sample.time < last.time {
            sample.time = last.time;
        }
    }
    samples.push_back(sample);
    sample
}

fn append_sample(path: &Path, sample: &HistorySample) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(sample)?;
    writeln!(file, "{}", line)
}

fn load_samples(path: &Path) -> ControlResult<Vec<HistorySample>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut samples = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<HistorySample>(&line) {
            Ok(sample) => samples.push(sample),
            Err(e) => warn!(line = line_no + 1, error = %e, "skipping malformed history line"),
        }
    }
    samples.sort_by_key(|s| s.time);
    Ok(samples)
}
