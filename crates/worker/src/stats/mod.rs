//! Periodic dispatcher snapshots.
//!
//! [`StatsReporter`] wakes every `stats_interval`, copies the slot registry
//! under its lock, samples process usage and hands the resulting
//! [`DispatcherSnapshot`] to a [`SnapshotSink`]. A failing sink is logged
//! and the loop keeps going.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use browserq_core::Timestamp;
use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::registry::{SlotRegistry, SlotSummary};

pub mod process;

pub use process::{ProcessSampler, ProcessUsage};

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatcherSnapshot {
    pub taken_at: Timestamp,
    pub active_count: usize,
    pub capacity: usize,
    pub slots: Vec<SlotSummary>,
    pub process_memory_bytes: Option<u64>,
    pub process_cpu_seconds: Option<f64>,
    pub process_cpu_percent: Option<f64>,
}

impl DispatcherSnapshot {
    pub fn capture(registry: &SlotRegistry, usage: ProcessUsage) -> Self {
        let (active_count, slots) = registry.snapshot();
        Self {
            taken_at: Utc::now(),
            active_count,
            capacity: registry.capacity(),
            slots,
            process_memory_bytes: usage.memory_bytes,
            process_cpu_seconds: usage.cpu_seconds,
            process_cpu_percent: usage.cpu_percent,
        }
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn write(&self, snapshot: &DispatcherSnapshot) -> Result<(), SnapshotError>;
}

/// Emits each snapshot as a structured log event.
pub struct LogSnapshotSink;

#[async_trait]
impl SnapshotSink for LogSnapshotSink {
    async fn write(&self, snapshot: &DispatcherSnapshot) -> Result<(), SnapshotError> {
        let slots: Vec<String> = snapshot
            .slots
            .iter()
            .map(|s| format!("{}:{}:{:.0}s", s.task_id, s.status, s.elapsed_seconds))
            .collect();
        tracing::info!(
            active = snapshot.active_count,
            capacity = snapshot.capacity,
            memory_bytes = snapshot.process_memory_bytes,
            cpu_percent = snapshot.process_cpu_percent,
            ?slots,
            "Dispatcher stats"
        );
        Ok(())
    }
}

/// Overwrites a JSON file with the latest snapshot.
///
/// The file is replaced atomically (temp file + rename), so readers never
/// see a partial write.
pub struct FileSnapshotSink {
    path: PathBuf,
}

impl FileSnapshotSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotSink for FileSnapshotSink {
    async fn write(&self, snapshot: &DispatcherSnapshot) -> Result<(), SnapshotError> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reporter
// ---------------------------------------------------------------------------

pub struct StatsReporter {
    registry: Arc<SlotRegistry>,
    sink: Arc<dyn SnapshotSink>,
    interval: Duration,
    sampler: ProcessSampler,
}

impl StatsReporter {
    pub fn new(registry: Arc<SlotRegistry>, sink: Arc<dyn SnapshotSink>, interval: Duration) -> Self {
        Self {
            registry,
            sink,
            interval,
            sampler: ProcessSampler::new(),
        }
    }

    pub fn snapshot(&mut self) -> DispatcherSnapshot {
        DispatcherSnapshot::capture(&self.registry, self.sampler.sample())
    }

    /// Report until `cancel` is triggered.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Stats reporter started");
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Stats reporter stopping");
                    break;
                }
                _ = interval.tick() => {
                    let snapshot = self.snapshot();
                    if let Err(e) = self.sink.write(&snapshot).await {
                        tracing::error!(error = %e, "Failed to write stats snapshot");
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
