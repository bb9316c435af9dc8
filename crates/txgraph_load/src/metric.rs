use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{errors::Phase, method::batch::LoadProgress};

/// [`Timer`] is used to record the processing time of one phase.
pub struct Timer {
    session_started: SystemTime,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            session_started: SystemTime::now(),
        }
    }

    pub fn read(self) -> Result<Duration> {
        self.session_started
            .elapsed()
            .with_context(|| "Failed to read elapsed time")
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseMetricData {
    pub phase: Phase,
    pub time_cost: Duration,
    pub batches_written: usize,
    pub batches_skipped: usize,
    pub rows_written: usize,
    pub rows_dropped: usize,
    /// Resident memory of the process once the phase finished.
    pub memory_usage_after: Option<usize>,
}

/// Per phase metrics of one lifecycle run, in execution order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadReport {
    pub phases: Vec<PhaseMetricData>,
}

impl LoadReport {
    pub fn add_phase(&mut self, phase: Phase, timer: Timer, progress: &LoadProgress) {
        self.phases.push(PhaseMetricData {
            phase,
            time_cost: timer.read().unwrap_or_default(),
            batches_written: progress.batches_written,
            batches_skipped: progress.batches_skipped,
            rows_written: progress.rows_written,
            rows_dropped: progress.rows_dropped,
            memory_usage_after: get_current_memory().map(|x| x.physical_mem),
        });
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseMetricData> {
        self.phases.iter().find(|x| x.phase == phase)
    }

    pub fn total_time(&self) -> Duration {
        self.phases.iter().map(|x| x.time_cost).sum()
    }
}

pub fn get_current_memory() -> Option<memory_stats::MemoryStats> {
    memory_stats::memory_stats()
}

#[test]
fn test_report_serialize() {
    let mut report = LoadReport::default();
    let progress = LoadProgress {
        batches_written: 2,
        rows_written: 7,
        ..Default::default()
    };
    report.add_phase(Phase::RelationshipLoad, Timer::new(), &progress);
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["phases"][0]["phase"], "relationship_load");
    assert_eq!(json["phases"][0]["rows_written"], 7);
    assert!(report.phase(Phase::PredictionLoad).is_none());
}
