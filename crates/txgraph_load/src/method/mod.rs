use serde::{Deserialize, Serialize};

pub mod batch;
pub mod lifecycle;
pub mod prediction;
pub mod relationship;

pub const DEFAULT_BATCH_SIZE: usize = 5000;
pub const DEFAULT_TOP_K: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadOptions {
    /// Upper bound on rows per transaction.
    pub max_batch_size: usize,
    /// Drugs kept per disease when materializing predictions.
    pub top_k: usize,
    /// Batches with a lower index are rebuilt but not written.
    pub resume_from: Option<usize>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_BATCH_SIZE,
            top_k: DEFAULT_TOP_K,
            resume_from: None,
        }
    }
}

impl LoadOptions {
    pub fn skips(&self, batch_index: usize) -> bool {
        matches!(self.resume_from, Some(from) if batch_index < from)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use crate::{
        component::{
            record::{EdgeRecord, PredictionEdge, Run},
            sink::{BulkWrite, GraphSink, WriteSummary},
        },
        errors::{LoadError, SinkError},
    };

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Connect,
        Clear,
        Index(String),
        Run(Run),
        Predictions(Vec<PredictionEdge>),
    }

    /// Remembers every call. Writes at index `fail_at` (counted over writes
    /// only) are rejected.
    #[derive(Default)]
    pub struct RecordingSink {
        pub calls: Mutex<Vec<Call>>,
        pub fail_at: Option<usize>,
        pub unreachable: bool,
        writes: Mutex<usize>,
    }

    impl RecordingSink {
        pub fn failing_at(write: usize) -> Self {
            Self {
                fail_at: Some(write),
                ..Default::default()
            }
        }

        pub fn unreachable() -> Self {
            Self {
                unreachable: true,
                ..Default::default()
            }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn runs(&self) -> Vec<Run> {
            self.calls()
                .into_iter()
                .filter_map(|x| match x {
                    Call::Run(run) => Some(run),
                    _ => None,
                })
                .collect()
        }

        pub fn prediction_batches(&self) -> Vec<Vec<PredictionEdge>> {
            self.calls()
                .into_iter()
                .filter_map(|x| match x {
                    Call::Predictions(lines) => Some(lines),
                    _ => None,
                })
                .collect()
        }
    }

    impl GraphSink for RecordingSink {
        async fn verify_connectivity(&self) -> Result<(), SinkError> {
            self.calls.lock().unwrap().push(Call::Connect);
            if self.unreachable {
                return Err(SinkError::Poisoned);
            }
            Ok(())
        }

        async fn clear(&self) -> Result<(), SinkError> {
            self.calls.lock().unwrap().push(Call::Clear);
            Ok(())
        }

        async fn create_index(&self, label: &str) -> Result<(), SinkError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Index(label.to_string()));
            Ok(())
        }

        async fn execute(&self, write: &BulkWrite<'_>) -> Result<WriteSummary, SinkError> {
            let mut writes = self.writes.lock().unwrap();
            let current = *writes;
            *writes += 1;
            if self.fail_at == Some(current) {
                return Err(SinkError::Poisoned);
            }
            let call = match write {
                BulkWrite::Run(run) => Call::Run((*run).clone()),
                BulkWrite::Predictions(lines) => Call::Predictions(lines.to_vec()),
            };
            self.calls.lock().unwrap().push(call);
            Ok(WriteSummary {
                rows_written: write.len(),
            })
        }
    }

    pub fn edge(triple: (&str, &str, &str), source_id: &str, target_id: &str) -> EdgeRecord {
        EdgeRecord {
            source_type: triple.0.to_string(),
            target_type: triple.1.to_string(),
            relation_type: triple.2.to_string(),
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            source_name: format!("{} {}", triple.0, source_id),
            target_name: format!("{} {}", triple.1, target_id),
            weight_1: 0.5,
            weight_2: 0.25,
        }
    }

    pub fn ok_rows(
        records: Vec<EdgeRecord>,
    ) -> impl Iterator<Item = Result<EdgeRecord, LoadError>> {
        records.into_iter().map(Ok)
    }
}
