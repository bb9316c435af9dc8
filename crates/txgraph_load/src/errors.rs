use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::component::record::Triple;

/// Failures raised by a graph store while executing a single request.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("neo4j request failed: {0}")]
    Neo4j(#[from] neo4rs::Error),
    #[error("sqlite request failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("schema migration failed: {0}")]
    Migration(#[from] refinery::Error),
    #[error("graph store connection is poisoned")]
    Poisoned,
}

/// What a rejected batch was carrying, so the caller can find it again.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchContext {
    Run(Triple),
    Prediction,
}

impl fmt::Display for BatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchContext::Run(triple) => write!(f, "run {}", triple),
            BatchContext::Prediction => write!(f, "prediction buffer"),
        }
    }
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("graph store is unreachable: {0}")]
    Connectivity(#[source] SinkError),
    #[error("{context} at batch {batch_index} was rejected: {source}")]
    BatchWrite {
        context: BatchContext,
        batch_index: usize,
        #[source]
        source: SinkError,
    },
    #[error("row {row}: unknown {field} label `{value}`")]
    SchemaMismatch {
        row: usize,
        field: &'static str,
        value: String,
    },
    #[error("graph store setup failed: {0}")]
    Setup(#[source] SinkError),
    #[error("failed to read edge table: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to read score table: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lifecycle phases in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Connect,
    Clean,
    Index,
    RelationshipLoad,
    PredictionLoad,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Connect => "connect",
            Phase::Clean => "clean",
            Phase::Index => "index",
            Phase::RelationshipLoad => "relationship-load",
            Phase::PredictionLoad => "prediction-load",
        };
        f.write_str(name)
    }
}

/// A lifecycle failure, tagged with the phase and the last batch that made it
/// into the store. Re-running that phase with `resume_from = last + 1` picks up
/// where the failure left off.
#[derive(Error, Debug)]
#[error("{phase} phase failed (last completed batch: {}): {source}", display_batch(.last_completed_batch))]
pub struct PhaseError {
    pub phase: Phase,
    pub last_completed_batch: Option<usize>,
    #[source]
    pub source: LoadError,
}

fn display_batch(batch: &Option<usize>) -> String {
    match batch {
        Some(index) => index.to_string(),
        None => "none".to_string(),
    }
}

#[test]
fn test_phase_error_message() {
    let err = PhaseError {
        phase: Phase::RelationshipLoad,
        last_completed_batch: Some(3),
        source: LoadError::SchemaMismatch {
            row: 12,
            field: "source",
            value: "planet".to_string(),
        },
    };
    assert_eq!(
        err.to_string(),
        "relationship-load phase failed (last completed batch: 3): row 12: unknown source label `planet`"
    );
}
