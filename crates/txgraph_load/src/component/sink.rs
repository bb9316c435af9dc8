//! The seam between the loaders and a graph store.
//!
//! A sink receives one [`BulkWrite`] at a time and runs it as a single
//! transaction. The loaders never issue a second write before the previous
//! one has returned.

use crate::errors::SinkError;

use super::{
    record::{PredictionEdge, Run, REV_INDICATION},
    schema::{DISEASE, DRUG},
};

/// Relationship type of materialized prediction edges.
pub const PREDICTION_EDGE: &str = "Prediction";

/// One transaction worth of rows plus the statement that writes them.
#[derive(Debug, Clone, Copy)]
pub enum BulkWrite<'a> {
    /// Merge a run of edges. Nodes and edges are created if absent; names and
    /// attention weights are only set on creation.
    Run(&'a Run),
    /// Attach predictions to existing disease and drug nodes. Predictions whose
    /// endpoints do not exist are dropped by the store.
    Predictions(&'a [PredictionEdge]),
}

impl BulkWrite<'_> {
    pub fn len(&self) -> usize {
        match self {
            BulkWrite::Run(run) => run.len(),
            BulkWrite::Predictions(lines) => lines.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cypher text for this write. `$lines` is bound to the rows.
    pub fn statement(&self) -> String {
        match self {
            BulkWrite::Run(run) => format!(
                "UNWIND $lines AS line \
                 MERGE (node1:`{x_type}` {{ id: line.x_id }}) \
                 ON CREATE SET node1.name = line.x_name \
                 MERGE (node2:`{y_type}` {{ id: line.y_id }}) \
                 ON CREATE SET node2.name = line.y_name \
                 MERGE (node1)-[e:`{relation}`]->(node2) \
                 ON CREATE SET e.layer1_att = line.layer1_att, e.layer2_att = line.layer2_att \
                 RETURN count(*) AS written",
                x_type = run.triple.source_type,
                y_type = run.triple.target_type,
                relation = run.triple.relation_type,
            ),
            BulkWrite::Predictions(_) => format!(
                "UNWIND $lines AS line \
                 MATCH (node1:`{DISEASE}` {{ id: line.x_id }}) \
                 MATCH (node2:`{DRUG}` {{ id: line.y_id }}) \
                 CREATE (node1)-[:{PREDICTION_EDGE} {{ score: line.score, relation: '{REV_INDICATION}' }}]->(node2) \
                 RETURN count(*) AS written"
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Rows the statement actually applied. For predictions this is lower
    /// than the batch length when endpoints were missing.
    pub rows_written: usize,
}

/// A bulk-write capable graph store.
#[allow(async_fn_in_trait)]
pub trait GraphSink {
    /// Fails when the store cannot be reached. Called once before any write.
    async fn verify_connectivity(&self) -> Result<(), SinkError>;

    /// Removes every node and edge.
    async fn clear(&self) -> Result<(), SinkError>;

    /// Creates a lookup index on `id` for nodes carrying `label`, if missing.
    async fn create_index(&self, label: &str) -> Result<(), SinkError>;

    /// Runs one write as one transaction.
    async fn execute(&self, write: &BulkWrite<'_>) -> Result<WriteSummary, SinkError>;
}

#[test]
fn test_run_statement_embeds_labels() {
    use super::record::Triple;

    let run = Run {
        index: 0,
        first_row: 0,
        triple: Triple::new("gene/protein", "disease", "associated with"),
        records: vec![],
    };
    let statement = BulkWrite::Run(&run).statement();
    assert!(statement.contains("MERGE (node1:`gene/protein` { id: line.x_id })"));
    assert!(statement.contains("MERGE (node2:`disease` { id: line.y_id })"));
    assert!(statement.contains("MERGE (node1)-[e:`associated with`]->(node2)"));
    assert!(statement.contains("ON CREATE SET node1.name = line.x_name"));
}

#[test]
fn test_prediction_statement_matches_strictly() {
    let statement = BulkWrite::Predictions(&[]).statement();
    assert!(statement.contains("MATCH (node1:`disease` { id: line.x_id })"));
    assert!(statement.contains("MATCH (node2:`drug` { id: line.y_id })"));
    assert!(statement.contains("relation: 'rev_indication'"));
    assert!(!statement.contains("MERGE"));
}
