//! Neo4j backed [`GraphSink`], talking bolt through `neo4rs`.

use std::collections::HashMap;

use neo4rs::{query, BoltType, Graph, Query, Txn};
use tracing::{debug, warn};

use crate::errors::SinkError;

use super::{
    record::{EdgeRecord, PredictionEdge},
    sink::{BulkWrite, GraphSink, WriteSummary},
};

type BoltLine = HashMap<String, BoltType>;

pub struct Neo4jSink {
    graph: Graph,
}

impl Neo4jSink {
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self, SinkError> {
        let graph = Graph::new(uri, user, password).await?;
        Ok(Self { graph })
    }

    async fn run_counted(txn: &mut Txn, q: Query) -> Result<usize, SinkError> {
        let mut rows = txn.execute(q).await?;
        let mut written = 0;
        while let Some(row) = rows.next(txn.handle()).await? {
            written += row.get::<i64>("written").unwrap_or(0) as usize;
        }
        Ok(written)
    }
}

fn edge_line(record: &EdgeRecord) -> BoltLine {
    let mut m: BoltLine = HashMap::new();
    m.insert("x_id".to_string(), record.source_id.clone().into());
    m.insert("y_id".to_string(), record.target_id.clone().into());
    m.insert("x_name".to_string(), record.source_name.clone().into());
    m.insert("y_name".to_string(), record.target_name.clone().into());
    m.insert("layer1_att".to_string(), record.weight_1.into());
    m.insert("layer2_att".to_string(), record.weight_2.into());
    m
}

fn prediction_line(edge: &PredictionEdge) -> BoltLine {
    let mut m: BoltLine = HashMap::new();
    m.insert("x_id".to_string(), edge.source_id.clone().into());
    m.insert("y_id".to_string(), edge.target_id.clone().into());
    m.insert("score".to_string(), edge.score.into());
    m
}

fn bolt_lines(write: &BulkWrite<'_>) -> Vec<BoltLine> {
    match write {
        BulkWrite::Run(run) => run.records.iter().map(edge_line).collect(),
        BulkWrite::Predictions(lines) => lines.iter().map(prediction_line).collect(),
    }
}

impl GraphSink for Neo4jSink {
    async fn verify_connectivity(&self) -> Result<(), SinkError> {
        self.graph.run(query("RETURN 1")).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), SinkError> {
        self.graph.run(query("MATCH (n) DETACH DELETE n")).await?;
        Ok(())
    }

    async fn create_index(&self, label: &str) -> Result<(), SinkError> {
        let statement = format!("CREATE INDEX IF NOT EXISTS FOR (n:`{}`) ON (n.id)", label);
        self.graph.run(query(&statement)).await?;
        Ok(())
    }

    async fn execute(&self, write: &BulkWrite<'_>) -> Result<WriteSummary, SinkError> {
        let q = query(&write.statement()).param("lines", bolt_lines(write));
        let mut txn = self.graph.start_txn().await?;
        match Self::run_counted(&mut txn, q).await {
            Ok(rows_written) => {
                txn.commit().await?;
                debug!(rows = rows_written, "neo4j batch committed");
                Ok(WriteSummary { rows_written })
            }
            Err(e) => {
                warn!("neo4j batch failed, rolling back: {}", e);
                if let Err(rollback) = txn.rollback().await {
                    warn!("rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }
}

#[test]
fn test_edge_line_keys() {
    let record = EdgeRecord {
        source_type: "drug".to_string(),
        target_type: "disease".to_string(),
        relation_type: "indication".to_string(),
        source_id: "DB00001".to_string(),
        target_id: "0100".to_string(),
        source_name: "Lepirudin".to_string(),
        target_name: "thrombosis".to_string(),
        weight_1: 0.3,
        weight_2: 0.7,
    };
    let line = edge_line(&record);
    let mut keys: Vec<_> = line.keys().cloned().collect();
    keys.sort();
    assert_eq!(
        keys,
        vec!["layer1_att", "layer2_att", "x_id", "x_name", "y_id", "y_name"]
    );
}

#[test]
fn test_prediction_lines_follow_batch() {
    let edges = vec![
        PredictionEdge {
            source_id: "d1".to_string(),
            target_id: "a".to_string(),
            score: 0.9,
        },
        PredictionEdge {
            source_id: "d1".to_string(),
            target_id: "b".to_string(),
            score: 0.8,
        },
    ];
    let lines = bolt_lines(&BulkWrite::Predictions(&edges));
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|x| x.contains_key("score")));
}
