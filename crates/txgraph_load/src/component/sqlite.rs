//! Embedded property-graph store on SQLite.
//!
//! Nodes are keyed by `(label, id)` and edges by both endpoints plus the
//! relation, which gives the same create-if-absent behavior as the Cypher
//! `MERGE` statements: `INSERT OR IGNORE` never touches an existing row, so
//! names and attention weights keep the values they were created with.

use std::{path::Path, sync::Mutex};

use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::errors::SinkError;

use super::{
    record::{PredictionEdge, Run, Triple, REV_INDICATION},
    schema::{DISEASE, DRUG},
    sink::{BulkWrite, GraphSink, WriteSummary},
};

refinery::embed_migrations!("migration");

pub(crate) fn run_migrations(conn: &mut Connection) -> Result<(), SinkError> {
    migrations::runner().run(conn)?;
    Ok(())
}

#[test]
fn test_in_mem_migration() {
    let mut conn = Connection::open_in_memory().unwrap();
    run_migrations(&mut conn).unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredNode {
    pub label: String,
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredEdge {
    pub source_id: String,
    pub target_id: String,
    pub layer1_att: Option<f64>,
    pub layer2_att: Option<f64>,
}

pub(crate) fn merge_run(conn: &mut Connection, run: &Run) -> Result<usize, SinkError> {
    let tx = conn.transaction()?;
    {
        let mut node = tx.prepare_cached(
            "INSERT OR IGNORE INTO node (label, id, name) VALUES (?1, ?2, ?3)",
        )?;
        let mut edge = tx.prepare_cached(
            "INSERT OR IGNORE INTO edge (source_label, source_id, relation, target_label, target_id, layer1_att, layer2_att) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        let Triple {
            source_type,
            target_type,
            relation_type,
        } = &run.triple;
        for record in &run.records {
            node.execute((source_type, &record.source_id, &record.source_name))?;
            node.execute((target_type, &record.target_id, &record.target_name))?;
            edge.execute((
                source_type,
                &record.source_id,
                relation_type,
                target_type,
                &record.target_id,
                record.weight_1,
                record.weight_2,
            ))?;
        }
    }
    tx.commit()?;
    Ok(run.len())
}

pub(crate) fn insert_predictions(
    conn: &mut Connection,
    lines: &[PredictionEdge],
) -> Result<usize, SinkError> {
    let tx = conn.transaction()?;
    let mut written = 0;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO prediction (disease_id, drug_id, score, relation) \
             SELECT ?1, ?2, ?3, ?4 \
             WHERE EXISTS (SELECT 1 FROM node WHERE label = ?5 AND id = ?1) \
             AND EXISTS (SELECT 1 FROM node WHERE label = ?6 AND id = ?2)",
        )?;
        for line in lines {
            written += stmt.execute((
                &line.source_id,
                &line.target_id,
                line.score,
                REV_INDICATION,
                DISEASE,
                DRUG,
            ))?;
        }
    }
    tx.commit()?;
    Ok(written)
}

pub(crate) fn clear_all_tables(conn: &mut Connection) -> Result<(), SinkError> {
    conn.execute_batch("DELETE FROM prediction; DELETE FROM edge; DELETE FROM node;")?;
    Ok(())
}

fn index_name(label: &str) -> String {
    let suffix: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("idx_node_{}", suffix)
}

pub(crate) fn create_label_index(conn: &mut Connection, label: &str) -> Result<(), SinkError> {
    conn.execute_batch(&format!(
        "CREATE INDEX IF NOT EXISTS \"{}\" ON node (id) WHERE label = '{}'",
        index_name(label),
        label.replace('\'', "''"),
    ))?;
    Ok(())
}

pub struct SqliteSink {
    conn: Mutex<Connection>,
}

impl SqliteSink {
    pub fn open_in_memory() -> Result<Self, SinkError> {
        let mut conn = Connection::open_in_memory()?;
        run_migrations(&mut conn)?;
        Ok(Self { conn: conn.into() })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let mut conn = Connection::open(path)?;
        run_migrations(&mut conn)?;
        Ok(Self { conn: conn.into() })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, SinkError>,
    ) -> Result<T, SinkError> {
        let mut conn = self.conn.lock().map_err(|_| SinkError::Poisoned)?;
        f(&mut conn)
    }

    pub fn find_node(&self, label: &str, id: &str) -> Result<Option<StoredNode>, SinkError> {
        self.with_conn(|conn| {
            let node = conn
                .query_row(
                    "SELECT label, id, name FROM node WHERE label = ? AND id = ?",
                    [label, id],
                    |row| {
                        Ok(StoredNode {
                            label: row.get(0)?,
                            id: row.get(1)?,
                            name: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(node)
        })
    }

    pub fn find_edge(
        &self,
        triple: &Triple,
        source_id: &str,
        target_id: &str,
    ) -> Result<Option<StoredEdge>, SinkError> {
        self.with_conn(|conn| {
            let edge = conn
                .query_row(
                    "SELECT source_id, target_id, layer1_att, layer2_att FROM edge \
                     WHERE source_label = ? AND source_id = ? AND relation = ? AND target_label = ? AND target_id = ?",
                    [
                        triple.source_type.as_str(),
                        source_id,
                        triple.relation_type.as_str(),
                        triple.target_type.as_str(),
                        target_id,
                    ],
                    |row| {
                        Ok(StoredEdge {
                            source_id: row.get(0)?,
                            target_id: row.get(1)?,
                            layer1_att: row.get(2)?,
                            layer2_att: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(edge)
        })
    }

    /// Predictions for one disease, best first.
    pub fn predictions_for(&self, disease_id: &str) -> Result<Vec<PredictionEdge>, SinkError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT disease_id, drug_id, score FROM prediction WHERE disease_id = ? ORDER BY score DESC, id",
            )?;
            let rows = stmt.query_map([disease_id], |row| {
                Ok(PredictionEdge {
                    source_id: row.get(0)?,
                    target_id: row.get(1)?,
                    score: row.get(2)?,
                })
            })?;
            let mut res = Vec::new();
            for row in rows {
                res.push(row?);
            }
            Ok(res)
        })
    }

    pub fn node_count(&self) -> Result<usize, SinkError> {
        self.count("node")
    }

    pub fn edge_count(&self) -> Result<usize, SinkError> {
        self.count("edge")
    }

    pub fn prediction_count(&self) -> Result<usize, SinkError> {
        self.count("prediction")
    }

    fn count(&self, table: &str) -> Result<usize, SinkError> {
        self.with_conn(|conn| {
            let n: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })?;
            Ok(n as usize)
        })
    }
}

impl GraphSink for SqliteSink {
    async fn verify_connectivity(&self) -> Result<(), SinkError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
    }

    async fn clear(&self) -> Result<(), SinkError> {
        self.with_conn(clear_all_tables)
    }

    async fn create_index(&self, label: &str) -> Result<(), SinkError> {
        self.with_conn(|conn| create_label_index(conn, label))
    }

    async fn execute(&self, write: &BulkWrite<'_>) -> Result<WriteSummary, SinkError> {
        let rows_written = self.with_conn(|conn| match write {
            BulkWrite::Run(run) => merge_run(conn, run),
            BulkWrite::Predictions(lines) => insert_predictions(conn, lines),
        })?;
        debug!(rows = rows_written, "sqlite batch committed");
        Ok(WriteSummary { rows_written })
    }
}

#[cfg(test)]
fn record(
    source_id: &str,
    target_id: &str,
    source_name: &str,
    weight: f64,
) -> super::record::EdgeRecord {
    super::record::EdgeRecord {
        source_type: DRUG.to_string(),
        target_type: DISEASE.to_string(),
        relation_type: "indication".to_string(),
        source_id: source_id.to_string(),
        target_id: target_id.to_string(),
        source_name: source_name.to_string(),
        target_name: format!("disease {}", target_id),
        weight_1: weight,
        weight_2: weight * 2.0,
    }
}

#[cfg(test)]
fn run_with(index: usize, records: Vec<super::record::EdgeRecord>) -> Run {
    Run {
        index,
        first_row: 0,
        triple: Triple::new(DRUG, DISEASE, "indication"),
        records,
    }
}

#[tokio::test]
async fn test_merge_keeps_first_name_and_weights() {
    let sink = SqliteSink::open_in_memory().unwrap();
    let first = run_with(0, vec![record("DB1", "D1", "aspirin", 0.1)]);
    let second = run_with(1, vec![record("DB1", "D1", "acetylsalicylic acid", 0.9)]);
    sink.execute(&BulkWrite::Run(&first)).await.unwrap();
    sink.execute(&BulkWrite::Run(&second)).await.unwrap();

    let node = sink.find_node(DRUG, "DB1").unwrap().unwrap();
    assert_eq!(node.name.as_deref(), Some("aspirin"));
    let edge = sink
        .find_edge(&first.triple, "DB1", "D1")
        .unwrap()
        .unwrap();
    assert_eq!(edge.layer1_att, Some(0.1));
    assert_eq!(edge.layer2_att, Some(0.2));
    assert_eq!(sink.node_count().unwrap(), 2);
    assert_eq!(sink.edge_count().unwrap(), 1);
}

#[tokio::test]
async fn test_same_id_under_different_labels_are_distinct_nodes() {
    let sink = SqliteSink::open_in_memory().unwrap();
    let mut run = run_with(0, vec![record("7", "7", "seven", 0.5)]);
    run.records[0].target_name = "also seven".to_string();
    sink.execute(&BulkWrite::Run(&run)).await.unwrap();
    assert_eq!(sink.node_count().unwrap(), 2);
}

#[tokio::test]
async fn test_predictions_need_existing_endpoints() {
    let sink = SqliteSink::open_in_memory().unwrap();
    let run = run_with(0, vec![record("DB1", "D1", "aspirin", 0.1)]);
    sink.execute(&BulkWrite::Run(&run)).await.unwrap();

    let lines = vec![
        PredictionEdge {
            source_id: "D1".to_string(),
            target_id: "DB1".to_string(),
            score: 0.8,
        },
        PredictionEdge {
            source_id: "D1".to_string(),
            target_id: "DB404".to_string(),
            score: 0.7,
        },
        PredictionEdge {
            source_id: "D404".to_string(),
            target_id: "DB1".to_string(),
            score: 0.6,
        },
    ];
    let summary = sink.execute(&BulkWrite::Predictions(&lines)).await.unwrap();
    assert_eq!(summary.rows_written, 1);
    assert_eq!(sink.predictions_for("D1").unwrap(), lines[..1].to_vec());
}

#[tokio::test]
async fn test_clear_and_index() {
    let sink = SqliteSink::open_in_memory().unwrap();
    sink.verify_connectivity().await.unwrap();
    for label in super::schema::NODE_TYPES {
        sink.create_index(label).await.unwrap();
    }
    // second pass is a no-op
    sink.create_index("gene/protein").await.unwrap();

    let run = run_with(0, vec![record("DB1", "D1", "aspirin", 0.1)]);
    sink.execute(&BulkWrite::Run(&run)).await.unwrap();
    sink.clear().await.unwrap();
    assert_eq!(sink.node_count().unwrap(), 0);
    assert_eq!(sink.edge_count().unwrap(), 0);
}
