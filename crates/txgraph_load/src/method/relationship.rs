//! Relationship loading: split the edge table into homogeneous runs and merge
//! each run with one statement.
//!
//! A run closes as soon as the triple changes or it holds `max_batch_size`
//! rows. Runs are never merged with a later run of the same triple, so the
//! concatenation of all runs is exactly the input table.

use tracing::{debug, info};

use crate::{
    component::{
        record::{EdgeRecord, Run, Triple},
        schema::GraphSchema,
        sink::{BulkWrite, GraphSink},
    },
    errors::{BatchContext, LoadError},
};

use super::{
    batch::{flush_batch, LoadProgress},
    LoadOptions,
};

enum GroupState {
    Empty,
    Accumulating {
        triple: Triple,
        first_row: usize,
        records: Vec<EdgeRecord>,
    },
}

/// Lazily groups edge rows into [`Run`]s.
///
/// The grouper consumes its input, so the sequence of runs can only be walked
/// once. The first source error ends the sequence.
pub struct RunGrouper<I> {
    rows: I,
    max_batch_size: usize,
    state: GroupState,
    next_row: usize,
    next_index: usize,
    done: bool,
}

impl<I> RunGrouper<I>
where
    I: Iterator<Item = Result<EdgeRecord, LoadError>>,
{
    pub fn new(rows: I, max_batch_size: usize) -> Self {
        Self {
            rows,
            max_batch_size: max_batch_size.max(1),
            state: GroupState::Empty,
            next_row: 0,
            next_index: 0,
            done: false,
        }
    }

    fn seed(&mut self, record: EdgeRecord, row: usize) {
        self.state = GroupState::Accumulating {
            triple: record.triple(),
            first_row: row,
            records: vec![record],
        };
    }

    fn is_full(&self) -> bool {
        match &self.state {
            GroupState::Empty => false,
            GroupState::Accumulating { records, .. } => records.len() >= self.max_batch_size,
        }
    }

    fn take_run(&mut self) -> Option<Run> {
        match std::mem::replace(&mut self.state, GroupState::Empty) {
            GroupState::Empty => None,
            GroupState::Accumulating {
                triple,
                first_row,
                records,
            } => {
                let index = self.next_index;
                self.next_index += 1;
                Some(Run {
                    index,
                    first_row,
                    triple,
                    records,
                })
            }
        }
    }

    /// Feeds one row, returning a run if this row closed one.
    fn accept(&mut self, record: EdgeRecord) -> Option<Run> {
        let row = self.next_row;
        self.next_row += 1;

        let extends = match &self.state {
            GroupState::Empty => None,
            GroupState::Accumulating {
                triple, records, ..
            } => Some(record.has_triple(triple) && records.len() < self.max_batch_size),
        };

        match extends {
            None => {
                self.seed(record, row);
                if self.is_full() {
                    return self.take_run();
                }
                None
            }
            Some(true) => {
                if let GroupState::Accumulating { records, .. } = &mut self.state {
                    records.push(record);
                }
                if self.is_full() {
                    return self.take_run();
                }
                None
            }
            Some(false) => {
                let closed = self.take_run();
                self.seed(record, row);
                closed
            }
        }
    }
}

impl<I> Iterator for RunGrouper<I>
where
    I: Iterator<Item = Result<EdgeRecord, LoadError>>,
{
    type Item = Result<Run, LoadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.rows.next() {
                Some(Ok(record)) => {
                    if let Some(run) = self.accept(record) {
                        return Some(Ok(run));
                    }
                }
                Some(Err(e)) => {
                    self.done = true;
                    self.state = GroupState::Empty;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    return self.take_run().map(Ok);
                }
            }
        }
    }
}

/// Validates and writes every run of `rows`, one transaction per run, in
/// input order. Stops at the first failure.
pub async fn load_relationships<S, I>(
    sink: &S,
    rows: I,
    schema: &GraphSchema,
    options: &LoadOptions,
    progress: &mut LoadProgress,
) -> Result<(), LoadError>
where
    S: GraphSink,
    I: IntoIterator<Item = Result<EdgeRecord, LoadError>>,
{
    for run in RunGrouper::new(rows.into_iter(), options.max_batch_size) {
        let run = run?;
        schema.validate(&run)?;
        debug!(run = run.index, triple = %run.triple, rows = run.len(), "flushing run");
        flush_batch(
            sink,
            BulkWrite::Run(&run),
            || BatchContext::Run(run.triple.clone()),
            run.index,
            options,
            progress,
        )
        .await?;
    }
    info!(
        runs = progress.batches_written,
        skipped = progress.batches_skipped,
        rows = progress.rows_written,
        "relationships loaded"
    );
    Ok(())
}

#[cfg(test)]
use super::testing::{edge, ok_rows, Call, RecordingSink};

#[cfg(test)]
const A: (&str, &str, &str) = ("gene/protein", "disease", "expresses");
#[cfg(test)]
const B: (&str, &str, &str) = ("drug", "disease", "indication");

#[cfg(test)]
fn group(records: Vec<EdgeRecord>, max_batch_size: usize) -> Vec<Run> {
    RunGrouper::new(ok_rows(records), max_batch_size)
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

#[test]
fn test_eager_split_does_not_merge_recurring_triple() {
    let rows = vec![
        edge(A, "1", "1"),
        edge(A, "2", "1"),
        edge(B, "3", "1"),
        edge(B, "4", "1"),
        edge(A, "5", "1"),
    ];
    let runs = group(rows.clone(), 5);
    let sizes: Vec<_> = runs.iter().map(|x| x.len()).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    assert_eq!(runs[0].triple, Triple::new(A.0, A.1, A.2));
    assert_eq!(runs[1].triple, Triple::new(B.0, B.1, B.2));
    assert_eq!(runs[2].triple, Triple::new(A.0, A.1, A.2));
    assert_eq!(
        runs.iter().map(|x| x.first_row).collect::<Vec<_>>(),
        vec![0, 2, 4]
    );
    assert_eq!(
        runs.iter().map(|x| x.index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
}

#[test]
fn test_partition_homogeneity_and_bound() {
    let triples = [A, B, ("drug", "drug", "synergistic interaction")];
    let rows: Vec<_> = (0..97)
        .map(|i| edge(triples[(i / 7) % 3], &i.to_string(), "t"))
        .collect();
    let runs = group(rows.clone(), 4);

    let flattened: Vec<EdgeRecord> = runs.iter().flat_map(|x| x.records.clone()).collect();
    assert_eq!(flattened, rows);
    for run in &runs {
        assert!(!run.is_empty());
        assert!(run.len() <= 4);
        assert!(run.records.iter().all(|x| x.has_triple(&run.triple)));
    }
}

#[test]
fn test_bound_splits_long_run() {
    let rows: Vec<_> = (0..12000).map(|i| edge(A, &i.to_string(), "d")).collect();
    let runs = group(rows, 5000);
    let sizes: Vec<_> = runs.iter().map(|x| x.len()).collect();
    assert_eq!(sizes, vec![5000, 5000, 2000]);
    assert_eq!(runs[1].first_row, 5000);
    assert_eq!(runs[2].first_row, 10000);
}

#[test]
fn test_relation_alone_closes_run() {
    let rows = vec![
        edge(("drug", "disease", "indication"), "1", "1"),
        edge(("drug", "disease", "contraindication"), "1", "1"),
    ];
    assert_eq!(group(rows, 10).len(), 2);
}

#[test]
fn test_single_row_batches() {
    let rows = vec![edge(A, "1", "1"), edge(A, "2", "1"), edge(B, "3", "1")];
    let runs = group(rows, 1);
    assert_eq!(runs.len(), 3);
    assert!(runs.iter().all(|x| x.len() == 1));
}

#[test]
fn test_empty_table_has_no_runs() {
    assert!(group(vec![], 5000).is_empty());
}

#[test]
fn test_source_error_ends_sequence() {
    let rows = vec![
        Ok(edge(A, "1", "1")),
        Err(LoadError::Io(std::io::Error::other("truncated"))),
        Ok(edge(A, "2", "1")),
    ];
    let mut grouper = RunGrouper::new(rows.into_iter(), 10);
    assert!(matches!(grouper.next(), Some(Err(LoadError::Io(_)))));
    assert!(grouper.next().is_none());
}

#[tokio::test]
async fn test_load_writes_runs_in_order() {
    let sink = RecordingSink::default();
    let rows = vec![edge(A, "1", "1"), edge(B, "2", "1"), edge(A, "3", "1")];
    let mut progress = LoadProgress::default();
    load_relationships(
        &sink,
        ok_rows(rows),
        &GraphSchema::default(),
        &LoadOptions::default(),
        &mut progress,
    )
    .await
    .unwrap();

    let written: Vec<_> = sink.runs().iter().map(|x| x.records[0].source_id.clone()).collect();
    assert_eq!(written, vec!["1", "2", "3"]);
    assert_eq!(progress.batches_written, 3);
    assert_eq!(progress.rows_written, 3);
    assert_eq!(progress.last_completed_batch, Some(2));
}

#[tokio::test]
async fn test_schema_mismatch_is_not_sent() {
    let sink = RecordingSink::default();
    let rows = vec![edge(A, "1", "1"), edge(("drug", "planet", "orbits"), "2", "x")];
    let mut progress = LoadProgress::default();
    let err = load_relationships(
        &sink,
        ok_rows(rows),
        &GraphSchema::default(),
        &LoadOptions::default(),
        &mut progress,
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        LoadError::SchemaMismatch {
            row: 1,
            field: "target",
            ..
        }
    ));
    assert_eq!(sink.runs().len(), 1);
    assert_eq!(progress.last_completed_batch, Some(0));
}

#[tokio::test]
async fn test_rejected_run_reports_triple_and_index() {
    let sink = RecordingSink::failing_at(1);
    let rows = vec![edge(A, "1", "1"), edge(B, "2", "1"), edge(A, "3", "1")];
    let mut progress = LoadProgress::default();
    let err = load_relationships(
        &sink,
        ok_rows(rows),
        &GraphSchema::default(),
        &LoadOptions::default(),
        &mut progress,
    )
    .await
    .unwrap_err();

    match err {
        LoadError::BatchWrite {
            context,
            batch_index,
            ..
        } => {
            assert_eq!(context, BatchContext::Run(Triple::new(B.0, B.1, B.2)));
            assert_eq!(batch_index, 1);
        }
        other => panic!("unexpected {:?}", other),
    }
    // halts instead of skipping the rejected run
    assert_eq!(sink.runs().len(), 1);
    assert_eq!(progress.last_completed_batch, Some(0));
}

#[tokio::test]
async fn test_resume_skips_completed_runs() {
    let sink = RecordingSink::default();
    let rows = vec![edge(A, "1", "1"), edge(B, "2", "1"), edge(A, "3", "1")];
    let options = LoadOptions {
        resume_from: Some(1),
        ..Default::default()
    };
    let mut progress = LoadProgress::default();
    load_relationships(&sink, ok_rows(rows), &GraphSchema::default(), &options, &mut progress)
        .await
        .unwrap();

    let indexes: Vec<_> = sink
        .calls()
        .into_iter()
        .filter_map(|x| match x {
            Call::Run(run) => Some(run.index),
            _ => None,
        })
        .collect();
    assert_eq!(indexes, vec![1, 2]);
    assert_eq!(progress.batches_skipped, 1);
}

#[tokio::test]
async fn test_load_into_sqlite_merges_nodes_across_runs() {
    use crate::component::sqlite::SqliteSink;

    let sink = SqliteSink::open_in_memory().unwrap();
    let mut renamed = edge(B, "DB1", "D1");
    renamed.source_name = "renamed".to_string();
    renamed.weight_1 = 0.99;
    let rows = vec![
        edge(B, "DB1", "D1"),
        edge(A, "G1", "D1"),
        renamed,
    ];
    let mut progress = LoadProgress::default();
    load_relationships(
        &sink,
        ok_rows(rows),
        &GraphSchema::default(),
        &LoadOptions::default(),
        &mut progress,
    )
    .await
    .unwrap();

    assert_eq!(progress.batches_written, 3);
    let drug = sink.find_node("drug", "DB1").unwrap().unwrap();
    assert_eq!(drug.name.as_deref(), Some("drug DB1"));
    let indication = sink
        .find_edge(&Triple::new(B.0, B.1, B.2), "DB1", "D1")
        .unwrap()
        .unwrap();
    assert_eq!(indication.layer1_att, Some(0.5));
    // disease D1 is shared by both triples
    assert_eq!(sink.node_count().unwrap(), 3);
    assert_eq!(sink.edge_count().unwrap(), 2);
}
