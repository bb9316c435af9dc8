//! Database initialization: clean, index, relationships, predictions.
//!
//! Indexes must exist before the bulk merges, and relationships must be loaded
//! before predictions because prediction edges only attach to existing nodes.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    component::{
        record::{EdgeRecord, ScoreTable},
        schema::GraphSchema,
        sink::GraphSink,
    },
    errors::{LoadError, Phase, PhaseError},
    metric::{LoadReport, Timer},
};

use super::{
    batch::LoadProgress, prediction::load_predictions, relationship::load_relationships,
    LoadOptions,
};

/// Where to pick a failed initialization back up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePoint {
    pub phase: Phase,
    /// First batch of `phase` that still has to be written.
    pub batch: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecyclePlan {
    pub options: LoadOptions,
    pub schema: GraphSchema,
    pub resume: Option<ResumePoint>,
}

impl LifecyclePlan {
    /// Phases before the resume point already completed and are not repeated.
    pub fn runs(&self, phase: Phase) -> bool {
        match self.resume {
            None => true,
            Some(resume) => phase >= resume.phase,
        }
    }

    pub fn options_for(&self, phase: Phase) -> LoadOptions {
        let mut options = self.options.clone();
        options.resume_from = match self.resume {
            Some(resume) if resume.phase == phase => Some(resume.batch),
            _ => None,
        };
        options
    }
}

fn failed(
    phase: Phase,
    last_completed_batch: Option<usize>,
) -> impl FnOnce(LoadError) -> PhaseError {
    move |source| PhaseError {
        phase,
        last_completed_batch,
        source,
    }
}

/// Rebuilds the graph from the edge table and the score table.
///
/// Inputs are opened lazily so that a missing file is reported against the
/// phase that needs it. The sink stays borrowed for the whole call and is
/// never written to concurrently.
pub async fn init_database<S, E, I, P>(
    sink: &S,
    edges: E,
    scores: P,
    plan: &LifecyclePlan,
) -> Result<LoadReport, PhaseError>
where
    S: GraphSink,
    E: FnOnce() -> Result<I, LoadError>,
    I: IntoIterator<Item = Result<EdgeRecord, LoadError>>,
    P: FnOnce() -> Result<ScoreTable, LoadError>,
{
    let mut report = LoadReport::default();

    sink.verify_connectivity()
        .await
        .map_err(LoadError::Connectivity)
        .map_err(failed(Phase::Connect, None))?;

    if let Some(resume) = plan.resume {
        info!(phase = %resume.phase, batch = resume.batch, "resuming graph initialization");
    }

    if plan.runs(Phase::Clean) {
        let timer = Timer::new();
        sink.clear()
            .await
            .map_err(LoadError::Setup)
            .map_err(failed(Phase::Clean, None))?;
        info!("deleted all nodes");
        report.add_phase(Phase::Clean, timer, &LoadProgress::default());
    }

    if plan.runs(Phase::Index) {
        let timer = Timer::new();
        let mut progress = LoadProgress::default();
        for (i, label) in plan.schema.node_labels.iter().enumerate() {
            sink.create_index(label)
                .await
                .map_err(LoadError::Setup)
                .map_err(failed(Phase::Index, progress.last_completed_batch))?;
            progress.batches_written += 1;
            progress.last_completed_batch = Some(i);
        }
        info!(labels = progress.batches_written, "indexes ready");
        report.add_phase(Phase::Index, timer, &progress);
    }

    if plan.runs(Phase::RelationshipLoad) {
        let timer = Timer::new();
        let options = plan.options_for(Phase::RelationshipLoad);
        let mut progress = LoadProgress::default();
        let outcome = match edges() {
            Ok(rows) => {
                load_relationships(sink, rows, &plan.schema, &options, &mut progress).await
            }
            Err(e) => Err(e),
        };
        outcome.map_err(failed(Phase::RelationshipLoad, progress.last_completed_batch))?;
        report.add_phase(Phase::RelationshipLoad, timer, &progress);
    }

    if plan.runs(Phase::PredictionLoad) {
        let timer = Timer::new();
        let options = plan.options_for(Phase::PredictionLoad);
        let mut progress = LoadProgress::default();
        let outcome = match scores() {
            Ok(table) => load_predictions(sink, &table, &options, &mut progress).await,
            Err(e) => Err(e),
        };
        outcome.map_err(failed(Phase::PredictionLoad, progress.last_completed_batch))?;
        report.add_phase(Phase::PredictionLoad, timer, &progress);
    }

    info!(elapsed = ?report.total_time(), "database initialization finished");
    Ok(report)
}

#[cfg(test)]
use super::testing::{edge, ok_rows, Call, RecordingSink};

#[cfg(test)]
const INDICATION: (&str, &str, &str) = ("drug", "disease", "indication");

#[cfg(test)]
fn scores() -> ScoreTable {
    let mut table = ScoreTable::default();
    table.insert("rev_indication", "D1", "DB1", 0.9);
    table.insert("rev_indication", "D1", "DB2", 0.4);
    table
}

#[tokio::test]
async fn test_phases_run_in_order() {
    let sink = RecordingSink::default();
    let rows = vec![edge(INDICATION, "DB1", "D1"), edge(INDICATION, "DB2", "D1")];
    let report = init_database(
        &sink,
        || Ok(ok_rows(rows)),
        || Ok(scores()),
        &LifecyclePlan::default(),
    )
    .await
    .unwrap();

    let calls = sink.calls();
    assert_eq!(calls[0], Call::Connect);
    assert_eq!(calls[1], Call::Clear);
    let indexes = calls.iter().filter(|x| matches!(x, Call::Index(_))).count();
    assert_eq!(indexes, 10);
    assert!(matches!(calls[12], Call::Run(_)));
    assert!(matches!(calls[13], Call::Predictions(_)));
    assert_eq!(calls.len(), 14);

    let phases: Vec<_> = report.phases.iter().map(|x| x.phase).collect();
    assert_eq!(
        phases,
        vec![
            Phase::Clean,
            Phase::Index,
            Phase::RelationshipLoad,
            Phase::PredictionLoad
        ]
    );
    assert_eq!(report.phase(Phase::PredictionLoad).unwrap().rows_written, 2);
}

#[tokio::test]
async fn test_unreachable_store_aborts_before_writes() {
    let sink = RecordingSink::unreachable();
    let err = init_database(
        &sink,
        || Ok(ok_rows(vec![edge(INDICATION, "DB1", "D1")])),
        || Ok(scores()),
        &LifecyclePlan::default(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.phase, Phase::Connect);
    assert!(matches!(err.source, LoadError::Connectivity(_)));
    assert_eq!(sink.calls(), vec![Call::Connect]);
}

#[tokio::test]
async fn test_failure_names_phase_and_last_batch() {
    // writes: run 0, run 1, run 2 (rejected)
    let sink = RecordingSink::failing_at(2);
    let other = ("gene/protein", "disease", "associated with");
    let rows = vec![
        edge(INDICATION, "DB1", "D1"),
        edge(other, "G1", "D1"),
        edge(INDICATION, "DB2", "D1"),
    ];
    let err = init_database(
        &sink,
        || Ok(ok_rows(rows)),
        || Ok(scores()),
        &LifecyclePlan::default(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.phase, Phase::RelationshipLoad);
    assert_eq!(err.last_completed_batch, Some(1));
    assert!(sink.prediction_batches().is_empty());
}

#[tokio::test]
async fn test_resume_at_predictions_skips_earlier_phases() {
    let sink = RecordingSink::default();
    let plan = LifecyclePlan {
        options: LoadOptions {
            max_batch_size: 1,
            ..Default::default()
        },
        resume: Some(ResumePoint {
            phase: Phase::PredictionLoad,
            batch: 1,
        }),
        ..Default::default()
    };
    let report = init_database(
        &sink,
        || -> Result<std::iter::Empty<Result<EdgeRecord, LoadError>>, LoadError> {
            panic!("edge table must not be read")
        },
        || Ok(scores()),
        &plan,
    )
    .await
    .unwrap();

    assert_eq!(sink.calls()[0], Call::Connect);
    let batches = sink.prediction_batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0][0].target_id, "DB2");
    assert_eq!(report.phases.len(), 1);
    assert_eq!(report.phases[0].batches_skipped, 1);
}

#[tokio::test]
async fn test_unreadable_scores_fail_prediction_phase() {
    let sink = RecordingSink::default();
    let err = init_database(
        &sink,
        || Ok(ok_rows(vec![edge(INDICATION, "DB1", "D1")])),
        || Err(LoadError::Io(std::io::Error::other("no result.json"))),
        &LifecyclePlan::default(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.phase, Phase::PredictionLoad);
    assert_eq!(err.last_completed_batch, None);
    assert_eq!(sink.runs().len(), 1);
}

#[tokio::test]
async fn test_init_sqlite_from_files() {
    use std::io::Write;

    use crate::component::{
        source::{open_edge_table, read_score_table},
        sqlite::SqliteSink,
    };

    let dir = tempfile::tempdir().unwrap();
    let edges_path = dir.path().join("attention_prune.csv");
    let mut file = std::fs::File::create(&edges_path).unwrap();
    writeln!(
        file,
        "x_type,y_type,relation,x_id,y_id,x_name,y_name,layer1_att,layer2_att"
    )
    .unwrap();
    writeln!(file, "drug,disease,indication,DB1,D1,aspirin,pain,0.1,0.2").unwrap();
    writeln!(file, "drug,disease,indication,DB2,D1,ibuprofen,pain,0.3,0.4").unwrap();
    writeln!(
        file,
        "gene/protein,disease,associated with,G1,D1,TP53,pain,0.5,0.6"
    )
    .unwrap();
    drop(file);

    let scores_path = dir.path().join("result.json");
    std::fs::write(
        &scores_path,
        r#"{"rev_indication": {"D1": {"DB1": 0.2, "DB2": 0.8, "DB9": 0.99}}}"#,
    )
    .unwrap();

    let sink = SqliteSink::open(dir.path().join("graph.sqlite")).unwrap();
    let report = init_database(
        &sink,
        || open_edge_table(&edges_path),
        || read_score_table(&scores_path),
        &LifecyclePlan::default(),
    )
    .await
    .unwrap();

    assert_eq!(sink.node_count().unwrap(), 4);
    assert_eq!(sink.edge_count().unwrap(), 3);
    let predicted: Vec<_> = sink
        .predictions_for("D1")
        .unwrap()
        .into_iter()
        .map(|x| x.target_id)
        .collect();
    assert_eq!(predicted, vec!["DB2", "DB1"]);
    let predictions = report.phase(Phase::PredictionLoad).unwrap();
    assert_eq!(predictions.rows_dropped, 1);
    assert_eq!(
        report.phase(Phase::RelationshipLoad).unwrap().batches_written,
        2
    );
}
