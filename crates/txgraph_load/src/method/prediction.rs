//! Prediction loading: keep the best `top_k` drugs of every disease and attach
//! them to the graph as `Prediction` edges.
//!
//! Unlike runs, prediction batches are bounded by size only and freely mix
//! diseases.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::{
    component::{
        record::{DrugScores, PredictionEdge, ScoreTable, REV_INDICATION},
        sink::{BulkWrite, GraphSink},
    },
    errors::{BatchContext, LoadError},
};

use super::{
    batch::{flush_batch, BatchBuffer, LoadProgress},
    LoadOptions,
};

/// The `k` best drugs of one disease, highest score first.
///
/// This is a full stable sort. Equal scores keep the map order, i.e. the
/// lower drug id wins. NaN scores cannot be ranked and are left out.
pub fn rank_top_k(drugs: &DrugScores, k: usize) -> Vec<(&str, f64)> {
    let mut ranked: Vec<(&str, f64)> = drugs
        .iter()
        .filter(|(_, score)| !score.is_nan())
        .map(|(drug, score)| (drug.as_str(), *score))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(k);
    ranked
}

/// Prediction edges for every disease, diseases in id order.
pub fn ranked_predictions(
    diseases: &BTreeMap<String, DrugScores>,
    k: usize,
) -> impl Iterator<Item = PredictionEdge> + '_ {
    diseases.iter().flat_map(move |(disease, drugs)| {
        rank_top_k(drugs, k)
            .into_iter()
            .map(move |(drug, score)| PredictionEdge {
                source_id: disease.clone(),
                target_id: drug.to_string(),
                score,
            })
    })
}

/// Writes the top-k predictions of the `rev_indication` relation. A batch is
/// flushed every `max_batch_size` edges and once more for the remainder.
pub async fn load_predictions<S: GraphSink>(
    sink: &S,
    scores: &ScoreTable,
    options: &LoadOptions,
    progress: &mut LoadProgress,
) -> Result<(), LoadError> {
    let Some(diseases) = scores.relation(REV_INDICATION) else {
        warn!("score table has no {} relation, nothing to load", REV_INDICATION);
        return Ok(());
    };

    let mut buffer = BatchBuffer::new(options.max_batch_size);
    for edge in ranked_predictions(diseases, options.top_k) {
        if let Some(batch) = buffer.push(edge) {
            debug!(batch = batch.index, rows = batch.items.len(), "flushing predictions");
            flush_batch(
                sink,
                BulkWrite::Predictions(&batch.items),
                || BatchContext::Prediction,
                batch.index,
                options,
                progress,
            )
            .await?;
        }
    }
    if let Some(batch) = buffer.finish() {
        debug!(batch = batch.index, rows = batch.items.len(), "flushing remaining predictions");
        flush_batch(
            sink,
            BulkWrite::Predictions(&batch.items),
            || BatchContext::Prediction,
            batch.index,
            options,
            progress,
        )
        .await?;
    }

    if progress.rows_dropped > 0 {
        warn!(
            dropped = progress.rows_dropped,
            "predictions referencing missing disease or drug nodes were dropped"
        );
    }
    info!(
        diseases = diseases.len(),
        batches = progress.batches_written,
        rows = progress.rows_written,
        "predictions loaded"
    );
    Ok(())
}

#[cfg(test)]
use super::testing::RecordingSink;

#[cfg(test)]
fn scores_of(pairs: &[(&str, f64)]) -> DrugScores {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

/// `n` diseases named d1..dn with `drugs` candidates each, scores decreasing
/// with the drug number.
#[cfg(test)]
fn table(n: usize, drugs: usize) -> ScoreTable {
    let mut table = ScoreTable::default();
    for d in 1..=n {
        for i in 0..drugs {
            table.insert(
                REV_INDICATION,
                &format!("d{}", d),
                &format!("drug{:02}", i),
                1.0 - i as f64 / 100.0,
            );
        }
    }
    table
}

#[test]
fn test_top_k_orders_by_score() {
    let drugs = scores_of(&[("x", 0.9), ("y", 0.95), ("z", 0.1)]);
    assert_eq!(rank_top_k(&drugs, 2), vec![("y", 0.95), ("x", 0.9)]);
}

#[test]
fn test_fewer_candidates_than_k() {
    let drugs = scores_of(&[("a", 0.3), ("b", 0.2), ("c", 0.1)]);
    assert_eq!(rank_top_k(&drugs, 20).len(), 3);
}

#[test]
fn test_ties_resolve_by_drug_id() {
    let drugs = scores_of(&[("c", 0.5), ("a", 0.5), ("b", 0.5), ("d", 0.9)]);
    assert_eq!(
        rank_top_k(&drugs, 3),
        vec![("d", 0.9), ("a", 0.5), ("b", 0.5)]
    );
}

#[test]
fn test_nan_scores_are_not_ranked() {
    let drugs = scores_of(&[("a", f64::NAN), ("b", 0.2)]);
    assert_eq!(rank_top_k(&drugs, 20), vec![("b", 0.2)]);
}

#[tokio::test]
async fn test_batches_cross_disease_boundary() {
    let sink = RecordingSink::default();
    let options = LoadOptions {
        max_batch_size: 25,
        ..Default::default()
    };
    let mut progress = LoadProgress::default();
    load_predictions(&sink, &table(3, 30), &options, &mut progress)
        .await
        .unwrap();

    let batches = sink.prediction_batches();
    let sizes: Vec<_> = batches.iter().map(|x| x.len()).collect();
    assert_eq!(sizes, vec![25, 25, 10]);

    let first = &batches[0];
    assert!(first[..20].iter().all(|x| x.source_id == "d1"));
    assert!(first[20..].iter().all(|x| x.source_id == "d2"));
    // the 15 d2 edges left over lead the next batch
    assert!(batches[1][..15].iter().all(|x| x.source_id == "d2"));
    assert_eq!(batches[1][0].target_id, "drug05");
    assert_eq!(progress.batches_written, 3);
    assert_eq!(progress.rows_written, 60);
}

#[tokio::test]
async fn test_only_rev_indication_is_loaded() {
    let sink = RecordingSink::default();
    let mut scores = ScoreTable::default();
    scores.insert("indication", "d1", "drug1", 0.9);
    let mut progress = LoadProgress::default();
    load_predictions(&sink, &scores, &LoadOptions::default(), &mut progress)
        .await
        .unwrap();
    assert!(sink.prediction_batches().is_empty());
}

#[tokio::test]
async fn test_rejected_buffer_reports_index() {
    let sink = RecordingSink::failing_at(1);
    let options = LoadOptions {
        max_batch_size: 10,
        ..Default::default()
    };
    let mut progress = LoadProgress::default();
    let err = load_predictions(&sink, &table(2, 20), &options, &mut progress)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LoadError::BatchWrite {
            context: BatchContext::Prediction,
            batch_index: 1,
            ..
        }
    ));
    assert_eq!(progress.last_completed_batch, Some(0));
}

#[tokio::test]
async fn test_missing_nodes_drop_predictions() {
    use crate::component::{
        record::{EdgeRecord, Run, Triple},
        sqlite::SqliteSink,
    };

    let sink = SqliteSink::open_in_memory().unwrap();
    let seed = |drug: &str| EdgeRecord {
        source_type: "drug".to_string(),
        target_type: "disease".to_string(),
        relation_type: "indication".to_string(),
        source_id: drug.to_string(),
        target_id: "d1".to_string(),
        source_name: drug.to_string(),
        target_name: "d1".to_string(),
        weight_1: 0.0,
        weight_2: 0.0,
    };
    let run = Run {
        index: 0,
        first_row: 0,
        triple: Triple::new("drug", "disease", "indication"),
        records: vec![seed("drug00"), seed("drug01")],
    };
    sink.execute(&BulkWrite::Run(&run)).await.unwrap();

    let mut progress = LoadProgress::default();
    load_predictions(&sink, &table(2, 3), &LoadOptions::default(), &mut progress)
        .await
        .unwrap();

    // d2 does not exist and drug02 does not exist
    assert_eq!(progress.rows_written, 2);
    assert_eq!(progress.rows_dropped, 4);
    let stored = sink.predictions_for("d1").unwrap();
    assert_eq!(
        stored.iter().map(|x| x.target_id.as_str()).collect::<Vec<_>>(),
        vec!["drug00", "drug01"]
    );
}
