pub mod config;

use std::{fs::File, path::Path};

use anyhow::{Context, Result};
use tracing::info;
use txgraph_load::{
    component::source::{open_edge_table, read_score_table},
    init_database,
    metric::LoadReport,
    GraphSink, Neo4jSink, SqliteSink,
};

use config::{Config, StoreKind};

pub async fn run(config: Config) -> Result<()> {
    info!(store = ?config.store, data_dir = %config.data_dir.display(), "initializing graph");
    let report = match config.store {
        StoreKind::Neo4j => {
            let sink = Neo4jSink::connect(
                &config.neo4j_uri,
                &config.neo4j_user,
                &config.neo4j_password,
            )
            .await
            .with_context(|| format!("Failed to reach neo4j at {}", config.neo4j_uri))?;
            load(&sink, &config).await?
        }
        StoreKind::Sqlite => {
            let sink = SqliteSink::open(&config.sqlite_path).with_context(|| {
                format!("Failed to open {}", config.sqlite_path.display())
            })?;
            load(&sink, &config).await?
        }
    };

    for phase in &report.phases {
        info!(
            phase = %phase.phase,
            time_cost = ?phase.time_cost,
            batches = phase.batches_written,
            skipped = phase.batches_skipped,
            rows = phase.rows_written,
            dropped = phase.rows_dropped,
            "phase finished"
        );
    }

    if let Some(path) = &config.report {
        write_report(&report, path)?;
        info!(path = %path.display(), "load report written");
    }
    Ok(())
}

async fn load<S: GraphSink>(sink: &S, config: &Config) -> Result<LoadReport> {
    let edges = config.attention_path();
    let scores = config.prediction_path();
    let report = init_database(
        sink,
        || open_edge_table(edges),
        || read_score_table(scores),
        &config.plan(),
    )
    .await?;
    Ok(report)
}

fn write_report(report: &LoadReport, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create report file {}", path.display()))?;
    serde_json::to_writer_pretty(file, report).context("Failed to serialize load report")?;
    Ok(())
}

#[test]
fn test_write_report() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    write_report(&LoadReport::default(), &path).unwrap();
    let json: serde_json::Value =
        serde_json::from_reader(File::open(&path).unwrap()).unwrap();
    assert_eq!(json["phases"], serde_json::json!([]));
}

#[tokio::test]
async fn test_run_against_sqlite() {
    use clap::Parser;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("attention_prune.csv"),
        "x_type,y_type,relation,x_id,y_id,x_name,y_name,layer1_att,layer2_att\n\
         drug,disease,indication,DB1,D1,aspirin,pain,0.1,0.2\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("result.json"),
        r#"{"rev_indication": {"D1": {"DB1": 0.7}}}"#,
    )
    .unwrap();

    let data_dir = dir.path().to_str().unwrap();
    let db = dir.path().join("graph.sqlite");
    let report = dir.path().join("report.json");
    let config = Config::parse_from([
        "txgraph",
        "--store",
        "sqlite",
        "--data-dir",
        data_dir,
        "--sqlite-path",
        db.to_str().unwrap(),
        "--report",
        report.to_str().unwrap(),
    ]);
    run(config).await.unwrap();

    let sink = SqliteSink::open(&db).unwrap();
    assert_eq!(sink.prediction_count().unwrap(), 1);
    let json: serde_json::Value =
        serde_json::from_reader(File::open(&report).unwrap()).unwrap();
    assert_eq!(json["phases"].as_array().unwrap().len(), 4);
}
