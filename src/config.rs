use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use txgraph_load::{
    method::{DEFAULT_BATCH_SIZE, DEFAULT_TOP_K},
    GraphSchema, LifecyclePlan, LoadOptions, Phase, ResumePoint,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum StoreKind {
    Neo4j,
    Sqlite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum ResumePhase {
    Relationship,
    Prediction,
}

impl From<ResumePhase> for Phase {
    fn from(phase: ResumePhase) -> Self {
        match phase {
            ResumePhase::Relationship => Phase::RelationshipLoad,
            ResumePhase::Prediction => Phase::PredictionLoad,
        }
    }
}

/// Builds the knowledge graph from the exported attention table and the
/// scored predictions.
#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(name = "txgraph")]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Folder holding the exported tables.
    #[arg(long, env = "TXGRAPH_DATA_DIR", default_value = "./collab_delivery")]
    pub data_dir: PathBuf,

    /// Attention edge table, relative to the data folder.
    #[arg(long, default_value = "attention_prune.csv")]
    pub attention_file: PathBuf,

    /// Scored prediction table, relative to the data folder.
    #[arg(long, default_value = "result.json")]
    pub prediction_file: PathBuf,

    #[arg(long, value_enum, env = "TXGRAPH_STORE", default_value = "neo4j")]
    pub store: StoreKind,

    #[arg(long, env = "TXGRAPH_NEO4J_URI", default_value = "bolt://localhost:7687")]
    pub neo4j_uri: String,

    #[arg(long, env = "TXGRAPH_NEO4J_USER", default_value = "neo4j")]
    pub neo4j_user: String,

    #[arg(long, env = "TXGRAPH_NEO4J_PASSWORD", default_value = "", hide_env_values = true)]
    #[serde(skip_serializing)]
    pub neo4j_password: String,

    /// SQLite database file for `--store sqlite`.
    #[arg(long, env = "TXGRAPH_SQLITE_PATH", default_value = ":memory:")]
    pub sqlite_path: PathBuf,

    /// Maximum rows per write transaction.
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Drugs kept per disease.
    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,

    /// Skip clean/index and resume loading at this phase.
    #[arg(long, value_enum, requires = "resume_batch")]
    pub resume_phase: Option<ResumePhase>,

    /// First batch of the resumed phase that still has to be written.
    #[arg(long, requires = "resume_phase")]
    pub resume_batch: Option<usize>,

    /// Write the load report as JSON to this file.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long)]
    pub debug: bool,
}

impl Config {
    pub fn attention_path(&self) -> PathBuf {
        self.data_dir.join(&self.attention_file)
    }

    pub fn prediction_path(&self) -> PathBuf {
        self.data_dir.join(&self.prediction_file)
    }

    pub fn plan(&self) -> LifecyclePlan {
        let resume = match (self.resume_phase, self.resume_batch) {
            (Some(phase), Some(batch)) => Some(ResumePoint {
                phase: phase.into(),
                batch,
            }),
            _ => None,
        };
        LifecyclePlan {
            options: LoadOptions {
                max_batch_size: self.batch_size,
                top_k: self.top_k,
                resume_from: None,
            },
            schema: GraphSchema::default(),
            resume,
        }
    }
}

#[test]
fn test_default_config() {
    let config = Config::parse_from(["txgraph"]);
    assert_eq!(config.store, StoreKind::Neo4j);
    assert_eq!(
        config.attention_path(),
        PathBuf::from("./collab_delivery/attention_prune.csv")
    );
    let plan = config.plan();
    assert_eq!(plan.options.max_batch_size, 5000);
    assert_eq!(plan.options.top_k, 20);
    assert!(plan.resume.is_none());
}

#[test]
fn test_resume_flags() {
    let config = Config::parse_from([
        "txgraph",
        "--store",
        "sqlite",
        "--resume-phase",
        "prediction",
        "--resume-batch",
        "4",
    ]);
    assert_eq!(
        config.plan().resume,
        Some(ResumePoint {
            phase: Phase::PredictionLoad,
            batch: 4
        })
    );
}

#[test]
fn test_resume_needs_both_flags() {
    assert!(Config::try_parse_from(["txgraph", "--resume-batch", "4"]).is_err());
}
