//! Loads the attention edge table and the drug prediction table into a
//! property graph.
//!
//! The edge table is cut into runs of rows sharing one
//! `(source_type, target_type, relation_type)` triple, each written as one
//! merge transaction. Predictions are ranked per disease and written in
//! size-bounded batches. [`method::lifecycle::init_database`] ties both
//! together behind a [`component::sink::GraphSink`].

pub mod component;
pub mod errors;
pub mod method;
pub mod metric;

pub use component::{
    neo4j::Neo4jSink,
    record::{EdgeRecord, PredictionEdge, Run, ScoreTable, Triple},
    schema::GraphSchema,
    sink::{BulkWrite, GraphSink, WriteSummary},
    sqlite::SqliteSink,
};
pub use errors::{LoadError, Phase, PhaseError, SinkError};
pub use method::{
    lifecycle::{init_database, LifecyclePlan, ResumePoint},
    LoadOptions,
};
