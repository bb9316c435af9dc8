use serde::{Deserialize, Serialize};

use crate::errors::LoadError;

use super::record::Run;

/// Node labels present in the knowledge graph export.
pub const NODE_TYPES: [&str; 10] = [
    "anatomy",
    "biological_process",
    "cellular_component",
    "disease",
    "drug",
    "effect/phenotype",
    "exposure",
    "gene/protein",
    "molecular_function",
    "pathway",
];

pub const DISEASE: &str = "disease";
pub const DRUG: &str = "drug";

/// The node labels a load is allowed to write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSchema {
    pub node_labels: Vec<String>,
}

impl Default for GraphSchema {
    fn default() -> Self {
        Self {
            node_labels: NODE_TYPES.iter().map(|x| x.to_string()).collect(),
        }
    }
}

impl GraphSchema {
    pub fn is_node_label(&self, label: &str) -> bool {
        self.node_labels.iter().any(|x| x == label)
    }

    /// Checks a run's labels before it is sent anywhere. Labels are spliced
    /// into backtick-quoted identifiers, so a relation label must be non-empty
    /// and backtick-free.
    pub fn validate(&self, run: &Run) -> Result<(), LoadError> {
        let mismatch = |field, value: &str| LoadError::SchemaMismatch {
            row: run.first_row,
            field,
            value: value.to_string(),
        };
        if !self.is_node_label(&run.triple.source_type) {
            return Err(mismatch("source", &run.triple.source_type));
        }
        if !self.is_node_label(&run.triple.target_type) {
            return Err(mismatch("target", &run.triple.target_type));
        }
        let relation = &run.triple.relation_type;
        if relation.trim().is_empty() || relation.contains('`') {
            return Err(mismatch("relation", relation));
        }
        Ok(())
    }
}

#[cfg(test)]
fn run_of(source: &str, target: &str, relation: &str) -> Run {
    Run {
        index: 0,
        first_row: 4,
        triple: super::record::Triple::new(source, target, relation),
        records: vec![],
    }
}

#[test]
fn test_validate_known_labels() {
    let schema = GraphSchema::default();
    assert!(schema
        .validate(&run_of("gene/protein", "effect/phenotype", "associated with"))
        .is_ok());
}

#[test]
fn test_validate_rejects_unknown_node_label() {
    let schema = GraphSchema::default();
    match schema.validate(&run_of("drug", "planet", "orbits")) {
        Err(LoadError::SchemaMismatch { row, field, value }) => {
            assert_eq!(row, 4);
            assert_eq!(field, "target");
            assert_eq!(value, "planet");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_validate_rejects_quoted_relation() {
    let schema = GraphSchema::default();
    assert!(matches!(
        schema.validate(&run_of("drug", "disease", "x` DETACH DELETE n //")),
        Err(LoadError::SchemaMismatch {
            field: "relation",
            ..
        })
    ));
    assert!(schema.validate(&run_of("drug", "disease", " ")).is_err());
}
