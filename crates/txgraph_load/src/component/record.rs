//! Rows and batches that flow from the source tables into a graph store.
//!
//! Everything here is transient: it is built while iterating a source and
//! dropped right after the batch holding it has been written.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// The relation in the score table that prediction loading consumes.
pub const REV_INDICATION: &str = "rev_indication";

/// `(source_type, target_type, relation_type)`, the schema key of a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub source_type: String,
    pub target_type: String,
    pub relation_type: String,
}

impl Triple {
    pub fn new(source_type: &str, target_type: &str, relation_type: &str) -> Self {
        Self {
            source_type: source_type.to_string(),
            target_type: target_type.to_string(),
            relation_type: relation_type.to_string(),
        }
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({})-[{}]->({})",
            self.source_type, self.relation_type, self.target_type
        )
    }
}

/// One row of the attention edge table.
///
/// Column names follow the exported table (`x_*` is the source side, `y_*`
/// the target side). Ids stay strings and are never coerced to numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    #[serde(rename = "x_type")]
    pub source_type: String,
    #[serde(rename = "y_type")]
    pub target_type: String,
    #[serde(rename = "relation")]
    pub relation_type: String,
    #[serde(rename = "x_id")]
    pub source_id: String,
    #[serde(rename = "y_id")]
    pub target_id: String,
    #[serde(rename = "x_name")]
    pub source_name: String,
    #[serde(rename = "y_name")]
    pub target_name: String,
    #[serde(rename = "layer1_att")]
    pub weight_1: f64,
    #[serde(rename = "layer2_att")]
    pub weight_2: f64,
}

impl EdgeRecord {
    pub fn has_triple(&self, triple: &Triple) -> bool {
        self.source_type == triple.source_type
            && self.target_type == triple.target_type
            && self.relation_type == triple.relation_type
    }

    pub fn triple(&self) -> Triple {
        Triple::new(&self.source_type, &self.target_type, &self.relation_type)
    }
}

/// A maximal contiguous group of edge rows sharing one triple.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    /// Position of this run in emission order, starting at 0.
    pub index: usize,
    /// Position of the first row of this run in the source table.
    pub first_row: usize,
    pub triple: Triple,
    pub records: Vec<EdgeRecord>,
}

impl Run {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionEdge {
    /// Disease id.
    pub source_id: String,
    /// Drug id.
    pub target_id: String,
    pub score: f64,
}

/// drug id -> score
pub type DrugScores = BTreeMap<String, f64>;

/// relation -> disease id -> drug id -> score
///
/// Ordered maps keep disease iteration and tie-breaking deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreTable(pub BTreeMap<String, BTreeMap<String, DrugScores>>);

impl ScoreTable {
    pub fn relation(&self, name: &str) -> Option<&BTreeMap<String, DrugScores>> {
        self.0.get(name)
    }

    pub fn insert(&mut self, relation: &str, disease: &str, drug: &str, score: f64) {
        self.0
            .entry(relation.to_string())
            .or_default()
            .entry(disease.to_string())
            .or_default()
            .insert(drug.to_string(), score);
    }
}

#[test]
fn test_record_reads_exported_columns() {
    let data = "x_type,y_type,relation,x_id,y_id,x_name,y_name,layer1_att,layer2_att\n\
                gene/protein,disease,expresses,0042,7,TP53,asthma,0.25,0.5\n";
    let mut reader = csv::Reader::from_reader(data.as_bytes());
    let record: EdgeRecord = reader.deserialize().next().unwrap().unwrap();
    assert_eq!(record.source_id, "0042");
    assert_eq!(record.target_id, "7");
    assert_eq!(
        record.triple(),
        Triple::new("gene/protein", "disease", "expresses")
    );
    assert_eq!(record.weight_2, 0.5);
}

#[test]
fn test_triple_requires_all_fields() {
    let triple = Triple::new("drug", "disease", "indication");
    let record = EdgeRecord {
        source_type: "drug".to_string(),
        target_type: "disease".to_string(),
        relation_type: "contraindication".to_string(),
        source_id: "1".to_string(),
        target_id: "2".to_string(),
        source_name: String::new(),
        target_name: String::new(),
        weight_1: 0.0,
        weight_2: 0.0,
    };
    assert!(!record.has_triple(&triple));
}
