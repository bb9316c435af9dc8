//! Readers for the two input artifacts: the attention edge table (CSV) and
//! the scored prediction table (JSON).

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use csv::ReaderBuilder;

use crate::errors::LoadError;

use super::record::{EdgeRecord, ScoreTable};

/// Streams edge rows out of a CSV source. Extra columns are ignored.
pub fn edge_rows<R: Read>(reader: R) -> impl Iterator<Item = Result<EdgeRecord, LoadError>> {
    ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader)
        .into_deserialize::<EdgeRecord>()
        .map(|row| row.map_err(LoadError::from))
}

pub fn open_edge_table(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<EdgeRecord, LoadError>>, LoadError> {
    let file = File::open(path)?;
    Ok(edge_rows(BufReader::new(file)))
}

pub fn score_table<R: Read>(reader: R) -> Result<ScoreTable, LoadError> {
    Ok(serde_json::from_reader(reader)?)
}

pub fn read_score_table(path: impl AsRef<Path>) -> Result<ScoreTable, LoadError> {
    let file = File::open(path)?;
    score_table(BufReader::new(file))
}

#[test]
fn test_edge_rows_keep_string_ids() {
    let data = "\
,x_type,y_type,relation,x_id,y_id,x_name,y_name,layer1_att,layer2_att
0,drug,disease,indication,DB00945,00012,Aspirin,pain,0.1,0.2
1,drug,disease,indication,DB00316,1.0,Acetaminophen,fever,0.3,0.4
";
    let rows: Vec<EdgeRecord> = edge_rows(data.as_bytes())
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].target_id, "00012");
    assert_eq!(rows[1].target_id, "1.0");
    assert_eq!(rows[1].source_name, "Acetaminophen");
}

#[test]
fn test_edge_rows_report_bad_rows() {
    let data = "\
x_type,y_type,relation,x_id,y_id,x_name,y_name,layer1_att,layer2_att
drug,disease,indication,DB1,D1,a,b,not-a-number,0.2
";
    let mut rows = edge_rows(data.as_bytes());
    assert!(matches!(rows.next(), Some(Err(LoadError::Csv(_)))));
}

#[test]
fn test_score_table_from_file() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"rev_indication": {{"D1": {{"DB1": 0.9, "DB2": 0.95}}}}, "indication": {{}}}}"#
    )
    .unwrap();
    let table = read_score_table(file.path()).unwrap();
    let diseases = table.relation("rev_indication").unwrap();
    assert_eq!(diseases["D1"]["DB2"], 0.95);
    assert!(table.relation("contraindication").is_none());
}

#[test]
fn test_missing_edge_table() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        open_edge_table(dir.path().join("attention_prune.csv")),
        Err(LoadError::Io(_))
    ));
}
