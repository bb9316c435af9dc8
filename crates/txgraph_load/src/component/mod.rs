//! component provides the data types, sources and graph stores the loaders
//! are built from.

pub mod neo4j;
pub mod record;
pub mod schema;
pub mod sink;
pub mod source;
pub mod sqlite;
