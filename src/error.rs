//! Top-level error for the aggregator process

use crate::aggregator_core::schema::SchemaError;
use crate::aggregator_core::table::TableError;
use crate::emitter::EmitError;

#[derive(Debug)]
pub enum AggregatorError {
    Schema(SchemaError),
    Table(TableError),
    Emit(EmitError),
    Io(std::io::Error),
}

impl From<SchemaError> for AggregatorError {
    fn from(err: SchemaError) -> Self {
        AggregatorError::Schema(err)
    }
}

impl From<TableError> for AggregatorError {
    fn from(err: TableError) -> Self {
        AggregatorError::Table(err)
    }
}

impl From<EmitError> for AggregatorError {
    fn from(err: EmitError) -> Self {
        AggregatorError::Emit(err)
    }
}

impl From<std::io::Error> for AggregatorError {
    fn from(err: std::io::Error) -> Self {
        AggregatorError::Io(err)
    }
}

impl std::fmt::Display for AggregatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregatorError::Schema(e) => write!(f, "Schema error: {}", e),
            AggregatorError::Table(e) => write!(f, "Table error: {}", e),
            AggregatorError::Emit(e) => write!(f, "Output error: {}", e),
            AggregatorError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for AggregatorError {}
