use std::io::Write;

use anyhow::{anyhow, Result};
use enum_dispatch::enum_dispatch;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Utility function to convert from polars `AnyValue` to `serde_json::Value`.
/// Covers the types the finished dataset and its summaries hold.
fn any_value_to_json(value: &AnyValue) -> Result<Value> {
    match value {
        AnyValue::Null => Ok(Value::Null),
        AnyValue::Boolean(b) => Ok(Value::Bool(*b)),
        AnyValue::String(s) => Ok(Value::String((*s).to_string())),
        AnyValue::StringOwned(s) => Ok(Value::String(s.to_string())),
        AnyValue::Int32(n) => Ok(json!(*n)),
        AnyValue::Int64(n) => Ok(json!(*n)),
        AnyValue::UInt32(n) => Ok(json!(*n)),
        AnyValue::UInt64(n) => Ok(json!(*n)),
        AnyValue::Float64(n) => Ok(json!(*n)),
        _ => Err(anyhow!("Failed to convert type")),
    }
}

/// Trait to define different output generators. `save` writes the serialized `DataFrame` to a
/// writer and `format` returns it as a string.
#[enum_dispatch]
pub trait OutputGenerator {
    fn save(&self, writer: &mut impl Write, df: &mut DataFrame) -> Result<()>;
    fn format(&self, df: &mut DataFrame) -> Result<String> {
        let mut data: Vec<u8> = vec![];
        self.save(&mut data, df)?;
        Ok(String::from_utf8(data)?)
    }
}

/// Enum of OutputFormatters, one for each output type
#[enum_dispatch(OutputGenerator)]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum OutputFormatter {
    Csv(CsvFormatter),
    Json(JsonFormatter),
}

/// Delimited text, the format read back by [`Dataset::read_csv`](crate::dataset::Dataset::read_csv)
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct CsvFormatter;

impl OutputGenerator for CsvFormatter {
    fn save(&self, writer: &mut impl Write, df: &mut DataFrame) -> Result<()> {
        CsvWriter::new(writer).finish(df)?;
        Ok(())
    }
}

/// A JSON array with one object per row
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct JsonFormatter;

impl OutputGenerator for JsonFormatter {
    fn save(&self, writer: &mut impl Write, df: &mut DataFrame) -> Result<()> {
        let columns = df.get_columns();
        let mut rows = Vec::with_capacity(df.height());
        for idx in 0..df.height() {
            let mut row = Map::new();
            for column in columns {
                row.insert(column.name().to_string(), any_value_to_json(&column.get(idx)?)?);
            }
            rows.push(Value::Object(row));
        }
        serde_json::to_writer(writer, &rows)?;
        Ok(())
    }
}
