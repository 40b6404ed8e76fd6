// src/model/arrow.rs

use arrow::{
    array::{
        Array, ArrayRef, Date32Array, Date32Builder, Float64Array, Float64Builder, StringArray,
        StringBuilder, TimestampMicrosecondArray, TimestampMicrosecondBuilder,
    },
    compute::{can_cast_types, cast},
    datatypes::{DataType, Field as ArrowField, Schema as ArrowSchema, TimeUnit},
    error::ArrowError,
    record_batch::RecordBatch,
};
use chrono::{DateTime, Datelike, NaiveDate};
use std::sync::Arc;

use super::{CanonicalSchema, ColumnSpec, ColumnType, Record, Value};
use crate::error::Result;

/// Days between 0001-01-01 and 1970-01-01.
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Map a canonical column type onto its Arrow storage type.
///
/// - Text      → Utf8
/// - Number    → Float64
/// - Date      → Date32
/// - Timestamp → Timestamp(µs, UTC)
pub fn map_to_arrow_type(ty: ColumnType) -> DataType {
    match ty {
        ColumnType::Text => DataType::Utf8,
        ColumnType::Number => DataType::Float64,
        ColumnType::Date => DataType::Date32,
        ColumnType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, Some(Arc::from("UTC"))),
    }
}

/// Build an ArrowSchema (inside an Arc) from a canonical schema.
pub fn build_arrow_schema(schema: &CanonicalSchema) -> Arc<ArrowSchema> {
    let fields: Vec<ArrowField> = schema
        .columns
        .iter()
        .map(|col| ArrowField::new(&col.name, map_to_arrow_type(col.ty), col.nullable))
        .collect();

    Arc::new(ArrowSchema::new(fields))
}

pub fn date_to_days(d: NaiveDate) -> i32 {
    d.num_days_from_ce() - EPOCH_DAYS_FROM_CE
}

pub fn days_to_date(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days + EPOCH_DAYS_FROM_CE)
}

fn mismatch(col: &ColumnSpec, v: &Value) -> ArrowError {
    ArrowError::InvalidArgumentError(format!(
        "column `{}` declared {} but holds {:?}",
        col.name,
        col.ty.as_str(),
        v
    ))
}

/// Encode records into one RecordBatch laid out by `schema`.
pub fn records_to_batch(schema: &CanonicalSchema, records: &[&Record]) -> Result<RecordBatch> {
    let arrow_schema = build_arrow_schema(schema);
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.len());

    for col in &schema.columns {
        let values = records.iter().map(|r| r.get(&col.name));
        let array: ArrayRef = match col.ty {
            ColumnType::Text => {
                let mut b = StringBuilder::with_capacity(records.len(), records.len() * 8);
                for v in values {
                    match v {
                        Value::Null => b.append_null(),
                        Value::Text(s) => b.append_value(s),
                        other => return Err(mismatch(col, other).into()),
                    }
                }
                Arc::new(b.finish())
            }
            ColumnType::Number => {
                let mut b = Float64Builder::with_capacity(records.len());
                for v in values {
                    match v {
                        Value::Null => b.append_null(),
                        Value::Number(n) => b.append_value(*n),
                        other => return Err(mismatch(col, other).into()),
                    }
                }
                Arc::new(b.finish())
            }
            ColumnType::Date => {
                let mut b = Date32Builder::with_capacity(records.len());
                for v in values {
                    match v {
                        Value::Null => b.append_null(),
                        Value::Date(d) => b.append_value(date_to_days(*d)),
                        other => return Err(mismatch(col, other).into()),
                    }
                }
                Arc::new(b.finish())
            }
            ColumnType::Timestamp => {
                let mut b = TimestampMicrosecondBuilder::with_capacity(records.len());
                for v in values {
                    match v {
                        Value::Null => b.append_null(),
                        Value::Timestamp(ts) => b.append_value(ts.timestamp_micros()),
                        other => return Err(mismatch(col, other).into()),
                    }
                }
                Arc::new(b.finish().with_timezone("UTC"))
            }
        };
        columns.push(array);
    }

    RecordBatch::try_new(arrow_schema, columns).map_err(Into::into)
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef, what: &str) -> Result<&'a T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        ArrowError::CastError(format!(
            "expected {what} array, got {:?}",
            array.data_type()
        ))
        .into()
    })
}

/// Convert one Arrow column into cell values. Integers and decimals become
/// numbers, Date64 becomes a date, any timestamp unit becomes a UTC instant,
/// and everything else castable to Utf8 becomes text.
pub fn column_values(array: &ArrayRef) -> Result<Vec<Value>> {
    use DataType::*;

    match array.data_type() {
        Null => Ok(vec![Value::Null; array.len()]),
        Int8 | Int16 | Int32 | Int64 | UInt8 | UInt16 | UInt32 | UInt64 | Float16 | Float32
        | Float64 | Decimal128(_, _) | Decimal256(_, _) => {
            let casted = cast(array, &Float64)?;
            let arr = downcast::<Float64Array>(&casted, "Float64")?;
            Ok(arr.iter().map(Value::from).collect())
        }
        Date32 | Date64 => {
            let casted = cast(array, &Date32)?;
            let arr = downcast::<Date32Array>(&casted, "Date32")?;
            Ok(arr
                .iter()
                .map(|d| d.and_then(days_to_date).into())
                .collect())
        }
        Timestamp(_, tz) => {
            // same zone, unit change only: stored values stay UTC epoch offsets
            let casted = cast(array, &Timestamp(TimeUnit::Microsecond, tz.clone()))?;
            let arr = downcast::<TimestampMicrosecondArray>(&casted, "TimestampMicrosecond")?;
            Ok(arr
                .iter()
                .map(|us| us.and_then(DateTime::from_timestamp_micros).into())
                .collect())
        }
        other if can_cast_types(other, &Utf8) => {
            let casted = cast(array, &Utf8)?;
            let arr = downcast::<StringArray>(&casted, "Utf8")?;
            Ok(arr.iter().map(|s| s.map(str::to_string).into()).collect())
        }
        other => Err(ArrowError::CastError(format!("unsupported column type {other:?}")).into()),
    }
}

/// Decode every row of `batch` into a Record keyed by field name.
pub fn batch_to_records(batch: &RecordBatch) -> Result<Vec<Record>> {
    let schema = batch.schema();
    let mut records = vec![Record::new(); batch.num_rows()];
    for (field, array) in schema.fields().iter().zip(batch.columns()) {
        for (record, value) in records.iter_mut().zip(column_values(array)?) {
            record.insert(field.name().clone(), value);
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;
    use chrono::{TimeZone, Utc};

    #[test]
    fn batch_round_trip_preserves_types_and_nulls() -> anyhow::Result<()> {
        let schema = CanonicalSchema::energy_metrics();
        let record: Record = [
            ("source", Value::Null),
            ("region", Value::from("BC")),
            (
                "metric_date",
                Value::from(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()),
            ),
            ("metric_name", Value::from("energy_mwh")),
            ("metric_value", Value::from(12.5)),
            ("unit", Value::from("MWh")),
            (
                "ingested_at",
                Value::from(Utc.with_ymd_and_hms(2024, 3, 1, 6, 30, 0).unwrap()),
            ),
        ]
        .into_iter()
        .collect();

        let batch = records_to_batch(&schema, &[&record])?;
        assert_eq!(batch.num_columns(), schema.len());
        assert_eq!(batch_to_records(&batch)?, vec![record]);
        Ok(())
    }

    #[test]
    fn wrong_typed_value_is_an_error() {
        let schema = CanonicalSchema::new(vec![ColumnSpec::required("n", ColumnType::Number)]);
        let record: Record = [("n", Value::from("ten"))].into_iter().collect();
        assert!(records_to_batch(&schema, &[&record]).is_err());
    }

    #[test]
    fn integers_read_as_numbers() -> anyhow::Result<()> {
        let array: ArrayRef = Arc::new(Int32Array::from(vec![Some(3), None]));
        assert_eq!(
            column_values(&array)?,
            vec![Value::Number(3.0), Value::Null]
        );
        Ok(())
    }
}
