//! LanceDB connection and housekeeping helpers.
//!
//! Opening the database, ensure-* helpers for tables, merge-insert upserts,
//! SQL literal quoting and typed column access on result batches.
use anyhow::{anyhow, Result};
use arrow_array::cast::AsArray;
use arrow_array::{Array, FixedSizeListArray, Int32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray, TimestampMillisecondArray};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, Table};
use std::sync::Arc;

pub async fn open_db(uri: &str) -> Result<Connection> {
	Ok(connect(uri).execute().await?)
}

pub async fn ensure_table(conn: &Connection, name: &str, schema: Arc<arrow_schema::Schema>) -> Result<Table> {
	let names = conn.table_names().execute().await?;
	if names.iter().any(|n| n == name) {
		return Ok(conn.open_table(name).execute().await?);
	}
	// create empty table with 0 rows
	tracing::debug!(table = name, "creating lance table");
	let iter = RecordBatchIterator::new(vec![].into_iter(), schema.clone());
	Ok(conn.create_table(name, Box::new(iter)).execute().await?)
}

/// Inserts rows whose `keys` are new and overwrites the rest.
pub async fn upsert(table: &Table, keys: &[&str], batch: RecordBatch) -> Result<()> {
	if batch.num_rows() == 0 { return Ok(()); }
	let schema = batch.schema();
	let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
	let mut mi = table.merge_insert(keys);
	mi.when_matched_update_all(None).when_not_matched_insert_all();
	mi.execute(reader).await?;
	Ok(())
}

pub async fn append(table: &Table, batch: RecordBatch) -> Result<()> {
	if batch.num_rows() == 0 { return Ok(()); }
	let schema = batch.schema();
	let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
	table.add(reader).execute().await?;
	Ok(())
}

/// Every batch matching `predicate` (all rows when `None`).
pub async fn scan(table: &Table, predicate: Option<&str>) -> Result<Vec<RecordBatch>> {
	let stream = match predicate {
		Some(p) => table.query().only_if(p).execute().await?,
		None => table.query().execute().await?,
	};
	Ok(stream.try_collect().await?)
}

pub fn sql_quote(value: &str) -> String {
	format!("'{}'", value.replace('\'', "''"))
}

/// `LIKE` pattern matching `prefix` literally followed by anything.
pub fn like_prefix(prefix: &str) -> String {
	let escaped = prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
	sql_quote(&format!("{escaped}%"))
}

pub fn in_list(values: &[String]) -> String {
	values.iter().map(|v| sql_quote(v)).collect::<Vec<_>>().join(", ")
}

pub(crate) fn strings<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
	batch.column_by_name(name).and_then(|c| c.as_any().downcast_ref::<StringArray>()).ok_or_else(|| anyhow!("{name} column missing"))
}

pub(crate) fn int32s<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int32Array> {
	batch.column_by_name(name).and_then(|c| c.as_any().downcast_ref::<Int32Array>()).ok_or_else(|| anyhow!("{name} column missing"))
}

pub(crate) fn int64s<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
	batch.column_by_name(name).and_then(|c| c.as_any().downcast_ref::<Int64Array>()).ok_or_else(|| anyhow!("{name} column missing"))
}

pub(crate) fn timestamps<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a TimestampMillisecondArray> {
	batch.column_by_name(name).and_then(|c| c.as_any().downcast_ref::<TimestampMillisecondArray>()).ok_or_else(|| anyhow!("{name} column missing"))
}

pub(crate) fn vectors<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a FixedSizeListArray> {
	batch.column_by_name(name).and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>()).ok_or_else(|| anyhow!("{name} column missing"))
}

pub(crate) fn opt_string(col: &StringArray, i: usize) -> Option<String> {
	if col.is_null(i) { None } else { Some(col.value(i).to_string()) }
}

pub(crate) fn opt_time(col: &TimestampMillisecondArray, i: usize) -> Option<DateTime<Utc>> {
	if col.is_null(i) { None } else { DateTime::from_timestamp_millis(col.value(i)) }
}

pub(crate) fn time(col: &TimestampMillisecondArray, i: usize) -> DateTime<Utc> {
	opt_time(col, i).unwrap_or(DateTime::UNIX_EPOCH)
}

pub(crate) fn vector(col: &FixedSizeListArray, i: usize) -> Option<Vec<f32>> {
	if col.is_null(i) { return None; }
	let list = col.value(i);
	Some(list.as_primitive::<arrow_array::types::Float32Type>().values().iter().copied().collect())
}

pub(crate) fn tags_json(tags: &[String]) -> String {
	serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

pub(crate) fn parse_tags(raw: &str) -> Vec<String> {
	serde_json::from_str(raw).unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn quoting() {
		assert_eq!(sql_quote("it's"), "'it''s'");
		assert_eq!(like_prefix("my_dir/"), "'my\\_dir/%'");
		assert_eq!(in_list(&["rs".into(), "md".into()]), "'rs', 'md'");
	}
}
