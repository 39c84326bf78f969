use arrow_schema::{DataType, Field, Schema, TimeUnit};
use std::sync::Arc;

pub const CHUNKS_TABLE: &str = "chunks";
pub const DOCUMENTS_TABLE: &str = "documents";
pub const QUEUE_TABLE: &str = "index_queue";
pub const META_TABLE: &str = "meta";

fn timestamp(name: &str, nullable: bool) -> Field {
	Field::new(name, DataType::Timestamp(TimeUnit::Millisecond, None), nullable)
}

/// One row per chunk. `tags` holds a JSON array; `folder` and `file_ext`
/// exist for filter pushdown.
pub fn build_chunk_schema(dim: i32) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("chunk_id", DataType::Utf8, false),
		Field::new("document_id", DataType::Utf8, false),
		Field::new("file_path", DataType::Utf8, false),
		Field::new("file_name", DataType::Utf8, false),
		Field::new("file_ext", DataType::Utf8, false),
		Field::new("folder", DataType::Utf8, false),
		Field::new("chunk_index", DataType::Int32, false),
		Field::new("chunk_text", DataType::Utf8, false),
		Field::new("page", DataType::Int32, true),
		Field::new("section", DataType::Utf8, true),
		Field::new("tags", DataType::Utf8, false),
		Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
	]))
}

pub fn build_document_schema() -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("document_id", DataType::Utf8, false),
		Field::new("file_path", DataType::Utf8, false),
		Field::new("file_name", DataType::Utf8, false),
		Field::new("content_hash", DataType::Utf8, false),
		timestamp("modified_at", false),
		Field::new("tags", DataType::Utf8, false),
		Field::new("chunk_count", DataType::Int32, false),
	]))
}

/// `seq` orders items by enqueue time; row order is not stable across updates.
pub fn build_queue_schema() -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("id", DataType::Utf8, false),
		Field::new("seq", DataType::Int64, false),
		Field::new("file_path", DataType::Utf8, false),
		Field::new("change", DataType::Utf8, false),
		Field::new("status", DataType::Utf8, false),
		Field::new("attempts", DataType::Int32, false),
		timestamp("enqueued_at", false),
		timestamp("started_at", true),
		Field::new("last_error", DataType::Utf8, true),
	]))
}

pub fn build_meta_schema() -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("key", DataType::Utf8, false),
		Field::new("value", DataType::Utf8, false),
		timestamp("updated_at", false),
	]))
}
