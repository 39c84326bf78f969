use anyhow::{anyhow, ensure, Result};
use arrow_array::{FixedSizeListArray, Int32Array, RecordBatch, StringArray};
use lancedb::{Connection, Table};
use std::sync::Arc;

use localsearch_core::types::{file_extension, folder_of, Chunk, Document};

use crate::schema::{build_chunk_schema, CHUNKS_TABLE};
use crate::table::{append, ensure_table, int32s, opt_string, scan, sql_quote, strings, tags_json, vector, vectors};

/// Chunk rows with their embeddings. Writes replace a document's chunks
/// wholesale; reads go through [`ChunkVectorStore::search`].
pub struct ChunkVectorStore {
	pub(crate) table: Table,
	pub(crate) dim: usize,
}

impl ChunkVectorStore {
	pub async fn open(db: &Connection, dim: usize) -> Result<Self> {
		ensure!(dim > 0, "embedding dimension must be positive");
		let table = ensure_table(db, CHUNKS_TABLE, build_chunk_schema(dim as i32)).await?;
		let schema = table.schema().await?;
		if let Ok(field) = schema.field_with_name("vector") {
			if let arrow_schema::DataType::FixedSizeList(_, existing) = field.data_type() {
				ensure!(*existing as usize == dim, "chunk table stores {existing}-dim vectors but the embedder produces {dim}");
			}
		}
		Ok(Self { table, dim })
	}

	pub fn dim(&self) -> usize { self.dim }

	/// Deletes the document's previous chunks, then appends `chunks`.
	/// Every chunk must carry an embedding of the table's dimension.
	pub async fn replace_document(&self, document: &Document, chunks: &[Chunk]) -> Result<()> {
		let batch = self.chunks_to_record_batch(document, chunks)?;
		self.delete_document(&document.document_id).await?;
		append(&self.table, batch).await
	}

	pub async fn delete_document(&self, document_id: &str) -> Result<()> {
		self.table.delete(&format!("document_id = {}", sql_quote(document_id))).await?;
		Ok(())
	}

	pub async fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
		let batches = scan(&self.table, Some(&format!("document_id = {}", sql_quote(document_id)))).await?;
		let mut chunks = Vec::new();
		for batch in &batches {
			let chunk_ids = strings(batch, "chunk_id")?;
			let document_ids = strings(batch, "document_id")?;
			let indices = int32s(batch, "chunk_index")?;
			let texts = strings(batch, "chunk_text")?;
			let pages = int32s(batch, "page")?;
			let sections = strings(batch, "section")?;
			let vecs = vectors(batch, "vector")?;
			for i in 0..batch.num_rows() {
				chunks.push(Chunk {
					chunk_id: chunk_ids.value(i).to_string(),
					document_id: document_ids.value(i).to_string(),
					chunk_index: indices.value(i).max(0) as usize,
					chunk_text: texts.value(i).to_string(),
					page: crate::search::opt_page(pages, i),
					section: opt_string(sections, i),
					embedding: vector(vecs, i),
				});
			}
		}
		chunks.sort_by_key(|c| c.chunk_index);
		Ok(chunks)
	}

	pub async fn count(&self) -> Result<usize> {
		Ok(self.table.count_rows(None).await?)
	}

	fn chunks_to_record_batch(&self, document: &Document, chunks: &[Chunk]) -> Result<RecordBatch> {
		let ext = file_extension(&document.file_path);
		let folder = folder_of(&document.file_path);
		let tags = tags_json(&document.tags);
		let mut vecs: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(chunks.len());
		for chunk in chunks {
			let embedding = chunk.embedding.as_ref().ok_or_else(|| anyhow!("chunk {} has no embedding", chunk.chunk_id))?;
			ensure!(embedding.len() == self.dim, "chunk {} has {} dims, expected {}", chunk.chunk_id, embedding.len(), self.dim);
			vecs.push(Some(embedding.iter().map(|&x| Some(x)).collect()));
		}
		let n = chunks.len();
		let record_batch = RecordBatch::try_new(build_chunk_schema(self.dim as i32), vec![
			Arc::new(StringArray::from(chunks.iter().map(|c| c.chunk_id.clone()).collect::<Vec<_>>())),
			Arc::new(StringArray::from(vec![document.document_id.clone(); n])),
			Arc::new(StringArray::from(vec![document.file_path.clone(); n])),
			Arc::new(StringArray::from(vec![document.file_name.clone(); n])),
			Arc::new(StringArray::from(vec![ext; n])),
			Arc::new(StringArray::from(vec![folder; n])),
			Arc::new(Int32Array::from(chunks.iter().map(|c| c.chunk_index as i32).collect::<Vec<_>>())),
			Arc::new(StringArray::from(chunks.iter().map(|c| c.chunk_text.clone()).collect::<Vec<_>>())),
			Arc::new(Int32Array::from(chunks.iter().map(|c| c.page.map(|p| p as i32)).collect::<Vec<_>>())),
			Arc::new(StringArray::from(chunks.iter().map(|c| c.section.clone()).collect::<Vec<_>>())),
			Arc::new(StringArray::from(vec![tags; n])),
			Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(vecs.into_iter(), self.dim as i32)),
		])?;
		Ok(record_batch)
	}
}
