use anyhow::Result;
use parking_lot::Mutex;
use std::path::Path;
use tantivy::directory::MmapDirectory;
use tantivy::schema::{Field, Schema};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, Term};

use localsearch_core::types::{file_extension, folder_of, Chunk, Document};

use crate::tantivy_utils::{build_schema, folder_facet, register_tokenizer};

const WRITER_MEMORY_BYTES: usize = 50_000_000;

#[derive(Debug, Clone, Copy)]
pub(crate) struct KeywordFields {
	pub chunk_id: Field,
	pub document_id: Field,
	pub file_path: Field,
	pub file_name: Field,
	pub file_ext: Field,
	pub folder: Field,
	pub section: Field,
	pub page: Field,
	pub chunk_index: Field,
	pub tags: Field,
	pub text: Field,
}

impl KeywordFields {
	fn from_schema(schema: &Schema) -> Result<Self> {
		Ok(Self {
			chunk_id: schema.get_field("chunk_id")?,
			document_id: schema.get_field("document_id")?,
			file_path: schema.get_field("file_path")?,
			file_name: schema.get_field("file_name")?,
			file_ext: schema.get_field("file_ext")?,
			folder: schema.get_field("folder")?,
			section: schema.get_field("section")?,
			page: schema.get_field("page")?,
			chunk_index: schema.get_field("chunk_index")?,
			tags: schema.get_field("tags")?,
			text: schema.get_field("text")?,
		})
	}
}

/// Full-text index over chunks. One tantivy document per chunk, replaced
/// wholesale per source document.
pub struct TantivyKeywordIndex {
	pub(crate) index: Index,
	pub(crate) reader: IndexReader,
	pub(crate) fields: KeywordFields,
	writer_lock: Mutex<()>,
}

impl TantivyKeywordIndex {
	/// Opens the index in `index_dir`, creating it (and the directory) when absent.
	pub fn open_or_create(index_dir: &Path) -> Result<Self> {
		std::fs::create_dir_all(index_dir)?;
		let directory = MmapDirectory::open(index_dir)?;
		let index = Index::open_or_create(directory, build_schema())?;
		tracing::debug!(dir = %index_dir.display(), "opened keyword index");
		Self::from_index(index)
	}

	pub fn create_in_ram() -> Result<Self> {
		Self::from_index(Index::create_in_ram(build_schema()))
	}

	fn from_index(index: Index) -> Result<Self> {
		register_tokenizer(&index);
		let fields = KeywordFields::from_schema(&index.schema())?;
		let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;
		Ok(Self { index, reader, fields, writer_lock: Mutex::new(()) })
	}

	/// Replaces every indexed chunk of `document` with `chunks`.
	pub fn upsert_document(&self, document: &Document, chunks: &[Chunk]) -> Result<()> {
		let _guard = self.writer_lock.lock();
		let mut writer: IndexWriter = self.index.writer(WRITER_MEMORY_BYTES)?;
		writer.delete_term(Term::from_field_text(self.fields.document_id, &document.document_id));
		let ext = file_extension(&document.file_path);
		let folder = folder_facet(&folder_of(&document.file_path));
		for chunk in chunks {
			let mut tantivy_doc = doc!(
				self.fields.chunk_id => chunk.chunk_id.clone(),
				self.fields.document_id => document.document_id.clone(),
				self.fields.file_path => document.file_path.clone(),
				self.fields.file_name => document.file_name.clone(),
				self.fields.file_ext => ext.clone(),
				self.fields.folder => folder.clone(),
				self.fields.chunk_index => chunk.chunk_index as u64,
				self.fields.text => chunk.chunk_text.clone(),
			);
			if let Some(section) = &chunk.section {
				tantivy_doc.add_text(self.fields.section, section);
			}
			if let Some(page) = chunk.page {
				tantivy_doc.add_u64(self.fields.page, u64::from(page));
			}
			for tag in &document.tags {
				tantivy_doc.add_text(self.fields.tags, tag);
			}
			writer.add_document(tantivy_doc)?;
		}
		writer.commit()?;
		self.reader.reload()?;
		Ok(())
	}

	pub fn delete_document(&self, document_id: &str) -> Result<()> {
		let _guard = self.writer_lock.lock();
		let mut writer: IndexWriter = self.index.writer(WRITER_MEMORY_BYTES)?;
		writer.delete_term(Term::from_field_text(self.fields.document_id, document_id));
		writer.commit()?;
		self.reader.reload()?;
		Ok(())
	}

	/// Number of live chunks.
	pub fn num_chunks(&self) -> u64 {
		self.reader.searcher().num_docs()
	}
}
