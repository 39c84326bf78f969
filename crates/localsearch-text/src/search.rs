use anyhow::Result;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, RegexQuery, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Value};
use tantivy::{TantivyDocument, Term};

use localsearch_core::types::{MatchType, ResultMetadata, SearchFilters, SearchResult};

use crate::index::TantivyKeywordIndex;
use crate::tantivy_utils::folder_facet;

impl TantivyKeywordIndex {
	/// BM25 ranked chunks for `query_text`. File type and folder filters are
	/// pushed into the query so `limit` counts only admissible chunks.
	/// Query syntax errors are tolerated; the parseable part is used.
	pub fn search(&self, query_text: &str, filters: &SearchFilters, limit: usize) -> Result<Vec<SearchResult>> {
		if limit == 0 || query_text.trim().is_empty() {
			return Ok(Vec::new());
		}
		let query_parser = QueryParser::for_index(&self.index, vec![self.fields.text]);
		let (text_query, errors) = query_parser.parse_query_lenient(query_text);
		if !errors.is_empty() {
			tracing::debug!(query = query_text, errors = errors.len(), "lenient keyword parse");
		}
		let query = self.filtered_query(text_query, filters);
		self.collect(query.as_ref(), limit)
	}

	/// Chunks holding a token that starts with the last word of `prefix`.
	/// Matches are unranked and come back in index order.
	pub fn search_prefix(&self, prefix: &str, filters: &SearchFilters, limit: usize) -> Result<Vec<SearchResult>> {
		let word = prefix.rsplit(|c: char| !c.is_alphanumeric()).find(|w| !w.is_empty());
		let Some(word) = word.filter(|_| limit > 0) else {
			return Ok(Vec::new());
		};
		let pattern = format!("{}.*", regex::escape(&word.to_lowercase()));
		let prefix_query: Box<dyn Query> = Box::new(RegexQuery::from_pattern(&pattern, self.fields.text)?);
		let query = self.filtered_query(prefix_query, filters);
		self.collect(query.as_ref(), limit)
	}

	fn collect(&self, query: &dyn Query, limit: usize) -> Result<Vec<SearchResult>> {
		let searcher = self.reader.searcher();
		let top_docs = searcher.search(query, &TopDocs::with_limit(limit))?;
		let mut results = Vec::with_capacity(top_docs.len());
		for (score, doc_address) in top_docs {
			let doc: TantivyDocument = searcher.doc(doc_address)?;
			let text = |field: Field| doc.get_first(field).and_then(|v| v.as_str()).unwrap_or("").to_string();
			let section = doc.get_first(self.fields.section).and_then(|v| v.as_str()).map(str::to_string);
			let page = doc.get_first(self.fields.page).and_then(|v| v.as_u64()).and_then(|p| u32::try_from(p).ok());
			let tags = doc.get_all(self.fields.tags).filter_map(|v| v.as_str()).map(str::to_string).collect();
			results.push(SearchResult {
				document_id: text(self.fields.document_id),
				chunk_id: text(self.fields.chunk_id),
				file_path: text(self.fields.file_path),
				file_name: text(self.fields.file_name),
				chunk_text: text(self.fields.text),
				score,
				match_type: MatchType::Keyword,
				highlights: Vec::new(),
				metadata: ResultMetadata { page, section, tags },
			});
		}
		Ok(results)
	}

	fn filtered_query(&self, text_query: Box<dyn Query>, filters: &SearchFilters) -> Box<dyn Query> {
		let file_types = filters.normalized_file_types();
		let folders = filters.normalized_folders();
		if file_types.is_empty() && folders.is_empty() {
			return text_query;
		}
		let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Must, text_query)];
		if !file_types.is_empty() {
			let any_type = file_types
				.iter()
				.map(|ext| {
					let term = Term::from_field_text(self.fields.file_ext, ext);
					(Occur::Should, Box::new(TermQuery::new(term, IndexRecordOption::Basic)) as Box<dyn Query>)
				})
				.collect();
			clauses.push((Occur::Must, Box::new(BooleanQuery::new(any_type))));
		}
		if !folders.is_empty() {
			let any_folder = folders
				.iter()
				.map(|folder| {
					let term = Term::from_facet(self.fields.folder, &folder_facet(folder));
					(Occur::Should, Box::new(TermQuery::new(term, IndexRecordOption::Basic)) as Box<dyn Query>)
				})
				.collect();
			clauses.push((Occur::Must, Box::new(BooleanQuery::new(any_folder))));
		}
		Box::new(BooleanQuery::new(clauses))
	}
}
