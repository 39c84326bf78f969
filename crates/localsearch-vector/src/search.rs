use anyhow::{ensure, Result};
use arrow_array::{Array, Float32Array, Int32Array};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;

use localsearch_core::types::{MatchType, ResultMetadata, SearchFilters, SearchResult};

use crate::table::{in_list, int32s, like_prefix, opt_string, parse_tags, sql_quote, strings};
use crate::writer::ChunkVectorStore;

pub(crate) fn opt_page(col: &Int32Array, i: usize) -> Option<u32> {
	if col.is_null(i) { None } else { u32::try_from(col.value(i)).ok() }
}

/// SQL predicate equivalent to `SearchFilters::matches_path`, or `None`
/// when the filters admit everything.
pub fn filter_predicate(filters: &SearchFilters) -> Option<String> {
	let mut clauses = Vec::new();
	let file_types = filters.normalized_file_types();
	if !file_types.is_empty() {
		clauses.push(format!("file_ext IN ({})", in_list(&file_types)));
	}
	let folders = filters.normalized_folders();
	if !folders.is_empty() {
		let any_folder: Vec<String> = folders
			.iter()
			.map(|f| format!("(folder = {} OR folder LIKE {})", sql_quote(f), like_prefix(&format!("{f}/"))))
			.collect();
		clauses.push(format!("({})", any_folder.join(" OR ")));
	}
	if clauses.is_empty() { None } else { Some(clauses.join(" AND ")) }
}

impl ChunkVectorStore {
	/// Cosine nearest neighbours of `embedding`; score is `1 - distance`.
	pub async fn search(&self, embedding: &[f32], filters: &SearchFilters, limit: usize) -> Result<Vec<SearchResult>> {
		if limit == 0 {
			return Ok(Vec::new());
		}
		ensure!(embedding.len() == self.dim, "query embedding has {} dims, expected {}", embedding.len(), self.dim);
		let mut query = self.table.vector_search(embedding.to_vec())?.distance_type(DistanceType::Cosine).limit(limit);
		if let Some(predicate) = filter_predicate(filters) {
			query = query.only_if(predicate);
		}
		let mut stream = query.execute().await?;
		let mut results = Vec::new();
		while let Some(batch) = stream.try_next().await? {
			let document_ids = strings(&batch, "document_id")?;
			let chunk_ids = strings(&batch, "chunk_id")?;
			let paths = strings(&batch, "file_path")?;
			let names = strings(&batch, "file_name")?;
			let texts = strings(&batch, "chunk_text")?;
			let sections = strings(&batch, "section")?;
			let tags = strings(&batch, "tags")?;
			let pages = int32s(&batch, "page")?;
			let distances = batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<Float32Array>());
			for i in 0..batch.num_rows() {
				let score = distances.map(|d| 1.0 - d.value(i)).unwrap_or(0.0);
				results.push(SearchResult {
					document_id: document_ids.value(i).to_string(),
					chunk_id: chunk_ids.value(i).to_string(),
					file_path: paths.value(i).to_string(),
					file_name: names.value(i).to_string(),
					chunk_text: texts.value(i).to_string(),
					score,
					match_type: MatchType::Semantic,
					highlights: Vec::new(),
					metadata: ResultMetadata { page: opt_page(pages, i), section: opt_string(sections, i), tags: parse_tags(tags.value(i)) },
				});
			}
		}
		results.retain(|r| filters.matches_path(&r.file_path));
		results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
		results.truncate(limit);
		Ok(results)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn predicates_mirror_path_filters() {
		assert_eq!(filter_predicate(&SearchFilters::default()), None);
		let filters = SearchFilters { file_types: vec![".RS".into()], folders: vec!["src/".into()], min_score: None };
		assert_eq!(
			filter_predicate(&filters).as_deref(),
			Some("file_ext IN ('rs') AND ((folder = 'src' OR folder LIKE 'src/%'))")
		);
	}
}
