use tantivy::schema::{Facet, FacetOptions, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, STORED, STRING};
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer};
use tantivy::Index;

pub const TEXT_TOKENIZER: &str = "text_with_stopwords";

pub fn build_schema() -> Schema {
	let mut schema_builder = Schema::builder();
	schema_builder.add_text_field("chunk_id", STRING | STORED);
	schema_builder.add_text_field("document_id", STRING | STORED);
	schema_builder.add_text_field("file_path", STRING | STORED);
	schema_builder.add_text_field("file_name", STORED);
	schema_builder.add_text_field("file_ext", STRING);
	schema_builder.add_facet_field("folder", FacetOptions::default());
	schema_builder.add_text_field("section", STORED);
	schema_builder.add_u64_field("page", STORED);
	schema_builder.add_u64_field("chunk_index", STORED);
	schema_builder.add_text_field("tags", STRING | STORED);
	let text_field_indexing = TextFieldIndexing::default().set_tokenizer(TEXT_TOKENIZER).set_index_option(IndexRecordOption::WithFreqsAndPositions);
	let text_options = TextOptions::default().set_indexing_options(text_field_indexing).set_stored();
	schema_builder.add_text_field("text", text_options);
	schema_builder.build()
}

pub fn register_tokenizer(index: &Index) {
	let stop_words = vec![
		"a","an","and","are","as","at","be","by","for","from","has","he","in","is","it","its","of","on","that","the","to","was","will","with","or","but","not","this","these","they","them","their","there","then","than","so","if","when","where","why","how","what","which","who","whom","whose","can","could","should","would","may","might","must","shall","do","does","did","have","had","having",
	];
	let tokenizer = TextAnalyzer::builder(SimpleTokenizer::default())
		.filter(LowerCaser)
		.filter(StopWordFilter::remove(stop_words.into_iter().map(|s| s.to_string())))
		.build();
	index.tokenizers().register(TEXT_TOKENIZER, tokenizer);
}

/// Hierarchical facet for a workspace-relative folder ("" is the root).
/// Tantivy indexes every ancestor of a facet, so a query on `/src` also
/// matches chunks filed under `/src/api`.
pub fn folder_facet(folder: &str) -> Facet {
	let folder = folder.trim_matches('/');
	if folder.is_empty() { Facet::root() } else { Facet::from_path(folder.split('/')) }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn folder_facets_nest() {
		assert_eq!(folder_facet("").to_string(), "/");
		assert_eq!(folder_facet("src/api").to_string(), "/src/api");
		assert!(folder_facet("src").is_prefix_of(&folder_facet("src/api")));
	}
}
