use std::collections::HashMap;

use localsearch_core::types::{MatchType, SearchResult, SearchWeights};

struct Candidate {
    result: SearchResult,
    semantic_rank: Option<usize>,
    keyword_rank: Option<usize>,
}

/// Reciprocal Rank Fusion of two ranked lists.
///
/// Each chunk scores `w_s / (k + r_s) + w_k / (k + r_k)` with 1-based ranks;
/// a list the chunk is absent from contributes nothing. The output is the
/// union of both lists (semantic entries first, then keyword-only ones),
/// stably sorted by fused score, so equal scores keep that first-seen order.
pub fn reciprocal_rank_fusion(
    semantic: Vec<SearchResult>,
    keyword: Vec<SearchResult>,
    weights: SearchWeights,
    rrf_k: u32,
) -> Vec<SearchResult> {
    let mut order: Vec<String> = Vec::with_capacity(semantic.len() + keyword.len());
    let mut candidates: HashMap<String, Candidate> = HashMap::with_capacity(order.capacity());

    for (i, result) in semantic.into_iter().enumerate() {
        if candidates.contains_key(&result.chunk_id) {
            continue;
        }
        order.push(result.chunk_id.clone());
        candidates.insert(result.chunk_id.clone(), Candidate { result, semantic_rank: Some(i + 1), keyword_rank: None });
    }
    for (i, result) in keyword.into_iter().enumerate() {
        match candidates.get_mut(&result.chunk_id) {
            Some(existing) => {
                if existing.keyword_rank.is_none() {
                    existing.keyword_rank = Some(i + 1);
                }
            }
            None => {
                order.push(result.chunk_id.clone());
                candidates.insert(result.chunk_id.clone(), Candidate { result, semantic_rank: None, keyword_rank: Some(i + 1) });
            }
        }
    }

    let k = f64::from(rrf_k);
    let term = |weight: f32, rank: Option<usize>| rank.map_or(0.0, |r| f64::from(weight) / (k + r as f64));
    let mut fused: Vec<SearchResult> = order
        .into_iter()
        .filter_map(|id| candidates.remove(&id))
        .map(|c| {
            let mut result = c.result;
            result.score = (term(weights.semantic, c.semantic_rank) + term(weights.keyword, c.keyword_rank)) as f32;
            result.match_type = match (c.semantic_rank, c.keyword_rank) {
                (Some(_), Some(_)) => MatchType::Hybrid,
                (Some(_), None) => MatchType::Semantic,
                _ => MatchType::Keyword,
            };
            result
        })
        .collect();
    fused.sort_by(|a, b| b.score.total_cmp(&a.score));
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use localsearch_core::types::ResultMetadata;

    fn hit(id: &str, match_type: MatchType) -> SearchResult {
        SearchResult {
            document_id: format!("doc-{id}"),
            chunk_id: id.to_string(),
            file_path: format!("{id}.md"),
            file_name: format!("{id}.md"),
            chunk_text: format!("text {id}"),
            score: 0.0,
            match_type,
            highlights: Vec::new(),
            metadata: ResultMetadata::default(),
        }
    }

    fn semantic(ids: &[&str]) -> Vec<SearchResult> {
        ids.iter().map(|id| hit(id, MatchType::Semantic)).collect()
    }

    fn keyword(ids: &[&str]) -> Vec<SearchResult> {
        ids.iter().map(|id| hit(id, MatchType::Keyword)).collect()
    }

    #[test]
    fn scores_follow_the_rrf_formula() {
        let weights = SearchWeights { semantic: 0.7, keyword: 0.3 };
        let fused = reciprocal_rank_fusion(semantic(&["a", "b"]), keyword(&["b", "c"]), weights, 60);
        let score = |id: &str| fused.iter().find(|r| r.chunk_id == id).unwrap().score;
        assert!((score("a") - 0.7 / 61.0).abs() < 1e-6);
        assert!((score("b") - (0.7 / 62.0 + 0.3 / 61.0)).abs() < 1e-6);
        assert!((score("c") - 0.3 / 62.0).abs() < 1e-6);
        assert_eq!(fused[0].chunk_id, "b");
    }

    #[test]
    fn match_type_reflects_list_membership() {
        let fused = reciprocal_rank_fusion(semantic(&["a", "b"]), keyword(&["b", "c"]), SearchWeights::default(), 60);
        let kind = |id: &str| fused.iter().find(|r| r.chunk_id == id).unwrap().match_type;
        assert_eq!(kind("a"), MatchType::Semantic);
        assert_eq!(kind("b"), MatchType::Hybrid);
        assert_eq!(kind("c"), MatchType::Keyword);
        assert_eq!(fused.len(), 3, "union without duplicates");
    }

    #[test]
    fn ties_keep_first_seen_order() {
        let fused = reciprocal_rank_fusion(semantic(&["s1", "s2"]), keyword(&["k1", "k2"]), SearchWeights::default(), 60);
        let ids: Vec<&str> = fused.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "k1", "s2", "k2"]);
        let again = reciprocal_rank_fusion(semantic(&["s1", "s2"]), keyword(&["k1", "k2"]), SearchWeights::default(), 60);
        assert_eq!(fused, again);
    }

    #[test]
    fn empty_inputs() {
        assert!(reciprocal_rank_fusion(Vec::new(), Vec::new(), SearchWeights::default(), 60).is_empty());
        let only_keyword = reciprocal_rank_fusion(Vec::new(), keyword(&["k"]), SearchWeights::default(), 60);
        assert_eq!(only_keyword[0].match_type, MatchType::Keyword);
    }
}
