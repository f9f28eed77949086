//! Semantic deduplication, thematic clustering and diversity filtering.
//!
//! All three operations run over the same embedding space as retrieval:
//! the batch is embedded once and every decision is made on the pairwise
//! cosine-similarity matrix. Mixing embedding model versions between
//! indexing and these operations is undefined behavior; use the same
//! injected embedder everywhere.
//!
//! Determinism matters here: for fixed input order and fixed embeddings,
//! grouping is fully reproducible. Dedup is greedy and order-dependent
//! on purpose: the first-seen member of a group is its representative,
//! so input order is significant and part of the contract.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::embedding::{EmbeddingError, TextEmbedder};
use crate::store::SourceRecord;
use crate::vector::cosine_similarity;

/// Errors from dedup and clustering operations.
#[derive(Error, Debug)]
pub enum DedupError {
    #[error("Merge threshold must be between 0 and 1, got {0}")]
    InvalidThreshold(f32),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

/// Result type alias for dedup operations.
pub type DedupResult<T> = Result<T, DedupError>;

/// A question waiting to be deduplicated or filtered, with its source.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionCandidate {
    pub text: String,
    pub source: SourceRecord,
}

/// The representative of one duplicate group.
///
/// `text` and `source` come from the first-seen member. When the group
/// merged more than one item, `merged_sources` holds every member's
/// source record in input order.
#[derive(Debug, Clone, Serialize)]
pub struct DedupedQuestion {
    pub text: String,
    pub source: SourceRecord,
    pub duplicate_count: usize,
    pub merged_sources: Vec<SourceRecord>,
}

/// Groups near-duplicate questions and organizes batches thematically.
pub struct SemanticDeduper {
    embedder: Arc<dyn TextEmbedder>,
    merge_threshold: f32,
}

impl SemanticDeduper {
    /// Creates a deduper with the given merge threshold.
    ///
    /// ~0.85 is a good default for question phrasings: high enough that
    /// only rewordings of the same question merge.
    pub fn new(embedder: Arc<dyn TextEmbedder>, merge_threshold: f32) -> DedupResult<Self> {
        if !(0.0..=1.0).contains(&merge_threshold) || merge_threshold.is_nan() {
            return Err(DedupError::InvalidThreshold(merge_threshold));
        }

        Ok(Self {
            embedder,
            merge_threshold,
        })
    }

    /// Collapses near-duplicate questions into representative records.
    ///
    /// Walks items in input order; each not-yet-claimed item starts a
    /// group and claims every later unclaimed item whose similarity to it
    /// meets the merge threshold. One record per group is emitted, the
    /// first-seen member, annotated with the group size and the merged
    /// source list when the group has more than one member.
    pub fn deduplicate(
        &self,
        items: &[QuestionCandidate],
    ) -> DedupResult<Vec<DedupedQuestion>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        info!("Deduplicating {} questions", items.len());

        let similarity = self.pairwise_similarity(items.iter().map(|q| q.text.as_str()))?;
        let groups = greedy_groups(&similarity, items.len(), self.merge_threshold);

        let deduplicated: Vec<DedupedQuestion> = groups
            .into_iter()
            .map(|group| {
                let representative = &items[group[0]];
                let merged_sources = if group.len() > 1 {
                    group.iter().map(|&idx| items[idx].source.clone()).collect()
                } else {
                    Vec::new()
                };

                DedupedQuestion {
                    text: representative.text.clone(),
                    source: representative.source.clone(),
                    duplicate_count: group.len(),
                    merged_sources,
                }
            })
            .collect();

        info!("Deduplicated to {} unique questions", deduplicated.len());
        Ok(deduplicated)
    }

    /// Partitions ALL items into thematic clusters.
    ///
    /// Bottom-up agglomerative clustering with average linkage over
    /// cosine distance. Unlike [`deduplicate`](Self::deduplicate), which
    /// only merges near-identical items, this assigns every item to a
    /// group; `n_clusters` defaults to `max(2, ceil(sqrt(n)))`.
    ///
    /// Returns clusters as lists of item indices; members ascend within a
    /// cluster and clusters are ordered by their smallest member, so the
    /// output is deterministic.
    pub fn cluster(
        &self,
        items: &[QuestionCandidate],
        n_clusters: Option<usize>,
    ) -> DedupResult<Vec<Vec<usize>>> {
        if items.len() < 2 {
            return Ok(vec![(0..items.len()).collect()]);
        }

        info!("Clustering {} questions", items.len());

        let k = n_clusters
            .unwrap_or_else(|| ((items.len() as f64).sqrt().ceil() as usize).max(2))
            .clamp(1, items.len());

        let similarity = self.pairwise_similarity(items.iter().map(|q| q.text.as_str()))?;
        let n = items.len();

        // Each item starts as its own cluster; repeatedly merge the pair
        // with the lowest average pairwise cosine distance. Ties resolve
        // to the earliest pair in iteration order.
        let mut clusters: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
        while clusters.len() > k {
            let mut best: Option<(usize, usize, f32)> = None;
            for a in 0..clusters.len() {
                for b in (a + 1)..clusters.len() {
                    let dist = average_linkage(&clusters[a], &clusters[b], &similarity, n);
                    if best.is_none_or(|(_, _, d)| dist < d) {
                        best = Some((a, b, dist));
                    }
                }
            }

            let (a, b, _) = best.expect("more than one cluster remains");
            let merged = clusters.remove(b);
            clusters[a].extend(merged);
            clusters[a].sort_unstable();
        }

        clusters.sort_by_key(|members| members[0]);
        debug!("Created {} clusters", clusters.len());
        Ok(clusters)
    }

    /// Greedy farthest-point selection of a diverse subset.
    ///
    /// Always keeps the first item, then admits each subsequent item only
    /// if its cosine distance to every already-selected item is at least
    /// `min_distance`. The result is maximal in input order.
    pub fn diversity_filter(
        &self,
        items: &[QuestionCandidate],
        min_distance: f32,
    ) -> DedupResult<Vec<QuestionCandidate>> {
        if items.len() <= 1 {
            return Ok(items.to_vec());
        }

        info!("Filtering {} questions by semantic distance", items.len());

        let texts: Vec<&str> = items.iter().map(|q| q.text.as_str()).collect();
        let embeddings = self.embedder.embed_batch(&texts)?;

        let mut selected = vec![0usize];
        for i in 1..items.len() {
            let max_similarity = selected
                .iter()
                .map(|&s| cosine_similarity(&embeddings[i], &embeddings[s]))
                .fold(f32::NEG_INFINITY, f32::max);

            if (1.0 - max_similarity) >= min_distance {
                selected.push(i);
            }
        }

        info!("Filtered to {} diverse questions", selected.len());
        Ok(selected.into_iter().map(|i| items[i].clone()).collect())
    }

    /// Merges very similar phrasings, mapping each representative to its
    /// variants (the representative itself included).
    ///
    /// Same greedy first-seen grouping as dedup, but over bare strings.
    /// Useful for reporting which rewordings collapsed together.
    pub fn merge_similar(
        &self,
        texts: &[&str],
        merge_threshold: f32,
    ) -> DedupResult<Vec<(String, Vec<String>)>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let similarity = self.pairwise_similarity(texts.iter().copied())?;
        let groups = greedy_groups(&similarity, texts.len(), merge_threshold);

        Ok(groups
            .into_iter()
            .map(|group| {
                let variants = group.iter().map(|&idx| texts[idx].to_string()).collect();
                (texts[group[0]].to_string(), variants)
            })
            .collect())
    }

    /// Embeds the batch once and builds the full n×n similarity matrix,
    /// row-major.
    fn pairwise_similarity<'a>(
        &self,
        texts: impl Iterator<Item = &'a str>,
    ) -> DedupResult<Vec<f32>> {
        let texts: Vec<&str> = texts.collect();
        let embeddings = self.embedder.embed_batch(&texts)?;
        let n = embeddings.len();

        let mut matrix = vec![0.0; n * n];
        for i in 0..n {
            matrix[i * n + i] = 1.0;
            for j in (i + 1)..n {
                let sim = cosine_similarity(&embeddings[i], &embeddings[j]);
                matrix[i * n + j] = sim;
                matrix[j * n + i] = sim;
            }
        }

        Ok(matrix)
    }
}

/// Greedy first-seen grouping over a similarity matrix: each unclaimed
/// item claims every later unclaimed item meeting the threshold.
fn greedy_groups(similarity: &[f32], n: usize, threshold: f32) -> Vec<Vec<usize>> {
    let mut claimed = vec![false; n];
    let mut groups = Vec::new();

    for i in 0..n {
        if claimed[i] {
            continue;
        }

        let mut group = vec![i];
        claimed[i] = true;
        for j in (i + 1)..n {
            if !claimed[j] && similarity[i * n + j] >= threshold {
                group.push(j);
                claimed[j] = true;
            }
        }

        groups.push(group);
    }

    groups
}

/// Average pairwise cosine distance between two clusters.
fn average_linkage(a: &[usize], b: &[usize], similarity: &[f32], n: usize) -> f32 {
    let total: f32 = a
        .iter()
        .flat_map(|&i| b.iter().map(move |&j| 1.0 - similarity[i * n + j]))
        .sum();
    total / (a.len() * b.len()) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedder;
    use crate::store::SourceType;

    fn candidate(text: &str, url: &str) -> QuestionCandidate {
        QuestionCandidate {
            text: text.to_string(),
            source: SourceRecord {
                source_type: SourceType::Youtube,
                source_url: url.to_string(),
                source_title: "Interview".to_string(),
                timestamp: None,
                date: None,
            },
        }
    }

    fn deduper(threshold: f32) -> SemanticDeduper {
        SemanticDeduper::new(Arc::new(MockEmbedder::new()), threshold).unwrap()
    }

    #[test]
    fn test_deduplicate_merges_rephrasings() {
        let deduper = deduper(0.85);
        let items = vec![
            candidate("Why did you pick acting?", "url1"),
            candidate("What drew you to acting?", "url2"),
            candidate("Favorite co-star?", "url3"),
        ];

        let result = deduper.deduplicate(&items).unwrap();

        assert_eq!(result.len(), 2);
        // First-seen member is the representative
        assert_eq!(result[0].text, "Why did you pick acting?");
        assert_eq!(result[0].duplicate_count, 2);
        assert_eq!(result[0].merged_sources.len(), 2);
        assert_eq!(result[0].merged_sources[1].source_url, "url2");

        assert_eq!(result[1].text, "Favorite co-star?");
        assert_eq!(result[1].duplicate_count, 1);
        assert!(result[1].merged_sources.is_empty());
    }

    #[test]
    fn test_deduplicate_idempotent() {
        let deduper = deduper(0.85);
        let items = vec![
            candidate("Why did you pick acting?", "url1"),
            candidate("What drew you to acting?", "url2"),
            candidate("How do you prepare for roles?", "url3"),
            candidate("What's your preparation process for roles?", "url4"),
            candidate("What's your favorite food?", "url5"),
        ];

        let once = deduper.deduplicate(&items).unwrap();

        // Feed the representatives back through: nothing more may merge
        let again_input: Vec<QuestionCandidate> = once
            .iter()
            .map(|d| QuestionCandidate {
                text: d.text.clone(),
                source: d.source.clone(),
            })
            .collect();
        let twice = deduper.deduplicate(&again_input).unwrap();

        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(&twice) {
            assert_eq!(a.text, b.text);
            assert_eq!(b.duplicate_count, 1);
        }
    }

    #[test]
    fn test_deduplicate_empty_and_single() {
        let deduper = deduper(0.85);

        assert!(deduper.deduplicate(&[]).unwrap().is_empty());

        let single = vec![candidate("Why acting?", "url1")];
        let result = deduper.deduplicate(&single).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].duplicate_count, 1);
    }

    #[test]
    fn test_deduplicate_is_deterministic() {
        let deduper = deduper(0.85);
        let items = vec![
            candidate("Why did you pick acting?", "url1"),
            candidate("What drew you to acting?", "url2"),
            candidate("Favorite co-star?", "url3"),
        ];

        let first = deduper.deduplicate(&items).unwrap();
        let second = deduper.deduplicate(&items).unwrap();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.text, b.text);
            assert_eq!(a.duplicate_count, b.duplicate_count);
        }
    }

    #[test]
    fn test_cluster_partitions_all_items() {
        let deduper = deduper(0.85);
        let items = vec![
            candidate("Why did you pick acting?", "url1"),
            candidate("What drew you to acting?", "url2"),
            candidate("How do you prepare for roles?", "url3"),
            candidate("What's your preparation process?", "url4"),
            candidate("What's your favorite food?", "url5"),
        ];

        let clusters = deduper.cluster(&items, Some(3)).unwrap();

        assert_eq!(clusters.len(), 3);
        // Every item lands in exactly one cluster
        let mut all: Vec<usize> = clusters.iter().flatten().copied().collect();
        all.sort_unstable();
        assert_eq!(all, vec![0, 1, 2, 3, 4]);

        // The two acting questions group together, as do the two
        // preparation questions
        assert!(clusters.iter().any(|c| c == &vec![0, 1]));
        assert!(clusters.iter().any(|c| c == &vec![2, 3]));
    }

    #[test]
    fn test_cluster_default_count() {
        let deduper = deduper(0.85);
        let items: Vec<QuestionCandidate> = (0..5)
            .map(|i| candidate(&format!("question {i} about acting"), "url"))
            .collect();

        // ceil(sqrt(5)) = 3, floor of 2 doesn't apply
        let clusters = deduper.cluster(&items, None).unwrap();
        assert_eq!(clusters.len(), 3);
    }

    #[test]
    fn test_cluster_tiny_input() {
        let deduper = deduper(0.85);

        let empty = deduper.cluster(&[], None).unwrap();
        assert_eq!(empty, vec![Vec::<usize>::new()]);

        let one = deduper.cluster(&[candidate("Why acting?", "url")], None).unwrap();
        assert_eq!(one, vec![vec![0]]);
    }

    #[test]
    fn test_diversity_filter() {
        let deduper = deduper(0.85);
        let items = vec![
            candidate("Why did you pick acting?", "url1"),
            // Near-identical to the first: filtered out
            candidate("What drew you to acting?", "url2"),
            // Different theme: kept
            candidate("What's your favorite food?", "url3"),
        ];

        let filtered = deduper.diversity_filter(&items, 0.15).unwrap();

        assert_eq!(filtered.len(), 2);
        // First item always survives
        assert_eq!(filtered[0].text, "Why did you pick acting?");
        assert_eq!(filtered[1].text, "What's your favorite food?");
    }

    #[test]
    fn test_diversity_filter_zero_distance_keeps_all() {
        let deduper = deduper(0.85);
        let items = vec![
            candidate("Why did you pick acting?", "url1"),
            candidate("What drew you to acting?", "url2"),
        ];

        let filtered = deduper.diversity_filter(&items, 0.0).unwrap();
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn test_merge_similar() {
        let deduper = deduper(0.85);
        let texts = [
            "Why did you pick acting?",
            "What drew you to acting?",
            "Favorite co-star?",
        ];

        let merged = deduper.merge_similar(&texts, 0.90).unwrap();

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].0, "Why did you pick acting?");
        assert_eq!(merged[0].1.len(), 2);
        assert_eq!(merged[1].0, "Favorite co-star?");
        assert_eq!(merged[1].1, vec!["Favorite co-star?".to_string()]);
    }

    #[test]
    fn test_invalid_threshold() {
        let result = SemanticDeduper::new(Arc::new(MockEmbedder::new()), 1.5);
        assert!(matches!(result, Err(DedupError::InvalidThreshold(_))));
    }
}
