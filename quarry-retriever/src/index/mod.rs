//! In-memory vector index over embedded chunks.
//!
//! A [`VectorIndex`] is built once from `(vector, chunk)` pairs and never
//! modified afterwards; a new upload builds a new index. Queries return the
//! `k` nearest chunks under the metric chosen at build time.
//!
//! ## Search strategies
//!
//! - [`SearchStrategy::Exact`] scans every entry (O(n·d) per query)
//! - [`SearchStrategy::IvfFlat`] partitions entries with k-means and only
//!   scans the lists whose centroids are nearest to the query. Results are
//!   approximate but always contain `min(k, n)` entries.
//!
//! ## Ordering
//!
//! Results are sorted by ascending distance. Equal distances are ordered by
//! `chunk_index`, then by insertion position, so identical inputs always
//! produce identical rankings.

mod metric;
mod ivf;

pub use metric::DistanceMetric;

use crate::error::IndexError;
use chrono::{DateTime, Utc};
use quarry_context::Chunk;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

/// How candidates are found before exact ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Brute-force scan of every entry
    #[default]
    Exact,
    /// Inverted file with `lists` k-means partitions, `probes` scanned per query
    IvfFlat { lists: usize, probes: usize },
}

impl std::fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => f.write_str("exact"),
            Self::IvfFlat { lists, probes } => write!(f, "ivf-flat({lists} lists, {probes} probes)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub metric: DistanceMetric,
    pub strategy: SearchStrategy,
}

impl IndexConfig {
    pub fn validate(&self) -> Result<(), IndexError> {
        if let SearchStrategy::IvfFlat { lists, probes } = self.strategy {
            if lists == 0 || probes == 0 {
                return Err(IndexError::InvalidConfig(
                    "ivf-flat needs at least one list and one probe".to_string(),
                ));
            }
            if probes > lists {
                return Err(IndexError::InvalidConfig(format!(
                    "ivf-flat probes ({probes}) exceed lists ({lists})"
                )));
            }
        }
        Ok(())
    }
}

/// One ranked hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    /// Distance under the index metric; smaller is nearer
    pub score: f32,
    /// 0 for the nearest result
    pub rank: usize,
}

/// Flattened view of a result for prompt assembly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Passage {
    pub text: String,
    pub source: String,
    pub locator: Option<u32>,
    pub score: f32,
}

impl From<RetrievalResult> for Passage {
    fn from(result: RetrievalResult) -> Self {
        Self {
            text: result.chunk.content,
            source: result.chunk.source,
            locator: result.chunk.locator,
            score: result.score,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub entries: usize,
    pub dimension: Option<usize>,
    pub metric: DistanceMetric,
    pub strategy: SearchStrategy,
    /// Number of distinct source documents
    pub sources: usize,
    pub built_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Entry {
    vector: Vec<f32>,
    chunk: Chunk,
}

/// Immutable nearest-neighbor index.
#[derive(Debug)]
pub struct VectorIndex {
    entries: Vec<Entry>,
    dimension: Option<usize>,
    config: IndexConfig,
    ivf: Option<ivf::InvertedLists>,
    built_at: DateTime<Utc>,
}

impl VectorIndex {
    /// Build an index from parallel `vectors` and `chunks`.
    ///
    /// All vectors must share one dimension and contain only finite values.
    /// An empty build is valid and answers every query with no results.
    pub fn build(
        vectors: Vec<Vec<f32>>,
        chunks: Vec<Chunk>,
        config: &IndexConfig,
    ) -> Result<Self, IndexError> {
        config.validate()?;
        if vectors.len() != chunks.len() {
            return Err(IndexError::LengthMismatch {
                vectors: vectors.len(),
                chunks: chunks.len(),
            });
        }

        let dimension = vectors.first().map(Vec::len);
        if let Some(expected) = dimension {
            if expected == 0 {
                return Err(IndexError::InvalidConfig(
                    "vectors must have at least one component".to_string(),
                ));
            }
            for (position, vector) in vectors.iter().enumerate() {
                if vector.len() != expected {
                    return Err(IndexError::DimensionMismatch {
                        expected,
                        actual: vector.len(),
                    });
                }
                if vector.iter().any(|v| !v.is_finite()) {
                    return Err(IndexError::NonFiniteVector { position });
                }
            }
        }

        let entries: Vec<Entry> = vectors
            .into_iter()
            .zip(chunks)
            .map(|(vector, chunk)| Entry { vector, chunk })
            .collect();

        let ivf = match config.strategy {
            SearchStrategy::Exact => None,
            SearchStrategy::IvfFlat { lists, probes } if entries.len() >= lists => {
                let vectors: Vec<&[f32]> = entries.iter().map(|e| e.vector.as_slice()).collect();
                Some(ivf::InvertedLists::train(&vectors, lists, probes, config.metric))
            }
            SearchStrategy::IvfFlat { lists, .. } => {
                tracing::debug!(
                    "{} entries is fewer than {} lists, using exact search",
                    entries.len(),
                    lists
                );
                None
            }
        };

        tracing::info!(
            "Built vector index: {} entries, dimension {:?}, metric {}, strategy {}",
            entries.len(),
            dimension,
            config.metric,
            config.strategy
        );

        Ok(Self {
            entries,
            dimension,
            config: *config,
            ivf,
            built_at: Utc::now(),
        })
    }

    /// The `k` nearest entries to `vector`, nearest first.
    ///
    /// Returns `min(k, len())` results. `k == 0` is rejected.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<RetrievalResult>, IndexError> {
        if k == 0 {
            return Err(IndexError::InvalidK);
        }
        let Some(dimension) = self.dimension else {
            return Ok(Vec::new());
        };
        if vector.len() != dimension {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: vector.len(),
            });
        }

        let metric = self.config.metric;
        let mut scored: Vec<(f32, usize)> = match &self.ivf {
            Some(ivf) => ivf
                .candidates(vector, k)
                .into_iter()
                .map(|position| (metric.distance(vector, &self.entries[position].vector), position))
                .collect(),
            None => self
                .entries
                .iter()
                .enumerate()
                .map(|(position, entry)| (metric.distance(vector, &entry.vector), position))
                .collect(),
        };

        let compare = |a: &(f32, usize), b: &(f32, usize)| -> Ordering {
            a.0.total_cmp(&b.0)
                .then_with(|| {
                    self.entries[a.1]
                        .chunk
                        .chunk_index
                        .cmp(&self.entries[b.1].chunk.chunk_index)
                })
                .then_with(|| a.1.cmp(&b.1))
        };

        if scored.len() > k {
            scored.select_nth_unstable_by(k - 1, compare);
            scored.truncate(k);
        }
        scored.sort_by(compare);

        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(rank, (score, position))| RetrievalResult {
                chunk: self.entries[position].chunk.clone(),
                score,
                rank,
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dimension of the stored vectors; `None` for an empty index.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.entries.iter().map(|e| &e.chunk)
    }

    pub fn stats(&self) -> IndexStats {
        let sources: HashSet<&str> = self.chunks().map(|c| c.source.as_str()).collect();
        IndexStats {
            entries: self.entries.len(),
            dimension: self.dimension,
            metric: self.config.metric,
            strategy: self.config.strategy,
            sources: sources.len(),
            built_at: self.built_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str, chunk_index: usize) -> Chunk {
        Chunk {
            content: content.to_string(),
            source: "doc.txt".to_string(),
            locator: None,
            chunk_index,
            span: 0..content.len(),
        }
    }

    fn exact() -> IndexConfig {
        IndexConfig::default()
    }

    #[test]
    fn test_nearest_first() {
        let index = VectorIndex::build(
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            vec![chunk("A", 0), chunk("B", 1)],
            &exact(),
        )
        .unwrap();

        let results = index.query(&[0.9, 0.1], 1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.content, "A");
        assert_eq!(results[0].rank, 0);
        assert!((results[0].score - 0.02).abs() < 1e-6);

        let both = index.query(&[0.9, 0.1], 2).unwrap();
        assert_eq!(both[1].chunk.content, "B");
        assert_eq!(both[1].rank, 1);
        assert!(both[0].score <= both[1].score);
    }

    #[test]
    fn test_k_bound() {
        let vectors: Vec<Vec<f32>> = (0..5).map(|i| vec![i as f32, 0.0]).collect();
        let chunks: Vec<Chunk> = (0..5).map(|i| chunk(&format!("c{i}"), i)).collect();
        let index = VectorIndex::build(vectors, chunks, &exact()).unwrap();

        assert_eq!(index.query(&[0.0, 0.0], 3).unwrap().len(), 3);
        assert_eq!(index.query(&[0.0, 0.0], 5).unwrap().len(), 5);
        assert_eq!(index.query(&[0.0, 0.0], 50).unwrap().len(), 5);
        assert_eq!(index.query(&[0.0, 0.0], 0).unwrap_err(), IndexError::InvalidK);
    }

    #[test]
    fn test_ties_break_by_chunk_index_then_insertion() {
        let index = VectorIndex::build(
            vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![1.0, 0.0]],
            vec![chunk("late", 2), chunk("first", 0), chunk("second", 0)],
            &exact(),
        )
        .unwrap();

        let names: Vec<String> = index
            .query(&[0.0, 0.0], 3)
            .unwrap()
            .into_iter()
            .map(|r| r.chunk.content)
            .collect();
        assert_eq!(names, vec!["first", "second", "late"]);
    }

    #[test]
    fn test_empty_index() {
        let index = VectorIndex::build(vec![], vec![], &exact()).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.dimension(), None);
        assert!(index.query(&[1.0, 2.0, 3.0], 5).unwrap().is_empty());
        assert_eq!(index.query(&[1.0], 0).unwrap_err(), IndexError::InvalidK);
    }

    #[test]
    fn test_build_validation() {
        assert_eq!(
            VectorIndex::build(vec![vec![1.0]], vec![], &exact()).unwrap_err(),
            IndexError::LengthMismatch {
                vectors: 1,
                chunks: 0
            }
        );
        assert_eq!(
            VectorIndex::build(
                vec![vec![1.0, 0.0], vec![1.0]],
                vec![chunk("a", 0), chunk("b", 1)],
                &exact()
            )
            .unwrap_err(),
            IndexError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        );
        assert_eq!(
            VectorIndex::build(
                vec![vec![1.0], vec![f32::NAN]],
                vec![chunk("a", 0), chunk("b", 1)],
                &exact()
            )
            .unwrap_err(),
            IndexError::NonFiniteVector { position: 1 }
        );
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let index = VectorIndex::build(vec![vec![1.0; 384]], vec![chunk("a", 0)], &exact()).unwrap();
        assert_eq!(
            index.query(&vec![0.0; 1536], 1).unwrap_err(),
            IndexError::DimensionMismatch {
                expected: 384,
                actual: 1536
            }
        );
    }

    #[test]
    fn test_cosine_ignores_magnitude() {
        let config = IndexConfig {
            metric: DistanceMetric::Cosine,
            ..IndexConfig::default()
        };
        let index = VectorIndex::build(
            vec![vec![10.0, 0.0], vec![0.0, 0.1]],
            vec![chunk("far but aligned", 0), chunk("near but orthogonal", 1)],
            &config,
        )
        .unwrap();

        let results = index.query(&[0.1, 0.0], 1).unwrap();
        assert_eq!(results[0].chunk.content, "far but aligned");
        assert!(results[0].score.abs() < 1e-6);
    }

    #[test]
    fn test_deterministic_queries() {
        let vectors: Vec<Vec<f32>> = (0..40)
            .map(|i| vec![(i % 7) as f32, (i % 3) as f32, (i % 5) as f32])
            .collect();
        let chunks: Vec<Chunk> = (0..40).map(|i| chunk(&format!("c{i}"), i % 4)).collect();
        let index = VectorIndex::build(vectors, chunks, &exact()).unwrap();

        let first = index.query(&[1.0, 1.0, 1.0], 10).unwrap();
        for _ in 0..5 {
            assert_eq!(index.query(&[1.0, 1.0, 1.0], 10).unwrap(), first);
        }
    }

    #[test]
    fn test_ivf_matches_k_bound_and_finds_exact_hit() {
        let vectors: Vec<Vec<f32>> = (0..200)
            .map(|i| {
                let angle = i as f32 * 0.1;
                vec![angle.cos() * (1.0 + (i % 5) as f32), angle.sin(), (i % 11) as f32]
            })
            .collect();
        let chunks: Vec<Chunk> = (0..200).map(|i| chunk(&format!("c{i}"), i)).collect();
        let target = vectors[42].clone();
        let config = IndexConfig {
            strategy: SearchStrategy::IvfFlat {
                lists: 8,
                probes: 1,
            },
            ..IndexConfig::default()
        };
        let index = VectorIndex::build(vectors, chunks, &config).unwrap();

        let results = index.query(&target, 1).unwrap();
        assert_eq!(results[0].chunk.content, "c42");
        assert_eq!(results[0].score, 0.0);

        for k in [1, 10, 60, 200, 500] {
            assert_eq!(index.query(&target, k).unwrap().len(), k.min(200));
        }
    }

    #[test]
    fn test_ivf_small_corpus_falls_back_to_exact() {
        let config = IndexConfig {
            strategy: SearchStrategy::IvfFlat {
                lists: 16,
                probes: 2,
            },
            ..IndexConfig::default()
        };
        let index = VectorIndex::build(
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            vec![chunk("A", 0), chunk("B", 1)],
            &config,
        )
        .unwrap();
        assert_eq!(index.query(&[0.0, 1.0], 2).unwrap()[0].chunk.content, "B");
    }

    #[test]
    fn test_invalid_ivf_config() {
        let config = IndexConfig {
            strategy: SearchStrategy::IvfFlat {
                lists: 4,
                probes: 0,
            },
            ..IndexConfig::default()
        };
        assert!(matches!(
            VectorIndex::build(vec![], vec![], &config),
            Err(IndexError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_stats_and_passages() {
        let mut b = chunk("B", 0);
        b.source = "other.pdf".to_string();
        b.locator = Some(3);
        let index = VectorIndex::build(
            vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.5, 0.5]],
            vec![chunk("A", 0), b, chunk("C", 1)],
            &exact(),
        )
        .unwrap();

        let stats = index.stats();
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.dimension, Some(2));
        assert_eq!(stats.sources, 2);

        let result = index.query(&[0.0, 1.0], 1).unwrap().remove(0);
        let passage = Passage::from(result);
        assert_eq!(passage.text, "B");
        assert_eq!(passage.source, "other.pdf");
        assert_eq!(passage.locator, Some(3));
        assert_eq!(passage.score, 0.0);
    }
}
