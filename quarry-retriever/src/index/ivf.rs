//! Inverted-file partitioning for approximate search.
//!
//! Entries are clustered with Lloyd's k-means. Initialization picks evenly
//! spaced entries instead of random ones, so training on the same vectors
//! always yields the same lists.

use super::DistanceMetric;

const MAX_ITERATIONS: usize = 25;

#[derive(Debug)]
pub(super) struct InvertedLists {
    centroids: Vec<Vec<f32>>,
    /// Entry positions per list, ascending
    lists: Vec<Vec<usize>>,
    probes: usize,
    metric: DistanceMetric,
}

impl InvertedLists {
    /// Partition `vectors` into `n_lists` lists. Requires
    /// `1 <= n_lists <= vectors.len()`.
    pub(super) fn train(
        vectors: &[&[f32]],
        n_lists: usize,
        probes: usize,
        metric: DistanceMetric,
    ) -> Self {
        let n = vectors.len();
        let dimension = vectors.first().map_or(0, |v| v.len());
        let mut centroids: Vec<Vec<f32>> = (0..n_lists)
            .map(|i| vectors[i * n / n_lists].to_vec())
            .collect();
        let mut assignments = vec![usize::MAX; n];

        for iteration in 0..MAX_ITERATIONS {
            let mut changed = false;
            for (position, vector) in vectors.iter().enumerate() {
                let nearest = nearest_centroid(&centroids, vector, metric);
                if assignments[position] != nearest {
                    assignments[position] = nearest;
                    changed = true;
                }
            }
            if !changed {
                tracing::debug!("k-means converged after {} iterations", iteration);
                break;
            }

            let mut sums = vec![vec![0.0f32; dimension]; n_lists];
            let mut counts = vec![0usize; n_lists];
            for (vector, &list) in vectors.iter().zip(&assignments) {
                counts[list] += 1;
                for (sum, value) in sums[list].iter_mut().zip(vector.iter()) {
                    *sum += value;
                }
            }
            for ((centroid, sum), count) in centroids.iter_mut().zip(sums).zip(counts) {
                // An empty list keeps its previous centroid
                if count > 0 {
                    *centroid = sum.into_iter().map(|s| s / count as f32).collect();
                }
            }
        }

        // Final assignment against the final centroids, so every entry sits in
        // the list whose centroid is nearest to it.
        let mut lists = vec![Vec::new(); n_lists];
        for (position, vector) in vectors.iter().enumerate() {
            lists[nearest_centroid(&centroids, vector, metric)].push(position);
        }

        tracing::debug!(
            "Trained {} inverted lists over {} entries (largest {})",
            n_lists,
            n,
            lists.iter().map(Vec::len).max().unwrap_or(0)
        );
        Self {
            centroids,
            lists,
            probes,
            metric,
        }
    }

    /// Entry positions to rank for `query`: the `probes` nearest lists,
    /// widened list by list until at least `k` entries are covered.
    pub(super) fn candidates(&self, query: &[f32], k: usize) -> Vec<usize> {
        let metric = self.metric;
        let mut order: Vec<(f32, usize)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(list, centroid)| (metric.distance(query, centroid), list))
            .collect();
        order.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut candidates = Vec::new();
        for (probed, (_, list)) in order.into_iter().enumerate() {
            if probed >= self.probes && candidates.len() >= k {
                break;
            }
            candidates.extend_from_slice(&self.lists[list]);
        }
        candidates
    }
}

fn nearest_centroid(centroids: &[Vec<f32>], vector: &[f32], metric: DistanceMetric) -> usize {
    let mut best = 0;
    let mut best_distance = f32::INFINITY;
    for (list, centroid) in centroids.iter().enumerate() {
        let distance = metric.distance(vector, centroid);
        if distance < best_distance {
            best = list;
            best_distance = distance;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clustered() -> Vec<Vec<f32>> {
        let mut vectors = Vec::new();
        for i in 0..10 {
            let jitter = i as f32 * 0.01;
            vectors.push(vec![0.0 + jitter, 0.0]);
            vectors.push(vec![10.0 + jitter, 10.0]);
            vectors.push(vec![-10.0 + jitter, 10.0]);
        }
        vectors
    }

    #[test]
    fn test_separates_clusters() {
        let vectors = clustered();
        let refs: Vec<&[f32]> = vectors.iter().map(Vec::as_slice).collect();
        let ivf = InvertedLists::train(&refs, 3, 1, DistanceMetric::L2);

        let mut sizes: Vec<usize> = ivf.lists.iter().map(Vec::len).collect();
        sizes.sort();
        assert_eq!(sizes, vec![10, 10, 10]);

        let candidates = ivf.candidates(&[10.0, 10.0], 5);
        assert_eq!(candidates.len(), 10);
        assert!(candidates.iter().all(|&p| p % 3 == 1));
    }

    #[test]
    fn test_widens_to_cover_k() {
        let vectors = clustered();
        let refs: Vec<&[f32]> = vectors.iter().map(Vec::as_slice).collect();
        let ivf = InvertedLists::train(&refs, 3, 1, DistanceMetric::L2);

        assert_eq!(ivf.candidates(&[0.0, 0.0], 15).len(), 20);
        assert_eq!(ivf.candidates(&[0.0, 0.0], 100).len(), 30);
    }

    #[test]
    fn test_training_is_deterministic() {
        let vectors = clustered();
        let refs: Vec<&[f32]> = vectors.iter().map(Vec::as_slice).collect();
        let a = InvertedLists::train(&refs, 4, 2, DistanceMetric::Cosine);
        let b = InvertedLists::train(&refs, 4, 2, DistanceMetric::Cosine);
        assert_eq!(a.lists, b.lists);
        assert_eq!(a.centroids, b.centroids);
    }
}
