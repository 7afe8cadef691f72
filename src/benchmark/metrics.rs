//! Retrieval quality metrics.
//!
//! - Recall@k: fraction of true neighbors found
//! - FNR@k: fraction of true neighbors missed (the calibrated risk)
//! - Precision@k: fraction of retrieved items that are true neighbors

use std::collections::HashSet;

/// Compute recall@k: fraction of true k-nearest neighbors that were retrieved.
///
/// recall@k = |retrieved[..k] ∩ ground_truth[..k]| / k
///
/// # Arguments
///
/// * `ground_truth` - True nearest neighbor IDs, closest first
/// * `retrieved` - Retrieved neighbor IDs (may be more or fewer than k)
/// * `k` - Number of neighbors we're evaluating
///
/// # Returns
///
/// Recall value in [0.0, 1.0]
pub fn recall_at_k(ground_truth: &[u32], retrieved: &[u32], k: usize) -> f32 {
    if k == 0 || ground_truth.is_empty() {
        return 0.0;
    }

    let gt_set: HashSet<u32> = ground_truth.iter().take(k).copied().collect();
    let retrieved_set: HashSet<u32> = retrieved.iter().take(k).copied().collect();

    let intersection = gt_set.intersection(&retrieved_set).count();
    intersection as f32 / k as f32
}

/// False-negative rate at k: `1 - recall@k`.
///
/// This is the per-query loss the calibrator bounds. It is always in `[0, 1]`,
/// so its natural risk upper bound is `1.0`.
#[inline]
pub fn false_negative_rate(ground_truth: &[u32], retrieved: &[u32], k: usize) -> f32 {
    1.0 - recall_at_k(ground_truth, retrieved, k)
}

/// Compute precision@k: fraction of retrieved items that are true neighbors.
///
/// precision@k = |retrieved ∩ ground_truth| / |retrieved|
pub fn precision_at_k(ground_truth: &[u32], retrieved: &[u32], k: usize) -> f32 {
    if retrieved.is_empty() {
        return 0.0;
    }

    let gt_set: HashSet<u32> = ground_truth.iter().take(k).copied().collect();
    let retrieved_k: Vec<u32> = retrieved.iter().take(k).copied().collect();

    let hits = retrieved_k.iter().filter(|id| gt_set.contains(id)).count();
    hits as f32 / retrieved_k.len() as f32
}

/// Compute mean recall across multiple queries.
pub fn mean_recall(ground_truths: &[Vec<u32>], retrievals: &[Vec<u32>], k: usize) -> f32 {
    if ground_truths.is_empty() {
        return 0.0;
    }

    let total: f32 = ground_truths
        .iter()
        .zip(retrievals.iter())
        .map(|(gt, ret)| recall_at_k(gt, ret, k))
        .sum();

    total / ground_truths.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recall_at_k() {
        let gt = vec![1, 2, 3, 4, 5];
        let retrieved = vec![1, 2, 3, 6, 7];
        assert!((recall_at_k(&gt, &retrieved, 5) - 0.6).abs() < 0.001);

        // Perfect recall
        let perfect = vec![1, 2, 3, 4, 5];
        assert!((recall_at_k(&gt, &perfect, 5) - 1.0).abs() < 0.001);

        // Zero recall
        let miss = vec![6, 7, 8, 9, 10];
        assert!((recall_at_k(&gt, &miss, 5) - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_fnr_is_complement_of_recall() {
        let gt = vec![1, 2, 3, 4];
        assert_eq!(false_negative_rate(&gt, &[1, 2, 3, 4], 4), 0.0);
        assert!((false_negative_rate(&gt, &[4, 3, 9, 8], 4) - 0.5).abs() < 1e-6);
        assert_eq!(false_negative_rate(&gt, &[7, 8, 9, 10], 4), 1.0);
    }

    #[test]
    fn test_fnr_ignores_ground_truth_beyond_k() {
        // Ground truth rows may be longer than k (e.g. top-100 files); only the first k count.
        let gt = vec![1, 2, 3, 50, 60, 70];
        assert_eq!(false_negative_rate(&gt, &[3, 2, 1], 3), 0.0);
    }

    #[test]
    fn test_fnr_padding_counts_as_miss() {
        let gt = vec![1, 2];
        assert!((false_negative_rate(&gt, &[1, u32::MAX], 2) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_precision_at_k() {
        let gt = vec![1, 2, 3, 4, 5];
        let retrieved = vec![1, 2, 6, 7, 8];
        assert!((precision_at_k(&gt, &retrieved, 5) - 0.4).abs() < 0.001);
    }

    #[test]
    fn test_mean_recall() {
        let gts = vec![vec![1, 2], vec![3, 4]];
        let rets = vec![vec![1, 2], vec![3, 9]];
        assert!((mean_recall(&gts, &rets, 2) - 0.75).abs() < 1e-6);
    }
}
