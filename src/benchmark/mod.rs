//! Benchmark utilities for adaptive ANN evaluation.
//!
//! Provides metrics, dataset generation, and serving reports for comparing an
//! adaptive run against fixed-effort baselines:
//!
//! - **Accuracy**: FNR@k (the calibrated risk), recall@k, precision@k
//! - **Cost**: mean and maximum effort, rounds, QPS
//!
//! # Standard Benchmark Datasets
//!
//! | Dataset | Size | Dim | Distance | Use Case |
//! |---------|------|-----|----------|----------|
//! | SIFT-1M | 1M | 128 | L2 | Image descriptors |
//! | GIST-1M | 1M | 960 | L2 | High-dimensional |
//! | GloVe-100 | 1.2M | 100 | Angular | Word embeddings |
//!
//! File loaders for these are not included; the synthetic generators here are
//! seeded stand-ins for tests and benches.
//!
//! Reference: <https://ann-benchmarks.com/>

pub mod datasets;
pub mod evaluation;
pub mod metrics;

pub use datasets::{
    compute_all_ground_truth, compute_ground_truth, create_clustered_dataset,
    create_uniform_dataset, Dataset,
};
pub use evaluation::{evaluate, ServingReport};
pub use metrics::{false_negative_rate, mean_recall, precision_at_k, recall_at_k};
