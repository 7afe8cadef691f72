//! The index capability consumed by calibration and serving.
//!
//! Calibration and the adaptive engine only need one thing from an ANN index:
//! a batched k-NN search whose thoroughness is controlled by a single scalar
//! effort knob. That is [`EffortIndex`]. The crate ships an HNSW
//! implementation (`hnsw` feature), where effort is the `ef` beam width.
//!
//! ```rust,ignore
//! use riskann::ann::EffortIndex;
//! use riskann::hnsw::{HNSWIndex, HNSWParams};
//!
//! let index = HNSWIndex::from_vectors(128, HNSWParams::default(), &base)?;
//! let mut labels = vec![0u32; nq * 10];
//! let mut distances = vec![0f32; nq * 10];
//! index.search_batch(&queries, 10, 64, &mut labels, &mut distances)?;
//! ```

pub mod traits;

pub use traits::EffortIndex;
