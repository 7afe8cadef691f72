//! Hierarchical Navigable Small World (HNSW) approximate nearest neighbor search.
//!
//! The effort knob is the search beam width `ef`: larger `ef` explores more of the
//! base layer, raising recall and latency. This is the index the calibration and
//! adaptive-serving layers drive through [`crate::ann::EffortIndex`].
//!
//! # Algorithm
//!
//! HNSW constructs a multi-layer graph where:
//! - **Upper layers**: Sparse, long-range connections for fast navigation
//! - **Lower layers**: Dense, local connections for precise search
//! - **Search**: Start at top layer, navigate down to base layer, beam search
//!
//! Build is offline and single-shot (`add` everything, then `build`); there is no
//! streaming insertion or deletion.
//!
//! # Usage
//!
//! ```rust
//! use riskann::hnsw::{HNSWIndex, HNSWParams};
//!
//! # fn main() -> Result<(), riskann::RetrieveError> {
//! let mut index = HNSWIndex::new(4, 8, 16)?;
//! for i in 0..32u32 {
//!     index.add(i, vec![i as f32, 0.0, 0.0, 0.0])?;
//! }
//! index.build()?;
//!
//! let results = index.search(&[3.1, 0.0, 0.0, 0.0], 2, 16)?;
//! assert_eq!(results[0].0, 3);
//! # Ok(())
//! # }
//! ```
//!
//! # References
//!
//! - Malkov & Yashunin (2016): "Efficient and robust approximate nearest neighbor search
//!   using Hierarchical Navigable Small World graphs"

pub(crate) mod construction;
pub(crate) mod graph;
mod search;

pub use graph::{HNSWIndex, HNSWParams};
