//! HNSW index storage and parameters.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallvec::SmallVec;

use crate::distance::DistanceMetric;
use crate::{Result, RetrieveError};

/// Highest layer a node can be assigned to.
const MAX_LEVEL: u8 = 16;

/// Neighbor list for one node in one layer.
pub(crate) type NeighborList = SmallVec<[u32; 16]>;

/// HNSW construction parameters. Search width is chosen per call.
#[derive(Debug, Clone, PartialEq)]
pub struct HNSWParams {
    /// Maximum out-degree on upper layers.
    pub m: usize,
    /// Maximum out-degree on the base layer.
    pub m_max: usize,
    /// Beam width used while inserting.
    pub ef_construction: usize,
    /// Level-generation normalization factor, conventionally `1 / ln(m)`.
    pub ml: f64,
    /// Distance reported for neighbors.
    pub metric: DistanceMetric,
    /// Seed for level assignment. Same seed and insertion order give the same graph.
    pub seed: u64,
}

impl Default for HNSWParams {
    fn default() -> Self {
        Self {
            m: 16,
            m_max: 32,
            ef_construction: 100,
            ml: 1.0 / (16.0_f64).ln(),
            metric: DistanceMetric::default(),
            seed: 42,
        }
    }
}

/// One layer of the graph: adjacency for every node (empty if the node is not on it).
#[derive(Debug, Clone)]
pub(crate) struct Layer {
    neighbors: Vec<NeighborList>,
}

impl Layer {
    pub(crate) fn new(num_nodes: usize) -> Self {
        Self {
            neighbors: vec![SmallVec::new(); num_nodes],
        }
    }

    #[inline]
    pub(crate) fn get_neighbors(&self, id: u32) -> &[u32] {
        &self.neighbors[id as usize]
    }

    #[inline]
    pub(crate) fn get_neighbors_mut(&mut self) -> &mut [NeighborList] {
        &mut self.neighbors
    }
}

/// Hierarchical Navigable Small World index over `f32` vectors.
///
/// Vectors are stored flat (SoA); internal node `i` owns
/// `vectors[i * dimension..(i + 1) * dimension]` and reports `doc_ids[i]` as its label.
#[derive(Debug, Clone)]
pub struct HNSWIndex {
    pub(crate) dimension: usize,
    pub(crate) params: HNSWParams,
    pub(crate) vectors: Vec<f32>,
    pub(crate) doc_ids: Vec<u32>,
    pub(crate) num_vectors: usize,
    pub(crate) layer_assignments: Vec<u8>,
    pub(crate) layers: Vec<Layer>,
    pub(crate) entry_point: u32,
    pub(crate) built: bool,
}

impl HNSWIndex {
    /// Create an empty index with `m` / `m_max` degrees and default construction settings.
    pub fn new(dimension: usize, m: usize, m_max: usize) -> Result<Self> {
        let params = HNSWParams {
            m,
            m_max,
            ml: 1.0 / (m.max(2) as f64).ln(),
            ..Default::default()
        };
        Self::with_params(dimension, params)
    }

    /// Create an empty index with explicit parameters.
    pub fn with_params(dimension: usize, params: HNSWParams) -> Result<Self> {
        if dimension == 0 {
            return Err(RetrieveError::InvalidParameter(
                "dimension must be positive".into(),
            ));
        }
        if params.m < 2 || params.m_max < params.m {
            return Err(RetrieveError::InvalidParameter(format!(
                "need 2 <= m <= m_max, got m={} m_max={}",
                params.m, params.m_max
            )));
        }
        if params.ef_construction == 0 {
            return Err(RetrieveError::InvalidParameter(
                "ef_construction must be positive".into(),
            ));
        }
        if !(params.ml.is_finite() && params.ml > 0.0) {
            return Err(RetrieveError::InvalidParameter(format!(
                "ml must be positive and finite, got {}",
                params.ml
            )));
        }
        Ok(Self {
            dimension,
            params,
            vectors: Vec::new(),
            doc_ids: Vec::new(),
            num_vectors: 0,
            layer_assignments: Vec::new(),
            layers: Vec::new(),
            entry_point: 0,
            built: false,
        })
    }

    /// Build an index from row-major `vectors`, labelling row `i` as `i`.
    pub fn from_vectors(dimension: usize, params: HNSWParams, vectors: &[f32]) -> Result<Self> {
        let mut index = Self::with_params(dimension, params)?;
        if vectors.len() % dimension != 0 {
            return Err(RetrieveError::InvalidParameter(format!(
                "{} values is not a whole number of {dimension}-dimensional rows",
                vectors.len()
            )));
        }
        for (i, row) in vectors.chunks_exact(dimension).enumerate() {
            index.add_slice(i as u32, row)?;
        }
        index.build()?;
        Ok(index)
    }

    /// Add a vector. Must be called before [`HNSWIndex::build`].
    pub fn add(&mut self, doc_id: u32, vector: Vec<f32>) -> Result<()> {
        self.add_slice(doc_id, &vector)
    }

    /// Add a vector from a borrowed slice.
    pub fn add_slice(&mut self, doc_id: u32, vector: &[f32]) -> Result<()> {
        if self.built {
            return Err(RetrieveError::InvalidParameter(
                "cannot add vectors after build".into(),
            ));
        }
        if vector.len() != self.dimension {
            return Err(RetrieveError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if doc_id == u32::MAX {
            return Err(RetrieveError::InvalidParameter(
                "doc id u32::MAX is reserved for missing results".into(),
            ));
        }
        self.vectors.extend_from_slice(vector);
        self.doc_ids.push(doc_id);
        self.num_vectors += 1;
        Ok(())
    }

    /// Assign levels and construct the graph. Required before search.
    pub fn build(&mut self) -> Result<()> {
        if self.built {
            return Ok(());
        }
        if self.num_vectors == 0 {
            return Err(RetrieveError::EmptyIndex);
        }

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let ml = self.params.ml;
        self.layer_assignments = (0..self.num_vectors)
            .map(|_| {
                let u: f64 = rng.random();
                let level = (-(1.0 - u).ln() * ml).floor();
                (level as u64).min(MAX_LEVEL as u64) as u8
            })
            .collect();

        super::construction::construct_graph(self)?;
        self.built = true;
        tracing::debug!(
            num_vectors = self.num_vectors,
            layers = self.layers.len(),
            entry_point = self.entry_point,
            "hnsw graph built"
        );
        Ok(())
    }

    /// Construction/search parameters.
    pub fn params(&self) -> &HNSWParams {
        &self.params
    }

    /// Whether [`HNSWIndex::build`] has completed.
    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Number of indexed vectors.
    pub fn len(&self) -> usize {
        self.num_vectors
    }

    /// Whether no vectors were added.
    pub fn is_empty(&self) -> bool {
        self.num_vectors == 0
    }

    /// Number of graph layers (0 before build).
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_params() {
        assert!(HNSWIndex::new(0, 16, 32).is_err());
        assert!(HNSWIndex::new(8, 1, 32).is_err());
        assert!(HNSWIndex::new(8, 16, 8).is_err());
    }

    #[test]
    fn add_checks_dimension_and_build_state() {
        let mut index = HNSWIndex::new(3, 4, 8).unwrap();
        assert!(matches!(
            index.add(0, vec![1.0, 2.0]),
            Err(RetrieveError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        assert!(matches!(index.build(), Err(RetrieveError::EmptyIndex)));
        index.add(0, vec![1.0, 2.0, 3.0]).unwrap();
        index.build().unwrap();
        assert!(index.is_built());
        assert!(index.add(1, vec![0.0; 3]).is_err());
    }

    #[test]
    fn level_assignment_is_seeded() {
        let vectors: Vec<f32> = (0..400).map(|i| i as f32).collect();
        let a = HNSWIndex::from_vectors(4, HNSWParams::default(), &vectors).unwrap();
        let b = HNSWIndex::from_vectors(4, HNSWParams::default(), &vectors).unwrap();
        assert_eq!(a.layer_assignments, b.layer_assignments);
        assert_eq!(a.entry_point, b.entry_point);
        assert!(a.num_layers() >= 1);
    }
}
