// Flat vector index
// Exact nearest-neighbor search under squared L2 distance


use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::debug;

use crate::{RagError, Result};

const MAGIC: &[u8; 8] = b"FAQVIDX1";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = MAGIC.len() + 4 + 4 + 8;
const F32_LEN: usize = size_of::<f32>();

/// A single hit from [`VectorIndex::query`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Position of the matched vector, which is also the position of its document
    pub position: usize,
    /// Squared Euclidean distance to the query
    pub distance: f32,
}

/// Brute-force index over fixed-dimension vectors.
///
/// Vectors are stored contiguously in insertion order, so position `i` in the
/// index always refers to document `i` of the knowledge base. An index built
/// from no vectors has dimension 0 and answers every query with no results.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl VectorIndex {
    /// Build an index from an ordered sequence of vectors
    ///
    /// # Errors
    /// * `DimensionMismatch` - if the vectors do not all share the first vector's length
    /// * `InvalidArgument` - if the vectors all have length zero
    #[inline]
    pub fn build<V: AsRef<[f32]>>(vectors: &[V]) -> Result<Self> {
        let Some(first) = vectors.first() else {
            return Ok(Self {
                dimension: 0,
                data: Vec::new(),
            });
        };

        let dimension = first.as_ref().len();
        if let Some(ragged) = vectors.iter().find(|v| v.as_ref().len() != dimension) {
            return Err(RagError::DimensionMismatch {
                expected: dimension,
                actual: ragged.as_ref().len(),
            });
        }

        if dimension == 0 {
            return Err(RagError::InvalidArgument(
                "cannot index zero-length vectors".to_string(),
            ));
        }

        let mut data = Vec::with_capacity(dimension * vectors.len());
        for vector in vectors {
            data.extend_from_slice(vector.as_ref());
        }

        debug!(
            "Built flat index with {} vectors of dimension {}",
            vectors.len(),
            dimension
        );

        Ok(Self { dimension, data })
    }

    /// Number of stored vectors
    #[inline]
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Dimension shared by every stored vector, 0 for an empty index
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The stored vector at `position`, if any
    #[inline]
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        if position >= self.len() {
            return None;
        }
        let start = position * self.dimension;
        self.data.get(start..start + self.dimension)
    }

    /// Return up to `k` nearest neighbors of `query`.
    ///
    /// Results are sorted by ascending distance; equal distances keep
    /// ascending position order so repeated queries are reproducible.
    ///
    /// # Errors
    /// * `InvalidArgument` - if `k` is zero
    /// * `DimensionMismatch` - if the index is non-empty and `query` has another dimension
    #[inline]
    pub fn query(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if k == 0 {
            return Err(RagError::InvalidArgument(
                "k must be a positive integer".to_string(),
            ));
        }

        if self.is_empty() {
            return Ok(Vec::new());
        }

        if query.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut neighbors: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, vector)| Neighbor {
                position,
                distance: squared_l2(query, vector),
            })
            .collect();

        neighbors.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.position.cmp(&b.position))
        });
        neighbors.truncate(k);

        Ok(neighbors)
    }

    /// Serialize the index to `path`, replacing any existing file
    #[inline]
    pub fn persist(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        writer.write_all(MAGIC)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        writer.write_all(&header_u32(self.dimension)?.to_le_bytes())?;
        writer.write_all(&(self.len() as u64).to_le_bytes())?;
        for value in &self.data {
            writer.write_all(&value.to_le_bytes())?;
        }

        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        debug!(
            "Persisted index ({} vectors, dimension {}) to {}",
            self.len(),
            self.dimension,
            path.display()
        );
        Ok(())
    }

    /// Deserialize an index previously written by [`VectorIndex::persist`]
    ///
    /// # Errors
    /// * `Io` - if the file cannot be read
    /// * `CorruptIndex` - if the contents are not a structurally valid index
    #[inline]
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes, path)
    }

    fn from_bytes(bytes: &[u8], path: &Path) -> Result<Self> {
        let corrupt = |reason: String| RagError::CorruptIndex {
            path: path.to_path_buf(),
            reason,
        };

        if bytes.len() < HEADER_LEN {
            return Err(corrupt(format!(
                "file is {} bytes, shorter than the {} byte header",
                bytes.len(),
                HEADER_LEN
            )));
        }

        let (magic, rest) = bytes.split_at(MAGIC.len());
        if magic != MAGIC {
            return Err(corrupt("unrecognized file signature".to_string()));
        }

        let (version, rest) = rest.split_at(4);
        let version = u32::from_le_bytes(read_array(version));
        if version != FORMAT_VERSION {
            return Err(corrupt(format!("unsupported format version {}", version)));
        }

        let (dimension, rest) = rest.split_at(4);
        let dimension = u32::from_le_bytes(read_array(dimension)) as usize;

        let (count, payload) = rest.split_at(8);
        let count = usize::try_from(u64::from_le_bytes(read_array(count)))
            .map_err(|_| corrupt("vector count does not fit in memory".to_string()))?;

        if dimension == 0 && count != 0 {
            return Err(corrupt(format!(
                "{} vectors declared with dimension 0",
                count
            )));
        }

        let expected_len = count
            .checked_mul(dimension)
            .and_then(|values| values.checked_mul(F32_LEN))
            .ok_or_else(|| corrupt("declared size overflows".to_string()))?;
        if payload.len() != expected_len {
            return Err(corrupt(format!(
                "expected {} bytes of vector data for {} x {}, found {}",
                expected_len,
                count,
                dimension,
                payload.len()
            )));
        }

        let data = payload
            .chunks_exact(F32_LEN)
            .map(|raw| f32::from_le_bytes(read_array(raw)))
            .collect();

        debug!(
            "Loaded index ({} vectors, dimension {}) from {}",
            count,
            dimension,
            path.display()
        );

        Ok(Self {
            dimension: if count == 0 { 0 } else { dimension },
            data,
        })
    }
}

/// Squared Euclidean distance between two equal-length vectors
#[inline]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

fn header_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        RagError::InvalidArgument(format!("dimension {} does not fit the index header", value))
    })
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0; N];
    out.copy_from_slice(bytes);
    out
}
