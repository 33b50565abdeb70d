use rayon::prelude::*;
use tracing::warn;

use crate::{
    error::Result,
    library_db::{ChunkKey, LibraryDb},
};

/// A stored chunk close to the query vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub key: ChunkKey,
    pub distance: f32,
}

/// Cosine distance `1 - cos(a, b)`, in `[0, 2]`.
///
/// A zero vector is treated as orthogonal to everything (distance 1).
///
/// # Examples
///
/// ```
/// use docseek::vector_search::cosine_distance;
///
/// assert_eq!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]), 0.0);
/// assert_eq!(cosine_distance(&[1.0, 0.0], &[0.0, 1.0]), 1.0);
/// ```
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 1.0;
    }
    (1.0 - dot / denom).clamp(0.0, 2.0)
}

/// Rank candidate vectors by distance to `query`, keeping the closest `limit`.
pub fn rank(
    query: &[f32],
    candidates: &[(ChunkKey, Vec<f32>)],
    limit: usize,
) -> Vec<Neighbor> {
    let mut neighbors: Vec<Neighbor> = candidates
        .par_iter()
        .filter_map(|(key, vector)| {
            if vector.len() != query.len() {
                warn!(
                    document = key.document,
                    order = key.order,
                    stored = vector.len(),
                    query = query.len(),
                    "skipping vector with mismatched dimension"
                );
                return None;
            }
            Some(Neighbor {
                key: *key,
                distance: cosine_distance(query, vector),
            })
        })
        .collect();

    neighbors.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.key.cmp(&b.key))
    });
    neighbors.truncate(limit);
    neighbors
}

/// Exhaustive nearest-neighbour search over every vector in the library.
pub fn nearest(
    library: &LibraryDb,
    query: &[f32],
    limit: usize,
) -> Result<Vec<Neighbor>> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let candidates = library.embeddings()?;
    Ok(rank(query, &candidates, limit))
}
