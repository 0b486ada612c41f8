//! Vector primitives for embedding arithmetic
//!
//! All embeddings entering the core are stored L2-normalized by the
//! external ingestor, so `dot` is the cosine score and the only similarity
//! primitive used downstream.

use crate::error::{Result, VectorError};

/// Tolerance on the stored-normalized invariant (‖v‖₂ = 1 ± 1e-2)
pub const NORM_TOLERANCE: f32 = 1e-2;

/// L2 norm of a vector
pub fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// L2-normalize a vector
///
/// Empty and zero-length vectors are reported as errors rather than
/// silently producing NaN components.
pub fn normalize(v: &[f32]) -> Result<Vec<f32>> {
    if v.is_empty() {
        return Err(VectorError::EmptyInput.into());
    }

    let n = norm(v);
    if n == 0.0 || !n.is_finite() {
        return Err(VectorError::ZeroNorm.into());
    }

    Ok(v.iter().map(|x| x / n).collect())
}

/// Dot product of two vectors of equal dimension
///
/// Under the normalization invariant this is the cosine similarity.
pub fn dot(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(VectorError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        }
        .into());
    }

    Ok(a.iter().zip(b.iter()).map(|(x, y)| x * y).sum())
}

/// Arithmetic mean of a non-empty set of equal-dimension vectors
pub fn centroid(vectors: &[Vec<f32>]) -> Result<Vec<f32>> {
    let first = vectors.first().ok_or(VectorError::EmptyInput)?;
    let dim = first.len();
    if dim == 0 {
        return Err(VectorError::EmptyInput.into());
    }

    let mut sum = vec![0.0f32; dim];
    for v in vectors {
        if v.len() != dim {
            return Err(VectorError::DimensionMismatch {
                expected: dim,
                actual: v.len(),
            }
            .into());
        }
        for (acc, x) in sum.iter_mut().zip(v.iter()) {
            *acc += x;
        }
    }

    let count = vectors.len() as f32;
    for acc in sum.iter_mut() {
        *acc /= count;
    }

    Ok(sum)
}

/// Verify the stored-normalized invariant on an embedding
pub fn check_normalized(v: &[f32]) -> Result<()> {
    let n = norm(v);
    if (n - 1.0).abs() > NORM_TOLERANCE {
        return Err(VectorError::NotNormalized { norm: n }.into());
    }
    Ok(())
}
